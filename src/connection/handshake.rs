//! Client/server handshake state machines. The client sends a
//! `HandshakeRequest` and waits for an ack carrying its assigned
//! [`PeerId`]; the server validates the protocol version and optional auth
//! token before admitting a connection.

use crate::error::{AuthError, Result};
use crate::ids::PeerId;
use crate::protocol::message::{HandshakeAck, HandshakeRequest};
use crate::transport::header::PROTOCOL_VERSION;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ClientHandshakeState {
    AwaitingAck,
    Accepted(PeerId, u32),
    Rejected,
}

pub struct ClientHandshake {
    state: ClientHandshakeState,
}

impl ClientHandshake {
    pub fn new() -> Self {
        Self {
            state: ClientHandshakeState::AwaitingAck,
        }
    }

    pub fn request(requested_peer_id: Option<PeerId>, auth_token: Vec<u8>) -> HandshakeRequest {
        HandshakeRequest {
            client_protocol_version: PROTOCOL_VERSION,
            requested_peer_id,
            auth_token,
        }
    }

    pub fn on_ack(&mut self, ack: &HandshakeAck) -> Result<()> {
        if ack.accepted {
            self.state = ClientHandshakeState::Accepted(ack.assigned_peer_id, ack.session_id);
            Ok(())
        } else {
            self.state = ClientHandshakeState::Rejected;
            Err(AuthError::HandshakeRejected(
                ack.reject_reason.clone().unwrap_or_default(),
            )
            .into())
        }
    }

    pub fn state(&self) -> ClientHandshakeState {
        self.state
    }
}

impl Default for ClientHandshake {
    fn default() -> Self {
        Self::new()
    }
}

/// Server-side admission check: protocol version and, if configured, a
/// caller-supplied auth validator.
pub fn validate_request(
    request: &HandshakeRequest,
    auth_validator: Option<&dyn Fn(&[u8]) -> bool>,
) -> std::result::Result<(), String> {
    if request.client_protocol_version != PROTOCOL_VERSION {
        return Err(format!(
            "protocol version mismatch: client {} server {}",
            request.client_protocol_version, PROTOCOL_VERSION
        ));
    }
    if let Some(validator) = auth_validator {
        if !validator(&request.auth_token) {
            return Err("auth token rejected".to_string());
        }
    }
    Ok(())
}
