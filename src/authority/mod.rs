//! Authority/ownership: tracks which peer owns each entity, brokers
//! ownership transfers, and counts authority violations toward a
//! per-peer threshold so a misbehaving or desynced client gets disconnected
//! rather than silently tolerated forever.

use std::collections::HashMap;

use crate::error::{AuthError, Result};
use crate::ids::{NetworkEntityId, PeerId};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TransferState {
    Requested,
    Granted,
    Denied,
}

/// Server-arbitrated ownership table. The server is always authoritative
/// over the table itself; clients only ever see the result of a transfer,
/// never decide one unilaterally.
#[derive(Default)]
pub struct AuthoritySystem {
    owners: HashMap<NetworkEntityId, PeerId>,
    pending_transfers: HashMap<NetworkEntityId, (PeerId, TransferState)>,
    violations: HashMap<PeerId, u32>,
    violation_threshold: u32,
}

impl AuthoritySystem {
    pub fn new(violation_threshold: u32) -> Self {
        Self {
            owners: HashMap::new(),
            pending_transfers: HashMap::new(),
            violations: HashMap::new(),
            violation_threshold,
        }
    }

    pub fn set_owner(&mut self, net_id: NetworkEntityId, owner: PeerId) {
        self.owners.insert(net_id, owner);
    }

    pub fn owner_of(&self, net_id: NetworkEntityId) -> PeerId {
        self.owners.get(&net_id).copied().unwrap_or(PeerId::SERVER)
    }

    /// Verify that `sender` is allowed to author an authoritative update for
    /// `net_id`, counting and possibly escalating a violation if not.
    pub fn check_authority(&mut self, net_id: NetworkEntityId, sender: PeerId) -> Result<()> {
        let owner = self.owner_of(net_id);
        if sender == owner || sender.is_server() {
            return Ok(());
        }
        let count = self.violations.entry(sender).or_insert(0);
        *count += 1;
        tracing::warn!(?sender, ?net_id, count = *count, "authority violation");
        if *count > self.violation_threshold {
            return Err(AuthError::ViolationThresholdExceeded(sender).into());
        }
        Err(AuthError::AuthorityViolation { sender, net_id }.into())
    }

    pub fn request_transfer(&mut self, net_id: NetworkEntityId, to: PeerId) {
        self.pending_transfers
            .insert(net_id, (to, TransferState::Requested));
    }

    /// The server's decision on a pending transfer. Only the server should
    /// call this; a granted transfer immediately updates the owner table.
    pub fn resolve_transfer(&mut self, net_id: NetworkEntityId, grant: bool) -> Option<PeerId> {
        let (to, _) = self.pending_transfers.remove(&net_id)?;
        if grant {
            self.owners.insert(net_id, to);
            self.pending_transfers.insert(net_id, (to, TransferState::Granted));
            Some(to)
        } else {
            self.pending_transfers.insert(net_id, (to, TransferState::Denied));
            None
        }
    }

    pub fn forget_entity(&mut self, net_id: NetworkEntityId) {
        self.owners.remove(&net_id);
        self.pending_transfers.remove(&net_id);
    }

    pub fn forget_peer(&mut self, peer: PeerId) {
        self.violations.remove(&peer);
    }

    pub fn violation_count(&self, peer: PeerId) -> u32 {
        self.violations.get(&peer).copied().unwrap_or(0)
    }
}
