//! Datagram endpoint abstraction. A thin, non-blocking abstraction over
//! unreliable datagrams. The reliability layer (`transport`) owns one of
//! these exclusively per connection; nothing else touches it concurrently.

use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};

use crate::error::{Result, TransportError};

/// Implemented by every concrete datagram transport. `send_to`/`recv_from`
/// never block: `recv_from` returns `Ok(None)` rather than blocking when
/// nothing is queued (mapped from the OS's `WouldBlock`).
pub trait DatagramEndpoint: Send {
    fn send_to(&mut self, bytes: &[u8], addr: SocketAddr) -> Result<()>;

    /// Returns the next datagram and its source address, or `None` if the
    /// receive buffer is currently empty.
    fn recv_from(&mut self, buf: &mut [u8]) -> Result<Option<(usize, SocketAddr)>>;

    fn local_addr(&self) -> Result<SocketAddr>;

    fn close(self: Box<Self>);
}

/// UDP-backed [`DatagramEndpoint`] (IPv4/IPv6 via standard address
/// resolution), the default transport outside of tests.
pub struct UdpEndpoint {
    socket: UdpSocket,
}

impl UdpEndpoint {
    pub fn bind(address: impl ToSocketAddrs) -> Result<Self> {
        let socket =
            UdpSocket::bind(address).map_err(|_| TransportError::AddressUnavailable)?;
        socket
            .set_nonblocking(true)
            .map_err(|e| TransportError::SocketError(e.raw_os_error().unwrap_or(-1)))?;
        Ok(Self { socket })
    }

    /// Configure the OS send/receive buffer sizes. Best-effort: not every
    /// platform exposes this knob through the standard library, so failures
    /// are logged rather than propagated.
    pub fn set_buffer_sizes(&self, _send_bytes: usize, _recv_bytes: usize) {
        // std::net::UdpSocket has no portable buffer-size setter; a
        // platform-specific socket2-style implementation would hook in here.
        tracing::trace!("buffer size tuning requested but not supported on this platform");
    }
}

impl DatagramEndpoint for UdpEndpoint {
    fn send_to(&mut self, bytes: &[u8], addr: SocketAddr) -> Result<()> {
        match self.socket.send_to(bytes, addr) {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                Err(TransportError::WouldBlock.into())
            }
            Err(e) => Err(TransportError::SocketError(e.raw_os_error().unwrap_or(-1)).into()),
        }
    }

    fn recv_from(&mut self, buf: &mut [u8]) -> Result<Option<(usize, SocketAddr)>> {
        match self.socket.recv_from(buf) {
            Ok((n, addr)) => Ok(Some((n, addr))),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(TransportError::SocketError(e.raw_os_error().unwrap_or(-1)).into()),
        }
    }

    fn local_addr(&self) -> Result<SocketAddr> {
        self.socket
            .local_addr()
            .map_err(|e| TransportError::SocketError(e.raw_os_error().unwrap_or(-1)).into())
    }

    fn close(self: Box<Self>) {
        drop(self);
    }
}

/// In-process loopback transport used by tests and by co-located
/// client/server setups.
pub mod local {
    use super::*;
    use crossbeam_channel::{Receiver, Sender, TryRecvError};
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    pub const LOOPBACK_ADDR: SocketAddr = SocketAddr::new(
        std::net::IpAddr::V4(std::net::Ipv4Addr::new(127, 0, 0, 1)),
        0,
    );

    type Mailbox = Arc<Mutex<HashMap<SocketAddr, Sender<(Vec<u8>, SocketAddr)>>>>;

    /// A shared switchboard: every [`LocalEndpoint`] bound through the same
    /// [`LocalNetwork`] can address every other one by its bound address.
    #[derive(Clone, Default)]
    pub struct LocalNetwork {
        routes: Mailbox,
        next_port: Arc<Mutex<u16>>,
    }

    impl LocalNetwork {
        pub fn new() -> Self {
            Self {
                routes: Arc::new(Mutex::new(HashMap::new())),
                next_port: Arc::new(Mutex::new(1)),
            }
        }

        pub fn bind(&self) -> LocalEndpoint {
            let mut port_guard = self.next_port.lock().unwrap();
            let mut addr = LOOPBACK_ADDR;
            addr.set_port(*port_guard);
            *port_guard += 1;
            drop(port_guard);

            let (tx, rx) = crossbeam_channel::unbounded();
            self.routes.lock().unwrap().insert(addr, tx);
            LocalEndpoint {
                addr,
                routes: self.routes.clone(),
                inbox: rx,
            }
        }
    }

    pub struct LocalEndpoint {
        addr: SocketAddr,
        routes: Mailbox,
        inbox: Receiver<(Vec<u8>, SocketAddr)>,
    }

    impl DatagramEndpoint for LocalEndpoint {
        fn send_to(&mut self, bytes: &[u8], addr: SocketAddr) -> Result<()> {
            let routes = self.routes.lock().unwrap();
            if let Some(tx) = routes.get(&addr) {
                let _ = tx.send((bytes.to_vec(), self.addr));
                Ok(())
            } else {
                Err(TransportError::AddressUnavailable.into())
            }
        }

        fn recv_from(&mut self, buf: &mut [u8]) -> Result<Option<(usize, SocketAddr)>> {
            match self.inbox.try_recv() {
                Ok((data, from)) => {
                    let n = data.len().min(buf.len());
                    buf[..n].copy_from_slice(&data[..n]);
                    Ok(Some((n, from)))
                }
                Err(TryRecvError::Empty) => Ok(None),
                Err(TryRecvError::Disconnected) => Ok(None),
            }
        }

        fn local_addr(&self) -> Result<SocketAddr> {
            Ok(self.addr)
        }

        fn close(self: Box<Self>) {
            self.routes.lock().unwrap().remove(&self.addr);
        }
    }
}
