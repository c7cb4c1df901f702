use std::net::SocketAddr;

// Opaque token for one transport-level connection, minted by the host I/O
// layer and used to key every peer-facing call both ways.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NetHandle(pub u32);

impl std::fmt::Display for NetHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {

    #[error("connect to {0} refused")]
    ConnectFailed(SocketAddr),

    #[error("send on {0} failed")]
    SendFailed(NetHandle),

}

// Socket plumbing provided by the host. The manager never owns sockets;
// it hands bytes to `send` and learns about connects and inbound data
// through its own entry points.
pub trait Transport {

    // Start an outbound connection and mint its handle. Completion arrives
    // later via DownloadManager::peer_connected or peer_connect_fail.
    fn connect(&mut self, addr: SocketAddr) -> Result<NetHandle, TransportError>;

    fn send(&mut self, handle: NetHandle, data: &[u8]) -> Result<(), TransportError>;

    fn close(&mut self, handle: NetHandle);

}
