use std::{collections::HashMap, net::SocketAddr};
use crate::transport::NetHandle;
use super::connection::PeerConnection;

// The peer set, reachable both by net-handle (the I/O layer's key) and by
// address (duplicate detection). Owns every connection outright.
#[derive(Debug, Default)]
pub struct PeerManager {

    peers: HashMap<NetHandle, PeerConnection>,

    by_addr: HashMap<SocketAddr, NetHandle>,

}

impl PeerManager {

    pub fn new() -> PeerManager {
        PeerManager::default()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn contains_addr(&self, addr: &SocketAddr) -> bool {
        self.by_addr.contains_key(addr)
    }

    pub fn contains(&self, handle: NetHandle) -> bool {
        self.peers.contains_key(&handle)
    }

    // Refuses handles and addresses already in the set.
    pub fn insert(&mut self, handle: NetHandle, pc: PeerConnection) -> bool {
        if self.peers.contains_key(&handle) || self.by_addr.contains_key(&pc.address()) {
            return false;
        }
        self.by_addr.insert(pc.address(), handle);
        self.peers.insert(handle, pc);
        true
    }

    pub fn remove(&mut self, handle: NetHandle) -> Option<PeerConnection> {
        let pc = self.peers.remove(&handle)?;
        self.by_addr.remove(&pc.address());
        Some(pc)
    }

    pub fn get(&self, handle: NetHandle) -> Option<&PeerConnection> {
        self.peers.get(&handle)
    }

    pub fn get_mut(&mut self, handle: NetHandle) -> Option<&mut PeerConnection> {
        self.peers.get_mut(&handle)
    }

    pub fn handle_for(&self, addr: &SocketAddr) -> Option<NetHandle> {
        self.by_addr.get(addr).copied()
    }

    pub fn handles(&self) -> Vec<NetHandle> {
        self.peers.keys().copied().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (NetHandle, &PeerConnection)> {
        self.peers.iter().map(|(h, pc)| (*h, pc))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use std::time::Instant;

    fn pc(addr: &str) -> PeerConnection {
        PeerConnection::new(addr.parse().unwrap(), &Config::default(), false, Instant::now())
    }

    #[test]
    fn test_insert_and_lookup() {
        let mut manager = PeerManager::new();
        assert!(manager.insert(NetHandle(1), pc("10.0.0.1:6881")));
        assert_eq!(manager.len(), 1);
        assert!(manager.contains(NetHandle(1)));
        assert!(manager.contains_addr(&"10.0.0.1:6881".parse().unwrap()));
        assert_eq!(manager.handle_for(&"10.0.0.1:6881".parse().unwrap()), Some(NetHandle(1)));
    }

    #[test]
    fn test_duplicates_refused() {
        let mut manager = PeerManager::new();
        assert!(manager.insert(NetHandle(1), pc("10.0.0.1:6881")));
        // Same handle, different address.
        assert!(!manager.insert(NetHandle(1), pc("10.0.0.2:6881")));
        // Different handle, same address.
        assert!(!manager.insert(NetHandle(2), pc("10.0.0.1:6881")));
        assert_eq!(manager.len(), 1);
    }

    #[test]
    fn test_remove_clears_both_indexes() {
        let mut manager = PeerManager::new();
        manager.insert(NetHandle(1), pc("10.0.0.1:6881"));
        let removed = manager.remove(NetHandle(1)).unwrap();
        assert_eq!(removed.address(), "10.0.0.1:6881".parse().unwrap());
        assert!(manager.is_empty());
        assert!(!manager.contains_addr(&"10.0.0.1:6881".parse().unwrap()));
        // The slot is free again.
        assert!(manager.insert(NetHandle(2), pc("10.0.0.1:6881")));
    }
}
