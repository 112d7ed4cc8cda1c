use std::net::SocketAddr;

use super::RemotePeer;
use crate::config::NetworkConfig;
use crate::connection::ConnectionError;
use crate::message::MessageFactory;

/// Fixed table of connected peers. A slot is freed on removal and reused by
/// the next promoted connection.
#[derive(Debug)]
pub struct RemotePeersHandler {
    slots: Vec<Option<RemotePeer>>,
}

impl RemotePeersHandler {
    pub fn new(max_connections: usize) -> Self {
        Self {
            slots: (0..max_connections).map(|_| None).collect(),
        }
    }

    pub fn max_connections(&self) -> usize {
        self.slots.len()
    }

    pub fn len(&self) -> usize {
        self.slots.iter().flatten().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn has_free_slot(&self) -> bool {
        self.slots.iter().any(Option::is_none)
    }

    pub fn add_remote_peer(
        &mut self,
        address: SocketAddr,
        id: u16,
        client_salt: u64,
        server_salt: u64,
        config: &NetworkConfig,
    ) -> Result<&mut RemotePeer, ConnectionError> {
        if self.find(address).is_some() {
            return Err(ConnectionError::AlreadyConnected(address));
        }
        let slot = self
            .slots
            .iter_mut()
            .find(|slot| slot.is_none())
            .ok_or(ConnectionError::NoFreeSlot)?;

        log::info!("Remote peer {} connected from {}", id, address);
        Ok(slot.insert(RemotePeer::new(address, id, client_salt, server_salt, config)))
    }

    pub fn find(&self, address: SocketAddr) -> Option<&RemotePeer> {
        self.iter().find(|peer| peer.address() == address)
    }

    pub fn find_mut(&mut self, address: SocketAddr) -> Option<&mut RemotePeer> {
        self.iter_mut().find(|peer| peer.address() == address)
    }

    pub fn get(&self, id: u16) -> Option<&RemotePeer> {
        self.iter().find(|peer| peer.id() == id)
    }

    pub fn get_mut(&mut self, id: u16) -> Option<&mut RemotePeer> {
        self.iter_mut().find(|peer| peer.id() == id)
    }

    /// Resets and frees the peer's slot. Returns its address if it existed.
    pub fn remove(&mut self, id: u16, factory: &mut MessageFactory) -> Option<SocketAddr> {
        let slot = self
            .slots
            .iter_mut()
            .find(|slot| slot.as_ref().is_some_and(|peer| peer.id() == id))?;
        let mut peer = slot.take()?;
        peer.reset(factory);
        log::info!("Remote peer {} at {} removed", id, peer.address());
        Some(peer.address())
    }

    pub fn iter(&self) -> impl Iterator<Item = &RemotePeer> {
        self.slots.iter().flatten()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut RemotePeer> {
        self.slots.iter_mut().flatten()
    }

    pub fn ids(&self) -> Vec<u16> {
        self.iter().map(RemotePeer::id).collect()
    }

    /// Ticks every peer and returns the ids of those that went silent.
    pub fn update(&mut self, dt: f32, factory: &mut MessageFactory) -> Vec<u16> {
        let mut inactive = Vec::new();
        for peer in self.iter_mut() {
            peer.update(dt, factory);
            if peer.is_inactive() {
                inactive.push(peer.id());
            }
        }
        inactive
    }

    pub fn clear(&mut self, factory: &mut MessageFactory) {
        for slot in &mut self.slots {
            if let Some(mut peer) = slot.take() {
                peer.reset(factory);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    #[test]
    fn test_slots_fill_and_free() {
        let config = NetworkConfig::default();
        let mut factory = MessageFactory::new(1);
        let mut handler = RemotePeersHandler::new(2);

        handler.add_remote_peer(addr(1), 1, 1, 2, &config).unwrap();
        handler.add_remote_peer(addr(2), 2, 3, 4, &config).unwrap();
        assert!(!handler.has_free_slot());
        assert!(matches!(
            handler.add_remote_peer(addr(3), 3, 5, 6, &config),
            Err(ConnectionError::NoFreeSlot)
        ));

        assert_eq!(handler.remove(1, &mut factory), Some(addr(1)));
        assert!(handler.has_free_slot());
        assert!(handler.find(addr(1)).is_none());

        handler.add_remote_peer(addr(3), 3, 5, 6, &config).unwrap();
        assert_eq!(handler.get(3).map(RemotePeer::address), Some(addr(3)));
        assert_eq!(handler.len(), 2);
    }

    #[test]
    fn test_duplicate_address_rejected() {
        let config = NetworkConfig::default();
        let mut handler = RemotePeersHandler::new(4);
        handler.add_remote_peer(addr(1), 1, 1, 2, &config).unwrap();
        assert!(matches!(
            handler.add_remote_peer(addr(1), 2, 1, 2, &config),
            Err(ConnectionError::AlreadyConnected(_))
        ));
    }

    #[test]
    fn test_update_reports_inactive() {
        let config = NetworkConfig {
            peer_inactivity_timeout_seconds: 1.0,
            ..NetworkConfig::default()
        };
        let mut factory = MessageFactory::new(4);
        let mut handler = RemotePeersHandler::new(2);
        handler.add_remote_peer(addr(1), 7, 1, 2, &config).unwrap();

        assert!(handler.update(0.5, &mut factory).is_empty());
        assert_eq!(handler.update(0.6, &mut factory), vec![7]);
        handler.clear(&mut factory);
        assert!(handler.is_empty());
    }
}
