use std::sync::Arc;

use beam_core::PeerHandle;
use dashmap::DashSet;
use tracing::debug;

/// Peers with a live mesh connection.
///
/// Written by the connection lifecycle (insert on success, remove on
/// disconnect) and read concurrently by telemetry loops checking whether their
/// peer is still around. Cheap to clone; all clones share one set.
#[derive(Clone, Default)]
pub struct ActiveConnectionSet {
    peers: Arc<DashSet<PeerHandle>>,
}

impl ActiveConnectionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` if the peer was already present.
    pub fn insert(&self, peer: PeerHandle) -> bool {
        let added = self.peers.insert(peer.clone());
        debug!(peer = %peer, added, "active connection added");
        added
    }

    /// Returns `false` if the peer wasn't present.
    pub fn remove(&self, peer: &PeerHandle) -> bool {
        let removed = self.peers.remove(peer).is_some();
        debug!(peer = %peer, removed, "active connection removed");
        removed
    }

    pub fn contains(&self, peer: &PeerHandle) -> bool {
        self.peers.contains(peer)
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Sorted copy of the current members.
    pub fn snapshot(&self) -> Vec<PeerHandle> {
        let mut peers: Vec<PeerHandle> = self.peers.iter().map(|p| p.key().clone()).collect();
        peers.sort();
        peers
    }
}

impl std::fmt::Debug for ActiveConnectionSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.snapshot()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_remove() {
        let set = ActiveConnectionSet::new();
        let p = PeerHandle::from("P1");
        assert!(set.insert(p.clone()));
        assert!(!set.insert(p.clone()));
        assert_eq!(set.len(), 1);
        assert!(set.contains(&p));
        assert!(set.remove(&p));
        assert!(!set.remove(&p));
        assert!(set.is_empty());
    }

    #[test]
    fn test_clones_share_state() {
        let set = ActiveConnectionSet::new();
        let view = set.clone();
        set.insert(PeerHandle::from("B"));
        set.insert(PeerHandle::from("A"));
        assert_eq!(view.snapshot(), vec![PeerHandle::from("A"), PeerHandle::from("B")]);
    }

    #[test]
    fn test_concurrent_churn_never_double_counts() {
        let set = ActiveConnectionSet::new();
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let set = set.clone();
                std::thread::spawn(move || {
                    for i in 0..500 {
                        let p = PeerHandle::new(format!("peer-{}", i % 16));
                        if (i + t) % 2 == 0 {
                            set.insert(p);
                        } else {
                            set.remove(&p);
                        }
                        assert!(set.len() <= 16);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert!(set.len() <= 16);
        let snapshot = set.snapshot();
        let mut dedup = snapshot.clone();
        dedup.dedup();
        assert_eq!(snapshot, dedup);
    }
}
