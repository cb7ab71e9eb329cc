//! In-memory set of neighbors currently believed reachable and routed
//!
//! One exclusive lock guards every read and write. Critical sections only copy
//! or mutate the map; route calls always happen after the guard is dropped.

use crate::types::Neighbor;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::IpAddr;

/// Result of inserting or updating a table entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    /// Address was not tracked before
    Inserted,
    /// Address already tracked on the same link
    Unchanged,
    /// Address was tracked on another link, which is returned
    LinkChanged { previous: u32 },
}

/// Neighbor table keyed by address
#[derive(Debug, Default)]
pub struct NeighborTable {
    entries: Mutex<HashMap<IpAddr, Neighbor>>,
}

impl NeighborTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or move a neighbor
    pub fn upsert(&self, neighbor: Neighbor) -> Upsert {
        let mut entries = self.entries.lock();
        match entries.insert(neighbor.address, neighbor) {
            None => Upsert::Inserted,
            Some(prev) if prev.link_index == neighbor.link_index => Upsert::Unchanged,
            Some(prev) => Upsert::LinkChanged {
                previous: prev.link_index,
            },
        }
    }

    pub fn remove(&self, address: &IpAddr) -> Option<Neighbor> {
        self.entries.lock().remove(address)
    }

    /// Remove the entry only if it is tracked on the same link
    pub fn remove_exact(&self, neighbor: &Neighbor) -> bool {
        let mut entries = self.entries.lock();
        if entries.get(&neighbor.address) == Some(neighbor) {
            entries.remove(&neighbor.address);
            true
        } else {
            false
        }
    }

    pub fn get(&self, address: &IpAddr) -> Option<Neighbor> {
        self.entries.lock().get(address).copied()
    }

    /// True if the exact (address, link) pair is tracked
    pub fn contains(&self, neighbor: &Neighbor) -> bool {
        self.get(&neighbor.address) == Some(*neighbor)
    }

    /// Point-in-time copy of all entries, in no particular order
    pub fn snapshot(&self) -> Vec<Neighbor> {
        self.entries.lock().values().copied().collect()
    }

    /// Remove and return every entry
    pub fn drain(&self) -> Vec<Neighbor> {
        self.entries.lock().drain().map(|(_, n)| n).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn neigh(ip: &str, link: u32) -> Neighbor {
        Neighbor::new(ip.parse().unwrap(), link)
    }

    #[test]
    fn test_upsert_transitions() {
        let table = NeighborTable::new();
        assert_eq!(table.upsert(neigh("10.0.0.5", 2)), Upsert::Inserted);
        assert_eq!(table.upsert(neigh("10.0.0.5", 2)), Upsert::Unchanged);
        assert_eq!(
            table.upsert(neigh("10.0.0.5", 3)),
            Upsert::LinkChanged { previous: 2 }
        );
        assert_eq!(table.len(), 1);
        assert_eq!(table.get(&"10.0.0.5".parse().unwrap()), Some(neigh("10.0.0.5", 3)));
    }

    #[test]
    fn test_remove_and_contains() {
        let table = NeighborTable::new();
        table.upsert(neigh("2001:db8::1", 4));
        assert!(table.contains(&neigh("2001:db8::1", 4)));
        assert!(!table.contains(&neigh("2001:db8::1", 5)));

        assert_eq!(
            table.remove(&"2001:db8::1".parse().unwrap()),
            Some(neigh("2001:db8::1", 4))
        );
        assert!(table.remove(&"2001:db8::1".parse().unwrap()).is_none());
        assert!(table.is_empty());
    }

    #[test]
    fn test_remove_exact_checks_link() {
        let table = NeighborTable::new();
        table.upsert(neigh("10.0.0.5", 2));

        assert!(!table.remove_exact(&neigh("10.0.0.5", 1)));
        assert_eq!(table.snapshot(), vec![neigh("10.0.0.5", 2)]);

        assert!(table.remove_exact(&neigh("10.0.0.5", 2)));
        assert!(table.is_empty());
        assert!(!table.remove_exact(&neigh("10.0.0.5", 2)));
    }

    #[test]
    fn test_drain_is_idempotent() {
        let table = NeighborTable::new();
        table.upsert(neigh("10.0.0.1", 1));
        table.upsert(neigh("10.0.0.2", 1));

        let mut drained = table.drain();
        drained.sort_by_key(|n| n.address);
        assert_eq!(drained, vec![neigh("10.0.0.1", 1), neigh("10.0.0.2", 1)]);
        assert!(table.drain().is_empty());
    }

    #[test]
    fn test_concurrent_access() {
        let table = Arc::new(NeighborTable::new());
        let handles: Vec<_> = (0..8u8)
            .map(|t| {
                let table = table.clone();
                std::thread::spawn(move || {
                    for i in 0..100u8 {
                        table.upsert(Neighbor::new(
                            IpAddr::from([10, t, 0, i]),
                            u32::from(t),
                        ));
                        let _ = table.snapshot();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(table.len(), 800);
    }
}
