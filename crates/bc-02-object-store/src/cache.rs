//! # Derived In-Memory Caches
//!
//! Hot lookups for the validator and main-chain code: unstable unit props,
//! recently stable props, the stable-by-MCI grouping and the pending
//! unstable-message reference counts that gate eviction.
//!
//! Discipline: all mutation happens under the node's `write` lock (the
//! store only adds an internal short lock for map integrity). Readers
//! outside the lock may observe a slightly stale snapshot, never an
//! inconsistent one. Every entry is derived from disk and can be rebuilt
//! at any time; eviction must therefore be *safe*, not merely rare - a
//! unit with pending unstable message references is never evicted.

use shared_types::{UnitId, UnitProps};
use std::collections::{BTreeMap, HashMap, HashSet};

/// Counters for observability and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStats {
    /// Units in the unstable map.
    pub unstable: usize,
    /// Units in the stable map.
    pub stable: usize,
    /// Distinct MCIs in the by-MCI grouping.
    pub mcis: usize,
    /// Units known (id seen and saved).
    pub known: usize,
}

/// The cache block guarded by one lock inside the store.
#[derive(Debug, Default)]
pub struct UnitCaches {
    /// Props of units with `is_stable = 0`.
    pub unstable: HashMap<UnitId, UnitProps>,
    /// Props of stable units retained for the retention window.
    pub stable: HashMap<UnitId, UnitProps>,
    /// Stable unit ids grouped by MCI.
    pub by_mci: BTreeMap<u64, Vec<UnitId>>,
    /// Ids of all units this node has saved (fast known-unit checks).
    pub known: HashSet<UnitId>,
    /// Unit → count of not-yet-stable messages referencing it.
    pub unstable_message_refs: HashMap<UnitId, u32>,
}

impl UnitCaches {
    /// Record a freshly saved (always unstable) unit.
    pub fn note_saved(&mut self, props: UnitProps) {
        self.known.insert(props.unit.clone());
        self.unstable.insert(props.unit.clone(), props);
    }

    /// Record additional unstable message references against `unit`.
    pub fn add_message_refs(&mut self, unit: &UnitId, count: u32) {
        if count > 0 {
            *self
                .unstable_message_refs
                .entry(unit.clone())
                .or_insert(0) += count;
        }
    }

    /// Release unstable message references (messages stabilized).
    pub fn release_message_refs(&mut self, unit: &UnitId, count: u32) {
        if let Some(refs) = self.unstable_message_refs.get_mut(unit) {
            *refs = refs.saturating_sub(count);
            if *refs == 0 {
                self.unstable_message_refs.remove(unit);
            }
        }
    }

    /// Move a unit from the unstable to the stable side with its final
    /// props.
    pub fn note_stabilized(&mut self, props: UnitProps) {
        debug_assert!(props.is_stable);
        let unit = props.unit.clone();
        self.unstable.remove(&unit);
        if let Some(mci) = props.main_chain_index {
            let group = self.by_mci.entry(mci).or_default();
            if !group.contains(&unit) {
                group.push(unit.clone());
            }
        }
        self.stable.insert(unit, props);
    }

    /// Props lookup across both maps.
    pub fn props(&self, unit: &str) -> Option<&UnitProps> {
        self.unstable.get(unit).or_else(|| self.stable.get(unit))
    }

    /// Update props in place (sequence flips, MCI assignment).
    pub fn update_props(&mut self, props: UnitProps) {
        let unit = props.unit.clone();
        if props.is_stable {
            self.note_stabilized(props);
        } else if self.unstable.contains_key(&unit) {
            self.unstable.insert(unit, props);
        }
    }

    /// Evict stable entries below `last_stable_mci - retention`, skipping
    /// any unit that still has pending unstable message references.
    /// Returns the number of evicted units.
    pub fn shrink(&mut self, last_stable_mci: u64, retention: u64) -> usize {
        let cutoff = last_stable_mci.saturating_sub(retention);
        let mut evicted = 0usize;
        let evictable: Vec<UnitId> = self
            .stable
            .iter()
            .filter(|(unit, props)| {
                props.main_chain_index.map_or(false, |mci| mci < cutoff)
                    && !self.unstable_message_refs.contains_key(*unit)
            })
            .map(|(unit, _)| unit.clone())
            .collect();
        for unit in evictable {
            if let Some(props) = self.stable.remove(&unit) {
                if let Some(mci) = props.main_chain_index {
                    if let Some(group) = self.by_mci.get_mut(&mci) {
                        group.retain(|u| u != &unit);
                        if group.is_empty() {
                            self.by_mci.remove(&mci);
                        }
                    }
                }
                evicted += 1;
            }
        }
        evicted
    }

    /// Drop everything. Used by `reset_memory` before a rebuild.
    pub fn clear(&mut self) {
        self.unstable.clear();
        self.stable.clear();
        self.by_mci.clear();
        self.known.clear();
        self.unstable_message_refs.clear();
    }

    /// Current sizes.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            unstable: self.unstable.len(),
            stable: self.stable.len(),
            mcis: self.by_mci.len(),
            known: self.known.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared_types::Sequence;

    fn props(unit: &str, mci: Option<u64>, stable: bool) -> UnitProps {
        UnitProps {
            unit: unit.into(),
            level: 1,
            witnessed_level: 1,
            best_parent_unit: None,
            is_on_main_chain: false,
            main_chain_index: mci,
            latest_included_mc_index: None,
            is_stable: stable,
            is_free: false,
            sequence: Sequence::Good,
            timestamp: 0,
            parent_units: vec![],
            witness_list_unit: None,
            last_ball_mci: 0,
            author_addresses: vec![],
            headers_commission: 0,
            payload_commission: 0,
            tps_fee: 0,
            actual_tps_fee: None,
        }
    }

    #[test]
    fn stabilization_moves_between_maps() {
        let mut caches = UnitCaches::default();
        caches.note_saved(props("U1", None, false));
        assert!(caches.unstable.contains_key("U1"));

        caches.note_stabilized(props("U1", Some(5), true));
        assert!(!caches.unstable.contains_key("U1"));
        assert!(caches.stable.contains_key("U1"));
        assert_eq!(caches.by_mci.get(&5).unwrap(), &vec!["U1".to_string()]);
    }

    #[test]
    fn shrink_respects_message_refs() {
        let mut caches = UnitCaches::default();
        caches.note_stabilized(props("OLD", Some(1), true));
        caches.note_stabilized(props("PINNED", Some(1), true));
        caches.add_message_refs(&"PINNED".to_string(), 2);

        let evicted = caches.shrink(100, 10);
        assert_eq!(evicted, 1);
        assert!(!caches.stable.contains_key("OLD"));
        assert!(caches.stable.contains_key("PINNED"));

        // Once the refs drain, the pinned unit becomes evictable.
        caches.release_message_refs(&"PINNED".to_string(), 2);
        assert_eq!(caches.shrink(100, 10), 1);
    }

    #[test]
    fn shrink_keeps_recent_units() {
        let mut caches = UnitCaches::default();
        caches.note_stabilized(props("RECENT", Some(95), true));
        assert_eq!(caches.shrink(100, 10), 0);
        assert!(caches.stable.contains_key("RECENT"));
    }
}
