//! Breakpoint / watchpoint registry (C6, spec.md §4.6).
//!
//! Owns the authoritative id→descriptor maps and a secondary address index
//! for O(1) "is there a breakpoint here" lookups from the disassembly view.
//! Generalized from `jdb::process::stoppoint`'s `BreakpointSite` (a single
//! monotonic-id registry keyed by address) into two parallel registries:
//! one for software breakpoints, one for hardware watchpoints, since the
//! spec gives watchpoints their own id space and descriptor shape.
//!
//! Mutated only from the debugger worker thread (spec.md §4.6 invariant);
//! nothing here takes a lock; callers on other threads go through the
//! worker's command queue instead.

use std::collections::HashMap;

use crate::plugin::types::{BreakpointKind, WatchpointDescriptor};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BreakpointRecord {
    pub id: u32,
    pub address: u64,
    pub kind: BreakpointKind,
    pub enabled: bool,
    pub hit_count: u64,
}

/// Outcome of [`BreakpointRegistry::toggle_at`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ToggleOutcome {
    Added(u32),
    Removed(BreakpointRecord),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WatchpointRecord {
    pub id: u32,
    pub descriptor: WatchpointDescriptor,
    pub enabled: bool,
    pub hit_count: u64,
    /// Instruction pointer of the most recent accessor (spec.md §3:
    /// "last_accessor_ip"), `None` until first hit.
    pub last_accessor_ip: Option<u64>,
}

#[derive(Default)]
pub struct BreakpointRegistry {
    breakpoints: HashMap<u32, BreakpointRecord>,
    by_address: HashMap<u64, u32>,
    watchpoints: HashMap<u32, WatchpointRecord>,
}

impl BreakpointRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_breakpoint(&mut self, id: u32, address: u64, kind: BreakpointKind) {
        self.breakpoints.insert(id, BreakpointRecord { id, address, kind, enabled: true, hit_count: 0 });
        self.by_address.insert(address, id);
    }

    pub fn remove_breakpoint(&mut self, id: u32) -> Option<BreakpointRecord> {
        let record = self.breakpoints.remove(&id)?;
        self.by_address.remove(&record.address);
        Some(record)
    }

    pub fn set_breakpoint_enabled(&mut self, id: u32, enabled: bool) -> Option<()> {
        self.breakpoints.get_mut(&id).map(|r| r.enabled = enabled)
    }

    pub fn has_breakpoint_at(&self, address: u64) -> bool {
        self.by_address.contains_key(&address)
    }

    pub fn breakpoint_at(&self, address: u64) -> Option<&BreakpointRecord> {
        self.by_address.get(&address).and_then(|id| self.breakpoints.get(id))
    }

    pub fn breakpoint(&self, id: u32) -> Option<&BreakpointRecord> {
        self.breakpoints.get(&id)
    }

    pub fn record_breakpoint_hit(&mut self, id: u32) {
        if let Some(r) = self.breakpoints.get_mut(&id) {
            r.hit_count += 1;
        }
    }

    pub fn breakpoints(&self) -> impl Iterator<Item = &BreakpointRecord> {
        self.breakpoints.values()
    }

    pub fn insert_watchpoint(&mut self, id: u32, descriptor: WatchpointDescriptor) {
        self.watchpoints.insert(id, WatchpointRecord { id, descriptor, enabled: true, hit_count: 0, last_accessor_ip: None });
    }

    pub fn remove_watchpoint(&mut self, id: u32) -> Option<WatchpointRecord> {
        self.watchpoints.remove(&id)
    }

    pub fn set_watchpoint_enabled(&mut self, id: u32, enabled: bool) -> Option<()> {
        self.watchpoints.get_mut(&id).map(|r| r.enabled = enabled)
    }

    pub fn record_watchpoint_hit(&mut self, id: u32, accessor_ip: u64) {
        if let Some(r) = self.watchpoints.get_mut(&id) {
            r.hit_count += 1;
            r.last_accessor_ip = Some(accessor_ip);
        }
    }

    pub fn watchpoint(&self, id: u32) -> Option<&WatchpointRecord> {
        self.watchpoints.get(&id)
    }

    pub fn watchpoints(&self) -> impl Iterator<Item = &WatchpointRecord> {
        self.watchpoints.values()
    }

    /// Toggles whatever breakpoint sits at `address`: adds one if absent,
    /// removes it if present (spec.md §4.7: "looks up by address and
    /// either removes or adds"; §8: a pair of toggles is a no-op on the
    /// registry). Callers still have to push the matching create/remove
    /// call through the plugin gateway; this only updates the bookkeeping
    /// side.
    pub fn toggle_at(&mut self, address: u64, id_if_new: u32, kind: BreakpointKind) -> ToggleOutcome {
        if let Some(&id) = self.by_address.get(&address) {
            let record = self.remove_breakpoint(id).expect("by_address entry without backing record");
            ToggleOutcome::Removed(record)
        } else {
            self.insert_breakpoint(id_if_new, address, kind);
            ToggleOutcome::Added(id_if_new)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_and_lookup_by_address_is_consistent() {
        let mut reg = BreakpointRegistry::new();
        reg.insert_breakpoint(1, 0x1000, BreakpointKind::Execute);
        assert!(reg.has_breakpoint_at(0x1000));
        assert_eq!(reg.breakpoint_at(0x1000).unwrap().id, 1);
    }

    #[test]
    fn remove_breakpoint_clears_address_index() {
        let mut reg = BreakpointRegistry::new();
        reg.insert_breakpoint(1, 0x1000, BreakpointKind::Execute);
        reg.remove_breakpoint(1);
        assert!(!reg.has_breakpoint_at(0x1000));
    }

    #[test]
    fn toggle_at_adds_then_removes() {
        let mut reg = BreakpointRegistry::new();
        assert_eq!(reg.toggle_at(0x2000, 7, BreakpointKind::Execute), ToggleOutcome::Added(7));
        assert!(reg.has_breakpoint_at(0x2000));
        match reg.toggle_at(0x2000, 99, BreakpointKind::Execute) {
            ToggleOutcome::Removed(record) => assert_eq!(record.id, 7),
            other => panic!("expected Removed, got {other:?}"),
        }
        assert!(!reg.has_breakpoint_at(0x2000));
    }

    #[test]
    fn watchpoint_hit_tracks_last_accessor() {
        let mut reg = BreakpointRegistry::new();
        reg.insert_watchpoint(
            3,
            WatchpointDescriptor { address: 0x3000, size: 4, kind: crate::plugin::types::WatchpointKind::Write },
        );
        reg.record_watchpoint_hit(3, 0xdead);
        assert_eq!(reg.watchpoint(3).unwrap().last_accessor_ip, Some(0xdead));
        assert_eq!(reg.watchpoint(3).unwrap().hit_count, 1);
    }
}
