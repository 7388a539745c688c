//! Event Bus & View-Update Flags (C9, spec.md §4.9).
//!
//! Typed publish/subscribe keyed by an enumerated topic; dispatch is
//! synchronous on the publishing thread. View updates are *not* events:
//! they are a coalesced dirty-flag bitset the view drains on its own tick.
//! Subscriber registration is by name so `unsubscribe_all` can run on drop,
//! mirroring how `jdb::process::Process` tracks its `logging_thread` handle
//! to join on teardown rather than leaking it.

use std::sync::RwLock;

use crate::debugger::state::DebuggerState;
use crate::plugin::types::ThreadInfo;

/// A topic a subscriber registers against. One topic per spec.md §4.6
/// event variant family, plus the view-update channel itself.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventTopic {
    Debugger,
    Scan,
    ViewUpdate,
}

#[derive(Clone, Debug, PartialEq)]
pub enum DebuggerEvent {
    StateChanged { old: DebuggerState, new: DebuggerState },
    BreakpointHit { bp_id: u32, address: u64, thread_id: u32 },
    WatchpointHit { wp_id: u32, accessor_ip: u64, thread_id: u32 },
    Exception { code: u32, address: u64, thread_id: u32 },
    ModuleLoaded { name: String },
    ModuleUnloaded { name: String },
    ThreadCreated(ThreadInfo),
    ThreadExited(u32),
    ProcessExited { exit_code: i32 },
    OutputString(String),
    Error(String),
    Log(String),
}

#[derive(Clone, Debug, PartialEq)]
pub enum ScanEvent {
    Started { total_regions: u64 },
    Progress { regions_scanned: u64, total_regions: u64 },
    Completed { results_count: u64 },
    Aborted,
}

bitflags::bitflags! {
    /// Coalesced dirty-flag set for view refresh (spec.md §4.9). The worker
    /// publishes a `ViewUpdateEvent(flags)`; the view ORs repeated updates
    /// together and drains the set once per UI tick, refreshing only the
    /// dirty panels.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct ViewUpdateFlags: u32 {
        const DISASSEMBLY      = 1 << 0;
        const BREAKPOINTS      = 1 << 1;
        const WATCHPOINTS      = 1 << 2;
        const REGISTERS        = 1 << 3;
        const STACK            = 1 << 4;
        const MEMORY           = 1 << 5;
        const IMPORTS_EXPORTS  = 1 << 6;
        const THREADS          = 1 << 7;
        const STATE            = 1 << 8;
        const PROCESS_INFO     = 1 << 9;
        const SCAN_PROGRESS    = 1 << 10;
        const SCANNED_VALUES   = 1 << 11;
        const BUTTON_STATES    = 1 << 12;
        const INPUT_VISIBILITY = 1 << 13;
        const DATATYPES        = 1 << 14;
        const SCAN_MODES       = 1 << 15;
    }
}

struct Subscriber<E> {
    name: String,
    handler: Box<dyn Fn(&E) + Send + Sync>,
}

/// Synchronous pub/sub plus a coalesced view-update bitset. One instance is
/// shared (by reference) across the debugger worker, the scan controller,
/// and whatever drives the UI's refresh tick.
#[derive(Default)]
pub struct EventBus {
    debugger_subs: RwLock<Vec<Subscriber<DebuggerEvent>>>,
    scan_subs: RwLock<Vec<Subscriber<ScanEvent>>>,
    view_update: RwLock<ViewUpdateFlags>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe_debugger(&self, name: impl Into<String>, handler: impl Fn(&DebuggerEvent) + Send + Sync + 'static) {
        self.debugger_subs
            .write()
            .expect("event bus lock poisoned")
            .push(Subscriber { name: name.into(), handler: Box::new(handler) });
    }

    pub fn subscribe_scan(&self, name: impl Into<String>, handler: impl Fn(&ScanEvent) + Send + Sync + 'static) {
        self.scan_subs
            .write()
            .expect("event bus lock poisoned")
            .push(Subscriber { name: name.into(), handler: Box::new(handler) });
    }

    pub fn unsubscribe(&self, name: &str) {
        self.debugger_subs.write().expect("event bus lock poisoned").retain(|s| s.name != name);
        self.scan_subs.write().expect("event bus lock poisoned").retain(|s| s.name != name);
    }

    /// Publishes `event` in registration order (publish order within a topic
    /// is guaranteed; cross-topic order is not, per spec.md §5).
    pub fn publish_debugger(&self, event: DebuggerEvent) {
        for sub in self.debugger_subs.read().expect("event bus lock poisoned").iter() {
            (sub.handler)(&event);
        }
    }

    pub fn publish_scan(&self, event: ScanEvent) {
        for sub in self.scan_subs.read().expect("event bus lock poisoned").iter() {
            (sub.handler)(&event);
        }
    }

    /// ORs `flags` into the pending dirty set. Call sites never overwrite:
    /// multiple mutations between UI ticks must all remain visible.
    pub fn mark_dirty(&self, flags: ViewUpdateFlags) {
        *self.view_update.write().expect("event bus lock poisoned") |= flags;
    }

    /// Drains and returns the pending dirty set, resetting it to empty. This
    /// is the "coalesced on the view's message-loop tick" step from
    /// spec.md §4.9.
    pub fn drain_view_updates(&self) -> ViewUpdateFlags {
        let mut guard = self.view_update.write().expect("event bus lock poisoned");
        std::mem::take(&mut *guard)
    }

    #[cfg(test)]
    pub fn subscriber_count(&self, topic: EventTopic) -> usize {
        match topic {
            EventTopic::Debugger => self.debugger_subs.read().unwrap().len(),
            EventTopic::Scan => self.scan_subs.read().unwrap().len(),
            EventTopic::ViewUpdate => 0,
        }
    }
}
