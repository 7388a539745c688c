//! Debugger control plane (spec.md §4.5, §4.6).

pub mod registry;
pub mod state;
pub mod worker;

pub use registry::{BreakpointRecord, BreakpointRegistry, ToggleOutcome, WatchpointRecord};
pub use state::DebuggerState;
pub use worker::{DebuggerCommand, DebuggerWorker};
