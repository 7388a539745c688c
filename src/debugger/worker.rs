//! Debugger Worker (C5, spec.md §4.5).
//!
//! The single authority over `DebuggerState` and the breakpoint/watchpoint
//! registry. Commands that must serialize against an in-flight
//! `debugger_continue`/`debugger_step` call run through
//! [`ThreadDispatcher::dispatch`] on the `Channel::DebuggerWorker` channel;
//! `request_pause` is the one exception, since by the time a caller wants to
//! interrupt a running target the worker thread is already blocked inside
//! the plugin's blocking continue/step call (see `PluginVtable::debugger_pause`).
//!
//! Generalizes `jdb::debugger::Debugger::dispatch_command` (which matched a
//! parsed `Command` against `Process` methods one arm at a time) into a
//! typed command enum over the gateway, plus the state machine and event
//! publication that `jdb`'s version left implicit in `Process::state`.

use crate::debugger::registry::BreakpointRegistry;
use crate::debugger::state::DebuggerState;
use crate::error::{Result, VertexError};
use crate::events::{DebuggerEvent, EventBus, ViewUpdateFlags};
use crate::plugin::gateway::PluginGateway;
use crate::plugin::types::{BreakpointKind, StepMode, StopReason, WatchpointDescriptor};
use std::sync::Arc;

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum DebuggerCommand {
    Attach(u32),
    Detach,
    Continue,
    StepInto,
    StepOver,
    StepOut,
    RunToAddress(u64),
    ToggleBreakpoint(u64, BreakpointKind),
    RemoveBreakpoint(u32),
    EnableBreakpoint(u32, bool),
    SetWatchpoint(WatchpointDescriptor),
    RemoveWatchpoint(u32),
    EnableWatchpoint(u32, bool),
}

pub struct DebuggerWorker {
    gateway: Arc<PluginGateway>,
    event_bus: Arc<EventBus>,
    state: DebuggerState,
    registry: BreakpointRegistry,
    current_thread: Option<u32>,
}

impl DebuggerWorker {
    pub fn new(gateway: Arc<PluginGateway>, event_bus: Arc<EventBus>) -> Self {
        Self { gateway, event_bus, state: DebuggerState::Detached, registry: BreakpointRegistry::new(), current_thread: None }
    }

    pub fn state(&self) -> DebuggerState {
        self.state
    }

    pub fn registry(&self) -> &BreakpointRegistry {
        &self.registry
    }

    /// Sends an async stop request. Safe to call from any thread, including
    /// while another thread is blocked inside `handle()` processing
    /// `Continue`/`StepInto` (spec.md §4.5: "pause must interrupt a running
    /// target without going through the command queue").
    pub fn request_pause(&self) -> Result<()> {
        self.gateway.debugger_pause()
    }

    fn transition(&mut self, next: DebuggerState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(VertexError::InvalidParameter(format!("illegal debugger transition {:?} -> {:?}", self.state, next)));
        }
        let old = self.state;
        self.state = next;
        self.event_bus.publish_debugger(DebuggerEvent::StateChanged { old, new: next });
        self.event_bus.mark_dirty(ViewUpdateFlags::STATE);
        Ok(())
    }

    /// Applies a blocking call's `StopReason` to the state machine and
    /// publishes whatever follow-up event the reason implies.
    fn apply_stop_reason(&mut self, reason: StopReason) -> Result<()> {
        match reason {
            StopReason::BreakpointHit { id, address, thread_id } => {
                self.current_thread = Some(thread_id);
                self.registry.record_breakpoint_hit(id);
                self.transition(DebuggerState::BreakpointHit)?;
                self.event_bus.publish_debugger(DebuggerEvent::BreakpointHit { bp_id: id, address, thread_id });
                self.event_bus.mark_dirty(ViewUpdateFlags::BREAKPOINTS | ViewUpdateFlags::REGISTERS | ViewUpdateFlags::DISASSEMBLY);
            }
            StopReason::WatchpointHit { id, accessor_ip, thread_id } => {
                self.current_thread = Some(thread_id);
                self.registry.record_watchpoint_hit(id, accessor_ip);
                self.transition(DebuggerState::BreakpointHit)?;
                self.event_bus.publish_debugger(DebuggerEvent::WatchpointHit { wp_id: id, accessor_ip, thread_id });
                self.event_bus.mark_dirty(ViewUpdateFlags::WATCHPOINTS | ViewUpdateFlags::REGISTERS);
            }
            StopReason::SteppedOk { thread_id } => {
                self.current_thread = Some(thread_id);
                self.transition(DebuggerState::Paused)?;
                self.event_bus.mark_dirty(ViewUpdateFlags::REGISTERS | ViewUpdateFlags::DISASSEMBLY | ViewUpdateFlags::STACK);
            }
            StopReason::Paused { thread_id } => {
                self.current_thread = Some(thread_id);
                self.transition(DebuggerState::Paused)?;
                self.event_bus.mark_dirty(ViewUpdateFlags::REGISTERS);
            }
            StopReason::Exception { code, address, thread_id } => {
                self.current_thread = Some(thread_id);
                self.transition(DebuggerState::Exception)?;
                self.event_bus.publish_debugger(DebuggerEvent::Exception { code, address, thread_id });
                self.event_bus.mark_dirty(ViewUpdateFlags::REGISTERS | ViewUpdateFlags::STATE);
            }
            StopReason::ProcessExited { exit_code } => {
                self.current_thread = None;
                self.transition(DebuggerState::Detached)?;
                self.event_bus.publish_debugger(DebuggerEvent::ProcessExited { exit_code });
            }
        }
        Ok(())
    }

    /// Processes one command to completion. Intended to be the body of the
    /// closure handed to `ThreadDispatcher::dispatch(&Channel::DebuggerWorker, ...)`
    /// so `Continue`/`StepInto` block only the dedicated worker thread.
    pub fn handle(&mut self, command: DebuggerCommand) -> Result<()> {
        match command {
            DebuggerCommand::Attach(pid) => {
                if self.state != DebuggerState::Detached {
                    return Err(VertexError::InvalidParameter("already attached".into()));
                }
                self.gateway.open_process(pid)?;
                self.gateway.debugger_attach()?;
                self.current_thread = self.gateway.get_current_thread().ok();
                self.transition(DebuggerState::Attached)
            }
            DebuggerCommand::Detach => {
                self.gateway.debugger_detach()?;
                self.current_thread = None;
                self.transition(DebuggerState::Detached)
            }
            DebuggerCommand::Continue => {
                self.require_stopped()?;
                self.transition(DebuggerState::Running)?;
                let reason = self.gateway.debugger_continue(false)?;
                self.apply_stop_reason(reason)
            }
            DebuggerCommand::StepInto | DebuggerCommand::StepOver | DebuggerCommand::StepOut => {
                self.require_stopped()?;
                self.transition(DebuggerState::Stepping)?;
                let mode = match command {
                    DebuggerCommand::StepInto => StepMode::Into,
                    DebuggerCommand::StepOver => StepMode::Over,
                    _ => StepMode::Out,
                };
                let reason = self.gateway.debugger_step(mode)?;
                self.apply_stop_reason(reason)
            }
            DebuggerCommand::RunToAddress(address) => {
                self.require_stopped()?;
                self.transition(DebuggerState::Running)?;
                let reason = self.gateway.debugger_run_to_address(address)?;
                self.apply_stop_reason(reason)
            }
            DebuggerCommand::ToggleBreakpoint(address, kind) => {
                // spec.md §4.7: toggle_at "either removes or adds". A
                // second toggle at the same address is a no-op on the
                // registry (§8), not a disable.
                if let Some(bp) = self.registry.breakpoint_at(address) {
                    let id = bp.id;
                    self.gateway.remove_breakpoint(id)?;
                    self.registry.remove_breakpoint(id);
                } else {
                    let id = self.gateway.set_breakpoint(address, kind)?;
                    self.registry.insert_breakpoint(id, address, kind);
                }
                self.event_bus.mark_dirty(ViewUpdateFlags::BREAKPOINTS | ViewUpdateFlags::DISASSEMBLY);
                Ok(())
            }
            DebuggerCommand::RemoveBreakpoint(id) => {
                self.gateway.remove_breakpoint(id)?;
                self.registry.remove_breakpoint(id);
                self.event_bus.mark_dirty(ViewUpdateFlags::BREAKPOINTS | ViewUpdateFlags::DISASSEMBLY);
                Ok(())
            }
            DebuggerCommand::EnableBreakpoint(id, enable) => {
                self.gateway.enable_breakpoint(id, enable)?;
                self.registry.set_breakpoint_enabled(id, enable);
                self.event_bus.mark_dirty(ViewUpdateFlags::BREAKPOINTS);
                Ok(())
            }
            DebuggerCommand::SetWatchpoint(desc) => {
                let id = self.gateway.set_watchpoint(desc)?;
                self.registry.insert_watchpoint(id, desc);
                self.event_bus.mark_dirty(ViewUpdateFlags::WATCHPOINTS);
                Ok(())
            }
            DebuggerCommand::RemoveWatchpoint(id) => {
                self.gateway.remove_watchpoint(id)?;
                self.registry.remove_watchpoint(id);
                self.event_bus.mark_dirty(ViewUpdateFlags::WATCHPOINTS);
                Ok(())
            }
            DebuggerCommand::EnableWatchpoint(id, enable) => {
                self.gateway.enable_watchpoint(id, enable)?;
                self.registry.set_watchpoint_enabled(id, enable);
                self.event_bus.mark_dirty(ViewUpdateFlags::WATCHPOINTS);
                Ok(())
            }
        }
    }

    fn require_stopped(&self) -> Result<()> {
        if self.state == DebuggerState::Attached || self.state.is_stopped() {
            Ok(())
        } else {
            Err(VertexError::InvalidParameter(format!("command requires a stopped target, state is {:?}", self.state)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::gateway::PluginVtable;
    use crate::plugin::types::*;
    use std::sync::Mutex;

    struct MockPlugin {
        stop_reason: Mutex<StopReason>,
    }

    impl PluginVtable for MockPlugin {
        fn feature_bits(&self) -> PluginFeature {
            PluginFeature::PROCESS_CONTROL | PluginFeature::DEBUG_CONTROL | PluginFeature::BREAKPOINTS | PluginFeature::THREAD_CONTROL
        }
        fn open_process(&self, _pid: u32) -> Result<()> {
            Ok(())
        }
        fn close_process(&self) -> Result<()> {
            Ok(())
        }
        fn kill_process(&self) -> Result<()> {
            Ok(())
        }
        fn is_process_valid(&self) -> bool {
            true
        }
        fn read_memory(&self, _a: u64, _s: u64) -> Result<Vec<u8>> {
            Ok(vec![])
        }
        fn write_memory(&self, _a: u64, _b: &[u8]) -> Result<()> {
            Ok(())
        }
        fn query_memory_regions(&self) -> Result<Vec<MemoryRegion>> {
            Ok(vec![])
        }
        fn min_process_address(&self) -> Result<u64> {
            Ok(0)
        }
        fn max_process_address(&self) -> Result<u64> {
            Ok(0)
        }
        fn enumerate_modules(&self) -> Result<Vec<ModuleInfo>> {
            Ok(vec![])
        }
        fn disassemble_range(&self, _a: u64, _b: u32) -> Result<Vec<DisassembledInstruction>> {
            Ok(vec![])
        }
        fn debugger_attach(&self) -> Result<()> {
            Ok(())
        }
        fn debugger_detach(&self) -> Result<()> {
            Ok(())
        }
        fn debugger_continue(&self, _p: bool) -> Result<StopReason> {
            Ok(*self.stop_reason.lock().unwrap())
        }
        fn debugger_pause(&self) -> Result<()> {
            Ok(())
        }
        fn debugger_step(&self, _m: StepMode) -> Result<StopReason> {
            Ok(StopReason::SteppedOk { thread_id: 1 })
        }
        fn debugger_run_to_address(&self, _a: u64) -> Result<StopReason> {
            Ok(StopReason::BreakpointHit { id: 1, address: _a, thread_id: 1 })
        }
        fn set_breakpoint(&self, _a: u64, _k: BreakpointKind) -> Result<u32> {
            Ok(1)
        }
        fn remove_breakpoint(&self, _id: u32) -> Result<()> {
            Ok(())
        }
        fn enable_breakpoint(&self, _id: u32, _e: bool) -> Result<()> {
            Ok(())
        }
        fn set_watchpoint(&self, _d: WatchpointDescriptor) -> Result<u32> {
            Ok(1)
        }
        fn remove_watchpoint(&self, _id: u32) -> Result<()> {
            Ok(())
        }
        fn enable_watchpoint(&self, _id: u32, _e: bool) -> Result<()> {
            Ok(())
        }
        fn get_threads(&self) -> Result<Vec<ThreadInfo>> {
            Ok(vec![])
        }
        fn get_current_thread(&self) -> Result<u32> {
            Ok(1)
        }
        fn get_registers(&self, _t: u32) -> Result<RegisterSet> {
            Ok(RegisterSet::default())
        }
        fn read_register(&self, _t: u32, _n: &str) -> Result<Vec<u8>> {
            Ok(vec![])
        }
        fn write_register(&self, _t: u32, _n: &str, _b: &[u8]) -> Result<()> {
            Ok(())
        }
        fn suspend_thread(&self, _t: u32) -> Result<()> {
            Ok(())
        }
        fn resume_thread(&self, _t: u32) -> Result<()> {
            Ok(())
        }
    }

    fn worker_with(reason: StopReason) -> DebuggerWorker {
        let gateway = Arc::new(PluginGateway::new());
        gateway.install(Arc::new(MockPlugin { stop_reason: Mutex::new(reason) }));
        DebuggerWorker::new(gateway, Arc::new(EventBus::new()))
    }

    #[test]
    fn attach_then_continue_reaches_breakpoint_hit() {
        let mut worker = worker_with(StopReason::BreakpointHit { id: 1, address: 0x1000, thread_id: 1 });
        worker.handle(DebuggerCommand::Attach(123)).unwrap();
        assert_eq!(worker.state(), DebuggerState::Attached);
        worker.handle(DebuggerCommand::Continue).unwrap();
        assert_eq!(worker.state(), DebuggerState::BreakpointHit);
        assert_eq!(worker.registry().breakpoint(1), None); // never inserted via toggle
    }

    #[test]
    fn continue_before_attach_is_rejected() {
        let mut worker = worker_with(StopReason::Paused { thread_id: 1 });
        assert!(worker.handle(DebuggerCommand::Continue).is_err());
    }

    #[test]
    fn toggle_breakpoint_twice_is_a_no_op_on_the_registry() {
        let mut worker = worker_with(StopReason::Paused { thread_id: 1 });
        worker.handle(DebuggerCommand::Attach(1)).unwrap();
        assert!(worker.registry().breakpoint_at(0x2000).is_none());
        worker.handle(DebuggerCommand::ToggleBreakpoint(0x2000, BreakpointKind::Execute)).unwrap();
        assert!(worker.registry().breakpoint_at(0x2000).unwrap().enabled);
        worker.handle(DebuggerCommand::ToggleBreakpoint(0x2000, BreakpointKind::Execute)).unwrap();
        assert!(worker.registry().breakpoint_at(0x2000).is_none());
    }

    #[test]
    fn process_exit_during_continue_returns_to_detached() {
        let mut worker = worker_with(StopReason::ProcessExited { exit_code: 0 });
        worker.handle(DebuggerCommand::Attach(1)).unwrap();
        worker.handle(DebuggerCommand::Continue).unwrap();
        assert_eq!(worker.state(), DebuggerState::Detached);
    }

    /// `debugger_step` is free to report `ProcessExited` too (the target can
    /// die mid single-step, not just mid-continue); `Stepping -> Detached`
    /// must be a legal transition or `apply_stop_reason` fails and strands
    /// the worker in `Stepping` with the exit event suppressed.
    #[test]
    fn process_exit_during_step_returns_to_detached() {
        let gateway = Arc::new(PluginGateway::new());
        gateway.install(Arc::new(MockPlugin { stop_reason: Mutex::new(StopReason::Paused { thread_id: 1 }) }));
        let mut worker = DebuggerWorker::new(gateway.clone(), Arc::new(EventBus::new()));
        worker.handle(DebuggerCommand::Attach(1)).unwrap();

        // Swap the gateway's plugin for one whose `debugger_step` reports
        // `ProcessExited`, mirroring `native_linux::wait_and_classify`
        // returning `ProcessExited` on `WaitStatus::Exited`.
        struct StepExitsPlugin;
        impl PluginVtable for StepExitsPlugin {
            fn feature_bits(&self) -> PluginFeature {
                PluginFeature::PROCESS_CONTROL | PluginFeature::DEBUG_CONTROL | PluginFeature::BREAKPOINTS | PluginFeature::THREAD_CONTROL
            }
            fn open_process(&self, _pid: u32) -> Result<()> {
                Ok(())
            }
            fn close_process(&self) -> Result<()> {
                Ok(())
            }
            fn kill_process(&self) -> Result<()> {
                Ok(())
            }
            fn is_process_valid(&self) -> bool {
                true
            }
            fn read_memory(&self, _a: u64, _s: u64) -> Result<Vec<u8>> {
                Ok(vec![])
            }
            fn write_memory(&self, _a: u64, _b: &[u8]) -> Result<()> {
                Ok(())
            }
            fn query_memory_regions(&self) -> Result<Vec<MemoryRegion>> {
                Ok(vec![])
            }
            fn min_process_address(&self) -> Result<u64> {
                Ok(0)
            }
            fn max_process_address(&self) -> Result<u64> {
                Ok(0)
            }
            fn enumerate_modules(&self) -> Result<Vec<ModuleInfo>> {
                Ok(vec![])
            }
            fn disassemble_range(&self, _a: u64, _b: u32) -> Result<Vec<DisassembledInstruction>> {
                Ok(vec![])
            }
            fn debugger_attach(&self) -> Result<()> {
                Ok(())
            }
            fn debugger_detach(&self) -> Result<()> {
                Ok(())
            }
            fn debugger_continue(&self, _p: bool) -> Result<StopReason> {
                Ok(StopReason::Paused { thread_id: 1 })
            }
            fn debugger_pause(&self) -> Result<()> {
                Ok(())
            }
            fn debugger_step(&self, _m: StepMode) -> Result<StopReason> {
                Ok(StopReason::ProcessExited { exit_code: 0 })
            }
            fn debugger_run_to_address(&self, _a: u64) -> Result<StopReason> {
                Ok(StopReason::Paused { thread_id: 1 })
            }
            fn set_breakpoint(&self, _a: u64, _k: BreakpointKind) -> Result<u32> {
                Ok(1)
            }
            fn remove_breakpoint(&self, _id: u32) -> Result<()> {
                Ok(())
            }
            fn enable_breakpoint(&self, _id: u32, _e: bool) -> Result<()> {
                Ok(())
            }
            fn set_watchpoint(&self, _d: WatchpointDescriptor) -> Result<u32> {
                Ok(1)
            }
            fn remove_watchpoint(&self, _id: u32) -> Result<()> {
                Ok(())
            }
            fn enable_watchpoint(&self, _id: u32, _e: bool) -> Result<()> {
                Ok(())
            }
            fn get_threads(&self) -> Result<Vec<ThreadInfo>> {
                Ok(vec![])
            }
            fn get_current_thread(&self) -> Result<u32> {
                Ok(1)
            }
            fn get_registers(&self, _t: u32) -> Result<RegisterSet> {
                Ok(RegisterSet::default())
            }
            fn read_register(&self, _t: u32, _n: &str) -> Result<Vec<u8>> {
                Ok(vec![])
            }
            fn write_register(&self, _t: u32, _n: &str, _b: &[u8]) -> Result<()> {
                Ok(())
            }
            fn suspend_thread(&self, _t: u32) -> Result<()> {
                Ok(())
            }
            fn resume_thread(&self, _t: u32) -> Result<()> {
                Ok(())
            }
        }
        gateway.install(Arc::new(StepExitsPlugin));

        worker.handle(DebuggerCommand::StepInto).unwrap();
        assert_eq!(worker.state(), DebuggerState::Detached);
    }
}
