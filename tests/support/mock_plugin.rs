//! A full, in-memory `PluginVtable` used by integration tests that don't
//! need a real ptrace'd target, and the only thing standing in for the
//! native plugin on platforms where `plugin::native_linux` isn't compiled
//! (SPEC_FULL.md §4.11). Memory is a flat byte vector addressed from zero,
//! breakpoints are tracked but never actually trap, and
//! `debugger_continue`/`debugger_step`/`debugger_run_to_address` pop from a
//! scripted queue of `StopReason`s so a test can drive a scenario (hit a
//! breakpoint, then exit) without an OS debuggee.

use std::sync::Mutex;

use vertex_core::error::{Result, VertexError};
use vertex_core::plugin::gateway::PluginVtable;
use vertex_core::plugin::types::*;

pub struct MockPlugin {
    state: Mutex<State>,
}

struct State {
    memory: Vec<u8>,
    valid: bool,
    next_bp_id: u32,
    breakpoints: Vec<(u32, u64, bool)>,
    scripted_stops: Vec<StopReason>,
    registers: Vec<(String, Vec<u8>)>,
}

impl MockPlugin {
    pub fn new(memory: Vec<u8>) -> Self {
        Self {
            state: Mutex::new(State {
                memory,
                valid: false,
                next_bp_id: 1,
                breakpoints: Vec::new(),
                scripted_stops: Vec::new(),
                registers: vec![("rip".into(), 0u64.to_le_bytes().to_vec()), ("rsp".into(), 0u64.to_le_bytes().to_vec())],
            }),
        }
    }

    /// Queues the `StopReason`s `debugger_continue`/`debugger_step` will
    /// return, in order, one per call.
    pub fn script_stops(&self, stops: Vec<StopReason>) {
        self.state.lock().unwrap().scripted_stops = stops;
    }

    fn next_stop(&self, fallback_thread: u32) -> StopReason {
        let mut state = self.state.lock().unwrap();
        if state.scripted_stops.is_empty() {
            StopReason::Paused { thread_id: fallback_thread }
        } else {
            state.scripted_stops.remove(0)
        }
    }
}

impl PluginVtable for MockPlugin {
    fn feature_bits(&self) -> PluginFeature {
        PluginFeature::PROCESS_CONTROL
            | PluginFeature::MEMORY_IO
            | PluginFeature::MODULE_ENUM
            | PluginFeature::DEBUG_CONTROL
            | PluginFeature::BREAKPOINTS
            | PluginFeature::REGISTERS
            | PluginFeature::THREAD_CONTROL
    }

    fn open_process(&self, _pid: u32) -> Result<()> {
        self.state.lock().unwrap().valid = true;
        Ok(())
    }

    fn close_process(&self) -> Result<()> {
        self.state.lock().unwrap().valid = false;
        Ok(())
    }

    fn kill_process(&self) -> Result<()> {
        self.state.lock().unwrap().valid = false;
        Ok(())
    }

    fn is_process_valid(&self) -> bool {
        self.state.lock().unwrap().valid
    }

    fn read_memory(&self, address: u64, size: u64) -> Result<Vec<u8>> {
        let state = self.state.lock().unwrap();
        let start = address as usize;
        let end = (start + size as usize).min(state.memory.len());
        state
            .memory
            .get(start..end)
            .map(|s| s.to_vec())
            .ok_or(VertexError::MemoryRead { address, size })
    }

    fn write_memory(&self, address: u64, bytes: &[u8]) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let start = address as usize;
        let end = start + bytes.len();
        if end > state.memory.len() {
            state.memory.resize(end, 0);
        }
        state.memory[start..end].copy_from_slice(bytes);
        Ok(())
    }

    fn query_memory_regions(&self) -> Result<Vec<MemoryRegion>> {
        let state = self.state.lock().unwrap();
        Ok(vec![MemoryRegion { base: 0, size: state.memory.len() as u64, readable: true, writable: true, executable: false }])
    }

    fn min_process_address(&self) -> Result<u64> {
        Ok(0)
    }

    fn max_process_address(&self) -> Result<u64> {
        Ok(self.state.lock().unwrap().memory.len() as u64)
    }

    fn enumerate_modules(&self) -> Result<Vec<ModuleInfo>> {
        Ok(vec![])
    }

    fn disassemble_range(&self, _address: u64, _byte_count: u32) -> Result<Vec<DisassembledInstruction>> {
        Err(VertexError::PluginFunctionMissing("disassemble_range"))
    }

    fn debugger_attach(&self) -> Result<()> {
        Ok(())
    }

    fn debugger_detach(&self) -> Result<()> {
        Ok(())
    }

    fn debugger_continue(&self, _pass_exception: bool) -> Result<StopReason> {
        Ok(self.next_stop(0))
    }

    fn debugger_pause(&self) -> Result<()> {
        Ok(())
    }

    fn debugger_step(&self, _mode: StepMode) -> Result<StopReason> {
        Ok(self.next_stop(0))
    }

    fn debugger_run_to_address(&self, _address: u64) -> Result<StopReason> {
        Ok(self.next_stop(0))
    }

    fn set_breakpoint(&self, address: u64, _kind: BreakpointKind) -> Result<u32> {
        let mut state = self.state.lock().unwrap();
        let id = state.next_bp_id;
        state.next_bp_id += 1;
        state.breakpoints.push((id, address, true));
        Ok(id)
    }

    fn remove_breakpoint(&self, id: u32) -> Result<()> {
        self.state.lock().unwrap().breakpoints.retain(|(bp_id, _, _)| *bp_id != id);
        Ok(())
    }

    fn enable_breakpoint(&self, id: u32, enable: bool) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(bp) = state.breakpoints.iter_mut().find(|(bp_id, _, _)| *bp_id == id) {
            bp.2 = enable;
            Ok(())
        } else {
            Err(VertexError::InvalidParameter(format!("no breakpoint {id}")))
        }
    }

    fn set_watchpoint(&self, _desc: WatchpointDescriptor) -> Result<u32> {
        Err(VertexError::PluginFunctionMissing("set_watchpoint"))
    }

    fn remove_watchpoint(&self, _id: u32) -> Result<()> {
        Err(VertexError::PluginFunctionMissing("remove_watchpoint"))
    }

    fn enable_watchpoint(&self, _id: u32, _enable: bool) -> Result<()> {
        Err(VertexError::PluginFunctionMissing("enable_watchpoint"))
    }

    fn get_threads(&self) -> Result<Vec<ThreadInfo>> {
        Ok(vec![ThreadInfo { tid: 1, is_main: true }])
    }

    fn get_current_thread(&self) -> Result<u32> {
        Ok(1)
    }

    fn get_registers(&self, _tid: u32) -> Result<RegisterSet> {
        Ok(RegisterSet { registers: self.state.lock().unwrap().registers.clone() })
    }

    fn read_register(&self, _tid: u32, name: &str) -> Result<Vec<u8>> {
        self.state
            .lock()
            .unwrap()
            .registers
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.clone())
            .ok_or_else(|| VertexError::RegisterNotFound(name.to_string()))
    }

    fn write_register(&self, _tid: u32, name: &str, bytes: &[u8]) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(entry) = state.registers.iter_mut().find(|(n, _)| n == name) {
            entry.1 = bytes.to_vec();
            Ok(())
        } else {
            Err(VertexError::RegisterNotFound(name.to_string()))
        }
    }

    fn suspend_thread(&self, _tid: u32) -> Result<()> {
        Ok(())
    }

    fn resume_thread(&self, _tid: u32) -> Result<()> {
        Ok(())
    }
}
