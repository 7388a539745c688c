//! Plugin Gateway (C1, spec.md §4.1).
//!
//! A thin typed wrapper over the plugin ABI. Every call that must reach the
//! target goes through [`PluginGateway::call`], which (a) confirms a plugin
//! is installed, (b) confirms the requested capability bit is set, and
//! (c) lets the plugin's own `Result` bubble through unchanged. The gateway
//! does not retry: it is a pure adapter, exactly as spec.md §4.1 requires.
//!
//! Generalized from `jdb::process::Process`'s role as "the thing the
//! debugger drives": there, `Process` directly owned a `Pid` and called
//! `nix::sys::ptrace` itself. Here that direct ownership is pulled out
//! behind a trait object so the core is agnostic to what's on the other
//! side (a real OS process, a remote stub, a test mock).

use std::sync::{Arc, RwLock};

use crate::error::{Result, VertexError};
use crate::plugin::types::*;

/// The contract a plugin implements (spec.md §6.1). Object-safe so the
/// gateway can hold it as `Arc<dyn PluginVtable>`.
pub trait PluginVtable: Send + Sync {
    fn feature_bits(&self) -> PluginFeature;

    fn open_process(&self, pid: u32) -> Result<()>;
    fn close_process(&self) -> Result<()>;
    fn kill_process(&self) -> Result<()>;
    fn is_process_valid(&self) -> bool;

    fn read_memory(&self, address: u64, size: u64) -> Result<Vec<u8>>;
    fn write_memory(&self, address: u64, bytes: &[u8]) -> Result<()>;
    fn query_memory_regions(&self) -> Result<Vec<MemoryRegion>>;
    fn min_process_address(&self) -> Result<u64>;
    fn max_process_address(&self) -> Result<u64>;

    fn enumerate_modules(&self) -> Result<Vec<ModuleInfo>>;

    fn disassemble_range(&self, address: u64, byte_count: u32) -> Result<Vec<DisassembledInstruction>>;

    fn debugger_attach(&self) -> Result<()>;
    fn debugger_detach(&self) -> Result<()>;
    /// Blocks until the target actually stops again (breakpoint, exception,
    /// step completion, or exit) and reports why, mirroring
    /// `Process::resume` + `Process::wait_on_signal` always being called
    /// as a pair in `jdb::process::Process`.
    fn debugger_continue(&self, pass_exception: bool) -> Result<StopReason>;
    /// Requests a stop without blocking for it; see `NativeLinuxPlugin`'s
    /// implementation for why this can't also wait.
    fn debugger_pause(&self) -> Result<()>;
    fn debugger_step(&self, mode: StepMode) -> Result<StopReason>;
    fn debugger_run_to_address(&self, address: u64) -> Result<StopReason>;

    fn set_breakpoint(&self, address: u64, kind: BreakpointKind) -> Result<u32>;
    fn remove_breakpoint(&self, id: u32) -> Result<()>;
    fn enable_breakpoint(&self, id: u32, enable: bool) -> Result<()>;

    fn set_watchpoint(&self, desc: WatchpointDescriptor) -> Result<u32>;
    fn remove_watchpoint(&self, id: u32) -> Result<()>;
    fn enable_watchpoint(&self, id: u32, enable: bool) -> Result<()>;

    fn get_threads(&self) -> Result<Vec<ThreadInfo>>;
    fn get_current_thread(&self) -> Result<u32>;
    fn get_registers(&self, tid: u32) -> Result<RegisterSet>;
    fn read_register(&self, tid: u32, name: &str) -> Result<Vec<u8>>;
    fn write_register(&self, tid: u32, name: &str, bytes: &[u8]) -> Result<()>;
    fn suspend_thread(&self, tid: u32) -> Result<()>;
    fn resume_thread(&self, tid: u32) -> Result<()>;
}

/// Wraps the currently-installed plugin (if any) and probes/caches its
/// capability bits on install, per spec.md §4.1.
pub struct PluginGateway {
    plugin: RwLock<Option<Arc<dyn PluginVtable>>>,
}

impl Default for PluginGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl PluginGateway {
    pub fn new() -> Self {
        Self { plugin: RwLock::new(None) }
    }

    pub fn install(&self, plugin: Arc<dyn PluginVtable>) {
        *self.plugin.write().expect("gateway lock poisoned") = Some(plugin);
    }

    pub fn uninstall(&self) {
        *self.plugin.write().expect("gateway lock poisoned") = None;
    }

    pub fn is_active(&self) -> bool {
        self.plugin.read().expect("gateway lock poisoned").is_some()
    }

    /// Cached capability probe: `PluginFeature::empty()` when no plugin is
    /// installed, otherwise the plugin's declared bits.
    pub fn features(&self) -> PluginFeature {
        self.plugin
            .read()
            .expect("gateway lock poisoned")
            .as_ref()
            .map(|p| p.feature_bits())
            .unwrap_or(PluginFeature::empty())
    }

    pub fn has_feature(&self, feature: PluginFeature) -> bool {
        self.features().contains(feature)
    }

    /// Core checked-call pattern: active + capability, then delegate. No
    /// retry, no recovery: callers decide what to do with the error.
    fn call<T>(
        &self,
        required: PluginFeature,
        missing_name: &'static str,
        f: impl FnOnce(&dyn PluginVtable) -> Result<T>,
    ) -> Result<T> {
        let guard = self.plugin.read().expect("gateway lock poisoned");
        let plugin = guard.as_ref().ok_or(VertexError::PluginNotActive)?;
        if !plugin.feature_bits().contains(required) {
            return Err(VertexError::PluginFunctionMissing(missing_name));
        }
        f(plugin.as_ref())
    }

    pub fn open_process(&self, pid: u32) -> Result<()> {
        self.call(PluginFeature::PROCESS_CONTROL, "open_process", |p| p.open_process(pid))
    }

    pub fn close_process(&self) -> Result<()> {
        self.call(PluginFeature::PROCESS_CONTROL, "close_process", |p| p.close_process())
    }

    pub fn kill_process(&self) -> Result<()> {
        self.call(PluginFeature::PROCESS_CONTROL, "kill_process", |p| p.kill_process())
    }

    pub fn is_process_valid(&self) -> bool {
        self.plugin
            .read()
            .expect("gateway lock poisoned")
            .as_ref()
            .map(|p| p.is_process_valid())
            .unwrap_or(false)
    }

    pub fn read_memory(&self, address: u64, size: u64) -> Result<Vec<u8>> {
        self.call(PluginFeature::MEMORY_IO, "read_memory", |p| p.read_memory(address, size))
    }

    pub fn write_memory(&self, address: u64, bytes: &[u8]) -> Result<()> {
        self.call(PluginFeature::MEMORY_IO, "write_memory", |p| p.write_memory(address, bytes))
    }

    pub fn query_memory_regions(&self) -> Result<Vec<MemoryRegion>> {
        self.call(PluginFeature::MEMORY_IO, "query_memory_regions", |p| p.query_memory_regions())
    }

    pub fn min_process_address(&self) -> Result<u64> {
        self.call(PluginFeature::MEMORY_IO, "min_process_address", |p| p.min_process_address())
    }

    pub fn max_process_address(&self) -> Result<u64> {
        self.call(PluginFeature::MEMORY_IO, "max_process_address", |p| p.max_process_address())
    }

    pub fn enumerate_modules(&self) -> Result<Vec<ModuleInfo>> {
        self.call(PluginFeature::MODULE_ENUM, "enumerate_modules", |p| p.enumerate_modules())
    }

    pub fn disassemble_range(&self, address: u64, byte_count: u32) -> Result<Vec<DisassembledInstruction>> {
        self.call(PluginFeature::DISASSEMBLY, "disassemble_range", |p| {
            p.disassemble_range(address, byte_count)
        })
    }

    pub fn debugger_attach(&self) -> Result<()> {
        self.call(PluginFeature::DEBUG_CONTROL, "debugger_attach", |p| p.debugger_attach())
    }

    pub fn debugger_detach(&self) -> Result<()> {
        self.call(PluginFeature::DEBUG_CONTROL, "debugger_detach", |p| p.debugger_detach())
    }

    pub fn debugger_continue(&self, pass_exception: bool) -> Result<StopReason> {
        self.call(PluginFeature::DEBUG_CONTROL, "debugger_continue", |p| {
            p.debugger_continue(pass_exception)
        })
    }

    pub fn debugger_pause(&self) -> Result<()> {
        self.call(PluginFeature::DEBUG_CONTROL, "debugger_pause", |p| p.debugger_pause())
    }

    pub fn debugger_step(&self, mode: StepMode) -> Result<StopReason> {
        self.call(PluginFeature::DEBUG_CONTROL, "debugger_step", |p| p.debugger_step(mode))
    }

    pub fn debugger_run_to_address(&self, address: u64) -> Result<StopReason> {
        self.call(PluginFeature::DEBUG_CONTROL, "debugger_run_to_address", |p| {
            p.debugger_run_to_address(address)
        })
    }

    pub fn set_breakpoint(&self, address: u64, kind: BreakpointKind) -> Result<u32> {
        self.call(PluginFeature::BREAKPOINTS, "set_breakpoint", |p| p.set_breakpoint(address, kind))
    }

    pub fn remove_breakpoint(&self, id: u32) -> Result<()> {
        self.call(PluginFeature::BREAKPOINTS, "remove_breakpoint", |p| p.remove_breakpoint(id))
    }

    pub fn enable_breakpoint(&self, id: u32, enable: bool) -> Result<()> {
        self.call(PluginFeature::BREAKPOINTS, "enable_breakpoint", |p| p.enable_breakpoint(id, enable))
    }

    pub fn set_watchpoint(&self, desc: WatchpointDescriptor) -> Result<u32> {
        self.call(PluginFeature::WATCHPOINTS, "set_watchpoint", |p| p.set_watchpoint(desc))
    }

    pub fn remove_watchpoint(&self, id: u32) -> Result<()> {
        self.call(PluginFeature::WATCHPOINTS, "remove_watchpoint", |p| p.remove_watchpoint(id))
    }

    pub fn enable_watchpoint(&self, id: u32, enable: bool) -> Result<()> {
        self.call(PluginFeature::WATCHPOINTS, "enable_watchpoint", |p| p.enable_watchpoint(id, enable))
    }

    pub fn get_threads(&self) -> Result<Vec<ThreadInfo>> {
        self.call(PluginFeature::THREAD_CONTROL, "get_threads", |p| p.get_threads())
    }

    pub fn get_current_thread(&self) -> Result<u32> {
        self.call(PluginFeature::THREAD_CONTROL, "get_current_thread", |p| p.get_current_thread())
    }

    pub fn get_registers(&self, tid: u32) -> Result<RegisterSet> {
        self.call(PluginFeature::REGISTERS, "get_registers", |p| p.get_registers(tid))
    }

    pub fn read_register(&self, tid: u32, name: &str) -> Result<Vec<u8>> {
        self.call(PluginFeature::REGISTERS, "read_register", |p| p.read_register(tid, name))
    }

    pub fn write_register(&self, tid: u32, name: &str, bytes: &[u8]) -> Result<()> {
        self.call(PluginFeature::REGISTERS, "write_register", |p| p.write_register(tid, name, bytes))
    }

    pub fn suspend_thread(&self, tid: u32) -> Result<()> {
        self.call(PluginFeature::THREAD_CONTROL, "suspend_thread", |p| p.suspend_thread(tid))
    }

    pub fn resume_thread(&self, tid: u32) -> Result<()> {
        self.call(PluginFeature::THREAD_CONTROL, "resume_thread", |p| p.resume_thread(tid))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct StubPlugin {
        features: PluginFeature,
        valid: Mutex<bool>,
    }

    impl PluginVtable for StubPlugin {
        fn feature_bits(&self) -> PluginFeature {
            self.features
        }
        fn open_process(&self, _pid: u32) -> Result<()> {
            *self.valid.lock().unwrap() = true;
            Ok(())
        }
        fn close_process(&self) -> Result<()> {
            *self.valid.lock().unwrap() = false;
            Ok(())
        }
        fn kill_process(&self) -> Result<()> {
            Ok(())
        }
        fn is_process_valid(&self) -> bool {
            *self.valid.lock().unwrap()
        }
        fn read_memory(&self, _a: u64, size: u64) -> Result<Vec<u8>> {
            Ok(vec![0u8; size as usize])
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
            Ok(u64::MAX)
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
            Ok(StopReason::Paused { thread_id: 0 })
        }
        fn debugger_pause(&self) -> Result<()> {
            Ok(())
        }
        fn debugger_step(&self, _m: StepMode) -> Result<StopReason> {
            Ok(StopReason::SteppedOk { thread_id: 0 })
        }
        fn debugger_run_to_address(&self, _a: u64) -> Result<StopReason> {
            Ok(StopReason::Paused { thread_id: 0 })
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
            Ok(0)
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

    #[test]
    fn call_without_plugin_is_plugin_not_active() {
        let gw = PluginGateway::new();
        assert!(matches!(gw.read_memory(0, 4), Err(VertexError::PluginNotActive)));
    }

    #[test]
    fn call_missing_capability_is_function_missing() {
        let gw = PluginGateway::new();
        gw.install(Arc::new(StubPlugin {
            features: PluginFeature::PROCESS_CONTROL,
            valid: Mutex::new(false),
        }));
        assert!(matches!(
            gw.read_memory(0, 4),
            Err(VertexError::PluginFunctionMissing("read_memory"))
        ));
    }

    #[test]
    fn call_with_capability_delegates() {
        let gw = PluginGateway::new();
        gw.install(Arc::new(StubPlugin {
            features: PluginFeature::PROCESS_CONTROL | PluginFeature::MEMORY_IO,
            valid: Mutex::new(false),
        }));
        assert_eq!(gw.read_memory(0, 4).unwrap().len(), 4);
        assert!(!gw.is_process_valid());
        gw.open_process(123).unwrap();
        assert!(gw.is_process_valid());
    }
}
