//! Plain data types exchanged across the plugin boundary (spec.md §6.1).
//!
//! These mirror the structs declared in `include/sdk/*.h` on the C ABI side
//! (`ProcessInformation`, `ModuleInformation`, `MemoryRegion`,
//! `DisassemblerResults`, breakpoint/watchpoint descriptors, register sets),
//! translated into owned Rust values. The gateway never deals with raw
//! pointers or `extern "C"` function tables directly; a plugin author
//! implements `PluginVtable` (src/plugin/gateway.rs) and hands the gateway
//! an `Arc<dyn PluginVtable>`.

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProcessInfo {
    pub pid: u32,
    pub name: String,
}

impl ProcessInfo {
    pub fn new(pid: u32, name: impl Into<String>) -> Self {
        Self { pid, name: name.into() }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModuleInfo {
    pub base: u64,
    pub size: u64,
    pub name: String,
    pub path: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MemoryRegion {
    pub base: u64,
    pub size: u64,
    pub readable: bool,
    pub writable: bool,
    pub executable: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BranchKind {
    None,
    Jump,
    Call,
    Return,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DisassembledInstruction {
    pub address: u64,
    pub raw_bytes: Vec<u8>,
    pub mnemonic: String,
    pub operands: String,
    pub branch_kind: BranchKind,
    pub branch_target: Option<u64>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BreakpointKind {
    Execute,
    Read,
    Write,
    ReadWrite,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WatchpointKind {
    Read,
    Write,
    ReadWrite,
    Execute,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WatchpointDescriptor {
    pub address: u64,
    /// Must be one of 1, 2, 4, 8 (spec.md §3, `Watchpoint.size`).
    pub size: u8,
    pub kind: WatchpointKind,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StepMode {
    Into,
    Over,
    Out,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ThreadInfo {
    pub tid: u32,
    pub is_main: bool,
}

/// Why a previously-issued `debugger_continue`/`debugger_step`/
/// `debugger_run_to_address` stopped. `Process::wait_on_signal` in the
/// teacher maps a raw `WaitStatus` into exactly this shape (a process
/// state plus the signal that produced it); this generalizes that mapping
/// across plugin backends instead of baking it into one OS's wait call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopReason {
    BreakpointHit { id: u32, address: u64, thread_id: u32 },
    WatchpointHit { id: u32, accessor_ip: u64, thread_id: u32 },
    SteppedOk { thread_id: u32 },
    Exception { code: u32, address: u64, thread_id: u32 },
    Paused { thread_id: u32 },
    ProcessExited { exit_code: i32 },
}

/// Named register bytes, in host byte order, as returned by
/// `vertex_debugger_get_registers`/`read_register`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RegisterSet {
    pub registers: Vec<(String, Vec<u8>)>,
}

impl RegisterSet {
    pub fn get(&self, name: &str) -> Option<&[u8]> {
        self.registers
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_slice())
    }
}

bitflags::bitflags! {
    /// Capability probe bits (spec.md §4.1: "publishable as a set of
    /// feature bits so callers can query once and cache"). Maps to the SDK's
    /// `featureCapability: uint64_t` in `PluginInformation`.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct PluginFeature: u64 {
        const PROCESS_CONTROL = 1 << 0;
        const MEMORY_IO       = 1 << 1;
        const MODULE_ENUM     = 1 << 2;
        const DISASSEMBLY     = 1 << 3;
        const DEBUG_CONTROL   = 1 << 4;
        const BREAKPOINTS     = 1 << 5;
        const WATCHPOINTS     = 1 << 6;
        const REGISTERS       = 1 << 7;
        const THREAD_CONTROL  = 1 << 8;
    }
}
