//! Reference plugin: a Linux ptrace-based process backend (SPEC_FULL.md §4.11).
//!
//! The distilled spec treats the plugin purely as an external contract
//! (spec.md §6.1) and ships no implementation. `original_source`'s
//! `src/vertexusrrt/windows/process.cc`/`thread.cc` show what a concrete OS
//! backend behind that contract looks like; this module is the Linux
//! equivalent, built by generalizing `jdb::process::mod`'s `launch_executable`,
//! `Process::{attach,resume,wait_on_signal,destroy}` and
//! `Inferior::{enable,disable}_breakpoint_site` from PID-specific fields into
//! `PluginVtable`'s address/size/bytes vocabulary. It exists so the gateway,
//! the debugger worker, and the scan pipeline have something real to run
//! against in integration tests, not just the in-memory mock.
//!
//! Not implemented: watchpoints (no hardware debug-register plumbing) and
//! disassembly (no decoder is vendored). Both surface as
//! `VertexError::PluginFunctionMissing` via `feature_bits()` simply not
//! advertising those capabilities (exactly the probe-then-skip contract
//! spec.md §4.1 describes).

use std::ffi::CString;
use std::fs::{File, OpenOptions};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::FileExt;
use std::path::Path;
use std::sync::Mutex;

use memoffset::offset_of;
use nix::sys::ptrace;
use nix::sys::signal::{Signal, kill};
use nix::sys::wait::{WaitStatus, waitpid};
use nix::unistd::{ForkResult, Pid, execvp, fork};
use tracing::trace;

use crate::error::{Result, VertexError};
use crate::plugin::gateway::PluginVtable;
use crate::plugin::types::*;

/// `(name, byte offset into libc::user_regs_struct, width in bytes)`.
/// Generalizes `jdb::process::register_info::RegsField`'s per-field
/// `memoffset::offset_of!` lookups into a flat table so `read_register`/
/// `write_register` work generically rather than one match arm per name.
const REGISTER_TABLE: &[(&str, usize, usize)] = &[
    ("rax", offset_of!(libc::user_regs_struct, rax), 8),
    ("rbx", offset_of!(libc::user_regs_struct, rbx), 8),
    ("rcx", offset_of!(libc::user_regs_struct, rcx), 8),
    ("rdx", offset_of!(libc::user_regs_struct, rdx), 8),
    ("rsi", offset_of!(libc::user_regs_struct, rsi), 8),
    ("rdi", offset_of!(libc::user_regs_struct, rdi), 8),
    ("rbp", offset_of!(libc::user_regs_struct, rbp), 8),
    ("rsp", offset_of!(libc::user_regs_struct, rsp), 8),
    ("r8", offset_of!(libc::user_regs_struct, r8), 8),
    ("r9", offset_of!(libc::user_regs_struct, r9), 8),
    ("r10", offset_of!(libc::user_regs_struct, r10), 8),
    ("r11", offset_of!(libc::user_regs_struct, r11), 8),
    ("r12", offset_of!(libc::user_regs_struct, r12), 8),
    ("r13", offset_of!(libc::user_regs_struct, r13), 8),
    ("r14", offset_of!(libc::user_regs_struct, r14), 8),
    ("r15", offset_of!(libc::user_regs_struct, r15), 8),
    ("rip", offset_of!(libc::user_regs_struct, rip), 8),
    ("eflags", offset_of!(libc::user_regs_struct, eflags), 8),
];

fn regs_as_bytes(regs: &libc::user_regs_struct) -> &[u8] {
    let ptr = regs as *const libc::user_regs_struct as *const u8;
    unsafe { std::slice::from_raw_parts(ptr, std::mem::size_of::<libc::user_regs_struct>()) }
}

fn regs_as_bytes_mut(regs: &mut libc::user_regs_struct) -> &mut [u8] {
    let ptr = regs as *mut libc::user_regs_struct as *mut u8;
    unsafe { std::slice::from_raw_parts_mut(ptr, std::mem::size_of::<libc::user_regs_struct>()) }
}

const INT3: u8 = 0xCC;

struct SoftwareBreakpoint {
    id: u32,
    address: u64,
    original_byte: u8,
    enabled: bool,
}

struct Inner {
    pid: Option<Pid>,
    /// Whether this plugin launched the process itself (and so must reap it
    /// on kill/close) versus attaching to an already-running pid.
    owns_lifetime: bool,
    breakpoints: Vec<SoftwareBreakpoint>,
    next_bp_id: u32,
}

/// A Linux `ptrace(2)`-backed plugin. One instance owns at most one target
/// process at a time, matching the single-target shape of spec.md §6.1.
pub struct NativeLinuxPlugin {
    inner: Mutex<Inner>,
}

impl Default for NativeLinuxPlugin {
    fn default() -> Self {
        Self::new()
    }
}

impl NativeLinuxPlugin {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                pid: None,
                owns_lifetime: false,
                breakpoints: Vec::new(),
                next_bp_id: 1,
            }),
        }
    }

    /// Launch `path` under `traceme`, mirroring
    /// `jdb::process::mod::launch_executable`'s fork/traceme/execvp dance,
    /// minus the PTY plumbing (stdout capture is a GUI/TUI concern out of
    /// scope here).
    pub fn launch(&self, path: &Path, args: &[String]) -> Result<u32> {
        let mut inner = self.inner.lock().expect("native plugin lock poisoned");
        if inner.pid.is_some() {
            return Err(VertexError::General("a process is already open".into()));
        }

        match unsafe { fork() }.map_err(|e| VertexError::General(e.to_string()))? {
            ForkResult::Parent { child } => {
                waitpid(child, None).map_err(|e| VertexError::General(e.to_string()))?;
                inner.pid = Some(child);
                inner.owns_lifetime = true;
                trace!(pid = child.as_raw(), "launched and stopped inferior");
                Ok(child.as_raw() as u32)
            }
            ForkResult::Child => {
                ptrace::traceme().expect("traceme should succeed in child");
                let filename = CString::new(path.as_os_str().as_bytes()).expect("path has no NUL");
                let cargs: Vec<CString> = args.iter().map(|a| CString::new(a.as_str()).unwrap()).collect();
                let cargs_ref: Vec<&std::ffi::CStr> = cargs.iter().map(|c| c.as_c_str()).collect();
                let _ = execvp(filename.as_c_str(), &cargs_ref);
                std::process::exit(127);
            }
        }
    }

    fn require_pid(&self, inner: &Inner) -> Result<Pid> {
        inner.pid.ok_or(VertexError::ProcessInvalid)
    }

    fn mem_file(&self, pid: Pid, writable: bool) -> Result<File> {
        let path = format!("/proc/{}/mem", pid.as_raw());
        OpenOptions::new()
            .read(true)
            .write(writable)
            .open(&path)
            .map_err(|_| VertexError::ProcessInvalid)
    }
}

impl PluginVtable for NativeLinuxPlugin {
    fn feature_bits(&self) -> PluginFeature {
        PluginFeature::PROCESS_CONTROL
            | PluginFeature::MEMORY_IO
            | PluginFeature::MODULE_ENUM
            | PluginFeature::DEBUG_CONTROL
            | PluginFeature::BREAKPOINTS
            | PluginFeature::REGISTERS
            | PluginFeature::THREAD_CONTROL
    }

    fn open_process(&self, pid: u32) -> Result<()> {
        let mut inner = self.inner.lock().expect("native plugin lock poisoned");
        if inner.pid.is_some() {
            return Err(VertexError::General("a process is already open".into()));
        }
        let target = Pid::from_raw(pid as i32);
        ptrace::attach(target).map_err(|_| VertexError::ProcessAccessDenied(pid))?;
        waitpid(target, None).map_err(|_| VertexError::ProcessInvalid)?;
        inner.pid = Some(target);
        inner.owns_lifetime = false;
        Ok(())
    }

    fn close_process(&self) -> Result<()> {
        let mut inner = self.inner.lock().expect("native plugin lock poisoned");
        let Some(pid) = inner.pid.take() else { return Ok(()) };
        let _ = ptrace::detach(pid, None);
        inner.breakpoints.clear();
        Ok(())
    }

    fn kill_process(&self) -> Result<()> {
        let mut inner = self.inner.lock().expect("native plugin lock poisoned");
        let Some(pid) = inner.pid.take() else { return Ok(()) };
        let _ = kill(pid, Signal::SIGKILL);
        let _ = waitpid(pid, None);
        inner.breakpoints.clear();
        Ok(())
    }

    fn is_process_valid(&self) -> bool {
        let inner = self.inner.lock().expect("native plugin lock poisoned");
        match inner.pid {
            Some(pid) => Path::new(&format!("/proc/{}", pid.as_raw())).exists(),
            None => false,
        }
    }

    fn read_memory(&self, address: u64, size: u64) -> Result<Vec<u8>> {
        let inner = self.inner.lock().expect("native plugin lock poisoned");
        let pid = self.require_pid(&inner)?;
        let file = self.mem_file(pid, false)?;
        let mut buf = vec![0u8; size as usize];
        file.read_exact_at(&mut buf, address)
            .map_err(|_| VertexError::MemoryRead { address, size })?;
        Ok(buf)
    }

    fn write_memory(&self, address: u64, bytes: &[u8]) -> Result<()> {
        let inner = self.inner.lock().expect("native plugin lock poisoned");
        let pid = self.require_pid(&inner)?;
        let file = self.mem_file(pid, true)?;
        file.write_all_at(bytes, address).map_err(|_| VertexError::MemoryWrite {
            address,
            size: bytes.len() as u64,
        })
    }

    fn query_memory_regions(&self) -> Result<Vec<MemoryRegion>> {
        let inner = self.inner.lock().expect("native plugin lock poisoned");
        let pid = self.require_pid(&inner)?;
        let maps = std::fs::read_to_string(format!("/proc/{}/maps", pid.as_raw()))
            .map_err(|_| VertexError::ProcessInvalid)?;
        Ok(maps.lines().filter_map(parse_maps_line).collect())
    }

    fn min_process_address(&self) -> Result<u64> {
        Ok(self.query_memory_regions()?.iter().map(|r| r.base).min().unwrap_or(0))
    }

    fn max_process_address(&self) -> Result<u64> {
        Ok(self
            .query_memory_regions()?
            .iter()
            .map(|r| r.base + r.size)
            .max()
            .unwrap_or(0))
    }

    fn enumerate_modules(&self) -> Result<Vec<ModuleInfo>> {
        let inner = self.inner.lock().expect("native plugin lock poisoned");
        let pid = self.require_pid(&inner)?;
        let maps = std::fs::read_to_string(format!("/proc/{}/maps", pid.as_raw()))
            .map_err(|_| VertexError::ProcessInvalid)?;

        let mut modules: Vec<ModuleInfo> = Vec::new();
        for line in maps.lines() {
            let Some(path) = line.split_whitespace().nth(5) else { continue };
            if path.is_empty() || path.starts_with('[') {
                continue;
            }
            let Some(region) = parse_maps_line(line) else { continue };
            let name = Path::new(path)
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.to_string());

            if let Some(existing) = modules.iter_mut().find(|m| m.path == path) {
                existing.size += region.size;
            } else {
                modules.push(ModuleInfo {
                    base: region.base,
                    size: region.size,
                    name,
                    path: path.to_string(),
                });
            }
        }
        Ok(modules)
    }

    fn disassemble_range(&self, _address: u64, _byte_count: u32) -> Result<Vec<DisassembledInstruction>> {
        Err(VertexError::PluginFunctionMissing("disassemble_range"))
    }

    fn debugger_attach(&self) -> Result<()> {
        // Attachment already happened in `open_process`/`launch`; nothing
        // further to do (mirrors `jdb::process::Process::attach`, which
        // folds "spawn" and "attach" into one step).
        Ok(())
    }

    fn debugger_detach(&self) -> Result<()> {
        self.close_process()
    }

    fn debugger_continue(&self, _pass_exception: bool) -> Result<StopReason> {
        let mut inner = self.inner.lock().expect("native plugin lock poisoned");
        let pid = self.require_pid(&inner)?;
        ptrace::cont(pid, None).map_err(|_| VertexError::General("ptrace cont failed".into()))?;
        wait_and_classify(pid, &mut inner)
    }

    /// Only requests the stop; does not wait for it. Whichever thread is
    /// currently blocked inside `debugger_continue`/`debugger_step` observes
    /// the resulting `SIGSTOP` and reports `StopReason::Paused`: a second
    /// `waitpid` here would race the one already in flight there.
    fn debugger_pause(&self) -> Result<()> {
        let inner = self.inner.lock().expect("native plugin lock poisoned");
        let pid = self.require_pid(&inner)?;
        kill(pid, Signal::SIGSTOP).map_err(|_| VertexError::General("SIGSTOP failed".into()))
    }

    fn debugger_step(&self, _mode: StepMode) -> Result<StopReason> {
        let mut inner = self.inner.lock().expect("native plugin lock poisoned");
        let pid = self.require_pid(&inner)?;
        ptrace::step(pid, None).map_err(|_| VertexError::General("ptrace singlestep failed".into()))?;
        wait_and_classify(pid, &mut inner)
    }

    fn debugger_run_to_address(&self, address: u64) -> Result<StopReason> {
        self.set_breakpoint(address, BreakpointKind::Execute)?;
        self.debugger_continue(false)
    }

    fn set_breakpoint(&self, address: u64, kind: BreakpointKind) -> Result<u32> {
        if kind != BreakpointKind::Execute {
            return Err(VertexError::PluginFunctionMissing("set_breakpoint(non-execute)"));
        }
        let mut inner = self.inner.lock().expect("native plugin lock poisoned");
        let pid = self.require_pid(&inner)?;

        let word = ptrace::read(pid, address as ptrace::AddressType)
            .map_err(|_| VertexError::MemoryRead { address, size: 1 })?;
        let original_byte = (word & 0xff) as u8;
        let patched = (word & !0xff) | INT3 as i64;
        ptrace::write(pid, address as ptrace::AddressType, patched)
            .map_err(|_| VertexError::MemoryWrite { address, size: 1 })?;

        let id = inner.next_bp_id;
        inner.next_bp_id += 1;
        inner.breakpoints.push(SoftwareBreakpoint { id, address, original_byte, enabled: true });
        Ok(id)
    }

    fn remove_breakpoint(&self, id: u32) -> Result<()> {
        let mut inner = self.inner.lock().expect("native plugin lock poisoned");
        let pid = self.require_pid(&inner)?;
        let Some(pos) = inner.breakpoints.iter().position(|b| b.id == id) else {
            return Ok(());
        };
        let bp = inner.breakpoints.remove(pos);
        if bp.enabled {
            restore_original_byte(pid, &bp)?;
        }
        Ok(())
    }

    fn enable_breakpoint(&self, id: u32, enable: bool) -> Result<()> {
        let mut inner = self.inner.lock().expect("native plugin lock poisoned");
        let pid = self.require_pid(&inner)?;
        let Some(bp) = inner.breakpoints.iter_mut().find(|b| b.id == id) else {
            return Err(VertexError::General(format!("no such breakpoint {id}")));
        };
        if bp.enabled == enable {
            return Ok(());
        }
        if enable {
            let word = ptrace::read(pid, bp.address as ptrace::AddressType)
                .map_err(|_| VertexError::MemoryRead { address: bp.address, size: 1 })?;
            let patched = (word & !0xff) | INT3 as i64;
            ptrace::write(pid, bp.address as ptrace::AddressType, patched)
                .map_err(|_| VertexError::MemoryWrite { address: bp.address, size: 1 })?;
        } else {
            restore_original_byte(pid, bp)?;
        }
        bp.enabled = enable;
        Ok(())
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
        let inner = self.inner.lock().expect("native plugin lock poisoned");
        let pid = self.require_pid(&inner)?;
        let dir = std::fs::read_dir(format!("/proc/{}/task", pid.as_raw()))
            .map_err(|_| VertexError::ProcessInvalid)?;
        let mut threads = Vec::new();
        for entry in dir.flatten() {
            if let Ok(tid) = entry.file_name().to_string_lossy().parse::<u32>() {
                threads.push(ThreadInfo { tid, is_main: tid as i32 == pid.as_raw() });
            }
        }
        Ok(threads)
    }

    fn get_current_thread(&self) -> Result<u32> {
        let inner = self.inner.lock().expect("native plugin lock poisoned");
        Ok(self.require_pid(&inner)?.as_raw() as u32)
    }

    fn get_registers(&self, tid: u32) -> Result<RegisterSet> {
        let pid = Pid::from_raw(tid as i32);
        let regs = ptrace::getregs(pid).map_err(|_| VertexError::ThreadContextFailed(tid))?;
        let bytes = regs_as_bytes(&regs);
        let registers = REGISTER_TABLE
            .iter()
            .map(|(name, offset, size)| (name.to_string(), bytes[*offset..*offset + *size].to_vec()))
            .collect();
        Ok(RegisterSet { registers })
    }

    fn read_register(&self, tid: u32, name: &str) -> Result<Vec<u8>> {
        let pid = Pid::from_raw(tid as i32);
        let (_, offset, size) = REGISTER_TABLE
            .iter()
            .find(|(n, _, _)| *n == name)
            .ok_or_else(|| VertexError::RegisterNotFound(name.to_string()))?;
        let regs = ptrace::getregs(pid).map_err(|_| VertexError::ThreadContextFailed(tid))?;
        Ok(regs_as_bytes(&regs)[*offset..*offset + *size].to_vec())
    }

    fn write_register(&self, tid: u32, name: &str, bytes: &[u8]) -> Result<()> {
        let pid = Pid::from_raw(tid as i32);
        let (_, offset, size) = REGISTER_TABLE
            .iter()
            .find(|(n, _, _)| *n == name)
            .ok_or_else(|| VertexError::RegisterNotFound(name.to_string()))?;
        if bytes.len() != *size {
            return Err(VertexError::MemoryBufferTooSmall { needed: *size, have: bytes.len() });
        }
        let mut regs = ptrace::getregs(pid).map_err(|_| VertexError::ThreadContextFailed(tid))?;
        regs_as_bytes_mut(&mut regs)[*offset..*offset + *size].copy_from_slice(bytes);
        ptrace::setregs(pid, regs).map_err(|_| VertexError::RegisterWriteFailed(name.to_string()))
    }

    fn suspend_thread(&self, tid: u32) -> Result<()> {
        kill(Pid::from_raw(tid as i32), Signal::SIGSTOP)
            .map_err(|_| VertexError::ThreadSuspendFailed(tid))
    }

    fn resume_thread(&self, tid: u32) -> Result<()> {
        kill(Pid::from_raw(tid as i32), Signal::SIGCONT)
            .map_err(|_| VertexError::ThreadResumeFailed(tid))
    }
}

/// Blocks on `waitpid` and maps the result the same way
/// `Process::wait_on_signal` does, plus the breakpoint-address check that
/// `int3` trapping always needs: on `SIGTRAP` at `rip - 1`, rewind `rip` so
/// resuming re-executes the original instruction rather than whatever byte
/// sits one past it.
fn wait_and_classify(pid: Pid, inner: &mut Inner) -> Result<StopReason> {
    let thread_id = pid.as_raw() as u32;
    match waitpid(pid, None).map_err(|_| VertexError::ProcessInvalid)? {
        WaitStatus::Exited(_, code) => Ok(StopReason::ProcessExited { exit_code: code }),
        WaitStatus::Signaled(_, signal, _) => Ok(StopReason::Exception { code: signal as u32, address: 0, thread_id }),
        WaitStatus::Stopped(_, Signal::SIGSTOP) => Ok(StopReason::Paused { thread_id }),
        WaitStatus::Stopped(_, Signal::SIGTRAP) => {
            let mut regs = ptrace::getregs(pid).map_err(|_| VertexError::ThreadContextFailed(thread_id))?;
            let trap_address = regs.rip.wrapping_sub(1);
            if let Some(bp) = inner.breakpoints.iter().find(|b| b.address == trap_address && b.enabled) {
                regs.rip = trap_address;
                ptrace::setregs(pid, regs).map_err(|_| VertexError::ThreadContextFailed(thread_id))?;
                Ok(StopReason::BreakpointHit { id: bp.id, address: bp.address, thread_id })
            } else {
                Ok(StopReason::SteppedOk { thread_id })
            }
        }
        WaitStatus::Stopped(_, signal) => Ok(StopReason::Exception { code: signal as u32, address: 0, thread_id }),
        _ => Ok(StopReason::Paused { thread_id }),
    }
}

fn restore_original_byte(pid: Pid, bp: &SoftwareBreakpoint) -> Result<()> {
    let word = ptrace::read(pid, bp.address as ptrace::AddressType)
        .map_err(|_| VertexError::MemoryRead { address: bp.address, size: 1 })?;
    let restored = (word & !0xff) | bp.original_byte as i64;
    ptrace::write(pid, bp.address as ptrace::AddressType, restored)
        .map_err(|_| VertexError::MemoryWrite { address: bp.address, size: 1 })
}

/// Parses one `/proc/<pid>/maps` line into a [`MemoryRegion`].
fn parse_maps_line(line: &str) -> Option<MemoryRegion> {
    let mut fields = line.split_whitespace();
    let range = fields.next()?;
    let perms = fields.next()?;
    let (start, end) = range.split_once('-')?;
    let base = u64::from_str_radix(start, 16).ok()?;
    let end = u64::from_str_radix(end, 16).ok()?;
    Some(MemoryRegion {
        base,
        size: end.saturating_sub(base),
        readable: perms.starts_with('r'),
        writable: perms.as_bytes().get(1) == Some(&b'w'),
        executable: perms.as_bytes().get(2) == Some(&b'x'),
    })
}
