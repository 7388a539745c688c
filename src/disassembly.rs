//! Disassembly Window (C7, spec.md §4.8).
//!
//! A bounded, ordered buffer of decoded instructions around the current
//! instruction pointer, kept in sync with a side `address -> index` map for
//! O(1) lookup (spec.md §3, `Disassembly Line`). The gateway is the only
//! thing that actually decodes bytes (`PluginGateway::disassemble_range`);
//! this module just owns the sliding window and its trim policy, the same
//! separation `jdb::process::Process` draws between the inferior it owns
//! and whatever renders it.

use std::collections::HashMap;

use crate::error::Result;
use crate::plugin::gateway::PluginGateway;
use crate::plugin::types::DisassembledInstruction;

/// Hard cap on resident lines (spec.md §4.8). Bounds memory regardless of
/// how far the UI scrolls the window.
pub const MAX_DISASSEMBLY_LINES: usize = 2000;

/// How many lines are dropped from the opposite end once the cap is
/// exceeded (spec.md §4.8).
pub const TRIM_LINES_COUNT: usize = 500;

/// One decoded instruction plus whether it's the current IP (spec.md §3).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DisassemblyLine {
    pub instruction: DisassembledInstruction,
    pub is_current: bool,
}

impl DisassemblyLine {
    fn new(instruction: DisassembledInstruction) -> Self {
        Self { instruction, is_current: false }
    }

    pub fn address(&self) -> u64 {
        self.instruction.address
    }
}

/// Sliding window of decoded instructions. Lines are kept strictly
/// ascending by address; `index_by_address` stays in sync with `lines` on
/// every mutation (spec.md §4.8 invariant).
#[derive(Default)]
pub struct DisassemblyWindow {
    lines: Vec<DisassemblyLine>,
    index_by_address: HashMap<u64, usize>,
    current_address: Option<u64>,
}

impl DisassemblyWindow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn lines(&self) -> &[DisassemblyLine] {
        &self.lines
    }

    pub fn current_address(&self) -> Option<u64> {
        self.current_address
    }

    /// `[start_address, end_address]` spanning every resident line
    /// (spec.md §4.8 invariant), or `None` when the window is empty.
    pub fn span(&self) -> Option<(u64, u64)> {
        match (self.lines.first(), self.lines.last()) {
            (Some(first), Some(last)) => Some((first.address(), last.address())),
            _ => None,
        }
    }

    /// True once `current_address` has moved outside the resident span;
    /// per spec.md §4.8 the next view update must then replace the window
    /// via `disassemble_at` rather than extend it.
    pub fn needs_replace(&self) -> bool {
        match (self.current_address, self.span()) {
            (Some(ip), Some((start, end))) => ip < start || ip > end,
            (Some(_), None) => true,
            (None, _) => false,
        }
    }

    /// Decodes up to 500 instructions within a 4 KiB window starting at
    /// `addr` and replaces the resident window wholesale (spec.md §4.8).
    pub fn disassemble_at(&mut self, gateway: &PluginGateway, addr: u64) -> Result<()> {
        let instructions = gateway.disassemble_range(addr, 4096)?;
        self.replace(instructions, 500);
        self.current_address = Some(addr);
        self.mark_current();
        Ok(())
    }

    fn replace(&mut self, mut instructions: Vec<DisassembledInstruction>, cap: usize) {
        instructions.truncate(cap);
        self.lines = instructions.into_iter().map(DisassemblyLine::new).collect();
        self.rebuild_index();
    }

    /// Decodes `[from - byte_count, from)` and prepends any lines whose
    /// address is strictly below `from`. Trims `TRIM_LINES_COUNT` lines off
    /// the tail if the cap is exceeded (spec.md §4.8).
    pub fn extend_up(&mut self, gateway: &PluginGateway, from: u64, byte_count: u32) -> Result<()> {
        let start = from.saturating_sub(byte_count as u64);
        let decoded = gateway.disassemble_range(start, byte_count)?;
        let mut new_lines: Vec<DisassemblyLine> =
            decoded.into_iter().filter(|ins| ins.address < from).map(DisassemblyLine::new).collect();
        new_lines.extend(std::mem::take(&mut self.lines));
        self.lines = new_lines;
        if self.lines.len() > MAX_DISASSEMBLY_LINES {
            // Symmetric to extend_down: drop at least TRIM_LINES_COUNT, or
            // the full overflow if that's larger, so the window never
            // stays over MAX_DISASSEMBLY_LINES regardless of how far it
            // overshot (spec.md §4.8).
            let overflow = self.lines.len() - MAX_DISASSEMBLY_LINES;
            let drop = overflow.max(TRIM_LINES_COUNT).min(self.lines.len());
            let new_len = self.lines.len() - drop;
            self.lines.truncate(new_len);
        }
        self.rebuild_index();
        Ok(())
    }

    /// Symmetric to [`Self::extend_up`]: decodes forward from `from` and
    /// appends, trimming from the head on overflow.
    pub fn extend_down(&mut self, gateway: &PluginGateway, from: u64, byte_count: u32) -> Result<()> {
        let decoded = gateway.disassemble_range(from, byte_count)?;
        let new_lines: Vec<DisassemblyLine> =
            decoded.into_iter().filter(|ins| ins.address >= from).map(DisassemblyLine::new).collect();
        self.lines.extend(new_lines);
        if self.lines.len() > MAX_DISASSEMBLY_LINES {
            let overflow = self.lines.len() - MAX_DISASSEMBLY_LINES;
            let drop = overflow.max(TRIM_LINES_COUNT).min(self.lines.len());
            self.lines.drain(0..drop);
        }
        self.rebuild_index();
        Ok(())
    }

    pub fn set_current_address(&mut self, addr: u64) {
        self.current_address = Some(addr);
        self.mark_current();
    }

    fn mark_current(&mut self) {
        for line in &mut self.lines {
            line.is_current = Some(line.address()) == self.current_address;
        }
    }

    fn rebuild_index(&mut self) {
        self.index_by_address = self.lines.iter().enumerate().map(|(i, l)| (l.address(), i)).collect();
        self.mark_current();
    }

    pub fn line_at(&self, address: u64) -> Option<&DisassemblyLine> {
        self.index_by_address.get(&address).map(|&i| &self.lines[i])
    }
}
