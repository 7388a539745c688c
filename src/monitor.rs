//! Address Monitor (C8, spec.md §4.5).
//!
//! Two concerns, kept in one module because they share the same saved-entry
//! table: read-back of watched addresses for UI refresh, and a freeze loop
//! that periodically rewrites pinned values. The freeze loop is dispatched
//! through [`ThreadDispatcher`]'s `Freeze` channel rather than owning its
//! own thread directly, the same delegation `jdb::process::Process` uses
//! for its logging thread.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::dispatch::Channel;
use crate::error::Result;
use crate::plugin::gateway::PluginGateway;
use crate::scan::config::{Endianness, ValueType};

/// One watched address (spec.md §3, "Saved Address"). Invariant:
/// `frozen => frozen_bytes.is_some()`, enforced by [`SavedAddress::freeze`].
#[derive(Clone, Debug, PartialEq)]
pub struct SavedAddress {
    pub address: u64,
    pub value_type: ValueType,
    pub endianness: Endianness,
    pub frozen: bool,
    pub frozen_bytes: Option<Vec<u8>>,
    pub formatted_value: String,
}

impl SavedAddress {
    pub fn new(address: u64, value_type: ValueType, endianness: Endianness) -> Self {
        Self { address, value_type, endianness, frozen: false, frozen_bytes: None, formatted_value: String::new() }
    }

    /// Pins `bytes` to be rewritten on every freeze tick. Unfreezing clears
    /// the pinned bytes so the invariant never goes stale.
    pub fn freeze(&mut self, bytes: Vec<u8>) {
        self.frozen = true;
        self.frozen_bytes = Some(bytes);
    }

    pub fn unfreeze(&mut self) {
        self.frozen = false;
        self.frozen_bytes = None;
    }
}

/// Formats a decoded value per its type and endianness (spec.md §4.5,
/// "formats each value per its value type and endianness"). Strings render
/// as their raw bytes lossily converted to UTF-8; numeric types print their
/// plain decimal/float representation.
pub fn format_value(bytes: &[u8], value_type: ValueType, endianness: Endianness) -> String {
    macro_rules! fmt_int {
        ($t:ty) => {{
            let mut buf = [0u8; std::mem::size_of::<$t>()];
            let n = buf.len().min(bytes.len());
            buf[..n].copy_from_slice(&bytes[..n]);
            match endianness {
                Endianness::Little => <$t>::from_le_bytes(buf).to_string(),
                Endianness::Big => <$t>::from_be_bytes(buf).to_string(),
                Endianness::Host => <$t>::from_ne_bytes(buf).to_string(),
            }
        }};
    }
    macro_rules! fmt_float {
        ($t:ty) => {{
            let mut buf = [0u8; std::mem::size_of::<$t>()];
            let n = buf.len().min(bytes.len());
            buf[..n].copy_from_slice(&bytes[..n]);
            match endianness {
                Endianness::Little => <$t>::from_le_bytes(buf).to_string(),
                Endianness::Big => <$t>::from_be_bytes(buf).to_string(),
                Endianness::Host => <$t>::from_ne_bytes(buf).to_string(),
            }
        }};
    }
    use ValueType::*;
    match value_type {
        I8 => fmt_int!(i8),
        U8 => fmt_int!(u8),
        I16 => fmt_int!(i16),
        U16 => fmt_int!(u16),
        I32 => fmt_int!(i32),
        U32 => fmt_int!(u32),
        I64 => fmt_int!(i64),
        U64 => fmt_int!(u64),
        F32 => fmt_float!(f32),
        F64 => fmt_float!(f64),
        AsciiString | Utf16String => String::from_utf8_lossy(bytes).into_owned(),
        ByteArray => bytes.iter().map(|b| format!("{b:02x}")).collect::<Vec<_>>().join(" "),
    }
}

/// Tick period for the freeze loop (spec.md §4.5: "sleeps 50 ms").
pub const FREEZE_TICK: Duration = Duration::from_millis(50);

/// Read-back and freeze-write owner for a set of saved addresses.
pub struct AddressMonitor {
    entries: Mutex<Vec<SavedAddress>>,
}

impl Default for AddressMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl AddressMonitor {
    pub fn new() -> Self {
        Self { entries: Mutex::new(Vec::new()) }
    }

    pub fn add(&self, entry: SavedAddress) {
        self.entries.lock().expect("monitor lock poisoned").push(entry);
    }

    pub fn remove(&self, address: u64) {
        self.entries.lock().expect("monitor lock poisoned").retain(|e| e.address != address);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("monitor lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn entries(&self) -> Vec<SavedAddress> {
        self.entries.lock().expect("monitor lock poisoned").clone()
    }

    pub fn set_frozen(&self, address: u64, bytes: Vec<u8>) {
        let mut entries = self.entries.lock().expect("monitor lock poisoned");
        if let Some(entry) = entries.iter_mut().find(|e| e.address == address) {
            entry.freeze(bytes);
        }
    }

    pub fn clear_frozen(&self, address: u64) {
        let mut entries = self.entries.lock().expect("monitor lock poisoned");
        if let Some(entry) = entries.iter_mut().find(|e| e.address == address) {
            entry.unfreeze();
        }
    }

    /// Issues one plugin memory-read per address and formats it back onto
    /// the saved record (spec.md §4.5, "batching left to a future
    /// optimization").
    pub fn refresh(&self, gateway: &PluginGateway) -> Result<()> {
        let mut entries = self.entries.lock().expect("monitor lock poisoned");
        for entry in entries.iter_mut() {
            let size = entry.value_type.fixed_size().unwrap_or(entry.frozen_bytes.as_ref().map(Vec::len).unwrap_or(1));
            match gateway.read_memory(entry.address, size as u64) {
                Ok(bytes) => entry.formatted_value = format_value(&bytes, entry.value_type, entry.endianness),
                Err(e) => entry.formatted_value = format!("<error: {e}>"),
            }
        }
        Ok(())
    }

    /// One freeze tick: if any entry is frozen, dispatches a single
    /// fire-and-forget batched write on the `Freeze` channel. The
    /// dispatcher's own busy-check gives single-flight semantics: a tick
    /// that lands while the previous write is still in flight is skipped
    /// (spec.md §4.5 rationale: queueing slow writes produces runaway lag).
    pub fn tick(&self, gateway: &Arc<PluginGateway>, dispatcher: &crate::dispatch::ThreadDispatcher) {
        if dispatcher.is_channel_busy(&Channel::Freeze) {
            return;
        }
        let frozen: Vec<(u64, Vec<u8>)> = self
            .entries
            .lock()
            .expect("monitor lock poisoned")
            .iter()
            .filter(|e| e.frozen)
            .filter_map(|e| e.frozen_bytes.clone().map(|b| (e.address, b)))
            .collect();
        if frozen.is_empty() {
            return;
        }
        let gateway = gateway.clone();
        let _ = dispatcher.dispatch_fire_and_forget(
            &Channel::Freeze,
            Box::new(move || {
                for (address, bytes) in &frozen {
                    gateway.write_memory(*address, bytes)?;
                }
                Ok(())
            }),
        );
    }
}
