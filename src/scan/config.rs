//! Scan configuration, regions, and result entries (spec.md §3).

use strum::{Display, EnumIter};

/// Value size is derived from `ValueType`; strings use `VARIABLE` and carry
/// their encoded byte length in the input buffer (spec.md §3 invariant).
#[derive(Clone, Copy, Debug, Display, EnumIter, PartialEq, Eq, Hash)]
pub enum ValueType {
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    I64,
    U64,
    F32,
    F64,
    AsciiString,
    Utf16String,
    ByteArray,
}

impl ValueType {
    /// `None` for variable-length types (strings, byte arrays); the caller
    /// must use the input buffer's length instead.
    pub fn fixed_size(self) -> Option<usize> {
        use ValueType::*;
        match self {
            I8 | U8 => Some(1),
            I16 | U16 => Some(2),
            I32 | U32 | F32 => Some(4),
            I64 | U64 | F64 => Some(8),
            AsciiString | Utf16String | ByteArray => None,
        }
    }

    pub fn is_string(self) -> bool {
        matches!(self, ValueType::AsciiString | ValueType::Utf16String | ValueType::ByteArray)
    }

    pub fn is_float(self) -> bool {
        matches!(self, ValueType::F32 | ValueType::F64)
    }

    /// Resolves the byte width to compare with, given the input buffer
    /// actually supplied (needed for variable-length types).
    pub fn value_size(self, input_len: usize) -> usize {
        self.fixed_size().unwrap_or(input_len)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Endianness {
    Little,
    Big,
    Host,
}

#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, Hash)]
pub enum ScanMode {
    Exact,
    GreaterThan,
    LessThan,
    Between,
    Unknown,
    // Next-scan-only refinement modes (spec.md §3).
    Changed,
    Unchanged,
    Increased,
    Decreased,
    IncreasedBy,
    DecreasedBy,
}

impl ScanMode {
    /// Whether this mode only makes sense as a next-scan (it compares
    /// against a stored `previous` value rather than the raw input).
    pub fn requires_previous_value(self) -> bool {
        matches!(
            self,
            ScanMode::Changed
                | ScanMode::Unchanged
                | ScanMode::Increased
                | ScanMode::Decreased
                | ScanMode::IncreasedBy
                | ScanMode::DecreasedBy
        )
    }
}

/// Immutable per-scan configuration (spec.md §3).
#[derive(Clone, Debug, PartialEq)]
pub struct ScanConfiguration {
    pub value_type: ValueType,
    pub scan_mode: ScanMode,
    pub alignment: Option<usize>,
    pub endianness: Endianness,
    pub hex_mode: bool,
    pub input: Vec<u8>,
    /// Only meaningful for `ScanMode::Between`.
    pub input2: Vec<u8>,
}

impl ScanConfiguration {
    pub fn value_size(&self) -> usize {
        self.value_type.value_size(self.input.len().max(1))
    }

    pub fn stride(&self) -> usize {
        self.alignment.unwrap_or(1)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ScanRegion {
    pub base_address: u64,
    pub size: u64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScanResultEntry {
    pub address: u64,
    pub current: Vec<u8>,
    pub previous: Vec<u8>,
    pub first: Vec<u8>,
}

impl ScanResultEntry {
    pub fn new_initial(address: u64, value: Vec<u8>) -> Self {
        Self { address, previous: value.clone(), first: value.clone(), current: value }
    }
}
