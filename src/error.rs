//! Typed error taxonomy (spec.md §7).
//!
//! Every call site across the core returns `error::Result<T>` rather than
//! a boxed or string error, since the scan controller, the debugger
//! worker, and the UI bridge above them all need to match on error *kind*
//! (a skippable memory-read fault vs. a fatal process-invalid error) rather
//! than a formatted message.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, VertexError>;

#[derive(Debug, Error)]
pub enum VertexError {
    #[error("no plugin is currently active")]
    PluginNotActive,

    #[error("plugin does not implement required capability: {0}")]
    PluginFunctionMissing(&'static str),

    #[error("the target process handle is no longer valid")]
    ProcessInvalid,

    #[error("process {0} not found")]
    ProcessNotFound(u32),

    #[error("access denied opening process {0}")]
    ProcessAccessDenied(u32),

    #[error("failed to read {size} bytes at 0x{address:x}")]
    MemoryRead { address: u64, size: u64 },

    #[error("failed to write {size} bytes at 0x{address:x}")]
    MemoryWrite { address: u64, size: u64 },

    #[error("buffer too small: need {needed}, have {have}")]
    MemoryBufferTooSmall { needed: usize, have: usize },

    #[error("thread {0} not found")]
    ThreadNotFound(u32),

    #[error("failed to get register context for thread {0}")]
    ThreadContextFailed(u32),

    #[error("failed to suspend thread {0}")]
    ThreadSuspendFailed(u32),

    #[error("failed to resume thread {0}")]
    ThreadResumeFailed(u32),

    #[error("register {0} not found")]
    RegisterNotFound(String),

    #[error("failed to write register {0}")]
    RegisterWriteFailed(String),

    #[error("invalid input: {0}")]
    InputValidation(String),

    #[error("no undo snapshot is available")]
    NoUndoAvailable,

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("failed to parse settings JSON: {0}")]
    FsJsonParse(String),

    #[error("settings key not found: {0}")]
    FsJsonKeyNotFound(String),

    #[error("file not found: {0}")]
    FileNotFound(String),

    #[error("{0}")]
    General(String),

    #[error("not implemented: {0}")]
    NotImplemented(&'static str),
}

impl VertexError {
    /// Errors that a scan reader recovers from locally by skipping the
    /// offending region (spec.md §7: "scan readers log-and-skip the failing
    /// region rather than abort the whole scan"). `ProcessInvalid` is
    /// deliberately excluded: it's process-fatal (see `is_process_fatal`),
    /// not a per-region fault.
    pub fn is_region_skippable(&self) -> bool {
        matches!(
            self,
            VertexError::MemoryRead { .. } | VertexError::MemoryWrite { .. } | VertexError::MemoryBufferTooSmall { .. }
        )
    }

    /// Errors that force a transition to `Detached` plus a process-exit event
    /// (spec.md §7: process-invalid family).
    pub fn is_process_fatal(&self) -> bool {
        matches!(
            self,
            VertexError::ProcessInvalid
                | VertexError::ProcessNotFound(_)
                | VertexError::ProcessAccessDenied(_)
        )
    }
}
