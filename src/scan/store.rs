//! Scan Result Store (C2, spec.md §4.2, §6.3).
//!
//! One store backs one writer region: a buffered append-only writer plus a
//! `memmap2`-backed random-access reader, per spec.md §4.2's split ("writes
//! are sequential and buffered; reads are random-access and memory-mapped").
//! On-disk layout is `[count:u64][entry...]`, each entry
//! `[address:u64][len:u32][current][previous][first]` with
//! `current.len() == previous.len() == first.len() == len` (spec.md §3
//! invariant). An in-memory offset index built as entries are appended
//! gives `read_range` direct seek targets instead of a linear rescan.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::cacheline::PaddedAtomicUsize;
use crate::error::{Result, VertexError};
use crate::scan::config::ScanResultEntry;

const HEADER_BYTES: u64 = 8;

/// Cache-line-padded counters shared between a writer region's store and
/// whatever is reporting scan progress, mirroring `WriterAtomics` in
/// the original (`alignas(CACHE_LINE) atomic<size_t> resultCount`).
#[derive(Default)]
pub struct WriterAtomics {
    pub result_count: PaddedAtomicUsize,
}

pub struct ScanResultStore {
    path: PathBuf,
    file: Mutex<BufWriter<File>>,
    offsets: Mutex<Vec<u64>>,
}

impl ScanResultStore {
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| VertexError::General(e.to_string()))?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .truncate(true)
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| VertexError::General(e.to_string()))?;
        file.write_all(&0u64.to_ne_bytes()).map_err(|e| VertexError::General(e.to_string()))?;
        Ok(Self { path, file: Mutex::new(BufWriter::new(file)), offsets: Mutex::new(Vec::new()) })
    }

    /// Appends one entry, rewrites the `[count:u64]` header in place, and
    /// publishes the new count to `atomics` with a release store after the
    /// bytes are durably written: mirrors the original's "memcpy
    /// happens-before the atomic publish" ordering. The header rewrite uses
    /// a positional `pwrite` at offset 0 so it never disturbs the
    /// `BufWriter`'s sequential append cursor.
    pub fn append(&self, entry: &ScanResultEntry, atomics: &WriterAtomics) -> Result<()> {
        let len = entry.current.len() as u32;
        debug_assert_eq!(entry.previous.len(), entry.current.len());
        debug_assert_eq!(entry.first.len(), entry.current.len());

        let mut file = self.file.lock().expect("scan store lock poisoned");
        let offset = file.stream_position().map_err(|e| VertexError::General(e.to_string()))?;
        file.write_all(&entry.address.to_ne_bytes()).map_err(|e| VertexError::General(e.to_string()))?;
        file.write_all(&len.to_ne_bytes()).map_err(|e| VertexError::General(e.to_string()))?;
        file.write_all(&entry.current).map_err(|e| VertexError::General(e.to_string()))?;
        file.write_all(&entry.previous).map_err(|e| VertexError::General(e.to_string()))?;
        file.write_all(&entry.first).map_err(|e| VertexError::General(e.to_string()))?;
        file.flush().map_err(|e| VertexError::General(e.to_string()))?;

        let mut offsets = self.offsets.lock().expect("scan store lock poisoned");
        offsets.push(offset);
        let count = offsets.len() as u64;
        drop(offsets);
        file.get_ref().write_all_at(&count.to_ne_bytes(), 0).map_err(|e| VertexError::General(e.to_string()))?;
        drop(file);

        atomics.result_count.fetch_add(1, std::sync::atomic::Ordering::Release);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.offsets.lock().expect("scan store lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Random-access read of `[start, start + count)` via an independent
    /// read-only mmap of the backing file; never contends with the append
    /// path's lock.
    pub fn read_range(&self, start: usize, count: usize) -> Result<Vec<ScanResultEntry>> {
        let offsets = self.offsets.lock().expect("scan store lock poisoned").clone();
        if start >= offsets.len() {
            return Ok(Vec::new());
        }
        let end = (start + count).min(offsets.len());

        let file = File::open(&self.path).map_err(|e| VertexError::General(e.to_string()))?;
        let file_len = file.metadata().map_err(|e| VertexError::General(e.to_string()))?.len();
        if file_len <= HEADER_BYTES {
            return Ok(Vec::new());
        }
        // SAFETY: the file is only ever appended to by this process; a
        // concurrent truncate would be a logic error elsewhere, not a
        // condition this read path needs to defend against.
        let mmap = unsafe { memmap2::Mmap::map(&file).map_err(|e| VertexError::General(e.to_string()))? };

        let mut entries = Vec::with_capacity(end - start);
        for &offset in &offsets[start..end] {
            entries.push(parse_entry_at(&mmap, offset as usize)?);
        }
        Ok(entries)
    }

    pub fn read_all(&self) -> Result<Vec<ScanResultEntry>> {
        self.read_range(0, self.len())
    }

    /// Drops the backing file; used when an undo snapshot is evicted past
    /// `MAX_UNDO_DEPTH` (spec.md §4.4) or a writer region is recycled for
    /// the next scan iteration.
    pub fn release(&self) -> Result<()> {
        let _ = std::fs::remove_file(&self.path);
        Ok(())
    }
}

fn parse_entry_at(mmap: &memmap2::Mmap, offset: usize) -> Result<ScanResultEntry> {
    let bad = || VertexError::General("corrupt scan result entry".into());
    let address = u64::from_ne_bytes(mmap.get(offset..offset + 8).ok_or_else(bad)?.try_into().map_err(|_| bad())?);
    let len_bytes = mmap.get(offset + 8..offset + 12).ok_or_else(bad)?;
    let len = u32::from_ne_bytes(len_bytes.try_into().map_err(|_| bad())?) as usize;

    let mut cursor = offset + 12;
    let current = mmap.get(cursor..cursor + len).ok_or_else(bad)?.to_vec();
    cursor += len;
    let previous = mmap.get(cursor..cursor + len).ok_or_else(bad)?.to_vec();
    cursor += len;
    let first = mmap.get(cursor..cursor + len).ok_or_else(bad)?.to_vec();

    Ok(ScanResultEntry { address, current, previous, first })
}

/// One writer's store plus its shared atomics, analogous to
/// `WriterRegionMetadata` in the original (`writerIndex`, `IO::ScanResultStore`,
/// `shared_ptr<WriterAtomics>`).
pub struct WriterRegion {
    pub writer_index: usize,
    pub store: ScanResultStore,
    pub atomics: Arc<WriterAtomics>,
}

impl WriterRegion {
    pub fn create(writer_index: usize, session_dir: &Path, iteration: u32) -> Result<Self> {
        let path = session_dir.join(format!("scan_{iteration}_writer_{writer_index}.store"));
        Ok(Self { writer_index, store: ScanResultStore::create(path)?, atomics: Arc::new(WriterAtomics::default()) })
    }
}
