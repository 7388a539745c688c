//! Scan Pipeline (C3, spec.md §4.3).
//!
//! N reader OS threads, each pulling `ReaderTask`s off its own bounded
//! queue and writing hits into its own `WriterRegion`. Generalizes
//! `MemoryScanner::create_threads`/`distribute_regions_to_readers`/
//! `enqueue_task_with_fallback`/`find_available_thread`
//! (`memoryscanner.hh`) and `bundle_adjacent_addresses` into
//! `std::thread`/`crossbeam_channel` the way `jdb::main` wires its own
//! thread plumbing (`Process::attach` spawning a logging thread,
//! `ThreadDispatcher`'s worker pool) rather than introducing an async
//! runtime anywhere in the stack.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, Sender, bounded};

use crate::cacheline::{PaddedAtomicBool, PaddedAtomicI32, PaddedAtomicU64};
use crate::error::Result;
use crate::plugin::gateway::PluginGateway;
use crate::scan::comparator::{ComparatorFn, resolve_comparator};
use crate::scan::config::{ScanConfiguration, ScanMode, ScanRegion, ScanResultEntry};
use crate::scan::store::WriterRegion;

const PER_READER_QUEUE_DEPTH: usize = 64;
/// Abort is checked this often within a single region/bundle scan so a
/// stop request lands promptly without branching on every element.
const ABORT_CHECK_STRIDE_BYTES: usize = 1 << 20;

pub enum ReaderTask {
    Region(ScanRegion),
    Bundle(AddressBundle),
}

#[derive(Clone, Debug)]
pub struct AddressBundle {
    pub start_address: u64,
    pub addresses: Vec<u64>,
    pub previous_values: Vec<Vec<u8>>,
    pub first_values: Vec<Vec<u8>>,
}

/// Groups sorted previous-iteration addresses into contiguous runs so one
/// read covers many candidate addresses (spec.md §4.3: next-scan bundling,
/// `maxGapBytes` default 512, matching the original).
pub fn bundle_adjacent_addresses(mut records: Vec<ScanResultEntry>, max_gap_bytes: u64) -> Vec<AddressBundle> {
    records.sort_by_key(|r| r.address);
    let mut bundles = Vec::new();
    let mut iter = records.into_iter().peekable();
    while let Some(first) = iter.next() {
        let value_len = first.current.len() as u64;
        let mut bundle = AddressBundle {
            start_address: first.address,
            addresses: vec![first.address],
            previous_values: vec![first.current],
            first_values: vec![first.first],
        };
        let mut last_end = first.address + value_len;
        while let Some(next) = iter.peek() {
            if next.address > last_end + max_gap_bytes {
                break;
            }
            let next = iter.next().unwrap();
            last_end = next.address + next.current.len() as u64;
            bundle.addresses.push(next.address);
            bundle.previous_values.push(next.current);
            bundle.first_values.push(next.first);
        }
        bundles.push(bundle);
    }
    bundles
}

struct PipelineShared {
    gateway: Arc<PluginGateway>,
    config: ScanConfiguration,
    comparator: ComparatorFn,
    writer_regions: Vec<Arc<WriterRegion>>,
    abort: Arc<PaddedAtomicBool>,
    active_readers: Arc<PaddedAtomicI32>,
    regions_scanned: Arc<PaddedAtomicU64>,
    total_regions: Arc<PaddedAtomicU64>,
    buffer_size_bytes: usize,
}

/// Handle to an in-flight (or just-finished) scan. The owner polls
/// `is_complete()`; nothing here exposes a future or blocks the caller.
pub struct ActiveScan {
    pub writer_regions: Vec<Arc<WriterRegion>>,
    pub abort: Arc<PaddedAtomicBool>,
    active_readers: Arc<PaddedAtomicI32>,
    pub regions_scanned: Arc<PaddedAtomicU64>,
    pub total_regions: Arc<PaddedAtomicU64>,
    reader_handles: Vec<JoinHandle<()>>,
}

impl ActiveScan {
    /// Wraps an already-finished set of writer regions (e.g. a restored
    /// undo snapshot) with no live reader threads, so the controller can
    /// hand it back out through the same `ActiveScan` surface reads use.
    pub fn from_completed_regions(writer_regions: Vec<Arc<WriterRegion>>) -> Self {
        let total = writer_regions.len() as u64;
        Self {
            writer_regions,
            abort: Arc::new(PaddedAtomicBool::new(false)),
            active_readers: Arc::new(PaddedAtomicI32::new(0)),
            regions_scanned: Arc::new(PaddedAtomicU64::new(total)),
            total_regions: Arc::new(PaddedAtomicU64::new(total)),
            reader_handles: Vec::new(),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.active_readers.load(Ordering::Acquire) == 0
    }

    pub fn request_abort(&self) {
        self.abort.store(true, Ordering::Release);
    }

    pub fn results_count(&self) -> u64 {
        self.writer_regions.iter().map(|w| w.atomics.result_count.load(Ordering::Acquire) as u64).sum()
    }

    /// Blocks until every reader thread has exited. Called by the
    /// controller on `stop_scan`/before starting a next scan, never from
    /// the UI-facing polling path.
    pub fn join(mut self) {
        for handle in self.reader_handles.drain(..) {
            let _ = handle.join();
        }
    }
}

fn spawn_readers(shared: Arc<PipelineShared>, task_rxs: Vec<Receiver<ReaderTask>>) -> Vec<JoinHandle<()>> {
    task_rxs
        .into_iter()
        .enumerate()
        .map(|(reader_id, rx)| {
            let shared = shared.clone();
            std::thread::Builder::new()
                .name(format!("scan-reader-{reader_id}"))
                .spawn(move || reader_loop(reader_id, rx, shared))
                .expect("failed to spawn scan reader thread")
        })
        .collect()
}

fn reader_loop(reader_id: usize, rx: Receiver<ReaderTask>, shared: Arc<PipelineShared>) {
    for task in rx {
        if shared.abort.load(Ordering::Acquire) {
            break;
        }
        let outcome = match task {
            ReaderTask::Region(region) => scan_region(reader_id, &region, &shared),
            ReaderTask::Bundle(bundle) => scan_bundle(reader_id, &bundle, &shared),
        };
        if let Err(e) = outcome {
            if e.is_region_skippable() {
                tracing::warn!(reader_id, error = %e, "scan reader skipping region after error");
            } else {
                tracing::error!(reader_id, error = %e, "scan reader aborting scan after non-skippable error");
                shared.abort.store(true, Ordering::Release);
                shared.regions_scanned.fetch_add(1, Ordering::Release);
                break;
            }
        }
        shared.regions_scanned.fetch_add(1, Ordering::Release);
    }
    shared.active_readers.fetch_sub(1, Ordering::Release);
}

fn scan_region(reader_id: usize, region: &ScanRegion, shared: &PipelineShared) -> Result<()> {
    let value_size = shared.config.value_size();
    let stride = shared.config.stride().max(1);
    let chunk_size = shared.buffer_size_bytes.max(value_size);
    let writer = &shared.writer_regions[reader_id % shared.writer_regions.len()];

    let mut offset: u64 = 0;
    while offset < region.size {
        if shared.abort.load(Ordering::Acquire) {
            return Ok(());
        }
        let remaining = region.size - offset;
        let this_chunk = chunk_size.min(remaining as usize);
        let bytes = shared.gateway.read_memory(region.base_address + offset, this_chunk as u64)?;

        let mut pos = 0usize;
        while pos + value_size <= bytes.len() {
            if pos % ABORT_CHECK_STRIDE_BYTES == 0 && shared.abort.load(Ordering::Acquire) {
                return Ok(());
            }
            let slice = &bytes[pos..pos + value_size];
            let matched = if shared.config.scan_mode == ScanMode::Unknown {
                true
            } else {
                (shared.comparator)(slice, slice, &shared.config.input, &shared.config.input2)
            };
            if matched {
                let address = region.base_address + offset + pos as u64;
                let entry = ScanResultEntry::new_initial(address, slice.to_vec());
                writer.store.append(&entry, &writer.atomics)?;
            }
            pos += stride;
        }
        offset += this_chunk as u64;
    }
    Ok(())
}

fn scan_bundle(reader_id: usize, bundle: &AddressBundle, shared: &PipelineShared) -> Result<()> {
    let writer = &shared.writer_regions[reader_id % shared.writer_regions.len()];
    let span = (bundle.addresses.last().copied().unwrap_or(bundle.start_address) - bundle.start_address)
        + bundle.previous_values.last().map(|v| v.len() as u64).unwrap_or(0);
    let bytes = shared.gateway.read_memory(bundle.start_address, span.max(1))?;

    for (i, &address) in bundle.addresses.iter().enumerate() {
        if shared.abort.load(Ordering::Acquire) {
            return Ok(());
        }
        let previous = &bundle.previous_values[i];
        let len = previous.len();
        let rel = (address - bundle.start_address) as usize;
        let Some(current) = bytes.get(rel..rel + len) else { continue };

        let matched = (shared.comparator)(current, previous, &shared.config.input, &shared.config.input2);
        if matched {
            let entry = ScanResultEntry { address, current: current.to_vec(), previous: previous.clone(), first: bundle.first_values[i].clone() };
            writer.store.append(&entry, &writer.atomics)?;
        }
    }
    Ok(())
}

/// Splits `regions` across `reader_count` readers by cumulative byte size
/// so no single reader is left with a disproportionate share (spec.md
/// §4.3: `distribute_regions_to_readers`).
fn partition_regions_by_size(regions: Vec<ScanRegion>, reader_count: usize) -> Vec<Vec<ScanRegion>> {
    let mut buckets: Vec<Vec<ScanRegion>> = vec![Vec::new(); reader_count.max(1)];
    let mut bucket_bytes = vec![0u64; reader_count.max(1)];
    let mut sorted = regions;
    sorted.sort_by_key(|r| std::cmp::Reverse(r.size));
    for region in sorted {
        let (idx, _) = bucket_bytes.iter().enumerate().min_by_key(|(_, &b)| b).expect("at least one bucket");
        bucket_bytes[idx] += region.size;
        buckets[idx].push(region);
    }
    buckets
}

fn make_queues(reader_count: usize) -> (Vec<Sender<ReaderTask>>, Vec<Receiver<ReaderTask>>) {
    (0..reader_count.max(1))
        .map(|_| bounded(PER_READER_QUEUE_DEPTH))
        .unzip()
}

/// Enqueues `task` on `preferred`, falling back to whichever reader's queue
/// currently has the fewest pending tasks if `preferred`'s queue is full
/// (spec.md §4.3: `enqueue_task_with_fallback`/`find_available_thread`).
fn enqueue_with_fallback(senders: &[Sender<ReaderTask>], preferred: usize, task: ReaderTask) {
    match senders[preferred].try_send(task) {
        Ok(()) => return,
        Err(crossbeam_channel::TrySendError::Full(task)) => {
            if let Some((idx, _)) = senders.iter().enumerate().min_by_key(|(_, s)| s.len()) {
                let _ = senders[idx].send(task);
            }
        }
        Err(crossbeam_channel::TrySendError::Disconnected(_)) => {}
    }
}

pub fn launch_initial_scan(
    gateway: Arc<PluginGateway>,
    config: ScanConfiguration,
    regions: Vec<ScanRegion>,
    reader_threads: usize,
    buffer_size_bytes: usize,
    session_dir: &Path,
    iteration: u32,
) -> Result<ActiveScan> {
    let total = regions.len() as u64;
    let buckets = partition_regions_by_size(regions, reader_threads);
    let reader_count = buckets.len();

    let writer_regions: Vec<Arc<WriterRegion>> = (0..reader_count)
        .map(|i| WriterRegion::create(i, session_dir, iteration).map(Arc::new))
        .collect::<Result<_>>()?;

    let comparator = resolve_comparator(config.value_type, config.scan_mode, config.endianness);
    let abort = Arc::new(PaddedAtomicBool::new(false));
    let active_readers = Arc::new(PaddedAtomicI32::new(reader_count as i32));
    let regions_scanned = Arc::new(PaddedAtomicU64::new(0));
    let total_regions = Arc::new(PaddedAtomicU64::new(total));

    let shared = Arc::new(PipelineShared {
        gateway,
        config,
        comparator,
        writer_regions: writer_regions.clone(),
        abort: abort.clone(),
        active_readers: active_readers.clone(),
        regions_scanned: regions_scanned.clone(),
        total_regions: total_regions.clone(),
        buffer_size_bytes,
    });

    let (senders, receivers) = make_queues(reader_count);
    for (reader_id, bucket) in buckets.into_iter().enumerate() {
        for region in bucket {
            enqueue_with_fallback(&senders, reader_id, ReaderTask::Region(region));
        }
    }
    drop(senders);

    let reader_handles = spawn_readers(shared, receivers);
    Ok(ActiveScan { writer_regions, abort, active_readers, regions_scanned, total_regions, reader_handles })
}

pub fn launch_next_scan(
    gateway: Arc<PluginGateway>,
    config: ScanConfiguration,
    previous_results: Vec<ScanResultEntry>,
    reader_threads: usize,
    session_dir: &Path,
    iteration: u32,
) -> Result<ActiveScan> {
    let bundles = bundle_adjacent_addresses(previous_results, 512);
    let total = bundles.len() as u64;
    let reader_count = reader_threads.max(1);

    let writer_regions: Vec<Arc<WriterRegion>> = (0..reader_count)
        .map(|i| WriterRegion::create(i, session_dir, iteration).map(Arc::new))
        .collect::<Result<_>>()?;

    let comparator = resolve_comparator(config.value_type, config.scan_mode, config.endianness);
    let abort = Arc::new(PaddedAtomicBool::new(false));
    let active_readers = Arc::new(PaddedAtomicI32::new(reader_count as i32));
    let regions_scanned = Arc::new(PaddedAtomicU64::new(0));
    let total_regions = Arc::new(PaddedAtomicU64::new(total));

    let buffer_size_bytes = 1 << 20;
    let shared = Arc::new(PipelineShared {
        gateway,
        config,
        comparator,
        writer_regions: writer_regions.clone(),
        abort: abort.clone(),
        active_readers: active_readers.clone(),
        regions_scanned: regions_scanned.clone(),
        total_regions: total_regions.clone(),
        buffer_size_bytes,
    });

    let (senders, receivers) = make_queues(reader_count);
    for (i, bundle) in bundles.into_iter().enumerate() {
        enqueue_with_fallback(&senders, i % reader_count, ReaderTask::Bundle(bundle));
    }
    drop(senders);

    let reader_handles = spawn_readers(shared, receivers);
    Ok(ActiveScan { writer_regions, abort, active_readers, regions_scanned, total_regions, reader_handles })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(address: u64, value: i32) -> ScanResultEntry {
        ScanResultEntry::new_initial(address, value.to_le_bytes().to_vec())
    }

    #[test]
    fn bundle_adjacent_addresses_merges_close_runs() {
        let records = vec![entry(0x1000, 1), entry(0x1004, 2), entry(0x2000, 3)];
        let bundles = bundle_adjacent_addresses(records, 512);
        assert_eq!(bundles.len(), 2);
        assert_eq!(bundles[0].addresses, vec![0x1000, 0x1004]);
        assert_eq!(bundles[1].addresses, vec![0x2000]);
    }

    #[test]
    fn bundle_adjacent_addresses_splits_past_gap() {
        let records = vec![entry(0x1000, 1), entry(0x2000, 2)];
        let bundles = bundle_adjacent_addresses(records, 4);
        assert_eq!(bundles.len(), 2);
    }

    #[test]
    fn partition_regions_balances_by_size() {
        let regions = vec![
            ScanRegion { base_address: 0, size: 1000 },
            ScanRegion { base_address: 1000, size: 10 },
            ScanRegion { base_address: 2000, size: 10 },
        ];
        let buckets = partition_regions_by_size(regions, 2);
        let total_in_bucket0: u64 = buckets[0].iter().map(|r| r.size).sum();
        let total_in_bucket1: u64 = buckets[1].iter().map(|r| r.size).sum();
        assert!(total_in_bucket0 >= total_in_bucket1);
    }
}
