//! Scan Controller (C4, spec.md §4.4).
//!
//! Owns the active scan's lifecycle and the undo history, generalizing
//! `MemoryScanner::{initialize_scan,initialize_next_scan,undo_scan,stop_scan,
//! get_scan_results_range}` plus its `MAX_UNDO_DEPTH = 10` snapshot deque
//! and `save_snapshot_for_undo`/`cleanup_snapshot_regions`.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, RwLock};

use crate::error::{Result, VertexError};
use crate::plugin::gateway::PluginGateway;
use crate::scan::config::{ScanConfiguration, ScanRegion, ScanResultEntry};
use crate::scan::pipeline::{self, ActiveScan};
use crate::scan::store::WriterRegion;

pub const MAX_UNDO_DEPTH: usize = 10;

/// A prior iteration's writer regions, kept around so `undo_scan` can pop
/// back to it without rescanning (spec.md §4.4: "undo restores the
/// previous iteration's result set without re-reading memory").
struct ScanSnapshot {
    iteration: u32,
    writer_regions: Vec<Arc<WriterRegion>>,
    config: ScanConfiguration,
}

pub struct ScanController {
    gateway: Arc<PluginGateway>,
    session_dir: PathBuf,
    reader_threads: usize,
    active: Mutex<Option<ActiveScan>>,
    undo_history: Mutex<VecDeque<ScanSnapshot>>,
    iteration: Mutex<u32>,
    current_config: RwLock<Option<ScanConfiguration>>,
}

impl ScanController {
    pub fn new(gateway: Arc<PluginGateway>, session_dir: PathBuf, reader_threads: usize) -> Self {
        Self {
            gateway,
            session_dir,
            reader_threads: reader_threads.max(1),
            active: Mutex::new(None),
            undo_history: Mutex::new(VecDeque::new()),
            iteration: Mutex::new(0),
            current_config: RwLock::new(None),
        }
    }

    /// Starts a fresh scan over `regions`. Any scan already in flight is
    /// joined first (spec.md §4.4 edge case: starting a new scan while one
    /// is running stops the old one rather than running both).
    pub fn initialize_scan(&self, config: ScanConfiguration, regions: Vec<ScanRegion>, buffer_size_bytes: usize) -> Result<()> {
        if regions.is_empty() {
            return Err(VertexError::InvalidParameter("empty scan region list".into()));
        }
        self.stop_scan()?;

        let mut iteration = self.iteration.lock().expect("scan controller lock poisoned");
        *iteration += 1;
        let scan = pipeline::launch_initial_scan(
            self.gateway.clone(),
            config.clone(),
            regions,
            self.reader_threads,
            buffer_size_bytes,
            &self.session_dir,
            *iteration,
        )?;
        *self.active.lock().expect("scan controller lock poisoned") = Some(scan);
        *self.current_config.write().expect("scan controller lock poisoned") = Some(config);
        self.undo_history.lock().expect("scan controller lock poisoned").clear();
        Ok(())
    }

    /// Narrows the previous iteration's results with `config`, pushing the
    /// just-finished iteration onto the undo deque first.
    pub fn initialize_next_scan(&self, config: ScanConfiguration) -> Result<()> {
        let previous_results = self.get_scan_results_range(0, usize::MAX)?;
        if previous_results.is_empty() {
            return Err(VertexError::InvalidParameter("no previous scan results to refine".into()));
        }
        self.push_undo_snapshot()?;

        let mut iteration = self.iteration.lock().expect("scan controller lock poisoned");
        *iteration += 1;
        let scan = pipeline::launch_next_scan(
            self.gateway.clone(),
            config.clone(),
            previous_results,
            self.reader_threads,
            &self.session_dir,
            *iteration,
        )?;
        *self.active.lock().expect("scan controller lock poisoned") = Some(scan);
        *self.current_config.write().expect("scan controller lock poisoned") = Some(config);
        Ok(())
    }

    fn push_undo_snapshot(&self) -> Result<()> {
        let active = self.active.lock().expect("scan controller lock poisoned");
        let Some(scan) = active.as_ref() else { return Ok(()) };
        let config = self.current_config.read().expect("scan controller lock poisoned").clone();
        let Some(config) = config else { return Ok(()) };

        let mut history = self.undo_history.lock().expect("scan controller lock poisoned");
        if history.len() >= MAX_UNDO_DEPTH {
            if let Some(evicted) = history.pop_front() {
                for region in &evicted.writer_regions {
                    let _ = region.store.release();
                }
            }
        }
        history.push_back(ScanSnapshot {
            iteration: *self.iteration.lock().expect("scan controller lock poisoned"),
            writer_regions: scan.writer_regions.clone(),
            config,
        });
        Ok(())
    }

    /// Restores the most recent undo snapshot, releasing the scan that was
    /// undone past (spec.md §4.4: `undo_scan`/`cleanup_writer_regions`).
    pub fn undo_scan(&self) -> Result<()> {
        let mut history = self.undo_history.lock().expect("scan controller lock poisoned");
        let Some(snapshot) = history.pop_back() else { return Err(VertexError::NoUndoAvailable) };
        drop(history);

        self.stop_scan()?;
        *self.iteration.lock().expect("scan controller lock poisoned") = snapshot.iteration;
        *self.current_config.write().expect("scan controller lock poisoned") = Some(snapshot.config);
        // The restored snapshot has no live reader threads; it's already
        // complete, so there is nothing for `ActiveScan` to track beyond
        // exposing the existing writer regions for reads.
        *self.active.lock().expect("scan controller lock poisoned") = Some(ActiveScan::from_completed_regions(snapshot.writer_regions));
        Ok(())
    }

    pub fn can_undo(&self) -> bool {
        !self.undo_history.lock().expect("scan controller lock poisoned").is_empty()
    }

    /// Requests abort and joins every reader thread. Idempotent: calling it
    /// with no scan in flight is a no-op (spec.md §4.4 edge case).
    pub fn stop_scan(&self) -> Result<()> {
        let scan = self.active.lock().expect("scan controller lock poisoned").take();
        if let Some(scan) = scan {
            scan.request_abort();
            scan.join();
        }
        Ok(())
    }

    pub fn is_scan_complete(&self) -> bool {
        self.active
            .lock()
            .expect("scan controller lock poisoned")
            .as_ref()
            .map(|s| s.is_complete())
            .unwrap_or(true)
    }

    pub fn regions_scanned(&self) -> u64 {
        self.active.lock().expect("scan controller lock poisoned").as_ref().map(|s| s.regions_scanned.load(std::sync::atomic::Ordering::Acquire)).unwrap_or(0)
    }

    pub fn total_regions(&self) -> u64 {
        self.active.lock().expect("scan controller lock poisoned").as_ref().map(|s| s.total_regions.load(std::sync::atomic::Ordering::Acquire)).unwrap_or(0)
    }

    pub fn results_count(&self) -> u64 {
        self.active.lock().expect("scan controller lock poisoned").as_ref().map(|s| s.results_count()).unwrap_or(0)
    }

    pub fn get_scan_results(&self) -> Result<Vec<ScanResultEntry>> {
        self.get_scan_results_range(0, usize::MAX)
    }

    pub fn get_scan_results_range(&self, start: usize, count: usize) -> Result<Vec<ScanResultEntry>> {
        let active = self.active.lock().expect("scan controller lock poisoned");
        let Some(scan) = active.as_ref() else { return Ok(Vec::new()) };
        let mut results = Vec::new();
        for region in &scan.writer_regions {
            results.extend(region.store.read_range(0, region.store.len())?);
        }
        results.sort_by_key(|e| e.address);
        if start >= results.len() {
            return Ok(Vec::new());
        }
        let end = (start + count).min(results.len());
        Ok(results[start..end].to_vec())
    }
}
