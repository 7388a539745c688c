//! Thread Dispatcher (C10, spec.md §4.10).
//!
//! Named channels, each either a single worker thread with an MPSC queue, a
//! fixed-size worker pool, or (in single-thread-mode) the calling thread
//! itself. Generalizes the channel-per-concern plumbing `jdb::main` wires up
//! by hand (`process_tx`/`process_shutdown_rx`, `tui_tx`/`tui_shutdown_rx`)
//! into one named registry so every subsystem (the scan reader pool, the
//! freeze loop, the debugger worker) shares the same dispatch contract
//! instead of each owning ad hoc channels.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, Sender, bounded, unbounded};

use crate::error::{Result, VertexError};

/// A named dispatch target. `ReaderPool(i)` is one channel per scan-pipeline
/// reader thread; the rest are singletons.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Channel {
    ReaderPool(usize),
    Freeze,
    DebuggerWorker,
    SymbolLoad,
    Custom(&'static str),
}

pub type DispatchTask = Box<dyn FnOnce() -> Result<()> + Send + 'static>;

/// A handle to a dispatched task's eventual status. There is no async
/// runtime in this stack (`jdb::main`'s own channel plumbing is
/// synchronous/blocking too); `wait()` blocks the calling thread until the
/// task completes.
pub struct DispatchHandle {
    rx: Receiver<Result<()>>,
}

impl DispatchHandle {
    pub fn wait(self) -> Result<()> {
        self.rx.recv().unwrap_or(Err(VertexError::General("dispatch worker dropped".into())))
    }

    fn immediate(result: Result<()>) -> Self {
        let (tx, rx) = bounded(1);
        let _ = tx.send(result);
        Self { rx }
    }
}

struct Worker {
    sender: Sender<DispatchTask>,
    handle: Option<JoinHandle<()>>,
    busy: Arc<AtomicBool>,
}

impl Worker {
    fn spawn(label: String) -> Self {
        let (tx, rx): (Sender<DispatchTask>, Receiver<DispatchTask>) = unbounded();
        let busy = Arc::new(AtomicBool::new(false));
        let busy_thread = busy.clone();
        let handle = std::thread::Builder::new()
            .name(label)
            .spawn(move || {
                for task in rx {
                    busy_thread.store(true, Ordering::Release);
                    let _ = task();
                    busy_thread.store(false, Ordering::Release);
                }
            })
            .expect("failed to spawn dispatcher worker thread");
        Self { sender: tx, handle: Some(handle), busy }
    }

    fn dispatch(&self, task: DispatchTask, reply: Sender<Result<()>>) {
        let wrapped: DispatchTask = Box::new(move || {
            let result = task();
            let _ = reply.send(match &result {
                Ok(()) => Ok(()),
                Err(e) => Err(VertexError::General(e.to_string())),
            });
            result
        });
        let _ = self.sender.send(wrapped);
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

enum Backing {
    Single(Worker),
    Pool(Vec<Worker>),
}

/// Registry of named channels. Construct with `single_thread_mode` set from
/// the plugin's declared feature flag at startup (spec.md §4.10); in that
/// mode every channel folds onto the calling thread and
/// `dispatch_fire_and_forget` executes synchronously rather than queueing.
pub struct ThreadDispatcher {
    single_thread_mode: bool,
    channels: Mutex<HashMap<Channel, Backing>>,
}

impl ThreadDispatcher {
    pub fn new(single_thread_mode: bool) -> Self {
        Self { single_thread_mode, channels: Mutex::new(HashMap::new()) }
    }

    pub fn is_single_thread_mode(&self) -> bool {
        self.single_thread_mode
    }

    fn ensure_single(&self, channel: &Channel) {
        if self.single_thread_mode {
            return;
        }
        let mut channels = self.channels.lock().expect("dispatcher lock poisoned");
        channels
            .entry(channel.clone())
            .or_insert_with(|| Backing::Single(Worker::spawn(format!("{channel:?}"))));
    }

    pub fn create_worker_pool(&self, channel: Channel, n: usize) {
        if self.single_thread_mode {
            return;
        }
        let workers = (0..n).map(|i| Worker::spawn(format!("{channel:?}#{i}"))).collect();
        self.channels
            .lock()
            .expect("dispatcher lock poisoned")
            .insert(channel, Backing::Pool(workers));
    }

    pub fn destroy_worker_pool(&self, channel: &Channel) {
        self.channels.lock().expect("dispatcher lock poisoned").remove(channel);
    }

    /// Dispatches `task` and returns a handle the caller may `.wait()` on.
    pub fn dispatch(&self, channel: &Channel, task: DispatchTask) -> DispatchHandle {
        if self.single_thread_mode {
            return DispatchHandle::immediate(task());
        }
        self.ensure_single(channel);
        let (tx, rx) = bounded(1);
        let channels = self.channels.lock().expect("dispatcher lock poisoned");
        match channels.get(channel) {
            Some(Backing::Single(w)) => w.dispatch(task, tx),
            Some(Backing::Pool(workers)) => {
                if let Some(w) = workers.first() {
                    w.dispatch(task, tx);
                } else {
                    let _ = tx.send(Err(VertexError::General("empty worker pool".into())));
                }
            }
            None => {
                let _ = tx.send(Err(VertexError::General("unknown channel".into())));
            }
        }
        DispatchHandle { rx }
    }

    /// Fire-and-forget dispatch. Per spec.md §4.10, in single-thread-mode
    /// this must not block the current task: it runs the task inline and
    /// returns its immediate status, same as every other caller already
    /// expects from a synchronous call.
    pub fn dispatch_fire_and_forget(&self, channel: &Channel, task: DispatchTask) -> Result<()> {
        if self.single_thread_mode {
            return task();
        }
        self.ensure_single(channel);
        let (tx, _rx) = bounded(1);
        let channels = self.channels.lock().expect("dispatcher lock poisoned");
        match channels.get(channel) {
            Some(Backing::Single(w)) => {
                w.dispatch(task, tx);
                Ok(())
            }
            Some(Backing::Pool(workers)) => {
                if let Some(w) = workers.first() {
                    w.dispatch(task, tx);
                }
                Ok(())
            }
            None => Err(VertexError::General("unknown channel".into())),
        }
    }

    pub fn enqueue_on_worker(&self, channel: &Channel, worker_index: usize, task: DispatchTask) -> Result<()> {
        if self.single_thread_mode {
            return task();
        }
        let channels = self.channels.lock().expect("dispatcher lock poisoned");
        match channels.get(channel) {
            Some(Backing::Pool(workers)) => {
                let worker = workers
                    .get(worker_index)
                    .ok_or_else(|| VertexError::General(format!("no worker {worker_index} on {channel:?}")))?;
                let (tx, _rx) = bounded(1);
                worker.dispatch(task, tx);
                Ok(())
            }
            _ => Err(VertexError::General(format!("{channel:?} is not a worker pool"))),
        }
    }

    pub fn is_channel_busy(&self, channel: &Channel) -> bool {
        if self.single_thread_mode {
            return false;
        }
        let channels = self.channels.lock().expect("dispatcher lock poisoned");
        match channels.get(channel) {
            Some(Backing::Single(w)) => w.busy.load(Ordering::Acquire),
            Some(Backing::Pool(workers)) => workers.iter().any(|w| w.busy.load(Ordering::Acquire)),
            None => false,
        }
    }
}
