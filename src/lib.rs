//! Vertex core: a parallel memory scanner and debugger control plane.
//!
//! This crate is the plugin-agnostic core of the Vertex process-inspection
//! toolkit (spec.md §1). It owns every hard subsystem (the plugin gateway,
//! the scan pipeline and its result store, the debugger worker and its
//! breakpoint/watchpoint registry, the disassembly window, the address
//! monitor, the event bus, and the thread dispatcher) and exposes them as
//! a library. There is no UI and no CLI entry point here: a GUI, a plugin
//! author, and a settings editor are all external consumers of this crate,
//! save for one reference plugin (`plugin::native_linux`) kept in-tree to
//! prove the ABI against a real target. See DESIGN.md for the grounding
//! ledger and open-question resolutions.

pub mod cacheline;
pub mod debugger;
pub mod disassembly;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod logging;
pub mod monitor;
pub mod plugin;
pub mod scan;
pub mod settings;

use std::path::PathBuf;
use std::sync::Arc;

use debugger::{DebuggerCommand, DebuggerWorker};
use disassembly::DisassemblyWindow;
use dispatch::{Channel, ThreadDispatcher};
use error::Result;
use events::EventBus;
use monitor::AddressMonitor;
use plugin::{PluginGateway, PluginVtable};
use scan::ScanController;
use settings::Settings;

/// Top-level wiring of every component, in the dependency order spec.md §2
/// lists (C1 first, C9/C10 threaded through everything above them).
/// Generalizes the channel-and-struct wiring `jdb::main::main` used to do
/// by hand for one hardcoded `Process`/`Debugger`/TUI triple into a
/// reusable facade any embedder (GUI, test harness, headless CLI) can
/// construct once and drive.
pub struct VertexCore {
    pub gateway: Arc<PluginGateway>,
    pub event_bus: Arc<EventBus>,
    pub dispatcher: Arc<ThreadDispatcher>,
    pub settings: Settings,
    pub scan: ScanController,
    pub debugger: DebuggerWorker,
    pub disassembly: DisassemblyWindow,
    pub monitor: AddressMonitor,
}

impl VertexCore {
    /// Builds a core with no plugin installed yet; call [`Self::install_plugin`]
    /// before attaching to anything. `session_dir` backs the scan result
    /// store and undo snapshots (spec.md §4.2, §4.4).
    pub fn new(settings: Settings, session_dir: PathBuf) -> Self {
        let gateway = Arc::new(PluginGateway::new());
        let event_bus = Arc::new(EventBus::new());
        let dispatcher = Arc::new(ThreadDispatcher::new(false));
        let reader_threads = settings.reader_threads() as usize;

        let scan = ScanController::new(gateway.clone(), session_dir, reader_threads);
        let debugger = DebuggerWorker::new(gateway.clone(), event_bus.clone());

        dispatcher.create_worker_pool(Channel::ReaderPool(0), reader_threads.max(1));

        Self {
            gateway,
            event_bus,
            dispatcher,
            settings,
            scan,
            debugger,
            disassembly: DisassemblyWindow::new(),
            monitor: AddressMonitor::new(),
        }
    }

    /// Installs a plugin backend, replacing any previously-installed one.
    pub fn install_plugin(&self, plugin: Arc<dyn PluginVtable>) {
        self.gateway.install(plugin);
    }

    /// Routes a debugger command through the worker's command handler
    /// (spec.md §4.5); the caller is responsible for running blocking
    /// commands like `Continue`/`StepInto` through
    /// `dispatcher.dispatch(&Channel::DebuggerWorker, ...)` if it wants the
    /// calling thread to stay responsive.
    pub fn dispatch_debugger_command(&mut self, command: DebuggerCommand) -> Result<()> {
        self.debugger.handle(command)
    }

    /// One address-monitor tick: read-back every watched address, then run
    /// the freeze write-back if anything is pinned (spec.md §4.5).
    pub fn tick_monitor(&self) -> Result<()> {
        self.monitor.refresh(&self.gateway)?;
        self.monitor.tick(&self.gateway, &self.dispatcher);
        Ok(())
    }
}
