mod support;

use std::sync::Arc;

use support::mock_plugin::MockPlugin;
use vertex_core::debugger::{DebuggerCommand, DebuggerState, DebuggerWorker};
use vertex_core::events::EventBus;
use vertex_core::monitor::{AddressMonitor, SavedAddress};
use vertex_core::plugin::gateway::{PluginGateway, PluginVtable};
use vertex_core::plugin::types::{BreakpointKind, StopReason};
use vertex_core::scan::{Endianness, ValueType};

/// Runs the attach -> breakpoint -> continue -> hit -> detach cycle against
/// the mock plugin, independent of any real OS process. This is the
/// platform-agnostic counterpart to `tests/debugger_smoke.rs`, which needs
/// Linux ptrace.
#[test]
fn attach_breakpoint_hit_and_detach() {
    let plugin = Arc::new(MockPlugin::new(vec![0u8; 256]));
    let gateway = Arc::new(PluginGateway::new());
    gateway.install(plugin.clone());

    let event_bus = Arc::new(EventBus::new());
    let mut worker = DebuggerWorker::new(gateway, event_bus);

    worker.handle(DebuggerCommand::Attach(4242)).unwrap();
    assert_eq!(worker.state(), DebuggerState::Attached);

    worker.handle(DebuggerCommand::ToggleBreakpoint(0x40, BreakpointKind::Execute)).unwrap();
    let breakpoints: Vec<_> = worker.registry().breakpoints().collect();
    assert_eq!(breakpoints.len(), 1);
    let bp_id = breakpoints[0].id;

    plugin.script_stops(vec![StopReason::BreakpointHit { id: bp_id, address: 0x40, thread_id: 1 }]);
    worker.handle(DebuggerCommand::Continue).unwrap();
    assert_eq!(worker.state(), DebuggerState::BreakpointHit);

    plugin.script_stops(vec![StopReason::ProcessExited { exit_code: 0 }]);
    worker.handle(DebuggerCommand::Continue).unwrap();
    assert_eq!(worker.state(), DebuggerState::Detached);
}

/// Address monitor read-back and freeze write-back against the mock
/// plugin's flat memory, exercised without any dispatcher thread pool
/// (single-thread-mode makes `tick` run inline).
#[test]
fn monitor_refresh_and_freeze_round_trip() {
    let mut memory = vec![0u8; 64];
    memory[0..4].copy_from_slice(&77i32.to_le_bytes());
    let plugin = Arc::new(MockPlugin::new(memory));
    plugin.open_process(4242).unwrap();
    let gateway = Arc::new(PluginGateway::new());
    gateway.install(plugin);

    let monitor = AddressMonitor::new();
    monitor.add(SavedAddress::new(0, ValueType::I32, Endianness::Little));
    monitor.refresh(&gateway).unwrap();
    assert_eq!(monitor.entries()[0].formatted_value, "77");

    let dispatcher = vertex_core::dispatch::ThreadDispatcher::new(true);
    monitor.set_frozen(0, 999i32.to_le_bytes().to_vec());
    monitor.tick(&gateway, &dispatcher);

    monitor.refresh(&gateway).unwrap();
    assert_eq!(monitor.entries()[0].formatted_value, "999");
}
