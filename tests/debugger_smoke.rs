#![cfg(target_os = "linux")]

mod fixtures;

use std::sync::Arc;

use vertex_core::error::Result;
use vertex_core::plugin::gateway::PluginGateway;
use vertex_core::plugin::native_linux::NativeLinuxPlugin;
use vertex_core::plugin::types::StopReason;

/// End-to-end smoke test against a real ptrace'd inferior: launch the
/// fixture, observe it stop on its own `SIGSTOP`, read registers through the
/// gateway, then resume it to exit.
#[test]
fn launch_read_and_resume_inferior() -> Result<()> {
    let fixture = fixtures::hello_fixture_path();

    let plugin = Arc::new(NativeLinuxPlugin::new());
    let pid = plugin
        .launch(&fixture, &[fixture.to_string_lossy().into_owned()])
        .expect("launch should succeed");

    let gateway = PluginGateway::new();
    gateway.install(plugin.clone());

    assert!(gateway.is_process_valid());

    // Initial stop is the post-exec trap; continue to the fixture's own
    // SIGSTOP before it ever runs its printing/sleeping body.
    let reason = gateway.debugger_continue(false)?;
    assert!(matches!(reason, StopReason::Paused { .. }), "expected SIGSTOP pause, got {reason:?}");

    let tid = gateway.get_current_thread()?;
    assert_eq!(tid, pid);
    let registers = gateway.get_registers(tid)?;
    assert!(registers.get("rip").is_some());
    assert!(registers.get("rsp").is_some());

    // Resume and let it run to completion.
    let reason = gateway.debugger_continue(false)?;
    assert!(
        matches!(reason, StopReason::ProcessExited { .. }),
        "expected process exit, got {reason:?}"
    );

    Ok(())
}
