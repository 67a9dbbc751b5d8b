//! Registry and proxy integration tests.
//!
//! The registry is process-global state, so everything runs in one test
//! function to keep ordering deterministic within this binary.

mod common;

use std::sync::Arc;

use common::{chopper_bench, init_logs, CHOPPER_SETTINGS};
use saved_positions::registry::{configuration, Registry};

#[tokio::test]
async fn registry_memoizes_and_proxies_reach_the_bus() {
    init_logs();
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("high_speed_chopper_modes_settings.txt"),
        CHOPPER_SETTINGS,
    )
    .unwrap();

    // Bench with ChopX live at 30.0 (command row is S-1).
    let bench = chopper_bench(30.0, 30.925, 0.0);
    let registry = Registry::global();
    registry.clear();
    registry.set_settings_dir(dir.path());
    registry.set_default_bank(bench.bank.clone());

    // Missing name surfaces the I/O failure.
    assert!(configuration("no_such_table").is_err());

    let handle = configuration("high_speed_chopper_modes").unwrap();
    let again = configuration("high_speed_chopper_modes").unwrap();
    assert!(Arc::ptr_eq(&handle, &again), "loader must memoize by name");

    handle.with_table(|cfg| {
        assert_eq!(cfg.title, "High-speed chopper modes");
        assert_eq!(cfg.command_row(), Some(1));
    });

    // motor[0] is ChopX: read the live readback, then write through it.
    let proxy = handle.motor(0).unwrap();
    assert_eq!(proxy.motor_name(), "chopper.X");
    assert_eq!(proxy.current_position().await.unwrap(), 30.0);

    proxy.set_current_position(33.79).await.unwrap();
    assert_eq!(bench.x.writes().await, vec![33.79]);
    assert_eq!(proxy.nominal_position().await.unwrap(), 33.79);

    // Saved position follows the command row.
    assert_eq!(proxy.saved_position(), Some(37.28));

    // Edit a cell through the handle and save; the file on disk changes.
    handle.with_table_mut(|cfg| {
        let s1 = cfg.find_row("S-1").unwrap();
        cfg.set_cell(s1, 0, 33.79).unwrap();
    });
    handle.save().unwrap();
    let text = std::fs::read_to_string(handle.path()).unwrap();
    assert!(text.contains("line1.ChopX = 33.79"));

    // Clearing the registry forgets the handle; the next lookup reloads.
    registry.clear();
    let reloaded = configuration("high_speed_chopper_modes").unwrap();
    assert!(!Arc::ptr_eq(&handle, &reloaded));
    reloaded.with_table(|cfg| {
        let s1 = cfg.find_row("S-1").unwrap();
        assert_eq!(cfg.cell(s1, 0).unwrap(), 33.79);
    });
    registry.clear();
}
