//! Shared fixtures for the integration tests: the high-speed chopper modes
//! table and a mock bus bench wired to its three motors.
#![allow(dead_code)]

use std::sync::Arc;

use saved_positions::motor::{MockMotor, MotorBank};
use saved_positions::table::Configuration;
use saved_positions::settings::SettingsDoc;

/// A realistic chopper-modes settings file: 13 rows (Bypass, S-1, S-1t and
/// the odd S-N slots up to 21), three columns bound to the chopper X/Y
/// stages and the timing-system phase channel.
pub const CHOPPER_SETTINGS: &str = "\
title = 'High-speed chopper modes'
serial = 4
show_in_list = True
motor_names = ['chopper.X', 'chopper.Y', 'timing_system.channels.hsc.delay']
motor_labels = ['ChopX [mm]', 'ChopY [mm]', 'Phase [s]']
names = ['ChopX', 'ChopY', 'delay']
formats = ['%.4f', '%.4f', '%g']
widths = [90, 90, 120]
tolerance = [0.001, 0.001, 3e-09]
row_height = 20
description_width = 90
show_apply_buttons = True
apply_button_label = 'Set'
show_define_buttons = True
define_button_label = 'Update'
show_stop_button = False
command_row = 1
nrows = 13
name_width = 150
line0.description = 'Bypass'
line0.updated = '2024-11-02 09:15:42'
line0.ChopX = 12.7
line0.ChopY = 46.5
line0.delay = nan
line1.description = 'S-1'
line1.updated = '2024-11-02 09:20:11'
line1.ChopX = 37.28
line1.ChopY = 30.925
line1.delay = 0
line2.description = 'S-1t'
line2.updated = '2024-11-02 09:21:05'
line2.ChopX = 37.28
line2.ChopY = 30.925
line2.delay = 1.372e-09
line3.description = 'S-3'
line3.updated = '2024-10-12 17:44:02'
line3.ChopX = 37.28
line3.ChopY = 30.81
line3.delay = 0
line4.description = 'S-5'
line4.updated = '2024-10-12 17:44:02'
line4.ChopX = 37.28
line4.ChopY = 30.74
line4.delay = 0
line5.description = 'S-7'
line5.updated = '2024-10-12 17:44:02'
line5.ChopX = 37.28
line5.ChopY = 30.66
line5.delay = 0
line6.description = 'S-9'
line6.updated = '2024-10-12 17:44:02'
line6.ChopX = 37.28
line6.ChopY = 30.59
line6.delay = 0
line7.description = 'S-11'
line7.updated = '2024-10-12 17:44:02'
line7.ChopX = 37.28
line7.ChopY = 30.51
line7.delay = 0
line8.description = 'S-13'
line8.updated = '2024-10-12 17:44:02'
line8.ChopX = 37.28
line8.ChopY = 30.44
line8.delay = 0
line9.description = 'S-15'
line9.updated = '2024-10-12 17:44:02'
line9.ChopX = 37.28
line9.ChopY = 30.36
line9.delay = 0
line10.description = 'S-17'
line10.updated = '2024-10-12 17:44:02'
line10.ChopX = 37.28
line10.ChopY = 30.29
line10.delay = 0
line11.description = 'S-19'
line11.updated = '2024-10-12 17:44:02'
line11.ChopX = 37.28
line11.ChopY = 30.21
line11.delay = 0
line12.description = 'S-21'
line12.updated = '27 Feb 21:32'
line12.ChopX = 37.28
line12.ChopY = 30.14
line12.delay = 0
";

/// Parse the chopper fixture directly (no file involved).
pub fn chopper_config() -> Configuration {
    let doc = SettingsDoc::parse(CHOPPER_SETTINGS).unwrap();
    Configuration::from_doc(doc).unwrap()
}

/// Mock bus bench for the chopper table, with handles kept so tests can
/// assert the exact writes each operation produced.
pub struct ChopperBench {
    pub bank: Arc<MotorBank>,
    pub x: Arc<MockMotor>,
    pub y: Arc<MockMotor>,
    pub delay: Arc<MockMotor>,
}

/// Bench with the three chopper motors at the given live positions.
pub fn chopper_bench(x0: f64, y0: f64, delay0: f64) -> ChopperBench {
    let x = Arc::new(MockMotor::new("chopper.X", x0));
    let y = Arc::new(MockMotor::new("chopper.Y", y0));
    let delay = Arc::new(MockMotor::new(
        "timing_system.channels.hsc.delay",
        delay0,
    ));
    let mut bank = MotorBank::new();
    bank.register(x.clone()).unwrap();
    bank.register(y.clone()).unwrap();
    bank.register(delay.clone()).unwrap();
    ChopperBench {
        bank: Arc::new(bank),
        x,
        y,
        delay,
    }
}

/// Quiet logger setup for tests that want log output on failure.
pub fn init_logs() {
    let _ = env_logger::builder().is_test(true).try_init();
}
