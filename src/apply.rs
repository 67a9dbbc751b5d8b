//! Apply / preview engine: turns a chosen row into bus writes.
//!
//! The engine owns all traffic between a [`Configuration`] and the
//! [`MotorBank`]. Live setpoints are sampled once at the start of each call
//! (snapshot semantics) so every comparison within one `diff`, `preview` or
//! `apply` observes a consistent bus state.
//!
//! An `apply` dispatches writes in stored column order, skipping NaN cells
//! and cells already within tolerance. Per-motor failures never abort the
//! row; they are collected and reported as
//! [`TableError::PartialApply`]. A cooperative cancel flag is checked
//! between per-column dispatches; motors already dispatched continue and no
//! rollback is attempted. With `wait` enabled, the call-wide deadline is
//! divided equally among the motors still pending; deadline exhaustion
//! reports [`TableError::Timeout`] naming the motors still in motion.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use crate::error::{MotorError, TableError, TableResult};
use crate::motor::MotorBank;
use crate::table::{within_tolerance, Configuration};
use crate::value::format_cell;

/// One out-of-tolerance column from a `diff`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DiffEntry {
    /// Column index.
    pub column: usize,
    /// Saved (nominal) value from the table.
    pub saved: f64,
    /// Live value sampled from the bus.
    pub live: f64,
}

/// One line of a human-readable preview.
#[derive(Debug, Clone, Serialize)]
pub struct PreviewEntry {
    /// Column label.
    pub label: String,
    /// Dotted motor name.
    pub motor: String,
    /// Display format for the values (per-column).
    pub format: String,
    /// Live value at snapshot time.
    pub current: f64,
    /// Saved value that an apply would write.
    pub saved: f64,
    /// `saved - current`.
    pub delta: f64,
}

/// Preview of what an apply would do for one row.
#[derive(Debug, Clone, Serialize)]
pub struct Preview {
    /// Description of the previewed row.
    pub row: String,
    /// Out-of-tolerance columns, in stored column order.
    pub entries: Vec<PreviewEntry>,
}

impl Preview {
    /// JSON form for GUI/script interchange.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

impl fmt::Display for Preview {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Mode '{}': {} motor(s) to move",
            self.row,
            self.entries.len()
        )?;
        writeln!(
            f,
            "  {:<24} {:>14} {:>14} {:>14}",
            "motor", "current", "saved", "delta"
        )?;
        for e in &self.entries {
            writeln!(
                f,
                "  {:<24} {:>14} {:>14} {:>14}",
                e.label,
                format_cell(&e.format, e.current),
                format_cell(&e.format, e.saved),
                format_cell(&e.format, e.delta),
            )?;
        }
        Ok(())
    }
}

/// Options controlling an apply.
#[derive(Clone)]
pub struct ApplyOptions {
    /// Block until each dispatched motor reports done.
    pub wait: bool,
    /// Deadline spanning the whole call.
    pub timeout: Duration,
    /// Cooperative cancel flag, checked between per-column dispatches.
    pub cancel: Option<Arc<AtomicBool>>,
}

impl Default for ApplyOptions {
    fn default() -> Self {
        Self {
            wait: true,
            timeout: Duration::from_secs(30),
            cancel: None,
        }
    }
}

impl ApplyOptions {
    fn is_cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .map(|flag| flag.load(Ordering::SeqCst))
            .unwrap_or(false)
    }
}

/// Result of a clean apply.
#[derive(Debug, Clone, Serialize)]
pub struct ApplyReport {
    /// Description of the applied row.
    pub row: String,
    /// Motors written, in dispatch order.
    pub applied: Vec<String>,
    /// Whether the cancel flag stopped dispatch early.
    pub cancelled: bool,
}

/// The apply/preview engine. Holds the shared motor bank by reference.
pub struct ApplyEngine {
    bank: Arc<MotorBank>,
}

impl ApplyEngine {
    /// New engine over a shared bank.
    pub fn new(bank: Arc<MotorBank>) -> Self {
        Self { bank }
    }

    /// The shared bank.
    pub fn bank(&self) -> &Arc<MotorBank> {
        &self.bank
    }

    /// Columns whose saved value differs from the live setpoint beyond
    /// tolerance. NaN saved cells are skipped; live values are sampled once
    /// at the start of the call.
    pub async fn diff(&self, cfg: &Configuration, row: usize) -> TableResult<Vec<DiffEntry>> {
        let saved = cfg.row(row)?.positions.clone();

        // Snapshot first, compare after, so one call sees one bus state.
        let mut live = vec![f64::NAN; cfg.ncols()];
        for (c, value) in saved.iter().enumerate() {
            if value.is_nan() {
                continue;
            }
            let column = cfg.column(c)?;
            live[c] = self.bank.get_nominal(&column.motor_name).await?;
        }

        let mut entries = Vec::new();
        for (c, value) in saved.iter().enumerate() {
            if value.is_nan() {
                continue;
            }
            let column = cfg.column(c)?;
            let tolerance = self.bank.tolerance_for(&column.motor_name, column.tolerance);
            if !within_tolerance(live[c], *value, tolerance) {
                entries.push(DiffEntry {
                    column: c,
                    saved: *value,
                    live: live[c],
                });
            }
        }
        Ok(entries)
    }

    /// Human-readable table of pending moves for a row. Always succeeds for
    /// a valid row with a reachable bus.
    pub async fn preview(&self, cfg: &Configuration, row: usize) -> TableResult<Preview> {
        let description = cfg.row(row)?.description.clone();
        let entries = self
            .diff(cfg, row)
            .await?
            .into_iter()
            .map(|d| {
                let column = &cfg.columns[d.column];
                PreviewEntry {
                    label: column.label.clone(),
                    motor: column.motor_name.clone(),
                    format: column.format.clone(),
                    current: d.live,
                    saved: d.saved,
                    delta: d.saved - d.live,
                }
            })
            .collect();
        Ok(Preview {
            row: description,
            entries,
        })
    }

    /// Write a row's saved values to the bus.
    ///
    /// Dispatches in stored column order for every non-NaN cell that differs
    /// from the live setpoint beyond tolerance. Repeating an apply on an
    /// already-aligned row issues zero writes.
    pub async fn apply(
        &self,
        cfg: &Configuration,
        row: usize,
        opts: &ApplyOptions,
    ) -> TableResult<ApplyReport> {
        let description = cfg.row(row)?.description.clone();
        let deadline = Instant::now() + opts.timeout;
        let pending = self.diff(cfg, row).await?;

        let mut applied: Vec<String> = Vec::new();
        let mut failed: Vec<(String, MotorError)> = Vec::new();
        let mut cancelled = false;

        for entry in &pending {
            if opts.is_cancelled() {
                cancelled = true;
                log::info!(
                    "apply of '{}' cancelled after {} dispatch(es)",
                    description,
                    applied.len()
                );
                break;
            }
            let motor = cfg.column(entry.column)?.motor_name.clone();
            match self.bank.set_nominal(&motor, entry.saved).await {
                Ok(()) => {
                    log::debug!("apply '{}': {} <- {}", description, motor, entry.saved);
                    applied.push(motor);
                }
                Err(err) => {
                    log::warn!("apply '{}': {} failed: {}", description, motor, err);
                    failed.push((motor, err));
                }
            }
        }

        // Wait phase: split the remaining deadline equally among motors
        // still pending, re-splitting as each one finishes.
        let mut still_moving: Vec<String> = Vec::new();
        if opts.wait {
            let mut remaining = applied.len();
            for motor in &applied {
                let left = deadline.saturating_duration_since(Instant::now());
                let slice = if remaining > 0 {
                    left / remaining as u32
                } else {
                    left
                };
                match self.bank.wait_done(motor, slice).await {
                    Ok(true) => {}
                    Ok(false) => still_moving.push(motor.clone()),
                    Err(err) => failed.push((motor.clone(), err)),
                }
                remaining -= 1;
            }
        }

        if !failed.is_empty() {
            for motor in still_moving {
                failed.push((motor.clone(), MotorError::Timeout(motor)));
            }
            return Err(TableError::PartialApply { applied, failed });
        }
        if !still_moving.is_empty() {
            return Err(TableError::Timeout {
                pending: still_moving,
            });
        }

        log::info!(
            "applied mode '{}': {} motor(s) written{}",
            description,
            applied.len(),
            if cancelled { " (cancelled early)" } else { "" }
        );
        Ok(ApplyReport {
            row: description,
            applied,
            cancelled,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::motor::{MockMotor, Motorized};
    use crate::table::Column;

    fn config_and_bank() -> (Configuration, Arc<MotorBank>) {
        let mut cfg = Configuration::new(
            "Test modes",
            vec![
                Column {
                    name: "X".into(),
                    label: "X [mm]".into(),
                    motor_name: "stage.x".into(),
                    format: "%.3f".into(),
                    tolerance: 0.001,
                    width: 90,
                },
                Column {
                    name: "Y".into(),
                    label: "Y [mm]".into(),
                    motor_name: "stage.y".into(),
                    format: "%.3f".into(),
                    tolerance: 0.001,
                    width: 90,
                },
            ],
        );
        cfg.insert_row(0, "park").unwrap();
        let mut bank = MotorBank::new();
        bank.register(Arc::new(MockMotor::new("stage.x", 0.0)))
            .unwrap();
        bank.register(Arc::new(MockMotor::new("stage.y", 0.0)))
            .unwrap();
        (cfg, Arc::new(bank))
    }

    #[tokio::test]
    async fn nan_cells_never_contribute_to_diff() {
        let (mut cfg, bank) = config_and_bank();
        cfg.set_cell(0, 0, 5.0).unwrap(); // Y stays NaN
        let engine = ApplyEngine::new(bank);
        let diff = engine.diff(&cfg, 0).await.unwrap();
        assert_eq!(diff.len(), 1);
        assert_eq!(diff[0].column, 0);
    }

    #[tokio::test]
    async fn aligned_row_applies_zero_writes() {
        let (mut cfg, bank) = config_and_bank();
        cfg.set_cell(0, 0, 0.0005).unwrap(); // within tolerance of live 0.0
        let engine = ApplyEngine::new(bank.clone());
        let report = engine
            .apply(&cfg, 0, &ApplyOptions::default())
            .await
            .unwrap();
        assert!(report.applied.is_empty());

        let motor = bank.resolve("stage.x").unwrap();
        assert_eq!(motor.get_nominal().await.unwrap(), 0.0);
    }

    #[tokio::test]
    async fn cancel_stops_between_columns() {
        let (mut cfg, bank) = config_and_bank();
        cfg.set_cell(0, 0, 1.0).unwrap();
        cfg.set_cell(0, 1, 2.0).unwrap();

        let flag = Arc::new(AtomicBool::new(true)); // cancelled before first dispatch
        let engine = ApplyEngine::new(bank);
        let opts = ApplyOptions {
            cancel: Some(flag),
            ..ApplyOptions::default()
        };
        let report = engine.apply(&cfg, 0, &opts).await.unwrap();
        assert!(report.cancelled);
        assert!(report.applied.is_empty());
    }

    #[tokio::test]
    async fn preview_renders_a_table() {
        let (mut cfg, bank) = config_and_bank();
        cfg.set_cell(0, 0, 1.5).unwrap();
        let engine = ApplyEngine::new(bank);
        let preview = engine.preview(&cfg, 0).await.unwrap();
        let text = preview.to_string();
        assert!(text.contains("Mode 'park': 1 motor(s) to move"));
        assert!(text.contains("X [mm]"));
        assert!(text.contains("1.500"));
    }
}
