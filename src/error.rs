//! Error types for the saved-positions subsystem.
//!
//! Two layers, matching how errors actually arise:
//!
//! - [`MotorError`] — per-motor bus failures (`Offline`, `OutOfRange`,
//!   `Timeout`). These are produced by [`Motorized`](crate::motor::Motorized)
//!   implementations and are cheap to clone so the apply engine can collect
//!   them into a report without aborting mid-row.
//! - [`TableError`] — everything the table-facing API can return: persistence
//!   parse/schema failures, lookup misses, and the call-level outcomes of an
//!   apply (`PartialApply`, `Timeout`) or a recalculation (`NoCanonicalRow`).
//!
//! Bus errors encountered during `apply()` never abort the row; they are
//! gathered and reported as `PartialApply` with the subset that failed.
//! NaN cell values are not errors anywhere in the crate.

use thiserror::Error;

/// Convenience alias for results using the table error type.
pub type TableResult<T> = std::result::Result<T, TableError>;

/// Failures reported by a single motor endpoint on the control bus.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MotorError {
    /// The bus cannot reach the motor (or the name resolves to nothing).
    #[error("motor '{0}' is offline")]
    Offline(String),

    /// The bus rejected a setpoint write.
    #[error("motor '{motor}' rejected setpoint {value}")]
    OutOfRange {
        /// Dotted motor name as registered with the bank.
        motor: String,
        /// The rejected setpoint.
        value: f64,
    },

    /// The per-motor wait budget was exhausted.
    #[error("motor '{0}' timed out waiting for motion to complete")]
    Timeout(String),
}

/// Errors surfaced by the configuration table and its engines.
#[derive(Error, Debug)]
pub enum TableError {
    /// A settings-file line could not be lexed or its scalar value is
    /// malformed (neither a valid number, quoted string, boolean, list,
    /// nor `nan`/`inf`).
    #[error("parse error at line {line}: {message}")]
    Parse {
        /// 1-based line number in the settings file.
        line: usize,
        /// What went wrong on that line.
        message: String,
    },

    /// The file parsed but violates the tabular schema (parallel-list
    /// length mismatch, command row out of range, ...).
    #[error("schema error: {0}")]
    Schema(String),

    /// File I/O failed during load or atomic save.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Row index or description lookup failed.
    #[error("no such row: {0}")]
    NoSuchRow(String),

    /// Column index or name lookup failed.
    #[error("no such column: {0}")]
    NoSuchColumn(String),

    /// A single motor operation failed outside of an apply cycle.
    #[error(transparent)]
    Motor(#[from] MotorError),

    /// The apply deadline elapsed with motors still in motion.
    #[error("apply timed out; still moving: {}", .pending.join(", "))]
    Timeout {
        /// Motors that had not reported done when the deadline expired.
        pending: Vec<String>,
    },

    /// Some motors were written successfully, others failed.
    #[error("partial apply: {} motor(s) written, {} failed", .applied.len(), .failed.len())]
    PartialApply {
        /// Motors whose setpoints were written.
        applied: Vec<String>,
        /// Motors that failed, with the bus error for each.
        failed: Vec<(String, MotorError)>,
    },

    /// The recalculation reference row is absent from the table.
    #[error("canonical row '{0}' not found")]
    NoCanonicalRow(String),

    /// A derived-row formula failed for a specific row/column.
    #[error("formula error for row '{row}': {message}")]
    Formula {
        /// Description of the row being recomputed.
        row: String,
        /// Formula failure detail.
        message: String,
    },
}
