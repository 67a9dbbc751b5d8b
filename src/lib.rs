//! # Saved-Positions Configuration Tables
//!
//! This crate is the core library for the saved-positions subsystem of an
//! experimental station: tables of named instrument "modes" (e.g. `S-1`,
//! `H-56`, `Bypass`) where each column is a logical motor bound to a live
//! setpoint on the control bus. Tables persist to line-oriented settings
//! files, diff themselves against live values with per-column tolerances,
//! apply a chosen row to the bus, and recompute derived rows from a
//! canonical reference row.
//!
//! ## Crate Structure
//!
//! - **`value`** / **`settings`**: the `key = value` persistence grammar
//!   and atomic file handling.
//! - **`table`**: the in-memory tabular model — `Configuration`, `Column`,
//!   `Row` — with tolerance-aware cell edits and provenance timestamps.
//! - **`motor`**: the binding seam to the control bus — the `Motorized`
//!   capability trait, the dotted-name `MotorBank`, readback update
//!   streams, and `MockMotor` for tests.
//! - **`apply`**: the preview/apply engine that turns a row into bus
//!   writes with snapshot diffs, cooperative cancel and deadline-split
//!   waits.
//! - **`recalc`**: derived-row recalculation driven by declarative
//!   pattern→formula rule tables keyed by configuration title.
//! - **`proxy`** / **`registry`**: `configuration(name)` handles shared
//!   across the process, and per-column `MotorProxy` accessors.
//! - **`error`**: the `TableError` / `MotorError` taxonomy.
//!
//! ## Ownership and concurrency
//!
//! A configuration owns its rows; the motor bank is shared by reference and
//! never copied. The table and recalculator belong to a single owning task;
//! the only suspension points in the core are the apply engine's motor
//! waits. Background readback notifications must be marshaled onto the
//! owning task (see [`motor::forward_updates`]) before touching table
//! state.

pub mod apply;
pub mod error;
pub mod motor;
pub mod proxy;
pub mod recalc;
pub mod registry;
pub mod settings;
pub mod table;
pub mod value;

pub use apply::{ApplyEngine, ApplyOptions, ApplyReport, DiffEntry, Preview};
pub use error::{MotorError, TableError, TableResult};
pub use motor::{MockMotor, MotorBank, Motorized, ReadbackUpdate};
pub use proxy::{ConfigurationHandle, MotorProxy};
pub use recalc::{RecalcPreview, RecalcRule, RecalcRules, Recalculator, RowPattern};
pub use registry::{configuration, Registry};
pub use settings::SettingsDoc;
pub use table::{Column, Configuration, Row};
pub use value::Value;
