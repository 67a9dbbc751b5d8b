//! The saved-positions configuration table.
//!
//! A [`Configuration`] is an ordered set of named rows ("modes", e.g. `S-1`,
//! `Bypass`) by an ordered set of columns, where each column is a logical
//! motor bound to a live setpoint on the control bus. The table holds the
//! nominal saved positions; the live side is the apply engine's business
//! (see [`crate::apply`]).
//!
//! ## Persistence
//!
//! Tables load from and save to line-oriented settings files (see
//! [`crate::settings`]). Column schema arrives as parallel lists
//! (`motor_names`, `motor_labels`, `names`, `formats`, `widths`,
//! `tolerance`); rows arrive as `lineI.description`, `lineI.updated` and
//! `lineI.<column-name>` keys. Missing cells default to NaN, NaN persists as
//! the literal `nan`, and unknown keys are carried as opaque extras and
//! re-emitted on save.
//!
//! ## Timestamps
//!
//! Every mutation that changes at least one cell stamps that row's `updated`
//! field with the current wall-clock time. The check is tolerance-aware: a
//! write within the column tolerance of the stored value is a no-op and does
//! not touch the timestamp.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use chrono::{Datelike, Local, NaiveDateTime};

use crate::error::{TableError, TableResult};
use crate::settings::SettingsDoc;
use crate::value::Value;

/// Canonical timestamp format written to settings files.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Short timestamp format observed in older saved files; accepted on read,
/// never written.
pub const SHORT_TIMESTAMP_FORMAT: &str = "%d %b %H:%M";

/// Tolerance-aware equality. NaN compares equal to NaN, so an unset cell
/// never registers as a pending change.
pub fn within_tolerance(a: f64, b: f64, tolerance: f64) -> bool {
    if a.is_nan() && b.is_nan() {
        return true;
    }
    (a - b).abs() <= tolerance
}

/// Current wall-clock time in the canonical timestamp format.
pub fn now_timestamp() -> String {
    Local::now().format(TIMESTAMP_FORMAT).to_string()
}

/// One logical motor column.
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    /// Identifier used in the persistence format (e.g. `ChopX`).
    pub name: String,
    /// Human-readable label for display.
    pub label: String,
    /// Dotted path resolved by the motor bank (e.g.
    /// `timing_system.channels.hsc.delay`).
    pub motor_name: String,
    /// printf-style display format (e.g. `%.4f`); display only.
    pub format: String,
    /// Numeric equality threshold for this column.
    pub tolerance: f64,
    /// Display width hint; carried, not interpreted.
    pub width: i64,
}

/// One saved mode: a named, fully-specified set of motor setpoints.
#[derive(Debug, Clone)]
pub struct Row {
    /// Short label (e.g. `S-1`, `Bypass`).
    pub description: String,
    /// When any cell in this row last changed (timestamp string).
    pub updated: String,
    /// Nominal saved setpoint per column; NaN means "do not apply".
    pub positions: Vec<f64>,
}

impl PartialEq for Row {
    fn eq(&self, other: &Self) -> bool {
        self.description == other.description
            && self.updated == other.updated
            && self.positions.len() == other.positions.len()
            && self
                .positions
                .iter()
                .zip(&other.positions)
                .all(|(a, b)| a.to_bits() == b.to_bits())
    }
}

impl Row {
    /// New row with all cells unset.
    pub fn new(description: impl Into<String>, ncols: usize) -> Self {
        Self {
            description: description.into(),
            updated: now_timestamp(),
            positions: vec![f64::NAN; ncols],
        }
    }

    /// Parse the `updated` field. Accepts the canonical format and the
    /// short `%d %b %H:%M` form (assumed current year).
    pub fn updated_time(&self) -> Option<NaiveDateTime> {
        if let Ok(t) = NaiveDateTime::parse_from_str(&self.updated, TIMESTAMP_FORMAT) {
            return Some(t);
        }
        let with_year = format!("{} {}", Local::now().year(), self.updated);
        NaiveDateTime::parse_from_str(&with_year, "%Y %d %b %H:%M").ok()
    }

    fn touch(&mut self) {
        self.updated = now_timestamp();
    }
}

/// Presentation hints carried through the persistence format but not
/// interpreted by the core. All fields are optional so that only keys
/// present in the source file are re-emitted.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Presentation {
    /// Whether this configuration appears in chooser lists.
    pub show_in_list: Option<bool>,
    /// Table row height in pixels.
    pub row_height: Option<i64>,
    /// Width of the description column in pixels.
    pub description_width: Option<i64>,
    /// Whether per-row apply buttons are shown.
    pub show_apply_buttons: Option<bool>,
    /// Label for the apply buttons.
    pub apply_button_label: Option<String>,
    /// Whether per-row define buttons are shown.
    pub show_define_buttons: Option<bool>,
    /// Label for the define buttons.
    pub define_button_label: Option<String>,
    /// Whether the stop button is shown.
    pub show_stop_button: Option<bool>,
}

/// A saved-positions table: rows of named modes, columns of motors bound to
/// live setpoints, plus the command-row pointer and presentation metadata.
#[derive(Debug, Clone)]
pub struct Configuration {
    /// Display name.
    pub title: String,
    /// Serial number carried from the file, if present.
    pub serial: Option<i64>,
    /// Ordered column descriptors.
    pub columns: Vec<Column>,
    /// Ordered mode rows.
    pub rows: Vec<Row>,
    /// Indexes of rows currently designated "active"; the first entry is
    /// the command row. `command_row` wins over `command_rows` when a file
    /// carries both.
    pub command_rows: Vec<usize>,
    /// Display hints, carried verbatim.
    pub presentation: Presentation,
    /// Unknown keys preserved for round-trip.
    pub extras: Vec<(String, Value)>,
    name_index: HashMap<String, usize>,
}

impl PartialEq for Configuration {
    fn eq(&self, other: &Self) -> bool {
        self.title == other.title
            && self.serial == other.serial
            && self.columns == other.columns
            && self.rows == other.rows
            && self.command_rows == other.command_rows
            && self.presentation == other.presentation
            && self.extras == other.extras
    }
}

impl Configuration {
    /// New in-memory configuration with the given columns and no rows.
    pub fn new(title: impl Into<String>, columns: Vec<Column>) -> Self {
        let name_index = build_name_index(&columns);
        Self {
            title: title.into(),
            serial: None,
            columns,
            rows: Vec::new(),
            command_rows: Vec::new(),
            presentation: Presentation::default(),
            extras: Vec::new(),
            name_index,
        }
    }

    /// Load a configuration from a settings file.
    pub fn load(path: &Path) -> TableResult<Self> {
        let doc = SettingsDoc::load(path)?;
        let cfg = Self::from_doc(doc)?;
        log::info!(
            "loaded configuration '{}' ({} rows x {} columns) from {}",
            cfg.title,
            cfg.rows.len(),
            cfg.columns.len(),
            path.display()
        );
        Ok(cfg)
    }

    /// Atomically save the canonical representation.
    pub fn save(&self, path: &Path) -> TableResult<()> {
        self.to_doc().save_atomic(path)?;
        log::info!("saved configuration '{}' to {}", self.title, path.display());
        Ok(())
    }

    /// Number of columns.
    pub fn ncols(&self) -> usize {
        self.columns.len()
    }

    /// Number of rows.
    pub fn nrows(&self) -> usize {
        self.rows.len()
    }

    /// Row by index.
    pub fn row(&self, index: usize) -> TableResult<&Row> {
        self.rows
            .get(index)
            .ok_or_else(|| TableError::NoSuchRow(index.to_string()))
    }

    /// Column by index.
    pub fn column(&self, index: usize) -> TableResult<&Column> {
        self.columns
            .get(index)
            .ok_or_else(|| TableError::NoSuchColumn(index.to_string()))
    }

    /// Column index by persistence name.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.name_index.get(name).copied()
    }

    /// First row whose description matches, if any. When two rows share a
    /// description the first wins.
    pub fn find_row(&self, description: &str) -> Option<usize> {
        self.rows.iter().position(|r| r.description == description)
    }

    /// The active row, if one is selected.
    pub fn command_row(&self) -> Option<usize> {
        self.command_rows.first().copied()
    }

    /// Record which row is currently "active".
    pub fn select_command_row(&mut self, index: usize) -> TableResult<()> {
        if index >= self.rows.len() {
            return Err(TableError::NoSuchRow(index.to_string()));
        }
        self.command_rows = vec![index];
        Ok(())
    }

    /// Write a cell. Returns `true` when the stored value actually changed;
    /// an in-tolerance write is a no-op and does not stamp the row.
    pub fn set_cell(&mut self, row: usize, col: usize, value: f64) -> TableResult<bool> {
        let tolerance = self.column(col)?.tolerance;
        let r = self
            .rows
            .get_mut(row)
            .ok_or_else(|| TableError::NoSuchRow(row.to_string()))?;
        let current = r.positions[col];
        if within_tolerance(current, value, tolerance) {
            return Ok(false);
        }
        r.positions[col] = value;
        r.touch();
        Ok(true)
    }

    /// Cell value (NaN when unset).
    pub fn cell(&self, row: usize, col: usize) -> TableResult<f64> {
        let r = self.row(row)?;
        r.positions
            .get(col)
            .copied()
            .ok_or_else(|| TableError::NoSuchColumn(col.to_string()))
    }

    /// Insert a blank row at `index` (may equal `nrows()` to append).
    /// Command-row indexes at or past the insertion point shift down.
    pub fn insert_row(&mut self, index: usize, description: impl Into<String>) -> TableResult<()> {
        if index > self.rows.len() {
            return Err(TableError::NoSuchRow(index.to_string()));
        }
        self.rows.insert(index, Row::new(description, self.columns.len()));
        for cr in &mut self.command_rows {
            if *cr >= index {
                *cr += 1;
            }
        }
        Ok(())
    }

    /// Delete a row. Command-row references to it are dropped; references
    /// past it shift up.
    pub fn delete_row(&mut self, index: usize) -> TableResult<()> {
        if index >= self.rows.len() {
            return Err(TableError::NoSuchRow(index.to_string()));
        }
        self.rows.remove(index);
        self.command_rows.retain(|cr| *cr != index);
        for cr in &mut self.command_rows {
            if *cr > index {
                *cr -= 1;
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Settings-document conversion
    // ------------------------------------------------------------------

    /// Build a configuration from a lexed settings document.
    pub fn from_doc(doc: SettingsDoc) -> TableResult<Self> {
        let mut title = String::new();
        let mut serial = None;
        let mut nrows_declared = 0usize;
        let mut command_row: Option<usize> = None;
        let mut command_rows: Vec<usize> = Vec::new();
        let mut presentation = Presentation::default();
        let mut extras = Vec::new();

        let mut motor_names: Option<Vec<String>> = None;
        let mut motor_labels: Option<Vec<String>> = None;
        let mut names: Option<Vec<String>> = None;
        let mut formats: Option<Vec<String>> = None;
        let mut widths: Option<Vec<i64>> = None;
        let mut tolerance: Option<Vec<f64>> = None;

        struct RowBuilder {
            description: Option<String>,
            updated: Option<String>,
            cells: Vec<(usize, f64)>,
        }
        let mut row_builders: BTreeMap<usize, RowBuilder> = BTreeMap::new();
        let mut row_cell_entries: Vec<(usize, String, Value)> = Vec::new();

        for entry in doc.into_entries() {
            let key = entry.key;
            let value = entry.value;
            // Unknown keys are pushed after the match: the scrutinee
            // borrows `key` for the whole match expression.
            let mut unknown: Option<Value> = None;
            match key.as_str() {
                "title" => title = require_str(&key, value)?,
                "serial" => serial = Some(require_i64(&key, value)?),
                "nrows" => nrows_declared = require_i64(&key, value)?.max(0) as usize,
                "command_row" => command_row = Some(require_i64(&key, value)?.max(0) as usize),
                "command_rows" => {
                    command_rows = require_i64_list(&key, value)?
                        .into_iter()
                        .map(|i| i.max(0) as usize)
                        .collect();
                }
                "show_in_list" => presentation.show_in_list = Some(require_bool(&key, value)?),
                "row_height" => presentation.row_height = Some(require_i64(&key, value)?),
                "description_width" => {
                    presentation.description_width = Some(require_i64(&key, value)?);
                }
                "show_apply_buttons" => {
                    presentation.show_apply_buttons = Some(require_bool(&key, value)?);
                }
                "apply_button_label" => {
                    presentation.apply_button_label = Some(require_str(&key, value)?);
                }
                "show_define_buttons" => {
                    presentation.show_define_buttons = Some(require_bool(&key, value)?);
                }
                "define_button_label" => {
                    presentation.define_button_label = Some(require_str(&key, value)?);
                }
                "show_stop_button" => {
                    presentation.show_stop_button = Some(require_bool(&key, value)?);
                }
                "motor_names" => motor_names = Some(require_str_list(&key, value)?),
                "motor_labels" => motor_labels = Some(require_str_list(&key, value)?),
                "names" => names = Some(require_str_list(&key, value)?),
                "formats" => formats = Some(require_str_list(&key, value)?),
                "widths" => widths = Some(require_i64_list(&key, value)?),
                "tolerance" => tolerance = Some(require_f64_list(&key, value)?),
                _ => {
                    if let Some((index, field)) = parse_line_key(&key) {
                        let builder = row_builders.entry(index).or_insert_with(|| RowBuilder {
                            description: None,
                            updated: None,
                            cells: Vec::new(),
                        });
                        match field {
                            "description" => {
                                builder.description = Some(require_str(&key, value)?);
                            }
                            "updated" => {
                                builder.updated = Some(require_str(&key, value)?);
                            }
                            _ => {
                                // Column membership is checked after the
                                // schema lists are all in hand.
                                row_cell_entries.push((index, field.to_string(), value));
                            }
                        }
                    } else {
                        unknown = Some(value);
                    }
                }
            }
            if let Some(value) = unknown {
                extras.push((key, value));
            }
        }

        let motor_names = motor_names
            .ok_or_else(|| TableError::Schema("missing 'motor_names' column schema".into()))?;
        if motor_names.is_empty() {
            return Err(TableError::Schema("'motor_names' must not be empty".into()));
        }
        let ncols = motor_names.len();
        let names = names.unwrap_or_else(|| motor_names.clone());
        let motor_labels = motor_labels.unwrap_or_else(|| names.clone());
        let formats = formats.unwrap_or_else(|| vec!["%g".to_string(); ncols]);
        let widths = widths.unwrap_or_else(|| vec![100; ncols]);
        let tolerance = tolerance.unwrap_or_else(|| vec![0.0; ncols]);
        for (list_name, len) in [
            ("names", names.len()),
            ("motor_labels", motor_labels.len()),
            ("formats", formats.len()),
            ("widths", widths.len()),
            ("tolerance", tolerance.len()),
        ] {
            if len != ncols {
                return Err(TableError::Schema(format!(
                    "'{list_name}' has {len} entries, expected {ncols} (length of 'motor_names')"
                )));
            }
        }

        let columns: Vec<Column> = (0..ncols)
            .map(|c| Column {
                name: names[c].clone(),
                label: motor_labels[c].clone(),
                motor_name: motor_names[c].clone(),
                format: formats[c].clone(),
                tolerance: tolerance[c],
                width: widths[c],
            })
            .collect();
        let name_index = build_name_index(&columns);

        for (index, field, value) in row_cell_entries {
            if let Some(col) = name_index.get(field.as_str()) {
                let v = value.as_f64().ok_or_else(|| {
                    TableError::Schema(format!("cell line{index}.{field} is not numeric"))
                })?;
                let builder = row_builders.entry(index).or_insert_with(|| RowBuilder {
                    description: None,
                    updated: None,
                    cells: Vec::new(),
                });
                builder.cells.push((*col, v));
            } else {
                extras.push((format!("line{index}.{field}"), value));
            }
        }

        let max_row = row_builders.keys().next_back().map(|i| i + 1).unwrap_or(0);
        let total_rows = nrows_declared.max(max_row);
        if max_row > nrows_declared && nrows_declared > 0 {
            log::warn!(
                "settings declare nrows={nrows_declared} but rows up to index {} are present",
                max_row - 1
            );
        }

        let mut rows = Vec::with_capacity(total_rows);
        for i in 0..total_rows {
            let mut row = Row {
                description: String::new(),
                updated: String::new(),
                positions: vec![f64::NAN; ncols],
            };
            if let Some(builder) = row_builders.remove(&i) {
                if let Some(d) = builder.description {
                    row.description = d;
                }
                if let Some(u) = builder.updated {
                    row.updated = u;
                }
                for (col, v) in builder.cells {
                    row.positions[col] = v;
                }
            }
            rows.push(row);
        }

        // command_row wins over command_rows when both are present.
        let command_rows = match command_row {
            Some(cr) => vec![cr],
            None => command_rows,
        };
        for cr in &command_rows {
            if *cr >= rows.len() {
                return Err(TableError::Schema(format!(
                    "command row {cr} out of range (table has {} rows)",
                    rows.len()
                )));
            }
        }

        Ok(Self {
            title,
            serial,
            columns,
            rows,
            command_rows,
            presentation,
            extras,
            name_index,
        })
    }

    /// Render the canonical settings document.
    pub fn to_doc(&self) -> SettingsDoc {
        let mut doc = SettingsDoc::new();
        doc.push("title", Value::Str(self.title.clone()));
        if let Some(serial) = self.serial {
            doc.push("serial", Value::Int(serial));
        }
        if let Some(b) = self.presentation.show_in_list {
            doc.push("show_in_list", Value::Bool(b));
        }
        doc.push(
            "motor_names",
            str_list(self.columns.iter().map(|c| c.motor_name.clone())),
        );
        doc.push(
            "motor_labels",
            str_list(self.columns.iter().map(|c| c.label.clone())),
        );
        doc.push("names", str_list(self.columns.iter().map(|c| c.name.clone())));
        doc.push(
            "formats",
            str_list(self.columns.iter().map(|c| c.format.clone())),
        );
        doc.push(
            "widths",
            Value::List(self.columns.iter().map(|c| Value::Int(c.width)).collect()),
        );
        doc.push(
            "tolerance",
            Value::List(
                self.columns
                    .iter()
                    .map(|c| Value::Float(c.tolerance))
                    .collect(),
            ),
        );
        if let Some(h) = self.presentation.row_height {
            doc.push("row_height", Value::Int(h));
        }
        if let Some(w) = self.presentation.description_width {
            doc.push("description_width", Value::Int(w));
        }
        if let Some(b) = self.presentation.show_apply_buttons {
            doc.push("show_apply_buttons", Value::Bool(b));
        }
        if let Some(l) = &self.presentation.apply_button_label {
            doc.push("apply_button_label", Value::Str(l.clone()));
        }
        if let Some(b) = self.presentation.show_define_buttons {
            doc.push("show_define_buttons", Value::Bool(b));
        }
        if let Some(l) = &self.presentation.define_button_label {
            doc.push("define_button_label", Value::Str(l.clone()));
        }
        if let Some(b) = self.presentation.show_stop_button {
            doc.push("show_stop_button", Value::Bool(b));
        }
        match self.command_rows.len() {
            0 => {}
            1 => doc.push("command_row", Value::Int(self.command_rows[0] as i64)),
            _ => doc.push(
                "command_rows",
                Value::List(
                    self.command_rows
                        .iter()
                        .map(|i| Value::Int(*i as i64))
                        .collect(),
                ),
            ),
        }
        doc.push("nrows", Value::Int(self.rows.len() as i64));
        for (i, row) in self.rows.iter().enumerate() {
            doc.push(
                format!("line{i}.description"),
                Value::Str(row.description.clone()),
            );
            doc.push(format!("line{i}.updated"), Value::Str(row.updated.clone()));
            for (c, column) in self.columns.iter().enumerate() {
                doc.push(
                    format!("line{i}.{}", column.name),
                    Value::Float(row.positions[c]),
                );
            }
        }
        for (key, value) in &self.extras {
            doc.push(key.clone(), value.clone());
        }
        doc
    }
}

fn build_name_index(columns: &[Column]) -> HashMap<String, usize> {
    columns
        .iter()
        .enumerate()
        .map(|(i, c)| (c.name.clone(), i))
        .collect()
}

fn str_list(items: impl Iterator<Item = String>) -> Value {
    Value::List(items.map(Value::Str).collect())
}

/// Split `lineI.field` keys; anything else is not a row key.
fn parse_line_key(key: &str) -> Option<(usize, &str)> {
    let rest = key.strip_prefix("line")?;
    let (index, field) = rest.split_once('.')?;
    let index: usize = index.parse().ok()?;
    if field.is_empty() {
        return None;
    }
    Some((index, field))
}

fn require_str(key: &str, value: Value) -> TableResult<String> {
    match value {
        Value::Str(s) => Ok(s),
        other => Err(TableError::Schema(format!(
            "'{key}' must be a quoted string, got {}",
            other.render()
        ))),
    }
}

fn require_bool(key: &str, value: Value) -> TableResult<bool> {
    value
        .as_bool()
        .ok_or_else(|| TableError::Schema(format!("'{key}' must be True or False")))
}

fn require_i64(key: &str, value: Value) -> TableResult<i64> {
    value
        .as_i64()
        .ok_or_else(|| TableError::Schema(format!("'{key}' must be an integer")))
}

fn require_str_list(key: &str, value: Value) -> TableResult<Vec<String>> {
    let items = value
        .as_list()
        .ok_or_else(|| TableError::Schema(format!("'{key}' must be a list")))?;
    items
        .iter()
        .map(|v| {
            v.as_str()
                .map(str::to_string)
                .ok_or_else(|| TableError::Schema(format!("'{key}' entries must be strings")))
        })
        .collect()
}

fn require_i64_list(key: &str, value: Value) -> TableResult<Vec<i64>> {
    let items = value
        .as_list()
        .ok_or_else(|| TableError::Schema(format!("'{key}' must be a list")))?;
    items
        .iter()
        .map(|v| {
            v.as_i64()
                .ok_or_else(|| TableError::Schema(format!("'{key}' entries must be integers")))
        })
        .collect()
}

fn require_f64_list(key: &str, value: Value) -> TableResult<Vec<f64>> {
    let items = value
        .as_list()
        .ok_or_else(|| TableError::Schema(format!("'{key}' must be a list")))?;
    items
        .iter()
        .map(|v| {
            v.as_f64()
                .ok_or_else(|| TableError::Schema(format!("'{key}' entries must be numeric")))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_column_config() -> Configuration {
        Configuration::new(
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
        )
    }

    #[test]
    fn within_tolerance_handles_nan() {
        assert!(within_tolerance(f64::NAN, f64::NAN, 0.001));
        assert!(!within_tolerance(f64::NAN, 1.0, 0.001));
        assert!(!within_tolerance(1.0, f64::NAN, 0.001));
        assert!(within_tolerance(1.0, 1.0005, 0.001));
        assert!(!within_tolerance(1.0, 1.002, 0.001));
    }

    #[test]
    fn set_cell_in_tolerance_is_a_no_op() {
        let mut cfg = two_column_config();
        cfg.insert_row(0, "S-1").unwrap();

        assert!(cfg.set_cell(0, 0, 10.0).unwrap());
        let stamp = cfg.row(0).unwrap().updated.clone();

        // Second write within tolerance: no change, no new timestamp.
        assert!(!cfg.set_cell(0, 0, 10.0005).unwrap());
        assert_eq!(cfg.row(0).unwrap().updated, stamp);
        assert_eq!(cfg.cell(0, 0).unwrap(), 10.0);
    }

    #[test]
    fn find_row_first_wins_on_duplicates() {
        let mut cfg = two_column_config();
        cfg.insert_row(0, "S-1").unwrap();
        cfg.insert_row(1, "dup").unwrap();
        cfg.insert_row(2, "dup").unwrap();
        assert_eq!(cfg.find_row("dup"), Some(1));
        assert_eq!(cfg.find_row("absent"), None);
    }

    #[test]
    fn delete_row_adjusts_command_rows() {
        let mut cfg = two_column_config();
        for i in 0..3 {
            cfg.insert_row(i, format!("row{i}")).unwrap();
        }
        cfg.select_command_row(2).unwrap();
        cfg.delete_row(0).unwrap();
        assert_eq!(cfg.command_row(), Some(1));

        cfg.delete_row(1).unwrap();
        assert_eq!(cfg.command_row(), None);
    }

    #[test]
    fn insert_row_shifts_command_rows() {
        let mut cfg = two_column_config();
        cfg.insert_row(0, "a").unwrap();
        cfg.select_command_row(0).unwrap();
        cfg.insert_row(0, "b").unwrap();
        assert_eq!(cfg.command_row(), Some(1));
    }

    #[test]
    fn command_row_out_of_range_is_schema_error() {
        let doc = SettingsDoc::parse(
            "title = 'x'\nmotor_names = ['m.a']\nnrows = 1\ncommand_row = 5\nline0.description = 'only'\n",
        )
        .unwrap();
        assert!(matches!(
            Configuration::from_doc(doc),
            Err(TableError::Schema(_))
        ));
    }

    #[test]
    fn short_timestamp_accepted_on_read() {
        let row = Row {
            description: "S-1".into(),
            updated: "27 Feb 21:32".into(),
            positions: vec![],
        };
        let t = row.updated_time().unwrap();
        assert_eq!(t.format("%d %b %H:%M").to_string(), "27 Feb 21:32");

        let row2 = Row {
            description: "S-1".into(),
            updated: "2026-08-07 10:00:00".into(),
            positions: vec![],
        };
        assert!(row2.updated_time().is_some());
    }
}
