//! Derived-row recalculation.
//!
//! Some modes are pure functions of a canonical reference row: for the
//! high-speed chopper, every `S-N` row is computed from `S-1` by fixed
//! linear formulas in the slot index N. The engine here knows nothing about
//! choppers — it consumes a declarative [`RecalcRules`] table mapping
//! description patterns (literal, or `name-N` with a captured integer) to
//! per-column formulas over the canonical row. Rule tables are registered
//! per configuration title, so the formulas live in configuration, not in
//! the engine.
//!
//! A cycle is preview → commit → save: [`Recalculator::preview`] is pure
//! and computes the proposed cell changes (aborting with `NoCanonicalRow`
//! before anything is touched if the reference row is missing);
//! [`Recalculator::commit`] writes them into the table (never to the bus)
//! and stamps the touched rows. Dropping the preview discards the cycle. A
//! formula failure skips that row only and lands in the preview's warning
//! list; the canonical row itself is never modified.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

use crate::error::{TableError, TableResult};
use crate::table::{within_tolerance, Configuration};
use crate::value::format_cell;

/// Snapshot of the canonical row, by column name, for use in formulas.
#[derive(Debug, Clone)]
pub struct CanonicalRow {
    description: String,
    values: HashMap<String, f64>,
}

impl CanonicalRow {
    /// Capture a row's cells keyed by column name.
    pub fn from_config(cfg: &Configuration, row: usize) -> Self {
        let values = cfg
            .columns
            .iter()
            .enumerate()
            .map(|(c, column)| (column.name.clone(), cfg.rows[row].positions[c]))
            .collect();
        Self {
            description: cfg.rows[row].description.clone(),
            values,
        }
    }

    /// Canonical value for a named column.
    pub fn value(&self, column_name: &str) -> anyhow::Result<f64> {
        self.values
            .get(column_name)
            .copied()
            .ok_or_else(|| anyhow::anyhow!("no column named '{column_name}'"))
    }

    /// Description of the canonical row.
    pub fn description(&self) -> &str {
        &self.description
    }
}

/// A per-column formula: `(canonical row, captured N) -> value`.
///
/// For literal patterns the captured argument is 0.
pub type Formula = Arc<dyn Fn(&CanonicalRow, f64) -> anyhow::Result<f64> + Send + Sync>;

/// Wrap a closure as a [`Formula`].
pub fn formula<F>(f: F) -> Formula
where
    F: Fn(&CanonicalRow, f64) -> anyhow::Result<f64> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// How a rule selects rows by description.
#[derive(Clone, Debug)]
pub enum RowPattern {
    /// Exact description match (e.g. `S-1t`).
    Literal(String),
    /// `prefix-N` with integer N in `[min, max]` (e.g. `S-N`, N in 3..=25).
    Indexed {
        /// Description prefix before the dash.
        prefix: String,
        /// Smallest accepted N.
        min: i64,
        /// Largest accepted N.
        max: i64,
    },
}

impl RowPattern {
    /// Match a description; returns the captured N (0 for literals).
    pub fn matches(&self, description: &str) -> Option<f64> {
        match self {
            RowPattern::Literal(text) => (description == text).then_some(0.0),
            RowPattern::Indexed { prefix, min, max } => {
                let re =
                    Regex::new(&format!("^{}-([0-9]+)$", regex::escape(prefix))).ok()?;
                let caps = re.captures(description)?;
                let n: i64 = caps.get(1)?.as_str().parse().ok()?;
                if n < *min || n > *max {
                    return None;
                }
                Some(n as f64)
            }
        }
    }
}

/// One pattern with its per-column formulas.
pub struct RecalcRule {
    /// Which rows this rule derives.
    pub pattern: RowPattern,
    /// `(column name, formula)` pairs; columns not listed are untouched.
    pub formulas: Vec<(String, Formula)>,
}

/// A full rule table for one configuration.
pub struct RecalcRules {
    /// Description of the canonical reference row (e.g. `S-1`).
    pub canonical: String,
    /// Rules tried in order; the first matching pattern wins.
    pub rules: Vec<RecalcRule>,
}

/// A rule that derives a row as the canonical row plus fixed per-column
/// offsets — the usual shape for named exception rows.
pub fn offset_rule(description: impl Into<String>, offsets: Vec<(String, f64)>) -> RecalcRule {
    RecalcRule {
        pattern: RowPattern::Literal(description.into()),
        formulas: offsets
            .into_iter()
            .map(|(name, delta)| {
                let column = name.clone();
                (name, formula(move |c, _| Ok(c.value(&column)? + delta)))
            })
            .collect(),
    }
}

/// Rule table for the high-speed chopper modes table: each `S-N` row is the
/// `S-1` row shifted by N slots (0.0377 mm in Y per slot with a 0.035 mm
/// offset, 2.744 ns in phase per slot; X unchanged).
pub fn chopper_mode_rules() -> RecalcRules {
    RecalcRules {
        canonical: "S-1".into(),
        rules: vec![RecalcRule {
            pattern: RowPattern::Indexed {
                prefix: "S".into(),
                min: 3,
                max: 25,
            },
            formulas: vec![
                ("ChopX".into(), formula(|c, _| c.value("ChopX"))),
                (
                    "ChopY".into(),
                    formula(|c, n| Ok(c.value("ChopY")? - n * 0.0377 + 0.035)),
                ),
                (
                    "delay".into(),
                    formula(|c, n| Ok(c.value("delay")? + n * 2.744e-9)),
                ),
            ],
        }],
    }
}

static RULE_TABLES: Lazy<RwLock<HashMap<String, Arc<RecalcRules>>>> = Lazy::new(|| {
    let mut map = HashMap::new();
    map.insert(
        "High-speed chopper modes".to_string(),
        Arc::new(chopper_mode_rules()),
    );
    RwLock::new(map)
});

/// Register a rule table for a configuration title, replacing any previous
/// table for that title.
pub fn register_rules(title: impl Into<String>, rules: RecalcRules) {
    let mut map = RULE_TABLES
        .write()
        .unwrap_or_else(PoisonError::into_inner);
    map.insert(title.into(), Arc::new(rules));
}

/// Rule table registered for a configuration title, if any.
pub fn rules_for(title: &str) -> Option<Arc<RecalcRules>> {
    let map = RULE_TABLES.read().unwrap_or_else(PoisonError::into_inner);
    map.get(title).cloned()
}

/// One proposed cell overwrite.
#[derive(Debug, Clone, Serialize)]
pub struct CellChange {
    /// Column index.
    pub column: usize,
    /// Column persistence name.
    pub name: String,
    /// Display format for the values.
    pub format: String,
    /// Currently stored value.
    pub old: f64,
    /// Proposed value.
    pub new: f64,
}

/// All proposed changes for one row.
#[derive(Debug, Clone, Serialize)]
pub struct RowChange {
    /// Row index.
    pub row: usize,
    /// Row description.
    pub description: String,
    /// Out-of-tolerance cells only.
    pub cells: Vec<CellChange>,
}

/// Proposed result of a recalculation cycle.
#[derive(Debug, Clone, Serialize)]
pub struct RecalcPreview {
    /// Index of the canonical row (never itself changed).
    pub canonical_row: usize,
    /// Rows with at least one cell to overwrite.
    pub changes: Vec<RowChange>,
    /// Rows skipped because a formula failed, with the reason.
    pub warnings: Vec<String>,
}

impl RecalcPreview {
    /// JSON form for GUI/script interchange.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

impl fmt::Display for RecalcPreview {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} row(s) to update", self.changes.len())?;
        for change in &self.changes {
            writeln!(f, "  {}:", change.description)?;
            for cell in &change.cells {
                writeln!(
                    f,
                    "    {:<12} {} -> {}",
                    cell.name,
                    format_cell(&cell.format, cell.old),
                    format_cell(&cell.format, cell.new),
                )?;
            }
        }
        for warning in &self.warnings {
            writeln!(f, "  warning: {warning}")?;
        }
        Ok(())
    }
}

/// The recalculation engine for one rule table.
pub struct Recalculator {
    rules: Arc<RecalcRules>,
}

impl Recalculator {
    /// Engine over an explicit rule table.
    pub fn new(rules: RecalcRules) -> Self {
        Self {
            rules: Arc::new(rules),
        }
    }

    /// Engine over the rule table registered for a configuration title.
    pub fn for_title(title: &str) -> Option<Self> {
        rules_for(title).map(|rules| Self { rules })
    }

    /// Compute the proposed changes. Pure: the configuration is not
    /// touched. Fails with `NoCanonicalRow` when the reference row is
    /// absent; formula failures skip the affected row and are reported in
    /// the returned warnings.
    pub fn preview(&self, cfg: &Configuration) -> TableResult<RecalcPreview> {
        let canonical = cfg
            .find_row(&self.rules.canonical)
            .ok_or_else(|| TableError::NoCanonicalRow(self.rules.canonical.clone()))?;
        let view = CanonicalRow::from_config(cfg, canonical);

        let mut changes = Vec::new();
        let mut warnings = Vec::new();

        for (r, row) in cfg.rows.iter().enumerate() {
            if r == canonical {
                continue;
            }
            let matched = self.rules.rules.iter().find_map(|rule| {
                rule.pattern
                    .matches(&row.description)
                    .map(|n| (rule, n))
            });
            let Some((rule, n)) = matched else {
                continue;
            };

            let mut cells = Vec::new();
            let mut skip = false;
            for (name, f) in &rule.formulas {
                let Some(col) = cfg.column_index(name) else {
                    warnings.push(
                        TableError::Formula {
                            row: row.description.clone(),
                            message: format!("no column named '{name}'"),
                        }
                        .to_string(),
                    );
                    skip = true;
                    break;
                };
                match f(&view, n) {
                    Ok(new) => {
                        let old = row.positions[col];
                        if !within_tolerance(old, new, cfg.columns[col].tolerance) {
                            cells.push(CellChange {
                                column: col,
                                name: name.clone(),
                                format: cfg.columns[col].format.clone(),
                                old,
                                new,
                            });
                        }
                    }
                    Err(err) => {
                        warnings.push(
                            TableError::Formula {
                                row: row.description.clone(),
                                message: format!("'{name}': {err}"),
                            }
                            .to_string(),
                        );
                        skip = true;
                        break;
                    }
                }
            }
            if skip {
                log::warn!(
                    "recalculation skipped row '{}' (formula failure)",
                    row.description
                );
                continue;
            }
            if !cells.is_empty() {
                changes.push(RowChange {
                    row: r,
                    description: row.description.clone(),
                    cells,
                });
            }
        }

        Ok(RecalcPreview {
            canonical_row: canonical,
            changes,
            warnings,
        })
    }

    /// Write a preview's changes into the table (not to the bus), stamping
    /// each touched row. Returns the number of rows touched. The table must
    /// not have been mutated between preview and commit; both run on the
    /// single owning task.
    pub fn commit(
        &self,
        cfg: &mut Configuration,
        preview: &RecalcPreview,
    ) -> TableResult<usize> {
        for change in &preview.changes {
            for cell in &change.cells {
                cfg.set_cell(change.row, cell.column, cell.new)?;
            }
        }
        log::info!(
            "recalculated '{}' from '{}': {} row(s) updated",
            cfg.title,
            self.rules.canonical,
            preview.changes.len()
        );
        Ok(preview.changes.len())
    }
}
