//! Line-oriented `key = value` settings documents.
//!
//! This is the persistence layer under the configuration table: it knows how
//! to lex a settings file into an ordered list of typed entries and how to
//! write one back atomically. It is deliberately ignorant of the tabular
//! schema; [`crate::table`] interprets the entries and pushes anything it
//! does not recognize back here so unknown keys round-trip verbatim.

use std::fs;
use std::io::Write;
use std::path::Path;

use crate::error::{TableError, TableResult};
use crate::value::Value;

/// One `key = value` line.
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    /// Key text, trimmed.
    pub key: String,
    /// Parsed value.
    pub value: Value,
    /// 1-based source line (0 for entries built in memory).
    pub line: usize,
}

/// An ordered settings document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SettingsDoc {
    entries: Vec<Entry>,
}

impl SettingsDoc {
    /// Create an empty document.
    pub fn new() -> Self {
        Self::default()
    }

    /// Lex a settings file. Blank lines are skipped; every other line must
    /// be `key = value` with a value in the scalar grammar.
    pub fn parse(text: &str) -> TableResult<Self> {
        let mut entries = Vec::new();
        for (idx, raw) in text.lines().enumerate() {
            let line = idx + 1;
            let trimmed = raw.trim();
            if trimmed.is_empty() {
                continue;
            }
            let (key, value_text) = trimmed.split_once('=').ok_or_else(|| TableError::Parse {
                line,
                message: "expected 'key = value'".into(),
            })?;
            let key = key.trim();
            if key.is_empty() {
                return Err(TableError::Parse {
                    line,
                    message: "empty key".into(),
                });
            }
            entries.push(Entry {
                key: key.to_string(),
                value: Value::parse(value_text, line)?,
                line,
            });
        }
        Ok(Self { entries })
    }

    /// Read and lex a file.
    pub fn load(path: &Path) -> TableResult<Self> {
        let text = fs::read_to_string(path)?;
        Self::parse(&text)
    }

    /// Append an entry (in-memory construction; line number 0).
    pub fn push(&mut self, key: impl Into<String>, value: Value) {
        self.entries.push(Entry {
            key: key.into(),
            value,
            line: 0,
        });
    }

    /// First value for `key`, if present.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.iter().find(|e| e.key == key).map(|e| &e.value)
    }

    /// All entries in file order.
    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    /// Consume into the entry list.
    pub fn into_entries(self) -> Vec<Entry> {
        self.entries
    }

    /// Render the canonical text form.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for entry in &self.entries {
            out.push_str(&entry.key);
            out.push_str(" = ");
            out.push_str(&entry.value.render());
            out.push('\n');
        }
        out
    }

    /// Atomically write the document: render to a sibling temp file, fsync,
    /// then rename over the target. A concurrent writer wins last-write.
    pub fn save_atomic(&self, path: &Path) -> TableResult<()> {
        let tmp = path.with_extension("tmp");
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(self.render().as_bytes())?;
            file.sync_all()?;
        }
        fs::rename(&tmp, path)?;
        log::debug!("saved settings to {}", path.display());
        Ok(())
    }
}
