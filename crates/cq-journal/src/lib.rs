//! Append-only file journal.
//!
//! One JSON object per line, keys sorted, written to
//! `{dir}/{category}-{level}-{YYYY-MM-DD}.log`. The journal is normally fed by
//! [`JournalLayer`], a `tracing-subscriber` layer, so the rest of the workspace
//! only ever calls `tracing` macros. Set a `category` field on an event to
//! route it (`app` when absent).

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

mod layer;

pub use layer::JournalLayer;

pub const DEFAULT_CATEGORY: &str = "app";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JournalLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl JournalLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            JournalLevel::Debug => "debug",
            JournalLevel::Info => "info",
            JournalLevel::Warn => "warn",
            JournalLevel::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalEntry {
    pub event_id: uuid::Uuid,
    pub ts_utc: DateTime<Utc>,
    pub level: JournalLevel,
    pub category: String,
    pub message: String,
    pub context: Option<Value>,
}

/// Directory-backed journal. Cheap to share behind an `Arc`.
#[derive(Debug)]
pub struct Journal {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl Journal {
    /// Creates the journal and ensures the directory exists.
    pub fn new(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).with_context(|| format!("create_dir_all {:?}", dir))?;
        Ok(Self {
            dir,
            write_lock: Mutex::new(()),
        })
    }

    pub fn shared(dir: impl AsRef<Path>) -> Result<Arc<Self>> {
        Ok(Arc::new(Self::new(dir)?))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn file_for(&self, category: &str, level: JournalLevel, date: NaiveDate) -> PathBuf {
        self.dir.join(format!(
            "{}-{}-{}.log",
            sanitize_category(category),
            level.as_str(),
            date.format("%Y-%m-%d")
        ))
    }

    /// Append one entry to today's file for `(category, level)`.
    pub fn append(
        &self,
        level: JournalLevel,
        category: &str,
        message: &str,
        context: Option<Value>,
    ) -> Result<JournalEntry> {
        let entry = JournalEntry {
            event_id: uuid::Uuid::new_v4(),
            ts_utc: Utc::now(),
            level,
            category: sanitize_category(category),
            message: message.to_string(),
            context: context.filter(|c| !is_empty_object(c)),
        };

        let path = self.file_for(&entry.category, level, entry.ts_utc.date_naive());
        let mut line = canonical_json_line(&entry)?;
        line.push('\n');

        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        append_line(&path, &line)?;
        Ok(entry)
    }
}

/// Category names become file-name prefixes; keep them to `[a-z0-9_]`.
fn sanitize_category(category: &str) -> String {
    let s: String = category
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect();
    if s.is_empty() {
        DEFAULT_CATEGORY.to_string()
    } else {
        s
    }
}

fn is_empty_object(v: &Value) -> bool {
    matches!(v, Value::Object(m) if m.is_empty())
}

/// Single write per line so concurrent appenders do not interleave.
fn append_line(path: &Path, line: &str) -> Result<()> {
    let mut f = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("open journal file {:?}", path))?;
    f.write_all(line.as_bytes())
        .context("write journal line failed")?;
    Ok(())
}

fn canonical_json_line<T: Serialize>(v: &T) -> Result<String> {
    let raw = serde_json::to_value(v).context("serialize journal entry failed")?;
    serde_json::to_string(&sort_keys(&raw)).context("json stringify failed")
}

fn sort_keys(v: &Value) -> Value {
    match v {
        Value::Object(map) => {
            let mut keys: Vec<_> = map.keys().cloned().collect();
            keys.sort();
            let mut new = Map::new();
            for k in keys {
                new.insert(k.clone(), sort_keys(&map[&k]));
            }
            Value::Object(new)
        }
        Value::Array(arr) => Value::Array(arr.iter().map(sort_keys).collect()),
        _ => v.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn append_writes_one_sorted_line_per_entry() {
        let dir = tempfile::tempdir().unwrap();
        let journal = Journal::new(dir.path()).unwrap();

        let e1 = journal
            .append(JournalLevel::Warn, "app", "invalid servisID", Some(json!({"servisID": "abc"})))
            .unwrap();
        journal
            .append(JournalLevel::Warn, "app", "missing fields", None)
            .unwrap();

        let path = journal.file_for("app", JournalLevel::Warn, e1.ts_utc.date_naive());
        let content = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);

        let first: JournalEntry = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first.message, "invalid servisID");
        assert_eq!(first.context, Some(json!({"servisID": "abc"})));
        assert!(lines[0].find("\"category\"").unwrap() < lines[0].find("\"message\"").unwrap());
    }

    #[test]
    fn file_name_is_category_level_date() {
        let dir = tempfile::tempdir().unwrap();
        let journal = Journal::new(dir.path()).unwrap();
        let date = NaiveDate::from_ymd_opt(2024, 3, 10).unwrap();
        let p = journal.file_for("Middleware", JournalLevel::Info, date);
        assert_eq!(p.file_name().unwrap(), "middleware-info-2024-03-10.log");
    }

    #[test]
    fn odd_category_names_are_sanitized() {
        assert_eq!(sanitize_category("../etc"), "___etc");
        assert_eq!(sanitize_category("   "), "app");
    }
}
