//! `tracing-subscriber` layer that mirrors events into the [`Journal`].

use std::fmt;
use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::Layer;

use crate::{Journal, JournalLevel, DEFAULT_CATEGORY};

/// Journals every event whose target starts with `target_prefix`.
///
/// Write failures are reported on stderr and otherwise ignored; a full disk
/// must never fail a request.
pub struct JournalLayer {
    journal: Arc<Journal>,
    target_prefix: String,
    debug_to_file: bool,
}

impl JournalLayer {
    pub fn new(journal: Arc<Journal>, target_prefix: impl Into<String>) -> Self {
        Self {
            journal,
            target_prefix: target_prefix.into(),
            debug_to_file: false,
        }
    }

    /// Debug events are dropped unless enabled here.
    pub fn with_debug(mut self, enabled: bool) -> Self {
        self.debug_to_file = enabled;
        self
    }

    fn level_of(&self, level: &Level) -> Option<JournalLevel> {
        match *level {
            Level::ERROR => Some(JournalLevel::Error),
            Level::WARN => Some(JournalLevel::Warn),
            Level::INFO => Some(JournalLevel::Info),
            Level::DEBUG if self.debug_to_file => Some(JournalLevel::Debug),
            _ => None,
        }
    }
}

impl<S: Subscriber> Layer<S> for JournalLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let meta = event.metadata();
        if !meta.target().starts_with(&self.target_prefix) {
            return;
        }
        let Some(level) = self.level_of(meta.level()) else {
            return;
        };

        let mut fields = FieldCollector::default();
        event.record(&mut fields);

        let category = fields.category.as_deref().unwrap_or(DEFAULT_CATEGORY);
        let message = fields.message.as_deref().unwrap_or("");
        let context = if fields.rest.is_empty() {
            None
        } else {
            Some(Value::Object(fields.rest.clone()))
        };

        if let Err(e) = self.journal.append(level, category, message, context) {
            eprintln!("journal write failed: {e:#}");
        }
    }
}

#[derive(Default)]
struct FieldCollector {
    message: Option<String>,
    category: Option<String>,
    rest: Map<String, Value>,
}

impl FieldCollector {
    fn put(&mut self, field: &Field, value: Value) {
        match field.name() {
            "message" => {
                self.message = Some(match value {
                    Value::String(s) => s,
                    other => other.to_string(),
                })
            }
            "category" => self.category = value.as_str().map(str::to_string),
            name => {
                self.rest.insert(name.to_string(), value);
            }
        }
    }
}

impl Visit for FieldCollector {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.put(field, Value::from(value));
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.put(field, Value::from(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.put(field, Value::from(value));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.put(field, Value::from(value));
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.put(field, Value::from(value));
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.put(field, Value::String(format!("{value:?}")));
    }
}
