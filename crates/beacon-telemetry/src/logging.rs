use std::collections::VecDeque;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::field::{Field, Visit};
use tracing::span;
use tracing_subscriber::layer::Context;
use tracing_subscriber::Layer;

/// A log record retained in memory.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LogRecord {
    pub id: u64,
    pub timestamp: String,
    pub level: String,
    pub target: String,
    pub message: String,
    pub fields: Option<String>,
    pub session_id: Option<String>,
    pub notifier_id: Option<String>,
}

/// Query parameters for searching retained logs.
#[derive(Clone, Debug, Default)]
pub struct LogQuery {
    pub level: Option<String>,
    pub target: Option<String>,
    pub session_id: Option<String>,
    pub limit: Option<usize>,
}

/// Bounded in-memory sink for warn+ logs. Oldest records are evicted first.
pub struct MemoryLogSink {
    inner: Mutex<SinkState>,
    capacity: usize,
}

struct SinkState {
    records: VecDeque<LogRecord>,
    next_id: u64,
}

impl MemoryLogSink {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(SinkState {
                records: VecDeque::with_capacity(capacity.min(1024)),
                next_id: 1,
            }),
            capacity: capacity.max(1),
        }
    }

    fn insert(&self, record: LogInsert) {
        let mut state = self.inner.lock();
        let id = state.next_id;
        state.next_id += 1;
        if state.records.len() == self.capacity {
            state.records.pop_front();
        }
        state.records.push_back(LogRecord {
            id,
            timestamp: record.timestamp,
            level: record.level,
            target: record.target,
            message: record.message,
            fields: record.fields,
            session_id: record.session_id,
            notifier_id: record.notifier_id,
        });
    }

    /// Most recent matching records first.
    pub fn query(&self, q: &LogQuery) -> Vec<LogRecord> {
        let state = self.inner.lock();
        let limit = q.limit.unwrap_or(100);
        state
            .records
            .iter()
            .rev()
            .filter(|r| q.level.as_ref().map_or(true, |l| &r.level == l))
            .filter(|r| q.target.as_ref().map_or(true, |t| r.target.contains(t.as_str())))
            .filter(|r| {
                q.session_id
                    .as_ref()
                    .map_or(true, |s| r.session_id.as_ref() == Some(s))
            })
            .take(limit)
            .cloned()
            .collect()
    }

    pub fn count(&self) -> usize {
        self.inner.lock().records.len()
    }
}

/// Internal insert record (not public).
struct LogInsert {
    timestamp: String,
    level: String,
    target: String,
    message: String,
    fields: Option<String>,
    session_id: Option<String>,
    notifier_id: Option<String>,
}

/// tracing Layer that keeps warn+ events in a `MemoryLogSink`.
pub struct MemoryLogLayer {
    sink: Arc<MemoryLogSink>,
}

impl MemoryLogLayer {
    pub fn new(sink: Arc<MemoryLogSink>) -> Self {
        Self { sink }
    }
}

/// Visitor that extracts fields from a tracing event.
struct FieldVisitor {
    message: Option<String>,
    fields: serde_json::Map<String, serde_json::Value>,
    session_id: Option<String>,
    notifier_id: Option<String>,
}

impl FieldVisitor {
    fn new() -> Self {
        Self {
            message: None,
            fields: serde_json::Map::new(),
            session_id: None,
            notifier_id: None,
        }
    }
}

impl Visit for FieldVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        let val = format!("{:?}", value);
        match field.name() {
            "message" => self.message = Some(val),
            "session_id" => self.session_id = Some(val.trim_matches('"').to_string()),
            "notifier_id" => self.notifier_id = Some(val.trim_matches('"').to_string()),
            name => {
                self.fields
                    .insert(name.to_string(), serde_json::Value::String(val));
            }
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        match field.name() {
            "message" => self.message = Some(value.to_string()),
            "session_id" => self.session_id = Some(value.to_string()),
            "notifier_id" => self.notifier_id = Some(value.to_string()),
            name => {
                self.fields
                    .insert(name.to_string(), serde_json::Value::String(value.to_string()));
            }
        }
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.fields
            .insert(field.name().to_string(), serde_json::Value::Number(value.into()));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.fields
            .insert(field.name().to_string(), serde_json::Value::Number(value.into()));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.fields
            .insert(field.name().to_string(), serde_json::Value::Bool(value));
    }
}

impl<S> Layer<S> for MemoryLogLayer
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
{
    fn on_event(&self, event: &tracing::Event<'_>, ctx: Context<'_, S>) {
        let level = *event.metadata().level();
        if level > tracing::Level::WARN {
            return;
        }

        let mut visitor = FieldVisitor::new();
        event.record(&mut visitor);

        if visitor.session_id.is_none() {
            if let Some(scope) = ctx.event_scope(event) {
                for span in scope {
                    if let Some(fields) = span.extensions().get::<SpanFields>() {
                        visitor.session_id.clone_from(&fields.session_id);
                        break;
                    }
                }
            }
        }

        let fields_json = if visitor.fields.is_empty() {
            None
        } else {
            Some(serde_json::to_string(&visitor.fields).unwrap_or_default())
        };

        self.sink.insert(LogInsert {
            timestamp: Utc::now().to_rfc3339(),
            level: level.to_string().to_uppercase(),
            target: event.metadata().target().to_string(),
            message: visitor.message.unwrap_or_default(),
            fields: fields_json,
            session_id: visitor.session_id,
            notifier_id: visitor.notifier_id,
        });
    }

    fn on_new_span(&self, attrs: &span::Attributes<'_>, id: &span::Id, ctx: Context<'_, S>) {
        let mut visitor = FieldVisitor::new();
        attrs.record(&mut visitor);

        if visitor.session_id.is_some() {
            if let Some(span) = ctx.span(id) {
                span.extensions_mut().insert(SpanFields {
                    session_id: visitor.session_id,
                });
            }
        }
    }
}

/// Stored on spans to propagate session_id to child events.
struct SpanFields {
    session_id: Option<String>,
}
