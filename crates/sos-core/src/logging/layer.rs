//! JSONL tracing layer.
//!
//! Each event becomes one JSON object:
//!
//! ```text
//! {"ts":..,"level":"info","event":"ingest.committed","run_id":..,"host_id":..,
//!  "stage":"commit","template":..,"message":..,"fields":{..}}
//! ```
//!
//! Correlation keys missing from an event are taken from the innermost
//! enclosing span that recorded them.

use std::collections::BTreeMap;
use std::io::{self, Write};
use std::sync::Mutex;

use chrono::Utc;
use serde_json::{Map, Value};
use tracing::field::{Field, Visit};
use tracing::span::{Attributes, Id, Record};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::Layer;

use super::events::Level;

/// Keys lifted to the top level of every line.
pub const CORRELATION_KEYS: [&str; 4] = ["run_id", "host_id", "stage", "template"];

/// Correlation values recorded on a span.
#[derive(Debug, Clone, Default)]
struct Correlation(BTreeMap<&'static str, Value>);

#[derive(Default)]
struct FieldCollector {
    fields: Map<String, Value>,
    message: Option<String>,
}

impl FieldCollector {
    fn put(&mut self, field: &Field, value: Value) {
        if field.name() == "message" {
            self.message = Some(match value {
                Value::String(s) => s,
                other => other.to_string(),
            });
        } else {
            self.fields.insert(field.name().to_string(), value);
        }
    }

    fn into_correlation(self) -> Correlation {
        let mut fields = self.fields;
        Correlation(
            CORRELATION_KEYS
                .iter()
                .filter_map(|key| fields.remove(*key).map(|v| (*key, v)))
                .collect(),
        )
    }
}

impl Visit for FieldCollector {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.put(field, Value::from(value));
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        self.put(field, Value::from(format!("{:?}", value)));
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.put(field, Value::from(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.put(field, Value::from(value));
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        // Non-finite floats have no JSON form.
        self.put(field, serde_json::Number::from_f64(value).map_or(Value::Null, Value::Number));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.put(field, Value::from(value));
    }
}

/// Writes events as JSON lines.
pub struct JsonlLayer<W = io::Stderr> {
    writer: Mutex<W>,
}

impl JsonlLayer<io::Stderr> {
    pub fn stderr() -> Self {
        JsonlLayer::new(io::stderr())
    }
}

impl<W: Write> JsonlLayer<W> {
    pub fn new(writer: W) -> Self {
        JsonlLayer {
            writer: Mutex::new(writer),
        }
    }

    fn emit(&self, line: &Value) {
        if let Ok(mut writer) = self.writer.lock() {
            let _ = writeln!(writer, "{}", line);
        }
    }
}

impl<S, W> Layer<S> for JsonlLayer<W>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    W: Write + 'static,
{
    fn on_new_span(&self, attrs: &Attributes<'_>, id: &Id, ctx: Context<'_, S>) {
        let mut collector = FieldCollector::default();
        attrs.record(&mut collector);
        if let Some(span) = ctx.span(id) {
            span.extensions_mut().insert(collector.into_correlation());
        }
    }

    fn on_record(&self, id: &Id, values: &Record<'_>, ctx: Context<'_, S>) {
        let mut collector = FieldCollector::default();
        values.record(&mut collector);
        let recorded = collector.into_correlation();
        if let Some(span) = ctx.span(id) {
            let mut extensions = span.extensions_mut();
            match extensions.get_mut::<Correlation>() {
                Some(existing) => existing.0.extend(recorded.0),
                None => extensions.insert(recorded),
            }
        }
    }

    fn on_event(&self, event: &Event<'_>, ctx: Context<'_, S>) {
        let mut collector = FieldCollector::default();
        event.record(&mut collector);

        let metadata = event.metadata();
        let mut line = Map::new();
        line.insert("ts".into(), Value::from(Utc::now().to_rfc3339()));
        line.insert("level".into(), serde_json::json!(Level::from(*metadata.level())));
        line.insert("event".into(), Value::from(metadata.target()));

        for key in CORRELATION_KEYS {
            if let Some(value) = collector.fields.remove(key) {
                line.insert(key.into(), value);
            }
        }
        if let Some(scope) = ctx.event_scope(event) {
            for span in scope {
                if let Some(correlation) = span.extensions().get::<Correlation>() {
                    for (key, value) in &correlation.0 {
                        line.entry(key.to_string()).or_insert_with(|| value.clone());
                    }
                }
            }
        }

        if let Some(message) = collector.message {
            line.insert("message".into(), Value::from(message));
        }
        if !collector.fields.is_empty() {
            line.insert("fields".into(), Value::Object(collector.fields));
        }
        self.emit(&Value::Object(line));
    }
}
