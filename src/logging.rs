//! Process-wide structured logging.
//!
//! The JSON format writes one object per line with `message`, `level`,
//! `logger` and the event's own fields flattened alongside. `level` uses the
//! labels cloud log collectors expect, so an error event tagged
//! `fatal = true` is reported as `FATAL`.

use std::fmt;

use serde_json::{Map, Value};
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LogFormat;

/// Install the global subscriber. `RUST_LOG` takes precedence over `filter`.
pub fn init(filter: &str, format: LogFormat) {
    let filter_layer = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(filter_layer);

    match format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().event_format(CloudJsonFormat))
            .init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

/// Severity label for a log line.
pub fn severity_label(level: &Level, fatal: bool) -> &'static str {
    match *level {
        Level::TRACE => "TRACE",
        Level::DEBUG => "DEBUG",
        Level::INFO => "INFO",
        Level::WARN => "WARN",
        Level::ERROR if fatal => "FATAL",
        Level::ERROR => "ERROR",
    }
}

/// Single-line JSON event formatter.
pub struct CloudJsonFormat;

impl<S, N> FormatEvent<S, N> for CloudJsonFormat
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let mut visitor = JsonVisitor::default();
        event.record(&mut visitor);

        let spans = ctx
            .event_scope()
            .map(|scope| {
                scope
                    .from_root()
                    .map(|span| span.name())
                    .collect::<Vec<_>>()
                    .join(":")
            })
            .filter(|spans| !spans.is_empty());

        let metadata = event.metadata();
        let record = build_record(metadata.level(), metadata.target(), spans, visitor.fields);
        writeln!(writer, "{}", Value::Object(record))
    }
}

fn build_record(
    level: &Level,
    target: &str,
    spans: Option<String>,
    mut fields: Map<String, Value>,
) -> Map<String, Value> {
    let fatal = matches!(fields.remove("fatal"), Some(Value::Bool(true)));
    let message = fields.remove("message").unwrap_or(Value::String(String::new()));

    let mut record = Map::with_capacity(fields.len() + 4);
    record.insert("message".to_string(), message);
    record.insert(
        "level".to_string(),
        Value::String(severity_label(level, fatal).to_string()),
    );
    record.insert("logger".to_string(), Value::String(target.to_string()));
    if let Some(spans) = spans {
        record.insert("span".to_string(), Value::String(spans));
    }
    record.extend(fields);
    record
}

#[derive(Default)]
struct JsonVisitor {
    fields: Map<String, Value>,
}

impl Visit for JsonVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.fields
            .insert(field.name().to_string(), Value::String(format!("{value:?}")));
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.fields
            .insert(field.name().to_string(), Value::String(value.to_string()));
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.fields.insert(field.name().to_string(), Value::from(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.fields.insert(field.name().to_string(), Value::from(value));
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.fields.insert(field.name().to_string(), Value::from(value));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.fields.insert(field.name().to_string(), Value::Bool(value));
    }
}
