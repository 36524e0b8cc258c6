use std::{
    collections::BTreeMap,
    fs::File,
    io::Write,
    path::Path,
    sync::Mutex,
    time::Instant,
};

use chrono::{DateTime, Utc};
use log::trace;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{
    field::{Field, Visit},
    span, Event, Subscriber,
};
use tracing_subscriber::{layer::Context, registry::LookupSpan, Layer};

use osutils::files;

#[derive(Default)]
struct FieldVisitor {
    fields: BTreeMap<String, Value>,
}

impl Visit for FieldVisitor {
    fn record_i64(&mut self, field: &Field, value: i64) {
        self.fields.insert(field.name().to_string(), json!(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.fields.insert(field.name().to_string(), json!(value));
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.fields.insert(field.name().to_string(), json!(value));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.fields.insert(field.name().to_string(), json!(value));
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.fields.insert(field.name().to_string(), json!(value));
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        self.fields
            .insert(field.name().to_string(), json!(format!("{value:?}")));
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct TraceEntry {
    pub timestamp: DateTime<Utc>,
    pub name: String,
    pub fields: BTreeMap<String, Value>,
}

struct StartTime(Instant);

/// Records how long each instrumented phase took, plus events that carry a
/// `metric_name` field, as JSON lines in a local file.
pub struct PhaseTrace {
    file: Option<Mutex<File>>,
}

impl PhaseTrace {
    pub fn new(path: impl AsRef<Path>) -> Self {
        let file = files::create_file(path.as_ref())
            .map(Mutex::new)
            .map_err(|err| eprintln!("Tracing setup error: failed to create trace file: {err:?}"))
            .ok();
        Self { file }
    }

    fn write(&self, entry: TraceEntry) {
        let Some(file) = self.file.as_ref() else {
            return;
        };
        let line = match serde_json::to_string(&entry) {
            Ok(line) => line,
            Err(e) => {
                trace!("Failed to serialize trace entry: {e}");
                return;
            }
        };
        if let Ok(mut file) = file.lock() {
            if let Err(e) = writeln!(file, "{line}") {
                trace!("Failed to write trace entry: {e}");
            }
        }
    }
}

impl<S> Layer<S> for PhaseTrace
where
    S: Subscriber + for<'span> LookupSpan<'span>,
{
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = FieldVisitor::default();
        event.record(&mut visitor);

        let Some(name) = visitor
            .fields
            .remove("metric_name")
            .and_then(|v| v.as_str().map(str::to_string))
        else {
            return;
        };

        self.write(TraceEntry {
            timestamp: Utc::now(),
            name,
            fields: visitor.fields,
        });
    }

    fn on_new_span(&self, attrs: &span::Attributes<'_>, id: &span::Id, ctx: Context<'_, S>) {
        if let Some(span) = ctx.span(id) {
            let mut visitor = FieldVisitor::default();
            attrs.record(&mut visitor);
            span.extensions_mut().insert(visitor);
        }
    }

    fn on_enter(&self, id: &span::Id, ctx: Context<'_, S>) {
        if let Some(span) = ctx.span(id) {
            span.extensions_mut().insert(StartTime(Instant::now()));
        }
    }

    fn on_exit(&self, id: &span::Id, ctx: Context<'_, S>) {
        let Some(span) = ctx.span(id) else {
            return;
        };
        let mut extensions = span.extensions_mut();
        let Some(StartTime(start)) = extensions.remove::<StartTime>() else {
            return;
        };
        let mut fields = extensions
            .remove::<FieldVisitor>()
            .map(|v| v.fields)
            .unwrap_or_default();
        drop(extensions);

        let execution_time = start.elapsed().as_secs_f64();
        trace!("Phase '{}' took {execution_time:.2} seconds", span.name());
        fields.insert("execution_time".into(), json!(execution_time));

        self.write(TraceEntry {
            timestamp: Utc::now(),
            name: span.name().to_string(),
            fields,
        });
    }
}
