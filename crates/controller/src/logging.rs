//! provides logging helpers

use std::collections::HashMap;
use std::fmt::{self};
use std::path::Path;
use std::path::PathBuf;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use tracing::field::Field;
use tracing::field::Visit;
use tracing::Event;
use tracing::Subscriber;
use tracing_appender::rolling::RollingFileAppender;
use tracing_appender::rolling::Rotation;
use tracing_subscriber::filter::FilterExt;
use tracing_subscriber::filter::{self};
use tracing_subscriber::fmt::layer;
use tracing_subscriber::fmt::FormatEvent;
use tracing_subscriber::prelude::*;
use tracing_subscriber::registry;

/// Line format for contention metrics: measurement, tags, fields and a
/// nanosecond timestamp, one event per line.
struct ContentionFormatter;

struct FieldVisitor {
    tags: HashMap<&'static str, String>,
    fields: HashMap<&'static str, String>,
}

impl Visit for FieldVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if let Some(tag) = field.name().strip_prefix("tag_") {
            self.tags.insert(tag, value.to_string());
        } else {
            self.fields.insert(field.name(), value.to_string());
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if let Some(tag) = field.name().strip_prefix("tag_") {
            self.tags.insert(tag, format!("{value:?}"));
        } else {
            self.fields.insert(field.name(), format!("{value:?}"));
        }
    }
}

impl<S, N> FormatEvent<S, N> for ContentionFormatter
where
    S: Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
    N: for<'a> tracing_subscriber::fmt::FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        _ctx: &tracing_subscriber::fmt::FmtContext<'_, S, N>,
        mut writer: tracing_subscriber::fmt::format::Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let mut visitor = FieldVisitor {
            tags: HashMap::new(),
            fields: HashMap::new(),
        };
        event.record(&mut visitor);

        // measurement name comes from the target
        let target = event.metadata().target();
        let measurement = target.strip_prefix("metrics::").unwrap_or(target);
        write!(writer, "{measurement}")?;

        for (key, value) in visitor.tags.iter() {
            write!(writer, ",{key}={value}")?;
        }

        write!(writer, " ")?;
        let mut first = true;
        for (key, value) in visitor.fields.iter() {
            if !first {
                write!(writer, ",")?;
            }
            write!(writer, "{key}={value}")?;
            first = false;
        }

        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock before epoch")
            .as_nanos();
        writeln!(writer, " {timestamp}")
    }
}

/// initiate the global tracing subscriber; contention metrics events go to
/// a daily-rolling file of their own when one is configured
pub(crate) fn init(metrics_file: Option<PathBuf>) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let env_filter = filter::EnvFilter::builder()
        .with_default_directive(filter::LevelFilter::INFO.into())
        .from_env_lossy();

    let fmt_layer = utils::logging::get_fmt_layer().with_filter(env_filter.and(
        filter::filter_fn(|metadata| !metadata.target().starts_with("metrics")),
    ));

    let Some(metrics_file) = metrics_file else {
        registry().with(fmt_layer).init();
        return None;
    };

    let path = metrics_file.parent().unwrap_or(Path::new("."));
    let file = metrics_file
        .file_name()
        .expect("metrics file name")
        .to_str()
        .expect("metrics file name is valid UTF-8");

    let appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(file)
        .max_log_files(3)
        .build(path)
        .expect("failed to create rolling file appender");

    let (file_writer, file_guard) = tracing_appender::non_blocking(appender);

    let metrics_layer = layer()
        .event_format(ContentionFormatter)
        .fmt_fields(tracing_subscriber::fmt::format::DefaultFields::new())
        .with_writer(file_writer)
        .with_ansi(false)
        .with_filter(filter::filter_fn(|metadata| {
            metadata.target().starts_with("metrics")
        }));

    registry().with(fmt_layer).with(metrics_layer).init();
    Some(file_guard)
}
