//! Bridge between `tracing` and the AFD system log.
//!
//! The distributor logs operational diagnostics with the standard `tracing`
//! macros. [`SystemLogLayer`] forwards events at or above a threshold to the
//! system-log fifo in AFD line format, so operators find warnings and errors
//! next to the rest of the AFD logs. Everything is also written to stderr
//! through `tracing-subscriber`'s `fmt` layer, filtered by `EnvFilter`.
//!
//! Events may carry `host` and `slot` fields; they fill the alias and slot
//! columns of the line.

use std::io::Write;
use std::sync::{Arc, Mutex};

use tracing::field::{Field, Visit};
use tracing::{Level, Subscriber};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::{Context, Layer};
use tracing_subscriber::registry::LookupSpan;

use crate::line::LogLine;
use crate::severity::Severity;
use crate::sink::FifoSink;

/// A sink shared between the layer and the rest of the process.
pub type SharedSink<W> = Arc<Mutex<FifoSink<W>>>;

/// Forwards `tracing` events to an AFD log sink.
pub struct SystemLogLayer<W> {
    sink: SharedSink<W>,
    threshold: Level,
}

impl<W> SystemLogLayer<W> {
    /// Forwards events at `WARN` and above.
    #[must_use]
    pub fn new(sink: SharedSink<W>) -> Self {
        Self::with_threshold(sink, Level::WARN)
    }

    /// Forwards events at `threshold` and above.
    #[must_use]
    pub fn with_threshold(sink: SharedSink<W>, threshold: Level) -> Self {
        Self { sink, threshold }
    }
}

impl<S, W> Layer<S> for SystemLogLayer<W>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    W: Write + Send + 'static,
{
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        // tracing orders levels by verbosity: ERROR < WARN < ... < TRACE.
        if *metadata.level() > self.threshold {
            return;
        }
        let mut visitor = LineVisitor::default();
        event.record(&mut visitor);
        let Some(message) = visitor.message else {
            return;
        };
        let mut text = message;
        for (name, value) in &visitor.fields {
            text.push_str(&format!(" {name}={value}"));
        }
        let mut line = LogLine::now(Severity::from_level(*metadata.level()), text);
        if let Some(host) = visitor.host {
            line = line.host(host);
        }
        if let Some(slot) = visitor.slot {
            line = line.slot(slot);
        }
        if let Ok(mut sink) = self.sink.lock() {
            // A failing system log has nowhere left to report to.
            let _ = sink.write_line(&line);
        }
    }
}

#[derive(Default)]
struct LineVisitor {
    message: Option<String>,
    host: Option<String>,
    slot: Option<usize>,
    fields: Vec<(&'static str, String)>,
}

impl Visit for LineVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        match field.name() {
            "message" => self.message = Some(format!("{value:?}")),
            "host" => self.host = Some(format!("{value:?}").trim_matches('"').to_string()),
            name => self.fields.push((name, format!("{value:?}"))),
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        match field.name() {
            "message" => self.message = Some(value.to_owned()),
            "host" => self.host = Some(value.to_owned()),
            name => self.fields.push((name, value.to_owned())),
        }
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        if field.name() == "slot" {
            self.slot = usize::try_from(value).ok();
        } else {
            self.fields.push((field.name(), value.to_string()));
        }
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        if field.name() == "slot" {
            self.slot = usize::try_from(value).ok();
        } else {
            self.fields.push((field.name(), value.to_string()));
        }
    }
}

/// Installs the global subscriber: `fmt` to stderr filtered by `filter`
/// (an `EnvFilter` directive string such as `"info,fd::mdb=debug"`), plus
/// the system-log layer when a sink is given.
///
/// Returns `false` if a global subscriber was already installed.
pub fn init_tracing<W>(filter: &str, system_log: Option<SharedSink<W>>) -> bool
where
    W: Write + Send + 'static,
{
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let filter = EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true);

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt)
        .with(system_log.map(SystemLogLayer::new))
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_subscriber::layer::SubscriberExt;

    fn capture() -> (SharedSink<Vec<u8>>, impl Subscriber + Send + Sync) {
        let sink = Arc::new(Mutex::new(FifoSink::new(Vec::new(), "system_log")));
        let subscriber = tracing_subscriber::registry().with(SystemLogLayer::new(Arc::clone(&sink)));
        (sink, subscriber)
    }

    fn text(sink: &SharedSink<Vec<u8>>) -> String {
        let guard = sink.lock().expect("lock");
        String::from_utf8(guard.get_ref().clone()).expect("utf8")
    }

    #[test]
    fn warnings_reach_the_system_log() {
        let (sink, subscriber) = capture();
        tracing::subscriber::with_default(subscriber, || {
            tracing::warn!(host = "alpha", slot = 2_u64, retries = 3, "connection refused");
        });
        let out = text(&sink);
        assert!(out.contains("<W> alpha   [2]: connection refused retries=3"), "{out}");
    }

    #[test]
    fn info_is_below_the_default_threshold() {
        let (sink, subscriber) = capture();
        tracing::subscriber::with_default(subscriber, || {
            tracing::info!("queue has 3 items");
            tracing::error!("cannot open msg_fifo");
        });
        let out = text(&sink);
        assert!(!out.contains("queue has"));
        assert!(out.contains("<E>"));
        assert_eq!(out.lines().count(), 1);
    }
}
