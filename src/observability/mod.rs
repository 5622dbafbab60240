//! Observability subsystem for livestore
//!
//! This module provides:
//! - Typed lifecycle events routed to `tracing`
//! - Lock-free operational counters
//!
//! # Principles
//!
//! 1. Observability is read-only
//! 2. No side effects on execution
//! 3. No background threads
//!
//! # Usage
//!
//! ```ignore
//! use livestore::observability::{log_event, Event, MetricsRegistry};
//!
//! log_event(Event::CommitPublished, &[("version", "7")]);
//!
//! let metrics = MetricsRegistry::new();
//! metrics.increment_commits();
//! ```

mod events;
mod metrics;

pub use events::Event;
pub use metrics::{MetricsRegistry, MetricsSnapshot};

/// Keys recorded as their own `tracing` fields
const FIELDS: [&str; 8] = [
    "path",
    "version",
    "notifier",
    "count",
    "error",
    "in_memory",
    "realms",
    "files",
];

/// Log a lifecycle event with fields
///
/// Error-class events log at `error`, lifecycle events at `info`, and
/// everything else at `debug`. Each known key becomes its own field;
/// any other keys are joined into `extra`.
pub fn log_event(event: Event, fields: &[(&str, &str)]) {
    let get = |name: &str| fields.iter().find(|(k, _)| *k == name).map(|(_, v)| *v);
    let extra = render_extra(fields);
    let extra = extra.as_deref();

    macro_rules! emit {
        ($level:expr) => {
            tracing::event!(
                $level,
                event = event.as_str(),
                path = get("path"),
                version = get("version"),
                notifier = get("notifier"),
                count = get("count"),
                error = get("error"),
                in_memory = get("in_memory"),
                realms = get("realms"),
                files = get("files"),
                extra = extra,
            )
        };
    }

    if event.is_error() {
        emit!(tracing::Level::ERROR);
    } else if event.is_lifecycle() {
        emit!(tracing::Level::INFO);
    } else {
        emit!(tracing::Level::DEBUG);
    }
}

fn render_extra(fields: &[(&str, &str)]) -> Option<String> {
    let rest: Vec<String> = fields
        .iter()
        .filter(|(k, _)| !FIELDS.contains(k))
        .map(|(k, v)| format!("{}={}", k, v))
        .collect();
    (!rest.is_empty()).then(|| rest.join(" "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fmt;
    use std::sync::Arc;

    use parking_lot::Mutex;
    use tracing::field::{Field, Visit};
    use tracing::span::{Attributes, Id, Record};
    use tracing::{Metadata, Subscriber};

    type Recorded = Vec<(String, String)>;

    /// Collects the fields of every event.
    #[derive(Clone, Default)]
    struct Capture(Arc<Mutex<Vec<Recorded>>>);

    struct Fields<'a>(&'a mut Recorded);

    impl Visit for Fields<'_> {
        fn record_str(&mut self, field: &Field, value: &str) {
            self.0.push((field.name().to_string(), value.to_string()));
        }

        fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
            self.0.push((field.name().to_string(), format!("{:?}", value)));
        }
    }

    impl Subscriber for Capture {
        fn enabled(&self, _: &Metadata<'_>) -> bool {
            true
        }

        fn new_span(&self, _: &Attributes<'_>) -> Id {
            Id::from_u64(1)
        }

        fn record(&self, _: &Id, _: &Record<'_>) {}

        fn record_follows_from(&self, _: &Id, _: &Id) {}

        fn event(&self, event: &tracing::Event<'_>) {
            let mut fields = Vec::new();
            event.record(&mut Fields(&mut fields));
            self.0.lock().push(fields);
        }

        fn enter(&self, _: &Id) {}

        fn exit(&self, _: &Id) {}
    }

    fn field(name: &str, value: &str) -> (String, String) {
        (name.to_string(), value.to_string())
    }

    #[test]
    fn test_render_extra() {
        assert_eq!(
            render_extra(&[("path", "a.realm"), ("shard", "2"), ("mode", "x")]),
            Some("shard=2 mode=x".to_string())
        );
        assert_eq!(render_extra(&[("path", "a.realm")]), None);
    }

    #[test]
    fn test_fields_are_recorded_separately() {
        let capture = Capture::default();
        tracing::subscriber::with_default(capture.clone(), || {
            log_event(
                Event::CommitPublished,
                &[("path", "a.realm"), ("version", "3"), ("shard", "7")],
            );
        });

        let events = capture.0.lock();
        assert_eq!(events.len(), 1);
        let fields = &events[0];
        assert!(fields.contains(&field("event", Event::CommitPublished.as_str())));
        assert!(fields.contains(&field("path", "a.realm")));
        assert!(fields.contains(&field("version", "3")));
        assert!(fields.contains(&field("extra", "shard=7")));
        assert!(!fields.iter().any(|(name, _)| name == "notifier" || name == "error"));
    }

    #[test]
    fn test_log_event() {
        // This just verifies no panic without a subscriber
        log_event(Event::EnvironmentOpen, &[]);
        log_event(Event::NotifierFailed, &[("notifier", "1")]);
    }
}
