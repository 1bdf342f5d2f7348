//! Metric names recorded by the core.
//!
//! Recording goes through the `metrics` facade and is a no-op until the
//! embedding binary installs a recorder.

use metrics::counter;

/// Metric names.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "chatwire_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "chatwire_connections_active";
    pub const MESSAGES_TOTAL: &str = "chatwire_messages_total";
    pub const QUEUE_OVERFLOWS_TOTAL: &str = "chatwire_queue_overflows_total";
    pub const PUBLISH_FAILURES_TOTAL: &str = "chatwire_publish_failures_total";
    pub const ERRORS_TOTAL: &str = "chatwire_errors_total";
}

pub(crate) fn record_message(direction: &'static str) {
    counter!(names::MESSAGES_TOTAL, "direction" => direction).increment(1);
}

pub(crate) fn record_queue_overflow() {
    counter!(names::QUEUE_OVERFLOWS_TOTAL).increment(1);
}

pub(crate) fn record_publish_failure() {
    counter!(names::PUBLISH_FAILURES_TOTAL).increment(1);
}

pub(crate) fn record_error(error_type: &'static str) {
    counter!(names::ERRORS_TOTAL, "type" => error_type).increment(1);
}
