//! Metric names emitted by the dispatch core.

use std::sync::Once;

use metrics::{Unit, describe_counter, describe_gauge};

static REGISTER_METRICS: Once = Once::new();

/// Label carrying the message kind of a stream.
pub const KIND_LABEL: &str = "kind";

/// Label carrying the [`crate::error::ErrorClass`] of a failure.
pub const CLASS_LABEL: &str = "class";

/// Label carrying the [`crate::error::ErrorKind`] of a failure.
pub const ERROR_KIND_LABEL: &str = "error_kind";

pub const DISPATCH_MESSAGES_SUBMITTED_TOTAL: &str = "dispatch_messages_submitted_total";
pub const DISPATCH_MESSAGES_REJECTED_TOTAL: &str = "dispatch_messages_rejected_total";
pub const DISPATCH_MESSAGES_PROCESSED_TOTAL: &str = "dispatch_messages_processed_total";
pub const DISPATCH_MESSAGES_FAILED_TOTAL: &str = "dispatch_messages_failed_total";
pub const DISPATCH_HANDLER_PANICS_TOTAL: &str = "dispatch_handler_panics_total";
pub const DISPATCH_QUEUE_DEPTH: &str = "dispatch_queue_depth";
pub const DISPATCH_HANDLER_DURATION_MILLISECONDS_TOTAL: &str =
    "dispatch_handler_duration_milliseconds_total";

/// Registers metric descriptions. Safe to call repeatedly, descriptions are only
/// registered once.
pub(crate) fn register_metrics() {
    REGISTER_METRICS.call_once(|| {
        describe_counter!(
            DISPATCH_MESSAGES_SUBMITTED_TOTAL,
            Unit::Count,
            "Messages accepted into a stream channel"
        );

        describe_counter!(
            DISPATCH_MESSAGES_REJECTED_TOTAL,
            Unit::Count,
            "Messages refused because the stream channel was full"
        );

        describe_counter!(
            DISPATCH_MESSAGES_PROCESSED_TOTAL,
            Unit::Count,
            "Messages whose handler returned successfully"
        );

        describe_counter!(
            DISPATCH_MESSAGES_FAILED_TOTAL,
            Unit::Count,
            "Messages whose handler failed, labelled by error class and kind"
        );

        describe_counter!(
            DISPATCH_HANDLER_PANICS_TOTAL,
            Unit::Count,
            "Handler invocations that panicked"
        );

        describe_gauge!(
            DISPATCH_QUEUE_DEPTH,
            Unit::Count,
            "Messages waiting in a stream channel"
        );

        describe_counter!(
            DISPATCH_HANDLER_DURATION_MILLISECONDS_TOTAL,
            Unit::Milliseconds,
            "Time spent inside handlers"
        );
    });
}
