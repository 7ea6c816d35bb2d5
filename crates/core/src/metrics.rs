//! Metric names and descriptions.
//!
//! Every metric name lives here so receivers, the funnel and the daemon
//! report under one naming scheme.
//!
//! # Naming
//!
//! - prefix: `log2console_`
//! - component: `receiver_`, `funnel_`, `daemon_`
//! - suffix: `_total` (counter), none (gauge)
//!
//! ```ignore
//! use log2console_core::metrics as m;
//!
//! metrics::counter!(m::RECEIVER_MESSAGES_TOTAL, m::LABEL_RECEIVER => "tcp").increment(1);
//! ```

// ─── label keys ────────────────────────────────────────────────────

/// Receiver kind (tcp, udp, http, ...)
pub const LABEL_RECEIVER: &str = "receiver";

/// Wire format (log4j_xml, serilog_json, text)
pub const LABEL_FORMAT: &str = "format";

/// Why a message was dropped (no_sink, funnel_full)
pub const LABEL_REASON: &str = "reason";

/// `reason` value: receiver had no sink attached
pub const REASON_NO_SINK: &str = "no_sink";

/// `reason` value: funnel was at capacity
pub const REASON_FUNNEL_FULL: &str = "funnel_full";

// ─── receivers ─────────────────────────────────────────────────────

/// Messages delivered to a sink (counter, label: receiver)
pub const RECEIVER_MESSAGES_TOTAL: &str = "log2console_receiver_messages_total";

/// Events that failed to parse and were degraded (counter, label: format)
pub const RECEIVER_PARSE_ERRORS_TOTAL: &str = "log2console_receiver_parse_errors_total";

/// Events dropped before reaching the consumer (counter, labels: receiver, reason)
pub const RECEIVER_DROPPED_TOTAL: &str = "log2console_receiver_dropped_total";

/// Open client connections (gauge, label: receiver)
pub const RECEIVER_ACTIVE_CONNECTIONS: &str = "log2console_receiver_active_connections";

/// Failed `initialize` calls (counter, label: receiver)
pub const RECEIVER_INIT_FAILURES_TOTAL: &str = "log2console_receiver_init_failures_total";

// ─── funnel ────────────────────────────────────────────────────────

/// Messages waiting for the next drain (gauge)
pub const FUNNEL_DEPTH: &str = "log2console_funnel_depth";

/// Messages handed to the consumer (counter)
pub const FUNNEL_DRAINED_TOTAL: &str = "log2console_funnel_drained_total";

/// Messages evicted or rejected at capacity (counter)
pub const FUNNEL_DROPPED_TOTAL: &str = "log2console_funnel_dropped_total";

// ─── daemon ────────────────────────────────────────────────────────

/// Receivers currently listening (gauge)
pub const DAEMON_RECEIVERS_ACTIVE: &str = "log2console_daemon_receivers_active";

/// Build info (gauge, always 1, label: version)
pub const DAEMON_BUILD_INFO: &str = "log2console_daemon_build_info";

/// Registers HELP text for every metric.
///
/// Call once after installing the global recorder.
pub fn describe_all() {
    use metrics::{describe_counter, describe_gauge};

    describe_counter!(
        RECEIVER_MESSAGES_TOTAL,
        "Total number of log messages delivered by receivers"
    );
    describe_counter!(
        RECEIVER_PARSE_ERRORS_TOTAL,
        "Total number of wire events that failed to parse and were degraded to raw text"
    );
    describe_counter!(
        RECEIVER_DROPPED_TOTAL,
        "Total number of events dropped before reaching the consumer"
    );
    describe_gauge!(
        RECEIVER_ACTIVE_CONNECTIONS,
        "Number of client connections currently open"
    );
    describe_counter!(
        RECEIVER_INIT_FAILURES_TOTAL,
        "Total number of receiver initialization failures"
    );

    describe_gauge!(FUNNEL_DEPTH, "Messages queued in the notification funnel");
    describe_counter!(
        FUNNEL_DRAINED_TOTAL,
        "Total number of messages handed to the consumer"
    );
    describe_counter!(
        FUNNEL_DROPPED_TOTAL,
        "Total number of messages dropped because the funnel was full"
    );

    describe_gauge!(DAEMON_RECEIVERS_ACTIVE, "Receivers currently listening");
    describe_gauge!(
        DAEMON_BUILD_INFO,
        "Build information (always 1, with a version label)"
    );
}
