use actix_web::HttpResponse;
use prometheus::{register_int_counter_vec, Encoder, IntCounterVec, TextEncoder};

use crate::models::ConversationType;

lazy_static::lazy_static! {
    /// Best-effort membership row writes that failed and were swallowed
    pub static ref MEMBERSHIP_SYNC_FAILURES: IntCounterVec = register_int_counter_vec!(
        "conversation_membership_sync_failures_total",
        "Membership row writes that failed after the primary write succeeded",
        &["operation"]
    ).expect("Prometheus metrics registration should succeed at startup");

    pub static ref MESSAGES_SENT: IntCounterVec = register_int_counter_vec!(
        "conversation_messages_sent_total",
        "Messages appended to conversations",
        &["conversation_type"]
    ).expect("Prometheus metrics registration should succeed at startup");
}

pub fn record_membership_sync_failure(operation: &str) {
    MEMBERSHIP_SYNC_FAILURES
        .with_label_values(&[operation])
        .inc();
}

pub fn record_message_sent(kind: ConversationType) {
    MESSAGES_SENT.with_label_values(&[kind.to_db()]).inc();
}

/// Prometheus text exposition of the default registry
pub async fn metrics_handler() -> HttpResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();

    let mut buffer = Vec::new();
    if let Err(err) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = %err, "failed to encode metrics");
        return HttpResponse::InternalServerError().body(err.to_string());
    }

    HttpResponse::Ok()
        .content_type(encoder.format_type())
        .body(buffer)
}
