//! Prometheus metrics for monitoring
//!
//! Exposes metrics for:
//! - Transfer submissions and status transitions
//! - Remote errors per message type
//! - Route composition
//! - Confirmation tracking
//! - History requests
//!
//! Serving the exposition text is left to the host application.

use crate::channel::MessageType;
use crate::error::{TransferError, TransferResult};
use crate::transfer::{TransactionStatus, TransferKind};

use lazy_static::lazy_static;
use prometheus::{
    register_counter, register_counter_vec, register_gauge, register_histogram,
    Counter, CounterVec, Encoder, Gauge, Histogram, TextEncoder,
};

lazy_static! {
    // Transfer metrics
    pub static ref TRANSFERS_SUBMITTED: CounterVec = register_counter_vec!(
        "xchain_transfers_submitted_total",
        "Total transfers acknowledged by the remote",
        &["kind"]
    ).unwrap();

    pub static ref STATUS_TRANSITIONS: CounterVec = register_counter_vec!(
        "xchain_status_transitions_total",
        "Total record status changes",
        &["kind", "status"]
    ).unwrap();

    pub static ref PATCHES_REJECTED: Counter = register_counter!(
        "xchain_patches_rejected_total",
        "Status patches refused because they would regress a record"
    ).unwrap();

    // Channel metrics
    pub static ref REMOTE_ERRORS: CounterVec = register_counter_vec!(
        "xchain_remote_errors_total",
        "Error responses from the remote by message type",
        &["message_type"]
    ).unwrap();

    // Route metrics
    pub static ref ROUTES_COMPOSED: Histogram = register_histogram!(
        "xchain_routes_composed",
        "Valid routes returned per composition",
        vec![0.0, 1.0, 2.0, 3.0, 5.0, 10.0]
    ).unwrap();

    pub static ref ROUTES_REJECTED: Counter = register_counter!(
        "xchain_routes_rejected_total",
        "Routes dropped for breaking hop continuity or endpoints"
    ).unwrap();

    // Confirmation metrics
    pub static ref CONFIRMATIONS_FINAL: Counter = register_counter!(
        "xchain_confirmations_final_total",
        "Tracked transactions that reached the confirmation threshold"
    ).unwrap();

    pub static ref CONFIRMATIONS_FAILED: Counter = register_counter!(
        "xchain_confirmations_failed_total",
        "Tracked transactions reported failed on chain"
    ).unwrap();

    pub static ref ACTIVE_TRACKERS: Gauge = register_gauge!(
        "xchain_confirmation_trackers_active",
        "Confirmation polling tasks currently running"
    ).unwrap();

    // History metrics
    pub static ref HISTORY_REQUESTS: CounterVec = register_counter_vec!(
        "xchain_history_requests_total",
        "History queries by kind filter",
        &["kind"]
    ).unwrap();
}

/// Render all registered metrics in the text exposition format
pub fn gather() -> TransferResult<String> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| TransferError::Internal(format!("metrics encoding failed: {}", e)))?;
    String::from_utf8(buffer)
        .map_err(|e| TransferError::Internal(format!("metrics are not utf-8: {}", e)))
}

// Helper functions to record metrics

pub fn record_transfer_submitted(kind: TransferKind) {
    TRANSFERS_SUBMITTED
        .with_label_values(&[&kind.to_string()])
        .inc();
}

pub fn record_status_transition(kind: TransferKind, status: TransactionStatus) {
    STATUS_TRANSITIONS
        .with_label_values(&[&kind.to_string(), status.as_str()])
        .inc();
}

pub fn record_patch_rejected() {
    PATCHES_REJECTED.inc();
}

pub fn record_remote_error(message_type: MessageType) {
    REMOTE_ERRORS
        .with_label_values(&[message_type.as_str()])
        .inc();
}

pub fn record_routes_composed(count: usize) {
    ROUTES_COMPOSED.observe(count as f64);
}

pub fn record_route_rejected() {
    ROUTES_REJECTED.inc();
}

pub fn record_confirmation_final() {
    CONFIRMATIONS_FINAL.inc();
}

pub fn record_confirmation_failed() {
    CONFIRMATIONS_FAILED.inc();
}

pub fn record_history_request(kind: &str) {
    HISTORY_REQUESTS.with_label_values(&[kind]).inc();
}
