//! Counters for the synchronization engine.
//!
//! # Metrics
//! - `config_sync_reconnects_total` (counter): completed reconnects
//! - `config_sync_dial_failures_total` (counter): failed dial attempts
//! - `config_sync_deltas_applied_total` (counter): deltas applied, by source
//! - `config_sync_cache_fallbacks_total` (counter): reads served from cache
//! - `config_sync_cache_write_failures_total` (counter)
//! - `config_sync_worker_exits_total` (counter): worker exits, by role and reason

pub fn record_reconnect() {
    ::metrics::counter!("config_sync_reconnects_total").increment(1);
}

pub fn record_dial_failure() {
    ::metrics::counter!("config_sync_dial_failures_total").increment(1);
}

pub fn record_delta_applied(source: &'static str) {
    ::metrics::counter!("config_sync_deltas_applied_total", "source" => source).increment(1);
}

pub fn record_cache_fallback() {
    ::metrics::counter!("config_sync_cache_fallbacks_total").increment(1);
}

pub fn record_cache_write_failure() {
    ::metrics::counter!("config_sync_cache_write_failures_total").increment(1);
}

pub fn record_worker_exit(role: &'static str, reason: &'static str) {
    ::metrics::counter!("config_sync_worker_exits_total", "role" => role, "reason" => reason)
        .increment(1);
}
