//! Side-channel diagnostics for protocol violations.
//!
//! Signals that arrive after a terminal state and illegal request amounts
//! are not part of the data path: they are counted and logged here, and the
//! stream carries on (or terminates) per the protocol rules.

use once_cell::sync::Lazy;
use prometheus::{register_int_counter, register_int_counter_vec, IntCounter, IntCounterVec};

use crate::error::StreamError;

static SIGNALS_DROPPED_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "stream_signals_dropped_total",
        "Signals discarded because the stage had already terminated or been cancelled",
        &["kind"]
    )
    .expect("create signals_dropped counter vec")
});

static BAD_REQUESTS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "stream_bad_requests_total",
        "request() calls with a non-positive amount"
    )
    .expect("create bad_requests counter")
});

pub fn on_next_dropped() {
    SIGNALS_DROPPED_TOTAL.with_label_values(&["next"]).inc();
    tracing::debug!("element dropped after terminal state");
}

pub fn on_error_dropped(error: &StreamError) {
    SIGNALS_DROPPED_TOTAL.with_label_values(&["error"]).inc();
    tracing::warn!(%error, "error signal dropped after terminal state");
}

pub fn on_complete_dropped() {
    SIGNALS_DROPPED_TOTAL.with_label_values(&["complete"]).inc();
    tracing::debug!("completion signal dropped after terminal state");
}

pub fn on_bad_request(n: u64) {
    BAD_REQUESTS_TOTAL.inc();
    tracing::warn!(amount = n, "illegal request amount");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_register_once_and_increment() {
        let before = SIGNALS_DROPPED_TOTAL.with_label_values(&["next"]).get();
        on_next_dropped();
        on_next_dropped();
        assert_eq!(
            SIGNALS_DROPPED_TOTAL.with_label_values(&["next"]).get(),
            before + 2
        );

        let before = BAD_REQUESTS_TOTAL.get();
        on_bad_request(0);
        assert_eq!(BAD_REQUESTS_TOTAL.get(), before + 1);
    }
}
