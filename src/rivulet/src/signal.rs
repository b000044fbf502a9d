//! The demand protocol contract.
//!
//! Four signals travel downstream (`on_subscribe`, `on_next`, `on_complete`,
//! `on_error`) and two upstream (`request`, `cancel`). The rules every stage
//! must follow:
//!
//! - `on_next` is delivered only while net requested demand is positive, and
//!   never concurrently with another `on_next` to the same consumer.
//! - `on_complete` / `on_error` are terminal, mutually exclusive, delivered
//!   at most once. Signals arriving after a terminal state are dropped with
//!   a [`crate::diagnostics`] event.
//! - `request` amounts are additive and saturate at
//!   [`crate::demand::UNBOUNDED`]; `request(0)` is rejected with
//!   [`crate::error::StreamError::BadRequest`].
//! - `cancel` is terminal from the consumer's side, idempotent, stops
//!   further delivery, and releases upstream resources exactly once.
//!
//! Both sides of every edge are [`Scan`] stages, which is what lets an
//! external tool walk a live pipeline without knowing concrete types.

use std::sync::Arc;

use crate::error::StreamError;
use crate::scan::Scan;

/// Consumer-to-producer edge handle.
pub trait Subscription: Scan + Send + Sync {
    /// Grant up to `n` more elements. Additive; `u64::MAX` means unbounded.
    fn request(&self, n: u64);

    /// Stop delivery and release upstream resources. Idempotent.
    fn cancel(&self);
}

/// Receiver of the downstream-travelling signals.
pub trait Subscriber<T>: Scan + Send + Sync {
    /// Called exactly once, before any other signal, with the edge handle.
    fn on_subscribe(self: Arc<Self>, subscription: Arc<dyn Subscription>);

    /// One element. Only delivered against outstanding demand.
    fn on_next(&self, value: T);

    /// Terminal failure. Mutually exclusive with `on_complete`.
    fn on_error(&self, error: StreamError);

    /// Terminal success. Mutually exclusive with `on_error`.
    fn on_complete(&self);
}

/// A source of elements that consumers attach to.
pub trait Publisher<T>: Send + Sync {
    fn subscribe(&self, subscriber: Arc<dyn Subscriber<T>>);
}

/// A subscription with no upstream behind it, handed to subscribers of
/// already-terminated sources so the contract ("`on_subscribe` first") holds
/// even when the only signal that follows is terminal.
pub struct EmptySubscription;

impl Scan for EmptySubscription {}

impl Subscription for EmptySubscription {
    fn request(&self, _n: u64) {}

    fn cancel(&self) {}
}
