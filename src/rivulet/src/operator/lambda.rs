//! Callback-based terminal consumer.
//!
//! Wraps user closures into a full protocol citizen. A panic inside the
//! `on_next` callback must not silently kill the producer thread: it is
//! treated as an unrecoverable failure of this subscription — upstream is
//! cancelled exactly once and the failure is routed to the error callback.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use exec::Disposable;

use crate::demand;
use crate::diagnostics;
use crate::error::StreamError;
use crate::scan::{Attr, AttrValue, Scan, StageRef};
use crate::signal::{Subscriber, Subscription};

pub struct LambdaSubscriber<T> {
    next: Box<dyn Fn(T) + Send + Sync>,
    error: Box<dyn Fn(StreamError) + Send + Sync>,
    complete: Box<dyn Fn() + Send + Sync>,
    subscription: Mutex<Option<Arc<dyn Subscription>>>,
    last_error: Mutex<Option<StreamError>>,
    terminated: AtomicBool,
    disposed: AtomicBool,
}

impl<T> LambdaSubscriber<T> {
    pub fn new(
        next: Box<dyn Fn(T) + Send + Sync>,
        error: Box<dyn Fn(StreamError) + Send + Sync>,
        complete: Box<dyn Fn() + Send + Sync>,
    ) -> Self {
        Self {
            next,
            error,
            complete,
            subscription: Mutex::new(None),
            last_error: Mutex::new(None),
            terminated: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
        }
    }

    fn subscription(&self) -> Option<Arc<dyn Subscription>> {
        self.subscription
            .lock()
            .expect("subscription lock poisoned")
            .clone()
    }

    fn terminate_with(&self, error: StreamError) {
        if self.terminated.swap(true, Ordering::AcqRel) {
            diagnostics::on_error_dropped(&error);
            return;
        }
        *self.last_error.lock().expect("error lock poisoned") = Some(error.clone());
        if catch_unwind(AssertUnwindSafe(|| (self.error)(error))).is_err() {
            tracing::error!("error callback panicked");
        }
    }
}

impl<T> Subscriber<T> for LambdaSubscriber<T>
where
    T: Send + Sync + 'static,
{
    fn on_subscribe(self: Arc<Self>, subscription: Arc<dyn Subscription>) {
        if self.disposed.load(Ordering::Acquire) {
            subscription.cancel();
            return;
        }
        *self.subscription.lock().expect("subscription lock poisoned") = Some(Arc::clone(&subscription));
        subscription.request(demand::UNBOUNDED);
    }

    fn on_next(&self, value: T) {
        if self.terminated.load(Ordering::Acquire) || self.disposed.load(Ordering::Acquire) {
            diagnostics::on_next_dropped();
            return;
        }
        if let Err(panic) = catch_unwind(AssertUnwindSafe(|| (self.next)(value))) {
            let message = panic
                .downcast_ref::<&str>()
                .map(ToString::to_string)
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| String::from("opaque panic payload"));
            if let Some(subscription) = self.subscription() {
                subscription.cancel();
            }
            self.terminate_with(StreamError::callback_panic(message));
        }
    }

    fn on_error(&self, error: StreamError) {
        self.terminate_with(error);
    }

    fn on_complete(&self) {
        if self.terminated.swap(true, Ordering::AcqRel) {
            diagnostics::on_complete_dropped();
            return;
        }
        if catch_unwind(AssertUnwindSafe(|| (self.complete)())).is_err() {
            tracing::error!("completion callback panicked");
        }
    }
}

impl<T> Scan for LambdaSubscriber<T>
where
    T: Send + Sync + 'static,
{
    fn scan_unsafe(&self, key: &Attr) -> Option<AttrValue> {
        match key {
            Attr::Parent => self
                .subscription()
                .map(|subscription| AttrValue::Stage(StageRef::new(subscription))),
            Attr::Terminated => Some(AttrValue::Bool(self.terminated.load(Ordering::Acquire))),
            Attr::Cancelled => Some(AttrValue::Bool(self.disposed.load(Ordering::Acquire))),
            Attr::Error => self
                .last_error
                .lock()
                .expect("error lock poisoned")
                .clone()
                .map(AttrValue::Err),
            _ => None,
        }
    }
}

/// Handle returned by `Flow::subscribe_with`: the live terminal stage plus
/// its cancellation lever.
pub struct SubscriberHandle<T> {
    stage: Arc<LambdaSubscriber<T>>,
}

impl<T> SubscriberHandle<T>
where
    T: Send + Sync + 'static,
{
    pub(crate) fn new(stage: Arc<LambdaSubscriber<T>>) -> Self {
        Self { stage }
    }

    /// The terminal stage as a walkable scan entry point.
    pub fn stage(&self) -> StageRef {
        StageRef::new(Arc::clone(&self.stage) as Arc<dyn Scan>)
    }
}

impl<T> Disposable for SubscriberHandle<T>
where
    T: Send + Sync + 'static,
{
    /// Cancel the subscription. Idempotent; concurrent calls release
    /// upstream at most once (the upstream stage enforces cancel-once).
    fn dispose(&self) {
        if self.stage.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(subscription) = self.stage.subscription() {
            subscription.cancel();
        }
    }

    fn is_disposed(&self) -> bool {
        self.stage.disposed.load(Ordering::Acquire)
    }
}
