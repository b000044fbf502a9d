//! Demand signals must not run on the delivery pool when a dedicated
//! request context is configured: a downstream that re-requests from inside
//! `on_next` would otherwise pull upstream work onto the delivery threads.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::time::Duration;

use exec::ThreadPool;
use rivulet::operator::Source;
use rivulet::{
    Attr, AttrValue, Flow, HopConfig, Scan, StageRef, StreamError, Publisher, Subscriber,
    Subscription,
};

const WAIT: Duration = Duration::from_secs(10);

/// Identity stage that records the thread every upstream `request` call
/// runs on.
struct RequestProbe {
    upstream: Arc<dyn Source<i64>>,
    threads: Arc<Mutex<Vec<String>>>,
}

impl Scan for RequestProbe {
    fn scan_unsafe(&self, key: &Attr) -> Option<AttrValue> {
        match key {
            Attr::Parent => Some(AttrValue::Stage(StageRef::new(self.upstream.clone()))),
            _ => None,
        }
    }
}

impl Publisher<i64> for RequestProbe {
    fn subscribe(&self, subscriber: Arc<dyn Subscriber<i64>>) {
        let stage = Arc::new(ProbeStage {
            downstream: subscriber,
            threads: Arc::clone(&self.threads),
            upstream: Mutex::new(None),
        });
        self.upstream.subscribe(stage);
    }
}

struct ProbeStage {
    downstream: Arc<dyn Subscriber<i64>>,
    threads: Arc<Mutex<Vec<String>>>,
    upstream: Mutex<Option<Arc<dyn Subscription>>>,
}

impl Scan for ProbeStage {}

impl Subscriber<i64> for ProbeStage {
    fn on_subscribe(self: Arc<Self>, subscription: Arc<dyn Subscription>) {
        *self.upstream.lock().unwrap() = Some(subscription);
        let downstream = Arc::clone(&self.downstream);
        downstream.on_subscribe(self);
    }

    fn on_next(&self, value: i64) {
        self.downstream.on_next(value);
    }

    fn on_error(&self, error: StreamError) {
        self.downstream.on_error(error);
    }

    fn on_complete(&self) {
        self.downstream.on_complete();
    }
}

impl Subscription for ProbeStage {
    fn request(&self, n: u64) {
        let thread = std::thread::current().name().unwrap_or("unnamed").to_string();
        self.threads.lock().unwrap().push(thread);
        if let Some(upstream) = self.upstream.lock().unwrap().clone() {
            upstream.request(n);
        }
    }

    fn cancel(&self) {
        if let Some(upstream) = self.upstream.lock().unwrap().clone() {
            upstream.cancel();
        }
    }
}

/// Downstream that requests one element at a time from inside `on_next`,
/// which is exactly the pattern that pulls upstream demand handling onto
/// the delivery thread when no request context is configured.
struct OneByOne {
    subscription: Mutex<Option<Arc<dyn Subscription>>>,
    received: AtomicU64,
    done: mpsc::Sender<()>,
}

impl Scan for OneByOne {}

impl Subscriber<i64> for OneByOne {
    fn on_subscribe(self: Arc<Self>, subscription: Arc<dyn Subscription>) {
        *self.subscription.lock().unwrap() = Some(Arc::clone(&subscription));
        subscription.request(1);
    }

    fn on_next(&self, _value: i64) {
        self.received.fetch_add(1, Ordering::SeqCst);
        let subscription = self.subscription.lock().unwrap().clone();
        if let Some(subscription) = subscription {
            subscription.request(1);
        }
    }

    fn on_error(&self, error: StreamError) {
        panic!("unexpected error: {error}");
    }

    fn on_complete(&self) {
        self.done.send(()).unwrap();
    }
}

#[test]
fn upstream_requests_stay_on_the_request_pool() {
    let delivery = Arc::new(ThreadPool::new("delivery", 1));
    let request = Arc::new(ThreadPool::new("request", 1));
    let threads = Arc::new(Mutex::new(Vec::new()));
    let probe = Arc::new(RequestProbe {
        upstream: Flow::range(0, 500).into_source(),
        threads: Arc::clone(&threads),
    });

    let (done_tx, done_rx) = mpsc::channel();
    let subscriber = Arc::new(OneByOne {
        subscription: Mutex::new(None),
        received: AtomicU64::new(0),
        done: done_tx,
    });
    Flow::from_source(probe as Arc<dyn Source<i64>>)
        .deliver_on_with(
            HopConfig::new(Arc::clone(&delivery) as _)
                .with_request_context(Arc::clone(&request) as _)
                .with_capacity(64),
        )
        .subscribe_raw(subscriber.clone() as _);

    done_rx.recv_timeout(WAIT).unwrap();
    assert_eq!(subscriber.received.load(Ordering::SeqCst), 500);
    let threads = threads.lock().unwrap();
    assert!(!threads.is_empty());
    for thread in threads.iter() {
        assert!(
            thread.starts_with("request-"),
            "upstream request ran on {thread}"
        );
    }
    delivery.shutdown();
    request.shutdown();
}
