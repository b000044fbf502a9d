//! Demand-driven asynchronous stream processing.
//!
//! Pipelines are assembled from a source through operators to a terminal
//! subscriber, then driven entirely by downstream demand: a producer may
//! only emit as many elements as its consumer has requested. On top of the
//! signal protocol the crate layers a thread-hop operator for moving
//! delivery onto an execution context, a shared multicast source with
//! reference-counted connection management, and a uniform introspection
//! surface for walking and querying a live pipeline.

pub mod demand;
pub mod diagnostics;
pub mod error;
pub mod flow;
pub mod operator;
pub mod scan;
pub mod signal;

pub use error::StreamError;
pub use flow::Flow;
pub use operator::deliver_on::HopConfig;
pub use operator::lambda::SubscriberHandle;
pub use operator::multicast::{ConnectableFlow, ConnectionHandle};
pub use operator::push::PushHandle;
pub use scan::{Attr, AttrValue, GenericAttr, Scan, StageRef};
pub use signal::{Publisher, Subscriber, Subscription};
