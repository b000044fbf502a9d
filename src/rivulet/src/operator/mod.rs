//! Pipeline operators.
//!
//! Each operator wraps exactly one upstream source and exposes itself as a
//! new attachable source. Assembly-time objects (the sources) and live
//! objects (the per-subscription stages) are both [`crate::scan::Scan`]
//! stages, so the pipeline can be walked before and after subscription.

pub mod deliver_on;
pub mod filter;
pub mod iter_source;
pub mod lambda;
pub mod map;
pub mod meta;
pub mod multicast;
pub mod push;
pub mod ref_count;

pub use deliver_on::HopConfig;
pub use lambda::SubscriberHandle;
pub use multicast::ConnectableFlow;
pub use push::PushHandle;

use crate::scan::Scan;
use crate::signal::Publisher;

/// An attachable source that can also be introspected: the assembly-time
/// face of every operator.
pub trait Source<T>: Publisher<T> + Scan {}

impl<T, S> Source<T> for S where S: Publisher<T> + Scan {}
