#![forbid(unsafe_code)]

//! Reactive primitives: observable values, derived values, event streams
//! with or without a cached last value, and batched notification.

pub mod batch;
pub mod computed;
pub mod event_stream;
pub mod latest;
pub mod observable;

pub use batch::BatchScope;
pub use computed::Computed;
pub use event_stream::EventStream;
pub use latest::LatestStream;
pub use observable::{Observable, Subscription};
