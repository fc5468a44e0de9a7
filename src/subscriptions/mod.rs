//! Change notification for features.
//!
//! Two channels carry "state changed":
//! - Subscribers: weakly-held observers told only the feature name
//! - Change events: listener closures and bounded streams that receive the
//!   new state and its version
//!
//! # Example
//!
//! ```ignore
//! let feature = Feature::new("counter", Counter::default());
//! let stream = feature.changes();
//!
//! store.dispatch(Increment)?;
//!
//! match stream.recv()? {
//!     ChangeEvent::Changed(change) => println!("now {:?}", change.state),
//!     ChangeEvent::Dropped { reason } => println!("dropped: {:?}", reason),
//! }
//! ```

mod manager;
mod types;

pub use manager::{ChangeNotifier, SubscriberRegistry, DEFAULT_STREAM_BUFFER};
pub use types::{
    ChangeEvent, ChangeStream, DropReason, ListenerId, StateChange, Subscriber, SubscriberId,
};
