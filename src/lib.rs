//! # State Store
//!
//! A unidirectional state container: a store holding independently typed
//! features, fed by opaque actions that run through ordered chains of pure
//! reducers.
//!
//! ## Core Concepts
//!
//! - **Actions**: Immutable values identified by their runtime type
//! - **Reducers**: Predicate + pure transform pairs, folded in registration order
//! - **Features**: Named slices of state with their own reducers and observers
//! - **Store**: Registry and broadcaster; gates dispatch until initialized
//!
//! State changes are detected by reference identity: a reducer that returns a
//! freshly allocated value counts as a change even if it compares equal.
//!
//! ## Example
//!
//! ```ignore
//! use statefold::{ActionReducer, Feature, Store};
//! use std::sync::Arc;
//!
//! struct Increment;
//!
//! let store = Store::new();
//! let counter = Arc::new(Feature::new("counter", 0i64));
//! counter.add_reducer(ActionReducer::new(|n: &i64, _: &Increment| n + 1));
//! store.register_feature(counter.clone())?;
//! store.initialize()?;
//!
//! store.dispatch(Increment)?;
//! assert_eq!(*counter.state(), 1);
//! ```

pub mod error;
pub mod feature;
pub mod middleware;
pub mod reducer;
pub mod store;
pub mod subscriptions;
pub mod types;

// Re-exports
pub use error::{FeatureFailure, ReduceError, Result, StoreError};
pub use feature::{AnyFeature, Feature};
pub use middleware::{LoggingMiddleware, Middleware};
pub use reducer::{ActionReducer, FnReducer, Reducer};
pub use store::{PreInitPolicy, SnapshotEntry, Store, StoreConfig, StoreSnapshot, StoreStatus};
pub use subscriptions::{
    ChangeEvent, ChangeStream, DropReason, ListenerId, StateChange, Subscriber, SubscriberId,
};
pub use types::*;
