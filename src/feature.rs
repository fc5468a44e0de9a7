//! Features: named, independently reduced slices of state.

use crate::error::{FeatureFailure, Result, StoreError};
use crate::reducer::Reducer;
use crate::subscriptions::{
    ChangeNotifier, ChangeStream, ListenerId, StateChange, Subscriber, SubscriberId,
    SubscriberRegistry, DEFAULT_STREAM_BUFFER,
};
use crate::types::{Action, AnyState, StateType, Version};
use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Narrow, type-erased view of a feature used by the store.
pub trait AnyFeature: Send + Sync {
    fn name(&self) -> &str;

    fn state_type(&self) -> StateType;

    /// Current committed state, erased.
    fn state_any(&self) -> AnyState;

    /// Replace state with an erased value of the feature's state type.
    fn restore_state_any(&self, state: AnyState) -> Result<()>;

    /// Apply an action. Returns true if a new state was committed.
    fn receive_dispatch(&self, action: &Action) -> std::result::Result<bool, FeatureFailure>;

    fn version(&self) -> Version;

    /// JSON form of the current state, if the feature carries a codec.
    fn state_json(&self) -> Result<serde_json::Value>;

    fn restore_json(&self, value: serde_json::Value) -> Result<()>;

    /// Upcast for downcasting back to `Feature<S>`.
    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

/// Serialization hooks for a feature's state.
struct JsonCodec<S> {
    encode: fn(&S) -> serde_json::Result<serde_json::Value>,
    decode: fn(serde_json::Value) -> serde_json::Result<S>,
}

/// One named slice of state with its reducer chain and observers.
///
/// State is only ever replaced, never mutated in place. Change detection
/// is by reference identity (`Arc::ptr_eq`).
pub struct Feature<S> {
    name: Arc<str>,

    /// Committed state and its version.
    state: RwLock<(Arc<S>, Version)>,

    /// Serializes read-fold-commit.
    dispatch_lock: Mutex<()>,

    reducers: RwLock<Vec<Arc<dyn Reducer<S>>>>,

    subscribers: SubscriberRegistry,

    changes: ChangeNotifier<S>,

    codec: Option<JsonCodec<S>>,
}

impl<S: Send + Sync + 'static> Feature<S> {
    /// Create a feature with its initial state.
    pub fn new(name: impl Into<String>, initial_state: S) -> Self {
        Self::from_arc(name, Arc::new(initial_state))
    }

    /// Create a feature from an already shared initial state.
    pub fn from_arc(name: impl Into<String>, initial_state: Arc<S>) -> Self {
        let name: String = name.into();
        Self {
            name: Arc::from(name),
            state: RwLock::new((initial_state, Version::default())),
            dispatch_lock: Mutex::new(()),
            reducers: RwLock::new(Vec::new()),
            subscribers: SubscriberRegistry::new(),
            changes: ChangeNotifier::new(),
            codec: None,
        }
    }

    /// Enable JSON export/import of this feature's state.
    pub fn with_json_codec(mut self) -> Self
    where
        S: Serialize + DeserializeOwned,
    {
        self.codec = Some(JsonCodec {
            encode: |state| serde_json::to_value(state),
            decode: |value| serde_json::from_value(value),
        });
        self
    }

    /// Name the feature is registered under.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current committed state.
    pub fn state(&self) -> Arc<S> {
        Arc::clone(&self.state.read().0)
    }

    /// Runtime tag of `S`.
    pub fn state_type(&self) -> StateType {
        StateType::of::<S>()
    }

    /// Number of commits so far. Starts at zero.
    pub fn version(&self) -> Version {
        self.state.read().1
    }

    /// Replace state without running reducers.
    ///
    /// Meant for snapshot replay; notifies like a reducer-driven update when
    /// the reference differs.
    pub fn restore_state(&self, state: Arc<S>) {
        let committed = {
            let _guard = self.dispatch_lock.lock();
            self.commit(state)
        };
        if let Some(change) = committed {
            debug!(feature = %self.name, version = change.version.0, "state restored");
            self.notify();
        }
    }

    /// Append a reducer to the chain.
    pub fn add_reducer<R>(&self, reducer: R)
    where
        R: Reducer<S> + 'static,
    {
        self.reducers.write().push(Arc::new(reducer));
    }

    /// Append a possibly-absent reducer.
    pub fn add_reducer_opt(&self, reducer: Option<Arc<dyn Reducer<S>>>) -> Result<()> {
        let reducer = reducer.ok_or(StoreError::InvalidArgument("reducer"))?;
        self.reducers.write().push(reducer);
        Ok(())
    }

    /// Number of reducers in the chain.
    pub fn reducer_count(&self) -> usize {
        self.reducers.read().len()
    }

    /// Fold applicable reducers, in registration order, over the current
    /// state and commit the result if its reference differs.
    ///
    /// If a reducer fails, the output of the last successful reducer is
    /// committed and the failure is returned.
    pub fn receive_dispatch(&self, action: &Action) -> Result<bool> {
        self.fold_and_commit(action).map_err(StoreError::from)
    }

    fn fold_and_commit(&self, action: &Action) -> std::result::Result<bool, FeatureFailure> {
        let reducers: Vec<Arc<dyn Reducer<S>>> = self.reducers.read().clone();

        let (committed, failure) = {
            let _guard = self.dispatch_lock.lock();
            let mut state = self.state();
            let mut failure = None;

            for (index, reducer) in reducers.iter().enumerate() {
                if !reducer.should_apply(action) {
                    continue;
                }
                match reducer.reduce(&state, action) {
                    Ok(next) => state = next,
                    Err(source) => {
                        failure = Some(FeatureFailure {
                            feature: self.name.to_string(),
                            reducer_index: index,
                            source,
                        });
                        break;
                    }
                }
            }

            (self.commit(state), failure)
        };

        let changed = committed.is_some();
        if let Some(change) = committed {
            trace!(
                feature = %self.name,
                action = action.type_name(),
                version = change.version.0,
                "state committed"
            );
            self.notify();
        }

        match failure {
            Some(err) => {
                warn!(
                    feature = %self.name,
                    action = action.type_name(),
                    reducer = err.reducer_index,
                    error = %err.source,
                    "reducer failed"
                );
                Err(err)
            }
            None => Ok(changed),
        }
    }

    /// Swap in `next` if it is a different reference and queue the change
    /// for publishing. Caller holds `dispatch_lock`, which fixes the order.
    fn commit(&self, next: Arc<S>) -> Option<StateChange<S>> {
        let change = {
            let mut slot = self.state.write();
            if Arc::ptr_eq(&slot.0, &next) {
                return None;
            }
            let version = slot.1.next();
            *slot = (Arc::clone(&next), version);
            StateChange {
                feature: Arc::clone(&self.name),
                version,
                state: next,
            }
        };
        self.changes.enqueue(change.clone());
        Some(change)
    }

    /// Runs after `dispatch_lock` is released.
    fn notify(&self) {
        self.subscribers.notify(&self.name);
        self.changes.flush();
    }

    // --- Subscribers ---

    /// Register an observer. The feature only holds it weakly.
    pub fn subscribe(&self, observer: &Arc<dyn Subscriber>) -> SubscriberId {
        self.subscribers.subscribe(observer)
    }

    /// Returns false if `id` is not registered.
    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        self.subscribers.unsubscribe(id)
    }

    /// Remove every registration of `observer`.
    pub fn unsubscribe_observer(&self, observer: &Arc<dyn Subscriber>) -> bool {
        self.subscribers.unsubscribe_observer(observer)
    }

    /// Registered subscribers, including expired ones awaiting pruning.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    // --- Change events ---

    /// Call `listener` with each committed change, in commit order.
    pub fn on_change<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&StateChange<S>) + Send + Sync + 'static,
    {
        self.changes.add_listener(listener)
    }

    /// Returns false if `id` is not a registered listener.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.changes.remove_listener(id)
    }

    /// Open a change stream with the default buffer.
    pub fn changes(&self) -> ChangeStream<S> {
        self.changes.open_stream(DEFAULT_STREAM_BUFFER)
    }

    /// Open a change stream holding at most `buffer_size` undelivered events.
    pub fn changes_with_buffer(&self, buffer_size: usize) -> ChangeStream<S> {
        self.changes.open_stream(buffer_size)
    }

    /// Close a stream opened by `changes`.
    pub fn close_changes(&self, id: ListenerId) -> bool {
        self.changes.close_stream(id)
    }

    fn codec(&self) -> Result<&JsonCodec<S>> {
        self.codec
            .as_ref()
            .ok_or_else(|| StoreError::NoCodec(self.name.to_string()))
    }
}

impl<S: Send + Sync + 'static> AnyFeature for Feature<S> {
    fn name(&self) -> &str {
        &self.name
    }

    fn state_type(&self) -> StateType {
        StateType::of::<S>()
    }

    fn state_any(&self) -> AnyState {
        self.state()
    }

    fn restore_state_any(&self, state: AnyState) -> Result<()> {
        let typed = state
            .downcast::<S>()
            .map_err(|_| StoreError::StateTypeMismatch {
                feature: self.name.to_string(),
                expected: std::any::type_name::<S>(),
            })?;
        self.restore_state(typed);
        Ok(())
    }

    fn receive_dispatch(&self, action: &Action) -> std::result::Result<bool, FeatureFailure> {
        self.fold_and_commit(action)
    }

    fn version(&self) -> Version {
        Feature::version(self)
    }

    fn state_json(&self) -> Result<serde_json::Value> {
        let codec = self.codec()?;
        (codec.encode)(&self.state()).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    fn restore_json(&self, value: serde_json::Value) -> Result<()> {
        let codec = self.codec()?;
        let state = (codec.decode)(value).map_err(|e| StoreError::Deserialization(e.to_string()))?;
        self.restore_state(Arc::new(state));
        Ok(())
    }

    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

impl<S> fmt::Debug for Feature<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Feature")
            .field("name", &self.name)
            .field("state_type", &std::any::type_name::<S>())
            .field("version", &self.state.read().1)
            .field("reducers", &self.reducers.read().len())
            .finish()
    }
}
