//! Main Store struct tying features, lifecycle and dispatch together.

use crate::error::{FeatureFailure, Result, StoreError};
use crate::feature::{AnyFeature, Feature};
use crate::middleware::Middleware;
use crate::types::{Action, AnyState, StateType, Version};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

/// What happens to actions dispatched before `initialize()`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PreInitPolicy {
    /// Buffer them and replay in order once initialized.
    #[default]
    Queue,
    /// Fail with `StoreError::NotInitialized`.
    Reject,
}

/// Store configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Policy for dispatch before initialization.
    pub pre_init_policy: PreInitPolicy,

    /// Max actions held for replay under `PreInitPolicy::Queue`.
    /// Default: 1024
    pub max_queued_actions: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            pre_init_policy: PreInitPolicy::Queue,
            max_queued_actions: 1024,
        }
    }
}

impl StoreConfig {
    /// Parse a configuration from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| StoreError::Deserialization(e.to_string()))
    }
}

/// Store lifecycle. There is no transition back.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StoreStatus {
    /// Nothing registered yet.
    Uninitialized,
    /// Features are being registered, or queued actions are replaying.
    Initializing,
    /// Dispatch is delivered live.
    Ready,
}

struct Lifecycle {
    status: StoreStatus,
    initialize_called: bool,
    queue: VecDeque<Action>,
}

#[derive(Default)]
struct FeatureIndex {
    /// Features in registration order.
    features: Vec<Arc<dyn AnyFeature>>,

    /// Feature name to position in `features`.
    name_to_index: HashMap<String, usize>,
}

/// One feature's state captured by `Store::snapshot`.
#[derive(Clone)]
pub struct SnapshotEntry {
    pub feature: String,
    pub state_type: StateType,
    pub version: Version,
    pub state: AnyState,
}

/// Point-in-time capture of every feature's state reference.
#[derive(Clone, Default)]
pub struct StoreSnapshot {
    entries: Vec<SnapshotEntry>,
}

impl StoreSnapshot {
    /// Entry for `feature`, if it was captured.
    pub fn get(&self, feature: &str) -> Option<&SnapshotEntry> {
        self.entries.iter().find(|e| e.feature == feature)
    }

    /// Typed state for `feature`, if present and of type `S`.
    pub fn state<S: Any + Send + Sync>(&self, feature: &str) -> Option<Arc<S>> {
        self.get(feature)
            .and_then(|e| Arc::clone(&e.state).downcast::<S>().ok())
    }

    /// Entries in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &SnapshotEntry> {
        self.entries.iter()
    }

    /// Number of captured features.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no features were captured.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// The dispatch root.
///
/// Holds the registered features, gates dispatch until initialization and
/// broadcasts every action to every feature. Safe to share across threads;
/// each feature serializes its own updates.
pub struct Store {
    config: StoreConfig,

    features: RwLock<FeatureIndex>,

    lifecycle: Mutex<Lifecycle>,

    middleware: RwLock<Vec<Arc<dyn Middleware>>>,
}

impl Store {
    /// Create a store with the default config.
    pub fn new() -> Self {
        Self::with_config(StoreConfig::default())
    }

    /// Create a store with an explicit config.
    pub fn with_config(config: StoreConfig) -> Self {
        Self {
            config,
            features: RwLock::new(FeatureIndex::default()),
            lifecycle: Mutex::new(Lifecycle {
                status: StoreStatus::Uninitialized,
                initialize_called: false,
                queue: VecDeque::new(),
            }),
            middleware: RwLock::new(Vec::new()),
        }
    }

    /// Config the store was built with.
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Current lifecycle status.
    pub fn status(&self) -> StoreStatus {
        self.lifecycle.lock().status
    }

    // --- Features ---

    /// Register a feature under its name.
    pub fn register_feature(&self, feature: Arc<dyn AnyFeature>) -> Result<()> {
        let name = feature.name().to_string();
        {
            let mut index = self.features.write();
            if index.name_to_index.contains_key(&name) {
                return Err(StoreError::DuplicateFeature(name));
            }
            let position = index.features.len();
            index.features.push(feature);
            index.name_to_index.insert(name.clone(), position);
        }

        let mut lifecycle = self.lifecycle.lock();
        if lifecycle.status == StoreStatus::Uninitialized {
            lifecycle.status = StoreStatus::Initializing;
        }
        debug!(feature = %name, "feature registered");
        Ok(())
    }

    /// Look up a feature by name.
    pub fn get_feature(&self, name: &str) -> Result<Arc<dyn AnyFeature>> {
        let index = self.features.read();
        index
            .name_to_index
            .get(name)
            .map(|&i| Arc::clone(&index.features[i]))
            .ok_or_else(|| StoreError::FeatureNotFound(name.to_string()))
    }

    /// Look up a feature and recover its concrete state type.
    pub fn feature<S: Send + Sync + 'static>(&self, name: &str) -> Result<Arc<Feature<S>>> {
        self.get_feature(name)?
            .as_any()
            .downcast::<Feature<S>>()
            .map_err(|_| StoreError::StateTypeMismatch {
                feature: name.to_string(),
                expected: std::any::type_name::<S>(),
            })
    }

    /// Feature names in registration order.
    pub fn feature_names(&self) -> Vec<String> {
        self.features
            .read()
            .features
            .iter()
            .map(|f| f.name().to_string())
            .collect()
    }

    /// Number of registered features.
    pub fn feature_count(&self) -> usize {
        self.features.read().features.len()
    }

    /// Append a middleware. Hooks run in the order added.
    pub fn add_middleware(&self, middleware: Arc<dyn Middleware>) {
        self.middleware.write().push(middleware);
    }

    // --- Lifecycle ---

    /// Mark the store ready, replaying any queued actions first.
    ///
    /// Replay failures are returned as `StoreError::Dispatch`, but the store
    /// is Ready either way.
    pub fn initialize(&self) -> Result<()> {
        {
            let mut lifecycle = self.lifecycle.lock();
            if lifecycle.initialize_called {
                return Err(StoreError::AlreadyInitialized);
            }
            lifecycle.initialize_called = true;
            lifecycle.status = StoreStatus::Initializing;
        }

        let mut failures = Vec::new();
        let mut replayed = 0usize;
        loop {
            // Actions queued while replaying are picked up by the next pass.
            let batch: Vec<Action> = {
                let mut lifecycle = self.lifecycle.lock();
                if lifecycle.queue.is_empty() {
                    lifecycle.status = StoreStatus::Ready;
                    break;
                }
                lifecycle.queue.drain(..).collect()
            };
            for action in &batch {
                failures.extend(self.deliver(action));
            }
            replayed += batch.len();
        }

        info!(
            features = self.feature_count(),
            replayed,
            failed = failures.len(),
            "store initialized"
        );

        if failures.is_empty() {
            Ok(())
        } else {
            Err(StoreError::Dispatch(failures))
        }
    }

    // --- Dispatch ---

    /// Dispatch any value as an action.
    pub fn dispatch<A: Any + Send + Sync>(&self, action: A) -> Result<()> {
        self.dispatch_action(Action::new(action))
    }

    /// Dispatch a possibly-absent action.
    pub fn dispatch_opt(&self, action: Option<Action>) -> Result<()> {
        let action = action.ok_or(StoreError::InvalidArgument("action"))?;
        self.dispatch_action(action)
    }

    /// Broadcast an action to every feature.
    ///
    /// Every feature receives the action even if another one fails; all
    /// failures come back together in `StoreError::Dispatch`.
    pub fn dispatch_action(&self, action: Action) -> Result<()> {
        {
            let mut lifecycle = self.lifecycle.lock();
            if lifecycle.status != StoreStatus::Ready {
                return match self.config.pre_init_policy {
                    PreInitPolicy::Reject => Err(StoreError::NotInitialized),
                    PreInitPolicy::Queue => {
                        let max = self.config.max_queued_actions;
                        if lifecycle.queue.len() >= max {
                            warn!(action = action.type_name(), max, "pre-init queue full");
                            return Err(StoreError::QueueFull(max));
                        }
                        trace!(action = action.type_name(), "queued until initialized");
                        lifecycle.queue.push_back(action);
                        Ok(())
                    }
                };
            }
        }

        let failures = self.deliver(&action);
        if failures.is_empty() {
            Ok(())
        } else {
            Err(StoreError::Dispatch(failures))
        }
    }

    /// Actions waiting for `initialize()`.
    pub fn queued_count(&self) -> usize {
        self.lifecycle.lock().queue.len()
    }

    /// Run middleware and send the action to every feature.
    fn deliver(&self, action: &Action) -> Vec<FeatureFailure> {
        let middleware: Vec<Arc<dyn Middleware>> = self.middleware.read().clone();
        if !middleware.iter().all(|m| m.may_dispatch(action)) {
            debug!(action = action.type_name(), "action vetoed by middleware");
            return Vec::new();
        }
        for m in &middleware {
            m.before_dispatch(action);
        }

        let features: Vec<Arc<dyn AnyFeature>> = self.features.read().features.clone();
        let mut failures = Vec::new();
        let mut changed = 0usize;
        for feature in &features {
            match feature.receive_dispatch(action) {
                Ok(true) => changed += 1,
                Ok(false) => {}
                Err(failure) => failures.push(failure),
            }
        }

        for m in middleware.iter().rev() {
            m.after_dispatch(action, &failures);
        }
        trace!(
            action = action.type_name(),
            features = features.len(),
            changed,
            failed = failures.len(),
            "dispatched"
        );
        failures
    }

    // --- Snapshots ---

    /// Capture every feature's current state reference.
    pub fn snapshot(&self) -> StoreSnapshot {
        let features: Vec<Arc<dyn AnyFeature>> = self.features.read().features.clone();
        let entries = features
            .iter()
            .map(|f| SnapshotEntry {
                feature: f.name().to_string(),
                state_type: f.state_type(),
                version: f.version(),
                state: f.state_any(),
            })
            .collect();
        StoreSnapshot { entries }
    }

    /// Restore every feature named in `snapshot`, bypassing reducers.
    ///
    /// All entries are validated before any state is replaced.
    pub fn restore(&self, snapshot: &StoreSnapshot) -> Result<()> {
        let mut targets = Vec::with_capacity(snapshot.len());
        for entry in snapshot.iter() {
            let feature = self.get_feature(&entry.feature)?;
            if feature.state_type() != entry.state_type {
                return Err(StoreError::StateTypeMismatch {
                    feature: entry.feature.clone(),
                    expected: feature.state_type().name,
                });
            }
            targets.push((feature, Arc::clone(&entry.state)));
        }

        for (feature, state) in targets {
            feature.restore_state_any(state)?;
        }
        debug!(features = snapshot.len(), "snapshot restored");
        Ok(())
    }

    /// JSON object of `{ feature: state }` for features with a JSON codec.
    pub fn export_json(&self) -> Result<serde_json::Value> {
        let features: Vec<Arc<dyn AnyFeature>> = self.features.read().features.clone();
        let mut map = serde_json::Map::new();
        for feature in &features {
            match feature.state_json() {
                Ok(value) => {
                    map.insert(feature.name().to_string(), value);
                }
                Err(StoreError::NoCodec(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(serde_json::Value::Object(map))
    }

    /// Restore features from an `export_json` object.
    pub fn import_json(&self, value: serde_json::Value) -> Result<()> {
        let serde_json::Value::Object(map) = value else {
            return Err(StoreError::Deserialization(
                "expected an object keyed by feature name".to_string(),
            ));
        };
        for (name, state) in map {
            self.get_feature(&name)?.restore_json(state)?;
        }
        Ok(())
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}
