//! Core types shared by features, reducers and the store.

use serde::{Deserialize, Serialize};
use std::any::{Any, TypeId};
use std::fmt;
use std::sync::Arc;

/// An opaque, immutable action value.
///
/// Actions are identified only by their runtime type. Cloning shares the
/// payload; nothing can mutate it after construction.
#[derive(Clone)]
pub struct Action {
    payload: Arc<dyn Any + Send + Sync>,
    type_name: &'static str,
}

impl Action {
    /// Wrap a value. An `Action` passed in is returned as-is, not nested.
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        if let Some(action) = (&value as &dyn Any).downcast_ref::<Action>() {
            return action.clone();
        }
        Self {
            payload: Arc::new(value),
            type_name: std::any::type_name::<T>(),
        }
    }

    /// Whether the payload is a `T`.
    pub fn is<T: Any>(&self) -> bool {
        self.payload.is::<T>()
    }

    /// Borrow the payload as a `T`, if it is one.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.payload.downcast_ref::<T>()
    }

    /// Name of the payload type, for logging.
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// `TypeId` of the payload.
    pub fn type_id(&self) -> TypeId {
        (*self.payload).type_id()
    }
}

impl fmt::Debug for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Action({})", self.type_name)
    }
}

/// Runtime tag for a feature's state type.
///
/// Lets the store check state round-trips without knowing `S`.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct StateType {
    pub id: TypeId,
    pub name: &'static str,
}

impl StateType {
    /// Tag for `S`.
    pub fn of<S: Any>() -> Self {
        Self {
            id: TypeId::of::<S>(),
            name: std::any::type_name::<S>(),
        }
    }
}

impl fmt::Debug for StateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StateType({})", self.name)
    }
}

impl fmt::Display for StateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// Per-feature commit counter.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub struct Version(pub u64);

impl fmt::Debug for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Version({})", self.0)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Version {
    /// The following version.
    pub fn next(self) -> Self {
        Version(self.0 + 1)
    }
}

/// Type-erased, shared state value.
pub type AnyState = Arc<dyn Any + Send + Sync>;
