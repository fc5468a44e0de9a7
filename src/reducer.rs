//! Reducers: pure predicate + transform pairs.

use crate::error::ReduceError;
use crate::types::Action;
use std::any::Any;
use std::marker::PhantomData;
use std::sync::Arc;

/// A pure state transform selected by action.
///
/// `reduce` must not touch the store or its features and must return the
/// same result for the same inputs. Returning a clone of `state` means the
/// reducer made no change; any freshly allocated `Arc` counts as a change,
/// even when it compares equal to the old value.
pub trait Reducer<S>: Send + Sync {
    /// Whether this reducer handles `action`.
    fn should_apply(&self, action: &Action) -> bool;

    /// Compute the next state.
    fn reduce(&self, state: &Arc<S>, action: &Action) -> Result<Arc<S>, ReduceError>;
}

impl<S, R: Reducer<S> + ?Sized> Reducer<S> for Arc<R> {
    fn should_apply(&self, action: &Action) -> bool {
        (**self).should_apply(action)
    }

    fn reduce(&self, state: &Arc<S>, action: &Action) -> Result<Arc<S>, ReduceError> {
        (**self).reduce(state, action)
    }
}

/// Reducer for a single concrete action type `A`.
///
/// Applies whenever the action payload is an `A` and always commits a new
/// state allocation.
pub struct ActionReducer<A, S, F> {
    reduce: F,
    _marker: PhantomData<fn(&S, &A) -> S>,
}

impl<A, S, F> ActionReducer<A, S, F>
where
    A: Any,
    F: Fn(&S, &A) -> S + Send + Sync,
{
    /// Wrap a transform for actions of type `A`.
    pub fn new(reduce: F) -> Self {
        Self {
            reduce,
            _marker: PhantomData,
        }
    }
}

impl<A, S, F> Reducer<S> for ActionReducer<A, S, F>
where
    A: Any,
    F: Fn(&S, &A) -> S + Send + Sync,
{
    fn should_apply(&self, action: &Action) -> bool {
        action.is::<A>()
    }

    fn reduce(&self, state: &Arc<S>, action: &Action) -> Result<Arc<S>, ReduceError> {
        let typed = action.downcast_ref::<A>().ok_or_else(|| {
            ReduceError::new(format!(
                "expected {}, got {}",
                std::any::type_name::<A>(),
                action.type_name()
            ))
        })?;
        Ok(Arc::new((self.reduce)(state, typed)))
    }
}

/// Reducer built from a predicate closure and a fallible transform closure.
pub struct FnReducer<P, F> {
    predicate: P,
    reduce: F,
}

impl<P, F> FnReducer<P, F> {
    /// Pair an applicability check with a fallible transform.
    pub fn new(predicate: P, reduce: F) -> Self {
        Self { predicate, reduce }
    }
}

impl<S, P, F> Reducer<S> for FnReducer<P, F>
where
    P: Fn(&Action) -> bool + Send + Sync,
    F: Fn(&Arc<S>, &Action) -> Result<Arc<S>, ReduceError> + Send + Sync,
{
    fn should_apply(&self, action: &Action) -> bool {
        (self.predicate)(action)
    }

    fn reduce(&self, state: &Arc<S>, action: &Action) -> Result<Arc<S>, ReduceError> {
        (self.reduce)(state, action)
    }
}
