//! Error types for the state store.

use std::fmt;
use thiserror::Error;

/// Failure raised by a reducer while folding an action into state.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct ReduceError(pub String);

impl ReduceError {
    /// Build an error from a message.
    pub fn new(message: impl Into<String>) -> Self {
        ReduceError(message.into())
    }
}

impl From<&str> for ReduceError {
    fn from(message: &str) -> Self {
        ReduceError(message.to_string())
    }
}

impl From<String> for ReduceError {
    fn from(message: String) -> Self {
        ReduceError(message)
    }
}

/// One feature's failure during a broadcast dispatch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FeatureFailure {
    pub feature: String,
    /// Position of the failing reducer in the feature's chain.
    pub reducer_index: usize,
    pub source: ReduceError,
}

impl fmt::Display for FeatureFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (reducer #{}): {}",
            self.feature, self.reducer_index, self.source
        )
    }
}

/// Main error type for store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(&'static str),

    #[error("Feature already registered: {0}")]
    DuplicateFeature(String),

    #[error("Feature not found: {0}")]
    FeatureNotFound(String),

    #[error("State type mismatch for {feature}: expected {expected}")]
    StateTypeMismatch {
        feature: String,
        expected: &'static str,
    },

    #[error("Reducer #{reducer_index} of {feature} failed: {source}")]
    Reducer {
        feature: String,
        reducer_index: usize,
        #[source]
        source: ReduceError,
    },

    #[error("Dispatch failed in {} feature(s): {}", .0.len(), join_failures(.0))]
    Dispatch(Vec<FeatureFailure>),

    #[error("Store not initialized")]
    NotInitialized,

    #[error("Store already initialized")]
    AlreadyInitialized,

    #[error("Pre-initialization queue is full ({0} actions)")]
    QueueFull(usize),

    #[error("Feature {0} has no JSON codec")]
    NoCodec(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),
}

impl From<FeatureFailure> for StoreError {
    fn from(failure: FeatureFailure) -> Self {
        StoreError::Reducer {
            feature: failure.feature,
            reducer_index: failure.reducer_index,
            source: failure.source,
        }
    }
}

fn join_failures(failures: &[FeatureFailure]) -> String {
    failures
        .iter()
        .map(|f| f.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
