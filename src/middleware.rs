//! Dispatch middleware.
//!
//! Middleware sees every action the store accepts, before and after it is
//! broadcast to features. It can veto an action but cannot change it.

use crate::error::FeatureFailure;
use crate::types::Action;
use tracing::{debug, warn};

pub trait Middleware: Send + Sync {
    /// Return false to drop the action before any feature sees it.
    fn may_dispatch(&self, _action: &Action) -> bool {
        true
    }

    fn before_dispatch(&self, _action: &Action) {}

    /// Called once every feature has received the action.
    fn after_dispatch(&self, _action: &Action, _failures: &[FeatureFailure]) {}
}

/// Logs every dispatch through `tracing`.
#[derive(Clone, Copy, Debug, Default)]
pub struct LoggingMiddleware;

impl Middleware for LoggingMiddleware {
    fn before_dispatch(&self, action: &Action) {
        debug!(action = action.type_name(), "dispatch start");
    }

    fn after_dispatch(&self, action: &Action, failures: &[FeatureFailure]) {
        if failures.is_empty() {
            debug!(action = action.type_name(), "dispatch done");
        }
        for failure in failures {
            warn!(action = action.type_name(), %failure, "dispatch failed");
        }
    }
}
