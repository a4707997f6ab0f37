//! Trigger evaluation types.
//!
//! A trigger is polled by the host on an interval. Each evaluation receives the
//! [`TriggerState`] persisted by the previous one and returns an
//! [`Evaluation`]: the state to persist next, plus at most one
//! [`Execution`] to start.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Key-value state persisted by the host between trigger evaluations.
///
/// The host guarantees at most one concurrent evaluation per trigger instance,
/// so the state is passed by value rather than shared.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TriggerState(BTreeMap<String, String>);

impl TriggerState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    /// Builder-style setter.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(key, value);
        self
    }
}

/// An execution the host should start, with the variables it exposes to the
/// flow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Execution {
    pub variables: JsonValue,
}

impl Execution {
    #[must_use]
    pub fn new(variables: JsonValue) -> Self {
        Self { variables }
    }
}

/// Result of one trigger evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    /// Execution to start, if the poll detected something.
    pub execution: Option<Execution>,
    /// State to persist for the next evaluation.
    pub state: TriggerState,
}

impl Evaluation {
    /// An evaluation that starts nothing and persists `state`.
    #[must_use]
    pub fn idle(state: TriggerState) -> Self {
        Self {
            execution: None,
            state,
        }
    }

    #[must_use]
    pub fn fire(execution: Execution, state: TriggerState) -> Self {
        Self {
            execution: Some(execution),
            state,
        }
    }
}
