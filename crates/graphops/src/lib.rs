//! # Graphops Plugin Framework
//!
//! This crate is the contract between Graphops plugins and the workflow
//! orchestrator that runs them. Plugins define **tasks** (render input, call a
//! remote API, return an output record) and **triggers** (polled on an
//! interval, optionally start an execution). The orchestrator discovers them
//! through a link-time registry and invokes them with JSON.
//!
//! ## Defining a Task
//!
//! ```ignore
//! /// # Delete Item
//! ///
//! /// Deletes a drive item.
//! ///
//! /// ## Tags
//! /// - files
//! #[task]
//! async fn delete(ctx: Context, input: DeleteInput) -> Result<DeleteOutput> {
//!     // ...
//! }
//! ```
//!
//! The first H1 heading is the display name, optionally followed by
//! `(ID: custom_id)`; the paragraph after it is the description.
//!
//! ## Defining a Trigger
//!
//! ```ignore
//! /// # New Files
//! ///
//! /// Fires when files appear in a folder.
//! #[trigger]
//! async fn new_files(
//!     ctx: Context,
//!     input: NewFilesInput,
//!     state: TriggerState,
//! ) -> Result<Evaluation> {
//!     // ...
//! }
//! ```
//!
//! The host persists [`Evaluation::state`] and passes it back on the next
//! poll.
//!
//! ## Credentials
//!
//! ```ignore
//! define_credential! {
//!     ApiKey("api") {
//!         /// API key
//!         #[secret]
//!         key: String,
//!         #[optional]
//!         endpoint: Option<String>,
//!     }
//! }
//!
//! let key = ApiKey::get(&ctx)?;
//! ```
//!
//! ## Host Side
//!
//! The host calls [`run_task`] and [`evaluate_trigger`] with a [`Context`]
//! carrying rendered credentials, its [`Storage`] and the resolved
//! [`PluginConfig`].

// Lets macro expansions inside this crate refer to it as `::graphops`.
extern crate self as graphops;

pub mod config;
mod context;
mod credential;
pub mod logging;
mod registry;
mod storage;
mod trigger;

use std::time::Duration;

pub use anyhow::{self, Result, bail, ensure};
pub use config::{ConflictBehavior, PluginConfig};
pub use context::Context;
pub use credential::{CredentialEntry, CredentialError, CredentialFieldSchema};
pub use graphops_macro::{define_credential, init, shutdown, task, trigger};
pub use registry::{TaskEntry, TriggerEntry};
// Full schemars re-export: the JsonSchema derive expands to `schemars::*`
// paths.
pub use schemars;
pub use schemars::JsonSchema;
pub use storage::{MemoryStorage, Storage, StorageError};
pub use tracing::{Level, debug, error, info, span, trace, warn};
pub use trigger::{Evaluation, Execution, TriggerState};

pub mod __private {
    pub use anyhow;
    pub use inventory;
    pub use schemars;
    pub use serde;
    pub use serde_json;

    pub use crate::{
        context::Context,
        credential::{CredentialEntry, CredentialFieldSchema},
        registry::{InitEntry, Sealed, ShutdownEntry, TaskEntry, TriggerEntry},
        trigger::{Evaluation, TriggerState},
    };

    #[inline]
    #[must_use]
    pub const fn sealed() -> Sealed {
        Sealed(())
    }
}

/// Errors raised by the host-facing entry points.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum RegistryError {
    #[error("task '{0}' is not registered")]
    UnknownTask(String),

    #[error("trigger '{0}' is not registered")]
    UnknownTrigger(String),

    #[error("init hook '{name}' failed: {source}")]
    InitFailed {
        name: &'static str,
        #[source]
        source: anyhow::Error,
    },
}

/// All registered tasks.
pub fn tasks() -> impl Iterator<Item = &'static TaskEntry> {
    inventory::iter::<TaskEntry>()
}

/// All registered triggers.
pub fn triggers() -> impl Iterator<Item = &'static TriggerEntry> {
    inventory::iter::<TriggerEntry>()
}

/// All registered credential definitions.
pub fn credentials() -> impl Iterator<Item = &'static CredentialEntry> {
    inventory::iter::<CredentialEntry>()
}

/// Runs the task registered under `id` with JSON `input`, returning JSON
/// output.
///
/// # Errors
///
/// Returns [`RegistryError::UnknownTask`] if no task has that id, or whatever
/// the task itself returns (including input deserialization errors).
pub async fn run_task(id: &str, ctx: Context, input: &[u8]) -> Result<Vec<u8>> {
    let entry = tasks()
        .find(|entry| entry.id == id)
        .ok_or_else(|| RegistryError::UnknownTask(id.to_string()))?;

    debug!(task = entry.id, execution_id = ctx.execution_id(), "running task");
    (entry.handler)(ctx, input.to_vec()).await
}

/// Evaluates the trigger registered under `id`.
///
/// # Errors
///
/// Returns [`RegistryError::UnknownTrigger`] if no trigger has that id, or
/// whatever the trigger itself returns. On error the host keeps the previous
/// state.
pub async fn evaluate_trigger(
    id: &str,
    ctx: Context,
    input: &[u8],
    state: TriggerState,
) -> Result<Evaluation> {
    let entry = triggers()
        .find(|entry| entry.id == id)
        .ok_or_else(|| RegistryError::UnknownTrigger(id.to_string()))?;

    debug!(trigger = entry.id, "evaluating trigger");
    (entry.handler)(ctx, input.to_vec(), state).await
}

/// Polling interval for a trigger instance: the input's `interval_secs` when
/// present and positive, otherwise `[trigger].interval_secs` from the config.
pub fn polling_interval(config: &PluginConfig, input: &serde_json::Value) -> Duration {
    let secs = input
        .get("interval_secs")
        .and_then(serde_json::Value::as_u64)
        .filter(|secs| *secs > 0)
        .unwrap_or(config.trigger.interval_secs);
    Duration::from_secs(secs)
}

/// Runs every registered init hook in order, stopping at the first failure.
///
/// # Errors
///
/// Returns [`RegistryError::InitFailed`] naming the failing hook.
pub async fn run_init_hooks() -> Result<(), RegistryError> {
    for entry in inventory::iter::<registry::InitEntry>() {
        if let Err(source) = (entry.handler)().await {
            error!(hook = entry.name, "init hook failed: {source:?}");
            return Err(RegistryError::InitFailed {
                name: entry.name,
                source,
            });
        }
    }
    Ok(())
}

/// Runs every registered shutdown hook in order.
pub fn run_shutdown_hooks() {
    for entry in inventory::iter::<registry::ShutdownEntry>() {
        (entry.handler)();
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::HashMap,
        sync::atomic::{AtomicUsize, Ordering},
    };

    use serde::{Deserialize, Serialize};
    use serde_json::json;

    use super::*;

    static INIT_CALLS: AtomicUsize = AtomicUsize::new(0);
    static SHUTDOWN_CALLS: AtomicUsize = AtomicUsize::new(0);

    define_credential! {
        TestApiCredential("graphops_test_api") {
            /// Key used to call the test API
            #[secret]
            api_key: String,
            #[optional]
            endpoint: Option<String>,
        }
    }

    #[derive(Debug, Deserialize, JsonSchema)]
    struct GreetInput {
        name: String,
    }

    #[derive(Debug, Serialize, Deserialize, JsonSchema, PartialEq)]
    struct GreetOutput {
        message: String,
        execution_id: String,
    }

    /// # Greet (ID: graphops_test_greet)
    ///
    /// Greets a user.
    ///
    /// ## Tags
    /// - greeting
    #[task]
    async fn greet(ctx: Context, input: GreetInput) -> Result<GreetOutput> {
        ensure!(!input.name.is_empty(), "name must not be empty");
        Ok(GreetOutput {
            message: format!("Hello, {}!", input.name),
            execution_id: ctx.execution_id().to_string(),
        })
    }

    #[derive(Debug, Deserialize, JsonSchema)]
    struct CounterInput {
        step: u64,
    }

    /// # Counter (ID: graphops_test_counter)
    ///
    /// Fires every time the stored counter crosses a multiple of three.
    #[trigger]
    async fn counter(
        _ctx: Context,
        input: CounterInput,
        mut state: TriggerState,
    ) -> Result<Evaluation> {
        let current: u64 = state.get("count").map_or(Ok(0), str::parse)?;
        let next = current + input.step;
        state.set("count", next.to_string());
        if next % 3 == 0 {
            Ok(Evaluation::fire(Execution::new(json!({ "count": next })), state))
        } else {
            Ok(Evaluation::idle(state))
        }
    }

    #[init]
    async fn count_init() -> Result<()> {
        INIT_CALLS.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    #[shutdown]
    fn count_shutdown() {
        SHUTDOWN_CALLS.fetch_add(1, Ordering::SeqCst);
    }

    #[tokio::test]
    async fn test_run_task_round_trips_json() {
        // Arrange
        let ctx = Context::with_metadata("exec-42", "ns", "flow");

        // Act
        let output = run_task("graphops_test_greet", ctx, br#"{"name":"Ada"}"#)
            .await
            .unwrap();

        // Assert
        let output: GreetOutput = serde_json::from_slice(&output).unwrap();
        assert_eq!(
            output,
            GreetOutput {
                message: "Hello, Ada!".to_string(),
                execution_id: "exec-42".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn test_run_task_propagates_task_error() {
        let result = run_task("graphops_test_greet", Context::empty(), br#"{"name":""}"#).await;

        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("name must not be empty")
        );
    }

    #[tokio::test]
    async fn test_run_task_rejects_malformed_input() {
        let result = run_task("graphops_test_greet", Context::empty(), b"{}").await;

        assert!(result.unwrap_err().to_string().contains("missing field `name`"));
    }

    #[tokio::test]
    async fn test_run_unknown_task_returns_registry_error() {
        let err = run_task("nope", Context::empty(), b"{}").await.unwrap_err();

        assert!(matches!(
            err.downcast_ref::<RegistryError>(),
            Some(RegistryError::UnknownTask(id)) if id == "nope"
        ));
    }

    #[tokio::test]
    async fn test_evaluate_trigger_threads_state_between_polls() {
        // Arrange
        let input = br#"{"step":1}"#;
        let mut state = TriggerState::new();
        let mut fired = Vec::new();

        // Act
        for _ in 0..6 {
            let evaluation =
                evaluate_trigger("graphops_test_counter", Context::empty(), input, state)
                    .await
                    .unwrap();
            if let Some(execution) = evaluation.execution {
                fired.push(execution.variables["count"].as_u64().unwrap());
            }
            state = evaluation.state;
        }

        // Assert
        assert_eq!(fired, vec![3, 6]);
        assert_eq!(state.get("count"), Some("6"));
    }

    #[test]
    fn test_registered_entries_expose_metadata_and_schemas() {
        let task = tasks().find(|t| t.id == "graphops_test_greet").unwrap();
        let trigger = triggers().find(|t| t.id == "graphops_test_counter").unwrap();

        assert_eq!(task.name, "Greet");
        assert_eq!(task.description, "Greets a user.");
        assert_eq!(task.tags, &["greeting"]);
        let input_schema: serde_json::Value =
            serde_json::from_str(&(task.input_schema_fn)()).unwrap();
        assert_eq!(input_schema["properties"]["name"]["type"], "string");
        assert_eq!(trigger.name, "Counter");
        let trigger_schema: serde_json::Value =
            serde_json::from_str(&(trigger.input_schema_fn)()).unwrap();
        assert!(trigger_schema["properties"]["step"].is_object());
    }

    #[test]
    fn test_defined_credential_is_registered_and_readable() {
        let entry = credentials()
            .find(|c| c.name == "graphops_test_api")
            .unwrap();
        let mut values = HashMap::new();
        values.insert("api_key".to_string(), "k".to_string());
        let ctx = Context::empty().with_credential("graphops_test_api", values);

        let cred = TestApiCredential::get(&ctx).unwrap();

        assert_eq!(cred.api_key, "k");
        assert!(cred.endpoint.is_none());
        assert_eq!(entry.fields[0].0, "api_key");
        assert!(entry.fields[0].1.secret);
        assert!(!entry.fields[1].1.required);
    }

    #[test]
    fn test_credential_debug_masks_secret_fields() {
        let cred = TestApiCredential {
            api_key: "super-secret".to_string(),
            endpoint: Some("https://api.example.com".to_string()),
        };

        let debug = format!("{cred:?}");

        assert!(!debug.contains("super-secret"));
        assert!(debug.contains("https://api.example.com"));
    }

    #[tokio::test]
    async fn test_lifecycle_hooks_run() {
        run_init_hooks().await.unwrap();
        run_shutdown_hooks();

        assert!(INIT_CALLS.load(Ordering::SeqCst) >= 1);
        assert!(SHUTDOWN_CALLS.load(Ordering::SeqCst) >= 1);
    }

    #[test]
    fn test_polling_interval_prefers_positive_input_value() {
        let config = PluginConfig::default();

        assert_eq!(
            polling_interval(&config, &json!({ "interval_secs": 15 })),
            Duration::from_secs(15)
        );
        assert_eq!(
            polling_interval(&config, &json!({ "interval_secs": 0 })),
            Duration::from_secs(60)
        );
        assert_eq!(polling_interval(&config, &json!({})), Duration::from_secs(60));
    }
}
