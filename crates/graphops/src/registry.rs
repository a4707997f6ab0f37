//! Task and trigger registration.
//!
//! Plugins register tasks, triggers, init hooks and shutdown hooks through
//! static entries collected by the [`inventory`] crate at link time. The
//! attribute macros in `graphops-macro` generate the entries; the host looks
//! them up through [`crate::tasks`], [`crate::triggers`] and friends.
//!
//! Every entry carries a `__sealed: Sealed` field so that only generated code
//! can construct it.

use std::{future::Future, pin::Pin};

use crate::{Context, trigger::Evaluation, trigger::TriggerState};

/// Boxed future returned by every registered handler.
pub type BoxFuture<T> = Pin<Box<dyn Future<Output = anyhow::Result<T>> + Send + 'static>>;

/// Type-erased task handler: JSON input bytes in, JSON output bytes out.
pub type TaskHandlerFn = fn(Context, Vec<u8>) -> BoxFuture<Vec<u8>>;

/// Type-erased trigger handler: JSON input bytes and the persisted state in,
/// the evaluation out.
pub type TriggerHandlerFn = fn(Context, Vec<u8>, TriggerState) -> BoxFuture<Evaluation>;

/// Async hook run once when the plugin is loaded.
pub type InitFn = fn() -> BoxFuture<()>;

/// Synchronous hook run when the plugin is unloaded.
pub type ShutdownFn = fn();

/// Marker preventing construction of entries outside generated code.
#[doc(hidden)]
#[derive(Debug, Clone, Copy)]
pub struct Sealed(pub(crate) ());

/// A task the host can run.
#[derive(Debug)]
pub struct TaskEntry {
    /// Unique id the host addresses the task by (e.g. "upload").
    pub id: &'static str,
    /// Display name from the doc comment heading.
    pub name: &'static str,
    pub description: &'static str,
    pub tags: &'static [&'static str],
    /// Returns the JSON Schema of the task input.
    pub input_schema_fn: fn() -> String,
    /// Returns the JSON Schema of the task output.
    pub output_schema_fn: fn() -> String,
    pub handler: TaskHandlerFn,
    #[doc(hidden)]
    pub __sealed: Sealed,
}

inventory::collect!(TaskEntry);

/// A polling trigger the host evaluates on an interval.
#[derive(Debug)]
pub struct TriggerEntry {
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub tags: &'static [&'static str],
    pub input_schema_fn: fn() -> String,
    pub handler: TriggerHandlerFn,
    #[doc(hidden)]
    pub __sealed: Sealed,
}

inventory::collect!(TriggerEntry);

/// Plugin initialization hook. Hooks run in submission order.
#[derive(Debug)]
pub struct InitEntry {
    pub name: &'static str,
    pub handler: InitFn,
    #[doc(hidden)]
    pub __sealed: Sealed,
}

inventory::collect!(InitEntry);

/// Plugin shutdown hook. Hooks run in submission order.
#[derive(Debug)]
pub struct ShutdownEntry {
    pub name: &'static str,
    pub handler: ShutdownFn,
    #[doc(hidden)]
    pub __sealed: Sealed,
}

inventory::collect!(ShutdownEntry);
