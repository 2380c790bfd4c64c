//! Action contract and the registry that resolves task descriptors to
//! runnable actions.
//!
//! The registry is an explicit, injected mapping from action-type identifiers
//! to constructors; nothing here is process-global. Synchronous vs.
//! asynchronous classification is a property of the declared action type and
//! is resolved before invocation.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::messages::TaskRequest;

/// Expected action-level failure carrying an opaque detail. Recovered at the
/// workflow level as a normal `ERROR` outcome, never escalated to the fault
/// handler.
#[derive(Debug, Error)]
#[error("action failed: {detail}")]
pub struct ActionError {
    pub detail: String,
}

impl ActionError {
    pub fn new(detail: impl Into<String>) -> Self {
        Self {
            detail: detail.into(),
        }
    }
}

/// Whether an action completes within the dispatch call or only starts
/// out-of-band work that finishes later.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    Synchronous,
    Asynchronous,
}

/// The unit of work a task performs.
#[async_trait]
pub trait Action: Send + Sync {
    async fn run(&self) -> Result<Value, ActionError>;
}

/// Errors raised while resolving a task descriptor to an action. Unlike
/// [`ActionError`] these are not part of normal workflow progress; the
/// dispatcher escalates them to the fault handler.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("unknown action type: {0}")]
    UnknownAction(String),
    #[error("invalid parameters for action {action}: {detail}")]
    InvalidParams { action: String, detail: String },
}

type Constructor =
    Box<dyn Fn(&TaskRequest) -> Result<Box<dyn Action>, RegistryError> + Send + Sync>;

struct Entry {
    kind: ActionKind,
    construct: Constructor,
}

/// An action instance bound to one task descriptor, plus its execution mode.
pub struct ResolvedAction {
    pub kind: ActionKind,
    pub action: Box<dyn Action>,
}

/// Injected action factory mapping action-type identifiers to constructors.
#[derive(Default)]
pub struct ActionRegistry {
    entries: HashMap<String, Entry>,
}

impl ActionRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry pre-populated with the standard leaf actions.
    pub fn with_std_actions() -> Self {
        let mut registry = Self::new();
        registry.register("std.echo", ActionKind::Synchronous, |request| {
            let output = request
                .task_dsl
                .params
                .get("output")
                .cloned()
                .ok_or_else(|| RegistryError::InvalidParams {
                    action: "std.echo".to_string(),
                    detail: "missing 'output' parameter".to_string(),
                })?;
            Ok(Box::new(EchoAction { output }) as Box<dyn Action>)
        });
        registry
    }

    pub fn register<F>(&mut self, name: &str, kind: ActionKind, construct: F)
    where
        F: Fn(&TaskRequest) -> Result<Box<dyn Action>, RegistryError> + Send + Sync + 'static,
    {
        self.entries.insert(
            name.to_string(),
            Entry {
                kind,
                construct: Box::new(construct),
            },
        );
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn kind_of(&self, name: &str) -> Option<ActionKind> {
        self.entries.get(name).map(|entry| entry.kind)
    }

    /// Produce a runnable action bound to the request's declared action type
    /// and parameters.
    pub fn resolve(&self, request: &TaskRequest) -> Result<ResolvedAction, RegistryError> {
        let name = request.action_name();
        let entry = self
            .entries
            .get(name)
            .ok_or_else(|| RegistryError::UnknownAction(name.to_string()))?;
        let action = (entry.construct)(request)?;
        Ok(ResolvedAction {
            kind: entry.kind,
            action,
        })
    }
}

/// Returns its declared output unchanged.
pub struct EchoAction {
    pub output: Value,
}

#[async_trait]
impl Action for EchoAction {
    async fn run(&self) -> Result<Value, ActionError> {
        Ok(self.output.clone())
    }
}
