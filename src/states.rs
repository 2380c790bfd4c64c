//! Shared state machine for workflow and task executions.
//!
//! Both record kinds move through the same shape:
//! `IDLE -> RUNNING -> {SUCCESS, ERROR}`. The terminal states accept no
//! further transitions from this crate.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionState {
    Idle,
    Running,
    Success,
    Error,
}

impl ExecutionState {
    /// Persisted string form, matching the serde representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionState::Idle => "IDLE",
            ExecutionState::Running => "RUNNING",
            ExecutionState::Success => "SUCCESS",
            ExecutionState::Error => "ERROR",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ExecutionState::Success | ExecutionState::Error)
    }

    /// Whether a normal (non-forced) transition into `next` is legal.
    /// The fault handler bypasses this check when forcing `ERROR`.
    pub fn can_transition_to(&self, next: ExecutionState) -> bool {
        match self {
            ExecutionState::Idle => matches!(
                next,
                ExecutionState::Running | ExecutionState::Success | ExecutionState::Error
            ),
            ExecutionState::Running => next.is_terminal(),
            ExecutionState::Success | ExecutionState::Error => false,
        }
    }
}

impl fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutionState {
    type Err = UnknownState;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "IDLE" => Ok(ExecutionState::Idle),
            "RUNNING" => Ok(ExecutionState::Running),
            "SUCCESS" => Ok(ExecutionState::Success),
            "ERROR" => Ok(ExecutionState::Error),
            other => Err(UnknownState(other.to_string())),
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown execution state: {0}")]
pub struct UnknownState(pub String);
