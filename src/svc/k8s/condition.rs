//! # Condition module
//!
//! This module provide the condition structure shared by the status of every
//! custom resource and helpers to maintain a list of them.

use chrono::Utc;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

// -----------------------------------------------------------------------------
// Constants

pub const TYPE_SYNCED: &str = "Synced";
pub const TYPE_READY: &str = "Ready";

pub const REASON_RECONCILE_SUCCESS: &str = "ReconcileSuccess";
pub const REASON_RECONCILE_ERROR: &str = "ReconcileError";
pub const REASON_AVAILABLE: &str = "Available";
pub const REASON_DELETING: &str = "Deleting";

// -----------------------------------------------------------------------------
// Status enum

#[derive(JsonSchema, Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Debug)]
pub enum Status {
    True,
    False,
}

// -----------------------------------------------------------------------------
// Condition structure

#[derive(JsonSchema, Serialize, Deserialize, PartialEq, Eq, Clone, Debug)]
pub struct Condition {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(rename = "status")]
    pub status: Status,
    #[serde(rename = "reason")]
    pub reason: String,
    #[serde(rename = "message", default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(rename = "lastTransitionTime")]
    pub last_transition_time: String,
}

impl Condition {
    pub fn new(kind: &str, status: Status, reason: &str, message: Option<String>) -> Self {
        Self {
            kind: kind.to_string(),
            status,
            reason: reason.to_string(),
            message,
            last_transition_time: Utc::now().to_rfc3339(),
        }
    }

    /// the desired state of the resource has been processed
    pub fn reconcile_success() -> Self {
        Self::new(TYPE_SYNCED, Status::True, REASON_RECONCILE_SUCCESS, None)
    }

    /// the desired state of the resource could not be processed
    pub fn reconcile_error(message: String) -> Self {
        Self::new(
            TYPE_SYNCED,
            Status::False,
            REASON_RECONCILE_ERROR,
            Some(message),
        )
    }

    pub fn available() -> Self {
        Self::new(TYPE_READY, Status::True, REASON_AVAILABLE, None)
    }

    pub fn deleting() -> Self {
        Self::new(TYPE_READY, Status::False, REASON_DELETING, None)
    }

    /// returns if both conditions describe the same state, ignoring the
    /// transition time
    pub fn equivalent(&self, other: &Self) -> bool {
        self.kind == other.kind
            && self.status == other.status
            && self.reason == other.reason
            && self.message == other.message
    }
}

// -----------------------------------------------------------------------------
// helpers

/// insert or replace the condition of the same type, the list is left
/// untouched when an equivalent condition is already present
pub fn set(conditions: &mut Vec<Condition>, condition: Condition) {
    match conditions.iter_mut().find(|c| c.kind == condition.kind) {
        Some(current) if current.equivalent(&condition) => {}
        Some(current) => *current = condition,
        None => conditions.push(condition),
    }
}

/// returns the condition of the given type, if any
pub fn get<'a>(conditions: &'a [Condition], kind: &str) -> Option<&'a Condition> {
    conditions.iter().find(|c| c.kind == kind)
}
