//! Audit trail models
//!
//! The audit trail records actions taken against an entity. Quantities live in
//! the movement ledger.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kinds of entity that carry an audit trail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Intake,
    Dispatch,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Intake => "intake",
            EntityType::Dispatch => "dispatch",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "intake" => Some(EntityType::Intake),
            "dispatch" => Some(EntityType::Dispatch),
            _ => None,
        }
    }
}

impl std::fmt::Display for EntityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntityType::Intake => write!(f, "Intake"),
            EntityType::Dispatch => write!(f, "Dispatch"),
        }
    }
}

/// Actions recorded against an entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Created,
    Confirmed,
    Adjusted,
    Opened,
    Completed,
    Annulled,
    /// A PIN check failed; no state changed
    PinRejected,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Created => "created",
            AuditAction::Confirmed => "confirmed",
            AuditAction::Adjusted => "adjusted",
            AuditAction::Opened => "opened",
            AuditAction::Completed => "completed",
            AuditAction::Annulled => "annulled",
            AuditAction::PinRejected => "pin_rejected",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "created" => Some(AuditAction::Created),
            "confirmed" => Some(AuditAction::Confirmed),
            "adjusted" => Some(AuditAction::Adjusted),
            "opened" => Some(AuditAction::Opened),
            "completed" => Some(AuditAction::Completed),
            "annulled" => Some(AuditAction::Annulled),
            "pin_rejected" => Some(AuditAction::PinRejected),
            _ => None,
        }
    }
}

/// The authenticated caller of a workflow operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: Uuid,
    /// Origin address of the request, when known
    pub ip: Option<String>,
}

impl Actor {
    pub fn new(id: Uuid, ip: Option<String>) -> Self {
        Self { id, ip }
    }
}

/// Audit row produced by a workflow transition, not yet persisted
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditRecord {
    pub entity_type: EntityType,
    pub entity_id: Uuid,
    pub action: AuditAction,
    pub detail: Option<serde_json::Value>,
}

impl AuditRecord {
    pub fn new(entity_type: EntityType, entity_id: Uuid, action: AuditAction) -> Self {
        Self {
            entity_type,
            entity_id,
            action,
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: serde_json::Value) -> Self {
        self.detail = Some(detail);
        self
    }
}

/// A persisted audit trail entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: Uuid,
    pub entity_type: EntityType,
    pub entity_id: Uuid,
    pub action: AuditAction,
    pub actor_id: Uuid,
    pub ip: Option<String>,
    pub detail: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}
