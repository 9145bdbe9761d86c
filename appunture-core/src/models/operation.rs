use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::entity::{EntityType, OperationKind, OperationStatus, TargetKey};

/// Locally generated identifier of a queued record. Never assigned by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationId(Uuid);

impl OperationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for OperationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for OperationId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Delivery bookkeeping shared by every queued record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Delivery {
    pub status: OperationStatus,
    pub attempt_count: u32,
    pub last_error: Option<String>,
    pub last_attempt: Option<DateTime<Utc>>,
}

impl Delivery {
    pub fn new() -> Self {
        Self {
            status: OperationStatus::Pending,
            attempt_count: 0,
            last_error: None,
            last_attempt: None,
        }
    }

    pub(crate) fn begin_attempt(&mut self, at: DateTime<Utc>) {
        self.status = OperationStatus::InFlight;
        self.attempt_count += 1;
        self.last_attempt = Some(at);
    }

    pub(crate) fn retry_later(&mut self, error: String) {
        self.status = OperationStatus::Pending;
        self.last_error = Some(error);
    }

    pub(crate) fn release(&mut self) {
        self.status = OperationStatus::Pending;
    }

    /// Back to pending, returning an attempt that never reached the network.
    pub(crate) fn abandon_attempt(&mut self) {
        self.status = OperationStatus::Pending;
        self.attempt_count = self.attempt_count.saturating_sub(1);
    }

    pub(crate) fn fail(&mut self, error: String) {
        self.status = OperationStatus::Failed;
        self.last_error = Some(error);
    }

    pub(crate) fn reset(&mut self) {
        *self = Self::new();
    }
}

impl Default for Delivery {
    fn default() -> Self {
        Self::new()
    }
}

/// A mutation requested by the user, before it is stored in the operation log.
#[derive(Debug, Clone, PartialEq)]
pub struct NewOperation {
    pub entity_type: EntityType,
    pub kind: OperationKind,
    pub target_id: String,
    pub payload: serde_json::Value,
}

impl NewOperation {
    pub fn new(
        entity_type: EntityType,
        kind: OperationKind,
        target_id: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            entity_type,
            kind,
            target_id: target_id.into(),
            payload,
        }
    }

    pub fn add_favorite(point_id: impl Into<String>) -> Self {
        let point_id = point_id.into();
        let payload = serde_json::json!({ "pointId": point_id, "action": "ADD" });
        Self::new(EntityType::Favorite, OperationKind::Create, point_id, payload)
    }

    pub fn remove_favorite(point_id: impl Into<String>) -> Self {
        let point_id = point_id.into();
        let payload = serde_json::json!({ "pointId": point_id, "action": "REMOVE" });
        Self::new(EntityType::Favorite, OperationKind::Delete, point_id, payload)
    }

    pub fn update_profile(payload: serde_json::Value) -> Self {
        Self::new(EntityType::Profile, OperationKind::Update, "me", payload)
    }
}

/// A queued mutation awaiting delivery to the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingOperation {
    pub id: OperationId,
    pub sequence: u64,
    pub entity_type: EntityType,
    pub kind: OperationKind,
    pub target_id: String,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
    #[serde(flatten)]
    pub delivery: Delivery,
}

impl PendingOperation {
    pub fn status(&self) -> OperationStatus {
        self.delivery.status
    }

    pub fn attempt_count(&self) -> u32 {
        self.delivery.attempt_count
    }

    pub fn last_error(&self) -> Option<&str> {
        self.delivery.last_error.as_deref()
    }

    pub fn target(&self) -> TargetKey {
        TargetKey::new(self.entity_type, self.target_id.clone())
    }
}

impl fmt::Display for PendingOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} [{}]",
            self.kind, self.entity_type, self.target_id, self.delivery.status
        )
    }
}
