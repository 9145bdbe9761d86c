use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Remote resource an operation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Point,
    Symptom,
    Favorite,
    Profile,
    ProfileImage,
    PointImage,
}

impl EntityType {
    /// Returns true for entity types delivered through the image sub-queue.
    pub fn is_image(&self) -> bool {
        matches!(self, EntityType::ProfileImage | EntityType::PointImage)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Point => "point",
            EntityType::Symptom => "symptom",
            EntityType::Favorite => "favorite",
            EntityType::Profile => "profile",
            EntityType::ProfileImage => "profile_image",
            EntityType::PointImage => "point_image",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "point" => Ok(EntityType::Point),
            "symptom" => Ok(EntityType::Symptom),
            "favorite" => Ok(EntityType::Favorite),
            "profile" => Ok(EntityType::Profile),
            "profile_image" => Ok(EntityType::ProfileImage),
            "point_image" => Ok(EntityType::PointImage),
            _ => Err(format!(
                "Invalid entity type '{}'. Valid options: point, symptom, favorite, profile, \
                 profile_image, point_image",
                s
            )),
        }
    }
}

/// Kind of mutation carried by an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Create,
    Update,
    Delete,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationKind::Create => write!(f, "create"),
            OperationKind::Update => write!(f, "update"),
            OperationKind::Delete => write!(f, "delete"),
        }
    }
}

impl FromStr for OperationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "create" => Ok(OperationKind::Create),
            "update" => Ok(OperationKind::Update),
            "delete" => Ok(OperationKind::Delete),
            _ => Err(format!(
                "Invalid operation kind '{}'. Valid options: create, update, delete",
                s
            )),
        }
    }
}

/// Delivery status of a queued record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    Pending,
    InFlight,
    Failed,
    /// Never stored: a record that reaches `Done` is removed from its queue.
    Done,
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationStatus::Pending => write!(f, "pending"),
            OperationStatus::InFlight => write!(f, "in_flight"),
            OperationStatus::Failed => write!(f, "failed"),
            OperationStatus::Done => write!(f, "done"),
        }
    }
}

impl FromStr for OperationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(OperationStatus::Pending),
            "in_flight" => Ok(OperationStatus::InFlight),
            "failed" => Ok(OperationStatus::Failed),
            "done" => Ok(OperationStatus::Done),
            _ => Err(format!("Invalid operation status '{}'", s)),
        }
    }
}

/// Identifies one remote entity. At most one record per target may be in flight.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TargetKey {
    pub entity_type: EntityType,
    pub target_id: String,
}

impl TargetKey {
    pub fn new(entity_type: EntityType, target_id: impl Into<String>) -> Self {
        Self {
            entity_type,
            target_id: target_id.into(),
        }
    }
}

impl fmt::Display for TargetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.entity_type, self.target_id)
    }
}
