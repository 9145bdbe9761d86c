use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use super::entity::{EntityType, OperationStatus, TargetKey};
use super::operation::{Delivery, OperationId};

/// Entity that receives an uploaded image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageTarget {
    Profile,
    Point(String),
}

impl ImageTarget {
    pub fn entity_type(&self) -> EntityType {
        match self {
            ImageTarget::Profile => EntityType::ProfileImage,
            ImageTarget::Point(_) => EntityType::PointImage,
        }
    }

    pub fn target_id(&self) -> &str {
        match self {
            ImageTarget::Profile => "me",
            ImageTarget::Point(id) => id,
        }
    }
}

/// An image upload requested by the user.
#[derive(Debug, Clone, PartialEq)]
pub struct NewImageUpload {
    pub target: ImageTarget,
    pub file_path: PathBuf,
    pub content_type: Option<String>,
}

impl NewImageUpload {
    pub fn new(target: ImageTarget, file_path: impl Into<PathBuf>) -> Self {
        let file_path = file_path.into();
        let content_type = guess_content_type(&file_path).map(str::to_string);
        Self {
            target,
            file_path,
            content_type,
        }
    }
}

/// A queued image upload. The binary goes to storage first, then the URL is
/// attached to the target entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingImage {
    pub id: OperationId,
    pub sequence: u64,
    pub entity_type: EntityType,
    pub target_id: String,
    pub file_path: PathBuf,
    pub content_type: Option<String>,
    /// Set once the binary is stored remotely, so a retry only repeats the attach step.
    pub uploaded_url: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(flatten)]
    pub delivery: Delivery,
}

impl PendingImage {
    pub fn status(&self) -> OperationStatus {
        self.delivery.status
    }

    pub fn target(&self) -> TargetKey {
        TargetKey::new(self.entity_type, self.target_id.clone())
    }

    pub fn file_name(&self) -> String {
        self.file_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| format!("{}.bin", self.id))
    }
}

impl fmt::Display for PendingImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "upload {} -> {}:{} [{}]",
            self.file_path.display(),
            self.entity_type,
            self.target_id,
            self.delivery.status
        )
    }
}

/// Upload progress of one image, in percent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct UploadProgress {
    pub id: OperationId,
    pub percent: u8,
}

fn guess_content_type(path: &std::path::Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "jpg" | "jpeg" => Some("image/jpeg"),
        "png" => Some("image/png"),
        "webp" => Some("image/webp"),
        "gif" => Some("image/gif"),
        "heic" => Some("image/heic"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_target_mapping() {
        assert_eq!(ImageTarget::Profile.entity_type(), EntityType::ProfileImage);
        assert_eq!(ImageTarget::Profile.target_id(), "me");

        let point = ImageTarget::Point("LI4".to_string());
        assert_eq!(point.entity_type(), EntityType::PointImage);
        assert_eq!(point.target_id(), "LI4");
    }

    #[test]
    fn test_content_type_guess() {
        let upload = NewImageUpload::new(ImageTarget::Profile, "/tmp/avatar.JPG");
        assert_eq!(upload.content_type.as_deref(), Some("image/jpeg"));

        let upload = NewImageUpload::new(ImageTarget::Profile, "/tmp/avatar");
        assert!(upload.content_type.is_none());
    }
}
