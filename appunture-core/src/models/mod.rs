mod entity;
mod image;
mod operation;

pub use entity::{EntityType, OperationKind, OperationStatus, TargetKey};
pub use image::{ImageTarget, NewImageUpload, PendingImage, UploadProgress};
pub use operation::{Delivery, NewOperation, OperationId, PendingOperation};
