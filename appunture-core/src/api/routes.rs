//! Mapping of queued records to REST requests.

use serde_json::{json, Value};
use std::fmt;

use super::ApiError;
use crate::models::{EntityType, OperationKind, PendingImage, PendingOperation};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Method::Get => write!(f, "GET"),
            Method::Post => write!(f, "POST"),
            Method::Put => write!(f, "PUT"),
            Method::Delete => write!(f, "DELETE"),
        }
    }
}

/// A request relative to the API base URL.
#[derive(Debug, Clone, PartialEq)]
pub struct Route {
    pub method: Method,
    pub path: String,
    pub body: Option<Value>,
}

impl Route {
    fn new(method: Method, path: String, body: Option<Value>) -> Self {
        Self { method, path, body }
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.path)
    }
}

/// Builds the request that replays `op`.
pub fn operation_route(op: &PendingOperation) -> Result<Route, ApiError> {
    let collection = match op.entity_type {
        EntityType::Point => "/points",
        EntityType::Symptom => "/symptoms",
        EntityType::Favorite => return favorite_route(op),
        EntityType::Profile => return profile_route(op),
        EntityType::ProfileImage | EntityType::PointImage => {
            return Err(unsupported(op));
        }
    };

    match op.kind {
        OperationKind::Create => Ok(Route::new(
            Method::Post,
            collection.to_string(),
            Some(object_payload(op)?),
        )),
        OperationKind::Update => Ok(Route::new(
            Method::Put,
            format!("{}/{}", collection, segment(&op.target_id)?),
            Some(object_payload(op)?),
        )),
        OperationKind::Delete => Ok(Route::new(
            Method::Delete,
            format!("{}/{}", collection, segment(&op.target_id)?),
            None,
        )),
    }
}

/// Builds the request that links an uploaded image to its entity.
pub fn attach_route(image: &PendingImage, url: &str) -> Result<Route, ApiError> {
    match image.entity_type {
        EntityType::ProfileImage => Ok(Route::new(
            Method::Put,
            "/auth/profile".to_string(),
            Some(json!({ "profileImageUrl": url })),
        )),
        EntityType::PointImage => Ok(Route::new(
            Method::Post,
            format!("/points/{}/images", segment(&image.target_id)?),
            Some(json!({ "imageUrls": [url] })),
        )),
        other => Err(ApiError::Unsupported {
            entity: other,
            kind: OperationKind::Update,
        }),
    }
}

/// Storage folder an image is uploaded into.
pub fn upload_folder(entity_type: EntityType) -> &'static str {
    match entity_type {
        EntityType::PointImage => "points",
        _ => "profiles",
    }
}

fn favorite_route(op: &PendingOperation) -> Result<Route, ApiError> {
    let path = format!("/auth/favorites/{}", segment(&op.target_id)?);
    match op.kind {
        OperationKind::Create => Ok(Route::new(Method::Post, path, None)),
        OperationKind::Delete => Ok(Route::new(Method::Delete, path, None)),
        OperationKind::Update => Err(unsupported(op)),
    }
}

/// One page of the signed-in user's favorites.
pub fn favorites_page_route(page: usize, limit: usize) -> Route {
    Route::new(
        Method::Get,
        format!("/auth/favorites?page={}&limit={}", page, limit),
        None,
    )
}

fn profile_route(op: &PendingOperation) -> Result<Route, ApiError> {
    match op.kind {
        OperationKind::Update => Ok(Route::new(
            Method::Put,
            "/auth/profile".to_string(),
            Some(object_payload(op)?),
        )),
        _ => Err(unsupported(op)),
    }
}

fn object_payload(op: &PendingOperation) -> Result<Value, ApiError> {
    if op.payload.is_object() {
        Ok(op.payload.clone())
    } else {
        Err(ApiError::InvalidPayload(format!(
            "{} {} expects a JSON object",
            op.kind, op.entity_type
        )))
    }
}

fn segment(id: &str) -> Result<String, ApiError> {
    if id.trim().is_empty() {
        return Err(ApiError::InvalidPayload("missing target id".to_string()));
    }
    Ok(urlencoding::encode(id).into_owned())
}

fn unsupported(op: &PendingOperation) -> ApiError {
    ApiError::Unsupported {
        entity: op.entity_type,
        kind: op.kind,
    }
}
