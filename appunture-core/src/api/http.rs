//! reqwest implementation of [`RemoteApi`] for the Appunture REST backend.

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use std::time::Duration;

use super::routes::{
    attach_route, favorites_page_route, operation_route, upload_folder, Method, Route,
};
use super::{ApiError, ProgressFn, RemoteApi};
use crate::models::{PendingImage, PendingOperation};

/// Default per-request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

const UPLOAD_CHUNK: usize = 16 * 1024;

const FAVORITES_PAGE_SIZE: usize = 100;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UploadResponse {
    #[serde(alias = "url")]
    file_url: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FavoritesPage {
    #[serde(default)]
    points: Vec<PointRef>,
    #[serde(default)]
    has_more: bool,
}

#[derive(Debug, Deserialize)]
struct PointRef {
    id: serde_json::Value,
}

impl PointRef {
    fn into_id(self) -> Result<String, ApiError> {
        match self.id {
            serde_json::Value::String(id) => Ok(id),
            serde_json::Value::Number(id) => Ok(id.to_string()),
            other => Err(ApiError::InvalidPayload(format!(
                "Unexpected point id in favorites: {}",
                other
            ))),
        }
    }
}

/// HTTP client for the Appunture API.
#[derive(Debug, Clone)]
pub struct HttpApiClient {
    base_url: String,
    token: Option<String>,
    client: reqwest::Client,
}

impl HttpApiClient {
    /// Creates a client for `base_url` (for example `https://host/api`).
    pub fn new(
        base_url: impl Into<String>,
        token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ApiError::Network(e.to_string()))?;

        Ok(Self {
            base_url: base_url.into(),
            token,
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn build_url(&self, path: &str) -> String {
        let base_url = if !self.base_url.starts_with("http://")
            && !self.base_url.starts_with("https://")
        {
            format!("http://{}", self.base_url)
        } else {
            self.base_url.clone()
        };

        format!("{}{}", base_url.trim_end_matches('/'), path)
    }

    /// URL on the server origin, outside the `/api` prefix.
    fn build_origin_url(&self, path: &str) -> String {
        let api_root = self.build_url("");
        let origin = api_root.strip_suffix("/api").unwrap_or(&api_root);
        format!("{}{}", origin, path)
    }

    fn request(&self, method: Method, url: &str) -> reqwest::RequestBuilder {
        let builder = match method {
            Method::Get => self.client.get(url),
            Method::Post => self.client.post(url),
            Method::Put => self.client.put(url),
            Method::Delete => self.client.delete(url),
        };

        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn send_route(&self, route: &Route) -> Result<reqwest::Response, ApiError> {
        let url = self.build_url(&route.path);
        tracing::debug!("{} {}", route.method, url);

        let mut builder = self.request(route.method, &url);
        if let Some(body) = &route.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(transport_error)?;
        check_status(response).await
    }
}

#[async_trait]
impl RemoteApi for HttpApiClient {
    async fn dispatch(&self, op: &PendingOperation) -> Result<(), ApiError> {
        let route = operation_route(op)?;
        self.send_route(&route).await?;
        Ok(())
    }

    async fn upload_image(
        &self,
        image: &PendingImage,
        progress: ProgressFn,
    ) -> Result<String, ApiError> {
        let bytes = tokio::fs::read(&image.file_path)
            .await
            .map_err(|e| ApiError::LocalFile {
                path: image.file_path.display().to_string(),
                message: e.to_string(),
            })?;

        let total = bytes.len();
        let chunks: Vec<Vec<u8>> = bytes.chunks(UPLOAD_CHUNK).map(<[u8]>::to_vec).collect();
        let mut sent = 0usize;
        progress(0);

        let report = progress.clone();
        let stream = futures::stream::iter(chunks.into_iter().map(move |chunk| {
            sent += chunk.len();
            report(percent(sent, total));
            Ok::<_, std::io::Error>(chunk)
        }));

        let mut part = Part::stream_with_length(reqwest::Body::wrap_stream(stream), total as u64)
            .file_name(image.file_name());
        if let Some(content_type) = &image.content_type {
            part = part
                .mime_str(content_type)
                .map_err(|e| ApiError::InvalidPayload(e.to_string()))?;
        }

        let form = Form::new()
            .text("folder", upload_folder(image.entity_type))
            .part("file", part);

        let url = self.build_url("/storage/upload");
        tracing::debug!("POST {} ({} bytes)", url, total);

        let response = self
            .request(Method::Post, &url)
            .multipart(form)
            .send()
            .await
            .map_err(transport_error)?;
        let response = check_status(response).await?;

        let uploaded: UploadResponse = response
            .json()
            .await
            .map_err(|e| ApiError::InvalidPayload(format!("Unexpected upload response: {}", e)))?;

        progress(100);
        Ok(uploaded.file_url)
    }

    async fn attach_image(&self, image: &PendingImage, url: &str) -> Result<(), ApiError> {
        let route = attach_route(image, url)?;
        self.send_route(&route).await?;
        Ok(())
    }

    async fn health_check(&self) -> Result<(), ApiError> {
        let url = self.build_origin_url("/health");
        let response = self
            .request(Method::Get, &url)
            .send()
            .await
            .map_err(transport_error)?;
        check_status(response).await?;
        Ok(())
    }

    async fn fetch_favorites(&self) -> Result<Vec<String>, ApiError> {
        let mut ids = Vec::new();
        let mut page = 0;

        loop {
            let route = favorites_page_route(page, FAVORITES_PAGE_SIZE);
            let body: FavoritesPage = self
                .send_route(&route)
                .await?
                .json()
                .await
                .map_err(|e| {
                    ApiError::InvalidPayload(format!("Unexpected favorites response: {}", e))
                })?;

            let received = body.points.len();
            for point in body.points {
                ids.push(point.into_id()?);
            }
            if !body.has_more || received == 0 {
                break;
            }
            page += 1;
        }

        tracing::debug!("Fetched {} favorite(s) from the server", ids.len());
        Ok(ids)
    }
}

fn transport_error(e: reqwest::Error) -> ApiError {
    if e.is_timeout() {
        ApiError::Timeout
    } else {
        ApiError::Network(e.to_string())
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(ApiError::from_status(
        status.as_u16(),
        error_message(&body, status),
    ))
}

/// Extracts the server's message from an error body.
fn error_message(body: &str, status: reqwest::StatusCode) -> String {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
        for key in ["message", "error"] {
            if let Some(message) = value.get(key).and_then(|v| v.as_str()) {
                return message.to_string();
            }
        }
    }

    let trimmed = body.trim();
    if trimmed.is_empty() {
        status
            .canonical_reason()
            .unwrap_or("request failed")
            .to_string()
    } else {
        trimmed.to_string()
    }
}

fn percent(sent: usize, total: usize) -> u8 {
    if total == 0 {
        100
    } else {
        ((sent.min(total) * 100) / total) as u8
    }
}
