//! Image hosting collaborator.
//!
//! The [`Uploader`] trait is the single seam between the pipeline and the
//! network: given the bytes of one image it returns the hosted URL or fails.
//! Everything above it (deduplication, timeouts, rewriting) is
//! uploader-agnostic, so tests substitute the recording
//! [`MockUploader`](tests::MockUploader).
//!
//! The production implementation is [`CloudflareUploader`], which posts the
//! file to the Cloudflare Images v1 API and returns the first delivery variant.

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum UploadError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("upload rejected with status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("upload rejected: {0}")]
    Rejected(String),
    #[error("upload response contained no image URL")]
    NoUrl,
}

/// Something that can host an image and hand back its URL.
#[async_trait]
pub trait Uploader: Send + Sync {
    /// Upload one image. `file_name` is used only as the multipart file name.
    async fn upload(&self, file_name: &str, bytes: Vec<u8>) -> Result<String, UploadError>;
}

/// Cloudflare Images client.
#[derive(Debug, Clone)]
pub struct CloudflareUploader {
    client: reqwest::Client,
    endpoint: String,
    api_token: String,
}

impl CloudflareUploader {
    /// Build a client for `{api_base}/accounts/{account_id}/images/v1`.
    pub fn new(api_base: &str, account_id: &str, api_token: &str) -> Result<Self, UploadError> {
        let client = reqwest::Client::builder().build()?;
        Ok(Self {
            client,
            endpoint: images_endpoint(api_base, account_id),
            api_token: api_token.to_string(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

fn images_endpoint(api_base: &str, account_id: &str) -> String {
    format!(
        "{}/accounts/{}/images/v1",
        api_base.trim_end_matches('/'),
        account_id
    )
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    success: bool,
    #[serde(default)]
    errors: Vec<serde_json::Value>,
    result: Option<ApiResult>,
}

#[derive(Debug, Deserialize)]
struct ApiResult {
    #[serde(default)]
    variants: Vec<String>,
}

/// Pull the hosted URL out of an Images API response body.
fn url_from_response(body: &str) -> Result<String, UploadError> {
    let response: ApiResponse = serde_json::from_str(body)
        .map_err(|e| UploadError::Rejected(format!("malformed response ({e}): {body}")))?;
    if !response.success {
        let errors = serde_json::to_string(&response.errors).unwrap_or_default();
        return Err(UploadError::Rejected(errors));
    }
    response
        .result
        .and_then(|r| r.variants.into_iter().next())
        .ok_or(UploadError::NoUrl)
}

#[async_trait]
impl Uploader for CloudflareUploader {
    async fn upload(&self, file_name: &str, bytes: Vec<u8>) -> Result<String, UploadError> {
        let part = reqwest::multipart::Part::bytes(bytes).file_name(file_name.to_string());
        let form = reqwest::multipart::Form::new().part("file", part);

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_token)
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            // Cloudflare reports failures as JSON with `errors`; prefer that detail.
            return match url_from_response(&body) {
                Err(UploadError::Rejected(detail)) => Err(UploadError::Rejected(detail)),
                _ => Err(UploadError::Status {
                    status: status.as_u16(),
                    body,
                }),
            };
        }
        url_from_response(&body)
    }
}
