use bytes::Bytes;
use serde::Deserialize;

use crate::BackendError;
use crate::rows::check;

/// Client for the blob storage API: raw object upload plus signed download
/// URLs. Bucket policies live on the platform side.
#[derive(Clone)]
pub struct Storage {
    http: reqwest::Client,
    base: String,
    token: String,
}

#[derive(Debug, Deserialize)]
struct SignedUrlResponse {
    signed_url: String,
}

impl Storage {
    pub fn new(base: String, token: String) -> Self {
        Self::with_client(reqwest::Client::new(), base, token)
    }

    pub fn with_client(http: reqwest::Client, base: String, token: String) -> Self {
        Storage { http, base, token }
    }

    /// Upload raw bytes to `bucket/path`. Returns the object path.
    pub async fn upload(
        &self,
        bucket: &str,
        path: &str,
        bytes: Bytes,
        content_type: &str,
    ) -> Result<String, BackendError> {
        let url = format!(
            "{}/object/{}/{}",
            self.base.trim_end_matches('/'),
            bucket,
            path
        );
        let resp = self
            .http
            .post(&url)
            .bearer_auth(&self.token)
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(bytes)
            .send()
            .await?;
        check(resp).await?;
        Ok(path.to_string())
    }

    /// Time-limited download URL for an object.
    pub async fn signed_url(
        &self,
        bucket: &str,
        path: &str,
        expires_in_secs: u32,
    ) -> Result<String, BackendError> {
        let url = format!(
            "{}/sign/{}/{}",
            self.base.trim_end_matches('/'),
            bucket,
            path
        );
        let resp = self
            .http
            .post(&url)
            .bearer_auth(&self.token)
            .json(&serde_json::json!({ "expires_in": expires_in_secs }))
            .send()
            .await?;
        let signed: SignedUrlResponse = check(resp).await?.json().await?;
        Ok(signed.signed_url)
    }
}
