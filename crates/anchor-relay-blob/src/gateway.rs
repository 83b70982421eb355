//! HTTP gateway backend.
//!
//! Speaks a minimal content-addressed protocol:
//!
//! - `PUT {gateway}/blob/{ref}` with the raw bytes as body
//! - `GET {gateway}/blob/{ref}` returning the raw bytes, `404` if absent
//!
//! References are minted locally from the content, so re-uploading the same
//! bytes targets the same path.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, StatusCode};
use url::Url;

use anchor_relay_core::BlobRef;

use crate::error::{BlobError, Result};
use crate::traits::BlobStore;

/// A single HTTP blob gateway.
#[derive(Debug, Clone)]
pub struct GatewayBlobStore {
    base: Url,
    client: Client,
    timeout: Duration,
}

impl GatewayBlobStore {
    /// Create a client for `base`, bounding each request by `timeout`.
    pub fn new(base: &Url, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base: base.clone(),
            client,
            timeout,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    fn blob_url(&self, blob_ref: &BlobRef) -> Result<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| BlobError::UrlParse(url::ParseError::RelativeUrlWithCannotBeABaseBase))?
            .pop_if_empty()
            .extend(["blob", blob_ref.as_str()]);
        Ok(url)
    }

    fn map_send_error(&self, e: reqwest::Error) -> BlobError {
        if e.is_timeout() {
            BlobError::Timeout(self.timeout)
        } else {
            BlobError::Reqwest(e)
        }
    }

    async fn status_error(&self, response: reqwest::Response) -> BlobError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        BlobError::HttpStatus {
            gateway: self.base.to_string(),
            status,
            body,
        }
    }
}

#[async_trait]
impl BlobStore for GatewayBlobStore {
    async fn upload(&self, data: Bytes) -> Result<BlobRef> {
        let blob_ref = BlobRef::for_content(&data);
        let response = self
            .client
            .put(self.blob_url(&blob_ref)?)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(data)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        if !response.status().is_success() {
            return Err(self.status_error(response).await);
        }

        tracing::debug!(gateway = %self.base, %blob_ref, "uploaded blob");
        Ok(blob_ref)
    }

    async fn fetch(&self, blob_ref: &BlobRef) -> Result<Bytes> {
        let response = self
            .client
            .get(self.blob_url(blob_ref)?)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        match response.status() {
            StatusCode::NOT_FOUND | StatusCode::GONE => Err(BlobError::NotFound(blob_ref.clone())),
            s if s.is_success() => {
                let data = response.bytes().await.map_err(|e| self.map_send_error(e))?;
                if !blob_ref.verifies(&data) {
                    return Err(BlobError::IntegrityMismatch(blob_ref.clone()));
                }
                Ok(data)
            }
            _ => Err(self.status_error(response).await),
        }
    }

    fn name(&self) -> &str {
        self.base.as_str()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blob_url() {
        let base = Url::parse("https://gw.example.org/api/").unwrap();
        let gw = GatewayBlobStore::new(&base, Duration::from_secs(1)).unwrap();
        let r = BlobRef::new("bafyabc").unwrap();
        assert_eq!(gw.blob_url(&r).unwrap().as_str(), "https://gw.example.org/api/blob/bafyabc");

        let base = Url::parse("https://gw.example.org").unwrap();
        let gw = GatewayBlobStore::new(&base, Duration::from_secs(1)).unwrap();
        assert_eq!(gw.blob_url(&r).unwrap().as_str(), "https://gw.example.org/blob/bafyabc");
    }

    #[tokio::test]
    async fn test_unreachable_gateway_is_connectivity_error() {
        // Port 9 (discard) on localhost is almost never listening.
        let base = Url::parse("http://127.0.0.1:9").unwrap();
        let gw = GatewayBlobStore::new(&base, Duration::from_millis(500)).unwrap();
        let err = gw.fetch(&BlobRef::new("x").unwrap()).await.unwrap_err();
        assert!(err.is_connectivity());
    }
}
