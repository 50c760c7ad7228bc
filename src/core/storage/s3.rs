//! SigV4-signed S3 client over reqwest.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use tracing::debug;

use super::sigv4;
use super::{ObjectStore, StoreError, StoreFactory, StorePayload};
use crate::core::models::BackupDestination;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

const PATH_SEGMENT_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

pub struct S3Store {
    endpoint: String,
    region: String,
    bucket: String,
    access_key: String,
    secret_key: String,
    client: reqwest::Client,
}

impl S3Store {
    pub fn new(destination: &BackupDestination) -> Result<Self, StoreError> {
        if !destination.kind.is_s3_compatible() {
            return Err(StoreError::Unsupported);
        }

        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| StoreError::Request(e.to_string()))?;

        Ok(Self {
            endpoint: destination.endpoint.trim_end_matches('/').to_string(),
            region: destination.region.clone(),
            bucket: destination.bucket.clone(),
            access_key: destination.access_key.clone(),
            secret_key: destination.secret_key.clone(),
            client,
        })
    }

    fn host(&self) -> Result<String, StoreError> {
        let url = reqwest::Url::parse(&self.endpoint)
            .map_err(|e| StoreError::Request(format!("invalid endpoint: {e}")))?;
        url.host_str()
            .map(|h| match url.port() {
                Some(port) => format!("{h}:{port}"),
                None => h.to_string(),
            })
            .ok_or_else(|| StoreError::Request("endpoint missing host".into()))
    }

    fn object_path(&self, key: &str) -> String {
        let encoded: String = key
            .split('/')
            .map(|segment| utf8_percent_encode(segment, PATH_SEGMENT_ENCODE_SET).to_string())
            .collect::<Vec<_>>()
            .join("/");
        format!("/{}/{}", self.bucket, encoded)
    }

    async fn send_signed(
        &self,
        method: reqwest::Method,
        uri_path: &str,
        content_type: &str,
        bytes: Vec<u8>,
    ) -> Result<reqwest::Response, StoreError> {
        let payload_hash = sigv4::hex_sha256(&bytes);
        let length = bytes.len() as u64;
        self.send_signed_body(method, uri_path, content_type, payload_hash, length, bytes.into())
            .await
    }

    async fn send_signed_body(
        &self,
        method: reqwest::Method,
        uri_path: &str,
        content_type: &str,
        payload_hash: String,
        content_length: u64,
        body: reqwest::Body,
    ) -> Result<reqwest::Response, StoreError> {
        let host = self.host()?;
        let now = Utc::now();
        let auth = sigv4::authorization_header(
            method.as_str(),
            uri_path,
            &host,
            content_type,
            &payload_hash,
            &self.access_key,
            &self.secret_key,
            &self.region,
            now,
        );

        let url = format!("{}{}", self.endpoint, uri_path);
        self.client
            .request(method, url)
            .header("Host", host)
            .header("Content-Type", content_type)
            .header("Content-Length", content_length)
            .header("x-amz-date", sigv4::amz_date(now))
            .header("x-amz-content-sha256", payload_hash)
            .header("Authorization", auth)
            .body(body)
            .send()
            .await
            .map_err(|e| StoreError::Request(e.to_string()))
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn check(&self) -> Result<(), StoreError> {
        // List-buckets style call against the service root.
        let response = self
            .send_signed(reqwest::Method::GET, "/", "", Vec::new())
            .await?;
        let status = response.status();
        if status.is_success() {
            debug!(endpoint = %self.endpoint, "destination reachable");
            Ok(())
        } else {
            Err(StoreError::Status(status.as_u16()))
        }
    }

    async fn put_object(
        &self,
        key: &str,
        payload: StorePayload,
        content_type: &str,
    ) -> Result<(), StoreError> {
        let path = self.object_path(key);
        let size = payload.size();

        // Streamed bodies are signed UNSIGNED-PAYLOAD with an explicit
        // Content-Length; buffered ones get a real payload hash.
        let (payload_hash, body) = match payload {
            StorePayload::Bytes(bytes) => (sigv4::hex_sha256(&bytes), reqwest::Body::from(bytes)),
            StorePayload::Stream { stream, .. } => (
                sigv4::UNSIGNED_PAYLOAD.to_string(),
                reqwest::Body::wrap_stream(stream),
            ),
        };

        let response = self
            .send_signed_body(reqwest::Method::PUT, &path, content_type, payload_hash, size, body)
            .await?;
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(StoreError::Status(status.as_u16()))
        }
    }

    async fn delete_object(&self, key: &str) -> Result<(), StoreError> {
        let path = self.object_path(key);
        let response = self
            .send_signed(reqwest::Method::DELETE, &path, "", Vec::new())
            .await?;
        let status = response.status();
        // 404 is fine for a best-effort cleanup delete.
        if status.is_success() || status.as_u16() == 404 {
            Ok(())
        } else {
            Err(StoreError::Status(status.as_u16()))
        }
    }
}

/// Builds a fresh [`S3Store`] per destination.
pub struct S3StoreFactory;

impl StoreFactory for S3StoreFactory {
    fn store_for(
        &self,
        destination: &BackupDestination,
    ) -> Result<Arc<dyn ObjectStore>, StoreError> {
        Ok(Arc::new(S3Store::new(destination)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::{DestinationKind, ReachabilityStatus};

    fn destination(kind: DestinationKind) -> BackupDestination {
        BackupDestination {
            id: "dest".into(),
            owner: "o@example.com".into(),
            label: "offsite".into(),
            kind,
            endpoint: "https://s3.eu-west-1.example.com/".into(),
            region: "eu-west-1".into(),
            bucket: "backups".into(),
            access_key: "ak".into(),
            secret_key: "sk".into(),
            reachability_status: ReachabilityStatus::Checking,
        }
    }

    #[test]
    fn rejects_non_s3_destinations() {
        let err = S3Store::new(&destination(DestinationKind::Local)).err().unwrap();
        assert!(matches!(err, StoreError::Unsupported));
    }

    #[test]
    fn object_path_percent_encodes_segments_but_keeps_slashes() {
        let store = S3Store::new(&destination(DestinationKind::S3)).unwrap();
        assert_eq!(
            store.object_path("bktd/acme co/2026.tar.gz"),
            "/backups/bktd/acme%20co/2026.tar.gz"
        );
    }

    #[test]
    fn host_includes_non_default_port() {
        let mut dest = destination(DestinationKind::CustomS3);
        dest.endpoint = "http://minio.local:9000".into();
        let store = S3Store::new(&dest).unwrap();
        assert_eq!(store.host().unwrap(), "minio.local:9000");
    }
}
