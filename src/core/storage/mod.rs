//! Object storage layer for S3-compatible backup destinations.
//!
//! Requests are signed with SigV4 by hand over reqwest; there is no SDK in
//! the stack. The [`ObjectStore`] trait is what the checker and the runner
//! program against, with a simulated implementation for tests.

mod s3;
pub mod sigv4;
mod simulated;

pub use s3::{S3Store, S3StoreFactory};
pub use simulated::{SimulatedStore, SimulatedStoreFactory};

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use thiserror::Error;

use crate::core::models::BackupDestination;

/// Chunked upload body with item-level errors from the producing side.
pub type PayloadStream = BoxStream<'static, std::io::Result<Vec<u8>>>;

#[derive(Debug, Error)]
pub enum StoreError {
    /// The destination kind is not S3-compatible; there is no client for it.
    #[error("destination is not S3-compatible")]
    Unsupported,
    #[error("storage request failed: {0}")]
    Request(String),
    #[error("storage returned status {0}")]
    Status(u16),
}

/// Upload body. Small payloads are passed whole; artifacts are streamed
/// with their known size so memory stays flat however large the backup is.
pub enum StorePayload {
    Bytes(Vec<u8>),
    Stream { stream: PayloadStream, size: u64 },
}

impl StorePayload {
    pub fn size(&self) -> u64 {
        match self {
            Self::Bytes(bytes) => bytes.len() as u64,
            Self::Stream { size, .. } => *size,
        }
    }

    /// Drain the payload into memory. Stores that cannot stream (and tests)
    /// use this; the S3 client passes streams straight through.
    pub async fn into_bytes(self) -> Result<Vec<u8>, StoreError> {
        match self {
            Self::Bytes(bytes) => Ok(bytes),
            Self::Stream { mut stream, size } => {
                let mut buf = Vec::with_capacity(size as usize);
                while let Some(chunk) = stream.next().await {
                    let chunk = chunk.map_err(|e| StoreError::Request(e.to_string()))?;
                    buf.extend_from_slice(&chunk);
                }
                Ok(buf)
            }
        }
    }
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Lightweight reachability probe: a signed list-buckets call.
    async fn check(&self) -> Result<(), StoreError>;

    async fn put_object(
        &self,
        key: &str,
        payload: StorePayload,
        content_type: &str,
    ) -> Result<(), StoreError>;

    async fn delete_object(&self, key: &str) -> Result<(), StoreError>;
}

/// Builds a store client for a destination. Injected so the checker and the
/// runner share one client abstraction and tests can swap it out.
pub trait StoreFactory: Send + Sync {
    fn store_for(&self, destination: &BackupDestination) -> Result<Arc<dyn ObjectStore>, StoreError>;
}
