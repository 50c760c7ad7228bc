//! In-memory object store for tests and `--simulation` mode.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use super::{ObjectStore, StoreError, StoreFactory, StorePayload};
use crate::core::models::BackupDestination;

#[derive(Default)]
struct Inner {
    objects: Mutex<HashMap<String, Vec<u8>>>,
    unreachable: Mutex<bool>,
    fail_puts: Mutex<bool>,
    deletes: Mutex<Vec<String>>,
}

#[derive(Clone, Default)]
pub struct SimulatedStore {
    inner: Arc<Inner>,
}

impl SimulatedStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        *self.inner.unreachable.lock().unwrap() = unreachable;
    }

    pub fn fail_puts(&self) {
        *self.inner.fail_puts.lock().unwrap() = true;
    }

    pub fn object(&self, key: &str) -> Option<Vec<u8>> {
        self.inner.objects.lock().unwrap().get(key).cloned()
    }

    pub fn object_keys(&self) -> Vec<String> {
        self.inner.objects.lock().unwrap().keys().cloned().collect()
    }

    pub fn deleted_keys(&self) -> Vec<String> {
        self.inner.deletes.lock().unwrap().clone()
    }
}

#[async_trait]
impl ObjectStore for SimulatedStore {
    async fn check(&self) -> Result<(), StoreError> {
        if *self.inner.unreachable.lock().unwrap() {
            Err(StoreError::Request("simulated endpoint down".into()))
        } else {
            Ok(())
        }
    }

    async fn put_object(
        &self,
        key: &str,
        payload: StorePayload,
        _content_type: &str,
    ) -> Result<(), StoreError> {
        if *self.inner.unreachable.lock().unwrap() {
            return Err(StoreError::Request("simulated endpoint down".into()));
        }
        if *self.inner.fail_puts.lock().unwrap() {
            return Err(StoreError::Status(500));
        }
        let bytes = payload.into_bytes().await?;
        self.inner
            .objects
            .lock()
            .unwrap()
            .insert(key.to_string(), bytes);
        Ok(())
    }

    async fn delete_object(&self, key: &str) -> Result<(), StoreError> {
        self.inner.deletes.lock().unwrap().push(key.to_string());
        self.inner.objects.lock().unwrap().remove(key);
        Ok(())
    }
}

/// Hands the same shared store to every destination, so tests can script
/// and inspect it. Still refuses non-S3 kinds like the real factory.
#[derive(Clone, Default)]
pub struct SimulatedStoreFactory {
    store: SimulatedStore,
}

impl SimulatedStoreFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn store(&self) -> SimulatedStore {
        self.store.clone()
    }
}

impl StoreFactory for SimulatedStoreFactory {
    fn store_for(
        &self,
        destination: &BackupDestination,
    ) -> Result<Arc<dyn ObjectStore>, StoreError> {
        if !destination.kind.is_s3_compatible() {
            return Err(StoreError::Unsupported);
        }
        Ok(Arc::new(self.store.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_then_delete_round_trip() {
        let store = SimulatedStore::new();
        store
            .put_object(
                "a/b.tar.gz",
                StorePayload::Bytes(b"data".to_vec()),
                "application/gzip",
            )
            .await
            .unwrap();
        assert_eq!(store.object("a/b.tar.gz").unwrap(), b"data");

        store.delete_object("a/b.tar.gz").await.unwrap();
        assert!(store.object("a/b.tar.gz").is_none());
        assert_eq!(store.deleted_keys(), vec!["a/b.tar.gz".to_string()]);
    }

    #[tokio::test]
    async fn streamed_payload_is_reassembled_in_order() {
        let chunks: Vec<std::io::Result<Vec<u8>>> =
            vec![Ok(b"chunk one ".to_vec()), Ok(b"chunk two".to_vec())];
        let payload = StorePayload::Stream {
            stream: Box::pin(futures::stream::iter(chunks)),
            size: 19,
        };
        assert_eq!(payload.size(), 19);

        let store = SimulatedStore::new();
        store
            .put_object("a/b.sql.gz", payload, "application/gzip")
            .await
            .unwrap();
        assert_eq!(store.object("a/b.sql.gz").unwrap(), b"chunk one chunk two");
    }

    #[tokio::test]
    async fn mid_stream_failure_fails_the_put() {
        let chunks: Vec<std::io::Result<Vec<u8>>> = vec![
            Ok(b"partial".to_vec()),
            Err(std::io::Error::other("session dropped")),
        ];
        let payload = StorePayload::Stream {
            stream: Box::pin(futures::stream::iter(chunks)),
            size: 7,
        };

        let store = SimulatedStore::new();
        let err = store
            .put_object("k", payload, "application/gzip")
            .await
            .err()
            .unwrap();
        assert!(matches!(err, StoreError::Request(msg) if msg.contains("session dropped")));
        assert!(store.object("k").is_none());
    }

    #[tokio::test]
    async fn unreachable_store_fails_check_and_put() {
        let store = SimulatedStore::new();
        store.set_unreachable(true);
        assert!(store.check().await.is_err());
        assert!(store
            .put_object("k", StorePayload::Bytes(Vec::new()), "application/gzip")
            .await
            .is_err());
    }
}
