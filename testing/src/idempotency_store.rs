//! In-memory fake matching [`order_saga_store::IdempotencyStore`]'s
//! first-writer-wins contract.

use order_saga_store::repository::IdempotencyKeyStore;
use order_saga_store::StoreError;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;
use uuid::Uuid;

/// In-memory idempotency key store.
#[derive(Default)]
pub struct InMemoryIdempotencyStore {
    keys: Mutex<HashMap<String, Uuid>>,
}

impl InMemoryIdempotencyStore {
    /// Build an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `key` for `candidate_resource_id`; the first caller for a
    /// given key always wins, permanently.
    ///
    /// # Errors
    ///
    /// Never actually fails; returns `Result` only to match
    /// [`order_saga_store::IdempotencyStore::try_insert`]'s signature.
    pub async fn try_insert(&self, key: &str, candidate_resource_id: Uuid) -> Result<Uuid, StoreError> {
        let mut keys = self.keys.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        Ok(*keys.entry(key.to_string()).or_insert(candidate_resource_id))
    }
}

impl IdempotencyKeyStore for InMemoryIdempotencyStore {
    fn try_insert(
        &self,
        key: &str,
        candidate_resource_id: Uuid,
    ) -> Pin<Box<dyn Future<Output = Result<Uuid, StoreError>> + Send + '_>> {
        Box::pin(Self::try_insert(self, key, candidate_resource_id))
    }
}
