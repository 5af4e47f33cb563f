use std::sync::Arc;

use redis::AsyncCommands;
use tracing::{debug, warn};

use crate::models::ListingId;
use crate::redis_client::RedisClient;
use crate::store::{ReservationStore, StoreError};

/// Read-through cache for availability reads. Without Redis every read goes
/// straight to the store. Never used on the reserve path.
#[derive(Clone)]
pub struct CapacityCache {
    redis: Option<RedisClient>,
    store: Arc<dyn ReservationStore>,
    ttl_seconds: u64,
}

fn capacity_key(listing_id: ListingId) -> String {
    format!("capacity:{}", listing_id)
}

impl CapacityCache {
    pub fn new(redis: Option<RedisClient>, store: Arc<dyn ReservationStore>, ttl_seconds: u64) -> Self {
        Self {
            redis,
            store,
            ttl_seconds,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.redis.is_some()
    }

    /// Remaining units, possibly up to `ttl_seconds` stale.
    pub async fn available(&self, listing_id: ListingId) -> Result<Option<i32>, StoreError> {
        let Some(redis) = &self.redis else {
            return self.store.get_capacity(listing_id).await;
        };

        let key = capacity_key(listing_id);
        let mut conn = redis.conn.clone();
        match conn.get::<_, Option<i32>>(&key).await {
            Ok(Some(available)) => return Ok(Some(available)),
            Ok(None) => {}
            // Redis trouble degrades to a store read
            Err(e) => warn!(listing_id, error = %e, "capacity cache read failed"),
        }

        let available = self.store.get_capacity(listing_id).await?;
        if let Some(units) = available {
            if let Err(e) = conn.set_ex::<_, _, ()>(&key, units, self.ttl_seconds).await {
                debug!(listing_id, error = %e, "capacity cache write failed");
            }
        }
        Ok(available)
    }

    pub async fn invalidate(&self, listing_id: ListingId) {
        let Some(redis) = &self.redis else {
            return;
        };
        let mut conn = redis.conn.clone();
        if let Err(e) = conn.del::<_, ()>(capacity_key(listing_id)).await {
            warn!(listing_id, error = %e, "capacity cache invalidation failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{InMemoryStore, ReserveRequest};

    #[test]
    fn keys_are_namespaced_per_listing() {
        assert_eq!(capacity_key(42), "capacity:42");
    }

    #[tokio::test]
    async fn without_redis_reads_track_the_store() {
        let store = Arc::new(InMemoryStore::default());
        store.register_listing(3, 4).await.unwrap();
        let cache = CapacityCache::new(None, store.clone(), 5);
        assert!(!cache.is_enabled());

        assert_eq!(cache.available(3).await.unwrap(), Some(4));
        store
            .reserve(&ReserveRequest {
                listing_id: 3,
                requester_name: "Alice".into(),
                rooms_requested: 1,
                idempotency_key: None,
            })
            .await
            .unwrap();
        cache.invalidate(3).await;
        assert_eq!(cache.available(3).await.unwrap(), Some(3));
        assert_eq!(cache.available(9).await.unwrap(), None);
    }
}
