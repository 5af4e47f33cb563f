use redis::{aio::MultiplexedConnection, Client, ErrorKind, RedisError};
use std::time::Duration;

// Redis only backs the availability cache; an unreachable server must not
// stall startup.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Clone)]
pub struct RedisClient {
    pub conn: MultiplexedConnection,
}

impl RedisClient {
    pub async fn new(redis_url: &str) -> redis::RedisResult<Self> {
        let client = Client::open(redis_url)?;
        let conn = tokio::time::timeout(CONNECT_TIMEOUT, client.get_multiplexed_async_connection())
            .await
            .map_err(|_| RedisError::from((ErrorKind::IoError, "redis connect timed out")))??;
        Ok(RedisClient { conn })
    }
}
