use super::CounterStore;
use crate::error::{ThrottlerError, ThrottlerResult};
use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client, IntoConnectionInfo};

/// Counter store backed by one Redis logical database.
///
/// Each limiter should own its own database index: `clear_all` issues
/// `FLUSHDB`, which wipes everything in that database.
#[derive(Clone)]
pub struct RedisCounterStore {
    connection: MultiplexedConnection,
    database: i64,
}

impl RedisCounterStore {
    /// Connect to `redis_url` and select `database` as this store's namespace.
    pub async fn connect(redis_url: &str, database: i64) -> ThrottlerResult<Self> {
        let mut info = redis_url.into_connection_info().map_err(|e| {
            ThrottlerError::Configuration(format!("Invalid Redis URL: {}", e))
        })?;
        info.redis.db = database;

        let client = Client::open(info)
            .map_err(|e| ThrottlerError::StoreUnavailable(format!("Failed to create Redis client: {}", e)))?;
        let connection = client
            .get_multiplexed_tokio_connection()
            .await
            .map_err(|e| ThrottlerError::StoreUnavailable(format!("Failed to connect to Redis: {}", e)))?;

        tracing::info!(database, "Connected to Redis counter store");

        Ok(Self {
            connection,
            database,
        })
    }

    pub fn database(&self) -> i64 {
        self.database
    }
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn charge(&self, identity: &str, cost: i64) -> ThrottlerResult<i64> {
        let mut conn = self.connection.clone();
        conn.incr(identity, cost)
            .await
            .map_err(|e| ThrottlerError::StoreUnavailable(format!("INCRBY failed: {}", e)))
    }

    async fn clear_all(&self) -> ThrottlerResult<()> {
        let mut conn = self.connection.clone();
        redis::cmd("FLUSHDB")
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(|e| ThrottlerError::StoreUnavailable(format!("FLUSHDB failed: {}", e)))
    }

    async fn ping(&self) -> ThrottlerResult<()> {
        let mut conn = self.connection.clone();
        let reply: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| ThrottlerError::StoreUnavailable(format!("Ping failed: {}", e)))?;

        if reply == "PONG" {
            Ok(())
        } else {
            Err(ThrottlerError::StoreUnavailable(format!(
                "Unexpected PING reply: {}",
                reply
            )))
        }
    }
}
