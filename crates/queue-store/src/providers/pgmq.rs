//! PGMQ store on PostgreSQL.
//!
//! Queue operations go through the `pgmq` schema functions. Lookups that PGMQ
//! does not expose as functions (`get`, `list`, archive counts) read the
//! queue's backing tables directly.

use crate::client::QueueStore;
use crate::error::StoreError;
use crate::message::{Message, MessageId, Payload, QueueMetrics, QueueName, Timestamp};
use crate::provider::{PostgresConfig, ProviderType};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::{debug, info};

#[cfg(test)]
#[path = "pgmq_tests.rs"]
mod tests;

/// Columns selected for every message-returning query
const MESSAGE_COLUMNS: &str = "msg_id, read_ct, enqueued_at, vt, message";

/// Row shape of `pgmq.message_record`
type MessageRow = (i64, i32, DateTime<Utc>, DateTime<Utc>, Payload);

/// PostgreSQL error code for a missing relation
const UNDEFINED_TABLE: &str = "42P01";

fn message_from_row(row: MessageRow) -> Message {
    let (id, read_ct, enqueued_at, vt, payload) = row;
    Message {
        id: MessageId::new(id),
        delivery_count: u32::try_from(read_ct).unwrap_or(0),
        enqueued_at: Timestamp::from_datetime(enqueued_at),
        visible_at: Timestamp::from_datetime(vt),
        payload,
    }
}

/// Lease duration in whole seconds, rounded up
fn visibility_seconds(visibility_timeout: Duration) -> i32 {
    let millis = visibility_timeout.num_milliseconds().max(0);
    let seconds = (millis + 999) / 1000;
    i32::try_from(seconds.max(1)).unwrap_or(i32::MAX)
}

/// Backing table for a queue; `prefix` is `q` for live messages, `a` for archive
fn table_name(prefix: &str, queue: &QueueName) -> String {
    // PGMQ lowercases names when creating tables; QueueName allows only
    // alphanumerics and underscores, so quoting is sufficient.
    format!("pgmq.\"{}_{}\"", prefix, queue.as_str().to_lowercase())
}

/// PGMQ-backed queue store
#[derive(Clone)]
pub struct PgmqStore {
    pool: PgPool,
    connect_timeout: Duration,
}

impl PgmqStore {
    /// Connect to PostgreSQL and verify the `pgmq` extension is installed
    pub async fn connect(config: &PostgresConfig) -> Result<Self, StoreError> {
        let connect_timeout =
            std::time::Duration::from_secs(config.connect_timeout_seconds);

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(connect_timeout)
            .connect(&config.database_url)
            .await
            .map_err(|e| StoreError::ConnectionFailed {
                message: format!("Failed to connect to PostgreSQL: {}", e),
            })?;

        let store = Self {
            pool,
            connect_timeout: Duration::seconds(config.connect_timeout_seconds as i64),
        };
        store.ensure_extension().await?;

        info!(
            max_connections = config.max_connections,
            "Connected to PGMQ store"
        );
        Ok(store)
    }

    /// Wrap an existing pool
    pub fn from_pool(pool: PgPool) -> Self {
        Self {
            pool,
            connect_timeout: Duration::seconds(10),
        }
    }

    async fn ensure_extension(&self) -> Result<(), StoreError> {
        let installed: Option<(String,)> =
            sqlx::query_as("SELECT extversion FROM pg_extension WHERE extname = 'pgmq'")
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| self.map_error(None, e))?;

        match installed {
            Some((version,)) => {
                debug!(version = %version, "Found pgmq extension");
                Ok(())
            }
            None => Err(StoreError::ConfigurationError(
                crate::error::ConfigurationError::Missing {
                    key: "pgmq extension".to_string(),
                },
            )),
        }
    }

    fn map_error(&self, queue: Option<&QueueName>, error: sqlx::Error) -> StoreError {
        match error {
            sqlx::Error::Database(db) => {
                let code = db.code().map(|c| c.to_string()).unwrap_or_default();
                match queue {
                    Some(queue) if code == UNDEFINED_TABLE => StoreError::QueueNotFound {
                        queue_name: queue.to_string(),
                    },
                    _ => StoreError::Database {
                        code,
                        message: db.message().to_string(),
                    },
                }
            }
            sqlx::Error::PoolTimedOut => StoreError::Timeout {
                duration: self.connect_timeout,
            },
            sqlx::Error::Io(e) => StoreError::ConnectionFailed {
                message: e.to_string(),
            },
            sqlx::Error::PoolClosed => StoreError::ConnectionFailed {
                message: "connection pool closed".to_string(),
            },
            sqlx::Error::ColumnDecode { source, .. } | sqlx::Error::Decode(source) => {
                StoreError::Database {
                    code: "decode".to_string(),
                    message: source.to_string(),
                }
            }
            other => StoreError::Database {
                code: String::new(),
                message: other.to_string(),
            },
        }
    }

    async fn count(&self, queue: &QueueName, sql: &str) -> Result<u64, StoreError> {
        let (count,): (i64,) = sqlx::query_as(sql)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| self.map_error(Some(queue), e))?;
        Ok(u64::try_from(count).unwrap_or(0))
    }
}

#[async_trait]
impl QueueStore for PgmqStore {
    async fn create_queue(&self, queue: &QueueName) -> Result<(), StoreError> {
        for name in [queue.clone(), queue.dead_letter_queue()] {
            sqlx::query("SELECT pgmq.create($1)")
                .bind(name.as_str())
                .execute(&self.pool)
                .await
                .map_err(|e| self.map_error(Some(&name), e))?;
        }
        Ok(())
    }

    async fn drop_queue(&self, queue: &QueueName) -> Result<(), StoreError> {
        for name in [queue.dead_letter_queue(), queue.clone()] {
            let (dropped,): (bool,) = sqlx::query_as("SELECT pgmq.drop_queue($1)")
                .bind(name.as_str())
                .fetch_one(&self.pool)
                .await
                .map_err(|e| self.map_error(Some(&name), e))?;

            if !dropped {
                return Err(StoreError::QueueNotFound {
                    queue_name: name.to_string(),
                });
            }
        }
        Ok(())
    }

    async fn send(&self, queue: &QueueName, payload: &Payload) -> Result<MessageId, StoreError> {
        let (id,): (i64,) = sqlx::query_as("SELECT * FROM pgmq.send($1, $2)")
            .bind(queue.as_str())
            .bind(payload)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| self.map_error(Some(queue), e))?;
        Ok(MessageId::new(id))
    }

    async fn send_batch(
        &self,
        queue: &QueueName,
        payloads: &[Payload],
    ) -> Result<Vec<MessageId>, StoreError> {
        if payloads.is_empty() {
            return Ok(Vec::new());
        }

        let rows: Vec<(i64,)> = sqlx::query_as("SELECT * FROM pgmq.send_batch($1, $2)")
            .bind(queue.as_str())
            .bind(payloads)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| self.map_error(Some(queue), e))?;
        Ok(rows.into_iter().map(|(id,)| MessageId::new(id)).collect())
    }

    async fn read(
        &self,
        queue: &QueueName,
        visibility_timeout: Duration,
        quantity: u32,
    ) -> Result<Vec<Message>, StoreError> {
        let rows: Vec<MessageRow> = sqlx::query_as(&format!(
            "SELECT {} FROM pgmq.read($1, $2, $3)",
            MESSAGE_COLUMNS
        ))
        .bind(queue.as_str())
        .bind(visibility_seconds(visibility_timeout))
        .bind(i32::try_from(quantity).unwrap_or(i32::MAX))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| self.map_error(Some(queue), e))?;

        Ok(rows.into_iter().map(message_from_row).collect())
    }

    async fn pop(&self, queue: &QueueName) -> Result<Option<Message>, StoreError> {
        let row: Option<MessageRow> = sqlx::query_as(&format!(
            "SELECT {} FROM pgmq.pop($1)",
            MESSAGE_COLUMNS
        ))
        .bind(queue.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| self.map_error(Some(queue), e))?;

        Ok(row.map(message_from_row))
    }

    async fn archive(&self, queue: &QueueName, id: MessageId) -> Result<bool, StoreError> {
        let (archived,): (bool,) = sqlx::query_as("SELECT pgmq.archive($1, $2::bigint)")
            .bind(queue.as_str())
            .bind(id.as_i64())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| self.map_error(Some(queue), e))?;
        Ok(archived)
    }

    async fn archive_batch(
        &self,
        queue: &QueueName,
        ids: &[MessageId],
    ) -> Result<Vec<MessageId>, StoreError> {
        let raw: Vec<i64> = ids.iter().map(MessageId::as_i64).collect();
        let rows: Vec<(i64,)> = sqlx::query_as("SELECT * FROM pgmq.archive($1, $2::bigint[])")
            .bind(queue.as_str())
            .bind(&raw)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| self.map_error(Some(queue), e))?;
        Ok(rows.into_iter().map(|(id,)| MessageId::new(id)).collect())
    }

    async fn delete(&self, queue: &QueueName, id: MessageId) -> Result<bool, StoreError> {
        let (deleted,): (bool,) = sqlx::query_as("SELECT pgmq.delete($1, $2::bigint)")
            .bind(queue.as_str())
            .bind(id.as_i64())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| self.map_error(Some(queue), e))?;
        Ok(deleted)
    }

    async fn delete_batch(
        &self,
        queue: &QueueName,
        ids: &[MessageId],
    ) -> Result<Vec<MessageId>, StoreError> {
        let raw: Vec<i64> = ids.iter().map(MessageId::as_i64).collect();
        let rows: Vec<(i64,)> = sqlx::query_as("SELECT * FROM pgmq.delete($1, $2::bigint[])")
            .bind(queue.as_str())
            .bind(&raw)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| self.map_error(Some(queue), e))?;
        Ok(rows.into_iter().map(|(id,)| MessageId::new(id)).collect())
    }

    async fn get(&self, queue: &QueueName, id: MessageId) -> Result<Option<Message>, StoreError> {
        let row: Option<MessageRow> = sqlx::query_as(&format!(
            "SELECT {} FROM {} WHERE msg_id = $1",
            MESSAGE_COLUMNS,
            table_name("q", queue)
        ))
        .bind(id.as_i64())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| self.map_error(Some(queue), e))?;

        Ok(row.map(message_from_row))
    }

    async fn list(&self, queue: &QueueName, limit: u32) -> Result<Vec<Message>, StoreError> {
        let rows: Vec<MessageRow> = sqlx::query_as(&format!(
            "SELECT {} FROM {} ORDER BY msg_id LIMIT $1",
            MESSAGE_COLUMNS,
            table_name("q", queue)
        ))
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| self.map_error(Some(queue), e))?;

        Ok(rows.into_iter().map(message_from_row).collect())
    }

    async fn purge_queue(&self, queue: &QueueName) -> Result<u64, StoreError> {
        let (purged,): (i64,) = sqlx::query_as("SELECT pgmq.purge_queue($1)")
            .bind(queue.as_str())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| self.map_error(Some(queue), e))?;
        Ok(u64::try_from(purged).unwrap_or(0))
    }

    async fn metrics(&self, queue: &QueueName) -> Result<QueueMetrics, StoreError> {
        let (queue_length, newest_age, oldest_age, total_messages, scrape_time): (
            i64,
            Option<i32>,
            Option<i32>,
            i64,
            DateTime<Utc>,
        ) = sqlx::query_as(
            "SELECT queue_length, newest_msg_age_sec, oldest_msg_age_sec, total_messages, scrape_time \
             FROM pgmq.metrics($1)",
        )
        .bind(queue.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| self.map_error(Some(queue), e))?;

        let visible_length = self
            .count(
                queue,
                &format!(
                    "SELECT count(*) FROM {} WHERE vt <= clock_timestamp()",
                    table_name("q", queue)
                ),
            )
            .await?;
        let archived_messages = self
            .count(
                queue,
                &format!("SELECT count(*) FROM {}", table_name("a", queue)),
            )
            .await?;

        let to_u64 = |v: i64| u64::try_from(v).unwrap_or(0);
        Ok(QueueMetrics {
            queue_name: queue.clone(),
            queue_length: to_u64(queue_length),
            visible_length,
            total_messages: to_u64(total_messages),
            archived_messages,
            oldest_message_age_seconds: oldest_age.map(|s| to_u64(i64::from(s))),
            newest_message_age_seconds: newest_age.map(|s| to_u64(i64::from(s))),
            scrape_time: Timestamp::from_datetime(scrape_time),
        })
    }

    fn provider_type(&self) -> ProviderType {
        ProviderType::Pgmq
    }
}
