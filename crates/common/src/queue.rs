//! Notification queue — durable store of records awaiting delivery.
//!
//! The dispatcher only needs two operations: list the oldest pending records
//! and remove a record once it has been delivered. Producers enqueue. No
//! transactional isolation is assumed between a fetch and a later remove, so
//! removing an id that is already gone must succeed.

use std::sync::Mutex;

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;

use crate::error::QueueError;
use crate::types::NotificationRecord;

/// Sorted set of pending ids, scored by creation time in milliseconds.
const PENDING_KEY: &str = "notifications:pending";
/// Hash of id → JSON-encoded record.
const RECORDS_KEY: &str = "notifications:records";
/// Hash of id → raw body of records that no longer decode.
const DEAD_KEY: &str = "notifications:dead";

/// Storage backend for pending notifications.
#[async_trait]
pub trait NotificationQueue: Send + Sync {
    /// Return up to `limit` pending records, oldest first.
    async fn list_pending(&self, limit: usize) -> Result<Vec<NotificationRecord>, QueueError>;

    /// Remove a record. Removing an unknown id is a no-op.
    async fn remove(&self, id: &str) -> Result<(), QueueError>;

    /// Add a record, replacing any record with the same id.
    async fn enqueue(&self, record: NotificationRecord) -> Result<(), QueueError>;
}

/// In-process queue, used by tests and single-process deployments.
#[derive(Debug, Default)]
pub struct MemoryQueue {
    records: Mutex<Vec<NotificationRecord>>,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a queue pre-populated with `records`, in order.
    pub fn with_records(records: Vec<NotificationRecord>) -> Self {
        Self {
            records: Mutex::new(records),
        }
    }

    /// Copy of every pending record.
    pub fn snapshot(&self) -> Vec<NotificationRecord> {
        self.records
            .lock()
            .map(|records| records.clone())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.records.lock().map(|r| r.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Vec<NotificationRecord>>, QueueError> {
        self.records
            .lock()
            .map_err(|_| QueueError::Unavailable("memory queue lock poisoned".to_string()))
    }
}

#[async_trait]
impl NotificationQueue for MemoryQueue {
    async fn list_pending(&self, limit: usize) -> Result<Vec<NotificationRecord>, QueueError> {
        Ok(self.lock()?.iter().take(limit).cloned().collect())
    }

    async fn remove(&self, id: &str) -> Result<(), QueueError> {
        self.lock()?.retain(|r| r.id != id);
        Ok(())
    }

    async fn enqueue(&self, record: NotificationRecord) -> Result<(), QueueError> {
        let mut records = self.lock()?;
        match records.iter_mut().find(|r| r.id == record.id) {
            Some(existing) => *existing = record,
            None => records.push(record),
        }
        Ok(())
    }
}

/// Redis-backed queue.
///
/// Ids live in a sorted set ordered by creation time and the record bodies in
/// a hash, so listing is a `ZRANGE` + `HMGET` and removal a two-command
/// `MULTI` block. Listing evicts ids with no body or an undecodable one, so
/// they never occupy a batch twice.
#[derive(Clone)]
pub struct RedisQueue {
    conn: ConnectionManager,
}

impl RedisQueue {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }

    /// Open a managed connection to `redis_url`.
    pub async fn connect(redis_url: &str) -> Result<Self, QueueError> {
        let client = redis::Client::open(redis_url)?;
        let conn = ConnectionManager::new(client).await?;

        tracing::info!("Connected to Redis notification queue");
        Ok(Self::new(conn))
    }
}

#[async_trait]
impl NotificationQueue for RedisQueue {
    async fn list_pending(&self, limit: usize) -> Result<Vec<NotificationRecord>, QueueError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let mut conn = self.conn.clone();

        let ids: Vec<String> = conn.zrange(PENDING_KEY, 0, limit as isize - 1).await?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let raw: Vec<Option<String>> = redis::cmd("HMGET")
            .arg(RECORDS_KEY)
            .arg(&ids)
            .query_async(&mut conn)
            .await?;

        let batch = decode_pending(ids, raw);
        if !batch.stale.is_empty() {
            if let Err(e) = evict(&mut conn, &batch.stale).await {
                tracing::warn!(
                    error = %e,
                    count = batch.stale.len(),
                    "Failed to evict stale pending ids"
                );
            }
        }
        Ok(batch.records)
    }

    async fn remove(&self, id: &str) -> Result<(), QueueError> {
        let mut conn = self.conn.clone();
        let _: () = redis::pipe()
            .atomic()
            .zrem(PENDING_KEY, id)
            .ignore()
            .hdel(RECORDS_KEY, id)
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn enqueue(&self, record: NotificationRecord) -> Result<(), QueueError> {
        let mut conn = self.conn.clone();
        let json = serde_json::to_string(&record)?;
        let score = record.created_at.timestamp_millis();
        let _: () = redis::pipe()
            .atomic()
            .zadd(PENDING_KEY, &record.id, score)
            .ignore()
            .hset(RECORDS_KEY, &record.id, json)
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(())
    }
}

/// Pending id that cannot be delivered, with its raw body if one was stored.
#[derive(Debug, PartialEq, Eq)]
struct StaleEntry {
    id: String,
    body: Option<String>,
}

#[derive(Debug, Default)]
struct PendingBatch {
    records: Vec<NotificationRecord>,
    stale: Vec<StaleEntry>,
}

/// Pair `ids` with their `HMGET` bodies. Ids without a body, or whose body
/// does not decode, are returned as stale instead of failing the batch.
fn decode_pending(ids: Vec<String>, raw: Vec<Option<String>>) -> PendingBatch {
    let mut batch = PendingBatch::default();
    for (id, body) in ids.into_iter().zip(raw) {
        let Some(json) = body else {
            tracing::warn!(record_id = %id, "Pending id has no stored record, evicting");
            batch.stale.push(StaleEntry { id, body: None });
            continue;
        };
        match serde_json::from_str(&json) {
            Ok(record) => batch.records.push(record),
            Err(e) => {
                tracing::warn!(record_id = %id, error = %e, "Undecodable record, moving to dead set");
                batch.stale.push(StaleEntry {
                    id,
                    body: Some(json),
                });
            }
        }
    }
    batch
}

/// Drop stale ids from the pending set. Undecodable bodies move to
/// [`DEAD_KEY`].
async fn evict(conn: &mut ConnectionManager, stale: &[StaleEntry]) -> Result<(), QueueError> {
    let mut pipe = redis::pipe();
    pipe.atomic();
    for entry in stale {
        pipe.zrem(PENDING_KEY, &entry.id).ignore();
        if let Some(body) = &entry.body {
            pipe.hset(DEAD_KEY, &entry.id, body)
                .ignore()
                .hdel(RECORDS_KEY, &entry.id)
                .ignore();
        }
    }
    let _: () = pipe.query_async(conn).await?;
    Ok(())
}
