//! Notification dispatcher — periodic batch delivery with bounded concurrency.
//!
//! Each cycle:
//! 1. Fetches up to `batch_size` pending records (a fetch failure skips the cycle)
//! 2. Takes a worker slot per record, blocking while all `max_workers` are busy
//! 3. Sends the message and removes the record once the send succeeded
//! 4. Waits `send_interval` between consecutive records
//! 5. Joins every worker and surfaces the first error of the batch
//!
//! Stopping the dispatcher mid-cycle stops steps 2 and 4: no new send starts,
//! in-flight sends finish and the remaining records stay queued.
//!
//! Delivery is at-least-once: a record whose removal fails after a successful
//! send is delivered again on the next cycle.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{Semaphore, watch};
use tokio::task::{JoinHandle, JoinSet};

use pollcast_common::config::AppConfig;
use pollcast_common::error::QueueError;
use pollcast_common::queue::NotificationQueue;
use pollcast_common::types::NotificationRecord;
use pollcast_farcaster::{CastContext, FarcasterApi, GatewayError};

use crate::message::compose_message;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Error getting notifications: {0}")]
    Fetch(#[source] QueueError),

    #[error("Error sending notification {record_id} to fid {recipient_fid}: {source}")]
    Send {
        record_id: String,
        recipient_fid: u64,
        source: GatewayError,
    },

    #[error("Error deleting notification {record_id} (fid {recipient_fid}): {source}")]
    Remove {
        record_id: String,
        recipient_fid: u64,
        source: QueueError,
    },

    #[error("Notification worker failed: {0}")]
    Worker(String),
}

impl DispatchError {
    /// Queue id of the record the error refers to, if any.
    pub fn record_id(&self) -> Option<&str> {
        match self {
            DispatchError::Send { record_id, .. } | DispatchError::Remove { record_id, .. } => {
                Some(record_id)
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Time between cycles.
    pub listen_interval: Duration,
    /// Pause between starting consecutive sends.
    pub send_interval: Duration,
    /// Maximum records fetched per cycle.
    pub batch_size: usize,
    /// Maximum concurrent send workers.
    pub max_workers: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            listen_interval: Duration::from_secs(30),
            send_interval: Duration::from_millis(500),
            batch_size: 100,
            max_workers: 10,
        }
    }
}

impl DispatcherConfig {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            listen_interval: Duration::from_secs(config.notifier_listen_interval_secs),
            send_interval: Duration::from_millis(config.notifier_send_interval_ms),
            batch_size: config.notifier_batch_size,
            max_workers: config.notifier_max_workers,
        }
    }
}

/// Delivers queued notifications through the Farcaster gateway.
pub struct Dispatcher {
    queue: Arc<dyn NotificationQueue>,
    api: Arc<dyn FarcasterApi>,
    config: DispatcherConfig,
}

impl Dispatcher {
    pub fn new(
        queue: Arc<dyn NotificationQueue>,
        api: Arc<dyn FarcasterApi>,
        config: DispatcherConfig,
    ) -> Self {
        Self { queue, api, config }
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    /// Spawn the timer loop. Stop it through the returned handle.
    pub fn start(self: Arc<Self>) -> DispatcherHandle {
        let (shutdown, rx) = watch::channel(false);
        let task = tokio::spawn(async move { self.run(rx).await });
        DispatcherHandle { shutdown, task }
    }

    /// Run cycles every `listen_interval` until `shutdown` flips to `true`
    /// or its sender is dropped.
    ///
    /// Stopping mid-cycle issues no further sends. Sends already in flight
    /// run to completion and the rest of the batch stays queued.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            listen_interval_secs = self.config.listen_interval.as_secs(),
            batch_size = self.config.batch_size,
            max_workers = self.config.max_workers,
            "Notification dispatcher started"
        );

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = tokio::time::sleep(self.config.listen_interval) => {}
            }
            if *shutdown.borrow() {
                break;
            }

            if let Err(e) = self.cycle(Some(shutdown.clone())).await {
                tracing::error!(
                    error = %e,
                    record_id = e.record_id().unwrap_or_default(),
                    "Error sending notifications"
                );
            }
        }

        tracing::info!("Notification dispatcher stopped");
    }

    /// Fetch one batch and deliver it. Returns the number of records fetched.
    pub async fn run_cycle(&self) -> Result<usize, DispatchError> {
        self.cycle(None).await
    }

    /// Deliver `records` concurrently and return the first error, if any.
    ///
    /// Later errors in the same batch are logged at debug level and dropped.
    pub async fn dispatch_batch(
        &self,
        records: Vec<NotificationRecord>,
    ) -> Result<(), DispatchError> {
        self.distribute(records, None).await
    }

    async fn cycle(
        &self,
        shutdown: Option<watch::Receiver<bool>>,
    ) -> Result<usize, DispatchError> {
        let records = self
            .queue
            .list_pending(self.config.batch_size)
            .await
            .map_err(DispatchError::Fetch)?;

        tracing::info!(count = records.len(), "Notifications found");
        if records.is_empty() {
            return Ok(0);
        }

        let fetched = records.len();
        self.distribute(records, shutdown).await?;
        Ok(fetched)
    }

    async fn distribute(
        &self,
        records: Vec<NotificationRecord>,
        mut shutdown: Option<watch::Receiver<bool>>,
    ) -> Result<(), DispatchError> {
        let slots = Arc::new(Semaphore::new(self.config.max_workers.max(1)));
        let mut workers = JoinSet::new();
        let total = records.len();

        for (index, record) in records.into_iter().enumerate() {
            // A closed pool means the cycle was cancelled.
            let acquired = tokio::select! {
                biased;
                _ = cancelled(&mut shutdown) => {
                    slots.close();
                    None
                }
                slot = slots.clone().acquire_owned() => slot.ok(),
            };
            let Some(slot) = acquired else {
                tracing::info!(
                    left_queued = total - index,
                    in_flight = workers.len(),
                    "Dispatch cancelled, waiting for in-flight notifications"
                );
                break;
            };

            let queue = self.queue.clone();
            let api = self.api.clone();
            workers.spawn(async move {
                let _slot = slot;
                deliver(queue.as_ref(), api.as_ref(), &record).await
            });

            if index + 1 < total && !self.config.send_interval.is_zero() {
                tokio::select! {
                    biased;
                    _ = cancelled(&mut shutdown) => slots.close(),
                    _ = tokio::time::sleep(self.config.send_interval) => {}
                }
            }
        }

        let mut first_error = None;
        while let Some(joined) = workers.join_next().await {
            let result = joined.unwrap_or_else(|e| Err(DispatchError::Worker(e.to_string())));
            if let Err(err) = result {
                if first_error.is_none() {
                    first_error = Some(err);
                } else {
                    tracing::debug!(error = %err, "Discarding additional notification error");
                }
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// Resolves once `shutdown` reads `true` or its sender is gone. Never
/// resolves without a receiver.
async fn cancelled(shutdown: &mut Option<watch::Receiver<bool>>) {
    match shutdown {
        Some(rx) => {
            let _ = rx.wait_for(|stop| *stop).await;
        }
        None => std::future::pending().await,
    }
}

/// Send one notification, then remove it from the queue.
async fn deliver(
    queue: &dyn NotificationQueue,
    api: &dyn FarcasterApi,
    record: &NotificationRecord,
) -> Result<(), DispatchError> {
    let text = compose_message(record);
    api.send_message(
        &[record.recipient_fid],
        &text,
        &CastContext::with_embed(&record.frame_url),
    )
    .await
    .map_err(|source| DispatchError::Send {
        record_id: record.id.clone(),
        recipient_fid: record.recipient_fid,
        source,
    })?;

    queue
        .remove(&record.id)
        .await
        .map_err(|source| DispatchError::Remove {
            record_id: record.id.clone(),
            recipient_fid: record.recipient_fid,
            source,
        })?;

    tracing::debug!(
        record_id = %record.id,
        recipient_fid = record.recipient_fid,
        "Notification delivered"
    );
    Ok(())
}

/// Running dispatcher loop.
pub struct DispatcherHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl DispatcherHandle {
    /// Signal the loop to stop and wait for it to exit.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            tracing::error!(error = %e, "Notification dispatcher task failed");
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}
