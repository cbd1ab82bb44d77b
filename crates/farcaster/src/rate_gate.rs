//! RateGate — process-wide cap on simultaneous upstream requests.
//!
//! The gate is a counting semaphore of fixed capacity. A permit is held only
//! around one physical request and released as soon as the response (or the
//! failure) comes back, never across a backoff sleep.

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::GatewayError;

/// Shared token pool. Cloning yields another handle to the same pool.
#[derive(Debug, Clone)]
pub struct RateGate {
    permits: Arc<Semaphore>,
    capacity: usize,
}

impl RateGate {
    /// Create a gate allowing `capacity` concurrent requests (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            permits: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Permits not currently held.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Wait for a free token. The token returns to the pool on drop.
    pub async fn acquire(&self) -> Result<OwnedSemaphorePermit, GatewayError> {
        self.permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| GatewayError::Transport("rate gate closed".to_string()))
    }
}
