//! Notification dispatch.
//!
//! A [`dispatcher::Dispatcher`] wakes on a fixed interval, pulls a batch of
//! pending records from the queue and delivers them through the Farcaster
//! gateway with a bounded pool of concurrent workers. Records are removed
//! only after a successful send, so failures are retried on the next cycle.

pub mod dispatcher;
pub mod message;
