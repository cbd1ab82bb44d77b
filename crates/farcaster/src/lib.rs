//! Farcaster API gateway.
//!
//! All upstream traffic goes through [`executor::CallExecutor`], which bounds
//! in-flight requests with a [`rate_gate::RateGate`] and retries throttled
//! calls with linear backoff and jitter. [`neynar::NeynarClient`] builds the
//! domain operations of [`api::FarcasterApi`] on top of it.

pub mod api;
pub mod error;
pub mod executor;
pub mod neynar;
pub mod rate_gate;
pub mod wire;

#[cfg(test)]
pub(crate) mod testing;

pub use api::{CastContext, FarcasterApi};
pub use error::GatewayError;
