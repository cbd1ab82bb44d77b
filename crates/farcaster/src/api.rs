use async_trait::async_trait;

use pollcast_common::types::{Mention, UserProfile};

use crate::error::GatewayError;

/// Threading and attachments of an outgoing message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CastContext {
    /// Hash of the message being replied to.
    pub parent: Option<String>,
    /// URL embedded in the message (e.g. the poll frame).
    pub embed_url: Option<String>,
}

impl CastContext {
    pub fn with_embed(url: impl Into<String>) -> Self {
        Self {
            parent: None,
            embed_url: Some(url.into()),
        }
    }

    pub fn reply_to(parent: impl Into<String>) -> Self {
        Self {
            parent: Some(parent.into()),
            embed_url: None,
        }
    }
}

/// Operations the notifier and bot need from the social network.
#[async_trait]
pub trait FarcasterApi: Send + Sync {
    /// Publish `text` addressed to `recipients`.
    ///
    /// Fails with [`GatewayError::InvalidInput`] on an empty recipient set and
    /// [`GatewayError::NotConfigured`] before the sender identity is set.
    async fn send_message(
        &self,
        recipients: &[u64],
        text: &str,
        context: &CastContext,
    ) -> Result<(), GatewayError>;

    /// Profile, linked addresses and signer keys of `fid`.
    async fn resolve_identity(&self, fid: u64) -> Result<UserProfile, GatewayError>;

    /// Same as [`FarcasterApi::resolve_identity`], keyed by a verified address.
    async fn resolve_identity_by_address(&self, address: &str)
    -> Result<UserProfile, GatewayError>;

    /// Mentions of the configured account newer than `since` (unix seconds).
    ///
    /// Returns the mentions and the newest timestamp seen, to be passed back
    /// as `since` on the next poll.
    async fn list_recent_mentions(&self, since: u64) -> Result<(Vec<Mention>, u64), GatewayError>;
}
