use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A notification queued for delivery to a single Farcaster user.
///
/// Records are created by the poll-creation flow and only ever read and
/// deleted by the dispatcher. A record stays queued until it has been
/// delivered successfully.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationRecord {
    /// Opaque queue key, used for removal.
    pub id: String,
    /// FID of the user being notified.
    pub recipient_fid: u64,
    /// Username of the user being notified, used in the message body.
    pub recipient_username: String,
    /// Username of the poll creator.
    pub author_username: String,
    /// Frame URL of the poll, attached to the outgoing message.
    pub frame_url: String,
    pub created_at: DateTime<Utc>,
}

impl NotificationRecord {
    /// Build a new record with a fresh id and the current timestamp.
    pub fn new(
        recipient_fid: u64,
        recipient_username: impl Into<String>,
        author_username: impl Into<String>,
        frame_url: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            recipient_fid,
            recipient_username: recipient_username.into(),
            author_username: author_username.into(),
            frame_url: frame_url.into(),
            created_at: Utc::now(),
        }
    }
}

/// Profile of a Farcaster user as resolved from the upstream API.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub fid: u64,
    pub username: String,
    /// Custody address in checksummed hex form.
    pub custody_address: String,
    /// Verified Ethereum addresses linked to the account.
    pub verification_addresses: Vec<String>,
    /// Lowercased, deduplicated signer keys that authored verifications.
    pub signers: Vec<String>,
}

/// A message that mentioned the configured bot account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mention {
    /// FID of the author of the mention.
    pub author_fid: u64,
    /// Text with the leading `@bot` token removed.
    pub content: String,
    /// Upstream message hash, usable as a reply parent.
    pub hash: String,
    /// Unix timestamp (seconds).
    pub timestamp: u64,
}
