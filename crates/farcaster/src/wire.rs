//! Request and response shapes of the Neynar REST and hub APIs.
//!
//! Only the fields the gateway reads are modelled; everything else is
//! ignored on decode.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Hub message type of an Ethereum address verification.
pub const HUB_MESSAGE_TYPE_VERIFICATION: &str = "MESSAGE_TYPE_VERIFICATION_ADD_ETH_ADDRESS";

/// Feed item type of a mention of the bot.
pub const MENTION_TYPE: &str = "cast-mention";

// ---- v1 user by fid ----

#[derive(Debug, Deserialize)]
pub struct UserResponse {
    pub result: UserResult,
}

#[derive(Debug, Deserialize)]
pub struct UserResult {
    pub user: Option<UserV1>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserV1 {
    pub fid: u64,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub custody_address: String,
    #[serde(default, rename = "verifications")]
    pub verification_addresses: Vec<String>,
}

// ---- v2 users by address ----

/// Keyed by the queried address as echoed by the upstream, which is not
/// guaranteed to match the casing we sent.
pub type UsersByAddressResponse = HashMap<String, Vec<UserV2>>;

#[derive(Debug, Clone, Deserialize)]
pub struct UserV2 {
    pub fid: u64,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub custody_address: String,
    #[serde(default)]
    pub verified_addresses: VerifiedAddresses,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct VerifiedAddresses {
    #[serde(default)]
    pub eth_addresses: Vec<String>,
}

// ---- hub verifications ----

#[derive(Debug, Default, Deserialize)]
pub struct HubVerificationsResponse {
    #[serde(default)]
    pub messages: Vec<HubMessage>,
}

#[derive(Debug, Deserialize)]
pub struct HubMessage {
    pub data: Option<HubMessageData>,
    #[serde(default)]
    pub signer: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HubMessageData {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub fid: u64,
    pub verification_add_eth_address_body: Option<VerificationBody>,
}

#[derive(Debug, Deserialize)]
pub struct VerificationBody {
    #[serde(default)]
    pub address: String,
}

// ---- v1 mentions and replies feed ----

#[derive(Debug, Deserialize)]
pub struct MentionsResponse {
    pub result: MentionsResult,
}

#[derive(Debug, Deserialize)]
pub struct MentionsResult {
    #[serde(default)]
    pub notifications: Vec<FeedItem>,
    #[serde(default)]
    pub next: NextCursor,
}

#[derive(Debug, Default, Deserialize)]
pub struct NextCursor {
    pub cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct FeedItem {
    #[serde(rename = "type")]
    pub kind: String,
    pub timestamp: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub hash: String,
    pub author: FeedAuthor,
}

#[derive(Debug, Deserialize)]
pub struct FeedAuthor {
    pub fid: u64,
}

// ---- v2 cast publish ----

#[derive(Debug, Serialize)]
pub struct CastRequest<'a> {
    pub signer_uuid: &'a str,
    pub text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<&'a str>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub embeds: Vec<Embed<'a>>,
}

#[derive(Debug, Serialize)]
pub struct Embed<'a> {
    pub url: &'a str,
}
