//! Neynar-backed implementation of [`FarcasterApi`].
//!
//! Each operation encodes its request, runs it through the shared
//! [`CallExecutor`] and decodes the upstream shape from [`crate::wire`] into
//! the domain types of `pollcast-common`.

use std::collections::BTreeSet;
use std::str::FromStr;
use std::sync::Arc;

use alloy::primitives::Address;
use async_trait::async_trait;
use chrono::DateTime;
use reqwest::Url;
use serde::de::DeserializeOwned;

use pollcast_common::config::AppConfig;
use pollcast_common::types::{Mention, UserProfile};

use crate::api::{CastContext, FarcasterApi};
use crate::error::GatewayError;
use crate::executor::{CallExecutor, HttpMethod, ReqwestTransport, RetryPolicy};
use crate::rate_gate::RateGate;
use crate::wire::{
    CastRequest, Embed, HUB_MESSAGE_TYPE_VERIFICATION, HubVerificationsResponse, MENTION_TYPE,
    MentionsResponse, UserResponse, UsersByAddressResponse,
};

/// Items requested per page of the mentions feed.
const FEED_PAGE_SIZE: u32 = 150;

/// Base URLs of the two Neynar services.
#[derive(Debug, Clone)]
pub struct NeynarEndpoints {
    pub api: String,
    pub hub: String,
}

impl Default for NeynarEndpoints {
    fn default() -> Self {
        Self {
            api: "https://api.neynar.com".to_string(),
            hub: "https://hub-api.neynar.com".to_string(),
        }
    }
}

/// The account notifications are published from.
#[derive(Debug, Clone)]
struct BotIdentity {
    fid: u64,
    signer_uuid: String,
    username: String,
}

/// Neynar API client.
pub struct NeynarClient {
    executor: CallExecutor,
    endpoints: NeynarEndpoints,
    identity: Option<BotIdentity>,
}

impl NeynarClient {
    pub fn new(executor: CallExecutor, endpoints: NeynarEndpoints) -> Self {
        Self {
            executor,
            endpoints,
            identity: None,
        }
    }

    /// Build an unconfigured client from the application config.
    pub fn from_config(config: &AppConfig) -> anyhow::Result<Self> {
        let transport = Arc::new(ReqwestTransport::new(&config.neynar_api_key)?);
        let executor = CallExecutor::new(
            transport,
            RateGate::new(config.api_max_concurrent_requests),
            RetryPolicy::from_config(config),
        );
        let endpoints = NeynarEndpoints {
            api: config.neynar_api_endpoint.trim_end_matches('/').to_string(),
            hub: config.neynar_hub_endpoint.trim_end_matches('/').to_string(),
        };
        Ok(Self::new(executor, endpoints))
    }

    /// Set the publishing account and resolve its username.
    pub async fn configure(
        &mut self,
        fid: u64,
        signer_uuid: impl Into<String>,
    ) -> Result<(), GatewayError> {
        if fid == 0 {
            return Err(GatewayError::InvalidInput("fid must be non-zero".to_string()));
        }
        let profile = self.resolve_identity(fid).await?;
        tracing::info!(fid, username = %profile.username, "Farcaster identity configured");

        self.identity = Some(BotIdentity {
            fid,
            signer_uuid: signer_uuid.into(),
            username: profile.username,
        });
        Ok(())
    }

    /// FID of the configured account, if any.
    pub fn fid(&self) -> Option<u64> {
        self.identity.as_ref().map(|i| i.fid)
    }

    /// Username of the configured account, if any.
    pub fn username(&self) -> Option<&str> {
        self.identity.as_ref().map(|i| i.username.as_str())
    }

    /// Publish `text` as a reply to the message with hash `parent_hash`.
    pub async fn reply(&self, parent_hash: &str, text: &str) -> Result<(), GatewayError> {
        let identity = self.identity()?;
        self.post_cast(&CastRequest {
            signer_uuid: &identity.signer_uuid,
            text,
            parent: Some(parent_hash),
            embeds: Vec::new(),
        })
        .await
    }

    fn identity(&self) -> Result<&BotIdentity, GatewayError> {
        self.identity.as_ref().ok_or(GatewayError::NotConfigured)
    }

    async fn post_cast(&self, request: &CastRequest<'_>) -> Result<(), GatewayError> {
        let body = serde_json::to_vec(request)
            .map_err(|e| GatewayError::InvalidInput(format!("encoding cast: {e}")))?;
        let url = format!("{}/v2/farcaster/cast", self.endpoints.api);
        self.executor
            .execute(&url, HttpMethod::Post, Some(body.as_slice()))
            .await?;
        Ok(())
    }

    /// Lowercased, deduplicated signers of the address verifications of `fid`.
    async fn signers_for(&self, fid: u64) -> Result<Vec<String>, GatewayError> {
        let url = build_url(
            &format!("{}/v1/verificationsByFid", self.endpoints.hub),
            &[("fid", fid.to_string())],
        )?;
        let body = self
            .executor
            .execute(url.as_str(), HttpMethod::Get, None)
            .await?;
        let response: HubVerificationsResponse = decode(&body, "verifications")?;

        let mut signers = BTreeSet::new();
        for message in response.messages {
            let is_verification = message.data.as_ref().is_some_and(|data| {
                data.kind == HUB_MESSAGE_TYPE_VERIFICATION
                    && data.verification_add_eth_address_body.is_some()
            });
            if !is_verification || message.signer.is_empty() {
                tracing::warn!(fid, "Skipping invalid verification message");
                continue;
            }
            signers.insert(message.signer.to_lowercase());
        }
        Ok(signers.into_iter().collect())
    }
}

#[async_trait]
impl FarcasterApi for NeynarClient {
    /// Publishes one public cast. The cast has no recipient field, so
    /// recipients are addressed through the `@handle` in `text`.
    async fn send_message(
        &self,
        recipients: &[u64],
        text: &str,
        context: &CastContext,
    ) -> Result<(), GatewayError> {
        let identity = self.identity()?;
        if recipients.is_empty() {
            return Err(GatewayError::InvalidInput("no recipients".to_string()));
        }

        let request = CastRequest {
            signer_uuid: &identity.signer_uuid,
            text,
            parent: context.parent.as_deref(),
            embeds: context
                .embed_url
                .as_deref()
                .map(|url| Embed { url })
                .into_iter()
                .collect(),
        };
        self.post_cast(&request).await?;

        tracing::debug!(recipients = ?recipients, "Message published");
        Ok(())
    }

    async fn resolve_identity(&self, fid: u64) -> Result<UserProfile, GatewayError> {
        let url = build_url(
            &format!("{}/v1/farcaster/user", self.endpoints.api),
            &[("fid", fid.to_string())],
        )?;
        let body = match self
            .executor
            .execute(url.as_str(), HttpMethod::Get, None)
            .await
        {
            Err(GatewayError::Upstream { status: 404, .. }) => {
                return Err(GatewayError::NoDataFound(format!("fid {fid}")));
            }
            other => other?,
        };
        let response: UserResponse = decode(&body, "user")?;
        let user = response
            .result
            .user
            .filter(|u| u.fid != 0)
            .ok_or_else(|| GatewayError::NoDataFound(format!("fid {fid}")))?;

        let signers = self.signers_for(fid).await?;

        Ok(UserProfile {
            fid,
            username: user.username,
            custody_address: checksum_or_raw(&user.custody_address),
            verification_addresses: user
                .verification_addresses
                .iter()
                .map(|a| checksum_or_raw(a))
                .collect(),
            signers,
        })
    }

    async fn resolve_identity_by_address(
        &self,
        address: &str,
    ) -> Result<UserProfile, GatewayError> {
        let address = normalize_address(address)?;
        let url = build_url(
            &format!("{}/v2/farcaster/user/bulk-by-address", self.endpoints.api),
            &[("addresses", address.clone())],
        )?;
        let body = match self
            .executor
            .execute(url.as_str(), HttpMethod::Get, None)
            .await
        {
            Err(GatewayError::Upstream { status: 404, .. }) => {
                return Err(GatewayError::NoDataFound(format!("address {address}")));
            }
            other => other?,
        };

        // The response is keyed by the address as the upstream formats it,
        // so take the first entry instead of looking ours up.
        let results: UsersByAddressResponse = decode(&body, "users by address")?;
        let candidates = results.into_values().next().unwrap_or_default();
        let user = candidates
            .into_iter()
            .find(|u| !u.username.is_empty())
            .ok_or_else(|| GatewayError::NoDataFound(format!("address {address}")))?;

        let signers = self.signers_for(user.fid).await?;

        Ok(UserProfile {
            fid: user.fid,
            username: user.username,
            custody_address: checksum_or_raw(&user.custody_address),
            verification_addresses: user
                .verified_addresses
                .eth_addresses
                .iter()
                .map(|a| checksum_or_raw(a))
                .collect(),
            signers,
        })
    }

    async fn list_recent_mentions(&self, since: u64) -> Result<(Vec<Mention>, u64), GatewayError> {
        let identity = self.identity()?;
        let handle = format!("@{}", identity.username);
        let endpoint = format!("{}/v1/farcaster/mentions-and-replies", self.endpoints.api);

        let mut mentions = Vec::new();
        let mut last_timestamp = since;
        let mut cursor: Option<String> = None;

        loop {
            let mut params = vec![
                ("fid", identity.fid.to_string()),
                ("limit", FEED_PAGE_SIZE.to_string()),
            ];
            if let Some(cursor) = &cursor {
                params.push(("cursor", cursor.clone()));
            }
            let url = build_url(&endpoint, &params)?;
            let body = self
                .executor
                .execute(url.as_str(), HttpMethod::Get, None)
                .await?;
            let page: MentionsResponse = decode(&body, "mentions")?;

            for item in page.result.notifications {
                if item.kind != MENTION_TYPE {
                    continue;
                }
                let timestamp = parse_timestamp(&item.timestamp)?;
                if timestamp <= since {
                    continue;
                }
                let text = match item.text.strip_prefix(handle.as_str()) {
                    Some(rest) if !identity.username.is_empty() => rest,
                    _ => item.text.as_str(),
                };
                mentions.push(Mention {
                    author_fid: item.author.fid,
                    content: text.trim().to_string(),
                    hash: item.hash,
                    timestamp,
                });
                last_timestamp = last_timestamp.max(timestamp);
            }

            match page.result.next.cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => break,
            }
        }

        tracing::debug!(
            count = mentions.len(),
            since,
            last_timestamp,
            "Fetched recent mentions"
        );
        Ok((mentions, last_timestamp))
    }
}

fn build_url(base: &str, params: &[(&str, String)]) -> Result<Url, GatewayError> {
    Url::parse_with_params(base, params)
        .map_err(|e| GatewayError::InvalidInput(format!("invalid url {base}: {e}")))
}

fn decode<T: DeserializeOwned>(body: &[u8], what: &str) -> Result<T, GatewayError> {
    serde_json::from_slice(body).map_err(|e| GatewayError::Decode(format!("{what} response: {e}")))
}

/// Parse a feed timestamp (`2024-02-01T10:00:00.000Z`) into unix seconds.
fn parse_timestamp(raw: &str) -> Result<u64, GatewayError> {
    let parsed = DateTime::parse_from_rfc3339(raw)
        .map_err(|e| GatewayError::Decode(format!("timestamp {raw:?}: {e}")))?;
    Ok(parsed.timestamp().max(0) as u64)
}

/// Render an Ethereum address in EIP-55 checksummed form.
pub fn normalize_address(address: &str) -> Result<String, GatewayError> {
    Address::from_str(address.trim())
        .map(|a| a.to_checksum(None))
        .map_err(|e| GatewayError::InvalidInput(format!("address {address:?}: {e}")))
}

/// Checksummed form of upstream-supplied addresses, kept verbatim if unparsable.
fn checksum_or_raw(address: &str) -> String {
    normalize_address(address).unwrap_or_else(|_| address.to_string())
}
