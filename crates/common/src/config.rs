use std::str::FromStr;

use serde::Deserialize;

/// Global application configuration loaded from environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Neynar API key, sent as the `api_key` header
    pub neynar_api_key: String,

    /// Neynar REST endpoint
    pub neynar_api_endpoint: String,

    /// Neynar hub endpoint (verifications lookups)
    pub neynar_hub_endpoint: String,

    /// FID of the account that publishes notifications
    pub bot_fid: u64,

    /// Signer UUID used to sign casts on behalf of the bot
    pub bot_signer_uuid: String,

    /// Redis connection string
    pub redis_url: String,

    /// Seconds between dispatch cycles (default: 30)
    pub notifier_listen_interval_secs: u64,

    /// Pause between consecutive sends within a cycle (default: 500)
    pub notifier_send_interval_ms: u64,

    /// Maximum notifications fetched per cycle (default: 100)
    pub notifier_batch_size: usize,

    /// Maximum concurrent send workers per cycle (default: 10)
    pub notifier_max_workers: usize,

    /// Maximum simultaneous in-flight upstream requests (default: 2)
    pub api_max_concurrent_requests: usize,

    /// Maximum attempts per upstream request while rate limited (default: 12)
    pub api_max_retries: u32,

    /// Linear backoff unit in milliseconds (default: 1000)
    pub api_base_delay_ms: u64,

    /// Upper bound of the random jitter added to each backoff (default: 2000)
    pub api_max_jitter_ms: u64,

    /// Per-attempt request timeout in seconds (default: 5)
    pub api_request_timeout_secs: u64,
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| {
            lookup(key)
                .filter(|v| !v.is_empty())
                .ok_or_else(|| anyhow::anyhow!("{key} environment variable is required"))
        };

        let config = Self {
            neynar_api_key: required("NEYNAR_API_KEY")?,
            neynar_api_endpoint: lookup("NEYNAR_API_ENDPOINT")
                .unwrap_or_else(|| "https://api.neynar.com".to_string()),
            neynar_hub_endpoint: lookup("NEYNAR_HUB_ENDPOINT")
                .unwrap_or_else(|| "https://hub-api.neynar.com".to_string()),
            bot_fid: required("BOT_FID")?
                .parse()
                .map_err(|_| anyhow::anyhow!("BOT_FID must be a valid u64"))?,
            bot_signer_uuid: required("BOT_SIGNER_UUID")?,
            redis_url: lookup("REDIS_URL").unwrap_or_else(|| "redis://localhost:6379".to_string()),
            notifier_listen_interval_secs: parse_or(&lookup, "NOTIFIER_LISTEN_INTERVAL_SECS", 30)?,
            notifier_send_interval_ms: parse_or(&lookup, "NOTIFIER_SEND_INTERVAL_MS", 500)?,
            notifier_batch_size: parse_or(&lookup, "NOTIFIER_BATCH_SIZE", 100)?,
            notifier_max_workers: parse_or(&lookup, "NOTIFIER_MAX_WORKERS", 10)?,
            api_max_concurrent_requests: parse_or(&lookup, "API_MAX_CONCURRENT_REQUESTS", 2)?,
            api_max_retries: parse_or(&lookup, "API_MAX_RETRIES", 12)?,
            api_base_delay_ms: parse_or(&lookup, "API_BASE_DELAY_MS", 1000)?,
            api_max_jitter_ms: parse_or(&lookup, "API_MAX_JITTER_MS", 2000)?,
            api_request_timeout_secs: parse_or(&lookup, "API_REQUEST_TIMEOUT_SECS", 5)?,
        };

        if config.bot_fid == 0 {
            anyhow::bail!("BOT_FID must be non-zero");
        }
        for (key, value) in [
            ("NOTIFIER_BATCH_SIZE", config.notifier_batch_size),
            ("NOTIFIER_MAX_WORKERS", config.notifier_max_workers),
            ("API_MAX_CONCURRENT_REQUESTS", config.api_max_concurrent_requests),
            ("API_MAX_RETRIES", config.api_max_retries as usize),
        ] {
            if value == 0 {
                anyhow::bail!("{key} must be greater than zero");
            }
        }

        Ok(config)
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> anyhow::Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| anyhow::anyhow!("{key} must be a valid {}", std::any::type_name::<T>())),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    const REQUIRED: [(&str, &str); 3] = [
        ("NEYNAR_API_KEY", "key"),
        ("BOT_FID", "1234"),
        ("BOT_SIGNER_UUID", "signer"),
    ];

    #[test]
    fn test_defaults_applied() {
        let config = AppConfig::from_lookup(lookup_from(&REQUIRED)).unwrap();
        assert_eq!(config.bot_fid, 1234);
        assert_eq!(config.notifier_listen_interval_secs, 30);
        assert_eq!(config.notifier_send_interval_ms, 500);
        assert_eq!(config.notifier_batch_size, 100);
        assert_eq!(config.notifier_max_workers, 10);
        assert_eq!(config.api_max_concurrent_requests, 2);
        assert_eq!(config.api_max_retries, 12);
        assert_eq!(config.api_request_timeout_secs, 5);
        assert_eq!(config.redis_url, "redis://localhost:6379");
    }

    #[test]
    fn test_missing_required_key() {
        let err = AppConfig::from_lookup(lookup_from(&REQUIRED[..2])).unwrap_err();
        assert!(err.to_string().contains("BOT_SIGNER_UUID"));
    }

    #[test]
    fn test_invalid_number_rejected() {
        let mut pairs = REQUIRED.to_vec();
        pairs.push(("NOTIFIER_MAX_WORKERS", "many"));
        let err = AppConfig::from_lookup(lookup_from(&pairs)).unwrap_err();
        assert!(err.to_string().contains("NOTIFIER_MAX_WORKERS"));
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let mut pairs = REQUIRED.to_vec();
        pairs.push(("API_MAX_CONCURRENT_REQUESTS", "0"));
        let err = AppConfig::from_lookup(lookup_from(&pairs)).unwrap_err();
        assert!(err.to_string().contains("API_MAX_CONCURRENT_REQUESTS"));
    }

    #[test]
    fn test_overrides() {
        let mut pairs = REQUIRED.to_vec();
        pairs.push(("NOTIFIER_SEND_INTERVAL_MS", "250"));
        pairs.push(("NEYNAR_API_ENDPOINT", "http://localhost:8080"));
        let config = AppConfig::from_lookup(lookup_from(&pairs)).unwrap();
        assert_eq!(config.notifier_send_interval_ms, 250);
        assert_eq!(config.neynar_api_endpoint, "http://localhost:8080");
    }
}
