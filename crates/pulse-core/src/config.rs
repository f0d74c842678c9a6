//! ============================================================================
//! Configuration - environment driven (.env supported via dotenvy)
//! ============================================================================

use std::str::FromStr;
use std::time::Duration;

use alloy_primitives::{Address, B256};
use anyhow::{anyhow, Context, Result};
use k256::ecdsa::SigningKey;

use crate::chain::{ConfirmationConfig, GatewayConfig};
use crate::executor::{ExecutorConfig, DEFAULT_DEADLINE_SECS};
use crate::scheduler::{SchedulerConfig, DEFAULT_SCAN_INTERVAL_SECS};

pub const DEFAULT_EXPLORER_URL: &str = "https://celo-sepolia.blockscout.com";

#[derive(Debug, Clone)]
pub struct PulseConfig {
    pub gateway: GatewayConfig,
    pub executor: ExecutorConfig,
    pub scheduler: SchedulerConfig,
    /// `None` falls back to PULSE_DB_PATH / ~/.pulse/agent.redb
    pub db_path: Option<String>,
}

fn required(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<String> {
    lookup(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| anyhow!("Missing required environment variable {}", key))
}

fn optional(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<String> {
    lookup(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_or<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    match optional(lookup, key) {
        Some(raw) => raw
            .parse::<T>()
            .map_err(|e| anyhow!("Invalid {} '{}': {}", key, raw, e)),
        None => Ok(default),
    }
}

fn parse_bool(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: bool) -> Result<bool> {
    match optional(lookup, key).map(|v| v.to_lowercase()) {
        None => Ok(default),
        Some(v) if matches!(v.as_str(), "1" | "true" | "yes" | "on") => Ok(true),
        Some(v) if matches!(v.as_str(), "0" | "false" | "no" | "off") => Ok(false),
        Some(v) => Err(anyhow!("Invalid {} '{}': expected true or false", key, v)),
    }
}

fn parse_address(key: &str, raw: &str) -> Result<Address> {
    Address::from_str(raw).map_err(|e| anyhow!("Invalid {} '{}': {}", key, raw, e))
}

fn parse_agent_key(raw: &str) -> Result<SigningKey> {
    // Never echo the key itself in errors
    let bytes = B256::from_str(raw).map_err(|_| anyhow!("AGENT_PRIVATE_KEY must be 32 bytes of 0x hex"))?;
    SigningKey::from_slice(bytes.as_slice())
        .map_err(|_| anyhow!("AGENT_PRIVATE_KEY is not a valid secp256k1 key"))
}

impl PulseConfig {
    /// Load `.env` (if present) and read the process environment.
    pub fn from_env() -> Result<Self> {
        if let Err(e) = dotenvy::dotenv() {
            tracing::debug!("No .env file loaded: {}", e);
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let rpc_url = required(&lookup, "CELO_RPC_URL")?;
        let chain_id: u64 = required(&lookup, "CELO_CHAIN_ID")?
            .parse()
            .context("Invalid CELO_CHAIN_ID")?;
        let agent_key = parse_agent_key(&required(&lookup, "AGENT_PRIVATE_KEY")?)?;
        let agent_id: u64 = required(&lookup, "PLATFORM_AGENT_ID")?
            .parse()
            .context("Invalid PLATFORM_AGENT_ID")?;
        let vault = parse_address("VAULT_ADDRESS", &required(&lookup, "VAULT_ADDRESS")?)?;

        let identity_registry = optional(&lookup, "IDENTITY_REGISTRY")
            .map(|raw| parse_address("IDENTITY_REGISTRY", &raw))
            .transpose()?;
        let reputation_registry = optional(&lookup, "REPUTATION_REGISTRY")
            .map(|raw| parse_address("REPUTATION_REGISTRY", &raw))
            .transpose()?;
        let explorer_url =
            optional(&lookup, "EXPLORER_URL").unwrap_or_else(|| DEFAULT_EXPLORER_URL.to_string());

        let defaults = ConfirmationConfig::default();
        let confirmation = ConfirmationConfig {
            poll_interval_ms: parse_or(&lookup, "CONFIRM_POLL_MS", defaults.poll_interval_ms)?,
            ..defaults
        };

        let executor = ExecutorConfig {
            enforce_signer_match: parse_bool(&lookup, "ENFORCE_SIGNER_MATCH", true)?,
            require_agent_verification: parse_bool(&lookup, "REQUIRE_AGENT_VERIFICATION", false)?,
            fallback_deadline_secs: DEFAULT_DEADLINE_SECS,
            recurring_deadline_secs: parse_or(&lookup, "RECURRING_DEADLINE_SECS", DEFAULT_DEADLINE_SECS)?,
        };

        let interval_secs: u64 = parse_or(&lookup, "SCHEDULER_INTERVAL_SECS", DEFAULT_SCAN_INTERVAL_SECS)?;
        if interval_secs == 0 {
            return Err(anyhow!("SCHEDULER_INTERVAL_SECS must be greater than zero"));
        }

        Ok(Self {
            gateway: GatewayConfig {
                rpc_url,
                chain_id,
                vault,
                identity_registry,
                reputation_registry,
                agent_id,
                agent_key,
                explorer_url,
                confirmation,
            },
            executor,
            scheduler: SchedulerConfig {
                interval: Duration::from_secs(interval_secs),
            },
            db_path: optional(&lookup, "PULSE_DB_PATH"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const KEY: &str = "0x4646464646464646464646464646464646464646464646464646464646464646";

    fn base() -> HashMap<&'static str, String> {
        HashMap::from([
            ("CELO_RPC_URL", "https://forno.celo-sepolia.celo-testnet.org".to_string()),
            ("CELO_CHAIN_ID", "11142220".to_string()),
            ("AGENT_PRIVATE_KEY", KEY.to_string()),
            ("PLATFORM_AGENT_ID", "7".to_string()),
            ("VAULT_ADDRESS", "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa".to_string()),
        ])
    }

    fn load(vars: &HashMap<&'static str, String>) -> Result<PulseConfig> {
        PulseConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = load(&base()).unwrap();
        assert_eq!(config.gateway.chain_id, 11142220);
        assert_eq!(config.gateway.agent_id, 7);
        assert_eq!(config.gateway.explorer_url, DEFAULT_EXPLORER_URL);
        assert!(config.gateway.identity_registry.is_none());
        assert_eq!(config.scheduler.interval, Duration::from_secs(3600));
        assert_eq!(config.executor.recurring_deadline_secs, 3600);
        assert!(config.executor.enforce_signer_match);
        assert!(!config.executor.require_agent_verification);
        assert!(config.db_path.is_none());
    }

    #[test]
    fn test_overrides() {
        let mut vars = base();
        vars.insert("SCHEDULER_INTERVAL_SECS", "60".into());
        vars.insert("ENFORCE_SIGNER_MATCH", "false".into());
        vars.insert("REQUIRE_AGENT_VERIFICATION", "1".into());
        vars.insert("IDENTITY_REGISTRY", "0xbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb".into());
        vars.insert("CONFIRM_POLL_MS", "250".into());
        vars.insert("PULSE_DB_PATH", "/tmp/pulse.redb".into());

        let config = load(&vars).unwrap();
        assert_eq!(config.scheduler.interval, Duration::from_secs(60));
        assert!(!config.executor.enforce_signer_match);
        assert!(config.executor.require_agent_verification);
        assert_eq!(
            config.gateway.identity_registry,
            Some(Address::repeat_byte(0xbb))
        );
        assert_eq!(config.gateway.confirmation.poll_interval_ms, 250);
        assert_eq!(config.db_path.as_deref(), Some("/tmp/pulse.redb"));
    }

    #[test]
    fn test_missing_required_key_is_named() {
        let mut vars = base();
        vars.remove("VAULT_ADDRESS");
        let err = load(&vars).unwrap_err();
        assert!(err.to_string().contains("VAULT_ADDRESS"));
    }

    #[test]
    fn test_bad_private_key_is_not_echoed() {
        let mut vars = base();
        vars.insert("AGENT_PRIVATE_KEY", "0xdeadbeef".into());
        let err = load(&vars).unwrap_err().to_string();
        assert!(err.contains("AGENT_PRIVATE_KEY"));
        assert!(!err.contains("deadbeef"));
    }

    #[test]
    fn test_zero_interval_rejected() {
        let mut vars = base();
        vars.insert("SCHEDULER_INTERVAL_SECS", "0".into());
        assert!(load(&vars).is_err());
    }
}
