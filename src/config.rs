//! Configuration Management Module
//!
//! Loads and validates configuration for the onramp service: API server,
//! chain connection, processor credentials, pricing bounds, disbursement
//! retry policy, and per-route rate limits.

use serde::{Deserialize, Serialize};

use crate::store::Network;

// ============================================================================
// CONFIGURATION STRUCTURES
// ============================================================================

/// Main configuration structure containing all service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// API server configuration (host, port, CORS settings)
    pub api: ApiSettings,
    /// Chain connection and funding-account settings
    pub chain: ChainSettings,
    /// Payment processor credentials and webhook settings
    pub processor: ProcessorSettings,
    /// Conversion rate and purchase bounds
    pub pricing: PricingSettings,
    /// Disbursement retry and reconciliation policy
    pub disbursement: DisbursementSettings,
    /// Per-route rate limits
    pub limits: LimitSettings,
    /// Intent store persistence settings
    #[serde(default)]
    pub store: StoreSettings,
}

/// API server configuration for external communication.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiSettings {
    /// Host address to bind the API server to
    pub host: String,
    /// Port number to bind the API server to
    pub port: u16,
    /// Allowed CORS origins for cross-origin requests
    pub cors_origins: Vec<String>,
}

/// Configuration for the chain holding the funding account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainSettings {
    /// Human-readable name for the chain
    pub name: String,
    /// RPC endpoint URL for chain communication
    pub rpc_url: String,
    /// Chain ID used for transaction replay protection
    pub chain_id: u64,
    /// Network this deployment serves
    pub network: Network,
    /// Funding account private key (64 hex chars, 0x prefix optional)
    pub funding_private_key: String,
    /// Gas limit for a plain gas-token transfer
    #[serde(default = "default_gas_limit")]
    pub gas_limit: u64,
    /// How long to wait for an on-chain confirmation before handing the
    /// record to the reconciliation pass
    #[serde(default = "default_confirmation_timeout_ms")]
    pub confirmation_timeout_ms: u64,
    /// Interval between receipt polls while waiting for confirmation
    #[serde(default = "default_receipt_poll_interval_ms")]
    pub receipt_poll_interval_ms: u64,
}

/// Payment processor credentials and webhook verification settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessorSettings {
    /// Base URL of the processor's REST API
    pub api_url: String,
    /// Secret API key for processor calls
    pub secret_key: String,
    /// Shared secret for webhook signature verification
    pub webhook_secret: String,
    /// Accepted clock skew for webhook timestamps, in seconds
    #[serde(default = "default_webhook_tolerance_secs")]
    pub webhook_tolerance_secs: u64,
}

/// Conversion rate and purchase bounds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricingSettings {
    /// Configured conversion rate (USD per token)
    pub usd_per_matic: f64,
    /// Minimum purchasable token amount
    pub min_amount_matic: f64,
    /// Maximum purchasable token amount
    pub max_amount_matic: f64,
}

/// Disbursement retry and reconciliation policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisbursementSettings {
    /// Submission attempt ceiling before the intent is failed
    pub max_attempts: u32,
    /// First backoff delay; doubles per attempt
    pub backoff_base_ms: u64,
    /// Backoff cap
    pub backoff_max_ms: u64,
    /// Interval between reconciliation passes
    pub reconcile_interval_ms: u64,
    /// Capacity of the submission queue
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

/// Per-route rate limits: create-intent is stricter than reads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitSettings {
    /// Limit applied to the create-intent endpoint
    pub create: RateLimitSettings,
    /// Limit applied to status and balance reads
    pub read: RateLimitSettings,
}

/// One fixed-window rate limit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitSettings {
    /// Window length in milliseconds
    pub window_ms: u64,
    /// Requests allowed per client address per window
    pub max_requests: u32,
}

/// Intent store persistence settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreSettings {
    /// Snapshot file path; when unset the store is in-memory only
    #[serde(default)]
    pub path: Option<String>,
}

fn default_gas_limit() -> u64 {
    21_000
}

fn default_confirmation_timeout_ms() -> u64 {
    60_000
}

fn default_receipt_poll_interval_ms() -> u64 {
    2_000
}

fn default_webhook_tolerance_secs() -> u64 {
    300
}

fn default_queue_capacity() -> usize {
    1_024
}

// ============================================================================
// CONFIGURATION LOADING AND MANAGEMENT
// ============================================================================

impl Config {
    /// Loads configuration from the TOML file.
    ///
    /// The path comes from `ONRAMP_CONFIG_PATH` when set, otherwise
    /// `config/onramp.toml`.
    ///
    /// # Returns
    ///
    /// - `Ok(Config)` - Successfully loaded and validated configuration
    /// - `Err(anyhow::Error)` - File missing, unparseable, or invalid
    pub fn load() -> anyhow::Result<Self> {
        let config_path = std::env::var("ONRAMP_CONFIG_PATH")
            .unwrap_or_else(|_| "config/onramp.toml".to_string());

        if std::path::Path::new(&config_path).exists() {
            let content = std::fs::read_to_string(&config_path)?;
            Self::from_toml_str(&content)
        } else {
            Err(anyhow::anyhow!(
                "Configuration file '{}' not found. Please copy the template:\n\
                cp config/onramp.template.toml config/onramp.toml\n\
                Then edit config/onramp.toml with your actual values.",
                config_path
            ))
        }
    }

    /// Parses and validates configuration from a TOML string.
    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validates cross-field constraints.
    ///
    /// # Returns
    ///
    /// - `Ok(())` - Configuration is valid
    /// - `Err(anyhow::Error)` - First constraint violated
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.pricing.usd_per_matic <= 0.0 {
            return Err(anyhow::anyhow!(
                "Configuration error: usd_per_matic must be positive (got {})",
                self.pricing.usd_per_matic
            ));
        }
        if self.pricing.min_amount_matic <= 0.0 {
            return Err(anyhow::anyhow!(
                "Configuration error: min_amount_matic must be positive (got {})",
                self.pricing.min_amount_matic
            ));
        }
        if self.pricing.min_amount_matic >= self.pricing.max_amount_matic {
            return Err(anyhow::anyhow!(
                "Configuration error: min_amount_matic {} must be below max_amount_matic {}",
                self.pricing.min_amount_matic,
                self.pricing.max_amount_matic
            ));
        }

        validate_private_key(&self.chain.funding_private_key)?;

        if self.disbursement.max_attempts == 0 {
            return Err(anyhow::anyhow!(
                "Configuration error: max_attempts must be at least 1"
            ));
        }
        if self.disbursement.backoff_base_ms == 0 {
            return Err(anyhow::anyhow!(
                "Configuration error: backoff_base_ms must be positive"
            ));
        }

        for (label, limit) in [
            ("limits.create", &self.limits.create),
            ("limits.read", &self.limits.read),
        ] {
            if limit.window_ms == 0 || limit.max_requests == 0 {
                return Err(anyhow::anyhow!(
                    "Configuration error: {} must have positive window_ms and max_requests",
                    label
                ));
            }
        }

        Ok(())
    }
}

/// Validates the shape of a funding-account private key.
///
/// # Arguments
///
/// * `key` - 64 hex characters, `0x` prefix optional
///
/// # Returns
///
/// - `Ok(())` - Key has the expected shape
/// - `Err(anyhow::Error)` - Key is malformed
fn validate_private_key(key: &str) -> anyhow::Result<()> {
    let stripped = key.strip_prefix("0x").unwrap_or(key);
    let bytes = hex::decode(stripped)
        .map_err(|_| anyhow::anyhow!("Configuration error: funding_private_key is not hex"))?;
    if bytes.len() != 32 {
        return Err(anyhow::anyhow!(
            "Configuration error: funding_private_key must be 32 bytes, got {}",
            bytes.len()
        ));
    }
    Ok(())
}
