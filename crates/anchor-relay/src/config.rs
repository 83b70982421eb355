//! Relay configuration.
//!
//! Loaded from TOML with camelCase keys:
//!
//! ```toml
//! rpcEndpoint = "https://rpc.example.org"
//! contractAddress = "0x5fbdb2315678afecb367f032d93f642f64180aa3"
//! blobGatewayList = ["https://gw1.example.org", "https://gw2.example.org"]
//! baseReconnectIntervalMs = 1000
//! maxReconnectAttempts = 5
//! reconciliationIntervalMs = 300000
//! ```
//!
//! Invalid configuration is fatal at construction and never surfaces later.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use anchor_relay_core::Address;

use crate::error::ConfigError;

const DEFAULT_BASE_RECONNECT_INTERVAL_MS: u64 = 1_000;
const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 5;
const DEFAULT_RECONCILIATION_INTERVAL_MS: u64 = 5 * 60 * 1_000;
const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_BLOB_CONCURRENCY: usize = 8;
const DEFAULT_RECONCILIATION_LOOKBACK_SECS: u64 = 24 * 60 * 60;
const DEFAULT_PENDING_GRACE_SECS: u64 = 10 * 60;

/// Options recognized by the relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RelayConfig {
    /// Ledger JSON-RPC endpoint.
    pub rpc_endpoint: Option<Url>,

    /// Anchoring contract (also hosts the identity registry).
    pub contract_address: Option<Address>,

    /// First reconnect delay; doubles on each consecutive failure.
    pub base_reconnect_interval_ms: u64,

    /// Consecutive failures after which automatic reconnects stop.
    pub max_reconnect_attempts: u32,

    /// Period of the consistency reconciler.
    pub reconciliation_interval_ms: u64,

    /// Blob gateways, tried in order.
    pub blob_gateway_list: Vec<Url>,

    /// Upper bound on every ledger query, blob call and stream connect.
    pub request_timeout_ms: u64,

    /// Maximum concurrent blob calls.
    pub blob_concurrency: usize,

    /// How far back the reconciler looks for anchors.
    pub reconciliation_lookback_secs: u64,

    /// Unconfirmed cache entries younger than this are never purged.
    pub pending_grace_secs: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            rpc_endpoint: None,
            contract_address: None,
            base_reconnect_interval_ms: DEFAULT_BASE_RECONNECT_INTERVAL_MS,
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            reconciliation_interval_ms: DEFAULT_RECONCILIATION_INTERVAL_MS,
            blob_gateway_list: Vec::new(),
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            blob_concurrency: DEFAULT_BLOB_CONCURRENCY,
            reconciliation_lookback_secs: DEFAULT_RECONCILIATION_LOOKBACK_SECS,
            pending_grace_secs: DEFAULT_PENDING_GRACE_SECS,
        }
    }
}

impl RelayConfig {
    /// A configuration with the required options set and defaults elsewhere.
    pub fn new(rpc_endpoint: Url, contract_address: Address, blob_gateway_list: Vec<Url>) -> Self {
        Self {
            rpc_endpoint: Some(rpc_endpoint),
            contract_address: Some(contract_address),
            blob_gateway_list,
            ..Self::default()
        }
    }

    /// Parse and validate TOML.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(s).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Parse(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&contents)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let endpoint = self.rpc_endpoint.as_ref().ok_or(ConfigError::Missing("rpcEndpoint"))?;
        check_http("rpcEndpoint", endpoint)?;

        let contract = self.contract_address.ok_or(ConfigError::Missing("contractAddress"))?;
        if contract.is_zero() {
            return Err(ConfigError::Invalid {
                field: "contractAddress",
                reason: "zero address".into(),
            });
        }

        if self.blob_gateway_list.is_empty() {
            return Err(ConfigError::Missing("blobGatewayList"));
        }
        for gateway in &self.blob_gateway_list {
            check_http("blobGatewayList", gateway)?;
        }

        for (field, value) in [
            ("baseReconnectIntervalMs", self.base_reconnect_interval_ms),
            ("reconciliationIntervalMs", self.reconciliation_interval_ms),
            ("requestTimeoutMs", self.request_timeout_ms),
            ("maxReconnectAttempts", u64::from(self.max_reconnect_attempts)),
            ("blobConcurrency", self.blob_concurrency as u64),
        ] {
            if value == 0 {
                return Err(ConfigError::Invalid {
                    field,
                    reason: "must be greater than zero".into(),
                });
            }
        }

        // Backoff is base * 2^(attempts-1); keep it representable.
        if self.max_reconnect_attempts > 32 {
            return Err(ConfigError::Invalid {
                field: "maxReconnectAttempts",
                reason: "must be at most 32".into(),
            });
        }

        Ok(())
    }

    pub fn base_reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.base_reconnect_interval_ms)
    }

    pub fn reconciliation_interval(&self) -> Duration {
        Duration::from_millis(self.reconciliation_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

fn check_http(field: &'static str, url: &Url) -> Result<(), ConfigError> {
    match url.scheme() {
        "http" | "https" if url.host().is_some() => Ok(()),
        other => Err(ConfigError::Invalid {
            field,
            reason: format!("expected an http(s) URL, got scheme {:?} in {}", other, url),
        }),
    }
}
