//! Configuration loading
//!
//! Layered with figment: a TOML file merged with `RELAYER_`-prefixed
//! environment variables (`RELAYER_CIRCLE__ATTESTATION_BASE_URL` maps to
//! `circle.attestation_base_url`). Parse or validation failures are fatal at
//! startup.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;

use alloy_primitives::Address;
use figment::providers::{Env, Format, Toml};
use figment::Figment;
use serde::{Deserialize, Deserializer};

use crate::error::{RelayerError, Result};
use crate::protocol::Domain;

const ENV_PREFIX: &str = "RELAYER_";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub chains: HashMap<String, ChainConfig>,
    /// Which source domain -> destination domain routes are relayed.
    /// Anything not listed is filtered.
    #[serde(default, deserialize_with = "deserialize_routes")]
    pub enabled_routes: HashMap<Domain, Vec<Domain>>,
    #[serde(default = "default_worker_count")]
    pub processor_worker_count: usize,
    pub circle: CircleConfig,
    #[serde(default)]
    pub api: ApiConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ChainConfig {
    Evm(EvmConfig),
    Noble(NobleConfig),
}

impl ChainConfig {
    pub fn domain(&self) -> Domain {
        match self {
            ChainConfig::Evm(cfg) => Domain(cfg.domain),
            ChainConfig::Noble(cfg) => Domain(cfg.domain),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct EvmConfig {
    pub domain: u32,
    pub rpc_url: String,
    pub ws_url: String,
    /// MessageTransmitter contract whose MessageSent events we subscribe to
    pub message_transmitter: Address,
    /// Account the attested messages are received with; also the expected
    /// destination caller
    pub minter_address: Address,
    /// Hex-encoded private key of the minter account
    pub signer_key: String,
    /// First block to observe; defaults to the chain tip at startup
    #[serde(default)]
    pub start_block: Option<u64>,
    /// How many blocks behind the cursor each backfill and flush re-scans
    #[serde(default = "default_lookback")]
    pub lookback_period: u64,
    #[serde(default = "default_broadcast_retries")]
    pub broadcast_retries: u32,
    #[serde(default = "default_evm_denom")]
    pub metrics_denom: String,
    #[serde(default = "default_evm_exponent")]
    pub metrics_exponent: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NobleConfig {
    #[serde(default = "default_noble_domain")]
    pub domain: u32,
    /// CometBFT RPC endpoint
    pub rpc_url: String,
    /// LCD REST endpoint (account and balance queries)
    pub api_url: String,
    pub chain_id: String,
    /// Hex-encoded secp256k1 private key of the minter account
    pub signer_key: String,
    #[serde(default = "default_address_prefix")]
    pub address_prefix: String,
    #[serde(default)]
    pub start_block: Option<u64>,
    #[serde(default = "default_lookback")]
    pub lookback_period: u64,
    #[serde(default = "default_block_poll_secs")]
    pub block_poll_secs: u64,
    /// Gas limit per receive message; multiplied by the batch size
    #[serde(default = "default_gas_limit")]
    pub gas_limit: u64,
    #[serde(default = "default_noble_denom")]
    pub denom: String,
    #[serde(default)]
    pub fee_amount: u128,
    #[serde(default = "default_broadcast_retries")]
    pub broadcast_retries: u32,
    #[serde(default = "default_noble_denom")]
    pub metrics_denom: String,
    #[serde(default = "default_noble_exponent")]
    pub metrics_exponent: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CircleConfig {
    /// Base URL of the attestation lookup endpoint, e.g.
    /// `https://iris-api.circle.com/v1/attestations`
    pub attestation_base_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_api_enabled")]
    pub enabled: bool,
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,
    /// Peers whose X-Forwarded-For header is believed for client logging
    #[serde(default)]
    pub trusted_proxies: Vec<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: default_api_enabled(),
            listen_addr: default_listen_addr(),
            trusted_proxies: Vec::new(),
        }
    }
}

impl Config {
    /// Loads and validates configuration from a TOML file plus environment
    /// overrides
    pub fn load(path: &Path) -> Result<Self> {
        let config: Config = Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .map_err(|err| RelayerError::Config(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.chains.is_empty() {
            return Err(RelayerError::Config("no chains configured".into()));
        }
        if self.processor_worker_count == 0 {
            return Err(RelayerError::Config(
                "processor_worker_count must be at least 1".into(),
            ));
        }
        if self.circle.attestation_base_url.is_empty() {
            return Err(RelayerError::Config(
                "circle.attestation_base_url must be set".into(),
            ));
        }
        Ok(())
    }

    /// Whether relaying from `source` to `dest` is enabled
    pub fn route_enabled(&self, source: Domain, dest: Domain) -> bool {
        self.enabled_routes
            .get(&source)
            .is_some_and(|dests| dests.contains(&dest))
    }
}

/// TOML table keys are strings; parse them into domains.
fn deserialize_routes<'de, D>(deserializer: D) -> std::result::Result<HashMap<Domain, Vec<Domain>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: HashMap<String, Vec<u32>> = HashMap::deserialize(deserializer)?;
    raw.into_iter()
        .map(|(key, dests)| {
            let source = key.parse::<u32>().map_err(|_| {
                serde::de::Error::custom(format!("invalid source domain key: {key}"))
            })?;
            Ok((Domain(source), dests.into_iter().map(Domain).collect()))
        })
        .collect()
}

fn default_worker_count() -> usize {
    4
}

fn default_lookback() -> u64 {
    100
}

fn default_broadcast_retries() -> u32 {
    5
}

fn default_noble_domain() -> u32 {
    Domain::NOBLE.as_u32()
}

fn default_address_prefix() -> String {
    "noble".to_owned()
}

fn default_block_poll_secs() -> u64 {
    5
}

fn default_gas_limit() -> u64 {
    200_000
}

fn default_evm_denom() -> String {
    "ETH".to_owned()
}

fn default_evm_exponent() -> u32 {
    18
}

fn default_noble_denom() -> String {
    "uusdc".to_owned()
}

fn default_noble_exponent() -> u32 {
    6
}

fn default_api_enabled() -> bool {
    true
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8000))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        processor_worker_count = 8

        [circle]
        attestation_base_url = "https://iris-api.circle.com/v1/attestations"

        [enabled_routes]
        0 = [4]
        4 = [0]

        [api]
        listen_addr = "127.0.0.1:8000"
        trusted_proxies = ["10.0.0.1"]

        [chains.ethereum]
        type = "evm"
        domain = 0
        rpc_url = "http://localhost:8545"
        ws_url = "ws://localhost:8546"
        message_transmitter = "0x0a992d191DEeC32aFe36203Ad87D7d289a738F81"
        minter_address = "0x742d35Cc6634C0532925a3b844Bc9e7595f8fA0d"
        signer_key = "0x0101010101010101010101010101010101010101010101010101010101010101"
        start_block = 1000
        lookback_period = 50

        [chains.noble]
        type = "noble"
        rpc_url = "http://localhost:26657"
        api_url = "http://localhost:1317"
        chain_id = "noble-1"
        signer_key = "0202020202020202020202020202020202020202020202020202020202020202"
    "#;

    fn parse(toml: &str) -> Config {
        Figment::new()
            .merge(Toml::string(toml))
            .extract()
            .expect("config should parse")
    }

    #[test]
    fn test_parse_sample_config() {
        let config = parse(SAMPLE);
        config.validate().unwrap();

        assert_eq!(config.processor_worker_count, 8);
        assert_eq!(config.chains.len(), 2);
        assert!(config.route_enabled(Domain::ETHEREUM, Domain::NOBLE));
        assert!(config.route_enabled(Domain::NOBLE, Domain::ETHEREUM));
        assert!(!config.route_enabled(Domain::ETHEREUM, Domain(5)));

        match &config.chains["ethereum"] {
            ChainConfig::Evm(cfg) => {
                assert_eq!(cfg.domain, 0);
                assert_eq!(cfg.start_block, Some(1000));
                assert_eq!(cfg.lookback_period, 50);
                assert_eq!(cfg.broadcast_retries, 5);
            }
            other => panic!("expected evm chain, got {other:?}"),
        }
        match &config.chains["noble"] {
            ChainConfig::Noble(cfg) => {
                assert_eq!(cfg.domain, 4);
                assert_eq!(cfg.address_prefix, "noble");
                assert_eq!(cfg.gas_limit, 200_000);
                assert_eq!(cfg.block_poll_secs, 5);
            }
            other => panic!("expected noble chain, got {other:?}"),
        }
    }

    #[test]
    fn test_default_worker_count() {
        let toml = SAMPLE.replace("processor_worker_count = 8", "");
        let config = parse(&toml);
        assert_eq!(config.processor_worker_count, 4);
    }

    #[test]
    fn test_validate_rejects_zero_workers() {
        let toml = SAMPLE.replace(
            "processor_worker_count = 8",
            "processor_worker_count = 0",
        );
        let config = parse(&toml);
        assert!(matches!(
            config.validate(),
            Err(RelayerError::Config(_))
        ));
    }

    #[test]
    fn test_invalid_route_key_fails() {
        let toml = SAMPLE.replace("0 = [4]", "ethereum = [4]");
        let result: std::result::Result<Config, _> =
            Figment::new().merge(Toml::string(&toml)).extract();
        assert!(result.is_err());
    }

    #[test]
    fn test_api_defaults() {
        let toml = SAMPLE
            .replace("[api]", "")
            .replace("listen_addr = \"127.0.0.1:8000\"", "")
            .replace("trusted_proxies = [\"10.0.0.1\"]", "");
        let config = parse(&toml);
        assert!(config.api.enabled);
        assert_eq!(config.api.listen_addr, default_listen_addr());
        assert!(config.api.trusted_proxies.is_empty());
    }
}
