use std::env;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use eyre::{eyre, Result, WrapErr};

use crate::evm::rpc_fallback::parse_rpc_urls;
use crate::redact::{redact_url, Redacted};
use crate::relay::RelayConfig;
use crate::scanner::ScanConfig;
use crate::submitter::SubmitConfig;
use crate::types::ChainRole;

/// Main configuration for the warden
#[derive(Debug, Clone)]
pub struct Config {
    pub source: ChainConfig,
    pub destination: ChainConfig,
    pub contract_info_path: PathBuf,
    pub state: StateConfig,
    pub key: KeyConfig,
    pub scan: ScanConfig,
    pub submit: SubmitConfig,
    pub poll_interval_ms: u64,
    pub api_port: u16,
}

/// RPC connection settings for one chain
#[derive(Clone)]
pub struct ChainConfig {
    pub role: ChainRole,
    pub rpc_url: String,
    /// Additional RPC URLs tried in order when the primary does not answer
    pub rpc_fallback_urls: Vec<String>,
    /// Reject the endpoint if the node reports a different chain id
    pub chain_id: Option<u64>,
    /// Proof-of-authority chain (non-standard block headers)
    pub poa: bool,
    /// Confirmation depth subtracted from the head before scanning
    pub finality_blocks: u64,
}

/// Custom Debug that strips credentials/API keys from RPC URLs.
impl fmt::Debug for ChainConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChainConfig")
            .field("role", &self.role)
            .field("rpc_url", &redact_url(&self.rpc_url))
            .field(
                "rpc_fallback_urls",
                &self
                    .rpc_fallback_urls
                    .iter()
                    .map(|u| redact_url(u))
                    .collect::<Vec<_>>(),
            )
            .field("chain_id", &self.chain_id)
            .field("poa", &self.poa)
            .field("finality_blocks", &self.finality_blocks)
            .finish()
    }
}

impl ChainConfig {
    /// All RPC URLs: primary followed by fallbacks.
    pub fn all_rpc_urls(&self) -> Vec<String> {
        let mut urls = vec![self.rpc_url.clone()];
        urls.extend(self.rpc_fallback_urls.iter().cloned());
        urls
    }
}

/// Locations of the persisted cursor and processed-events files
#[derive(Debug, Clone)]
pub struct StateConfig {
    pub state_file: PathBuf,
    pub processed_file: PathBuf,
}

/// Where the warden key comes from
#[derive(Clone)]
pub struct KeyConfig {
    pub private_key: Option<String>,
    pub key_file: PathBuf,
}

/// Custom Debug that redacts private_key to prevent accidental log leakage.
impl fmt::Debug for KeyConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyConfig")
            .field("private_key", &self.private_key.as_ref().map(Redacted))
            .field("key_file", &self.key_file)
            .finish()
    }
}

/// Default functions
fn default_source_rpc() -> String {
    "https://api.avax-test.network/ext/bc/C/rpc".to_string()
}

fn default_destination_rpc() -> String {
    "https://data-seed-prebsc-1-s1.binance.org:8545/".to_string()
}

fn default_poll_interval() -> u64 {
    15_000
}

fn default_api_port() -> u16 {
    9090
}

impl Config {
    /// Load from a specific .env file path (if present), then the environment
    pub fn load_from_file(path: &str) -> Result<Self> {
        if Path::new(path).exists() {
            dotenvy::from_filename(path)
                .wrap_err_with(|| format!("Failed to load .env file from {}", path))?;
        }
        Self::load_from_env()
    }

    /// Load configuration from environment variables
    fn load_from_env() -> Result<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build the configuration from any variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars(&lookup);

        let default_finality = vars.parse("FINALITY_BLOCKS")?.unwrap_or(0);
        let source = vars.chain(ChainRole::Source, default_source_rpc(), default_finality)?;
        let destination = vars.chain(
            ChainRole::Destination,
            default_destination_rpc(),
            default_finality,
        )?;

        let state = StateConfig {
            state_file: vars
                .get("STATE_FILE")
                .unwrap_or_else(|| "bridge_state.json".to_string())
                .into(),
            processed_file: vars
                .get("PROCESSED_FILE")
                .unwrap_or_else(|| "processed_events.json".to_string())
                .into(),
        };

        let key = KeyConfig {
            private_key: vars.get("WARDEN_PRIVATE_KEY"),
            key_file: vars
                .get("WARDEN_KEY_FILE")
                .unwrap_or_else(|| "secret_key.txt".to_string())
                .into(),
        };

        let scan_defaults = ScanConfig::default();
        let scan = ScanConfig {
            base_chunk: vars
                .parse("SCAN_BASE_CHUNK")?
                .unwrap_or(scan_defaults.base_chunk),
            safety_margin: vars
                .parse("SCAN_SAFETY_MARGIN")?
                .unwrap_or(scan_defaults.safety_margin),
            max_errors: vars
                .parse("SCAN_MAX_ERRORS")?
                .unwrap_or(scan_defaults.max_errors),
            max_duration: match vars.parse::<u64>("SCAN_MAX_SECONDS")? {
                Some(0) => None,
                Some(secs) => Some(Duration::from_secs(secs)),
                None => scan_defaults.max_duration,
            },
            backoff_unit: vars
                .parse("SCAN_BACKOFF_UNIT_MS")?
                .map(Duration::from_millis)
                .unwrap_or(scan_defaults.backoff_unit),
            finality_blocks: 0,
        };

        let submit_defaults = SubmitConfig::default();
        let submit = SubmitConfig {
            max_retries: vars
                .parse("TX_MAX_RETRIES")?
                .unwrap_or(submit_defaults.max_retries),
            retry_delay: vars
                .parse("TX_RETRY_DELAY_MS")?
                .map(Duration::from_millis)
                .unwrap_or(submit_defaults.retry_delay),
            receipt_timeout: vars
                .parse("TX_RECEIPT_TIMEOUT_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(submit_defaults.receipt_timeout),
            fallback_gas: vars
                .parse("TX_FALLBACK_GAS")?
                .unwrap_or(submit_defaults.fallback_gas),
            gas_buffer: vars
                .parse("TX_GAS_BUFFER")?
                .unwrap_or(submit_defaults.gas_buffer),
            gas_bump_percent: vars
                .parse("TX_GAS_BUMP_PERCENT")?
                .unwrap_or(submit_defaults.gas_bump_percent),
        };

        let config = Config {
            source,
            destination,
            contract_info_path: vars
                .get("CONTRACT_INFO_PATH")
                .unwrap_or_else(|| "contract_info.json".to_string())
                .into(),
            state,
            key,
            scan,
            submit,
            poll_interval_ms: vars
                .parse("POLL_INTERVAL_MS")?
                .unwrap_or(default_poll_interval()),
            api_port: vars.parse("API_PORT")?.unwrap_or(default_api_port()),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn chain(&self, role: ChainRole) -> &ChainConfig {
        match role {
            ChainRole::Source => &self.source,
            ChainRole::Destination => &self.destination,
        }
    }

    /// Scanner/submitter settings for the relay orchestrator
    pub fn relay_config(&self) -> RelayConfig {
        RelayConfig {
            scan: self.scan.clone(),
            submit: self.submit.clone(),
            source_finality: self.source.finality_blocks,
            destination_finality: self.destination.finality_blocks,
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        for chain in [&self.source, &self.destination] {
            if chain.rpc_url.is_empty() {
                return Err(eyre!("{} rpc_url cannot be empty", chain.role));
            }
        }

        if let (Some(a), Some(b)) = (self.source.chain_id, self.destination.chain_id) {
            if a == b {
                return Err(eyre!(
                    "source and destination chain ids are both {}; the bridge needs two chains",
                    a
                ));
            }
        }

        if let Some(ref key) = self.key.private_key {
            let hex_part = key.trim().trim_start_matches("0x");
            if hex_part.len() != 64 || !hex_part.chars().all(|c| c.is_ascii_hexdigit()) {
                return Err(eyre!("WARDEN_PRIVATE_KEY must be 64 hex chars (0x optional)"));
            }
        }

        if self.scan.base_chunk == 0 {
            return Err(eyre!("SCAN_BASE_CHUNK must be at least 1"));
        }

        if self.scan.max_errors == 0 {
            return Err(eyre!("SCAN_MAX_ERRORS must be at least 1"));
        }

        if self.submit.receipt_timeout.is_zero() {
            return Err(eyre!("TX_RECEIPT_TIMEOUT_SECS must be positive"));
        }

        if self.api_port == 0 {
            return Err(eyre!("API_PORT cannot be 0"));
        }

        Ok(())
    }
}

struct Vars<'a, F>(&'a F);

impl<F> Vars<'_, F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, name: &str) -> Option<String> {
        (self.0)(name).filter(|v| !v.trim().is_empty())
    }

    fn parse<T>(&self, name: &str) -> Result<Option<T>>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        match self.get(name) {
            Some(raw) => raw
                .trim()
                .parse::<T>()
                .map(Some)
                .map_err(|e| eyre!("{} has an invalid value '{}': {}", name, raw, e)),
            None => Ok(None),
        }
    }

    fn chain(&self, role: ChainRole, default_rpc: String, default_finality: u64) -> Result<ChainConfig> {
        let prefix = role.as_str().to_uppercase();

        let raw_urls = self
            .get(&format!("{}_RPC_URL", prefix))
            .unwrap_or(default_rpc);
        let urls = parse_rpc_urls(&raw_urls);
        if urls.is_empty() {
            return Err(eyre!("{}_RPC_URL cannot be empty", prefix));
        }

        Ok(ChainConfig {
            role,
            rpc_url: urls[0].clone(),
            rpc_fallback_urls: urls[1..].to_vec(),
            chain_id: self.parse(&format!("{}_CHAIN_ID", prefix))?,
            poa: self.parse(&format!("{}_POA", prefix))?.unwrap_or(true),
            finality_blocks: self
                .parse(&format!("{}_FINALITY_BLOCKS", prefix))?
                .unwrap_or(default_finality),
        })
    }
}
