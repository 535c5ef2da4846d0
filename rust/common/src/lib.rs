use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Mainnet Compound GovernorBravo.
pub const DEFAULT_GOVERNOR: &str = "0xc0Da02939E1441F497fd74F78cE7Decb17B66529";

/// Average Ethereum block time, also the default poll interval.
pub const AVERAGE_BLOCK_SECS: u64 = 12;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing {0}")]
    Missing(&'static str),
    #[error("invalid governor address {0:?}")]
    InvalidAddress(String),
    #[error("invalid rpc url {0:?}")]
    InvalidUrl(String),
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
}

/// Raw environment, read once at process start.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GovEnv {
    pub rpc_http: String,
    pub governor_address: String,
    pub poll_interval_secs: u64,
    pub lookback_blocks: u64,
    pub start_block: Option<u64>,
    pub max_block_span: Option<u64>,
    pub recent_events_cap: usize,
    pub rpc_timeout_secs: u64,
    pub bind: String,
    /// Account that submits governance actions. Unset disables them.
    pub agent_address: Option<String>,
    /// Endpoint holding the agent's key. Defaults to `rpc_http`.
    pub signer_rpc: Option<String>,
}

impl Default for GovEnv {
    fn default() -> Self {
        Self {
            rpc_http: "https://eth.llamarpc.com".to_string(),
            governor_address: DEFAULT_GOVERNOR.to_string(),
            poll_interval_secs: AVERAGE_BLOCK_SECS,
            lookback_blocks: 200_000,
            start_block: None,
            max_block_span: None,
            recent_events_cap: 500,
            rpc_timeout_secs: 10,
            bind: "0.0.0.0:8088".to_string(),
            agent_address: None,
            signer_rpc: None,
        }
    }
}

impl GovEnv {
    pub fn from_env() -> Self {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    /// Same as `from_env` but with an injectable lookup, unset keys keep defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let d = Self::default();
        let num = |k: &str| lookup(k).and_then(|v| v.trim().parse::<u64>().ok());
        Self {
            rpc_http: lookup("ETHEREUM_RPC_URL").unwrap_or(d.rpc_http),
            governor_address: lookup("GOVERNOR_ADDRESS")
                .or_else(|| lookup("COMPOUND_GOVERNOR_ADDRESS"))
                .unwrap_or(d.governor_address),
            poll_interval_secs: num("POLL_INTERVAL_SECS").unwrap_or(d.poll_interval_secs),
            lookback_blocks: num("LOOKBACK_BLOCKS").unwrap_or(d.lookback_blocks),
            start_block: num("START_BLOCK"),
            max_block_span: num("MAX_BLOCK_SPAN"),
            recent_events_cap: num("RECENT_EVENTS_CAP")
                .and_then(|v| usize::try_from(v).ok())
                .unwrap_or(d.recent_events_cap),
            rpc_timeout_secs: num("RPC_TIMEOUT_SECS").unwrap_or(d.rpc_timeout_secs),
            bind: lookup("BIND").unwrap_or(d.bind),
            agent_address: lookup("AGENT_ADDRESS").filter(|v| !v.trim().is_empty()),
            signer_rpc: lookup("SIGNER_RPC_URL").filter(|v| !v.trim().is_empty()),
        }
    }

    pub fn validate(&self) -> Result<GovConfig, ConfigError> {
        let rpc_http = self.rpc_http.trim();
        if rpc_http.is_empty() {
            return Err(ConfigError::Missing("ETHEREUM_RPC_URL"));
        }
        check_url(rpc_http)?;
        let signer_rpc = match self.signer_rpc.as_deref().map(str::trim) {
            Some(url) => {
                check_url(url)?;
                url.to_string()
            }
            None => rpc_http.to_string(),
        };
        let agent_address = self
            .agent_address
            .as_deref()
            .map(|a| parse_address(a.trim()))
            .transpose()?;
        let governor = self.governor_address.trim();
        if governor.is_empty() {
            return Err(ConfigError::Missing("GOVERNOR_ADDRESS"));
        }
        let governor_address = parse_address(governor)?;
        if self.poll_interval_secs == 0 {
            return Err(ConfigError::Zero("POLL_INTERVAL_SECS"));
        }
        if self.max_block_span == Some(0) {
            return Err(ConfigError::Zero("MAX_BLOCK_SPAN"));
        }
        Ok(GovConfig {
            rpc_http: rpc_http.to_string(),
            governor_address,
            poll_interval_secs: self.poll_interval_secs,
            lookback_blocks: self.lookback_blocks,
            start_block: self.start_block,
            max_block_span: self.max_block_span,
            recent_events_cap: self.recent_events_cap.max(1),
            rpc_timeout_secs: self.rpc_timeout_secs.max(1),
            bind: self.bind.clone(),
            agent_address,
            signer_rpc,
        })
    }
}

/// Validated configuration. The governor address is the raw 20 bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GovConfig {
    pub rpc_http: String,
    pub governor_address: [u8; 20],
    pub poll_interval_secs: u64,
    pub lookback_blocks: u64,
    pub start_block: Option<u64>,
    pub max_block_span: Option<u64>,
    pub recent_events_cap: usize,
    pub rpc_timeout_secs: u64,
    pub bind: String,
    pub agent_address: Option<[u8; 20]>,
    pub signer_rpc: String,
}

fn check_url(url: &str) -> Result<(), ConfigError> {
    if url.starts_with("http://") || url.starts_with("https://") {
        Ok(())
    } else {
        Err(ConfigError::InvalidUrl(url.to_string()))
    }
}

fn parse_address(s: &str) -> Result<[u8; 20], ConfigError> {
    let h = s.strip_prefix("0x").unwrap_or(s);
    if h.len() != 40 {
        return Err(ConfigError::InvalidAddress(s.to_string()));
    }
    let bytes = hex::decode(h).map_err(|_| ConfigError::InvalidAddress(s.to_string()))?;
    let mut out = [0u8; 20];
    out.copy_from_slice(&bytes);
    Ok(out)
}
