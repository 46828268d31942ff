use alloy::providers::{ProviderBuilder, RootProvider};
use alloy::transports::http::{Client, Http};

use crate::error::{RelayError, RelayResult};
use crate::redact::redact_url;

/// Parse a comma-separated RPC URL string into individual trimmed URLs.
pub fn parse_rpc_urls(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Build an HTTP provider for a single RPC URL.
pub fn create_provider(url: &str) -> RelayResult<RootProvider<Http<Client>>> {
    let parsed = url.parse().map_err(|e| {
        RelayError::Configuration(format!("invalid RPC URL {}: {}", redact_url(url), e))
    })?;
    Ok(ProviderBuilder::new().on_http(parsed))
}
