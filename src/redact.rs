//! Secret redaction for logs and debug output.
//!
//! Wrap the warden key (or anything else that must never reach a log line)
//! in [`Redacted`]; `Debug` and `Display` both print `<redacted>`.

use std::fmt::{self, Debug, Display};

#[derive(Clone, Copy)]
pub struct Redacted<T>(pub T);

impl<T> Debug for Redacted<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("<redacted>")
    }
}

impl<T> Display for Redacted<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("<redacted>")
    }
}

/// Strip credentials and API-key path segments from an RPC URL for logging.
///
/// `https://user:pw@host/v3/abcdef` becomes `https://host/...`.
pub fn redact_url(url: &str) -> String {
    let (scheme, rest) = match url.split_once("://") {
        Some((scheme, rest)) => (scheme, rest),
        None => return Redacted(url).to_string(),
    };
    let host_part = rest.split('/').next().unwrap_or_default();
    let host = host_part.rsplit('@').next().unwrap_or(host_part);
    if rest.len() > host_part.len() + 1 {
        format!("{}://{}/...", scheme, host)
    } else {
        format!("{}://{}", scheme, host)
    }
}
