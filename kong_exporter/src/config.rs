//! Exporter configuration.
//!
//! The configuration surface is owned by the binary entry point; the
//! library consumes it only through constructor parameters. Defaults follow
//! Kong's stock deployment: admin status on localhost, a seven second fetch
//! budget, TLS verification on.

use std::time::Duration;

use serde::Deserialize;

fn default_status_uri() -> String {
    "http://127.0.0.1:8001/status".to_string()
}

fn default_namespace() -> String {
    "kong".to_string()
}

fn default_scrape_timeout_seconds() -> u64 {
    7
}

fn default_verify_tls() -> bool {
    true
}

/// Errors produced by [`Config`].
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The outbound HTTP client could not be constructed.
    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

/// Configuration for the exporter.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// URI of Kong's admin status endpoint.
    #[serde(default = "default_status_uri")]
    pub status_uri: String,
    /// Namespace prefixed to every exposed metric name.
    #[serde(default = "default_namespace")]
    pub namespace: String,
    /// Upper bound, in seconds, on one status fetch.
    #[serde(default = "default_scrape_timeout_seconds")]
    pub scrape_timeout_seconds: u64,
    /// Whether to verify the status endpoint's TLS certificate.
    #[serde(default = "default_verify_tls")]
    pub verify_tls: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            status_uri: default_status_uri(),
            namespace: default_namespace(),
            scrape_timeout_seconds: default_scrape_timeout_seconds(),
            verify_tls: default_verify_tls(),
        }
    }
}

impl Config {
    /// Build the outbound HTTP client described by this configuration.
    ///
    /// The timeout bounds the whole fetch; a scrape that exceeds it fails
    /// as an ordinary transport error.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying TLS backend fails to initialize.
    pub fn build_http_client(&self) -> Result<reqwest::blocking::Client, Error> {
        Ok(reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(self.scrape_timeout_seconds))
            .danger_accept_invalid_certs(!self.verify_tls)
            .build()?)
    }
}
