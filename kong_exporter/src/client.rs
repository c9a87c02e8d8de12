//! Kong status endpoint client.
//!
//! This module fetches the runtime counters Kong publishes on its admin
//! status endpoint. The payload is a small, fixed-schema JSON document that
//! is decoded wholesale into a [`Status`] snapshot, one fetch per scrape.

use reqwest::StatusCode;
use serde::Deserialize;

/// Errors produced by [`StatusClient`].
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The request to the status endpoint could not be completed.
    #[error("failed to get {endpoint}: {source}")]
    Transport {
        /// The endpoint the request was made against.
        endpoint: String,
        /// The underlying transport failure.
        #[source]
        source: reqwest::Error,
    },
    /// The status endpoint answered with something other than 200 OK.
    #[error("expected 200 OK from {endpoint}, got {status}")]
    UnexpectedStatus {
        /// The endpoint the request was made against.
        endpoint: String,
        /// The status code the endpoint answered with.
        status: StatusCode,
    },
    /// The response body did not decode against the status schema.
    #[error("failed to decode status body {body:?}: {source}")]
    Decode {
        /// The raw response body, kept whole for offline diagnosis.
        body: String,
        /// The underlying decode failure.
        #[source]
        source: serde_json::Error,
    },
}

/// One decoded status snapshot.
///
/// Immutable once decoded and owned by the scrape that produced it. Missing
/// fields decode as their zero value, unknown fields are ignored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize)]
pub struct Status {
    /// Datastore reachability as Kong reports it.
    #[serde(default)]
    pub database: DatabaseStatus,
    /// Proxy connection and request counters.
    #[serde(default)]
    pub server: ServerStats,
}

/// Datastore reachability section of the status payload.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct DatabaseStatus {
    /// Whether Kong can reach its configured datastore.
    #[serde(default)]
    pub reachable: bool,
}

/// Connection and request counters of the status payload.
///
/// `connections_accepted`, `connections_handled` and `total_requests` are
/// cumulative; the rest are instantaneous. Kong reports all of them as JSON
/// numbers, decoded here as `f64`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize)]
pub struct ServerStats {
    /// Active client connections.
    #[serde(default)]
    pub connections_active: f64,
    /// Accepted client connections, cumulative.
    #[serde(default)]
    pub connections_accepted: f64,
    /// Handled client connections, cumulative.
    #[serde(default)]
    pub connections_handled: f64,
    /// Connections currently reading the request header.
    #[serde(default)]
    pub connections_reading: f64,
    /// Connections currently writing the response back to the client.
    #[serde(default)]
    pub connections_writing: f64,
    /// Idle client connections.
    #[serde(default)]
    pub connections_waiting: f64,
    /// Total requests served, cumulative.
    #[serde(default)]
    pub total_requests: f64,
}

/// Source of Kong status snapshots.
///
/// The seam between the collector and the network. [`StatusClient`] is the
/// production implementation; tests substitute instrumented sources.
pub trait StatusSource: Send + Sync {
    /// Fetch one status snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error if the endpoint cannot be reached, answers with a
    /// non-200 status or its body does not decode against the schema.
    fn status(&self) -> Result<Status, Error>;
}

/// Client for Kong's admin status endpoint.
///
/// Performs one synchronous GET per [`StatusSource::status`] call. Timeout
/// and TLS behavior are properties of the `reqwest` client handed in at
/// construction; no caching, no retry.
#[derive(Debug, Clone)]
pub struct StatusClient {
    endpoint: String,
    http: reqwest::blocking::Client,
}

impl StatusClient {
    /// Create a new [`StatusClient`] without contacting the endpoint.
    #[must_use]
    pub fn new(http: reqwest::blocking::Client, endpoint: String) -> Self {
        Self { endpoint, http }
    }

    /// Create a new [`StatusClient`] and immediately fetch once.
    ///
    /// Surfaces a misconfigured or unreachable endpoint at startup rather
    /// than silently at first scrape. Exercised once, outside the hot
    /// scrape path.
    ///
    /// # Errors
    ///
    /// Returns the failure of the probe fetch.
    pub fn connect(http: reqwest::blocking::Client, endpoint: String) -> Result<Self, Error> {
        let client = Self::new(http, endpoint);
        client.status()?;
        Ok(client)
    }

    /// The configured endpoint URL.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl StatusSource for StatusClient {
    fn status(&self) -> Result<Status, Error> {
        let response = self
            .http
            .get(&self.endpoint)
            .send()
            .map_err(|source| Error::Transport {
                endpoint: self.endpoint.clone(),
                source,
            })?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(Error::UnexpectedStatus {
                endpoint: self.endpoint.clone(),
                status,
            });
        }

        // Read the body whole before decoding so a decode failure can carry
        // the raw payload.
        let body = response.text().map_err(|source| Error::Transport {
            endpoint: self.endpoint.clone(),
            source,
        })?;
        serde_json::from_str(&body).map_err(|source| Error::Decode { body, source })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use warp::Filter;

    use super::*;

    const FULL_STATUS: &str = r#"{"database":{"reachable":true},"server":{"connections_active":5,"connections_accepted":100,"connections_handled":99,"connections_reading":1,"connections_writing":2,"connections_waiting":2,"total_requests":500}}"#;

    async fn serve(status: u16, body: &'static str) -> String {
        let code =
            warp::http::StatusCode::from_u16(status).expect("status code fixture is valid");
        let reply =
            warp::path("status").map(move || warp::reply::with_status(body, code));
        let (addr, serve_fut) = warp::serve(reply).bind_ephemeral(([127, 0, 0, 1], 0));
        tokio::spawn(serve_fut);
        format!("http://{addr}/status")
    }

    fn http_client(timeout: Duration) -> reqwest::blocking::Client {
        reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .expect("client builds")
    }

    async fn fetch(uri: String) -> Result<Status, Error> {
        // Blocking reqwest may not run on an async worker thread.
        tokio::task::spawn_blocking(move || {
            StatusClient::new(http_client(Duration::from_secs(2)), uri).status()
        })
        .await
        .expect("fetch task panicked")
    }

    #[tokio::test]
    async fn decodes_full_status() {
        let uri = serve(200, FULL_STATUS).await;
        let status = fetch(uri).await.expect("fetch succeeds");

        assert!(status.database.reachable);
        assert_eq!(status.server.connections_active, 5.0);
        assert_eq!(status.server.connections_accepted, 100.0);
        assert_eq!(status.server.connections_handled, 99.0);
        assert_eq!(status.server.connections_reading, 1.0);
        assert_eq!(status.server.connections_writing, 2.0);
        assert_eq!(status.server.connections_waiting, 2.0);
        assert_eq!(status.server.total_requests, 500.0);
    }

    #[tokio::test]
    async fn missing_fields_decode_as_zero() {
        let uri = serve(200, r#"{"database":{"reachable":true}}"#).await;
        let status = fetch(uri).await.expect("fetch succeeds");

        assert!(status.database.reachable);
        assert_eq!(status.server, ServerStats::default());

        let uri = serve(200, "{}").await;
        let status = fetch(uri).await.expect("fetch succeeds");
        assert!(!status.database.reachable);
    }

    #[tokio::test]
    async fn unknown_fields_are_ignored() {
        let uri = serve(
            200,
            r#"{"database":{"reachable":true},"server":{"connections_active":3},"memory":{"lua_shared_dicts":{}}}"#,
        )
        .await;
        let status = fetch(uri).await.expect("fetch succeeds");

        assert!(status.database.reachable);
        assert_eq!(status.server.connections_active, 3.0);
    }

    #[tokio::test]
    async fn non_200_is_unexpected_status() {
        let uri = serve(503, "Service Unavailable").await;
        let err = fetch(uri).await.expect_err("fetch fails");

        match err {
            Error::UnexpectedStatus { status, .. } => {
                assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn malformed_body_keeps_raw_body() {
        let uri = serve(200, "not json at all").await;
        let err = fetch(uri).await.expect_err("fetch fails");

        match err {
            Error::Decode { body, .. } => assert_eq!(body, "not json at all"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn refused_connection_is_transport() {
        // Bind and drop a listener so the port is known-dead.
        let dead_addr = {
            let listener =
                std::net::TcpListener::bind("127.0.0.1:0").expect("listener binds");
            listener.local_addr().expect("listener has addr")
        };
        let uri = format!("http://{dead_addr}/status");
        let err = fetch(uri).await.expect_err("fetch fails");

        assert!(matches!(err, Error::Transport { .. }));
    }

    #[tokio::test]
    async fn slow_endpoint_times_out_as_transport() {
        let reply = warp::path("status").and_then(|| async {
            tokio::time::sleep(Duration::from_millis(500)).await;
            Ok::<_, warp::Rejection>(FULL_STATUS)
        });
        let (addr, serve_fut) = warp::serve(reply).bind_ephemeral(([127, 0, 0, 1], 0));
        tokio::spawn(serve_fut);
        let uri = format!("http://{addr}/status");

        let err = tokio::task::spawn_blocking(move || {
            StatusClient::new(http_client(Duration::from_millis(50)), uri).status()
        })
        .await
        .expect("fetch task panicked")
        .expect_err("fetch fails");

        assert!(matches!(err, Error::Transport { .. }));
    }

    #[tokio::test]
    async fn startup_retries_probe_the_endpoint_each_attempt() {
        use std::sync::Arc;
        use std::sync::atomic::{AtomicUsize, Ordering};

        let hits = Arc::new(AtomicUsize::new(0));
        let counted = Arc::clone(&hits);
        let reply = warp::path("status").map(move || {
            counted.fetch_add(1, Ordering::SeqCst);
            warp::reply::with_status("down", warp::http::StatusCode::SERVICE_UNAVAILABLE)
        });
        let (addr, serve_fut) = warp::serve(reply).bind_ephemeral(([127, 0, 0, 1], 0));
        tokio::spawn(serve_fut);
        let uri = format!("http://{addr}/status");

        let res = tokio::task::spawn_blocking(move || {
            let http = http_client(Duration::from_secs(2));
            crate::retry::with_retries(2, Duration::ZERO, || {
                StatusClient::connect(http.clone(), uri.clone())
            })
        })
        .await
        .expect("connect task panicked");

        assert!(matches!(res, Err(Error::UnexpectedStatus { .. })));
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn connect_probes_the_endpoint() {
        let good = serve(200, FULL_STATUS).await;
        let bad = serve(503, "down").await;

        let (good, bad) = tokio::task::spawn_blocking(move || {
            let http = http_client(Duration::from_secs(2));
            (
                StatusClient::connect(http.clone(), good),
                StatusClient::connect(http, bad),
            )
        })
        .await
        .expect("connect task panicked");

        let client = good.expect("probe succeeds");
        assert!(client.endpoint().ends_with("/status"));
        assert!(matches!(bad, Err(Error::UnexpectedStatus { .. })));
    }
}
