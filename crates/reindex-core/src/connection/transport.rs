//! HTTP transport for one cluster
//!
//! Wraps a keep-alive `reqwest` client with the retry budget, optional node
//! discovery (sniffing), basic auth and AWS request signing.

use super::{ConnectionDescriptor, RequestSigner};
use crate::config::ApiVersion;
use reindex_common::{ReindexError, Result};
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

// ============================================================================
// Transport Constants
// ============================================================================

/// Attempts after the first one before a request error is surfaced
pub const MAX_RETRIES: usize = 10;

/// Idle keep-alive sockets kept per node
pub const POOL_SIZE: usize = 10;

/// Gateway statuses worth retrying on another attempt
const RETRYABLE_STATUSES: &[u16] = &[502, 503, 504];

/// Upper bound of the linear backoff between attempts
const MAX_BACKOFF: Duration = Duration::from_secs(2);

/// Which failures a request may be repeated after
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RetryPolicy {
    /// Connection faults, timeouts and gateway errors
    #[default]
    Standard,
    /// Only failures to connect, where the request never reached a node.
    /// For requests that move server-side state, like a scroll.
    ConnectOnly,
}

impl RetryPolicy {
    fn retries_error(self, err: &reqwest::Error) -> bool {
        match self {
            RetryPolicy::Standard => is_retryable(err),
            RetryPolicy::ConnectOnly => err.is_connect(),
        }
    }

    fn retries_status(self, status: StatusCode) -> bool {
        self == RetryPolicy::Standard && RETRYABLE_STATUSES.contains(&status.as_u16())
    }
}

/// Transport settings shared by the source and destination clients
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub max_retries: usize,
    pub pool_size: usize,
    /// Ask for gzip-compressed responses
    pub compression: bool,
    /// Discover cluster nodes on connect and after connection faults
    pub sniff: bool,
    pub request_timeout: Duration,
    pub api_version: ApiVersion,
}

impl TransportConfig {
    pub fn new(api_version: ApiVersion, request_timeout: Duration) -> Self {
        Self {
            max_retries: MAX_RETRIES,
            pool_size: POOL_SIZE,
            compression: false,
            sniff: false,
            request_timeout,
            api_version,
        }
    }

    pub fn with_compression(mut self, compression: bool) -> Self {
        self.compression = compression;
        self
    }

    pub fn with_sniff(mut self, sniff: bool) -> Self {
        self.sniff = sniff;
        self
    }
}

/// Request payload
#[derive(Debug, Clone)]
pub enum RequestBody {
    Empty,
    Json(Value),
    /// Newline-delimited JSON, as `_bulk` expects
    NdJson(String),
    /// Raw text, used for legacy scroll ids
    Text(String),
}

impl RequestBody {
    fn into_parts(self) -> Result<(Option<&'static str>, Vec<u8>)> {
        Ok(match self {
            RequestBody::Empty => (None, Vec::new()),
            RequestBody::Json(value) => (Some("application/json"), serde_json::to_vec(&value)?),
            RequestBody::NdJson(body) => (Some("application/x-ndjson"), body.into_bytes()),
            RequestBody::Text(body) => (Some("text/plain"), body.into_bytes()),
        })
    }
}

/// Status and body of a completed request
#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: StatusCode,
    pub body: String,
}

impl TransportResponse {
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_str(&self.body)?)
    }
}

/// Connection to one cluster
pub struct Transport {
    client: Client,
    descriptor: ConnectionDescriptor,
    config: TransportConfig,
    signer: Option<RequestSigner>,
    nodes: RwLock<Vec<String>>,
    next_node: AtomicUsize,
}

impl Transport {
    /// Build the client, resolve signing credentials and sniff if enabled
    pub async fn connect(descriptor: ConnectionDescriptor, config: TransportConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .pool_max_idle_per_host(config.pool_size)
            .tcp_keepalive(Some(Duration::from_secs(60)))
            .gzip(config.compression)
            .build()
            .map_err(ReindexError::network)?;

        let signer = match &descriptor.signing {
            Some(signing) => Some(RequestSigner::resolve(signing).await?),
            None => None,
        };

        let transport = Self {
            client,
            nodes: RwLock::new(vec![descriptor.base_url()]),
            descriptor,
            config,
            signer,
            next_node: AtomicUsize::new(0),
        };

        if transport.config.sniff {
            transport.sniff().await;
        }

        Ok(transport)
    }

    pub fn descriptor(&self) -> &ConnectionDescriptor {
        &self.descriptor
    }

    pub fn api_version(&self) -> &ApiVersion {
        &self.config.api_version
    }

    /// Send a request, retrying connection faults and gateway errors
    ///
    /// Non-retryable HTTP errors are returned as responses; callers decide
    /// what a status means for them.
    pub async fn request(
        &self,
        method: Method,
        path_and_query: &str,
        body: RequestBody,
    ) -> Result<TransportResponse> {
        self.request_with(method, path_and_query, body, RetryPolicy::Standard)
            .await
    }

    /// Send a request, retrying only what `policy` allows
    pub async fn request_with(
        &self,
        method: Method,
        path_and_query: &str,
        body: RequestBody,
        policy: RetryPolicy,
    ) -> Result<TransportResponse> {
        let (content_type, payload) = body.into_parts()?;
        let mut attempt = 0;

        loop {
            let url = format!("{}{}", self.pick_node().await, path_and_query);

            match self.send_once(&method, &url, content_type, &payload).await {
                Ok(response)
                    if policy.retries_status(response.status)
                        && attempt < self.config.max_retries =>
                {
                    warn!(
                        url = %url,
                        status = %response.status,
                        attempt = attempt + 1,
                        "Retrying request after gateway error"
                    );
                },
                Ok(response) => return Ok(response),
                Err(SendError::Http(err))
                    if policy.retries_error(&err) && attempt < self.config.max_retries =>
                {
                    warn!(url = %url, error = %err, attempt = attempt + 1, "Retrying request after connection fault");
                    if self.config.sniff {
                        self.sniff().await;
                    }
                },
                Err(SendError::Http(err)) => {
                    return Err(ReindexError::network(format!("{} {}: {}", method, url, err)))
                },
                Err(SendError::Other(err)) => return Err(err),
            }

            attempt += 1;
            tokio::time::sleep(backoff(attempt)).await;
        }
    }

    async fn send_once(
        &self,
        method: &Method,
        url: &str,
        content_type: Option<&'static str>,
        payload: &[u8],
    ) -> std::result::Result<TransportResponse, SendError> {
        let mut builder = self.client.request(method.clone(), url);

        if let Some(content_type) = content_type {
            builder = builder.header(CONTENT_TYPE, content_type);
        }

        if let Some((user, password)) = self.descriptor.basic_auth() {
            builder = builder.basic_auth(user, password);
        }

        if let Some(signer) = &self.signer {
            let headers = signer
                .sign(method.as_str(), url, payload)
                .map_err(SendError::Other)?;
            for (name, value) in headers {
                builder = builder.header(name, value);
            }
        }

        if !payload.is_empty() {
            builder = builder.body(payload.to_vec());
        }

        let response = builder.send().await.map_err(SendError::Http)?;
        let status = response.status();
        let body = response.text().await.map_err(SendError::Http)?;

        debug!(url = %url, status = %status, "Request completed");
        Ok(TransportResponse { status, body })
    }

    async fn pick_node(&self) -> String {
        let nodes = self.nodes.read().await;
        let index = self.next_node.fetch_add(1, Ordering::Relaxed) % nodes.len().max(1);
        nodes
            .get(index)
            .cloned()
            .unwrap_or_else(|| self.descriptor.base_url())
    }

    /// Replace the node list with the cluster's published HTTP addresses
    ///
    /// Failures keep the current list; sniffing is an optimisation only.
    async fn sniff(&self) {
        let url = format!("{}/_nodes/http", self.descriptor.base_url());
        let discovered = match self.send_once(&Method::GET, &url, None, &[]).await {
            Ok(response) if response.is_success() => response
                .json::<NodesResponse>()
                .map(|nodes| nodes.addresses(&self.descriptor.protocol)),
            Ok(response) => {
                warn!(status = %response.status, "Node discovery was rejected");
                return;
            },
            Err(SendError::Http(err)) => {
                warn!(error = %err, "Node discovery failed");
                return;
            },
            Err(SendError::Other(err)) => {
                warn!(error = %err, "Node discovery failed");
                return;
            },
        };

        match discovered {
            Ok(addresses) if !addresses.is_empty() => {
                info!(nodes = addresses.len(), "Discovered cluster nodes");
                *self.nodes.write().await = addresses;
            },
            Ok(_) => warn!("Node discovery returned no HTTP addresses"),
            Err(err) => warn!(error = %err, "Could not read node discovery response"),
        }
    }
}

enum SendError {
    Http(reqwest::Error),
    Other(ReindexError),
}

fn is_retryable(err: &reqwest::Error) -> bool {
    err.is_connect() || err.is_timeout() || err.is_request()
}

fn backoff(attempt: usize) -> Duration {
    Duration::from_millis(100 * attempt as u64).min(MAX_BACKOFF)
}

#[derive(Debug, Deserialize)]
struct NodesResponse {
    #[serde(default)]
    nodes: HashMap<String, NodeInfo>,
}

#[derive(Debug, Deserialize)]
struct NodeInfo {
    http: Option<NodeHttp>,
}

#[derive(Debug, Deserialize)]
struct NodeHttp {
    publish_address: String,
}

impl NodesResponse {
    /// Newer clusters publish `hostname/ip:port`, older ones `inet[/ip:port]`
    fn addresses(&self, protocol: &str) -> Vec<String> {
        let mut addresses: Vec<String> = self
            .nodes
            .values()
            .filter_map(|node| node.http.as_ref())
            .map(|http| {
                let address = http
                    .publish_address
                    .trim_start_matches("inet[")
                    .trim_end_matches(']');
                let address = address.rsplit('/').next().unwrap_or(address);
                format!("{}://{}", protocol, address)
            })
            .collect();
        addresses.sort();
        addresses
    }
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("descriptor", &self.descriptor)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
