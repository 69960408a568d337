//! # Intercepting Proxy Loop
//!
//! An axum service that forwards every request to the configured
//! upstream target, rewrites host references on the way back, and
//! records each completed exchange as a classified [`TrafficEntry`].
//! Exchanges that fail or time out upstream produce no entry. Internal
//! errors log to the tracing subscriber and never interrupt the request
//! flow.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Result, anyhow};
use axum::Router;
use axum::body::Body;
use axum::extract::{Request, State};
use axum::response::Response;
use chrono::Utc;
use http::StatusCode;
use http::header::{CONNECTION, CONTENT_LENGTH, CONTENT_TYPE, HOST, HeaderMap, TRANSFER_ENCODING};
use tokio::net::TcpListener;
use url::Url;

use crate::proxy::TrafficEntry;
use crate::proxy::rewrite::Rewriter;
use crate::proxy::write::EntryWriter;

const DEFAULT_MAX_BODY_BYTES: usize = 8 * 1024 * 1024;
const DEFAULT_UPSTREAM_TIMEOUT: Duration = Duration::from_secs(30);

/// Proxy configuration, set at startup and immutable thereafter.
#[derive(Clone, Debug)]
pub struct ProxyConfig {
    /// Upstream base URL requests are forwarded to.
    pub target: Url,

    /// Host (and port) the local listener is reachable on, substituted
    /// for the target host in responses.
    pub local_host: String,

    /// Capture cap per body. Oversized bodies are still forwarded, but
    /// the entry is recorded truncated, unclassified, and flagged.
    pub max_body_bytes: usize,

    /// Timeout for the upstream leg of each exchange.
    pub upstream_timeout: Duration,
}

impl ProxyConfig {
    /// Configuration with default body cap (8 MiB) and upstream
    /// timeout (30 s).
    #[must_use]
    pub fn new(target: Url, local_host: impl Into<String>) -> Self {
        Self {
            target,
            local_host: local_host.into(),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            upstream_timeout: DEFAULT_UPSTREAM_TIMEOUT,
        }
    }
}

/// The proxy: an HTTP client toward the target, a host rewriter, and
/// the shared entry sink. Handlers hold it behind an [`Arc`]; the sink
/// is the only mutable collaborator and is locked per entry.
pub struct ProxyService {
    config: ProxyConfig,
    client: reqwest::Client,
    rewriter: Rewriter,
    writer: Mutex<Box<dyn EntryWriter>>,
}

impl ProxyService {
    /// Build the proxy service.
    ///
    /// # Errors
    ///
    /// Returns an error when the target URL has no host or the HTTP
    /// client cannot be constructed.
    pub fn new(config: ProxyConfig, writer: Box<dyn EntryWriter>) -> Result<Self> {
        let host = config.target.host_str().ok_or_else(|| anyhow!("target URL has no host"))?;
        let target_host = match config.target.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        };

        // redirects pass through so Location headers reach the client
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .timeout(config.upstream_timeout)
            .build()?;

        Ok(Self {
            rewriter: Rewriter::new(target_host, config.local_host.clone()),
            config,
            client,
            writer: Mutex::new(writer),
        })
    }

    async fn proxy_exchange(&self, request: Request) -> Result<Response> {
        let (parts, body) = request.into_parts();
        let request_bytes = axum::body::to_bytes(body, usize::MAX)
            .await
            .map_err(|e| anyhow!("reading request body: {e}"))?;

        let mut target_url = self.config.target.clone();
        target_url.set_path(parts.uri.path());
        target_url.set_query(parts.uri.query());

        let mut upstream_request =
            self.client.request(parts.method.clone(), target_url.as_str());
        for (name, value) in &parts.headers {
            if name == &HOST {
                continue;
            }
            upstream_request = upstream_request.header(name.as_str(), value.as_bytes());
        }

        let started = Utc::now();
        let upstream = upstream_request.body(request_bytes.to_vec()).send().await?;
        let status = upstream.status().as_u16();
        let response_headers = upstream.headers().clone();
        let response_bytes = upstream.bytes().await?;

        let mut entry = TrafficEntry {
            timestamp: started,
            method: parts.method.to_string(),
            url: target_url.to_string(),
            request_headers: header_pairs(&parts.headers),
            status,
            response_headers: header_pairs(&response_headers),
            ..TrafficEntry::default()
        };

        let cap = self.config.max_body_bytes;
        let request_body = String::from_utf8_lossy(&request_bytes).into_owned();
        let response_body = String::from_utf8_lossy(&response_bytes).into_owned();
        if request_body.len() > cap || response_body.len() > cap {
            entry.request_body = truncate_to(request_body, cap);
            entry.response_body = truncate_to(response_body, cap);
            entry.class_label = entry.class.label().to_string();
            entry.warnings.push("body_truncated".to_string());
        } else {
            entry.request_body = request_body;
            entry.response_body = response_body;
            entry.classify();
        }

        match self.writer.lock() {
            Ok(mut writer) => writer.write_entry(&entry),
            Err(e) => tracing::error!("entry writer lock poisoned: {e}"),
        }

        let content_type = response_headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        // rewriting is textual; binary bodies pass through untouched
        let response_out = match std::str::from_utf8(&response_bytes) {
            Ok(text) => Body::from(self.rewriter.rewrite_body(text, content_type)),
            Err(_) => Body::from(response_bytes.clone()),
        };

        let mut out_headers = response_headers;
        out_headers.remove(CONTENT_LENGTH);
        out_headers.remove(TRANSFER_ENCODING);
        out_headers.remove(CONNECTION);
        self.rewriter.rewrite_headers(&mut out_headers);

        let mut response =
            Response::builder().status(StatusCode::from_u16(status)?).body(response_out)?;
        *response.headers_mut() = out_headers;
        Ok(response)
    }
}

/// The proxy router: every path and method forwards upstream.
pub fn router(service: Arc<ProxyService>) -> Router {
    Router::new().fallback(forward).with_state(service)
}

/// Bind the proxy to `listener` and serve until shutdown.
///
/// # Errors
///
/// Returns an error when the listener address is unreadable or the
/// server fails.
pub async fn serve(listener: TcpListener, service: Arc<ProxyService>) -> Result<()> {
    tracing::info!(
        "proxying {} on {}",
        service.config.target,
        listener.local_addr()?
    );
    axum::serve(listener, router(service)).await?;
    Ok(())
}

async fn forward(State(service): State<Arc<ProxyService>>, request: Request) -> Response {
    match service.proxy_exchange(request).await {
        Ok(response) => response,
        Err(e) => {
            tracing::error!("proxy exchange failed: {e}");
            Response::builder()
                .status(StatusCode::BAD_GATEWAY)
                .body(Body::from("upstream request failed"))
                .unwrap_or_default()
        }
    }
}

fn header_pairs(headers: &HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .map(|(name, value)| {
            (name.to_string(), String::from_utf8_lossy(value.as_bytes()).into_owned())
        })
        .collect()
}

fn truncate_to(mut body: String, cap: usize) -> String {
    if body.len() <= cap {
        return body;
    }
    let mut end = cap;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    body.truncate(end);
    body
}
