//! Client side of the PowerDNS API
//!
//! The gateway only talks to the upstream through the [`Upstream`] trait so the
//! HTTP client can be swapped for [`UpstreamStub`] in tests.

use std::time::{Duration, Instant};

use derive_more::Display;

use crate::web::auth::API_KEY_HEADER;
use crate::web::metrics;

#[derive(Debug, Display)]
pub enum UpstreamError {
    #[display(fmt = "request timed out")]
    Timeout,
    #[display(fmt = "{}", _0)]
    Transport(String),
}

impl std::error::Error for UpstreamError {}

impl From<reqwest::Error> for UpstreamError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            UpstreamError::Timeout
        } else {
            UpstreamError::Transport(err.to_string())
        }
    }
}

pub type Result<T> = std::result::Result<T, UpstreamError>;

/// A request as it is sent upstream; `path` includes the query string
#[derive(Clone, Debug, PartialEq)]
pub struct UpstreamRequest {
    pub method: String,
    pub path: String,
    pub body: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct UpstreamResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

impl UpstreamResponse {
    pub fn json(status: u16, body: &serde_json::Value) -> UpstreamResponse {
        UpstreamResponse {
            status,
            content_type: Some("application/json".to_string()),
            body: body.to_string().into_bytes(),
        }
    }
}

pub trait Upstream {
    fn send(&self, request: &UpstreamRequest) -> Result<UpstreamResponse>;
}

/// Blocking reqwest client bound to one PowerDNS API endpoint
pub struct HttpUpstream {
    base_url: String,
    api_token: String,
    client: reqwest::blocking::Client,
}

impl HttpUpstream {
    pub fn new(
        base_url: &str,
        api_token: &str,
        verify_ssl: bool,
        timeout: Duration,
    ) -> Result<HttpUpstream> {
        if !verify_ssl {
            log::warn!("TLS certificate verification of the PowerDNS API is disabled");
        }

        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .danger_accept_invalid_certs(!verify_ssl)
            .build()?;

        Ok(HttpUpstream {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_token: api_token.to_string(),
            client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

impl Upstream for HttpUpstream {
    fn send(&self, request: &UpstreamRequest) -> Result<UpstreamResponse> {
        let method = reqwest::Method::from_bytes(request.method.as_bytes())
            .map_err(|e| UpstreamError::Transport(e.to_string()))?;

        let mut builder = self
            .client
            .request(method, self.url(&request.path))
            .header(API_KEY_HEADER, self.api_token.as_str())
            .header("Content-Type", "application/json");

        if !request.body.is_empty() {
            builder = builder.body(request.body.clone());
        }

        let start = Instant::now();
        let result = builder.send();
        metrics::UPSTREAM_DURATION.observe(start.elapsed().as_secs_f64());

        let response = match result {
            Ok(response) => response,
            Err(e) => {
                log::warn!("PowerDNS API {} {} failed: {}", request.method, request.path, e);
                return Err(e.into());
            }
        };

        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.to_string());
        let body = response.bytes()?.to_vec();

        log::debug!(
            "PowerDNS API {} {} returned {}",
            request.method,
            request.path,
            status
        );

        Ok(UpstreamResponse {
            status,
            content_type,
            body,
        })
    }
}

pub type StubCallback = dyn Fn(&UpstreamRequest) -> Result<UpstreamResponse> + Send + Sync;

/// Upstream that answers every request from a callback
pub struct UpstreamStub {
    callback: Box<StubCallback>,
}

impl UpstreamStub {
    pub fn new(callback: Box<StubCallback>) -> UpstreamStub {
        UpstreamStub { callback }
    }
}

impl Upstream for UpstreamStub {
    fn send(&self, request: &UpstreamRequest) -> Result<UpstreamResponse> {
        (self.callback)(request)
    }
}
