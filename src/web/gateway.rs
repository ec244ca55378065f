//! Request orchestration
//!
//! The gateway is independent of the HTTP server: it takes a [`ProxyRequest`],
//! runs authentication, resolution, authorization, forwarding and auditing,
//! and returns a [`ProxyResponse`]. `server.rs` only translates between
//! tiny_http and these types.

use std::sync::Arc;

use serde_json::Value;

use crate::dns::authorize::{authorize, filter_zone_list};
use crate::dns::context::ProxyContext;
use crate::dns::name::normalize;
use crate::dns::policy::{Environment, PolicyModel};
use crate::dns::resolve::{resolve, ResourceKind, ResourceRequest};
use crate::web::audit::{AuditEntry, UNAUTHORIZED_ENVIRONMENT};
use crate::web::auth::{fingerprint, BasicCredentials, API_KEY_HEADER};
use crate::web::index;
use crate::web::metrics;
use crate::web::upstream::{UpstreamRequest, UpstreamResponse};
use crate::web::{Result, WebError};

const JSON: &str = "application/json";

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ProxyRequest {
    pub method: String,
    /// Path including the query string, as received
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl ProxyRequest {
    pub fn new(method: &str, url: &str) -> ProxyRequest {
        ProxyRequest {
            method: method.to_ascii_uppercase(),
            url: url.to_string(),
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> ProxyRequest {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn with_body(mut self, body: &[u8]) -> ProxyRequest {
        self.body = body.to_vec();
        self
    }

    /// Header lookup, case-insensitive on the name
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn path(&self) -> &str {
        self.url.split('?').next().unwrap_or("")
    }

    pub fn query_param(&self, name: &str) -> Option<&str> {
        let query = self.url.splitn(2, '?').nth(1)?;
        query
            .split('&')
            .filter_map(|pair| {
                let mut parts = pair.splitn(2, '=');
                Some((parts.next()?, parts.next().unwrap_or("")))
            })
            .find(|(key, _)| *key == name)
            .map(|(_, value)| value)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ProxyResponse {
    pub status: u16,
    pub content_type: String,
    pub body: Vec<u8>,
}

impl ProxyResponse {
    pub fn json(status: u16, value: &Value) -> ProxyResponse {
        ProxyResponse {
            status,
            content_type: JSON.to_string(),
            body: value.to_string().into_bytes(),
        }
    }

    pub fn html(status: u16, body: &str) -> ProxyResponse {
        ProxyResponse {
            status,
            content_type: "text/html; charset=utf-8".to_string(),
            body: body.as_bytes().to_vec(),
        }
    }

    pub fn text(status: u16, body: String) -> ProxyResponse {
        ProxyResponse {
            status,
            content_type: "text/plain; version=0.0.4".to_string(),
            body: body.into_bytes(),
        }
    }

    pub fn from_error(err: &WebError) -> ProxyResponse {
        ProxyResponse {
            status: err.status_code(),
            content_type: JSON.to_string(),
            body: err.to_json().into_bytes(),
        }
    }

    fn from_upstream(response: UpstreamResponse) -> ProxyResponse {
        ProxyResponse {
            status: response.status,
            content_type: response.content_type.unwrap_or_else(|| JSON.to_string()),
            body: response.body,
        }
    }

    pub fn json_body(&self) -> Option<Value> {
        serde_json::from_slice(&self.body).ok()
    }
}

pub struct Gateway {
    context: Arc<ProxyContext>,
}

impl Gateway {
    pub fn new(context: Arc<ProxyContext>) -> Gateway {
        Gateway { context }
    }

    pub fn context(&self) -> &ProxyContext {
        &self.context
    }

    pub fn handle(&self, request: &ProxyRequest) -> ProxyResponse {
        let response = self.route(request);
        metrics::record_request(&request.method, response.status);
        response
    }

    fn route(&self, request: &ProxyRequest) -> ProxyResponse {
        let path = request.path();
        let segments: Vec<&str> = path.split('/').filter(|x| !x.is_empty()).collect();

        let result = match (request.method.as_str(), segments.as_slice()) {
            ("GET", []) | ("HEAD", []) => self.index(),
            ("GET", ["metrics"]) => self.metrics(request),
            ("GET", ["health", "pdns"]) => self.health(),
            ("GET", ["info", "allowed"]) => self.allowed(request),
            ("GET", ["info", "zone-allowed"]) => self.zone_allowed(request),
            ("GET", ["api"]) => self.api_root(request),
            (_, ["api", "v1", ..]) => return self.proxy(request),
            (_, _) => Err(WebError::NotFound),
        };

        result.unwrap_or_else(|e| ProxyResponse::from_error(&e))
    }

    fn authenticate(&self, snapshot: &PolicyModel, request: &ProxyRequest) -> Result<Arc<Environment>> {
        let token = request
            .header(API_KEY_HEADER)
            .filter(|token| !token.is_empty())
            .ok_or(WebError::Unauthenticated)?;

        snapshot
            .lookup_environment(&fingerprint(token))
            .ok_or(WebError::Unauthenticated)
    }

    fn index(&self) -> Result<ProxyResponse> {
        let config = &self.context.config;
        if !config.index_enabled {
            return Err(WebError::NotFound);
        }

        Ok(ProxyResponse::html(200, &index::render(&config.index_html)))
    }

    fn api_root(&self, request: &ProxyRequest) -> Result<ProxyResponse> {
        self.authenticate(&self.context.policy.snapshot(), request)?;

        Ok(ProxyResponse::json(
            200,
            &serde_json::json!([{
                "url": "/api/v1",
                "version": 1,
                "compatibility": "PowerDNS API Proxy, PowerDNS API v1",
            }]),
        ))
    }

    fn allowed(&self, request: &ProxyRequest) -> Result<ProxyResponse> {
        let environment = self.authenticate(&self.context.policy.snapshot(), request)?;
        log::info!("Listing allowed resources for environment {}", environment.name);

        Ok(ProxyResponse::json(200, &serde_json::to_value(&*environment)?))
    }

    fn zone_allowed(&self, request: &ProxyRequest) -> Result<ProxyResponse> {
        let environment = self.authenticate(&self.context.policy.snapshot(), request)?;
        let zone = request
            .query_param("zone")
            .filter(|zone| !zone.is_empty())
            .ok_or_else(|| WebError::BadRequest("zone parameter is required".to_string()))?;
        if zone.contains('%') || zone.contains('+') {
            return Err(WebError::BadRequest(
                "zone parameter must not be percent-encoded".to_string(),
            ));
        }

        let normalized = normalize(zone);
        let grant = environment.matching_grants(&normalized).next();
        let allowed = environment.can_read_zone(&normalized);
        let config = match grant {
            Some(grant) => serde_json::to_value(grant)?,
            None => Value::Null,
        };

        Ok(ProxyResponse::json(
            200,
            &serde_json::json!({
                "zone": zone,
                "allowed": allowed,
                "config": config,
            }),
        ))
    }

    fn health(&self) -> Result<ProxyResponse> {
        let probe = UpstreamRequest {
            method: "GET".to_string(),
            path: "/api/v1/servers".to_string(),
            body: Vec::new(),
        };

        match self.context.upstream.send(&probe) {
            Ok(ref response) if response.status == 200 => Ok(ProxyResponse::json(
                200,
                &serde_json::json!({"details": "Upstream PowerDNS API seems to work :)"}),
            )),
            result => {
                match result {
                    Ok(response) => log::warn!("PowerDNS API health check returned {}", response.status),
                    Err(e) => log::warn!("PowerDNS API health check failed: {}", e),
                }
                Ok(ProxyResponse::json(
                    500,
                    &serde_json::json!({"details": "Something is wrong :(. Please help me!"}),
                ))
            }
        }
    }

    /// `/metrics` either open, or authenticated by basic auth or token
    fn metrics(&self, request: &ProxyRequest) -> Result<ProxyResponse> {
        let config = &self.context.config;
        if !config.metrics_enabled {
            return Err(WebError::NotFound);
        }

        if config.metrics_require_auth {
            let snapshot = self.context.policy.snapshot();
            let environment = match request.header("Authorization").and_then(BasicCredentials::parse) {
                Some(credentials) => snapshot
                    .lookup_environment(&fingerprint(&credentials.password))
                    .filter(|environment| environment.name == credentials.username)
                    .ok_or(WebError::Unauthenticated)?,
                None => self.authenticate(&snapshot, request)?,
            };

            let resource = resolve("GET", "/metrics", b"");
            let decision = authorize(&environment, &resource);
            metrics::record_decision(resource.resource_kind.as_str(), decision.outcome.as_str());
            if !decision.is_allowed() {
                log::info!("Metrics not allowed for environment {}", environment.name);
                return Err(WebError::Forbidden(
                    decision.deny_reason.unwrap_or_default(),
                ));
            }
        }

        let text = metrics::encode().map_err(|e| WebError::Internal(e.to_string()))?;
        Ok(ProxyResponse::text(200, text))
    }

    /// Authorize and forward one PowerDNS API call
    fn proxy(&self, request: &ProxyRequest) -> ProxyResponse {
        let snapshot = self.context.policy.snapshot();
        let resource = resolve(&request.method, &request.url, &request.body);
        let audited = resource.operation_class.is_audited();

        let environment = match self.authenticate(&snapshot, request) {
            Ok(environment) => environment,
            Err(e) => {
                log::info!("Rejecting unauthenticated {} {}", request.method, request.path());
                let response = ProxyResponse::from_error(&e);
                if audited {
                    self.audit(UNAUTHORIZED_ENVIRONMENT, request, b"", response.status);
                }
                return response;
            }
        };

        let decision = authorize(&environment, &resource);
        metrics::record_decision(resource.resource_kind.as_str(), decision.outcome.as_str());

        let result = match decision.deny_reason {
            Some(ref reason) => {
                log::info!(
                    "Denied {} {} for environment {}: {}",
                    request.method,
                    request.path(),
                    environment.name,
                    reason
                );
                Err(WebError::Forbidden(reason.clone()))
            }
            None => {
                log::info!(
                    "Allowed {} {} for environment {}",
                    request.method,
                    request.path(),
                    environment.name
                );
                self.forward(request, &resource, &environment)
            }
        };

        let response = result.unwrap_or_else(|e| ProxyResponse::from_error(&e));

        if audited {
            self.audit(&environment.name, request, &request.body, response.status);
        }

        metrics::record_environment_request(
            &environment.name,
            &request.method,
            response.status,
            resource.resource_kind.as_str(),
        );

        response
    }

    fn forward(
        &self,
        request: &ProxyRequest,
        resource: &ResourceRequest,
        environment: &Environment,
    ) -> Result<ProxyResponse> {
        let upstream_request = UpstreamRequest {
            method: request.method.clone(),
            path: request.url.clone(),
            body: request.body.clone(),
        };

        let response = self.context.upstream.send(&upstream_request)?;

        let is_success = (200..300).contains(&response.status);
        if resource.resource_kind != ResourceKind::ZoneList || !is_success {
            return Ok(ProxyResponse::from_upstream(response));
        }

        match serde_json::from_slice::<Value>(&response.body) {
            Ok(Value::Array(zones)) => {
                let zones = filter_zone_list(environment, zones);
                Ok(ProxyResponse::json(response.status, &Value::Array(zones)))
            }
            _ => {
                log::error!("PowerDNS API returned a zone list that is not a JSON array");
                Err(WebError::UpstreamUnavailable(
                    "unexpected zone list from upstream".to_string(),
                ))
            }
        }
    }

    fn audit(&self, environment: &str, request: &ProxyRequest, body: &[u8], status: u16) {
        let entry = AuditEntry::new(environment, &request.method, request.path(), body, status);
        self.context.audit.record_or_warn(&entry);
    }
}
