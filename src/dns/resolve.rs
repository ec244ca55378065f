//! Resource resolver
//!
//! Maps an upstream API call (method, path and body) onto the resource model
//! the policy is written against. Resolution is total: a path that does not
//! match one of the known PowerDNS endpoint shapes resolves to
//! [`ResourceKind::Other`], which the authorization engine denies unless it is
//! a plain read on a zone the environment may read. A path the upstream could
//! normalize into a different endpoint resolves to [`ResourceKind::Malformed`]
//! and is never allowed.

use std::collections::BTreeSet;
use std::fmt;

use serde_json::Value;

use crate::dns::name::normalize;

/// HTTP methods the resolver distinguishes
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Method {
    Get,
    Head,
    Post,
    Put,
    Patch,
    Delete,
    Other(String),
}

impl Method {
    pub fn parse(method: &str) -> Method {
        match method.to_ascii_uppercase().as_str() {
            "GET" => Method::Get,
            "HEAD" => Method::Head,
            "POST" => Method::Post,
            "PUT" => Method::Put,
            "PATCH" => Method::Patch,
            "DELETE" => Method::Delete,
            other => Method::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match *self {
            Method::Get => "GET",
            Method::Head => "HEAD",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
            Method::Other(ref other) => other,
        }
    }

    pub fn is_read(&self) -> bool {
        matches!(*self, Method::Get | Method::Head)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum OperationClass {
    Read,
    Write,
    Admin,
}

impl OperationClass {
    fn from_method(method: &Method) -> OperationClass {
        if method.is_read() {
            OperationClass::Read
        } else {
            OperationClass::Write
        }
    }

    /// Write and admin operations are recorded in the audit log
    pub fn is_audited(self) -> bool {
        self != OperationClass::Read
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    ServerInfo,
    ServerInternals,
    ZoneList,
    ZoneDetail,
    ZoneLifecycle,
    ZoneMetadata,
    ZoneAction,
    RrsetUpdate,
    Cryptokeys,
    Tsigkeys,
    Search,
    Metrics,
    Other,
    Malformed,
}

impl ResourceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ResourceKind::ServerInfo => "server_info",
            ResourceKind::ServerInternals => "server_internals",
            ResourceKind::ZoneList => "zone_list",
            ResourceKind::ZoneDetail => "zone_detail",
            ResourceKind::ZoneLifecycle => "zone_lifecycle",
            ResourceKind::ZoneMetadata => "zone_metadata",
            ResourceKind::ZoneAction => "zone_action",
            ResourceKind::RrsetUpdate => "rrset_update",
            ResourceKind::Cryptokeys => "cryptokeys",
            ResourceKind::Tsigkeys => "tsigkeys",
            ResourceKind::Search => "search",
            ResourceKind::Metrics => "metrics",
            ResourceKind::Other => "other",
            ResourceKind::Malformed => "malformed",
        }
    }
}

/// A request expressed in terms of the policy's resource model
#[derive(Clone, Debug, PartialEq)]
pub struct ResourceRequest {
    pub method: Method,
    pub operation_class: OperationClass,
    pub resource_kind: ResourceKind,
    /// Normalized zone name, empty when the request is not zone scoped
    pub zone_name: String,
    /// Normalized record names touched by an RRSET_UPDATE
    pub target_records: BTreeSet<String>,
    /// Original request body, kept for the audit log only
    pub raw_payload: Option<Vec<u8>>,
}

impl ResourceRequest {
    fn new(method: Method, operation_class: OperationClass, resource_kind: ResourceKind) -> Self {
        ResourceRequest {
            method,
            operation_class,
            resource_kind,
            zone_name: String::new(),
            target_records: BTreeSet::new(),
            raw_payload: None,
        }
    }

    fn with_zone(mut self, zone: &str) -> Self {
        self.zone_name = normalize(zone);
        self
    }

    fn other(method: Method) -> Self {
        let class = OperationClass::from_method(&method);
        ResourceRequest::new(method, class, ResourceKind::Other)
    }
}

/// Split a request target into path segments, ignoring the query string.
///
/// Returns `None` for dot segments and percent-encoded segments, which could
/// make the upstream see a different path than the one authorized here.
fn path_segments(path: &str) -> Option<Vec<&str>> {
    let path = path.split(|c| c == '?' || c == '#').next().unwrap_or("");
    let segments: Vec<&str> = path.split('/').filter(|x| !x.is_empty()).collect();

    if segments
        .iter()
        .any(|s| *s == "." || *s == ".." || s.contains('%') || s.contains('\\'))
    {
        return None;
    }

    Some(segments)
}

/// Extract every record name from a PowerDNS `{"rrsets": [...]}` payload.
///
/// Anything that is not an object with an `rrsets` array of objects carrying a
/// string `name` is rejected as a whole.
fn rrset_names(body: &[u8]) -> Option<BTreeSet<String>> {
    let payload: Value = serde_json::from_slice(body).ok()?;
    let rrsets = payload.get("rrsets")?.as_array()?;

    rrsets
        .iter()
        .map(|rrset| rrset.get("name").and_then(Value::as_str).map(normalize))
        .collect()
}

/// Zone name of a zone creation payload
fn created_zone_name(body: &[u8]) -> Option<String> {
    let payload: Value = serde_json::from_slice(body).ok()?;
    payload.get("name")?.as_str().map(|name| name.to_string())
}

/// Map a request onto the resource model.
pub fn resolve(method: &str, path: &str, body: &[u8]) -> ResourceRequest {
    let method = Method::parse(method);
    let raw_payload = if body.is_empty() {
        None
    } else {
        Some(body.to_vec())
    };

    let mut request = resolve_shape(method, path, body);
    request.raw_payload = raw_payload;
    request
}

fn resolve_shape(method: Method, path: &str, body: &[u8]) -> ResourceRequest {
    use self::Method::*;
    use self::OperationClass::{Admin, Read, Write};
    use self::ResourceKind as Kind;

    let segments = match path_segments(path) {
        Some(segments) => segments,
        None => {
            log::debug!("Refusing to resolve suspicious path {:?}", path);
            let class = OperationClass::from_method(&method);
            return ResourceRequest::new(method, class, Kind::Malformed);
        }
    };

    let class = OperationClass::from_method(&method);

    match (method.clone(), segments.as_slice()) {
        (_, ["metrics"]) => ResourceRequest::new(method, class, Kind::Metrics),

        (Get, ["api", "v1", "servers"]) | (Get, ["api", "v1", "servers", _]) => {
            ResourceRequest::new(method, Read, Kind::ServerInfo)
        }

        (_, ["api", "v1", "servers", _, "configuration", ..])
        | (_, ["api", "v1", "servers", _, "statistics", ..]) => {
            ResourceRequest::new(method, class, Kind::ServerInternals)
        }

        (Get, ["api", "v1", "servers", _, "zones"]) => {
            ResourceRequest::new(method, Read, Kind::ZoneList)
        }
        (Post, ["api", "v1", "servers", _, "zones"]) => match created_zone_name(body) {
            Some(zone) => ResourceRequest::new(method, Admin, Kind::ZoneLifecycle).with_zone(&zone),
            None => ResourceRequest::other(method),
        },

        (Get, ["api", "v1", "servers", _, "zones", zone]) => {
            ResourceRequest::new(method, Read, Kind::ZoneDetail).with_zone(zone)
        }
        (Delete, ["api", "v1", "servers", _, "zones", zone]) => {
            ResourceRequest::new(method, Admin, Kind::ZoneLifecycle).with_zone(zone)
        }
        (Put, ["api", "v1", "servers", _, "zones", zone]) => {
            ResourceRequest::new(method, Admin, Kind::ZoneMetadata).with_zone(zone)
        }
        (Patch, ["api", "v1", "servers", _, "zones", zone])
        | (Patch, ["api", "v1", "servers", _, "zones", zone, "rrsets"])
        | (Put, ["api", "v1", "servers", _, "zones", zone, "rrsets"]) => match rrset_names(body) {
            Some(names) => {
                let mut request =
                    ResourceRequest::new(method, Write, Kind::RrsetUpdate).with_zone(zone);
                request.target_records = names;
                request
            }
            None => ResourceRequest::other(method).with_zone(zone),
        },

        (Put, ["api", "v1", "servers", _, "zones", zone, "notify"])
        | (Put, ["api", "v1", "servers", _, "zones", zone, "rectify"]) => {
            ResourceRequest::new(method, Write, Kind::ZoneAction).with_zone(zone)
        }

        (_, ["api", "v1", "servers", _, "zones", zone, "cryptokeys"])
        | (_, ["api", "v1", "servers", _, "zones", zone, "cryptokeys", _]) => {
            ResourceRequest::new(method, class, Kind::Cryptokeys).with_zone(zone)
        }

        (_, ["api", "v1", "servers", _, "tsigkeys"])
        | (_, ["api", "v1", "servers", _, "tsigkeys", _]) => {
            ResourceRequest::new(method, class, Kind::Tsigkeys)
        }

        (Get, ["api", "v1", "servers", _, "search-data"]) => {
            ResourceRequest::new(method, Read, Kind::Search)
        }

        (_, ["api", "v1", "servers", _, "zones", zone, ..]) => {
            ResourceRequest::other(method).with_zone(zone)
        }

        (_, _) => ResourceRequest::other(method),
    }
}
