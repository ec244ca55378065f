//! Authorization engine
//!
//! `authorize` is a pure function of an environment and a resolved request.
//! It never fails: anything it cannot positively allow is denied.

use serde_json::Value;

use crate::dns::name::{is_in_zone, normalize};
use crate::dns::policy::{Environment, ZoneGrant};
use crate::dns::resolve::{OperationClass, ResourceKind, ResourceRequest};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    Allow,
    Deny,
}

impl Outcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Outcome::Allow => "allow",
            Outcome::Deny => "deny",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Decision<'a> {
    pub outcome: Outcome,
    /// Present iff the outcome is `Deny`
    pub deny_reason: Option<String>,
    /// The grant that justified an `Allow`, if a zone grant was involved
    pub matched_grant: Option<&'a ZoneGrant>,
}

impl<'a> Decision<'a> {
    fn allow(matched_grant: Option<&'a ZoneGrant>) -> Decision<'a> {
        Decision {
            outcome: Outcome::Allow,
            deny_reason: None,
            matched_grant,
        }
    }

    fn deny<S: Into<String>>(reason: S) -> Decision<'a> {
        Decision {
            outcome: Outcome::Deny,
            deny_reason: Some(reason.into()),
            matched_grant: None,
        }
    }

    fn allow_if(condition: bool, reason: &str) -> Decision<'a> {
        if condition {
            Decision::allow(None)
        } else {
            Decision::deny(reason)
        }
    }

    pub fn is_allowed(&self) -> bool {
        self.outcome == Outcome::Allow
    }
}

/// Decide whether `environment` may perform `request`.
pub fn authorize<'a>(environment: &'a Environment, request: &ResourceRequest) -> Decision<'a> {
    let zone = request.zone_name.as_str();
    let grants: Vec<&'a ZoneGrant> = environment
        .zones
        .iter()
        .filter(|grant| grant.matches_zone(zone))
        .collect();

    match request.resource_kind {
        ResourceKind::ServerInfo => Decision::allow(None),
        ResourceKind::ServerInternals => Decision::deny("resource not allowed"),
        ResourceKind::Malformed => Decision::deny("malformed path"),

        ResourceKind::Search => {
            Decision::allow_if(environment.global_search, "search not permitted")
        }
        ResourceKind::Tsigkeys => {
            Decision::allow_if(environment.global_tsigkeys, "tsigkeys not permitted")
        }
        ResourceKind::Metrics => {
            Decision::allow_if(environment.metrics_proxy, "metrics not permitted")
        }

        ResourceKind::Cryptokeys => {
            if environment.global_cryptokeys {
                return Decision::allow(None);
            }
            match grants.iter().copied().find(|grant| grant.cryptokeys) {
                Some(grant) => Decision::allow(Some(grant)),
                None => Decision::deny("cryptokeys not permitted"),
            }
        }

        ResourceKind::ZoneList => Decision::allow_if(
            environment.global_read_only || !environment.zones.is_empty(),
            "zone list not permitted",
        ),

        ResourceKind::ZoneDetail => read_zone(environment, &grants),

        ResourceKind::ZoneLifecycle | ResourceKind::ZoneMetadata => {
            if environment.global_read_only {
                return Decision::deny("read only token");
            }
            if grants.is_empty() {
                return Decision::deny("zone not allowed");
            }
            match grants.iter().copied().find(|grant| grant.admin) {
                Some(grant) => Decision::allow(Some(grant)),
                None => Decision::deny("zone admin not permitted"),
            }
        }

        ResourceKind::ZoneAction => {
            if environment.global_read_only {
                return Decision::deny("read only token");
            }
            match grants.first().copied() {
                Some(grant) => Decision::allow(Some(grant)),
                None => Decision::deny("zone not allowed"),
            }
        }

        ResourceKind::RrsetUpdate => authorize_rrsets(environment, &grants, request),

        ResourceKind::Other => {
            if request.operation_class != OperationClass::Read {
                return Decision::deny("resource not allowed");
            }
            read_zone(environment, &grants)
        }
    }
}

fn read_zone<'a>(environment: &Environment, grants: &[&'a ZoneGrant]) -> Decision<'a> {
    match grants.first().copied() {
        Some(grant) => Decision::allow(Some(grant)),
        None if environment.global_read_only => Decision::allow(None),
        None => Decision::deny("zone not allowed"),
    }
}

/// Every target name must be covered by at least one matching grant
fn authorize_rrsets<'a>(
    environment: &Environment,
    grants: &[&'a ZoneGrant],
    request: &ResourceRequest,
) -> Decision<'a> {
    if environment.global_read_only {
        return Decision::deny("RRSET update not allowed with read only token");
    }
    if grants.is_empty() {
        return Decision::deny("zone not allowed");
    }

    let mut justification = None;

    for name in &request.target_records {
        if !is_in_zone(name, &request.zone_name) {
            return Decision::deny(format!("RRSET {} not allowed", name));
        }

        match grants.iter().copied().find(|grant| grant.authorizes_record(name)) {
            Some(grant) => {
                justification.get_or_insert(grant);
            }
            None => return Decision::deny(format!("RRSET {} not allowed", name)),
        }
    }

    Decision::allow(justification.or_else(|| grants.first().copied()))
}

/// Reduce an upstream zone listing to the zones `environment` may read.
///
/// Entries without a string `name` are dropped.
pub fn filter_zone_list(environment: &Environment, zones: Vec<Value>) -> Vec<Value> {
    if environment.global_read_only {
        return zones;
    }

    zones
        .into_iter()
        .filter(|zone| {
            zone.get("name")
                .and_then(Value::as_str)
                .map_or(false, |name| environment.can_read_zone(&normalize(name)))
        })
        .collect()
}
