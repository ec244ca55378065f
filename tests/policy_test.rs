//! Policy evaluation against configurations written as YAML

use proptest::prelude::*;

use zonegate::dns::authorize::{authorize, Outcome};
use zonegate::dns::config::{ConfigError, ProxyConfig};
use zonegate::dns::policy::PolicyModel;
use zonegate::dns::resolve::{resolve, ResourceKind};
use zonegate::web::auth::fingerprint;

const CONFIG: &str = r#"
pdns_api_url: "https://pdns.example.com"
pdns_api_token: "upstream-secret"
environments:
  - name: "Test1"
    token_sha512: "{test1}"
    zones:
      - name: "test-zone.example.com"
        records:
          - "entry1.test-zone.example.com"
          - "blabub.test-zone.example.com"
        services:
          acme: true
      - name: "customer.example.com"
        subzones: true
        cryptokeys: true
      - name: ".*\\.regex\\.example\\.com"
        regex: true
        regex_records:
          - "web-\\d+\\..*"
  - name: "Empty"
    token_sha512: "{empty}"
"#;

fn model() -> PolicyModel {
    let data = CONFIG
        .replace("{test1}", &fingerprint("test1-token"))
        .replace("{empty}", &fingerprint("empty-token"));
    let config = ProxyConfig::from_yaml(&data).unwrap();
    PolicyModel::build(&config.environments).unwrap()
}

fn rrset_body(names: &[&str]) -> Vec<u8> {
    let rrsets: Vec<serde_json::Value> = names
        .iter()
        .map(|name| serde_json::json!({"name": name, "type": "A", "changetype": "REPLACE"}))
        .collect();
    serde_json::to_vec(&serde_json::json!({ "rrsets": rrsets })).unwrap()
}

fn decide(token: &str, method: &str, path: &str, body: &[u8]) -> Outcome {
    let model = model();
    let environment = model.lookup_environment(&fingerprint(token)).unwrap();
    let request = resolve(method, path, body);
    authorize(&environment, &request).outcome
}

fn patch(zone: &str, names: &[&str]) -> Outcome {
    decide(
        "test1-token",
        "PATCH",
        &format!("/api/v1/servers/localhost/zones/{}", zone),
        &rrset_body(names),
    )
}

#[test]
fn test_token_lookup() {
    let model = model();
    assert_eq!(
        model.lookup_environment(&fingerprint("test1-token")).unwrap().name,
        "Test1"
    );
    assert!(model.lookup_environment(&fingerprint("unknown")).is_none());
}

#[test]
fn test_literal_and_acme_records() {
    assert_eq!(
        patch("test-zone.example.com.", &["entry1.test-zone.example.com."]),
        Outcome::Allow
    );
    assert_eq!(
        patch(
            "test-zone.example.com.",
            &["_acme-challenge.blabub.test-zone.example.com."]
        ),
        Outcome::Allow
    );
    assert_eq!(
        patch(
            "test-zone.example.com.",
            &["_acme-challenge.hallo.test-zone.example.com."]
        ),
        Outcome::Deny
    );
    assert_eq!(
        patch("test-zone.example.com.", &["entry2.test-zone.example.com."]),
        Outcome::Deny
    );
}

#[test]
fn test_atomic_rrset_update() {
    assert_eq!(
        patch(
            "test-zone.example.com.",
            &[
                "entry1.test-zone.example.com.",
                "entry2.test-zone.example.com."
            ]
        ),
        Outcome::Deny
    );
}

#[test]
fn test_subzones() {
    assert_eq!(
        patch("prod.customer.example.com.", &["www.prod.customer.example.com."]),
        Outcome::Allow
    );
    assert_eq!(
        patch("notcustomer.example.com.", &["www.notcustomer.example.com."]),
        Outcome::Deny
    );
    assert_eq!(
        decide(
            "test1-token",
            "GET",
            "/api/v1/servers/localhost/zones/a.b.customer.example.com./cryptokeys",
            b""
        ),
        Outcome::Allow
    );
}

#[test]
fn test_regex_zone_and_records() {
    assert_eq!(
        patch("foo.regex.example.com.", &["web-1.foo.regex.example.com."]),
        Outcome::Allow
    );
    assert_eq!(
        patch("foo.regex.example.com.", &["db-1.foo.regex.example.com."]),
        Outcome::Deny
    );
    assert_eq!(
        patch("regex.example.com.", &["web-1.regex.example.com."]),
        Outcome::Deny
    );
}

#[test]
fn test_duplicate_fingerprint_is_fatal() {
    let data = CONFIG
        .replace("{test1}", &fingerprint("same"))
        .replace("{empty}", &fingerprint("same"));
    let config = ProxyConfig::from_yaml(&data).unwrap();

    assert!(matches!(
        PolicyModel::build(&config.environments),
        Err(ConfigError::DuplicateFingerprint(_, _))
    ));
}

#[test]
fn test_invalid_regex_is_fatal() {
    let data = CONFIG
        .replace("{test1}", &fingerprint("a"))
        .replace("{empty}", &fingerprint("b"))
        .replace("web-\\\\d+\\\\..*", "web-(");
    let config = ProxyConfig::from_yaml(&data).unwrap();

    assert!(matches!(
        PolicyModel::build(&config.environments),
        Err(ConfigError::InvalidRegex { .. })
    ));
}

fn method_strategy() -> impl Strategy<Value = &'static str> {
    prop::sample::select(vec!["GET", "HEAD", "POST", "PUT", "PATCH", "DELETE", "OPTIONS"])
}

fn path_strategy() -> impl Strategy<Value = String> {
    let segment = prop::sample::select(vec![
        "api",
        "v1",
        "servers",
        "localhost",
        "zones",
        "example.com.",
        "rrsets",
        "cryptokeys",
        "tsigkeys",
        "search-data",
        "metadata",
        "notify",
        "configuration",
        "..",
    ]);
    prop::collection::vec(segment, 0..8).prop_map(|segments| format!("/{}", segments.join("/")))
}

proptest! {
    #[test]
    fn empty_environment_is_fail_closed(
        method in method_strategy(),
        path in path_strategy(),
        body in prop::sample::select(vec![
            String::new(),
            "{}".to_string(),
            r#"{"name": "example.com."}"#.to_string(),
            r#"{"rrsets": [{"name": "www.example.com."}]}"#.to_string(),
        ]),
    ) {
        let model = model();
        let environment = model.lookup_environment(&fingerprint("empty-token")).unwrap();
        let request = resolve(method, &path, body.as_bytes());
        let decision = authorize(&environment, &request);

        if request.resource_kind == ResourceKind::ServerInfo {
            prop_assert_eq!(decision.outcome, Outcome::Allow);
        } else {
            prop_assert_eq!(decision.outcome, Outcome::Deny);
            prop_assert!(decision.deny_reason.is_some());
        }
    }
}
