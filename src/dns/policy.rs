//! Policy model
//!
//! Every environment from the configuration is compiled once into an
//! [`Environment`] with normalized names and pre-compiled regexes. The
//! resulting [`PolicyModel`] is immutable; a configuration reload builds a new
//! model and swaps it into the [`PolicyStore`] in one step, so a request always
//! sees one consistent snapshot.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use parking_lot::RwLock;
use regex::Regex;
use serde::{Serialize, Serializer};

use crate::dns::config::{ConfigError, EnvironmentConfig, Result, ZoneConfig};
use crate::dns::name::{compile_full_match, is_subzone, normalize};

/// A compiled regular expression together with its source text
#[derive(Clone, Debug)]
pub struct Pattern {
    source: String,
    regex: Regex,
}

impl Pattern {
    pub fn compile(source: &str) -> std::result::Result<Pattern, regex::Error> {
        Ok(Pattern {
            source: source.to_string(),
            regex: compile_full_match(source)?,
        })
    }

    /// Full-name match against a normalized name
    pub fn is_match(&self, name: &str) -> bool {
        self.regex.is_match(name)
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }
}

impl PartialEq for Pattern {
    fn eq(&self, other: &Pattern) -> bool {
        self.source == other.source
    }
}

impl Serialize for Pattern {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.source)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct Services {
    pub acme: bool,
}

/// One zone entry of an environment
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ZoneGrant {
    /// Normalized zone name, or the regex source when `is_regex` is set
    #[serde(rename = "name")]
    pub zone_pattern: String,
    #[serde(rename = "regex")]
    pub is_regex: bool,
    pub description: String,
    /// Normalized literal record names
    pub records: BTreeSet<String>,
    pub regex_records: Vec<Pattern>,
    pub services: Services,
    pub admin: bool,
    pub subzones: bool,
    pub cryptokeys: bool,
    #[serde(skip)]
    zone_regex: Option<Pattern>,
}

/// Every proper ancestor of `zone` on a label boundary, nearest first
fn parent_zones(zone: &str) -> impl Iterator<Item = &str> {
    zone.match_indices('.').map(move |(i, _)| &zone[i + 1..])
}

impl ZoneGrant {
    fn from_config(environment: &str, zone: &ZoneConfig) -> Result<ZoneGrant> {
        let compile = |source: &str| {
            Pattern::compile(source).map_err(|e| ConfigError::InvalidRegex {
                environment: environment.to_string(),
                pattern: source.to_string(),
                reason: e.to_string(),
            })
        };

        let zone_regex = if zone.regex {
            Some(compile(zone.name.as_str())?)
        } else {
            None
        };

        let zone_pattern = if zone.regex {
            zone.name.clone()
        } else {
            normalize(&zone.name)
        };

        if zone_pattern.is_empty() {
            return Err(ConfigError::Invalid(format!(
                "environment {}: zone name must not be empty",
                environment
            )));
        }

        let regex_records = zone
            .regex_records
            .iter()
            .map(|source| compile(source.as_str()))
            .collect::<Result<Vec<_>>>()?;

        Ok(ZoneGrant {
            zone_pattern,
            is_regex: zone.regex,
            description: zone.description.clone(),
            records: zone
                .records
                .iter()
                .map(|r| normalize(r))
                .filter(|r| !r.is_empty())
                .collect(),
            regex_records,
            services: Services {
                acme: zone.services.acme,
            },
            admin: zone.admin,
            subzones: zone.subzones,
            cryptokeys: zone.cryptokeys,
            zone_regex,
        })
    }

    /// A grant without any record restriction covers the whole zone
    pub fn is_unrestricted(&self) -> bool {
        self.records.is_empty() && self.regex_records.is_empty()
    }

    /// Returns true if this grant applies to the normalized `zone`
    pub fn matches_zone(&self, zone: &str) -> bool {
        if zone.is_empty() {
            return false;
        }

        match self.zone_regex {
            Some(ref pattern) => {
                pattern.is_match(zone)
                    || (self.subzones
                        && (is_subzone(zone, &normalize(&self.zone_pattern))
                            || parent_zones(zone).any(|parent| pattern.is_match(parent))))
            }
            None => zone == self.zone_pattern || (self.subzones && is_subzone(zone, &self.zone_pattern)),
        }
    }

    /// Returns true if this grant allows writing the normalized record `name`
    pub fn authorizes_record(&self, name: &str) -> bool {
        if name.is_empty() {
            return false;
        }

        if self.is_unrestricted() || self.records.contains(name) {
            return true;
        }

        if self.regex_records.iter().any(|p| p.is_match(name)) {
            return true;
        }

        self.services.acme
            && name
                .strip_prefix("_acme-challenge.")
                .map_or(false, |rest| self.records.contains(rest))
    }
}

/// A named policy bundle selected by a token
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Environment {
    pub name: String,
    #[serde(skip)]
    pub token_fingerprint: String,
    pub zones: Vec<ZoneGrant>,
    pub global_read_only: bool,
    pub global_search: bool,
    pub global_tsigkeys: bool,
    pub global_cryptokeys: bool,
    pub metrics_proxy: bool,
}

impl Environment {
    pub fn from_config(config: &EnvironmentConfig) -> Result<Environment> {
        if config.name.is_empty() {
            return Err(ConfigError::Invalid(
                "environment name must be a non-empty string".to_string(),
            ));
        }

        let fingerprint = config.token_sha512.to_ascii_lowercase();
        if fingerprint.len() != 128 || !fingerprint.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(ConfigError::InvalidFingerprint(config.name.clone()));
        }

        let zones = config
            .zones
            .iter()
            .map(|zone| ZoneGrant::from_config(&config.name, zone))
            .collect::<Result<Vec<_>>>()?;

        Ok(Environment {
            name: config.name.clone(),
            token_fingerprint: fingerprint,
            zones,
            global_read_only: config.global_read_only,
            global_search: config.global_search,
            global_tsigkeys: config.global_tsigkeys,
            global_cryptokeys: config.global_cryptokeys,
            metrics_proxy: config.metrics_proxy,
        })
    }

    /// All grants applying to the normalized `zone`, in configuration order
    pub fn matching_grants<'a>(&'a self, zone: &'a str) -> impl Iterator<Item = &'a ZoneGrant> + 'a {
        self.zones.iter().filter(move |grant| grant.matches_zone(zone))
    }

    /// Whether the environment may read `zone`
    pub fn can_read_zone(&self, zone: &str) -> bool {
        self.global_read_only || self.matching_grants(zone).next().is_some()
    }
}

/// Immutable lookup structure over all environments
#[derive(Debug, Default)]
pub struct PolicyModel {
    environments: Vec<Arc<Environment>>,
    by_fingerprint: HashMap<String, Arc<Environment>>,
}

impl PolicyModel {
    /// Compile and cross-check every environment. Duplicate names or token
    /// fingerprints and invalid regexes are rejected.
    pub fn build(configs: &[EnvironmentConfig]) -> Result<PolicyModel> {
        let mut environments = Vec::with_capacity(configs.len());
        let mut by_fingerprint: HashMap<String, Arc<Environment>> = HashMap::new();
        let mut names = BTreeSet::new();

        for config in configs {
            let environment = Arc::new(Environment::from_config(config)?);

            if !names.insert(environment.name.clone()) {
                return Err(ConfigError::DuplicateName(environment.name.clone()));
            }

            if let Some(existing) = by_fingerprint.get(&environment.token_fingerprint) {
                return Err(ConfigError::DuplicateFingerprint(
                    existing.name.clone(),
                    environment.name.clone(),
                ));
            }

            by_fingerprint.insert(environment.token_fingerprint.clone(), environment.clone());
            environments.push(environment);
        }

        log::info!("Loaded policy for {} environments", environments.len());

        Ok(PolicyModel {
            environments,
            by_fingerprint,
        })
    }

    pub fn lookup_environment(&self, fingerprint: &str) -> Option<Arc<Environment>> {
        self.by_fingerprint.get(fingerprint).cloned()
    }

    pub fn environments(&self) -> &[Arc<Environment>] {
        &self.environments
    }

    pub fn len(&self) -> usize {
        self.environments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.environments.is_empty()
    }
}

/// Shared handle to the current policy snapshot
pub struct PolicyStore {
    current: RwLock<Arc<PolicyModel>>,
}

impl PolicyStore {
    pub fn new(model: PolicyModel) -> PolicyStore {
        PolicyStore {
            current: RwLock::new(Arc::new(model)),
        }
    }

    /// The snapshot to use for the lifetime of one request
    pub fn snapshot(&self) -> Arc<PolicyModel> {
        self.current.read().clone()
    }

    /// Replace the active model; requests already holding a snapshot keep it
    pub fn replace(&self, model: PolicyModel) {
        let model = Arc::new(model);
        *self.current.write() = model;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::config::ServicesConfig;

    fn fingerprint(c: char) -> String {
        std::iter::repeat(c).take(128).collect()
    }

    fn env(name: &str, fp: char, zones: Vec<ZoneConfig>) -> EnvironmentConfig {
        EnvironmentConfig {
            name: name.to_string(),
            token_sha512: fingerprint(fp),
            zones,
            ..Default::default()
        }
    }

    fn zone(name: &str) -> ZoneConfig {
        ZoneConfig {
            name: name.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_lookup_environment() {
        let model = PolicyModel::build(&[
            env("Test 1", 'a', vec![zone("test.example.com.")]),
            env("Test 2", 'b', vec![zone("test.example.com.")]),
        ])
        .unwrap();

        assert_eq!(model.len(), 2);
        let found = model.lookup_environment(&fingerprint('b')).unwrap();
        assert_eq!(found.name, "Test 2");
        assert!(model.lookup_environment(&fingerprint('c')).is_none());
    }

    #[test]
    fn test_fingerprint_case_insensitive_at_load() {
        let model = PolicyModel::build(&[env("Upper", 'A', vec![])]).unwrap();
        assert!(model.lookup_environment(&fingerprint('a')).is_some());
    }

    #[test]
    fn test_duplicate_fingerprint_rejected() {
        let result = PolicyModel::build(&[env("One", 'a', vec![]), env("Two", 'a', vec![])]);
        match result {
            Err(ConfigError::DuplicateFingerprint(first, second)) => {
                assert_eq!(first, "One");
                assert_eq!(second, "Two");
            }
            other => panic!("expected duplicate fingerprint, got {:?}", other),
        }
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let result = PolicyModel::build(&[env("Same", 'a', vec![]), env("Same", 'b', vec![])]);
        assert!(matches!(result, Err(ConfigError::DuplicateName(_))));
    }

    #[test]
    fn test_bad_fingerprint_rejected() {
        let mut config = env("Short", 'a', vec![]);
        config.token_sha512 = "abc".to_string();
        assert!(matches!(
            PolicyModel::build(&[config]),
            Err(ConfigError::InvalidFingerprint(_))
        ));

        let mut config = env("NotHex", 'a', vec![]);
        config.token_sha512 = fingerprint('z');
        assert!(matches!(
            PolicyModel::build(&[config]),
            Err(ConfigError::InvalidFingerprint(_))
        ));
    }

    #[test]
    fn test_invalid_regex_rejected() {
        let mut bad_zone = zone("(unclosed");
        bad_zone.regex = true;
        assert!(matches!(
            PolicyModel::build(&[env("Regex", 'a', vec![bad_zone])]),
            Err(ConfigError::InvalidRegex { .. })
        ));

        let mut bad_record = zone("example.com");
        bad_record.regex_records = vec!["[".to_string()];
        assert!(matches!(
            PolicyModel::build(&[env("Records", 'a', vec![bad_record])]),
            Err(ConfigError::InvalidRegex { .. })
        ));
    }

    #[test]
    fn test_empty_zone_name_rejected() {
        assert!(matches!(
            PolicyModel::build(&[env("Empty", 'a', vec![zone(".")])]),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_grant_normalized() {
        let mut config = zone("Test-Zone.Example.com.");
        config.records = vec!["Entry1.Test-Zone.Example.com.".to_string(), ".".to_string()];
        let grant = ZoneGrant::from_config("Test", &config).unwrap();

        assert_eq!(grant.zone_pattern, "test-zone.example.com");
        assert!(grant.records.contains("entry1.test-zone.example.com"));
        assert_eq!(grant.records.len(), 1);
    }

    #[test]
    fn test_matches_zone() {
        let mut config = zone("test.example.com");
        let grant = ZoneGrant::from_config("Test", &config).unwrap();
        assert!(grant.matches_zone("test.example.com"));
        assert!(!grant.matches_zone("sub.test.example.com"));
        assert!(!grant.matches_zone(""));

        config.subzones = true;
        let grant = ZoneGrant::from_config("Test", &config).unwrap();
        assert!(grant.matches_zone("sub.test.example.com"));
        assert!(grant.matches_zone("a.sub.test.example.com"));
        assert!(!grant.matches_zone("nottest.example.com"));
        assert!(!grant.matches_zone("sub.test.example.com.test"));
    }

    #[test]
    fn test_matches_zone_regex() {
        let mut config = zone(r".*\.example\.com");
        config.regex = true;
        let grant = ZoneGrant::from_config("Test", &config).unwrap();

        assert!(grant.matches_zone("foo.example.com"));
        assert!(grant.matches_zone("bar.example.com"));
        assert!(!grant.matches_zone("example.com"));
        assert!(!grant.matches_zone("foo.example.org"));
    }

    #[test]
    fn test_matches_zone_regex_with_subzones() {
        let mut config = zone(r"example\.com");
        config.regex = true;
        let grant = ZoneGrant::from_config("Test", &config).unwrap();
        assert!(grant.matches_zone("example.com"));
        assert!(!grant.matches_zone("a.example.com"));

        config.subzones = true;
        let grant = ZoneGrant::from_config("Test", &config).unwrap();
        assert!(grant.matches_zone("example.com"));
        assert!(grant.matches_zone("a.example.com"));
        assert!(grant.matches_zone("b.a.example.com"));
        assert!(!grant.matches_zone("notexample.com"));
        assert!(!grant.matches_zone("example.com.evil.org"));

        let mut config = zone(r"customer-\d+\.example\.com");
        config.regex = true;
        config.subzones = true;
        let grant = ZoneGrant::from_config("Test", &config).unwrap();
        assert!(grant.matches_zone("prod.customer-7.example.com"));
        assert!(!grant.matches_zone("prod.customer-x.example.com"));
    }

    #[test]
    fn test_authorizes_record() {
        let mut config = zone("test-zone.example.com");
        config.records = vec!["entry1.test-zone.example.com".to_string()];
        config.regex_records = vec![r"web-\d+\.test-zone\.example\.com".to_string()];
        let grant = ZoneGrant::from_config("Test", &config).unwrap();

        assert!(grant.authorizes_record("entry1.test-zone.example.com"));
        assert!(grant.authorizes_record("web-12.test-zone.example.com"));
        assert!(!grant.authorizes_record("web-x.test-zone.example.com"));
        assert!(!grant.authorizes_record("entry100.test-zone.example.com"));
        assert!(!grant.authorizes_record("_acme-challenge.entry1.test-zone.example.com"));
        assert!(!grant.authorizes_record(""));
    }

    #[test]
    fn test_authorizes_acme_record() {
        let mut config = zone("test-zone.example.com");
        config.records = vec!["blabub.test-zone.example.com".to_string()];
        config.services = ServicesConfig { acme: true };
        let grant = ZoneGrant::from_config("Test", &config).unwrap();

        assert!(grant.authorizes_record("_acme-challenge.blabub.test-zone.example.com"));
        assert!(!grant.authorizes_record("_acme-challenge.hallo.test-zone.example.com"));
        assert!(!grant.authorizes_record("_acme.blabub.test-zone.example.com"));
    }

    #[test]
    fn test_unrestricted_grant() {
        let grant = ZoneGrant::from_config("Test", &zone("test-zone.example.com")).unwrap();
        assert!(grant.is_unrestricted());
        assert!(grant.authorizes_record("anything.test-zone.example.com"));
        assert!(grant.authorizes_record("_acme-challenge.blabub.test-zone.example.com"));
    }

    #[test]
    fn test_store_replace_keeps_old_snapshot() {
        let store = PolicyStore::new(PolicyModel::build(&[env("Old", 'a', vec![])]).unwrap());
        let before = store.snapshot();

        store.replace(PolicyModel::build(&[env("New", 'b', vec![])]).unwrap());

        assert!(before.lookup_environment(&fingerprint('a')).is_some());
        let after = store.snapshot();
        assert!(after.lookup_environment(&fingerprint('a')).is_none());
        assert_eq!(after.lookup_environment(&fingerprint('b')).unwrap().name, "New");
    }

    #[test]
    fn test_environment_serialization_hides_fingerprint() {
        let model = PolicyModel::build(&[env("Visible", 'a', vec![zone("example.com")])]).unwrap();
        let json = serde_json::to_value(model.environments()[0].as_ref()).unwrap();

        assert_eq!(json["name"], "Visible");
        assert_eq!(json["zones"][0]["name"], "example.com");
        assert_eq!(json["zones"][0]["regex"], false);
        assert!(json.get("token_fingerprint").is_none());
        assert!(json["zones"][0].get("zone_regex").is_none());
    }
}
