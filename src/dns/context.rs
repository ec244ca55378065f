//! The `ProxyContext` holds the state shared by every request handler

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{Builder, JoinHandle};
use std::time::{Duration, SystemTime};

use derive_more::{Display, Error, From};

use crate::dns::config::{ConfigError, ProxyConfig};
use crate::dns::policy::{PolicyModel, PolicyStore};
use crate::web::audit::{AuditError, AuditSink};
use crate::web::metrics;
use crate::web::upstream::{HttpUpstream, Upstream, UpstreamError};

#[derive(Debug, Display, From, Error)]
pub enum ContextError {
    Config(ConfigError),
    Audit(AuditError),
    Upstream(UpstreamError),
}

type Result<T> = std::result::Result<T, ContextError>;

pub struct ProxyContext {
    /// Settings read at startup; only the environments are reloaded
    pub config: ProxyConfig,
    pub policy: PolicyStore,
    pub audit: AuditSink,
    pub upstream: Box<dyn Upstream + Sync + Send>,
}

impl ProxyContext {
    /// Build the context with the reqwest based upstream client
    pub fn from_config(config: ProxyConfig) -> Result<ProxyContext> {
        let upstream = HttpUpstream::new(
            &config.pdns_api_url,
            &config.pdns_api_token,
            config.pdns_api_verify_ssl,
            Duration::from_secs(config.pdns_api_timeout_secs),
        )?;

        ProxyContext::new(config, Box::new(upstream))
    }

    pub fn new(
        config: ProxyConfig,
        upstream: Box<dyn Upstream + Sync + Send>,
    ) -> Result<ProxyContext> {
        let model = PolicyModel::build(&config.environments)?;

        let audit = match config.audit_log_path {
            Some(ref path) => AuditSink::open(Path::new(path))?,
            None => {
                log::warn!("No audit_log_path configured, write requests are not audited");
                AuditSink::disabled()
            }
        };

        Ok(ProxyContext {
            config,
            policy: PolicyStore::new(model),
            audit,
            upstream,
        })
    }

    /// Rebuild the policy from the environments in `path`.
    ///
    /// On failure the active policy is left untouched.
    pub fn reload(&self, path: &Path) -> std::result::Result<(), ConfigError> {
        let result = ProxyConfig::load(path).and_then(|config| PolicyModel::build(&config.environments));

        match result {
            Ok(model) => {
                self.policy.replace(model);
                metrics::record_config_reload("success");
                log::info!("Reloaded policy from {}", path.display());
                Ok(())
            }
            Err(e) => {
                metrics::record_config_reload("failure");
                log::error!(
                    "Failed to reload {}, keeping the previous policy: {}",
                    path.display(),
                    e
                );
                Err(e)
            }
        }
    }
}

fn modified(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|meta| meta.modified()).ok()
}

/// Poll the modification time of `path` and reload the policy when it changes
pub fn spawn_config_watcher(
    context: Arc<ProxyContext>,
    path: PathBuf,
    interval: Duration,
) -> std::io::Result<JoinHandle<()>> {
    Builder::new()
        .name("ConfigWatcher".into())
        .spawn(move || {
            let mut last_seen = modified(&path);
            loop {
                std::thread::sleep(interval);

                let current = modified(&path);
                if current.is_none() || current == last_seen {
                    continue;
                }

                last_seen = current;
                let _ = context.reload(&path);
            }
        })
}
