//! Config loading, validation, and SIGHUP-driven hot reload.

mod schema;

pub use schema::{ListenerSpec, ProviderSpec, RawConfig, RuleSpec, ServerSpec, ServiceSpec};

use crate::providers::ProviderRegistry;
use crate::resolver::{ResolverError, RuleResolver};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: Box<toml::de::Error>,
    },
    #[error("duplicate provider id `{0}`")]
    DuplicateProvider(String),
    #[error("provider `{id}` has an invalid base_url `{base_url}`: {source}")]
    InvalidBaseUrl {
        id: String,
        base_url: String,
        #[source]
        source: url::ParseError,
    },
    #[error(transparent)]
    Resolver(#[from] ResolverError),
}

pub struct ServerSettings {
    pub pid_file: String,
    pub model_token: String,
    pub admin_token: String,
    pub adapter_enabled: bool,
    pub listeners: Vec<ListenerSpec>,
}

/// The result of one config load: an already-validated Provider/Rule set.
pub struct LoadedConfig {
    pub server: ServerSettings,
    pub providers: Vec<crate::domain::provider::Provider>,
    pub rules: Vec<crate::domain::rule::Rule>,
}

pub fn parse(path: &Path) -> Result<LoadedConfig, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let raw: RawConfig = toml::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source: Box::new(source),
    })?;

    let mut seen = std::collections::HashSet::new();
    for p in &raw.providers {
        if !seen.insert(p.id.clone()) {
            return Err(ConfigError::DuplicateProvider(p.id.clone()));
        }
        if let Err(source) = url::Url::parse(&p.base_url) {
            return Err(ConfigError::InvalidBaseUrl {
                id: p.id.clone(),
                base_url: p.base_url.clone(),
                source,
            });
        }
    }

    let providers: Vec<_> = raw.providers.into_iter().map(Into::into).collect();
    let rules: Vec<_> = raw.rules.into_iter().map(Into::into).collect();

    Ok(LoadedConfig {
        server: ServerSettings {
            pid_file: raw.server.pid_file,
            model_token: raw.server.model_token,
            admin_token: raw.server.admin_token,
            adapter_enabled: raw.server.adapter_enabled,
            listeners: raw.listeners,
        },
        providers,
        rules,
    })
}

/// Loads the config file and validates it against a fresh `ProviderRegistry`
/// + `RuleResolver` pair, returning them ready to serve traffic.
pub fn load(path: &Path) -> Result<(ServerSettings, ProviderRegistry, RuleResolver), ConfigError> {
    let loaded = parse(path)?;
    let providers = ProviderRegistry::new(loaded.providers);
    let resolver = RuleResolver::load(&providers, loaded.rules)?;
    Ok((loaded.server, providers, resolver))
}

/// Re-reads the config file and atomically swaps both the provider catalog
/// and the rule index. A validation failure leaves the running state
/// untouched.
pub fn reload(
    path: &Path,
    providers: &ProviderRegistry,
    resolver: &RuleResolver,
) -> Result<(), ConfigError> {
    let loaded = parse(path)?;
    providers.reload(loaded.providers);
    resolver.reload(providers, loaded.rules)?;
    Ok(())
}

static RELOAD_EPOCH: AtomicU64 = AtomicU64::new(0);

#[derive(Clone, Copy, Debug)]
pub struct ReloadEvent {
    pub epoch: u64,
}

/// Watches for SIGHUP and fans a reload request out to whoever is
/// subscribed — mirrors the config-reload wiring of a conventional
/// Pingora-based proxy, generalized to the router's own provider/rule
/// snapshots instead of a single runtime-state pointer.
#[derive(Clone)]
pub struct ReloadHandle {
    tx: watch::Sender<ReloadEvent>,
}

impl ReloadHandle {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(ReloadEvent { epoch: 0 });
        Self { tx }
    }

    pub fn subscribe(&self) -> watch::Receiver<ReloadEvent> {
        self.tx.subscribe()
    }

    pub fn notify_reload(&self) -> u64 {
        let epoch = RELOAD_EPOCH.fetch_add(1, Ordering::Relaxed) + 1;
        let _ = self.tx.send(ReloadEvent { epoch });
        tracing::info!(epoch, "reload signaled");
        epoch
    }

    #[cfg(unix)]
    pub async fn install_signal_handler(self: Arc<Self>) -> std::io::Result<()> {
        let mut hup = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::hangup())?;
        while hup.recv().await.is_some() {
            tracing::info!("SIGHUP received");
            self.notify_reload();
        }
        Ok(())
    }
}

impl Default for ReloadHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Runs forever, reloading the config from `path` each time `reload` fires.
pub async fn run_reload_loop(
    path: PathBuf,
    providers: Arc<ProviderRegistry>,
    resolver: Arc<RuleResolver>,
    handle: Arc<ReloadHandle>,
) {
    let mut rx = handle.subscribe();
    let mut last_epoch = 0;
    loop {
        if rx.changed().await.is_err() {
            return;
        }
        let ReloadEvent { epoch } = *rx.borrow();
        if epoch <= last_epoch {
            continue;
        }
        last_epoch = epoch;

        match reload(&path, &providers, &resolver) {
            Ok(()) => tracing::info!("config reload succeeded"),
            Err(err) => tracing::error!(error = %err, "config reload failed, keeping previous state"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    const SAMPLE: &str = r#"
[server]
model_token = "secret-model-token"
admin_token = "secret-admin-token"

[[providers]]
id = "openai-primary"
base_url = "https://api.openai.com"
token = "sk-abc"
dialect = "open_ai"

[[rules]]
id = "r1"
request_model = "gpt-4"
scenario = "open_ai"

[rules.tactic]
tactic = "random"

[[rules.services]]
provider_id = "openai-primary"
model = "gpt-4o"
"#;

    #[test]
    fn loads_a_minimal_valid_config() {
        let file = write_config(SAMPLE);
        let (server, providers, resolver) = load(file.path()).unwrap();
        assert_eq!(server.model_token, "secret-model-token");
        assert!(providers.contains(&crate::domain::provider::ProviderId(
            "openai-primary".into()
        )));
        assert!(resolver.resolve("gpt-4").is_some());
    }

    #[test]
    fn rejects_rule_referencing_unknown_provider() {
        let file = write_config(
            r#"
[server]
model_token = "t"
admin_token = "a"

[[rules]]
id = "r1"
request_model = "gpt-4"
scenario = "open_ai"

[rules.tactic]
tactic = "random"

[[rules.services]]
provider_id = "ghost"
model = "gpt-4o"
"#,
        );
        let err = load(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Resolver(ResolverError::UnknownProvider(_, _))));
    }

    #[test]
    fn rejects_duplicate_provider_ids() {
        let file = write_config(
            r#"
[server]
model_token = "t"
admin_token = "a"

[[providers]]
id = "p1"
base_url = "https://a.test"
token = "x"
dialect = "open_ai"

[[providers]]
id = "p1"
base_url = "https://b.test"
token = "y"
dialect = "anthropic"
"#,
        );
        let err = load(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateProvider(_)));
    }
}
