//! Assembles the whole engine (config, provider/rule state, health, admin)
//! into a Pingora `Server` with one `http_proxy_service` per listener.

use crate::admin::{AdminGateway, AdminHandler, ProviderModelsCatalog};
use crate::config::{self, LoadedConfig, ReloadHandle};
use crate::forwarder::Forwarder;
use crate::health::circuit::CircuitBreakerParams;
use crate::health::filter::HealthFilter;
use crate::health::monitor::HealthParams;
use crate::ingress::IngressGateway;
use crate::providers::ProviderRegistry;
use crate::resolver::RuleResolver;
use crate::selector::Selector;
use anyhow::{anyhow, Result};
use pingora::prelude::*;
use pingora::server::Server;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Writes the current pid to `path`, best-effort — a failure to write is
/// logged and otherwise ignored, matching the teacher's treatment of an
/// optional pid file.
fn write_pid_file(path: &str) {
    if path.is_empty() {
        return;
    }
    match std::fs::write(path, std::process::id().to_string()) {
        Ok(()) => tracing::info!(pid_file = path, "pid file written"),
        Err(err) => tracing::warn!(error = %err, pid_file = path, "failed to write pid file; continuing"),
    }
}

fn remove_pid_file(path: &str) {
    if !path.is_empty() {
        let _ = std::fs::remove_file(path);
    }
}

/// Bundles the long-lived, reloadable state shared by both gateways and the
/// reload loop.
pub struct Engine {
    pub providers: Arc<ProviderRegistry>,
    pub resolver: Arc<RuleResolver>,
    pub selector: Arc<Selector>,
    pub forwarder: Arc<Forwarder>,
    pub catalog: Arc<ProviderModelsCatalog>,
    pub reload: Arc<ReloadHandle>,
}

fn build_engine(loaded: LoadedConfig) -> Result<(Engine, crate::config::ServerSettings)> {
    let providers = Arc::new(ProviderRegistry::new(loaded.providers));
    let resolver = Arc::new(RuleResolver::load(&providers, loaded.rules)?);
    let health = Arc::new(HealthFilter::new(
        HealthParams::default(),
        CircuitBreakerParams::default(),
    ));
    let selector = Arc::new(Selector::new(health));
    let forwarder = Arc::new(Forwarder::new());
    let catalog = Arc::new(ProviderModelsCatalog::new());
    let reload = Arc::new(ReloadHandle::new());

    Ok((
        Engine {
            providers,
            resolver,
            selector,
            forwarder,
            catalog,
            reload,
        },
        loaded.server,
    ))
}

/// Builds a fully wired Pingora `Server` from the config file at `path`.
/// Data-plane listeners run the `IngressGateway`; listeners marked `admin`
/// in the config run the `AdminGateway` instead.
pub fn build_pingora_server(config_path: &Path) -> Result<Server> {
    let loaded = config::parse(config_path)?;
    let (engine, server_settings) = build_engine(loaded)?;

    if server_settings.listeners.is_empty() {
        return Err(anyhow!(
            "router: at least one [[listeners]] entry is required"
        ));
    }

    write_pid_file(&server_settings.pid_file);

    let mut server = Server::new(None)?;
    server.bootstrap();

    let admin_handler = Arc::new(AdminHandler::new(
        engine.providers.clone(),
        engine.resolver.clone(),
        engine.selector.clone(),
        engine.catalog.clone(),
    ));

    for listener in &server_settings.listeners {
        if listener.admin {
            let gateway = AdminGateway::new(admin_handler.clone(), server_settings.admin_token.clone());
            let mut svc = http_proxy_service(&server.configuration, gateway);
            svc.add_tcp(&listener.addr);
            server.add_service(svc);
            tracing::info!(addr = %listener.addr, "admin listener bound");
        } else {
            let gateway = IngressGateway::new(
                engine.providers.clone(),
                engine.resolver.clone(),
                engine.selector.clone(),
                engine.forwarder.clone(),
                server_settings.model_token.clone(),
                server_settings.adapter_enabled,
            );
            let mut svc = http_proxy_service(&server.configuration, gateway);
            svc.add_tcp(&listener.addr);
            server.add_service(svc);
            tracing::info!(addr = %listener.addr, "data-plane listener bound");
        }
    }

    install_shutdown_handler(server_settings.pid_file.clone());
    spawn_background_tasks(config_path.to_path_buf(), &engine);

    Ok(server)
}

/// Graceful-shutdown signal handling (spec §6.4: exit 0 on SIGINT/SIGTERM).
/// Pingora's own `run_forever` already traps its shutdown signals for the
/// listening services; this handler only owns pid-file cleanup.
fn install_shutdown_handler(pid_file: String) {
    let result = ctrlc::set_handler(move || {
        tracing::info!("shutdown signal received, exiting");
        remove_pid_file(&pid_file);
        std::process::exit(0);
    });
    if let Err(err) = result {
        tracing::warn!(error = %err, "failed to install shutdown handler");
    }
}

/// Spawns the SIGHUP watcher and reload loop on a small dedicated Tokio
/// runtime, independent of whatever async runtime Pingora's own workers use
/// for upstream I/O. The runtime is leaked deliberately: its tasks must
/// outlive this function and run for the life of the process.
fn spawn_background_tasks(config_path: PathBuf, engine: &Engine) {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(1)
        .enable_all()
        .build()
        .expect("failed to build control-plane tokio runtime");

    let reload = engine.reload.clone();
    let providers = engine.providers.clone();
    let resolver = engine.resolver.clone();

    #[cfg(unix)]
    {
        let signal_reload = reload.clone();
        runtime.spawn(async move {
            if let Err(err) = signal_reload.install_signal_handler().await {
                tracing::warn!(error = %err, "failed to install SIGHUP handler");
            }
        });
    }

    runtime.spawn(config::run_reload_loop(config_path, providers, resolver, reload));

    // Leak the runtime handle so its worker threads keep running after this
    // function returns; `Server::run_forever` below blocks for the rest of
    // the process lifetime anyway.
    std::mem::forget(runtime);
}
