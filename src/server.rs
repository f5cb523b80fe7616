//! HTTPS server wiring
//!
//! Loads the sidecar template, builds the mutation engine and serves the
//! webhook router over rustls until SIGINT or SIGTERM.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum_server::tls_rustls::RustlsConfig;
use axum_server::Handle;
use tracing::{info, warn};

use crate::config::InjectorConfig;
use crate::kube_client::create_client;
use crate::policy::{KubeNamespaceRegistry, NamespaceRegistry, PolicyResolver};
use crate::template::TemplateStore;
use crate::webhook::{webhook_router, MutationEngine, WebhookState};
use crate::Error;

/// How long in-flight admission requests get to finish after a shutdown signal
pub const SHUTDOWN_GRACE_PERIOD: Duration = Duration::from_secs(10);

/// Run the webhook until a shutdown signal arrives
pub async fn run(config: InjectorConfig) -> Result<(), Error> {
    let client = create_client(&config.kube).await?;
    let registry: Arc<dyn NamespaceRegistry> = Arc::new(KubeNamespaceRegistry::new(client));

    let engine = build_engine(&config, registry).await?;
    let router = webhook_router(Arc::new(WebhookState::new(engine)));

    let handle = Handle::new();
    tokio::spawn(shutdown_on_signal(handle.clone()));

    serve(
        config.listen_addr,
        &config.tls_cert_file,
        &config.tls_key_file,
        router,
        handle,
    )
    .await
}

/// Load the sidecar template and assemble the mutation engine
///
/// A template that cannot be loaded is fatal. When periodic reload is
/// configured the reload task is spawned here.
pub async fn build_engine(
    config: &InjectorConfig,
    registry: Arc<dyn NamespaceRegistry>,
) -> Result<MutationEngine, Error> {
    let templates =
        Arc::new(TemplateStore::load(&config.sidecar_config_file, config.template_mode).await?);

    if let Some(interval) = config.template_reload_interval {
        info!(
            path = ?templates.path(),
            mode = ?templates.mode(),
            interval_secs = interval.as_secs(),
            "Template reload enabled"
        );
        templates.spawn_reload(interval);
    }

    Ok(MutationEngine::new(PolicyResolver::new(registry), templates)
        .with_patch_mode(config.patch_mode)
        .with_security(config.security)
        .with_request_timeout(config.request_timeout))
}

/// Serve `router` over TLS on `addr` until `handle` shuts it down
pub async fn serve(
    addr: SocketAddr,
    tls_cert_file: &Path,
    tls_key_file: &Path,
    router: Router,
    handle: Handle,
) -> Result<(), Error> {
    let tls_config = RustlsConfig::from_pem_file(tls_cert_file, tls_key_file)
        .await
        .map_err(|e| {
            Error::tls(format!(
                "failed to load {} / {}: {e}",
                tls_cert_file.display(),
                tls_key_file.display()
            ))
        })?;

    info!(addr = %addr, "Starting HTTPS webhook server");
    axum_server::bind_rustls(addr, tls_config)
        .handle(handle)
        .serve(router.into_make_service())
        .await
        .map_err(|e| Error::server(e.to_string()))?;

    info!("Webhook server stopped");
    Ok(())
}

async fn shutdown_on_signal(handle: Handle) {
    wait_for_signal().await;
    info!(
        grace_secs = SHUTDOWN_GRACE_PERIOD.as_secs(),
        "Shutdown signal received, draining requests"
    );
    handle.graceful_shutdown(Some(SHUTDOWN_GRACE_PERIOD));
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(sigterm) => sigterm,
        Err(e) => {
            warn!(error = %e, "Failed to install SIGTERM handler, waiting for Ctrl-C only");
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Failed to listen for Ctrl-C");
            }
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for Ctrl-C");
    }
}
