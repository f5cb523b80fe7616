//! cidr-injector - mutating admission webhook for CIDR-scoped network sidecars

use clap::Parser;
use tracing::{error, info};

use cidr_injector::config::InjectorArgs;
use cidr_injector::server;
use cidr_injector::telemetry::init_tracing;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // The webhook serves TLS to the API server; without a provider nothing works.
    if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
        eprintln!(
            "CRITICAL: Failed to install aws-lc-rs crypto provider: {:?}. \
             The webhook cannot serve TLS without it.",
            e
        );
        std::process::exit(1);
    }

    let args = InjectorArgs::parse();
    init_tracing(args.log_format)?;

    let config = args.into_config()?;
    info!(
        addr = %config.listen_addr,
        patch_mode = ?config.patch_mode,
        privileged = config.security.privileged,
        template = %config.sidecar_config_file.display(),
        fips = cfg!(feature = "fips"),
        "Starting cidr-injector"
    );

    if let Err(e) = server::run(config).await {
        error!(error = %e, "cidr-injector exited with error");
        return Err(e.into());
    }

    Ok(())
}
