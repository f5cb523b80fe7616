//! Command-line and environment configuration
//!
//! Every flag has a default that matches the standard in-cluster deployment
//! (certificates and sidecar template mounted under `/etc/webhook`), so the
//! webhook normally starts without arguments.

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use clap::builder::FalseyValueParser;
use clap::Parser;

use crate::kube_client::KubeConfigSource;
use crate::sidecar::SecurityProfile;
use crate::telemetry::LogFormat;
use crate::template::TemplateLoadMode;
use crate::webhook::PatchMode;
use crate::{
    Error, DEFAULT_SIDECAR_CONFIG_FILE, DEFAULT_TLS_CERT_FILE, DEFAULT_TLS_KEY_FILE,
    DEFAULT_WEBHOOK_PORT,
};

/// cidr-injector - inject CIDR-scoped network sidecars into pods
#[derive(Parser, Debug, Clone)]
#[command(name = "cidr-injector", version, about, long_about = None)]
pub struct InjectorArgs {
    /// Webhook server port
    #[arg(long, env = "PORT", default_value_t = DEFAULT_WEBHOOK_PORT)]
    pub port: u16,

    /// Address to listen on
    #[arg(long, default_value = "0.0.0.0")]
    pub bind_address: IpAddr,

    /// File containing the x509 certificate for HTTPS
    #[arg(long, alias = "tlsCertFile", default_value = DEFAULT_TLS_CERT_FILE)]
    pub tls_cert_file: PathBuf,

    /// File containing the x509 private key matching --tls-cert-file
    #[arg(long, alias = "tlsKeyFile", default_value = DEFAULT_TLS_KEY_FILE)]
    pub tls_key_file: PathBuf,

    /// Sidecar injector template file
    #[arg(long, default_value = DEFAULT_SIDECAR_CONFIG_FILE)]
    pub sidecar_config_file: PathBuf,

    /// Use a kubeconfig file instead of the in-cluster service account
    #[arg(long, env = "USE_KUBECONFIG", value_parser = FalseyValueParser::new())]
    pub use_kubeconfig: bool,

    /// Kubeconfig path (defaults to ~/.kube/config)
    #[arg(long, env = "KUBECONFIG")]
    pub kubeconfig: Option<PathBuf>,

    /// Where the sidecar is injected
    #[arg(long, value_enum, default_value_t = PatchMode::InitContainer)]
    pub patch_mode: PatchMode,

    /// Run the sidecar privileged
    #[arg(long)]
    pub privileged: bool,

    /// Deadline in seconds for one admission decision
    #[arg(long, default_value_t = 5)]
    pub request_timeout_secs: u64,

    /// Re-read the sidecar template for every request
    #[arg(long, conflicts_with = "template_reload_secs")]
    pub template_per_request: bool,

    /// Reload the sidecar template every N seconds
    #[arg(long)]
    pub template_reload_secs: Option<u64>,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

/// Validated runtime configuration
#[derive(Debug, Clone)]
pub struct InjectorConfig {
    /// Address the HTTPS server binds
    pub listen_addr: SocketAddr,
    /// Serving certificate PEM file
    pub tls_cert_file: PathBuf,
    /// Serving key PEM file
    pub tls_key_file: PathBuf,
    /// Sidecar template file
    pub sidecar_config_file: PathBuf,
    /// How to reach the Kubernetes API
    pub kube: KubeConfigSource,
    /// Patch shape
    pub patch_mode: PatchMode,
    /// Security profile applied to the sidecar
    pub security: SecurityProfile,
    /// Deadline for one admission decision
    pub request_timeout: Duration,
    /// When the template file is read
    pub template_mode: TemplateLoadMode,
    /// Periodic template reload, if enabled
    pub template_reload_interval: Option<Duration>,
    /// Log output format
    pub log_format: LogFormat,
}

impl InjectorArgs {
    /// Validate the arguments and resolve defaults that depend on the environment
    pub fn into_config(self) -> Result<InjectorConfig, Error> {
        if self.request_timeout_secs == 0 {
            return Err(Error::config("--request-timeout-secs must be greater than 0"));
        }
        if self.template_reload_secs == Some(0) {
            return Err(Error::config("--template-reload-secs must be greater than 0"));
        }

        let kube = if self.use_kubeconfig {
            let path = match self.kubeconfig {
                Some(path) => path,
                None => default_kubeconfig_path().ok_or_else(|| {
                    Error::config("USE_KUBECONFIG is set but neither KUBECONFIG nor HOME is")
                })?,
            };
            KubeConfigSource::Kubeconfig(path)
        } else {
            KubeConfigSource::InCluster
        };

        let template_mode = if self.template_per_request {
            TemplateLoadMode::PerRequest
        } else {
            TemplateLoadMode::Preloaded
        };

        Ok(InjectorConfig {
            listen_addr: SocketAddr::new(self.bind_address, self.port),
            tls_cert_file: self.tls_cert_file,
            tls_key_file: self.tls_key_file,
            sidecar_config_file: self.sidecar_config_file,
            kube,
            patch_mode: self.patch_mode,
            security: SecurityProfile {
                privileged: self.privileged,
            },
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            template_mode,
            template_reload_interval: self.template_reload_secs.map(Duration::from_secs),
            log_format: self.log_format,
        })
    }
}

fn default_kubeconfig_path() -> Option<PathBuf> {
    std::env::var_os("HOME")
        .filter(|home| !home.is_empty())
        .map(|home| PathBuf::from(home).join(".kube").join("config"))
}
