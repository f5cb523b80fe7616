//! cidr-injector - mutating admission webhook for CIDR-scoped network sidecars
//!
//! Intercepts Pod CREATE requests, reads the target namespace's `cidr-range`
//! annotation and injects a sidecar container that enforces that range.
//!
//! # Architecture
//!
//! Every admission request runs the same pipeline:
//!
//! ```text
//! decode -> resolve namespace policy -> load template -> specialize sidecar
//!        -> build JSON patch -> respond (allow with patch | deny with reason)
//! ```
//!
//! Any failure after decoding turns into a denial. A pod is never admitted
//! without the sidecar when the namespace policy could not be applied.
//!
//! # Modules
//!
//! - [`template`] - Sidecar template loading and caching
//! - [`policy`] - Namespace policy resolution (`cidr-range` annotation)
//! - [`sidecar`] - Specialization of the template container
//! - [`webhook`] - Admission router, mutation engine and patch builder
//! - [`config`] - Command-line and environment configuration
//! - [`kube_client`] - Kubernetes client construction
//! - [`server`] - TLS server bootstrap
//! - [`telemetry`] - Tracing subscriber setup
//! - [`error`] - Process-level error types

#![deny(missing_docs)]

pub mod config;
pub mod error;
pub mod kube_client;
pub mod policy;
pub mod server;
pub mod sidecar;
pub mod telemetry;
pub mod template;
pub mod webhook;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

// =============================================================================
// Default Configuration Constants
// =============================================================================

/// Default port for the webhook HTTPS server
///
/// Port 8443 is used instead of 443 to avoid requiring root privileges.
pub const DEFAULT_WEBHOOK_PORT: u16 = 8443;

/// Namespace annotation holding the CIDR range injected into the sidecar
pub const CIDR_RANGE_ANNOTATION: &str = "cidr-range";

/// Default location of the mounted sidecar template
pub const DEFAULT_SIDECAR_CONFIG_FILE: &str = "/etc/webhook/config/sidecarconfig.yaml";

/// Default location of the webhook serving certificate
pub const DEFAULT_TLS_CERT_FILE: &str = "/etc/webhook/certs/tls.crt";

/// Default location of the webhook serving key
pub const DEFAULT_TLS_KEY_FILE: &str = "/etc/webhook/certs/tls.key";
