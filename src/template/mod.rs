//! Sidecar template loading
//!
//! The sidecar template is a YAML document mounted into the webhook pod
//! (usually from a ConfigMap). It lists the containers to inject:
//!
//! ```yaml
//! initContainers:
//!   - name: net-sidecar
//!     image: registry.example.com/net-sidecar:1.4
//!     env:
//!       - name: CIDR
//!         value: placeholder
//! ```
//!
//! Only the first container is injected. Its first environment variable is a
//! placeholder that receives the namespace's CIDR range at admission time.
//!
//! Parsing is a pure function of the document bytes, so the result can be
//! cached process-wide in a [`TemplateStore`].

mod store;

pub use store::{TemplateLoadMode, TemplateStore};

use std::path::{Path, PathBuf};

use k8s_openapi::api::core::v1::Container;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

/// Errors raised while loading or validating the sidecar template
#[derive(Debug, Error)]
pub enum TemplateError {
    /// The template file could not be read
    #[error("sidecar config {} unreadable: {source}", path.display())]
    Unreadable {
        /// Path that was read
        path: PathBuf,
        /// Underlying I/O failure
        #[source]
        source: std::io::Error,
    },

    /// The template content does not match the expected schema
    #[error("sidecar config malformed: {0}")]
    Malformed(#[from] serde_yaml::Error),

    /// The template parsed but lists no containers
    #[error("sidecar template defines no containers")]
    EmptyTemplate,

    /// The injectable container does not have the required shape
    #[error("sidecar template shape invalid: {0}")]
    Shape(String),
}

/// Ordered list of container definitions read from the template document
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SidecarTemplate {
    /// Containers in document order
    #[serde(rename = "initContainers", alias = "containers", default)]
    pub containers: Vec<Container>,
}

impl SidecarTemplate {
    /// Create a template from a list of containers
    pub fn new(containers: Vec<Container>) -> Self {
        Self { containers }
    }

    /// The container that gets injected, checked for the required shape
    ///
    /// The first container must exist and declare at least one environment
    /// variable; that variable is the CIDR placeholder.
    pub fn injectable(&self) -> Result<&Container, TemplateError> {
        let container = self.containers.first().ok_or(TemplateError::EmptyTemplate)?;

        let has_env = container.env.as_ref().is_some_and(|env| !env.is_empty());
        if !has_env {
            return Err(TemplateError::Shape(format!(
                "container '{}' declares no env vars; the first env var receives the CIDR range",
                container.name
            )));
        }

        Ok(container)
    }

    /// Validate the template for injection
    pub fn validate(&self) -> Result<(), TemplateError> {
        self.injectable().map(|_| ())
    }

    /// Containers after the first, which are never injected
    pub fn ignored_containers(&self) -> &[Container] {
        self.containers.get(1..).unwrap_or_default()
    }

    /// Log the containers that will not be injected, if any
    ///
    /// Called when a template is installed, not on every read.
    pub fn warn_ignored_containers(&self) {
        let [first, ignored @ ..] = self.containers.as_slice() else {
            return;
        };
        if ignored.is_empty() {
            return;
        }
        warn!(
            containers = self.containers.len(),
            injected = %first.name,
            ignored = ?ignored.iter().map(|c| c.name.as_str()).collect::<Vec<_>>(),
            "Sidecar template defines more than one container, only the first is injected"
        );
    }
}

/// Parse and validate a template document
pub fn parse_template(bytes: &[u8]) -> Result<SidecarTemplate, TemplateError> {
    let template: SidecarTemplate = serde_yaml::from_slice(bytes)?;
    template.validate()?;
    Ok(template)
}

/// Read, parse and validate the template at `path`
pub async fn load_template(path: &Path) -> Result<SidecarTemplate, TemplateError> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|source| TemplateError::Unreadable {
            path: path.to_path_buf(),
            source,
        })?;

    let template = parse_template(&bytes)?;
    debug!(
        path = %path.display(),
        containers = template.containers.len(),
        "Loaded sidecar template"
    );
    Ok(template)
}
