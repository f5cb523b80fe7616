//! Namespace policy resolution
//!
//! Every namespace that receives the sidecar declares its network scope with
//! the `cidr-range` annotation:
//!
//! ```yaml
//! apiVersion: v1
//! kind: Namespace
//! metadata:
//!   name: team-a
//!   annotations:
//!     cidr-range: 10.1.0.0/16
//! ```
//!
//! Resolution performs exactly one namespace lookup and fails closed: a
//! missing namespace, a missing key or a value that is not a CIDR are all
//! errors, never an empty default.

mod cidr;

pub use cidr::CidrRange;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Namespace;
use kube::{Api, Client};
use thiserror::Error;
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use crate::CIDR_RANGE_ANNOTATION;

/// Errors raised while resolving a namespace's policy
#[derive(Debug, Error)]
pub enum PolicyError {
    /// The namespace does not exist
    #[error("namespace {0} not found")]
    NamespaceNotFound(String),

    /// The namespace exists but does not carry the policy annotation
    #[error("policy key {key} missing")]
    KeyMissing {
        /// Namespace that was inspected
        namespace: String,
        /// Annotation key that was expected
        key: String,
    },

    /// The annotation value is not a CIDR range
    #[error("policy key {key} has invalid value '{value}': {reason}")]
    InvalidCidr {
        /// Annotation key
        key: String,
        /// Raw annotation value
        value: String,
        /// Parse failure
        reason: String,
    },

    /// The namespace lookup itself failed
    #[error("namespace lookup failed: {0}")]
    Lookup(#[from] kube::Error),
}

/// Trait abstracting the cluster's namespace registry
///
/// This trait allows mocking the Kubernetes client in tests while using
/// the real client in production.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait NamespaceRegistry: Send + Sync {
    /// Fetch a namespace's annotations
    ///
    /// Returns `Ok(None)` when the namespace does not exist. A namespace
    /// without annotations yields an empty map.
    async fn namespace_annotations(
        &self,
        name: &str,
    ) -> Result<Option<BTreeMap<String, String>>, kube::Error>;
}

/// Namespace registry backed by the Kubernetes API
pub struct KubeNamespaceRegistry {
    client: Client,
}

impl KubeNamespaceRegistry {
    /// Create a new registry wrapping the given kube Client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl NamespaceRegistry for KubeNamespaceRegistry {
    async fn namespace_annotations(
        &self,
        name: &str,
    ) -> Result<Option<BTreeMap<String, String>>, kube::Error> {
        let namespaces: Api<Namespace> = Api::all(self.client.clone());
        let namespace = namespaces.get_opt(name).await?;
        Ok(namespace.map(|ns| ns.metadata.annotations.unwrap_or_default()))
    }
}

/// Policy metadata resolved for one namespace
#[derive(Clone, Debug, PartialEq)]
pub struct NamespacePolicy {
    /// Namespace name
    pub namespace: String,
    /// Validated value of the `cidr-range` annotation
    pub cidr_range: CidrRange,
    /// All annotations on the namespace
    pub annotations: BTreeMap<String, String>,
}

/// Resolves namespace policy through a [`NamespaceRegistry`]
#[derive(Clone)]
pub struct PolicyResolver {
    registry: Arc<dyn NamespaceRegistry>,
}

impl PolicyResolver {
    /// Create a resolver over the given registry
    pub fn new(registry: Arc<dyn NamespaceRegistry>) -> Self {
        Self { registry }
    }

    /// Resolve the policy for `namespace` with a single registry lookup
    pub async fn resolve(&self, namespace: &str) -> Result<NamespacePolicy, PolicyError> {
        let annotations = self
            .registry
            .namespace_annotations(namespace)
            .await?
            .ok_or_else(|| PolicyError::NamespaceNotFound(namespace.to_string()))?;

        let raw = annotations
            .get(CIDR_RANGE_ANNOTATION)
            .ok_or_else(|| PolicyError::KeyMissing {
                namespace: namespace.to_string(),
                key: CIDR_RANGE_ANNOTATION.to_string(),
            })?;

        let cidr_range = CidrRange::parse(raw).map_err(|e| PolicyError::InvalidCidr {
            key: CIDR_RANGE_ANNOTATION.to_string(),
            value: raw.clone(),
            reason: e.to_string(),
        })?;

        debug!(namespace = %namespace, cidr_range = %cidr_range, "Resolved namespace policy");

        Ok(NamespacePolicy {
            namespace: namespace.to_string(),
            cidr_range,
            annotations,
        })
    }
}
