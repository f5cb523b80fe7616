//! Pod Mutation Webhook
//!
//! Handles AdmissionReview requests for Pods, injecting the network sidecar
//! configured for the pod's namespace.
//!
//! Per request the engine walks
//! `Received -> Decoded -> PolicyResolved -> Specialized -> Patched -> Responded`.
//! A failure at any stage ends in a denial; the pod is never admitted
//! without its sidecar.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use axum::{body::Bytes, extract::State, Json};
use json_patch::Patch;
use kube::{
    api::DynamicObject,
    core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview, Operation},
};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::policy::{PolicyError, PolicyResolver};
use crate::sidecar::{added_capabilities, specialize, SecurityProfile};
use crate::template::{TemplateError, TemplateStore};

use super::patch::{build_patch, PatchError, PatchMode};
use super::{WebhookError, WebhookState};

/// Default deadline for producing a mutation decision
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Reason given when the computed patch cannot be encoded
const PATCH_ENCODING_FAILED: &str = "internal error: sidecar patch could not be encoded";

/// Pipeline stage of a single admission request
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    /// Request body received
    Received,
    /// Admission review decoded into a request
    Decoded,
    /// Namespace policy resolved
    PolicyResolved,
    /// Sidecar container specialized from the template
    Specialized,
    /// Patch document built
    Patched,
    /// Response sent
    Responded,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Received => "received",
            Stage::Decoded => "decoded",
            Stage::PolicyResolved => "policy-resolved",
            Stage::Specialized => "specialized",
            Stage::Patched => "patched",
            Stage::Responded => "responded",
        };
        f.write_str(name)
    }
}

/// Failure while computing a mutation; always turned into a denial
#[derive(Debug, Error)]
pub enum MutationError {
    /// The request does not name a namespace
    #[error("admission request has no namespace")]
    MissingNamespace,

    /// Namespace policy could not be resolved
    #[error(transparent)]
    Policy(#[from] PolicyError),

    /// Sidecar template could not be loaded or specialized
    #[error(transparent)]
    Template(#[from] TemplateError),

    /// Patch document could not be built
    #[error(transparent)]
    Patch(#[from] PatchError),

    /// The pod already defines a container with the sidecar's name
    #[error("pod already defines container '{0}' reserved for the network sidecar")]
    NameConflict(String),

    /// The request deadline elapsed before a decision was made
    #[error("mutation deadline of {0:?} elapsed")]
    Timeout(Duration),
}

impl MutationError {
    /// Stage the request was trying to reach when it failed
    pub fn stage(&self) -> Stage {
        match self {
            MutationError::MissingNamespace => Stage::Decoded,
            MutationError::Policy(_) | MutationError::Timeout(_) => Stage::PolicyResolved,
            MutationError::Template(_) => Stage::Specialized,
            MutationError::Patch(_) | MutationError::NameConflict(_) => Stage::Patched,
        }
    }

    /// Reason shown to the user whose pod was denied
    pub fn deny_reason(&self) -> String {
        match self {
            // Serialization internals are of no use to the requester
            MutationError::Patch(_) => PATCH_ENCODING_FAILED.to_string(),
            other => other.to_string(),
        }
    }
}

/// Computes admission decisions for Pod CREATE requests
pub struct MutationEngine {
    resolver: PolicyResolver,
    templates: Arc<TemplateStore>,
    patch_mode: PatchMode,
    security: SecurityProfile,
    request_timeout: Duration,
}

impl MutationEngine {
    /// Create an engine with the default patch mode, security profile and deadline
    pub fn new(resolver: PolicyResolver, templates: Arc<TemplateStore>) -> Self {
        Self {
            resolver,
            templates,
            patch_mode: PatchMode::default(),
            security: SecurityProfile::default(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Set the patch shape
    pub fn with_patch_mode(mut self, patch_mode: PatchMode) -> Self {
        self.patch_mode = patch_mode;
        self
    }

    /// Set the security profile applied to the sidecar
    pub fn with_security(mut self, security: SecurityProfile) -> Self {
        self.security = security;
        self
    }

    /// Set the deadline for a single decision
    pub fn with_request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }

    /// Configured patch shape
    pub fn patch_mode(&self) -> PatchMode {
        self.patch_mode
    }

    /// Produce the admission response for one request
    pub async fn mutate(&self, request: &AdmissionRequest<DynamicObject>) -> AdmissionResponse {
        let uid = request.uid.as_str();

        if !is_pod_create(request) {
            debug!(
                uid = %uid,
                kind = %request.kind.kind,
                operation = ?request.operation,
                "Not a Pod CREATE, allowing unchanged"
            );
            return AdmissionResponse::from(request);
        }

        let outcome = tokio::time::timeout(self.request_timeout, self.compute_patch(request))
            .await
            .unwrap_or(Err(MutationError::Timeout(self.request_timeout)));

        match outcome {
            Ok(patch) => respond(request, patch),
            Err(e) => {
                warn!(
                    uid = %uid,
                    namespace = ?request.namespace,
                    stage = %e.stage(),
                    error = %e,
                    "Denying pod"
                );
                AdmissionResponse::from(request).deny(e.deny_reason())
            }
        }
    }

    async fn compute_patch(
        &self,
        request: &AdmissionRequest<DynamicObject>,
    ) -> Result<Patch, MutationError> {
        let namespace = request
            .namespace
            .as_deref()
            .filter(|ns| !ns.is_empty())
            .ok_or(MutationError::MissingNamespace)?;

        let policy = self.resolver.resolve(namespace).await?;
        debug!(
            uid = %request.uid,
            stage = %Stage::PolicyResolved,
            cidr_range = %policy.cidr_range,
            "Namespace policy resolved"
        );

        let template = self.templates.template().await?;
        let container = specialize(&template, &policy.cidr_range, self.security)?;
        debug!(
            uid = %request.uid,
            stage = %Stage::Specialized,
            sidecar = %container.name,
            capabilities = ?added_capabilities(&container),
            "Sidecar specialized"
        );

        let init_containers =
            existing_container_names(request, PatchMode::InitContainer.target_collection());
        match self.patch_mode {
            PatchMode::Sidecar => {
                // Names are unique across both collections of a pod
                let taken = init_containers.contains(&container.name)
                    || existing_container_names(request, PatchMode::Sidecar.target_collection())
                        .contains(&container.name);
                if taken {
                    return Err(MutationError::NameConflict(container.name));
                }
            }
            PatchMode::InitContainer if !init_containers.is_empty() => {
                warn!(
                    uid = %request.uid,
                    replaced = ?init_containers,
                    "Pod init containers are replaced by the sidecar"
                );
            }
            PatchMode::InitContainer => {}
        }

        let patch = build_patch(&container, self.patch_mode)?;
        info!(
            uid = %request.uid,
            namespace = %namespace,
            sidecar = %container.name,
            cidr_range = %policy.cidr_range,
            patch_ops = patch.0.len(),
            "Injecting network sidecar"
        );
        Ok(patch)
    }
}

/// Handle mutating admission review for Pods
///
/// Bodies that are not an admission review with a request get HTTP 400 and
/// no admission decision.
pub async fn mutate_handler(
    State(state): State<Arc<WebhookState>>,
    body: Bytes,
) -> Result<Json<AdmissionReview<DynamicObject>>, WebhookError> {
    debug!(bytes = body.len(), stage = %Stage::Received, "Admission review received");
    let review: AdmissionReview<DynamicObject> = serde_json::from_slice(&body)?;
    let request: AdmissionRequest<DynamicObject> = review
        .try_into()
        .map_err(|e| WebhookError::InvalidReview(format!("{e}")))?;

    debug!(
        uid = %request.uid,
        kind = %request.kind.kind,
        operation = ?request.operation,
        name = %request.name,
        namespace = ?request.namespace,
        stage = %Stage::Decoded,
        "Decoded admission request"
    );

    let response = state.engine.mutate(&request).await;
    debug!(
        uid = %request.uid,
        allowed = response.allowed,
        stage = %Stage::Responded,
        "Admission decision sent"
    );
    Ok(Json(response.into_review()))
}

/// Allow the request with `patch` attached
///
/// An encoding failure denies rather than returning an unusable patch.
fn respond(request: &AdmissionRequest<DynamicObject>, patch: Patch) -> AdmissionResponse {
    match AdmissionResponse::from(request).with_patch(patch) {
        Ok(response) => response,
        Err(e) => {
            error!(uid = %request.uid, error = %e, "Failed to serialize patch");
            AdmissionResponse::from(request).deny(PATCH_ENCODING_FAILED)
        }
    }
}

fn is_pod_create(request: &AdmissionRequest<DynamicObject>) -> bool {
    request.kind.group.is_empty()
        && request.kind.kind == "Pod"
        && matches!(request.operation, Operation::Create)
}

/// Names of the containers already in `/spec/<collection>`
fn existing_container_names(
    request: &AdmissionRequest<DynamicObject>,
    collection: &str,
) -> Vec<String> {
    let pointer = format!("/spec/{collection}");
    request
        .object
        .as_ref()
        .and_then(|pod| pod.data.pointer(&pointer))
        .and_then(|containers| containers.as_array())
        .map(|containers| {
            containers
                .iter()
                .filter_map(|c| c.get("name").and_then(|n| n.as_str()))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}
