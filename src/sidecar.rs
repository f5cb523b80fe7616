//! Sidecar specialization
//!
//! Turns the template's first container into the concrete container that is
//! injected into a pod: the CIDR range goes into the first env var, the image
//! is always pulled, and the security context is replaced by one that grants
//! only the network capabilities the sidecar needs.

use k8s_openapi::api::core::v1::{Capabilities, Container, SecurityContext};

use crate::policy::CidrRange;
use crate::template::{SidecarTemplate, TemplateError};

/// Pull policy forced onto the sidecar
pub const PULL_POLICY_ALWAYS: &str = "Always";

/// Capabilities granted to the sidecar, nothing more
pub const SIDECAR_CAPABILITIES: [&str; 2] = ["NET_ADMIN", "NET_RAW"];

/// Security settings applied to the injected container
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SecurityProfile {
    /// Run the sidecar privileged (relaxed isolation)
    pub privileged: bool,
}

impl SecurityProfile {
    /// Profile for clusters that require privileged network sidecars
    pub fn privileged() -> Self {
        Self { privileged: true }
    }
}

/// Build the container to inject from the template and the namespace's range
///
/// The returned container is an independent copy; the template is untouched.
pub fn specialize(
    template: &SidecarTemplate,
    cidr_range: &CidrRange,
    profile: SecurityProfile,
) -> Result<Container, TemplateError> {
    let mut container = template.injectable()?.clone();

    let name = &container.name;
    let env = container
        .env
        .as_mut()
        .and_then(|env| env.first_mut())
        .ok_or_else(|| TemplateError::Shape(format!("container '{name}' has no env vars")))?;
    env.value = Some(cidr_range.as_str().to_string());
    env.value_from = None;

    container.image_pull_policy = Some(PULL_POLICY_ALWAYS.to_string());

    // The template's security context is discarded entirely
    container.security_context = Some(SecurityContext {
        capabilities: Some(Capabilities {
            add: Some(SIDECAR_CAPABILITIES.iter().map(|c| c.to_string()).collect()),
            drop: None,
        }),
        privileged: profile.privileged.then_some(true),
        ..Default::default()
    });

    Ok(container)
}

/// Capabilities added by a container's security context
pub fn added_capabilities(container: &Container) -> Vec<String> {
    container
        .security_context
        .as_ref()
        .and_then(|sc| sc.capabilities.as_ref())
        .and_then(|caps| caps.add.clone())
        .unwrap_or_default()
}
