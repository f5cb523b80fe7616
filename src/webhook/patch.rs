//! JSON patch construction for sidecar injection
//!
//! Two patch shapes are supported. The choice is made at deployment time,
//! never per request:
//!
//! - [`PatchMode::InitContainer`]: `add /spec/initContainers` with the whole
//!   list. The sidecar runs to completion before the workload starts.
//! - [`PatchMode::Sidecar`]: append to `/spec/containers` and enable
//!   `shareProcessNamespace` so the sidecar runs alongside the workload.

use json_patch::{AddOperation, Patch, PatchOperation};
use jsonptr::PointerBuf;
use k8s_openapi::api::core::v1::Container;
use thiserror::Error;

/// Error building a patch document
#[derive(Debug, Error)]
pub enum PatchError {
    /// The specialized container could not be serialized
    #[error("failed to serialize sidecar container: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Where the sidecar is placed in the pod spec
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum PatchMode {
    /// Replace the init container list with the sidecar
    #[default]
    InitContainer,
    /// Append the sidecar to the regular containers and share the process namespace
    Sidecar,
}

impl PatchMode {
    /// Pod spec collection the sidecar is written to
    pub fn target_collection(&self) -> &'static str {
        match self {
            PatchMode::InitContainer => "initContainers",
            PatchMode::Sidecar => "containers",
        }
    }
}

/// Build the ordered patch operations that inject `container`
pub fn build_patch(container: &Container, mode: PatchMode) -> Result<Patch, PatchError> {
    let value = serde_json::to_value(container)?;

    let ops = match mode {
        PatchMode::InitContainer => vec![PatchOperation::Add(AddOperation {
            path: PointerBuf::from_tokens(["spec", "initContainers"]),
            value: serde_json::Value::Array(vec![value]),
        })],
        PatchMode::Sidecar => vec![
            PatchOperation::Add(AddOperation {
                path: PointerBuf::from_tokens(["spec", "containers", "-"]),
                value,
            }),
            PatchOperation::Add(AddOperation {
                path: PointerBuf::from_tokens(["spec", "shareProcessNamespace"]),
                value: serde_json::Value::Bool(true),
            }),
        ],
    };

    Ok(Patch(ops))
}
