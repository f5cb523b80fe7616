//! Error types for the injector process

use thiserror::Error;

use crate::template::TemplateError;

/// Process-level error type
///
/// Covers failures that prevent the webhook from starting or serving. Errors
/// raised while handling a single admission request never reach this type;
/// they are converted into denials by the webhook.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// Sidecar template could not be loaded at startup
    #[error("template error: {0}")]
    Template(#[from] TemplateError),

    /// Invalid or unusable configuration
    #[error("configuration error: {0}")]
    Config(String),

    /// TLS material could not be loaded
    #[error("TLS error: {0}")]
    Tls(String),

    /// HTTPS server failed
    #[error("server error: {0}")]
    Server(String),
}

impl Error {
    /// Create a configuration error with the given message
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a TLS error with the given message
    pub fn tls(msg: impl Into<String>) -> Self {
        Self::Tls(msg.into())
    }

    /// Create a server error with the given message
    pub fn server(msg: impl Into<String>) -> Self {
        Self::Server(msg.into())
    }
}
