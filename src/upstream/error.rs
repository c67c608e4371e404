//! Upstream error types

use thiserror::Error;

/// Upstream error with classification
#[derive(Debug, Error)]
#[error("{message}")]
pub struct UpstreamError {
    pub kind: UpstreamErrorKind,
    pub message: String,
}

impl UpstreamError {
    pub fn new(kind: UpstreamErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn dial(message: impl Into<String>) -> Self {
        Self::new(UpstreamErrorKind::Dial, message)
    }

    pub fn encode(message: impl Into<String>) -> Self {
        Self::new(UpstreamErrorKind::Encode, message)
    }

    pub fn send(message: impl Into<String>) -> Self {
        Self::new(UpstreamErrorKind::Send, message)
    }
}

/// Where forwarding failed. None of these are retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpstreamErrorKind {
    /// Connection refused, DNS failure, handshake rejected or timed out
    Dial,
    /// The request could not be serialized
    Encode,
    /// The connection opened but the request frame could not be written
    Send,
}
