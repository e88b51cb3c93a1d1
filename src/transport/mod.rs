//! Transport boundary consumed by the engine.
//!
//! The engine is agnostic to how requests reach the backend; it only needs
//! `request(method, path, body) -> Result<json, failure>`. Authentication,
//! retries, and timeouts all belong to the implementor — a timeout surfaces
//! here as any other transport failure.

use async_trait::async_trait;
use serde_json::Value;

use crate::Error;

/// HTTP method of a resource request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
}

impl Method {
    /// Get the string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
        }
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Failure reported by the transport.
///
/// `status` is the HTTP status code when a response was received; `None`
/// means the backend was unreachable (or the request timed out).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportFailure {
    pub status: Option<u16>,
    pub message: String,
}

impl TransportFailure {
    /// A failure without a response (unreachable, timeout).
    pub fn network(message: impl Into<String>) -> Self {
        Self {
            status: None,
            message: message.into(),
        }
    }

    /// A failure carried by an HTTP error response.
    pub fn status(status: u16, message: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            message: message.into(),
        }
    }
}

impl From<TransportFailure> for Error {
    /// Classify a transport failure into the engine's error taxonomy.
    fn from(failure: TransportFailure) -> Self {
        match failure.status {
            None => Error::Network(failure.message),
            Some(400) | Some(422) => Error::Validation(failure.message),
            Some(401) | Some(403) => Error::Permission(failure.message),
            Some(404) | Some(409) => Error::Conflict(failure.message),
            Some(code) => Error::Unknown(format!("HTTP {}: {}", code, failure.message)),
        }
    }
}

/// Object-safe async request boundary.
///
/// Implementors perform the actual HTTP round-trip; mocks script responses
/// for tests. The engine issues at most the calls described by its route
/// table and never retries on its own.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Perform one request and return the response body as JSON.
    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> std::result::Result<Value, TransportFailure>;
}
