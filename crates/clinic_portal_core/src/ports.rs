//! crates/clinic_portal_core/src/ports.rs
//!
//! Defines the service contracts (traits) the sync layer depends on.
//! These traits form the boundary of the hexagonal architecture: the layer talks
//! to storage, the network, the identity provider and the runtime only through them.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use crate::domain::{Credentials, HttpRequest, HttpResponse, Session};

//=========================================================================================
// Generic Port Error and Result Types
//=========================================================================================

/// A generic error type for all port operations.
/// This abstracts away the specific errors from external services (e.g., disk, network).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PortError {
    #[error("Item not found: {0}")]
    NotFound(String),
    #[error("Unauthorized")]
    Unauthorized,
    #[error("Storage quota exceeded: {0}")]
    QuotaExceeded(String),
    #[error("Timed out")]
    Timeout,
    #[error("Network error: {0}")]
    Network(String),
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

//=========================================================================================
// Service Ports (Traits)
//=========================================================================================

/// Durable string key-value storage, the native counterpart of browser `localStorage`.
#[async_trait]
pub trait KeyValueStorage: Send + Sync {
    async fn get_item(&self, key: &str) -> PortResult<Option<String>>;

    /// Fails with `QuotaExceeded` when the value does not fit; the old value stays.
    async fn set_item(&self, key: &str, value: String) -> PortResult<()>;

    async fn remove_item(&self, key: &str) -> PortResult<()>;

    /// Every key currently stored, in no particular order.
    async fn keys(&self) -> PortResult<Vec<String>>;
}

#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Sends one request. Any status code the server answers with is a success
    /// at this level; only failing to get an answer is an error.
    async fn send(&self, request: &HttpRequest) -> PortResult<HttpResponse>;
}

#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// Exchanges credentials for a session. Rejected credentials are `Unauthorized`.
    async fn sign_in(&self, credentials: &Credentials) -> PortResult<Session>;

    /// Issues a replacement for a session that is close to expiring.
    async fn refresh(&self, session: &Session) -> PortResult<Session>;

    /// Revokes the token on the provider side.
    async fn sign_out(&self, access_token: &str) -> PortResult<()>;
}

/// Reports whether the runtime currently has network connectivity.
pub trait Connectivity: Send + Sync {
    fn is_online(&self) -> bool;
}

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}
