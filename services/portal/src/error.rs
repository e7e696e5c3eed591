//! services/portal/src/error.rs
//!
//! Defines the error taxonomy of the sync layer and the umbrella error of the binary.

use crate::config::ConfigError;
use crate::validation::ValidationError;
use clinic_portal_core::ports::PortError;

//=========================================================================================
// Remote Errors
//=========================================================================================

/// Failure of a single Remote Client call. `Clone` so one in-flight result can be
/// handed to every caller that joined it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApiError {
    #[error("Request timed out")]
    Timeout,
    #[error("Network error: {0}")]
    Network(String),
    #[error("Unauthorized")]
    Unauthorized,
    #[error("Forbidden")]
    Forbidden,
    #[error("Not found")]
    NotFound,
    #[error("Server error {status}: {body}")]
    ServerError { status: u16, body: String },
    #[error("Unexpected status {status}: {body}")]
    Unknown { status: u16, body: String },
    #[error("Invalid request: {0}")]
    Validation(#[from] ValidationError),
    #[error("Failed to decode response: {0}")]
    Decode(String),
}

impl ApiError {
    /// Maps a non-2xx status code to its error class.
    pub fn from_status(status: u16, body: String) -> Self {
        match status {
            401 => ApiError::Unauthorized,
            403 => ApiError::Forbidden,
            404 => ApiError::NotFound,
            500..=599 => ApiError::ServerError { status, body },
            _ => ApiError::Unknown { status, body },
        }
    }

    /// The text shown to the user. Never includes response bodies.
    pub fn user_message(&self) -> &'static str {
        match self {
            ApiError::Timeout => "Requisição expirou. Tente novamente.",
            ApiError::Network(_) => "Erro na comunicação com o servidor.",
            ApiError::Unauthorized => "Sessão expirada. Faça login novamente.",
            ApiError::Forbidden => "Acesso negado.",
            ApiError::NotFound => "Recurso não encontrado.",
            ApiError::ServerError { .. } => "Erro interno do servidor. Tente novamente.",
            ApiError::Unknown { .. } => "Erro na comunicação com o servidor.",
            ApiError::Validation(_) => "Requisição inválida.",
            ApiError::Decode(_) => "Resposta inválida do servidor.",
        }
    }
}

impl From<PortError> for ApiError {
    fn from(err: PortError) -> Self {
        match err {
            PortError::Timeout => ApiError::Timeout,
            PortError::Unauthorized => ApiError::Unauthorized,
            PortError::NotFound(_) => ApiError::NotFound,
            PortError::Network(msg) | PortError::Unexpected(msg) | PortError::QuotaExceeded(msg) => {
                ApiError::Network(msg)
            }
        }
    }
}

//=========================================================================================
// Authentication Errors
//=========================================================================================

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("Invalid email or password")]
    InvalidCredentials,
    #[error("Session expired")]
    Expired,
    #[error("Invalid credentials format: {0}")]
    Validation(#[from] ValidationError),
    #[error("Identity provider error: {0}")]
    Provider(String),
}

impl AuthError {
    /// Sanitized text for the notification bus; provider details stay in the logs.
    pub fn user_message(&self) -> &'static str {
        match self {
            AuthError::InvalidCredentials => "E-mail ou senha inválidos.",
            AuthError::Expired => "Sessão expirada. Faça login novamente.",
            AuthError::Validation(_) => "Informe um e-mail válido.",
            AuthError::Provider(_) => "Falha na autenticação",
        }
    }
}

impl From<PortError> for AuthError {
    fn from(err: PortError) -> Self {
        match err {
            PortError::Unauthorized => AuthError::InvalidCredentials,
            other => AuthError::Provider(other.to_string()),
        }
    }
}

//=========================================================================================
// Panel Errors
//=========================================================================================

/// Failure of a panel load after every fallback was tried.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LoadError {
    #[error("Offline and no cached data for panel {resource}")]
    Offline { resource: String },
    #[error("Panel {0} is not implemented")]
    UnknownResource(String),
    #[error("Invalid options for panel {resource}: {reason}")]
    InvalidOptions { resource: String, reason: String },
    #[error("Failed to load data for panel {resource}: {source}")]
    Fetch { resource: String, source: ApiError },
}

//=========================================================================================
// Umbrella Error
//=========================================================================================

/// The primary error type for the `portal` binary.
#[derive(Debug, thiserror::Error)]
pub enum PortalError {
    /// Represents an error that occurred during configuration loading.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Remote error: {0}")]
    Api(#[from] ApiError),

    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),

    #[error("Panel error: {0}")]
    Load(#[from] LoadError),

    /// Represents an error that propagated up from one of the core service ports.
    #[error("Service Port Error: {0}")]
    Port(#[from] PortError),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// A catch-all for any other unexpected errors.
    #[error("An unexpected internal error occurred: {0}")]
    Internal(String),
}
