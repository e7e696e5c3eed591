//! crates/clinic_portal_core/src/domain.rs
//!
//! Defines the pure, core data structures for the portal client.
//! These structs carry no I/O; persistence and transport live behind the ports.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

//=========================================================================================
// Roles and Sessions
//=========================================================================================

/// The kind of portal user. Serialized with the portal's own (Portuguese) names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Medico,
    Secretaria,
    Paciente,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Medico => "medico",
            Role::Secretaria => "secretaria",
            Role::Paciente => "paciente",
        }
    }

    /// Resolves the role stored in user metadata. Accounts without a usable
    /// `tipo` are treated as patients, the least privileged role.
    pub fn from_metadata(tipo: Option<&str>) -> Self {
        tipo.and_then(|t| t.parse().ok()).unwrap_or(Role::Paciente)
    }

    /// The page a user of this role lands on after login.
    pub fn landing_path(&self) -> &'static str {
        match self {
            Role::Admin => "admin/dashboard-admin.html",
            Role::Medico => "home.html",
            Role::Secretaria => "modules/agendamentos.html",
            Role::Paciente => "home.html",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a string does not name one of the four roles.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown role: {0}")]
pub struct UnknownRole(pub String);

impl FromStr for Role {
    type Err = UnknownRole;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "admin" => Ok(Role::Admin),
            "medico" => Ok(Role::Medico),
            "secretaria" => Ok(Role::Secretaria),
            "paciente" => Ok(Role::Paciente),
            other => Err(UnknownRole(other.to_string())),
        }
    }
}

/// An authenticated user context with an expiry.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub user_id: Uuid,
    pub email: String,
    pub role: Role,
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    /// A session is only usable if it expires strictly after it was issued
    /// and carries a token.
    pub fn is_well_formed(&self) -> bool {
        self.expires_at > self.issued_at && !self.access_token.is_empty()
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    /// Lifetime left at `now`; zero once expired.
    pub fn remaining_at(&self, now: DateTime<Utc>) -> Duration {
        (self.expires_at - now).to_std().unwrap_or(Duration::ZERO)
    }
}

// Tokens never reach the logs.
impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("user_id", &self.user_id)
            .field("email", &self.email)
            .field("role", &self.role)
            .field("issued_at", &self.issued_at)
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

/// Login input. Only used to authenticate, never stored.
#[derive(Clone)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

impl Credentials {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .finish()
    }
}

//=========================================================================================
// Remote Requests
//=========================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
        }
    }

    /// Only writes carry a JSON body.
    pub fn allows_body(&self) -> bool {
        matches!(self, Method::Post | Method::Put | Method::Patch)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single remote call. Immutable once built; produces exactly one response or error.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    method: Method,
    path: String,
    body: Option<Value>,
    bearer: Option<String>,
    headers: Vec<(String, String)>,
    timeout: Duration,
}

impl HttpRequest {
    /// Bodies passed with a read or delete are dropped.
    pub fn new(method: Method, path: impl Into<String>, body: Option<Value>, timeout: Duration) -> Self {
        Self {
            method,
            path: path.into(),
            body: body.filter(|_| method.allows_body()),
            bearer: None,
            headers: Vec::new(),
            timeout,
        }
    }

    /// Adds an extra header, e.g. PostgREST's `Prefer`.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_bearer(mut self, token: impl Into<String>) -> Self {
        self.bearer = Some(token.into());
        self
    }

    pub fn method(&self) -> Method {
        self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn body(&self) -> Option<&Value> {
        self.body.as_ref()
    }

    pub fn bearer(&self) -> Option<&str> {
        self.bearer.as_deref()
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

/// The raw outcome of a call that reached the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
    pub headers: Vec<(String, String)>,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
            headers: Vec::new(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

//=========================================================================================
// Cache Entries
//=========================================================================================

/// A cached value with the moment it was fetched and how long it stays fresh.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry<T> {
    pub key: String,
    pub value: T,
    pub fetched_at: DateTime<Utc>,
    #[serde(with = "ttl_millis")]
    pub ttl: Duration,
}

impl<T> CacheEntry<T> {
    pub fn new(key: impl Into<String>, value: T, fetched_at: DateTime<Utc>, ttl: Duration) -> Self {
        Self {
            key: key.into(),
            value,
            fetched_at,
            ttl,
        }
    }

    /// An entry fetched "in the future" (clock moved backwards) counts as fresh.
    pub fn is_fresh_at(&self, now: DateTime<Utc>) -> bool {
        match (now - self.fetched_at).to_std() {
            Ok(age) => age < self.ttl,
            Err(_) => true,
        }
    }
}

mod ttl_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(ttl: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

//=========================================================================================
// Notifications
//=========================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationLevel {
    Info,
    Success,
    Warning,
    Error,
}

impl NotificationLevel {
    /// How long a renderer keeps the notification on screen.
    pub fn display_duration(&self) -> Duration {
        match self {
            NotificationLevel::Info | NotificationLevel::Success => Duration::from_secs(5),
            NotificationLevel::Warning => Duration::from_secs(6),
            NotificationLevel::Error => Duration::from_secs(8),
        }
    }
}

/// A transient, user-facing message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationEvent {
    pub id: Uuid,
    pub message: String,
    pub level: NotificationLevel,
    pub created_at: DateTime<Utc>,
}

impl NotificationEvent {
    pub fn new(message: impl Into<String>, level: NotificationLevel, created_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            message: message.into(),
            level,
            created_at,
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        match (now - self.created_at).to_std() {
            Ok(shown_for) => shown_for >= self.level.display_duration(),
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn oversized_ttl_saturates_when_stored() {
        let entry = CacheEntry::new("dashboard", 1u8, Utc::now(), Duration::MAX);
        let raw = serde_json::to_value(&entry).unwrap();
        assert_eq!(raw["ttl"], u64::MAX);
        let back: CacheEntry<u8> = serde_json::from_value(raw).unwrap();
        assert_eq!(back.ttl, Duration::from_millis(u64::MAX));
    }

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn role_parsing_is_case_insensitive_and_defaults_to_patient() {
        assert_eq!("Medico".parse::<Role>().unwrap(), Role::Medico);
        assert_eq!(Role::from_metadata(Some(" SECRETARIA ")), Role::Secretaria);
        assert_eq!(Role::from_metadata(Some("superuser")), Role::Paciente);
        assert_eq!(Role::from_metadata(None), Role::Paciente);
    }

    #[test]
    fn session_expiry_and_remaining_lifetime() {
        let session = Session {
            user_id: Uuid::new_v4(),
            email: "ana@clinica.com".into(),
            role: Role::Admin,
            access_token: "tok".into(),
            refresh_token: None,
            issued_at: at(0),
            expires_at: at(60),
        };
        assert!(session.is_well_formed());
        assert!(!session.is_expired_at(at(60)));
        assert!(session.is_expired_at(at(61)));
        assert_eq!(session.remaining_at(at(45)), Duration::from_secs(15));
        assert_eq!(session.remaining_at(at(90)), Duration::ZERO);
    }

    #[test]
    fn debug_output_hides_secrets() {
        let creds = Credentials::new("ana@clinica.com", "hunter2");
        assert!(!format!("{:?}", creds).contains("hunter2"));
    }

    #[test]
    fn request_drops_body_on_reads() {
        let body = Some(serde_json::json!({"nome": "Maria"}));
        let get = HttpRequest::new(Method::Get, "/pacientes", body.clone(), Duration::from_secs(1));
        let post = HttpRequest::new(Method::Post, "/pacientes", body, Duration::from_secs(1));
        assert!(get.body().is_none());
        assert!(post.body().is_some());
    }

    #[test]
    fn cache_entry_freshness_window() {
        let entry = CacheEntry::new("pacientes", 1, at(0), Duration::from_secs(10));
        assert!(entry.is_fresh_at(at(9)));
        assert!(!entry.is_fresh_at(at(10)));
        assert!(entry.is_fresh_at(at(-5)));
    }

    #[test]
    fn notification_expires_after_its_level_duration() {
        let event = NotificationEvent::new("Falha", NotificationLevel::Error, at(0));
        assert!(!event.is_expired_at(at(7)));
        assert!(event.is_expired_at(at(8)));
    }
}
