//! services/portal/src/adapters/supabase_auth.rs
//!
//! This module contains the identity adapter for Supabase Auth (GoTrue).
//! It implements the `AuthProvider` port from the `core` crate.

use crate::adapters::http::map_reqwest_error;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use clinic_portal_core::domain::{Credentials, Role, Session};
use clinic_portal_core::ports::{AuthProvider, Clock, PortError, PortResult};
use reqwest::header::AUTHORIZATION;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// An adapter that implements the `AuthProvider` port against a Supabase project.
#[derive(Clone)]
pub struct SupabaseAuth {
    client: reqwest::Client,
    url: String,
    anon_key: String,
    timeout: Duration,
    clock: Arc<dyn Clock>,
}

impl SupabaseAuth {
    /// Creates a new `SupabaseAuth`.
    pub fn new(
        client: reqwest::Client,
        url: String,
        anon_key: String,
        timeout: Duration,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            client,
            url,
            anon_key,
            timeout,
            clock,
        }
    }

    async fn token_grant(&self, grant_type: &str, payload: Value) -> PortResult<Session> {
        let url = format!("{}/auth/v1/token?grant_type={}", self.url, grant_type);
        let response = self
            .client
            .post(&url)
            .timeout(self.timeout)
            .header("apikey", self.anon_key.as_str())
            .json(&payload)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let status = response.status().as_u16();
        let body = response.text().await.map_err(map_reqwest_error)?;
        match status {
            200..=299 => {
                let token: TokenResponse =
                    serde_json::from_str(&body).map_err(|e| PortError::Unexpected(e.to_string()))?;
                token.into_session(self.clock.now())
            }
            // GoTrue answers a bad password or a revoked refresh token with 400 invalid_grant.
            400 | 401 | 403 => {
                debug!(status, grant_type, "Token grant rejected");
                Err(PortError::Unauthorized)
            }
            _ => Err(PortError::Unexpected(format!("auth service returned {}", status))),
        }
    }
}

//=========================================================================================
// Wire Format
//=========================================================================================

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    expires_in: i64,
    user: GoTrueUser,
}

#[derive(Deserialize)]
struct GoTrueUser {
    id: Uuid,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    user_metadata: Option<Value>,
}

impl TokenResponse {
    fn into_session(self, now: DateTime<Utc>) -> PortResult<Session> {
        let tipo = self
            .user
            .user_metadata
            .as_ref()
            .and_then(|m| m.get("tipo"))
            .and_then(Value::as_str);
        let session = Session {
            user_id: self.user.id,
            email: self.user.email.unwrap_or_default(),
            role: Role::from_metadata(tipo),
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            issued_at: now,
            expires_at: now + chrono::Duration::seconds(self.expires_in),
        };
        if !session.is_well_formed() {
            return Err(PortError::Unexpected("auth service issued an unusable session".to_string()));
        }
        Ok(session)
    }
}

//=========================================================================================
// `AuthProvider` Trait Implementation
//=========================================================================================

#[async_trait]
impl AuthProvider for SupabaseAuth {
    async fn sign_in(&self, credentials: &Credentials) -> PortResult<Session> {
        self.token_grant(
            "password",
            json!({ "email": credentials.email, "password": credentials.password }),
        )
        .await
    }

    async fn refresh(&self, session: &Session) -> PortResult<Session> {
        let refresh_token = session.refresh_token.as_deref().ok_or(PortError::Unauthorized)?;
        self.token_grant("refresh_token", json!({ "refresh_token": refresh_token }))
            .await
    }

    async fn sign_out(&self, access_token: &str) -> PortResult<()> {
        let url = format!("{}/auth/v1/logout", self.url);
        let response = self
            .client
            .post(&url)
            .timeout(self.timeout)
            .header("apikey", self.anon_key.as_str())
            .header(AUTHORIZATION, format!("Bearer {}", access_token))
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let status = response.status();
        // An already-invalid token is as good as revoked.
        if status.is_success() || status.as_u16() == 401 {
            Ok(())
        } else {
            warn!(status = status.as_u16(), "Logout was not acknowledged");
            Err(PortError::Unexpected(format!("logout returned {}", status)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_response_becomes_a_session_with_role_from_metadata() {
        let now = Utc::now();
        let raw = json!({
            "access_token": "jwt",
            "refresh_token": "r1",
            "expires_in": 3600,
            "token_type": "bearer",
            "user": {
                "id": "5f0c1f6e-8f0b-4e43-9d55-0f5c0c4f9a10",
                "email": "dra.ana@clinica.com",
                "user_metadata": { "nome": "Ana", "tipo": "medico" }
            }
        });
        let token: TokenResponse = serde_json::from_value(raw).unwrap();
        let session = token.into_session(now).unwrap();

        assert_eq!(session.role, Role::Medico);
        assert_eq!(session.email, "dra.ana@clinica.com");
        assert_eq!(session.refresh_token.as_deref(), Some("r1"));
        assert_eq!(session.expires_at - session.issued_at, chrono::Duration::hours(1));
    }

    #[test]
    fn missing_metadata_defaults_to_patient_and_zero_lifetime_is_rejected() {
        let raw = json!({
            "access_token": "jwt",
            "expires_in": 0,
            "user": { "id": "5f0c1f6e-8f0b-4e43-9d55-0f5c0c4f9a10" }
        });
        let token: TokenResponse = serde_json::from_value(raw).unwrap();
        assert!(token.into_session(Utc::now()).is_err());

        let raw = json!({
            "access_token": "jwt",
            "expires_in": 60,
            "user": { "id": "5f0c1f6e-8f0b-4e43-9d55-0f5c0c4f9a10" }
        });
        let token: TokenResponse = serde_json::from_value(raw).unwrap();
        assert_eq!(token.into_session(Utc::now()).unwrap().role, Role::Paciente);
    }
}
