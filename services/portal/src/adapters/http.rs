//! services/portal/src/adapters/http.rs
//!
//! This module contains the HTTP adapter, the concrete implementation of the
//! `HttpTransport` port over `reqwest`. It knows how to address either the clinic
//! REST API or a Supabase project's PostgREST endpoint.

use crate::config::Backend;
use async_trait::async_trait;
use clinic_portal_core::domain::{HttpRequest, HttpResponse, Method};
use clinic_portal_core::ports::{HttpTransport, PortError, PortResult};
use reqwest::header::{ACCEPT, AUTHORIZATION};
use tracing::debug;

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// An adapter that implements the `HttpTransport` port using `reqwest`.
#[derive(Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
    backend: Backend,
}

impl ReqwestTransport {
    /// Creates a new `ReqwestTransport`.
    pub fn new(client: reqwest::Client, backend: Backend) -> Self {
        Self { client, backend }
    }

    /// The absolute URL for a request path.
    pub fn url_for(&self, path: &str) -> String {
        match &self.backend {
            Backend::Rest { base_url } => format!("{}{}", base_url, path),
            Backend::Supabase { url, .. } => format!("{}/rest/v1{}", url, path),
        }
    }
}

fn to_reqwest(method: Method) -> reqwest::Method {
    match method {
        Method::Get => reqwest::Method::GET,
        Method::Post => reqwest::Method::POST,
        Method::Put => reqwest::Method::PUT,
        Method::Patch => reqwest::Method::PATCH,
        Method::Delete => reqwest::Method::DELETE,
    }
}

/// Maps a `reqwest` failure to the port error space.
pub(crate) fn map_reqwest_error(e: reqwest::Error) -> PortError {
    if e.is_timeout() {
        PortError::Timeout
    } else {
        PortError::Network(e.to_string())
    }
}

//=========================================================================================
// `HttpTransport` Trait Implementation
//=========================================================================================

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: &HttpRequest) -> PortResult<HttpResponse> {
        let url = self.url_for(request.path());
        debug!(method = %request.method(), %url, "Sending request");

        let mut builder = self
            .client
            .request(to_reqwest(request.method()), &url)
            .timeout(request.timeout())
            .header(ACCEPT, "application/json");

        // Supabase wants the project key on every call, and the anon key as the
        // bearer until a user session exists.
        let bearer = match &self.backend {
            Backend::Supabase { anon_key, .. } => {
                builder = builder.header("apikey", anon_key.as_str());
                Some(request.bearer().unwrap_or(anon_key.as_str()))
            }
            Backend::Rest { .. } => request.bearer(),
        };
        if let Some(token) = bearer {
            builder = builder.header(AUTHORIZATION, format!("Bearer {}", token));
        }
        for (name, value) in request.headers() {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = request.body() {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(map_reqwest_error)?;
        let status = response.status().as_u16();
        let headers: Vec<(String, String)> = response
            .headers()
            .iter()
            .filter_map(|(name, value)| Some((name.as_str().to_string(), value.to_str().ok()?.to_string())))
            .collect();
        let body = response.text().await.map_err(map_reqwest_error)?;
        let mut parsed = HttpResponse::new(status, body);
        parsed.headers = headers;
        Ok(parsed)
    }
}
