//! services/portal/src/remote.rs
//!
//! The remote client: one place where requests get the session's bearer token,
//! a deadline, and a typed error. It never retries; callers decide that.

use crate::error::ApiError;
use crate::notify::NotificationBus;
use crate::session::SessionManager;
use crate::validation::ValidationError;
use clinic_portal_core::domain::{HttpRequest, HttpResponse, Method};
use clinic_portal_core::ports::HttpTransport;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Clone)]
pub struct RemoteClient {
    transport: Arc<dyn HttpTransport>,
    session: Arc<SessionManager>,
    bus: NotificationBus,
    timeout: Duration,
}

impl RemoteClient {
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        session: Arc<SessionManager>,
        bus: NotificationBus,
        timeout: Duration,
    ) -> Self {
        Self {
            transport,
            session,
            bus,
            timeout,
        }
    }

    /// A client sharing everything with this one except the deadline.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        Self {
            timeout,
            ..self.clone()
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Sends one request and parses the JSON answer. An empty 2xx body is `null`.
    pub async fn request(&self, method: Method, path: &str, body: Option<Value>) -> Result<Value, ApiError> {
        let response = self.exchange(HttpRequest::new(method, path, body, self.timeout)).await?;
        if response.body.trim().is_empty() {
            return Ok(Value::Null);
        }
        match serde_json::from_str(&response.body) {
            Ok(value) => Ok(value),
            Err(e) => Err(self.fail(method, path, ApiError::Decode(e.to_string())).await),
        }
    }

    /// Total row count of a PostgREST selection, read from `Content-Range`
    /// (`0-24/3573`, or `*/0` when empty).
    pub async fn count(&self, path: &str) -> Result<u64, ApiError> {
        let request = HttpRequest::new(Method::Get, path, None, self.timeout).with_header("Prefer", "count=exact");
        let response = self.exchange(request).await?;
        let total = response
            .header("content-range")
            .and_then(|range| range.rsplit_once('/'))
            .and_then(|(_, total)| total.trim().parse::<u64>().ok());
        match total {
            Some(total) => Ok(total),
            None => {
                let err = ApiError::Decode("missing or unreadable Content-Range total".to_string());
                Err(self.fail(Method::Get, path, err).await)
            }
        }
    }

    /// Validation, bearer, deadline and status mapping shared by every call.
    async fn exchange(&self, request: HttpRequest) -> Result<HttpResponse, ApiError> {
        let (method, path) = (request.method(), request.path().to_string());
        if let Err(e) = validate_path(&path) {
            return Err(self.fail(method, &path, e.into()).await);
        }

        // Expiry has already been announced by the session manager.
        let token = self.session.check_expiry().await?;
        let request = match token {
            Some(token) => request.with_bearer(token),
            None => request,
        };

        info!(%method, path = %path, "Remote request");
        let response = match tokio::time::timeout(self.timeout, self.transport.send(&request)).await {
            Err(_) => return Err(self.fail(method, &path, ApiError::Timeout).await),
            Ok(Err(e)) => return Err(self.fail(method, &path, e.into()).await),
            Ok(Ok(response)) => response,
        };

        if !response.is_success() {
            let err = ApiError::from_status(response.status, response.body);
            return Err(self.fail(method, &path, err).await);
        }
        info!(%method, path = %path, status = response.status, "Remote request succeeded");
        Ok(response)
    }

    /// Like `request`, deserializing the body into `T`.
    pub async fn request_json<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<T, ApiError> {
        let value = self.request(method, path, body).await?;
        match serde_json::from_value(value) {
            Ok(typed) => Ok(typed),
            Err(e) => Err(self.fail(method, path, ApiError::Decode(e.to_string())).await),
        }
    }

    pub async fn get(&self, path: &str) -> Result<Value, ApiError> {
        self.request(Method::Get, path, None).await
    }

    pub async fn post(&self, path: &str, body: Value) -> Result<Value, ApiError> {
        self.request(Method::Post, path, Some(body)).await
    }

    pub async fn put(&self, path: &str, body: Value) -> Result<Value, ApiError> {
        self.request(Method::Put, path, Some(body)).await
    }

    pub async fn patch(&self, path: &str, body: Value) -> Result<Value, ApiError> {
        self.request(Method::Patch, path, Some(body)).await
    }

    pub async fn delete(&self, path: &str) -> Result<Value, ApiError> {
        self.request(Method::Delete, path, None).await
    }

    /// The single exit for failed calls: one log line, one notification, and a
    /// dropped session when the server rejected the token.
    async fn fail(&self, method: Method, path: &str, err: ApiError) -> ApiError {
        warn!(%method, path, error = %err, "Remote request failed");
        if err == ApiError::Unauthorized {
            self.session.invalidate().await;
        }
        self.bus.error(err.user_message());
        err
    }
}

fn validate_path(path: &str) -> Result<(), ValidationError> {
    if !path.starts_with('/') {
        return Err(ValidationError::new("path", "must start with '/'"));
    }
    if path.contains("..") || path.chars().any(char::is_whitespace) {
        return Err(ValidationError::new("path", "contains illegal segments"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{ManualClock, MemoryStorage};
    use crate::store::LocalStore;
    use async_trait::async_trait;
    use chrono::Utc;
    use clinic_portal_core::domain::{Credentials, HttpResponse, NotificationLevel, Session};
    use clinic_portal_core::ports::{AuthProvider, PortError, PortResult};
    use std::sync::Mutex;

    struct NoAuth;

    #[async_trait]
    impl AuthProvider for NoAuth {
        async fn sign_in(&self, _: &Credentials) -> PortResult<Session> {
            Err(PortError::Unauthorized)
        }
        async fn refresh(&self, _: &Session) -> PortResult<Session> {
            Err(PortError::Unauthorized)
        }
        async fn sign_out(&self, _: &str) -> PortResult<()> {
            Ok(())
        }
    }

    /// Answers every call with the same canned result and remembers the requests.
    struct Canned {
        answer: PortResult<HttpResponse>,
        delay: Duration,
        seen: Mutex<Vec<HttpRequest>>,
    }

    impl Canned {
        fn new(answer: PortResult<HttpResponse>) -> Self {
            Self {
                answer,
                delay: Duration::ZERO,
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl HttpTransport for Canned {
        async fn send(&self, request: &HttpRequest) -> PortResult<HttpResponse> {
            self.seen.lock().unwrap().push(request.clone());
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.answer.clone()
        }
    }

    fn client(transport: Arc<Canned>) -> (RemoteClient, NotificationBus) {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let bus = NotificationBus::new(clock.clone());
        let session = Arc::new(SessionManager::new(
            Arc::new(NoAuth),
            LocalStore::new(Arc::new(MemoryStorage::new()), "t.session"),
            bus.clone(),
            clock,
            Duration::ZERO,
        ));
        let remote = RemoteClient::new(transport, session, bus.clone(), Duration::from_millis(50));
        (remote, bus)
    }

    #[tokio::test]
    async fn success_parses_json_and_sends_no_bearer_when_anonymous() {
        let transport = Arc::new(Canned::new(Ok(HttpResponse::new(200, r#"{"ok":true}"#))));
        let (remote, bus) = client(transport.clone());
        let mut sub = bus.subscribe();

        let value = remote.get("/health").await.unwrap();

        assert_eq!(value["ok"], true);
        assert!(sub.drain().is_empty());
        let seen = transport.seen.lock().unwrap();
        assert_eq!(seen[0].bearer(), None);
        assert_eq!(seen[0].method(), Method::Get);
    }

    #[tokio::test]
    async fn empty_body_is_null() {
        let transport = Arc::new(Canned::new(Ok(HttpResponse::new(204, ""))));
        let (remote, _) = client(transport);
        assert_eq!(remote.delete("/pacientes/7").await.unwrap(), Value::Null);
    }

    #[tokio::test]
    async fn non_success_statuses_map_and_notify_once() {
        for (status, expected) in [
            (403, ApiError::Forbidden),
            (404, ApiError::NotFound),
            (500, ApiError::ServerError { status: 500, body: "x".into() }),
            (409, ApiError::Unknown { status: 409, body: "x".into() }),
        ] {
            let transport = Arc::new(Canned::new(Ok(HttpResponse::new(status, "x"))));
            let (remote, bus) = client(transport);
            let mut sub = bus.subscribe();

            assert_eq!(remote.get("/agendamentos").await.unwrap_err(), expected);
            let events = sub.drain();
            assert_eq!(events.len(), 1);
            assert_eq!(events[0].level, NotificationLevel::Error);
        }
    }

    #[tokio::test]
    async fn slow_transport_times_out() {
        let mut canned = Canned::new(Ok(HttpResponse::new(200, "{}")));
        canned.delay = Duration::from_millis(500);
        let (remote, bus) = client(Arc::new(canned));
        let mut sub = bus.subscribe();

        assert_eq!(remote.get("/dashboard").await.unwrap_err(), ApiError::Timeout);
        assert_eq!(sub.drain().len(), 1);
    }

    #[tokio::test]
    async fn transport_failures_and_bad_bodies_are_typed() {
        let transport = Arc::new(Canned::new(Err(PortError::Network("refused".into()))));
        let (remote, _) = client(transport);
        assert!(matches!(remote.get("/x").await, Err(ApiError::Network(_))));

        let transport = Arc::new(Canned::new(Ok(HttpResponse::new(200, "<html>"))));
        let (remote, bus) = client(transport);
        let mut sub = bus.subscribe();
        assert!(matches!(remote.get("/x").await, Err(ApiError::Decode(_))));
        assert_eq!(sub.drain().len(), 1);
    }

    #[tokio::test]
    async fn request_json_reports_shape_mismatches_once() {
        #[derive(Debug, serde::Deserialize)]
        struct Resumo {
            #[allow(dead_code)]
            receita: f64,
        }

        let transport = Arc::new(Canned::new(Ok(HttpResponse::new(200, r#"{"receita":"muito"}"#))));
        let (remote, bus) = client(transport);
        let mut sub = bus.subscribe();

        let result = remote.request_json::<Resumo>(Method::Get, "/financeiro/resumo", None).await;

        assert!(matches!(result, Err(ApiError::Decode(_))));
        let events = sub.drain();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].level, NotificationLevel::Error);
    }

    #[tokio::test]
    async fn request_json_decodes_typed_bodies() {
        #[derive(Debug, PartialEq, serde::Deserialize)]
        struct Resumo {
            receita: f64,
        }

        let transport = Arc::new(Canned::new(Ok(HttpResponse::new(200, r#"{"receita":1200.5}"#))));
        let (remote, _) = client(transport);
        let resumo: Resumo = remote
            .request_json(Method::Get, "/financeiro/resumo", None)
            .await
            .unwrap();
        assert_eq!(resumo, Resumo { receita: 1200.5 });
    }

    #[tokio::test]
    async fn count_reads_the_content_range_total() {
        let transport = Arc::new(Canned::new(Ok(
            HttpResponse::new(200, "[]").with_header("Content-Range", "0-0/42"),
        )));
        let (remote, _) = client(transport.clone());

        assert_eq!(remote.count("/pacientes?select=id&limit=1").await.unwrap(), 42);
        let seen = transport.seen.lock().unwrap();
        assert_eq!(seen[0].headers(), [("Prefer".to_string(), "count=exact".to_string())]);
    }

    #[tokio::test]
    async fn count_without_a_total_is_a_decode_error() {
        let transport = Arc::new(Canned::new(Ok(HttpResponse::new(200, "[]"))));
        let (remote, bus) = client(transport);
        let mut sub = bus.subscribe();

        assert!(matches!(remote.count("/pacientes?select=id").await, Err(ApiError::Decode(_))));
        assert_eq!(sub.drain().len(), 1);
    }

    #[tokio::test]
    async fn malformed_paths_never_reach_the_transport() {
        let transport = Arc::new(Canned::new(Ok(HttpResponse::new(200, "{}"))));
        let (remote, _) = client(transport.clone());

        assert!(matches!(remote.get("pacientes").await, Err(ApiError::Validation(_))));
        assert!(matches!(remote.get("/../etc").await, Err(ApiError::Validation(_))));
        assert!(transport.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn with_timeout_only_changes_the_deadline() {
        let transport = Arc::new(Canned::new(Ok(HttpResponse::new(200, "{}"))));
        let (remote, _) = client(transport.clone());
        let patient = remote.with_timeout(Duration::from_secs(5));
        patient.post("/pacientes/", serde_json::json!({"nome": "Maria"})).await.unwrap();

        let seen = transport.seen.lock().unwrap();
        assert_eq!(seen[0].timeout(), Duration::from_secs(5));
        assert_eq!(seen[0].body().unwrap()["nome"], "Maria");
        assert_eq!(remote.timeout(), Duration::from_millis(50));
    }
}
