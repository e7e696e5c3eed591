//! Shared fakes for the integration tests: a scripted HTTP transport, an auth
//! provider with a fixed password, and a context wired over them.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use clinic_portal_core::domain::{Credentials, HttpRequest, HttpResponse, Role, Session};
use clinic_portal_core::ports::{AuthProvider, Clock, HttpTransport, KeyValueStorage, PortError, PortResult};
use portal_lib::adapters::{ManualClock, MemoryStorage, NetworkStatus};
use portal_lib::context::{PortalContext, Ports, Settings};
use portal_lib::panel::PathStyle;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

pub const PASSWORD: &str = "senha-correta";
pub const EMAIL: &str = "dra.ana@clinica.com";

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap()
}

//=========================================================================================
// Transport
//=========================================================================================

/// Answers by path prefix; the most recently scripted matching prefix wins.
/// Unscripted paths get `200 []`.
pub struct ScriptedTransport {
    routes: Mutex<Vec<(String, PortResult<HttpResponse>)>>,
    delay: Mutex<Duration>,
    seen: Mutex<Vec<HttpRequest>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self {
            routes: Mutex::new(Vec::new()),
            delay: Mutex::new(Duration::ZERO),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn respond(&self, prefix: &str, status: u16, body: &str) {
        self.routes
            .lock()
            .unwrap()
            .push((prefix.to_string(), Ok(HttpResponse::new(status, body))));
    }

    pub fn respond_with(&self, prefix: &str, response: HttpResponse) {
        self.routes.lock().unwrap().push((prefix.to_string(), Ok(response)));
    }

    pub fn fail(&self, prefix: &str, error: PortError) {
        self.routes.lock().unwrap().push((prefix.to_string(), Err(error)));
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    pub fn calls(&self) -> usize {
        self.seen.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl HttpTransport for ScriptedTransport {
    async fn send(&self, request: &HttpRequest) -> PortResult<HttpResponse> {
        self.seen.lock().unwrap().push(request.clone());
        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let routes = self.routes.lock().unwrap();
        routes
            .iter()
            .rev()
            .find(|(prefix, _)| request.path().starts_with(prefix.as_str()))
            .map(|(_, answer)| answer.clone())
            .unwrap_or_else(|| Ok(HttpResponse::new(200, "[]")))
    }
}

//=========================================================================================
// Auth
//=========================================================================================

pub struct FakeAuth {
    clock: Arc<ManualClock>,
    pub lifetime: chrono::Duration,
    pub role: Role,
    pub sign_ins: AtomicUsize,
    pub sign_outs: AtomicUsize,
}

impl FakeAuth {
    pub fn new(clock: Arc<ManualClock>) -> Self {
        Self {
            clock,
            lifetime: chrono::Duration::hours(1),
            role: Role::Medico,
            sign_ins: AtomicUsize::new(0),
            sign_outs: AtomicUsize::new(0),
        }
    }

    fn issue(&self, email: &str) -> Session {
        let now = self.clock.now();
        Session {
            user_id: Uuid::new_v4(),
            email: email.to_string(),
            role: self.role,
            access_token: format!("access-{}", self.sign_ins.load(Ordering::SeqCst)),
            refresh_token: Some("refresh".to_string()),
            issued_at: now,
            expires_at: now + self.lifetime,
        }
    }
}

#[async_trait]
impl AuthProvider for FakeAuth {
    async fn sign_in(&self, credentials: &Credentials) -> PortResult<Session> {
        self.sign_ins.fetch_add(1, Ordering::SeqCst);
        if credentials.password == PASSWORD {
            Ok(self.issue(&credentials.email))
        } else {
            Err(PortError::Unauthorized)
        }
    }

    async fn refresh(&self, session: &Session) -> PortResult<Session> {
        Ok(self.issue(&session.email))
    }

    async fn sign_out(&self, _access_token: &str) -> PortResult<()> {
        self.sign_outs.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

//=========================================================================================
// Harness
//=========================================================================================

pub struct Harness {
    pub ctx: PortalContext,
    pub storage: Arc<dyn KeyValueStorage>,
    pub transport: Arc<ScriptedTransport>,
    pub auth: Arc<FakeAuth>,
    pub network: Arc<NetworkStatus>,
    pub clock: Arc<ManualClock>,
}

pub fn settings() -> Settings {
    Settings {
        storage_prefix: "portal_medico".to_string(),
        request_timeout: Duration::from_secs(2),
        panel_ttl: Duration::from_secs(60),
        refresh_low_water: Duration::ZERO,
        path_style: PathStyle::Rest,
    }
}

pub fn harness() -> Harness {
    harness_over(Arc::new(MemoryStorage::new()), FakeAuth::new)
}

/// A context over existing storage, e.g. to simulate a restart.
pub fn harness_over(
    storage: Arc<dyn KeyValueStorage>,
    auth: impl FnOnce(Arc<ManualClock>) -> FakeAuth,
) -> Harness {
    harness_with(settings(), storage, auth)
}

pub fn harness_with(
    settings: Settings,
    storage: Arc<dyn KeyValueStorage>,
    auth: impl FnOnce(Arc<ManualClock>) -> FakeAuth,
) -> Harness {
    let clock = Arc::new(ManualClock::new(t0()));
    let transport = Arc::new(ScriptedTransport::new());
    let auth = Arc::new(auth(clock.clone()));
    let network = Arc::new(NetworkStatus::new(true));
    let ports = Ports {
        storage: storage.clone(),
        transport: transport.clone(),
        auth: auth.clone(),
        connectivity: network.clone(),
        clock: clock.clone(),
    };
    Harness {
        ctx: PortalContext::new(ports, &settings),
        storage,
        transport,
        auth,
        network,
        clock,
    }
}

impl Harness {
    pub async fn sign_in(&self) -> Session {
        self.ctx
            .session
            .sign_in(&Credentials::new(EMAIL, PASSWORD))
            .await
            .expect("sign-in with the right password")
    }
}
