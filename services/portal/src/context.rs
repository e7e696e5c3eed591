//! services/portal/src/context.rs
//!
//! Defines the portal's shared state: every component of the sync layer, built
//! once and handed out to whoever needs it.

use crate::adapters::{FileStorage, NetworkStatus, ReqwestTransport, SupabaseAuth, SystemClock};
use crate::config::Config;
use crate::error::PortalError;
use crate::notify::NotificationBus;
use crate::panel::{PanelCache, PathStyle};
use crate::remote::RemoteClient;
use crate::session::SessionManager;
use crate::store::LocalStore;
use clinic_portal_core::ports::{AuthProvider, Clock, Connectivity, HttpTransport, KeyValueStorage};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

//=========================================================================================
// Wiring Inputs
//=========================================================================================

/// The outside world, as seen by the sync layer.
#[derive(Clone)]
pub struct Ports {
    pub storage: Arc<dyn KeyValueStorage>,
    pub transport: Arc<dyn HttpTransport>,
    pub auth: Arc<dyn AuthProvider>,
    pub connectivity: Arc<dyn Connectivity>,
    pub clock: Arc<dyn Clock>,
}

/// The tunables taken from `Config`.
#[derive(Clone, Debug)]
pub struct Settings {
    pub storage_prefix: String,
    pub request_timeout: Duration,
    pub panel_ttl: Duration,
    pub refresh_low_water: Duration,
    pub path_style: PathStyle,
}

impl From<&Config> for Settings {
    fn from(config: &Config) -> Self {
        Self {
            storage_prefix: config.storage_prefix.clone(),
            request_timeout: config.api_timeout,
            panel_ttl: config.panel_cache_ttl,
            refresh_low_water: config.session_refresh_low_water,
            path_style: PathStyle::from(&config.backend()),
        }
    }
}

//=========================================================================================
// PortalContext
//=========================================================================================

#[derive(Clone)]
pub struct PortalContext {
    pub bus: NotificationBus,
    pub session: Arc<SessionManager>,
    pub remote: RemoteClient,
    pub panels: PanelCache,
    pub connectivity: Arc<dyn Connectivity>,
    pub clock: Arc<dyn Clock>,
    /// Set when the context owns the connectivity flag, i.e. in production.
    network: Option<Arc<NetworkStatus>>,
}

impl PortalContext {
    /// Wires the components over the given ports. Session and panel data live
    /// in separate namespaces under `settings.storage_prefix`.
    pub fn new(ports: Ports, settings: &Settings) -> Self {
        let bus = NotificationBus::new(ports.clock.clone());
        let session_store = LocalStore::new(
            ports.storage.clone(),
            format!("{}.session", settings.storage_prefix),
        );
        let panel_store = LocalStore::new(ports.storage, format!("{}.panel", settings.storage_prefix));

        let session = Arc::new(SessionManager::new(
            ports.auth,
            session_store,
            bus.clone(),
            ports.clock.clone(),
            settings.refresh_low_water,
        ));
        let remote = RemoteClient::new(
            ports.transport,
            session.clone(),
            bus.clone(),
            settings.request_timeout,
        );
        let panels = PanelCache::new(
            remote.clone(),
            panel_store,
            ports.connectivity.clone(),
            ports.clock.clone(),
            settings.path_style,
            settings.panel_ttl,
        );

        Self {
            bus,
            session,
            remote,
            panels,
            connectivity: ports.connectivity,
            clock: ports.clock,
            network: None,
        }
    }

    /// Builds the production adapters: file storage, reqwest, Supabase auth.
    pub fn from_config(config: &Config) -> Result<Self, PortalError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| PortalError::Internal(format!("Failed to build HTTP client: {}", e)))?;
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let network = Arc::new(NetworkStatus::new(!config.offline));

        let ports = Ports {
            storage: Arc::new(FileStorage::new(config.storage_path.clone())),
            transport: Arc::new(ReqwestTransport::new(client.clone(), config.backend())),
            auth: Arc::new(SupabaseAuth::new(
                client,
                config.supabase_url.clone(),
                config.supabase_anon_key.clone(),
                config.api_timeout,
                clock.clone(),
            )),
            connectivity: network.clone(),
            clock,
        };
        info!(
            storage = %config.storage_path.display(),
            supabase = config.use_supabase,
            offline = config.offline,
            "Portal context initialized"
        );
        let mut ctx = Self::new(ports, &Settings::from(config));
        ctx.network = Some(network);
        Ok(ctx)
    }

    /// Reports a connectivity change seen by the host. Contexts wired over an
    /// external `Connectivity` port ignore it; that port is the source of truth.
    pub fn set_online(&self, online: bool) {
        match &self.network {
            Some(network) => network.set_online(online),
            None => warn!(online, "Connectivity is driven by an external port; change ignored"),
        }
    }

    /// Ends the session and drops every cached panel with it.
    pub async fn sign_out(&self) {
        self.session.sign_out().await;
        self.panels.clear().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LoadError;
    use crate::panel::LoadOptions;
    use std::collections::HashMap;

    fn config_in(dir: &std::path::Path, extra: &[(&str, &str)]) -> Config {
        let mut vars: HashMap<String, String> = [
            ("SUPABASE_URL", "http://127.0.0.1:9"),
            ("SUPABASE_ANON_KEY", "anon"),
            ("API_TIMEOUT_MS", "200"),
        ]
        .iter()
        .chain(extra)
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        vars.insert(
            "STORAGE_PATH".to_string(),
            dir.join("portal.json").display().to_string(),
        );
        Config::from_lookup(move |key| vars.get(key).cloned()).unwrap()
    }

    #[tokio::test]
    async fn offline_start_serves_panels_from_storage_only() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = PortalContext::from_config(&config_in(dir.path(), &[("PORTAL_OFFLINE", "true")])).unwrap();

        assert!(!ctx.connectivity.is_online());
        let err = ctx.panels.load("pacientes", LoadOptions::default()).await.unwrap_err();
        assert_eq!(err, LoadError::Offline { resource: "pacientes".into() });
    }

    #[tokio::test]
    async fn production_connectivity_can_be_toggled() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = PortalContext::from_config(&config_in(dir.path(), &[])).unwrap();
        assert!(ctx.connectivity.is_online());

        ctx.set_online(false);
        assert!(!ctx.connectivity.is_online());
        let err = ctx.panels.load("agendamentos", LoadOptions::default()).await.unwrap_err();
        assert!(matches!(err, LoadError::Offline { .. }));

        ctx.set_online(true);
        assert!(ctx.connectivity.is_online());
    }
}
