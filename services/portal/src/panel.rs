//! services/portal/src/panel.rs
//!
//! The panel cache manager. Each dashboard panel reads one resource; this module
//! decides whether that read is served from memory, the network, or the local
//! store, and collapses concurrent reads of the same resource into one request.

use crate::config::Backend;
use crate::error::{ApiError, LoadError};
use crate::remote::RemoteClient;
use crate::store::LocalStore;
use chrono::{DateTime, Datelike, NaiveDate, Utc};
use clinic_portal_core::domain::CacheEntry;
use clinic_portal_core::ports::{Clock, Connectivity};
use futures::future::{try_join_all, BoxFuture, FutureExt, Shared};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, info, warn};

const DEFAULT_PAGE: u32 = 1;
const DEFAULT_LIMIT: u32 = 20;
const MAX_LIMIT: u32 = 1000;

//=========================================================================================
// Resources
//=========================================================================================

/// The remote data categories a panel can show.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Resource {
    Dashboard,
    Agendamentos,
    Pacientes,
    Prontuarios,
    Financeiro,
}

/// How resource paths are spelled for the configured backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathStyle {
    Rest,
    Supabase,
}

impl From<&Backend> for PathStyle {
    fn from(backend: &Backend) -> Self {
        match backend {
            Backend::Rest { .. } => PathStyle::Rest,
            Backend::Supabase { .. } => PathStyle::Supabase,
        }
    }
}

impl Resource {
    pub const ALL: [Resource; 5] = [
        Resource::Dashboard,
        Resource::Agendamentos,
        Resource::Pacientes,
        Resource::Prontuarios,
        Resource::Financeiro,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Resource::Dashboard => "dashboard",
            Resource::Agendamentos => "agendamentos",
            Resource::Pacientes => "pacientes",
            Resource::Prontuarios => "prontuarios",
            Resource::Financeiro => "financeiro",
        }
    }

    /// What to ask the backend for, relative to its root. `today` dates the
    /// daily and monthly figures.
    pub fn request(&self, style: PathStyle, options: &LoadOptions, today: NaiveDate) -> PanelRequest {
        let (page, limit) = (options.page, options.limit);
        let offset = || u64::from(page.saturating_sub(1)) * u64::from(limit);
        match (style, self) {
            (PathStyle::Rest, Resource::Dashboard) => PanelRequest::Json("/dashboard".to_string()),
            (PathStyle::Rest, Resource::Financeiro) => PanelRequest::Json(format!(
                "/relatorios/financeiro?mes={}&ano={}",
                today.month(),
                today.year()
            )),
            (PathStyle::Rest, list) => {
                PanelRequest::Json(format!("/{}?page={}&limit={}", list.as_str(), page, limit))
            }

            (PathStyle::Supabase, Resource::Dashboard) => {
                let month_start = today.with_day(1).unwrap_or(today);
                PanelRequest::Counts(vec![
                    CountQuery {
                        fields: &["totalPacientes"],
                        path: "/pacientes?select=id&limit=1".to_string(),
                    },
                    CountQuery {
                        fields: &["agendamentosHoje"],
                        path: format!("/agendamentos?select=id&data_agendamento=gte.{}&limit=1", today),
                    },
                    CountQuery {
                        fields: &["prontuariosAtivos", "consultasMes"],
                        path: format!("/prontuarios?select=id&data_criacao=gte.{}&limit=1", month_start),
                    },
                ])
            }
            (PathStyle::Supabase, Resource::Financeiro) => {
                PanelRequest::Json("/rpc/get_resumo_financeiro".to_string())
            }
            (PathStyle::Supabase, Resource::Agendamentos) => PanelRequest::Json(format!(
                "/agendamentos?select=*,pacientes(nome_completo,telefone),medicos(nome,especialidade)&order=data_agendamento.asc&limit={}&offset={}",
                limit,
                offset()
            )),
            (PathStyle::Supabase, Resource::Pacientes) => PanelRequest::Json(format!(
                "/pacientes?select=*&order=data_criacao.desc&limit={}&offset={}",
                limit,
                offset()
            )),
            (PathStyle::Supabase, Resource::Prontuarios) => PanelRequest::Json(format!(
                "/prontuarios?select=*,pacientes(nome_completo),medicos(nome)&order=data_criacao.desc&limit={}&offset={}",
                limit,
                offset()
            )),
        }
    }
}

/// How a panel's value is obtained from the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PanelRequest {
    /// One GET whose JSON body is the value.
    Json(String),
    /// Row counts fetched together into one object.
    Counts(Vec<CountQuery>),
}

/// One counted selection; its total is stored under every listed field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CountQuery {
    pub fields: &'static [&'static str],
    pub path: String,
}

impl PanelRequest {
    async fn run(&self, remote: &RemoteClient) -> Result<Value, ApiError> {
        match self {
            PanelRequest::Json(path) => remote.get(path).await,
            PanelRequest::Counts(queries) => {
                let totals = try_join_all(queries.iter().map(|q| remote.count(&q.path))).await?;
                let mut stats = serde_json::Map::new();
                for (query, total) in queries.iter().zip(totals) {
                    for field in query.fields {
                        stats.insert(field.to_string(), Value::from(total));
                    }
                }
                Ok(Value::Object(stats))
            }
        }
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Resource {
    type Err = LoadError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Resource::ALL
            .into_iter()
            .find(|r| r.as_str() == s)
            .ok_or_else(|| LoadError::UnknownResource(s.to_string()))
    }
}

//=========================================================================================
// Load Options and Results
//=========================================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadOptions {
    pub page: u32,
    pub limit: u32,
    /// Overrides the manager's default time-to-live for this entry.
    pub ttl: Option<Duration>,
    /// Skip the fresh-cache shortcut. Still joins a load already in flight.
    pub force_refresh: bool,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            page: DEFAULT_PAGE,
            limit: DEFAULT_LIMIT,
            ttl: None,
            force_refresh: false,
        }
    }
}

impl LoadOptions {
    pub fn refresh() -> Self {
        Self {
            force_refresh: true,
            ..Self::default()
        }
    }

    /// Pages start at 1; a page holds between 1 and 1000 rows.
    fn validate(&self, resource: Resource) -> Result<(), LoadError> {
        let reason = if self.page == 0 {
            "page must be at least 1"
        } else if self.limit == 0 || self.limit > MAX_LIMIT {
            "limit must be between 1 and 1000"
        } else {
            return Ok(());
        };
        Err(LoadError::InvalidOptions {
            resource: resource.as_str().to_string(),
            reason: reason.to_string(),
        })
    }

    /// The resource name alone for the default page, otherwise name plus query.
    fn cache_key(&self, resource: Resource) -> String {
        if self.page == DEFAULT_PAGE && self.limit == DEFAULT_LIMIT {
            resource.as_str().to_string()
        } else {
            format!("{}?page={}&limit={}", resource, self.page, self.limit)
        }
    }
}

/// Where a returned value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataSource {
    /// Fetched by this load (or the in-flight load it joined).
    Network,
    /// A fresh cache entry; no request was made.
    Cache,
    /// The refresh failed and an older value was served instead.
    StaleFallback,
    /// The runtime is offline; the last known value was served.
    Offline,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PanelData {
    pub value: Value,
    pub source: DataSource,
    pub fetched_at: DateTime<Utc>,
}

impl PanelData {
    fn from_entry(entry: CacheEntry<Value>, source: DataSource) -> Self {
        Self {
            value: entry.value,
            source,
            fetched_at: entry.fetched_at,
        }
    }
}

/// Observable lifecycle of one cache key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceState {
    Empty,
    Loading,
    Fresh,
    Stale,
    Error,
}

//=========================================================================================
// The Manager
//=========================================================================================

type SharedLoad = Shared<BoxFuture<'static, Result<PanelData, LoadError>>>;

#[derive(Default)]
struct Tables {
    entries: HashMap<String, CacheEntry<Value>>,
    in_flight: HashMap<String, SharedLoad>,
    failed: HashSet<String>,
    /// Bumped by `clear`; loads started under an older generation do not write back.
    generation: u64,
}

struct PanelInner {
    remote: RemoteClient,
    store: LocalStore,
    connectivity: Arc<dyn Connectivity>,
    clock: Arc<dyn Clock>,
    style: PathStyle,
    default_ttl: Duration,
    tables: Mutex<Tables>,
}

enum Plan {
    Hit(PanelData),
    Offline,
    Join(SharedLoad),
}

#[derive(Clone)]
pub struct PanelCache {
    inner: Arc<PanelInner>,
}

impl PanelCache {
    /// `store` should be dedicated to panel data; `clear` empties all of it.
    pub fn new(
        remote: RemoteClient,
        store: LocalStore,
        connectivity: Arc<dyn Connectivity>,
        clock: Arc<dyn Clock>,
        style: PathStyle,
        default_ttl: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(PanelInner {
                remote,
                store,
                connectivity,
                clock,
                style,
                default_ttl,
                tables: Mutex::new(Tables::default()),
            }),
        }
    }

    /// Loads a panel's data. Never fails with anything but a `LoadError` value.
    pub async fn load(&self, name: &str, options: LoadOptions) -> Result<PanelData, LoadError> {
        let resource: Resource = name.parse().map_err(|e| {
            warn!(panel = name, "Unknown panel requested");
            e
        })?;
        options.validate(resource)?;
        let key = options.cache_key(resource);
        let now = self.inner.clock.now();

        let plan = {
            let mut tables = self.inner.lock();
            let hit = tables
                .entries
                .get(&key)
                .filter(|entry| !options.force_refresh && entry.is_fresh_at(now))
                .cloned();
            if let Some(entry) = hit {
                Plan::Hit(PanelData::from_entry(entry, DataSource::Cache))
            } else if !self.inner.connectivity.is_online() {
                Plan::Offline
            } else if let Some(load) = tables.in_flight.get(&key).cloned() {
                Plan::Join(load)
            } else {
                let ttl = options.ttl.unwrap_or(self.inner.default_ttl);
                let request = resource.request(self.inner.style, &options, now.date_naive());
                let generation = tables.generation;
                let load = fetch(self.inner.clone(), key.clone(), request, ttl, generation)
                    .boxed()
                    .shared();
                tables.in_flight.insert(key.clone(), load.clone());
                Plan::Join(load)
            }
        };

        match plan {
            Plan::Hit(data) => {
                debug!(panel = %key, "Panel cache hit");
                Ok(data)
            }
            Plan::Offline => {
                info!(panel = %key, "Offline; serving last known data");
                match self.inner.last_known(&key).await {
                    Some(entry) => Ok(PanelData::from_entry(entry, DataSource::Offline)),
                    None => Err(LoadError::Offline { resource: key }),
                }
            }
            Plan::Join(load) => load.await,
        }
    }

    /// State of one cache key; a resource name for its default page.
    pub fn state(&self, name: &str) -> ResourceState {
        let now = self.inner.clock.now();
        let tables = self.inner.lock();
        if tables.in_flight.contains_key(name) {
            ResourceState::Loading
        } else if tables.failed.contains(name) {
            ResourceState::Error
        } else {
            match tables.entries.get(name) {
                Some(entry) if entry.is_fresh_at(now) => ResourceState::Fresh,
                Some(_) => ResourceState::Stale,
                None => ResourceState::Empty,
            }
        }
    }

    /// Forgets every page of one resource, in memory and on disk.
    pub async fn invalidate(&self, name: &str) {
        let belongs = |key: &str| key == name || key.starts_with(&format!("{}?", name));
        {
            let mut tables = self.inner.lock();
            tables.entries.retain(|key, _| !belongs(key));
            tables.failed.retain(|key| !belongs(key));
        }
        if let Some(keys) = self.inner.store.keys().await {
            for key in keys.iter().filter(|k| belongs(k)) {
                self.inner.store.remove(key).await;
            }
        }
        debug!(panel = name, "Panel cache invalidated");
    }

    /// Drops all panel data. Loads still in flight finish but do not repopulate.
    pub async fn clear(&self) {
        {
            let mut tables = self.inner.lock();
            tables.entries.clear();
            tables.failed.clear();
            tables.in_flight.clear();
            tables.generation += 1;
        }
        if !self.inner.store.clear().await {
            warn!("Persisted panel data could not be fully cleared");
        }
        info!("Panel cache cleared");
    }
}

impl PanelInner {
    fn lock(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The most recent value ever loaded for `key`, however old: memory first,
    /// then the local store (which survives restarts).
    async fn last_known(&self, key: &str) -> Option<CacheEntry<Value>> {
        let cached = self.lock().entries.get(key).cloned();
        if cached.is_some() {
            return cached;
        }
        let entry = self.store.get_opt::<CacheEntry<Value>>(key).await?;
        self.lock()
            .entries
            .entry(key.to_string())
            .or_insert_with(|| entry.clone());
        Some(entry)
    }
}

/// The one network load behind every caller joined on `key`.
async fn fetch(
    inner: Arc<PanelInner>,
    key: String,
    request: PanelRequest,
    ttl: Duration,
    generation: u64,
) -> Result<PanelData, LoadError> {
    debug!(panel = %key, ?request, "Loading panel from network");
    let result = request.run(&inner.remote).await;

    let outcome = match result {
        Ok(value) => {
            let entry = CacheEntry::new(key.clone(), value, inner.clock.now(), ttl);
            let current = {
                let mut tables = inner.lock();
                let current = tables.generation == generation;
                if current {
                    tables.entries.insert(key.clone(), entry.clone());
                    tables.failed.remove(&key);
                }
                current
            };
            if current && !inner.store.set(&key, &entry).await {
                warn!(panel = %key, "Panel data could not be saved for offline use");
            }
            info!(panel = %key, "Panel loaded");
            Ok(PanelData::from_entry(entry, DataSource::Network))
        }
        Err(err) => {
            {
                let mut tables = inner.lock();
                if tables.generation == generation {
                    tables.failed.insert(key.clone());
                }
            }
            match inner.last_known(&key).await {
                Some(entry) => {
                    warn!(panel = %key, error = %err, "Refresh failed; serving stale data");
                    Ok(PanelData::from_entry(entry, DataSource::StaleFallback))
                }
                None => Err(LoadError::Fetch {
                    resource: key.clone(),
                    source: err,
                }),
            }
        }
    };

    {
        let mut tables = inner.lock();
        if tables.generation == generation {
            tables.in_flight.remove(&key);
        }
    }
    outcome
}
