//! services/portal/src/bin/portal.rs
//!
//! Command-line front end for the sync layer: restores or opens a session, loads
//! the panels named on the command line and prints their data as JSON.
//!
//! Usage: `portal [panel ...]` (defaults to `dashboard`). Credentials for a fresh
//! sign-in are read from `PORTAL_EMAIL` and `PORTAL_PASSWORD`; `PORTAL_OFFLINE=true`
//! serves panels from local storage only.

use clinic_portal_core::domain::{Credentials, NotificationLevel};
use portal_lib::{
    config::Config,
    context::PortalContext,
    error::PortalError,
    panel::LoadOptions,
};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), PortalError> {
    // --- 1. Load Configuration & Set Up Logging ---
    let config = Config::from_env()?;
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.log_level.to_string()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
    info!("Configuration loaded. Starting portal client...");

    // --- 2. Build the Context ---
    let ctx = PortalContext::from_config(&config)?;

    // --- 3. Render Notifications ---
    let mut subscription = ctx.bus.subscribe();
    let subscription_id = subscription.id();
    let renderer = tokio::spawn(async move {
        while let Some(event) = subscription.recv().await {
            let tag = match event.level {
                NotificationLevel::Info => "info",
                NotificationLevel::Success => "ok",
                NotificationLevel::Warning => "warn",
                NotificationLevel::Error => "error",
            };
            eprintln!("[{}] {}", tag, event.message);
        }
    });

    // --- 4. Sign In and Load Panels ---
    let outcome = run(&ctx, &config).await;

    // --- 5. Shut Down ---
    // The renderer drains whatever was published before the failure, if any.
    ctx.bus.unsubscribe(subscription_id);
    if let Err(e) = renderer.await {
        warn!(error = %e, "Notification renderer ended abnormally");
    }
    outcome
}

async fn run(ctx: &PortalContext, config: &Config) -> Result<(), PortalError> {
    match ctx.session.restore().await {
        Some(session) => info!(role = %session.role, "Resumed persisted session"),
        None => match (&config.portal_email, &config.portal_password) {
            (Some(email), Some(password)) => {
                let session = ctx
                    .session
                    .sign_in(&Credentials::new(email.as_str(), password.as_str()))
                    .await?;
                info!(
                    role = %session.role,
                    landing = session.role.landing_path(),
                    "Signed in"
                );
            }
            _ => warn!("No session and no PORTAL_EMAIL/PORTAL_PASSWORD; continuing anonymously"),
        },
    }

    let mut panels: Vec<String> = std::env::args().skip(1).collect();
    if panels.is_empty() {
        panels.push("dashboard".to_string());
    }
    let mut failures = 0usize;
    for name in &panels {
        match ctx.panels.load(name, LoadOptions::default()).await {
            Ok(data) => {
                info!(panel = %name, source = ?data.source, fetched_at = %data.fetched_at, "Panel ready");
                println!("{}", serde_json::to_string_pretty(&data.value)?);
            }
            Err(e) => {
                warn!(panel = %name, error = %e, "Panel unavailable");
                failures += 1;
            }
        }
    }

    if failures == panels.len() {
        return Err(PortalError::Internal(format!(
            "none of the {} requested panels could be loaded",
            failures
        )));
    }
    Ok(())
}
