use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::info;

use slotbook::auth::Authenticator;
use slotbook::calendar::{CalendarPredicate, SchoolCalendar};
use slotbook::config::Config;
use slotbook::engine::{Engine, EngineOptions};
use slotbook::http::{self, AppState};
use slotbook::identity::HttpIdentityProvider;
use slotbook::incidents::IncidentLog;
use slotbook::notify::NotifyHub;
use slotbook::roster::RosterCache;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = Config::from_env()?;
    slotbook::observability::init(config.metrics_port)?;

    // Ensure data directory exists
    std::fs::create_dir_all(&config.data_dir)?;

    let calendar: Arc<dyn CalendarPredicate> = match &config.calendar_file {
        Some(path) => Arc::new(SchoolCalendar::from_file(path)?),
        None => Arc::new(SchoolCalendar::builtin()),
    };
    let notify = Arc::new(NotifyHub::new(config.broadcast_capacity));

    let engine = Arc::new(Engine::open(EngineOptions {
        data_dir: config.data_dir.clone(),
        calendar,
        notify: notify.clone(),
        series_cascade: config.series_cascade,
    })?);
    let roster = Arc::new(RosterCache::open(
        &config.data_dir,
        config.identity_domain.clone(),
        notify.clone(),
    )?);
    let incidents = Arc::new(IncidentLog::open(&config.data_dir, notify.clone())?);
    let provider = HttpIdentityProvider::new(
        config.upstream_url.clone(),
        config.upstream_secret.clone(),
        config.tokeninfo_url.clone(),
    )?;
    let auth = Arc::new(Authenticator::new(Arc::new(provider), roster.clone()));

    let app = http::router(AppState {
        engine,
        roster,
        incidents,
        auth,
        notify,
        sync_secret: config.upstream_secret.as_deref().map(Arc::from),
    });

    let addr = config.addr();
    let listener = TcpListener::bind(&addr).await?;
    info!("slotbook listening on {addr}");
    info!("  data_dir: {}", config.data_dir.display());
    info!("  series cascade: {:?}", config.series_cascade);
    info!("  upstream: {}", config.upstream_url.as_deref().unwrap_or("disabled"));
    info!("  metrics: {}", config.metrics_port.map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics")));

    // Graceful shutdown: stop accepting on SIGTERM/ctrl-c, let in-flight requests finish
    let shutdown = async {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    tokio::select! {
                        _ = ctrl_c => {}
                        _ = sigterm.recv() => {}
                    }
                }
                Err(e) => {
                    tracing::warn!("failed to register SIGTERM handler: {e}");
                    ctrl_c.await.ok();
                }
            }
        }
        #[cfg(not(unix))]
        {
            ctrl_c.await.ok();
        }
        info!("shutdown signal received, draining requests");
    };

    axum::serve(listener, app).with_graceful_shutdown(shutdown).await?;

    info!("slotbook stopped");
    Ok(())
}
