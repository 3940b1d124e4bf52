pub mod analytics_client;
pub mod cache;
pub mod dashboard;
pub mod errors;
pub mod html;
pub mod metrics;
pub mod server;
pub mod settings;
pub mod types;

use analytics_client::AnalyticsClient;
use cache::CachedSource;
use errors::DashboardResult;
use server::{DashboardServer, DashboardState};
use std::sync::Arc;

/// Loads configuration, serves the dashboard and blocks until Ctrl-C.
pub async fn run() -> DashboardResult<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let app_settings = settings::load_settings()?;
    let stylesheet = settings::load_stylesheet(&app_settings.stylesheet_path)?;
    let profile = app_settings.resolved_profile();

    let client = AnalyticsClient::new(&app_settings.client_settings())?;
    log::info!(
        "[Setup] Analytics backend {} ({}), profile {:?}",
        client.base_url(),
        if app_settings.secret.is_some() {
            "with shared secret"
        } else {
            "no auth header"
        },
        profile.kind
    );

    let source = CachedSource::new(client, app_settings.cache_ttl());
    if source.is_enabled() {
        log::info!(
            "[Setup] Caching metrics for {}s per category and range",
            app_settings.cache_ttl_secs
        );
    }

    let state = Arc::new(DashboardState {
        source,
        profile,
        stylesheet,
        inception: app_settings.inception_date,
    });

    let mut server = DashboardServer::new(app_settings.listen_addr.clone(), state);
    server.start().await?;

    if let Err(e) = tokio::signal::ctrl_c().await {
        log::error!("[Setup] Failed to listen for shutdown signal: {}", e);
    }
    server.stop().await;
    Ok(())
}
