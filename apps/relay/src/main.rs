use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let boot = relay_core::bootstrap::bootstrap_from_env().await?;
    let global = boot.state.global.load();
    let state_for_proxy = boot.state.clone();

    let upstream_cfg = relay_core::upstream_client::UpstreamClientConfig::from_global(&global);
    let upstream_client: Arc<dyn relay_core::upstream_client::UpstreamClient> = Arc::new(
        relay_core::upstream_client::WreqUpstreamClient::new_with_proxy_resolver(
            upstream_cfg,
            move || state_for_proxy.global.load().proxy.clone(),
        )?,
    );

    let engine = Arc::new(relay_core::ProxyEngine::new(
        boot.state.clone(),
        boot.registry.clone(),
        upstream_client.clone(),
        boot.storage.clone(),
    ));

    let health = Arc::new(relay_core::HealthService::new(
        boot.state.clone(),
        boot.storage.clone(),
        upstream_client,
    ));
    tokio::spawn(
        health
            .clone()
            .run_normal_loop(Duration::from_secs(global.health_normal_interval_secs.max(1))),
    );
    tokio::spawn(
        health
            .clone()
            .run_problem_loop(Duration::from_secs(global.health_problem_interval_secs.max(1))),
    );

    let app = axum::Router::new()
        .merge(relay_router::proxy_router(engine))
        .nest(
            "/admin",
            relay_router::admin_router(boot.state.clone(), boot.storage.clone(), health),
        );

    let bind = format!("{}:{}", global.host, global.port);
    let listener = tokio::net::TcpListener::bind(&bind).await?;
    tracing::info!(%bind, "listening");
    axum::serve(listener, app).await?;
    Ok(())
}
