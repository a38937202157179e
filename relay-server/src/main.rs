use std::net::SocketAddr;
use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use relay_core::kind_dispatch::DefaultKindHandlerFactory;
use relay_core::ratelimit::RedisRateLimiter;
use relay_core::repository::UserRepository;
use relay_core::webhook::HttpEventWebhook;
use relay_core::{AdmissionPipeline, SettingsStore};
use relay_server::config::AppConfig;
use relay_server::{admin, routes, ws, AppState};
use relay_shared::clients::{create_pool, RedisClient, WebhookClient};
use relay_shared::middleware::{init_metrics, init_tracing, metrics_middleware};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing("relay-server");

    let config = AppConfig::load()?;
    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;

    let db = create_pool(&config.database_url);
    let redis = RedisClient::connect(&config.redis_url).await?;
    let webhook_client = WebhookClient::new(config.webhook_api_token.clone(), config.webhook_timeout());

    let settings = Arc::new(SettingsStore::load(&config.settings_path)?);
    spawn_reload_task(settings.clone());

    let rate_limiter = Arc::new(RedisRateLimiter::new(redis.clone()));
    let user_repo = Arc::new(UserRepository::new(db.clone(), redis.clone(), webhook_client.clone()));
    let event_webhook = Arc::new(HttpEventWebhook::new(webhook_client));
    let kind_factory = Arc::new(DefaultKindHandlerFactory::default());

    let pipeline = Arc::new(AdmissionPipeline::new(
        settings.clone(),
        rate_limiter,
        user_repo,
        event_webhook,
        kind_factory,
    ));

    let metrics_handle = init_metrics();

    let state = Arc::new(AppState {
        config,
        db,
        pipeline,
        settings,
        metrics_handle,
    });

    let app = Router::new()
        .route("/ws", get(ws::ws_handler))
        .route("/health", get(routes::health::health_check))
        .route("/metrics", get(routes::health::metrics))
        .route("/user", get(admin::get_user))
        .layer(axum::middleware::from_fn(metrics_middleware))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    tracing::info!(%addr, "relay-server starting");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    Ok(())
}

/// Re-reads the admission policy file on `SIGHUP`, matching the reload
/// trigger `SettingsStore::reload` is documented against.
fn spawn_reload_task(settings: Arc<SettingsStore>) {
    tokio::spawn(async move {
        let mut hangup = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::hangup()) {
            Ok(signal) => signal,
            Err(err) => {
                tracing::warn!(error = %err, "failed to install SIGHUP handler, settings reload disabled");
                return;
            }
        };
        loop {
            hangup.recv().await;
            match settings.reload() {
                Ok(()) => tracing::info!("settings reloaded on SIGHUP"),
                Err(err) => tracing::warn!(error = %err, "settings reload failed, keeping previous snapshot"),
            }
        }
    });
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    tracing::info!("shutdown signal received, draining connections");
}
