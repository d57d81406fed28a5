use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::{header, HeaderValue, Method};
use axum::routing::{get, post};
use axum::{Json, Router};
use jamroom_server::config::{Config, LogFormat};
use jamroom_server::health::{self, StartTime};
use jamroom_server::metrics::Metrics;
use jamroom_server::middleware::{request_logging_middleware, security_headers_middleware};
use jamroom_server::persistence::Persistence;
use jamroom_server::provider::ProviderGateway;
use jamroom_server::queue::Track;
use jamroom_server::room::reconciliation::ReconciliationLoop;
use jamroom_server::room::Room;
use jamroom_server::room::commands;
use jamroom_server::transport;
use jamroom_server::AppState;
use tokio::signal;
use tokio::sync::Mutex;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let config = Arc::new(Config::from_env().map_err(|e| format!("configuration error: {e}"))?);
    init_logging(config.log_format);
    info!("configuration loaded");

    let state = create_app_state(config.clone()).await?;
    info!("application state initialized");

    start_background_tasks(&state).await;

    let app = create_router(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], config.listen_port));
    info!(%addr, "listening");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;

    info!("server stopped");
    Ok(())
}

fn init_logging(format: LogFormat) {
    let default_directive = "jamroom_server=info,tower_http=info".to_string();
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| default_directive.into());
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Compact => registry.with(tracing_subscriber::fmt::layer().with_target(false).compact()).init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer().with_target(false)).init(),
    }
}

async fn create_app_state(config: Arc<Config>) -> std::result::Result<Arc<AppState>, Box<dyn std::error::Error>> {
    let metrics = Arc::new(Metrics::new());
    let provider = ProviderGateway::new(
        config.provider_client_id.clone(),
        config.provider_client_secret.clone(),
        config.provider_redirect_uri.clone(),
        metrics.clone(),
    );
    let persistence = Arc::new(Persistence::new(config.data_dir.clone()));

    let mut room = Room::new();
    persistence.load_into(&mut room, &provider).await;

    if room.queue.fallback_is_empty() {
        if let Some(conductor) = room.sessions.first_provider_capable() {
            if let jamroom_server::session::Identity::Provider { access_token, .. } = conductor.identity.as_ref().unwrap() {
                let access_token = access_token.clone();
                match seed_fallback_queue(&provider, &access_token, &config.fallback_playlist_uri).await {
                    Ok((tracks, name)) => room.queue.refill_fallback(tracks, name),
                    Err(err) => warn!(%err, "failed to seed fallback queue at startup"),
                }
            }
        }
    }

    Ok(Arc::new(AppState {
        config,
        room: Arc::new(Mutex::new(room)),
        provider,
        persistence,
        reconciliation: Arc::new(ReconciliationLoop::new()),
        metrics,
        start_time: StartTime::now(),
    }))
}

async fn seed_fallback_queue(
    provider: &ProviderGateway,
    access_token: &str,
    playlist_uri: &str,
) -> jamroom_server::Result<(Vec<Track>, Option<String>)> {
    let Some(parsed) = provider.parse(playlist_uri) else {
        return Err(jamroom_server::AppError::InvalidInput { message: format!("unparseable fallback playlist uri: {playlist_uri}") });
    };
    let info = provider.playlist_info(access_token, &parsed.id).await?;
    let tracks = provider
        .playlist_tracks(access_token, &parsed.id)
        .await?
        .into_iter()
        .map(|t| Track::new_fallback(t.uri, t.name, t.artist, t.album, t.album_art_url))
        .collect();
    Ok((tracks, Some(info.name)))
}

async fn start_background_tasks(state: &Arc<AppState>) {
    {
        let mut room = state.room.lock().await;
        state.persistence.refresh_all_credentials(&mut room, &state.provider).await;
    }

    let refresh_state = state.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(30 * 60));
        loop {
            ticker.tick().await;
            let mut room = refresh_state.room.lock().await;
            refresh_state.persistence.refresh_all_credentials(&mut room, &refresh_state.provider).await;
        }
    });

    let sweep_state = state.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(sweep_state.config.heartbeat_sweep_interval);
        loop {
            ticker.tick().await;
            commands::heartbeat_sweep(&sweep_state).await;
        }
    });

    state
        .reconciliation
        .restart(state.room.clone(), state.provider.clone(), state.config.clone(), state.persistence.clone(), state.metrics.clone())
        .await;

    info!("background tasks started");
}

fn create_router(state: Arc<AppState>) -> Router {
    let cors = build_cors_layer(&state.config.allowed_origins);

    let http_middleware = ServiceBuilder::new()
        .layer(TimeoutLayer::new(Duration::from_secs(30)))
        .layer(cors)
        .layer(axum::middleware::from_fn(security_headers_middleware))
        .layer(axum::middleware::from_fn_with_state(state.clone(), request_logging_middleware));

    let http_routes = Router::new()
        .route("/submit-track", post(transport::http::submit_track))
        .route("/listener-login", post(transport::http::listener_login))
        .route("/session/:id", get(transport::http::session_status))
        .route("/master-random-liked", post(transport::http::master_random_liked))
        .route("/airhorns", get(transport::http::airhorns))
        .route("/login", get(transport::http::login))
        .route("/callback", get(transport::http::callback))
        .route("/health", get(health::health))
        .route("/metrics", get(metrics_endpoint))
        .layer(http_middleware);

    Router::new().route("/ws", get(transport::ws::upgrade)).merge(http_routes).with_state(state)
}

/// Permit-all with a logged warning when no allow-list is configured;
/// otherwise restrict to the configured origins exactly.
fn build_cors_layer(allowed_origins: &[String]) -> CorsLayer {
    if allowed_origins.is_empty() {
        warn!("CORS configured to allow any origin; set ALLOWED_ORIGINS to restrict");
        return CorsLayer::new().allow_origin(Any).allow_methods([Method::GET, Method::POST]).allow_headers([header::CONTENT_TYPE]);
    }

    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|o| match o.parse::<HeaderValue>() {
            Ok(v) => Some(v),
            Err(err) => {
                warn!(origin = %o, %err, "skipping unparseable ALLOWED_ORIGINS entry");
                None
            }
        })
        .collect();

    CorsLayer::new().allow_origin(origins).allow_methods([Method::GET, Method::POST]).allow_headers([header::CONTENT_TYPE])
}

async fn metrics_endpoint(State(state): State<Arc<AppState>>) -> Json<jamroom_server::metrics::MetricsSnapshot> {
    Json(state.metrics.snapshot())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received ctrl-c, shutting down"),
        _ = terminate => info!("received sigterm, shutting down"),
    }
}
