use crate::app_state::AppState;
use crate::config::ManagementSettings;
use crate::error::{Context, Result};
use crate::metrics::{metrics as metrics_collector, render_prometheus};
use axum::http::{header::CONTENT_TYPE, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Extension, Json, Router};
use chrono::Utc;
use serde_json::json;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

pub const LIVE_PATH: &str = "/healthz";
pub const READY_PATH: &str = "/readyz";
pub const STATUS_PATH: &str = "/status";
pub const METRICS_PATH: &str = "/metrics";

pub struct ManagementServer {
    addr: SocketAddr,
}

impl ManagementServer {
    pub fn build(settings: &ManagementSettings) -> Result<Option<Self>> {
        if !settings.enabled {
            return Ok(None);
        }

        let addr: SocketAddr = format!("{}:{}", settings.host, settings.port)
            .parse()
            .with_context(|| {
                format!(
                    "invalid management listen address {}:{}",
                    settings.host, settings.port
                )
            })?;

        Ok(Some(Self { addr }))
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub async fn serve(self, state: AppState, shutdown: CancellationToken) -> Result<()> {
        let listener = TcpListener::bind(self.addr)
            .await
            .with_context(|| format!("failed to bind management listener on {}", self.addr))?;
        serve_listener(listener, state, shutdown).await
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route(LIVE_PATH, get(live))
        .route(READY_PATH, get(ready))
        .route(STATUS_PATH, get(status_report))
        .route(METRICS_PATH, get(metrics))
        .layer(Extension(state))
}

pub async fn serve_listener(
    listener: TcpListener,
    state: AppState,
    shutdown: CancellationToken,
) -> Result<()> {
    let addr = listener
        .local_addr()
        .context("management listener has no local address")?;
    tracing::info!("management server listening on {}", addr);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            shutdown.cancelled().await;
        })
        .await
        .context("management server exited abnormally")?;

    Ok(())
}

async fn live() -> impl IntoResponse {
    (StatusCode::OK, Json(json!({ "status": "ok" })))
}

async fn ready(Extension(state): Extension<AppState>) -> impl IntoResponse {
    let loops = state.snapshot();
    let pending: Vec<&str> = loops
        .iter()
        .filter(|(_, status)| !status.synced)
        .map(|(kind, _)| *kind)
        .collect();

    if pending.is_empty() {
        (StatusCode::OK, Json(json!({ "state": "READY" })))
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "state": "NOT_READY", "pending": pending })),
        )
    }
}

async fn status_report(Extension(state): Extension<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(json!({
            "ready": state.is_ready(),
            "loops": state.snapshot(),
            "ts": Utc::now().to_rfc3339(),
        })),
    )
}

async fn metrics() -> impl IntoResponse {
    let body = render_prometheus(&metrics_collector().snapshot());
    (
        StatusCode::OK,
        [(CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_server_is_not_built() {
        let settings = ManagementSettings {
            enabled: false,
            host: "0.0.0.0".to_string(),
            port: 8080,
        };
        assert!(ManagementServer::build(&settings).expect("build").is_none());
    }

    #[test]
    fn invalid_host_is_reported() {
        let settings = ManagementSettings {
            enabled: true,
            host: "not a host".to_string(),
            port: 8080,
        };
        let err = ManagementServer::build(&settings)
            .err()
            .expect("invalid address");
        assert!(err.to_string().contains("invalid management listen address"));
    }
}
