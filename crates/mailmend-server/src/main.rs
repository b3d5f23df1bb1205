use std::{env, net::SocketAddr, sync::Arc};

use axum::{Json, Router, extract::State, http::StatusCode, routing::get};
use mailmend_core::llm::GenaiLLMClient;
use mailmend_core::repair::{LibsqlRepairStore, RepairAgent};
use mailmend_core::{Config, Database, init_telemetry, migrations};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

mod api;

#[derive(Clone)]
struct AppState {
    db: Database,
    agent: Arc<RepairAgent>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config_path = env::var("CONFIG_PATH").unwrap_or_else(|_| "config.toml".to_string());
    let config = Config::load(&config_path)?;

    let _guard = init_telemetry(&config.app, &config.telemetry)?;

    let db = Database::new(&config.paths.database).await?;
    migrations::run_migrations(&db).await?;

    let llm = Arc::new(GenaiLLMClient::new(&config.model));
    let store = Arc::new(LibsqlRepairStore::new(db.clone()));
    let agent = Arc::new(RepairAgent::new(
        llm,
        store,
        config.model.clone(),
        config.repair.clone(),
    ));

    let state = AppState {
        db: db.clone(),
        agent,
    };
    let app = router(state);

    let shutdown = CancellationToken::new();
    let addr = SocketAddr::from(([0, 0, 0, 0], config.app.port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("mailmend listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await?;

    shutdown.cancel();
    Ok(())
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .nest("/api", api::router(state.clone()))
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    database: String,
}

async fn healthz(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let db_status = match state.db.health_check().await {
        Ok(_) => "ok",
        Err(_) => "unhealthy",
    };

    let status = if db_status == "ok" {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(HealthResponse {
            status: if db_status == "ok" {
                "healthy".to_string()
            } else {
                "unhealthy".to_string()
            },
            version: env!("CARGO_PKG_VERSION").to_string(),
            database: db_status.to_string(),
        }),
    )
}

async fn shutdown_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        let mut sigterm = signal(SignalKind::terminate()).expect("install SIGTERM handler");
        sigterm.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            warn!("received ctrl+c, shutting down");
        }
        _ = terminate => {
            warn!("received terminate signal, shutting down");
        }
    }

    shutdown.cancel();
}

#[cfg(test)]
mod tests {
    use super::*;
    use mailmend_core::config::{ModelConfig, RepairConfig};
    use mailmend_core::llm::MockLLMClient;
    use tempfile::TempDir;

    async fn test_state(dir: &TempDir) -> AppState {
        let db_path = dir.path().join("db.sqlite");
        let db = Database::new(&db_path).await.expect("db");
        migrations::run_migrations(&db).await.expect("migrations");

        let agent = Arc::new(RepairAgent::new(
            Arc::new(MockLLMClient::new()),
            Arc::new(LibsqlRepairStore::new(db.clone())),
            ModelConfig {
                provider: "OpenAI".into(),
                model: "gpt-4o-mini".into(),
                temperature: 0.2,
                max_output_tokens: 512,
            },
            RepairConfig::default(),
        ));

        AppState { db, agent }
    }

    #[tokio::test]
    async fn healthz_reports_ok_when_database_is_reachable() {
        let dir = TempDir::new().expect("temp dir");
        let state = test_state(&dir).await;
        let (status, Json(body)) = healthz(State(state)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.status, "healthy");
        assert_eq!(body.database, "ok");
    }
}
