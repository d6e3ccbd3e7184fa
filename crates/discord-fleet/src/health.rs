//! Health check endpoint

use std::time::SystemTime;

use axum::{Json, Router, extract::State, http::StatusCode, routing::get};
use serde::{Deserialize, Serialize};

use crate::snapshot::FleetCaches;

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub cluster_id: u32,
    pub leader: bool,
    pub uptime_secs: u64,
    pub banned_users: usize,
    pub banned_guilds: usize,
    pub categories: usize,
}

/// Shared application state for health checks
#[derive(Clone)]
pub struct AppState {
    pub start_time: SystemTime,
    pub cluster_id: u32,
    pub leader: bool,
    pub caches: FleetCaches,
}

impl AppState {
    pub fn new(cluster_id: u32, leader: bool, caches: FleetCaches) -> Self {
        Self {
            start_time: SystemTime::now(),
            cluster_id,
            leader,
            caches,
        }
    }

    pub fn status(&self) -> HealthStatus {
        let bans = self.caches.bans.load();
        HealthStatus {
            status: "ok".to_string(),
            cluster_id: self.cluster_id,
            leader: self.leader,
            uptime_secs: self.start_time.elapsed().unwrap_or_default().as_secs(),
            banned_users: bans.users.len(),
            banned_guilds: bans.guilds.len(),
            categories: self.caches.categories.load().len(),
        }
    }
}

async fn health_handler(State(state): State<AppState>) -> (StatusCode, Json<HealthStatus>) {
    (StatusCode::OK, Json(state.status()))
}

async fn live_handler() -> StatusCode {
    StatusCode::OK
}

/// Create the health check router
pub fn create_health_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/live", get(live_handler))
        .with_state(state)
}

/// Start the health check server
pub async fn start_health_server(state: AppState, port: u16) -> anyhow::Result<()> {
    let app = create_health_router(state);
    let addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Health check server listening on {}", addr);
    axum::serve(listener, app).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::{BanList, CategorySet};

    #[test]
    fn test_status_reflects_published_snapshots() {
        let caches = FleetCaches::new();
        let state = AppState::new(3, false, caches.clone());

        let mut bans = BanList::default();
        bans.users.extend([1, 2]);
        bans.guilds.insert(9);
        caches.bans.publish(bans);
        caches.categories.publish(CategorySet::from_iter([5, 6, 7]));

        let status = state.status();
        assert_eq!(status.status, "ok");
        assert_eq!(status.cluster_id, 3);
        assert!(!status.leader);
        assert_eq!(status.banned_users, 2);
        assert_eq!(status.banned_guilds, 1);
        assert_eq!(status.categories, 3);
    }

    #[test]
    fn test_health_status_serde() {
        let status = AppState::new(1, true, FleetCaches::new()).status();
        let json = serde_json::to_string(&status).unwrap();
        let back: HealthStatus = serde_json::from_str(&json).unwrap();
        assert_eq!(back.cluster_id, 1);
        assert!(back.leader);
        assert_eq!(back.banned_users, 0);
    }

    #[tokio::test]
    async fn test_health_server_answers() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = create_health_router(AppState::new(2, true, FleetCaches::new()));
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let client = reqwest::Client::new();
        let live = client.get(format!("http://{addr}/live")).send().await.unwrap();
        assert_eq!(live.status(), 200);

        let status: HealthStatus = client
            .get(format!("http://{addr}/health"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(status.cluster_id, 2);
        assert!(status.leader);
    }
}
