#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Method, Request};
use axum::response::Response;
use axum::Router;
use cmctl_core::error::CoreError;
use cmctl_core::process::CommandSpec;
use cmctl_core::status::ServiceStatus;
use cmctl_supervisor::{
    LogFollower, RestartCommands, RestartCoordinator, SessionTiming, StatusProbe, Ticker,
};
use http_body_util::BodyExt;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

use cmctl_api::config::ServerConfig;
use cmctl_api::router::build_app_router;
use cmctl_api::state::AppState;

/// Build a test `ServerConfig` with safe defaults.
pub fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:8888".to_string()],
        request_timeout_secs: 30,
        shutdown_timeout_secs: 5,
        stream_poll_millis: 50,
    }
}

// ---------------------------------------------------------------------------
// Collaborator fakes
// ---------------------------------------------------------------------------

/// Always reports the same status.
pub struct FixedStatus(pub ServiceStatus);

impl FixedStatus {
    pub fn running() -> Arc<Self> {
        Arc::new(Self(ServiceStatus::running("ContainerManager   running")))
    }

    pub fn stopped() -> Arc<Self> {
        Arc::new(Self(ServiceStatus::stopped("ContainerManager   stopped")))
    }
}

#[async_trait]
impl StatusProbe for FixedStatus {
    async fn poll(&self) -> ServiceStatus {
        self.0.clone()
    }
}

/// Follower that never produces lines.
pub struct QuietFollower;

#[async_trait]
impl LogFollower for QuietFollower {
    async fn start(&mut self) -> Result<(), CoreError> {
        Ok(())
    }

    fn read_line_nonblocking(&mut self) -> Option<String> {
        None
    }

    async fn stop(&mut self) {}

    fn is_running(&self) -> bool {
        false
    }
}

pub struct InstantTicker;

#[async_trait]
impl Ticker for InstantTicker {
    async fn sleep(&self, _period: Duration) {
        tokio::task::yield_now().await;
    }
}

// ---------------------------------------------------------------------------
// App builders
// ---------------------------------------------------------------------------

pub struct TestApp {
    pub router: Router,
    pub coordinator: Arc<RestartCoordinator>,
}

/// Build the full application router with the production middleware stack,
/// using `probe` both for restart sessions and the status query.
pub fn build_test_app(probe: Arc<dyn StatusProbe>) -> TestApp {
    let commands = RestartCommands {
        restart: CommandSpec::shell("echo restarting primary"),
        fallback: CommandSpec::shell("echo restarting fallback"),
        reload: CommandSpec::shell("true"),
        timeout: Duration::from_secs(10),
    };
    let timing = SessionTiming {
        drain_tick: Duration::from_millis(10),
        drain_ticks: 50,
        settle_delay: Duration::ZERO,
        status_interval: Duration::ZERO,
        summary_every: 5,
    };
    let coordinator = Arc::new(
        RestartCoordinator::new(commands, Arc::clone(&probe), Box::new(QuietFollower))
            .with_ticker(Arc::new(InstantTicker))
            .with_timing(timing),
    );

    let config = test_config();
    let state = AppState {
        config: Arc::new(config.clone()),
        coordinator: Arc::clone(&coordinator),
        status_probe: probe,
        shutdown: CancellationToken::new(),
    };

    TestApp {
        router: build_app_router(state, &config),
        coordinator,
    }
}

// ---------------------------------------------------------------------------
// Request helpers
// ---------------------------------------------------------------------------

pub async fn get(app: Router, uri: &str) -> Response {
    send(app, Method::GET, uri).await
}

pub async fn post(app: Router, uri: &str) -> Response {
    send(app, Method::POST, uri).await
}

async fn send(app: Router, method: Method, uri: &str) -> Response {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    app.oneshot(request).await.unwrap()
}

pub async fn body_text(response: Response) -> String {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

pub async fn body_json(response: Response) -> serde_json::Value {
    serde_json::from_str(&body_text(response).await).unwrap()
}

pub async fn wait_until_idle(coordinator: &RestartCoordinator) {
    for _ in 0..1000 {
        if !coordinator.is_active() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("coordinator still active after 5s");
}
