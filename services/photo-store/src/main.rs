//! Photo Store
//!
//! Single-binary Rust service that:
//! 1. Loads configuration and the stored SkyDrive token
//! 2. Walks the operator through the SkyDrive authorization flow
//! 3. Stores photos through the local + SkyDrive backend
//!    (originals on SkyDrive only, resized versions in both places)
//! 4. Reports backend diagnostics on /health and Prometheus metrics on /metrics

mod config;
mod error;
mod metrics;
mod photos;
mod setup;

use anyhow::{Context, Result};
use axum::Router;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use metrics_exporter_prometheus::PrometheusHandle;
use photo_fs::{FileSystem, LocalFileSystem, LocalSkyDriveFileSystem, SkyDriveFileSystem};
use skydrive::SkyDriveApi;
use skydrive_auth::TokenStore;

use crate::config::Config;
use crate::setup::PendingAuthorizations;

/// How long in-flight requests may take to finish after a shutdown signal.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Shared state for all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub api: Arc<SkyDriveApi>,
    pub fs: Arc<dyn FileSystem>,
    pub pending: PendingAuthorizations,
    /// Where uploaded bodies are spooled before being handed to the backend
    pub upload_dir: PathBuf,
    pub prometheus: PrometheusHandle,
    pub started_at: Instant,
}

/// Build the axum router with all routes and shared state.
///
/// Applies a concurrency limit layer based on `max_connections` and raises
/// the body limit to `max_upload_bytes` for photo uploads.
fn build_router(state: AppState, max_connections: usize, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route("/skydrive/authorize", get(setup::authorize))
        .route("/skydrive/callback", get(setup::callback))
        .route("/photos/initialize", post(photos::initialize))
        .route("/photos/delete", post(photos::delete_photo))
        .route("/photos/download", post(photos::download_photo))
        .route(
            "/photos/{*remote_path}",
            get(photos::get_photo).put(photos::put_photo),
        )
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(tower::limit::ConcurrencyLimitLayer::new(max_connections))
        .with_state(state)
}

/// Wire the SkyDrive client and the storage backend from configuration.
async fn build_state(config: &Config, prometheus: PrometheusHandle) -> Result<AppState> {
    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.server.timeout_secs))
        .build()
        .context("failed to build HTTP client")?;

    let skydrive_config = &config.skydrive;
    let oauth = skydrive_config.oauth_client()?;
    let store = TokenStore::load(skydrive_config.token_path.clone())
        .await
        .with_context(|| {
            format!(
                "failed to load token file {}",
                skydrive_config.token_path.display()
            )
        })?;

    let mut api = SkyDriveApi::new(http, oauth).with_token_store(Arc::new(store));
    if let Some(base) = &skydrive_config.api_base_url {
        api = api.with_api_base(base);
    }
    if let Some(refresh_token) = &skydrive_config.refresh_token {
        api = api.with_refresh_token(refresh_token.clone());
    }
    let api = Arc::new(api);

    let fs = LocalSkyDriveFileSystem::new(
        SkyDriveFileSystem::new(api.clone()).with_folder(&skydrive_config.folder),
        LocalFileSystem::new(&config.localfs.root, &config.localfs.host),
    );

    Ok(AppState {
        api,
        fs: Arc::new(fs),
        pending: PendingAuthorizations::default(),
        upload_dir: std::env::temp_dir(),
        prometheus,
        started_at: Instant::now(),
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and LOG_LEVEL / RUST_LOG support
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("starting photo-store");

    // Install Prometheus metrics recorder before any metrics are emitted
    let prometheus_handle = metrics::install_recorder();

    // CLI: simple --config flag parsing
    let args: Vec<String> = std::env::args().collect();
    let cli_config_path = args
        .iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str());

    let config_path = Config::resolve_path(cli_config_path);
    info!(path = %config_path.display(), "loading configuration");

    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    info!(
        listen_addr = %config.server.listen_addr,
        folder = %config.skydrive.folder,
        local_root = %config.localfs.root.display(),
        token_path = %config.skydrive.token_path.display(),
        "configuration loaded"
    );

    let state = build_state(&config, prometheus_handle).await?;
    if state.api.is_access_token_expired().await && !state.api.has_refresh_token().await {
        warn!("no SkyDrive token yet, open /skydrive/authorize to connect an account");
    }

    let listen_addr = config.server.listen_addr;
    let app = build_router(
        state,
        config.server.max_connections,
        config.server.max_upload_bytes,
    );

    let listener = TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("failed to bind to {listen_addr}"))?;
    info!(addr = %listen_addr, "accepting requests");

    // The drain timeout starts when the shutdown signal fires, not when the
    // server starts.
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
    });

    shutdown_signal().await;
    let _ = shutdown_tx.send(());

    match tokio::time::timeout(DRAIN_TIMEOUT, server_handle).await {
        Ok(Ok(Ok(()))) => {
            info!("all in-flight requests drained");
        }
        Ok(Ok(Err(e))) => {
            error!(error = %e, "server error during shutdown");
        }
        Ok(Err(e)) => {
            error!(error = %e, "server task panicked");
        }
        Err(_) => {
            warn!(
                drain_timeout_secs = DRAIN_TIMEOUT.as_secs(),
                "drain timeout exceeded, forcing shutdown"
            );
        }
    }

    info!("shutdown complete");
    Ok(())
}

/// Health endpoint: backend identity and diagnostics.
/// Returns 200 when no diagnostic failed, 503 otherwise.
async fn health_handler(State(state): State<AppState>) -> Response {
    let started = Instant::now();
    let diagnostics = state.fs.diagnostics().await;
    let healthy = !diagnostics.iter().any(|d| d.is_failure());

    let (status_code, status) = if healthy {
        (StatusCode::OK, "healthy")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "degraded")
    };
    let body = serde_json::json!({
        "status": status,
        "identity": state.fs.identity(),
        "diagnostics": diagnostics,
        "uptime_seconds": state.started_at.elapsed().as_secs(),
    });

    let response = (
        status_code,
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
        .into_response();
    metrics::finish("health", started, response)
}

/// Prometheus metrics endpoint, text exposition format.
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        state.prometheus.render(),
    )
}

/// Wait for SIGTERM or SIGINT for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use common::Secret;
    use serde_json::{Value, json};
    use skydrive_auth::{AccessToken, OAuthClient, unix_now};
    use tower::ServiceExt;
    use wiremock::matchers::{method, path, path_regex, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// Create a PrometheusHandle for tests without installing a global recorder.
    fn test_prometheus_handle() -> PrometheusHandle {
        let recorder = metrics_exporter_prometheus::PrometheusBuilder::new().build_recorder();
        recorder.handle()
    }

    struct TestApp {
        dir: tempfile::TempDir,
        state: AppState,
        server: MockServer,
    }

    impl TestApp {
        fn router(&self) -> Router {
            build_router(self.state.clone(), 16, 1024 * 1024)
        }

        fn local_root(&self) -> PathBuf {
            self.dir.path().join("photos")
        }
    }

    /// App wired to a wiremock SkyDrive; `with_token` seeds a valid access token.
    async fn test_app(with_token: bool) -> TestApp {
        let server = MockServer::start().await;
        let dir = tempfile::tempdir().unwrap();

        let oauth = OAuthClient::new(
            "cid",
            Secret::from("csecret"),
            "https://photos.example.com/skydrive/callback",
        )
        .with_endpoints(
            format!("{}/oauth20_authorize.srf", server.uri()),
            format!("{}/oauth20_token.srf", server.uri()),
        );
        let store = TokenStore::load(dir.path().join("token.json")).await.unwrap();
        let api = SkyDriveApi::new(reqwest::Client::new(), oauth)
            .with_api_base(format!("{}/v5.0/", server.uri()))
            .with_token_store(Arc::new(store));
        if with_token {
            api.set_access_token(AccessToken {
                token_type: "bearer".into(),
                expires_in: 3600,
                scope: "wl.basic".into(),
                access_token: "at".into(),
                refresh_token: None,
                authentication_token: None,
                created: unix_now(),
            })
            .await;
        }
        let api = Arc::new(api);

        let spool = dir.path().join("spool");
        std::fs::create_dir_all(&spool).unwrap();
        let fs = LocalSkyDriveFileSystem::new(
            SkyDriveFileSystem::new(api.clone()).with_temp_dir(dir.path()),
            LocalFileSystem::new(dir.path().join("photos"), "photos.example.com")
                .with_temp_dir(dir.path()),
        );

        let state = AppState {
            api,
            fs: Arc::new(fs),
            pending: PendingAuthorizations::default(),
            upload_dir: spool,
            prometheus: test_prometheus_handle(),
            started_at: Instant::now(),
        };
        TestApp { dir, state, server }
    }

    async fn mount_folder(server: &MockServer) {
        Mock::given(method("GET"))
            .and(path("/v5.0/me/skydrive/files"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{"id": "folder.tb", "name": "trovebox", "type": "folder"}]
            })))
            .mount(server)
            .await;
    }

    async fn body_json(response: Response) -> Value {
        let body = axum::body::to_bytes(response.into_body(), 1024 * 1024)
            .await
            .unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    async fn body_bytes(response: Response) -> Vec<u8> {
        axum::body::to_bytes(response.into_body(), 1024 * 1024)
            .await
            .unwrap()
            .to_vec()
    }

    #[tokio::test]
    async fn health_is_degraded_without_token() {
        let app = test_app(false).await;
        let response = app
            .router()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let json = body_json(response).await;
        assert_eq!(json["status"], "degraded");
        assert_eq!(json["identity"], json!(["skydrive", "local"]));
        assert_eq!(json["diagnostics"][0]["label"], "skydrive token");
        assert_eq!(json["diagnostics"][0]["status"], "fail");
    }

    #[tokio::test]
    async fn health_is_healthy_when_all_checks_pass() {
        let app = test_app(true).await;
        Mock::given(method("GET"))
            .and(path("/v5.0/me"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"id": "u1", "name": "Jane"})),
            )
            .mount(&app.server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v5.0/me/skydrive/quota"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"quota": 100, "available": 50})),
            )
            .mount(&app.server)
            .await;
        std::fs::create_dir_all(app.local_root()).unwrap();

        let response = app
            .router()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["status"], "healthy");
        assert_eq!(json["diagnostics"].as_array().unwrap().len(), 5);
        assert!(json["uptime_seconds"].is_u64());
    }

    #[tokio::test]
    async fn metrics_endpoint_returns_prometheus_format() {
        let app = test_app(false).await;
        let response = app
            .router()
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let content_type = response.headers()["content-type"].to_str().unwrap();
        assert!(content_type.starts_with("text/plain"));
    }

    #[tokio::test]
    async fn authorize_redirects_with_state() {
        let app = test_app(false).await;
        let response = app
            .router()
            .oneshot(
                Request::builder()
                    .uri("/skydrive/authorize")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::FOUND);
        let location = response.headers()["location"].to_str().unwrap();
        assert!(location.contains("/oauth20_authorize.srf?"), "got: {location}");
        assert!(location.contains("client_id=cid"));
        assert!(location.contains("response_type=code"));
        assert!(location.contains("state="));
    }

    #[tokio::test]
    async fn callback_with_unknown_state_is_rejected() {
        let app = test_app(false).await;
        let response = app
            .router()
            .oneshot(
                Request::builder()
                    .uri("/skydrive/callback?code=abc&state=forged")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = body_json(response).await;
        assert_eq!(json["error"]["type"], "authorization_error");
        assert!(json["error"]["request_id"].as_str().unwrap().starts_with("req_"));
    }

    #[tokio::test]
    async fn callback_reports_denied_access() {
        let app = test_app(false).await;
        let response = app
            .router()
            .oneshot(
                Request::builder()
                    .uri("/skydrive/callback?error=access_denied&error_description=The%20user%20denied")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = body_json(response).await;
        assert!(json["error"]["message"].as_str().unwrap().contains("access_denied"));
    }

    #[tokio::test]
    async fn callback_exchanges_code_and_persists_token() {
        let app = test_app(false).await;
        Mock::given(method("POST"))
            .and(path("/oauth20_token.srf"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "token_type": "bearer",
                "expires_in": 3600,
                "access_token": "at_new",
                "refresh_token": "rt_new"
            })))
            .expect(1)
            .mount(&app.server)
            .await;

        let state = app.state.pending.issue().await;
        let response = app
            .router()
            .oneshot(
                Request::builder()
                    .uri(format!("/skydrive/callback?code=code-1&state={state}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["status"], "authorized");
        assert!(json["expires_at"].as_u64().unwrap() > unix_now());
        assert!(app.dir.path().join("token.json").exists());
        assert!(!app.state.api.is_access_token_expired().await);
    }

    #[tokio::test]
    async fn put_then_get_resized_photo() {
        let app = test_app(true).await;
        mount_folder(&app.server).await;
        Mock::given(method("PUT"))
            .and(path("/v5.0/folder.tb/files/abc-img_base.jpg"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": "file.b"})))
            .expect(1)
            .mount(&app.server)
            .await;

        let response = app
            .router()
            .oneshot(
                Request::builder()
                    .method("PUT")
                    .uri("/photos/base/201310/abc-img_base.jpg")
                    .header("x-date-taken", "1381000000")
                    .body(Body::from("resized-bytes"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let json = body_json(response).await;
        assert_eq!(json["remote_file"], "/base/201310/abc-img_base.jpg");
        assert!(app.local_root().join("base/201310/abc-img_base.jpg").exists());

        let response = app
            .router()
            .oneshot(
                Request::builder()
                    .uri("/photos/base/201310/abc-img_base.jpg")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_bytes(response).await, b"resized-bytes");

        // spooled uploads are cleaned up
        let leftover = std::fs::read_dir(&app.state.upload_dir).unwrap().count();
        assert_eq!(leftover, 0);
    }

    #[tokio::test]
    async fn put_original_goes_to_skydrive_only() {
        let app = test_app(true).await;
        mount_folder(&app.server).await;
        Mock::given(method("PUT"))
            .and(path_regex(r"^/v5\.0/folder\.tb/files/abc-img\.jpg$"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": "file.o"})))
            .expect(1)
            .mount(&app.server)
            .await;

        let response = app
            .router()
            .oneshot(
                Request::builder()
                    .method("PUT")
                    .uri("/photos/original/201310/abc-img.jpg")
                    .body(Body::from("original-bytes"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        assert!(!app.local_root().join("original/201310/abc-img.jpg").exists());
    }

    #[tokio::test]
    async fn put_with_bad_date_taken_is_rejected() {
        let app = test_app(true).await;
        let response = app
            .router()
            .oneshot(
                Request::builder()
                    .method("PUT")
                    .uri("/photos/base/a.jpg")
                    .header("x-date-taken", "last tuesday")
                    .body(Body::from("x"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = body_json(response).await;
        assert_eq!(json["error"]["type"], "invalid_request");
    }

    #[tokio::test]
    async fn get_missing_photo_is_not_found() {
        let app = test_app(true).await;
        let response = app
            .router()
            .oneshot(
                Request::builder()
                    .uri("/photos/base/missing.jpg")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let json = body_json(response).await;
        assert_eq!(json["error"]["type"], "not_found");
    }

    #[tokio::test]
    async fn download_returns_original_from_skydrive() {
        let app = test_app(true).await;
        mount_folder(&app.server).await;
        Mock::given(method("GET"))
            .and(path("/v5.0/folder.tb/files"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{"id": "file.o", "name": "abc-img.jpg", "type": "photo"}]
            })))
            .mount(&app.server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v5.0/file.o/content"))
            .and(query_param("download", "true"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"original-bytes".to_vec()))
            .mount(&app.server)
            .await;

        let response = app
            .router()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/photos/download")
                    .header("content-type", "application/json")
                    .body(Body::from(
                        json!({"id": "abc", "paths": {"original": "/original/201310/abc-img.jpg"}})
                            .to_string(),
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_bytes(response).await, b"original-bytes");
    }

    #[tokio::test]
    async fn delete_removes_from_both_backends() {
        let app = test_app(true).await;
        mount_folder(&app.server).await;
        Mock::given(method("GET"))
            .and(path("/v5.0/folder.tb/files"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [
                    {"id": "file.o", "name": "abc-img.jpg", "type": "photo"},
                    {"id": "file.b", "name": "abc-img_base.jpg", "type": "photo"}
                ]
            })))
            .mount(&app.server)
            .await;
        Mock::given(method("DELETE"))
            .respond_with(ResponseTemplate::new(204))
            .expect(2)
            .mount(&app.server)
            .await;

        let base = app.local_root().join("base/201310");
        std::fs::create_dir_all(&base).unwrap();
        std::fs::write(base.join("abc-img_base.jpg"), b"x").unwrap();

        let response = app
            .router()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/photos/delete")
                    .header("content-type", "application/json")
                    .body(Body::from(
                        json!({"id": "abc", "paths": {
                            "original": "/original/201310/abc-img.jpg",
                            "base": "/base/201310/abc-img_base.jpg"
                        }})
                        .to_string(),
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["status"], "deleted");
        assert!(!base.join("abc-img_base.jpg").exists());
    }

    #[tokio::test]
    async fn initialize_without_token_is_unavailable() {
        let app = test_app(false).await;
        let response = app
            .router()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/photos/initialize")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"edit_mode":true}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let json = body_json(response).await;
        assert_eq!(json["error"]["type"], "skydrive_unauthorized");
    }

    #[tokio::test]
    async fn initialize_prepares_folder_and_root() {
        let app = test_app(true).await;
        mount_folder(&app.server).await;
        let response = app
            .router()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/photos/initialize")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(app.local_root().is_dir());
    }
}
