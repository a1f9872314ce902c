//! HTTP and WebSocket server.
//!
//! One axum router serves both surfaces of the relay:
//!
//! ```text
//! phone --POST /push/{account}--> DeliveryService --> ConnectionRegistry
//!                                                          |
//! browser <--GET /ws/{device_id}?token=-- ListenerSession <-+
//! ```
//!
//! Shutdown is driven by a [`CancellationToken`]: SIGINT or SIGTERM cancels it,
//! every registered listener is closed with 1001, and axum drains in-flight
//! requests.

use anyhow::Result;
use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use codebridge_core::{
    AccountStore, ConnectionRegistry, DeliveryService, IdentityVerifier, InMemoryAccountStore,
};
use serde_json::json;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::{
    compression::CompressionLayer,
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::{error, info, warn, Level};

use crate::auth::HmacTokenVerifier;
use crate::config::ServerConfig;

pub mod routes;

/// Shared state for every route.
pub struct AppState {
    pub registry: Arc<ConnectionRegistry>,
    pub delivery: DeliveryService,
    pub verifier: Arc<dyn IdentityVerifier>,
}

impl AppState {
    pub fn new(accounts: Arc<dyn AccountStore>, verifier: Arc<dyn IdentityVerifier>) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        let delivery = DeliveryService::new(registry.clone(), accounts);
        Self {
            registry,
            delivery,
            verifier,
        }
    }
}

/// Build state from config, bind, and serve until a shutdown signal arrives.
pub async fn start(config: ServerConfig) -> Result<()> {
    let verifier: Arc<dyn IdentityVerifier> = match config.token_secret.as_deref() {
        Some(secret) => Arc::new(HmacTokenVerifier::new(secret.as_bytes())),
        None => {
            info!("Generated a random per-process token secret");
            Arc::new(HmacTokenVerifier::random())
        }
    };

    let accounts: InMemoryAccountStore = config.accounts.iter().cloned().collect();
    info!(accounts = accounts.len(), "Account store loaded");

    let state = Arc::new(AppState::new(Arc::new(accounts), verifier));

    let listener = TcpListener::bind(config.bind_addr).await?;
    let stop_token = CancellationToken::new();
    tokio::spawn(shutdown_signal(stop_token.clone()));

    serve(listener, state, &config.cors_origins, stop_token).await
}

/// Serve on an already-bound listener until `stop_token` is cancelled.
pub async fn serve(
    listener: TcpListener,
    state: Arc<AppState>,
    cors_origins: &[String],
    stop_token: CancellationToken,
) -> Result<()> {
    let app = create_router(state.clone(), cors_origins);

    let addr = listener.local_addr()?;
    info!("Starting Axum HTTP server on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            stop_token.cancelled().await;
            let closed = state.registry.shutdown().await;
            info!(closed, "HTTP server received shutdown signal, draining connections");
        })
        .await?;

    info!("HTTP server stopped");
    Ok(())
}

/// Cancel `stop_token` on SIGINT or SIGTERM.
async fn shutdown_signal(stop_token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install SIGINT handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("SIGINT received"),
        _ = terminate => info!("SIGTERM received"),
    }

    stop_token.cancel();
}

/// CORS layer from the configured origin list. No valid origins means permissive.
fn configure_cors(origins: &[String]) -> CorsLayer {
    use tower_http::cors::AllowOrigin;

    if origins.is_empty() {
        return CorsLayer::permissive();
    }

    let allowed: Vec<_> = origins.iter().filter_map(|o| o.parse().ok()).collect();
    if allowed.is_empty() {
        warn!("CODEBRIDGE_CORS_ORIGINS set but no valid origins parsed, falling back to permissive CORS");
        CorsLayer::permissive()
    } else {
        info!(origins = ?allowed, "Configured CORS with explicit allowed origins");
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(allowed))
            .allow_methods(tower_http::cors::Any)
            .allow_headers(tower_http::cors::Any)
    }
}

/// Create the Axum router with all routes and middleware
fn create_router(state: Arc<AppState>, cors_origins: &[String]) -> Router {
    let push_router = routes::push::router(state.clone());
    let websocket_router = routes::websocket::router(state.clone());

    Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_handler))
        .with_state(state)
        .merge(push_router)
        .merge(websocket_router)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(CompressionLayer::new())
        .layer(configure_cors(cors_origins))
}

async fn root_handler() -> impl IntoResponse {
    Json(json!({ "message": "verification code relay is running" }))
}

async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "service": "codebridge-server",
            "version": env!("CARGO_PKG_VERSION"),
            "accounts_online": state.registry.account_count(),
            "connections": state.registry.connection_count(),
        })),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{header, Request};
    use codebridge_core::{AccountId, DeliveryOutcome, ListenerId, PushRequest};
    use futures::StreamExt;
    use http_body_util::BodyExt;
    use std::time::Duration;
    use tokio_tungstenite::tungstenite::Message as WsMessage;
    use tower::ServiceExt;

    const SECRET: &[u8] = b"test-secret";

    pub(crate) fn test_state() -> Arc<AppState> {
        let accounts: InMemoryAccountStore = ["alice", "bob"].into_iter().collect();
        Arc::new(AppState::new(
            Arc::new(accounts),
            Arc::new(HmacTokenVerifier::new(SECRET)),
        ))
    }

    pub(crate) async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let body = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let app = create_router(test_state(), &[]);

        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["status"], "healthy");
        assert_eq!(json["service"], "codebridge-server");
        assert_eq!(json["connections"], 0);
    }

    #[tokio::test]
    async fn test_root_endpoint() {
        let app = create_router(test_state(), &[]);

        let response = app
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["message"], "verification code relay is running");
    }

    #[tokio::test]
    async fn test_push_route_is_mounted() {
        let app = create_router(test_state(), &[]);

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/push/unknown")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(r#"{"code":"1"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_cors_with_explicit_origin() {
        let app = create_router(test_state(), &["https://app.example.com".to_string()]);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .header(header::ORIGIN, "https://app.example.com")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(
            response.headers().get(header::ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(),
            "https://app.example.com"
        );
    }

    async fn spawn_server(state: Arc<AppState>) -> (String, CancellationToken) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let stop_token = CancellationToken::new();
        let token = stop_token.clone();
        tokio::spawn(async move { serve(listener, state, &[], token).await });
        (format!("ws://{}", addr), stop_token)
    }

    async fn wait_until_connected(state: &AppState, account: &str, listener: &str) {
        let account = AccountId::from(account);
        let listener = ListenerId::from(listener);
        tokio::time::timeout(Duration::from_secs(5), async {
            while !state.registry.is_listener_connected(&account, &listener) {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("listener should register");
    }

    async fn next_close_code<S>(stream: &mut S) -> u16
    where
        S: futures::Stream<Item = Result<WsMessage, tokio_tungstenite::tungstenite::Error>> + Unpin,
    {
        let message = tokio::time::timeout(Duration::from_secs(5), stream.next())
            .await
            .expect("close frame in time")
            .expect("stream open")
            .expect("valid frame");
        match message {
            WsMessage::Close(Some(frame)) => u16::from(frame.code),
            other => panic!("expected close frame, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_listener_receives_pushed_code() {
        let state = test_state();
        let (base, _stop) = spawn_server(state.clone()).await;
        let token = HmacTokenVerifier::new(SECRET).issue("alice", None).unwrap();

        let (mut ws, _) = tokio_tungstenite::connect_async(format!("{}/ws/L1?token={}", base, token))
            .await
            .unwrap();
        wait_until_connected(&state, "alice", "L1").await;

        let outcome = state
            .delivery
            .push("alice", PushRequest::new("123456"))
            .await
            .unwrap();
        assert_eq!(outcome, DeliveryOutcome::Delivered { count: 1 });

        let message = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        let WsMessage::Text(text) = message else {
            panic!("expected text frame, got {:?}", message);
        };
        let json: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(json["type"], "VERIFICATION_CODE");
        assert_eq!(json["code"], "123456");

        ws.close(None).await.unwrap();
    }

    #[tokio::test]
    async fn test_invalid_token_closes_with_policy_violation() {
        let state = test_state();
        let (base, _stop) = spawn_server(state.clone()).await;
        let token = HmacTokenVerifier::new(b"wrong-secret").issue("alice", None).unwrap();

        let (mut ws, _) = tokio_tungstenite::connect_async(format!("{}/ws/L1?token={}", base, token))
            .await
            .unwrap();

        assert_eq!(next_close_code(&mut ws).await, 1008);
        assert_eq!(state.registry.connection_count(), 0);
    }

    #[tokio::test]
    async fn test_missing_token_closes_with_policy_violation() {
        let state = test_state();
        let (base, _stop) = spawn_server(state.clone()).await;

        let (mut ws, _) = tokio_tungstenite::connect_async(format!("{}/ws/L1", base))
            .await
            .unwrap();

        assert_eq!(next_close_code(&mut ws).await, 1008);
    }

    #[tokio::test]
    async fn test_newer_connection_supersedes_older() {
        let state = test_state();
        let (base, _stop) = spawn_server(state.clone()).await;
        let token = HmacTokenVerifier::new(SECRET).issue("alice", None).unwrap();
        let url = format!("{}/ws/L1?token={}", base, token);

        let (mut first, _) = tokio_tungstenite::connect_async(url.as_str()).await.unwrap();
        wait_until_connected(&state, "alice", "L1").await;
        let (_second, _) = tokio_tungstenite::connect_async(url.as_str()).await.unwrap();

        assert_eq!(next_close_code(&mut first).await, 1000);
        assert_eq!(state.registry.connection_count(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_closes_listeners() {
        let state = test_state();
        let (base, stop) = spawn_server(state.clone()).await;
        let token = HmacTokenVerifier::new(SECRET).issue("bob", None).unwrap();

        let (mut ws, _) = tokio_tungstenite::connect_async(format!("{}/ws/phone-tab?token={}", base, token))
            .await
            .unwrap();
        wait_until_connected(&state, "bob", "phone-tab").await;

        stop.cancel();

        assert_eq!(next_close_code(&mut ws).await, 1001);
        assert_eq!(state.registry.connection_count(), 0);
    }
}
