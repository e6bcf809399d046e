//! Server Startup Tests
//!
//! Verifies the HTTP surface of the server: health check, TwiML webhook,
//! router composition, and connection-limit accounting. Uses in-process
//! `oneshot` requests rather than a bound socket where possible.

use std::net::{IpAddr, SocketAddr, TcpListener};

use axum::{Router, body::Body, extract::ConnectInfo, http::Request, middleware};
use http::StatusCode;
use tower::util::ServiceExt;

use callbridge::{
    ServerConfig, middleware::connection_limit_middleware, routes, state::AppState,
};

/// Helper function to create a minimal test configuration
fn create_minimal_config(port: u16) -> ServerConfig {
    let mut config = ServerConfig::default();
    config.host = "127.0.0.1".to_string();
    config.port = port;
    config.openai_api_key = Some("sk-test".to_string());
    config
}

/// Find an available port for testing
fn find_available_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").expect("Failed to bind to random port");
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    port
}

async fn body_string(response: axum::response::Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read response body");
    String::from_utf8(bytes.to_vec()).expect("utf8 body")
}

/// The server boots with a minimal configuration and answers the health check.
#[tokio::test]
async fn test_minimal_config_boot() {
    let port = find_available_port();
    let config = create_minimal_config(port);
    let app_state = AppState::new(config).await;

    let app = routes::api::create_api_router().with_state(app_state);

    let request = Request::builder().uri("/").body(Body::empty()).unwrap();
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_string(response).await;
    let json: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(json["message"], "Twilio Media Stream Server is running!");
}

/// The webhook returns TwiML that points the caller at our media-stream URL.
#[tokio::test]
async fn test_incoming_call_returns_twiml() {
    let config = create_minimal_config(find_available_port());
    let app_state = AppState::new(config).await;
    let app = routes::api::create_api_router().with_state(app_state);

    let request = Request::builder()
        .method("POST")
        .uri("/incoming-call")
        .header("Host", "relay.example.com")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response
        .headers()
        .get(http::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();
    assert!(content_type.starts_with("text/xml"));

    let body = body_string(response).await;
    assert!(body.contains("<Connect>"));
    assert!(body.contains("wss://relay.example.com/media-stream"));
}

/// Twilio sends the webhook as GET or POST depending on configuration;
/// both must work.
#[tokio::test]
async fn test_incoming_call_accepts_get() {
    let config = create_minimal_config(find_available_port());
    let app_state = AppState::new(config).await;
    let app = routes::api::create_api_router().with_state(app_state);

    let request = Request::builder()
        .method("GET")
        .uri("/incoming-call")
        .header("Host", "relay.example.com")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

/// Without a Host header we cannot build the stream URL.
#[tokio::test]
async fn test_incoming_call_without_host_is_rejected() {
    let config = create_minimal_config(find_available_port());
    let app_state = AppState::new(config).await;
    let app = routes::api::create_api_router().with_state(app_state);

    let request = Request::builder()
        .method("POST")
        .uri("/incoming-call")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

/// Unknown routes fall through to 404.
#[tokio::test]
async fn test_unknown_route_returns_404() {
    let config = create_minimal_config(find_available_port());
    let app_state = AppState::new(config).await;
    let app: Router = routes::api::create_api_router()
        .merge(routes::media::create_media_router())
        .with_state(app_state);

    let request = Request::builder()
        .uri("/no-such-route")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

/// The media-stream route only answers WebSocket upgrades.
#[tokio::test]
async fn test_media_stream_requires_upgrade() {
    let config = create_minimal_config(find_available_port());
    let app_state = AppState::new(config).await;
    let app = routes::media::create_media_router().with_state(app_state);

    let request = Request::builder()
        .uri("/media-stream")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_ne!(response.status(), StatusCode::OK);
}

/// A malformed upgrade request must not eat a connection slot: the
/// handshake is rejected before the handler runs, so the middleware has to
/// return the slot itself.
#[tokio::test]
async fn test_failed_handshake_releases_slot() {
    let mut config = create_minimal_config(find_available_port());
    config.max_connections_per_ip = 2;
    let state = AppState::new(config).await;

    let app = routes::media::create_media_router()
        .layer(middleware::from_fn_with_state(
            state.clone(),
            connection_limit_middleware,
        ))
        .with_state(state.clone());

    let client_addr = SocketAddr::from(([10, 0, 0, 1], 40000));
    for _ in 0..3 {
        // Upgrade header present, but no Sec-WebSocket-Key or version, so
        // the WebSocket extractor rejects the handshake.
        let request = Request::builder()
            .uri("/media-stream")
            .header("upgrade", "websocket")
            .header("connection", "upgrade")
            .extension(ConnectInfo(client_addr))
            .body(Body::empty())
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_ne!(response.status(), StatusCode::SWITCHING_PROTOCOLS);
    }

    assert_eq!(state.ws_connection_count(), 0);
    assert_eq!(state.ip_connection_count(&client_addr.ip()), 0);
    // And the cap is still available for a real call.
    assert!(state.try_acquire_connection(client_addr.ip()).is_ok());
}

/// Connection accounting: per-IP and global caps reject, release frees a slot.
#[tokio::test]
async fn test_connection_limits_enforced() {
    let mut config = create_minimal_config(find_available_port());
    config.max_websocket_connections = Some(2);
    config.max_connections_per_ip = 1;
    let state = AppState::new(config).await;

    let ip_a: IpAddr = "10.0.0.1".parse().unwrap();
    let ip_b: IpAddr = "10.0.0.2".parse().unwrap();

    assert!(state.try_acquire_connection(ip_a).is_ok());
    // Second connection from the same IP exceeds the per-IP cap.
    assert!(state.try_acquire_connection(ip_a).is_err());
    assert!(state.try_acquire_connection(ip_b).is_ok());
    // Global cap of 2 is now reached.
    let ip_c: IpAddr = "10.0.0.3".parse().unwrap();
    assert!(state.try_acquire_connection(ip_c).is_err());

    state.release_connection(&ip_a);
    assert_eq!(state.ws_connection_count(), 1);
    assert!(state.try_acquire_connection(ip_c).is_ok());
}
