use super::config::ServerConfig;
use super::http_layers::log_requests;
use super::state::{GuardedAccessStore, ServerState};
use super::stream::{serve_file, ByteRange};
use crate::delivery::{unix_now, DownloadGate, GateError, UrlSigner};
use anyhow::Result;
use axum::{
    extract::{ConnectInfo, FromRequestParts, Path, Query, State},
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, error, info};

const LINK_INVALID_MESSAGE: &str = "link invalid or expired";
const SERVER_ERROR_MESSAGE: &str = "server error";

#[derive(Serialize)]
struct ServerStats {
    uptime: String,
    hash: String,
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    code: String,
}

/// Client identity as reported by the reverse proxy, with the socket
/// address as fallback.
pub struct ClientInfo {
    pub ip: Option<String>,
    pub user_agent: Option<String>,
}

impl FromRequestParts<ServerState> for ClientInfo {
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(
        parts: &mut axum::http::request::Parts,
        _state: &ServerState,
    ) -> Result<Self, Self::Rejection> {
        let forwarded = parts
            .headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());

        let ip = forwarded.or_else(|| {
            parts
                .extensions
                .get::<ConnectInfo<SocketAddr>>()
                .map(|info| info.0.ip().to_string())
        });

        let user_agent = parts
            .headers
            .get("user-agent")
            .and_then(|v| v.to_str().ok())
            .map(|v| v.to_string());

        Ok(ClientInfo { ip, user_agent })
    }
}

fn format_uptime(uptime_seconds: u64) -> String {
    let days = uptime_seconds / 86400;
    let hours = (uptime_seconds % 86400) / 3600;
    let minutes = (uptime_seconds % 3600) / 60;
    let seconds = uptime_seconds % 60;
    format!("{}d {}h {}m {}s", days, hours, minutes, seconds)
}

async fn home(State(state): State<ServerState>) -> Json<ServerStats> {
    Json(ServerStats {
        uptime: format_uptime(state.start_time.elapsed().as_secs()),
        hash: state.hash.clone(),
    })
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

fn error_response(status: StatusCode, code: &str, message: &str) -> Response {
    (
        status,
        Json(ErrorBody {
            error: message.to_string(),
            code: code.to_string(),
        }),
    )
        .into_response()
}

/// Run the gate for a token and stream the file on success. Every attempt,
/// allowed or refused, lands in the audit log.
async fn gate_and_stream(
    state: &ServerState,
    token: &str,
    client: &ClientInfo,
    byte_range: Option<ByteRange>,
    now: i64,
) -> Response {
    match state.gate.validate_and_consume(token, now) {
        Ok(delivery) => {
            state.attempt_logger.log(
                token,
                client.ip.clone(),
                client.user_agent.clone(),
                true,
                "ok",
                now,
            );
            debug!(
                "Serving {} (download {} of {})",
                delivery.file_name, delivery.downloads_used, delivery.max_downloads
            );
            serve_file(&delivery.file_path, &delivery.file_name, byte_range).await
        }
        Err(err) => {
            state.attempt_logger.log(
                token,
                client.ip.clone(),
                client.user_agent.clone(),
                false,
                err.reason(),
                now,
            );
            match err {
                GateError::Unknown => {
                    error_response(StatusCode::NOT_FOUND, "unknown_token", LINK_INVALID_MESSAGE)
                }
                GateError::Expired => {
                    error_response(StatusCode::GONE, "expired", LINK_INVALID_MESSAGE)
                }
                GateError::Exhausted => {
                    error_response(StatusCode::GONE, "exhausted", LINK_INVALID_MESSAGE)
                }
                GateError::FileMissing => error_response(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "server_error",
                    SERVER_ERROR_MESSAGE,
                ),
                GateError::Internal(err) => {
                    error!("Gate failure for token: {:?}", err);
                    error_response(
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "server_error",
                        SERVER_ERROR_MESSAGE,
                    )
                }
            }
        }
    }
}

async fn download_file(
    State(state): State<ServerState>,
    client: ClientInfo,
    byte_range: Option<ByteRange>,
    Path(token): Path<String>,
) -> Response {
    let now = unix_now();
    gate_and_stream(&state, &token, &client, byte_range, now).await
}

#[derive(Deserialize)]
struct SignedLinkParams {
    expires: Option<String>,
    signature: Option<String>,
}

async fn secure_download_file(
    State(state): State<ServerState>,
    client: ClientInfo,
    byte_range: Option<ByteRange>,
    Path(token): Path<String>,
    Query(params): Query<SignedLinkParams>,
) -> Response {
    let now = unix_now();

    // The signature binds the stored file path, so that has to be looked
    // up before the gate can run.
    let stored_path = match state.gate.stored_file_path(&token) {
        Ok(Some(path)) => path,
        Ok(None) => {
            state.attempt_logger.log(
                &token,
                client.ip.clone(),
                client.user_agent.clone(),
                false,
                "unknown_token",
                now,
            );
            return error_response(StatusCode::NOT_FOUND, "unknown_token", LINK_INVALID_MESSAGE);
        }
        Err(err) => {
            error!("Signed link lookup failed: {:?}", err);
            return error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "server_error",
                SERVER_ERROR_MESSAGE,
            );
        }
    };

    let expires_at = params.expires.as_deref().and_then(|v| v.parse::<i64>().ok());
    let verified = match (expires_at, params.signature.as_deref()) {
        (Some(expires_at), Some(signature)) => {
            state
                .signer
                .verify(&token, expires_at, signature, &stored_path, now)
        }
        _ => false,
    };

    if !verified {
        state.attempt_logger.log(
            &token,
            client.ip.clone(),
            client.user_agent.clone(),
            false,
            "signature_invalid",
            now,
        );
        return error_response(StatusCode::FORBIDDEN, "signature_invalid", LINK_INVALID_MESSAGE);
    }

    gate_and_stream(&state, &token, &client, byte_range, now).await
}

pub fn make_app(
    config: ServerConfig,
    access_store: GuardedAccessStore,
    gate: Arc<DownloadGate>,
    signer: Arc<UrlSigner>,
) -> Router {
    let state = ServerState::new(config, access_store, gate, signer);

    Router::new()
        .route("/", get(home))
        .route("/health", get(health))
        .route("/download/{token}", get(download_file))
        .route("/secure-download/{token}", get(secure_download_file))
        .layer(middleware::from_fn_with_state(state.clone(), log_requests))
        .with_state(state)
}

pub async fn run_server(
    config: ServerConfig,
    access_store: GuardedAccessStore,
    gate: Arc<DownloadGate>,
    signer: Arc<UrlSigner>,
) -> Result<()> {
    let port = config.port;
    let app = make_app(config, access_store, gate, signer);

    let listener = tokio::net::TcpListener::bind(format!("127.0.0.1:{}", port)).await?;
    info!("Listening on port {}", port);
    Ok(axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access_store::{AccessStore, NewDownloadAccess, Product, SqliteAccessStore};
    use axum::body::Body;
    use axum::http::Request;
    use std::fs;
    use tempfile::TempDir;
    use tower::ServiceExt;

    struct Fixture {
        _media: TempDir,
        app: Router,
        store: Arc<SqliteAccessStore>,
        signer: Arc<UrlSigner>,
    }

    fn fixture() -> Fixture {
        let media = TempDir::new().unwrap();
        fs::write(media.path().join("one.mp4"), b"0123456789").unwrap();

        let store = Arc::new(SqliteAccessStore::in_memory().unwrap());
        store
            .insert_product(&Product {
                id: 0,
                title: "Video".to_string(),
                file_path: "one.mp4".to_string(),
                file_name: "one.mp4".to_string(),
                active: true,
            })
            .unwrap();

        let gate = Arc::new(DownloadGate::new(
            store.clone(),
            media.path().to_path_buf(),
        ));
        let signer = Arc::new(UrlSigner::new("test-secret", "http://localhost:3001").unwrap());
        let app = make_app(
            ServerConfig::default(),
            store.clone(),
            gate,
            signer.clone(),
        );

        Fixture {
            _media: media,
            app,
            store,
            signer,
        }
    }

    fn grant(store: &SqliteAccessStore, token: &str, max_downloads: i64, expires_at: i64) {
        store
            .insert_access(&NewDownloadAccess {
                transaction_id: token.len() as i64 * 1000 + max_downloads,
                user_id: 7,
                product_id: 1,
                token: token.to_string(),
                max_downloads,
                expires_at,
                created_at: unix_now(),
            })
            .unwrap();
    }

    async fn get_response(app: &Router, uri: &str) -> Response {
        app.clone()
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap()
    }

    async fn get_with_range(app: &Router, uri: &str, range: &str) -> Response {
        app.clone()
            .oneshot(
                Request::builder()
                    .uri(uri)
                    .header("Range", range)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap()
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn body_bytes(response: Response) -> Vec<u8> {
        axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap()
            .to_vec()
    }

    #[tokio::test]
    async fn home_reports_uptime_and_hash() {
        let f = fixture();
        let response = get_response(&f.app, "/").await;
        assert_eq!(response.status(), StatusCode::OK);

        let json = body_json(response).await;
        assert!(json["uptime"].as_str().unwrap().contains("0d 0h"));
        assert!(json["hash"].is_string());
    }

    #[tokio::test]
    async fn health_is_ok() {
        let f = fixture();
        let response = get_response(&f.app, "/health").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["status"], "ok");
    }

    #[tokio::test]
    async fn unknown_token_is_not_found() {
        let f = fixture();
        let response = get_response(&f.app, "/download/nope").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let json = body_json(response).await;
        assert_eq!(json["code"], "unknown_token");
        assert_eq!(json["error"], "link invalid or expired");
    }

    #[tokio::test]
    async fn download_streams_file() {
        let f = fixture();
        grant(&f.store, "tok", 3, unix_now() + 3600);

        let response = get_response(&f.app, "/download/tok").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get("Content-Type").unwrap(),
            "video/mp4"
        );
        assert_eq!(
            response.headers().get("Content-Disposition").unwrap(),
            "attachment; filename=\"one.mp4\""
        );
        assert_eq!(response.headers().get("Accept-Ranges").unwrap(), "bytes");
        assert_eq!(
            response.headers().get("Cache-Control").unwrap(),
            "no-cache, no-store, must-revalidate"
        );
        assert_eq!(body_bytes(response).await, b"0123456789");
    }

    #[tokio::test]
    async fn download_honors_byte_range() {
        let f = fixture();
        grant(&f.store, "tok", 3, unix_now() + 3600);

        let response = get_with_range(&f.app, "/download/tok", "bytes=0-0").await;
        assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
        assert_eq!(
            response.headers().get("Content-Range").unwrap(),
            "bytes 0-0/10"
        );
        assert_eq!(body_bytes(response).await, b"0");
    }

    #[tokio::test]
    async fn malformed_range_header_serves_full_file() {
        let f = fixture();
        grant(&f.store, "tok", 3, unix_now() + 3600);

        let response = get_with_range(&f.app, "/download/tok", "bytes=abc-xyz").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_bytes(response).await, b"0123456789");
    }

    #[tokio::test]
    async fn range_beyond_eof_is_rejected_but_consumes_use() {
        let f = fixture();
        grant(&f.store, "tok", 3, unix_now() + 3600);

        let response = get_with_range(&f.app, "/download/tok", "bytes=50-60").await;
        assert_eq!(response.status(), StatusCode::RANGE_NOT_SATISFIABLE);

        let access = f.store.get_access_by_token("tok").unwrap().unwrap();
        assert_eq!(access.download_count, 1);
    }

    #[tokio::test]
    async fn fourth_download_is_gone() {
        let f = fixture();
        grant(&f.store, "tok", 3, unix_now() + 3600);

        for _ in 0..3 {
            let response = get_response(&f.app, "/download/tok").await;
            assert_eq!(response.status(), StatusCode::OK);
        }

        let response = get_response(&f.app, "/download/tok").await;
        assert_eq!(response.status(), StatusCode::GONE);
        assert_eq!(body_json(response).await["code"], "exhausted");
    }

    #[tokio::test]
    async fn expired_token_is_gone_without_consuming() {
        let f = fixture();
        grant(&f.store, "tok", 3, unix_now() - 10);

        let response = get_response(&f.app, "/download/tok").await;
        assert_eq!(response.status(), StatusCode::GONE);
        assert_eq!(body_json(response).await["code"], "expired");

        let access = f.store.get_access_by_token("tok").unwrap().unwrap();
        assert_eq!(access.download_count, 0);
    }

    #[tokio::test]
    async fn signed_link_round_trip() {
        let f = fixture();
        grant(&f.store, "tok", 3, unix_now() + 3600);

        let signed = f.signer.sign("tok", "one.mp4", 600, unix_now()).unwrap();
        let path = signed.url.strip_prefix("http://localhost:3001").unwrap();

        let response = get_response(&f.app, path).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_bytes(response).await, b"0123456789");
    }

    #[tokio::test]
    async fn tampered_signature_is_forbidden() {
        let f = fixture();
        grant(&f.store, "tok", 3, unix_now() + 3600);

        let signed = f.signer.sign("tok", "one.mp4", 600, unix_now()).unwrap();
        let uri = format!(
            "/secure-download/tok?expires={}&signature={}",
            signed.expires_at + 1,
            signed.url.rsplit_once("signature=").unwrap().1
        );

        let response = get_response(&f.app, &uri).await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(body_json(response).await["code"], "signature_invalid");

        // Rejected before the gate, so no use consumed
        let access = f.store.get_access_by_token("tok").unwrap().unwrap();
        assert_eq!(access.download_count, 0);
    }

    #[tokio::test]
    async fn signed_link_without_params_is_forbidden() {
        let f = fixture();
        grant(&f.store, "tok", 3, unix_now() + 3600);

        let response = get_response(&f.app, "/secure-download/tok").await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn expired_signed_link_is_forbidden() {
        let f = fixture();
        grant(&f.store, "tok", 3, unix_now() + 3600);

        let past = unix_now() - 700;
        let signed = f.signer.sign("tok", "one.mp4", 600, past).unwrap();
        let path = signed.url.strip_prefix("http://localhost:3001").unwrap();

        let response = get_response(&f.app, path).await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn signed_link_for_unknown_token_is_not_found() {
        let f = fixture();
        let response =
            get_response(&f.app, "/secure-download/nope?expires=1&signature=ab").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn attempts_are_audited() {
        let f = fixture();
        grant(&f.store, "tok", 1, unix_now() + 3600);

        get_response(&f.app, "/download/tok").await;
        get_response(&f.app, "/download/tok").await;

        let attempts = f.store.attempts_for_token("tok").unwrap();
        assert_eq!(attempts.len(), 2);
        assert!(attempts[0].success);
        assert_eq!(attempts[0].reason, "ok");
        assert!(!attempts[1].success);
        assert_eq!(attempts[1].reason, "exhausted");
    }

    #[tokio::test]
    async fn client_ip_from_forwarded_header() {
        let f = fixture();
        grant(&f.store, "tok", 3, unix_now() + 3600);

        f.app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/download/tok")
                    .header("X-Forwarded-For", "203.0.113.9, 10.0.0.1")
                    .header("User-Agent", "bot/1.0")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        let attempts = f.store.attempts_for_token("tok").unwrap();
        assert_eq!(attempts[0].client_ip.as_deref(), Some("203.0.113.9"));
        assert_eq!(attempts[0].user_agent.as_deref(), Some("bot/1.0"));
    }

    #[test]
    fn uptime_formatting() {
        assert_eq!(format_uptime(0), "0d 0h 0m 0s");
        assert_eq!(format_uptime(61), "0d 0h 1m 1s");
        assert_eq!(format_uptime(90061), "1d 1h 1m 1s");
    }
}
