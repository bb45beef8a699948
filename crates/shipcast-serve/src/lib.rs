use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tokio::sync::mpsc;

use shipcast_pipeline::{RunMode, RunRequest};

// ── Config ──

pub struct ServeConfig {
    pub bind: String,
    pub port: u16,
    /// GitHub webhook secret. Unset → signature checks are skipped.
    pub secret: Option<String>,
}

// ── App State ──

struct AppState {
    runs: mpsc::Sender<RunRequest>,
    secret: Option<String>,
}

// ── Error Handling ──

struct AppError(anyhow::Error);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({ "error": self.0.to_string() });
        (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
    }
}

impl<E: Into<anyhow::Error>> From<E> for AppError {
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

// ── Entrypoint ──

pub async fn serve(config: ServeConfig, runs: mpsc::Sender<RunRequest>) -> anyhow::Result<()> {
    let app = router(runs, config.secret);
    let addr = format!("{}:{}", config.bind, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    eprintln!("shipcast webhook listening on http://{addr}");
    axum::serve(listener, app).await?;
    Ok(())
}

/// Build the router (for testing without binding to a port).
pub fn router(runs: mpsc::Sender<RunRequest>, secret: Option<String>) -> Router {
    let state = Arc::new(AppState { runs, secret });
    Router::new()
        .route("/health", get(health))
        .route("/webhook/github", post(github_webhook))
        .with_state(state)
}

// ── Handlers ──

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "ok": true, "service": "shipcast" }))
}

async fn github_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, AppError> {
    if let Some(secret) = &state.secret {
        let signature = headers
            .get("X-Hub-Signature-256")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if !verify_signature(secret, &body, signature) {
            let body = serde_json::json!({ "error": "invalid signature" });
            return Ok((StatusCode::UNAUTHORIZED, Json(body)).into_response());
        }
    }

    let event = headers
        .get("X-GitHub-Event")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    let payload: serde_json::Value = serde_json::from_slice(&body)?;

    match translate_event(event, &payload) {
        Some(request) => {
            tracing::info!(event, target = %request.target, "webhook accepted");
            state
                .runs
                .send(request)
                .await
                .map_err(|_| anyhow::anyhow!("pipeline worker is gone"))?;
            Ok(Json(serde_json::json!({ "status": "queued" })).into_response())
        }
        None => {
            tracing::debug!(event, "webhook ignored");
            Ok(Json(serde_json::json!({ "status": "ignored" })).into_response())
        }
    }
}

// ── Event translation ──

/// Map a GitHub event onto a single auto-mode pipeline run, or None for
/// events and actions that don't warrant a post.
pub fn translate_event(event: &str, payload: &serde_json::Value) -> Option<RunRequest> {
    let clone_url = payload["repository"]["clone_url"].as_str()?;

    match event {
        "push" => {
            if payload["commits"].as_array().map_or(true, |c| c.is_empty()) {
                return None;
            }
            let branch = payload["ref"]
                .as_str()
                .map(|r| r.trim_start_matches("refs/heads/").to_string());
            Some(RunRequest {
                target: clone_url.to_string(),
                git_ref: branch,
                mode: RunMode::Auto,
            })
        }
        "pull_request" => {
            let action = payload["action"].as_str()?;
            if action != "opened" && action != "synchronize" {
                return None;
            }
            let head = payload["pull_request"]["head"]["ref"]
                .as_str()
                .map(str::to_string);
            Some(RunRequest {
                target: clone_url.to_string(),
                git_ref: head,
                mode: RunMode::Auto,
            })
        }
        "release" => {
            if payload["action"].as_str()? != "published" {
                return None;
            }
            let tag = payload["release"]["tag_name"].as_str().map(str::to_string);
            Some(RunRequest {
                target: clone_url.to_string(),
                git_ref: tag,
                mode: RunMode::Auto,
            })
        }
        _ => None,
    }
}

// ── Signatures ──

/// Constant-time check of GitHub's `sha256=<hex>` HMAC header.
pub fn verify_signature(secret: &str, payload: &[u8], header: &str) -> bool {
    let Some(hex_sig) = header.strip_prefix("sha256=") else {
        return false;
    };
    let Ok(expected) = hex::decode(hex_sig) else {
        return false;
    };
    let mut mac =
        Hmac::<Sha256>::new_from_slice(secret.as_bytes()).expect("hmac accepts any key length");
    mac.update(payload);
    mac.verify_slice(&expected).is_ok()
}

/// Produce the signature header value for a payload (used by tests and
/// local delivery tooling).
pub fn sign_payload(secret: &str, payload: &[u8]) -> String {
    let mut mac =
        Hmac::<Sha256>::new_from_slice(secret.as_bytes()).expect("hmac accepts any key length");
    mac.update(payload);
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}
