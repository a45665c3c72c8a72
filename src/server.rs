//! HTTP surface: transport webhook, delivery status callback, and the public
//! media docroot.
//!
//! Deliberately thin — all decisions live in the [`Engine`]; handlers only
//! translate between the transport's form encoding and the engine's types.
//! A handler never returns an error status for a malformed inbound message:
//! the transport would retry and nothing good comes of that.

use std::collections::HashMap;
use std::path::{Component, PathBuf};
use std::sync::Arc;

use axum::{
    extract::{Form, Path, State},
    http::{header, StatusCode},
    response::{Html, IntoResponse},
    routing::{get, post},
    Router,
};

use crate::orchestrator::{Engine, InboundAttachment, InboundMessage};
use crate::rlog;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
    /// Docroot behind `GET /media/*`; None when media is hosted elsewhere.
    pub media_root: Option<PathBuf>,
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        .route("/webhook/inbound", post(inbound_webhook))
        .route("/status", post(status_callback))
        .route("/media/*path", get(serve_media))
        .with_state(state)
}

async fn index() -> impl IntoResponse {
    Html("Multi-group broadcast relay is running.")
}

async fn health() -> impl IntoResponse {
    StatusCode::OK
}

/// Inbound message webhook, Twilio-shaped: form-encoded `From`, `Body`,
/// `NumMedia` and `MediaUrl{N}`/`MediaContentType{N}` fields.
async fn inbound_webhook(
    State(state): State<AppState>,
    Form(form): Form<HashMap<String, String>>,
) -> impl IntoResponse {
    let sender_address = form.get("From").cloned().unwrap_or_default();
    if sender_address.is_empty() {
        rlog!("webhook: inbound with no sender, ignoring");
        return twiml_response(None);
    }

    let body = form.get("Body").cloned().filter(|b| !b.trim().is_empty());
    let attachments = parse_attachments(&form);

    let inbound = InboundMessage {
        sender_address,
        body,
        attachments,
    };

    match state.engine.handle_inbound(inbound).await {
        Ok(reply) => twiml_response(reply.as_deref()),
        Err(e) => {
            // One bad event must never take down the handler; reply empty.
            rlog!("webhook: engine error: {e}");
            twiml_response(None)
        }
    }
}

fn parse_attachments(form: &HashMap<String, String>) -> Vec<InboundAttachment> {
    let count: usize = form
        .get("NumMedia")
        .and_then(|n| n.parse().ok())
        .unwrap_or(0);
    (0..count)
        .filter_map(|i| {
            let source_url = form.get(&format!("MediaUrl{i}"))?.clone();
            let content_type = form
                .get(&format!("MediaContentType{i}"))
                .cloned()
                .unwrap_or_else(|| "application/octet-stream".to_string());
            Some(InboundAttachment {
                source_url,
                content_type,
            })
        })
        .collect()
}

/// Render the webhook reply in the transport's XML format.
fn twiml_response(message: Option<&str>) -> axum::response::Response {
    let body = match message {
        Some(text) => format!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?><Response><Message>{}</Message></Response>",
            xml_escape(text)
        ),
        None => "<?xml version=\"1.0\" encoding=\"UTF-8\"?><Response></Response>".to_string(),
    };
    ([(header::CONTENT_TYPE, "application/xml")], body).into_response()
}

fn xml_escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Delivery status callback. Late failure reports update the existing
/// delivery row; unknown sids are ignored.
async fn status_callback(
    State(state): State<AppState>,
    Form(form): Form<HashMap<String, String>>,
) -> impl IntoResponse {
    let (Some(sid), Some(status)) = (form.get("MessageSid"), form.get("MessageStatus")) else {
        return StatusCode::NO_CONTENT;
    };
    let error_code = form.get("ErrorCode").map(String::as_str);

    if let Err(e) = state
        .engine
        .handle_status_callback(sid, status, error_code)
        .await
    {
        rlog!("webhook: status callback error: {e}");
    }
    StatusCode::NO_CONTENT
}

/// Serve relocated media from the docroot. Only plain path components are
/// accepted; anything else is a 404.
async fn serve_media(
    State(state): State<AppState>,
    Path(path): Path<String>,
) -> impl IntoResponse {
    let Some(root) = state.media_root else {
        return StatusCode::NOT_FOUND.into_response();
    };

    let relative = PathBuf::from(&path);
    if relative
        .components()
        .any(|c| !matches!(c, Component::Normal(_)))
    {
        return StatusCode::NOT_FOUND.into_response();
    }

    let full = root.join(relative);
    match tokio::fs::read(&full).await {
        Ok(bytes) => {
            let content_type = ext_to_content_type(
                full.extension().and_then(|e| e.to_str()).unwrap_or(""),
            );
            ([(header::CONTENT_TYPE, content_type)], bytes).into_response()
        }
        Err(_) => StatusCode::NOT_FOUND.into_response(),
    }
}

fn ext_to_content_type(ext: &str) -> &'static str {
    match ext {
        "jpg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "mp4" => "video/mp4",
        "3gp" => "video/3gpp",
        "mp3" => "audio/mpeg",
        "ogg" => "audio/ogg",
        _ => "application/octet-stream",
    }
}
