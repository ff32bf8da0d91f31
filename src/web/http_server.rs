//! HTTP server for WebRTC signaling
//!
//! A single endpoint accepts the browser's offer and answers with the
//! complete local description once candidate gathering is done.

use crate::web::shared::AppState;
use crate::webrtc::{NegotiationRequest, WebRTCError};
use axum::{
    body::Bytes,
    extract::State,
    http::{header, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::any,
    Json, Router,
};
use log::{info, warn};
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::set_header::SetResponseHeaderLayer;

/// Build the signaling router
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", any(signaling_handler))
        .with_state(state)
        .layer(SetResponseHeaderLayer::overriding(
            header::ACCESS_CONTROL_ALLOW_ORIGIN,
            HeaderValue::from_static("*"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::ACCESS_CONTROL_ALLOW_METHODS,
            HeaderValue::from_static("GET, POST, OPTIONS"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::ACCESS_CONTROL_ALLOW_HEADERS,
            HeaderValue::from_static("Content-Type"),
        ))
}

/// Run the HTTP server until `shutdown` resolves
pub async fn run_http_server<F>(state: Arc<AppState>, shutdown: F) -> Result<(), Box<dyn std::error::Error>>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = format!("{}:{}", state.config.http.host, state.config.http.port);
    let app = router(state);

    let listener = TcpListener::bind(&addr).await?;
    info!("HTTP server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| Box::new(e) as Box<dyn std::error::Error>)?;

    Ok(())
}

/// `POST /` negotiates; any other method gets an empty 200 (CORS preflight)
async fn signaling_handler(State(state): State<Arc<AppState>>, method: Method, body: Bytes) -> Response {
    if method != Method::POST {
        return StatusCode::OK.into_response();
    }

    let request = match NegotiationRequest::from_json(&body) {
        Ok(request) => request,
        Err(e) => {
            warn!("{}", e);
            return (StatusCode::BAD_REQUEST, "Failed to decode SDP").into_response();
        }
    };

    let process_id = request.process_id.clone();
    match state.session_manager.negotiate(request).await {
        Ok(answer) => {
            info!("Answered offer for {}", process_id);
            Json(answer).into_response()
        }
        Err(e) => {
            warn!("Signaling for {} failed: {}", process_id, e);
            (status_for(&e), e.to_string()).into_response()
        }
    }
}

fn status_for(error: &WebRTCError) -> StatusCode {
    match error {
        WebRTCError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        WebRTCError::GatheringTimeout => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}
