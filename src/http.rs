//! # HTTP Module
//!
//! Routes exposing a [`StreamServer`] over HTTP:
//!
//! - `GET /` landing page
//! - `GET /video_feed` endless `multipart/x-mixed-replace` JPEG stream
//! - `GET /api/snapshot` a single JPEG
//! - `GET /api/status` camera and server status as JSON
//!
//! Device reads block. Snapshot and status reads run on tokio's blocking pool, while each live
//! stream gets a dedicated thread for as long as its client stays connected, so open streams never
//! starve the blocking pool. The number of concurrent streams is therefore bounded only by the
//! number of threads the process may spawn.

// -----------------------------------------------------------------------------------------------
// IMPORTS
// -----------------------------------------------------------------------------------------------

use std::any::Any;
use std::convert::Infallible;
use std::sync::Arc;
use std::thread;

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use log::{debug, error};
use serde_json::json;
use tokio::sync::mpsc;
use tower_http::catch_panic::CatchPanicLayer;

use crate::encoder::JPEG_CONTENT_TYPE;
use crate::server::{StreamServer, Unavailable, MULTIPART_CONTENT_TYPE};

// -----------------------------------------------------------------------------------------------
// CONSTANTS
// -----------------------------------------------------------------------------------------------

const INDEX_HTML: &str = include_str!("../templates/index.html");

// -----------------------------------------------------------------------------------------------
// ENUMERATIONS
// -----------------------------------------------------------------------------------------------

/// Errors returned by the HTTP handlers.
#[derive(thiserror::Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    Unavailable(#[from] Unavailable),

    #[error("Camera not initialized")]
    NotInitialized,

    #[error("Not found")]
    NotFound,

    #[error("Internal server error")]
    Internal,
}

// -----------------------------------------------------------------------------------------------
// IMPLEMENTATIONS
// -----------------------------------------------------------------------------------------------

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Unavailable(u) => (StatusCode::SERVICE_UNAVAILABLE, u.to_string()).into_response(),
            ApiError::NotInitialized => json_error(StatusCode::SERVICE_UNAVAILABLE, &self),
            ApiError::NotFound => json_error(StatusCode::NOT_FOUND, &self),
            ApiError::Internal => json_error(StatusCode::INTERNAL_SERVER_ERROR, &self),
        }
    }
}

// -----------------------------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// -----------------------------------------------------------------------------------------------

/// Build the router for the given server.
pub fn create_router(server: Arc<StreamServer>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/video_feed", get(video_feed))
        .route("/api/snapshot", get(snapshot))
        .route("/api/status", get(status))
        .fallback(not_found)
        .layer(CatchPanicLayer::custom(panic_response))
        .with_state(server)
}

/// Shut the server down from async code without blocking the runtime.
///
/// Shutting down waits for any device read in progress, so it runs on the blocking pool.
pub async fn shutdown(server: Arc<StreamServer>) {
    if let Err(e) = tokio::task::spawn_blocking(move || server.shutdown()).await {
        error!("Shutdown task failed: {}", e);
    }
}

// -----------------------------------------------------------------------------------------------
// HANDLERS
// -----------------------------------------------------------------------------------------------

async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

async fn video_feed(State(server): State<Arc<StreamServer>>) -> Result<Response, ApiError> {
    let stream = blocking(move || server.live_stream())
        .await?
        .ok_or(ApiError::Unavailable(Unavailable::CameraNotAvailable))?;

    // Capacity 1 keeps at most one frame waiting on a slow client
    let (tx, rx) = mpsc::channel::<Vec<u8>>(1);

    let probe = tx.clone();
    let stream = stream.until(move || probe.is_closed());

    thread::Builder::new()
        .name(String::from("video-feed"))
        .spawn(move || {
            for chunk in stream {
                if tx.blocking_send(chunk).is_err() {
                    break;
                }
            }
            debug!("Video feed ended");
        })
        .map_err(|e| {
            error!("Cannot spawn video feed thread: {}", e);
            ApiError::Internal
        })?;

    let body = Body::from_stream(futures::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|chunk| (Ok::<_, Infallible>(chunk), rx))
    }));

    Ok(([(header::CONTENT_TYPE, MULTIPART_CONTENT_TYPE)], body).into_response())
}

async fn snapshot(State(server): State<Arc<StreamServer>>) -> Result<Response, ApiError> {
    let frame = blocking(move || server.snapshot()).await??;

    Ok(([(header::CONTENT_TYPE, JPEG_CONTENT_TYPE)], frame.into_bytes()).into_response())
}

async fn status(State(server): State<Arc<StreamServer>>) -> Result<Response, ApiError> {
    let report = blocking(move || server.status())
        .await?
        .ok_or(ApiError::NotInitialized)?;

    Ok(Json(report).into_response())
}

async fn not_found() -> ApiError {
    ApiError::NotFound
}

// -----------------------------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// -----------------------------------------------------------------------------------------------

/// Run a blocking call on the blocking pool.
async fn blocking<F, T>(f: F) -> Result<T, ApiError>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f).await.map_err(|e| {
        error!("Blocking task failed: {}", e);
        ApiError::Internal
    })
}

fn json_error(status: StatusCode, err: &ApiError) -> Response {
    (status, Json(json!({ "error": err.to_string() }))).into_response()
}

fn panic_response(_err: Box<dyn Any + Send + 'static>) -> Response {
    error!("Handler panicked");
    ApiError::Internal.into_response()
}
