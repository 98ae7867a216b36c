//! # HTTP Tests
//!
//! Drives the router in-process against scripted cameras.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::response::Response;
use axum::Router;
use futures::StreamExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use cv_camserver::device::fake::{solid_frame, AfterScript, ScriptedOpener};
use cv_camserver::http::{create_router, shutdown};
use cv_camserver::server::multipart_chunk;
use cv_camserver::{
    CaptureParams, DeviceSessionBuilder, FrameEncoder, JpegEncoder, ServerAddress, StreamServer,
};

// -----------------------------------------------------------------------------------------------
// HELPERS
// -----------------------------------------------------------------------------------------------

fn app(opener: ScriptedOpener) -> (Router, Arc<StreamServer>) {
    let server = Arc::new(StreamServer::new(
        DeviceSessionBuilder::new().index(1).opener(opener),
        ServerAddress {
            host: String::from("127.0.0.1"),
            port: 5000,
        },
    ));

    (create_router(Arc::clone(&server)), server)
}

async fn get(router: &Router, uri: &str) -> Response {
    router
        .clone()
        .oneshot(Request::get(uri).body(Body::empty()).expect("Bad request"))
        .await
        .expect("Router failed")
}

async fn body_bytes(res: Response) -> Vec<u8> {
    to_bytes(res.into_body(), usize::MAX)
        .await
        .expect("Cannot read body")
        .to_vec()
}

async fn body_json(res: Response) -> Value {
    serde_json::from_slice(&body_bytes(res).await).expect("Body is not JSON")
}

fn content_type(res: &Response) -> &str {
    res.headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
}

// -----------------------------------------------------------------------------------------------
// TESTS
// -----------------------------------------------------------------------------------------------

/// Test that a snapshot returns one JPEG frame
#[tokio::test]
async fn snapshot_returns_jpeg() {
    let frame = solid_frame([40, 80, 120]);
    let (router, _) = app(ScriptedOpener::new(vec![frame.clone()]));

    let res = get(&router, "/api/snapshot").await;
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(content_type(&res), "image/jpeg");

    let expected = JpegEncoder::default().encode(&frame).expect("Encoding failed");
    assert_eq!(body_bytes(res).await, expected.into_bytes());
}

/// Test that a camera which cannot be opened gives a 503
#[tokio::test]
async fn snapshot_open_failure() {
    let (router, _) = app(ScriptedOpener::failing());

    let res = get(&router, "/api/snapshot").await;
    assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body_bytes(res).await, b"Failed to capture frame".to_vec());
}

/// Test that there is no camera once the server has shut down
#[tokio::test]
async fn snapshot_after_shutdown() {
    let (router, server) = app(ScriptedOpener::new(vec![solid_frame([0, 0, 0])]));
    server.shutdown();

    let res = get(&router, "/api/snapshot").await;
    assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body_bytes(res).await, b"Camera not available".to_vec());
}

/// Test that the status reports what the camera granted, not what was requested
#[tokio::test]
async fn status_reports_live_params() {
    let (router, _) = app(ScriptedOpener::new(Vec::new()).granting(CaptureParams {
        width: 640,
        height: 360,
        fps: 25,
    }));

    let res = get(&router, "/api/status").await;
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(
        body_json(res).await,
        json!({
            "camera": {
                "status": "running",
                "width": 640,
                "height": 360,
                "fps": 25,
                "camera_index": 1
            },
            "server": { "host": "127.0.0.1", "port": 5000 }
        })
    );
}

/// Test that a camera which failed to open is reported rather than an error
#[tokio::test]
async fn status_open_failure() {
    let (router, _) = app(ScriptedOpener::failing());

    let res = get(&router, "/api/status").await;
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(body_json(res).await["camera"], json!({ "status": "not_initialized" }));
}

/// Test that the status is unavailable once the server has shut down
#[tokio::test]
async fn status_after_shutdown() {
    let (router, server) = app(ScriptedOpener::new(Vec::new()));
    server.shutdown();

    let res = get(&router, "/api/status").await;
    assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body_json(res).await, json!({ "error": "Camera not initialized" }));
}

/// Test that the video feed delivers boundary-wrapped frames in order
#[tokio::test]
async fn video_feed_streams_frames() {
    let frames = vec![solid_frame([255, 0, 0]), solid_frame([0, 0, 255])];
    let (router, _) = app(ScriptedOpener::new(frames.clone()).after(AfterScript::Repeat));

    let res = get(&router, "/video_feed").await;
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(
        content_type(&res),
        "multipart/x-mixed-replace; boundary=frame"
    );

    let encoder = JpegEncoder::default();
    let mut body = res.into_body().into_data_stream();

    for f in frames.iter().chain(frames.iter()) {
        let chunk = body
            .next()
            .await
            .expect("Stream ended")
            .expect("Stream errored");
        let expected = multipart_chunk(&encoder.encode(f).expect("Encoding failed"));

        assert_eq!(chunk.to_vec(), expected);
    }
}

/// Test that the video feed is unavailable once the server has shut down
#[tokio::test]
async fn video_feed_after_shutdown() {
    let (router, server) = app(ScriptedOpener::new(Vec::new()));
    server.shutdown();

    let res = get(&router, "/video_feed").await;
    assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body_bytes(res).await, b"Camera not available".to_vec());
}

/// Test that shutting down ends an open video feed
#[tokio::test]
async fn video_feed_ends_on_shutdown() {
    let (router, server) = app(ScriptedOpener::new(vec![solid_frame([1, 1, 1])]));

    let res = get(&router, "/video_feed").await;
    let mut body = res.into_body().into_data_stream();
    assert!(body.next().await.is_some());

    server.shutdown();
    assert!(body.next().await.is_none());
}

/// Test that a client hanging up stops its video feed reading from the camera
#[tokio::test]
async fn video_feed_stops_on_disconnect() {
    // One frame then endless failures, so the feed keeps retrying until cancelled
    let opener = ScriptedOpener::new(vec![solid_frame([9, 9, 9])]);
    let stats = opener.stats();
    let (router, _) = app(opener);

    let res = get(&router, "/video_feed").await;
    let mut body = res.into_body().into_data_stream();
    assert!(body.next().await.is_some());
    drop(body);

    tokio::time::sleep(Duration::from_millis(100)).await;
    let settled = stats.reads();

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(stats.reads(), settled);
}

/// Test that open video feeds do not hold up snapshots
#[test]
fn snapshot_while_video_feed_open() {
    let rt = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(1)
        .max_blocking_threads(1)
        .enable_all()
        .build()
        .expect("Cannot build runtime");

    rt.block_on(async {
        let (router, _) =
            app(ScriptedOpener::new(vec![solid_frame([5, 5, 5])]).after(AfterScript::Repeat));

        let feed = get(&router, "/video_feed").await;
        let mut body = feed.into_body().into_data_stream();
        assert!(body.next().await.is_some());

        let res = tokio::time::timeout(Duration::from_secs(5), get(&router, "/api/snapshot"))
            .await
            .expect("Snapshot waited behind the video feed");
        assert_eq!(res.status(), StatusCode::OK);
    });
}

/// Test that shutting down from async code keeps the runtime responsive during a slow read
#[tokio::test]
async fn shutdown_leaves_runtime_free() {
    let opener =
        ScriptedOpener::new(vec![solid_frame([3, 3, 3])]).read_delay(Duration::from_millis(300));
    let stats = opener.stats();
    let (_, server) = app(opener);

    let reader = Arc::clone(&server);
    let snapshot = thread::spawn(move || reader.snapshot().is_ok());
    while stats.reads() == 0 {
        thread::sleep(Duration::from_millis(1));
    }

    let ticks = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&ticks);
    let ticker = tokio::spawn(async move {
        loop {
            counter.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    });

    shutdown(Arc::clone(&server)).await;
    ticker.abort();

    assert!(ticks.load(Ordering::SeqCst) > 1);
    assert!(snapshot.join().expect("Snapshot thread panicked"));
    assert_eq!(stats.live_handles(), 0);
    assert!(server.session().is_none());
}

/// Test that unknown routes give a JSON 404
#[tokio::test]
async fn unknown_route() {
    let (router, _) = app(ScriptedOpener::new(Vec::new()));

    let res = get(&router, "/nope").await;
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(res).await, json!({ "error": "Not found" }));
}

/// Test that the landing page embeds the feed
#[tokio::test]
async fn index_page() {
    let (router, _) = app(ScriptedOpener::new(Vec::new()));

    let res = get(&router, "/").await;
    assert_eq!(res.status(), StatusCode::OK);
    assert!(content_type(&res).starts_with("text/html"));

    let html = String::from_utf8(body_bytes(res).await).expect("Not UTF-8");
    assert!(html.contains("/video_feed"));
}
