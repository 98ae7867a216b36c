//! # Stream Server Module
//!
//! Turns a [`DeviceSession`] into the two behaviours clients see: single snapshots and an
//! endless multipart stream. No frames are buffered or cached, every snapshot and every part of
//! a stream is a fresh read from the device.

// -----------------------------------------------------------------------------------------------
// IMPORTS
// -----------------------------------------------------------------------------------------------

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use log::{debug, error, info};
use serde::Serialize;

use crate::builder::DeviceSessionBuilder;
use crate::encoder::{EncodedFrame, JPEG_CONTENT_TYPE};
use crate::session::{CameraInfo, DeviceSession};

// -----------------------------------------------------------------------------------------------
// CONSTANTS
// -----------------------------------------------------------------------------------------------

/// Boundary separating the parts of a live stream.
pub const BOUNDARY: &str = "frame";

/// Content type of a live stream response.
pub const MULTIPART_CONTENT_TYPE: &str = "multipart/x-mixed-replace; boundary=frame";

// -----------------------------------------------------------------------------------------------
// TRAITS
// -----------------------------------------------------------------------------------------------

/// Decides what a live stream does after a read yields no frame.
pub trait RetryPolicy: Send {
    /// Called after each miss, `consecutive` counts misses since the last delivered frame.
    fn on_miss(&mut self, consecutive: u64) -> RetryDecision;
}

// -----------------------------------------------------------------------------------------------
// DATA STRUCTS
// -----------------------------------------------------------------------------------------------

/// Retry straight away, forever.
#[derive(Debug, Default, Clone, Copy)]
pub struct Immediate;

/// Wait a fixed time before each retry, forever.
#[derive(Debug, Clone, Copy)]
pub struct FixedDelay(pub Duration);

/// Retry straight away, ending the stream after the given number of consecutive misses.
#[derive(Debug, Clone, Copy)]
pub struct GiveUpAfter(pub u64);

/// Host and port the server listens on, as reported by the status endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServerAddress {
    pub host: String,
    pub port: u16,
}

/// Combined camera and server status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusReport {
    pub camera: CameraInfo,
    pub server: ServerAddress,
}

/// Owns the process-wide camera session and serves frames from it.
pub struct StreamServer {
    builder: DeviceSessionBuilder,

    address: ServerAddress,

    retry: Arc<dyn Fn() -> Box<dyn RetryPolicy> + Send + Sync>,

    slot: Mutex<SessionSlot>,

    /// Set on shutdown, ends every live stream.
    closing: Arc<AtomicBool>,
}

/// An endless sequence of boundary-wrapped frames for one client.
///
/// Each call to `next` blocks until the device yields a frame. Reads that yield nothing are
/// retried according to the [`RetryPolicy`] and never surface to the consumer.
pub struct LiveStream {
    session: Arc<DeviceSession>,

    policy: Box<dyn RetryPolicy>,

    closing: Arc<AtomicBool>,

    cancelled: Option<Box<dyn Fn() -> bool + Send>>,

    finished: bool,
}

// -----------------------------------------------------------------------------------------------
// ENUMERATIONS
// -----------------------------------------------------------------------------------------------

/// What to do after a missed frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry,
    RetryAfter(Duration),
    GiveUp,
}

/// Reasons a frame could not be served.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unavailable {
    #[error("Camera not available")]
    CameraNotAvailable,

    #[error("Failed to capture frame")]
    CaptureFailed,
}

enum SessionSlot {
    Empty,
    Ready(Arc<DeviceSession>),
    ShutDown,
}

// -----------------------------------------------------------------------------------------------
// IMPLEMENTATIONS
// -----------------------------------------------------------------------------------------------

impl RetryPolicy for Immediate {
    fn on_miss(&mut self, _consecutive: u64) -> RetryDecision {
        RetryDecision::Retry
    }
}

impl RetryPolicy for FixedDelay {
    fn on_miss(&mut self, _consecutive: u64) -> RetryDecision {
        RetryDecision::RetryAfter(self.0)
    }
}

impl RetryPolicy for GiveUpAfter {
    fn on_miss(&mut self, consecutive: u64) -> RetryDecision {
        if consecutive >= self.0 {
            RetryDecision::GiveUp
        } else {
            RetryDecision::Retry
        }
    }
}

impl StreamServer {
    /// Create a server whose session will be built from `builder` on first use.
    pub fn new(builder: DeviceSessionBuilder, address: ServerAddress) -> Self {
        Self {
            builder,
            address,
            retry: Arc::new(|| -> Box<dyn RetryPolicy> { Box::new(Immediate) }),
            slot: Mutex::new(SessionSlot::Empty),
            closing: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Set the retry policy each new live stream is given.
    pub fn retry_policy<F, P>(mut self, factory: F) -> Self
    where
        F: Fn() -> P + Send + Sync + 'static,
        P: RetryPolicy + 'static,
    {
        self.retry = Arc::new(move || -> Box<dyn RetryPolicy> { Box::new(factory()) });

        self
    }

    pub fn address(&self) -> &ServerAddress {
        &self.address
    }

    /// Get the session, creating and starting it on first use.
    ///
    /// The session is kept even if it fails to start, so later calls observe its real state
    /// instead of retrying the device. Returns `None` once the server has been shut down.
    pub fn session(&self) -> Option<Arc<DeviceSession>> {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);

        match &*slot {
            SessionSlot::Ready(s) => return Some(Arc::clone(s)),
            SessionSlot::ShutDown => return None,
            SessionSlot::Empty => (),
        }

        debug!("Creating camera session");
        let session = Arc::new(self.builder.clone().build());
        if !session.start() {
            error!("Failed to start camera");
        }
        *slot = SessionSlot::Ready(Arc::clone(&session));

        Some(session)
    }

    /// Capture a single encoded frame.
    pub fn snapshot(&self) -> Result<EncodedFrame, Unavailable> {
        let session = self.session().ok_or(Unavailable::CameraNotAvailable)?;

        session.get_frame().ok_or(Unavailable::CaptureFailed)
    }

    /// Start a new live stream for one client.
    pub fn live_stream(&self) -> Option<LiveStream> {
        let session = self.session()?;

        Some(LiveStream {
            session,
            policy: (self.retry)(),
            closing: Arc::clone(&self.closing),
            cancelled: None,
            finished: false,
        })
    }

    /// Report the camera status alongside the server address.
    pub fn status(&self) -> Option<StatusReport> {
        let session = self.session()?;

        Some(StatusReport {
            camera: session.get_info(),
            server: self.address.clone(),
        })
    }

    /// End all live streams, stop the session if one was created, and refuse to create another.
    pub fn shutdown(&self) {
        self.closing.store(true, Ordering::SeqCst);

        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);

        if let SessionSlot::Ready(s) = std::mem::replace(&mut *slot, SessionSlot::ShutDown) {
            s.stop();
        }

        info!("Stream server shut down");
    }
}

impl LiveStream {
    /// End the stream as soon as `cancelled` returns `true`.
    ///
    /// The check runs between reads, so a cancelled stream issues no further reads.
    pub fn until<F>(mut self, cancelled: F) -> Self
    where
        F: Fn() -> bool + Send + 'static,
    {
        self.cancelled = Some(Box::new(cancelled));

        self
    }

    fn is_cancelled(&self) -> bool {
        self.closing.load(Ordering::SeqCst) || self.cancelled.as_ref().map_or(false, |c| c())
    }
}

impl Iterator for LiveStream {
    type Item = Vec<u8>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut misses = 0;

        while !self.finished {
            if self.is_cancelled() {
                debug!("Live stream cancelled");
                self.finished = true;
                break;
            }

            if let Some(frame) = self.session.get_frame() {
                return Some(multipart_chunk(&frame));
            }

            misses += 1;
            match self.policy.on_miss(misses) {
                RetryDecision::Retry => (),
                RetryDecision::RetryAfter(d) => thread::sleep(d),
                RetryDecision::GiveUp => {
                    debug!("Live stream giving up after {} missed frames", misses);
                    self.finished = true;
                }
            }
        }

        None
    }
}

// -----------------------------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// -----------------------------------------------------------------------------------------------

/// Wrap a frame as one part of a multipart stream.
pub fn multipart_chunk(frame: &[u8]) -> Vec<u8> {
    let header = format!(
        "--{}\r\nContent-Type: {}\r\n\r\n",
        BOUNDARY, JPEG_CONTENT_TYPE
    );

    let mut chunk = Vec::with_capacity(header.len() + frame.len() + 2);
    chunk.extend_from_slice(header.as_bytes());
    chunk.extend_from_slice(frame);
    chunk.extend_from_slice(b"\r\n");

    chunk
}

// -----------------------------------------------------------------------------------------------
// TESTS
// -----------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {

    use std::sync::atomic::{AtomicBool, Ordering};

    use super::*;
    use crate::device::fake::{solid_frame, AfterScript, ScriptedOpener};
    use crate::device::CaptureParams;
    use crate::encoder::{FrameEncoder, JpegEncoder};

    fn address() -> ServerAddress {
        ServerAddress {
            host: String::from("0.0.0.0"),
            port: 5000,
        }
    }

    fn server(opener: ScriptedOpener) -> StreamServer {
        StreamServer::new(DeviceSessionBuilder::new().opener(opener), address())
    }

    /// Test the exact framing of a multipart part
    #[test]
    fn test_multipart_chunk() {
        assert_eq!(
            multipart_chunk(b"JPEG"),
            b"--frame\r\nContent-Type: image/jpeg\r\n\r\nJPEG\r\n".to_vec()
        );
    }

    /// Test that the stream yields the scripted frames in order, then keeps retrying silently
    #[test]
    fn test_live_stream_yields_then_retries() {
        let frames = vec![
            solid_frame([255, 0, 0]),
            solid_frame([0, 255, 0]),
            solid_frame([0, 0, 255]),
        ];
        let opener = ScriptedOpener::new(frames.clone());
        let stats = opener.stats();
        let server = server(opener).retry_policy(|| GiveUpAfter(500));

        let chunks: Vec<Vec<u8>> = server.live_stream().expect("No stream").collect();

        let encoder = JpegEncoder::default();
        let expected: Vec<Vec<u8>> = frames
            .iter()
            .map(|f| multipart_chunk(&encoder.encode(f).expect("Encoding failed")))
            .collect();

        assert_eq!(chunks, expected);
        assert_eq!(stats.reads(), 3 + 500);
    }

    /// Test that a cancelled stream stops reading from the device
    #[test]
    fn test_live_stream_cancelled() {
        let opener = ScriptedOpener::new(vec![solid_frame([1, 2, 3])]).after(AfterScript::Repeat);
        let stats = opener.stats();
        let server = server(opener);

        let cancelled = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&cancelled);
        let mut stream = server
            .live_stream()
            .expect("No stream")
            .until(move || flag.load(Ordering::SeqCst));

        assert!(stream.next().is_some());
        assert!(stream.next().is_some());

        cancelled.store(true, Ordering::SeqCst);
        assert!(stream.next().is_none());
        assert!(stream.next().is_none());
        assert_eq!(stats.reads(), 2);
    }

    /// Test that a snapshot returns one freshly encoded frame
    #[test]
    fn test_snapshot() {
        let frame = solid_frame([10, 20, 30]);
        let server = server(ScriptedOpener::new(vec![frame.clone()]));

        let expected = JpegEncoder::default().encode(&frame).expect("Encoding failed");
        assert_eq!(server.snapshot(), Ok(expected));
        assert_eq!(server.snapshot(), Err(Unavailable::CaptureFailed));
    }

    /// Test that a camera which cannot be opened fails snapshots without retrying the open
    #[test]
    fn test_snapshot_open_failure() {
        let server = server(ScriptedOpener::failing());

        assert_eq!(server.snapshot(), Err(Unavailable::CaptureFailed));
        assert_eq!(server.snapshot(), Err(Unavailable::CaptureFailed));

        let status = server.status().expect("No status");
        assert_eq!(status.camera, CameraInfo::NotInitialized);
    }

    /// Test that the session is created once and shared
    #[test]
    fn test_session_created_once() {
        let opener = ScriptedOpener::new(Vec::new());
        let stats = opener.stats();
        let server = server(opener);

        let a = server.session().expect("No session");
        let b = server.session().expect("No session");

        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(stats.opens(), 1);
    }

    /// Test that the status reports live device parameters and the server address
    #[test]
    fn test_status() {
        let server = server(ScriptedOpener::new(Vec::new()).granting(CaptureParams {
            width: 800,
            height: 600,
            fps: 24,
        }));

        assert_eq!(
            server.status(),
            Some(StatusReport {
                camera: CameraInfo::Running {
                    width: 800,
                    height: 600,
                    fps: 24,
                    camera_index: 0
                },
                server: address(),
            })
        );
    }

    /// Test that shutting down stops the device and makes the camera unavailable
    #[test]
    fn test_shutdown() {
        let opener = ScriptedOpener::new(vec![solid_frame([0, 0, 0])]).after(AfterScript::Repeat);
        let stats = opener.stats();
        let server = server(opener);

        let session = server.session().expect("No session");
        let mut stream = server.live_stream().expect("No stream");
        assert!(stream.next().is_some());

        server.shutdown();
        server.shutdown();

        assert!(stream.next().is_none());
        assert!(!session.is_running());
        assert_eq!(stats.live_handles(), 0);
        assert_eq!(server.snapshot(), Err(Unavailable::CameraNotAvailable));
        assert!(server.live_stream().is_none());
        assert!(server.status().is_none());
    }

    /// Test that retry policies make the expected decisions
    #[test]
    fn test_retry_policies() {
        assert_eq!(Immediate.on_miss(u64::MAX), RetryDecision::Retry);

        let d = Duration::from_millis(5);
        assert_eq!(FixedDelay(d).on_miss(1), RetryDecision::RetryAfter(d));

        let mut g = GiveUpAfter(2);
        assert_eq!(g.on_miss(1), RetryDecision::Retry);
        assert_eq!(g.on_miss(2), RetryDecision::GiveUp);
    }
}
