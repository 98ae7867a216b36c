//! # Device Session Module
//!
//! A [`DeviceSession`] is the sole owner of one capture device. Every operation touching the
//! device handle takes the same lock, so at most one read is ever in flight, and a read is only
//! attempted on a handle which is open.
//!
//! Failures never leave this module as errors: they are logged and collapsed into a `false`
//! start or an absent frame.

// -----------------------------------------------------------------------------------------------
// IMPORTS
// -----------------------------------------------------------------------------------------------

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::{debug, error, info, warn};
use serde::Serialize;

use crate::device::{CaptureDevice, CaptureParams, DeviceOpener};
use crate::encoder::{EncodedFrame, FrameEncoder};

// -----------------------------------------------------------------------------------------------
// DATA STRUCTS
// -----------------------------------------------------------------------------------------------

/// Exclusive, synchronised access to a single capture device.
///
/// Build one with [`DeviceSessionBuilder`](crate::DeviceSessionBuilder).
pub struct DeviceSession {
    index: u32,

    requested: CaptureParams,

    opener: Arc<dyn DeviceOpener>,

    encoder: Arc<dyn FrameEncoder>,

    inner: Mutex<Inner>,
}

/// State guarded by the session lock. `handle` is `Some` iff `state` is `Opened`.
struct Inner {
    state: SessionState,

    handle: Option<Box<dyn CaptureDevice>>,
}

// -----------------------------------------------------------------------------------------------
// ENUMERATIONS
// -----------------------------------------------------------------------------------------------

/// Lifecycle of a [`DeviceSession`]. Sessions only ever move forward through these states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    Opened,
    Closed,
}

/// Status of the device as reported to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CameraInfo {
    /// No device handle exists, either because the session never started or it was stopped.
    NotInitialized,

    /// A handle exists but the device reports itself closed.
    NotOpened,

    /// The device is streaming, values are those the device reports, not those requested.
    Running {
        width: u32,
        height: u32,
        fps: u32,
        camera_index: u32,
    },
}

// -----------------------------------------------------------------------------------------------
// IMPLEMENTATIONS
// -----------------------------------------------------------------------------------------------

impl DeviceSession {
    pub(crate) fn new(
        index: u32,
        requested: CaptureParams,
        opener: Arc<dyn DeviceOpener>,
        encoder: Arc<dyn FrameEncoder>,
    ) -> Self {
        Self {
            index,
            requested,
            opener,
            encoder,
            inner: Mutex::new(Inner {
                state: SessionState::Uninitialized,
                handle: None,
            }),
        }
    }

    /// Index of the device this session opens.
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Capture parameters requested when the device is started.
    pub fn requested(&self) -> CaptureParams {
        self.requested
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.lock().state
    }

    /// Open the device and request the configured capture parameters.
    ///
    /// Returns `true` if the device is open. Calling this on an already open session does
    /// nothing and returns `true`, calling it on a stopped session does nothing and returns
    /// `false`. The requested parameters are best-effort, a device that ignores them still
    /// counts as started.
    pub fn start(&self) -> bool {
        let mut inner = self.lock();

        match inner.state {
            SessionState::Opened => {
                debug!("Camera at index {} already started", self.index);
                return true;
            }
            SessionState::Closed => {
                warn!(
                    "Camera session at index {} has been stopped and cannot be restarted",
                    self.index
                );
                return false;
            }
            SessionState::Uninitialized => (),
        }

        let mut handle = match self.opener.open(self.index) {
            Ok(h) => h,
            Err(e) => {
                error!("Failed to open camera at index {}: {}", self.index, e);
                return false;
            }
        };

        if !handle.is_opened() {
            error!("Failed to open camera at index {}", self.index);
            handle.release();
            return false;
        }

        if let Err(e) = handle.configure(&self.requested) {
            warn!(
                "Camera at index {} did not accept {:?}: {}",
                self.index, self.requested, e
            );
        }

        inner.handle = Some(handle);
        inner.state = SessionState::Opened;

        info!("Camera started at index {}", self.index);

        true
    }

    /// Read and encode one frame.
    ///
    /// The lock is held for exactly one read and one encode. Returns `None` if the session is
    /// not open, the device is no longer open, or the read or encode fails.
    pub fn get_frame(&self) -> Option<EncodedFrame> {
        let mut inner = self.lock();

        if inner.state != SessionState::Opened {
            return None;
        }

        let handle = inner.handle.as_mut()?;
        if !handle.is_opened() {
            return None;
        }

        let raw = match handle.read() {
            Ok(r) => r,
            Err(e) => {
                debug!("Error reading frame: {}", e);
                return None;
            }
        };

        match self.encoder.encode(&raw) {
            Ok(f) => Some(f),
            Err(e) => {
                error!("Error getting frame: {}", e);
                None
            }
        }
    }

    /// Release the device, if held, and close the session. Safe to call any number of times.
    pub fn stop(&self) {
        let mut inner = self.lock();

        if let Some(mut handle) = inner.handle.take() {
            handle.release();
            info!("Camera stopped");
        }

        inner.state = SessionState::Closed;
    }

    /// Whether the session is open and the device still reports itself open.
    pub fn is_running(&self) -> bool {
        let inner = self.lock();

        inner.state == SessionState::Opened
            && inner.handle.as_ref().map_or(false, |h| h.is_opened())
    }

    /// Report the status of the device, reading effective parameters live from the handle.
    pub fn get_info(&self) -> CameraInfo {
        let inner = self.lock();

        match inner.handle.as_ref() {
            None => CameraInfo::NotInitialized,
            Some(h) if !h.is_opened() => CameraInfo::NotOpened,
            Some(h) => {
                let params = h.params();
                CameraInfo::Running {
                    width: params.width,
                    height: params.height,
                    fps: params.fps,
                    camera_index: self.index,
                }
            }
        }
    }

    /// Take the session lock. A panic while holding it cannot leave `Inner` half updated, so a
    /// poisoned lock is still usable.
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for DeviceSession {
    fn drop(&mut self) {
        self.stop();
    }
}

// -----------------------------------------------------------------------------------------------
// TESTS
// -----------------------------------------------------------------------------------------------
