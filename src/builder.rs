//! # `DeviceSessionBuilder` implementation
//!
//! This module implements the builder for device sessions.

// -----------------------------------------------------------------------------------------------
// IMPORTS
// -----------------------------------------------------------------------------------------------

use std::sync::Arc;

use crate::device::v4l2::V4l2Opener;
use crate::device::{CaptureParams, DeviceOpener};
use crate::encoder::{FrameEncoder, JpegEncoder};
use crate::session::DeviceSession;

// -----------------------------------------------------------------------------------------------
// DATA STRUCTURES
// -----------------------------------------------------------------------------------------------

/// Builds a [`DeviceSession`].
///
/// Defaults to device index 0, a V4L2 camera, 1280x720 at 30 fps, and JPEG quality 85.
#[derive(Clone)]
pub struct DeviceSessionBuilder {
    index: u32,

    params: CaptureParams,

    opener: Arc<dyn DeviceOpener>,

    encoder: Arc<dyn FrameEncoder>,
}

// -----------------------------------------------------------------------------------------------
// IMPLEMENTATIONS
// -----------------------------------------------------------------------------------------------

impl DeviceSessionBuilder {
    pub fn new() -> Self {
        Self {
            index: 0,
            params: CaptureParams::default(),
            opener: Arc::new(V4l2Opener),
            encoder: Arc::new(JpegEncoder::default()),
        }
    }

    /// Set the index of the camera, i.e. `N` in `/dev/videoN` for V4L2 cameras.
    pub fn index(mut self, index: u32) -> Self {
        self.index = index;

        self
    }

    /// Set the resolution requested from the camera.
    ///
    /// Default value is `(1280, 720)`.
    pub fn resolution(mut self, width: u32, height: u32) -> Self {
        self.params.width = width;
        self.params.height = height;

        self
    }

    /// Set the frame rate requested from the camera.
    ///
    /// Default value is 30.
    pub fn fps(mut self, fps: u32) -> Self {
        self.params.fps = fps;

        self
    }

    /// Set how devices are opened.
    pub fn opener<O: DeviceOpener + 'static>(mut self, opener: O) -> Self {
        self.opener = Arc::new(opener);

        self
    }

    /// Set how frames are encoded.
    pub fn encoder<E: FrameEncoder + 'static>(mut self, encoder: E) -> Self {
        self.encoder = Arc::new(encoder);

        self
    }

    /// Build the session. The device is not opened until [`DeviceSession::start`] is called.
    pub fn build(self) -> DeviceSession {
        DeviceSession::new(self.index, self.params, self.opener, self.encoder)
    }
}

impl Default for DeviceSessionBuilder {
    fn default() -> Self {
        Self::new()
    }
}

// -----------------------------------------------------------------------------------------------
// TESTS
// -----------------------------------------------------------------------------------------------
