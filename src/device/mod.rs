//! # Capture Device Module
//!
//! This module defines the capabilities the rest of the crate needs from a physical camera:
//! opening it, asking it for capture parameters, reading raw frames from it and releasing it.
//!
//! Two backends are provided, [`v4l2`] for real cameras and [`fake`] for synthetic or scripted
//! frames.

// -----------------------------------------------------------------------------------------------
// IMPORTS
// -----------------------------------------------------------------------------------------------

use image::DynamicImage;
use serde::Serialize;

use crate::error::Result;

// -----------------------------------------------------------------------------------------------
// MODULES
// -----------------------------------------------------------------------------------------------

pub mod fake;
pub mod v4l2;

// -----------------------------------------------------------------------------------------------
// CONSTANTS
// -----------------------------------------------------------------------------------------------

/// Width requested from the camera when nothing else is configured.
pub const DEFAULT_WIDTH: u32 = 1280;

/// Height requested from the camera when nothing else is configured.
pub const DEFAULT_HEIGHT: u32 = 720;

/// Frame rate requested from the camera when nothing else is configured.
pub const DEFAULT_FPS: u32 = 30;

// -----------------------------------------------------------------------------------------------
// TRAITS
// -----------------------------------------------------------------------------------------------

/// An open handle to a capture device.
///
/// Implementations are not required to be thread safe beyond `Send`, the owning
/// [`DeviceSession`](crate::DeviceSession) serialises every call.
pub trait CaptureDevice: Send {
    /// Whether the handle is still usable. This can become `false` at any time, for instance
    /// when the camera is unplugged.
    fn is_opened(&self) -> bool;

    /// Ask the device for the given capture parameters.
    ///
    /// This is a request, devices are free to grant something else. Failing to apply any of the
    /// parameters is reported as an error but must leave the device usable.
    fn configure(&mut self, requested: &CaptureParams) -> Result<()>;

    /// The parameters the device is actually delivering.
    fn params(&self) -> CaptureParams;

    /// Read the next raw frame from the device.
    fn read(&mut self) -> Result<DynamicImage>;

    /// Release the underlying device. Calling this more than once has no effect.
    fn release(&mut self);
}

/// Something which can open capture devices by index.
pub trait DeviceOpener: Send + Sync {
    /// Open the device with the given index.
    fn open(&self, index: u32) -> Result<Box<dyn CaptureDevice>>;
}

// -----------------------------------------------------------------------------------------------
// DATA STRUCTURES
// -----------------------------------------------------------------------------------------------

/// Capture parameters of a device, either requested or effective.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CaptureParams {
    /// Frame width in pixels
    pub width: u32,

    /// Frame height in pixels
    pub height: u32,

    /// Frames per second
    pub fps: u32,
}

// -----------------------------------------------------------------------------------------------
// IMPLEMENTATIONS
// -----------------------------------------------------------------------------------------------

impl Default for CaptureParams {
    fn default() -> Self {
        Self {
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            fps: DEFAULT_FPS,
        }
    }
}

impl<F> DeviceOpener for F
where
    F: Fn(u32) -> Result<Box<dyn CaptureDevice>> + Send + Sync,
{
    fn open(&self, index: u32) -> Result<Box<dyn CaptureDevice>> {
        self(index)
    }
}
