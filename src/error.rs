//! # `cv_camserver` Error module
//!
//! Provides abstractions over errors which can occur inside the capture and encoding layers.
//!
//! None of these errors cross the [`DeviceSession`](crate::DeviceSession) boundary, the session
//! logs them and reports an absent frame or a `false` start instead.

// -----------------------------------------------------------------------------------------------
// IMPORTS
// -----------------------------------------------------------------------------------------------

use thiserror;

// -----------------------------------------------------------------------------------------------
// ENUMERATIONS
// -----------------------------------------------------------------------------------------------

/// Result type used by faillible functions inside the `cv_camserver` crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Represents errors which can occur during use of the `cv_camserver` crate.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Cannot open camera at index {index}: {reason}")]
    DeviceOpenError { index: u32, reason: String },

    #[error("Error capturing camera image: {0}")]
    CameraCaptureError(std::io::Error),

    #[error("Error occured while converting an image: {0}")]
    ImageConversionError(image::ImageError),

    #[error("Error encoding frame: {0}")]
    EncodeError(image::ImageError),

    #[error("Camera does not support a usable pixel format (supported: {0:?})")]
    UnsupportedFormat(Vec<String>),

    #[error("Camera device has been closed")]
    DeviceClosed,

    #[error("Camera stream has not been opened")]
    NotOpened,
}
