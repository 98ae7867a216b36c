//! # Camera server for use in the CV system
//!
//! This crate exposes a single local camera over HTTP, either as a continuously updating
//! `multipart/x-mixed-replace` JPEG stream or as single snapshots, alongside a status endpoint.
//! Under the hood this uses [`rscam`](https://github.com/loyd/rscam) to access cameras over V4L2,
//! therefore currently only Linux is supported.
//!
//! ## Dependencies
//!
//! Cameras are driven with raw V4L2 ioctls, so `libv4l2` is not needed. `v4l-utils` is useful
//! to find the index of a camera:
//!
//! ```shell
//! v4l2-ctl --list-devices
//! ```
//!
//! Without a camera, run with `--backend test-pattern`.
//!
//! ## Usage
//!
//! The camera is owned by a [`DeviceSession`], which serialises every access to the device:
//!
//! ```no_run
//! use cv_camserver::prelude::*;
//!
//! let session = DeviceSessionBuilder::new()
//!     // Open /dev/video0
//!     .index(0)
//!     // Requested from the camera, which may grant something else
//!     .resolution(1280, 720)
//!     .fps(30)
//!     .build();
//!
//! if session.start() {
//!     let jpeg = session.get_frame();
//! }
//! ```
//!
//! A [`StreamServer`] creates the session on first use and adapts it for HTTP, and
//! [`http::create_router`] wires it into an [`axum`] router.

// -----------------------------------------------------------------------------------------------
// EXPORTS
// -----------------------------------------------------------------------------------------------

pub use builder::DeviceSessionBuilder;
pub use device::{CaptureDevice, CaptureParams, DeviceOpener};
pub use encoder::{EncodedFrame, FrameEncoder, JpegEncoder};
pub use error::{Error, Result};
pub use server::{
    LiveStream, RetryDecision, RetryPolicy, ServerAddress, StatusReport, StreamServer, Unavailable,
};
pub use session::{CameraInfo, DeviceSession, SessionState};

// -----------------------------------------------------------------------------------------------
// MODULES
// -----------------------------------------------------------------------------------------------

mod builder;
pub mod config;
pub mod device;
mod encoder;
mod error;
pub mod http;
pub mod server;
mod session;

pub mod prelude {
    pub use crate::{DeviceSession, DeviceSessionBuilder, StreamServer};
    pub use crate::{CameraInfo, EncodedFrame, SessionState};
}
