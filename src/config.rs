//! # Configuration Module
//!
//! Command line and environment configuration, read once at startup.

// -----------------------------------------------------------------------------------------------
// IMPORTS
// -----------------------------------------------------------------------------------------------

use clap::{Parser, ValueEnum};

use crate::builder::DeviceSessionBuilder;
use crate::device::fake::TestPatternOpener;
use crate::device::v4l2::V4l2Opener;
use crate::device::{DEFAULT_FPS, DEFAULT_HEIGHT, DEFAULT_WIDTH};
use crate::encoder::{JpegEncoder, DEFAULT_JPEG_QUALITY};
use crate::server::ServerAddress;

// -----------------------------------------------------------------------------------------------
// DATA STRUCTURES
// -----------------------------------------------------------------------------------------------

/// Serve a local camera as an MJPEG stream over HTTP.
#[derive(Parser, Debug, Clone, PartialEq, Eq)]
#[command(author, version, about)]
pub struct Config {
    /// Index of the camera to open, i.e. N in /dev/videoN
    #[arg(long, env = "CAMERA_INDEX", default_value_t = 0)]
    pub camera_index: u32,

    /// Address to bind the HTTP server to
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Port to bind the HTTP server to
    #[arg(long, env = "PORT", default_value_t = 5000)]
    pub port: u16,

    /// Frame width requested from the camera
    #[arg(long, env = "CAMERA_WIDTH", default_value_t = DEFAULT_WIDTH)]
    pub width: u32,

    /// Frame height requested from the camera
    #[arg(long, env = "CAMERA_HEIGHT", default_value_t = DEFAULT_HEIGHT)]
    pub height: u32,

    /// Frame rate requested from the camera
    #[arg(long, env = "CAMERA_FPS", default_value_t = DEFAULT_FPS)]
    pub fps: u32,

    /// JPEG quality of served frames
    #[arg(
        long,
        env = "JPEG_QUALITY",
        default_value_t = DEFAULT_JPEG_QUALITY,
        value_parser = clap::value_parser!(u8).range(1..=100)
    )]
    pub jpeg_quality: u8,

    /// Where frames come from
    #[arg(long, env = "CAMERA_BACKEND", value_enum, default_value_t = Backend::V4l2)]
    pub backend: Backend,
}

/// Frame sources selectable at startup.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    /// A V4L2 camera
    V4l2,

    /// A synthetic moving gradient, no camera needed
    TestPattern,
}

// -----------------------------------------------------------------------------------------------
// IMPLEMENTATIONS
// -----------------------------------------------------------------------------------------------

impl Config {
    /// Session builder for the configured camera.
    pub fn session_builder(&self) -> DeviceSessionBuilder {
        let builder = DeviceSessionBuilder::new()
            .index(self.camera_index)
            .resolution(self.width, self.height)
            .fps(self.fps)
            .encoder(JpegEncoder::new(self.jpeg_quality));

        match self.backend {
            Backend::V4l2 => builder.opener(V4l2Opener),
            Backend::TestPattern => builder.opener(TestPatternOpener),
        }
    }

    /// Address reported by the status endpoint.
    pub fn address(&self) -> ServerAddress {
        ServerAddress {
            host: self.host.clone(),
            port: self.port,
        }
    }

    /// `host:port` string to bind to.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

// -----------------------------------------------------------------------------------------------
// TESTS
// -----------------------------------------------------------------------------------------------
