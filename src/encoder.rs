//! # Frame Encoder Module
//!
//! Compresses raw frames into the still images served to clients.

// -----------------------------------------------------------------------------------------------
// IMPORTS
// -----------------------------------------------------------------------------------------------

use derive_more::{Deref, From, Into};
use image::codecs::jpeg;
use image::DynamicImage;

use crate::error::{Error, Result};

// -----------------------------------------------------------------------------------------------
// CONSTANTS
// -----------------------------------------------------------------------------------------------

/// JPEG quality used unless configured otherwise.
pub const DEFAULT_JPEG_QUALITY: u8 = 85;

/// MIME type of the frames produced by [`JpegEncoder`].
pub const JPEG_CONTENT_TYPE: &str = "image/jpeg";

// -----------------------------------------------------------------------------------------------
// TRAITS
// -----------------------------------------------------------------------------------------------

/// Turns a raw frame into compressed bytes.
pub trait FrameEncoder: Send + Sync {
    /// Encode a single frame.
    fn encode(&self, frame: &DynamicImage) -> Result<EncodedFrame>;
}

// -----------------------------------------------------------------------------------------------
// DATA STRUCTURES
// -----------------------------------------------------------------------------------------------

/// One compressed still image, freshly produced for a single caller.
#[derive(Debug, Clone, PartialEq, Eq, Deref, From, Into)]
pub struct EncodedFrame(Vec<u8>);

/// Encodes frames as baseline JPEG.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JpegEncoder {
    quality: u8,
}

// -----------------------------------------------------------------------------------------------
// IMPLEMENTATIONS
// -----------------------------------------------------------------------------------------------

impl EncodedFrame {
    /// Consume the frame, returning the compressed bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }
}

impl JpegEncoder {
    /// Create an encoder with the given quality, clamped to `1..=100`.
    pub fn new(quality: u8) -> Self {
        Self {
            quality: quality.clamp(1, 100),
        }
    }

    pub fn quality(&self) -> u8 {
        self.quality
    }
}

impl Default for JpegEncoder {
    fn default() -> Self {
        Self::new(DEFAULT_JPEG_QUALITY)
    }
}

impl FrameEncoder for JpegEncoder {
    fn encode(&self, frame: &DynamicImage) -> Result<EncodedFrame> {
        let mut buf = Vec::new();

        // JPEG has no alpha channel, so everything goes through RGB8
        let rgb = frame.to_rgb8();
        jpeg::JpegEncoder::new_with_quality(&mut buf, self.quality)
            .encode_image(&rgb)
            .map_err(|e| Error::EncodeError(e))?;

        Ok(EncodedFrame(buf))
    }
}

// -----------------------------------------------------------------------------------------------
// TESTS
// -----------------------------------------------------------------------------------------------
