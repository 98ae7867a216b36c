//! # V4L2 Capture Backend
//!
//! Real cameras accessed through [`rscam`](https://github.com/loyd/rscam), so only Linux is
//! supported. Devices are addressed by index and opened at `/dev/video{index}`.

// -----------------------------------------------------------------------------------------------
// IMPORTS
// -----------------------------------------------------------------------------------------------

use image::{DynamicImage, ImageFormat, RgbImage};
use log::{debug, info, warn};
use rscam::{Camera, Config, Frame, IntervalInfo, ResolutionInfo};

use crate::device::{CaptureDevice, CaptureParams, DeviceOpener};
use crate::error::{Error, Result};

// -----------------------------------------------------------------------------------------------
// CONSTANTS
// -----------------------------------------------------------------------------------------------

/// Pixel formats this backend can turn into images, in order of preference.
const PREFERRED_FORMATS: [&[u8; 4]; 2] = [b"MJPG", b"YUYV"];

/// `errno` reported by V4L2 once the device has gone away.
const ENODEV: i32 = 19;

// -----------------------------------------------------------------------------------------------
// DATA STRUCTURES
// -----------------------------------------------------------------------------------------------

/// Opens V4L2 devices at `/dev/video{index}`.
#[derive(Debug, Default, Clone, Copy)]
pub struct V4l2Opener;

/// An open V4L2 camera.
pub struct V4l2Device {
    camera: Option<Camera>,

    format: [u8; 4],

    /// Mode the device advertised first, used when a request is rejected.
    fallback: Mode,

    /// Mode the device is (or will be) streaming with.
    active: Mode,

    streaming: bool,

    /// Set once the driver reports the device as gone.
    lost: bool,
}

/// A resolution and frame interval pair as understood by V4L2.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Mode {
    resolution: (u32, u32),
    interval: (u32, u32),
}

// -----------------------------------------------------------------------------------------------
// IMPLEMENTATIONS
// -----------------------------------------------------------------------------------------------

impl DeviceOpener for V4l2Opener {
    fn open(&self, index: u32) -> Result<Box<dyn CaptureDevice>> {
        Ok(Box::new(V4l2Device::open(index)?))
    }
}

impl V4l2Device {
    /// Open the camera at `/dev/video{index}` and pick a pixel format.
    ///
    /// The device is not streaming until it is configured or first read from.
    pub fn open(index: u32) -> Result<Self> {
        let path = format!("/dev/video{}", index);

        let camera = Camera::new(&path).map_err(|e| Error::DeviceOpenError {
            index,
            reason: format!("{}: {}", path, e),
        })?;

        let format = select_format(&camera)?;
        let fallback = first_mode(&camera, &format);

        debug!(
            "Opened {} with format {}, fallback mode {:?}",
            path,
            String::from_utf8_lossy(&format),
            fallback
        );

        Ok(Self {
            camera: Some(camera),
            format,
            fallback,
            active: fallback,
            streaming: false,
            lost: false,
        })
    }

    /// Stop the stream if it is running, keeping the device open.
    fn halt(&mut self) {
        if let (Some(camera), true) = (self.camera.as_mut(), self.streaming) {
            if let Err(e) = camera.stop() {
                warn!("Error stopping camera stream: {}", e);
            }
        }
        self.streaming = false;
    }

    /// Start streaming with the given mode.
    fn start(&mut self, mode: Mode) -> std::result::Result<(), rscam::Error> {
        let camera = match self.camera.as_mut() {
            Some(c) => c,
            None => return Err(rscam::Error::Io(closed_io_error())),
        };

        camera.start(&Config {
            interval: mode.interval,
            resolution: mode.resolution,
            format: &self.format,
            ..Config::default()
        })?;

        self.active = mode;
        self.streaming = true;

        Ok(())
    }

    /// Record an I/O error, flagging the device as lost if it has disappeared.
    fn note_io_error(&mut self, e: &std::io::Error) {
        if e.raw_os_error() == Some(ENODEV) {
            warn!("Camera device has disappeared");
            self.lost = true;
        }
    }
}

impl CaptureDevice for V4l2Device {
    fn is_opened(&self) -> bool {
        self.camera.is_some() && !self.lost
    }

    fn configure(&mut self, requested: &CaptureParams) -> Result<()> {
        self.halt();

        let mode = Mode {
            resolution: (requested.width, requested.height),
            interval: (1, requested.fps.max(1)),
        };

        match self.start(mode) {
            Ok(()) => {
                info!("Camera granted requested mode {:?}", mode);
                Ok(())
            }
            Err(e) => {
                warn!(
                    "Camera rejected mode {:?} ({}), falling back to {:?}",
                    mode, e, self.fallback
                );

                let fallback = self.fallback;
                self.start(fallback).map_err(|e| match e {
                    rscam::Error::Io(io) => Error::CameraCaptureError(io),
                    other => Error::CameraCaptureError(std::io::Error::new(
                        std::io::ErrorKind::InvalidInput,
                        other.to_string(),
                    )),
                })
            }
        }
    }

    fn params(&self) -> CaptureParams {
        let (num, den) = self.active.interval;

        CaptureParams {
            width: self.active.resolution.0,
            height: self.active.resolution.1,
            fps: if num == 0 { 0 } else { den / num },
        }
    }

    fn read(&mut self) -> Result<DynamicImage> {
        if !self.is_opened() {
            return Err(Error::DeviceClosed);
        }

        if !self.streaming {
            let mode = self.active;
            if let Err(e) = self.start(mode) {
                if let rscam::Error::Io(ref io) = e {
                    self.note_io_error(io);
                }
                return Err(Error::NotOpened);
            }
        }

        let captured = match self.camera.as_ref() {
            Some(camera) => camera.capture(),
            None => return Err(Error::DeviceClosed),
        };

        let frame = match captured {
            Ok(f) => f,
            Err(e) => {
                self.note_io_error(&e);
                return Err(Error::CameraCaptureError(e));
            }
        };

        // The driver may have adjusted the resolution after negotiation
        self.active.resolution = frame.resolution;

        rscam_frame_to_dynamic_image(frame)
    }

    fn release(&mut self) {
        self.halt();
        if self.camera.take().is_some() {
            debug!("Released camera device");
        }
    }
}

impl Drop for V4l2Device {
    fn drop(&mut self) {
        self.release();
    }
}

// -----------------------------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// -----------------------------------------------------------------------------------------------

/// Choose the first of [`PREFERRED_FORMATS`] the camera supports.
fn select_format(camera: &Camera) -> Result<[u8; 4]> {
    let supported: Vec<[u8; 4]> = camera
        .formats()
        .filter_map(|f| f.ok())
        .map(|f| f.format)
        .collect();

    pick_format(&supported)
}

/// The first of [`PREFERRED_FORMATS`] found in `supported`.
fn pick_format(supported: &[[u8; 4]]) -> Result<[u8; 4]> {
    PREFERRED_FORMATS
        .iter()
        .copied()
        .copied()
        .find(|p| supported.contains(p))
        .ok_or_else(|| {
            Error::UnsupportedFormat(
                supported
                    .iter()
                    .map(|s| String::from_utf8_lossy(s).into_owned())
                    .collect(),
            )
        })
}

/// The first mode the camera advertises for the format, or a conservative guess.
fn first_mode(camera: &Camera, format: &[u8]) -> Mode {
    let resolution = match camera.resolutions(format) {
        Ok(ResolutionInfo::Discretes(r)) if !r.is_empty() => r[0],
        Ok(ResolutionInfo::Stepwise { max, .. }) => max,
        _ => (640, 480),
    };

    let interval = match camera.intervals(format, resolution) {
        Ok(IntervalInfo::Discretes(i)) if !i.is_empty() => i[0],
        Ok(IntervalInfo::Stepwise { min, .. }) => min,
        _ => (1, 30),
    };

    Mode {
        resolution,
        interval,
    }
}

/// Convert an `rscam::Frame` into an `image::DynamicImage`.
fn rscam_frame_to_dynamic_image(frame: Frame) -> Result<DynamicImage> {
    match &frame.format {
        b"MJPG" => image::load_from_memory_with_format(&frame, ImageFormat::Jpeg)
            .map_err(|e| Error::ImageConversionError(e)),
        b"YUYV" => yuyv_to_rgb(&frame, frame.resolution.0, frame.resolution.1)
            .map(DynamicImage::ImageRgb8)
            .ok_or_else(|| {
                Error::CameraCaptureError(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "YUYV frame shorter than its resolution",
                ))
            }),
        other => Err(Error::UnsupportedFormat(vec![
            String::from_utf8_lossy(other).into_owned()
        ])),
    }
}

/// Convert packed YUYV 4:2:2 data into an RGB image.
///
/// Returns `None` if `data` holds fewer than `width * height * 2` bytes.
pub(crate) fn yuyv_to_rgb(data: &[u8], width: u32, height: u32) -> Option<RgbImage> {
    let pixels = width as usize * height as usize;
    if data.len() < pixels * 2 {
        return None;
    }

    let mut rgb = Vec::with_capacity(pixels * 3);
    for chunk in data[..pixels * 2].chunks_exact(4) {
        let (y0, u, y1, v) = (chunk[0], chunk[1], chunk[2], chunk[3]);
        rgb.extend_from_slice(&yuv_to_rgb(y0, u, v));
        rgb.extend_from_slice(&yuv_to_rgb(y1, u, v));
    }

    // Odd pixel counts leave half a macropixel behind
    if pixels % 2 == 1 {
        let base = (pixels - 1) * 2;
        let (y, u) = (data[base], data[base + 1]);
        rgb.extend_from_slice(&yuv_to_rgb(y, u, 128));
    }

    RgbImage::from_raw(width, height, rgb)
}

/// BT.601 conversion of a single pixel.
fn yuv_to_rgb(y: u8, u: u8, v: u8) -> [u8; 3] {
    let c = y as i32 - 16;
    let d = u as i32 - 128;
    let e = v as i32 - 128;

    let clamp = |x: i32| x.clamp(0, 255) as u8;

    [
        clamp((298 * c + 409 * e + 128) >> 8),
        clamp((298 * c - 100 * d - 208 * e + 128) >> 8),
        clamp((298 * c + 516 * d + 128) >> 8),
    ]
}

/// Error used when the camera handle has already been released.
fn closed_io_error() -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::NotConnected, "camera released")
}

// -----------------------------------------------------------------------------------------------
// TESTS
// -----------------------------------------------------------------------------------------------
