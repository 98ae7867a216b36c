//! # Fake Capture Backend
//!
//! Devices which need no hardware: a scripted device that replays a fixed list of frames, used
//! to exercise the session and server, and a moving test pattern for running the server on a
//! machine without a camera.

// -----------------------------------------------------------------------------------------------
// IMPORTS
// -----------------------------------------------------------------------------------------------

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use image::{DynamicImage, Rgb, RgbImage};

use crate::device::{CaptureDevice, CaptureParams, DeviceOpener};
use crate::error::{Error, Result};

// -----------------------------------------------------------------------------------------------
// CONSTANTS
// -----------------------------------------------------------------------------------------------

/// Largest frame the test pattern will produce, whatever is requested.
const PATTERN_MAX: (u32, u32) = (1920, 1080);

// -----------------------------------------------------------------------------------------------
// DATA STRUCTURES
// -----------------------------------------------------------------------------------------------

/// Counters shared between a [`ScriptedOpener`] and every device it opens.
#[derive(Debug, Default)]
pub struct FakeStats {
    opens: AtomicUsize,
    live_handles: AtomicUsize,
    reads: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    disconnected: AtomicBool,
}

/// What a scripted device does once it has replayed all of its frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AfterScript {
    /// Every further read fails.
    Fail,

    /// Start again from the first frame.
    Repeat,
}

/// Opens [`ScriptedDevice`]s which replay a fixed list of frames.
pub struct ScriptedOpener {
    frames: Vec<DynamicImage>,

    after: AfterScript,

    fail_open: bool,

    granted: Option<CaptureParams>,

    read_delay: Duration,

    stats: Arc<FakeStats>,
}

/// A device replaying frames handed to it by a [`ScriptedOpener`].
pub struct ScriptedDevice {
    frames: VecDeque<DynamicImage>,

    script: Vec<DynamicImage>,

    after: AfterScript,

    granted: Option<CaptureParams>,

    params: CaptureParams,

    read_delay: Duration,

    stats: Arc<FakeStats>,

    released: bool,
}

/// Opens [`TestPatternDevice`]s.
#[derive(Debug, Default, Clone, Copy)]
pub struct TestPatternOpener;

/// Generates a moving colour gradient at whatever resolution is requested.
pub struct TestPatternDevice {
    params: CaptureParams,

    tick: u32,

    released: bool,
}

// -----------------------------------------------------------------------------------------------
// IMPLEMENTATIONS
// -----------------------------------------------------------------------------------------------

impl FakeStats {
    /// Number of times a device has been opened.
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    /// Number of handles opened and not yet released.
    pub fn live_handles(&self) -> usize {
        self.live_handles.load(Ordering::SeqCst)
    }

    /// Number of reads attempted, successful or not.
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    /// Largest number of reads ever observed running at the same time.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Simulate the camera being unplugged, open handles report themselves closed.
    pub fn disconnect(&self) {
        self.disconnected.store(true, Ordering::SeqCst);
    }

    fn is_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::SeqCst)
    }
}

impl ScriptedOpener {
    /// Create an opener whose devices yield `frames` in order, then fail every read.
    pub fn new(frames: Vec<DynamicImage>) -> Self {
        Self {
            frames,
            after: AfterScript::Fail,
            fail_open: false,
            granted: None,
            read_delay: Duration::ZERO,
            stats: Arc::new(FakeStats::default()),
        }
    }

    /// An opener which can never open its device.
    pub fn failing() -> Self {
        Self {
            fail_open: true,
            ..Self::new(Vec::new())
        }
    }

    /// Set the behaviour once the frames run out.
    pub fn after(mut self, after: AfterScript) -> Self {
        self.after = after;

        self
    }

    /// Grant these parameters regardless of what is requested.
    pub fn granting(mut self, params: CaptureParams) -> Self {
        self.granted = Some(params);

        self
    }

    /// Make every read block for the given duration.
    pub fn read_delay(mut self, delay: Duration) -> Self {
        self.read_delay = delay;

        self
    }

    /// Counters shared with every device this opener creates.
    pub fn stats(&self) -> Arc<FakeStats> {
        Arc::clone(&self.stats)
    }
}

impl DeviceOpener for ScriptedOpener {
    fn open(&self, index: u32) -> Result<Box<dyn CaptureDevice>> {
        if self.fail_open {
            return Err(Error::DeviceOpenError {
                index,
                reason: String::from("scripted open failure"),
            });
        }

        self.stats.opens.fetch_add(1, Ordering::SeqCst);
        self.stats.live_handles.fetch_add(1, Ordering::SeqCst);

        Ok(Box::new(ScriptedDevice {
            frames: self.frames.iter().cloned().collect(),
            script: self.frames.clone(),
            after: self.after,
            granted: self.granted,
            params: self.granted.unwrap_or_default(),
            read_delay: self.read_delay,
            stats: Arc::clone(&self.stats),
            released: false,
        }))
    }
}

impl ScriptedDevice {
    fn next_frame(&mut self) -> Option<DynamicImage> {
        if self.frames.is_empty() && self.after == AfterScript::Repeat {
            self.frames = self.script.iter().cloned().collect();
        }

        self.frames.pop_front()
    }
}

impl CaptureDevice for ScriptedDevice {
    fn is_opened(&self) -> bool {
        !self.released && !self.stats.is_disconnected()
    }

    fn configure(&mut self, requested: &CaptureParams) -> Result<()> {
        self.params = self.granted.unwrap_or(*requested);

        Ok(())
    }

    fn params(&self) -> CaptureParams {
        self.params
    }

    fn read(&mut self) -> Result<DynamicImage> {
        self.stats.reads.fetch_add(1, Ordering::SeqCst);

        let in_flight = self.stats.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.stats.max_in_flight.fetch_max(in_flight, Ordering::SeqCst);

        if !self.read_delay.is_zero() {
            thread::sleep(self.read_delay);
        }

        let result = if !self.is_opened() {
            Err(Error::DeviceClosed)
        } else {
            self.next_frame().ok_or_else(|| {
                Error::CameraCaptureError(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "script exhausted",
                ))
            })
        };

        self.stats.in_flight.fetch_sub(1, Ordering::SeqCst);

        result
    }

    fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.stats.live_handles.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

impl Drop for ScriptedDevice {
    fn drop(&mut self) {
        self.release();
    }
}

impl DeviceOpener for TestPatternOpener {
    fn open(&self, _index: u32) -> Result<Box<dyn CaptureDevice>> {
        Ok(Box::new(TestPatternDevice {
            params: CaptureParams::default(),
            tick: 0,
            released: false,
        }))
    }
}

impl CaptureDevice for TestPatternDevice {
    fn is_opened(&self) -> bool {
        !self.released
    }

    fn configure(&mut self, requested: &CaptureParams) -> Result<()> {
        self.params = CaptureParams {
            width: requested.width.clamp(1, PATTERN_MAX.0),
            height: requested.height.clamp(1, PATTERN_MAX.1),
            fps: requested.fps.max(1),
        };

        Ok(())
    }

    fn params(&self) -> CaptureParams {
        self.params
    }

    fn read(&mut self) -> Result<DynamicImage> {
        if self.released {
            return Err(Error::DeviceClosed);
        }

        // Pace reads like a real camera would
        thread::sleep(Duration::from_secs(1) / self.params.fps);

        let (w, h) = (self.params.width, self.params.height);
        let shift = self.tick;
        self.tick = self.tick.wrapping_add(4);

        Ok(DynamicImage::ImageRgb8(RgbImage::from_fn(w, h, |x, y| {
            Rgb([
                ((x * 255 / w + shift) % 256) as u8,
                ((y * 255 / h) % 256) as u8,
                (shift % 256) as u8,
            ])
        })))
    }

    fn release(&mut self) {
        self.released = true;
    }
}

// -----------------------------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// -----------------------------------------------------------------------------------------------

/// A small frame filled with a single colour, handy for scripting devices.
pub fn solid_frame(colour: [u8; 3]) -> DynamicImage {
    DynamicImage::ImageRgb8(RgbImage::from_pixel(16, 16, Rgb(colour)))
}

// -----------------------------------------------------------------------------------------------
// TESTS
// -----------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {

    use super::*;

    /// Test that a scripted device replays its frames then fails
    #[test]
    fn test_script_then_fail() {
        let opener = ScriptedOpener::new(vec![solid_frame([1, 2, 3])]);
        let mut dev = opener.open(0).expect("Open failed");

        assert!(dev.read().is_ok());
        assert!(dev.read().is_err());
        assert!(dev.read().is_err());
        assert_eq!(opener.stats().reads(), 3);
    }

    /// Test that releasing and dropping a device only counts one release
    #[test]
    fn test_release_accounting() {
        let opener = ScriptedOpener::new(Vec::new());
        let stats = opener.stats();

        let mut dev = opener.open(0).expect("Open failed");
        assert_eq!(stats.live_handles(), 1);

        dev.release();
        dev.release();
        drop(dev);

        assert_eq!(stats.opens(), 1);
        assert_eq!(stats.live_handles(), 0);
    }

    /// Test that the test pattern follows the requested resolution
    #[test]
    fn test_pattern_resolution() {
        let mut dev = TestPatternOpener.open(0).expect("Open failed");
        dev.configure(&CaptureParams {
            width: 32,
            height: 8,
            fps: 1000,
        })
        .expect("Configure failed");

        let img = dev.read().expect("Read failed");
        assert_eq!((img.width(), img.height()), (32, 8));
    }
}
