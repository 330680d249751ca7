//! Generated test-pattern camera.
//!
//! Produces a moving bar over a gradient so that consecutive frames differ.
//! Only one device can be open at a time per provider, which mirrors how a
//! single physical camera behaves.

use std::io::Cursor;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use image::codecs::jpeg::JpegEncoder;
use image::{ColorType, Rgb, RgbImage};

use super::device::{CameraDevice, DeviceError, DeviceProvider, Result};
use crate::config::CameraConfig;

/// Provider for the test-pattern camera.
#[derive(Debug, Clone)]
pub struct SyntheticCamera {
    width: u32,
    height: u32,
    quality: u8,
    in_use: Arc<AtomicBool>,
}

impl SyntheticCamera {
    /// Create a provider producing `width`×`height` JPEG frames.
    #[must_use]
    pub fn new(width: u32, height: u32, quality: u8) -> Self {
        Self {
            width: width.max(1),
            height: height.max(1),
            quality: quality.clamp(1, 100),
            in_use: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Create a provider from camera configuration.
    #[must_use]
    pub fn from_config(config: &CameraConfig) -> Self {
        Self::new(config.width, config.height, config.jpeg_quality)
    }

    /// Whether a device from this provider is currently open.
    #[must_use]
    pub fn is_in_use(&self) -> bool {
        self.in_use.load(Ordering::SeqCst)
    }
}

impl DeviceProvider for SyntheticCamera {
    fn name(&self) -> &'static str {
        "synthetic"
    }

    fn open(&self) -> Result<Box<dyn CameraDevice>> {
        if self.in_use.swap(true, Ordering::SeqCst) {
            return Err(DeviceError::Busy(self.name().to_string()));
        }
        Ok(Box::new(SyntheticDevice {
            width: self.width,
            height: self.height,
            quality: self.quality,
            tick: 0,
            in_use: Arc::clone(&self.in_use),
        }))
    }

    fn force_release(&self) {
        self.in_use.store(false, Ordering::SeqCst);
    }
}

#[derive(Debug)]
struct SyntheticDevice {
    width: u32,
    height: u32,
    quality: u8,
    tick: u32,
    in_use: Arc<AtomicBool>,
}

impl SyntheticDevice {
    fn render(&self) -> RgbImage {
        let bar_width = (self.width / 16).max(1);
        let bar_x = self.tick.wrapping_mul(bar_width / 2 + 1) % self.width;
        let (width, height) = (self.width, self.height);

        RgbImage::from_fn(width, height, |x, y| {
            if x >= bar_x && x < bar_x.saturating_add(bar_width) {
                return Rgb([240, 240, 240]);
            }
            // Truncation is fine: both ratios are in 0..=255.
            #[allow(clippy::cast_possible_truncation)]
            let r = (u64::from(x) * 255 / u64::from(width.max(1))) as u8;
            #[allow(clippy::cast_possible_truncation)]
            let g = (u64::from(y) * 255 / u64::from(height.max(1))) as u8;
            Rgb([r, g, 96])
        })
    }
}

impl CameraDevice for SyntheticDevice {
    fn read_frame(&mut self) -> Result<Vec<u8>> {
        let frame = self.render();
        self.tick = self.tick.wrapping_add(1);

        let mut buf = Cursor::new(Vec::new());
        JpegEncoder::new_with_quality(&mut buf, self.quality)
            .encode(frame.as_raw(), self.width, self.height, ColorType::Rgb8)
            .map_err(|e| DeviceError::ReadFailed(e.to_string()))?;
        Ok(buf.into_inner())
    }

    fn release(&mut self) -> Result<()> {
        self.in_use.store(false, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frames_are_jpeg() {
        let camera = SyntheticCamera::new(64, 48, 80);
        let mut device = camera.open().unwrap();

        let frame = device.read_frame().unwrap();
        assert_eq!(&frame[..2], &[0xFF, 0xD8]);
        assert_eq!(&frame[frame.len() - 2..], &[0xFF, 0xD9]);
        device.release().unwrap();
    }

    #[test]
    fn test_consecutive_frames_differ() {
        let camera = SyntheticCamera::new(64, 48, 80);
        let mut device = camera.open().unwrap();

        let first = device.read_frame().unwrap();
        let second = device.read_frame().unwrap();
        assert_ne!(first, second);
        device.release().unwrap();
    }

    #[test]
    fn test_second_open_is_busy() {
        let camera = SyntheticCamera::new(32, 32, 50);
        let mut device = camera.open().unwrap();
        assert!(camera.is_in_use());

        let err = camera.open().unwrap_err();
        assert!(matches!(err, DeviceError::Busy(_)));

        device.release().unwrap();
        assert!(!camera.is_in_use());
        assert!(camera.open().is_ok());
    }

    #[test]
    fn test_force_release_frees_the_camera() {
        let camera = SyntheticCamera::new(32, 32, 50);
        let _stuck = camera.open().unwrap();

        camera.force_release();
        assert!(!camera.is_in_use());
        assert!(camera.open().is_ok());
    }

    #[test]
    fn test_from_config() {
        let config = CameraConfig {
            width: 16,
            height: 8,
            ..CameraConfig::default()
        };
        let camera = SyntheticCamera::from_config(&config);
        let mut device = camera.open().unwrap();
        assert!(!device.read_frame().unwrap().is_empty());
    }
}
