//! Camera backed by a directory of JPEG files.
//!
//! Files are played in name order and the sequence loops. The file list is
//! read once when the device is opened; a file that disappears afterwards is
//! a read failure.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::debug;

use super::device::{CameraDevice, DeviceError, DeviceProvider, Result};

/// Provider for a directory-backed camera.
#[derive(Debug, Clone)]
pub struct DirectoryCamera {
    root: PathBuf,
    in_use: Arc<AtomicBool>,
}

impl DirectoryCamera {
    /// Create a provider reading frames from `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            in_use: Arc::new(AtomicBool::new(false)),
        }
    }

    /// The directory frames are read from.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn list_frames(&self) -> Result<Vec<PathBuf>> {
        let entries = std::fs::read_dir(&self.root).map_err(|e| {
            DeviceError::OpenFailed(format!("{}: {e}", self.root.display()))
        })?;

        let mut frames: Vec<PathBuf> = entries
            .filter_map(std::result::Result::ok)
            .map(|entry| entry.path())
            .filter(|path| path.is_file() && is_jpeg(path))
            .collect();
        frames.sort();

        if frames.is_empty() {
            return Err(DeviceError::OpenFailed(format!(
                "no JPEG files in {}",
                self.root.display()
            )));
        }
        Ok(frames)
    }
}

impl DeviceProvider for DirectoryCamera {
    fn name(&self) -> &'static str {
        "directory"
    }

    fn open(&self) -> Result<Box<dyn CameraDevice>> {
        if self.in_use.swap(true, Ordering::SeqCst) {
            return Err(DeviceError::Busy(self.root.display().to_string()));
        }
        let frames = match self.list_frames() {
            Ok(frames) => frames,
            Err(e) => {
                self.in_use.store(false, Ordering::SeqCst);
                return Err(e);
            }
        };
        debug!(root = %self.root.display(), count = frames.len(), "Opened frame directory");
        Ok(Box::new(DirectoryDevice {
            frames,
            next: 0,
            in_use: Arc::clone(&self.in_use),
        }))
    }

    fn force_release(&self) {
        self.in_use.store(false, Ordering::SeqCst);
    }
}

fn is_jpeg(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("jpg") || ext.eq_ignore_ascii_case("jpeg"))
}

#[derive(Debug)]
struct DirectoryDevice {
    frames: Vec<PathBuf>,
    next: usize,
    in_use: Arc<AtomicBool>,
}

impl CameraDevice for DirectoryDevice {
    fn read_frame(&mut self) -> Result<Vec<u8>> {
        let path = &self.frames[self.next % self.frames.len()];
        self.next = (self.next + 1) % self.frames.len();
        std::fs::read(path).map_err(|e| DeviceError::ReadFailed(format!("{}: {e}", path.display())))
    }

    fn release(&mut self) -> Result<()> {
        self.in_use.store(false, Ordering::SeqCst);
        Ok(())
    }
}
