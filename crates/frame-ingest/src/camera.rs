//! Pooled camera built on top of a pluggable frame source.

use std::{
    fs,
    path::{Path, PathBuf},
};

use chrono::Utc;
use tracing::{debug, warn};

use crate::{
    pool::FramePool,
    types::{CaptureError, Frame, FrameFormat},
};

/// Camera driver surface consumed by the capture pipeline.
pub trait Camera: Send {
    /// Acquire exactly one frame. The caller owns it until `release_frame`.
    fn acquire_frame(&mut self) -> Result<Frame, CaptureError>;

    /// Return a frame's buffer to the driver.
    fn release_frame(&mut self, frame: Frame);
}

impl<C: Camera + ?Sized> Camera for Box<C> {
    fn acquire_frame(&mut self) -> Result<Frame, CaptureError> {
        (**self).acquire_frame()
    }

    fn release_frame(&mut self, frame: Frame) {
        (**self).release_frame(frame)
    }
}

/// Producer of raw image bytes for a pooled camera.
pub trait FrameSource: Send {
    /// Fill `buffer` with one image and report its dimensions.
    fn fill(&mut self, buffer: &mut Vec<u8>) -> Result<(u32, u32), CaptureError>;

    fn format(&self) -> FrameFormat;
}

/// Camera that hands out frames backed by a fixed [`FramePool`].
pub struct PooledCamera<S> {
    pool: FramePool,
    source: S,
}

impl<S: FrameSource> PooledCamera<S> {
    pub fn new(source: S, buffers: usize) -> Self {
        Self {
            pool: FramePool::new(buffers),
            source,
        }
    }

    pub fn pool(&self) -> &FramePool {
        &self.pool
    }
}

impl<S: FrameSource> Camera for PooledCamera<S> {
    fn acquire_frame(&mut self) -> Result<Frame, CaptureError> {
        let mut slot = self.pool.lease()?;
        slot.buffer.clear();
        let (width, height) = match self.source.fill(&mut slot.buffer) {
            Ok(size) => size,
            Err(err) => {
                self.pool.give_back(slot);
                return Err(err);
            }
        };
        if slot.buffer.is_empty() {
            self.pool.give_back(slot);
            return Err(CaptureError::EmptyFrame);
        }

        Ok(Frame {
            data: std::mem::take(&mut slot.buffer),
            width,
            height,
            timestamp_ms: Utc::now().timestamp_millis(),
            format: self.source.format(),
            slot: slot.index,
        })
    }

    fn release_frame(&mut self, frame: Frame) {
        self.pool.give_back(crate::pool::Slot {
            index: frame.slot,
            buffer: frame.data,
        });
    }
}

/// Cycles through the JPEG files of a directory, one per capture.
pub struct DirectorySource {
    files: Vec<PathBuf>,
    next: usize,
    frame_size: (u32, u32),
}

impl DirectorySource {
    pub fn open(dir: &Path, frame_size: (u32, u32)) -> Result<Self, CaptureError> {
        let mut files: Vec<PathBuf> = fs::read_dir(dir)
            .map_err(|_| CaptureError::Open {
                uri: dir.display().to_string(),
            })?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| is_jpeg(path))
            .collect();
        files.sort();

        if files.is_empty() {
            return Err(CaptureError::Open {
                uri: dir.display().to_string(),
            });
        }
        debug!("frame directory {} holds {} images", dir.display(), files.len());

        Ok(Self {
            files,
            next: 0,
            frame_size,
        })
    }
}

fn is_jpeg(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("jpg") || ext.eq_ignore_ascii_case("jpeg"))
        .unwrap_or(false)
}

impl FrameSource for DirectorySource {
    fn fill(&mut self, buffer: &mut Vec<u8>) -> Result<(u32, u32), CaptureError> {
        let path = &self.files[self.next];
        self.next = (self.next + 1) % self.files.len();
        match fs::read(path) {
            Ok(bytes) => {
                buffer.extend_from_slice(&bytes);
                Ok(self.frame_size)
            }
            Err(err) => {
                warn!("failed to read frame {}: {err}", path.display());
                Err(CaptureError::Io(err))
            }
        }
    }

    fn format(&self) -> FrameFormat {
        FrameFormat::Jpeg
    }
}

/// Moving RGB565 gradient, useful when no camera or image directory exists.
pub struct SyntheticSource {
    width: u32,
    height: u32,
    tick: u16,
}

impl SyntheticSource {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            tick: 0,
        }
    }
}

impl FrameSource for SyntheticSource {
    fn fill(&mut self, buffer: &mut Vec<u8>) -> Result<(u32, u32), CaptureError> {
        let pixels = (self.width as usize) * (self.height as usize);
        buffer.reserve(pixels * 2);
        for i in 0..pixels {
            let value = (i as u16).wrapping_add(self.tick);
            buffer.extend_from_slice(&value.to_le_bytes());
        }
        self.tick = self.tick.wrapping_add(97);
        Ok((self.width, self.height))
    }

    fn format(&self) -> FrameFormat {
        FrameFormat::Rgb565
    }
}
