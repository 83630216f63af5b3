use thiserror::Error;

/// One captured image held in a driver-owned buffer.
///
/// A frame is not `Clone`: exactly one owner holds it until it is handed back
/// through [`crate::Camera::release_frame`].
#[derive(Debug)]
pub struct Frame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub timestamp_ms: i64,
    pub format: FrameFormat,
    pub(crate) slot: usize,
}

impl Frame {
    /// Index of the pool slot backing this frame.
    pub fn slot(&self) -> usize {
        self.slot
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameFormat {
    Jpeg,
    Rgb565,
}

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("failed to open frame source {uri:?}")]
    Open { uri: String },
    #[error("all {capacity} frame buffers are in use")]
    PoolExhausted { capacity: usize },
    #[error("frame source produced an empty frame")]
    EmptyFrame,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
