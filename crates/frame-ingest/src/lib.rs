//! Camera collaborator for the glasses control core.
//!
//! Frames live in a small, fixed pool of driver buffers. A caller acquires one
//! frame, owns it exclusively, and hands it back through
//! [`Camera::release_frame`]; the pool refuses to lend more buffers than it has.

mod camera;
mod pool;
mod types;

pub use camera::{Camera, DirectorySource, FrameSource, PooledCamera, SyntheticSource};
pub use pool::FramePool;
pub use types::{CaptureError, Frame, FrameFormat};
