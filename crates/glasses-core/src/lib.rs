//! Control core of a wearable camera.
//!
//! Three loops share a small amount of process-wide state:
//!
//! - [`connectivity::ConnectivityManager`] owns the link state and retry
//!   counters and reacts to network stack events.
//! - [`pipeline::CapturePipeline`] captures, encodes, transmits, and interprets
//!   one frame per cycle while the link is up, writing [`status::RecognitionStatus`].
//! - [`indicator::StatusIndicator`] and [`watchdog::WatchdogMonitor`] only read
//!   that state; the watchdog escalates when association stalls.
//!
//! Hardware and transport live behind collaborator traits so hosts and tests
//! can bind them freely.

pub mod connectivity;
pub mod display;
pub mod encoding;
pub mod indicator;
pub mod pipeline;
pub mod response;
pub mod restart;
pub mod status;
pub mod tasks;
pub mod transport;
pub mod watchdog;

pub use connectivity::{ConnectionState, ConnectivityManager, LinkStatus, RetryPolicy};
pub use pipeline::{CapturePipeline, CycleOutcome, PipelineSettings};
pub use restart::{DeviceControl, RestartLatch};
pub use status::{RecognitionResult, RecognitionStatus, StatusReport};
