//! Audio module - real-time capture and playback
//!
//! This module provides:
//! - A device backend abstraction, with a cpal implementation
//! - A rolling capture buffer fed by an input stream
//! - A sample-accurate playback engine driven by an output stream
//! - Callback fault containment and error reporting

mod backend;
mod buffer;
mod capture;
mod cpal_backend;
mod data;
mod fault;
mod player;
mod volume;

#[cfg(test)]
pub(crate) mod testing;

pub use backend::{
    BackendError, DeviceBackend, DeviceId, DeviceInfo, SelectedDevice, StreamCallback,
    StreamConfig, StreamDirection,
};
pub use buffer::{SampleHistory, SharedHistory, DEFAULT_RETAINED_SAMPLES};
pub use capture::{CaptureBuffer, INPUT_FRAMES_PER_BLOCK};
pub use cpal_backend::CpalBackend;
pub use data::{AudioData, LoadError};
pub use fault::{CallbackFault, ErrorReporter, FaultQueue, FaultSender, LogReporter};
pub use player::{PlaybackEngine, PlaybackProperties, OUTPUT_CHANNELS, OUTPUT_FRAMES_PER_BLOCK};
pub use volume::{compute_volume, compute_volume_of_player};
