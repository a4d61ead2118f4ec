//! Device backend abstraction
//!
//! Everything the capture buffer and the playback engine need from the OS audio
//! subsystem goes through [`DeviceBackend`]: device enumeration and the lifecycle
//! of a single stream. [`super::CpalBackend`] is the real implementation.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Identifier of an audio device.
///
/// `DeviceId::NONE` (0) means "no device" and is never handed out for a real device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct DeviceId(pub u32);

impl DeviceId {
    pub const NONE: DeviceId = DeviceId(0);

    pub fn is_none(self) -> bool {
        self == Self::NONE
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Static facts about a device
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DeviceInfo {
    pub id: DeviceId,
    pub name: String,
    /// Maximum number of input channels (0 for output-only devices)
    pub input_channels: u16,
    /// Maximum number of output channels (0 for input-only devices)
    pub output_channels: u16,
    /// Sample rate of the device's default configuration
    pub preferred_sample_rate: u32,
    pub is_default_input: bool,
    pub is_default_output: bool,
}

/// Which device should be used for a stream.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SelectedDevice {
    /// Follow whatever the OS reports as the default device
    #[default]
    UseDefaultDevice,
    /// A device picked by name
    UseGivenDevice { name: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamDirection {
    Input,
    Output,
}

/// Parameters requested when opening a stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamConfig {
    pub direction: StreamDirection,
    pub device_id: DeviceId,
    pub channels: u16,
    pub sample_rate: u32,
    pub frames_per_block: u32,
}

/// The per-block callback run on the hardware thread.
///
/// Buffers are interleaved, `StreamConfig::channels` samples per frame.
pub enum StreamCallback {
    Input(Box<dyn FnMut(&[f32]) + Send + 'static>),
    Output(Box<dyn FnMut(&mut [f32]) + Send + 'static>),
}

impl StreamCallback {
    pub fn direction(&self) -> StreamDirection {
        match self {
            StreamCallback::Input(_) => StreamDirection::Input,
            StreamCallback::Output(_) => StreamDirection::Output,
        }
    }
}

impl fmt::Debug for StreamCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StreamCallback::{:?}", self.direction())
    }
}

/// Errors reported by a backend when a stream cannot be opened
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("Device {0} not found")]
    DeviceNotFound(DeviceId),

    #[error("Callback direction does not match the stream direction")]
    DirectionMismatch,

    #[error("Unsupported stream format: {0}")]
    UnsupportedFormat(String),

    #[error("Failed to build stream: {0}")]
    BuildStream(String),

    #[error("Failed to start stream: {0}")]
    PlayStream(String),

    #[error("A stream is already open")]
    StreamAlreadyOpen,
}

/// OS audio subsystem seen by the core.
///
/// A backend owns at most one stream at a time.
pub trait DeviceBackend {
    /// Ids of all the devices currently present
    fn device_ids(&self) -> Vec<DeviceId>;

    fn default_input_device_id(&self) -> DeviceId;

    fn default_output_device_id(&self) -> DeviceId;

    fn device_info(&self, id: DeviceId) -> Option<DeviceInfo>;

    /// Opens and starts a stream. Fails if a stream is already open.
    fn open_stream(
        &mut self,
        config: StreamConfig,
        callback: StreamCallback,
    ) -> Result<(), BackendError>;

    /// Closes the stream if one is open.
    ///
    /// Must not return while a callback invocation is still running.
    fn close_stream(&mut self);

    fn is_stream_open(&self) -> bool;

    /// Returns `DeviceId::NONE` if no device has that name.
    fn find_device_id_by_name(&self, name: &str) -> DeviceId {
        self.find_device_info_by_name(name)
            .map(|info| info.id)
            .unwrap_or(DeviceId::NONE)
    }

    fn find_device_info_by_name(&self, name: &str) -> Option<DeviceInfo> {
        self.device_ids()
            .into_iter()
            .filter_map(|id| self.device_info(id))
            .find(|info| info.name == name)
    }
}
