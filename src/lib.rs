//! live-audio - real-time audio capture and playback primitives
//!
//! Two independent components, both driven by hardware callback threads:
//! - [`CaptureBuffer`]: keeps the latest mono samples from an input device
//! - [`PlaybackEngine`]: plays an in-memory [`AudioData`] sample-accurately
//!
//! Both are created once at startup, passed by reference to whoever needs them,
//! and shut down once at exit.

pub mod audio;
pub mod settings;

pub use audio::{
    compute_volume, compute_volume_of_player, AudioData, CaptureBuffer, CpalBackend,
    DeviceBackend, DeviceId, DeviceInfo, ErrorReporter, LogReporter, PlaybackEngine,
    PlaybackProperties, SelectedDevice,
};
pub use settings::AudioSettings;
