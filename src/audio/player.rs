//! Sample-accurate playback of in-memory audio
//!
//! The output callback pulls one frame at a time straight from the loaded
//! [`AudioData`], so the playback position is exact and seeking is free.
//!
//! ## Sharing with the output callback
//!
//! The callback reads the play flag, the cursor and the playback properties from
//! atomics, without locking. A torn update of these scalars can at worst affect
//! one block. The audio data itself is handed to the callback as an `Arc` when
//! the stream is opened and is never changed behind its back: replacing it
//! always closes the stream first (which waits for any running callback), swaps
//! the `Arc`, then opens a new stream.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::backend::{DeviceBackend, DeviceId, StreamCallback, StreamConfig, StreamDirection};
use super::cpal_backend::CpalBackend;
use super::data::AudioData;
use super::fault::{guarded_output, CallbackFault, ErrorReporter, FaultQueue};
use crate::settings::AudioSettings;

/// The output stream is always stereo; mono content is sent to both channels.
pub const OUTPUT_CHANNELS: u16 = 2;

/// Frames per block requested when opening an output stream
pub const OUTPUT_FRAMES_PER_BLOCK: u32 = 128;

/// User-facing playback controls
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackProperties {
    /// Gain applied to every sample. Not clamped, negative values invert the phase.
    pub volume: f32,
    pub is_muted: bool,
    pub does_loop: bool,
}

impl Default for PlaybackProperties {
    fn default() -> Self {
        Self {
            volume: 1.0,
            is_muted: false,
            does_loop: false,
        }
    }
}

/// Scalars read by the output callback on every block
#[derive(Debug)]
struct SharedPlayback {
    is_playing: AtomicBool,
    /// Next frame the callback will output. Can be negative or past the end.
    next_frame: AtomicI64,
    /// f32 bits
    volume: AtomicU32,
    is_muted: AtomicBool,
    does_loop: AtomicBool,
}

impl SharedPlayback {
    fn properties(&self) -> PlaybackProperties {
        PlaybackProperties {
            volume: f32::from_bits(self.volume.load(Ordering::Relaxed)),
            is_muted: self.is_muted.load(Ordering::Relaxed),
            does_loop: self.does_loop.load(Ordering::Relaxed),
        }
    }

    fn store_properties(&self, properties: PlaybackProperties) {
        self.volume.store(properties.volume.to_bits(), Ordering::Relaxed);
        self.is_muted.store(properties.is_muted, Ordering::Relaxed);
        self.does_loop.store(properties.does_loop, Ordering::Relaxed);
    }
}

impl Default for SharedPlayback {
    fn default() -> Self {
        let shared = Self {
            is_playing: AtomicBool::new(false),
            next_frame: AtomicI64::new(0),
            volume: AtomicU32::new(0),
            is_muted: AtomicBool::new(false),
            does_loop: AtomicBool::new(false),
        };
        shared.store_properties(PlaybackProperties::default());
        shared
    }
}

/// Sample at `frame_index` / `channel_index`, ignoring volume and mute.
///
/// Positions outside the data are silent, or wrap around when looping. The
/// wrap uses a euclidean modulo so that negative frames loop too.
fn sample_unaltered_volume(
    data: &AudioData,
    does_loop: bool,
    frame_index: i64,
    channel_index: i64,
) -> f32 {
    if data.is_empty() {
        return 0.0;
    }

    let samples = data.samples();
    let channels = i128::from(data.channels_count());
    let len = samples.len() as i128;
    // i128 so that no frame index can overflow.
    let sample_index =
        i128::from(frame_index) * channels + i128::from(channel_index).rem_euclid(channels);

    if (0..len).contains(&sample_index) {
        samples[sample_index as usize]
    } else if does_loop {
        samples[sample_index.rem_euclid(len) as usize]
    } else {
        0.0
    }
}

fn sample(
    data: &AudioData,
    properties: &PlaybackProperties,
    frame_index: i64,
    channel_index: i64,
) -> f32 {
    if properties.is_muted {
        return 0.0;
    }
    properties.volume
        * sample_unaltered_volume(data, properties.does_loop, frame_index, channel_index)
}

/// Arithmetic mean of all the channels of a frame.
///
/// Not loudness-accurate for content whose channels are not correlated, but
/// good enough for visualisation.
fn mean_over_channels(data: &AudioData, sample_of_channel: impl Fn(i64) -> f32) -> f32 {
    let channels = data.channels_count();
    if channels == 0 {
        return 0.0;
    }
    let sum: f32 = (0..i64::from(channels)).map(sample_of_channel).sum();
    sum / f32::from(channels)
}

/// Fills one interleaved output block and advances the cursor.
fn render_block(data: &AudioData, shared: &SharedPlayback, channels: usize, out: &mut [f32]) {
    let is_playing = shared.is_playing.load(Ordering::Relaxed);
    if !is_playing {
        out.fill(0.0);
        return;
    }

    let properties = shared.properties();
    let start = shared.next_frame.load(Ordering::Acquire);
    let mut frame_index = start;

    for frame in out.chunks_mut(channels) {
        for (channel_index, slot) in frame.iter_mut().enumerate() {
            *slot = sample(data, &properties, frame_index, channel_index as i64);
        }
        // Stays at the last frame instead of overflowing.
        frame_index = frame_index.saturating_add(1);
    }

    // A seek done by the control thread during this block wins.
    let _ = shared.next_frame.compare_exchange(
        start,
        frame_index,
        Ordering::AcqRel,
        Ordering::Relaxed,
    );
}

/// Audio player
///
/// Plays one [`AudioData`] on the default output device and follows the OS
/// when the default device changes.
pub struct PlaybackEngine<B: DeviceBackend = CpalBackend> {
    backend: B,

    /// Currently loaded content, shared with the open stream
    data: Arc<AudioData>,

    /// Play flag, cursor and properties shared with the output callback
    shared: Arc<SharedPlayback>,

    /// Default output device when the stream was last (re)created
    current_output_device_id: DeviceId,

    /// Set when the backend refused the last stream we asked for
    open_failed: bool,

    faults: FaultQueue,
    reporter: Arc<dyn ErrorReporter>,
}

impl PlaybackEngine<CpalBackend> {
    /// Player on the default output device of the default cpal host
    pub fn with_default_host(reporter: Arc<dyn ErrorReporter>) -> Self {
        let backend = CpalBackend::new(Arc::clone(&reporter));
        Self::new(backend, reporter)
    }
}

impl<B: DeviceBackend> PlaybackEngine<B> {
    pub fn new(backend: B, reporter: Arc<dyn ErrorReporter>) -> Self {
        let mut engine = Self {
            backend,
            data: Arc::new(AudioData::default()),
            shared: Arc::new(SharedPlayback::default()),
            current_output_device_id: DeviceId::NONE,
            open_failed: false,
            faults: FaultQueue::default(),
            reporter,
        };
        engine.update_device_if_necessary();
        engine
    }

    /// Call once per control-thread tick.
    ///
    /// Reports callback faults, and moves playback to the new default output
    /// device if the OS switched (headphones unplugged, ...).
    pub fn update_device_if_necessary(&mut self) {
        self.faults.drain(self.reporter.as_ref());

        let id = self.backend.default_output_device_id();
        if id == self.current_output_device_id {
            return;
        }

        log::info!(
            "Default output device changed ({} -> {})",
            self.current_output_device_id,
            id
        );
        self.current_output_device_id = id;
        self.recreate_stream_adapted_to_current_audio_data();
    }

    pub fn has_audio_data(&self) -> bool {
        !self.data.is_empty()
    }

    /// False when there is no output device, or when it refused our stream.
    pub fn has_device(&self) -> bool {
        !self.current_output_device_id.is_none() && !self.open_failed
    }

    pub fn is_stream_open(&self) -> bool {
        self.backend.is_stream_open()
    }

    pub fn audio_data(&self) -> &AudioData {
        &self.data
    }

    /// Replaces the content being played.
    ///
    /// The playback time in seconds is kept, even if the new data has another
    /// sample rate.
    pub fn set_audio_data(&mut self, data: AudioData) {
        // The callback holds the old data; it must be gone before the swap.
        self.close_stream();

        let current_time = self.get_time();
        self.data = Arc::new(data);
        self.set_time(current_time);

        self.recreate_stream_adapted_to_current_audio_data();
    }

    pub fn reset_audio_data(&mut self) {
        self.set_audio_data(AudioData::default());
    }

    pub fn play(&self) {
        self.shared.is_playing.store(true, Ordering::Relaxed);
    }

    pub fn pause(&self) {
        self.shared.is_playing.store(false, Ordering::Relaxed);
    }

    pub fn is_playing(&self) -> bool {
        self.shared.is_playing.load(Ordering::Relaxed)
    }

    /// Moves the cursor to `time_in_seconds`, rounded to the nearest frame.
    ///
    /// Any time is accepted, including negative ones or times past the end.
    /// Returns whether the cursor actually moved.
    pub fn set_time(&self, time_in_seconds: f64) -> bool {
        let next_frame = (time_in_seconds * f64::from(self.data.sample_rate())).round() as i64;
        let previous = self.shared.next_frame.swap(next_frame, Ordering::AcqRel);
        previous != next_frame
    }

    /// Current position in seconds, 0 when no data is loaded.
    pub fn get_time(&self) -> f64 {
        let sample_rate = self.data.sample_rate();
        if sample_rate == 0 {
            return 0.0;
        }
        self.current_frame() as f64 / f64::from(sample_rate)
    }

    /// Next frame the output callback will play
    pub fn current_frame(&self) -> i64 {
        self.shared.next_frame.load(Ordering::Acquire)
    }

    pub fn properties(&self) -> PlaybackProperties {
        self.shared.properties()
    }

    pub fn set_properties(&self, properties: PlaybackProperties) {
        self.shared.store_properties(properties);
    }

    pub fn set_volume(&self, volume: f32) {
        self.shared.volume.store(volume.to_bits(), Ordering::Relaxed);
    }

    pub fn set_muted(&self, is_muted: bool) {
        self.shared.is_muted.store(is_muted, Ordering::Relaxed);
    }

    pub fn set_looping(&self, does_loop: bool) {
        self.shared.does_loop.store(does_loop, Ordering::Relaxed);
    }

    /// Sample as it is sent to the device: 0 when muted, scaled by the volume otherwise.
    pub fn sample(&self, frame_index: i64, channel_index: i64) -> f32 {
        sample(&self.data, &self.properties(), frame_index, channel_index)
    }

    pub fn sample_unaltered_volume(&self, frame_index: i64, channel_index: i64) -> f32 {
        sample_unaltered_volume(
            &self.data,
            self.shared.does_loop.load(Ordering::Relaxed),
            frame_index,
            channel_index,
        )
    }

    /// Mean of [`Self::sample`] over all channels.
    pub fn sample_mono(&self, frame_index: i64) -> f32 {
        let properties = self.properties();
        mean_over_channels(&self.data, |channel| {
            sample(&self.data, &properties, frame_index, channel)
        })
    }

    /// Mean of [`Self::sample_unaltered_volume`] over all channels.
    pub fn sample_mono_unaltered_volume(&self, frame_index: i64) -> f32 {
        let does_loop = self.shared.does_loop.load(Ordering::Relaxed);
        mean_over_channels(&self.data, |channel| {
            sample_unaltered_volume(&self.data, does_loop, frame_index, channel)
        })
    }

    pub fn apply_settings(&self, settings: &AudioSettings) {
        self.set_properties(settings.playback);
    }

    /// Closes the stream at application shutdown.
    pub fn shut_down(&mut self) {
        self.close_stream();
    }

    fn close_stream(&mut self) {
        if self.backend.is_stream_open() {
            self.backend.close_stream();
            log::info!("Playback stream closed");
        }
    }

    fn recreate_stream_adapted_to_current_audio_data(&mut self) {
        self.close_stream();
        self.open_failed = false;

        if !self.has_audio_data() || self.current_output_device_id.is_none() {
            return;
        }

        // No resampling: if the device runs at another rate than the data, the
        // content plays too fast or too slow.
        let config = StreamConfig {
            direction: StreamDirection::Output,
            device_id: self.current_output_device_id,
            channels: OUTPUT_CHANNELS,
            sample_rate: self.data.sample_rate(),
            frames_per_block: OUTPUT_FRAMES_PER_BLOCK,
        };

        let callback = self.output_callback();
        match self.backend.open_stream(config, callback) {
            Ok(()) => {
                log::info!(
                    "Playback stream open on device {} ({} Hz)",
                    self.current_output_device_id,
                    self.data.sample_rate()
                );
            }
            Err(e) => {
                self.open_failed = true;
                log::warn!(
                    "Failed to open output device {}: {}",
                    self.current_output_device_id,
                    e
                );
            }
        }
    }

    fn output_callback(&self) -> StreamCallback {
        let data = Arc::clone(&self.data);
        let shared = Arc::clone(&self.shared);
        let faults = self.faults.sender();
        let channels = OUTPUT_CHANNELS as usize;

        StreamCallback::Output(Box::new(move |out: &mut [f32]| {
            guarded_output(&faults, CallbackFault::PlaybackPanicked, out, |out| {
                render_block(&data, &shared, channels, out)
            });
        }))
    }
}

impl<B: DeviceBackend> Drop for PlaybackEngine<B> {
    fn drop(&mut self) {
        self.close_stream();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::testing::{CollectingReporter, MockBackend};
    use approx::assert_abs_diff_eq;

    fn engine() -> (MockBackend, PlaybackEngine<MockBackend>) {
        let backend = MockBackend::new();
        backend.add_output_device("Speakers", 48000);
        let engine = PlaybackEngine::new(backend.clone(), Arc::new(CollectingReporter::default()));
        (backend, engine)
    }

    fn ramp(frames: usize, channels: u16, sample_rate: u32) -> AudioData {
        let samples = (0..frames * channels as usize)
            .map(|i| (i + 1) as f32)
            .collect();
        AudioData::new(samples, channels, sample_rate)
    }

    #[test]
    fn test_no_stream_without_data() {
        let (backend, engine) = engine();
        assert!(engine.has_device());
        assert!(!engine.has_audio_data());
        assert!(!backend.is_stream_open());
        assert_eq!(engine.get_time(), 0.0);
        assert_eq!(engine.sample(0, 0), 0.0);
        assert_eq!(engine.sample_mono(3), 0.0);
    }

    #[test]
    fn test_set_audio_data_opens_stereo_stream_at_data_rate() {
        let (backend, mut engine) = engine();
        engine.set_audio_data(ramp(100, 1, 22050));

        let config = backend.current_config().unwrap();
        assert_eq!(config.direction, StreamDirection::Output);
        assert_eq!(config.channels, OUTPUT_CHANNELS);
        assert_eq!(config.sample_rate, 22050);
        assert_eq!(config.frames_per_block, OUTPUT_FRAMES_PER_BLOCK);
        assert!(engine.is_stream_open());
    }

    #[test]
    fn test_reset_audio_data_closes_stream() {
        let (backend, mut engine) = engine();
        engine.set_audio_data(ramp(100, 1, 22050));
        engine.reset_audio_data();

        assert!(!backend.is_stream_open());
        assert!(!engine.has_audio_data());
    }

    #[test]
    fn test_paused_outputs_silence_and_keeps_cursor() {
        let (backend, mut engine) = engine();
        engine.set_audio_data(ramp(100, 1, 100));
        engine.set_time(0.1);

        let block = backend.pull_output(4).unwrap();
        assert!(block.iter().all(|&s| s == 0.0));
        assert_eq!(engine.current_frame(), 10);
    }

    #[test]
    fn test_playing_advances_one_frame_per_frame() {
        let (backend, mut engine) = engine();
        engine.set_audio_data(ramp(100, 1, 100));
        engine.play();

        let block = backend.pull_output(3).unwrap();
        // Mono content goes to both output channels.
        assert_eq!(block, vec![1.0, 1.0, 2.0, 2.0, 3.0, 3.0]);
        assert_eq!(engine.current_frame(), 3);

        engine.pause();
        backend.pull_output(3).unwrap();
        assert_eq!(engine.current_frame(), 3);

        engine.play();
        let block = backend.pull_output(1).unwrap();
        assert_eq!(block, vec![4.0, 4.0]);
    }

    #[test]
    fn test_stereo_content_is_interleaved() {
        let (backend, mut engine) = engine();
        engine.set_audio_data(ramp(10, 2, 100));
        engine.play();

        let block = backend.pull_output(2).unwrap();
        assert_eq!(block, vec![1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_output_past_end_is_silent_without_loop() {
        let (backend, mut engine) = engine();
        engine.set_audio_data(ramp(2, 1, 100));
        engine.play();

        let block = backend.pull_output(4).unwrap();
        assert_eq!(block, vec![1.0, 1.0, 2.0, 2.0, 0.0, 0.0, 0.0, 0.0]);
        assert_eq!(engine.current_frame(), 4);
    }

    #[test]
    fn test_looping_playback_at_last_frame() {
        let backend = MockBackend::new();
        backend.add_output_device("Speakers", 48000);
        let reporter = Arc::new(CollectingReporter::default());
        let mut engine = PlaybackEngine::new(backend.clone(), reporter.clone());
        engine.set_audio_data(ramp(3, 1, 100));
        engine.set_looping(true);
        engine.set_time(1e300);
        engine.play();

        assert_eq!(engine.current_frame(), i64::MAX);
        let expected = engine.sample(i64::MAX, 0);
        assert_ne!(expected, 0.0);

        let block = backend.pull_output(2).unwrap();
        assert_eq!(block, vec![expected; 4]);
        assert_eq!(engine.current_frame(), i64::MAX);

        engine.update_device_if_necessary();
        assert!(reporter.messages().is_empty());
    }

    #[test]
    fn test_playback_from_first_frame() {
        let (backend, mut engine) = engine();
        engine.set_audio_data(ramp(3, 1, 100));
        engine.set_time(-1e300);
        engine.play();

        assert_eq!(backend.pull_output(2).unwrap(), vec![0.0; 4]);
        assert_eq!(engine.current_frame(), i64::MIN + 2);
    }

    #[test]
    fn test_set_time_round_trip() {
        let (_, mut engine) = engine();
        engine.set_audio_data(ramp(48000, 1, 48000));

        for t in [0.0, 0.25, 0.5, 0.123456, 0.99] {
            engine.set_time(t);
            assert_abs_diff_eq!(engine.get_time(), t, epsilon = 1.0 / 48000.0);
        }
    }

    #[test]
    fn test_set_time_reports_change() {
        let (_, mut engine) = engine();
        engine.set_audio_data(ramp(100, 1, 100));

        assert!(engine.set_time(0.5));
        assert!(!engine.set_time(0.5));
        // Rounds to the same frame.
        assert!(!engine.set_time(0.501));
        assert!(engine.set_time(-1.0));
        assert_eq!(engine.current_frame(), -100);
    }

    #[test]
    fn test_set_audio_data_preserves_time() {
        let (backend, mut engine) = engine();
        engine.set_audio_data(ramp(44100 * 3, 2, 44100));
        engine.set_time(1.5);

        engine.set_audio_data(ramp(22050 * 3, 1, 22050));

        assert_abs_diff_eq!(engine.get_time(), 1.5, epsilon = 1.0 / 22050.0);
        assert_eq!(engine.current_frame(), 33075);
        assert_eq!(backend.close_count(), 1);
        assert_eq!(backend.current_config().unwrap().sample_rate, 22050);
    }

    #[test]
    fn test_looping_wraps_both_ways() {
        let (_, mut engine) = engine();
        engine.set_audio_data(ramp(5, 2, 100));
        engine.set_looping(true);

        let frame_count = 5;
        for frame in -12..12 {
            for channel in 0..2 {
                let reference = engine.sample_unaltered_volume(frame, channel);
                for k in [-3i64, -1, 1, 4] {
                    assert_eq!(
                        engine.sample_unaltered_volume(frame + k * frame_count, channel),
                        reference
                    );
                }
            }
        }
        assert_eq!(engine.sample_unaltered_volume(-1, 0), 9.0);
        assert_eq!(engine.sample_unaltered_volume(-1, 1), 10.0);
        assert_eq!(engine.sample_unaltered_volume(5, 0), 1.0);
    }

    #[test]
    fn test_out_of_range_is_silent_without_loop() {
        let (_, mut engine) = engine();
        engine.set_audio_data(ramp(5, 2, 100));

        for frame in [-100, -1, 5, 6, i64::MAX, i64::MIN] {
            assert_eq!(engine.sample_unaltered_volume(frame, 0), 0.0);
            assert_eq!(engine.sample_unaltered_volume(frame, 1), 0.0);
        }
        assert_eq!(engine.sample_unaltered_volume(4, 1), 10.0);
    }

    #[test]
    fn test_extreme_frames_loop_without_overflow() {
        let (_, mut engine) = engine();
        engine.set_audio_data(ramp(3, 1, 100));
        engine.set_looping(true);

        let value = engine.sample_unaltered_volume(i64::MAX, 0);
        assert!(value >= 1.0 && value <= 3.0);
        let value = engine.sample_unaltered_volume(i64::MIN, 0);
        assert!(value >= 1.0 && value <= 3.0);
    }

    #[test]
    fn test_channel_index_wraps_on_channel_count() {
        let (_, mut engine) = engine();
        engine.set_audio_data(ramp(4, 2, 100));

        assert_eq!(engine.sample_unaltered_volume(1, 2), engine.sample_unaltered_volume(1, 0));
        assert_eq!(engine.sample_unaltered_volume(1, 3), engine.sample_unaltered_volume(1, 1));
    }

    #[test]
    fn test_volume_and_mute() {
        let (_, mut engine) = engine();
        engine.set_audio_data(ramp(4, 2, 100));

        for volume in [0.0f32, 0.5, 2.0, -1.0] {
            engine.set_volume(volume);
            for frame in 0..4 {
                for channel in 0..2 {
                    assert_eq!(
                        engine.sample(frame, channel),
                        volume * engine.sample_unaltered_volume(frame, channel)
                    );
                }
            }
        }

        engine.set_volume(1.0);
        engine.set_muted(true);
        assert_eq!(engine.sample(0, 0), 0.0);
        assert_eq!(engine.sample_mono(0), 0.0);
        assert_eq!(engine.sample_unaltered_volume(0, 0), 1.0);
    }

    #[test]
    fn test_mono_view_is_mean_of_channels() {
        let (_, mut engine) = engine();
        engine.set_audio_data(AudioData::new(vec![1.0, 3.0, -1.0, 1.0], 2, 100));
        engine.set_volume(2.0);

        assert_eq!(engine.sample_mono_unaltered_volume(0), 2.0);
        assert_eq!(engine.sample_mono_unaltered_volume(1), 0.0);
        assert_eq!(engine.sample_mono(0), 4.0);
    }

    #[test]
    fn test_properties_round_trip() {
        let (_, engine) = engine();
        let properties = PlaybackProperties {
            volume: 0.3,
            is_muted: true,
            does_loop: true,
        };
        engine.set_properties(properties);
        assert_eq!(engine.properties(), properties);
    }

    #[test]
    fn test_follows_default_output_device() {
        let (backend, mut engine) = engine();
        engine.set_audio_data(ramp(100, 1, 100));
        let headphones = backend.add_output_device("Headphones", 44100);

        engine.update_device_if_necessary();
        assert_eq!(backend.open_count(), 1);

        backend.set_default_output(headphones);
        engine.update_device_if_necessary();
        assert_eq!(backend.open_count(), 2);
        assert_eq!(backend.current_config().unwrap().device_id, headphones);
    }

    #[test]
    fn test_losing_device_closes_stream() {
        let (backend, mut engine) = engine();
        engine.set_audio_data(ramp(100, 1, 100));
        let speakers = backend.current_config().unwrap().device_id;

        backend.remove_device(speakers);
        engine.update_device_if_necessary();

        assert!(!engine.has_device());
        assert!(!backend.is_stream_open());
    }

    #[test]
    fn test_open_failure_reports_no_device() {
        let (backend, mut engine) = engine();
        backend.set_fail_opens(true);
        engine.set_audio_data(ramp(100, 1, 100));

        assert!(!engine.has_device());
        assert!(!engine.is_stream_open());

        backend.set_fail_opens(false);
        engine.set_audio_data(ramp(100, 1, 100));
        assert!(engine.has_device());
    }

    #[test]
    fn test_no_device_at_all() {
        let backend = MockBackend::new();
        let mut engine = PlaybackEngine::new(backend.clone(), Arc::new(CollectingReporter::default()));
        engine.set_audio_data(ramp(100, 1, 100));

        assert!(!engine.has_device());
        assert!(!backend.is_stream_open());
    }

    #[test]
    fn test_callback_faults_reported_on_tick() {
        let backend = MockBackend::new();
        backend.add_output_device("Speakers", 48000);
        let reporter = Arc::new(CollectingReporter::default());
        let mut engine = PlaybackEngine::new(backend.clone(), reporter.clone());

        engine.faults.sender().send(CallbackFault::PlaybackPanicked);
        engine.update_device_if_necessary();

        let messages = reporter.messages();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].contains("silence"));
    }

    #[test]
    fn test_shut_down_closes_stream() {
        let (backend, mut engine) = engine();
        engine.set_audio_data(ramp(100, 1, 100));
        engine.shut_down();
        engine.shut_down();
        assert!(!backend.is_stream_open());
        assert_eq!(backend.close_count(), 1);
    }
}
