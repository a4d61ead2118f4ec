//! Audio input capture
//!
//! This module keeps a rolling window of the latest mono samples received from
//! an input device (microphone, loopback, ...).

use std::sync::Arc;
use std::time::{Duration, Instant};

use super::backend::{
    DeviceBackend, DeviceId, DeviceInfo, SelectedDevice, StreamCallback, StreamConfig,
    StreamDirection,
};
use super::buffer::{SharedHistory, DEFAULT_RETAINED_SAMPLES};
use super::cpal_backend::CpalBackend;
use super::fault::{guarded, CallbackFault, ErrorReporter, FaultQueue};
use crate::settings::AudioSettings;

/// Frames per block requested when opening an input stream
pub const INPUT_FRAMES_PER_BLOCK: u32 = 512;

/// How often `update()` looks at the device list
const DEVICE_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Audio input capture engine
///
/// The input callback only ever touches the shared sample history, so the
/// capture buffer itself can be moved freely; the stream is closed on drop.
pub struct CaptureBuffer<B: DeviceBackend = CpalBackend> {
    backend: B,

    /// Samples shared with the input callback
    history: SharedHistory,

    /// Copy of the requested samples, reused between reads
    snapshot: Vec<f32>,

    selected_device: SelectedDevice,

    /// Device of the open stream, `DeviceId::NONE` when closed
    current_device_id: DeviceId,

    /// Sample rate of the open stream
    current_sample_rate: u32,

    /// Last device we tried to open, so that a failing device is not retried every tick
    attempted_device_id: DeviceId,

    /// False after `close()`, until a device is selected again
    wants_stream: bool,

    last_device_poll: Option<Instant>,

    faults: FaultQueue,
    reporter: Arc<dyn ErrorReporter>,
}

impl CaptureBuffer<CpalBackend> {
    /// Capture from the default input device of the default cpal host
    pub fn with_default_host(reporter: Arc<dyn ErrorReporter>) -> Self {
        let backend = CpalBackend::new(Arc::clone(&reporter));
        Self::new(backend, reporter)
    }
}

impl<B: DeviceBackend> CaptureBuffer<B> {
    /// Creates the capture buffer and opens the default input device.
    pub fn new(backend: B, reporter: Arc<dyn ErrorReporter>) -> Self {
        let mut capture = Self {
            backend,
            history: SharedHistory::new(DEFAULT_RETAINED_SAMPLES),
            snapshot: Vec::with_capacity(DEFAULT_RETAINED_SAMPLES),
            selected_device: SelectedDevice::UseDefaultDevice,
            current_device_id: DeviceId::NONE,
            current_sample_rate: 0,
            attempted_device_id: DeviceId::NONE,
            wants_stream: true,
            last_device_poll: None,
            faults: FaultQueue::default(),
            reporter,
        };
        capture.open_selected_device();
        capture
    }

    /// Must be called once per control-thread tick.
    ///
    /// Reports the faults raised by the input callback since the last tick, and
    /// periodically follows device changes (default device switched, selected
    /// device plugged back in).
    pub fn update(&mut self) {
        self.faults.drain(self.reporter.as_ref());

        let due = self
            .last_device_poll
            .map_or(true, |last| last.elapsed() >= DEVICE_POLL_INTERVAL);
        if due {
            self.poll_devices();
        }
    }

    /// Reopens the stream if the selection now resolves to another device.
    pub fn poll_devices(&mut self) {
        self.last_device_poll = Some(Instant::now());
        if !self.wants_stream {
            return;
        }

        let wanted = self
            .resolve_selected_device()
            .map(|info| info.id)
            .unwrap_or(DeviceId::NONE);
        let lost_current = !self.current_device_id.is_none() && !self.current_device_is_valid();

        if wanted != self.attempted_device_id || lost_current {
            log::info!(
                "Input device changed ({} -> {}), reopening",
                self.current_device_id,
                wanted
            );
            self.open_selected_device();
        }
    }

    /// Declares the maximum number of samples that will be requested through
    /// [`Self::for_each_sample`]. Older samples are discarded.
    #[doc(alias = "set_nb_of_retained_samples")]
    pub fn set_retained_length(&mut self, samples_count: usize) {
        self.history.set_retained_length(samples_count);
        if self.snapshot.capacity() < samples_count {
            self.snapshot.reserve(samples_count - self.snapshot.len());
        }
    }

    pub fn retained_length(&self) -> usize {
        self.history.lock().retained_length()
    }

    /// Number of samples currently available
    pub fn available_samples(&self) -> usize {
        self.history.lock().len()
    }

    /// Calls `visit` for each of the `samples_count` latest samples, oldest first.
    ///
    /// Visits fewer samples if fewer have been received so far. The lock is only
    /// held while copying; `visit` runs after it has been released.
    pub fn for_each_sample(&mut self, samples_count: usize, mut visit: impl FnMut(f32)) {
        self.history
            .lock()
            .copy_latest(samples_count, &mut self.snapshot);

        for &sample in &self.snapshot {
            visit(sample);
        }
    }

    /// Ids of all the devices that can record
    pub fn device_ids(&self) -> Vec<DeviceId> {
        self.backend
            .device_ids()
            .into_iter()
            .filter(|&id| {
                self.backend
                    .device_info(id)
                    .is_some_and(|info| info.input_channels > 0)
            })
            .collect()
    }

    pub fn default_device_id(&self) -> DeviceId {
        self.backend.default_input_device_id()
    }

    pub fn device_info(&self, device_id: DeviceId) -> Option<DeviceInfo> {
        self.backend.device_info(device_id)
    }

    /// Returns `DeviceId::NONE` if the device is not found.
    pub fn find_device_id_by_name(&self, name: &str) -> DeviceId {
        self.backend.find_device_id_by_name(name)
    }

    pub fn find_device_info_by_name(&self, name: &str) -> Option<DeviceInfo> {
        self.backend.find_device_info_by_name(name)
    }

    pub fn current_device(&self) -> &SelectedDevice {
        &self.selected_device
    }

    /// Sample rate of the device currently recording, 0 when closed
    pub fn sample_rate(&self) -> u32 {
        self.current_sample_rate
    }

    pub fn use_given_device(&mut self, info: &DeviceInfo) {
        self.use_device(SelectedDevice::UseGivenDevice {
            name: info.name.clone(),
        });
    }

    pub fn use_default_device(&mut self) {
        self.use_device(SelectedDevice::UseDefaultDevice);
    }

    /// Switches to another device.
    ///
    /// Selecting the device that is already recording keeps the stream as is.
    /// If the new device cannot be opened the stream stays closed and
    /// [`Self::current_device_is_valid`] reports false.
    #[doc(alias = "select_device")]
    pub fn use_device(&mut self, device: SelectedDevice) {
        self.selected_device = device;
        self.wants_stream = true;
        self.open_selected_device();
    }

    /// True iff a stream is open on a device that is still plugged in.
    pub fn current_device_is_valid(&self) -> bool {
        self.backend.is_stream_open()
            && !self.current_device_id.is_none()
            && self.backend.device_ids().contains(&self.current_device_id)
    }

    /// Closes the current stream. Does nothing if no stream is open.
    pub fn close(&mut self) {
        self.wants_stream = false;
        self.close_stream();
    }

    /// Closes the stream at application shutdown.
    pub fn shut_down(&mut self) {
        self.close();
    }

    pub fn apply_settings(&mut self, settings: &AudioSettings) {
        self.set_retained_length(settings.retained_samples);
        if settings.input_device != self.selected_device {
            self.use_device(settings.input_device.clone());
        }
    }

    fn resolve_selected_device(&self) -> Option<DeviceInfo> {
        match &self.selected_device {
            SelectedDevice::UseDefaultDevice => {
                let id = self.backend.default_input_device_id();
                if id.is_none() {
                    None
                } else {
                    self.backend.device_info(id)
                }
            }
            SelectedDevice::UseGivenDevice { name } => {
                self.backend.find_device_info_by_name(name)
            }
        }
    }

    fn open_selected_device(&mut self) {
        match self.resolve_selected_device() {
            Some(info) => self.open_device(&info),
            None => {
                log::warn!("Input device not found: {:?}", self.selected_device);
                self.close_stream();
                self.attempted_device_id = DeviceId::NONE;
            }
        }
    }

    fn open_device(&mut self, info: &DeviceInfo) {
        if self.backend.is_stream_open() && info.id == self.current_device_id {
            // Already recording from it, reopening would glitch.
            return;
        }

        self.close_stream();
        self.attempted_device_id = info.id;

        let config = StreamConfig {
            direction: StreamDirection::Input,
            device_id: info.id,
            channels: 1,
            sample_rate: info.preferred_sample_rate,
            frames_per_block: INPUT_FRAMES_PER_BLOCK,
        };

        let callback = self.input_callback();
        match self.backend.open_stream(config, callback) {
            Ok(()) => {
                self.current_device_id = info.id;
                self.current_sample_rate = info.preferred_sample_rate;
                log::info!(
                    "Capturing from {} ({} Hz)",
                    info.name,
                    info.preferred_sample_rate
                );
            }
            Err(e) => {
                log::warn!("Failed to open input device {}: {}", info.name, e);
            }
        }
    }

    fn close_stream(&mut self) {
        if self.backend.is_stream_open() {
            self.backend.close_stream();
            log::info!("Capture stopped");
        }
        self.current_device_id = DeviceId::NONE;
        self.current_sample_rate = 0;
    }

    fn input_callback(&self) -> StreamCallback {
        let history = self.history.clone();
        let faults = self.faults.sender();

        StreamCallback::Input(Box::new(move |block: &[f32]| {
            guarded(&faults, CallbackFault::CapturePanicked, || {
                history.lock().push_block(block);
            });
        }))
    }
}

impl<B: DeviceBackend> Drop for CaptureBuffer<B> {
    fn drop(&mut self) {
        self.close_stream();
    }
}
