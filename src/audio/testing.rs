//! In-memory backend used by the unit tests
//!
//! Clones share state, so a test can keep a handle while the component under
//! test owns another one, then drive the stored callback synchronously.

use std::sync::{Arc, Mutex, MutexGuard};

use super::backend::{
    BackendError, DeviceBackend, DeviceId, DeviceInfo, StreamCallback, StreamConfig,
};
use super::fault::ErrorReporter;

#[derive(Default)]
struct MockState {
    devices: Vec<DeviceInfo>,
    next_id: u32,
    default_input: DeviceId,
    default_output: DeviceId,
    fail_opens: bool,
    stream: Option<(StreamConfig, StreamCallback)>,
    opened: Vec<StreamConfig>,
    open_attempts: usize,
    close_count: usize,
}

#[derive(Clone, Default)]
pub struct MockBackend {
    state: Arc<Mutex<MockState>>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }

    fn add_device(&self, name: &str, rate: u32, input: u16, output: u16) -> DeviceId {
        let mut state = self.state();
        state.next_id += 1;
        let id = DeviceId(state.next_id);
        if input > 0 && state.default_input.is_none() {
            state.default_input = id;
        }
        if output > 0 && state.default_output.is_none() {
            state.default_output = id;
        }
        state.devices.push(DeviceInfo {
            id,
            name: name.to_string(),
            input_channels: input,
            output_channels: output,
            preferred_sample_rate: rate,
            ..Default::default()
        });
        id
    }

    pub fn add_input_device(&self, name: &str, rate: u32) -> DeviceId {
        self.add_device(name, rate, 2, 0)
    }

    pub fn add_output_device(&self, name: &str, rate: u32) -> DeviceId {
        self.add_device(name, rate, 0, 2)
    }

    pub fn remove_device(&self, id: DeviceId) {
        let mut state = self.state();
        state.devices.retain(|d| d.id != id);
        if state.default_input == id {
            state.default_input = DeviceId::NONE;
        }
        if state.default_output == id {
            state.default_output = DeviceId::NONE;
        }
    }

    pub fn set_default_input(&self, id: DeviceId) {
        self.state().default_input = id;
    }

    pub fn set_default_output(&self, id: DeviceId) {
        self.state().default_output = id;
    }

    pub fn set_fail_opens(&self, fail: bool) {
        self.state().fail_opens = fail;
    }

    pub fn open_count(&self) -> usize {
        self.state().opened.len()
    }

    /// Calls to `open_stream`, failed ones included
    pub fn open_attempts(&self) -> usize {
        self.state().open_attempts
    }

    pub fn close_count(&self) -> usize {
        self.state().close_count
    }

    pub fn current_config(&self) -> Option<StreamConfig> {
        self.state().stream.as_ref().map(|(config, _)| *config)
    }

    /// Delivers one block of interleaved input to the open input stream.
    ///
    /// Returns false if no input stream is open.
    pub fn push_input(&self, block: &[f32]) -> bool {
        let mut state = self.state();
        match state.stream.as_mut() {
            Some((_, StreamCallback::Input(callback))) => {
                callback(block);
                true
            }
            _ => false,
        }
    }

    /// Asks the open output stream for `frames` frames.
    pub fn pull_output(&self, frames: usize) -> Option<Vec<f32>> {
        let mut state = self.state();
        match state.stream.as_mut() {
            Some((config, StreamCallback::Output(callback))) => {
                let mut block = vec![f32::NAN; frames * config.channels as usize];
                callback(block.as_mut_slice());
                Some(block)
            }
            _ => None,
        }
    }
}

impl DeviceBackend for MockBackend {
    fn device_ids(&self) -> Vec<DeviceId> {
        self.state().devices.iter().map(|d| d.id).collect()
    }

    fn default_input_device_id(&self) -> DeviceId {
        self.state().default_input
    }

    fn default_output_device_id(&self) -> DeviceId {
        self.state().default_output
    }

    fn device_info(&self, id: DeviceId) -> Option<DeviceInfo> {
        let state = self.state();
        state.devices.iter().find(|d| d.id == id).map(|d| DeviceInfo {
            is_default_input: d.id == state.default_input,
            is_default_output: d.id == state.default_output,
            ..d.clone()
        })
    }

    fn open_stream(
        &mut self,
        config: StreamConfig,
        callback: StreamCallback,
    ) -> Result<(), BackendError> {
        let mut state = self.state();
        state.open_attempts += 1;
        if state.stream.is_some() {
            return Err(BackendError::StreamAlreadyOpen);
        }
        if callback.direction() != config.direction {
            return Err(BackendError::DirectionMismatch);
        }
        if !state.devices.iter().any(|d| d.id == config.device_id) {
            return Err(BackendError::DeviceNotFound(config.device_id));
        }
        if state.fail_opens {
            return Err(BackendError::BuildStream("refused by mock".to_string()));
        }
        state.opened.push(config);
        state.stream = Some((config, callback));
        Ok(())
    }

    fn close_stream(&mut self) {
        let mut state = self.state();
        if state.stream.take().is_some() {
            state.close_count += 1;
        }
    }

    fn is_stream_open(&self) -> bool {
        self.state().stream.is_some()
    }
}

/// Reporter that keeps every message
#[derive(Default)]
pub struct CollectingReporter {
    messages: Mutex<Vec<String>>,
}

impl CollectingReporter {
    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().unwrap().clone()
    }
}

impl ErrorReporter for CollectingReporter {
    fn report(&self, message: &str) {
        self.messages.lock().unwrap().push(message.to_string());
    }
}
