//! cpal implementation of [`DeviceBackend`]
//!
//! cpal identifies devices by handle, not by number, so device ids are handed
//! out per device name the first time a name is seen and stay stable for the
//! lifetime of the backend.
//!
//! The stream is negotiated against what the device supports. When the
//! requested channel count or sample rate is not available the device default
//! is used instead: channels are adapted frame by frame, the sample rate is not
//! (no resampling, content then plays at the device rate).

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SampleFormat, SizedSample};

use super::backend::{
    BackendError, DeviceBackend, DeviceId, DeviceInfo, StreamCallback, StreamConfig,
    StreamDirection,
};
use super::fault::ErrorReporter;

#[derive(Debug, Default)]
struct DeviceRegistry {
    ids: HashMap<String, DeviceId>,
    last_id: u32,
}

impl DeviceRegistry {
    fn id_for(&mut self, name: &str) -> DeviceId {
        if let Some(&id) = self.ids.get(name) {
            return id;
        }
        self.last_id += 1;
        let id = DeviceId(self.last_id);
        self.ids.insert(name.to_string(), id);
        id
    }
}

/// One supported configuration range, as reported by the device
#[derive(Debug, Clone, Copy, PartialEq)]
struct ConfigRange {
    channels: u16,
    min_sample_rate: u32,
    max_sample_rate: u32,
    /// Block size limits, when the host reports them
    frames: Option<(u32, u32)>,
    format: SampleFormat,
}

impl From<cpal::SupportedStreamConfigRange> for ConfigRange {
    fn from(range: cpal::SupportedStreamConfigRange) -> Self {
        let frames = match *range.buffer_size() {
            cpal::SupportedBufferSize::Range { min, max } => Some((min, max)),
            cpal::SupportedBufferSize::Unknown => None,
        };
        Self {
            channels: range.channels(),
            min_sample_rate: range.min_sample_rate().0,
            max_sample_rate: range.max_sample_rate().0,
            frames,
            format: range.sample_format(),
        }
    }
}

/// What we end up opening
#[derive(Debug, Clone, Copy, PartialEq)]
struct Negotiated {
    channels: u16,
    sample_rate: u32,
    format: SampleFormat,
    /// None means the host default block size
    frames_per_block: Option<u32>,
}

fn is_supported_format(format: SampleFormat) -> bool {
    matches!(
        format,
        SampleFormat::F32 | SampleFormat::I16 | SampleFormat::U16 | SampleFormat::I32
    )
}

/// Picks the stream parameters closest to the request.
///
/// An exact channel/rate match is preferred (f32 first), otherwise the
/// device default configuration is used.
fn negotiate(
    ranges: &[ConfigRange],
    default: ConfigRange,
    channels: u16,
    sample_rate: u32,
    frames_per_block: u32,
) -> Negotiated {
    let matching = ranges
        .iter()
        .filter(|r| is_supported_format(r.format))
        .filter(|r| r.channels == channels)
        .filter(|r| (r.min_sample_rate..=r.max_sample_rate).contains(&sample_rate))
        .min_by_key(|r| r.format != SampleFormat::F32);

    let (range, sample_rate) = match matching {
        Some(range) => (*range, sample_rate),
        None => (default, default.min_sample_rate),
    };

    let frames_per_block = match range.frames {
        Some((min, max)) if (min..=max).contains(&frames_per_block) => Some(frames_per_block),
        _ => None,
    };

    Negotiated {
        channels: range.channels,
        sample_rate,
        format: range.format,
        frames_per_block,
    }
}

/// Input side of the channel adaptation: keeps the first `wanted` channels of
/// each device frame (repeating the last one if the device has fewer).
fn adapt_input_frames<T>(data: &[T], device_channels: usize, wanted: usize, out: &mut Vec<f32>)
where
    T: SizedSample,
    f32: FromSample<T>,
{
    out.clear();
    if device_channels == 0 {
        return;
    }
    // `chunks` never yields an empty frame, so `frame.len() - 1` cannot underflow.
    for frame in data.chunks(device_channels) {
        for channel in 0..wanted {
            let value = frame[channel.min(frame.len() - 1)];
            out.push(f32::from_sample(value));
        }
    }
}

/// Output side of the channel adaptation: a mono device gets the mean of the
/// rendered channels, extra device channels are silenced.
fn adapt_output_frames<T>(rendered: &[f32], wanted: usize, data: &mut [T], device_channels: usize)
where
    T: SizedSample + FromSample<f32>,
{
    if device_channels == 0 || wanted == 0 {
        data.fill(T::EQUILIBRIUM);
        return;
    }
    for (out, frame) in data
        .chunks_mut(device_channels)
        .zip(rendered.chunks(wanted))
    {
        if device_channels == 1 && wanted > 1 {
            let mean = frame.iter().sum::<f32>() / frame.len() as f32;
            out[0] = T::from_sample(mean);
            continue;
        }
        for (channel, slot) in out.iter_mut().enumerate() {
            let value = frame.get(channel).copied().unwrap_or(0.0);
            *slot = T::from_sample(value);
        }
    }
}

/// Backend over the default cpal host
pub struct CpalBackend {
    host: cpal::Host,
    registry: RefCell<DeviceRegistry>,
    stream: Option<cpal::Stream>,
    reporter: Arc<dyn ErrorReporter>,
}

impl CpalBackend {
    /// Stream errors reported by cpal (device unplugged, ...) go to `reporter`.
    pub fn new(reporter: Arc<dyn ErrorReporter>) -> Self {
        Self::with_host(cpal::default_host(), reporter)
    }

    pub fn with_host(host: cpal::Host, reporter: Arc<dyn ErrorReporter>) -> Self {
        log::info!("Using audio host {:?}", host.id());
        Self {
            host,
            registry: RefCell::new(DeviceRegistry::default()),
            stream: None,
            reporter,
        }
    }

    /// Every device with a name, first one wins on duplicate names
    fn named_devices(&self) -> Vec<(DeviceId, cpal::Device)> {
        let devices = match self.host.devices() {
            Ok(devices) => devices,
            Err(e) => {
                log::warn!("Failed to enumerate audio devices: {}", e);
                return Vec::new();
            }
        };

        let mut registry = self.registry.borrow_mut();
        let mut seen = HashSet::new();
        devices
            .filter_map(|device| {
                let name = device.name().ok()?;
                let id = registry.id_for(&name);
                seen.insert(id).then_some((id, device))
            })
            .collect()
    }

    fn find_device(&self, id: DeviceId) -> Option<cpal::Device> {
        self.named_devices()
            .into_iter()
            .find(|(device_id, _)| *device_id == id)
            .map(|(_, device)| device)
    }

    fn id_of(&self, device: Option<cpal::Device>) -> DeviceId {
        device
            .and_then(|d| d.name().ok())
            .map(|name| self.registry.borrow_mut().id_for(&name))
            .unwrap_or(DeviceId::NONE)
    }

    fn negotiate_for(
        device: &cpal::Device,
        config: &StreamConfig,
    ) -> Result<Negotiated, BackendError> {
        let (ranges, default): (Vec<ConfigRange>, _) = match config.direction {
            StreamDirection::Input => (
                device
                    .supported_input_configs()
                    .map(|configs| configs.map(ConfigRange::from).collect())
                    .unwrap_or_default(),
                device.default_input_config(),
            ),
            StreamDirection::Output => (
                device
                    .supported_output_configs()
                    .map(|configs| configs.map(ConfigRange::from).collect())
                    .unwrap_or_default(),
                device.default_output_config(),
            ),
        };
        let default = default.map_err(|e| BackendError::UnsupportedFormat(e.to_string()))?;
        let default_range = ConfigRange {
            channels: default.channels(),
            min_sample_rate: default.sample_rate().0,
            max_sample_rate: default.sample_rate().0,
            frames: match *default.buffer_size() {
                cpal::SupportedBufferSize::Range { min, max } => Some((min, max)),
                cpal::SupportedBufferSize::Unknown => None,
            },
            format: default.sample_format(),
        };

        let negotiated = negotiate(
            &ranges,
            default_range,
            config.channels,
            config.sample_rate,
            config.frames_per_block,
        );
        if negotiated.channels != config.channels || negotiated.sample_rate != config.sample_rate {
            log::warn!(
                "Device does not support {} channel(s) at {} Hz, using {} channel(s) at {} Hz",
                config.channels,
                config.sample_rate,
                negotiated.channels,
                negotiated.sample_rate
            );
        }
        Ok(negotiated)
    }

    fn build_input<T>(
        &self,
        device: &cpal::Device,
        stream_config: &cpal::StreamConfig,
        wanted_channels: usize,
        frames_per_block: usize,
        mut callback: Box<dyn FnMut(&[f32]) + Send + 'static>,
    ) -> Result<cpal::Stream, BackendError>
    where
        T: SizedSample,
        f32: FromSample<T>,
    {
        let device_channels = stream_config.channels as usize;
        let mut adapted: Vec<f32> = Vec::with_capacity(frames_per_block * wanted_channels * 2);
        let reporter = Arc::clone(&self.reporter);

        device
            .build_input_stream(
                stream_config,
                // The adapters are total over any channel count; `callback`
                // contains its own panics.
                move |data: &[T], _: &cpal::InputCallbackInfo| {
                    adapt_input_frames(data, device_channels, wanted_channels, &mut adapted);
                    callback(adapted.as_slice());
                },
                move |err| reporter.report(&format!("input stream: {}", err)),
                None,
            )
            .map_err(|e| BackendError::BuildStream(e.to_string()))
    }

    fn build_output<T>(
        &self,
        device: &cpal::Device,
        stream_config: &cpal::StreamConfig,
        wanted_channels: usize,
        frames_per_block: usize,
        mut callback: Box<dyn FnMut(&mut [f32]) + Send + 'static>,
    ) -> Result<cpal::Stream, BackendError>
    where
        T: SizedSample + FromSample<f32>,
    {
        let device_channels = stream_config.channels as usize;
        let mut rendered: Vec<f32> = Vec::with_capacity(frames_per_block * wanted_channels * 2);
        let reporter = Arc::clone(&self.reporter);

        device
            .build_output_stream(
                stream_config,
                // The adapters are total over any channel count; `callback`
                // contains its own panics.
                move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                    let frames = data.len().checked_div(device_channels).unwrap_or(0);
                    rendered.clear();
                    rendered.resize(frames * wanted_channels, 0.0);
                    callback(rendered.as_mut_slice());
                    adapt_output_frames(&rendered, wanted_channels, data, device_channels);
                },
                move |err| reporter.report(&format!("output stream: {}", err)),
                None,
            )
            .map_err(|e| BackendError::BuildStream(e.to_string()))
    }
}

impl DeviceBackend for CpalBackend {
    fn device_ids(&self) -> Vec<DeviceId> {
        self.named_devices().into_iter().map(|(id, _)| id).collect()
    }

    fn default_input_device_id(&self) -> DeviceId {
        self.id_of(self.host.default_input_device())
    }

    fn default_output_device_id(&self) -> DeviceId {
        self.id_of(self.host.default_output_device())
    }

    fn device_info(&self, id: DeviceId) -> Option<DeviceInfo> {
        let device = self.find_device(id)?;
        let name = device.name().ok()?;

        let input_channels = device
            .supported_input_configs()
            .ok()
            .and_then(|configs| configs.map(|c| c.channels()).max())
            .unwrap_or(0);
        let output_channels = device
            .supported_output_configs()
            .ok()
            .and_then(|configs| configs.map(|c| c.channels()).max())
            .unwrap_or(0);

        // Input rate first: capture is the only user of the preferred rate.
        let preferred_sample_rate = device
            .default_input_config()
            .or_else(|_| device.default_output_config())
            .map(|c| c.sample_rate().0)
            .unwrap_or(0);

        Some(DeviceInfo {
            id,
            name,
            input_channels,
            output_channels,
            preferred_sample_rate,
            is_default_input: self.default_input_device_id() == id,
            is_default_output: self.default_output_device_id() == id,
        })
    }

    fn open_stream(
        &mut self,
        config: StreamConfig,
        callback: StreamCallback,
    ) -> Result<(), BackendError> {
        if self.stream.is_some() {
            return Err(BackendError::StreamAlreadyOpen);
        }
        if callback.direction() != config.direction {
            return Err(BackendError::DirectionMismatch);
        }

        let device = self
            .find_device(config.device_id)
            .ok_or(BackendError::DeviceNotFound(config.device_id))?;
        let negotiated = Self::negotiate_for(&device, &config)?;
        log::debug!("Negotiated {:?} for {:?}", negotiated, config);

        let stream_config = cpal::StreamConfig {
            channels: negotiated.channels,
            sample_rate: cpal::SampleRate(negotiated.sample_rate),
            buffer_size: match negotiated.frames_per_block {
                Some(frames) => cpal::BufferSize::Fixed(frames),
                None => cpal::BufferSize::Default,
            },
        };
        let wanted = config.channels as usize;
        let frames = config.frames_per_block as usize;

        let stream = match (callback, negotiated.format) {
            (StreamCallback::Input(cb), SampleFormat::F32) => {
                self.build_input::<f32>(&device, &stream_config, wanted, frames, cb)
            }
            (StreamCallback::Input(cb), SampleFormat::I16) => {
                self.build_input::<i16>(&device, &stream_config, wanted, frames, cb)
            }
            (StreamCallback::Input(cb), SampleFormat::U16) => {
                self.build_input::<u16>(&device, &stream_config, wanted, frames, cb)
            }
            (StreamCallback::Input(cb), SampleFormat::I32) => {
                self.build_input::<i32>(&device, &stream_config, wanted, frames, cb)
            }
            (StreamCallback::Output(cb), SampleFormat::F32) => {
                self.build_output::<f32>(&device, &stream_config, wanted, frames, cb)
            }
            (StreamCallback::Output(cb), SampleFormat::I16) => {
                self.build_output::<i16>(&device, &stream_config, wanted, frames, cb)
            }
            (StreamCallback::Output(cb), SampleFormat::U16) => {
                self.build_output::<u16>(&device, &stream_config, wanted, frames, cb)
            }
            (StreamCallback::Output(cb), SampleFormat::I32) => {
                self.build_output::<i32>(&device, &stream_config, wanted, frames, cb)
            }
            (_, format) => Err(BackendError::UnsupportedFormat(format!("{:?}", format))),
        }?;

        stream
            .play()
            .map_err(|e| BackendError::PlayStream(e.to_string()))?;
        self.stream = Some(stream);
        Ok(())
    }

    fn close_stream(&mut self) {
        if let Some(stream) = self.stream.take() {
            if let Err(e) = stream.pause() {
                log::debug!("Failed to pause stream before closing: {}", e);
            }
            // Dropping the stream stops the callback thread and waits for it.
            drop(stream);
        }
    }

    fn is_stream_open(&self) -> bool {
        self.stream.is_some()
    }
}

impl Drop for CpalBackend {
    fn drop(&mut self) {
        self.close_stream();
    }
}
