//! In-memory audio content
//!
//! [`AudioData`] is what the playback engine plays: interleaved f32 samples plus
//! their layout. It is never mutated once built; the engine swaps whole values.
//! [`AudioData::load`] decodes any file symphonia understands into one.

use std::fs::File;
use std::path::Path;
use std::time::Duration;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use thiserror::Error;

/// Errors that can occur while loading an audio file
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("Failed to open file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to probe audio format: {0}")]
    ProbeError(String),

    #[error("No audio tracks found")]
    NoTracks,

    #[error("Unsupported codec: {0}")]
    UnsupportedCodec(String),

    #[error("Decoder error: {0}")]
    DecoderError(String),
}

/// Interleaved samples with their channel count and sample rate
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AudioData {
    samples: Vec<f32>,
    channels_count: u16,
    sample_rate: u32,
}

impl AudioData {
    /// `channels_count` is raised to 1 when samples are given without a layout.
    pub fn new(samples: Vec<f32>, channels_count: u16, sample_rate: u32) -> Self {
        let channels_count = if samples.is_empty() {
            channels_count
        } else {
            channels_count.max(1)
        };
        Self {
            samples,
            channels_count,
            sample_rate,
        }
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn channels_count(&self) -> u16 {
        self.channels_count
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn frames_count(&self) -> usize {
        if self.channels_count == 0 {
            return 0;
        }
        self.samples.len() / self.channels_count as usize
    }

    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.frames_count() as f64 / self.sample_rate as f64)
    }

    /// Decodes a whole file into memory.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, LoadError> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let probed = symphonia::default::get_probe()
            .format(
                &hint,
                mss,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(|e| LoadError::ProbeError(e.to_string()))?;

        let mut format = probed.format;

        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or(LoadError::NoTracks)?;

        let track_id = track.id;
        let mut sample_rate = track.codec_params.sample_rate.unwrap_or(0);
        let mut channels = track
            .codec_params
            .channels
            .map(|c| c.count() as u16)
            .unwrap_or(0);

        let mut decoder = symphonia::default::get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())
            .map_err(|e| LoadError::UnsupportedCodec(e.to_string()))?;

        let mut samples = Vec::new();
        if let Some(n_frames) = track.codec_params.n_frames {
            samples.reserve(n_frames as usize * channels.max(1) as usize);
        }
        let mut interleaved: Option<SampleBuffer<f32>> = None;

        loop {
            let packet = match format.next_packet() {
                Ok(p) => p,
                Err(SymphoniaError::IoError(e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    break;
                }
                Err(SymphoniaError::ResetRequired) => break,
                Err(e) => return Err(LoadError::DecoderError(e.to_string())),
            };

            if packet.track_id() != track_id {
                continue;
            }

            match decoder.decode(&packet) {
                Ok(decoded) => {
                    let spec = *decoded.spec();
                    channels = spec.channels.count() as u16;
                    sample_rate = spec.rate;

                    let buffer = interleaved.get_or_insert_with(|| {
                        SampleBuffer::<f32>::new(decoded.capacity() as u64, spec)
                    });
                    if buffer.capacity() < decoded.capacity() * spec.channels.count() {
                        *buffer = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
                    }
                    buffer.copy_interleaved_ref(decoded);
                    samples.extend_from_slice(buffer.samples());
                }
                // A corrupt packet only loses that packet.
                Err(SymphoniaError::DecodeError(e)) => {
                    log::warn!("Skipping undecodable packet in {:?}: {}", path, e);
                }
                Err(e) => return Err(LoadError::DecoderError(e.to_string())),
            }
        }

        log::info!(
            "Loaded {:?}: {} channel(s), {} Hz, {} samples",
            path,
            channels,
            sample_rate,
            samples.len()
        );

        Ok(Self::new(samples, channels, sample_rate))
    }
}
