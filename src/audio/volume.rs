//! Loudness estimation

use super::backend::DeviceBackend;
use super::player::PlaybackEngine;

/// Root mean square of `samples`, 0 for an empty slice.
pub fn compute_volume(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_of_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_of_squares / samples.len() as f32).sqrt()
}

/// Longest window `compute_volume_of_player` averages over, in frames
const MAX_AVERAGE_FRAMES: i64 = 1 << 20;

/// RMS of what the player output over the last `average_duration_in_seconds`,
/// read from the mono view with volume and mute applied.
///
/// Windows longer than [`MAX_AVERAGE_FRAMES`] are shortened to their most
/// recent part.
pub fn compute_volume_of_player<B: DeviceBackend>(
    player: &PlaybackEngine<B>,
    average_duration_in_seconds: f32,
) -> f32 {
    let sample_rate = player.audio_data().sample_rate();
    let frames = (average_duration_in_seconds * sample_rate as f32).round() as i64;
    let frames = frames.min(MAX_AVERAGE_FRAMES);
    if frames <= 0 {
        return 0.0;
    }

    // The cursor can sit anywhere in the i64 range after a seek.
    let end = player.current_frame();
    let start = end.saturating_sub(frames);
    if start == end {
        return 0.0;
    }

    let sum_of_squares: f32 = (start..end)
        .map(|frame| player.sample_mono(frame).powi(2))
        .sum();
    (sum_of_squares / (end - start) as f32).sqrt()
}
