use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::audio::{
    CaptureBuffer, DeviceBackend, PlaybackEngine, PlaybackProperties, SelectedDevice,
    DEFAULT_RETAINED_SAMPLES,
};

/// Returns the path to the settings file: `~/.config/live-audio/settings.json`
pub fn settings_path() -> PathBuf {
    let mut path = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
    path.push("live-audio");
    path.push("settings.json");
    path
}

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("Failed to write settings: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to serialize settings: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Persisted audio settings.
///
/// Serialized as JSON to the platform config directory.
/// Fields use `#[serde(default)]` so that adding new settings
/// won't break existing config files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioSettings {
    // Capture
    pub input_device: SelectedDevice,
    pub retained_samples: usize,

    // Playback
    pub playback: PlaybackProperties,
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self {
            input_device: SelectedDevice::UseDefaultDevice,
            retained_samples: DEFAULT_RETAINED_SAMPLES,
            playback: PlaybackProperties::default(),
        }
    }
}

impl AudioSettings {
    /// Load settings from the default location, falling back to defaults on any error.
    pub fn load() -> Self {
        Self::load_from(&settings_path())
    }

    pub fn load_from(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(settings) => {
                    log::info!("Loaded settings from {}", path.display());
                    settings
                }
                Err(e) => {
                    log::warn!("Failed to parse settings ({}), using defaults", e);
                    Self::default()
                }
            },
            Err(e) => {
                log::info!("No settings file found ({}), using defaults", e);
                Self::default()
            }
        }
    }

    /// Save settings to the default location as pretty JSON.
    pub fn save(&self) -> Result<(), SettingsError> {
        self.save_to(&settings_path())
    }

    pub fn save_to(&self, path: &Path) -> Result<(), SettingsError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        log::info!("Saved settings to {}", path.display());
        Ok(())
    }

    /// Extract the current settings from running components.
    pub fn from_components<I, O>(capture: &CaptureBuffer<I>, player: &PlaybackEngine<O>) -> Self
    where
        I: DeviceBackend,
        O: DeviceBackend,
    {
        Self {
            input_device: capture.current_device().clone(),
            retained_samples: capture.retained_length(),
            playback: player.properties(),
        }
    }
}
