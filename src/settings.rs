//! Persisted user settings and runtime tunables.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::device_link::{DEFAULT_ADDRESS, DEFAULT_PORT, ENV_ADDRESS, ENV_PORT};
use crate::sample_store::DEFAULT_CAPACITY;
use crate::trigger_config::{ChannelState, TriggerConfigError, TriggerSpec, TriggerWhen, CHANNELS, TRIGGERS};
use crate::trigger_engine::TriggerEngine;
use crate::view_window::DEFAULT_WIDTH_PX;

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TriggerSettings {
    pub enabled: bool,
    /// Index of the capture action: count, sample from, around, to.
    pub action: i32,
    /// One channel type per channel, 0 (don't care) to 5 (rising).
    pub channel_types: Vec<i32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub server_address: String,
    pub server_port: u16,
    /// Channels to capture; `None` captures every usable channel.
    pub active_channels: Option<Vec<u8>>,
    /// Index into the post-trigger sample count table.
    pub trigger_samples: usize,
    pub triggers: [TriggerSettings; TRIGGERS],
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server_address: DEFAULT_ADDRESS.to_string(),
            server_port: DEFAULT_PORT,
            active_channels: None,
            trigger_samples: 0,
            triggers: Default::default(),
        }
    }
}

impl Settings {
    /// Read settings from a YAML file. A missing file gives the defaults.
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        if !path.exists() {
            log::debug!("No settings at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)?;
        let settings = serde_yaml::from_str(&text)?;
        log::debug!("Loaded settings from {}", path.display());
        Ok(settings)
    }

    pub fn save(&self, path: &Path) -> Result<(), SettingsError> {
        let text = serde_yaml::to_string(self)?;
        std::fs::write(path, text)?;
        log::debug!("Saved settings to {}", path.display());
        Ok(())
    }

    /// `PIGPIO_ADDR` and `PIGPIO_PORT` win over the stored server when set.
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(
            std::env::var(ENV_ADDRESS).ok().as_deref(),
            std::env::var(ENV_PORT).ok().as_deref(),
        )
    }

    fn with_overrides(mut self, address: Option<&str>, port: Option<&str>) -> Self {
        if let Some(address) = address.filter(|a| !a.is_empty()) {
            self.server_address = address.to_string();
        }
        if let Some(port) = port.filter(|p| !p.is_empty()) {
            match port.parse() {
                Ok(port) => self.server_port = port,
                Err(_) => log::warn!("Ignoring invalid {} '{}'", ENV_PORT, port),
            }
        }
        self
    }
}

impl TriggerEngine {
    /// Replace every trigger and the trigger sample count from `settings`.
    /// Nothing changes if any entry is invalid.
    pub fn load(&mut self, settings: &Settings) -> Result<(), TriggerConfigError> {
        let mut next = self.clone();

        for (index, stored) in settings.triggers.iter().enumerate() {
            let mut channels = [ChannelState::DontCare; CHANNELS];
            for (slot, &value) in channels.iter_mut().zip(stored.channel_types.iter()) {
                *slot = ChannelState::try_from(value)?;
            }
            let when = TriggerWhen::try_from(stored.action)?;

            let mut spec = TriggerSpec::new(channels, when);
            spec.set_enabled(stored.enabled);
            next.configure(index, spec)?;
        }
        next.set_trigger_samples_index(settings.trigger_samples)?;

        *self = next;
        Ok(())
    }

    pub fn to_settings(&self) -> ([TriggerSettings; TRIGGERS], usize) {
        let triggers = std::array::from_fn(|index| {
            let spec = &self.specs()[index];
            TriggerSettings {
                enabled: spec.enabled(),
                action: spec.when.index(),
                channel_types: spec.channels().iter().map(ChannelState::index).collect(),
            }
        });
        (triggers, self.trigger_samples_index())
    }
}

/// Rates and sizes the capture runs with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeConfig {
    pub input_hz: u32,
    pub output_hz: u32,
    pub width_px: u32,
    pub capacity: usize,
}

impl RuntimeConfig {
    pub fn input_period(&self) -> Duration {
        Duration::from_micros(1_000_000 / u64::from(self.input_hz.max(1)))
    }

    pub fn output_period(&self) -> Duration {
        Duration::from_micros(1_000_000 / u64::from(self.output_hz.max(1)))
    }

    /// Share of a second one input pass may use, leaving room for the
    /// output passes and everything else.
    pub fn time_slot(&self) -> Duration {
        Duration::from_micros(1_000_000 / u64::from((self.input_hz + 4 * self.output_hz).max(1)))
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            input_hz: 40,
            output_hz: 20,
            width_px: DEFAULT_WIDTH_PX,
            capacity: DEFAULT_CAPACITY,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.server_address, "localhost");
        assert_eq!(settings.server_port, 8888);
        assert_eq!(settings.active_channels, None);

        let config = RuntimeConfig::default();
        assert_eq!(config.time_slot(), Duration::from_micros(8_333));
        assert_eq!(config.output_period(), Duration::from_millis(50));
    }

    #[test]
    fn test_yaml_round_trip_through_file() {
        let dir = std::env::temp_dir().join(format!("piscope-settings-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("settings.yaml");

        let mut settings = Settings::default();
        settings.active_channels = Some(vec![4, 17]);
        settings.triggers[2].enabled = true;
        settings.triggers[2].channel_types = vec![5, 0, 1];
        settings.save(&path).unwrap();

        assert_eq!(Settings::load(&path).unwrap(), settings);
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let path = Path::new("/nonexistent/piscope/settings.yaml");
        assert_eq!(Settings::load(path).unwrap(), Settings::default());
    }

    #[test]
    fn test_partial_yaml_fills_defaults() {
        let settings: Settings = serde_yaml::from_str("server_port: 9999\n").unwrap();
        assert_eq!(settings.server_port, 9999);
        assert_eq!(settings.server_address, "localhost");
    }

    #[test]
    fn test_overrides() {
        let settings = Settings::default().with_overrides(Some("pi.local"), Some("not-a-port"));
        assert_eq!(settings.server_address, "pi.local");
        assert_eq!(settings.server_port, 8888);

        let settings = Settings::default().with_overrides(Some(""), Some("7777"));
        assert_eq!(settings.server_address, "localhost");
        assert_eq!(settings.server_port, 7777);
    }

    #[test]
    fn test_trigger_engine_load_and_store() {
        let mut settings = Settings::default();
        settings.trigger_samples = 4;
        settings.triggers[0] = TriggerSettings {
            enabled: true,
            action: 1,
            channel_types: vec![5],
        };
        settings.triggers[1] = TriggerSettings {
            enabled: true,
            action: 0,
            channel_types: vec![],
        };

        let mut engine = TriggerEngine::new();
        engine.load(&settings).unwrap();

        assert!(engine.spec(0).unwrap().enabled());
        assert_eq!(engine.spec(0).unwrap().when, TriggerWhen::SampleFrom);
        assert!(!engine.spec(1).unwrap().enabled());
        assert_eq!(engine.trigger_samples(), 2000);

        let (triggers, samples) = engine.to_settings();
        assert_eq!(samples, 4);
        assert!(triggers[0].enabled);
        assert_eq!(triggers[0].channel_types.len(), CHANNELS);
        assert_eq!(triggers[0].channel_types[0], 5);
    }

    #[test]
    fn test_invalid_settings_change_nothing() {
        let mut settings = Settings::default();
        settings.triggers[0].channel_types = vec![2];
        settings.triggers[0].enabled = true;
        settings.triggers[3].channel_types = vec![9];

        let mut engine = TriggerEngine::new();
        assert_eq!(
            engine.load(&settings),
            Err(TriggerConfigError::UnknownChannelState(9))
        );
        assert!(!engine.spec(0).unwrap().enabled());
    }
}
