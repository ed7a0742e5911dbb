// Copyright (c) 2026 Robert L. Snyder, Sierra Vista, AZ
// Licensed under the MIT License. See LICENSE file in the project root for details.

//! Configuration system for the engine.
//!
//! Loads the audio clock, prefetch and humanization settings from YAML or
//! TOML files and converts them into the runtime types.

pub mod watcher;

pub use watcher::{validate_config, ConfigEvent, ConfigWatcher};

use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::sequencer::{HumanizeRange, PrefetchConfig};
use crate::timing::{TempoClock, TimeSignature};

/// Engine-wide settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EngineConfig {
    /// Audio sample rate in Hz
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
    /// Tempo in BPM
    #[serde(default = "default_tempo")]
    pub tempo: f64,
    /// Time signature numerator
    #[serde(default = "default_beats_per_bar")]
    pub beats_per_bar: u8,
    /// Time signature denominator
    #[serde(default = "default_beat_unit")]
    pub beat_unit: u8,
    /// Buffers kept queued per sequence
    #[serde(default = "default_buffer_depth")]
    pub buffer_depth: usize,
    /// Frames per audio callback
    #[serde(default = "default_callback_frames")]
    pub callback_frames: u32,
    /// Timing jitter `[min, max]` in bars for new buffers
    #[serde(default)]
    pub humanize_offset: [f64; 2],
    /// Velocity jitter `[min, max]` for new buffers
    #[serde(default)]
    pub humanize_velocity: [f64; 2],
    /// Seed for reproducible humanization
    #[serde(default)]
    pub seed: Option<u64>,
    /// Default tracing filter when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_sample_rate() -> u32 {
    48_000
}
fn default_tempo() -> f64 {
    120.0
}
fn default_beats_per_bar() -> u8 {
    4
}
fn default_beat_unit() -> u8 {
    4
}
fn default_buffer_depth() -> usize {
    crate::sequencer::DEFAULT_BUFFER_DEPTH
}
fn default_callback_frames() -> u32 {
    512
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: default_sample_rate(),
            tempo: default_tempo(),
            beats_per_bar: default_beats_per_bar(),
            beat_unit: default_beat_unit(),
            buffer_depth: default_buffer_depth(),
            callback_frames: default_callback_frames(),
            humanize_offset: [0.0, 0.0],
            humanize_velocity: [0.0, 0.0],
            seed: None,
            log_level: default_log_level(),
        }
    }
}

impl EngineConfig {
    /// Load a configuration file, choosing the format by extension
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        let config = match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => Self::from_toml(&contents)?,
            _ => Self::from_yaml(&contents)?,
        };
        config
            .validate()
            .with_context(|| format!("Invalid configuration in {:?}", path))?;
        Ok(config)
    }

    /// Parse a configuration from a YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).context("Failed to parse YAML configuration")
    }

    /// Parse a configuration from a TOML string
    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).context("Failed to parse TOML configuration")
    }

    /// Serialize to YAML string
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).context("Failed to serialize configuration to YAML")
    }

    /// Save configuration to a YAML file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let yaml = self.to_yaml()?;
        fs::write(path.as_ref(), yaml)
            .with_context(|| format!("Failed to write config file: {:?}", path.as_ref()))
    }

    /// Check values that serde cannot
    pub fn validate(&self) -> Result<()> {
        if self.buffer_depth == 0 {
            bail!("buffer_depth must be at least 1");
        }
        if self.callback_frames == 0 {
            bail!("callback_frames must be at least 1");
        }
        for (name, [min, max]) in [
            ("humanize_offset", self.humanize_offset),
            ("humanize_velocity", self.humanize_velocity),
        ] {
            if min > max {
                bail!("{name} range is inverted: [{min}, {max}]");
            }
        }
        self.signature()?;
        Ok(())
    }

    pub fn signature(&self) -> Result<TimeSignature> {
        Ok(TimeSignature::new(self.beats_per_bar, self.beat_unit)?)
    }

    /// Build the tempo clock described by this configuration
    pub fn to_clock(&self) -> Result<TempoClock> {
        Ok(TempoClock::new(self.sample_rate, self.tempo, self.signature()?)?)
    }

    /// Prefetch settings for the scheduler
    pub fn to_prefetch_config(&self) -> PrefetchConfig {
        PrefetchConfig {
            target_depth: self.buffer_depth,
            humanize_offset: HumanizeRange::from(self.humanize_offset),
            humanize_velocity: HumanizeRange::from(self.humanize_velocity),
            seed: self.seed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timing::Transport;
    use tempfile::tempdir;

    #[test]
    fn test_parse_yaml() {
        let yaml = r#"
sample_rate: 44100
tempo: 90
beats_per_bar: 3
beat_unit: 4
humanize_offset: [0.0, 0.01]
seed: 42
"#;
        let config = EngineConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.sample_rate, 44_100);
        assert_eq!(config.tempo, 90.0);
        assert_eq!(config.beats_per_bar, 3);
        assert_eq!(config.humanize_offset, [0.0, 0.01]);
        assert_eq!(config.seed, Some(42));
        // Unset fields fall back to defaults
        assert_eq!(config.buffer_depth, 2);
        assert_eq!(config.callback_frames, 512);
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_parse_toml() {
        let text = r#"
tempo = 140.0
buffer_depth = 3
humanize_velocity = [-0.1, 0.1]
log_level = "debug"
"#;
        let config = EngineConfig::from_toml(text).unwrap();
        assert_eq!(config.tempo, 140.0);
        assert_eq!(config.buffer_depth, 3);
        assert_eq!(config.humanize_velocity, [-0.1, 0.1]);
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.sample_rate, 48_000);
    }

    #[test]
    fn test_default_values() {
        let config = EngineConfig::from_yaml("{}").unwrap();
        assert_eq!(config, EngineConfig::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_round_trip() {
        let config = EngineConfig {
            tempo: 133.0,
            humanize_offset: [0.0, 0.005],
            seed: Some(7),
            ..Default::default()
        };
        let yaml = config.to_yaml().unwrap();
        assert_eq!(EngineConfig::from_yaml(&yaml).unwrap(), config);
    }

    #[test]
    fn test_load_by_extension() {
        let dir = tempdir().unwrap();

        let yaml_path = dir.path().join("engine.yaml");
        fs::write(&yaml_path, "tempo: 100\n").unwrap();
        assert_eq!(EngineConfig::load(&yaml_path).unwrap().tempo, 100.0);

        let toml_path = dir.path().join("engine.toml");
        fs::write(&toml_path, "tempo = 110.0\n").unwrap();
        assert_eq!(EngineConfig::load(&toml_path).unwrap().tempo, 110.0);
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempdir().unwrap();
        let err = EngineConfig::load(dir.path().join("absent.yaml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let config = EngineConfig {
            buffer_depth: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = EngineConfig {
            humanize_offset: [0.02, 0.01],
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = EngineConfig {
            beat_unit: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_to_clock_and_prefetch_config() {
        let config = EngineConfig {
            humanize_offset: [0.01, 0.01],
            buffer_depth: 4,
            ..Default::default()
        };
        let clock = config.to_clock().unwrap();
        assert_eq!(clock.bar_length_in_frames().unwrap(), 96_000);

        let prefetch = config.to_prefetch_config();
        assert_eq!(prefetch.target_depth, 4);
        assert_eq!(prefetch.humanize_offset, HumanizeRange::new(0.01, 0.01));
    }
}
