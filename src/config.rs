//! Configuration: CLI flags layered over an optional TOML file.
//!
//! No persisted runtime settings exist in this crate (the database layer is
//! an external collaborator); everything here is read once at startup.

use crate::error::{ConfigError, Result};
use serde::Deserialize;
use std::path::Path;

fn default_ring_buffer_capacity_bytes() -> usize {
    262_144
}

fn default_fade_out_ms() -> u64 {
    500
}

fn default_tempo() -> f64 {
    1.0
}

fn default_position_event_interval_ms() -> u64 {
    1000
}

#[derive(Debug, Clone, Deserialize)]
pub struct TomlConfig {
    #[serde(default = "default_ring_buffer_capacity_bytes")]
    pub ring_buffer_capacity_bytes: usize,

    #[serde(default = "default_fade_out_ms")]
    pub default_fade_out_ms: u64,

    #[serde(default = "default_tempo")]
    pub default_tempo: f64,

    #[serde(default)]
    pub output_device_name: Option<String>,

    #[serde(default = "default_position_event_interval_ms")]
    pub position_event_interval_ms: u64,
}

impl Default for TomlConfig {
    fn default() -> Self {
        TomlConfig {
            ring_buffer_capacity_bytes: default_ring_buffer_capacity_bytes(),
            default_fade_out_ms: default_fade_out_ms(),
            default_tempo: default_tempo(),
            output_device_name: None,
            position_event_interval_ms: default_position_event_interval_ms(),
        }
    }
}

/// A candidate output format, tried in order on device-open failure, per the
/// fallback cascade 48000/stereo/16-bit -> 44100/stereo/16-bit -> device
/// default.
#[derive(Debug, Clone, Copy)]
pub struct CandidateFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

pub const DEFAULT_CANDIDATE_FORMATS: &[CandidateFormat] = &[
    CandidateFormat {
        sample_rate: 48_000,
        channels: 2,
    },
    CandidateFormat {
        sample_rate: 44_100,
        channels: 2,
    },
];

#[derive(Debug, Clone)]
pub struct Config {
    pub ring_buffer_capacity_bytes: usize,
    pub default_fade_out_ms: u64,
    pub default_tempo: f64,
    pub output_device_name: Option<String>,
    pub position_event_interval_ms: u64,
}

impl Config {
    /// Loads config from an optional TOML file, then applies CLI overrides.
    pub fn load(
        config_path: Option<&Path>,
        device_override: Option<String>,
        tempo_override: Option<f64>,
    ) -> Result<Self> {
        let toml_cfg = match config_path {
            Some(path) => Self::read_toml(path)?,
            None => TomlConfig::default(),
        };

        Ok(Config {
            ring_buffer_capacity_bytes: toml_cfg.ring_buffer_capacity_bytes,
            default_fade_out_ms: toml_cfg.default_fade_out_ms,
            default_tempo: tempo_override.unwrap_or(toml_cfg.default_tempo),
            output_device_name: device_override.or(toml_cfg.output_device_name),
            position_event_interval_ms: toml_cfg.position_event_interval_ms,
        })
    }

    fn read_toml(path: &Path) -> Result<TomlConfig> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let cfg: TomlConfig = toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        Ok(cfg)
    }
}

impl Default for Config {
    fn default() -> Self {
        let toml_cfg = TomlConfig::default();
        Config {
            ring_buffer_capacity_bytes: toml_cfg.ring_buffer_capacity_bytes,
            default_fade_out_ms: toml_cfg.default_fade_out_ms,
            default_tempo: toml_cfg.default_tempo,
            output_device_name: toml_cfg.output_device_name,
            position_event_interval_ms: toml_cfg.position_event_interval_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_sane_values() {
        let cfg = Config::default();
        assert_eq!(cfg.default_tempo, 1.0);
        assert_eq!(cfg.default_fade_out_ms, 500);
        assert!(cfg.ring_buffer_capacity_bytes > 0);
    }

    #[test]
    fn tempo_override_wins_over_file_default() {
        let cfg = Config::load(None, None, Some(1.5)).unwrap();
        assert_eq!(cfg.default_tempo, 1.5);
    }
}
