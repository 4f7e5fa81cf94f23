//! Configuration files
//!
//! Two kinds of file are read here:
//!
//! - [`DeviceOptions`]: driver tuning (queue depth, default timeouts, write
//!   coalescing, temperature cache), as `.json` or `.toml`
//! - [`FmcwSingleShapeFile`]: the single-shape FMCW configuration consumed by
//!   the configurator CLI
//!
//! # Example
//!
//! ```ignore
//! use mmradar_rs::config::{DeviceOptions, FmcwSingleShapeFile};
//!
//! let options = DeviceOptions::load_or_default("radar.toml");
//! let shape = FmcwSingleShapeFile::load("config.json")?;
//! let sequence = shape.to_simple_config()?.to_sequence();
//! ```

use crate::error::{RadarError, Result};
use crate::sequence::{Chirp, MimoMode, SimpleSequenceConfig};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Default `get_next_frame` timeout for framed FMCW sensors
pub const DEFAULT_FMCW_TIMEOUT_MS: u64 = 10_000;

/// Default `get_next_frame` timeout for pulsed sensors
pub const DEFAULT_PULSED_TIMEOUT_MS: u64 = 1_100;

/// Default lifetime of a cached temperature reading
pub const DEFAULT_TEMPERATURE_TTL_MS: u64 = 100;

/// Default cap on slices per second for FMCW streaming
pub const DEFAULT_MAX_SLICE_RATE_HZ: f64 = 20.0;

/// Driver options applied when a device is opened
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeviceOptions {
    /// Transport queue depth in slices; derived from the frame rate when unset
    #[serde(default)]
    pub frame_queue_size: Option<usize>,

    #[serde(default = "default_fmcw_timeout_ms")]
    pub fmcw_timeout_ms: u64,

    #[serde(default = "default_pulsed_timeout_ms")]
    pub pulsed_timeout_ms: u64,

    /// Merge writes to consecutive registers into bursts
    #[serde(default = "default_true")]
    pub coalesce_writes: bool,

    #[serde(default = "default_temperature_ttl_ms")]
    pub temperature_ttl_ms: u64,

    #[serde(default = "default_max_slice_rate_hz")]
    pub max_slice_rate_hz: f64,
}

fn default_fmcw_timeout_ms() -> u64 {
    DEFAULT_FMCW_TIMEOUT_MS
}

fn default_pulsed_timeout_ms() -> u64 {
    DEFAULT_PULSED_TIMEOUT_MS
}

fn default_true() -> bool {
    true
}

fn default_temperature_ttl_ms() -> u64 {
    DEFAULT_TEMPERATURE_TTL_MS
}

fn default_max_slice_rate_hz() -> f64 {
    DEFAULT_MAX_SLICE_RATE_HZ
}

impl Default for DeviceOptions {
    fn default() -> Self {
        Self {
            frame_queue_size: None,
            fmcw_timeout_ms: DEFAULT_FMCW_TIMEOUT_MS,
            pulsed_timeout_ms: DEFAULT_PULSED_TIMEOUT_MS,
            coalesce_writes: true,
            temperature_ttl_ms: DEFAULT_TEMPERATURE_TTL_MS,
            max_slice_rate_hz: DEFAULT_MAX_SLICE_RATE_HZ,
        }
    }
}

impl DeviceOptions {
    pub fn fmcw_timeout(&self) -> Duration {
        Duration::from_millis(self.fmcw_timeout_ms)
    }

    pub fn pulsed_timeout(&self) -> Duration {
        Duration::from_millis(self.pulsed_timeout_ms)
    }

    pub fn temperature_ttl(&self) -> Duration {
        Duration::from_millis(self.temperature_ttl_ms)
    }

    /// Load options from a `.json` or `.toml` file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = read_file(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => toml::from_str(&content)
                .map_err(|e| RadarError::FileInvalid(format!("{}: {}", path.display(), e))),
            Some("json") => serde_json::from_str(&content).map_err(RadarError::from_json_error),
            other => Err(RadarError::FormatUnknown(format!(
                "option file extension {:?}",
                other.unwrap_or("")
            ))),
        }
    }

    /// Load options, falling back to defaults on any error
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        match Self::load(path) {
            Ok(options) => options,
            Err(e) => {
                tracing::warn!("Using default device options, {:?} not loaded: {}", path, e);
                Self::default()
            }
        }
    }

    /// Save options as TOML
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| RadarError::Internal(format!("Failed to serialize options: {}", e)))?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

fn read_file(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|e| RadarError::OpeningFile(format!("{}: {}", path.display(), e)))
}

/// `{"device_config": {"fmcw_single_shape": {...}}}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FmcwSingleShapeFile {
    pub device_config: DeviceConfigSection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeviceConfigSection {
    pub fmcw_single_shape: FmcwSingleShape,
}

/// Single-shape FMCW parameters, antennas numbered from 1
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FmcwSingleShape {
    pub rx_antennas: Vec<u32>,
    pub tx_antennas: Vec<u32>,
    pub tx_power_level: u32,
    #[serde(rename = "if_gain_dB")]
    pub if_gain_db: i32,
    #[serde(rename = "start_frequency_Hz")]
    pub start_frequency_hz: f64,
    #[serde(rename = "end_frequency_Hz")]
    pub end_frequency_hz: f64,
    #[serde(rename = "sample_rate_Hz")]
    pub sample_rate_hz: f64,
    pub num_samples_per_chirp: u32,
    pub num_chirps_per_frame: u32,
    pub chirp_repetition_time_s: f64,
    pub frame_repetition_time_s: f64,
    #[serde(rename = "hp_cutoff_Hz", default = "default_hp_cutoff_hz")]
    pub hp_cutoff_hz: i32,
    #[serde(rename = "aaf_cutoff_Hz", default = "default_aaf_cutoff_hz")]
    pub aaf_cutoff_hz: i32,
    #[serde(default)]
    pub mimo_mode: MimoMode,
}

fn default_hp_cutoff_hz() -> i32 {
    80_000
}

fn default_aaf_cutoff_hz() -> i32 {
    500_000
}

fn antenna_mask(key: &str, antennas: &[u32]) -> Result<u32> {
    if antennas.is_empty() {
        return Err(RadarError::InvalidJsonValue(format!("{} must not be empty", key)));
    }
    antennas.iter().try_fold(0u32, |mask, &antenna| {
        if antenna == 0 || antenna > 32 {
            return Err(RadarError::InvalidJsonValue(format!(
                "{}: antenna {} is not a valid index",
                key, antenna
            )));
        }
        Ok(mask | 1 << (antenna - 1))
    })
}

fn mask_antennas(mask: u32) -> Vec<u32> {
    (0..32).filter(|bit| mask & (1 << bit) != 0).map(|bit| bit + 1).collect()
}

fn positive(key: &str, value: f64) -> Result<f64> {
    if !value.is_finite() || value <= 0.0 {
        return Err(RadarError::InvalidJsonValue(format!("{} must be positive", key)));
    }
    Ok(value)
}

impl FmcwSingleShapeFile {
    /// Parse a configuration file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = read_file(path.as_ref())?;
        Self::from_json(&content)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(RadarError::from_json_error)
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| RadarError::Internal(e.to_string()))
    }

    /// Convert to a simple sequence configuration
    pub fn to_simple_config(&self) -> Result<SimpleSequenceConfig> {
        let shape = &self.device_config.fmcw_single_shape;
        Ok(SimpleSequenceConfig {
            frame_repetition_time_s: positive("frame_repetition_time_s", shape.frame_repetition_time_s)?,
            chirp_repetition_time_s: positive("chirp_repetition_time_s", shape.chirp_repetition_time_s)?,
            num_chirps: shape.num_chirps_per_frame,
            mimo_mode: shape.mimo_mode,
            chirp: Chirp {
                start_frequency_hz: shape.start_frequency_hz.round(),
                end_frequency_hz: shape.end_frequency_hz.round(),
                sample_rate_hz: positive("sample_rate_Hz", shape.sample_rate_hz)?,
                num_samples: shape.num_samples_per_chirp,
                rx_mask: antenna_mask("rx_antennas", &shape.rx_antennas)?,
                tx_mask: antenna_mask("tx_antennas", &shape.tx_antennas)?,
                tx_power_level: shape.tx_power_level,
                lp_cutoff_hz: shape.aaf_cutoff_hz,
                hp_cutoff_hz: shape.hp_cutoff_hz,
                if_gain_db: shape.if_gain_db,
                ..Chirp::default()
            },
        })
    }

    pub fn from_simple_config(config: &SimpleSequenceConfig) -> Self {
        let chirp = &config.chirp;
        Self {
            device_config: DeviceConfigSection {
                fmcw_single_shape: FmcwSingleShape {
                    rx_antennas: mask_antennas(chirp.rx_mask),
                    tx_antennas: mask_antennas(chirp.tx_mask),
                    tx_power_level: chirp.tx_power_level,
                    if_gain_db: chirp.if_gain_db,
                    start_frequency_hz: chirp.start_frequency_hz,
                    end_frequency_hz: chirp.end_frequency_hz,
                    sample_rate_hz: chirp.sample_rate_hz,
                    num_samples_per_chirp: chirp.num_samples,
                    num_chirps_per_frame: config.num_chirps,
                    chirp_repetition_time_s: config.chirp_repetition_time_s,
                    frame_repetition_time_s: config.frame_repetition_time_s,
                    hp_cutoff_hz: chirp.hp_cutoff_hz,
                    aaf_cutoff_hz: chirp.lp_cutoff_hz,
                    mimo_mode: config.mimo_mode,
                },
            },
        }
    }
}
