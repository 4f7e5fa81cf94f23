//! Test data builders for sequences and configuration files

use mmradar_rs::sequence::{Chirp, MimoMode, SimpleSequenceConfig};

/// Builder for single-shape FMCW configurations
pub struct SimpleConfigBuilder {
    config: SimpleSequenceConfig,
}

impl SimpleConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: SimpleSequenceConfig::default(),
        }
    }

    pub fn frame_period(mut self, seconds: f64) -> Self {
        self.config.frame_repetition_time_s = seconds;
        self
    }

    pub fn chirps(mut self, count: u32, period_s: f64) -> Self {
        self.config.num_chirps = count;
        self.config.chirp_repetition_time_s = period_s;
        self
    }

    pub fn samples(mut self, count: u32) -> Self {
        self.config.chirp.num_samples = count;
        self
    }

    pub fn band(mut self, start_hz: f64, end_hz: f64) -> Self {
        self.config.chirp.start_frequency_hz = start_hz;
        self.config.chirp.end_frequency_hz = end_hz;
        self
    }

    pub fn antennas(mut self, rx_mask: u32, tx_mask: u32) -> Self {
        self.config.chirp.rx_mask = rx_mask;
        self.config.chirp.tx_mask = tx_mask;
        self
    }

    pub fn tdm_mimo(mut self) -> Self {
        self.config.mimo_mode = MimoMode::Tdm;
        self
    }

    pub fn build(self) -> SimpleSequenceConfig {
        self.config
    }
}

impl Default for SimpleConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// 64 chirps of 128 samples sweeping 60 to 60.25 GHz
pub fn sixty_ghz_config() -> SimpleSequenceConfig {
    SimpleSequenceConfig {
        frame_repetition_time_s: 0.25,
        chirp_repetition_time_s: 1e-3,
        num_chirps: 64,
        mimo_mode: MimoMode::Off,
        chirp: Chirp {
            start_frequency_hz: 60.0e9,
            end_frequency_hz: 60.25e9,
            sample_rate_hz: 2.0e6,
            num_samples: 128,
            rx_mask: 0b1,
            tx_mask: 0b1,
            tx_power_level: 31,
            if_gain_db: 33,
            ..Chirp::default()
        },
    }
}

/// JSON text of a `fmcw_single_shape` configuration file
pub fn single_shape_json(config: &SimpleSequenceConfig) -> String {
    let antennas = |mask: u32| -> Vec<u32> { (0..32).filter(|b| mask & (1 << b) != 0).map(|b| b + 1).collect() };
    serde_json::json!({
        "device_config": {
            "fmcw_single_shape": {
                "rx_antennas": antennas(config.chirp.rx_mask),
                "tx_antennas": antennas(config.chirp.tx_mask),
                "tx_power_level": config.chirp.tx_power_level,
                "if_gain_dB": config.chirp.if_gain_db,
                "start_frequency_Hz": config.chirp.start_frequency_hz,
                "end_frequency_Hz": config.chirp.end_frequency_hz,
                "sample_rate_Hz": config.chirp.sample_rate_hz,
                "num_samples_per_chirp": config.chirp.num_samples,
                "num_chirps_per_frame": config.num_chirps,
                "chirp_repetition_time_s": config.chirp_repetition_time_s,
                "frame_repetition_time_s": config.frame_repetition_time_s,
                "hp_cutoff_Hz": config.chirp.hp_cutoff_hz,
                "aaf_cutoff_Hz": config.chirp.lp_cutoff_hz,
                "mimo_mode": match config.mimo_mode {
                    MimoMode::Off => "off",
                    MimoMode::Tdm => "tdm",
                },
            }
        }
    })
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_config_builder() {
        let config = SimpleConfigBuilder::new().chirps(16, 0.5e-3).samples(64).tdm_mimo().build();
        assert_eq!(config.num_chirps, 16);
        assert_eq!(config.chirp.num_samples, 64);
        assert_eq!(config.mimo_mode, MimoMode::Tdm);
    }
}
