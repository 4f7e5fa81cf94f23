//! BGT24ATR22 ("Mimose") pulsed radar profile
//!
//! The chip runs up to four pulse configurations (PCs) per pulse
//! repetition time and keeps two frame configurations resident. Only one
//! frame configuration streams at a time; [`MimoseProfile::compile_switch`]
//! moves between them without reprogramming the clock, AFC and pulse blocks.
//!
//! Samples land in an on-chip memory that the baseboard harvests after
//! each frame, or in two halves per frame when the frame leaves too little
//! idle time for one I²C readout (equidistant sampling).

use super::timing::{cycles_to_seconds, decode_exp_mul16, encode_exp_mul16};
use super::{check_range, queue_size_for, DataPlan, SensorInfo};
use crate::error::{RadarError, Result};
use crate::frame::{AfcReading, ComplexCube};
use crate::registers::{layouts, RegisterBatch, RegisterImage, RegisterMap};
use crate::sequence::{AbbGain, AocMode, Chirp, ChirpProfile, CubeShape, Sequence, SequenceElement};
use crate::transport::{DataFormat, DataSettings, ReadoutEntry};
use num_complex::Complex32;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const NUM_PULSE_CONFIGS: usize = 4;
pub const NUM_FRAME_CONFIGS: usize = 2;

/// External crystal the chip timing is expressed in
pub const EXT_OSC_HZ: f64 = 38.4e6;

pub const MAX_NUM_SAMPLES_ONE_PULSE: u32 = 256;
pub const MAX_NUM_SAMPLES_MULTIPLE_PULSES: u32 = 128;
pub const DEFAULT_NUM_SAMPLES: u32 = 128;
/// IQ pairs the raw memory holds over all pulse configurations
pub const MAX_MEMORY_SAMPLES: u32 = 640;

pub const MAX_TX_POWER_LEVEL: u32 = 63;
pub const DEFAULT_TX_POWER_LEVEL: u32 = 50;

/// Shortest PRT per active pulse configuration
pub const MIN_PRT_PER_PULSE_S: f64 = 130e-6;
pub const MAX_PRT_S: f64 = 2e-3;
pub const DEFAULT_PRT_S: f64 = 1e-3;

pub const MIN_FRT_S: f64 = 10e-3;
pub const MAX_FRT_S: f64 = 2.0;
pub const DEFAULT_FRT_S: f64 = 0.256;

pub const MIN_AFC_DURATION: u32 = 100;
pub const MAX_AFC_DURATION: u32 = 1000;
pub const DEFAULT_AFC_DURATION: u32 = 115;
pub const AFC_THRESHOLD_COARSE: (u32, u32) = (1, 5);
pub const AFC_THRESHOLD_FINE: (u32, u32) = (5, 50);
pub const DEFAULT_AFC_PERIOD: u32 = 16;
pub const DEFAULT_RF_CENTER_HZ: u64 = 24_240_000_000;

const BAND_MAX_HZ: u64 = 24_250_000_000;
const BAND_100MHZ_MIN_HZ: u64 = 24_150_000_000;
const BAND_200MHZ_MIN_HZ: u64 = 24_050_000_000;

/// Oldest baseboard firmware that streams Mimose data correctly
pub const MIN_FIRMWARE: (u16, u16, u16) = (2, 5, 3);

const MAX_SYSTEM_CLOCK_DIVIDER: u32 = 15;
const RC_MIN_SYSTEM_CLOCK_HZ: f64 = 9e6;
const RC_TRIM_PRECISION_HZ: f64 = 20e3;
const RC_T_AFC_CYCLES: f64 = 2.0;
const RC_T_BOOT_VCO_FS_S: f64 = 100e-6;
const RC_T_BOOT_REF_CLK_CORRECTION_S: f64 = 250e-6;

/// RC oscillator frequency per trim code, as a fraction of the reference clock
const RC_TRIM_LUT: [f64; 32] = [
    0.1310, 0.1330, 0.1368, 0.1392, 0.1453, 0.1481, 0.1531, 0.1566, 0.1652, 0.1690, 0.1756, 0.1803, 0.1910,
    0.1969, 0.2067, 0.2143, 0.2494, 0.2567, 0.2696, 0.2793, 0.2999, 0.3120, 0.3324, 0.3491, 0.4060, 0.4270,
    0.4629, 0.4931, 0.5686, 0.6170, 0.7058, 0.7953,
];

// Reset values the timing model is built on
const HF_ON_T_RESET: u16 = 0x0270;
const AFC_DURATION_RESET: f64 = 115.0;
const LO_COUNT_DELAY_CYCLES: f64 = 2.0;
const BANDGAP_BOOT_CYCLES: f64 = 384.0;
const T_AFC_DELAY: u32 = 0x0009;

const SINGLE_PULSE_BOOT_S: f64 = 100e-6;
const MAX_ADC_CONVERSION_S: f64 = 30e-6;
const PRE_MEASUREMENT_AFC_DELAY_S: f64 = 200e-9;

/// Effective I²C payload rate in fast mode (one ACK bit per byte)
const I2C_DATA_RATE_BPS: f64 = 400e3 * 8.0 / 9.0;

const RAW_MEMORY: u32 = layouts::MIMOSE_RAW_MEMORY;
const FRAME_COUNTER_ADDRESS: u32 = 0x00F2;
const VCO_BLOCK: (u32, u32) = (0x0028, 9);
const AOC_BLOCK: (u32, u32) = (0x00A1, 8);
const AGC_BLOCK: (u32, u32) = (0x0070, 4);
const METADATA_WORDS: usize = 1 + 9 + 8 + 4;

/// AOC (step0, step1) per manual ABB gain index
const AOC_STEPS: [(u32, u32); 8] = [(1, 1), (1, 1), (1, 1), (1, 1), (1, 3), (1, 3), (1, 3), (1, 3)];
/// AOC (threshold0, threshold1) per manual ABB gain index
const AOC_THRESHOLDS: [(u32, u32); 8] = [
    (0x1FFF, 0x1FFF),
    (0x1FFF, 0x1FFF),
    (0x1FFF, 0x1FFF),
    (0x15E0, 0x1FFF),
    (0x0AF0, 0x1FFF),
    (0x0578, 0x1068),
    (0x02BC, 0x0834),
    (0x015E, 0x041A),
];

const HARDCODED: [(&str, u32); 5] = [
    ("RX_T_BIAS", 0x0005),
    ("RX_T_RF", 0x0007),
    ("RX_T_MIX", 0x0006),
    ("RXABB_T_BIAS", 0x0001),
    ("RXABB_HF_DELAY", 0x0007),
];

/// Silicon revision read from `CHIP_TYPE`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum ChipVersion {
    A1,
    A2,
    B1,
    #[default]
    Unknown,
}

impl ChipVersion {
    pub fn from_register(value: u32) -> Self {
        match value {
            0x0000 => ChipVersion::A1,
            0x0001 => ChipVersion::A2,
            0x8002 => ChipVersion::B1,
            _ => ChipVersion::Unknown,
        }
    }

    /// Silicon before B1 needs heating pulses ahead of each frame
    pub fn needs_heating_pulses(&self) -> bool {
        *self != ChipVersion::B1
    }
}

/// TX/RX antenna pair of a pulse configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MimoseChannel {
    #[default]
    Tx1Rx1,
    Tx2Rx2,
    Tx1Rx2,
    Tx2Rx1,
}

impl MimoseChannel {
    /// `(tx, rx)` antenna masks
    pub fn masks(&self) -> (u32, u32) {
        match self {
            MimoseChannel::Tx1Rx1 => (0b01, 0b01),
            MimoseChannel::Tx2Rx2 => (0b10, 0b10),
            MimoseChannel::Tx1Rx2 => (0b01, 0b10),
            MimoseChannel::Tx2Rx1 => (0b10, 0b01),
        }
    }

    pub fn from_masks(tx_mask: u32, rx_mask: u32) -> Result<Self> {
        match (tx_mask, rx_mask) {
            (0b01, 0b01) => Ok(MimoseChannel::Tx1Rx1),
            (0b10, 0b10) => Ok(MimoseChannel::Tx2Rx2),
            (0b01, 0b10) => Ok(MimoseChannel::Tx1Rx2),
            (0b10, 0b01) => Ok(MimoseChannel::Tx2Rx1),
            (0b01 | 0b10, _) => Err(RadarError::RxAntennaCombinationNotAllowed),
            _ => Err(RadarError::TxAntennaModeNotAllowed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PulseConfig {
    pub channel: MimoseChannel,
    pub tx_power_level: u32,
    pub abb_gain: AbbGain,
    pub aoc_mode: AocMode,
}

impl PulseConfig {
    fn new(channel: MimoseChannel) -> Self {
        Self {
            channel,
            tx_power_level: DEFAULT_TX_POWER_LEVEL,
            abb_gain: AbbGain::Gain384,
            aoc_mode: AocMode::FsmHandled,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct FrameConfig {
    pub frame_repetition_time_s: f64,
    /// Shared by all selected pulse configurations
    pub pulse_repetition_time_s: f64,
    pub selected_pulse_configs: [bool; NUM_PULSE_CONFIGS],
    pub num_samples: u32,
}

impl FrameConfig {
    pub fn active_pulses(&self) -> usize {
        self.selected_pulse_configs.iter().filter(|&&s| s).count()
    }

    /// Indices of the selected pulse configurations
    pub fn selected(&self) -> impl Iterator<Item = usize> + '_ {
        (0..NUM_PULSE_CONFIGS).filter(|&pc| self.selected_pulse_configs[pc])
    }

    /// A zeroed frame configuration is not programmed
    pub fn is_present(&self) -> bool {
        self.frame_repetition_time_s > 0.0 && self.active_pulses() > 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RfBand {
    /// 24.15 GHz to 24.25 GHz
    #[default]
    Ism100MHz,
    /// 24.05 GHz to 24.25 GHz
    Ism200MHz,
}

impl RfBand {
    pub fn range_hz(&self) -> (u64, u64) {
        match self {
            RfBand::Ism100MHz => (BAND_100MHZ_MIN_HZ, BAND_MAX_HZ),
            RfBand::Ism200MHz => (BAND_200MHZ_MIN_HZ, BAND_MAX_HZ),
        }
    }
}

/// Number of AFC measurements per AFC run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AfcRepeatCount {
    #[default]
    X1 = 0,
    X2 = 1,
    X4 = 2,
    X8 = 3,
}

impl AfcRepeatCount {
    pub fn code(&self) -> u32 {
        *self as u32
    }

    pub fn from_code(code: u32) -> Option<Self> {
        [AfcRepeatCount::X1, AfcRepeatCount::X2, AfcRepeatCount::X4, AfcRepeatCount::X8]
            .get(code as usize)
            .copied()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AfcConfig {
    pub band: RfBand,
    pub rf_center_frequency_hz: u64,
    /// Counting window in crystal cycles
    pub afc_duration_ct: u32,
    pub afc_threshold_coarse: u32,
    pub afc_threshold_fine: u32,
    /// Frames between two AFC runs
    pub afc_period: u32,
    pub afc_repeat_count: AfcRepeatCount,
}

impl Default for AfcConfig {
    fn default() -> Self {
        Self {
            band: RfBand::Ism100MHz,
            rf_center_frequency_hz: DEFAULT_RF_CENTER_HZ,
            afc_duration_ct: DEFAULT_AFC_DURATION,
            afc_threshold_coarse: 3,
            afc_threshold_fine: 10,
            afc_period: DEFAULT_AFC_PERIOD,
            afc_repeat_count: AfcRepeatCount::X1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClockConfig {
    pub reference_clock_hz: u32,
    pub system_clock_hz: u32,
    pub rc_clock_enabled: bool,
    pub hf_on_time_us: u32,
    pub system_clock_divider: u32,
    pub system_clock_div_flex: bool,
    pub sys_clk_to_i2c: bool,
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self {
            reference_clock_hz: EXT_OSC_HZ as u32,
            system_clock_hz: EXT_OSC_HZ as u32,
            rc_clock_enabled: false,
            hf_on_time_us: 1,
            system_clock_divider: 0,
            system_clock_div_flex: false,
            sys_clk_to_i2c: false,
        }
    }
}

/// Complete Mimose configuration
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MimoseConfig {
    pub pulse_configs: [PulseConfig; NUM_PULSE_CONFIGS],
    pub frame_configs: [FrameConfig; NUM_FRAME_CONFIGS],
    pub afc: AfcConfig,
    pub clock: ClockConfig,
}

impl MimoseConfig {
    /// Frame configuration at `index`, `ArgumentOutOfBounds` past the second
    pub fn frame(&self, index: usize) -> Result<&FrameConfig> {
        self.frame_configs.get(index).ok_or_else(|| {
            RadarError::ArgumentOutOfBounds(format!("frame configuration {} of {}", index, NUM_FRAME_CONFIGS))
        })
    }
}

/// Limits of one frame configuration
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MimoseLimits {
    pub tx_power_level: (u32, u32),
    pub num_samples: (u32, u32),
    pub pulse_repetition_time_s: (f64, f64),
    pub frame_repetition_time_s: (f64, f64),
    pub rf_center_frequency_hz: (u64, u64),
    pub afc_duration_ct: (u32, u32),
    pub afc_threshold_coarse: (u32, u32),
    pub afc_threshold_fine: (u32, u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SamplingMode {
    /// Memory is read once per frame, in the idle time after the pulses
    FramePaused,
    /// Memory is read in two halves while pulses keep running
    Equidistant,
}

/// Where the samples of one frame sit in the harvested words
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameLayout {
    pub mode: SamplingMode,
    pub pulses: usize,
    pub num_samples: usize,
    /// Memory slots per pulse, `num_samples` rounded up to a power of two
    pub samples_in_memory: usize,
}

impl FrameLayout {
    /// Raw memory words of all pulses (I and Q)
    pub fn raw_words(&self) -> usize {
        2 * self.samples_in_memory * self.pulses
    }

    pub fn total_words(&self) -> usize {
        self.raw_words() + METADATA_WORDS
    }

    pub fn shape(&self) -> CubeShape {
        CubeShape::new(1, self.pulses, self.num_samples)
    }
}

/// How the active frame configuration acquires
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AcquisitionPlan {
    pub layout: FrameLayout,
    pub heating_pulses: u32,
    /// Pulses before the half-frame trigger, 0 when frame paused
    pub trigger_count: u32,
    pub min_frame_repetition_time_s: f64,
}

/// Samples and metadata of one frame
#[derive(Debug, Clone, PartialEq)]
pub struct MimoseSamples {
    pub cube: ComplexCube,
    pub frame_counter: u32,
    pub afc: Option<AfcReading>,
    pub abb_gains: [u8; 4],
    pub aoc_offsets: [[i16; 2]; 4],
}

/// Mimose sensor profile
#[derive(Debug, Clone)]
pub struct MimoseProfile {
    map: RegisterMap<u16, u16>,
    chip: ChipVersion,
}

impl MimoseProfile {
    pub fn new(chip: ChipVersion) -> Result<Self> {
        let map = RegisterMap::from_description(&layouts::mimose())?;
        Ok(Self { map, chip })
    }

    pub fn chip_version(&self) -> ChipVersion {
        self.chip
    }

    pub fn map(&self) -> &RegisterMap<u16, u16> {
        &self.map
    }

    pub fn map_mut(&mut self) -> &mut RegisterMap<u16, u16> {
        &mut self.map
    }

    pub fn sensor_info(&self) -> SensorInfo {
        SensorInfo {
            description: "BGT24ATR22".to_string(),
            min_rf_frequency_hz: 24.0e9,
            max_rf_frequency_hz: 24.5e9,
            num_tx_antennas: 2,
            num_rx_antennas: 2,
            max_tx_power: MAX_TX_POWER_LEVEL,
            device_id: 0,
            max_num_samples_per_chirp: MAX_NUM_SAMPLES_ONE_PULSE,
            min_adc_sampling_rate_hz: 20e6,
            max_adc_sampling_rate_hz: 40e6,
            hp_cutoff_list: Vec::new(),
            lp_cutoff_list: Vec::new(),
            if_gain_list: Vec::new(),
        }
    }

    pub fn default_config(&self) -> MimoseConfig {
        MimoseConfig {
            pulse_configs: [
                PulseConfig::new(MimoseChannel::Tx1Rx1),
                PulseConfig::new(MimoseChannel::Tx2Rx2),
                PulseConfig::new(MimoseChannel::Tx1Rx2),
                PulseConfig::new(MimoseChannel::Tx2Rx1),
            ],
            frame_configs: [
                FrameConfig {
                    frame_repetition_time_s: DEFAULT_FRT_S,
                    pulse_repetition_time_s: DEFAULT_PRT_S,
                    selected_pulse_configs: [true, false, false, false],
                    num_samples: DEFAULT_NUM_SAMPLES,
                },
                FrameConfig::default(),
            ],
            afc: AfcConfig::default(),
            clock: ClockConfig::default(),
        }
    }

    /// Time one pulse keeps the receiver on
    pub fn pulse_duration_s() -> f64 {
        decode_exp_mul16(HF_ON_T_RESET, 4) as f64 / EXT_OSC_HZ
    }

    /// Frame time the AFC run adds ahead of the pulses
    pub fn afc_additional_time_s(afc_duration_ct: u32) -> f64 {
        let t_afc = afc_duration_ct as f64 / EXT_OSC_HZ;
        let counting = AFC_DURATION_RESET / EXT_OSC_HZ;
        let lo_delay = LO_COUNT_DELAY_CYCLES / EXT_OSC_HZ;
        let bandgap = BANDGAP_BOOT_CYCLES / EXT_OSC_HZ;
        counting + t_afc + 2.0 * lo_delay + bandgap + SINGLE_PULSE_BOOT_S + PRE_MEASUREMENT_AFC_DELAY_S
    }

    /// Shortest legal FRT of a frame configuration, room for two heating
    /// pulses included
    pub fn minimum_frame_repetition_time(frame: &FrameConfig, afc_duration_ct: u32) -> f64 {
        let pulses = frame.active_pulses().max(1) as f64;
        let prt = frame.pulse_repetition_time_s;
        let n = frame.num_samples as f64;
        let sample_time = Self::pulse_duration_s() + prt * n - prt / pulses;
        let min = sample_time
            + Self::afc_additional_time_s(afc_duration_ct)
            + SINGLE_PULSE_BOOT_S
            + MAX_ADC_CONVERSION_S
            + 2.0 * prt;
        min.max(prt * n)
    }

    /// Heating pulses that fit ahead of the frame on this silicon
    pub fn heating_pulses(&self, frame: &FrameConfig, afc_duration_ct: u32) -> u32 {
        if !self.chip.needs_heating_pulses() {
            return 0;
        }
        let min = Self::minimum_frame_repetition_time(frame, afc_duration_ct);
        let prt = frame.pulse_repetition_time_s;
        let frt = frame.frame_repetition_time_s;
        if min + 2.0 * prt <= frt {
            2
        } else if min + prt <= frt {
            1
        } else {
            0
        }
    }

    pub fn limits(&self, config: &MimoseConfig, frame_index: usize) -> Result<MimoseLimits> {
        let frame = config.frame(frame_index)?;
        let pulses = frame.active_pulses().max(1);
        let max_samples = if pulses > 1 {
            MAX_NUM_SAMPLES_MULTIPLE_PULSES
        } else {
            MAX_NUM_SAMPLES_ONE_PULSE
        };
        let min_frt = Self::minimum_frame_repetition_time(frame, config.afc.afc_duration_ct).max(MIN_FRT_S);
        Ok(MimoseLimits {
            tx_power_level: (0, MAX_TX_POWER_LEVEL),
            num_samples: (1, max_samples),
            pulse_repetition_time_s: (MIN_PRT_PER_PULSE_S * pulses as f64, MAX_PRT_S),
            frame_repetition_time_s: (min_frt, MAX_FRT_S),
            rf_center_frequency_hz: config.afc.band.range_hz(),
            afc_duration_ct: (MIN_AFC_DURATION, MAX_AFC_DURATION),
            afc_threshold_coarse: AFC_THRESHOLD_COARSE,
            afc_threshold_fine: AFC_THRESHOLD_FINE,
        })
    }

    fn check_frame(&self, config: &MimoseConfig, frame_index: usize) -> Result<()> {
        let frame = config.frame(frame_index)?;
        if frame.frame_repetition_time_s <= 0.0 {
            return Err(RadarError::ArgumentInvalid(format!(
                "frame configuration {} has no frame repetition time",
                frame_index
            )));
        }
        if frame.active_pulses() == 0 {
            return Err(RadarError::ArgumentInvalid(format!(
                "frame configuration {} selects no pulse configuration",
                frame_index
            )));
        }
        let limits = self.limits(config, frame_index)?;

        let (min_n, max_n) = limits.num_samples;
        check_range(frame.num_samples, min_n, max_n, || RadarError::NumSamplesOutOfRange)?;
        for pc in frame.selected() {
            let pulse = &config.pulse_configs[pc];
            check_range(pulse.tx_power_level, 0, MAX_TX_POWER_LEVEL, || RadarError::TxPowerOutOfRange)?;
            if pulse.abb_gain == AbbGain::Automatic {
                return Err(RadarError::ArgumentInvalid(format!(
                    "pulse configuration {} uses automatic ABB gain",
                    pc
                )));
            }
        }
        let (min_prt, max_prt) = limits.pulse_repetition_time_s;
        check_range(frame.pulse_repetition_time_s, min_prt, max_prt, || RadarError::SamplerateOutOfRange)?;
        let (min_frt, max_frt) = limits.frame_repetition_time_s;
        check_range(frame.frame_repetition_time_s, min_frt, max_frt, || RadarError::FrameRateOutOfRange)?;

        let heating = self.heating_pulses(frame, config.afc.afc_duration_ct) as f64;
        let min = Self::minimum_frame_repetition_time(frame, config.afc.afc_duration_ct);
        if heating * frame.pulse_repetition_time_s + min >= frame.frame_repetition_time_s {
            return Err(RadarError::FrameRateOutOfRange);
        }
        Ok(())
    }

    /// Check the configuration with `active_index` as the streaming frame
    pub fn check_config(&self, config: &MimoseConfig, active_index: usize) -> Result<()> {
        self.check_frame(config, active_index)?;

        let afc = &config.afc;
        let (min_rf, max_rf) = afc.band.range_hz();
        check_range(afc.rf_center_frequency_hz, min_rf, max_rf, || RadarError::RfOutOfRange)?;
        check_range(afc.afc_duration_ct, MIN_AFC_DURATION, MAX_AFC_DURATION, || {
            RadarError::ArgumentOutOfBounds(format!("AFC duration {}", afc.afc_duration_ct))
        })?;
        let (min_c, max_c) = AFC_THRESHOLD_COARSE;
        check_range(afc.afc_threshold_coarse, min_c, max_c, || {
            RadarError::ArgumentOutOfBounds(format!("AFC coarse threshold {}", afc.afc_threshold_coarse))
        })?;
        let (min_f, max_f) = AFC_THRESHOLD_FINE;
        check_range(afc.afc_threshold_fine, min_f, max_f, || {
            RadarError::ArgumentOutOfBounds(format!("AFC fine threshold {}", afc.afc_threshold_fine))
        })?;
        check_range(afc.afc_period, 0, 255, || {
            RadarError::ArgumentOutOfBounds(format!("AFC period {}", afc.afc_period))
        })?;
        check_range(config.clock.system_clock_divider, 0, MAX_SYSTEM_CLOCK_DIVIDER, || {
            RadarError::ArgumentOutOfBounds(format!("system clock divider {}", config.clock.system_clock_divider))
        })?;
        Ok(())
    }

    /// System clock the chip runs on with this clock configuration
    ///
    /// With the RC oscillator the frequency is the nearest trim table entry.
    pub fn system_clock_hz(clock: &ClockConfig) -> f64 {
        let reference = clock.reference_clock_hz as f64;
        if !clock.rc_clock_enabled {
            return reference;
        }
        let (_, fraction) = rc_trim(clock);
        reference * fraction
    }

    /// I²C time to harvest one frame
    pub fn frame_readout_time_s(frame: &FrameConfig, mode: SamplingMode) -> f64 {
        let pulses = frame.active_pulses() as f64;
        // device address, memory address, device address
        let setup = pulses * (8.0 + 16.0 + 8.0) / I2C_DATA_RATE_BPS;
        let readout = pulses * 32.0 * frame.num_samples as f64 / I2C_DATA_RATE_BPS;
        match mode {
            SamplingMode::FramePaused => readout + setup,
            SamplingMode::Equidistant => readout + 2.0 * setup,
        }
    }

    /// Sampling mode, heating pulses and memory layout of the active frame
    pub fn plan(&self, config: &MimoseConfig, active_index: usize) -> Result<AcquisitionPlan> {
        let frame = config.frame(active_index)?;
        let pulses = frame.active_pulses();
        let afc_duration = config.afc.afc_duration_ct;
        let min = Self::minimum_frame_repetition_time(frame, afc_duration);
        let heating = self.heating_pulses(frame, afc_duration);
        let frt = frame.frame_repetition_time_s;
        let readout = Self::frame_readout_time_s(frame, SamplingMode::FramePaused);

        if heating as f64 * frame.pulse_repetition_time_s + min > frt || readout >= frt {
            return Err(RadarError::FrameRateOutOfRange);
        }
        let (mode, trigger_count) = if frt - min < readout {
            let count = pulses as u32 * frame.num_samples / 2 + heating * pulses as u32 + 1;
            (SamplingMode::Equidistant, count)
        } else {
            (SamplingMode::FramePaused, 0)
        };

        let samples_in_memory = (frame.num_samples.max(2)).next_power_of_two();
        if samples_in_memory * pulses as u32 > MAX_MEMORY_SAMPLES {
            return Err(RadarError::NotSupported(format!(
                "{} pulses of {} samples exceed the raw memory",
                pulses, frame.num_samples
            )));
        }

        Ok(AcquisitionPlan {
            layout: FrameLayout {
                mode,
                pulses,
                num_samples: frame.num_samples as usize,
                samples_in_memory: samples_in_memory as usize,
            },
            heating_pulses: heating,
            trigger_count,
            min_frame_repetition_time_s: min,
        })
    }

    /// Compile the whole configuration with `active_index` streaming
    pub fn compile(&self, config: &MimoseConfig, active_index: usize) -> Result<RegisterBatch<u16, u16>> {
        self.check_config(config, active_index)?;
        let plan = self.plan(config, active_index)?;
        let mut image = self.map.image();

        let system_clock = self.compile_clock(&mut image, &config.clock)?;
        self.compile_afc(&mut image, &config.afc)?;

        // the active frame goes last so its pulse timing wins on shared PCs
        let order = (0..NUM_FRAME_CONFIGS)
            .filter(|&i| i != active_index)
            .chain(std::iter::once(active_index));
        for index in order {
            let frame = &config.frame_configs[index];
            if !frame.is_present() {
                continue;
            }
            if index != active_index {
                self.check_frame(config, index)?;
            }
            compile_frame(&mut image, index, frame, system_clock)?;
            for pc in frame.selected() {
                compile_pulse(&mut image, index, pc, frame, &config.pulse_configs[pc], system_clock)?;
            }
        }

        self.compile_acquisition(&mut image, config, active_index, &plan, system_clock)?;
        for (name, value) in HARDCODED {
            image.set(name, value)?;
        }

        tracing::debug!(
            "Compiled Mimose configuration: frame {} {:?}, {} heating pulses, trigger count {}",
            active_index,
            plan.layout.mode,
            plan.heating_pulses,
            plan.trigger_count
        );
        Ok(image.into_batch())
    }

    /// Registers that change when streaming moves to another resident frame
    /// configuration
    pub fn compile_switch(&self, config: &MimoseConfig, active_index: usize) -> Result<RegisterBatch<u16, u16>> {
        self.check_config(config, active_index)?;
        let plan = self.plan(config, active_index)?;
        let mut image = self.map.image();
        let system_clock = Self::system_clock_hz(&config.clock);
        self.compile_acquisition(&mut image, config, active_index, &plan, system_clock)?;
        for (name, value) in HARDCODED {
            image.set(name, value)?;
        }
        Ok(image.into_batch())
    }

    /// Sequencer start on frame configuration `index`
    pub fn start_batch(&self, index: usize) -> Result<RegisterBatch<u16, u16>> {
        if index >= NUM_FRAME_CONFIGS {
            return Err(RadarError::ArgumentOutOfBounds(format!("frame configuration {}", index)));
        }
        let mut image = self.map.image();
        image.set("SEQ_MAIN_CONF", 0)?;
        image.set("SEQ_MAIN_CONF.SEQ_EXECUTE", 1)?;
        image.set("SEQ_MAIN_CONF.NEXT_FRAME_CONF", index as u32)?;
        Ok(image.into_batch())
    }

    pub fn stop_batch(&self) -> Result<RegisterBatch<u16, u16>> {
        let mut image = self.map.image();
        image.set("SEQ_MAIN_CONF", 0)?;
        Ok(image.into_batch())
    }

    /// Software reset: `SW_RST` pulsed high then low
    pub fn reset_sequence(&self) -> Result<Vec<RegisterBatch<u16, u16>>> {
        let mut high = self.map.image();
        high.set("SEQ_MAIN_CONF", 0)?;
        high.set("SEQ_MAIN_CONF.SW_RST", 1)?;
        Ok(vec![high.into_batch(), self.stop_batch()?])
    }

    fn compile_clock(&self, image: &mut RegisterImage<'_, u16, u16>, clock: &ClockConfig) -> Result<f64> {
        let system_clock = Self::system_clock_hz(clock);
        image.set("CLK_CONF", 0)?;

        if clock.rc_clock_enabled {
            let reference = clock.reference_clock_hz as f64;
            let (trim, fraction) = rc_trim(clock);
            let trim_count = (2.0 * reference / RC_TRIM_PRECISION_HZ).ceil();
            if trim_count > u16::MAX as f64 {
                return Err(RadarError::ArgumentOutOfBounds(format!(
                    "reference clock {} Hz is too fast for the RC trim",
                    clock.reference_clock_hz
                )));
            }
            image.set("RC_T_TRIM", trim_count as u32)?;
            image.set("RC_CLK_CONF", 0)?;
            image.set("RC_CLK_CONF.EN", 1)?;
            image.set("RC_CLK_CONF.TRIM_VAL", trim as u32)?;
            image.set("RC_CLK_CONF.RC_COUNT", 1)?;

            for name in ["T_BOOT_VCO_FS", "T_BOOT_TXCHAIN", "T_BOOT_RXCHAIN", "T_BOOT_BANDGAP"] {
                let reset = self.map.entry(name).map(|e| e.reset as f64).unwrap_or(0.0);
                image.set(&format!("{}.VAL", name), (reset * fraction).ceil() as u32)?;
            }
            image.set("CLK_CONF.SYS_CLK_SEL", 1)?;
        }

        if clock.system_clock_divider > 0 {
            image.set("I2C_CONF.CLK_GATE", 1)?;
        }
        image.set("CLK_CONF.I2C_CLK_DIV", i2c_clock_divider(system_clock))?;
        image.set("CLK_CONF.SYS_CLK_DIV_FLEX", clock.system_clock_div_flex as u32)?;
        image.set("CLK_CONF.SYS_CLK_TO_I2C", clock.sys_clk_to_i2c as u32)?;
        image.set("CLK_CONF.SYS_CLK_DIV", clock.system_clock_divider)?;

        let hf_cycles = (system_clock * clock.hf_on_time_us as f64 * 1e-6).ceil() as u64;
        image.set("RXABB_HF_ON_T", encode_exp_mul16(hf_cycles, 4, 12)? as u32)?;
        Ok(system_clock)
    }

    fn compile_afc(&self, image: &mut RegisterImage<'_, u16, u16>, afc: &AfcConfig) -> Result<()> {
        image.set("VCO_AFC_DURATION", 0)?;
        image.set("VCO_AFC_DURATION.VAL", afc.afc_duration_ct)?;
        image.set("VCO_AFC_TH0.THRESHOLD", afc.afc_threshold_coarse)?;
        image.set("VCO_AFC_TH1.THRESHOLD", afc.afc_threshold_fine)?;
        image.touch("VCO_AFC_CONF")?;
        image.set("VCO_AFC_CONF.AFC_REP", afc.afc_repeat_count.code())?;
        image.set("VCO_AFC_CONF.AFC_PERIOD", afc.afc_period)?;

        let reference = self.afc_reference_count(afc.rf_center_frequency_hz, afc.afc_duration_ct)?;
        image.set("VCO_AFC_REF0.LO_CNT_REF", reference & 0xFFFF)?;
        image.set("VCO_AFC_REF1.LO_CNT_REF", reference >> 16)?;
        image.set("T_AFC", T_AFC_DELAY)?;
        Ok(())
    }

    fn afc_window_us(&self, afc_duration_ct: u32) -> f64 {
        let cycles = match self.chip {
            ChipVersion::A1 => afc_duration_ct + 1,
            _ => afc_duration_ct,
        };
        cycles as f64 / (EXT_OSC_HZ * 1e-6)
    }

    /// LO cycles (divided by 8) the AFC expects within its counting window
    pub fn afc_reference_count(&self, rf_center_frequency_hz: u64, afc_duration_ct: u32) -> Result<u32> {
        let frequency_mhz = rf_center_frequency_hz as f64 * 1e-6;
        let count = (frequency_mhz / 8.0 * self.afc_window_us(afc_duration_ct)) as u64;
        if count > 0x00FF_FFFF {
            return Err(RadarError::ArgumentOutOfBounds(format!("AFC reference count {}", count)));
        }
        Ok(count as u32)
    }

    fn compile_acquisition(
        &self,
        image: &mut RegisterImage<'_, u16, u16>,
        config: &MimoseConfig,
        active_index: usize,
        plan: &AcquisitionPlan,
        system_clock: f64,
    ) -> Result<()> {
        let frame = &config.frame_configs[active_index];
        let layout = &plan.layout;
        let equidistant = layout.mode == SamplingMode::Equidistant;

        image.set(&format!("FRAME{}_HEATING", active_index), 0)?;
        image.set(
            &format!("FRAME{}_HEATING.NR_HEATING_PULSES", active_index),
            plan.heating_pulses,
        )?;

        // memory offsets
        let total = (layout.samples_in_memory * layout.pulses) as u32;
        image.set("MEM_RAW", 0)?;
        image.set("MEM_RAW2", 0)?;
        let ft = total.min(MAX_MEMORY_SAMPLES);
        image.set("MEM_FT", ft)?;
        if equidistant {
            let trg = (ft + total).min(MAX_MEMORY_SAMPLES);
            image.set("MEM_TRG", trg)?;
            image.set("MEM_SENS", (trg + 32).min(MAX_MEMORY_SAMPLES))?;
        } else {
            image.set("MEM_TRG", MAX_MEMORY_SAMPLES)?;
            image.set("MEM_SENS", MAX_MEMORY_SAMPLES)?;
        }

        // triggers
        image.set("DRDP_TRIG_MAP", 0)?;
        image.set("DRDP_TRIG_MAP.TRG", 1)?;
        image.set("DRDP_TRIG_MAP.CF", 8)?;
        image.set("IR_EN", 0)?;
        image.set("IR_EN.EN12", 1)?;
        if equidistant {
            image.set("TRIG2_CONF", 0x3A03)?;
            image.set("SEQ_TRIG_MAP", 0x000F)?;
            image.set("IR_EN.EN8", 1)?;
            image.set("TRIG3_CONF", 0x0303)?;
            image.set("TRIG0_CONF", 0x1823)?;
            let name = format!("FRAME{}_SEQ_TRIG_MAP_IRQ", active_index);
            image.set(&name, 0)?;
            image.set(&format!("{}.TRIG_EN", name), 1)?;
            image.set(&format!("{}.TRIG_MAP", name), 3)?;
            image.set(&format!("{}.TRIG_COUNT", name), plan.trigger_count)?;
        } else {
            image.set("TRIG0_CONF", 0x0023)?;
        }

        if config.clock.rc_clock_enabled {
            let prt = frame.pulse_repetition_time_s;
            let t_boot = (frame.num_samples + plan.heating_pulses) as f64 * prt - prt / layout.pulses as f64
                + RC_T_AFC_CYCLES / system_clock
                + RC_T_BOOT_VCO_FS_S
                - RC_T_BOOT_REF_CLK_CORRECTION_S;
            let cycles = (t_boot.max(0.0) * system_clock) as u64;
            let word = encode_exp_mul16(cycles, 5, 8)? as u32;
            image.set("T_BOOT_REF_CLK.EXP", word & 0x1F)?;
            image.set("T_BOOT_REF_CLK.MUL", word >> 5)?;
        }
        Ok(())
    }

    /// Read the configuration back from a register image
    ///
    /// Reference clock, RF band and unprogrammed pulse configurations are not
    /// held in registers and come from `base`.
    pub fn decode(&self, image: &RegisterImage<'_, u16, u16>, base: &MimoseConfig) -> Result<MimoseConfig> {
        let mut config = *base;

        let hf_word = image.get("RXABB_HF_ON_T")? as u16;
        config.clock.rc_clock_enabled = image.get("CLK_CONF.SYS_CLK_SEL")? != 0;
        config.clock.system_clock_divider = image.get("CLK_CONF.SYS_CLK_DIV")?;
        config.clock.system_clock_div_flex = image.get("CLK_CONF.SYS_CLK_DIV_FLEX")? != 0;
        config.clock.sys_clk_to_i2c = image.get("CLK_CONF.SYS_CLK_TO_I2C")? != 0;
        let system_clock = Self::system_clock_hz(&config.clock);
        let hf_on = cycles_to_seconds(decode_exp_mul16(hf_word, 4), system_clock);
        config.clock.hf_on_time_us = (hf_on * 1e6).round() as u32;

        let afc = &mut config.afc;
        afc.afc_duration_ct = image.get("VCO_AFC_DURATION.VAL")?;
        afc.afc_threshold_coarse = image.get("VCO_AFC_TH0.THRESHOLD")?;
        afc.afc_threshold_fine = image.get("VCO_AFC_TH1.THRESHOLD")?;
        afc.afc_period = image.get("VCO_AFC_CONF.AFC_PERIOD")?;
        let repeat = image.get("VCO_AFC_CONF.AFC_REP")?;
        afc.afc_repeat_count = AfcRepeatCount::from_code(repeat).unwrap_or_default();
        let reference = image.get("VCO_AFC_REF0.LO_CNT_REF")? | (image.get("VCO_AFC_REF1.LO_CNT_REF")? << 16);
        if afc.afc_duration_ct > 0 {
            let window_us = self.afc_window_us(afc.afc_duration_ct);
            afc.rf_center_frequency_hz = (reference as f64 * 8.0 / window_us * 1e6).round() as u64;
        }

        let modes = image.get("AOC_CONF")?;
        for pc in 0..NUM_PULSE_CONFIGS {
            let pulse = &mut config.pulse_configs[pc];
            let tx1 = image.get(&format!("TX1_PC{}_CONF.EN", pc))? != 0;
            let tx2 = image.get(&format!("TX2_PC{}_CONF.EN", pc))? != 0;
            let rx1 = image.get(&format!("RX1_PC{}_CONF.EN", pc))? != 0;
            let rx2 = image.get(&format!("RX2_PC{}_CONF.EN", pc))? != 0;
            let tx_mask = tx1 as u32 | (tx2 as u32) << 1;
            let rx_mask = rx1 as u32 | (rx2 as u32) << 1;
            if tx_mask == 0 && rx_mask == 0 {
                continue;
            }
            pulse.channel = MimoseChannel::from_masks(tx_mask, rx_mask)?;
            let tx = if tx1 { "TX1" } else { "TX2" };
            pulse.tx_power_level = image.get(&format!("{}_PC{}_CONF.PWR_DAC", tx, pc))?;
            pulse.abb_gain = if image.get(&format!("PC{}_AGC.AGC_PC_EN", pc))? != 0 {
                AbbGain::Automatic
            } else {
                let index = image.get(&format!("PC{}_AGC.AGC_ABB_GAIN", pc))?;
                AbbGain::from_index(index).unwrap_or_default()
            };
            let code = (modes >> (2 * pc)) & 0b11;
            pulse.aoc_mode = AocMode::from_code(code).unwrap_or_default();
        }

        for index in 0..NUM_FRAME_CONFIGS {
            let mut frame = FrameConfig::default();
            for entry in 0..NUM_PULSE_CONFIGS {
                let name = format!("FRAME{}_LIST{}_CONF", index, entry);
                if image.get(&format!("{}.ENTRY_EN", name))? != 0 {
                    let pc = image.get(&format!("{}.PC_CONF_NR", name))? as usize;
                    frame.selected_pulse_configs[pc] = true;
                }
            }
            let time = image.get(&format!("FRAME{}_TIME", index))? as u16;
            frame.frame_repetition_time_s = cycles_to_seconds(decode_exp_mul16(time, 5), system_clock);
            frame.num_samples = image.get(&format!("FRAME{}_LIST_REP.VAL", index))?;
            let first = frame.selected().next();
            if let Some(first) = first {
                let word = image.get(&format!("PC{}_CONF_TIME", first))? as u16;
                let per_pulse = cycles_to_seconds(decode_exp_mul16(word, 5), system_clock);
                frame.pulse_repetition_time_s = per_pulse * frame.active_pulses() as f64;
            }
            config.frame_configs[index] = frame;
        }
        Ok(config)
    }

    /// Readout descriptors of the active frame
    ///
    /// Frame-paused sampling uses one channel; equidistant sampling reads
    /// the first half of every pulse on channel 0 and the second half plus
    /// the metadata blocks on channel 1.
    pub fn data_plan(&self, config: &MimoseConfig, plan: &AcquisitionPlan) -> DataPlan {
        let layout = &plan.layout;
        let metadata = [
            ReadoutEntry::new(FRAME_COUNTER_ADDRESS, 1),
            ReadoutEntry::new(VCO_BLOCK.0, VCO_BLOCK.1),
            ReadoutEntry::new(AOC_BLOCK.0, AOC_BLOCK.1),
            ReadoutEntry::new(AGC_BLOCK.0, AGC_BLOCK.1),
        ];
        let frt = config
            .frame_configs
            .iter()
            .filter(|f| f.is_present())
            .map(|f| f.frame_repetition_time_s)
            .fold(f64::INFINITY, f64::min);

        let channels = match layout.mode {
            SamplingMode::FramePaused => {
                let mut readout = vec![ReadoutEntry::new(RAW_MEMORY, layout.raw_words() as u32)];
                readout.extend(metadata);
                vec![(0, DataSettings::new(DataFormat::Raw16, readout, 1))]
            }
            SamplingMode::Equidistant => {
                let half = layout.samples_in_memory as u32;
                let mut first = Vec::with_capacity(layout.pulses);
                let mut second = Vec::with_capacity(layout.pulses + metadata.len());
                for pulse in 0..layout.pulses as u32 {
                    let base = RAW_MEMORY + 2 * half * pulse;
                    first.push(ReadoutEntry::new(base, half));
                    second.push(ReadoutEntry::new(base + half, half));
                }
                second.extend(metadata);
                vec![
                    (0, DataSettings::new(DataFormat::Raw16, first, 1)),
                    (1, DataSettings::new(DataFormat::Raw16, second, 1)),
                ]
            }
        };
        let frame_bytes = channels.iter().map(|(_, s)| s.slice_bytes).sum();
        let queue_size = queue_size_for(frt) * channels.len();
        DataPlan {
            channels,
            frame_bytes,
            queue_size,
        }
    }

    /// Caller timeout stretched to cover the slowest resident frame
    pub fn effective_timeout(config: &MimoseConfig, requested: Duration) -> Duration {
        config
            .frame_configs
            .iter()
            .map(|f| Duration::from_secs_f64(f.frame_repetition_time_s.max(0.0) * 1.25))
            .fold(requested, Duration::max)
    }

    /// Normalise the 12-bit ADC field of a sample word
    pub fn normalize(word: u16) -> f32 {
        (word & 0x0FFF) as f32 / 4095.0
    }

    /// Split the harvested words of one frame into samples and metadata
    pub fn decode_frame(words: &[u16], layout: &FrameLayout) -> Result<MimoseSamples> {
        if words.len() != layout.total_words() {
            return Err(RadarError::DimensionMismatch {
                expected: vec![layout.total_words()],
                actual: vec![words.len()],
            });
        }
        let ordered;
        let words = match layout.mode {
            SamplingMode::FramePaused => words,
            SamplingMode::Equidistant => {
                ordered = interleave_halves(words, layout);
                &ordered[..]
            }
        };

        let per_pulse = 2 * layout.samples_in_memory;
        let mut cube = ComplexCube::zeros(layout.shape());
        for pulse in 0..layout.pulses {
            let memory = &words[pulse * per_pulse..(pulse + 1) * per_pulse];
            for (i, iq) in memory.chunks_exact(2).take(layout.num_samples).enumerate() {
                cube.set(0, pulse, i, Complex32::new(Self::normalize(iq[0]), Self::normalize(iq[1])));
            }
        }

        let metadata = &words[layout.raw_words()..];
        let frame_counter = metadata[0] as u32;
        let vco = &metadata[1..10];
        let aoc = &metadata[10..18];
        let agc = &metadata[18..22];

        let counter = ((vco[4] as u32) << 16) | vco[3] as u32;
        let afc = (counter <= 0x00FF_FFFF).then(|| AfcReading {
            value: vco[2] as u32 + 1,
            counter,
        });

        let mut abb_gains = [0u8; 4];
        let mut aoc_offsets = [[0i16; 2]; 4];
        for pc in 0..NUM_PULSE_CONFIGS {
            abb_gains[pc] = ((agc[pc] >> 1) & 0b111) as u8;
            aoc_offsets[pc] = [sign_extend_9(aoc[2 * pc]), sign_extend_9(aoc[2 * pc + 1])];
        }

        Ok(MimoseSamples {
            cube,
            frame_counter,
            afc,
            abb_gains,
            aoc_offsets,
        })
    }

    /// RF centre frequency measured by the last AFC run
    pub fn rf_center_from_afc(reading: &AfcReading) -> Result<f64> {
        if reading.value == 0 || reading.counter == 0 {
            return Err(RadarError::NotPossible("no AFC reading yet".to_string()));
        }
        let window_s = reading.value as f64 / EXT_OSC_HZ;
        Ok(reading.counter as f64 * 8.0 / window_s)
    }

    /// Sequence view of a frame configuration: one pulse per selected PC
    pub fn to_sequence(config: &MimoseConfig, frame_index: usize) -> Result<Sequence> {
        let frame = config.frame(frame_index)?;
        let frequency = config.afc.rf_center_frequency_hz as f64;
        let sample_rate = if frame.pulse_repetition_time_s > 0.0 {
            1.0 / frame.pulse_repetition_time_s
        } else {
            0.0
        };
        let pulses = frame
            .selected()
            .map(|pc| {
                let pulse = &config.pulse_configs[pc];
                let (tx_mask, rx_mask) = pulse.channel.masks();
                SequenceElement::Chirp(Chirp {
                    start_frequency_hz: frequency,
                    end_frequency_hz: frequency,
                    sample_rate_hz: sample_rate,
                    num_samples: frame.num_samples,
                    rx_mask,
                    tx_mask,
                    tx_power_level: pulse.tx_power_level,
                    abb_gain: pulse.abb_gain,
                    aoc_mode: pulse.aoc_mode,
                    ..Chirp::default()
                })
            })
            .collect();
        Ok(Sequence::new(vec![SequenceElement::frame_loop(
            frame.frame_repetition_time_s,
            pulses,
        )]))
    }

    /// Apply a sequence to frame configuration `frame_index` of `base`
    ///
    /// Pulse `i` of the sequence becomes pulse configuration `i`.
    pub fn config_from_sequence(&self, sequence: &Sequence, base: &MimoseConfig, frame_index: usize) -> Result<MimoseConfig> {
        sequence.validate(self)?;
        let frt = sequence
            .frame_repetition_time()
            .filter(|&t| t > 0.0)
            .ok_or_else(|| RadarError::ArgumentInvalid("pulsed sequence needs a frame loop period".to_string()))?;
        let chirps = sequence.chirps();
        if chirps.len() > NUM_PULSE_CONFIGS {
            return Err(RadarError::NotSupported(format!("{} pulses per repetition", chirps.len())));
        }
        let first = chirps[0];
        let consistent = chirps.iter().all(|c| {
            c.num_samples == first.num_samples
                && c.sample_rate_hz == first.sample_rate_hz
                && c.start_frequency_hz == first.start_frequency_hz
        });
        if !consistent {
            return Err(RadarError::ArgumentInvalid(
                "pulses of one frame must share frequency, rate and sample count".to_string(),
            ));
        }

        let mut config = *base;
        let mut frame = FrameConfig {
            frame_repetition_time_s: frt,
            pulse_repetition_time_s: 1.0 / first.sample_rate_hz,
            selected_pulse_configs: [false; NUM_PULSE_CONFIGS],
            num_samples: first.num_samples,
        };
        for (pc, chirp) in chirps.iter().enumerate() {
            config.pulse_configs[pc] = PulseConfig {
                channel: MimoseChannel::from_masks(chirp.tx_mask, chirp.rx_mask)?,
                tx_power_level: chirp.tx_power_level,
                abb_gain: chirp.abb_gain,
                aoc_mode: chirp.aoc_mode,
            };
            frame.selected_pulse_configs[pc] = true;
        }
        *config
            .frame_configs
            .get_mut(frame_index)
            .ok_or_else(|| RadarError::ArgumentOutOfBounds(format!("frame configuration {}", frame_index)))? = frame;
        config.afc.rf_center_frequency_hz = first.start_frequency_hz.round() as u64;
        self.check_config(&config, frame_index)?;
        Ok(config)
    }
}

impl ChirpProfile for MimoseProfile {
    fn check_chirp(&self, chirp: &Chirp) -> Result<()> {
        if chirp.start_frequency_hz != chirp.end_frequency_hz {
            return Err(RadarError::NotSupported("frequency sweep on a pulsed sensor".to_string()));
        }
        let (min_rf, max_rf) = RfBand::Ism200MHz.range_hz();
        check_range(chirp.start_frequency_hz, min_rf as f64, max_rf as f64, || RadarError::RfOutOfRange)?;
        if !(chirp.sample_rate_hz > 0.0) {
            return Err(RadarError::SamplerateOutOfRange);
        }
        check_range(1.0 / chirp.sample_rate_hz, MIN_PRT_PER_PULSE_S, MAX_PRT_S, || {
            RadarError::SamplerateOutOfRange
        })?;
        check_range(chirp.num_samples, 1, MAX_NUM_SAMPLES_ONE_PULSE, || RadarError::NumSamplesOutOfRange)?;
        MimoseChannel::from_masks(chirp.tx_mask, chirp.rx_mask)?;
        check_range(chirp.tx_power_level, 0, MAX_TX_POWER_LEVEL, || RadarError::TxPowerOutOfRange)?;
        if chirp.abb_gain == AbbGain::Automatic {
            return Err(RadarError::ArgumentInvalid("automatic ABB gain".to_string()));
        }
        Ok(())
    }

    fn chirp_duration(&self, _chirp: &Chirp) -> f64 {
        Self::pulse_duration_s()
    }
}

fn compile_frame(
    image: &mut RegisterImage<'_, u16, u16>,
    index: usize,
    frame: &FrameConfig,
    system_clock: f64,
) -> Result<()> {
    let cycles = (frame.frame_repetition_time_s * system_clock).round() as u64;
    image.set(&format!("FRAME{}_TIME", index), encode_exp_mul16(cycles, 5, 11)? as u32)?;
    image.set(&format!("FRAME{}_LIST_REP", index), 0)?;
    image.set(&format!("FRAME{}_LIST_REP.VAL", index), frame.num_samples)?;

    for entry in 0..NUM_PULSE_CONFIGS {
        let name = format!("FRAME{}_LIST{}_CONF", index, entry);
        image.set(&name, 0)?;
        if frame.selected_pulse_configs[entry] {
            image.set(&format!("{}.PC_CONF_NR", name), entry as u32)?;
            image.set(&format!("{}.ENTRY_EN", name), 1)?;
        }
    }

    // pre-trigger ahead of the end of the pulse train
    let pulses = frame.active_pulses() as f64;
    let advance = pulses * 100e-6 + 50e-6 + (frame.num_samples as f64 + pulses) * 80e-6;
    let pre_trigger = (pulses * advance / frame.pulse_repetition_time_s).ceil() as u32;
    let train = frame.num_samples * frame.active_pulses() as u32;
    let count = train.saturating_sub(pre_trigger);
    if count > 0x0FFF {
        return Err(RadarError::NotPossible(format!("trigger count {} exceeds 12 bits", count)));
    }
    let name = format!("FRAME{}_SEQ_TRIG_MAP_IRQ", index);
    image.set(&name, 0)?;
    image.set(&format!("{}.TRIG_COUNT", name), count)?;
    Ok(())
}

fn compile_pulse(
    image: &mut RegisterImage<'_, u16, u16>,
    frame_index: usize,
    pc: usize,
    frame: &FrameConfig,
    pulse: &PulseConfig,
    system_clock: f64,
) -> Result<()> {
    let per_pulse = frame.pulse_repetition_time_s / frame.active_pulses() as f64;
    let cycles = (per_pulse * system_clock).ceil() as u64;
    image.set(&format!("PC{}_CONF_TIME", pc), encode_exp_mul16(cycles, 5, 11)? as u32)?;

    let (tx_mask, rx_mask) = pulse.channel.masks();
    for (tx, bit) in [("TX1", 0b01), ("TX2", 0b10)] {
        let name = format!("{}_PC{}_CONF", tx, pc);
        image.set(&name, 0)?;
        if tx_mask & bit != 0 {
            image.set(&format!("{}.EN", name), 1)?;
            image.set(&format!("{}.PWR_DAC", name), pulse.tx_power_level)?;
        }
    }
    for (rx, bit) in [("RX1", 0b01), ("RX2", 0b10)] {
        image.set(&format!("{}_PC{}_CONF", rx, pc), (rx_mask & bit != 0) as u32)?;
    }

    let gain = pulse.abb_gain.index().ok_or_else(|| {
        RadarError::ArgumentInvalid(format!("pulse configuration {} uses automatic ABB gain", pc))
    })?;
    let (step0, step1) = AOC_STEPS[gain as usize];
    let (th0, th1) = AOC_THRESHOLDS[gain as usize];
    image.set(&format!("PC{}_AOC_TH0", pc), th0)?;
    image.set(&format!("PC{}_AOC_TH1", pc), th1)?;
    image.set(&format!("PC{}_AOC_STP", pc), 0)?;
    image.set(&format!("PC{}_AOC_STP.STP0", pc), step0)?;
    image.set(&format!("PC{}_AOC_STP.STP1", pc), step1)?;

    image.set(&format!("PC{}_AGC", pc), 0)?;
    image.set(&format!("PC{}_AGC.AGC_ABB_GAIN", pc), gain)?;
    image.set(&format!("AOC_CONF.MODE{}", pc), pulse.aoc_mode.code())?;

    let ft_len = match frame.num_samples {
        0..=16 => 0,
        17..=32 => 1,
        33..=64 => 2,
        _ => 3,
    };
    image.set(&format!("FT{}_CONF", pc), 0)?;
    image.set(&format!("FT{}_CONF.FT_LEN", pc), ft_len)?;
    image.set(&format!("FT{}_CONF.EN", pc), 1)?;

    tracing::trace!("Frame {} pulse configuration {}: {:?}", frame_index, pc, pulse);
    Ok(())
}

/// Trim code and clock fraction nearest to the requested RC frequency
fn rc_trim(clock: &ClockConfig) -> (usize, f64) {
    let desired = (clock.system_clock_hz as f64).max(RC_MIN_SYSTEM_CLOCK_HZ);
    let ratio = desired / clock.reference_clock_hz.max(1) as f64;
    RC_TRIM_LUT
        .iter()
        .copied()
        .enumerate()
        .min_by(|(_, a), (_, b)| (a - ratio).abs().total_cmp(&(b - ratio).abs()))
        .unwrap_or((0, RC_TRIM_LUT[0]))
}

fn i2c_clock_divider(system_clock: f64) -> u32 {
    if system_clock >= 40e6 {
        3
    } else if system_clock >= 30e6 {
        2
    } else if system_clock >= 20e6 {
        1
    } else {
        0
    }
}

fn sign_extend_9(word: u16) -> i16 {
    let value = (word & 0x1FF) as i16;
    if value & 0x100 != 0 {
        value - 0x200
    } else {
        value
    }
}

/// Rebuild the frame-paused word order from the two half-frame slices
fn interleave_halves(words: &[u16], layout: &FrameLayout) -> Vec<u16> {
    let half = layout.samples_in_memory;
    let first_len = half * layout.pulses;
    let (first, second) = words.split_at(first_len);
    let mut ordered = vec![0u16; words.len()];
    for pulse in 0..layout.pulses {
        let dest = pulse * 2 * half;
        ordered[dest..dest + half].copy_from_slice(&first[pulse * half..(pulse + 1) * half]);
        ordered[dest + half..dest + 2 * half].copy_from_slice(&second[pulse * half..(pulse + 1) * half]);
    }
    ordered[layout.raw_words()..].copy_from_slice(&second[first_len..]);
    ordered
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile() -> MimoseProfile {
        MimoseProfile::new(ChipVersion::A2).unwrap()
    }

    fn apply(profile: &MimoseProfile, batch: &RegisterBatch<u16, u16>) -> MimoseConfig {
        let mut image = profile.map().image();
        for (address, value) in batch.full_writes() {
            image.set(&format!("0x{:04X}", address), value as u32).unwrap();
        }
        profile.decode(&image, &profile.default_config()).unwrap()
    }

    fn equidistant_config(p: &MimoseProfile) -> MimoseConfig {
        let mut config = p.default_config();
        config.frame_configs[0].frame_repetition_time_s = 0.135;
        config
    }

    #[test]
    fn test_chip_version() {
        assert_eq!(ChipVersion::from_register(0x8002), ChipVersion::B1);
        assert_eq!(ChipVersion::from_register(0x0000), ChipVersion::A1);
        assert_eq!(ChipVersion::from_register(2), ChipVersion::Unknown);
        assert!(ChipVersion::Unknown.needs_heating_pulses());
        assert!(!ChipVersion::B1.needs_heating_pulses());
    }

    #[test]
    fn test_minimum_frame_repetition_time() {
        let p = profile();
        let config = p.default_config();
        let frame = &config.frame_configs[0];
        let min = MimoseProfile::minimum_frame_repetition_time(frame, DEFAULT_AFC_DURATION);
        assert!(min > 0.129 && min < 0.1295, "{}", min);

        // never below the pulse train itself
        let short = FrameConfig {
            pulse_repetition_time_s: 2e-3,
            num_samples: 256,
            ..*frame
        };
        assert!(MimoseProfile::minimum_frame_repetition_time(&short, DEFAULT_AFC_DURATION) >= 0.512);
    }

    #[test]
    fn test_limits_depend_on_pulse_count() {
        let p = profile();
        let mut config = p.default_config();
        let limits = p.limits(&config, 0).unwrap();
        assert_eq!(limits.num_samples, (1, 256));
        assert_eq!(limits.pulse_repetition_time_s.0, 130e-6);

        config.frame_configs[0].selected_pulse_configs = [true, true, true, false];
        let limits = p.limits(&config, 0).unwrap();
        assert_eq!(limits.num_samples, (1, 128));
        assert!((limits.pulse_repetition_time_s.0 - 390e-6).abs() < 1e-12);
        assert!(p.limits(&config, 2).is_err());
    }

    #[test]
    fn test_check_config_errors() {
        let p = profile();
        let base = p.default_config();
        assert!(p.check_config(&base, 0).is_ok());

        let mut config = base;
        config.frame_configs[0].num_samples = 300;
        assert!(matches!(p.check_config(&config, 0), Err(RadarError::NumSamplesOutOfRange)));

        let mut config = base;
        config.frame_configs[0].frame_repetition_time_s = 3.0;
        assert!(matches!(p.check_config(&config, 0), Err(RadarError::FrameRateOutOfRange)));

        let mut config = base;
        config.frame_configs[0].frame_repetition_time_s = 0.0;
        assert!(matches!(p.check_config(&config, 0), Err(RadarError::ArgumentInvalid(_))));

        let mut config = base;
        config.afc.rf_center_frequency_hz = 24_100_000_000;
        assert!(matches!(p.check_config(&config, 0), Err(RadarError::RfOutOfRange)));
        config.afc.band = RfBand::Ism200MHz;
        assert!(p.check_config(&config, 0).is_ok());

        let mut config = base;
        config.pulse_configs[0].abb_gain = AbbGain::Automatic;
        assert!(matches!(p.check_config(&config, 0), Err(RadarError::ArgumentInvalid(_))));
        // only selected pulse configurations are checked
        let mut config = base;
        config.pulse_configs[3].tx_power_level = 99;
        assert!(p.check_config(&config, 0).is_ok());
        config.frame_configs[0].selected_pulse_configs[3] = true;
        assert!(matches!(p.check_config(&config, 0), Err(RadarError::TxPowerOutOfRange)));

        let mut config = base;
        config.clock.system_clock_divider = 16;
        assert!(matches!(p.check_config(&config, 0), Err(RadarError::ArgumentOutOfBounds(_))));

        // frame 1 is empty by default
        assert!(p.check_config(&base, 1).is_err());
    }

    #[test]
    fn test_heating_pulses_follow_silicon() {
        let a2 = profile();
        let b1 = MimoseProfile::new(ChipVersion::B1).unwrap();
        let config = a2.default_config();
        let frame = &config.frame_configs[0];
        assert_eq!(a2.heating_pulses(frame, DEFAULT_AFC_DURATION), 2);
        assert_eq!(b1.heating_pulses(frame, DEFAULT_AFC_DURATION), 0);

        let tight = FrameConfig {
            frame_repetition_time_s: 0.1303,
            ..*frame
        };
        assert_eq!(a2.heating_pulses(&tight, DEFAULT_AFC_DURATION), 1);
    }

    #[test]
    fn test_sampling_mode() {
        let p = profile();
        let plan = p.plan(&p.default_config(), 0).unwrap();
        assert_eq!(plan.layout.mode, SamplingMode::FramePaused);
        assert_eq!(plan.trigger_count, 0);
        assert_eq!(plan.layout.samples_in_memory, 128);

        let config = equidistant_config(&p);
        let plan = p.plan(&config, 0).unwrap();
        assert_eq!(plan.layout.mode, SamplingMode::Equidistant);
        assert_eq!(plan.heating_pulses, 2);
        assert_eq!(plan.trigger_count, 128 / 2 + 2 + 1);

        let b1 = MimoseProfile::new(ChipVersion::B1).unwrap();
        assert_eq!(b1.plan(&config, 0).unwrap().trigger_count, 65);
    }

    #[test]
    fn test_memory_limit() {
        let p = profile();
        let mut config = p.default_config();
        config.frame_configs[0].selected_pulse_configs = [true; 4];
        config.frame_configs[0].num_samples = 100;
        config.frame_configs[0].pulse_repetition_time_s = 2e-3;
        config.frame_configs[0].frame_repetition_time_s = 1.0;
        // 4 x 128 slots fit, 4 x 256 would not
        assert_eq!(p.plan(&config, 0).unwrap().layout.samples_in_memory, 128);
    }

    #[test]
    fn test_compile_and_read_back() {
        let p = profile();
        let mut config = p.default_config();
        config.pulse_configs[1].tx_power_level = 20;
        config.pulse_configs[1].abb_gain = AbbGain::Gain48;
        config.pulse_configs[1].aoc_mode = AocMode::Tracked;
        config.frame_configs[0].selected_pulse_configs = [true, true, false, false];
        config.afc.afc_repeat_count = AfcRepeatCount::X4;

        let batch = p.compile(&config, 0).unwrap();
        let decoded = apply(&p, &batch);

        assert_eq!(decoded.frame_configs[0], config.frame_configs[0]);
        assert_eq!(decoded.pulse_configs[0], config.pulse_configs[0]);
        assert_eq!(decoded.pulse_configs[1], config.pulse_configs[1]);
        assert_eq!(decoded.afc.afc_duration_ct, config.afc.afc_duration_ct);
        assert_eq!(decoded.afc.afc_repeat_count, AfcRepeatCount::X4);
        assert_eq!(decoded.clock, config.clock);
        // the reference count quantises the centre frequency
        let error = decoded.afc.rf_center_frequency_hz as f64 - config.afc.rf_center_frequency_hz as f64;
        assert!(error.abs() < 3e6, "{}", error);
    }

    #[test]
    fn test_afc_reference_count() {
        let p = profile();
        assert_eq!(p.afc_reference_count(24_240_000_000, 115).unwrap(), 9074);
        let a1 = MimoseProfile::new(ChipVersion::A1).unwrap();
        assert_eq!(a1.afc_reference_count(24_240_000_000, 115).unwrap(), 9153);
    }

    #[test]
    fn test_equidistant_registers() {
        let p = profile();
        let config = equidistant_config(&p);
        let batch = p.compile(&config, 0).unwrap();
        let writes = batch.full_writes();
        let value = |address: u16| writes.iter().find(|(a, _)| *a == address).map(|(_, v)| *v);

        assert_eq!(value(0x00E0), Some(0x1823));
        assert_eq!(value(0x00E3), Some(0x0303));
        // TRIG_EN, TRIG_MAP 3, TRIG_COUNT 67
        assert_eq!(value(0x0047), Some((67 << 4) | (3 << 1) | 1));
        assert_eq!(value(0x0046), Some(2));
        assert_eq!(value(0x00D3), Some(256));
        assert_eq!(value(0x0019), Some(0x0005));
    }

    #[test]
    fn test_switch_frame_configuration() {
        let p = profile();
        let mut config = p.default_config();
        config.frame_configs[1] = FrameConfig {
            frame_repetition_time_s: 0.512,
            pulse_repetition_time_s: 1e-3,
            selected_pulse_configs: [false, true, false, false],
            num_samples: 64,
        };
        let full = p.compile(&config, 0).unwrap();
        let decoded = apply(&p, &full);
        assert_eq!(decoded.frame_configs[1], config.frame_configs[1]);

        let switch = p.compile_switch(&config, 1).unwrap();
        assert!(switch.len() < full.len());
        let writes = switch.full_writes();
        assert!(writes.iter().all(|(a, _)| *a != 0x0040 && *a != 0x0050));

        let start = p.start_batch(1).unwrap();
        assert_eq!(start.full_writes(), vec![(0x0000, 0b11)]);
        assert!(p.start_batch(2).is_err());
    }

    #[test]
    fn test_frame_decode_paused() {
        let layout = FrameLayout {
            mode: SamplingMode::FramePaused,
            pulses: 2,
            num_samples: 3,
            samples_in_memory: 4,
        };
        let mut words: Vec<u16> = (0..layout.raw_words() as u16).collect();
        words.push(42);
        words.extend([0, 0, 114, 9074, 0, 0, 0, 0, 0]);
        words.extend([0x1F0, 0x010, 0x1FF, 0x0FF, 0, 0, 0x100, 1]);
        words.extend([7 << 1, 3 << 1, 0, 1]);

        let samples = MimoseProfile::decode_frame(&words, &layout).unwrap();
        assert_eq!(samples.cube.shape(), CubeShape::new(1, 2, 3));
        assert_eq!(samples.cube.get(0, 0, 1), Complex32::new(2.0 / 4095.0, 3.0 / 4095.0));
        // second pulse starts after the padded slots of the first
        assert_eq!(samples.cube.get(0, 1, 0), Complex32::new(8.0 / 4095.0, 9.0 / 4095.0));
        assert_eq!(samples.frame_counter, 42);
        assert_eq!(samples.afc, Some(AfcReading { value: 115, counter: 9074 }));
        assert_eq!(samples.aoc_offsets[0], [-16, 16]);
        assert_eq!(samples.aoc_offsets[1], [-1, 255]);
        assert_eq!(samples.aoc_offsets[3], [-256, 1]);
        assert_eq!(samples.abb_gains, [7, 3, 0, 0]);

        assert!(MimoseProfile::decode_frame(&words[1..], &layout).is_err());
    }

    #[test]
    fn test_frame_decode_equidistant() {
        let layout = FrameLayout {
            mode: SamplingMode::Equidistant,
            pulses: 2,
            num_samples: 2,
            samples_in_memory: 2,
        };
        // memory per pulse: [I0 Q0 I1 Q1], halves harvested separately
        let mut words = vec![10, 11, 20, 21, 12, 13, 22, 23];
        words.extend([0u16; METADATA_WORDS]);
        let samples = MimoseProfile::decode_frame(&words, &layout).unwrap();
        assert_eq!(samples.cube.get(0, 0, 1), Complex32::new(12.0 / 4095.0, 13.0 / 4095.0));
        assert_eq!(samples.cube.get(0, 1, 0), Complex32::new(20.0 / 4095.0, 21.0 / 4095.0));
    }

    #[test]
    fn test_data_plan() {
        let p = profile();
        let config = p.default_config();
        let plan = p.plan(&config, 0).unwrap();
        let data = p.data_plan(&config, &plan);
        assert_eq!(data.channels.len(), 1);
        assert_eq!(data.frame_bytes, 2 * (256 + METADATA_WORDS));
        assert_eq!(data.format(), DataFormat::Raw16);

        let config = equidistant_config(&p);
        let plan = p.plan(&config, 0).unwrap();
        let data = p.data_plan(&config, &plan);
        assert_eq!(data.channels.len(), 2);
        assert_eq!(data.channels[1].1.readout[0], ReadoutEntry::new(RAW_MEMORY + 128, 128));
        assert_eq!(data.frame_bytes, 2 * plan.layout.total_words());
    }

    #[test]
    fn test_rf_center_from_afc() {
        let reading = AfcReading { value: 115, counter: 9074 };
        let frequency = MimoseProfile::rf_center_from_afc(&reading).unwrap();
        assert!((frequency - 24.2393e9).abs() < 1e6, "{}", frequency);
        assert!(MimoseProfile::rf_center_from_afc(&AfcReading::default()).is_err());
    }

    #[test]
    fn test_effective_timeout() {
        let p = profile();
        let config = p.default_config();
        let stretched = MimoseProfile::effective_timeout(&config, Duration::from_millis(10));
        assert!((stretched.as_secs_f64() - 0.32).abs() < 1e-6);
        assert_eq!(
            MimoseProfile::effective_timeout(&config, Duration::from_secs(2)),
            Duration::from_secs(2)
        );
    }

    #[test]
    fn test_sequence_view() {
        let p = profile();
        let mut config = p.default_config();
        config.frame_configs[0].selected_pulse_configs = [true, false, true, false];
        let sequence = MimoseProfile::to_sequence(&config, 0).unwrap();
        assert_eq!(sequence.chirps().len(), 2);
        assert_eq!(sequence.frame_repetition_time(), Some(DEFAULT_FRT_S));

        let back = p.config_from_sequence(&sequence, &p.default_config(), 0).unwrap();
        assert_eq!(back.frame_configs[0].selected_pulse_configs, [true, true, false, false]);
        assert_eq!(back.pulse_configs[1].channel, MimoseChannel::Tx1Rx2);

        let mut bad = sequence.clone();
        if let SequenceElement::Loop { body, .. } = &mut bad.elements[0] {
            if let SequenceElement::Chirp(chirp) = &mut body[0] {
                chirp.rx_mask = 0b11;
            }
        }
        assert!(matches!(
            p.config_from_sequence(&bad, &config, 0),
            Err(RadarError::RxAntennaCombinationNotAllowed)
        ));
    }
}
