//! BGT60LTR11 pulsed-Doppler profile
//!
//! The LTR11 is configured through discrete tables rather than free values:
//! pulse width, pulse repetition time (PRT), TX power, IF gain, hold time
//! and the adaptive-PRT factor are all indices. One frame is `num_samples`
//! consecutive pulses; each pulse yields an I/Q pair, an amplitude word and
//! the internal detector output.
//!
//! # Example
//!
//! ```
//! use mmradar_rs::profile::ltr11::Ltr11Profile;
//!
//! let profile = Ltr11Profile::new(false).unwrap();
//! let config = profile.default_config();
//! assert_eq!(config.rf_frequency_hz, 61_044_000_000);
//! let batch = profile.compile(&config).unwrap();
//! assert!(!batch.is_empty());
//! ```

use super::{check_range, queue_size_for, DataPlan, SensorInfo};
use crate::error::{RadarError, Result};
use crate::frame::ComplexCube;
use crate::registers::{layouts, RegisterBatch, RegisterImage, RegisterMap};
use crate::sequence::{Chirp, ChirpProfile, CubeShape, Sequence, SequenceElement};
use crate::transport::{DataFormat, DataSettings, ReadoutEntry};
use num_complex::Complex32;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const FREQUENCY_STEP_HZ: u64 = 2_400_000;
pub const MIN_FREQUENCY_HZ: u64 = 61_044_000_000;
pub const MAX_FREQUENCY_HZ: u64 = 61_452_000_000;
pub const MIN_FREQUENCY_JAPAN_HZ: u64 = 60_540_000_000;
pub const MAX_FREQUENCY_JAPAN_HZ: u64 = 60_948_000_000;

pub const MIN_NUM_SAMPLES: u32 = 16;
pub const MAX_NUM_SAMPLES: u32 = 1024;
pub const DEFAULT_NUM_SAMPLES: u32 = 256;
pub const MAX_DETECTOR_THRESHOLD: u32 = 4095;
pub const DEFAULT_DETECTOR_THRESHOLD: u32 = 80;

/// Threshold presets offered to users; any value up to the maximum is legal
pub const DETECTOR_THRESHOLDS: [u32; 15] = [
    66, 80, 90, 112, 136, 192, 248, 320, 384, 480, 640, 896, 1344, 1920, 2560,
];

/// TX power of each level in dBm
pub const TX_POWER_DBM: [f32; 8] = [-34.0, -31.5, -25.0, -18.0, -11.0, -5.0, 0.0, 4.5];
pub const MAX_TX_POWER_LEVEL: u32 = 7;

pub const MIN_IF_GAIN_DB: i32 = 10;
pub const MAX_IF_GAIN_DB: i32 = 50;
const IF_GAIN_STEP_DB: i32 = 5;

/// Oldest baseboard firmware that streams LTR11 data correctly
pub const MIN_FIRMWARE: (u16, u16, u16) = (2, 5, 4);

/// Timeout when the caller does not give one
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(1100);

const SAMPLE_ADDRESS: u32 = 0x28;
const AMPLITUDE_ADDRESS: u32 = 0x38;
const DETECTOR_ADDRESS: u32 = 0xFF;
const WORDS_PER_SAMPLE: usize = 4;

/// Tolerance on the inter-frame timestamp delta in active mode
const ACTIVE_TOLERANCE_US: u64 = 10;

const STATUS_MUX_AMPLITUDE: u32 = 6;

// Power model
const SUPPLY_V: f64 = 1.5;
const IDLE_CURRENT_MA: f64 = 0.8;
const ACTIVE_PULSE_US: f64 = 15.0;
const ACTIVE_CURRENT_MA: [f64; 4] = [100.0, 142.0, 83.0, 91.0];

/// Frequency register offset of the PLL line `reg = f / step - offset`
const PLL_OFFSET: i64 = 21_504;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Ltr11Mode {
    #[default]
    Pulse,
    Continuous,
}

/// Pulse width; discriminants are the register codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PulseWidth {
    #[default]
    Us5 = 0,
    Us10 = 1,
    Us3 = 2,
    Us4 = 3,
}

impl PulseWidth {
    const ALL: [PulseWidth; 4] = [PulseWidth::Us5, PulseWidth::Us10, PulseWidth::Us3, PulseWidth::Us4];

    pub fn code(&self) -> u32 {
        *self as u32
    }

    pub fn from_code(code: u32) -> Option<Self> {
        Self::ALL.get(code as usize).copied()
    }

    pub fn micros(&self) -> u32 {
        match self {
            PulseWidth::Us5 => 5,
            PulseWidth::Us10 => 10,
            PulseWidth::Us3 => 3,
            PulseWidth::Us4 => 4,
        }
    }
}

/// Pulse repetition time; discriminants are the register codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Prt {
    Us250 = 0,
    #[default]
    Us500 = 1,
    Us1000 = 2,
    Us2000 = 3,
}

impl Prt {
    const ALL: [Prt; 4] = [Prt::Us250, Prt::Us500, Prt::Us1000, Prt::Us2000];

    pub fn code(&self) -> u32 {
        *self as u32
    }

    pub fn from_code(code: u32) -> Option<Self> {
        Self::ALL.get(code as usize).copied()
    }

    pub fn micros(&self) -> u32 {
        250 << self.code()
    }

    /// PRT matching `seconds` to within a microsecond
    pub fn from_seconds(seconds: f64) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|prt| (prt.micros() as f64 * 1e-6 - seconds).abs() < 1e-6)
    }

    /// Rate at which a receiver sees samples
    pub fn sampling_frequency_hz(&self) -> u32 {
        1_000_000 / self.micros()
    }
}

/// Adaptive PRT factor applied while no target is present
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AprtFactor {
    X4 = 0,
    X8 = 1,
    X16 = 2,
    X2 = 3,
    /// Adaptive PRT disabled
    #[default]
    Off = 4,
}

impl AprtFactor {
    pub fn code(&self) -> u32 {
        *self as u32
    }

    pub fn from_code(code: u32) -> Option<Self> {
        [AprtFactor::X4, AprtFactor::X8, AprtFactor::X16, AprtFactor::X2, AprtFactor::Off]
            .get(code as usize)
            .copied()
    }

    pub fn factor(&self) -> u32 {
        match self {
            AprtFactor::X4 => 4,
            AprtFactor::X8 => 8,
            AprtFactor::X16 => 16,
            AprtFactor::X2 => 2,
            AprtFactor::Off => 1,
        }
    }

    pub fn is_enabled(&self) -> bool {
        *self != AprtFactor::Off
    }
}

/// Detector hold time; discriminants are the raw register values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum HoldTime {
    Minimum = 0,
    Ms512 = 4,
    #[default]
    S1 = 8,
    S2 = 16,
    S3 = 24,
    S5 = 40,
    S10 = 79,
    S20 = 235,
    S45 = 352,
    S60 = 469,
    S90 = 704,
    Min2 = 938,
    Min5 = 2345,
    Min10 = 4690,
    Min15 = 7035,
    Min30 = 14070,
}

impl HoldTime {
    const ALL: [HoldTime; 16] = [
        HoldTime::Minimum,
        HoldTime::Ms512,
        HoldTime::S1,
        HoldTime::S2,
        HoldTime::S3,
        HoldTime::S5,
        HoldTime::S10,
        HoldTime::S20,
        HoldTime::S45,
        HoldTime::S60,
        HoldTime::S90,
        HoldTime::Min2,
        HoldTime::Min5,
        HoldTime::Min10,
        HoldTime::Min15,
        HoldTime::Min30,
    ];

    pub fn raw(&self) -> u32 {
        *self as u32
    }

    pub fn from_raw(raw: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|h| h.raw() == raw)
    }
}

/// Complete LTR11 configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ltr11Config {
    pub mode: Ltr11Mode,
    pub rf_frequency_hz: u64,
    pub num_samples: u32,
    pub internal_detector_threshold: u32,
    pub prt: Prt,
    pub pulse_width: PulseWidth,
    /// Index into [`TX_POWER_DBM`]
    pub tx_power_level: u32,
    /// 10 to 50 dB in 5-dB steps
    pub rx_if_gain_db: i32,
    pub aprt_factor: AprtFactor,
    pub hold_time: HoldTime,
    pub disable_internal_detector: bool,
}

impl Ltr11Config {
    /// Duration of one frame in active mode
    pub fn frame_time(&self) -> Duration {
        Duration::from_micros(self.prt.micros() as u64 * self.num_samples as u64)
    }
}

/// Limits that depend on the fused frequency band
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Ltr11Limits {
    pub rf_frequency_hz: (u64, u64),
    pub rf_frequency_step_hz: u64,
    pub num_samples: (u32, u32),
    pub internal_detector_threshold: (u32, u32),
}

/// Samples and detector state of one frame
#[derive(Debug, Clone, PartialEq)]
pub struct Ltr11Samples {
    pub cube: ComplexCube,
    pub motion: bool,
    pub direction_approaching: bool,
}

/// LTR11 sensor profile
#[derive(Debug, Clone)]
pub struct Ltr11Profile {
    map: RegisterMap<u8, u16>,
    japan_band: bool,
}

impl Ltr11Profile {
    pub fn new(japan_band: bool) -> Result<Self> {
        let map = RegisterMap::from_description(&layouts::ltr11())?;
        Ok(Self { map, japan_band })
    }

    /// Band from the `E_FUSES` register value
    pub fn japan_band_from_fuses(fuses: u32) -> bool {
        fuses & (1 << 15) == 0
    }

    pub fn japan_band(&self) -> bool {
        self.japan_band
    }

    pub fn map(&self) -> &RegisterMap<u8, u16> {
        &self.map
    }

    pub fn map_mut(&mut self) -> &mut RegisterMap<u8, u16> {
        &mut self.map
    }

    pub fn limits(&self) -> Ltr11Limits {
        let rf = if self.japan_band {
            (MIN_FREQUENCY_JAPAN_HZ, MAX_FREQUENCY_JAPAN_HZ)
        } else {
            (MIN_FREQUENCY_HZ, MAX_FREQUENCY_HZ)
        };
        Ltr11Limits {
            rf_frequency_hz: rf,
            rf_frequency_step_hz: FREQUENCY_STEP_HZ,
            num_samples: (MIN_NUM_SAMPLES, MAX_NUM_SAMPLES),
            internal_detector_threshold: (0, MAX_DETECTOR_THRESHOLD),
        }
    }

    pub fn sensor_info(&self) -> SensorInfo {
        let (min_rf, max_rf) = self.limits().rf_frequency_hz;
        SensorInfo {
            description: "BGT60LTR11AIP".to_string(),
            min_rf_frequency_hz: min_rf as f64,
            max_rf_frequency_hz: max_rf as f64,
            num_tx_antennas: 1,
            num_rx_antennas: 1,
            max_tx_power: MAX_TX_POWER_LEVEL,
            device_id: 0,
            max_num_samples_per_chirp: MAX_NUM_SAMPLES,
            min_adc_sampling_rate_hz: Prt::Us2000.sampling_frequency_hz() as f64,
            max_adc_sampling_rate_hz: Prt::Us250.sampling_frequency_hz() as f64,
            hp_cutoff_list: Vec::new(),
            lp_cutoff_list: Vec::new(),
            if_gain_list: (MIN_IF_GAIN_DB..=MAX_IF_GAIN_DB).step_by(IF_GAIN_STEP_DB as usize).collect(),
        }
    }

    pub fn default_config(&self) -> Ltr11Config {
        Ltr11Config {
            mode: Ltr11Mode::Pulse,
            rf_frequency_hz: self.limits().rf_frequency_hz.0,
            num_samples: DEFAULT_NUM_SAMPLES,
            internal_detector_threshold: DEFAULT_DETECTOR_THRESHOLD,
            prt: Prt::Us500,
            pulse_width: PulseWidth::Us5,
            tx_power_level: MAX_TX_POWER_LEVEL,
            rx_if_gain_db: MAX_IF_GAIN_DB,
            aprt_factor: AprtFactor::Off,
            hold_time: HoldTime::S1,
            disable_internal_detector: false,
        }
    }

    pub fn check_config(&self, config: &Ltr11Config) -> Result<()> {
        let limits = self.limits();
        let (min_rf, max_rf) = limits.rf_frequency_hz;
        check_range(config.rf_frequency_hz, min_rf, max_rf, || RadarError::RfOutOfRange)?;
        if config.rf_frequency_hz % FREQUENCY_STEP_HZ != 0 {
            return Err(RadarError::RfOutOfRange);
        }
        let (min_n, max_n) = limits.num_samples;
        check_range(config.num_samples, min_n, max_n, || RadarError::NumSamplesOutOfRange)?;
        check_range(config.internal_detector_threshold, 0, MAX_DETECTOR_THRESHOLD, || {
            RadarError::ArgumentOutOfBounds(format!(
                "detector threshold {} exceeds {}",
                config.internal_detector_threshold, MAX_DETECTOR_THRESHOLD
            ))
        })?;
        check_range(config.tx_power_level, 0, MAX_TX_POWER_LEVEL, || RadarError::TxPowerOutOfRange)?;
        if_gain_code(config.rx_if_gain_db)?;
        Ok(())
    }

    /// PLL frequency control word of an RF frequency
    pub fn frequency_to_register(frequency_hz: u64) -> u32 {
        let steps = (frequency_hz as f64 / FREQUENCY_STEP_HZ as f64).round() as i64;
        (steps - PLL_OFFSET).max(0) as u32
    }

    pub fn register_to_frequency(register: u32) -> u64 {
        (register as u64 + PLL_OFFSET as u64) * FREQUENCY_STEP_HZ
    }

    /// Compile a configuration into a register batch
    pub fn compile(&self, config: &Ltr11Config) -> Result<RegisterBatch<u8, u16>> {
        self.check_config(config)?;
        let mut image = self.map.image();

        // defaults for the registers the configuration does not cover
        for name in ["REG0", "REG4", "REG6", "REG8", "REG14"] {
            image.touch(name)?;
        }
        image.set("REG1", 0)?;
        image.set("REG7", 0)?;
        image.set("REG9", 0)?;
        image.set("REG2", 0)?;
        image.set("REG5", 0)?;
        image.set("REG15", 0)?;

        image.set("REG7.DC_ON_PULSE_LEN", config.pulse_width.code())?;
        image.set("REG7.DC_REP_RATE", config.prt.code())?;
        image.set("REG7.MPA_CTRL", config.tx_power_level)?;
        image.set("REG10.HOLD_TIME", config.hold_time.raw())?;

        image.set("REG2.THRES", config.internal_detector_threshold)?;
        image.set("REG2.APRT", config.aprt_factor.is_enabled() as u32)?;
        if config.aprt_factor.is_enabled() {
            image.set("REG13", 0)?;
            image.set("REG13.PRT_MULT", config.aprt_factor.code())?;
        }

        image.set("REG9.BB_CTRL_GAIN", if_gain_code(config.rx_if_gain_db)?)?;
        image.set("REG5.PLL_FCW", Self::frequency_to_register(config.rf_frequency_hz))?;

        image.set("REG15.STAT_MUX", STATUS_MUX_AMPLITUDE)?;
        image.set("REG15.MISO_DRV", 1)?;
        image.set("REG15.START_CW", (config.mode == Ltr11Mode::Continuous) as u32)?;
        image.set("REG15.START_PM", 1)?;

        if config.disable_internal_detector {
            image.set("REG1.BB_DIG_DET_DIS", 1)?;
        }

        tracing::debug!(
            "Compiled LTR11 configuration: {} Hz, PRT {} us, {} samples",
            config.rf_frequency_hz,
            config.prt.micros(),
            config.num_samples
        );
        Ok(image.into_batch())
    }

    /// Read the configuration back from a register image
    ///
    /// The sample count lives only in the readout descriptor, so it is taken
    /// from `num_samples`.
    pub fn decode(&self, image: &RegisterImage<'_, u8, u16>, num_samples: u32) -> Result<Ltr11Config> {
        let invalid = |what: &str, value: u32| RadarError::Generic(format!("register holds invalid {} {}", what, value));

        let pulse_width = image.get("REG7.DC_ON_PULSE_LEN")?;
        let prt = image.get("REG7.DC_REP_RATE")?;
        let hold = image.get("REG10.HOLD_TIME")?;
        let aprt_factor = if image.get("REG2.APRT")? != 0 {
            let code = image.get("REG13.PRT_MULT")?;
            AprtFactor::from_code(code).ok_or_else(|| invalid("APRT factor", code))?
        } else {
            AprtFactor::Off
        };
        let gain = image.get("REG9.BB_CTRL_GAIN")? as i32;

        Ok(Ltr11Config {
            mode: if image.get("REG15.START_CW")? != 0 {
                Ltr11Mode::Continuous
            } else {
                Ltr11Mode::Pulse
            },
            rf_frequency_hz: Self::register_to_frequency(image.get("REG5.PLL_FCW")?),
            num_samples,
            internal_detector_threshold: image.get("REG2.THRES")?,
            prt: Prt::from_code(prt).ok_or_else(|| invalid("PRT", prt))?,
            pulse_width: PulseWidth::from_code(pulse_width).ok_or_else(|| invalid("pulse width", pulse_width))?,
            tx_power_level: image.get("REG7.MPA_CTRL")?,
            rx_if_gain_db: MIN_IF_GAIN_DB + gain * IF_GAIN_STEP_DB,
            aprt_factor,
            hold_time: HoldTime::from_raw(hold).ok_or_else(|| invalid("hold time", hold))?,
            disable_internal_detector: image.get("REG1.BB_DIG_DET_DIS")? != 0,
        })
    }

    /// Average power in mW of one PRT with the given pulse width
    pub fn power_consumption_mw(pulse_width: PulseWidth, prt_us: u32) -> f64 {
        let prt = prt_us as f64;
        let active = ACTIVE_CURRENT_MA[pulse_width.code() as usize] * 1e-3 * ACTIVE_PULSE_US;
        let idle = IDLE_CURRENT_MA * 1e-3 * (prt - ACTIVE_PULSE_US);
        SUPPLY_V * (active + idle) / prt * 1e3
    }

    pub fn active_power_mw(config: &Ltr11Config) -> f64 {
        Self::power_consumption_mw(config.pulse_width, config.prt.micros())
    }

    pub fn low_power_mw(config: &Ltr11Config) -> f64 {
        Self::power_consumption_mw(config.pulse_width, config.prt.micros() * config.aprt_factor.factor())
    }

    /// Largest timestamp delta between two frames in active mode
    pub fn active_period_us(config: &Ltr11Config) -> u64 {
        config.prt.micros() as u64 * config.num_samples as u64 + ACTIVE_TOLERANCE_US
    }

    /// Reject timeouts that cannot cover one frame in low-power mode
    pub fn check_timeout(config: &Ltr11Config, timeout: Duration) -> Result<()> {
        if timeout.is_zero() {
            return Err(RadarError::ArgumentInvalid("timeout must not be zero".to_string()));
        }
        if config.aprt_factor.is_enabled() {
            let needed = config.frame_time() * config.aprt_factor.factor();
            if timeout < needed {
                return Err(RadarError::ArgumentOutOfBounds(format!(
                    "timeout {:?} is shorter than a low-power frame ({:?})",
                    timeout, needed
                )));
            }
        }
        Ok(())
    }

    /// Readout: I/Q, amplitude and detector word for every pulse
    pub fn data_plan(&self, config: &Ltr11Config) -> Result<DataPlan> {
        check_range(config.num_samples, 1, MAX_NUM_SAMPLES, || RadarError::NotSupported(format!(
            "{} samples per frame",
            config.num_samples
        )))?;
        let settings = DataSettings::new(
            DataFormat::Raw16,
            vec![
                ReadoutEntry::new(SAMPLE_ADDRESS, 2),
                ReadoutEntry::new(AMPLITUDE_ADDRESS, 1),
                ReadoutEntry::new(DETECTOR_ADDRESS, 1),
            ],
            config.num_samples,
        );
        let frame_bytes = settings.slice_bytes;
        let frame_s = config.frame_time().as_secs_f64();
        Ok(DataPlan::single(settings, frame_bytes, queue_size_for(frame_s)))
    }

    pub fn frame_shape(config: &Ltr11Config) -> CubeShape {
        CubeShape::new(1, 1, config.num_samples as usize)
    }

    /// Normalise the 8 significant ADC bits (9..2) of a sample word
    pub fn normalize(word: u16) -> f32 {
        ((word & 0x3FC) >> 2) as f32 / 255.0
    }

    /// Split raw words into I/Q samples and the final detector state
    pub fn decode_samples(words: &[u16], num_samples: usize) -> Result<Ltr11Samples> {
        if num_samples == 0 || words.len() != num_samples * WORDS_PER_SAMPLE {
            return Err(RadarError::DimensionMismatch {
                expected: vec![num_samples * WORDS_PER_SAMPLE],
                actual: vec![words.len()],
            });
        }
        let shape = CubeShape::new(1, 1, num_samples);
        let mut cube = ComplexCube::zeros(shape);
        for (i, record) in words.chunks_exact(WORDS_PER_SAMPLE).enumerate() {
            cube.set(0, 0, i, Complex32::new(Self::normalize(record[0]), Self::normalize(record[1])));
        }
        let detector = words[words.len() - 1];
        Ok(Ltr11Samples {
            cube,
            motion: detector & 0b01 != 0,
            direction_approaching: detector & 0b10 != 0,
        })
    }

    /// Sequence view of a configuration: one pulse train of `num_samples`
    pub fn to_sequence(config: &Ltr11Config) -> Sequence {
        let frequency = config.rf_frequency_hz as f64;
        let chirp = Chirp {
            start_frequency_hz: frequency,
            end_frequency_hz: frequency,
            sample_rate_hz: config.prt.sampling_frequency_hz() as f64,
            num_samples: config.num_samples,
            rx_mask: 1,
            tx_mask: 1,
            tx_power_level: config.tx_power_level,
            if_gain_db: config.rx_if_gain_db,
            ..Chirp::default()
        };
        Sequence::new(vec![SequenceElement::frame_loop(0.0, vec![SequenceElement::Chirp(chirp)])])
    }

    /// Apply a sequence to `base`, keeping the settings a sequence cannot express
    pub fn config_from_sequence(&self, sequence: &Sequence, base: &Ltr11Config) -> Result<Ltr11Config> {
        sequence.validate(self)?;
        let chirps = sequence.chirps();
        let [chirp] = chirps.as_slice() else {
            return Err(RadarError::NotSupported(format!("{} pulse trains per frame", chirps.len())));
        };
        let prt = Prt::from_seconds(1.0 / chirp.sample_rate_hz).ok_or(RadarError::SamplerateOutOfRange)?;
        let config = Ltr11Config {
            rf_frequency_hz: chirp.start_frequency_hz.round() as u64,
            num_samples: chirp.num_samples,
            prt,
            tx_power_level: chirp.tx_power_level,
            rx_if_gain_db: chirp.if_gain_db,
            ..base.clone()
        };
        self.check_config(&config)?;
        Ok(config)
    }
}

fn if_gain_code(gain_db: i32) -> Result<u32> {
    check_range(gain_db, MIN_IF_GAIN_DB, MAX_IF_GAIN_DB, || RadarError::IfGainOutOfRange)?;
    if (gain_db - MIN_IF_GAIN_DB) % IF_GAIN_STEP_DB != 0 {
        return Err(RadarError::IfGainOutOfRange);
    }
    Ok(((gain_db - MIN_IF_GAIN_DB) / IF_GAIN_STEP_DB) as u32)
}

impl ChirpProfile for Ltr11Profile {
    fn check_chirp(&self, chirp: &Chirp) -> Result<()> {
        let (min_rf, max_rf) = self.limits().rf_frequency_hz;
        if chirp.start_frequency_hz != chirp.end_frequency_hz {
            return Err(RadarError::NotSupported("frequency sweep on a pulsed sensor".to_string()));
        }
        check_range(chirp.start_frequency_hz, min_rf as f64, max_rf as f64, || RadarError::RfOutOfRange)?;
        if Prt::from_seconds(1.0 / chirp.sample_rate_hz).is_none() {
            return Err(RadarError::SamplerateOutOfRange);
        }
        check_range(chirp.num_samples, MIN_NUM_SAMPLES, MAX_NUM_SAMPLES, || RadarError::NumSamplesOutOfRange)?;
        if chirp.rx_mask != 1 {
            return Err(RadarError::RxAntennaCombinationNotAllowed);
        }
        if chirp.tx_mask != 1 {
            return Err(RadarError::TxAntennaModeNotAllowed);
        }
        check_range(chirp.tx_power_level, 0, MAX_TX_POWER_LEVEL, || RadarError::TxPowerOutOfRange)?;
        if_gain_code(chirp.if_gain_db)?;
        Ok(())
    }

    fn chirp_duration(&self, chirp: &Chirp) -> f64 {
        chirp.num_samples as f64 / chirp.sample_rate_hz
    }
}
