//! Clock-cycle encodings shared by the profiles
//!
//! Two families exist. Avian delay registers use a scaled timer, a counter
//! multiplied by a power of two plus a fixed offset. Mimose time registers
//! pack an exponent and mantissa into one 16-bit word.

use crate::codec::ExpMantissa;
use crate::error::{RadarError, Result};

/// Convert seconds to cycles of `clock_hz`, rounded to nearest
pub fn seconds_to_cycles(seconds: f64, clock_hz: f64) -> u64 {
    (seconds * clock_hz).round().max(0.0) as u64
}

pub fn cycles_to_seconds(cycles: u64, clock_hz: f64) -> f64 {
    cycles as f64 / clock_hz
}

/// Avian delay value: `counter * 2^(shift + 3) + shift + 3` cycles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ScaledTimer {
    pub counter: u32,
    pub shift: u32,
}

impl ScaledTimer {
    pub fn new(counter: u32, shift: u32) -> Self {
        Self { counter, shift }
    }

    /// Cycles represented; a zero counter is a single cycle
    pub fn cycles(&self) -> u64 {
        if self.counter == 0 {
            return 1;
        }
        ((self.counter as u64) << (self.shift + 3)) + self.shift as u64 + 3
    }

    /// Closest representable value to `cycles`
    ///
    /// # Arguments
    /// * `cycles` - Target delay in reference clock cycles
    /// * `counter_bits` - Width of the counter field
    /// * `shift_bits` - Width of the shift field
    pub fn from_cycles(cycles: u64, counter_bits: u32, shift_bits: u32) -> Self {
        let max_counter = (1u64 << counter_bits) - 1;
        let max_shift = (1u32 << shift_bits) - 1;

        let mut best = ScaledTimer::default();
        let mut best_error = cycles.abs_diff(1);

        for shift in 0..=max_shift {
            let offset = shift as u64 + 3;
            if cycles < offset {
                break;
            }
            let counter = (((cycles - offset) >> (shift + 2)) + 1) / 2;
            if counter > max_counter {
                continue;
            }
            let candidate = ScaledTimer::new(counter as u32, shift);
            let error = candidate.cycles().abs_diff(cycles);
            if error < best_error {
                best = candidate;
                best_error = error;
            } else if error > best_error && best.counter != 0 {
                break;
            }
        }
        best
    }

    /// Largest representable delay in cycles
    pub fn max_cycles(counter_bits: u32, shift_bits: u32) -> u64 {
        ScaledTimer::new((1u32 << counter_bits) - 1, (1u32 << shift_bits) - 1).cycles()
    }
}

/// Pack a cycle count into a 16-bit `(mantissa << exp_bits) | exp` word
pub fn encode_exp_mul16(value: u64, exp_bits: u32, mul_bits: u32) -> Result<u16> {
    if exp_bits + mul_bits > 16 {
        return Err(RadarError::ArgumentOutOfBounds(format!(
            "{} exponent and {} mantissa bits exceed 16 bits",
            exp_bits, mul_bits
        )));
    }
    let encoded = ExpMantissa::encode(value, exp_bits, mul_bits)
        .map_err(|_| RadarError::NotPossible(format!("{} cycles do not fit the time register", value)))?;
    Ok(((encoded.mantissa << exp_bits) | encoded.exponent) as u16)
}

pub fn decode_exp_mul16(word: u16, exp_bits: u32) -> u64 {
    let exponent = word as u32 & ((1 << exp_bits) - 1);
    let mantissa = word as u32 >> exp_bits;
    ExpMantissa { exponent, mantissa }.decode()
}
