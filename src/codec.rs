//! Bit-exact helpers shared by the register map and the sensor profiles
//!
//! - Host/little-endian and host/big-endian conversion for 16, 32 and 64 bit words
//! - Masked bitfield extraction and insertion
//! - Exponent/mantissa encoding of reference-clock cycle counts

use crate::error::{RadarError, Result};

/// Conversion between host byte order and a fixed wire byte order
pub trait ByteOrder: Copy {
    fn host_to_le(self) -> Self;
    fn le_to_host(self) -> Self;
    fn host_to_be(self) -> Self;
    fn be_to_host(self) -> Self;
}

macro_rules! impl_byte_order {
    ($($t:ty),*) => {
        $(
            impl ByteOrder for $t {
                #[inline]
                fn host_to_le(self) -> Self {
                    self.to_le()
                }
                #[inline]
                fn le_to_host(self) -> Self {
                    <$t>::from_le(self)
                }
                #[inline]
                fn host_to_be(self) -> Self {
                    self.to_be()
                }
                #[inline]
                fn be_to_host(self) -> Self {
                    <$t>::from_be(self)
                }
            }
        )*
    };
}

impl_byte_order!(u16, u32, u64);

/// Read a little-endian u16 at `offset`, `None` if out of range
pub fn read_le_u16(data: &[u8], offset: usize) -> Option<u16> {
    let bytes = data.get(offset..offset + 2)?;
    Some(u16::from_le_bytes([bytes[0], bytes[1]]))
}

/// Read a big-endian u32 at `offset`, `None` if out of range
pub fn read_be_u32(data: &[u8], offset: usize) -> Option<u32> {
    let bytes = data.get(offset..offset + 4)?;
    Some(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

/// Extract a field: `(value & mask) >> shift`
#[inline]
pub fn field_get(value: u32, mask: u32, shift: u32) -> u32 {
    (value & mask) >> shift
}

/// Insert a field into `value`, failing if `field` does not fit the mask
pub fn field_set(value: u32, mask: u32, shift: u32, field: u32) -> Result<u32> {
    let width_mask = mask >> shift;
    if field & !width_mask != 0 {
        return Err(RadarError::ArgumentOutOfBounds(format!(
            "value 0x{:X} does not fit a {}-bit field",
            field,
            width_mask.count_ones()
        )));
    }
    Ok((value & !mask) | ((field << shift) & mask))
}

/// A time value expressed as `mantissa << exponent`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpMantissa {
    pub exponent: u32,
    pub mantissa: u32,
}

impl ExpMantissa {
    /// Encode `value` with the smallest exponent whose mantissa fits
    ///
    /// The mantissa is rounded up at each halving, so the decoded value is
    /// never below the input.
    ///
    /// # Arguments
    /// * `value` - Count to encode, usually reference-clock cycles
    /// * `exp_bits` - Width of the exponent field
    /// * `mul_bits` - Width of the mantissa field
    pub fn encode(value: u64, exp_bits: u32, mul_bits: u32) -> Result<Self> {
        let max_mantissa = (1u64 << mul_bits) - 1;
        let max_exponent = (1u32 << exp_bits) - 1;

        let mut mantissa = value;
        let mut exponent = 0u32;
        while mantissa > max_mantissa {
            mantissa = (mantissa >> 1) + (mantissa & 1);
            exponent += 1;
        }

        if exponent > max_exponent {
            return Err(RadarError::ArgumentOutOfBounds(format!(
                "{} cannot be encoded with {} exponent bits and {} mantissa bits",
                value, exp_bits, mul_bits
            )));
        }

        Ok(Self {
            exponent,
            mantissa: mantissa as u32,
        })
    }

    pub fn decode(self) -> u64 {
        (self.mantissa as u64) << self.exponent
    }

    /// Largest value encodable with the given field widths
    pub fn max_value(exp_bits: u32, mul_bits: u32) -> u64 {
        ((1u64 << mul_bits) - 1) << ((1u32 << exp_bits) - 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_encode_small_values_keep_exponent_zero() {
        let em = ExpMantissa::encode(100, 2, 8).unwrap();
        assert_eq!(em, ExpMantissa { exponent: 0, mantissa: 100 });
    }

    #[test]
    fn test_encode_saturated_value_is_out_of_bounds() {
        assert!(matches!(
            ExpMantissa::encode(u64::MAX, 4, 8),
            Err(RadarError::ArgumentOutOfBounds(_))
        ));
        assert!(ExpMantissa::encode(u64::MAX, 5, 11).is_err());
        // halving an odd value still rounds up
        let em = ExpMantissa::encode(u64::MAX >> 30, 5, 11).unwrap();
        assert!(em.decode() >= u64::MAX >> 30);
    }

    #[test]
    fn test_encode_rounds_up() {
        // 257 does not fit 8 bits, (257 + 1) >> 1 = 129
        let em = ExpMantissa::encode(257, 2, 8).unwrap();
        assert_eq!(em, ExpMantissa { exponent: 1, mantissa: 129 });
        assert_eq!(em.decode(), 258);
    }

    #[test]
    fn test_encode_overflow_fails() {
        let max = ExpMantissa::max_value(2, 8);
        assert!(ExpMantissa::encode(max, 2, 8).is_ok());
        assert!(ExpMantissa::encode(max + 1, 2, 8).is_err());
    }

    #[test]
    fn test_field_set_rejects_wide_values() {
        assert_eq!(field_set(0, 0x38, 3, 5).unwrap(), 0x28);
        assert!(field_set(0, 0x38, 3, 8).is_err());
        assert_eq!(field_get(0xFF28, 0x38, 3), 5);
    }

    #[test]
    fn test_byte_readers() {
        let data = [0x34, 0x12, 0xDE, 0xAD, 0xBE, 0xEF];
        assert_eq!(read_le_u16(&data, 0), Some(0x1234));
        assert_eq!(read_be_u32(&data, 2), Some(0xDEADBEEF));
        assert_eq!(read_le_u16(&data, 5), None);
    }

    proptest! {
        #[test]
        fn prop_endian_round_trip(a in any::<u16>(), b in any::<u32>(), c in any::<u64>()) {
            prop_assert_eq!(a.host_to_le().le_to_host(), a);
            prop_assert_eq!(b.host_to_le().le_to_host(), b);
            prop_assert_eq!(c.host_to_le().le_to_host(), c);
            prop_assert_eq!(a.host_to_be().be_to_host(), a);
            prop_assert_eq!(b.host_to_be().be_to_host(), b);
            prop_assert_eq!(c.host_to_be().be_to_host(), c);
        }

        #[test]
        fn prop_exp_mantissa_bounds(
            exp_bits in 1u32..4,
            mul_bits in 1u32..16,
            seed in any::<u64>(),
        ) {
            let max = ExpMantissa::max_value(exp_bits, mul_bits);
            let v = seed % (max + 1);
            let em = ExpMantissa::encode(v, exp_bits, mul_bits).unwrap();
            let decoded = em.decode();
            prop_assert!(decoded >= v);
            prop_assert!(decoded - v < (1u64 << em.exponent));
            prop_assert!(em.mantissa < (1u32 << mul_bits));
        }
    }
}
