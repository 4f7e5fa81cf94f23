//! C header export of a compiled Avian configuration
//!
//! Firmware using the XENSIV BGT60TRxx driver programs the chip from a
//! `register_list[]` of SPI words, `address << 25 | value`. The header
//! carries that list together with the configuration figures the driver
//! needs to size its buffers.

use crate::controller::DummyDevice;
use crate::error::{RadarError, Result};
use crate::profile::avian::AvianVariant;
use crate::sequence::SimpleSequenceConfig;
use chrono::{DateTime, Local};
use std::fmt::Write;

const GUARD: &str = "XENSIV_BGT60TRXX_CONF_H";
const IMPL_GUARD: &str = "XENSIV_BGT60TRXX_CONF_IMPL";
const PREFIX: &str = "XENSIV_BGT60TRXX_CONF";

/// Width of the value part of an SPI word
const VALUE_BITS: u32 = 24;
const VALUE_MASK: u32 = (1 << VALUE_BITS) - 1;
const ADDRESS_SHIFT: u32 = 25;
const MAX_ADDRESS: u8 = 0x7F;

/// Pack a register write into the SPI word of the driver's list
pub fn pack_register(address: u8, value: u32) -> u32 {
    ((address as u32 & MAX_ADDRESS as u32) << ADDRESS_SHIFT) | (value & VALUE_MASK)
}

/// Split an SPI word back into `(address, value)`
pub fn unpack_register(word: u32) -> (u8, u32) {
    ((word >> ADDRESS_SHIFT) as u8, word & VALUE_MASK)
}

/// Parse the `0x...UL` entries of a header's `register_list[]`
pub fn parse_register_list(header: &str) -> Result<Vec<(u8, u32)>> {
    let start = header
        .find("register_list[] = {")
        .ok_or_else(|| RadarError::Generic("no register_list in header".to_string()))?;
    let body = &header[start..];
    let end = body
        .find("};")
        .ok_or_else(|| RadarError::Generic("unterminated register_list".to_string()))?;

    body[..end]
        .lines()
        .skip(1)
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| {
            let digits = line
                .trim_end_matches(',')
                .trim_end_matches("UL")
                .trim_start_matches("0x");
            u32::from_str_radix(digits, 16)
                .map(unpack_register)
                .map_err(|e| RadarError::Generic(format!("bad register word {:?}: {}", line, e)))
        })
        .collect()
}

/// Render the header for `config` compiled on `variant`
///
/// `registers` are written in the order given; with `set_trigger_bit` the
/// `MAIN` word also starts the frame sequencer.
pub fn render(
    variant: AvianVariant,
    config: &SimpleSequenceConfig,
    registers: &[(u8, u32)],
    set_trigger_bit: bool,
) -> String {
    let chirp = &config.chirp;
    let mut out = String::new();

    // writes into a String cannot fail
    let _ = writeln!(out, "#ifndef {}", GUARD);
    let _ = writeln!(out, "#define {}", GUARD);
    let _ = writeln!(out);
    let _ = writeln!(out, "#define {}_DEVICE (XENSIV_DEVICE_{})", PREFIX, variant);
    let defines: [(&str, String); 10] = [
        ("START_FREQ_HZ", number(chirp.start_frequency_hz)),
        ("END_FREQ_HZ", number(chirp.end_frequency_hz)),
        ("NUM_SAMPLES_PER_CHIRP", chirp.num_samples.to_string()),
        ("NUM_CHIRPS_PER_FRAME", config.num_chirps.to_string()),
        ("NUM_RX_ANTENNAS", chirp.rx_mask.count_ones().to_string()),
        ("NUM_TX_ANTENNAS", chirp.tx_mask.count_ones().to_string()),
        ("SAMPLE_RATE", number(chirp.sample_rate_hz)),
        ("CHIRP_REPETITION_TIME_S", number(config.chirp_repetition_time_s)),
        ("FRAME_REPETITION_TIME_S", number(config.frame_repetition_time_s)),
        ("NUM_REGS", registers.len().to_string()),
    ];
    for (name, value) in &defines {
        if *name == "NUM_REGS" && registers.is_empty() {
            continue;
        }
        let _ = writeln!(out, "#define {}_{} ({})", PREFIX, name, value);
    }

    if !registers.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "#if defined({})", IMPL_GUARD);
        let _ = writeln!(out, "const uint32_t register_list[] = {{");
        for &(address, value) in registers {
            let value = if set_trigger_bit && address == 0 { value | 1 } else { value };
            let _ = writeln!(out, "    0x{:x}UL,", pack_register(address, value));
        }
        let _ = writeln!(out, "}};");
        let _ = writeln!(out, "#endif /* {} */", IMPL_GUARD);
    }

    let _ = writeln!(out);
    let _ = writeln!(out, "#endif /* {} */", GUARD);
    out
}

/// Compile `config` on a dummy device and render its header
pub fn export(variant: AvianVariant, config: &SimpleSequenceConfig) -> Result<String> {
    let device = DummyDevice::new(variant)?;
    device.set_simple_config(config)?;
    let registers = device.register_list()?;
    tracing::info!("Exported {} registers for {}", registers.len(), variant);
    Ok(render(variant, config, &registers, false))
}

/// First line of a header written to a file
pub fn banner(generated: DateTime<Local>) -> String {
    format!(
        "/* XENSIV BGT60TRXX register configurator, {} {}, generated {} */",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION"),
        generated.format("%Y-%m-%d %H:%M:%S")
    )
}

/// Shortest decimal form, without a fraction for whole values
fn number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e18 {
        format!("{}", value as i64)
    } else {
        format!("{}", value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_pack_register() {
        assert_eq!(pack_register(0x01, 0x12_3456), 0x0212_3456);
        assert_eq!(pack_register(0x7F, 0xFFFF_FFFF), 0xFEFF_FFFF);
        assert_eq!(unpack_register(0x0212_3456), (0x01, 0x12_3456));
    }

    #[test]
    fn test_render_layout() {
        let config = SimpleSequenceConfig::default();
        let header = render(AvianVariant::Bgt60Tr13c, &config, &[(0x00, 0x1E_8270), (0x01, 0x14_0210)], false);
        let lines: Vec<&str> = header.lines().collect();
        assert_eq!(lines[0], "#ifndef XENSIV_BGT60TRXX_CONF_H");
        assert_eq!(lines[1], "#define XENSIV_BGT60TRXX_CONF_H");
        assert_eq!(lines[3], "#define XENSIV_BGT60TRXX_CONF_DEVICE (XENSIV_DEVICE_BGT60TR13C)");
        assert!(header.contains("#define XENSIV_BGT60TRXX_CONF_NUM_REGS (2)\n\n#if defined(XENSIV_BGT60TRXX_CONF_IMPL)\n"));
        assert!(header.contains("const uint32_t register_list[] = {\n    0x1e8270UL,\n    0x2140210UL,\n};\n"));
        assert!(header.ends_with("#endif /* XENSIV_BGT60TRXX_CONF_IMPL */\n\n#endif /* XENSIV_BGT60TRXX_CONF_H */\n"));
        assert_eq!(
            header.lines().filter(|l| l.starts_with("#define XENSIV_BGT60TRXX_CONF_")).count(),
            12
        );
    }

    #[test]
    fn test_trigger_bit() {
        let config = SimpleSequenceConfig::default();
        let header = render(AvianVariant::Bgt60Tr13c, &config, &[(0x00, 0x1E_8270)], true);
        assert!(header.contains("0x1e8271UL"));
    }

    #[test]
    fn test_export_round_trip() {
        let config = SimpleSequenceConfig::default();
        let header = export(AvianVariant::Bgt60Atr24c, &config).unwrap();
        assert!(header.contains("(XENSIV_DEVICE_BGT60ATR24C)"));

        let device = DummyDevice::new(AvianVariant::Bgt60Atr24c).unwrap();
        device.set_simple_config(&config).unwrap();
        let expected: Vec<(u8, u32)> = device
            .register_list()
            .unwrap()
            .into_iter()
            .map(|(address, value)| (address, value & VALUE_MASK))
            .collect();
        assert_eq!(parse_register_list(&header).unwrap(), expected);
    }

    #[test]
    fn test_number_format() {
        assert_eq!(number(61.0e9), "61000000000");
        assert_eq!(number(0.15), "0.15");
        assert_eq!(number(1e6), "1000000");
    }

    #[test]
    fn test_banner() {
        let at = Local.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap();
        let line = banner(at);
        assert!(line.starts_with("/* XENSIV BGT60TRXX register configurator"));
        assert!(line.ends_with("generated 2024-03-01 12:30:00 */"));
    }
}
