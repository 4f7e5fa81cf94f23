//! Plain-text register lists
//!
//! One register per line: `<name> <hex address> <hex value>`. The name is only
//! informative on import; addresses and values are taken as written.

use super::{RegisterMap, RegisterWord};
use crate::error::{RadarError, Result};
use std::fmt::Write as _;
use std::path::Path;

impl<A: RegisterWord, V: RegisterWord> RegisterMap<A, V> {
    /// Read a register list file
    ///
    /// Blank lines are skipped. A malformed line fails the whole import.
    pub fn import_config(&self, path: impl AsRef<Path>) -> Result<Vec<(A, V)>> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| RadarError::OpeningFile(format!("{}: {}", path.display(), e)))?;
        parse_register_list(&content)
    }

    /// Write a register list file
    ///
    /// # Arguments
    /// * `list` - Registers in the order they should appear
    /// * `hex_prefix` - Prefix put before every hex number, usually `"0x"`
    pub fn export_config(&self, path: impl AsRef<Path>, list: &[(A, V)], hex_prefix: &str) -> Result<()> {
        let path = path.as_ref();
        std::fs::write(path, self.format_register_list(list, hex_prefix))
            .map_err(|e| RadarError::OpeningFile(format!("{}: {}", path.display(), e)))
    }

    /// Render a register list; unknown addresses are named `reg`
    pub fn format_register_list(&self, list: &[(A, V)], hex_prefix: &str) -> String {
        let address_digits = (A::BITS / 4) as usize;
        let value_digits = (V::BITS / 4) as usize;
        let mut out = String::new();
        for &(address, value) in list {
            let name = self.name_of(address).unwrap_or("reg");
            let _ = writeln!(
                out,
                "{} {}{:0aw$x} {}{:0vw$x}",
                name,
                hex_prefix,
                address.to_u32(),
                hex_prefix,
                value.to_u32(),
                aw = address_digits,
                vw = value_digits
            );
        }
        out
    }
}

/// Parse the text register list format
pub fn parse_register_list<A: RegisterWord, V: RegisterWord>(content: &str) -> Result<Vec<(A, V)>> {
    let mut list = Vec::new();
    for (number, line) in content.lines().enumerate() {
        let mut parts = line.split_whitespace();
        let Some(_name) = parts.next() else {
            continue;
        };
        let invalid = || RadarError::FileInvalid(format!("line {}: {:?}", number + 1, line));

        let address = parts.next().and_then(parse_hex).and_then(A::from_u32).ok_or_else(invalid)?;
        let value = parts.next().and_then(parse_hex).and_then(V::from_u32).ok_or_else(invalid)?;
        list.push((address, value));
    }
    Ok(list)
}

fn parse_hex(text: &str) -> Option<u32> {
    let digits = text
        .strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
        .unwrap_or(text);
    u32::from_str_radix(digits, 16).ok()
}
