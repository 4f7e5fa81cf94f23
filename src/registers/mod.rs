//! Symbolic register map with a write-through cache
//!
//! A [`RegisterMap`] binds register names to addresses and bitfield layouts for
//! exactly one sensor family. Reads and writes go through any
//! [`RegisterAccess`] implementation (usually a transport accessor); the map
//! remembers the last value this process wrote to every address so bitfield
//! writes can be realised as read-modify-write without a bus read.
//!
//! # Names
//!
//! - `"ADC0"` - full register by name
//! - `"ADC0.ADC_DIV"` - single bitfield, masked and shifted
//! - `"0x01"`, `"0b1"`, `"1"` - literal address
//!
//! # Example
//!
//! ```ignore
//! use mmradar_rs::registers::{layouts, RegisterMap};
//!
//! let mut map: RegisterMap<u8, u32> = RegisterMap::from_description(&layouts::avian_d())?;
//! map.write(&mut accessor, "ADC0.ADC_DIV", 40)?;
//! let div = map.read(&mut accessor, "ADC0.ADC_DIV")?;
//! ```

pub mod batch;
pub mod description;
pub mod layouts;
pub mod text;

pub use batch::{BatchEntry, RegisterBatch, WriteOp, WritePlanner};
pub use description::{RegisterDef, RegisterDescription};

use crate::codec::{field_get, field_set};
use crate::error::{RadarError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt::Debug;
use std::hash::Hash;
use std::path::Path;

/// Integer type usable as a register address or value
pub trait RegisterWord: Copy + Eq + Ord + Hash + Debug + Send + Sync + 'static {
    /// Width in bits
    const BITS: u32;

    fn to_u32(self) -> u32;

    /// Narrow a u32, `None` if it does not fit
    fn from_u32(value: u32) -> Option<Self>;
}

macro_rules! impl_register_word {
    ($($t:ty),*) => {
        $(
            impl RegisterWord for $t {
                const BITS: u32 = <$t>::BITS;

                #[inline]
                fn to_u32(self) -> u32 {
                    self as u32
                }

                #[inline]
                fn from_u32(value: u32) -> Option<Self> {
                    <$t>::try_from(value).ok()
                }
            }
        )*
    };
}

impl_register_word!(u8, u16, u32);

/// A named bit-slice of a register
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BitField {
    pub name: String,
    pub mask: u32,
    pub shift: u32,
    /// Optional symbolic values for this field
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<(String, u32)>,
}

impl BitField {
    /// Create a bitfield from its width and bit offset
    pub fn new(name: impl Into<String>, width: u32, offset: u32) -> Self {
        let mask = if width >= 32 {
            u32::MAX
        } else {
            ((1u32 << width) - 1) << offset
        };
        Self {
            name: name.into(),
            mask,
            shift: offset,
            values: Vec::new(),
        }
    }

    pub fn with_values(mut self, values: &[(&str, u32)]) -> Self {
        self.values = values.iter().map(|(n, v)| (n.to_string(), *v)).collect();
        self
    }

    pub fn width(&self) -> u32 {
        (self.mask >> self.shift).count_ones()
    }

    pub fn extract(&self, register: u32) -> u32 {
        field_get(register, self.mask, self.shift)
    }

    /// Insert `value` into `register`, rejecting values wider than the field
    pub fn insert(&self, register: u32, value: u32) -> Result<u32> {
        field_set(register, self.mask, self.shift, value)
            .map_err(|e| e.with_context(format!("bitfield {}", self.name)))
    }

    /// Look up a symbolic value
    pub fn value_of(&self, symbol: &str) -> Option<u32> {
        self.values
            .iter()
            .find(|(name, _)| name == symbol)
            .map(|(_, v)| *v)
    }
}

/// The set of bitfields shared by one or more registers
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Layout {
    pub name: String,
    pub bitfields: Vec<BitField>,
}

impl Layout {
    pub fn new(name: impl Into<String>, bitfields: Vec<BitField>) -> Self {
        Self {
            name: name.into(),
            bitfields,
        }
    }

    pub fn field(&self, name: &str) -> Option<&BitField> {
        self.bitfields.iter().find(|b| b.name == name)
    }
}

/// One register of a map
#[derive(Debug, Clone)]
pub struct RegisterEntry<A, V> {
    pub name: String,
    pub address: A,
    pub reset: V,
    /// Index into the map's layout table
    pub layout: usize,
}

/// Register-level I/O used by the map
pub trait RegisterAccess<A: RegisterWord, V: RegisterWord> {
    fn read(&mut self, address: A) -> Result<V>;

    fn write(&mut self, address: A, value: V) -> Result<()>;

    /// Read `count` registers starting at `address`
    fn read_burst(&mut self, address: A, count: usize) -> Result<Vec<V>>;

    /// Write consecutive registers starting at `address`
    fn write_burst(&mut self, address: A, values: &[V]) -> Result<()>;
}

/// Resolved target of a symbolic name
#[derive(Debug, Clone, Copy)]
pub struct Target<'a, A> {
    pub address: A,
    pub field: Option<&'a BitField>,
}

/// Name to address catalogue plus the write cache for one sensor family
#[derive(Debug, Clone)]
pub struct RegisterMap<A: RegisterWord, V: RegisterWord> {
    entries: Vec<RegisterEntry<A, V>>,
    layouts: Vec<Layout>,
    by_name: HashMap<String, usize>,
    by_address: HashMap<A, usize>,
    cache: HashMap<A, V>,
    planner: WritePlanner,
}

impl<A: RegisterWord, V: RegisterWord> Default for RegisterMap<A, V> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            layouts: Vec::new(),
            by_name: HashMap::new(),
            by_address: HashMap::new(),
            cache: HashMap::new(),
            planner: WritePlanner::default(),
        }
    }
}

impl<A: RegisterWord, V: RegisterWord> RegisterMap<A, V> {
    /// Build a map from a parsed description, checking every address and
    /// reset value against the map's word widths
    pub fn from_description(description: &RegisterDescription) -> Result<Self> {
        let mut map = Self {
            layouts: description.layouts.clone(),
            ..Self::default()
        };

        for def in &description.registers {
            let address = A::from_u32(def.address).ok_or_else(|| {
                RadarError::FileInvalid(format!(
                    "address 0x{:X} of {} exceeds {} bits",
                    def.address,
                    def.name,
                    A::BITS
                ))
            })?;
            let reset = V::from_u32(def.reset).ok_or_else(|| {
                RadarError::FileInvalid(format!(
                    "reset value 0x{:X} of {} exceeds {} bits",
                    def.reset,
                    def.name,
                    V::BITS
                ))
            })?;
            if def.layout >= map.layouts.len() {
                return Err(RadarError::FileInvalid(format!(
                    "register {} refers to missing layout {}",
                    def.name, def.layout
                )));
            }
            if map.by_name.contains_key(&def.name) {
                return Err(RadarError::FileInvalid(format!(
                    "duplicate register name {}",
                    def.name
                )));
            }

            let index = map.entries.len();
            map.by_name.insert(def.name.clone(), index);
            map.by_address.entry(address).or_insert(index);
            map.entries.push(RegisterEntry {
                name: def.name.clone(),
                address,
                reset,
                layout: def.layout,
            });
        }

        Ok(map)
    }

    /// Load a register description file and build a map from it
    pub fn load_file(path: impl AsRef<Path>) -> Result<Self> {
        let description = RegisterDescription::load_file(path)?;
        Self::from_description(&description)
    }

    /// Save the map's description (not its cache)
    pub fn save_file(&self, path: impl AsRef<Path>) -> Result<()> {
        self.to_description().save_file(path)
    }

    pub fn to_description(&self) -> RegisterDescription {
        RegisterDescription {
            layouts: self.layouts.clone(),
            registers: self
                .entries
                .iter()
                .map(|e| RegisterDef {
                    name: e.name.clone(),
                    address: e.address.to_u32(),
                    reset: e.reset.to_u32(),
                    layout: e.layout,
                })
                .collect(),
        }
    }

    /// Enable or disable burst coalescing for batch writes
    pub fn set_coalescing(&mut self, enabled: bool) {
        self.planner = WritePlanner::new(enabled);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[RegisterEntry<A, V>] {
        &self.entries
    }

    pub fn entry(&self, name: &str) -> Option<&RegisterEntry<A, V>> {
        self.by_name.get(name).map(|&i| &self.entries[i])
    }

    pub fn layout_of(&self, entry: &RegisterEntry<A, V>) -> &Layout {
        &self.layouts[entry.layout]
    }

    /// Register name at `address`, if known
    pub fn name_of(&self, address: A) -> Option<&str> {
        self.by_address
            .get(&address)
            .map(|&i| self.entries[i].name.as_str())
    }

    /// Resolve a name, dotted bitfield name or literal address
    pub fn resolve(&self, name: &str) -> Result<Target<'_, A>> {
        if name.is_empty() {
            return Err(RadarError::ArgumentNull("register name".to_string()));
        }

        if name.as_bytes()[0].is_ascii_digit() {
            let value = parse_literal(name)?;
            let address = A::from_u32(value).ok_or_else(|| {
                RadarError::ArgumentOutOfBounds(format!(
                    "address {} exceeds {} bits",
                    name,
                    A::BITS
                ))
            })?;
            return Ok(Target {
                address,
                field: None,
            });
        }

        if let Some((register, field)) = name.split_once('.') {
            let entry = self
                .entry(register)
                .ok_or_else(|| RadarError::ArgumentInvalid(format!("unknown register {}", register)))?;
            let bitfield = self.layouts[entry.layout].field(field).ok_or_else(|| {
                RadarError::ArgumentInvalid(format!("unknown bitfield {}", name))
            })?;
            return Ok(Target {
                address: entry.address,
                field: Some(bitfield),
            });
        }

        let entry = self
            .entry(name)
            .ok_or_else(|| RadarError::ArgumentInvalid(format!("unknown register {}", name)))?;
        Ok(Target {
            address: entry.address,
            field: None,
        })
    }

    /// Value most recently written to `address` by this map
    pub fn cached(&self, address: A) -> Option<V> {
        self.cache.get(&address).copied()
    }

    /// Cached value, falling back to the reset value
    pub fn cached_or_reset(&self, address: A) -> Option<V> {
        self.cached(address).or_else(|| {
            self.by_address
                .get(&address)
                .map(|&i| self.entries[i].reset)
        })
    }

    /// Read a register or bitfield from the device
    pub fn read(&self, io: &mut dyn RegisterAccess<A, V>, name: &str) -> Result<u32> {
        let target = self.resolve(name)?;
        let raw = io.read(target.address)?.to_u32();
        Ok(match target.field {
            Some(field) => field.extract(raw),
            None => raw,
        })
    }

    /// Write a register or a bitfield
    ///
    /// Bitfield writes use the cached register value when present and read the
    /// device otherwise.
    pub fn write(&mut self, io: &mut dyn RegisterAccess<A, V>, name: &str, value: u32) -> Result<()> {
        let target = self.resolve(name)?;
        let entry = match target.field {
            Some(field) => BatchEntry::Field {
                address: target.address,
                mask: field.mask,
                shift: field.shift,
                value,
            },
            None => BatchEntry::Full {
                address: target.address,
                value: narrow::<V>(value)?,
            },
        };
        self.apply(io, &[entry])
    }

    /// Write a list of symbolic `(name, value)` pairs in order
    pub fn write_named(
        &mut self,
        io: &mut dyn RegisterAccess<A, V>,
        writes: &[(&str, u32)],
    ) -> Result<()> {
        let mut batch = RegisterBatch::new();
        for (name, value) in writes {
            let target = self.resolve(name)?;
            match target.field {
                Some(field) => {
                    // validate width before anything reaches the device
                    field.insert(0, *value)?;
                    batch.push(BatchEntry::Field {
                        address: target.address,
                        mask: field.mask,
                        shift: field.shift,
                        value: *value,
                    });
                }
                None => batch.push_full(target.address, narrow::<V>(*value)?),
            }
        }
        self.write_batch(io, &batch)
    }

    /// Flush a batch through the planner
    pub fn write_batch(&mut self, io: &mut dyn RegisterAccess<A, V>, batch: &RegisterBatch<A, V>) -> Result<()> {
        self.apply(io, batch.entries())
    }

    fn apply(&mut self, io: &mut dyn RegisterAccess<A, V>, entries: &[BatchEntry<A, V>]) -> Result<()> {
        let ops = self.planner.plan(entries);
        tracing::debug!(
            "Flushing {} register writes as {} transactions",
            entries.len(),
            ops.len()
        );

        for op in ops {
            match op {
                WriteOp::Single { address, value } => {
                    io.write(address, value)?;
                    self.cache.insert(address, value);
                }
                WriteOp::Burst { address, values } => {
                    io.write_burst(address, &values)?;
                    let mut next = address.to_u32();
                    for value in values {
                        if let Some(a) = A::from_u32(next) {
                            self.cache.insert(a, value);
                        }
                        next += 1;
                    }
                }
                WriteOp::Modify {
                    address,
                    mask,
                    shift,
                    value,
                } => {
                    let current = match self.cache.get(&address) {
                        Some(v) => v.to_u32(),
                        None => io.read(address)?.to_u32(),
                    };
                    let updated = narrow::<V>(field_set(current, mask, shift, value)?)?;
                    io.write(address, updated)?;
                    self.cache.insert(address, updated);
                }
            }
        }
        Ok(())
    }

    /// Restore every register to its reset value
    pub fn reset(&mut self, io: &mut dyn RegisterAccess<A, V>) -> Result<()> {
        let mut batch = RegisterBatch::new();
        let mut sorted: Vec<&RegisterEntry<A, V>> = self.entries.iter().collect();
        sorted.sort_by_key(|e| e.address);
        for entry in sorted {
            batch.push_full(entry.address, entry.reset);
        }
        self.write_batch(io, &batch)
    }

    /// Forget all cached values
    pub fn clear_cache(&mut self) {
        self.cache.clear();
    }

    /// `(name, address, cached value)` for every register that has been written
    pub fn dump(&self) -> Vec<(String, A, V)> {
        let mut out: Vec<(String, A, V)> = self
            .cache
            .iter()
            .map(|(&address, &value)| {
                let name = self.name_of(address).unwrap_or("reg").to_string();
                (name, address, value)
            })
            .collect();
        out.sort_by_key(|(_, address, _)| *address);
        out
    }

    /// Start an off-line image of register values seeded with reset values
    pub fn image(&self) -> RegisterImage<'_, A, V> {
        RegisterImage {
            map: self,
            values: BTreeMap::new(),
        }
    }

    /// Off-line image seeded from the write cache
    pub fn cached_image(&self) -> RegisterImage<'_, A, V> {
        RegisterImage {
            map: self,
            values: self.cache.iter().map(|(&a, &v)| (a, v.to_u32())).collect(),
        }
    }
}

/// Register values computed without touching a device
///
/// Sensor profiles compile configurations into an image and decode
/// configurations back from one.
#[derive(Debug, Clone)]
pub struct RegisterImage<'m, A: RegisterWord, V: RegisterWord> {
    map: &'m RegisterMap<A, V>,
    values: BTreeMap<A, u32>,
}

impl<'m, A: RegisterWord, V: RegisterWord> RegisterImage<'m, A, V> {
    /// Set a register or bitfield; untouched registers start from reset
    pub fn set(&mut self, name: &str, value: u32) -> Result<()> {
        let target = self.map.resolve(name)?;
        let current = self.current(target.address);
        let updated = match target.field {
            Some(field) => field.insert(current, value)?,
            None => value,
        };
        narrow::<V>(updated)?;
        self.values.insert(target.address, updated);
        Ok(())
    }

    /// Get a register or bitfield value from the image
    pub fn get(&self, name: &str) -> Result<u32> {
        let target = self.map.resolve(name)?;
        let current = self.current(target.address);
        Ok(match target.field {
            Some(field) => field.extract(current),
            None => current,
        })
    }

    /// Mark a register as part of the image without changing it
    pub fn touch(&mut self, name: &str) -> Result<()> {
        let target = self.map.resolve(name)?;
        let current = self.current(target.address);
        self.values.insert(target.address, current);
        Ok(())
    }

    fn current(&self, address: A) -> u32 {
        self.values
            .get(&address)
            .copied()
            .or_else(|| self.map.cached_or_reset(address).map(|v| v.to_u32()))
            .unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Full-register writes in ascending address order
    pub fn into_batch(self) -> RegisterBatch<A, V> {
        let mut batch = RegisterBatch::new();
        for (address, value) in self.values {
            // set() has already checked the width
            if let Some(v) = V::from_u32(value) {
                batch.push_full(address, v);
            }
        }
        batch
    }
}

fn narrow<V: RegisterWord>(value: u32) -> Result<V> {
    V::from_u32(value).ok_or_else(|| {
        RadarError::ArgumentOutOfBounds(format!(
            "value 0x{:X} exceeds {} bits",
            value,
            V::BITS
        ))
    })
}

/// Parse a literal address: decimal, `0x` hex or `0b` binary
pub fn parse_literal(text: &str) -> Result<u32> {
    let (digits, radix) = if let Some(rest) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        (rest, 16)
    } else if let Some(rest) = text.strip_prefix("0b").or_else(|| text.strip_prefix("0B")) {
        (rest, 2)
    } else {
        (text, 10)
    };
    u32::from_str_radix(digits, radix)
        .map_err(|_| RadarError::ArgumentInvalid(format!("invalid numeric address {}", text)))
}
