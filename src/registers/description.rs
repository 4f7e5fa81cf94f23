//! Register description files
//!
//! Two formats are accepted, selected by file extension:
//!
//! - `.xml` - component description with `Interface/AddressBlock` base
//!   addresses, `RegMemSet` trees of registers and repeated sequences, and
//!   `BitField`/`BitFieldGapElement`/`BitFieldSequence` layouts. `$name` and
//!   `${name}` references to `GenericDecl`/`ParamDecl` values are substituted
//!   before the tree is walked.
//! - `.json` - flat `units[0].registers[]` list with `bslices`.

use super::{BitField, Layout};
use crate::error::{RadarError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// A register as read from a description file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterDef {
    pub name: String,
    pub address: u32,
    pub reset: u32,
    /// Index into [`RegisterDescription::layouts`]
    pub layout: usize,
}

/// Width-independent register catalogue
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegisterDescription {
    pub layouts: Vec<Layout>,
    pub registers: Vec<RegisterDef>,
}

impl RegisterDescription {
    /// Add a register with its own layout
    pub fn push(&mut self, name: &str, address: u32, reset: u32, bitfields: Vec<BitField>) {
        self.layouts.push(Layout::new(name, bitfields));
        self.registers.push(RegisterDef {
            name: name.to_string(),
            address,
            reset,
            layout: self.layouts.len() - 1,
        });
    }

    /// Add a register sharing an existing layout
    pub fn push_shared(&mut self, name: &str, address: u32, reset: u32, layout: usize) {
        self.registers.push(RegisterDef {
            name: name.to_string(),
            address,
            reset,
            layout,
        });
    }

    pub fn register(&self, name: &str) -> Option<&RegisterDef> {
        self.registers.iter().find(|r| r.name == name)
    }

    /// Load a description, picking the parser by extension
    pub fn load_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let format = Format::from_path(path)?;
        let content = std::fs::read_to_string(path)
            .map_err(|e| RadarError::OpeningFile(format!("{}: {}", path.display(), e)))?;
        match format {
            Format::Xml => Self::from_xml(&content),
            Format::Json => Self::from_json(&content),
        }
    }

    pub fn save_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content = match Format::from_path(path)? {
            Format::Xml => self.to_xml(),
            Format::Json => self.to_json()?,
        };
        std::fs::write(path, content)
            .map_err(|e| RadarError::OpeningFile(format!("{}: {}", path.display(), e)))
    }

    /// Parse the flat JSON format
    pub fn from_json(content: &str) -> Result<Self> {
        let file: JsonFile = serde_json::from_str(content).map_err(RadarError::from_json_error)?;
        let unit = file
            .units
            .into_iter()
            .next()
            .ok_or_else(|| RadarError::InvalidJsonValue("units is empty".to_string()))?;

        let mut description = Self::default();
        for reg in unit.registers {
            let reset = reg.reset.first().map(|r| r.value).unwrap_or(0);
            let bitfields = reg
                .bslices
                .iter()
                .filter(|s| !s.name.starts_with("RSVD"))
                .map(|s| BitField::new(s.name.clone(), s.width, s.offset))
                .collect();
            description.push(&reg.name, reg.address, reset, bitfields);
        }
        Ok(description)
    }

    pub fn to_json(&self) -> Result<String> {
        let registers = self
            .registers
            .iter()
            .map(|r| JsonRegister {
                name: r.name.clone(),
                address: r.address,
                reset: vec![JsonReset { value: r.reset }],
                bslices: self.layouts[r.layout]
                    .bitfields
                    .iter()
                    .map(|b| JsonSlice {
                        name: b.name.clone(),
                        width: b.width(),
                        offset: b.shift,
                    })
                    .collect(),
            })
            .collect();
        let file = JsonFile {
            units: vec![JsonUnit { registers }],
        };
        serde_json::to_string_pretty(&file)
            .map_err(|e| RadarError::Internal(format!("Failed to serialize register description: {}", e)))
    }

    /// Parse the XML component format
    pub fn from_xml(content: &str) -> Result<Self> {
        let document = XmlNode::parse(content)?;
        let component = document
            .child("Component")
            .ok_or_else(|| RadarError::FileInvalid("missing Component element".to_string()))?;

        let substitutions = collect_declarations(component);
        let substituted = substitute(content, &substitutions);
        let document = XmlNode::parse(&substituted)?;
        let component = document
            .child("Component")
            .ok_or_else(|| RadarError::FileInvalid("missing Component element".to_string()))?;

        let address_block = component
            .child("Interface")
            .and_then(|i| i.child("AddressBlock"))
            .ok_or_else(|| RadarError::MissingInterface("Interface/AddressBlock".to_string()))?;

        let mut walker = XmlWalker::default();
        for reg_mem_set in component.children("RegMemSet") {
            let id = reg_mem_set.child_text("ID");
            walker.data_unit = reg_mem_set.number("DataUnit")?;
            if walker.data_unit == 0 {
                return Err(RadarError::FileInvalid("DataUnit must not be zero".to_string()));
            }

            let start_address = address_block
                .children("XRefRegMemSet")
                .find(|x| x.child_text("XRefTargetID") == id)
                .ok_or_else(|| RadarError::MissingInterface(format!("no address for RegMemSet {}", id)))?
                .number("Offset")?;

            walker.gather_registers(reg_mem_set.children("RegMemElement").collect(), start_address, "", "", "")?;
        }

        Ok(walker.description)
    }

    pub fn to_xml(&self) -> String {
        use quick_xml::escape::escape;

        let mut out = String::new();
        out.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
        out.push_str("<Component xmlns:xsi=\"http://www.w3.org/2001/XMLSchema-instance\">\n");
        out.push_str("  <Interface>\n    <AddressBlock>\n");
        out.push_str("      <XRefRegMemSet><XRefTargetID>0</XRefTargetID><Offset>0x0</Offset></XRefRegMemSet>\n");
        out.push_str("    </AddressBlock>\n  </Interface>\n");
        out.push_str("  <RegMemSet>\n    <ID>0</ID>\n    <DataUnit>8</DataUnit>\n");
        for reg in &self.registers {
            out.push_str("    <RegMemElement xsi:type=\"Register\">\n");
            out.push_str(&format!("      <Name>{}</Name>\n", escape(reg.name.as_str())));
            out.push_str(&format!("      <Offset>0x{:X}</Offset>\n", reg.address));
            out.push_str("      <DataWidth>8</DataWidth>\n");
            out.push_str(&format!(
                "      <ResetType><ResetValue>0x{:X}</ResetValue></ResetType>\n",
                reg.reset
            ));
            for field in &self.layouts[reg.layout].bitfields {
                out.push_str(&format!(
                    "      <BitFieldElement xsi:type=\"BitField\"><Name>{}</Name><Offset>{}</Offset><Width>{}</Width></BitFieldElement>\n",
                    escape(field.name.as_str()),
                    field.shift,
                    field.width()
                ));
            }
            out.push_str("    </RegMemElement>\n");
        }
        out.push_str("  </RegMemSet>\n</Component>\n");
        out
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Format {
    Xml,
    Json,
}

impl Format {
    fn from_path(path: &Path) -> Result<Self> {
        match path.extension().and_then(|e| e.to_str()) {
            Some("xml") => Ok(Format::Xml),
            Some("json") => Ok(Format::Json),
            _ => Err(RadarError::FormatUnknown(format!(
                "unknown file extension: {}",
                path.display()
            ))),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct JsonFile {
    units: Vec<JsonUnit>,
}

#[derive(Debug, Serialize, Deserialize)]
struct JsonUnit {
    registers: Vec<JsonRegister>,
}

#[derive(Debug, Serialize, Deserialize)]
struct JsonRegister {
    name: String,
    address: u32,
    #[serde(default)]
    reset: Vec<JsonReset>,
    #[serde(default)]
    bslices: Vec<JsonSlice>,
}

#[derive(Debug, Serialize, Deserialize)]
struct JsonReset {
    value: u32,
}

#[derive(Debug, Serialize, Deserialize)]
struct JsonSlice {
    name: String,
    width: u32,
    offset: u32,
}

/// Minimal element tree built from quick-xml events
#[derive(Debug, Default)]
struct XmlNode {
    name: String,
    attributes: Vec<(String, String)>,
    children: Vec<XmlNode>,
    text: String,
}

impl XmlNode {
    /// Parse a document into a synthetic root node
    fn parse(content: &str) -> Result<XmlNode> {
        use quick_xml::events::{BytesStart, Event};
        use quick_xml::Reader;

        fn open(start: &BytesStart<'_>) -> XmlNode {
            let attributes = start
                .attributes()
                .flatten()
                .map(|a| {
                    (
                        String::from_utf8_lossy(a.key.as_ref()).into_owned(),
                        String::from_utf8_lossy(&a.value).into_owned(),
                    )
                })
                .collect();
            XmlNode {
                name: String::from_utf8_lossy(start.name().as_ref()).into_owned(),
                attributes,
                ..XmlNode::default()
            }
        }

        let mut reader = Reader::from_str(content);
        let mut stack: Vec<XmlNode> = vec![XmlNode::default()];

        loop {
            let event = reader
                .read_event()
                .map_err(|e| RadarError::FileInvalid(format!("XML error at {}: {}", reader.buffer_position(), e)))?;
            match event {
                Event::Start(start) => stack.push(open(&start)),
                Event::Empty(start) => {
                    let node = open(&start);
                    if let Some(parent) = stack.last_mut() {
                        parent.children.push(node);
                    }
                }
                Event::Text(text) => {
                    let text = text
                        .unescape()
                        .map_err(|e| RadarError::FileInvalid(format!("XML text: {}", e)))?;
                    if let Some(node) = stack.last_mut() {
                        node.text.push_str(text.trim());
                    }
                }
                Event::CData(data) => {
                    if let Some(node) = stack.last_mut() {
                        node.text.push_str(String::from_utf8_lossy(&data).trim());
                    }
                }
                Event::End(_) => {
                    if stack.len() < 2 {
                        return Err(RadarError::FileInvalid("unbalanced XML end tag".to_string()));
                    }
                    if let Some(node) = stack.pop() {
                        if let Some(parent) = stack.last_mut() {
                            parent.children.push(node);
                        }
                    }
                }
                Event::Eof => break,
                _ => {}
            }
        }

        if stack.len() != 1 {
            return Err(RadarError::EndOfFile);
        }
        stack
            .pop()
            .ok_or_else(|| RadarError::Internal("XML root lost".to_string()))
    }

    fn child(&self, name: &str) -> Option<&XmlNode> {
        self.children.iter().find(|c| c.name == name)
    }

    fn children<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a XmlNode> + 'a {
        self.children.iter().filter(move |c| c.name == name)
    }

    fn child_text(&self, name: &str) -> &str {
        self.child(name).map(|c| c.text.as_str()).unwrap_or("")
    }

    fn attribute(&self, name: &str) -> &str {
        self.attributes
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
            .unwrap_or("")
    }

    /// Numeric child value; a missing child counts as zero
    fn number(&self, name: &str) -> Result<u32> {
        let text = self.child_text(name);
        if text.is_empty() {
            return Ok(0);
        }
        let parsed = match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
            Some(hex) => u32::from_str_radix(hex, 16),
            None => text.parse::<u32>(),
        };
        parsed.map_err(|_| RadarError::FileInvalid(format!("<{}> is not a number: {}", name, text)))
    }
}

fn collect_declarations(component: &XmlNode) -> Vec<(String, String)> {
    let mut out = Vec::new();
    let blocks = [("GenericDeclBlock", "GenericDecl"), ("ParamDeclBlock", "ParamDecl")];
    for (block, decl) in blocks {
        if let Some(block) = component.child(block) {
            for declaration in block.children(decl) {
                out.push((
                    declaration.child_text("Name").to_string(),
                    declaration.child_text("DefaultValue").to_string(),
                ));
            }
        }
    }
    out
}

fn substitute(content: &str, substitutions: &[(String, String)]) -> String {
    let mut sorted: Vec<&(String, String)> = substitutions.iter().filter(|(n, _)| !n.is_empty()).collect();
    // longest names first so `$ab` is not clobbered by `$a`
    sorted.sort_by(|a, b| b.0.len().cmp(&a.0.len()));

    let mut text = content.to_string();
    for (name, value) in &sorted {
        text = text.replace(&format!("${{{}}}", name), value);
    }
    for (name, value) in &sorted {
        text = text.replace(&format!("${}", name), value);
    }
    text
}

#[derive(Default)]
struct XmlWalker {
    description: RegisterDescription,
    data_unit: u32,
    layout_indexes: HashMap<String, usize>,
}

impl XmlWalker {
    /// Collect registers; returns the offset just past the last element
    fn gather_registers(
        &mut self,
        nodes: Vec<&XmlNode>,
        start_address: u32,
        layout_prefix: &str,
        reg_prefix: &str,
        reg_suffix: &str,
    ) -> Result<u32> {
        let mut next_offset = 0;

        for node in nodes {
            let name = node.child_text("Name");
            let mut offset = node.number("Offset")?;

            match node.attribute("xsi:type") {
                "RegMemSequence" => {
                    let min_index = node.number("MinIndex")?;
                    let count = node.number("Count")?;
                    let hidden = name.starts_with('_');

                    let iterations: Vec<Option<u32>> = if count > 0 {
                        (min_index..min_index + count).map(Some).collect()
                    } else {
                        vec![None]
                    };

                    for index in iterations {
                        let mut new_suffix = reg_suffix.to_string();
                        if let Some(i) = index {
                            new_suffix.push_str(&i.to_string());
                        }
                        let mut new_layout_prefix = layout_prefix.to_string();
                        let mut new_reg_prefix = reg_prefix.to_string();
                        if !hidden {
                            new_layout_prefix.push_str(&format!("{}_", name));
                            new_reg_prefix.push_str(&format!("{}{}_", name, new_suffix));
                            new_suffix.clear();
                        }
                        offset += self.gather_registers(
                            node.children("SequenceElement").collect(),
                            start_address + offset,
                            &new_layout_prefix,
                            &new_reg_prefix,
                            &new_suffix,
                        )?;
                    }
                }
                "Register" => {
                    let register_name = format!("{}{}{}", reg_prefix, name, reg_suffix);
                    let layout_name = format!("{}{}", layout_prefix, name);
                    let reset = node.child("ResetType").map(|r| r.number("ResetValue")).transpose()?.unwrap_or(0);

                    let layout = match self.layout_indexes.get(&layout_name) {
                        Some(&index) => index,
                        None => {
                            let mut bitfields = Vec::new();
                            gather_bitfields(
                                &mut bitfields,
                                node.children("BitFieldElement").collect(),
                                0,
                                "",
                                "",
                            )?;
                            self.description.layouts.push(Layout::new(layout_name.clone(), bitfields));
                            let index = self.description.layouts.len() - 1;
                            self.layout_indexes.insert(layout_name, index);
                            index
                        }
                    };

                    self.description
                        .push_shared(&register_name, start_address + offset, reset, layout);
                    offset += node.number("DataWidth")? / self.data_unit;
                }
                "GapElement" => {
                    offset += node.number("DataWidth")? / self.data_unit;
                }
                other => {
                    tracing::debug!("Skipping register element of type {:?}", other);
                }
            }
            next_offset = offset;
        }
        Ok(next_offset)
    }
}

/// Collect bitfields; returns the bit offset just past the last element
fn gather_bitfields(
    bitfields: &mut Vec<BitField>,
    nodes: Vec<&XmlNode>,
    start_offset: u32,
    prefix: &str,
    suffix: &str,
) -> Result<u32> {
    let mut next_offset = 0;

    for node in nodes {
        let name = node.child_text("Name");
        let mut offset = node.number("Offset")?;

        match node.attribute("xsi:type") {
            "BitFieldSequence" => {
                let min_index = node.number("MinIndex")?;
                let count = node.number("Count")?;
                let hidden = name.starts_with('_');

                if count > 0 {
                    for index in min_index..min_index + count {
                        let mut new_prefix = prefix.to_string();
                        let mut new_suffix = format!("{}{}", suffix, index);
                        if !hidden {
                            new_prefix.push_str(&format!("{}{}_", name, new_suffix));
                            new_suffix.clear();
                        }
                        offset += gather_bitfields(
                            bitfields,
                            node.children("BitFieldSequenceElement").collect(),
                            start_offset + offset,
                            &new_prefix,
                            &new_suffix,
                        )?;
                    }
                } else {
                    let mut new_prefix = prefix.to_string();
                    let mut new_suffix = suffix.to_string();
                    if !hidden {
                        new_prefix.push_str(&format!("{}{}_", name, new_suffix));
                        new_suffix.clear();
                    }
                    offset += gather_bitfields(
                        bitfields,
                        node.children("SequenceElement").collect(),
                        start_offset + offset,
                        &new_prefix,
                        &new_suffix,
                    )?;
                }
            }
            "BitField" => {
                let width = node.number("Width")?;
                if width == 0 || start_offset + offset + width > 32 {
                    return Err(RadarError::FileInvalid(format!("bitfield {} does not fit 32 bits", name)));
                }
                bitfields.push(BitField::new(
                    format!("{}{}{}", prefix, name, suffix),
                    width,
                    start_offset + offset,
                ));
                offset += width;
            }
            "BitFieldGapElement" => {
                offset += node.number("Width")?;
            }
            other => {
                tracing::debug!("Skipping bitfield element of type {:?}", other);
            }
        }
        next_offset = offset;
    }
    Ok(next_offset)
}
