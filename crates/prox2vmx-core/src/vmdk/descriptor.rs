//! VMDK descriptor file parsing.
//!
//! Only the parts needed to check a converted image are extracted: the
//! create type, the adapter type and the extent list.

use crate::error::{Error, Result};
use std::fs;
use std::path::Path;

/// Bytes per VMDK sector.
pub const SECTOR_SIZE: u64 = 512;

/// The type of a VMDK extent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtentType {
    /// Raw disk data in a separate file.
    Flat,
    /// Grain-table allocated data.
    Sparse,
    /// Zeroed data without storage.
    Zero,
    /// VMFS-backed extent.
    Vmfs,
}

impl ExtentType {
    fn parse(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "FLAT" => Ok(ExtentType::Flat),
            "SPARSE" => Ok(ExtentType::Sparse),
            "ZERO" => Ok(ExtentType::Zero),
            "VMFS" => Ok(ExtentType::Vmfs),
            _ => Err(Error::vmdk(format!("unknown extent type: {s}"))),
        }
    }
}

/// A VMDK extent entry, e.g. `RW 67108864 FLAT "disk-flat.vmdk" 0`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extent {
    /// Access mode (`RW`, `RDONLY`, `NOACCESS`).
    pub access: String,
    /// Size of this extent in sectors.
    pub size_sectors: u64,
    /// Type of the extent.
    pub extent_type: ExtentType,
    /// Data file of the extent.
    pub filename: String,
}

/// Parsed VMDK descriptor.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VmdkDescriptor {
    /// The VMDK layout (e.g. `monolithicFlat`).
    pub create_type: String,
    /// Disk adapter type (e.g. `lsilogic`).
    pub adapter_type: String,
    /// Extent entries in file order.
    pub extents: Vec<Extent>,
}

impl VmdkDescriptor {
    /// Virtual capacity of the disk in bytes.
    pub fn capacity_bytes(&self) -> u64 {
        self.extents.iter().map(|e| e.size_sectors).sum::<u64>() * SECTOR_SIZE
    }

    /// Whether this is the single-flat-extent layout the converter asks for.
    pub fn is_monolithic_flat(&self) -> bool {
        self.create_type == "monolithicFlat"
            && self.extents.len() == 1
            && self.extents[0].extent_type == ExtentType::Flat
    }
}

/// Parse a VMDK descriptor from its text content.
///
/// # Errors
///
/// Returns an error if an extent line is malformed.
pub fn parse_descriptor(content: &str) -> Result<VmdkDescriptor> {
    let mut descriptor = VmdkDescriptor::default();

    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        if ["RW ", "RDONLY ", "NOACCESS "]
            .iter()
            .any(|access| line.starts_with(access))
        {
            descriptor.extents.push(parse_extent_line(line)?);
            continue;
        }

        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let value = value.trim().trim_matches('"');
        match key.trim() {
            "createType" => descriptor.create_type = value.to_string(),
            "ddb.adapterType" => descriptor.adapter_type = value.to_string(),
            _ => {}
        }
    }

    Ok(descriptor)
}

/// Read and parse the descriptor at `path`.
pub fn read_descriptor(path: &Path) -> Result<VmdkDescriptor> {
    let content = fs::read_to_string(path).map_err(|e| Error::io(e, path))?;
    parse_descriptor(&content)
}

/// Name of the flat data file accompanying a monolithicFlat descriptor.
pub fn flat_extent_name(file_name: &str) -> String {
    match file_name.strip_suffix(".vmdk") {
        Some(stem) => format!("{stem}-flat.vmdk"),
        None => format!("{file_name}-flat.vmdk"),
    }
}

/// Parse an extent line: `ACCESS SIZE TYPE "FILENAME" [OFFSET]`.
fn parse_extent_line(line: &str) -> Result<Extent> {
    let mut parts = line.splitn(4, char::is_whitespace);
    let (Some(access), Some(size), Some(kind), Some(rest)) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(Error::vmdk(format!("invalid extent line: {line}")));
    };

    let size_sectors = size
        .parse()
        .map_err(|_| Error::vmdk(format!("invalid extent size: {size}")))?;
    let extent_type = ExtentType::parse(kind)?;

    let rest = rest.trim();
    let filename = rest
        .strip_prefix('"')
        .and_then(|r| r.split_once('"'))
        .map(|(name, _)| name.to_string())
        .ok_or_else(|| Error::vmdk(format!("expected quoted filename, got: {rest}")))?;

    Ok(Extent {
        access: access.to_string(),
        size_sectors,
        extent_type,
        filename,
    })
}
