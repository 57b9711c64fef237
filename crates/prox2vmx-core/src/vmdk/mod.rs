//! VMDK disk metadata.
//!
//! `qemu-img` writes monolithicFlat images as a small text descriptor next
//! to a `-flat.vmdk` data file. This module reads that descriptor back to
//! confirm what was produced.

pub mod descriptor;

pub use descriptor::{
    flat_extent_name, parse_descriptor, read_descriptor, Extent, ExtentType, VmdkDescriptor,
};
