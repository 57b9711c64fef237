//! VMX descriptor generation.
//!
//! A VMX file is a list of `key = "value"` lines. Entries are kept in
//! insertion order so the generated file reads in the same order the
//! attributes were translated.

use crate::error::{Error, Result};
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

/// Ordered VMX key/value configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VmxConfig {
    entries: Vec<(String, String)>,
    index: HashMap<String, usize>,
}

impl VmxConfig {
    /// Create an empty configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a key, overwriting the value in place if it already exists.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.index.get(&key) {
            Some(&pos) => self.entries[pos].1 = value,
            None => {
                self.index.insert(key.clone(), self.entries.len());
                self.entries.push((key, value));
            }
        }
    }

    /// Look up a value.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.index.get(key).map(|&pos| self.entries[pos].1.as_str())
    }

    /// Whether the key is set.
    pub fn contains_key(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    /// Iterate entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no entries are set.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Render the configuration as VMX text.
    ///
    /// Values are written verbatim between double quotes. Embedded quotes
    /// are not escaped, so a value containing `"` yields a line VMware
    /// cannot read back.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for (key, value) in &self.entries {
            out.push_str(key);
            out.push_str(" = \"");
            out.push_str(value);
            out.push_str("\"\n");
        }
        out
    }

    /// Parse VMX text.
    ///
    /// Handles both quoted and unquoted values; blank lines and `#`
    /// comments are skipped.
    pub fn parse(content: &str) -> Self {
        let mut config = Self::new();

        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let value = value.trim();
            let value = value
                .strip_prefix('"')
                .and_then(|v| v.strip_suffix('"'))
                .unwrap_or(value);
            config.set(key.trim(), value);
        }

        config
    }
}

/// Write a VMX configuration to `path`, truncating any existing file.
pub fn write_vmx(config: &VmxConfig, path: &Path) -> Result<()> {
    let file = File::create(path).map_err(|e| Error::io(e, path))?;
    let mut writer = BufWriter::new(file);
    writer
        .write_all(config.render().as_bytes())
        .and_then(|_| writer.flush())
        .map_err(|e| Error::io(e, path))
}

/// Read a VMX file back into a [`VmxConfig`].
pub fn parse_vmx(path: &Path) -> Result<VmxConfig> {
    let content = fs::read_to_string(path).map_err(|e| Error::io(e, path))?;
    Ok(VmxConfig::parse(&content))
}
