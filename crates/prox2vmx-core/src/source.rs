//! Proxmox VE descriptor parsing.
//!
//! Proxmox stores each QEMU guest as a flat `key: value` file under
//! `/etc/pve/qemu-server`. Lines that do not look like an attribute are
//! skipped and values are passed through untouched.

use crate::error::{Error, Result};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

/// Parsed source descriptor.
///
/// Keys keep the position of their first appearance; a repeated key
/// overwrites the earlier value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceConfig {
    entries: Vec<(String, String)>,
    index: HashMap<String, usize>,
}

impl SourceConfig {
    /// Create an empty descriptor.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse descriptor text.
    ///
    /// Each line is trimmed; empty lines and lines without a `:` are skipped.
    /// The key and value are split on the first `:` and trimmed separately.
    pub fn parse(content: &str) -> Self {
        let mut config = Self::new();

        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            if let Some((key, value)) = line.split_once(':') {
                config.insert(key.trim(), value.trim());
            }
        }

        config
    }

    /// Insert or overwrite an attribute.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
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

    /// Look up an attribute value.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.index.get(key).map(|&pos| self.entries[pos].1.as_str())
    }

    /// Whether the attribute is present.
    pub fn contains_key(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    /// Iterate attributes in source order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Number of attributes.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the descriptor has no attributes.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for SourceConfig {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut config = Self::new();
        for (key, value) in iter {
            config.insert(key, value);
        }
        config
    }
}

/// Read and parse a Proxmox VE descriptor file.
///
/// # Errors
///
/// Returns [`Error::Io`] if the file is missing or unreadable.
pub fn parse_source_config(path: &Path) -> Result<SourceConfig> {
    let content = fs::read_to_string(path).map_err(|e| Error::io(e, path))?;
    Ok(SourceConfig::parse(&content))
}
