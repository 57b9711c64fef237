//! Proxmox `ostype` to VMware `guestOS` mapping.

use crate::source::SourceConfig;
use std::collections::HashMap;

/// Guest OS identifier used when an `ostype` has no known counterpart.
pub const DEFAULT_GUEST_OS: &str = "other-64";

const BUILTIN_GUEST_OS: &[(&str, &str)] = &[
    ("win11", "windows2019srvNext-64"),
    ("win10", "windows2019srv-64"),
    ("win8", "windows8srv-64"),
    ("win7", "windows7srv-64"),
    ("w2k8", "longhorn-64"),
    ("wxp", "winNetEnterprise-64"),
    ("l26", "otherlinux-64"),
    ("l24", "other24xlinux-64"),
];

/// Lookup table from Proxmox `ostype` values to VMware `guestOS` values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuestOsMap {
    entries: HashMap<String, String>,
}

impl Default for GuestOsMap {
    fn default() -> Self {
        Self {
            entries: BUILTIN_GUEST_OS
                .iter()
                .map(|&(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }
}

impl GuestOsMap {
    /// Extend the built-in table with operator-supplied entries.
    ///
    /// Overrides use the same `ostype: guestOS` format as a Proxmox
    /// descriptor and replace built-in entries with the same key.
    pub fn with_overrides(mut self, overrides: &SourceConfig) -> Self {
        for (ostype, guest_os) in overrides.iter() {
            self.entries.insert(ostype.to_string(), guest_os.to_string());
        }
        self
    }

    /// Translate an `ostype`, falling back to [`DEFAULT_GUEST_OS`].
    pub fn lookup(&self, ostype: &str) -> &str {
        self.entries
            .get(ostype)
            .map(String::as_str)
            .unwrap_or(DEFAULT_GUEST_OS)
    }
}
