//! Proxmox VE command-line services.

use crate::convert::DiskPathResolver;
use crate::error::{Error, Result};
use crate::tool::ExternalTool;
use std::path::PathBuf;

/// Default directory holding QEMU guest descriptors.
pub const DEFAULT_CONF_DIR: &str = "/etc/pve/qemu-server";

/// Storage path resolution through `pvesm path`.
#[derive(Debug, Clone)]
pub struct PveStorage {
    pvesm: ExternalTool,
}

impl PveStorage {
    /// Wrap a `pvesm` tool.
    pub fn new(pvesm: ExternalTool) -> Self {
        Self { pvesm }
    }
}

impl Default for PveStorage {
    fn default() -> Self {
        Self::new(ExternalTool::new("pvesm"))
    }
}

impl DiskPathResolver for PveStorage {
    fn resolve(&self, disk_ref: &str) -> Result<PathBuf> {
        let output = self.pvesm.output(["path", disk_ref])?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::resolution(disk_ref, stderr.trim()));
        }

        let path = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if path.is_empty() {
            return Err(Error::resolution(disk_ref, "pvesm returned an empty path"));
        }
        Ok(PathBuf::from(path))
    }
}

/// Reports whether a VM is running.
pub trait VmStatus {
    /// `true` unless the VM is known to be stopped.
    fn is_running(&self, vm_id: u32) -> Result<bool>;
}

/// VM state through `qm status`.
#[derive(Debug, Clone)]
pub struct QemuManager {
    qm: ExternalTool,
}

impl QemuManager {
    /// Wrap a `qm` tool.
    pub fn new(qm: ExternalTool) -> Self {
        Self { qm }
    }
}

impl Default for QemuManager {
    fn default() -> Self {
        Self::new(ExternalTool::new("qm"))
    }
}

impl VmStatus for QemuManager {
    fn is_running(&self, vm_id: u32) -> Result<bool> {
        let output = self.qm.output(["status", &vm_id.to_string()])?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::tool(self.qm.name(), stderr.trim()));
        }

        let status = String::from_utf8_lossy(&output.stdout);
        Ok(!status.contains("stopped"))
    }
}
