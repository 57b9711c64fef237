//! External command-line tools.
//!
//! Every tool is described by a program plus leading arguments so that a
//! wrapper (`ssh host pvesm`, a test script under `sh -c`) can stand in for
//! the real binary.

use crate::error::{Error, Result};
use std::ffi::{OsStr, OsString};
use std::process::{Command, Output, Stdio};
use tracing::debug;

/// A program invoked as a child process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalTool {
    program: OsString,
    args: Vec<OsString>,
}

impl ExternalTool {
    /// Describe a tool by program name or path.
    pub fn new(program: impl Into<OsString>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Arguments placed before the ones the caller supplies.
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Program name for diagnostics.
    pub fn name(&self) -> String {
        self.program.to_string_lossy().into_owned()
    }

    /// Build a command with the leading arguments applied.
    pub fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        cmd
    }

    /// Run the tool to completion, capturing stdout and stderr.
    ///
    /// Only a failure to start the process is an error here; the caller
    /// decides what a non-zero exit status means.
    pub fn output<I, S>(&self, args: I) -> Result<Output>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut cmd = self.command();
        cmd.args(args).stdin(Stdio::null());
        debug!("Running {:?}", cmd);
        cmd.output()
            .map_err(|e| Error::tool(self.name(), format!("failed to run: {e}")))
    }
}

/// The Proxmox and QEMU tools a migration shells out to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolSet {
    /// Storage manager, used as `pvesm path <volume>`.
    pub pvesm: ExternalTool,
    /// VM manager, used as `qm status <vmid>`.
    pub qm: ExternalTool,
    /// Image converter, used as `qemu-img convert ...`.
    pub qemu_img: ExternalTool,
}

impl Default for ToolSet {
    fn default() -> Self {
        Self {
            pvesm: ExternalTool::new("pvesm"),
            qm: ExternalTool::new("qm"),
            qemu_img: ExternalTool::new("qemu-img"),
        }
    }
}
