//! Disk image conversion.
//!
//! Each [`ConversionTask`] is resolved to a real path through the Proxmox
//! storage manager and converted to a monolithicFlat VMDK by `qemu-img`.
//! `qemu-img -p` reports progress as `\r`-terminated percentage lines on a
//! terminal; the child's stdout and stderr are merged into one pipe and every
//! `\r`-terminated chunk is forwarded as a [`ConversionProgress`].

use crate::error::{Error, Result};
use crate::mapper::ConversionTask;
use crate::tool::ExternalTool;
use crate::vmdk::{flat_extent_name, read_descriptor, VmdkDescriptor};
use std::fmt;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::process::{Child, Stdio};
use tracing::{debug, info, warn};

/// Output format passed to `qemu-img -O`.
pub const VMDK_FORMAT: &str = "vmdk";

/// Output options passed to `qemu-img -o`.
///
/// VMware expects an LSI Logic adapter, a monolithicFlat layout and
/// compat6 images; these are not configurable.
pub const VMDK_OPTIONS: &str = "adapter_type=lsilogic,subformat=monolithicFlat,compat6";

/// Adapter type requested through [`VMDK_OPTIONS`].
pub const VMDK_ADAPTER_TYPE: &str = "lsilogic";

/// Resolves a Proxmox volume identifier to a filesystem path.
pub trait DiskPathResolver {
    /// Resolve `disk_ref` (e.g. `local-lvm:vm-100-disk-0`).
    fn resolve(&self, disk_ref: &str) -> Result<PathBuf>;
}

impl<F> DiskPathResolver for F
where
    F: Fn(&str) -> Result<PathBuf>,
{
    fn resolve(&self, disk_ref: &str) -> Result<PathBuf> {
        self(disk_ref)
    }
}

/// One progress update from the converter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionProgress {
    /// Raw text between two carriage returns.
    pub text: String,
}

impl ConversionProgress {
    /// Wrap raw progress text.
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    /// Percentage parsed from `qemu-img`'s `(12.34/100%)` format.
    pub fn percent(&self) -> Option<f64> {
        let start = self.text.rfind('(')?;
        let (value, _) = self.text[start + 1..].split_once('/')?;
        value.trim().parse().ok()
    }
}

impl fmt::Display for ConversionProgress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.text.trim())
    }
}

/// Why a conversion task produced no output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// The resolved source image does not exist.
    MissingSourceFile(PathBuf),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::MissingSourceFile(path) => {
                write!(f, "missing source file {}", path.display())
            }
        }
    }
}

/// A successfully converted disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConvertedDisk {
    /// File name referenced by the VMX.
    pub file_name: String,
    /// Path of the written VMDK descriptor.
    pub path: PathBuf,
    /// Virtual capacity read back from the descriptor, if readable.
    pub capacity_bytes: Option<u64>,
}

/// Result of a single conversion task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConversionOutcome {
    /// The image was converted.
    Converted(ConvertedDisk),
    /// The task was skipped; the run continues.
    Skipped(SkipReason),
}

/// What remained on the progress stream when it closed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProgressTail {
    /// The last complete progress update.
    pub last_update: Option<ConversionProgress>,
    /// Bytes after the last carriage return. Never reported as progress.
    pub trailing: String,
}

/// Split a progress stream on carriage returns.
///
/// Every complete `\r`-terminated chunk is passed to `on_progress`. Bytes
/// left after the final `\r` are returned in [`ProgressTail::trailing`]
/// instead of being reported.
pub fn stream_progress<R: BufRead>(
    mut reader: R,
    on_progress: &mut dyn FnMut(&ConversionProgress),
) -> io::Result<ProgressTail> {
    let mut tail = ProgressTail::default();
    let mut buf = Vec::new();

    loop {
        buf.clear();
        if reader.read_until(b'\r', &mut buf)? == 0 {
            break;
        }
        if buf.last() != Some(&b'\r') {
            tail.trailing = String::from_utf8_lossy(&buf).into_owned();
            break;
        }
        buf.pop();

        let update = ConversionProgress::new(String::from_utf8_lossy(&buf));
        on_progress(&update);
        tail.last_update = Some(update);
    }

    Ok(tail)
}

/// Converts Proxmox disk images to VMDK with `qemu-img`.
#[derive(Debug, Clone)]
pub struct DiskConverter<R> {
    resolver: R,
    qemu_img: ExternalTool,
}

impl<R: DiskPathResolver> DiskConverter<R> {
    /// Create a converter using `qemu-img` from `PATH`.
    pub fn new(resolver: R) -> Self {
        Self {
            resolver,
            qemu_img: ExternalTool::new("qemu-img"),
        }
    }

    /// Use a different image conversion tool.
    pub fn with_tool(mut self, qemu_img: ExternalTool) -> Self {
        self.qemu_img = qemu_img;
        self
    }

    /// Convert one disk into `out_dir`.
    ///
    /// A source image that resolves to a nonexistent path is skipped with a
    /// warning rather than failing the run.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Resolution`] if the storage manager cannot resolve
    /// the volume and [`Error::Conversion`] if `qemu-img` exits unsuccessfully.
    pub fn convert(
        &self,
        task: &ConversionTask,
        out_dir: &Path,
        on_progress: &mut dyn FnMut(&ConversionProgress),
    ) -> Result<ConversionOutcome> {
        let source = self.resolver.resolve(&task.source_disk_ref)?;

        if !source.exists() {
            warn!("{} not found, skipping conversion", source.display());
            return Ok(ConversionOutcome::Skipped(SkipReason::MissingSourceFile(
                source,
            )));
        }

        let dest = out_dir.join(&task.destination_file_name);
        info!(
            "Converting {} → {}",
            task.source_disk_ref, task.destination_file_name
        );

        let (mut child, output) = self.spawn(&source, &dest)?;
        let tail = match stream_progress(BufReader::new(output), on_progress) {
            Ok(tail) => tail,
            Err(e) => {
                abort_child(&mut child);
                return Err(Error::tool(self.qemu_img.name(), format!("reading output: {e}")));
            }
        };
        let status = child
            .wait()
            .map_err(|e| Error::tool(self.qemu_img.name(), format!("waiting for exit: {e}")))?;

        if !status.success() {
            return Err(Error::Conversion {
                disk: task.destination_file_name.clone(),
                exit_code: status.code(),
                last_progress: tail
                    .last_update
                    .map(|p| p.to_string())
                    .unwrap_or_default(),
                output: tail.trailing.trim().to_string(),
            });
        }

        Ok(ConversionOutcome::Converted(ConvertedDisk {
            file_name: task.destination_file_name.clone(),
            capacity_bytes: written_capacity(&dest, &task.destination_file_name),
            path: dest,
        }))
    }

    /// Start `qemu-img convert` with stdout and stderr sharing one pipe.
    fn spawn(&self, source: &Path, dest: &Path) -> Result<(Child, File)> {
        let (read_end, write_end) = rustix::pipe::pipe_with(rustix::pipe::PipeFlags::CLOEXEC)
            .map_err(io::Error::from)?;
        let stderr_end = write_end.try_clone()?;

        // The command owns the parent's copies of the write end; it has to
        // be dropped before reading or the pipe never reaches EOF.
        let mut cmd = self.qemu_img.command();
        cmd.args(["convert", "-p", "-O", VMDK_FORMAT, "-o", VMDK_OPTIONS])
            .arg(source)
            .arg(dest)
            .stdin(Stdio::null())
            .stdout(Stdio::from(write_end))
            .stderr(Stdio::from(stderr_end));
        debug!("Running {:?}", cmd);
        let child = cmd
            .spawn()
            .map_err(|e| Error::tool(self.qemu_img.name(), format!("failed to run: {e}")))?;
        drop(cmd);

        Ok((child, File::from(read_end)))
    }
}

/// Kill a converter whose output can no longer be read and reap it.
fn abort_child(child: &mut Child) {
    if let Err(e) = child.kill() {
        debug!("Could not kill converter: {e}");
    }
    if let Err(e) = child.wait() {
        warn!("Could not reap converter: {e}");
    }
}

/// Differences between a written descriptor and what the converter asked for.
fn layout_mismatches(descriptor: &VmdkDescriptor, file_name: &str) -> Vec<String> {
    let mut mismatches = Vec::new();

    if descriptor.adapter_type != VMDK_ADAPTER_TYPE {
        mismatches.push(format!(
            "adapter type '{}' instead of '{VMDK_ADAPTER_TYPE}'",
            descriptor.adapter_type
        ));
    }

    let expected = flat_extent_name(file_name);
    if let Some(extent) = descriptor.extents.first() {
        if extent.filename != expected {
            mismatches.push(format!(
                "extent file '{}' instead of '{expected}'",
                extent.filename
            ));
        }
    }

    mismatches
}

/// Read the capacity of a freshly written monolithicFlat image.
fn written_capacity(dest: &Path, file_name: &str) -> Option<u64> {
    match read_descriptor(dest) {
        Ok(descriptor) if descriptor.is_monolithic_flat() => {
            for mismatch in layout_mismatches(&descriptor, file_name) {
                warn!("{}: {mismatch}", dest.display());
            }
            Some(descriptor.capacity_bytes())
        }
        Ok(descriptor) => {
            warn!(
                "{} has unexpected layout '{}'",
                dest.display(),
                descriptor.create_type
            );
            None
        }
        Err(e) => {
            warn!("Could not read converted descriptor: {e}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn collect(input: &[u8]) -> (Vec<String>, ProgressTail) {
        let mut updates = Vec::new();
        let tail = stream_progress(Cursor::new(input.to_vec()), &mut |p| {
            updates.push(p.text.clone())
        })
        .unwrap();
        (updates, tail)
    }

    #[test]
    fn test_stream_progress_splits_on_carriage_return() {
        let (updates, tail) = collect(b"    (0.00/100%)\r    (50.00/100%)\r    (100.00/100%)\r");
        assert_eq!(
            updates,
            vec!["    (0.00/100%)", "    (50.00/100%)", "    (100.00/100%)"]
        );
        assert_eq!(tail.last_update.unwrap().to_string(), "(100.00/100%)");
        assert_eq!(tail.trailing, "");
    }

    #[test]
    fn test_stream_progress_discards_trailing_partial() {
        let (updates, tail) = collect(b"(10.00/100%)\r(20.00/100%)\rqemu-img: failed\n");
        assert_eq!(updates.len(), 2);
        assert_eq!(tail.trailing, "qemu-img: failed\n");
    }

    #[test]
    fn test_stream_progress_newlines_are_not_delimiters() {
        let (updates, _) = collect(b"line one\nline two\r");
        assert_eq!(updates, vec!["line one\nline two"]);
    }

    #[test]
    fn test_stream_progress_empty() {
        let (updates, tail) = collect(b"");
        assert!(updates.is_empty());
        assert_eq!(tail, ProgressTail::default());
    }

    #[test]
    fn test_stream_progress_consecutive_carriage_returns() {
        let (updates, _) = collect(b"\r\r");
        assert_eq!(updates, vec!["", ""]);
    }

    #[test]
    fn test_progress_percent() {
        assert_eq!(ConversionProgress::new("    (42.50/100%)").percent(), Some(42.5));
        assert_eq!(ConversionProgress::new("\n(100.00/100%)").percent(), Some(100.0));
        assert_eq!(ConversionProgress::new("no progress here").percent(), None);
        assert_eq!(ConversionProgress::new("(abc/100%)").percent(), None);
    }

    #[test]
    fn test_skip_reason_display() {
        let reason = SkipReason::MissingSourceFile(PathBuf::from("/var/lib/vz/images/x.qcow2"));
        assert_eq!(
            reason.to_string(),
            "missing source file /var/lib/vz/images/x.qcow2"
        );
    }

    fn flat_descriptor(adapter_type: &str, extent_file: &str) -> VmdkDescriptor {
        crate::vmdk::parse_descriptor(&format!(
            "createType=\"monolithicFlat\"\n\
             RW 8 FLAT \"{extent_file}\" 0\n\
             ddb.adapterType = \"{adapter_type}\"\n"
        ))
        .unwrap()
    }

    #[test]
    fn test_layout_matches_request() {
        let descriptor = flat_descriptor("lsilogic", "web01-scsi0-disk-0-flat.vmdk");
        assert!(layout_mismatches(&descriptor, "web01-scsi0-disk-0.vmdk").is_empty());
    }

    #[test]
    fn test_layout_mismatches_reported() {
        let descriptor = flat_descriptor("ide", "other-flat.vmdk");
        let mismatches = layout_mismatches(&descriptor, "web01-scsi0-disk-0.vmdk");
        assert_eq!(mismatches.len(), 2);
        assert!(mismatches[0].contains("'ide'"));
        assert!(mismatches[1].contains("'web01-scsi0-disk-0-flat.vmdk'"));
    }

    #[test]
    fn test_written_capacity_despite_mismatch() {
        let dir = tempfile::TempDir::new().unwrap();
        let dest = dir.path().join("web01-scsi0-disk-0.vmdk");
        std::fs::write(
            &dest,
            "createType=\"monolithicFlat\"\nRW 2048 FLAT \"disk-flat.vmdk\" 0\n",
        )
        .unwrap();
        assert_eq!(
            written_capacity(&dest, "web01-scsi0-disk-0.vmdk"),
            Some(2048 * 512)
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_abort_child_reaps_process() {
        let mut child = std::process::Command::new("sleep")
            .arg("30")
            .spawn()
            .unwrap();
        abort_child(&mut child);
        assert!(child.try_wait().unwrap().is_some());
    }

    #[test]
    fn test_resolver_error_propagates() {
        let converter = DiskConverter::new(|disk_ref: &str| -> Result<PathBuf> {
            Err(Error::resolution(disk_ref, "storage 'local' does not exist"))
        });
        let task = ConversionTask {
            source_disk_ref: "local:100/vm-100-disk-0.qcow2".to_string(),
            destination_file_name: "vm-sata0-disk-0.vmdk".to_string(),
        };
        let err = converter
            .convert(&task, Path::new("/tmp"), &mut |_| {})
            .unwrap_err();
        assert!(matches!(err, Error::Resolution { .. }));
    }
}
