//! Integration tests for disk conversion.
//!
//! `qemu-img` is replaced with small `sh -c` scripts that mimic its
//! progress output and exit codes.

#![cfg(unix)]

use prox2vmx_core::convert::{
    ConversionOutcome, ConversionProgress, DiskConverter, SkipReason, VMDK_OPTIONS,
};
use prox2vmx_core::mapper::ConversionTask;
use prox2vmx_core::{Error, ExternalTool, Result};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Fake `qemu-img` that records its arguments, reports progress and writes
/// a monolithicFlat descriptor to the destination (`$8`).
const FAKE_QEMU_IMG: &str = r#"
printf '%s\n' "$@" > "$(dirname "$8")/qemu-img.args"
printf '    (0.00/100%%)\r    (50.00/100%%)\r'
printf '    (100.00/100%%)\r' >&2
printf 'createType="monolithicFlat"\nRW 2048 FLAT "disk-flat.vmdk" 0\n' > "$8"
"#;

fn qemu_img(script: &str) -> ExternalTool {
    ExternalTool::new("sh").with_args(["-c", script, "qemu-img"])
}

fn fixed_path(path: PathBuf) -> impl Fn(&str) -> Result<PathBuf> {
    move |_disk_ref: &str| Ok(path.clone())
}

fn task() -> ConversionTask {
    ConversionTask {
        source_disk_ref: "local:100/vm-100-disk-0.qcow2".to_string(),
        destination_file_name: "web01-sata0-disk-0.vmdk".to_string(),
    }
}

fn source_image(dir: &Path) -> PathBuf {
    let path = dir.join("vm-100-disk-0.qcow2");
    std::fs::write(&path, b"QFI\xfb").unwrap();
    path
}

#[test]
fn test_convert_streams_progress() {
    let dir = TempDir::new().unwrap();
    let converter =
        DiskConverter::new(fixed_path(source_image(dir.path()))).with_tool(qemu_img(FAKE_QEMU_IMG));

    let mut updates: Vec<ConversionProgress> = Vec::new();
    let outcome = converter
        .convert(&task(), dir.path(), &mut |p| updates.push(p.clone()))
        .expect("conversion should succeed");

    let percents: Vec<Option<f64>> = updates.iter().map(|p| p.percent()).collect();
    assert_eq!(percents, vec![Some(0.0), Some(50.0), Some(100.0)]);

    match outcome {
        ConversionOutcome::Converted(disk) => {
            assert_eq!(disk.file_name, "web01-sata0-disk-0.vmdk");
            assert_eq!(disk.path, dir.path().join("web01-sata0-disk-0.vmdk"));
            assert_eq!(disk.capacity_bytes, Some(2048 * 512));
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
}

#[test]
fn test_convert_passes_fixed_options() {
    let dir = TempDir::new().unwrap();
    let source = source_image(dir.path());
    let converter =
        DiskConverter::new(fixed_path(source.clone())).with_tool(qemu_img(FAKE_QEMU_IMG));
    converter.convert(&task(), dir.path(), &mut |_| {}).unwrap();

    let args = std::fs::read_to_string(dir.path().join("qemu-img.args")).unwrap();
    let args: Vec<&str> = args.lines().collect();
    let dest = dir.path().join("web01-sata0-disk-0.vmdk");
    assert_eq!(
        args,
        vec![
            "convert",
            "-p",
            "-O",
            "vmdk",
            "-o",
            "adapter_type=lsilogic,subformat=monolithicFlat,compat6",
            source.to_str().unwrap(),
            dest.to_str().unwrap(),
        ]
    );
    assert_eq!(VMDK_OPTIONS, args[5]);
}

#[test]
fn test_missing_source_is_skipped() {
    let dir = TempDir::new().unwrap();
    let missing = dir.path().join("gone.qcow2");
    let converter = DiskConverter::new(fixed_path(missing.clone()))
        .with_tool(ExternalTool::new("/nonexistent/qemu-img"));

    let outcome = converter
        .convert(&task(), dir.path(), &mut |_| panic!("no progress expected"))
        .expect("missing source is not fatal");

    assert_eq!(
        outcome,
        ConversionOutcome::Skipped(SkipReason::MissingSourceFile(missing))
    );
    assert!(!dir.path().join("web01-sata0-disk-0.vmdk").exists());
}

#[test]
fn test_converter_failure() {
    let dir = TempDir::new().unwrap();
    let script = r#"
printf '    (12.00/100%%)\r'
echo "qemu-img: error while writing sector 4096: No space left on device" >&2
exit 1
"#;
    let converter =
        DiskConverter::new(fixed_path(source_image(dir.path()))).with_tool(qemu_img(script));

    let err = converter
        .convert(&task(), dir.path(), &mut |_| {})
        .unwrap_err();
    match err {
        Error::Conversion {
            disk,
            exit_code,
            last_progress,
            output,
        } => {
            assert_eq!(disk, "web01-sata0-disk-0.vmdk");
            assert_eq!(exit_code, Some(1));
            assert_eq!(last_progress, "(12.00/100%)");
            assert!(output.contains("No space left on device"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn test_trailing_output_is_not_progress() {
    let dir = TempDir::new().unwrap();
    let script = r#"
printf '(100.00/100%%)\r'
printf 'createType="monolithicFlat"\nRW 8 FLAT "d-flat.vmdk" 0\n' > "$8"
printf 'done\n'
"#;
    let converter =
        DiskConverter::new(fixed_path(source_image(dir.path()))).with_tool(qemu_img(script));

    let mut updates = Vec::new();
    converter
        .convert(&task(), dir.path(), &mut |p| updates.push(p.text.clone()))
        .unwrap();
    assert_eq!(updates, vec!["(100.00/100%)"]);
}

#[test]
fn test_unexpected_layout_has_no_capacity() {
    let dir = TempDir::new().unwrap();
    let converter = DiskConverter::new(fixed_path(source_image(dir.path())))
        .with_tool(qemu_img("exit 0"));

    let outcome = converter.convert(&task(), dir.path(), &mut |_| {}).unwrap();
    match outcome {
        ConversionOutcome::Converted(disk) => assert_eq!(disk.capacity_bytes, None),
        other => panic!("unexpected outcome: {other:?}"),
    }
}

#[test]
fn test_missing_converter_binary() {
    let dir = TempDir::new().unwrap();
    let converter = DiskConverter::new(fixed_path(source_image(dir.path())))
        .with_tool(ExternalTool::new("/nonexistent/qemu-img"));

    let err = converter
        .convert(&task(), dir.path(), &mut |_| {})
        .unwrap_err();
    assert!(matches!(err, Error::Tool { .. }));
}
