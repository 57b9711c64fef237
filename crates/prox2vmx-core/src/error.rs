//! Error types for the prox2vmx core library.

use std::path::PathBuf;

/// The main error type for prox2vmx operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O error with optional path context.
    #[error("I/O error{}: {source}", path.as_ref().map(|p| format!(" at '{}'", p.display())).unwrap_or_default())]
    Io {
        source: std::io::Error,
        path: Option<PathBuf>,
    },

    /// The VM descriptor for the requested VM does not exist.
    #[error("VM descriptor '{}' does not exist", path.display())]
    DescriptorNotFound { path: PathBuf },

    /// The storage manager could not resolve a disk reference to a path.
    #[error("failed to resolve disk '{disk_ref}': {message}")]
    Resolution { disk_ref: String, message: String },

    /// The image conversion utility exited unsuccessfully.
    ///
    /// `last_progress` is the last progress update seen; `output` holds any
    /// trailing output after it, which is where `qemu-img` prints errors.
    #[error("conversion of '{disk}' failed ({}): {output} [last progress: {last_progress}]", exit_code.map(|c| format!("exit code {c}")).unwrap_or_else(|| "terminated by signal".to_string()))]
    Conversion {
        disk: String,
        exit_code: Option<i32>,
        last_progress: String,
        output: String,
    },

    /// An external tool could not be run or reported failure.
    #[error("{program}: {message}")]
    Tool { program: String, message: String },

    /// The VM is running and cannot be converted.
    #[error("{name} is currently running. You must stop it to be converted")]
    VmRunning { vm_id: u32, name: String },

    /// Error in the conversion worker pool.
    #[error("Pipeline error: {message}")]
    Pipeline { message: String },

    /// Error reading a VMDK descriptor written by the converter.
    #[error("VMDK error: {message}")]
    Vmdk { message: String },
}

/// A specialized Result type for prox2vmx operations.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create an I/O error with path context.
    pub fn io(source: std::io::Error, path: impl Into<PathBuf>) -> Self {
        Self::Io {
            source,
            path: Some(path.into()),
        }
    }

    /// Create an I/O error without path context.
    pub fn io_simple(source: std::io::Error) -> Self {
        Self::Io { source, path: None }
    }

    /// Create a disk resolution error.
    pub fn resolution(disk_ref: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Resolution {
            disk_ref: disk_ref.into(),
            message: message.into(),
        }
    }

    /// Create an external tool error.
    pub fn tool(program: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Tool {
            program: program.into(),
            message: message.into(),
        }
    }

    /// Create a pipeline error.
    pub fn pipeline(message: impl Into<String>) -> Self {
        Self::Pipeline {
            message: message.into(),
        }
    }

    /// Create a VMDK error.
    pub fn vmdk(message: impl Into<String>) -> Self {
        Self::Vmdk {
            message: message.into(),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(source: std::io::Error) -> Self {
        Self::io_simple(source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_with_path() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err = Error::io(io_err, "/etc/pve/qemu-server/100.conf");
        let msg = err.to_string();
        assert!(msg.contains("I/O error"));
        assert!(msg.contains("/etc/pve/qemu-server/100.conf"));
    }

    #[test]
    fn test_io_error_without_path() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err = Error::io_simple(io_err);
        let msg = err.to_string();
        assert!(msg.contains("I/O error"));
        assert!(!msg.contains("at '"));
    }

    #[test]
    fn test_resolution_error() {
        let err = Error::resolution("local:100/vm-100-disk-0.qcow2", "no such volume");
        let msg = err.to_string();
        assert!(msg.contains("local:100/vm-100-disk-0.qcow2"));
        assert!(msg.contains("no such volume"));
    }

    #[test]
    fn test_conversion_error_with_exit_code() {
        let err = Error::Conversion {
            disk: "test1-sata0-disk-0.vmdk".to_string(),
            exit_code: Some(1),
            last_progress: "(42.00/100%)".to_string(),
            output: "qemu-img: error while writing".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("exit code 1"));
        assert!(msg.contains("(42.00/100%)"));
        assert!(msg.contains("error while writing"));
    }

    #[test]
    fn test_conversion_error_without_exit_code() {
        let err = Error::Conversion {
            disk: "d.vmdk".to_string(),
            exit_code: None,
            last_progress: String::new(),
            output: String::new(),
        };
        assert!(err.to_string().contains("terminated by signal"));
    }

    #[test]
    fn test_vm_running_error() {
        let err = Error::VmRunning {
            vm_id: 100,
            name: "web01".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "web01 is currently running. You must stop it to be converted"
        );
    }

    #[test]
    fn test_pipeline_error() {
        let err = Error::pipeline("failed to build thread pool");
        assert!(err.to_string().contains("Pipeline error"));
    }

    #[test]
    fn test_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "access denied");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io { path: None, .. }));
    }
}
