//! prox2vmx Core Library
//!
//! This crate provides the core functionality for moving Proxmox VE QEMU
//! guests to VMware.
//!
//! # Overview
//!
//! prox2vmx translates a Proxmox VM descriptor (`/etc/pve/qemu-server/<id>.conf`)
//! into a VMX file and converts every backing disk to a monolithicFlat VMDK
//! with `qemu-img`. The main entry point is [`migrate_vm`], which handles the
//! full run.
//!
//! # Modules
//!
//! - [`error`] - Error types and Result alias
//! - [`source`] - Proxmox descriptor parsing
//! - [`guest_os`] - Guest OS identifier mapping
//! - [`mapper`] - Attribute translation into VMX keys
//! - [`vmx`] - VMX generation
//! - [`convert`] - Disk conversion with progress streaming
//! - [`vmdk`] - VMDK descriptor reading
//! - [`pve`] - Proxmox command-line services
//! - [`tool`] - External tool invocation
//! - [`migrate`] - Orchestrator coordinating a full migration
//!
//! # Quick Start
//!
//! ```no_run
//! use prox2vmx_core::{migrate_vm, MigrateOptions};
//!
//! let options = MigrateOptions::new(100);
//! migrate_vm(&options, &|_event| {}).unwrap();
//! ```

pub mod convert;
pub mod error;
pub mod guest_os;
pub mod mapper;
pub mod migrate;
pub mod pve;
pub mod source;
pub mod tool;
pub mod vmdk;
pub mod vmx;

pub use error::{Error, Result};

// Re-export the main entry points for convenience
pub use convert::{
    ConversionOutcome, ConversionProgress, ConvertedDisk, DiskConverter, DiskPathResolver,
    SkipReason,
};
pub use guest_os::GuestOsMap;
pub use mapper::{translate, ConversionTask, MapOptions, Translation};
pub use migrate::{
    execute_plan, execute_with_options, migrate_vm, plan_migration, MigrateOptions,
    MigrationEvent, MigrationPlan, MigrationReport,
};
pub use pve::{PveStorage, QemuManager, VmStatus};
pub use source::{parse_source_config, SourceConfig};
pub use tool::{ExternalTool, ToolSet};
pub use vmx::{write_vmx, VmxConfig};
