//! Migration orchestrator for Proxmox VE to VMware conversion.
//!
//! This module coordinates a full migration:
//! 1. Locate and parse the Proxmox descriptor for the VM id
//! 2. Translate it into a VMX configuration and a list of disk conversions
//! 3. Refuse to continue if the VM is running
//! 4. Convert every disk into the output directory
//! 5. Write the VMX next to the converted disks
//!
//! # Example
//!
//! ```no_run
//! use prox2vmx_core::migrate::{migrate_vm, MigrateOptions};
//!
//! let mut options = MigrateOptions::new(100);
//! options.preserve_mac = true;
//!
//! let report = migrate_vm(&options, &|_event| {}).unwrap();
//! println!("Wrote {}", report.vmx_path.display());
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{Local, NaiveDateTime};
use rand::{distr::Alphanumeric, Rng};
use rayon::prelude::*;
use tracing::info;

use crate::convert::{
    ConversionOutcome, ConversionProgress, ConvertedDisk, DiskConverter, DiskPathResolver,
    SkipReason,
};
use crate::error::{Error, Result};
use crate::guest_os::GuestOsMap;
use crate::mapper::{translate, ConversionTask, MapOptions, Translation};
use crate::pve::{PveStorage, QemuManager, VmStatus, DEFAULT_CONF_DIR};
use crate::source::parse_source_config;
use crate::tool::ToolSet;
use crate::vmx::write_vmx;

/// Length of the random suffix of a generated VM name.
const RANDOM_NAME_LEN: usize = 8;

/// Options for a migration run.
#[derive(Debug, Clone)]
pub struct MigrateOptions {
    /// Proxmox VM id.
    pub vm_id: u32,
    /// Keep the source MAC addresses.
    pub preserve_mac: bool,
    /// Directory holding `<vmid>.conf` descriptors.
    pub conf_dir: PathBuf,
    /// Directory in which the timestamped output directory is created.
    pub output_root: PathBuf,
    /// Number of disks converted concurrently (0 or 1 = sequential).
    pub jobs: usize,
    /// Guest OS lookup table.
    pub guest_os: GuestOsMap,
    /// External tools.
    pub tools: ToolSet,
}

impl MigrateOptions {
    /// Default options for `vm_id`.
    pub fn new(vm_id: u32) -> Self {
        Self {
            vm_id,
            preserve_mac: false,
            conf_dir: PathBuf::from(DEFAULT_CONF_DIR),
            output_root: PathBuf::from("."),
            jobs: 1,
            guest_os: GuestOsMap::default(),
            tools: ToolSet::default(),
        }
    }

    /// `qm`-backed running-state check.
    pub fn vm_status(&self) -> QemuManager {
        QemuManager::new(self.tools.qm.clone())
    }

    /// Converter resolving volumes with `pvesm` and converting with `qemu-img`.
    pub fn disk_converter(&self) -> DiskConverter<PveStorage> {
        DiskConverter::new(PveStorage::new(self.tools.pvesm.clone()))
            .with_tool(self.tools.qemu_img.clone())
    }
}

/// A translated VM, ready to be converted.
#[derive(Debug, Clone)]
pub struct MigrationPlan {
    /// Proxmox VM id.
    pub vm_id: u32,
    /// VM name, generated if the descriptor has none.
    pub name: String,
    /// Source descriptor path.
    pub descriptor: PathBuf,
    /// Output directory for the VMX and disks.
    pub output_dir: PathBuf,
    /// Generated configuration and disk tasks.
    pub translation: Translation,
}

impl MigrationPlan {
    /// Path of the VMX file written at the end of the run.
    pub fn vmx_path(&self) -> PathBuf {
        self.output_dir.join(format!("{}.vmx", self.name))
    }
}

/// Progress notification emitted during [`execute_plan`].
///
/// `index` is the position of the task in the plan; with parallel
/// conversion, events from different tasks interleave but each task's
/// progress stays separate.
#[derive(Debug, Clone, Copy)]
pub enum MigrationEvent<'a> {
    /// A conversion is about to start.
    TaskStarted {
        index: usize,
        total: usize,
        task: &'a ConversionTask,
    },
    /// `qemu-img` reported progress.
    Progress {
        index: usize,
        progress: &'a ConversionProgress,
    },
    /// A conversion finished.
    TaskFinished {
        index: usize,
        disk: &'a ConvertedDisk,
    },
    /// A conversion was skipped.
    TaskSkipped {
        index: usize,
        reason: &'a SkipReason,
    },
}

/// Type alias for the migration event callback.
pub type EventCallback<'a> = &'a (dyn Fn(MigrationEvent<'_>) + Sync);

/// Summary of a completed migration.
#[derive(Debug, Clone)]
pub struct MigrationReport {
    /// VM name.
    pub name: String,
    /// Output directory.
    pub output_dir: PathBuf,
    /// Written VMX file.
    pub vmx_path: PathBuf,
    /// Disks converted successfully.
    pub converted: Vec<ConvertedDisk>,
    /// Disks that were skipped, with the reason.
    pub skipped: Vec<(ConversionTask, SkipReason)>,
}

/// Path of the descriptor for `vm_id` inside `conf_dir`.
pub fn descriptor_path(conf_dir: &Path, vm_id: u32) -> PathBuf {
    conf_dir.join(format!("{vm_id}.conf"))
}

/// Name used when the descriptor has no `name` attribute.
pub fn fallback_name(vm_id: u32) -> String {
    let suffix: String = rand::rng()
        .sample_iter(&Alphanumeric)
        .take(RANDOM_NAME_LEN)
        .map(char::from)
        .collect();
    format!("vm-{vm_id}-{suffix}")
}

/// Output directory name: `<name>_<YYYY-MM-DD_HHMM>`.
pub fn output_dir_name(name: &str, now: &NaiveDateTime) -> String {
    format!("{name}_{}", now.format("%Y-%m-%d_%H%M"))
}

/// Parse and translate the descriptor of `options.vm_id`.
///
/// Performs no conversion and writes nothing.
pub fn plan_migration(options: &MigrateOptions) -> Result<MigrationPlan> {
    let descriptor = descriptor_path(&options.conf_dir, options.vm_id);
    if !descriptor.exists() {
        return Err(Error::DescriptorNotFound { path: descriptor });
    }

    let mut source = parse_source_config(&descriptor)?;
    let name = match source.get("name").filter(|name| !name.is_empty()) {
        Some(name) => name.to_string(),
        None => {
            let name = fallback_name(options.vm_id);
            source.insert("name", name.as_str());
            name
        }
    };

    let map_options = MapOptions {
        preserve_mac: options.preserve_mac,
        guest_os: options.guest_os.clone(),
    };
    let translation = translate(&source, &map_options);
    let output_dir = options
        .output_root
        .join(output_dir_name(&name, &Local::now().naive_local()));

    Ok(MigrationPlan {
        vm_id: options.vm_id,
        name,
        descriptor,
        output_dir,
        translation,
    })
}

/// Run a full migration with the Proxmox tools from `options.tools`.
pub fn migrate_vm(
    options: &MigrateOptions,
    on_event: EventCallback<'_>,
) -> Result<MigrationReport> {
    let plan = plan_migration(options)?;
    execute_with_options(&plan, options, on_event)
}

/// Run an already computed plan with the Proxmox tools from `options.tools`.
pub fn execute_with_options(
    plan: &MigrationPlan,
    options: &MigrateOptions,
    on_event: EventCallback<'_>,
) -> Result<MigrationReport> {
    execute_plan(
        plan,
        &options.vm_status(),
        &options.disk_converter(),
        options.jobs,
        on_event,
    )
}

/// Convert the disks of a plan and write its VMX.
///
/// The VMX is only written once every conversion has either succeeded or
/// been skipped; any error aborts the run before that.
///
/// # Errors
///
/// Returns [`Error::VmRunning`] if the VM is running, and any resolution,
/// conversion or I/O error encountered along the way.
pub fn execute_plan<S, R>(
    plan: &MigrationPlan,
    status: &S,
    converter: &DiskConverter<R>,
    jobs: usize,
    on_event: EventCallback<'_>,
) -> Result<MigrationReport>
where
    S: VmStatus + ?Sized,
    R: DiskPathResolver + Sync,
{
    if status.is_running(plan.vm_id)? {
        return Err(Error::VmRunning {
            vm_id: plan.vm_id,
            name: plan.name.clone(),
        });
    }

    fs::create_dir_all(&plan.output_dir).map_err(|e| Error::io(e, &plan.output_dir))?;
    info!("Starting conversion {}", plan.name);

    let tasks = &plan.translation.tasks;
    let outcomes = run_tasks(converter, tasks, &plan.output_dir, jobs, on_event)?;

    let mut converted = Vec::new();
    let mut skipped = Vec::new();
    for (task, outcome) in tasks.iter().zip(outcomes) {
        match outcome {
            ConversionOutcome::Converted(disk) => converted.push(disk),
            ConversionOutcome::Skipped(reason) => skipped.push((task.clone(), reason)),
        }
    }

    let vmx_path = plan.vmx_path();
    write_vmx(&plan.translation.vmx, &vmx_path)?;

    Ok(MigrationReport {
        name: plan.name.clone(),
        output_dir: plan.output_dir.clone(),
        vmx_path,
        converted,
        skipped,
    })
}

/// Run conversion tasks, sequentially or on a rayon pool of `jobs` threads.
fn run_tasks<R>(
    converter: &DiskConverter<R>,
    tasks: &[ConversionTask],
    out_dir: &Path,
    jobs: usize,
    on_event: EventCallback<'_>,
) -> Result<Vec<ConversionOutcome>>
where
    R: DiskPathResolver + Sync,
{
    let total = tasks.len();
    let run = |index: usize, task: &ConversionTask| -> Result<ConversionOutcome> {
        on_event(MigrationEvent::TaskStarted { index, total, task });
        let outcome = converter.convert(task, out_dir, &mut |progress| {
            on_event(MigrationEvent::Progress { index, progress })
        })?;
        match &outcome {
            ConversionOutcome::Converted(disk) => {
                on_event(MigrationEvent::TaskFinished { index, disk })
            }
            ConversionOutcome::Skipped(reason) => {
                on_event(MigrationEvent::TaskSkipped { index, reason })
            }
        }
        Ok(outcome)
    };

    if jobs <= 1 || total <= 1 {
        return tasks
            .iter()
            .enumerate()
            .map(|(index, task)| run(index, task))
            .collect();
    }

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(jobs.min(total))
        .build()
        .map_err(|e| Error::pipeline(format!("failed to build thread pool: {e}")))?;
    pool.install(|| {
        tasks
            .par_iter()
            .enumerate()
            .map(|(index, task)| run(index, task))
            .collect()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_migrate_options_new() {
        let options = MigrateOptions::new(100);
        assert_eq!(options.vm_id, 100);
        assert!(!options.preserve_mac);
        assert_eq!(options.conf_dir, PathBuf::from("/etc/pve/qemu-server"));
        assert_eq!(options.jobs, 1);
    }

    #[test]
    fn test_descriptor_path() {
        assert_eq!(
            descriptor_path(Path::new("/etc/pve/qemu-server"), 104),
            PathBuf::from("/etc/pve/qemu-server/104.conf")
        );
    }

    #[test]
    fn test_fallback_name() {
        let name = fallback_name(100);
        let suffix = name.strip_prefix("vm-100-").unwrap();
        assert_eq!(suffix.len(), RANDOM_NAME_LEN);
        assert!(suffix.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn test_output_dir_name() {
        let now = NaiveDate::from_ymd_opt(2024, 3, 7)
            .unwrap()
            .and_hms_opt(9, 5, 59)
            .unwrap();
        assert_eq!(output_dir_name("web01", &now), "web01_2024-03-07_0905");
    }

    #[test]
    fn test_plan_vmx_path() {
        let plan = MigrationPlan {
            vm_id: 1,
            name: "web01".to_string(),
            descriptor: PathBuf::from("/etc/pve/qemu-server/1.conf"),
            output_dir: PathBuf::from("out"),
            translation: Translation {
                vmx: Default::default(),
                tasks: Vec::new(),
            },
        };
        assert_eq!(plan.vmx_path(), PathBuf::from("out/web01.vmx"));
    }
}
