//! prox2vmx CLI - Convert Proxmox VE VMs to VMware VMX format.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use prox2vmx_core::migrate::{execute_with_options, plan_migration, MigrationPlan};
use prox2vmx_core::pve::DEFAULT_CONF_DIR;
use prox2vmx_core::{
    parse_source_config, GuestOsMap, MigrateOptions, MigrationEvent, MigrationReport,
};

/// Convert a Proxmox VE VM into a VMware VMX with VMDK disks.
#[derive(Parser)]
#[command(name = "prox2vmx")]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Convert a stopped VM and its disks.
    Convert {
        #[command(flatten)]
        vm: VmArgs,

        /// Directory in which the timestamped output directory is created.
        #[arg(short, long, default_value = ".")]
        output: PathBuf,

        /// Number of disks to convert concurrently.
        #[arg(short, long, default_value = "1")]
        jobs: usize,

        /// Suppress progress output.
        #[arg(short, long)]
        quiet: bool,
    },

    /// Show the VMX and disk conversions that would be produced.
    Info {
        #[command(flatten)]
        vm: VmArgs,
    },
}

/// Arguments selecting and translating a VM.
#[derive(Args)]
struct VmArgs {
    /// ID of the VM to convert.
    vm_id: u32,

    /// Preserve the original MAC addresses in the VMX file.
    #[arg(long)]
    preserve_mac: bool,

    /// Directory containing the Proxmox VM descriptors.
    #[arg(long, default_value = DEFAULT_CONF_DIR)]
    conf_dir: PathBuf,

    /// Extra `ostype: guestOS` mappings overriding the built-in table.
    #[arg(long, value_name = "FILE")]
    guest_os_map: Option<PathBuf>,
}

impl VmArgs {
    fn to_options(&self) -> Result<MigrateOptions> {
        let mut options = MigrateOptions::new(self.vm_id);
        options.preserve_mac = self.preserve_mac;
        options.conf_dir = self.conf_dir.clone();
        if let Some(path) = &self.guest_os_map {
            let overrides = parse_source_config(path)
                .with_context(|| format!("Reading guest OS map {}", path.display()))?;
            tracing::debug!(entries = overrides.len(), "Loaded guest OS overrides");
            options.guest_os = GuestOsMap::default().with_overrides(&overrides);
        }
        Ok(options)
    }
}

fn install_tracing() {
    use tracing_error::ErrorLayer;
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    let fmt_layer = fmt::layer().with_target(false).with_writer(std::io::stderr);
    let filter_layer = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .with(ErrorLayer::default())
        .init();
}

fn main() -> Result<()> {
    install_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::Convert {
            vm,
            output,
            jobs,
            quiet,
        } => {
            let mut options = vm.to_options()?;
            options.output_root = output;
            options.jobs = jobs;
            run_convert(&options, quiet)?;
        }
        Commands::Info { vm } => {
            show_info(&vm.to_options()?)?;
        }
    }

    Ok(())
}

fn run_convert(options: &MigrateOptions, quiet: bool) -> Result<()> {
    let plan = plan_migration(options)?;

    if !quiet {
        print_summary(&plan);
        println!("Output:    {}", plan.output_dir.display());
        println!();
    }

    let progress = (!quiet).then(DiskProgress::new);
    let on_event = |event: MigrationEvent<'_>| {
        if let Some(progress) = &progress {
            progress.handle(event);
        }
    };

    let report = execute_with_options(&plan, options, &on_event)?;

    if !quiet {
        print_report(&report);
    }

    Ok(())
}

fn show_info(options: &MigrateOptions) -> Result<()> {
    let plan = plan_migration(options)?;

    println!("VM Information");
    println!("==============");
    println!();
    print_summary(&plan);
    println!();

    if plan.translation.tasks.is_empty() {
        println!("Disks:     None");
    } else {
        println!("Disks:");
        for (i, task) in plan.translation.tasks.iter().enumerate() {
            println!(
                "  {}. {} → {}",
                i + 1,
                task.source_disk_ref,
                task.destination_file_name
            );
        }
    }
    println!();

    println!("{}:", display_path(&plan.vmx_path()));
    print!("{}", plan.translation.vmx.render());

    Ok(())
}

fn print_summary(plan: &MigrationPlan) {
    let vmx = &plan.translation.vmx;
    println!("Name:      {}", plan.name);
    println!("Source:    {}", plan.descriptor.display());
    println!("Guest OS:  {}", vmx.get("guestOS").unwrap_or_default());
    println!("CPUs:      {}", vmx.get("numvcpus").unwrap_or_default());
    println!("Memory:    {} MB", vmx.get("memsize").unwrap_or_default());
    println!("Firmware:  {}", vmx.get("firmware").unwrap_or("bios"));
}

fn print_report(report: &MigrationReport) {
    println!();
    for disk in &report.converted {
        match disk.capacity_bytes {
            Some(bytes) => println!("Converted: {} ({})", disk.file_name, format_bytes(bytes)),
            None => println!("Converted: {}", disk.file_name),
        }
    }
    for (task, reason) in &report.skipped {
        println!("Skipped:   {} ({})", task.destination_file_name, reason);
    }
    println!();
    println!("Conversion successful: {}", report.name);
    println!("VMX:       {}", display_path(&report.vmx_path));
}

/// One progress bar per disk being converted.
struct DiskProgress {
    multi: MultiProgress,
    style: ProgressStyle,
    bars: Mutex<HashMap<usize, ProgressBar>>,
}

impl DiskProgress {
    fn new() -> Self {
        let style = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos:>3}% {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-");
        Self {
            multi: MultiProgress::new(),
            style,
            bars: Mutex::new(HashMap::new()),
        }
    }

    fn handle(&self, event: MigrationEvent<'_>) {
        let Ok(mut bars) = self.bars.lock() else {
            return;
        };

        match event {
            MigrationEvent::TaskStarted { index, total, task } => {
                let pb = self.multi.add(ProgressBar::new(100));
                pb.set_style(self.style.clone());
                pb.set_message(format!(
                    "[{}/{}] {}",
                    index + 1,
                    total,
                    task.destination_file_name
                ));
                bars.insert(index, pb);
            }
            MigrationEvent::Progress { index, progress } => {
                if let (Some(pb), Some(percent)) = (bars.get(&index), progress.percent()) {
                    pb.set_position(percent.clamp(0.0, 100.0) as u64);
                }
            }
            MigrationEvent::TaskFinished { index, .. } => {
                if let Some(pb) = bars.remove(&index) {
                    pb.set_position(100);
                    pb.finish();
                }
            }
            MigrationEvent::TaskSkipped { index, reason } => {
                if let Some(pb) = bars.remove(&index) {
                    pb.abandon_with_message(format!("skipped: {reason}"));
                }
            }
        }
    }
}

/// Format bytes as human-readable string.
fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;
    const TB: u64 = GB * 1024;

    if bytes >= TB {
        format!("{:.2} TB", bytes as f64 / TB as f64)
    } else if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

/// Show a path relative to the working directory when possible.
fn display_path(path: &Path) -> String {
    path.strip_prefix(".").unwrap_or(path).display().to_string()
}
