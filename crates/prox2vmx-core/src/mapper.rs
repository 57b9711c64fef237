//! Proxmox to VMware attribute translation.
//!
//! [`translate`] turns a parsed Proxmox descriptor into a [`VmxConfig`] and
//! the list of disk images that have to be converted alongside it. The
//! translation is pure: it performs no I/O and never fails. Malformed input
//! degrades to defaults rather than erroring.

use crate::guest_os::GuestOsMap;
use crate::source::SourceConfig;
use crate::vmx::VmxConfig;
use regex::Regex;
use std::sync::LazyLock;

/// VMware virtual hardware version of the generated VM.
pub const VIRTUAL_HW_VERSION: &str = "19";

/// VMX configuration format version.
pub const CONFIG_VERSION: &str = "8";

/// SCSI adapter model pinned whenever a SCSI disk is present.
pub const SCSI_VIRTUAL_DEV: &str = "lsilogic";

/// Extension of converted disk images.
pub const DISK_EXTENSION: &str = "vmdk";

/// Image formats `qemu-img` is asked to convert.
const CONVERTIBLE_EXTENSIONS: &[&str] = &[".qcow2", ".vmdk", ".raw"];

/// Prefix of an empty CD-ROM drive entry.
const EMPTY_CDROM: &str = "none,media=cdrom";

static DISK_KEY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(sata|scsi|efidisk)\d").expect("valid disk key regex"));
static SCSI_KEY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^scsi\d").expect("valid scsi key regex"));
static NET_KEY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^net\d").expect("valid net key regex"));
static NIC_MAC: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:virtio|e1000|e1000e|vmxnet3|rtl8139)=([^,]+)").expect("valid mac regex")
});
static NIC_BRIDGE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"bridge=([^,]+)").expect("valid bridge regex"));

/// Options controlling the translation.
#[derive(Debug, Clone, Default)]
pub struct MapOptions {
    /// Carry the source MAC addresses over as static addresses.
    pub preserve_mac: bool,
    /// Guest OS lookup table.
    pub guest_os: GuestOsMap,
}

impl MapOptions {
    /// Options with the built-in guest OS table.
    pub fn new(preserve_mac: bool) -> Self {
        Self {
            preserve_mac,
            guest_os: GuestOsMap::default(),
        }
    }
}

/// A disk image that must be converted for the VMX to be usable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionTask {
    /// Proxmox volume identifier (e.g. `local:100/vm-100-disk-0.qcow2`).
    pub source_disk_ref: String,
    /// File name of the VMDK referenced by the VMX.
    pub destination_file_name: String,
}

/// Output of [`translate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Translation {
    /// Generated VMX configuration.
    pub vmx: VmxConfig,
    /// Disk conversions required by the configuration, in source order.
    pub tasks: Vec<ConversionTask>,
}

/// Destination storage controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Controller {
    /// `sata0`.
    Sata,
    /// `scsi0`.
    Scsi,
}

impl Controller {
    /// VMX device name of the controller.
    pub fn device(self) -> &'static str {
        match self {
            Controller::Sata => "sata0",
            Controller::Scsi => "scsi0",
        }
    }

    fn for_source_key(key: &str) -> Self {
        if SCSI_KEY.is_match(key) {
            Controller::Scsi
        } else {
            Controller::Sata
        }
    }
}

/// Per-controller slot allocation.
///
/// Slots are dense and zero-based in discovery order, independent of the
/// numeric suffix of the source key.
#[derive(Debug, Default)]
struct SlotCounter {
    sata: u32,
    scsi: u32,
}

impl SlotCounter {
    fn next(&mut self, controller: Controller) -> u32 {
        let counter = match controller {
            Controller::Sata => &mut self.sata,
            Controller::Scsi => &mut self.scsi,
        };
        let slot = *counter;
        *counter += 1;
        slot
    }
}

/// Translate a Proxmox descriptor into a VMX configuration.
///
/// The caller is expected to have filled in `name`; it becomes the display
/// name and the stem of every generated disk file name.
pub fn translate(source: &SourceConfig, options: &MapOptions) -> Translation {
    let mut vmx = VmxConfig::new();
    let mut tasks = Vec::new();
    let vm_name = source.get("name").unwrap_or_default();

    vmx.set(".encoding", "UTF-8");
    vmx.set("displayName", vm_name);
    vmx.set("numvcpus", source.get("cores").unwrap_or("1"));
    vmx.set("memsize", source.get("memory").unwrap_or("4096"));
    vmx.set(
        "guestOS",
        options.guest_os.lookup(source.get("ostype").unwrap_or_default()),
    );
    vmx.set("tools.syncTime", "TRUE");
    vmx.set("virtualHW.version", VIRTUAL_HW_VERSION);
    vmx.set("config.version", CONFIG_VERSION);

    if source.get("bios") == Some("ovmf") || source.contains_key("efidisk0") {
        vmx.set("firmware", "efi");
        vmx.set("efi.present", "TRUE");
    }

    if let Some(uuid) = source.get("smbios1").and_then(bios_uuid) {
        vmx.set("uuid.bios", uuid);
    }

    let mut slots = SlotCounter::default();

    for (key, entry) in source.iter() {
        if DISK_KEY.is_match(key) {
            if let Some(task) = map_disk(&mut vmx, &mut slots, vm_name, key, entry) {
                tasks.push(task);
            }
        }

        if NET_KEY.is_match(key) {
            map_nic(&mut vmx, key, entry, options.preserve_mac);
        }
    }

    Translation { vmx, tasks }
}

/// Extract the `uuid=` component of an `smbios1` value.
fn bios_uuid(smbios: &str) -> Option<&str> {
    let (_, rest) = smbios.split_once("uuid=")?;
    Some(rest.split(',').next().unwrap_or(rest))
}

fn map_disk(
    vmx: &mut VmxConfig,
    slots: &mut SlotCounter,
    vm_name: &str,
    key: &str,
    entry: &str,
) -> Option<ConversionTask> {
    if entry.starts_with(EMPTY_CDROM) {
        return None;
    }

    let controller = Controller::for_source_key(key);
    let dev = controller.device();
    if controller == Controller::Scsi {
        vmx.set("scsi0.virtualDev", SCSI_VIRTUAL_DEV);
    }
    vmx.set(format!("{dev}.present"), "TRUE");

    let slot = slots.next(controller);
    let file_name = format!("{vm_name}-{dev}-disk-{slot}.{DISK_EXTENSION}");
    vmx.set(format!("{dev}:{slot}.present"), "TRUE");
    vmx.set(format!("{dev}:{slot}.fileName"), file_name.as_str());

    let disk_ref = entry.split(',').next().unwrap_or(entry);
    CONVERTIBLE_EXTENSIONS
        .iter()
        .any(|ext| disk_ref.contains(ext))
        .then(|| ConversionTask {
            source_disk_ref: disk_ref.to_string(),
            destination_file_name: file_name,
        })
}

fn map_nic(vmx: &mut VmxConfig, key: &str, entry: &str, preserve_mac: bool) {
    let nic = format!("ethernet{}", nic_index(key));

    let mac = NIC_MAC
        .captures(entry)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
        .unwrap_or_default();
    let bridge = NIC_BRIDGE
        .captures(entry)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
        .unwrap_or("unknown");

    vmx.set(format!("{nic}.addressType"), "vpx");
    vmx.set(format!("{nic}.present"), "TRUE");
    vmx.set(format!("{nic}.networkName"), bridge);

    if preserve_mac {
        vmx.set(format!("{nic}.address"), mac);
        vmx.set(format!("{nic}.addressType"), "static");
    }
}

/// Interface index formed by the digits of a `net<N>` key.
fn nic_index(key: &str) -> String {
    let digits: String = key.chars().filter(char::is_ascii_digit).collect();
    digits
        .parse::<u64>()
        .map(|n| n.to_string())
        .unwrap_or(digits)
}
