//! Platform hardware inventory.
//!
//! [`HardwareProbe`] is the only platform-specific part of fingerprinting.
//! Every query is independently fallible and returns `None` rather than an
//! error; the weighting and hashing in [`crate::fingerprint`] never look at
//! how a value was obtained.
//!
//! Queries are synchronous and have no timeout. Callers on an async runtime
//! should run them on a blocking thread.

use std::collections::BTreeMap;
use std::sync::RwLock;

use crate::fingerprint::{HardwareComponent, HardwareComponentSet};

/// Source of raw hardware identity values.
pub trait HardwareProbe: Send + Sync {
    /// Raw value for one component, or `None` if it cannot be read.
    fn query(&self, component: HardwareComponent) -> Option<String>;
}

/// Fixed component values.
///
/// Useful for tests and for embedders that collect hardware data
/// themselves. Values can be replaced at runtime to simulate drift.
#[derive(Debug, Default)]
pub struct StaticProbe {
    values: RwLock<BTreeMap<HardwareComponent, String>>,
}

impl StaticProbe {
    pub fn new(values: impl IntoIterator<Item = (HardwareComponent, String)>) -> Self {
        Self {
            values: RwLock::new(values.into_iter().collect()),
        }
    }

    pub fn from_set(set: &HardwareComponentSet) -> Self {
        Self::new(
            HardwareComponent::ALL
                .iter()
                .filter_map(|c| set.get(*c).map(|v| (*c, v.to_string()))),
        )
    }

    /// Replace or remove one component value.
    pub fn set(&self, component: HardwareComponent, value: Option<&str>) {
        if let Ok(mut values) = self.values.write() {
            match value {
                Some(v) => {
                    values.insert(component, v.to_string());
                }
                None => {
                    values.remove(&component);
                }
            }
        }
    }
}

impl HardwareProbe for StaticProbe {
    fn query(&self, component: HardwareComponent) -> Option<String> {
        self.values.read().ok()?.get(&component).cloned()
    }
}

/// Probe backed by the running operating system.
///
/// CPU, system disk and network adapter come from `sysinfo` on every
/// platform. BIOS, baseboard and TPM are read per platform.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemProbe;

impl SystemProbe {
    pub fn new() -> Self {
        Self
    }
}

impl HardwareProbe for SystemProbe {
    fn query(&self, component: HardwareComponent) -> Option<String> {
        match component {
            HardwareComponent::Cpu => inventory::cpu_id(),
            HardwareComponent::Disk => inventory::system_disk(),
            HardwareComponent::Mac => inventory::primary_mac(),
            HardwareComponent::Bios | HardwareComponent::Motherboard | HardwareComponent::Tpm => {
                platform::query(component)
            }
        }
    }
}

/// Stable OS installation id used to bind the local license file.
///
/// - Linux: `/etc/machine-id`
/// - macOS: IOPlatformUUID from IOKit
/// - Windows: HKLM\SOFTWARE\Microsoft\Cryptography\MachineGuid
///
/// Unlike the fingerprint this does not drift when a part is replaced, so a
/// NIC swap does not make the stored license unreadable.
pub fn machine_binding_id() -> Option<String> {
    platform::machine_binding_id()
}

/// Short OS description sent with activation requests, e.g.
/// `Linux (Ubuntu 24.04)`.
pub fn os_version() -> String {
    sysinfo::System::long_os_version().unwrap_or_else(|| std::env::consts::OS.to_string())
}

/// Interface name prefixes of loopback, container, VPN and hypervisor
/// adapters, whose addresses change or repeat across machines.
const VIRTUAL_INTERFACE_PREFIXES: &[&str] = &[
    "lo", "docker", "veth", "br-", "virbr", "vmnet", "vboxnet", "tun", "tap", "utun", "wg",
    "zt", "awdl", "llw", "bridge", "anpi", "ap", "gif", "stf",
];

fn is_virtual_interface(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    VIRTUAL_INTERFACE_PREFIXES
        .iter()
        .any(|prefix| lower.starts_with(prefix))
        || lower.contains("virtual")
        || lower.contains("loopback")
}

/// MAC of the first physical-looking interface by name.
fn pick_primary_mac<'a>(interfaces: impl IntoIterator<Item = (&'a str, String)>) -> Option<String> {
    let mut candidates: Vec<(&str, String)> = interfaces
        .into_iter()
        .filter(|(name, mac)| !is_virtual_interface(name) && mac != "00:00:00:00:00:00")
        .collect();
    candidates.sort();
    candidates.into_iter().next().map(|(_, mac)| mac)
}

/// Identity of the disk holding the system volume: the fixed disk with the
/// shortest mount point (`/`, `C:\`).
fn pick_system_disk<'a>(
    disks: impl IntoIterator<Item = (&'a std::path::Path, String, bool)>,
) -> Option<String> {
    let mut fixed: Vec<(&std::path::Path, String)> = disks
        .into_iter()
        .filter(|(_, _, removable)| !removable)
        .map(|(mount, identity, _)| (mount, identity))
        .collect();
    fixed.sort_by(|a, b| {
        (a.0.as_os_str().len(), a.0).cmp(&(b.0.as_os_str().len(), b.0))
    });
    fixed.into_iter().next().map(|(_, identity)| identity)
}

mod inventory {
    use sysinfo::{Disks, Networks, System};

    /// Vendor and brand string of the first logical CPU.
    pub fn cpu_id() -> Option<String> {
        let mut system = System::new();
        system.refresh_cpu_all();
        let cpu = system.cpus().first()?;
        let parts: Vec<&str> = [cpu.vendor_id(), cpu.brand()]
            .into_iter()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .collect();
        (!parts.is_empty()).then(|| parts.join("/"))
    }

    /// Device name, file system and capacity of the system disk. These
    /// survive reinstalls of the OS on the same drive.
    pub fn system_disk() -> Option<String> {
        let disks = Disks::new_with_refreshed_list();
        super::pick_system_disk(disks.list().iter().map(|disk| {
            let identity = format!(
                "{}:{}:{}",
                disk.name().to_string_lossy(),
                disk.file_system().to_string_lossy(),
                disk.total_space()
            );
            (disk.mount_point(), identity, disk.is_removable())
        }))
    }

    pub fn primary_mac() -> Option<String> {
        let networks = Networks::new_with_refreshed_list();
        super::pick_primary_mac(
            networks
                .list()
                .iter()
                .map(|(name, data)| (name.as_str(), data.mac_address().to_string())),
        )
    }
}

#[cfg(target_os = "linux")]
mod platform {
    use std::fs;
    use std::path::Path;

    use crate::fingerprint::HardwareComponent;

    pub fn query(component: HardwareComponent) -> Option<String> {
        match component {
            HardwareComponent::Bios => read_trimmed("/sys/class/dmi/id/product_serial")
                .or_else(|| read_trimmed("/sys/class/dmi/id/product_uuid")),
            HardwareComponent::Motherboard => read_trimmed("/sys/class/dmi/id/board_serial"),
            HardwareComponent::Tpm => tpm_info(),
            _ => None,
        }
    }

    pub fn machine_binding_id() -> Option<String> {
        // systemd location first, then the dbus copy
        read_trimmed("/etc/machine-id").or_else(|| read_trimmed("/var/lib/dbus/machine-id"))
    }

    fn read_trimmed(path: impl AsRef<Path>) -> Option<String> {
        let value = fs::read_to_string(path).ok()?;
        let value = value.trim();
        (!value.is_empty()).then(|| value.to_string())
    }

    fn tpm_info() -> Option<String> {
        let base = Path::new("/sys/class/tpm/tpm0");
        if !base.exists() {
            return None;
        }
        let version = read_trimmed(base.join("tpm_version_major")).unwrap_or_else(|| "1".into());
        let description = read_trimmed(base.join("device/description"))
            .or_else(|| read_trimmed(base.join("device/firmware_node/hid")))
            .unwrap_or_else(|| "tpm".into());
        Some(format!("{}-{}", description, version))
    }
}

#[cfg(target_os = "macos")]
mod platform {
    use std::process::Command;

    use crate::fingerprint::HardwareComponent;

    pub fn query(component: HardwareComponent) -> Option<String> {
        match component {
            HardwareComponent::Bios => ioreg_value("IOPlatformExpertDevice", "IOPlatformUUID"),
            HardwareComponent::Motherboard => {
                ioreg_value("IOPlatformExpertDevice", "IOPlatformSerialNumber")
            }
            // The Secure Enclave is not exposed as a TPM
            _ => None,
        }
    }

    pub fn machine_binding_id() -> Option<String> {
        ioreg_value("IOPlatformExpertDevice", "IOPlatformUUID")
    }

    fn ioreg_value(class: &str, key: &str) -> Option<String> {
        let output = Command::new("ioreg").args(["-rd1", "-c", class]).output().ok()?;
        if !output.status.success() {
            return None;
        }
        // Line format: "IOPlatformSerialNumber" = "XXXXX"
        String::from_utf8_lossy(&output.stdout)
            .lines()
            .find(|line| line.contains(&format!("\"{}\"", key)))
            .and_then(|line| line.rsplit('=').next())
            .map(|v| v.trim().trim_matches('"').to_string())
            .filter(|v| !v.is_empty())
    }
}

#[cfg(target_os = "windows")]
mod platform {
    use std::process::Command;

    use winreg::RegKey;
    use winreg::enums::*;

    use crate::fingerprint::HardwareComponent;

    pub fn query(component: HardwareComponent) -> Option<String> {
        match component {
            HardwareComponent::Bios => wmic(&["bios", "get", "SerialNumber", "/value"]),
            HardwareComponent::Motherboard => wmic(&["baseboard", "get", "SerialNumber", "/value"]),
            HardwareComponent::Tpm => tpm_info(),
            _ => None,
        }
    }

    pub fn machine_binding_id() -> Option<String> {
        let hklm = RegKey::predef(HKEY_LOCAL_MACHINE);
        let crypto = hklm.open_subkey("SOFTWARE\\Microsoft\\Cryptography").ok()?;
        crypto.get_value::<String, _>("MachineGuid").ok()
    }

    /// First `Key=Value` line of `wmic ... /value` output.
    fn wmic(args: &[&str]) -> Option<String> {
        let output = Command::new("wmic").args(args).output().ok()?;
        let text = String::from_utf8_lossy(&output.stdout);
        text.lines()
            .filter_map(|line| line.split_once('='))
            .map(|(_, value)| value.trim().to_string())
            .find(|value| !value.is_empty())
    }

    fn tpm_info() -> Option<String> {
        let output = Command::new("powershell")
            .args([
                "-NoProfile",
                "-Command",
                "$t = Get-CimInstance -Namespace root/cimv2/security/microsofttpm -ClassName Win32_Tpm; \
                 if ($t) { \"$($t.ManufacturerIdTxt)-$($t.SpecVersion.Split(',')[0])\" }",
            ])
            .output()
            .ok()?;
        let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
        (!text.is_empty()).then_some(text)
    }
}

#[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
mod platform {
    use crate::fingerprint::HardwareComponent;

    pub fn query(_component: HardwareComponent) -> Option<String> {
        None
    }

    pub fn machine_binding_id() -> Option<String> {
        None
    }
}
