//! This module contains helper functions for working with virtualized environments.

use log::debug;

use crate::dependencies::Dependency;

/// Hypervisor reported by `systemd-detect-virt`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Virtualization {
    None,
    /// VirtualBox
    Oracle,
    Kvm,
    Qemu,
    Vmware,
    Microsoft,
    Other(String),
}

impl Virtualization {
    /// Does a best-effort detection. Any failure to run the tool counts as no
    /// virtualization.
    pub fn detect() -> Self {
        match Dependency::SystemdDetectVirt.cmd().output() {
            Ok(output) => Self::from_detect_virt(&output.output()),
            Err(e) => {
                debug!("Could not detect virtualization: {e}");
                Self::None
            }
        }
    }

    pub fn from_detect_virt(output: &str) -> Self {
        match output.trim() {
            "" | "none" => Self::None,
            "oracle" => Self::Oracle,
            "kvm" => Self::Kvm,
            "qemu" => Self::Qemu,
            "vmware" => Self::Vmware,
            "microsoft" => Self::Microsoft,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn is_virtualbox(&self) -> bool {
        *self == Self::Oracle
    }
}
