//! Network interface information from sysfs.

use std::path::{Path, PathBuf};

use anyhow::{Context, Error};
use log::trace;

pub const SYSFS_NET_PATH: &str = "/sys/class/net";

const NULL_HWADDR: &str = "00:00:00:00:00:00";

/// A network interface as seen in `/sys/class/net`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetInterface {
    pub name: String,
    path: PathBuf,
}

impl NetInterface {
    pub fn new(sysfs_root: impl AsRef<Path>, name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            path: sysfs_root.as_ref().join(&name),
            name,
        }
    }

    fn read_attr(&self, attr: &str) -> Option<String> {
        std::fs::read_to_string(self.path.join(attr))
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    }

    /// Hardware address in upper case, or `None` for interfaces without a
    /// usable one (loopback, tunnels).
    pub fn hwaddr(&self) -> Option<String> {
        self.read_attr("address")
            .map(|addr| addr.to_uppercase())
            .filter(|addr| is_valid_hwaddr(addr))
    }

    /// Whether the interface reports carrier.
    pub fn has_link(&self) -> bool {
        self.read_attr("carrier").as_deref() == Some("1")
    }

    /// Human readable description: the driver's module name when available.
    pub fn description(&self) -> Option<String> {
        std::fs::read_link(self.path.join("device/driver/module"))
            .ok()
            .and_then(|target| target.file_name().map(|n| n.to_string_lossy().into_owned()))
    }
}

/// Lists the interfaces of `sysfs_root`, usually [`SYSFS_NET_PATH`], sorted by
/// name. Loopback is skipped.
pub fn list_interfaces_in(sysfs_root: impl AsRef<Path>) -> Result<Vec<NetInterface>, Error> {
    let mut interfaces = std::fs::read_dir(sysfs_root.as_ref())
        .context(format!(
            "Failed to list network interfaces in '{}'",
            sysfs_root.as_ref().display()
        ))?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .filter(|name| name != "lo")
        .map(|name| NetInterface::new(sysfs_root.as_ref(), name))
        .collect::<Vec<_>>();
    interfaces.sort_by(|a, b| a.name.cmp(&b.name));
    trace!(
        "Found network interfaces: {:?}",
        interfaces.iter().map(|i| &i.name).collect::<Vec<_>>()
    );
    Ok(interfaces)
}

/// Checks for a six-octet colon-separated hardware address that is not all
/// zeros.
pub fn is_valid_hwaddr(addr: &str) -> bool {
    let octets: Vec<&str> = addr.split(':').collect();
    octets.len() == 6
        && octets
            .iter()
            .all(|o| o.len() == 2 && o.chars().all(|c| c.is_ascii_hexdigit()))
        && !addr.eq_ignore_ascii_case(NULL_HWADDR)
}

/// Hostname of the running system.
pub fn system_hostname() -> Option<String> {
    hostname::get()
        .ok()
        .map(|name| name.to_string_lossy().into_owned())
        .filter(|name| !name.is_empty() && name != "(none)")
}

#[cfg(test)]
mod tests {
    use super::*;

    use tempfile::tempdir;

    fn fake_interface(root: &Path, name: &str, address: &str, carrier: &str) {
        let dir = root.join(name);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("address"), format!("{address}\n")).unwrap();
        std::fs::write(dir.join("carrier"), format!("{carrier}\n")).unwrap();
    }

    #[test]
    fn test_list_interfaces() {
        let root = tempdir().unwrap();
        fake_interface(root.path(), "lo", "00:00:00:00:00:00", "1");
        fake_interface(root.path(), "wlan0", "aa:bb:cc:dd:ee:ff", "0");
        fake_interface(root.path(), "eth0", "52:54:00:12:34:56", "1");

        let interfaces = list_interfaces_in(root.path()).unwrap();
        let names: Vec<_> = interfaces.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec!["eth0", "wlan0"]);

        assert_eq!(interfaces[0].hwaddr(), Some("52:54:00:12:34:56".into()));
        assert!(interfaces[0].has_link());
        assert_eq!(interfaces[1].hwaddr(), Some("AA:BB:CC:DD:EE:FF".into()));
        assert!(!interfaces[1].has_link());
        assert_eq!(interfaces[1].description(), None);
    }

    #[test]
    fn test_is_valid_hwaddr() {
        assert!(is_valid_hwaddr("52:54:00:12:34:56"));
        assert!(!is_valid_hwaddr("00:00:00:00:00:00"));
        assert!(!is_valid_hwaddr("52:54:00:12:34"));
        assert!(!is_valid_hwaddr("52:54:00:12:34:zz"));
        assert!(!is_valid_hwaddr(""));
    }
}
