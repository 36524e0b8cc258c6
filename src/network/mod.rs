//! Network configuration of the installed system.
//!
//! Devices are modelled as `ifcfg-*` key/value maps. The live environment is
//! inspected through sysfs and NetworkManager, the target receives the
//! hostname, hosts entries and persistent interface names.

use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
    path::{Path, PathBuf},
};

use anyhow::{Context, Error};
use log::{debug, info, warn};

use osutils::{
    cmdline::KernelCmdline,
    files,
    netdev::{self, NetInterface},
    path::join_relative,
};
use sabayon_api::constants::HOSTNAME_DEFAULT;

pub mod nm;

/// Directory holding `ifcfg-*` files.
const IFCFG_DIR: &str = "/etc/sysconfig/network-scripts";

const PERSISTENT_NET_RULES: &str = "/etc/udev/rules.d/70-persistent-net.rules";

const PERSISTENT_NET_RULES_HEADER: &str = "
# This file was automatically generated by the /lib/udev/write_net_rules
# program run by the persistent-net-generator.rules rules file.
#
# You can modify it, as long as you keep each rule on a single line.

";

/// Keys never written to `ifcfg-*` files.
const INTERNAL_KEYS: &[&str] = &["DESC", "KEY", "NAME"];

const LOCAL_DOMAINS: &[&str] = &["localdomain", "localdomain6"];

/// A network device as described by an `ifcfg-*` file. Keys are case
/// insensitive and stored upper case.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkDevice {
    info: BTreeMap<String, String>,
}

impl NetworkDevice {
    pub fn new(device: &str) -> Self {
        let mut info = BTreeMap::new();
        info.insert("DEVICE".to_string(), device.to_string());
        Self { info }
    }

    pub fn name(&self) -> &str {
        self.get("DEVICE").unwrap_or_default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.info.get(&key.to_uppercase()).map(String::as_str)
    }

    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        self.info.insert(key.to_uppercase(), value.into());
    }

    pub fn unset(&mut self, key: &str) {
        self.info.remove(&key.to_uppercase());
    }

}

impl fmt::Display for NetworkDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "DEVICE={}", self.name())?;
        for (key, value) in &self.info {
            if key == "DEVICE" || INTERNAL_KEYS.contains(&key.as_str()) {
                continue;
            }
            if key == "ETHTOOL_OPTS" && !value.contains("autoneg") {
                writeln!(f, "{key}=\"autoneg off {value}\"")?;
            } else {
                writeln!(f, "{key}={value}")?;
            }
        }
        Ok(())
    }
}

/// Parses an `ifcfg-*` file. Missing or unreadable files yield no entries.
pub fn parse_ifcfg(contents: &str) -> BTreeMap<String, String> {
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| line.split_once('='))
        .map(|(key, value)| {
            (
                key.trim().to_uppercase(),
                value.replace(['"', '\''], "").trim().to_string(),
            )
        })
        .collect()
}

#[derive(Debug, Clone)]
pub struct Network {
    devices: BTreeMap<String, NetworkDevice>,
    ks_device: Option<String>,
    /// Devices changed by the user. Only those get an `ifcfg-*` file.
    configured: BTreeSet<String>,
    pub hostname: String,
    pub domains: Vec<String>,
    /// Root of the running system, source of `ifcfg-*` files and udev rules.
    system_root: PathBuf,
}

impl Network {
    pub fn new(system_root: impl AsRef<Path>) -> Self {
        Self {
            devices: BTreeMap::new(),
            ks_device: None,
            configured: BTreeSet::new(),
            hostname: netdev::system_hostname().unwrap_or_default(),
            domains: Vec::new(),
            system_root: system_root.as_ref().to_owned(),
        }
    }

    pub fn read_ifcfg_contents(&self, device: &str) -> BTreeMap<String, String> {
        let path = join_relative(&self.system_root, IFCFG_DIR).join(format!("ifcfg-{device}"));
        match std::fs::read_to_string(&path) {
            Ok(contents) => parse_ifcfg(&contents),
            Err(_) => BTreeMap::new(),
        }
    }

    /// Loads the devices found in `sysfs_root` with their existing `ifcfg-*`
    /// settings. Devices managed by NetworkManager take the addresses it
    /// assigned.
    pub fn load(&mut self, sysfs_root: impl AsRef<Path>) -> Result<(), Error> {
        for interface in netdev::list_interfaces_in(sysfs_root.as_ref())? {
            let contents = self.read_ifcfg_contents(&interface.name);
            let device = self
                .devices
                .entry(interface.name.clone())
                .or_insert_with(|| NetworkDevice::new(&interface.name));

            let nm_controlled = contents
                .get("NM_CONTROLLED")
                .is_some_and(|value| !value.eq_ignore_ascii_case("no"));
            if nm_controlled {
                if nm::is_dhcp(&interface.name) {
                    device.set("BOOTPROTO", "dhcp");
                } else {
                    device.unset("BOOTPROTO");
                    if let Some(address) = nm::ipv4_address(&interface.name) {
                        device.set("IPADDR", address.to_string());
                    }
                }
            }

            for (key, value) in contents {
                match key.as_str() {
                    "GATEWAY" => device.set(&key, value),
                    "DOMAIN" => self.domains.push(value),
                    "HOSTNAME" => self.hostname = value,
                    _ if device.get(&key).map_or(true, str::is_empty) => device.set(&key, value),
                    _ => {}
                }
            }
        }
        Ok(())
    }

    /// Records hardware address and description of every device of
    /// `sysfs_root` and picks the device named by `ksdevice=` on the kernel
    /// command line: `link` for one with carrier, a device name or a hardware
    /// address.
    pub fn available(
        &mut self,
        sysfs_root: impl AsRef<Path>,
        cmdline: &KernelCmdline,
    ) -> Result<&BTreeMap<String, NetworkDevice>, Error> {
        let ks_device = cmdline.get("ksdevice");

        for interface in netdev::list_interfaces_in(sysfs_root.as_ref())? {
            let Some(hwaddr) = interface.hwaddr() else {
                warn!("Invalid hardware address for '{}'", interface.name);
                continue;
            };
            let device = self
                .devices
                .entry(interface.name.clone())
                .or_insert_with(|| NetworkDevice::new(&interface.name));
            device.set("HWADDR", hwaddr.as_str());
            device.set("DESC", describe(&interface));

            let Some(ks_device) = ks_device else {
                continue;
            };
            let selected = match ks_device {
                "link" => interface.has_link(),
                name if name == interface.name => true,
                addr if addr.contains(':') => addr.to_uppercase() == hwaddr,
                _ => false,
            };
            if selected {
                debug!("Selected '{}' as the ksdevice", interface.name);
                self.ks_device = Some(interface.name.clone());
            }
        }
        Ok(&self.devices)
    }

    pub fn ks_device(&self) -> Option<&NetworkDevice> {
        self.ks_device
            .as_ref()
            .and_then(|name| self.devices.get(name))
    }

    pub fn device(&self, name: &str) -> Option<&NetworkDevice> {
        self.devices.get(name)
    }

    pub fn devices(&self) -> impl Iterator<Item = &NetworkDevice> {
        self.devices.values()
    }

    fn device_mut(&mut self, name: &str) -> &mut NetworkDevice {
        self.configured.insert(name.to_string());
        self.devices
            .entry(name.to_string())
            .or_insert_with(|| NetworkDevice::new(name))
    }

    pub fn set_hostname(&mut self, hostname: impl Into<String>) {
        self.hostname = hostname.into();
    }

    /// Sets `DNS1`..`DNSn` of `device` from a comma separated list.
    pub fn set_dns(&mut self, servers: &str, device: &str) {
        let device = self.device_mut(device);
        for (i, server) in servers.split(',').enumerate() {
            device.set(&format!("DNS{}", i + 1), server.trim());
        }
    }

    pub fn set_gateway(&mut self, gateway: &str, device: &str) {
        self.device_mut(device).set("GATEWAY", gateway);
    }

    /// Domain part of the hostname, unless it is a local one.
    pub fn domain_name(&self) -> Option<&str> {
        let (_, domain) = self.hostname.split_once('.')?;
        if domain.is_empty() || LOCAL_DOMAINS.contains(&domain) {
            return None;
        }
        if self.hostname.starts_with("localhost") {
            return None;
        }
        Some(domain)
    }

    /// Writes the network configuration into `target`.
    pub fn write(&mut self, target: impl AsRef<Path>) -> Result<(), Error> {
        let target = target.as_ref();

        if self.domains.is_empty() || self.domains == ["localdomain"] {
            if let Some(domain) = self.domain_name().map(str::to_string) {
                self.domains = vec![domain];
            }
        }

        self.write_persistent_net_rules(target)?;

        let hostname = if self.hostname.is_empty() {
            HOSTNAME_DEFAULT
        } else {
            self.hostname.as_str()
        };
        files::write_file(
            join_relative(target, "/etc/hostname"),
            0o644,
            format!("{hostname}\n").as_bytes(),
        )?;

        write_samba_netbios_name(target, hostname)?;
        write_hosts(target, hostname)?;
        info!("Hostname set to '{hostname}'");

        let dhclient = join_relative(target, "/etc/dhcp/dhclient.conf");
        if dhclient.is_file() {
            files::write_file(
                &dhclient,
                0o644,
                format!("send host-name \"{hostname}\";\nsupersede host-name \"{hostname}\";\n")
                    .as_bytes(),
            )?;
        }

        self.write_ifcfg_files(target)
    }

    fn write_persistent_net_rules(&self, target: &Path) -> Result<(), Error> {
        let source = join_relative(&self.system_root, PERSISTENT_NET_RULES);
        let destination = join_relative(target, PERSISTENT_NET_RULES);
        if source != destination && files::copy_if_exists(&source, &destination)? {
            debug!("Copied persistent net rules from '{}'", source.display());
            return Ok(());
        }

        let mut rules = PERSISTENT_NET_RULES_HEADER.to_string();
        for device in self.devices.values() {
            if let Some(rule) = persistent_net_rule(device) {
                rules += &rule;
            }
        }
        files::write_file(&destination, 0o644, rules.as_bytes())
    }

    fn write_ifcfg_files(&self, target: &Path) -> Result<(), Error> {
        for name in &self.configured {
            let Some(device) = self.devices.get(name) else {
                continue;
            };
            let path = join_relative(target, IFCFG_DIR).join(format!("ifcfg-{name}"));
            debug!("Writing '{}'", path.display());
            files::write_file(&path, 0o644, device.to_string().as_bytes())?;
        }
        Ok(())
    }
}

fn describe(interface: &NetInterface) -> String {
    interface
        .description()
        .unwrap_or_else(|| interface.name.clone())
}

/// udev rule pinning the name of `device` to its hardware address.
fn persistent_net_rule(device: &NetworkDevice) -> Option<String> {
    let address = device.get("HWADDR")?.to_lowercase();
    let name = device.name();
    let basename = name.trim_end_matches(|c: char| c.is_ascii_digit());
    let description = device
        .get("DESC")
        .filter(|desc| !desc.is_empty())
        .unwrap_or(name);
    Some(format!(
        "# {description} (rule written by anaconda)\n\
         SUBSYSTEM==\"net\", ACTION==\"add\", DRIVERS==\"?*\", ATTR{{address}}==\"{address}\", \
         ATTR{{type}}==\"1\", KERNEL==\"{basename}*\", NAME=\"{name}\"\n"
    ))
}

fn write_samba_netbios_name(target: &Path, hostname: &str) -> Result<(), Error> {
    let smb_conf = join_relative(target, "/etc/samba/smb.conf");
    if !smb_conf.is_file() {
        return Ok(());
    }
    files::edit_lines(&smb_conf, |line| {
        if line.contains("netbios name = ") && !line.trim().starts_with('#') {
            Some(format!("  netbios name = {hostname}"))
        } else {
            Some(line.to_string())
        }
    })
    .context("Failed to set the samba netbios name")
}

/// Makes sure `127.0.0.1` resolves to `hostname`.
fn write_hosts(target: &Path, hostname: &str) -> Result<(), Error> {
    let hosts = join_relative(target, "/etc/hosts");
    let contents = std::fs::read_to_string(&hosts).unwrap_or_default();

    let mut found = false;
    let mut output = String::with_capacity(contents.len() + hostname.len() + 16);
    for line in contents.lines().map(str::trim) {
        if line.starts_with("127.0.0.1") {
            found = true;
            if !line.split_whitespace().any(|name| name == hostname) {
                output += &format!("{line} {hostname}\n");
                continue;
            }
        }
        output += line;
        output.push('\n');
    }
    if !found {
        output += &format!("127.0.0.1\t\t{hostname}\n");
    }
    files::write_file(&hosts, 0o644, output.as_bytes())
}
