//! NetworkManager state of the live system, queried through `nmcli`.
//!
//! Every query degrades to "nothing known" when NetworkManager is not
//! running.

use std::net::Ipv4Addr;

use log::debug;

use osutils::{dependencies::Dependency, netdev};

const LOCALHOST_NAMES: &[&str] = &["localhost", "localhost.localdomain"];

const FALLBACK_HOSTNAME: &str = "localhost.localdomain";

/// Runs `nmcli -t` with the given arguments and returns its output, or `None`
/// when it fails.
fn nmcli(args: &[&str]) -> Option<String> {
    Dependency::Nmcli
        .cmd()
        .with_arg("-t")
        .with_args(args)
        .output_and_check()
        .map_err(|e| debug!("NetworkManager query failed: {e}"))
        .ok()
}

/// Interfaces of the active connections, sorted.
pub fn active_devices() -> Vec<String> {
    nmcli(&["-f", "DEVICE,STATE", "device"])
        .map(|output| parse_active_devices(&output))
        .unwrap_or_default()
}

fn parse_active_devices(output: &str) -> Vec<String> {
    let mut devices: Vec<String> = output
        .lines()
        .filter_map(|line| line.split_once(':'))
        .filter(|(_, state)| *state == "connected")
        .map(|(device, _)| device.to_string())
        .collect();
    devices.sort();
    devices.dedup();
    devices
}

/// Whether NetworkManager reports global connectivity.
pub fn is_connected() -> bool {
    nmcli(&["-f", "STATE", "general"]).is_some_and(|output| is_connected_state(&output))
}

fn is_connected_state(output: &str) -> bool {
    output.lines().next().map(str::trim) == Some("connected")
}

/// First IPv4 address assigned to `device`.
pub fn ipv4_address(device: &str) -> Option<Ipv4Addr> {
    nmcli(&["-f", "IP4.ADDRESS", "device", "show", device])
        .and_then(|output| parse_ipv4_address(&output))
}

fn parse_ipv4_address(output: &str) -> Option<Ipv4Addr> {
    output
        .lines()
        .filter_map(|line| line.split_once(':'))
        .filter(|(key, _)| key.starts_with("IP4.ADDRESS"))
        .filter_map(|(_, value)| value.split('/').next()?.parse().ok())
        .next()
}

/// Whether `device` got its configuration through DHCP.
pub fn is_dhcp(device: &str) -> bool {
    nmcli(&["-f", "DHCP4", "device", "show", device])
        .is_some_and(|output| has_dhcp_options(&output))
}

fn has_dhcp_options(output: &str) -> bool {
    output
        .lines()
        .any(|line| line.starts_with("DHCP4.OPTION") && line.contains('='))
}

/// Name of `address` according to the system resolver.
fn reverse_lookup(address: Ipv4Addr) -> Option<String> {
    let output = Dependency::Getent
        .cmd()
        .with_arg("hosts")
        .with_arg(address.to_string())
        .output_and_check()
        .map_err(|e| debug!("No name for {address}: {e}"))
        .ok()?;
    parse_getent_hosts(&output)
}

fn parse_getent_hosts(output: &str) -> Option<String> {
    output
        .lines()
        .next()?
        .split_whitespace()
        .nth(1)
        .map(str::to_string)
}

fn is_usable(hostname: &str) -> bool {
    !hostname.is_empty() && hostname != "(none)" && !LOCALHOST_NAMES.contains(&hostname)
}

/// Picks the hostname to propose: the name the network knows this machine
/// by, then `configured`, then the live system's hostname.
/// The lookup is skipped without connectivity.
pub fn default_hostname(configured: Option<&str>) -> String {
    let looked_up = if is_connected() {
        active_devices()
            .iter()
            .filter_map(|device| ipv4_address(device))
            .filter_map(reverse_lookup)
            .last()
    } else {
        debug!("No network connectivity to look up the hostname");
        None
    };
    choose_hostname(looked_up, configured, netdev::system_hostname())
}

fn choose_hostname(
    looked_up: Option<String>,
    configured: Option<&str>,
    system: Option<String>,
) -> String {
    looked_up
        .filter(|name| is_usable(name))
        .or_else(|| configured.filter(|name| is_usable(name)).map(str::to_string))
        .or_else(|| system.filter(|name| name != "(none)" && name != "localhost"))
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| FALLBACK_HOSTNAME.to_string())
}
