use log::{debug, info, warn};

use osutils::{netdev::SYSFS_NET_PATH, systemd};
use sabayon_api::error::{InstallerError, ReportError, ServicingError};

use crate::{
    engine::{EngineContext, Subsystem},
    network::{nm, Network},
};

/// Services replaced by plain interface configuration.
const MANAGED_NETWORKING_SERVICES: &[&str] = &["NetworkManager", "avahi-daemon", "dhcdbd"];

#[derive(Default, Debug)]
pub struct NetworkSubsystem;
impl Subsystem for NetworkSubsystem {
    fn name(&self) -> &'static str {
        "network"
    }

    #[tracing::instrument(name = "network_configuration", skip_all)]
    fn configure(&mut self, ctx: &EngineContext) -> Result<(), InstallerError> {
        let mut network = build_network(ctx);
        network
            .write(ctx.target())
            .structured(ServicingError::WriteNetworkConfiguration)?;

        if ctx.simple_networking() {
            info!("Disabling NetworkManager in favour of plain interface configuration");
            for service in MANAGED_NETWORKING_SERVICES {
                if let Err(e) = systemd::disable_unit(ctx.target(), service) {
                    warn!("Failed to disable '{service}': {e}");
                }
            }
        }
        Ok(())
    }
}

/// Network state of the live system with the configured hostname and
/// interface settings applied.
fn build_network(ctx: &EngineContext) -> Network {
    let sysfs = ctx.system_path(SYSFS_NET_PATH);
    let mut network = Network::new(&ctx.system_root);
    if let Err(e) = network.available(&sysfs, &ctx.cmdline) {
        warn!("Failed to list the network devices: {e:?}");
    }
    if let Some(device) = network.ks_device() {
        info!("Network device selected on the kernel command line: {}", device.name());
    }
    if let Err(e) = network.load(&sysfs) {
        warn!("Failed to load the network devices: {e:?}");
    }

    let hostname = match ctx.config.network.hostname.as_deref() {
        Some(hostname) => hostname.to_string(),
        None => nm::default_hostname(None),
    };
    debug!("Using hostname '{hostname}'");
    network.set_hostname(hostname);

    for interface in &ctx.config.network.interfaces {
        if !interface.dns.is_empty() {
            network.set_dns(&interface.dns.join(","), &interface.name);
        }
        if let Some(gateway) = &interface.gateway {
            network.set_gateway(gateway, &interface.name);
        }
    }
    network
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::{fs, path::Path};

    use osutils::cmdline::KernelCmdline;
    use sabayon_api::config::Interface;
    use tempfile::tempdir;

    fn fake_interface(live: &Path, name: &str, address: &str) {
        let dir = live.join("sys/class/net").join(name);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("address"), format!("{address}\n")).unwrap();
        fs::write(dir.join("carrier"), "1\n").unwrap();
    }

    #[test]
    fn test_configure() {
        let live = tempdir().unwrap();
        let target = tempdir().unwrap();
        let mut ctx = EngineContext::test(live.path(), target.path());
        ctx.config.network.hostname = Some("pollo.example.org".into());
        ctx.config.network.interfaces = vec![Interface {
            name: "eth0".into(),
            dns: vec!["192.168.1.1".into(), "8.8.8.8".into()],
            gateway: Some("192.168.1.254".into()),
        }];

        NetworkSubsystem.configure(&ctx).unwrap();

        assert_eq!(
            fs::read_to_string(target.path().join("etc/hostname")).unwrap(),
            "pollo.example.org\n"
        );
        assert_eq!(
            fs::read_to_string(target.path().join("etc/hosts")).unwrap(),
            "127.0.0.1\t\tpollo.example.org\n"
        );

        let ifcfg = fs::read_to_string(
            target
                .path()
                .join("etc/sysconfig/network-scripts/ifcfg-eth0"),
        )
        .unwrap();
        assert!(ifcfg.starts_with("DEVICE=eth0\n"));
        assert!(ifcfg.contains("DNS1=192.168.1.1\n"));
        assert!(ifcfg.contains("DNS2=8.8.8.8\n"));
        assert!(ifcfg.contains("GATEWAY=192.168.1.254\n"));
    }

    #[test]
    fn test_configure_persistent_net_rules() {
        let live = tempdir().unwrap();
        let target = tempdir().unwrap();
        fake_interface(live.path(), "eth0", "52:54:00:12:34:56");
        fake_interface(live.path(), "eth1", "52:54:00:AB:CD:EF");
        let mut ctx = EngineContext::test(live.path(), target.path());
        ctx.config.network.hostname = Some("pollo".into());
        ctx.cmdline = KernelCmdline::parse("quiet ksdevice=eth1");

        let network = build_network(&ctx);
        assert_eq!(network.ks_device().unwrap().name(), "eth1");

        NetworkSubsystem.configure(&ctx).unwrap();

        let rules = fs::read_to_string(
            target
                .path()
                .join("etc/udev/rules.d/70-persistent-net.rules"),
        )
        .unwrap();
        assert!(rules.contains(
            "ATTR{address}==\"52:54:00:12:34:56\", ATTR{type}==\"1\", KERNEL==\"eth*\", NAME=\"eth0\"\n"
        ));
        assert!(rules.contains("ATTR{address}==\"52:54:00:ab:cd:ef\""));
        assert!(rules.contains("NAME=\"eth1\""));
        // Devices found but not configured get no ifcfg file
        assert!(!target
            .path()
            .join("etc/sysconfig/network-scripts/ifcfg-eth0")
            .exists());
    }
}
