use std::path::Path;

use anyhow::{anyhow, Context, Error};
use configparser::ini::Ini;
use log::{debug, info, warn};

use osutils::{dependencies::Dependency, files, path::join_relative, systemd};
use sabayon_api::{
    constants::{FIREWALL_SERVICE, INSTALL_DATA_DIR},
    error::{InstallerError, ReportError, ServicingError},
};

use crate::{
    engine::{EngineContext, Subsystem},
    entropy,
};

/// Live image services with no use on an installed system.
const LIVE_SERVICES: &[&str] = &["installer-gui", "installer-text", "sabayonlive", "music", "cdeject"];

const SYSTEM_SERVICES: &[&str] = &["x-setup", "vixie-cron", "oemsystem", FIREWALL_SERVICE];

const MCE_SERVICES: &[&str] = &["sabayon-mce", "NetworkManager-wait-online"];
const MCE_SERVICE: &str = "sabayon-mce";

const VIRTUALBOX_SERVICE: &str = "virtualbox-guest-additions";

const GDM_CUSTOM_CONF: &str = "/etc/gdm/custom.conf";
const SKEL_DMRC: &str = "/etc/skel/.dmrc";

#[derive(Default)]
pub struct ServicesSubsystem;
impl Subsystem for ServicesSubsystem {
    fn name(&self) -> &'static str {
        "services"
    }

    #[tracing::instrument(name = "services_configuration", skip_all)]
    fn configure(&mut self, ctx: &EngineContext) -> Result<(), InstallerError> {
        ctx.progress.set_text("Configuring system services");

        let (disable, enable) = service_changes(
            entropy::is_sabayon_mce(&ctx.cmdline),
            ctx.virt.is_virtualbox(),
        );
        for service in disable {
            if let Err(e) = systemd::disable_unit(ctx.target(), service) {
                warn!("Failed to disable '{service}': {e}");
            }
        }
        for service in enable {
            if let Err(e) = systemd::enable_unit(ctx.target(), service) {
                warn!("Failed to enable '{service}': {e}");
            }
        }

        if let Err(e) = set_gdm_default_session(ctx.target(), ctx.install_class.dmrc) {
            warn!("Failed to set the GDM default session: {e:?}");
        }

        files::remove_dir_all_if_exists(ctx.target_path(INSTALL_DATA_DIR))
            .structured(ServicingError::ConfigureServices)?;

        for dependency in [Dependency::EnvUpdate, Dependency::LocaleGen, Dependency::Ldconfig] {
            ctx.spawn_chroot_silent(dependency, [] as [&str; 0]);
        }

        fix_temporary_dirs(ctx.target()).structured(ServicingError::FinalizeSystem)
    }
}

/// Services to disable and to enable on the target.
fn service_changes(mce: bool, virtualbox: bool) -> (Vec<&'static str>, Vec<&'static str>) {
    let mut disable = LIVE_SERVICES.to_vec();
    let mut enable = SYSTEM_SERVICES.to_vec();

    if mce {
        enable.extend(MCE_SERVICES);
    } else {
        disable.push(MCE_SERVICE);
    }

    if virtualbox {
        enable.push(VIRTUALBOX_SERVICE);
    } else {
        disable.push(VIRTUALBOX_SERVICE);
    }
    (disable, enable)
}

/// GDM ignores the session of the skeleton `.dmrc`, so it is made the GDM
/// default as well. Without one, the session of the install class is used.
fn set_gdm_default_session(target: &Path, class_session: Option<&str>) -> Result<(), Error> {
    let custom_conf = join_relative(target, GDM_CUSTOM_CONF);
    if !custom_conf.is_file() {
        return Ok(());
    }

    let Some(session) = skel_session(target)?.or(class_session.map(str::to_string)) else {
        debug!("No default desktop session");
        return Ok(());
    };

    let mut gdm = Ini::new_cs();
    gdm.load(&custom_conf)
        .map_err(|e| anyhow!(e))
        .context(format!("Failed to load '{}'", custom_conf.display()))?;
    info!("Setting GDM default session to '{session}'");
    gdm.set("daemon", "DefaultSession", Some(session));
    gdm.write(&custom_conf)
        .context(format!("Failed to write '{}'", custom_conf.display()))
}

fn skel_session(target: &Path) -> Result<Option<String>, Error> {
    let dmrc = join_relative(target, SKEL_DMRC);
    if !dmrc.is_file() {
        return Ok(None);
    }
    let mut skel = Ini::new_cs();
    skel.load(&dmrc)
        .map_err(|e| anyhow!(e))
        .context(format!("Failed to load '{}'", dmrc.display()))?;
    Ok(skel.get("Desktop", "Session").filter(|s| !s.is_empty()))
}

/// Makes `/tmp` world writable and keeps `/var/tmp` from being pruned.
fn fix_temporary_dirs(target: &Path) -> Result<(), Error> {
    let tmp = join_relative(target, "/tmp");
    files::create_dirs(&tmp)?;
    files::set_mode(&tmp, 0o1777)?;

    let keep = join_relative(target, "/var/tmp/.keep");
    if !keep.is_file() {
        files::create_file(&keep)?;
    }
    Ok(())
}
