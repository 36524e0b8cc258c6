//! Sound and video driver state carried over from the live system.

use std::{
    env, fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Error};
use log::{debug, info, warn};

use osutils::{dependencies::Dependency, files, path::join_relative, systemd};
use sabayon_api::{
    constants::{
        BUMBLEBEE_ENABLED_MARKER, ENTROPY_PACKAGE_MASK, ENTROPY_PACKAGE_UNMASK,
        INSTALL_DATA_DRIVERS_DIR, NVIDIA_LEGACY_RUNNING, OPENGL_ENV_FILE, OPENGL_PROFILE_DEFAULT,
        PROPRIETARY_DRIVER_PACKAGES,
    },
    error::InstallerError,
};

use crate::{
    engine::{EngineContext, Subsystem},
    entropy::PackageManager,
};

const ASOUND_STATE: &str = "/etc/asound.state";
const ASOUND_STATE_ALSA: &str = "/var/lib/alsa/asound.state";

const XORG_CONF: &str = "/etc/X11/xorg.conf";
const XORG_CONF_ORIGINAL: &str = "/etc/X11/xorg.conf.original";

const ATI_ENV_FILE: &str = "/etc/env.d/09ati";
const OPENGL_IMPLEMENTATIONS_DIR: &str = "/usr/lib/opengl";

const BUMBLEBEE_SERVICE: &str = "bumblebeed";
const BBSWITCH_BLACKLIST: &str = "/etc/modprobe.d/bbswitch-blacklist.conf";
const BBSWITCH_BLACKLIST_CONTENTS: &str = "\
# Added by the Sabayon Installer to avoid a race condition
# between udev loading nvidia.ko or nouveau.ko and bbswitch,
# which wants to manage the driver itself.
blacklist nvidia
blacklist nouveau
";

const NVIDIA_LEGACY_PACKAGES: &[&str] = &["nvidia-drivers", "nvidia-userspace"];
const NVIDIA_MASK_HEADER: &str = "\n# added by the Sabayon Installer\n";

#[derive(Default)]
pub struct DriversSubsystem;
impl Subsystem for DriversSubsystem {
    fn name(&self) -> &'static str {
        "drivers"
    }

    #[tracing::instrument(name = "drivers_configuration", skip_all)]
    fn configure(&mut self, ctx: &EngineContext) -> Result<(), InstallerError> {
        if let Err(e) = copy_audio_state(ctx) {
            warn!("Failed to copy the sound card state: {e:?}");
        }
        if let Err(e) = copy_xorg_conf(ctx) {
            warn!("Failed to copy the X.Org configuration: {e:?}");
        }

        let opengl_env = fs::read_to_string(ctx.system_path(OPENGL_ENV_FILE)).ok();
        let profile = opengl_profile(env::var("OPENGL_PROFILE").ok(), opengl_env.as_deref());
        let bumblebee = ctx.system_path(BUMBLEBEE_ENABLED_MARKER).exists();
        debug!("OpenGL profile: {profile}, bumblebee: {bumblebee}");

        if profile == OPENGL_PROFILE_DEFAULT && !bumblebee {
            if let Err(e) = remove_proprietary_drivers(ctx.target(), ctx.packages.as_ref()) {
                warn!("Failed to remove proprietary drivers: {e:?}");
            }
        }
        if bumblebee {
            if let Err(e) = set_up_bumblebee(ctx.target()) {
                warn!("Failed to set up bumblebee: {e:?}");
            }
        }

        if let Err(e) = set_up_nvidia_legacy(ctx) {
            warn!("Failed to install legacy NVIDIA drivers: {e:?}");
        }
        Ok(())
    }
}

fn copy_audio_state(ctx: &EngineContext) -> Result<(), Error> {
    let source = ctx.system_path(ASOUND_STATE);
    for destination in [ASOUND_STATE, ASOUND_STATE_ALSA] {
        if !files::copy_if_exists(&source, ctx.target_path(destination))? {
            debug!("No sound card state to copy");
            return Ok(());
        }
    }
    Ok(())
}

fn copy_xorg_conf(ctx: &EngineContext) -> Result<(), Error> {
    let source = ctx.system_path(XORG_CONF);
    if files::copy_if_exists(&source, ctx.target_path(XORG_CONF))? {
        files::copy_if_exists(&source, ctx.target_path(XORG_CONF_ORIGINAL))?;
    }
    Ok(())
}

/// OpenGL implementation in use: `OPENGL_PROFILE` from the environment, else
/// the last profile selected in the OpenGL environment file.
fn opengl_profile(from_env: Option<String>, env_file: Option<&str>) -> String {
    if let Some(profile) = from_env.filter(|p| !p.is_empty()) {
        return profile;
    }

    let selected = env_file.and_then(|contents| {
        contents
            .lines()
            .map(str::trim)
            .filter(|line| line.starts_with("OPENGL_PROFILE"))
            .last()
    });
    match selected {
        Some(line) if line.contains("nvidia") => "nvidia",
        Some(line) if line.contains("ati") => "ati",
        _ => OPENGL_PROFILE_DEFAULT,
    }
    .to_string()
}

fn remove_if_installed(packages: &dyn PackageManager, names: &[&str]) {
    for name in names {
        match packages.is_installed(name) {
            Ok(true) => {
                if let Err(e) = packages.remove(&[name.to_string()]) {
                    warn!("Failed to remove '{name}': {e:?}");
                }
            }
            Ok(false) => debug!("'{name}' is not installed"),
            Err(e) => warn!("Failed to look up '{name}': {e:?}"),
        }
    }
}

/// Drops the proprietary OpenGL stacks when the open source one is in use.
fn remove_proprietary_drivers(target: &Path, packages: &dyn PackageManager) -> Result<(), Error> {
    info!("Removing proprietary video drivers");
    files::remove_file_if_exists(join_relative(target, ATI_ENV_FILE))?;
    for implementation in ["ati", "nvidia"] {
        files::remove_dir_all_if_exists(
            join_relative(target, OPENGL_IMPLEMENTATIONS_DIR).join(implementation),
        )?;
    }
    remove_if_installed(packages, PROPRIETARY_DRIVER_PACKAGES);
    Ok(())
}

fn set_up_bumblebee(target: &Path) -> Result<(), Error> {
    info!("Enabling bumblebee");
    if let Err(e) = systemd::enable_unit(target, BUMBLEBEE_SERVICE) {
        warn!("Failed to enable '{BUMBLEBEE_SERVICE}': {e}");
    }
    files::write_file(
        join_relative(target, BBSWITCH_BLACKLIST),
        0o644,
        BBSWITCH_BLACKLIST_CONTENTS.as_bytes(),
    )
}

/// Driver package files of the live image matching the running legacy
/// NVIDIA version, sorted.
fn nvidia_legacy_package_files(drivers_dir: &Path, version: &str) -> Result<Vec<PathBuf>, Error> {
    let mut package_files = Vec::new();
    for package in NVIDIA_LEGACY_PACKAGES {
        let pattern = format!(
            "{}/x11-drivers:{package}-{}*",
            glob::Pattern::escape(&drivers_dir.to_string_lossy()),
            glob::Pattern::escape(version)
        );
        for path in glob::glob(&pattern).context(format!("Invalid pattern '{pattern}'"))? {
            let path = path?;
            if path.is_file() {
                package_files.push(path);
            }
        }
    }
    package_files.sort();
    package_files.dedup();
    Ok(package_files)
}

/// Entries pinning the NVIDIA packages to the legacy `version`.
fn nvidia_mask_entries(version: &str) -> (String, String) {
    let mut mask = NVIDIA_MASK_HEADER.to_string();
    let mut unmask = NVIDIA_MASK_HEADER.to_string();
    for package in NVIDIA_LEGACY_PACKAGES {
        mask += &format!("x11-drivers/{package}\n");
        unmask += &format!("=x11-drivers/{package}-{version}*\n");
    }
    (mask, unmask)
}

/// Installs the package file into the target through a temporary copy in its
/// root directory.
fn install_package_file(ctx: &EngineContext, package_file: &Path) -> Result<(), Error> {
    let name = package_file
        .file_name()
        .context("Package file has no name")?;
    let in_target = Path::new("/").join(name);
    let copy = ctx.target_path(&in_target);
    fs::copy(package_file, &copy).context(format!(
        "Failed to copy '{}' into the target",
        package_file.display()
    ))?;

    let result = ctx.packages.install_file(&in_target);
    if let Err(e) = files::remove_file_if_exists(&copy) {
        warn!("Failed to remove '{}': {e:?}", copy.display());
    }
    result
}

/// Replaces the NVIDIA drivers of the target with the legacy ones the live
/// system is running, and keeps them from being upgraded.
fn set_up_nvidia_legacy(ctx: &EngineContext) -> Result<(), Error> {
    let running = ctx.system_path(NVIDIA_LEGACY_RUNNING);
    let drivers_dir = ctx.system_path(INSTALL_DATA_DRIVERS_DIR);
    if !running.is_file() || !drivers_dir.is_dir() {
        debug!("No legacy NVIDIA driver in use");
        return Ok(());
    }

    let version = files::read_file_trim(&running)?;
    let version = version.lines().next().unwrap_or_default().to_string();
    info!("Installing legacy NVIDIA drivers {version}");

    remove_if_installed(ctx.packages.as_ref(), NVIDIA_LEGACY_PACKAGES);

    let mut completed = true;
    for package_file in nvidia_legacy_package_files(&drivers_dir, &version)? {
        if let Err(e) = install_package_file(ctx, &package_file) {
            warn!(
                "An issue occurred while installing '{}': {e:?}",
                package_file.display()
            );
            completed = false;
        }
    }

    if completed {
        let (mask, unmask) = nvidia_mask_entries(&version);
        for (file, entries) in [(ENTROPY_PACKAGE_MASK, mask), (ENTROPY_PACKAGE_UNMASK, unmask)] {
            let path = ctx.target_path(file);
            if path.is_file() && files::is_writable(&path) {
                files::append_file(&path, true, entries.as_bytes())?;
            }
        }
    }

    for profile in [OPENGL_PROFILE_DEFAULT, "nvidia"] {
        ctx.spawn_chroot_silent(Dependency::Eselect, ["opengl", "set", profile]);
    }
    Ok(())
}
