//! GRUB2 installation on the target disk.

use std::path::Path;

use anyhow::Error;
use log::{debug, info};

use osutils::{dependencies::Dependency, files, grub::DefaultGrub, path::join_relative};
use sabayon_api::{
    config::Bootloader,
    error::{InstallerError, ReportError, ServicingError},
};

use crate::engine::{EngineContext, Subsystem};

const SABAYON_GRUB_DEFAULTS: &str = "/etc/default/sabayon-grub";
const GRUB_DEFAULTS: &str = "/etc/default/grub";
const GRUB_PASSWORD_SCRIPT: &str = "/etc/grub.d/00_password";
const GRUB_DEVICE_MAP: &str = "/boot/grub/device.map";
const GRUB_CFG: &str = "/boot/grub/grub.cfg";

const SABAYON_GRUB_HEADER: &str = "\
# this file has been added by the Anaconda Installer
# containing default installer bootloader arguments.
# DO NOT EDIT NOR REMOVE THIS FILE DIRECTLY !!!
";

#[derive(Default)]
pub struct BootloaderSubsystem;
impl Subsystem for BootloaderSubsystem {
    fn name(&self) -> &'static str {
        "bootloader"
    }

    #[tracing::instrument(name = "bootloader_write_configuration", skip_all)]
    fn write_configuration(&mut self, ctx: &EngineContext) -> Result<(), InstallerError> {
        let bootloader = &ctx.config.bootloader;
        if !bootloader.install {
            info!("Bootloader installation disabled");
            return Ok(());
        }

        write_grub_config(ctx.target(), bootloader)
            .structured(ServicingError::WriteBootloaderConfig)?;

        let device = bootloader
            .device
            .as_deref()
            .filter(|device| !device.is_empty())
            .structured(ServicingError::InstallBootloader)?;
        let install_args = grub_install_args(device, &bootloader.command_line);
        info!("Installing GRUB on '{}'", install_args[0]);
        ctx.spawn_chroot(Dependency::Grub2Install, &install_args)
            .structured(ServicingError::InstallBootloader)?;

        let mkconfig = if Dependency::Grub2Mkconfig.exists_in(ctx.target()) {
            Dependency::Grub2Mkconfig
        } else {
            Dependency::GrubMkconfig
        };
        debug!("Generating the GRUB menu with {mkconfig}");
        ctx.spawn_chroot(mkconfig, [format!("--output={GRUB_CFG}")])
            .structured(ServicingError::GenerateBootloaderMenu)
    }
}

fn render_sabayon_grub(command_line: &[String]) -> String {
    format!(
        "{SABAYON_GRUB_HEADER}GRUB_CMDLINE_LINUX=\"${{GRUB_CMDLINE_LINUX}} {}\"\n",
        command_line.join(" ")
    )
}

/// Quotes `word` for the GRUB script parser, which expands variables in bare
/// words.
fn grub_quote(word: &str) -> String {
    format!("'{}'", word.replace('\'', "'\\''"))
}

/// grub.d script emitting the menu superuser and its password. The heredoc
/// delimiter is quoted so that the shell leaves the password untouched.
fn render_password_script(password: &str) -> String {
    format!(
        "#!/bin/sh\n\
         cat << 'EOF'\n\
         set superusers=\"root\"\n\
         password root {}\n\
         EOF\n",
        grub_quote(password)
    )
}

/// Writes the installer GRUB defaults, the optional menu password and the
/// configured timeout. Stale device maps are dropped.
fn write_grub_config(target: &Path, bootloader: &Bootloader) -> Result<(), Error> {
    files::write_file(
        join_relative(target, SABAYON_GRUB_DEFAULTS),
        0o644,
        render_sabayon_grub(&bootloader.command_line).as_bytes(),
    )?;

    if let Some(password) = bootloader.password.as_deref().filter(|p| !p.is_empty()) {
        debug!("Protecting the GRUB menu with a password");
        files::write_file(
            join_relative(target, GRUB_PASSWORD_SCRIPT),
            0o755,
            render_password_script(password).as_bytes(),
        )?;
    }

    files::remove_file_if_exists(join_relative(target, GRUB_DEVICE_MAP))?;

    if let Some(timeout) = bootloader.timeout {
        let defaults = join_relative(target, GRUB_DEFAULTS);
        if defaults.exists() {
            let mut grub = DefaultGrub::read(&defaults)?;
            grub.set("GRUB_TIMEOUT", &timeout.to_string())?;
            grub.write()?;
        }
    }
    Ok(())
}

/// Arguments of `grub2-install`. `noefi` on the command line forces a BIOS
/// installation.
fn grub_install_args(device: &str, command_line: &[String]) -> Vec<String> {
    let device = if device.starts_with("/dev/") {
        device.to_string()
    } else {
        format!("/dev/{device}")
    };
    let mut args = vec![device, "--recheck".into(), "--force".into()];
    if command_line.iter().any(|arg| arg == "noefi") {
        args.push("--target=i386-pc".into());
    }
    args
}
