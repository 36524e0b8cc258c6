use std::{fs, path::Path};

use anyhow::{Context, Error};
use log::{debug, info, warn};

use osutils::{dependencies::Dependency, files, path::join_relative};
use sabayon_api::{
    config::User,
    constants::LIVE_USER,
    error::{InstallerError, ReportError, ServicingError},
};

use crate::{
    engine::{EngineContext, Subsystem},
    entropy,
};

const SKEL_DESKTOP_DIR: &str = "/etc/skel/Desktop";
const RIGO_LAUNCHER: &str = "/usr/share/applications/rigo.desktop";
const DROPPED_LAUNCHERS: &[&str] = &["gparted.desktop", "Anaconda Installer.desktop"];

const STEAMBOX_USER_FILE: &str = "/etc/sabayon/steambox-user";

const SUDOERS_FILE: &str = "/etc/sudoers";
const SUDOERS_WHEEL: &str = "\n#Added by Sabayon Installer\n%wheel  ALL=ALL\n";

#[derive(Default)]
pub struct UsersSubsystem;
impl Subsystem for UsersSubsystem {
    fn name(&self) -> &'static str {
        "users"
    }

    #[tracing::instrument(name = "users_configuration", skip_all)]
    fn configure(&mut self, ctx: &EngineContext) -> Result<(), InstallerError> {
        if let Err(e) = configure_skel(ctx.target()) {
            warn!("Failed to configure the skeleton home: {e:?}");
        }

        debug!("Removing live user '{LIVE_USER}'");
        ctx.spawn_chroot_silent(Dependency::Userdel, ["-f", "-r", LIVE_USER]);

        if let Some(password) = &ctx.config.users.root_password {
            set_password(ctx.target(), "root", password).structured(ServicingError::SetUpUsers)?;
        }

        if let Some(user) = &ctx.config.users.user {
            let groups = match &user.groups {
                Some(groups) => groups.clone(),
                None => live_user_groups(ctx.live_root()).unwrap_or_else(|e| {
                    warn!("Failed to read the groups of '{LIVE_USER}': {e:?}");
                    Vec::new()
                }),
            };
            create_user(ctx.target(), user, &groups).structured(ServicingError::SetUpUsers)?;
        }

        if entropy::is_sabayon_steambox(&ctx.cmdline) {
            if let Some(steambox_user) = &ctx.config.steambox_user {
                if let Err(e) = write_steambox_user(ctx.target(), steambox_user) {
                    warn!("Failed to write the SteamBox user: {e:?}");
                }
            }
        }

        if let Err(e) = configure_sudo(ctx.target()) {
            warn!("Failed to configure sudo: {e:?}");
        }

        Ok(())
    }
}

/// Puts the Rigo launcher on new users' desktops and drops the launchers
/// only useful on the live image.
fn configure_skel(target: &Path) -> Result<(), Error> {
    let desktop = join_relative(target, SKEL_DESKTOP_DIR);

    let launcher = desktop.join("rigo.desktop");
    if files::copy_if_exists(join_relative(target, RIGO_LAUNCHER), &launcher)? {
        files::set_mode(&launcher, 0o775)?;
    }

    for name in DROPPED_LAUNCHERS {
        files::remove_file_if_exists(desktop.join(name))?;
    }
    Ok(())
}

fn set_password(target: &Path, username: &str, password: &str) -> Result<(), Error> {
    debug!("Setting password of '{username}'");
    Dependency::Chpasswd
        .cmd()
        .in_root(target)
        .with_input(format!("{username}:{password}\n").into_bytes())
        .run_and_check()
        .context(format!("Failed to set the password of '{username}'"))
}

fn useradd_args(user: &User, groups: &[String]) -> Vec<String> {
    let mut args = vec!["-m".to_string()];
    if !groups.is_empty() {
        args.extend(["-G".to_string(), groups.join(",")]);
    }
    if !user.fullname.is_empty() {
        args.extend(["-c".to_string(), user.fullname.clone()]);
    }
    args.push(user.login());
    args
}

fn create_user(target: &Path, user: &User, groups: &[String]) -> Result<(), Error> {
    let login = user.login();
    info!("Creating user '{login}'");
    Dependency::Useradd
        .cmd()
        .with_args(useradd_args(user, groups))
        .in_root(target)
        .run_and_check()
        .context(format!("Failed to create user '{login}'"))?;

    set_password(target, &login, &user.password)
}

/// Supplementary groups of the live user, as listed in the live image's
/// group database.
fn live_user_groups(live_root: &Path) -> Result<Vec<String>, Error> {
    let group_file = join_relative(live_root, "/etc/group");
    let contents = fs::read_to_string(&group_file)
        .context(format!("Failed to read '{}'", group_file.display()))?;
    Ok(parse_member_groups(&contents, LIVE_USER))
}

fn parse_member_groups(contents: &str, username: &str) -> Vec<String> {
    contents
        .lines()
        .filter_map(|line| {
            let mut fields = line.split(':');
            let name = fields.next()?;
            let members = fields.nth(2)?;
            members
                .split(',')
                .any(|member| member.trim() == username)
                .then(|| name.to_string())
        })
        .collect()
}

fn write_steambox_user(target: &Path, username: &str) -> Result<(), Error> {
    debug!("Writing SteamBox user '{username}'");
    files::write_file(
        join_relative(target, STEAMBOX_USER_FILE),
        0o644,
        format!("{username}\n").as_bytes(),
    )
}

/// Requires a password for every sudo rule and grants `wheel` full access.
fn configure_sudo(target: &Path) -> Result<(), Error> {
    let sudoers = join_relative(target, SUDOERS_FILE);
    if !sudoers.exists() {
        debug!("No sudoers file in the target");
        return Ok(());
    }

    files::edit_lines(&sudoers, |line| {
        if line.contains("NOPASSWD") && !line.trim_start().starts_with('#') {
            Some(format!("#{line}"))
        } else {
            Some(line.to_string())
        }
    })?;
    files::append_file(&sudoers, true, SUDOERS_WHEEL.as_bytes())
}
