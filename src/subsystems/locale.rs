//! Language, keyboard and timezone of the installed system.

use std::{fs, os::unix::fs::symlink, path::Path};

use anyhow::{Context, Error};
use log::{debug, info, warn};

use osutils::{dependencies::Dependency, files, path::join_relative};
use sabayon_api::{
    config::{InstallConfig, Keyboard},
    error::{InstallerError, ReportError, ServicingError},
};

use crate::engine::{EngineContext, Subsystem};

const LOCALE_GEN: &str = "/etc/locale.gen";
const LOCALE_GEN_FALLBACK: &str = "en_US.UTF-8 UTF-8";
const LOCALE_CONF: &str = "/etc/locale.conf";
const ENV_D_LOCALE: &str = "/etc/env.d/02locale";
const VCONSOLE_CONF: &str = "/etc/vconsole.conf";
const X11_KEYBOARD_CONF: &str = "/etc/X11/xorg.conf.d/00-keyboard.conf";

/// Applications localized by `language-setup`.
const LANGUAGE_SETUP_TARGETS: &[&str] = &["kde", "openoffice", "mozilla"];

const ZONEINFO_DIR: &str = "/usr/share/zoneinfo";
const LOCALTIME: &str = "/etc/localtime";
const TIMEZONE_FILE: &str = "/etc/timezone";
const ADJTIME: &str = "/etc/adjtime";
const ADJTIME_DEFAULT: [&str; 2] = ["0.0 0 0.0", "0"];

#[derive(Default)]
pub struct LocaleSubsystem;
impl Subsystem for LocaleSubsystem {
    fn name(&self) -> &'static str {
        "locale"
    }

    #[tracing::instrument(name = "locale_configuration", skip_all)]
    fn configure(&mut self, ctx: &EngineContext) -> Result<(), InstallerError> {
        set_up_language(ctx.target(), &ctx.config).structured(ServicingError::SetUpLanguage)?;
        set_up_keyboard(ctx.target(), &ctx.config.keyboard)
            .structured(ServicingError::SetUpKeyboard)?;

        debug!("Running keyboard-setup-2");
        ctx.spawn_chroot_silent(
            Dependency::KeyboardSetup2,
            [ctx.config.keyboard.console_keymap.as_str(), "all"],
        );

        if Dependency::LanguageSetup.exists_in(ctx.target()) {
            for application in LANGUAGE_SETUP_TARGETS {
                ctx.spawn_chroot_silent(
                    Dependency::LanguageSetup,
                    [ctx.config.locale(), *application],
                );
            }
        }

        set_up_timezone(ctx).structured(ServicingError::SetUpTimezone)?;
        Ok(())
    }
}

/// Replaces the `key=` assignment of a shell-style variables file, or appends
/// it. The file is created when missing.
fn set_variable(path: &Path, key: &str, value: &str) -> Result<(), Error> {
    let assignment = format!("{key}={value}");
    if !path.exists() {
        return files::write_file(path, 0o644, format!("{assignment}\n").as_bytes());
    }

    let prefix = format!("{key}=");
    let mut found = false;
    files::edit_lines(path, |line| {
        if line.trim_start().starts_with(&prefix) {
            if found {
                return None;
            }
            found = true;
            Some(assignment.clone())
        } else {
            Some(line.to_string())
        }
    })?;
    if !found {
        files::append_file(path, true, format!("{assignment}\n").as_bytes())?;
    }
    Ok(())
}

/// Makes sure every entry is enabled in `locale.gen`, uncommenting it when
/// present.
fn enable_locales(path: &Path, entries: &[String]) -> Result<(), Error> {
    let contents = if path.exists() {
        fs::read_to_string(path).context(format!("Failed to read '{}'", path.display()))?
    } else {
        String::new()
    };

    let mut lines: Vec<String> = contents.lines().map(str::to_string).collect();
    for entry in entries {
        if lines.iter().any(|line| line.trim() == entry) {
            continue;
        }
        let commented = lines.iter_mut().find(|line| {
            line.trim_start()
                .strip_prefix('#')
                .is_some_and(|rest| rest.trim() == entry)
        });
        match commented {
            Some(line) => *line = entry.clone(),
            None => lines.push(entry.clone()),
        }
    }

    let mut rendered = lines.join("\n");
    rendered.push('\n');
    files::write_file(path, 0o644, rendered.as_bytes())
}

fn set_up_language(target: &Path, config: &InstallConfig) -> Result<(), Error> {
    info!("Setting system language to '{}'", config.language);
    let entries = vec![
        format!("{} {}", config.language, config.charset()),
        LOCALE_GEN_FALLBACK.to_string(),
    ];
    enable_locales(&join_relative(target, LOCALE_GEN), &entries)?;

    for file in [LOCALE_CONF, ENV_D_LOCALE] {
        set_variable(&join_relative(target, file), "LANG", &config.language)
            .context(format!("Failed to set LANG in '{file}'"))?;
    }
    Ok(())
}

fn render_x11_keyboard(keyboard: &Keyboard) -> String {
    let mut section = String::from(
        "# Written by the Sabayon Installer\n\
         Section \"InputClass\"\n\
         \tIdentifier \"system-keyboard\"\n\
         \tMatchIsKeyboard \"on\"\n",
    );
    section.push_str(&format!("\tOption \"XkbLayout\" \"{}\"\n", keyboard.xkb_layout));
    section.push_str(&format!("\tOption \"XkbModel\" \"{}\"\n", keyboard.xkb_model));
    if let Some(variant) = keyboard.xkb_variant.as_deref().filter(|v| !v.is_empty()) {
        section.push_str(&format!("\tOption \"XkbVariant\" \"{variant}\"\n"));
    }
    if !keyboard.xkb_options.is_empty() {
        section.push_str(&format!(
            "\tOption \"XkbOptions\" \"{}\"\n",
            keyboard.xkb_options.join(",")
        ));
    }
    section.push_str("EndSection\n");
    section
}

fn set_up_keyboard(target: &Path, keyboard: &Keyboard) -> Result<(), Error> {
    info!("Setting keyboard layout to '{}'", keyboard.xkb_layout);
    set_variable(
        &join_relative(target, VCONSOLE_CONF),
        "KEYMAP",
        &keyboard.console_keymap,
    )?;

    files::write_file(
        join_relative(target, X11_KEYBOARD_CONF),
        0o644,
        render_x11_keyboard(keyboard).as_bytes(),
    )
}

/// Records in `adjtime` whether the hardware clock keeps UTC or local time.
/// The drift and calibration lines are kept when present.
fn write_rtc_mode(adjtime: &Path, utc: bool) -> Result<(), Error> {
    let contents = if adjtime.exists() {
        fs::read_to_string(adjtime).context(format!("Failed to read '{}'", adjtime.display()))?
    } else {
        String::new()
    };

    let mut lines: Vec<&str> = contents.lines().take(2).collect();
    if lines.len() < 2 {
        lines = ADJTIME_DEFAULT.to_vec();
    }
    lines.push(if utc { "UTC" } else { "LOCAL" });

    let mut rendered = lines.join("\n");
    rendered.push('\n');
    files::write_file(adjtime, 0o644, rendered.as_bytes())
}

fn set_up_timezone(ctx: &EngineContext) -> Result<(), Error> {
    let timezone = &ctx.config.timezone;
    info!("Setting timezone to '{}'", timezone.name);

    let etc = ctx.target_path("/etc");
    if etc.is_dir() {
        let localtime = ctx.target_path(LOCALTIME);
        if localtime.symlink_metadata().is_ok() {
            fs::remove_file(&localtime)
                .context(format!("Failed to remove '{}'", localtime.display()))?;
        }
        symlink(Path::new(ZONEINFO_DIR).join(&timezone.name), &localtime)
            .context(format!("Failed to link '{}'", localtime.display()))?;
        files::write_file(
            ctx.target_path(TIMEZONE_FILE),
            0o644,
            format!("{}\n", timezone.name).as_bytes(),
        )?;

        let adjtime = ctx.target_path(ADJTIME);
        files::copy_if_exists(ctx.system_path(ADJTIME), &adjtime)?;
        write_rtc_mode(&adjtime, timezone.utc)?;
    } else {
        warn!("No /etc in the target, not setting the timezone");
    }
    Ok(())
}
