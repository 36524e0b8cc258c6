use std::{
    collections::HashSet,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

use crate::{
    constants::{
        CONSOLE_KEYMAP_DEFAULT, LANGUAGE_DEFAULT, LIVE_ROOT_DEFAULT, TARGET_ROOT_DEFAULT,
        TIMEZONE_DEFAULT, XKB_MODEL_DEFAULT,
    },
    error::{InstallerError, InvalidInputError, ReportError},
};

mod error;

pub use error::InvalidInstallConfigError;

/// Everything the installer needs to turn a freshly copied live image into
/// the user's system. This is the data collected by the installer front end.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
pub struct InstallConfig {
    /// Root of the mounted live image.
    pub live_root: PathBuf,

    /// Root of the mounted target system.
    pub target_root: PathBuf,

    /// Identifier of the install class, e.g. `sabayon_kde`.
    pub install_class: String,

    /// Locale of the installed system, e.g. `it_IT.UTF-8`.
    pub language: String,

    /// Keyboard layouts.
    pub keyboard: Keyboard,

    /// Timezone and hardware clock mode.
    pub timezone: Timezone,

    /// Hostname and per-interface network settings.
    pub network: Network,

    /// Root password and the first user account.
    pub users: Users,

    /// Encrypted volumes to list in crypttab.
    pub storage: Storage,

    /// GRUB2 installation.
    pub bootloader: Bootloader,

    /// Package handling after the copy.
    pub packages: Packages,

    /// User that the SteamBox session runs as.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub steambox_user: Option<String>,
}

impl Default for InstallConfig {
    fn default() -> Self {
        Self {
            live_root: LIVE_ROOT_DEFAULT.into(),
            target_root: TARGET_ROOT_DEFAULT.into(),
            install_class: "sabayon".into(),
            language: LANGUAGE_DEFAULT.into(),
            keyboard: Keyboard::default(),
            timezone: Timezone::default(),
            network: Network::default(),
            users: Users::default(),
            storage: Storage::default(),
            bootloader: Bootloader::default(),
            packages: Packages::default(),
            steambox_user: None,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
pub struct Keyboard {
    /// Console keymap written to vconsole.conf.
    pub console_keymap: String,

    /// X11 keyboard layout.
    pub xkb_layout: String,

    /// X11 keyboard model.
    pub xkb_model: String,

    /// X11 keyboard variant.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub xkb_variant: Option<String>,

    /// X11 keyboard options.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub xkb_options: Vec<String>,
}

impl Default for Keyboard {
    fn default() -> Self {
        Self {
            console_keymap: CONSOLE_KEYMAP_DEFAULT.into(),
            xkb_layout: CONSOLE_KEYMAP_DEFAULT.into(),
            xkb_model: XKB_MODEL_DEFAULT.into(),
            xkb_variant: None,
            xkb_options: Vec::new(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
pub struct Timezone {
    /// Zoneinfo name, e.g. `Europe/Rome`.
    pub name: String,

    /// Whether the hardware clock keeps UTC.
    pub utc: bool,
}

impl Default for Timezone {
    fn default() -> Self {
        Self {
            name: TIMEZONE_DEFAULT.into(),
            utc: false,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
pub struct Network {
    /// Hostname of the installed system. When missing, one is discovered
    /// from the live environment.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,

    /// Disable NetworkManager and related services on the target. Overrides
    /// the install class when set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub simple_networking: Option<bool>,

    /// Per-interface overrides.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub interfaces: Vec<Interface>,
}

#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Interface {
    /// Kernel name of the interface, e.g. `eth0`.
    pub name: String,

    /// Name servers, in order of preference.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dns: Vec<String>,

    /// Default gateway.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
pub struct Users {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root_password: Option<String>,

    /// When present, must match `root_password`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root_password_confirm: Option<String>,

    /// First regular user of the system.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<User>,
}

#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct User {
    /// Login name. Lowercased before use, see [`User::login`].
    pub username: String,

    /// Full name stored in the GECOS field.
    #[serde(default)]
    pub fullname: String,

    pub password: String,

    /// When present, must match `password`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_confirm: Option<String>,

    /// Supplementary groups. Defaults to the groups of the live user.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub groups: Option<Vec<String>>,
}

impl User {
    /// Name of the account created on the target.
    pub fn login(&self) -> String {
        self.username.to_lowercase()
    }
}

#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
pub struct Storage {
    /// Entries of the target's `/etc/crypttab`.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub crypttab: Vec<CryptDevice>,
}

#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CryptDevice {
    /// Name of the mapped device under `/dev/mapper`.
    pub name: String,

    /// Underlying block device, e.g. `UUID=...` or `/dev/sda2`.
    pub device: String,

    /// Key file. `none` asks for a passphrase at boot.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_file: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
pub struct Bootloader {
    /// Whether to install GRUB2 at all.
    pub install: bool,

    /// Disk receiving GRUB2, without the `/dev/` prefix, e.g. `sda`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device: Option<String>,

    /// GRUB2 superuser password.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    /// Extra kernel command line arguments, written verbatim.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub command_line: Vec<String>,

    /// Menu timeout in seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u32>,

    /// Only reinstall the bootloader on an existing system.
    pub recovery: bool,
}

impl Default for Bootloader {
    fn default() -> Self {
        Self {
            install: true,
            device: None,
            password: None,
            command_line: Vec::new(),
            timeout: None,
            recovery: false,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
pub struct Packages {
    /// Drop language packs not matching the chosen language.
    pub remove_language_packs: bool,

    /// Install language packs matching the chosen language.
    pub install_language_packs: bool,

    /// Install the firewall package.
    pub firewall: bool,

    /// Reorder Entropy mirrors by speed.
    pub reorder_mirrors: bool,

    /// Remove the installer runtime from the target.
    pub cleanup: bool,

    /// Additional packages installed when missing.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub extra: Vec<String>,
}

impl Default for Packages {
    fn default() -> Self {
        Self {
            remove_language_packs: true,
            install_language_packs: true,
            firewall: true,
            reorder_mirrors: true,
            cleanup: true,
            extra: Vec::new(),
        }
    }
}

impl InstallConfig {
    /// Load the install configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, InstallerError> {
        let contents = std::fs::read_to_string(path.as_ref()).structured(
            InvalidInputError::LoadInstallConfiguration {
                path: path.as_ref().display().to_string(),
            },
        )?;
        Self::from_yaml(&contents)
    }

    /// Parse the install configuration from a YAML string.
    pub fn from_yaml(contents: &str) -> Result<Self, InstallerError> {
        serde_yaml::from_str(contents).structured(InvalidInputError::ParseInstallConfiguration)
    }

    /// Structural checks that do not need the live or target system.
    pub fn validate(&self) -> Result<(), InvalidInstallConfigError> {
        if self.bootloader.install
            && !self.bootloader.recovery
            && self.bootloader.device.as_deref().map_or(true, str::is_empty)
        {
            return Err(InvalidInstallConfigError::MissingBootloaderDevice);
        }

        let mut names = HashSet::new();
        for entry in &self.storage.crypttab {
            if entry.name.trim().is_empty() {
                return Err(InvalidInstallConfigError::EmptyCrypttabName {
                    device: entry.device.clone(),
                });
            }
            if !names.insert(entry.name.as_str()) {
                return Err(InvalidInstallConfigError::DuplicateCrypttabName(
                    entry.name.clone(),
                ));
            }
        }

        let mut interfaces = HashSet::new();
        for interface in &self.network.interfaces {
            if !interfaces.insert(interface.name.as_str()) {
                return Err(InvalidInstallConfigError::DuplicateInterface(
                    interface.name.clone(),
                ));
            }
        }

        if self.language.is_empty()
            || !self
                .language
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || "_.-@".contains(c))
        {
            return Err(InvalidInstallConfigError::InvalidLanguage(
                self.language.clone(),
            ));
        }

        let tz = &self.timezone.name;
        if tz.is_empty() || tz.starts_with('/') || tz.split('/').any(|part| part == "..") {
            return Err(InvalidInstallConfigError::InvalidTimezone(tz.clone()));
        }

        Ok(())
    }

    /// Whether any volume of the target is encrypted.
    pub fn is_encrypted(&self) -> bool {
        !self.storage.crypttab.is_empty()
    }

    /// Locale without the encoding, e.g. `it_IT` for `it_IT.UTF-8`.
    pub fn locale(&self) -> &str {
        self.language
            .split(['.', '@'])
            .next()
            .unwrap_or(&self.language)
    }

    /// Language code alone, e.g. `it` for `it_IT.UTF-8`.
    pub fn language_code(&self) -> &str {
        let locale = self.locale();
        locale.split('_').next().unwrap_or(locale)
    }

    /// Encoding of the locale, `UTF-8` when none is given.
    pub fn charset(&self) -> &str {
        self.language
            .split_once('.')
            .map(|(_, rest)| rest.split('@').next().unwrap_or(rest))
            .filter(|charset| !charset.is_empty())
            .unwrap_or("UTF-8")
    }
}
