use const_format::formatcp;

// Installer defaults

/// Default location of the mounted live image.
pub const LIVE_ROOT_DEFAULT: &str = "/mnt/livecd";

/// Default location where the target system is mounted.
pub const TARGET_ROOT_DEFAULT: &str = "/mnt/sysimage";

/// Default install configuration path.
pub const INSTALL_CONFIG_PATH_DEFAULT: &str = "/etc/sabayon-installer/config.yaml";

/// Default language of the installed system.
pub const LANGUAGE_DEFAULT: &str = "en_US.UTF-8";

/// Default timezone of the installed system.
pub const TIMEZONE_DEFAULT: &str = "America/New_York";

/// Default console keymap.
pub const CONSOLE_KEYMAP_DEFAULT: &str = "us";

/// Default X11 keyboard model.
pub const XKB_MODEL_DEFAULT: &str = "pc105";

/// Hostname written when none was configured.
pub const HOSTNAME_DEFAULT: &str = "sabayon";

/// Hostname reported when nothing better can be discovered.
pub const HOSTNAME_FALLBACK: &str = "localhost.localdomain";

/// Minimum length of any account password.
pub const PASSWORD_MIN_LENGTH: usize = 6;

/// Minimum length of a user name.
pub const USERNAME_MIN_LENGTH: usize = 2;

// Distribution specific names

/// User account of the live system, removed from the target.
pub const LIVE_USER: &str = "sabayonuser";

/// Main Entropy repository.
pub const REPO_NAME: &str = "sabayonlinux.org";

/// Firewall package installed on the target.
pub const FIREWALL_PACKAGE: &str = "net-firewall/ufw";

/// Firewall service enabled on the target.
pub const FIREWALL_SERVICE: &str = "ufw";

/// Package sets providing input methods and fonts for CJK languages.
pub const ASIAN_FONTS_PACKAGES: &[&str] = &["@ime-fonts-support", "@ime-fonts"];

/// Language codes that need [`ASIAN_FONTS_PACKAGES`].
pub const ASIAN_LANGUAGES: &[&str] = &["ja", "zh", "ko"];

/// Package families providing one package per language, named
/// `<family>-<language>`.
pub const LANGUAGE_PACK_FAMILIES: &[&str] = &[
    "kde-base/kde-l10n",
    "app-office/openoffice-l10n",
    "app-office/libreoffice-l10n",
    "app-dicts/myspell",
    "app-dicts/aspell",
    "app-i18n/man-pages",
];

/// Package owning the installer on the live image.
pub const INSTALLER_PACKAGE: &str = "anaconda";

/// Installer runtime packages dropped from the installed system.
pub const INSTALLER_CLEANUP_PACKAGES: &[&str] = &[
    "app-admin/anaconda",
    "app-misc/anaconda-runtime",
    "app-misc/anaconda-runtime-gui",
    "dev-python/python-blivet",
    "dev-python/python-meh",
    "dev-util/pykickstart",
    "libselinux",
    "sys-process/audit",
];

/// Proprietary video driver packages dropped when the open source stack is
/// in use.
pub const PROPRIETARY_DRIVER_PACKAGES: &[&str] = &[
    "ati-drivers",
    "ati-userspace",
    "nvidia-settings",
    "nvidia-drivers",
    "nvidia-userspace",
];

// Entropy paths, relative to a system root

/// Entropy client database directory. The architecture is appended.
pub const ENTROPY_CLIENT_DATABASE_DIR: &str = "var/lib/entropy/client/database";

/// Entropy client database file name.
pub const ENTROPY_CLIENT_DATABASE_FILENAME: &str = "equo.db";

/// Entropy user package configuration directory.
pub const ENTROPY_PACKAGES_DIR: &str = "etc/entropy/packages";

/// Entropy package sets directory.
pub const ENTROPY_SETS_DIR: &str = formatcp!("{ENTROPY_PACKAGES_DIR}/sets");

/// Name of the package set listing the packages of a fresh install.
pub const INSTALL_BASE_SET: &str = "install_base";

/// Entropy package mask file.
pub const ENTROPY_PACKAGE_MASK: &str = formatcp!("{ENTROPY_PACKAGES_DIR}/package.mask");

/// Entropy package unmask file.
pub const ENTROPY_PACKAGE_UNMASK: &str = formatcp!("{ENTROPY_PACKAGES_DIR}/package.unmask");

/// Hardware hash cached by Entropy, invalid on a new machine.
pub const ENTROPY_HW_HASH: &str = "etc/entropy/.hw.hash";

// SecureBoot

/// SecureBoot private key.
pub const SB_PRIVATE_KEY: &str = "/boot/SecureBoot/user-private.key";

/// SecureBoot public certificate (X.509, PEM).
pub const SB_PUBLIC_X509: &str = "/boot/SecureBoot/user-public.crt";

/// SecureBoot public certificate to be enrolled (DER).
pub const SB_PUBLIC_DER: &str = "/boot/efi/EFI/sabayon/enroll-this.cer";

/// Script generating the SecureBoot key material.
pub const SB_MAKE_SCRIPT: &str = "/usr/lib/quickinst/make-secureboot.sh";

/// Upper bound on DER file name collisions.
pub const SB_DER_MAX_SUFFIX: u32 = 1000;

// Drivers

/// Version of the NVIDIA legacy driver running on the live system.
pub const NVIDIA_LEGACY_RUNNING: &str = "/lib/nvidia/legacy/running";

/// Directory on the live image holding installer data.
pub const INSTALL_DATA_DIR: &str = "/install-data";

/// Package files of drivers shipped on the live image.
pub const INSTALL_DATA_DRIVERS_DIR: &str = formatcp!("{INSTALL_DATA_DIR}/drivers");

/// Marker left by the live system when bumblebee is active.
pub const BUMBLEBEE_ENABLED_MARKER: &str = "/tmp/.bumblebee.enabled";

/// OpenGL profile environment file.
pub const OPENGL_ENV_FILE: &str = "/etc/env.d/03opengl";

/// Default OpenGL profile.
pub const OPENGL_PROFILE_DEFAULT: &str = "xorg-x11";

// Logging

/// Background log file, copied into the target at the end of the install.
pub const INSTALLER_BACKGROUND_LOG_PATH: &str = "/tmp/sabayon-installer.log";

/// Trace file, copied into the target at the end of the install.
pub const INSTALLER_TRACE_PATH: &str = "/tmp/sabayon-installer-trace.jsonl";

/// Scratch content index of files excluded from the copy.
pub const CONTENT_INDEX_PATH_DEFAULT: &str = "/tmp/sabayon-installer-files.db";

/// Log files copied into the target.
pub const INSTALLER_LOG_FILES: &[&str] = &[
    INSTALLER_BACKGROUND_LOG_PATH,
    INSTALLER_TRACE_PATH,
    "/tmp/lvmout",
    "/tmp/resize.out",
    "/tmp/program.log",
    "/tmp/storage.log",
];

/// Directory of the target receiving the installer logs.
pub const INSTALLER_LOG_DIR: &str = "var/log/installer";
