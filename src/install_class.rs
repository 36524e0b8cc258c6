//! Installation flavors offered by the live images.

use std::fmt;

use log::debug;

use sabayon_api::error::{InstallerError, InvalidInputError};

use crate::entropy::PackageManager;

/// Package groups selected by a named task.
pub type Task = (&'static str, &'static [&'static str]);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallClass {
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub tasks: &'static [Task],
    /// Filesystem proposed for the root volume.
    pub default_filesystem: &'static str,
    /// Session written as the desktop manager default, if any.
    pub dmrc: Option<&'static str>,
    /// Drop NetworkManager in favour of plain interface configuration.
    pub simple_networking: bool,
    /// The class is only offered when this package is installed on the live
    /// image.
    pub required_package: Option<&'static str>,
    pub sort_priority: u32,
}

const DESKTOP_TASKS: &[Task] = &[
    (
        "Graphical Desktop",
        &[
            "admin-tools",
            "base",
            "base-x",
            "core",
            "editors",
            "fonts",
            "games",
            "graphical-internet",
            "graphics",
            "hardware-support",
            "input-methods",
            "java",
            "office",
            "printing",
            "sound-and-video",
            "text-internet",
        ],
    ),
    (
        "Software Development",
        &[
            "base",
            "base-x",
            "core",
            "development-libs",
            "development-tools",
            "editors",
            "fonts",
            "graphical-internet",
            "graphics",
            "hardware-support",
            "input-methods",
            "java",
            "text-internet",
            "x-software-development",
        ],
    ),
    (
        "Web Server",
        &[
            "admin-tools",
            "base",
            "base-x",
            "core",
            "editors",
            "graphical-internet",
            "hardware-support",
            "java",
            "text-internet",
            "web-server",
        ],
    ),
    ("Minimal", &["core"]),
];

const DEFAULT_FILESYSTEM: &str = "ext4";

const fn desktop(
    id: &'static str,
    name: &'static str,
    description: &'static str,
    dmrc: Option<&'static str>,
    required_package: Option<&'static str>,
) -> InstallClass {
    InstallClass {
        id,
        name,
        description,
        tasks: DESKTOP_TASKS,
        default_filesystem: DEFAULT_FILESYSTEM,
        dmrc,
        simple_networking: false,
        required_package,
        sort_priority: 10000,
    }
}

static INSTALL_CLASSES: &[InstallClass] = &[
    InstallClass {
        id: "sabayon",
        name: "Sabayon",
        description: "Install the desktop shipped on this live image. After this installation \
                      process you will be able to install additional packages.",
        tasks: DESKTOP_TASKS,
        default_filesystem: DEFAULT_FILESYSTEM,
        dmrc: None,
        simple_networking: false,
        required_package: None,
        sort_priority: 10001,
    },
    desktop(
        "sabayon_gnome",
        "Sabayon GNOME Desktop",
        "Select this installation type for a default installation with the GNOME desktop \
         environment. After this installation process you will be able to install additional \
         packages.",
        Some("gnome"),
        Some("gnome-base/gnome-session"),
    ),
    desktop(
        "sabayon_kde",
        "Sabayon KDE Desktop",
        "Select this installation type for a default installation with the KDE desktop \
         environment. After this installation process you will be able to install additional \
         packages.",
        Some("KDE-4"),
        Some("kde-base/kdebase-startkde"),
    ),
    desktop(
        "sabayon_mate",
        "Sabayon MATE Desktop",
        "Select this installation type for a default installation with the MATE desktop \
         environment. After this installation process you will be able to install additional \
         packages.",
        Some("mate"),
        Some("mate-base/mate-session-manager"),
    ),
    desktop(
        "sabayon_xfce",
        "Sabayon Xfce Desktop",
        "Select this installation type for a default installation with the Xfce desktop \
         environment. After this installation process you will be able to install additional \
         packages.",
        Some("xfce"),
        Some("xfce-base/xfce4-session"),
    ),
    InstallClass {
        id: "sabayon_corecd",
        name: "Sabayon Core",
        description: "Select this installation type to just install a Core System without \
                      graphical applications. This is the best choice for Server-oriented \
                      deployments.",
        tasks: &[("Minimal", &["core"])],
        default_filesystem: DEFAULT_FILESYSTEM,
        dmrc: None,
        simple_networking: true,
        required_package: None,
        sort_priority: 9998,
    },
];

impl InstallClass {
    /// Whether the class should be hidden because the live image lacks its
    /// desktop. Lookup failures hide the class.
    pub fn is_hidden(&self, packages: &dyn PackageManager) -> bool {
        match self.required_package {
            Some(package) => match packages.is_installed(package) {
                Ok(installed) => !installed,
                Err(e) => {
                    debug!("Hiding install class '{}': {e:?}", self.id);
                    true
                }
            },
            None => false,
        }
    }
}

impl fmt::Display for InstallClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.id)
    }
}

/// All known classes, by ascending sort priority.
pub fn all() -> Vec<&'static InstallClass> {
    let mut classes: Vec<_> = INSTALL_CLASSES.iter().collect();
    classes.sort_by_key(|class| class.sort_priority);
    classes
}

/// Find a class by id. The `sabayon_` prefix may be omitted.
pub fn lookup(id: &str) -> Result<&'static InstallClass, InstallerError> {
    INSTALL_CLASSES
        .iter()
        .find(|class| class.id == id || class.id.strip_prefix("sabayon_") == Some(id))
        .ok_or_else(|| InstallerError::new(InvalidInputError::UnknownInstallClass { id: id.into() }))
}

#[cfg(test)]
mod tests {
    use super::*;

    use sabayon_api::error::ErrorKind;

    use crate::entropy::fake::FakePackageManager;

    #[test]
    fn test_lookup() {
        assert_eq!(lookup("sabayon").unwrap().id, "sabayon");
        assert_eq!(lookup("sabayon_kde").unwrap().id, "sabayon_kde");
        assert_eq!(lookup("xfce").unwrap().id, "sabayon_xfce");

        let corecd = lookup("corecd").unwrap();
        assert!(corecd.simple_networking);
        assert_eq!(corecd.dmrc, None);

        assert_eq!(
            lookup("fluxbox").unwrap_err().kind(),
            &ErrorKind::InvalidInput(InvalidInputError::UnknownInstallClass {
                id: "fluxbox".into()
            })
        );
    }

    #[test]
    fn test_all_sorted() {
        let classes = all();
        assert_eq!(classes.len(), 6);
        assert_eq!(classes[0].id, "sabayon_corecd");
        assert!(classes
            .windows(2)
            .all(|w| w[0].sort_priority <= w[1].sort_priority));
        assert!(classes.iter().filter(|c| c.simple_networking).count() == 1);
    }

    #[test]
    fn test_hidden() {
        let packages = FakePackageManager::with_installed(&["mate-base/mate-session-manager"]);
        assert!(!lookup("mate").unwrap().is_hidden(&packages));
        assert!(lookup("gnome").unwrap().is_hidden(&packages));
        assert!(!lookup("corecd").unwrap().is_hidden(&packages));
    }

    #[test]
    fn test_display() {
        assert_eq!(
            lookup("corecd").unwrap().to_string(),
            "Sabayon Core (sabayon_corecd)"
        );
    }
}
