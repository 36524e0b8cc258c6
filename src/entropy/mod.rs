//! Adapters around the Entropy package manager.
//!
//! Package transactions are delegated to the `equo` client running inside the
//! target. The installed-packages databases are read directly.

use std::{
    ffi::OsStr,
    fmt,
    path::{Path, PathBuf},
};

use anyhow::{Context, Error};
use log::{debug, info};

use osutils::{cmdline::KernelCmdline, dependencies::Dependency};

use crate::progress::Progress;

mod content_index;
mod repository;

pub use content_index::ContentIndex;
pub use repository::{InstalledPackage, InstalledRepository, PackageId};

#[cfg(test)]
pub(crate) use repository::test_utils;

/// Kernel command line flags booting the Media Center edition.
const MCE_FLAGS: &[&str] = &["mceinstall", "sabayonmce"];

/// Kernel command line flags booting the SteamBox edition.
const STEAMBOX_FLAGS: &[&str] = &["steaminstall", "steambox"];

pub fn is_sabayon_mce(cmdline: &KernelCmdline) -> bool {
    cmdline.has_any_flag(MCE_FLAGS)
}

pub fn is_sabayon_steambox(cmdline: &KernelCmdline) -> bool {
    cmdline.has_any_flag(STEAMBOX_FLAGS)
}

/// Kind of a package content entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentType {
    Dir,
    Obj,
    Sym,
    Other(String),
}

impl ContentType {
    pub fn as_str(&self) -> &str {
        match self {
            ContentType::Dir => "dir",
            ContentType::Obj => "obj",
            ContentType::Sym => "sym",
            ContentType::Other(kind) => kind,
        }
    }
}

impl From<&str> for ContentType {
    fn from(kind: &str) -> Self {
        match kind {
            "dir" => ContentType::Dir,
            "obj" => ContentType::Obj,
            "sym" => ContentType::Sym,
            other => ContentType::Other(other.to_string()),
        }
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Package operations on the installed system.
pub trait PackageManager: Send + Sync {
    /// Whether a package matching `package` is installed.
    fn is_installed(&self, package: &str) -> Result<bool, Error>;

    /// Install packages from the configured repositories.
    fn install(&self, packages: &[String]) -> Result<(), Error>;

    /// Install a package file. `file` is a path inside the target.
    fn install_file(&self, file: &Path) -> Result<(), Error>;

    /// Remove packages without touching their reverse dependencies.
    fn remove(&self, packages: &[String]) -> Result<(), Error>;

    fn sync_repositories(&self) -> Result<(), Error>;

    fn reorder_mirrors(&self, repository: &str) -> Result<(), Error>;
}

/// Runs `equo` inside the target root.
pub struct EquoClient {
    root: PathBuf,
}

impl EquoClient {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_owned(),
        }
    }

    fn run<I, S>(&self, args: I) -> Result<(), Error>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut command = Dependency::Equo.cmd().with_args(args).in_root(&self.root);
        command.env("ETP_NONINTERACTIVE", "1");
        debug!("Running '{}'", command.render_command());
        command.run_and_check()?;
        Ok(())
    }
}

impl PackageManager for EquoClient {
    fn is_installed(&self, package: &str) -> Result<bool, Error> {
        Ok(!InstalledRepository::open_in(&self.root)?
            .match_package(package)?
            .is_empty())
    }

    fn install(&self, packages: &[String]) -> Result<(), Error> {
        if packages.is_empty() {
            return Ok(());
        }
        self.run(["install".to_string()].iter().chain(packages))
            .context(format!("Failed to install {}", packages.join(", ")))
    }

    fn install_file(&self, file: &Path) -> Result<(), Error> {
        self.run([OsStr::new("install"), file.as_os_str()])
            .context(format!("Failed to install package file '{}'", file.display()))
    }

    fn remove(&self, packages: &[String]) -> Result<(), Error> {
        if packages.is_empty() {
            return Ok(());
        }
        self.run(
            ["remove".to_string(), "--nodeps".to_string()]
                .iter()
                .chain(packages),
        )
        .context(format!("Failed to remove {}", packages.join(", ")))
    }

    fn sync_repositories(&self) -> Result<(), Error> {
        self.run(["update"])
            .context("Failed to synchronize Entropy repositories")
    }

    fn reorder_mirrors(&self, repository: &str) -> Result<(), Error> {
        self.run(["repo", "mirrorsort", repository])
            .context(format!("Failed to reorder mirrors of '{repository}'"))
    }
}

/// Reports the advancement of a multi-package action to the log and to the
/// installer progress.
pub struct EntropyProgress<'a> {
    action: &'a str,
    current: usize,
    total: usize,
    progress: Option<&'a Progress>,
}

impl<'a> EntropyProgress<'a> {
    pub fn new(action: &'a str, total: usize) -> Self {
        Self {
            action,
            current: 0,
            total,
            progress: None,
        }
    }

    pub fn with_progress(self, progress: &'a Progress) -> Self {
        Self {
            progress: Some(progress),
            ..self
        }
    }

    /// Advance by one item and return the rendered message.
    pub fn step(&mut self, item: &str) -> String {
        self.current = (self.current + 1).min(self.total.max(1));
        let message = format!("({}/{}) {} {item}", self.current, self.total, self.action);
        info!("{message}");
        if let Some(progress) = self.progress {
            progress.set_text(&message);
            progress.set_fraction(self.current as f64 / self.total.max(1) as f64);
        }
        message
    }
}

#[cfg(test)]
pub(crate) mod fake {
    use std::sync::{Arc, Mutex};

    use super::*;

    /// Records the calls made to it. Packages listed in `installed` are
    /// reported as installed, those in `unavailable` fail to install. Clones
    /// share their state.
    #[derive(Clone, Default)]
    pub(crate) struct FakePackageManager {
        pub installed: Arc<Mutex<Vec<String>>>,
        pub calls: Arc<Mutex<Vec<String>>>,
        pub fail_installs: bool,
        pub unavailable: Vec<String>,
    }

    impl FakePackageManager {
        pub(crate) fn with_installed(installed: &[&str]) -> Self {
            Self {
                installed: Arc::new(Mutex::new(
                    installed.iter().map(|p| p.to_string()).collect(),
                )),
                ..Default::default()
            }
        }

        pub(crate) fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn record(&self, call: String) {
            self.calls.lock().unwrap().push(call);
        }
    }

    impl PackageManager for FakePackageManager {
        fn is_installed(&self, package: &str) -> Result<bool, Error> {
            Ok(self.installed.lock().unwrap().iter().any(|p| p == package))
        }

        fn install(&self, packages: &[String]) -> Result<(), Error> {
            self.record(format!("install {}", packages.join(" ")));
            if self.fail_installs || packages.iter().any(|p| self.unavailable.contains(p)) {
                anyhow::bail!("install failed");
            }
            self.installed.lock().unwrap().extend(packages.iter().cloned());
            Ok(())
        }

        fn install_file(&self, file: &Path) -> Result<(), Error> {
            self.record(format!("install-file {}", file.display()));
            if self.fail_installs {
                anyhow::bail!("install failed");
            }
            Ok(())
        }

        fn remove(&self, packages: &[String]) -> Result<(), Error> {
            self.record(format!("remove {}", packages.join(" ")));
            self.installed
                .lock()
                .unwrap()
                .retain(|p| !packages.contains(p));
            Ok(())
        }

        fn sync_repositories(&self) -> Result<(), Error> {
            self.record("sync".into());
            Ok(())
        }

        fn reorder_mirrors(&self, repository: &str) -> Result<(), Error> {
            self.record(format!("mirrorsort {repository}"));
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_edition_predicates() {
        let cmdline = KernelCmdline::parse("root=live:CDLABEL=SABAYON sabayonmce quiet");
        assert!(is_sabayon_mce(&cmdline));
        assert!(!is_sabayon_steambox(&cmdline));

        let cmdline = KernelCmdline::parse("steaminstall");
        assert!(is_sabayon_steambox(&cmdline));
        assert!(!is_sabayon_mce(&cmdline));

        // Substrings of other flags do not count
        let cmdline = KernelCmdline::parse("nosteambox=1 mceinstaller");
        assert!(!is_sabayon_steambox(&cmdline));
        assert!(!is_sabayon_mce(&cmdline));
    }

    #[test]
    fn test_content_type() {
        assert_eq!(ContentType::from("dir"), ContentType::Dir);
        assert_eq!(ContentType::from("obj").to_string(), "obj");
        assert_eq!(ContentType::from("fif"), ContentType::Other("fif".into()));
        assert_eq!(ContentType::Other("dev".into()).as_str(), "dev");
    }

    #[test]
    fn test_entropy_progress() {
        let progress = Progress::default();
        let mut reporter = EntropyProgress::new("Removing", 2).with_progress(&progress);

        assert_eq!(
            reporter.step("kde-base/kde-l10n-de"),
            "(1/2) Removing kde-base/kde-l10n-de"
        );
        assert_eq!(progress.snapshot().fraction, 0.5);
        assert_eq!(reporter.step("anaconda"), "(2/2) Removing anaconda");
        assert_eq!(progress.snapshot().fraction, 1.0);
        assert_eq!(progress.snapshot().text, "(2/2) Removing anaconda");

        // Never runs past the total
        assert_eq!(reporter.step("extra"), "(2/2) Removing extra");
    }

    #[test]
    fn test_equo_client_is_installed_without_repository() {
        let root = tempfile::tempdir().unwrap();
        let client = EquoClient::new(root.path());
        assert!(client.is_installed("app-admin/anaconda").is_err());
    }

    #[test]
    fn test_equo_client_is_installed() {
        let root = tempfile::tempdir().unwrap();
        test_utils::create_repository(
            &InstalledRepository::path_in(root.path()),
            &[test_utils::TestPackage::new(1, "net-firewall", "ufw")],
        );
        let client = EquoClient::new(root.path());
        assert!(client.is_installed("net-firewall/ufw").unwrap());
        assert!(!client.is_installed("app-admin/anaconda").unwrap());
    }
}
