use std::{
    ffi::OsStr,
    path::{Path, PathBuf},
};

use log::{debug, warn};

use osutils::{
    cmdline::KernelCmdline,
    dependencies::{Dependency, DependencyError},
    path::join_relative,
    virt::Virtualization,
};
use sabayon_api::{
    config::InstallConfig,
    constants::CONTENT_INDEX_PATH_DEFAULT,
    error::{InitializationError, InstallerError, ReportError},
};

use crate::{
    entropy::{EquoClient, InstalledRepository, PackageManager},
    install_class::{self, InstallClass},
    progress::Progress,
};

/// State shared by every subsystem for the duration of an installation.
pub struct EngineContext {
    pub config: InstallConfig,

    pub install_class: &'static InstallClass,

    /// Command line the live system was booted with.
    pub cmdline: KernelCmdline,

    pub virt: Virtualization,

    pub progress: Progress,

    /// Package operations on the target.
    pub packages: Box<dyn PackageManager>,

    /// Root of the running live system. Host state such as the running
    /// drivers, the sound card state or the udev rules is read from here.
    pub system_root: PathBuf,

    /// Scratch index of the live files excluded from the copy.
    pub content_index_path: PathBuf,
}

impl EngineContext {
    pub fn new(config: InstallConfig) -> Result<Self, InstallerError> {
        if !config.live_root.is_dir() {
            return Err(InstallerError::new(InitializationError::MissingLiveRoot {
                path: config.live_root.display().to_string(),
            }));
        }
        if !config.target_root.is_dir() {
            return Err(InstallerError::new(InitializationError::MissingTargetRoot {
                path: config.target_root.display().to_string(),
            }));
        }

        let install_class = install_class::lookup(&config.install_class)?;
        let cmdline = KernelCmdline::current().structured(InitializationError::ReadKernelCmdline)?;
        let virt = Virtualization::detect();
        debug!("Install class: {install_class}, virtualization: {virt:?}");

        Ok(Self {
            packages: Box::new(EquoClient::new(&config.target_root)),
            install_class,
            cmdline,
            virt,
            progress: Progress::new(),
            system_root: PathBuf::from("/"),
            content_index_path: PathBuf::from(CONTENT_INDEX_PATH_DEFAULT),
            config,
        })
    }

    pub fn target(&self) -> &Path {
        &self.config.target_root
    }

    pub fn live_root(&self) -> &Path {
        &self.config.live_root
    }

    /// Absolute path inside the target.
    pub fn target_path(&self, path: impl AsRef<Path>) -> PathBuf {
        join_relative(self.target(), path)
    }

    /// Absolute path on the running live system.
    pub fn system_path(&self, path: impl AsRef<Path>) -> PathBuf {
        join_relative(&self.system_root, path)
    }

    pub fn live_repository_path(&self) -> PathBuf {
        InstalledRepository::path_in(self.live_root())
    }

    /// Whether NetworkManager is dropped in favour of plain interface
    /// configuration.
    pub fn simple_networking(&self) -> bool {
        self.config
            .network
            .simple_networking
            .unwrap_or(self.install_class.simple_networking)
    }

    pub fn is_recovery(&self) -> bool {
        self.config.bootloader.recovery
    }

    /// Run a tool of the target through chroot(1).
    pub fn spawn_chroot<I, S>(
        &self,
        dependency: Dependency,
        args: I,
    ) -> Result<(), Box<DependencyError>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let command = dependency.cmd().with_args(args).in_root(self.target());
        debug!("Running '{}'", command.render_command());
        command.run_and_check()
    }

    /// Like [`Self::spawn_chroot`], but failures are only logged. Returns
    /// whether the tool succeeded.
    pub fn spawn_chroot_silent<I, S>(&self, dependency: Dependency, args: I) -> bool
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        match self.spawn_chroot(dependency, args) {
            Ok(()) => true,
            Err(e) => {
                warn!("{e}");
                false
            }
        }
    }
}

#[cfg(test)]
impl EngineContext {
    /// A context over test directories, recording package operations.
    pub(crate) fn test(live_root: &Path, target_root: &Path) -> Self {
        use crate::entropy::fake::FakePackageManager;

        let config = InstallConfig {
            live_root: live_root.to_owned(),
            target_root: target_root.to_owned(),
            ..Default::default()
        };
        Self {
            install_class: install_class::lookup(&config.install_class).unwrap(),
            cmdline: KernelCmdline::parse(""),
            virt: Virtualization::None,
            progress: Progress::new(),
            packages: Box::<FakePackageManager>::default(),
            system_root: live_root.to_owned(),
            content_index_path: target_root.join("files.db"),
            config,
        }
    }

    pub(crate) fn with_packages(self, packages: impl PackageManager + 'static) -> Self {
        Self {
            packages: Box::new(packages),
            ..self
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use sabayon_api::error::ErrorKind;
    use tempfile::tempdir;

    #[test]
    fn test_missing_roots() {
        let dir = tempdir().unwrap();
        let config = InstallConfig {
            live_root: dir.path().join("livecd"),
            target_root: dir.path().to_owned(),
            ..Default::default()
        };
        assert_eq!(
            EngineContext::new(config).err().unwrap().kind(),
            &ErrorKind::Initialization(InitializationError::MissingLiveRoot {
                path: dir.path().join("livecd").display().to_string()
            })
        );

        let config = InstallConfig {
            live_root: dir.path().to_owned(),
            target_root: dir.path().join("sysimage"),
            ..Default::default()
        };
        assert!(matches!(
            EngineContext::new(config).err().unwrap().kind(),
            ErrorKind::Initialization(InitializationError::MissingTargetRoot { .. })
        ));
    }

    #[test]
    fn test_paths_and_networking() {
        let live = tempdir().unwrap();
        let target = tempdir().unwrap();
        let mut ctx = EngineContext::test(live.path(), target.path());

        assert_eq!(
            ctx.target_path("/etc/hostname"),
            target.path().join("etc/hostname")
        );
        assert_eq!(
            ctx.system_path("/etc/asound.state"),
            live.path().join("etc/asound.state")
        );
        assert!(ctx.live_repository_path().starts_with(live.path()));

        assert!(!ctx.simple_networking());
        ctx.install_class = install_class::lookup("corecd").unwrap();
        assert!(ctx.simple_networking());
        ctx.config.network.simple_networking = Some(false);
        assert!(!ctx.simple_networking());
    }
}
