//! Filtered copy of the live image into the target.
//!
//! The packages left out of the installed system are decided first. Their
//! files and directories are recorded in a scratch [`ContentIndex`] so that
//! the copy can skip them. Once the target is mounted for chroot use, the
//! packages are removed from the target repository and their leftover
//! directories pruned.

use std::{
    fs::{self, File, FileTimes},
    io,
    os::unix::fs::{chown, symlink, MetadataExt},
    path::{Path, PathBuf},
    time::SystemTime,
};

use anyhow::{Context, Error};
use log::{debug, info, trace, warn};
use walkdir::WalkDir;

use osutils::{dependencies::Dependency, files, path::join_relative};
use sabayon_api::{
    config::InstallConfig,
    constants::{
        ENTROPY_SETS_DIR, INSTALLER_PACKAGE, INSTALL_BASE_SET, LANGUAGE_PACK_FAMILIES,
    },
    error::{InitializationError, InstallerError, ReportError, ServicingError},
};

use crate::{
    engine::{EngineContext, Subsystem},
    entropy::{
        ContentIndex, ContentType, EntropyProgress, InstalledRepository, PackageId, PackageManager,
    },
    progress::{used_space, DiskUsageMonitor, Progress},
};

/// Files of the live image that must not reach the target.
const SKIPPED_FILES: &[&str] = &["/boot/grub/grub.conf", "/boot/grub/grub.cfg"];

/// Number of files copied between two progress updates.
const PROGRESS_INTERVAL: usize = 300;

#[derive(Default)]
pub struct LiveCopySubsystem {
    packages_to_remove: Vec<PackageId>,
}

impl Subsystem for LiveCopySubsystem {
    fn name(&self) -> &'static str {
        "live-copy"
    }

    #[tracing::instrument(name = "live_copy_prepare", skip_all)]
    fn prepare(&mut self, ctx: &EngineContext) -> Result<(), InstallerError> {
        if ctx.is_recovery() {
            debug!("Recovering an existing installation, nothing to copy");
            return Ok(());
        }

        let live_path = ctx.live_repository_path();
        let live_repository = InstalledRepository::open(&live_path).structured(
            InitializationError::OpenLiveRepository {
                path: live_path.display().to_string(),
            },
        )?;

        ctx.progress.set_text("Generating list of files to copy");
        self.packages_to_remove = packages_to_remove(&live_repository, &ctx.config)
            .structured(ServicingError::BuildContentIndex)?;

        let mut index = ContentIndex::create(&ctx.content_index_path)
            .structured(ServicingError::BuildContentIndex)?;
        build_content_index(
            &live_repository,
            &mut index,
            &self.packages_to_remove,
            &ctx.progress,
        )
        .structured(ServicingError::BuildContentIndex)?;
        Ok(())
    }

    #[tracing::instrument(name = "live_copy_provision", skip_all)]
    fn provision(&mut self, ctx: &EngineContext) -> Result<(), InstallerError> {
        let index = ContentIndex::open(&ctx.content_index_path)
            .structured(ServicingError::CopyLiveImage)?;

        ctx.progress.set_label("Installing Sabayon onto hard drive.");
        let monitor = match used_space(ctx.live_root()).and_then(|expected| {
            DiskUsageMonitor::start(ctx.progress.clone(), ctx.target(), expected)
        }) {
            Ok(monitor) => Some(monitor),
            Err(e) => {
                warn!("Copy progress will not be estimated: {e:?}");
                None
            }
        };
        let copied = copy_live_image(ctx.live_root(), ctx.target(), &index, &ctx.progress);
        drop(monitor);
        let copied = copied.structured(ServicingError::CopyLiveImage)?;
        info!("Copied {copied} files into '{}'", ctx.target().display());
        Ok(())
    }

    /// Package removal runs equo in the target, so it waits for the special
    /// directories to be mounted.
    #[tracing::instrument(name = "live_copy_configure", skip_all)]
    fn configure(&mut self, ctx: &EngineContext) -> Result<(), InstallerError> {
        let index = ContentIndex::open(&ctx.content_index_path)
            .structured(ServicingError::PruneDirectories)?;

        let live_repository = InstalledRepository::open(ctx.live_repository_path())
            .structured(ServicingError::RemovePackages)?;
        remove_unwanted_packages(
            ctx.packages.as_ref(),
            &live_repository,
            &self.packages_to_remove,
            &ctx.progress,
        )
        .structured(ServicingError::RemovePackages)?;

        let target_repository = InstalledRepository::open_in(ctx.target())
            .structured(ServicingError::PruneDirectories)?;
        prune_directories(ctx.target(), &index, &target_repository)
            .structured(ServicingError::PruneDirectories)?;

        write_install_base_set(ctx.target(), &target_repository).structured(
            ServicingError::WritePackageSet {
                name: INSTALL_BASE_SET.into(),
            },
        )?;

        if let Err(e) = index.destroy() {
            warn!("Failed to remove the content index: {e:?}");
        }
        ctx.progress.set_text("Installation complete");
        Ok(())
    }
}

/// Whether a language pack suffix (`it`, `pt_BR`, `en-GB`) serves the
/// configured language.
fn is_wanted_language(suffix: &str, config: &InstallConfig) -> bool {
    suffix == config.language_code()
        || suffix
            .replace('-', "_")
            .eq_ignore_ascii_case(config.locale())
}

/// Packages of the live image that are not installed on the target: the
/// installer itself and the language packs of other languages. System
/// packages are never removed.
pub fn packages_to_remove(
    repository: &InstalledRepository,
    config: &InstallConfig,
) -> Result<Vec<PackageId>, Error> {
    let mut packages: Vec<PackageId> = repository
        .match_package(INSTALLER_PACKAGE)?
        .into_iter()
        .take(1)
        .collect();

    if config.packages.remove_language_packs {
        for family in LANGUAGE_PACK_FAMILIES {
            for (id, suffix) in repository.match_family(family)? {
                if is_wanted_language(&suffix, config) {
                    trace!("Keeping {family}-{suffix}");
                    continue;
                }
                if repository.is_system_package(id)? {
                    debug!("Not removing system package {family}-{suffix}");
                    continue;
                }
                if !packages.contains(&id) {
                    packages.push(id);
                }
            }
        }
    }

    debug!("{} package(s) will not be installed", packages.len());
    Ok(packages)
}

/// Content is recorded by its multilib-less path, the live image carries
/// `/usr/lib64` and `/lib64` as links.
fn strip_lib64(path: &str) -> String {
    if path.contains("/usr/lib64") {
        path.replace("/usr/lib64", "/usr/lib")
    } else if path.contains("/lib64") {
        path.replace("/lib64", "/lib")
    } else {
        path.to_string()
    }
}

/// Record the files and directories of `packages` in `index`.
pub fn build_content_index(
    repository: &InstalledRepository,
    index: &mut ContentIndex,
    packages: &[PackageId],
    progress: &Progress,
) -> Result<(), Error> {
    for (current, id) in packages.iter().enumerate() {
        for (file, kind) in repository.content(*id)? {
            if matches!(kind, ContentType::Dir | ContentType::Obj) {
                index.add(&strip_lib64(&file), kind)?;
            }
        }
        progress.set_fraction((current + 1) as f64 / packages.len() as f64);
    }

    index.commit()?;
    index.create_indexes()?;
    debug!("Content index holds {} entries", index.len()?);
    Ok(())
}

fn is_loop_or_missing(e: &io::Error) -> bool {
    matches!(e.raw_os_error(), Some(libc::ELOOP) | Some(libc::ENOENT))
}

fn set_times(path: &Path, accessed: SystemTime, modified: SystemTime) -> io::Result<()> {
    File::open(path)?.set_times(FileTimes::new().set_accessed(accessed).set_modified(modified))
}

/// Copy a regular file with its owner, mode and timestamps.
fn copy_regular(from: &Path, to: &Path) -> io::Result<()> {
    let metadata = fs::metadata(from)?;
    fs::copy(from, to)?;
    chown(to, Some(metadata.uid()), Some(metadata.gid()))?;
    fs::set_permissions(to, metadata.permissions())?;
    set_times(to, metadata.accessed()?, metadata.modified()?)
}

/// Copy anything else through `cp -a`. Failures are logged.
fn copy_other(from: &Path, to: &Path) {
    if let Err(e) = Dependency::Cp
        .cmd()
        .with_arg("-a")
        .with_arg(from)
        .with_arg(to)
        .run_and_check()
    {
        warn!("Failed to copy '{}': {e}", from.display());
    }
}

fn copy_symlink(from: &Path, to: &Path) -> io::Result<()> {
    let link = fs::read_link(from)?;
    if fs::symlink_metadata(to).is_ok_and(|m| !m.is_dir()) {
        fs::remove_file(to)?;
    }
    symlink(link, to)
}

/// Clear what stands in the way of a directory at `to`: a broken link or a
/// plain file.
fn clear_directory_path(to: &Path) -> io::Result<()> {
    if let Ok(metadata) = fs::symlink_metadata(to) {
        if (metadata.file_type().is_symlink() && !to.exists()) || metadata.is_file() {
            trace!("Removing '{}' in the way of a directory", to.display());
            fs::remove_file(to)?;
        }
    }
    Ok(())
}

/// Directory timestamps to restore once every entry has been written.
type DirectoryTimes = Vec<(PathBuf, SystemTime, SystemTime)>;

fn copy_directory(from: &Path, to: &Path, times: &mut DirectoryTimes) -> io::Result<()> {
    clear_directory_path(to)?;
    if !to.is_dir() {
        fs::create_dir_all(to)?;
    }
    if fs::symlink_metadata(to)?.file_type().is_symlink() {
        return Ok(());
    }

    let metadata = fs::metadata(from)?;
    chown(to, Some(metadata.uid()), Some(metadata.gid()))?;
    fs::set_permissions(to, metadata.permissions())?;
    times.push((to.to_owned(), metadata.accessed()?, metadata.modified()?));
    Ok(())
}

/// A live directory that is a link is copied as a link, unless the target
/// already has a real directory there.
fn copy_directory_link(from: &Path, to: &Path) -> io::Result<()> {
    clear_directory_path(to)?;
    if to.is_dir() {
        return Ok(());
    }
    copy_symlink(from, to)
}

/// Copy the live image at `live_root` into `target`, skipping the files
/// recorded in `index`. Returns the number of files copied.
pub fn copy_live_image(
    live_root: &Path,
    target: &Path,
    index: &ContentIndex,
    progress: &Progress,
) -> Result<usize, Error> {
    let total = WalkDir::new(live_root)
        .min_depth(1)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| !entry.file_type().is_dir())
        .count();
    info!(
        "Copying {total} files from '{}' to '{}'",
        live_root.display(),
        target.display()
    );

    let mut directory_times = DirectoryTimes::new();
    let mut current = 0;
    let mut copied = 0;
    let mut walker = WalkDir::new(live_root)
        .min_depth(1)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter();
    while let Some(entry) = walker.next().transpose()? {
        let relative = entry
            .path()
            .strip_prefix(live_root)
            .context("Walked outside of the live image")?;
        let from = entry.path();
        let to = target.join(relative);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            copy_directory(from, &to, &mut directory_times)
                .context(format!("Failed to create directory '{}'", to.display()))?;
            continue;
        }
        if file_type.is_symlink() && from.is_dir() {
            copy_directory_link(from, &to)
                .context(format!("Failed to link directory '{}'", to.display()))?;
            continue;
        }

        current += 1;
        if current % PROGRESS_INTERVAL == 0 {
            progress.set_text(format!("Copying files ({current}/{total})"));
        }

        let absolute = Path::new("/").join(relative);
        let absolute = absolute.to_string_lossy();
        if SKIPPED_FILES.contains(&absolute.as_ref()) {
            trace!("Skipping '{absolute}'");
            continue;
        }
        match index.contains(&absolute) {
            Ok(true) => continue,
            Ok(false) => (),
            Err(e) => warn!("Failed to look up '{absolute}' in the content index: {e:?}"),
        }

        if file_type.is_file() {
            match copy_regular(from, &to) {
                Ok(()) => (),
                Err(e) if is_loop_or_missing(&e) => copy_other(from, &to),
                Err(e) => {
                    return Err(e).context(format!("Failed to copy '{}'", from.display()))
                }
            }
        } else if file_type.is_symlink() {
            copy_symlink(from, &to)
                .context(format!("Failed to copy link '{}'", from.display()))?;
        } else {
            copy_other(from, &to);
        }
        copied += 1;
    }

    for (path, accessed, modified) in directory_times {
        if let Err(e) = set_times(&path, accessed, modified) {
            debug!("Failed to set timestamps of '{}': {e}", path.display());
        }
    }
    progress.set_text(format!("Copying files ({total}/{total})"));
    Ok(copied)
}

/// Remove `packages` from the target. A package that cannot be removed is
/// logged and left in place.
pub fn remove_unwanted_packages(
    package_manager: &dyn PackageManager,
    live_repository: &InstalledRepository,
    packages: &[PackageId],
    progress: &Progress,
) -> Result<(), Error> {
    if packages.is_empty() {
        return Ok(());
    }

    progress.set_label("Cleaning packages");
    let mut entropy_progress = EntropyProgress::new("Cleaning package", packages.len())
        .with_progress(progress);
    for id in packages {
        let Some(atom) = live_repository.atom(*id)? else {
            continue;
        };
        entropy_progress.step(&atom);
        if let Err(e) = package_manager.remove(&[format!("={atom}")]) {
            warn!("Failed to remove {atom}: {e:?}");
        }
    }
    Ok(())
}

/// Remove the directories of removed packages that no installed package
/// owns, repeating until no directory can be removed. Returns the number of
/// directories removed.
pub fn prune_directories(
    target: &Path,
    index: &ContentIndex,
    repository: &InstalledRepository,
) -> Result<usize, Error> {
    let directories = index.directories()?;
    let mut removed = 0;
    loop {
        let mut changed = false;
        for directory in &directories {
            let tree = join_relative(target, directory);
            if !tree.is_dir() || repository.is_file_available(directory)? {
                continue;
            }
            if fs::remove_dir(&tree).is_ok() {
                trace!("Pruned '{}'", tree.display());
                changed = true;
                removed += 1;
            }
        }
        if !changed {
            break;
        }
    }
    debug!("Pruned {removed} directories");
    Ok(removed)
}

/// Write the `install_base` package set: one `key:slot` line per installed
/// package, ordered by atom.
pub fn write_install_base_set(
    target: &Path,
    repository: &InstalledRepository,
) -> Result<PathBuf, Error> {
    let contents: String = repository
        .list_packages()?
        .iter()
        .map(|package| format!("{}:{}\n", package.key, package.slot))
        .collect();

    let sets_dir = join_relative(target, ENTROPY_SETS_DIR);
    files::create_dirs(&sets_dir)?;
    files::set_mode(&sets_dir, 0o755)?;
    let path = sets_dir.join(INSTALL_BASE_SET);
    files::write_file(&path, 0o644, contents.as_bytes())?;
    debug!("Wrote package set '{}'", path.display());
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::os::unix::fs::PermissionsExt;

    use tempfile::tempdir;

    use crate::entropy::{
        fake::FakePackageManager,
        test_utils::{create_repository, TestPackage},
    };

    fn sample_live_repository(root: &Path) -> InstalledRepository {
        create_repository(
            &InstalledRepository::path_in(root),
            &[
                TestPackage::new(1, "sys-apps", "baselayout").system(),
                TestPackage::new(2, "app-admin", "anaconda").with_content(&[
                    ("/usr/lib64/anaconda", "dir"),
                    ("/usr/lib64/anaconda/run.py", "obj"),
                    ("/usr/bin/anaconda", "sym"),
                ]),
                TestPackage::new(3, "kde-base", "kde-l10n-it"),
                TestPackage::new(4, "kde-base", "kde-l10n-de").with_content(&[
                    ("/usr/share/locale/de", "dir"),
                    ("/usr/share/locale/de/kde.mo", "obj"),
                ]),
                TestPackage::new(5, "app-office", "libreoffice-l10n-pt_BR"),
                TestPackage::new(6, "app-dicts", "myspell-fr").system(),
            ],
        );
        InstalledRepository::open_in(root).unwrap()
    }

    fn italian() -> InstallConfig {
        InstallConfig {
            language: "it_IT.UTF-8".into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_packages_to_remove() {
        let live = tempdir().unwrap();
        let repository = sample_live_repository(live.path());

        assert_eq!(
            packages_to_remove(&repository, &italian()).unwrap(),
            vec![2, 4, 5]
        );

        let brazilian = InstallConfig {
            language: "pt_BR.UTF-8".into(),
            ..Default::default()
        };
        assert_eq!(
            packages_to_remove(&repository, &brazilian).unwrap(),
            vec![2, 3, 4]
        );

        let mut keep_all = italian();
        keep_all.packages.remove_language_packs = false;
        assert_eq!(packages_to_remove(&repository, &keep_all).unwrap(), vec![2]);
    }

    #[test]
    fn test_strip_lib64() {
        assert_eq!(strip_lib64("/usr/lib64/libfoo.so"), "/usr/lib/libfoo.so");
        assert_eq!(strip_lib64("/lib64/libc.so.6"), "/lib/libc.so.6");
        assert_eq!(strip_lib64("/usr/share/doc"), "/usr/share/doc");
    }

    #[test]
    fn test_build_content_index() {
        let live = tempdir().unwrap();
        let repository = sample_live_repository(live.path());
        let mut index = ContentIndex::create(live.path().join("files.db")).unwrap();

        build_content_index(&repository, &mut index, &[2, 4], &Progress::new()).unwrap();
        assert!(index.contains("/usr/lib/anaconda/run.py").unwrap());
        assert!(index.contains("/usr/share/locale/de/kde.mo").unwrap());
        assert!(!index.contains("/usr/bin/anaconda").unwrap());
        assert_eq!(
            index.directories().unwrap(),
            vec!["/usr/share/locale/de", "/usr/lib/anaconda"]
        );
    }

    #[test]
    fn test_copy_live_image() {
        let live = tempdir().unwrap();
        let target = tempdir().unwrap();
        let root = live.path();

        fs::create_dir_all(root.join("etc/skel")).unwrap();
        fs::write(root.join("etc/hostname"), "live\n").unwrap();
        fs::set_permissions(
            root.join("etc/hostname"),
            fs::Permissions::from_mode(0o600),
        )
        .unwrap();
        fs::create_dir_all(root.join("usr/share/locale/de")).unwrap();
        fs::write(root.join("usr/share/locale/de/kde.mo"), "x").unwrap();
        fs::create_dir_all(root.join("boot/grub")).unwrap();
        fs::write(root.join("boot/grub/grub.cfg"), "menuentry").unwrap();
        fs::create_dir_all(root.join("usr/lib")).unwrap();
        symlink("lib", root.join("usr/lib64")).unwrap();
        symlink("hostname", root.join("etc/hostname.link")).unwrap();

        // In the way of directories of the live image
        fs::create_dir_all(target.path().join("etc")).unwrap();
        fs::write(target.path().join("etc/skel"), "file").unwrap();
        symlink("/nonexistent", target.path().join("boot")).unwrap();

        let index_dir = tempdir().unwrap();
        let mut index = ContentIndex::create(index_dir.path().join("files.db")).unwrap();
        index.add("/usr/share/locale/de/kde.mo", ContentType::Obj).unwrap();
        index.add("/usr/share/locale/de", ContentType::Dir).unwrap();
        index.commit().unwrap();

        let copied = copy_live_image(root, target.path(), &index, &Progress::new()).unwrap();
        assert_eq!(copied, 2);

        let t = target.path();
        assert_eq!(fs::read_to_string(t.join("etc/hostname")).unwrap(), "live\n");
        assert_eq!(
            fs::metadata(t.join("etc/hostname")).unwrap().permissions().mode() & 0o777,
            0o600
        );
        assert_eq!(
            fs::read_link(t.join("etc/hostname.link")).unwrap(),
            Path::new("hostname")
        );
        assert!(t.join("etc/skel").is_dir());
        assert!(t.join("boot/grub").is_dir());
        assert!(!t.join("boot/grub/grub.cfg").exists());
        assert!(t.join("usr/share/locale/de").is_dir());
        assert!(!t.join("usr/share/locale/de/kde.mo").exists());
        assert_eq!(fs::read_link(t.join("usr/lib64")).unwrap(), Path::new("lib"));
    }

    #[test]
    fn test_copy_keeps_real_directory_over_link() {
        let live = tempdir().unwrap();
        let target = tempdir().unwrap();
        fs::create_dir_all(live.path().join("var/real")).unwrap();
        symlink("real", live.path().join("var/run")).unwrap();
        fs::create_dir_all(target.path().join("var/run")).unwrap();

        let index_dir = tempdir().unwrap();
        let index = ContentIndex::create(index_dir.path().join("files.db")).unwrap();
        copy_live_image(live.path(), target.path(), &index, &Progress::new()).unwrap();

        let metadata = fs::symlink_metadata(target.path().join("var/run")).unwrap();
        assert!(metadata.is_dir());
    }

    #[test]
    fn test_remove_unwanted_packages() {
        let live = tempdir().unwrap();
        let repository = sample_live_repository(live.path());
        let packages = FakePackageManager::default();
        let progress = Progress::new();

        remove_unwanted_packages(&packages, &repository, &[2, 42, 4], &progress).unwrap();
        assert_eq!(
            packages.calls(),
            vec![
                "remove =app-admin/anaconda-1.0",
                "remove =kde-base/kde-l10n-de-1.0"
            ]
        );
        assert_eq!(progress.snapshot().label, "Cleaning packages");

        remove_unwanted_packages(&packages, &repository, &[], &progress).unwrap();
        assert_eq!(packages.calls().len(), 2);
    }

    #[test]
    fn test_packages_removed_after_copy() {
        let live = tempdir().unwrap();
        let target = tempdir().unwrap();
        sample_live_repository(live.path());
        let packages = FakePackageManager::default();
        let ctx = EngineContext::test(live.path(), target.path()).with_packages(packages.clone());

        let mut subsystem = LiveCopySubsystem::default();
        subsystem.prepare(&ctx).unwrap();
        subsystem.provision(&ctx).unwrap();
        assert!(packages.calls().is_empty());
        assert!(InstalledRepository::path_in(target.path()).is_file());

        subsystem.configure(&ctx).unwrap();
        assert!(packages
            .calls()
            .contains(&"remove =app-admin/anaconda-1.0".to_string()));
        assert!(target
            .path()
            .join("etc/entropy/packages/sets/install_base")
            .is_file());
        assert!(!ctx.content_index_path.exists());
    }

    #[test]
    fn test_prune_directories() {
        let target = tempdir().unwrap();
        create_repository(
            &InstalledRepository::path_in(target.path()),
            &[TestPackage::new(1, "sys-apps", "man-pages")
                .with_content(&[("/usr/share/man", "dir")])],
        );
        let repository = InstalledRepository::open_in(target.path()).unwrap();

        let t = target.path();
        fs::create_dir_all(t.join("usr/share/man/de/man1")).unwrap();
        fs::create_dir_all(t.join("usr/share/locale/de")).unwrap();
        fs::write(t.join("usr/share/locale/de/other.mo"), "x").unwrap();

        let index_dir = tempdir().unwrap();
        let mut index = ContentIndex::create(index_dir.path().join("files.db")).unwrap();
        for dir in [
            "/usr/share/man",
            "/usr/share/man/de",
            "/usr/share/man/de/man1",
            "/usr/share/locale/de",
        ] {
            index.add(dir, ContentType::Dir).unwrap();
        }
        index.commit().unwrap();

        assert_eq!(prune_directories(t, &index, &repository).unwrap(), 2);
        assert!(!t.join("usr/share/man/de").exists());
        // Owned by an installed package
        assert!(t.join("usr/share/man").is_dir());
        // Not empty
        assert!(t.join("usr/share/locale/de").is_dir());
    }

    #[test]
    fn test_write_install_base_set() {
        let target = tempdir().unwrap();
        let repository = sample_live_repository(target.path());

        let path = write_install_base_set(target.path(), &repository).unwrap();
        assert_eq!(
            path,
            target.path().join("etc/entropy/packages/sets/install_base")
        );
        assert_eq!(
            fs::read_to_string(path).unwrap(),
            "app-admin/anaconda:0\n\
             app-dicts/myspell-fr:0\n\
             app-office/libreoffice-l10n-pt_BR:0\n\
             kde-base/kde-l10n-de:0\n\
             kde-base/kde-l10n-it:0\n\
             sys-apps/baselayout:0\n"
        );
    }
}
