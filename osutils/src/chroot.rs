use std::{
    mem,
    path::{Path, PathBuf},
};

use log::{debug, info, warn};
use sys_mount::{Mount, MountFlags, Unmount, UnmountDrop, UnmountFlags};

use sabayon_api::error::{InstallerError, ReportError, ServicingError};

/// Special filesystems mounted into the target so that tools run through
/// chroot(1) see a working `/dev`, `/proc` and `/sys`.
const SPECIAL_DIRS: &[(&str, &str)] = &[("devtmpfs", "dev"), ("proc", "proc"), ("sysfs", "sys")];

/// Special directories mounted into a target root.
///
/// Note: Dropping this object unmounts lazily and swallows errors. Call `exit()` to
/// get unmount failures reported.
pub struct ChrootMounts {
    root: PathBuf,
    mounts: Vec<UnmountDrop<Mount>>,
}

impl ChrootMounts {
    /// Mount special directories ('/dev', '/proc', and '/sys') under `root`.
    pub fn enter(root: &Path) -> Result<Self, InstallerError> {
        if !root.exists() {
            return Err(InstallerError::new(ServicingError::ChrootMountSpecialDir {
                dir: root.display().to_string(),
            }));
        }

        info!("Mounting special directories in '{}'", root.display());
        let mut mounts = Vec::with_capacity(SPECIAL_DIRS.len());
        for (fstype, dir) in SPECIAL_DIRS {
            let target = root.join(dir);
            if !target.exists() {
                std::fs::create_dir_all(&target).structured(
                    ServicingError::ChrootMountSpecialDir {
                        dir: format!("/{dir}"),
                    },
                )?;
            }
            debug!("Mounting {fstype} on '{}'", target.display());
            mounts.push(
                Mount::builder()
                    .fstype(*fstype)
                    .flags(MountFlags::empty())
                    .mount(*fstype, &target)
                    .structured(ServicingError::ChrootMountSpecialDir {
                        dir: format!("/{dir}"),
                    })?
                    .into_unmount_drop(UnmountFlags::DETACH),
            );
        }

        Ok(Self {
            root: root.to_owned(),
            mounts,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn execute_and_exit<F, T>(self, f: F) -> Result<T, InstallerError>
    where
        F: FnOnce(&Path) -> Result<T, InstallerError>,
    {
        let result = f(&self.root);

        // If `f` failed its error wins and unmount errors are only logged.
        if let Err(e) = self.exit() {
            if result.is_ok() {
                return Err(e);
            }
            warn!("Encountered secondary error while handling earlier error: {e:?}");
        }
        result
    }

    /// Unmount special directories in reverse mount order.
    pub fn exit(mut self) -> Result<(), InstallerError> {
        info!("Unmounting special directories from '{}'", self.root.display());
        while let Some(mount) = self.mounts.pop() {
            mount
                .unmount(UnmountFlags::empty())
                .structured(ServicingError::ChrootUnmountSpecialDir)?;
            mem::forget(mount);
        }
        Ok(())
    }
}
