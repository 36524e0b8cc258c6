use std::path::{Path, PathBuf};

fn strip_root(path: &Path) -> &Path {
    match path.strip_prefix("/") {
        Ok(relative) => relative,
        Err(_) => path,
    }
}

/// Join an absolute path onto `root`, e.g. ('/mnt/sysimage', '/etc') -> '/mnt/sysimage/etc'.
pub fn join_relative(root: impl AsRef<Path>, path: impl AsRef<Path>) -> PathBuf {
    root.as_ref().join(strip_root(path.as_ref()))
}

/// Express `path`, which lives under `root`, as an absolute path inside
/// `root`. Returns `None` when `path` is not under `root`.
pub fn rebase_absolute(root: impl AsRef<Path>, path: impl AsRef<Path>) -> Option<PathBuf> {
    path.as_ref()
        .strip_prefix(root.as_ref())
        .ok()
        .map(|relative| Path::new("/").join(relative))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_relative() {
        assert_eq!(
            join_relative("/mnt/sysimage", "/etc"),
            Path::new("/mnt/sysimage/etc")
        );
        assert_eq!(
            join_relative("/mnt/sysimage", "etc/hostname"),
            Path::new("/mnt/sysimage/etc/hostname")
        );
        assert_eq!(join_relative("/", "/etc"), Path::new("/etc"));
    }

    #[test]
    fn test_rebase_absolute() {
        assert_eq!(
            rebase_absolute("/mnt/livecd", "/mnt/livecd/usr/bin/ls"),
            Some(PathBuf::from("/usr/bin/ls"))
        );
        assert_eq!(
            rebase_absolute("/mnt/livecd", "/mnt/livecd"),
            Some(PathBuf::from("/"))
        );
        assert_eq!(rebase_absolute("/mnt/livecd", "/etc/passwd"), None);
    }
}
