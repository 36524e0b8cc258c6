use std::{
    fs::{File, OpenOptions, Permissions},
    io::{ErrorKind, Write},
    os::unix::fs::PermissionsExt,
    path::Path,
};

use anyhow::{bail, Context, Error};
use log::debug;
use nix::unistd::{access, AccessFlags};

/// Creates a file and all parent directories if they don't exist
pub fn create_file<S>(path: S) -> Result<File, Error>
where
    S: AsRef<Path>,
{
    if let Some(parent) = path.as_ref().parent() {
        create_dirs(parent)?;
    }

    File::create(path.as_ref()).context(format!(
        "Could not create file: {}",
        path.as_ref().display()
    ))
}

/// Creates a file and all parent directories if they don't exist, and sets the file mode
pub fn create_file_mode<S>(path: S, mode: u32) -> Result<File, Error>
where
    S: AsRef<Path>,
{
    let file = create_file(path.as_ref())?;
    set_mode(path.as_ref(), mode)?;
    Ok(file)
}

/// Creates all directories in a path if they don't exist
pub fn create_dirs<S>(path: S) -> Result<(), Error>
where
    S: AsRef<Path>,
{
    std::fs::create_dir_all(path.as_ref()).context(format!(
        "Could not create path: {}",
        path.as_ref().display()
    ))
}

pub fn set_mode<S>(path: S, mode: u32) -> Result<(), Error>
where
    S: AsRef<Path>,
{
    std::fs::set_permissions(path.as_ref(), Permissions::from_mode(mode)).context(format!(
        "Could not set permissions {:#o} for file {}",
        mode,
        path.as_ref().display()
    ))
}

/// Reads the content of a file and trims it
pub fn read_file_trim<S>(file_path: &S) -> Result<String, Error>
where
    S: AsRef<Path>,
{
    let content = std::fs::read_to_string(file_path.as_ref()).context(format!(
        "Could not read file contents: {:?}",
        file_path.as_ref()
    ))?;
    Ok(content.trim().to_string())
}

/// Writes to a file, replacing its contents
pub fn write_file<S>(path: S, mode: u32, contents: &[u8]) -> Result<(), Error>
where
    S: AsRef<Path>,
{
    let mut file = create_file_mode(path.as_ref(), mode).context(format!(
        "Could not create file: {}",
        path.as_ref().display()
    ))?;

    file.write_all(contents).context(format!(
        "Could not write to file: {}",
        path.as_ref().display()
    ))?;

    Ok(())
}

/// Appends to a file. When `must_exist` is false the file is created.
pub fn append_file<S>(path: S, must_exist: bool, contents: &[u8]) -> Result<(), Error>
where
    S: AsRef<Path>,
{
    let path = path.as_ref();
    if path.exists() {
        if !path.is_file() {
            bail!("Path exists but is not a file: {}", path.display());
        }
    } else if must_exist {
        bail!("Path does not exist: {}", path.display());
    } else if let Some(parent) = path.parent() {
        create_dirs(parent)?;
    }

    OpenOptions::new()
        .append(true)
        .create(true)
        .open(path)
        .context(format!("Could not open file: {}", path.display()))?
        .write_all(contents)
        .context(format!("Could not append to file: {}", path.display()))
}

/// Rewrites every line of a text file through `f`, keeping the file mode.
pub fn edit_lines<S, F>(path: S, mut f: F) -> Result<(), Error>
where
    S: AsRef<Path>,
    F: FnMut(&str) -> Option<String>,
{
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)
        .context(format!("Could not read file contents: {}", path.display()))?;
    let mode = std::fs::metadata(path)
        .context(format!("Could not get metadata for {}", path.display()))?
        .permissions()
        .mode();

    let mut edited = String::with_capacity(content.len());
    for line in content.lines() {
        if let Some(line) = f(line) {
            edited.push_str(&line);
            edited.push('\n');
        }
    }

    write_file(path, mode, edited.as_bytes())
}

/// Checks whether the current process may write to `path`.
pub fn is_writable<S>(path: S) -> bool
where
    S: AsRef<Path>,
{
    access(path.as_ref(), AccessFlags::W_OK).is_ok()
}

/// Removes a file or symlink. Missing files are not an error.
pub fn remove_file_if_exists<S>(path: S) -> Result<(), Error>
where
    S: AsRef<Path>,
{
    match std::fs::remove_file(path.as_ref()) {
        Ok(()) => {
            debug!("Removed '{}'", path.as_ref().display());
            Ok(())
        }
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).context(format!(
            "Could not remove file: {}",
            path.as_ref().display()
        )),
    }
}

/// Removes a directory tree. Missing directories are not an error.
pub fn remove_dir_all_if_exists<S>(path: S) -> Result<(), Error>
where
    S: AsRef<Path>,
{
    match std::fs::remove_dir_all(path.as_ref()) {
        Ok(()) => {
            debug!("Removed directory '{}'", path.as_ref().display());
            Ok(())
        }
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).context(format!(
            "Could not remove directory: {}",
            path.as_ref().display()
        )),
    }
}

/// Copies `from` to `to` when `from` exists, creating parent directories of
/// `to`. Returns whether anything was copied.
pub fn copy_if_exists<S, D>(from: S, to: D) -> Result<bool, Error>
where
    S: AsRef<Path>,
    D: AsRef<Path>,
{
    if !from.as_ref().is_file() {
        return Ok(false);
    }
    if let Some(parent) = to.as_ref().parent() {
        create_dirs(parent)?;
    }
    std::fs::copy(from.as_ref(), to.as_ref()).context(format!(
        "Could not copy '{}' to '{}'",
        from.as_ref().display(),
        to.as_ref().display()
    ))?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    use tempfile::tempdir;

    #[test]
    fn test_create_file_mode() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("etc/skel/Desktop/rigo.desktop");
        create_file_mode(&path, 0o775).unwrap();
        assert!(path.exists());
        assert_eq!(
            std::fs::metadata(&path).unwrap().permissions().mode() & 0o777,
            0o775
        );
    }

    #[test]
    fn test_read_file_trim() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("running");
        std::fs::write(&path, "  340.108\n").unwrap();
        assert_eq!(read_file_trim(&path).unwrap(), "340.108");
        assert!(read_file_trim(&dir.path().join("missing")).is_err());
    }

    #[test]
    fn test_append_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("package.mask");

        append_file(&path, true, b"x11-drivers/nvidia-drivers\n").unwrap_err();
        assert!(!path.exists());

        append_file(&path, false, b"a\n").unwrap();
        append_file(&path, true, b"b\n").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "a\nb\n");

        append_file(dir.path(), false, b"c\n").unwrap_err();
    }

    #[test]
    fn test_edit_lines() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sudoers");
        write_file(&path, 0o440, b"root ALL=ALL\n%wheel ALL=(ALL) NOPASSWD: ALL\n#drop\n").unwrap();

        edit_lines(&path, |line| match line {
            "#drop" => None,
            l if l.contains("NOPASSWD") => Some(format!("#{l}")),
            l => Some(l.to_string()),
        })
        .unwrap();

        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "root ALL=ALL\n#%wheel ALL=(ALL) NOPASSWD: ALL\n"
        );
        assert_eq!(
            std::fs::metadata(&path).unwrap().permissions().mode() & 0o777,
            0o440
        );
    }

    #[test]
    fn test_remove_if_exists() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("device.map");
        std::fs::write(&file, "").unwrap();
        remove_file_if_exists(&file).unwrap();
        assert!(!file.exists());
        remove_file_if_exists(&file).unwrap();

        let tree = dir.path().join("install-data/drivers");
        create_dirs(&tree).unwrap();
        remove_dir_all_if_exists(dir.path().join("install-data")).unwrap();
        assert!(!tree.exists());
        remove_dir_all_if_exists(dir.path().join("install-data")).unwrap();
    }

    #[test]
    fn test_copy_if_exists() {
        let dir = tempdir().unwrap();
        let from = dir.path().join("asound.state");
        let to = dir.path().join("target/var/lib/alsa/asound.state");

        assert!(!copy_if_exists(&from, &to).unwrap());
        assert!(!to.exists());

        std::fs::write(&from, "state").unwrap();
        assert!(copy_if_exists(&from, &to).unwrap());
        assert_eq!(std::fs::read_to_string(&to).unwrap(), "state");
    }
}
