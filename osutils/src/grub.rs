use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{bail, Context, Error};
use log::{debug, trace};
use regex::Regex;

/// Represents a GRUB defaults file such as `/etc/default/grub`: a shell
/// fragment of `KEY=value` assignments read by grub-mkconfig.
pub struct DefaultGrub {
    path: PathBuf,
    contents: String,
}

impl DefaultGrub {
    /// Load a defaults file from disk.
    pub fn read(path: impl AsRef<Path>) -> Result<Self, Error> {
        if !path.as_ref().exists() {
            bail!(
                "GRUB defaults file does not exist at path: '{}'",
                path.as_ref().display()
            );
        }

        Ok(Self {
            path: path.as_ref().to_owned(),
            contents: fs::read_to_string(path.as_ref())
                .context(format!("Failed to read file '{}'", path.as_ref().display()))?,
        })
    }

    /// Start an empty defaults file that will be written to `path`.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_owned(),
            contents: String::new(),
        }
    }

    pub fn contents(&self) -> &str {
        &self.contents
    }

    /// Drop every line containing `needle`. Returns how many lines were removed.
    pub fn remove_lines_containing(&mut self, needle: &str) -> usize {
        let before = self.contents.lines().count();
        let mut kept: String = self
            .contents
            .lines()
            .filter(|line| !line.contains(needle))
            .collect::<Vec<_>>()
            .join("\n");
        if !kept.is_empty() {
            kept.push('\n');
        }
        let removed = before - kept.lines().count();
        trace!("Removed {removed} line(s) containing '{needle}'");
        self.contents = kept;
        removed
    }

    /// Read the value assigned to `key`, without surrounding quotes.
    pub fn get(&self, key: &str) -> Option<String> {
        let re = Self::assignment_regex(key).ok()?;
        re.captures_iter(&self.contents)
            .last()
            .map(|caps| caps[2].trim_matches('"').trim_matches('\'').to_string())
    }

    /// Set `key` to `value`, replacing every existing assignment or appending
    /// a new one.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), Error> {
        let re = Self::assignment_regex(key)?;
        let line = format!("{key}={value}");
        if re.is_match(&self.contents) {
            debug!("Updating {key} in '{}'", self.path.display());
            self.contents = re
                .replace_all(&self.contents, |caps: &regex::Captures| {
                    format!("{}{line}", &caps[1])
                })
                .into_owned();
        } else {
            debug!("Adding {key} to '{}'", self.path.display());
            if !self.contents.is_empty() && !self.contents.ends_with('\n') {
                self.contents.push('\n');
            }
            self.contents.push_str(&line);
            self.contents.push('\n');
        }
        Ok(())
    }

    /// Append a raw line.
    pub fn push_line(&mut self, line: &str) {
        if !self.contents.is_empty() && !self.contents.ends_with('\n') {
            self.contents.push('\n');
        }
        self.contents.push_str(line);
        self.contents.push('\n');
    }

    pub fn write(&self) -> Result<(), Error> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .context(format!("Failed to create '{}'", parent.display()))?;
        }
        fs::write(&self.path, self.contents.as_bytes())
            .context(format!("Failed to write '{}'", self.path.display()))
    }

    // Capture group 1 is the indentation, group 2 the assigned value.
    fn assignment_regex(key: &str) -> Result<Regex, Error> {
        Regex::new(&format!(r"(?m)^([ \t]*){}=(.*)$", regex::escape(key)))
            .context("Failed to build assignment pattern")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use indoc::indoc;

    const DEFAULT_GRUB: &str = indoc! {r#"
        GRUB_DISTRIBUTOR="Sabayon"
        GRUB_TIMEOUT=5
        GRUB_CMDLINE_LINUX="$(cat /proc/cmdline)"
        # GRUB_TIMEOUT=2
    "#};

    #[test]
    fn test_remove_lines_containing() {
        let mut grub = DefaultGrub::new("/tmp/grub");
        grub.contents = DEFAULT_GRUB.to_string();
        assert_eq!(grub.remove_lines_containing("/proc/cmdline"), 1);
        assert!(!grub.contents().contains("/proc/cmdline"));
        assert!(grub.contents().ends_with("# GRUB_TIMEOUT=2\n"));
        assert_eq!(grub.remove_lines_containing("/proc/cmdline"), 0);
    }

    #[test]
    fn test_get_and_set() {
        let mut grub = DefaultGrub::new("/tmp/grub");
        grub.contents = DEFAULT_GRUB.to_string();

        assert_eq!(grub.get("GRUB_DISTRIBUTOR"), Some("Sabayon".into()));
        assert_eq!(grub.get("GRUB_TIMEOUT"), Some("5".into()));
        assert_eq!(grub.get("GRUB_DEFAULT"), None);

        grub.set("GRUB_TIMEOUT", "10").unwrap();
        assert_eq!(grub.get("GRUB_TIMEOUT"), Some("10".into()));
        assert!(grub.contents().contains("# GRUB_TIMEOUT=2"));

        grub.set("GRUB_DEFAULT", "saved").unwrap();
        assert!(grub.contents().ends_with("GRUB_DEFAULT=saved\n"));
    }

    #[test]
    fn test_read_write() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("etc/default/grub");
        assert!(DefaultGrub::read(&path).is_err());

        let mut grub = DefaultGrub::new(&path);
        grub.push_line("# header");
        grub.push_line("GRUB_CMDLINE_LINUX=\"${GRUB_CMDLINE_LINUX} quiet\"");
        grub.write().unwrap();

        let grub = DefaultGrub::read(&path).unwrap();
        assert_eq!(
            grub.contents(),
            "# header\nGRUB_CMDLINE_LINUX=\"${GRUB_CMDLINE_LINUX} quiet\"\n"
        );
        assert_eq!(
            grub.get("GRUB_CMDLINE_LINUX"),
            Some("${GRUB_CMDLINE_LINUX} quiet".into())
        );
    }
}
