//! Kernel command line of the live system.

use std::path::Path;

use anyhow::{Context, Error};

const PROC_CMDLINE: &str = "/proc/cmdline";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KernelCmdline {
    raw: String,
}

impl KernelCmdline {
    /// Read the command line the running kernel was booted with.
    pub fn current() -> Result<Self, Error> {
        Self::read(PROC_CMDLINE)
    }

    pub fn read(path: impl AsRef<Path>) -> Result<Self, Error> {
        let raw = std::fs::read_to_string(path.as_ref()).context(format!(
            "Failed to read kernel command line from '{}'",
            path.as_ref().display()
        ))?;
        Ok(Self::parse(&raw))
    }

    pub fn parse(raw: &str) -> Self {
        Self {
            raw: raw.trim().to_string(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn tokens(&self) -> impl Iterator<Item = &str> {
        self.raw.split_whitespace()
    }

    /// Whether a bare flag such as `noefi` is present.
    pub fn has_flag(&self, flag: &str) -> bool {
        self.tokens().any(|token| token == flag)
    }

    /// Whether any of the flags is present.
    pub fn has_any_flag(&self, flags: &[&str]) -> bool {
        flags.iter().any(|flag| self.has_flag(flag))
    }

    /// Value of the last `key=value` parameter with the given key.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.tokens()
            .filter_map(|token| token.split_once('='))
            .filter(|(k, _)| *k == key)
            .map(|(_, v)| v)
            .last()
    }

    /// Whether `needle` appears anywhere in the command line.
    pub fn contains(&self, needle: &str) -> bool {
        self.raw.contains(needle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse() {
        let cmdline = KernelCmdline::parse(
            "BOOT_IMAGE=/boot/sabayon root=live:CDLABEL=SABAYON steaminstall noefi quiet\n",
        );
        assert!(cmdline.has_flag("steaminstall"));
        assert!(cmdline.has_flag("noefi"));
        assert!(!cmdline.has_flag("mceinstall"));
        assert!(cmdline.has_any_flag(&["sabayonmce", "quiet"]));
        assert_eq!(cmdline.get("root"), Some("live:CDLABEL=SABAYON"));
        assert_eq!(cmdline.get("console"), None);
        assert!(cmdline.contains("CDLABEL"));
    }

    #[test]
    fn test_get_last_wins() {
        let cmdline = KernelCmdline::parse("console=tty0 console=ttyS0");
        assert_eq!(cmdline.get("console"), Some("ttyS0"));
    }

    #[test]
    fn test_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cmdline");
        std::fs::write(&path, "sabayonmce\n").unwrap();
        assert!(KernelCmdline::read(&path).unwrap().has_flag("sabayonmce"));
        assert!(KernelCmdline::read(dir.path().join("missing")).is_err());
    }
}
