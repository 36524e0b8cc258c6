use std::path::Path;

use anyhow::{Context, Error};

use sabayon_api::config::CryptDevice;

const CRYPTTAB_HEADER: &str = "# /etc/crypttab: mappings for encrypted partitions\n\
    # <name> <device> <key file> <options>\n";

/// A representation of a crypttab file.
#[derive(Debug, Default)]
pub struct CryptTab {
    pub entries: Vec<CryptTabEntry>,
}

/// A representation of a single crypttab mapping.
#[derive(Debug, PartialEq, Eq)]
pub struct CryptTabEntry {
    pub name: String,
    pub device: String,
    pub key_file: Option<String>,
    pub options: Vec<String>,
}

impl CryptTab {
    pub fn from_config(devices: &[CryptDevice]) -> Self {
        Self {
            entries: devices.iter().map(CryptTabEntry::from).collect(),
        }
    }

    /// Write this crypttab to disk at location `path`.
    pub fn write(&self, path: impl AsRef<Path>) -> Result<(), Error> {
        crate::files::write_file(path.as_ref(), 0o644, self.render().as_bytes())
            .with_context(|| format!("Failed to write new {}", path.as_ref().display()))
    }

    /// Render this crypttab as a string.
    pub fn render(&self) -> String {
        let mut rendered = CRYPTTAB_HEADER.to_string();
        rendered.extend(self.entries.iter().map(|entry| entry.render()));
        rendered
    }
}

impl From<&CryptDevice> for CryptTabEntry {
    fn from(device: &CryptDevice) -> Self {
        Self {
            name: device.name.clone(),
            device: device.device.clone(),
            key_file: device.key_file.clone(),
            options: device.options.clone(),
        }
    }
}

impl CryptTabEntry {
    /// Render this entry as a line of crypttab.
    pub fn render(&self) -> String {
        let key_file = self.key_file.as_deref().unwrap_or("none");
        if self.options.is_empty() {
            format!("{} {} {}\n", self.name, self.device, key_file)
        } else {
            format!(
                "{} {} {} {}\n",
                self.name,
                self.device,
                key_file,
                self.options.join(",")
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use indoc::indoc;

    #[test]
    fn test_render() {
        let crypttab = CryptTab::from_config(&[
            CryptDevice {
                name: "luks-root".into(),
                device: "UUID=1234".into(),
                ..Default::default()
            },
            CryptDevice {
                name: "swap".into(),
                device: "/dev/sda2".into(),
                key_file: Some("/dev/urandom".into()),
                options: vec!["swap".into(), "cipher=aes-xts-plain64".into()],
            },
        ]);

        assert_eq!(
            crypttab.render(),
            indoc! {"
                # /etc/crypttab: mappings for encrypted partitions
                # <name> <device> <key file> <options>
                luks-root UUID=1234 none
                swap /dev/sda2 /dev/urandom swap,cipher=aes-xts-plain64
            "}
        );
    }

    #[test]
    fn test_write() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("etc/crypttab");
        CryptTab::default().write(&path).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), CRYPTTAB_HEADER);
    }
}
