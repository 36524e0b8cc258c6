use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Error};
use log::{debug, info, warn};

use osutils::{arch, dependencies::Dependency, files, path::join_relative};
use sabayon_api::{
    constants::{SB_DER_MAX_SUFFIX, SB_PRIVATE_KEY, SB_PUBLIC_DER, SB_PUBLIC_X509},
    error::InstallerError,
};

use crate::engine::{EngineContext, Subsystem};

/// Generates the SecureBoot key pair of the installed system on EFI machines.
#[derive(Default)]
pub struct SecureBootSubsystem;
impl Subsystem for SecureBootSubsystem {
    fn name(&self) -> &'static str {
        "secureboot"
    }

    #[tracing::instrument(name = "secureboot_configuration", skip_all)]
    fn configure(&mut self, ctx: &EngineContext) -> Result<(), InstallerError> {
        if !arch::is_efi() {
            debug!("Not booted through EFI, skipping SecureBoot keys");
            return Ok(());
        }

        if let Err(e) = generate_keys(ctx.target()) {
            warn!("Failed to generate SecureBoot keys: {e:?}");
        }
        Ok(())
    }
}

/// Picks where the DER certificate goes without clobbering one left by a
/// previous installation: `enroll-this.cer`, then `enroll-this.cer.1` and so
/// on.
fn der_path(target: &Path) -> Result<PathBuf, Error> {
    let base = join_relative(target, SB_PUBLIC_DER);
    if base.symlink_metadata().is_err() {
        return Ok(base);
    }

    for suffix in 1..SB_DER_MAX_SUFFIX {
        let mut candidate = base.clone().into_os_string();
        candidate.push(format!(".{suffix}"));
        let candidate = PathBuf::from(candidate);
        if candidate.symlink_metadata().is_err() {
            return Ok(candidate);
        }
    }

    bail!(
        "No free name for the SecureBoot certificate next to '{}'",
        base.display()
    )
}

fn generate_keys(target: &Path) -> Result<(), Error> {
    let private_key = join_relative(target, SB_PRIVATE_KEY);
    let public_x509 = join_relative(target, SB_PUBLIC_X509);
    let public_der = der_path(target)?;

    for path in [&private_key, &public_x509, &public_der] {
        if let Some(parent) = path.parent() {
            files::create_dirs(parent)?;
        }
    }

    info!(
        "Generating SecureBoot keys, certificate to enroll at '{}'",
        public_der.display()
    );
    Dependency::MakeSecureboot
        .cmd()
        .with_args([&private_key, &public_x509, &public_der])
        .run_and_check()
        .context("Failed to run the SecureBoot key generator")
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::fs;

    use tempfile::tempdir;

    #[test]
    fn test_der_path() {
        let target = tempdir().unwrap();
        let base = join_relative(target.path(), SB_PUBLIC_DER);
        assert_eq!(der_path(target.path()).unwrap(), base);

        fs::create_dir_all(base.parent().unwrap()).unwrap();
        fs::write(&base, "cert").unwrap();
        assert_eq!(
            der_path(target.path()).unwrap(),
            PathBuf::from(format!("{}.1", base.display()))
        );

        // Dangling links count as taken
        std::os::unix::fs::symlink("/nonexistent", format!("{}.1", base.display())).unwrap();
        assert_eq!(
            der_path(target.path()).unwrap(),
            PathBuf::from(format!("{}.2", base.display()))
        );
    }

    #[test]
    fn test_der_path_exhausted() {
        let target = tempdir().unwrap();
        let base = join_relative(target.path(), SB_PUBLIC_DER);
        fs::create_dir_all(base.parent().unwrap()).unwrap();
        fs::write(&base, "cert").unwrap();
        for suffix in 1..SB_DER_MAX_SUFFIX {
            fs::write(format!("{}.{suffix}", base.display()), "cert").unwrap();
        }
        assert!(der_path(target.path()).is_err());
    }
}
