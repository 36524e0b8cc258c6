use log::{debug, info, warn};

use sabayon_api::{
    config::InstallConfig,
    constants::{
        ASIAN_FONTS_PACKAGES, ASIAN_LANGUAGES, FIREWALL_PACKAGE, INSTALLER_CLEANUP_PACKAGES,
        LANGUAGE_PACK_FAMILIES, REPO_NAME,
    },
    error::InstallerError,
};

use crate::{
    engine::{EngineContext, Subsystem},
    entropy::{EntropyProgress, PackageManager},
};

/// Package changes needing a configured target: mirrors, language support,
/// extra software and removal of the installer itself.
#[derive(Default)]
pub struct PackagesSubsystem;
impl Subsystem for PackagesSubsystem {
    fn name(&self) -> &'static str {
        "packages"
    }

    #[tracing::instrument(name = "packages_post_install", skip_all)]
    fn post_install(&mut self, ctx: &EngineContext) -> Result<(), InstallerError> {
        let options = &ctx.config.packages;
        let mut installer = PackageInstaller::new(ctx.packages.as_ref());

        if options.reorder_mirrors {
            ctx.progress
                .set_text("Reordering Entropy mirrors: can take some time...");
            if let Err(e) = ctx.packages.reorder_mirrors(REPO_NAME) {
                warn!("Mirror reordering failure: {e:?}");
            }
        }

        let wanted = wanted_packages(&ctx.config);
        if !wanted.is_empty() {
            ctx.progress.set_text("Installing additional packages");
            installer.maybe_install(&wanted, ctx);
        }

        if options.cleanup {
            ctx.progress.set_text("Removing installer packages");
            cleanup_packages(ctx.packages.as_ref());
        }
        Ok(())
    }
}

/// Language packs of the configured language. Each family has a pack for the
/// full locale (`pt_BR`) or for the language alone (`pt`), in that order of
/// preference.
fn language_packs(config: &InstallConfig) -> Vec<Vec<String>> {
    let code = config.language_code();
    if code.is_empty() || code == "en" || code == "C" || code == "POSIX" {
        return Vec::new();
    }
    let locale = config.locale();
    LANGUAGE_PACK_FAMILIES
        .iter()
        .map(|family| {
            let mut alternatives = vec![format!("{family}-{locale}")];
            if locale != code {
                alternatives.push(format!("{family}-{code}"));
            }
            alternatives
        })
        .collect()
}

/// Packages the configuration asks for, in installation order. Each entry
/// lists alternatives, the first one available is installed.
fn wanted_packages(config: &InstallConfig) -> Vec<Vec<String>> {
    let options = &config.packages;
    let mut wanted = Vec::new();

    if options.install_language_packs {
        wanted.extend(language_packs(config));
    }
    if ASIAN_LANGUAGES.contains(&config.language_code()) {
        wanted.extend(ASIAN_FONTS_PACKAGES.iter().map(|p| vec![p.to_string()]));
    }
    if options.firewall {
        wanted.push(vec![FIREWALL_PACKAGE.to_string()]);
    }
    wanted.extend(options.extra.iter().map(|p| vec![p.clone()]));

    let mut seen = std::collections::HashSet::new();
    wanted.retain(|alternatives| seen.insert(alternatives.clone()));
    wanted
}

/// Installs packages missing from the target, synchronizing the repositories
/// first. Repositories are synchronized at most once.
struct PackageInstaller<'a> {
    packages: &'a dyn PackageManager,
    synced: Option<bool>,
}

impl<'a> PackageInstaller<'a> {
    fn new(packages: &'a dyn PackageManager) -> Self {
        Self {
            packages,
            synced: None,
        }
    }

    fn sync(&mut self) -> bool {
        let packages = self.packages;
        *self.synced.get_or_insert_with(|| {
            info!("Synchronizing Entropy repositories");
            match packages.sync_repositories() {
                Ok(()) => true,
                Err(e) => {
                    warn!("Cannot download repositories: {e:?}");
                    false
                }
            }
        })
    }

    fn is_installed(&self, package: &str) -> bool {
        self.packages.is_installed(package).unwrap_or_else(|e| {
            warn!("Failed to look up '{package}': {e:?}");
            false
        })
    }

    fn maybe_install(&mut self, wanted: &[Vec<String>], ctx: &EngineContext) {
        let missing: Vec<&Vec<String>> = wanted
            .iter()
            .filter(|alternatives| !alternatives.iter().any(|p| self.is_installed(p)))
            .collect();
        if missing.is_empty() {
            debug!("All wanted packages already installed");
            return;
        }
        if !self.sync() {
            return;
        }

        let mut progress =
            EntropyProgress::new("Installing package", missing.len()).with_progress(&ctx.progress);
        for alternatives in missing {
            progress.step(&alternatives.join(" | "));
            let installed = alternatives.iter().any(|package| {
                match self.packages.install(&[package.clone()]) {
                    Ok(()) => true,
                    Err(e) => {
                        debug!("Cannot install '{package}': {e:?}");
                        false
                    }
                }
            });
            if !installed {
                warn!("Failed to install '{}'", alternatives.join("' or '"));
            }
        }
    }
}

fn cleanup_packages(packages: &dyn PackageManager) {
    for package in INSTALLER_CLEANUP_PACKAGES {
        match packages.is_installed(package) {
            Ok(true) => {
                info!("Removing installer package '{package}'");
                if let Err(e) = packages.remove(&[package.to_string()]) {
                    warn!("Failed to remove '{package}': {e:?}");
                }
            }
            Ok(false) => {}
            Err(e) => warn!("Failed to look up '{package}': {e:?}"),
        }
    }
}
