//! Backend of the Sabayon live installer: copies the running live image onto
//! a prepared target root and turns it into an installed system.

use std::path::Path;

use log::info;

use sabayon_api::{config::InstallConfig, error::InstallerError};

pub mod cli;
pub mod engine;
pub mod entropy;
mod health;
pub mod install_class;
mod logging;
pub mod network;
pub mod progress;
mod subsystems;
pub mod validation;

pub use logging::{background_log::BackgroundLog, multilog::MultiLogger, phase_trace::PhaseTrace};

/// Installer version, as reported by `--version`.
pub const INSTALLER_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Run the whole installation described by the configuration at
/// `config_path`.
pub fn install(config_path: impl AsRef<Path>) -> Result<(), InstallerError> {
    let config = InstallConfig::from_file(config_path)?;
    engine::install(config)
}

/// Only copy the live image into the target.
pub fn copy(config_path: impl AsRef<Path>) -> Result<(), InstallerError> {
    let config = InstallConfig::from_file(config_path)?;
    engine::copy(config)
}

/// Only write the network configuration of the target.
pub fn configure_network(config_path: impl AsRef<Path>) -> Result<(), InstallerError> {
    let config = InstallConfig::from_file(config_path)?;
    engine::configure_network(config)
}

/// Print the install classes the running live image offers.
pub fn list_classes() {
    let packages = entropy::EquoClient::new("/");
    for class in install_class::all() {
        if class.is_hidden(&packages) {
            info!("Hiding install class '{}'", class.id);
            continue;
        }
        println!("{:<20} {}", class.id, class.name);
        println!("{:<20} {}", "", class.description);
    }
}
