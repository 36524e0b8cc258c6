use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    path::PathBuf,
};

use clap::{Parser, Subcommand};
use log::LevelFilter;

use sabayon_api::constants::INSTALL_CONFIG_PATH_DEFAULT;

use crate::INSTALLER_VERSION;

#[derive(Parser, Debug)]
#[clap(version = INSTALLER_VERSION)]
pub struct Cli {
    /// Logging verbosity [OFF, ERROR, WARN, INFO, DEBUG, TRACE]
    #[arg(global = true, short, long, default_value_t = LevelFilter::Debug)]
    pub verbosity: LevelFilter,

    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Install Sabayon from the live image onto the target root
    Install {
        /// The install configuration to apply
        #[clap(index = 1, default_value = INSTALL_CONFIG_PATH_DEFAULT)]
        config: PathBuf,

        /// Path to save an eventual fatal error
        #[clap(short, long)]
        error: Option<PathBuf>,
    },

    /// Validate the provided install configuration
    Validate {
        /// Path to an install configuration file
        #[clap(index = 1, default_value = INSTALL_CONFIG_PATH_DEFAULT)]
        config: PathBuf,
    },

    /// List the install classes offered by the live image
    Classes,

    /// Write the network configuration of an installed target
    Network {
        /// The install configuration to apply
        #[clap(index = 1, default_value = INSTALL_CONFIG_PATH_DEFAULT)]
        config: PathBuf,
    },

    /// Copy the live image onto the target root without configuring it
    Copy {
        /// The install configuration to apply
        #[clap(index = 1, default_value = INSTALL_CONFIG_PATH_DEFAULT)]
        config: PathBuf,

        /// Path to save an eventual fatal error
        #[clap(short, long)]
        error: Option<PathBuf>,
    },
}

impl Commands {
    pub fn name(&self) -> &'static str {
        match self {
            Commands::Install { .. } => "install",
            Commands::Validate { .. } => "validate",
            Commands::Classes => "classes",
            Commands::Network { .. } => "network",
            Commands::Copy { .. } => "copy",
        }
    }

    /// Whether the command changes the target and must leave a log behind.
    pub fn writes_target(&self) -> bool {
        matches!(
            self,
            Commands::Install { .. } | Commands::Network { .. } | Commands::Copy { .. }
        )
    }
}

impl Display for Commands {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}", self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_install() {
        let cli = Cli::parse_from([
            "sabayon-installer",
            "-v",
            "info",
            "install",
            "/tmp/config.yaml",
            "--error",
            "/tmp/error.yaml",
        ]);
        assert_eq!(cli.verbosity, LevelFilter::Info);
        match cli.command {
            Commands::Install { config, error } => {
                assert_eq!(config, PathBuf::from("/tmp/config.yaml"));
                assert_eq!(error, Some(PathBuf::from("/tmp/error.yaml")));
            }
            other => panic!("Unexpected command {other}"),
        }
    }

    #[test]
    fn test_defaults() {
        let cli = Cli::parse_from(["sabayon-installer", "validate"]);
        assert_eq!(cli.verbosity, LevelFilter::Debug);
        match &cli.command {
            Commands::Validate { config } => {
                assert_eq!(config, &PathBuf::from(INSTALL_CONFIG_PATH_DEFAULT))
            }
            other => panic!("Unexpected command {other}"),
        }
        assert!(!cli.command.writes_target());

        let cli = Cli::parse_from(["sabayon-installer", "classes"]);
        assert_eq!(cli.command.to_string(), "classes");
    }
}
