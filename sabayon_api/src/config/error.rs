use serde::{Deserialize, Serialize};

/// Identifies an issue in the install configuration.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InvalidInstallConfigError {
    #[error("Bootloader installation requested but no target device was given")]
    MissingBootloaderDevice,

    #[error("Crypttab entry for device '{device}' has an empty name")]
    EmptyCrypttabName { device: String },

    #[error("Crypttab name '{0}' is used more than once")]
    DuplicateCrypttabName(String),

    #[error("Language '{0}' is not a valid locale name")]
    InvalidLanguage(String),

    #[error("Timezone '{0}' is not a valid zoneinfo name")]
    InvalidTimezone(String),

    #[error("Invalid user name '{username}': {reason}")]
    InvalidUsername { username: String, reason: String },

    #[error("Invalid password for '{account}': {reason}")]
    InvalidPassword { account: String, reason: String },

    #[error("Passwords for '{0}' do not match")]
    PasswordMismatch(String),

    #[error("Invalid hostname '{hostname}': {reason}")]
    InvalidHostname { hostname: String, reason: String },

    #[error("Invalid IP address '{address}': {reason}")]
    InvalidIpAddress { address: String, reason: String },

    #[error("Network interface '{0}' is configured more than once")]
    DuplicateInterface(String),
}
