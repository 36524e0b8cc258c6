use std::{
    net::{Ipv4Addr, Ipv6Addr},
    path::Path,
};

use anyhow::{Context, Error};
use log::{debug, info, warn};

use osutils::{dependencies::Dependency, path::join_relative};
use sabayon_api::{
    config::{InstallConfig, InvalidInstallConfigError},
    constants::{PASSWORD_MIN_LENGTH, USERNAME_MIN_LENGTH},
    error::{InstallerError, InvalidInputError, ReportError},
};

/// Characters accepted in user names and passwords: ASCII letters, digits and
/// punctuation.
fn is_legal(c: char, spaces: bool) -> bool {
    c.is_ascii_alphanumeric() || c.is_ascii_punctuation() || (spaces && c == ' ')
}

/// Checks a login name, see [`sabayon_api::config::User::login`].
pub fn check_username(username: &str) -> Result<(), InvalidInstallConfigError> {
    let invalid = |reason: &str| InvalidInstallConfigError::InvalidUsername {
        username: username.to_string(),
        reason: reason.to_string(),
    };

    if username.chars().count() < USERNAME_MIN_LENGTH {
        return Err(invalid("user name too short"));
    }
    if !username.chars().all(|c| is_legal(c, false)) {
        return Err(invalid(
            "user name contains non-ASCII characters or spaces, which are not allowed",
        ));
    }
    Ok(())
}

/// Checks a password and its confirmation. `account` only names the account
/// in errors.
pub fn check_password(
    account: &str,
    password: &str,
    confirm: Option<&str>,
) -> Result<(), InvalidInstallConfigError> {
    let invalid = |reason: &str| InvalidInstallConfigError::InvalidPassword {
        account: account.to_string(),
        reason: reason.to_string(),
    };

    if password.is_empty() {
        return Err(invalid("the password must not be empty"));
    }
    if confirm.is_some_and(|confirm| confirm != password) {
        return Err(InvalidInstallConfigError::PasswordMismatch(
            account.to_string(),
        ));
    }
    if password.chars().count() < PASSWORD_MIN_LENGTH {
        return Err(invalid(&format!(
            "the password must be at least {PASSWORD_MIN_LENGTH} characters long"
        )));
    }
    if !password.chars().all(|c| is_legal(c, true)) {
        return Err(invalid(
            "the password contains non-ASCII characters, which are not allowed",
        ));
    }
    Ok(())
}

/// Asks cracklib about the strength of `password`. Returns the reason when it
/// is considered weak, `None` when it is fine or cracklib is not available.
pub fn weak_password_reason(password: &str) -> Option<String> {
    if !Dependency::CracklibCheck.exists() {
        debug!("cracklib-check is not available, skipping password strength check");
        return None;
    }

    match Dependency::CracklibCheck
        .cmd()
        .with_input(format!("{password}\n"))
        .output_and_check()
    {
        Ok(output) => parse_cracklib_output(&output),
        Err(e) => {
            debug!("Failed to run cracklib-check: {e}");
            None
        }
    }
}

/// `cracklib-check` prints `<password>: <verdict>` for each input line.
fn parse_cracklib_output(output: &str) -> Option<String> {
    let verdict = output.trim_end().rsplit_once(": ")?.1.trim();
    if verdict == "OK" {
        None
    } else {
        Some(verdict.to_string())
    }
}

pub fn check_hostname(hostname: &str) -> Result<(), InvalidInstallConfigError> {
    let invalid = |reason: &str| InvalidInstallConfigError::InvalidHostname {
        hostname: hostname.to_string(),
        reason: reason.to_string(),
    };

    let Some(first) = hostname.chars().next() else {
        return Ok(());
    };
    if hostname.len() > 255 {
        return Err(invalid("hostname must be 255 or fewer characters in length"));
    }
    if !first.is_ascii_alphanumeric() {
        return Err(invalid(
            "hostname must start with a valid character in the ranges 'a-z', 'A-Z', or '0-9'",
        ));
    }
    if !hostname
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-')
    {
        return Err(invalid(
            "hostnames can only contain the characters 'a-z', 'A-Z', '0-9', '-', or '.'",
        ));
    }
    Ok(())
}

/// Checks an IPv4 or IPv6 address string.
pub fn check_ip_address(address: &str) -> Result<(), InvalidInstallConfigError> {
    let invalid = |reason: String| InvalidInstallConfigError::InvalidIpAddress {
        address: address.to_string(),
        reason,
    };

    if address.trim().is_empty() {
        return Err(invalid("IP address is missing".into()));
    }

    let colon = address.find(':');
    let dot = address.find('.');
    match (colon, dot) {
        (None, Some(dot)) if dot > 0 => address.parse::<Ipv4Addr>().map(|_| ()).map_err(|_| {
            invalid(
                "IPv4 addresses must contain four numbers between 0 and 255, separated by periods"
                    .into(),
            )
        }),
        (Some(colon), None) if colon > 0 => address
            .parse::<Ipv6Addr>()
            .map(|_| ())
            .map_err(|_| invalid("not a valid IPv6 address".into())),
        _ => Err(invalid("invalid IP address".into())),
    }
}

/// Whether `username` already has an entry in `<root>/etc/passwd`.
pub fn username_taken(root: impl AsRef<Path>, username: &str) -> Result<bool, Error> {
    let passwd = join_relative(root.as_ref(), "/etc/passwd");
    if !passwd.exists() {
        return Ok(false);
    }
    let contents = std::fs::read_to_string(&passwd)
        .context(format!("Failed to read '{}'", passwd.display()))?;
    Ok(contents
        .lines()
        .filter_map(|line| line.split(':').next())
        .any(|name| name == username))
}

fn invalid_input(e: InvalidInstallConfigError) -> InstallerError {
    InstallerError::new(InvalidInputError::from(e))
}

/// Checks everything the user provided. Weak passwords are only reported.
pub fn validate_config(config: &InstallConfig) -> Result<(), InstallerError> {
    info!("Validating install configuration");
    config.validate().map_err(invalid_input)?;

    if let Some(ref password) = config.users.root_password {
        check_password(
            "root",
            password,
            config.users.root_password_confirm.as_deref(),
        )
        .map_err(invalid_input)?;
        if let Some(reason) = weak_password_reason(password) {
            warn!("Using a weak root password: {reason}");
        }
    }

    if let Some(ref user) = config.users.user {
        let username = user.login();
        check_username(&username).map_err(invalid_input)?;
        check_password(
            &username,
            &user.password,
            user.password_confirm.as_deref(),
        )
        .map_err(invalid_input)?;
        if let Some(reason) = weak_password_reason(&user.password) {
            warn!("Using a weak password for '{username}': {reason}");
        }

        // Before the copy the target is empty and the live system has the
        // same accounts.
        let root = if join_relative(&config.target_root, "/etc/passwd").exists() {
            &config.target_root
        } else {
            &config.live_root
        };
        if username_taken(root, &username).structured(InvalidInputError::UsernameTaken {
            username: username.clone(),
        })? {
            return Err(InstallerError::new(InvalidInputError::UsernameTaken {
                username,
            }));
        }
    }

    if let Some(ref hostname) = config.network.hostname {
        check_hostname(hostname).map_err(invalid_input)?;
    }

    for interface in &config.network.interfaces {
        for address in interface.dns.iter().chain(interface.gateway.iter()) {
            check_ip_address(address).map_err(invalid_input)?;
        }
    }

    debug!("Install configuration is valid");
    Ok(())
}

/// Loads and checks an install configuration file without installing.
pub fn validate_config_file(path: impl AsRef<Path>) -> Result<(), InstallerError> {
    info!(
        "Validating install configuration file '{}'",
        path.as_ref().display()
    );
    let config = InstallConfig::from_file(path.as_ref())?;
    validate_config(&config)
}
