use std::path::Path;

use log::debug;

use crate::dependencies::{Dependency, DependencyError};

/// Appends the `.service` suffix unless the unit already carries a type.
pub fn unit_name(service: &str) -> String {
    if service.contains('.') {
        service.to_string()
    } else {
        format!("{service}.service")
    }
}

/// Enable a unit inside `root` without reloading the manager.
pub fn enable_unit(root: &Path, service: &str) -> Result<(), Box<DependencyError>> {
    set_unit_enabled(root, service, true)
}

/// Disable a unit inside `root` without reloading the manager.
pub fn disable_unit(root: &Path, service: &str) -> Result<(), Box<DependencyError>> {
    set_unit_enabled(root, service, false)
}

fn set_unit_enabled(root: &Path, service: &str, enable: bool) -> Result<(), Box<DependencyError>> {
    let action = if enable { "enable" } else { "disable" };
    let unit = unit_name(service);
    debug!("Running systemctl {action} {unit} in '{}'", root.display());
    Dependency::Systemctl
        .cmd()
        .with_args(["--no-reload", action, &unit])
        .in_root(root)
        .run_and_check()
}
