use std::{fs, path::Path, sync::Mutex};

use chrono::Utc;
use log::{debug, info, warn};

use osutils::{chroot::ChrootMounts, files, path::join_relative};
use sabayon_api::{
    config::InstallConfig,
    constants::{
        ENTROPY_HW_HASH, INSTALLER_BACKGROUND_LOG_PATH, INSTALLER_LOG_DIR, INSTALLER_LOG_FILES,
        INSTALLER_TRACE_PATH,
    },
    error::{InitializationError, InstallerError, InstallerResultExt, InternalError, ReportError},
};

use crate::{
    health::HealthCheck,
    subsystems::{
        bootloader::BootloaderSubsystem, drivers::DriversSubsystem, locale::LocaleSubsystem,
        network::NetworkSubsystem, packages::PackagesSubsystem, secureboot::SecureBootSubsystem,
        services::ServicesSubsystem, storage::StorageSubsystem, users::UsersSubsystem,
    },
    validation,
};

mod context;
pub mod livecopy;

pub use context::EngineContext;
use livecopy::LiveCopySubsystem;

pub(crate) trait Subsystem: Send {
    fn name(&self) -> &'static str;

    /// Check the install configuration against what this subsystem can do.
    fn validate_config(&self, _ctx: &EngineContext) -> Result<(), InstallerError> {
        Ok(())
    }

    /// Non-destructive preparations, run before anything is written to the
    /// target.
    fn prepare(&mut self, _ctx: &EngineContext) -> Result<(), InstallerError> {
        Ok(())
    }

    /// Populate the target from the live image.
    fn provision(&mut self, _ctx: &EngineContext) -> Result<(), InstallerError> {
        Ok(())
    }

    /// Configure the populated target. Special directories are mounted in the
    /// target while this runs.
    fn configure(&mut self, _ctx: &EngineContext) -> Result<(), InstallerError> {
        Ok(())
    }

    /// Actions needing a configured system, such as package installation.
    fn post_install(&mut self, _ctx: &EngineContext) -> Result<(), InstallerError> {
        Ok(())
    }

    /// Write the configuration tying the target to its disks.
    fn write_configuration(&mut self, _ctx: &EngineContext) -> Result<(), InstallerError> {
        Ok(())
    }
}

lazy_static::lazy_static! {
    static ref SUBSYSTEMS: Mutex<Vec<Box<dyn Subsystem>>> = Mutex::new(vec![
        Box::<LiveCopySubsystem>::default(),
        Box::<SecureBootSubsystem>::default(),
        Box::<UsersSubsystem>::default(),
        Box::<LocaleSubsystem>::default(),
        Box::<NetworkSubsystem>::default(),
        Box::<DriversSubsystem>::default(),
        Box::<ServicesSubsystem>::default(),
        Box::<PackagesSubsystem>::default(),
        Box::<StorageSubsystem>::default(),
        Box::<BootloaderSubsystem>::default(),
    ]);
}

/// Install the live image into the target described by `config`.
#[tracing::instrument(skip_all)]
pub fn install(config: InstallConfig) -> Result<(), InstallerError> {
    let ctx = EngineContext::new(config)?;
    let mut subsystems = SUBSYSTEMS
        .lock()
        .map_err(|_| InstallerError::new(InternalError::SubsystemLock))?;

    let mut health = HealthCheck::start().structured(InitializationError::StartWorkers)?;

    if ctx.is_recovery() {
        info!("Preparing to recover Sabayon");
        ctx.progress.set_label("Recovering Sabayon.");
    } else {
        info!("Preparing to install Sabayon");
        ctx.progress.set_label("Installing Sabayon onto hard drive.");
    }
    run_host_phases(&mut subsystems, &ctx)?;
    ChrootMounts::enter(ctx.target())?
        .execute_and_exit(|_| run_target_phases(&mut subsystems, &ctx))?;

    persist_logs(ctx.target());
    remove_hardware_hash(ctx.target());

    health.stop();
    if health.failed() {
        warn!("The live medium reported read errors during the installation");
    }
    info!("Installation of '{}' complete", ctx.target().display());
    Ok(())
}

/// Copy the live image into the target without configuring it.
#[tracing::instrument(skip_all)]
pub fn copy(config: InstallConfig) -> Result<(), InstallerError> {
    let ctx = EngineContext::new(config)?;
    let mut subsystems: Vec<Box<dyn Subsystem>> = vec![Box::<LiveCopySubsystem>::default()];
    run_host_phases(&mut subsystems, &ctx)?;
    if ctx.is_recovery() {
        return Ok(());
    }
    ChrootMounts::enter(ctx.target())?.execute_and_exit(|_| configure(&mut subsystems, &ctx))
}

/// Write the network configuration of an already populated target.
#[tracing::instrument(skip_all)]
pub fn configure_network(config: InstallConfig) -> Result<(), InstallerError> {
    let ctx = EngineContext::new(config)?;
    let mut subsystems: Vec<Box<dyn Subsystem>> = vec![Box::<NetworkSubsystem>::default()];
    validate_config(&subsystems, &ctx)?;
    configure(&mut subsystems, &ctx)
}

/// Validation, preparation and, unless recovering, provisioning.
fn run_host_phases(
    subsystems: &mut [Box<dyn Subsystem>],
    ctx: &EngineContext,
) -> Result<(), InstallerError> {
    validate_config(subsystems, ctx)?;
    prepare(subsystems, ctx)?;
    if !ctx.is_recovery() {
        provision(subsystems, ctx)?;
    }
    Ok(())
}

/// Configuration of the target. Recovery only rewrites the configuration.
fn run_target_phases(
    subsystems: &mut [Box<dyn Subsystem>],
    ctx: &EngineContext,
) -> Result<(), InstallerError> {
    if !ctx.is_recovery() {
        configure(subsystems, ctx)?;
        post_install(subsystems, ctx)?;
    }
    ctx.progress.set_fraction(1.0);
    write_configuration(subsystems, ctx)
}

#[tracing::instrument(skip_all)]
fn validate_config(
    subsystems: &[Box<dyn Subsystem>],
    ctx: &EngineContext,
) -> Result<(), InstallerError> {
    info!("Starting step 'Validate'");
    validation::validate_config(&ctx.config)?;
    for subsystem in subsystems {
        debug!(
            "Starting step 'Validate' for subsystem '{}'",
            subsystem.name()
        );
        subsystem.validate_config(ctx).message(format!(
            "Step 'Validate' failed for subsystem '{}'",
            subsystem.name()
        ))?;
    }
    debug!("Finished step 'Validate'");
    Ok(())
}

#[tracing::instrument(skip_all)]
fn prepare(
    subsystems: &mut [Box<dyn Subsystem>],
    ctx: &EngineContext,
) -> Result<(), InstallerError> {
    info!("Starting step 'Prepare'");
    for subsystem in subsystems {
        debug!(
            "Starting step 'Prepare' for subsystem '{}'",
            subsystem.name()
        );
        subsystem.prepare(ctx).message(format!(
            "Step 'Prepare' failed for subsystem '{}'",
            subsystem.name()
        ))?;
    }
    debug!("Finished step 'Prepare'");
    Ok(())
}

#[tracing::instrument(skip_all)]
fn provision(
    subsystems: &mut [Box<dyn Subsystem>],
    ctx: &EngineContext,
) -> Result<(), InstallerError> {
    info!("Starting step 'Provision'");
    for subsystem in subsystems {
        debug!(
            "Starting step 'Provision' for subsystem '{}'",
            subsystem.name()
        );
        subsystem.provision(ctx).message(format!(
            "Step 'Provision' failed for subsystem '{}'",
            subsystem.name()
        ))?;
    }
    debug!("Finished step 'Provision'");
    Ok(())
}

#[tracing::instrument(skip_all)]
fn configure(
    subsystems: &mut [Box<dyn Subsystem>],
    ctx: &EngineContext,
) -> Result<(), InstallerError> {
    info!("Starting step 'Configure'");
    ctx.progress.set_label("Configuring Sabayon");
    let total = subsystems.len();
    for (index, subsystem) in subsystems.iter_mut().enumerate() {
        debug!(
            "Starting step 'Configure' for subsystem '{}'",
            subsystem.name()
        );
        subsystem.configure(ctx).message(format!(
            "Step 'Configure' failed for subsystem '{}'",
            subsystem.name()
        ))?;
        ctx.progress.set_fraction((index + 1) as f64 / total as f64);
    }
    ctx.progress.set_label("Sabayon configuration complete");
    debug!("Finished step 'Configure'");
    Ok(())
}

#[tracing::instrument(skip_all)]
fn post_install(
    subsystems: &mut [Box<dyn Subsystem>],
    ctx: &EngineContext,
) -> Result<(), InstallerError> {
    info!("Starting step 'Post-install'");
    for subsystem in subsystems {
        debug!(
            "Starting step 'Post-install' for subsystem '{}'",
            subsystem.name()
        );
        subsystem.post_install(ctx).message(format!(
            "Step 'Post-install' failed for subsystem '{}'",
            subsystem.name()
        ))?;
    }
    debug!("Finished step 'Post-install'");
    Ok(())
}

#[tracing::instrument(skip_all)]
fn write_configuration(
    subsystems: &mut [Box<dyn Subsystem>],
    ctx: &EngineContext,
) -> Result<(), InstallerError> {
    info!("Starting step 'Write configuration'");
    for subsystem in subsystems {
        debug!(
            "Starting step 'Write configuration' for subsystem '{}'",
            subsystem.name()
        );
        subsystem.write_configuration(ctx).message(format!(
            "Step 'Write configuration' failed for subsystem '{}'",
            subsystem.name()
        ))?;
    }
    debug!("Finished step 'Write configuration'");
    Ok(())
}

/// Name a log file receives inside the target. The installer's own logs are
/// stamped with the installation time.
fn persisted_log_name(source: &Path, timestamp: &str) -> Option<String> {
    let name = source.file_name()?.to_string_lossy();
    let source = source.to_str()?;
    if source == INSTALLER_BACKGROUND_LOG_PATH || source == INSTALLER_TRACE_PATH {
        let (stem, extension) = name.rsplit_once('.').unwrap_or((name.as_ref(), "log"));
        Some(format!("{stem}-{timestamp}.{extension}"))
    } else {
        Some(name.into_owned())
    }
}

/// Copy the installer logs into the target. Failures are only logged.
fn persist_logs(target: &Path) {
    persist_logs_from(target, INSTALLER_LOG_FILES);
}

fn persist_logs_from(target: &Path, sources: &[&str]) {
    let log_dir = join_relative(target, INSTALLER_LOG_DIR);
    if let Err(e) = files::create_dirs(&log_dir) {
        warn!("Failed to create '{}': {e:?}", log_dir.display());
        return;
    }

    let timestamp = Utc::now().format("%Y%m%dT%H%M%SZ").to_string();
    for source in sources.iter().map(Path::new) {
        if !source.is_file() {
            continue;
        }
        let Some(name) = persisted_log_name(source, &timestamp) else {
            continue;
        };
        let destination = log_dir.join(name);
        match fs::copy(source, &destination) {
            Ok(_) => debug!(
                "Persisted '{}' to '{}'",
                source.display(),
                destination.display()
            ),
            Err(e) => warn!(
                "Failed to persist '{}' to '{}': {e}",
                source.display(),
                destination.display()
            ),
        }
    }
}

/// The hardware hash cached by Entropy belongs to the live machine.
fn remove_hardware_hash(target: &Path) {
    if let Err(e) = files::remove_file_if_exists(join_relative(target, ENTROPY_HW_HASH)) {
        warn!("{e:?}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::{Arc, Mutex};

    use tempfile::tempdir;

    use sabayon_api::error::{ErrorKind, ServicingError};

    /// Records the phases it goes through in a shared journal.
    struct RecordingSubsystem {
        name: &'static str,
        journal: Arc<Mutex<Vec<String>>>,
        fail_configure: bool,
    }

    impl RecordingSubsystem {
        fn boxed(
            name: &'static str,
            journal: &Arc<Mutex<Vec<String>>>,
        ) -> Box<dyn Subsystem> {
            Box::new(Self {
                name,
                journal: journal.clone(),
                fail_configure: false,
            })
        }

        fn record(&self, phase: &str) {
            self.journal
                .lock()
                .unwrap()
                .push(format!("{phase}:{}", self.name));
        }
    }

    impl Subsystem for RecordingSubsystem {
        fn name(&self) -> &'static str {
            self.name
        }

        fn validate_config(&self, _ctx: &EngineContext) -> Result<(), InstallerError> {
            self.record("validate");
            Ok(())
        }

        fn prepare(&mut self, _ctx: &EngineContext) -> Result<(), InstallerError> {
            self.record("prepare");
            Ok(())
        }

        fn provision(&mut self, _ctx: &EngineContext) -> Result<(), InstallerError> {
            self.record("provision");
            Ok(())
        }

        fn configure(&mut self, _ctx: &EngineContext) -> Result<(), InstallerError> {
            self.record("configure");
            if self.fail_configure {
                return Err(InstallerError::new(ServicingError::SetUpUsers));
            }
            Ok(())
        }

        fn post_install(&mut self, _ctx: &EngineContext) -> Result<(), InstallerError> {
            self.record("post-install");
            Ok(())
        }

        fn write_configuration(&mut self, _ctx: &EngineContext) -> Result<(), InstallerError> {
            self.record("write");
            Ok(())
        }
    }

    fn run_all(
        subsystems: &mut [Box<dyn Subsystem>],
        ctx: &EngineContext,
    ) -> Result<(), InstallerError> {
        run_host_phases(subsystems, ctx)?;
        run_target_phases(subsystems, ctx)
    }

    fn test_context(live: &Path, target: &Path) -> EngineContext {
        let mut ctx = EngineContext::test(live, target);
        ctx.config.bootloader.install = false;
        ctx
    }

    #[test]
    fn test_phase_order() {
        let live = tempdir().unwrap();
        let target = tempdir().unwrap();
        let ctx = test_context(live.path(), target.path());
        let journal = Arc::new(Mutex::new(Vec::new()));
        let mut subsystems = vec![
            RecordingSubsystem::boxed("a", &journal),
            RecordingSubsystem::boxed("b", &journal),
        ];

        run_all(&mut subsystems, &ctx).unwrap();
        assert_eq!(
            *journal.lock().unwrap(),
            vec![
                "validate:a",
                "validate:b",
                "prepare:a",
                "prepare:b",
                "provision:a",
                "provision:b",
                "configure:a",
                "configure:b",
                "post-install:a",
                "post-install:b",
                "write:a",
                "write:b",
            ]
        );
        assert_eq!(ctx.progress.snapshot().fraction, 1.0);
    }

    #[test]
    fn test_recovery_only_writes_configuration() {
        let live = tempdir().unwrap();
        let target = tempdir().unwrap();
        let mut ctx = test_context(live.path(), target.path());
        ctx.config.bootloader.recovery = true;
        let journal = Arc::new(Mutex::new(Vec::new()));
        let mut subsystems = vec![RecordingSubsystem::boxed("a", &journal)];

        run_all(&mut subsystems, &ctx).unwrap();
        assert_eq!(
            *journal.lock().unwrap(),
            vec!["validate:a", "prepare:a", "write:a"]
        );
    }

    #[test]
    fn test_failure_stops_installation() {
        let live = tempdir().unwrap();
        let target = tempdir().unwrap();
        let ctx = test_context(live.path(), target.path());
        let journal = Arc::new(Mutex::new(Vec::new()));
        let mut subsystems = vec![
            Box::new(RecordingSubsystem {
                name: "a",
                journal: journal.clone(),
                fail_configure: true,
            }) as Box<dyn Subsystem>,
            RecordingSubsystem::boxed("b", &journal),
        ];

        let error = run_all(&mut subsystems, &ctx).unwrap_err();
        assert_eq!(
            error.kind(),
            &ErrorKind::Servicing(ServicingError::SetUpUsers)
        );
        assert!(format!("{error:?}").contains("Step 'Configure' failed for subsystem 'a'"));
        let journal = journal.lock().unwrap();
        assert_eq!(journal.last().unwrap(), "configure:a");
        assert!(!journal.contains(&"write:a".to_string()));
    }

    #[test]
    fn test_invalid_config_fails_validation() {
        let live = tempdir().unwrap();
        let target = tempdir().unwrap();
        let mut ctx = test_context(live.path(), target.path());
        ctx.config.users.root_password = Some("abc".into());
        let journal = Arc::new(Mutex::new(Vec::new()));
        let mut subsystems = vec![RecordingSubsystem::boxed("a", &journal)];

        let error = run_all(&mut subsystems, &ctx).unwrap_err();
        assert!(matches!(error.kind(), ErrorKind::InvalidInput(_)));
        assert!(journal.lock().unwrap().is_empty());
    }

    #[test]
    fn test_persisted_log_name() {
        assert_eq!(
            persisted_log_name(Path::new(INSTALLER_BACKGROUND_LOG_PATH), "20240101T000000Z")
                .unwrap(),
            "sabayon-installer-20240101T000000Z.log"
        );
        assert_eq!(
            persisted_log_name(Path::new(INSTALLER_TRACE_PATH), "T").unwrap(),
            "sabayon-installer-trace-T.jsonl"
        );
        assert_eq!(
            persisted_log_name(Path::new("/tmp/storage.log"), "T").unwrap(),
            "storage.log"
        );
    }

    #[test]
    fn test_persist_logs() {
        let logs = tempdir().unwrap();
        let target = tempdir().unwrap();
        let program_log = logs.path().join("program.log");
        fs::write(&program_log, "ran\n").unwrap();
        let missing = logs.path().join("missing.log");

        persist_logs_from(
            target.path(),
            &[program_log.to_str().unwrap(), missing.to_str().unwrap()],
        );
        let log_dir = target.path().join("var/log/installer");
        assert_eq!(
            fs::read_to_string(log_dir.join("program.log")).unwrap(),
            "ran\n"
        );
        assert!(!log_dir.join("missing.log").exists());
    }

    #[test]
    fn test_remove_hardware_hash() {
        let target = tempdir().unwrap();
        let hash = target.path().join("etc/entropy/.hw.hash");
        fs::create_dir_all(hash.parent().unwrap()).unwrap();
        fs::write(&hash, "abc").unwrap();

        remove_hardware_hash(target.path());
        assert!(!hash.exists());
        // Missing is fine
        remove_hardware_hash(target.path());
    }
}
