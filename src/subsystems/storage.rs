use log::{debug, info};

use osutils::tabfile::CryptTab;
use sabayon_api::error::{InstallerError, ReportError, ServicingError};

use crate::engine::{EngineContext, Subsystem};

const CRYPTTAB_PATH: &str = "/etc/crypttab";

#[derive(Default)]
pub struct StorageSubsystem;
impl Subsystem for StorageSubsystem {
    fn name(&self) -> &'static str {
        "storage"
    }

    #[tracing::instrument(name = "storage_write_configuration", skip_all)]
    fn write_configuration(&mut self, ctx: &EngineContext) -> Result<(), InstallerError> {
        if !ctx.config.is_encrypted() {
            debug!("No encrypted volumes, not writing crypttab");
            return Ok(());
        }

        info!(
            "Writing crypttab with {} mapping(s)",
            ctx.config.storage.crypttab.len()
        );
        CryptTab::from_config(&ctx.config.storage.crypttab)
            .write(ctx.target_path(CRYPTTAB_PATH))
            .structured(ServicingError::WriteCrypttab)
    }
}
