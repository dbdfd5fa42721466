//! Fixed elevated command sequences run on operator request.

use tracing::info;

use devfm_platform::command::{PrivilegedCommand, TreeKind};

use crate::error::GatewayError;
use crate::gateway::Gateway;
use crate::outcome::MaintenanceReport;
use crate::resolver::{DIR_MODE, FILE_MODE};

impl Gateway {
    fn require_elevation(&self) -> Result<(), GatewayError> {
        if self.resolver().elevation_enabled() {
            Ok(())
        } else {
            Err(GatewayError::denied("Operazione non consentita senza sudo"))
        }
    }

    /// Run every command even after a failure; a timeout aborts the batch.
    async fn run_batch(&self, commands: Vec<PrivilegedCommand>, context: &str) -> Result<MaintenanceReport, GatewayError> {
        let mut results = Vec::with_capacity(commands.len());
        for command in &commands {
            let result = self
                .runner()
                .run(command, true)
                .await
                .map_err(|e| GatewayError::exec(context, e))?;
            results.push(result);
        }
        Ok(MaintenanceReport::from_results(results))
    }

    /// Reset modes (2775 directories, 664 files) and ownership of a tree.
    pub async fn fix_permissions(&self, dir: Option<&str>) -> Result<MaintenanceReport, GatewayError> {
        self.require_elevation()?;
        let root = self.paths().resolve_or_root(dir)?;
        let config = self.config();

        let commands = vec![
            PrivilegedCommand::ChmodTree {
                root: root.clone(),
                kind: TreeKind::Directories,
                mode: DIR_MODE,
            },
            PrivilegedCommand::ChmodTree {
                root: root.clone(),
                kind: TreeKind::Files,
                mode: FILE_MODE,
            },
            PrivilegedCommand::Chown {
                user: config.service_user.clone(),
                group: config.service_group.clone(),
                path: root.clone(),
                recursive: true,
            },
        ];
        let report = self
            .run_batch(commands, "Errore nella riparazione dei permessi")
            .await?;
        info!("fix_permissions {}: success={}", root.display(), report.success);
        Ok(report)
    }

    /// Delete stale temp-pattern files from the configured temp dirs.
    /// Directories that do not exist are skipped.
    pub async fn cleanup_tmp(&self) -> Result<MaintenanceReport, GatewayError> {
        self.require_elevation()?;
        let config = self.config();

        let commands = config
            .temp_dirs
            .iter()
            .filter(|dir| self.fs().is_dir(dir))
            .map(|dir| PrivilegedCommand::PurgeTemp {
                dir: dir.clone(),
                max_age_days: config.temp_max_age_days,
            })
            .collect();
        let report = self
            .run_batch(commands, "Errore nella pulizia dei file temporanei")
            .await?;
        info!("cleanup_tmp: {} dirs, success={}", report.results.len(), report.success);
        Ok(report)
    }
}
