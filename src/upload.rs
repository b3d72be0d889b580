use crate::client::{RemoteClient, TranslationEntry};
use crate::diff::{FileOperation, OperationType};
use crate::normalize::ScriptNormalizer;
use crate::project::{file_name, ProjectIndex};
use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

/// Applies one diff operation to the remote project: create, update, or
/// delete the matching file record, pre-filling untranslated entries after
/// every create/update. Each `apply` call is independent and safe to run
/// concurrently with its siblings; the index, normalizer, and client are all
/// read-only here.
pub struct UploadReconciler {
    client: Arc<RemoteClient>,
    index: Arc<ProjectIndex>,
    normalizer: Arc<ScriptNormalizer>,
    source_dir: PathBuf,
}

impl UploadReconciler {
    pub fn new(
        client: Arc<RemoteClient>,
        index: Arc<ProjectIndex>,
        normalizer: Arc<ScriptNormalizer>,
        source_dir: PathBuf,
    ) -> Self {
        Self {
            client,
            index,
            normalizer,
            source_dir,
        }
    }

    pub async fn apply(&self, operation: &FileOperation) -> Result<()> {
        match operation.op_type {
            OperationType::Add => self.apply_add(operation).await,
            OperationType::Modify => self.apply_modify(operation).await,
            OperationType::Delete => self.apply_delete(operation).await,
        }
    }

    /// Read the operation's local file; `None` means the diff is stale (the
    /// file is already gone) and the operation resolves as a no-op.
    async fn read_local(&self, operation: &FileOperation) -> Result<Option<Vec<u8>>> {
        let path = self.source_dir.join(&operation.full_path);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(
                    "Skipping stale operation for {}: local file is gone",
                    operation.full_path
                );
                Ok(None)
            }
            Err(e) => {
                Err(e).with_context(|| format!("Failed to read {}", path.display()))
            }
        }
    }

    async fn apply_add(&self, operation: &FileOperation) -> Result<()> {
        let Some(bytes) = self.read_local(operation).await? else {
            return Ok(());
        };

        let name = file_name(&operation.full_path);
        let id = self
            .client
            .create_file(&operation.folder, name, bytes)
            .await?;
        self.pretranslate(id, name).await?;
        info!("Added {} (ID: {})", operation.full_path, id);
        Ok(())
    }

    async fn apply_modify(&self, operation: &FileOperation) -> Result<()> {
        let Some(file) = self.index.lookup(&operation.full_path) else {
            info!(
                "Skipping MODIFY for {}: no matching remote file",
                operation.full_path
            );
            return Ok(());
        };
        let Some(bytes) = self.read_local(operation).await? else {
            return Ok(());
        };

        let name = file_name(&operation.full_path);
        self.client.update_file(file.id, name, bytes).await?;
        self.pretranslate(file.id, name).await?;
        info!("Updated {} (ID: {})", operation.full_path, file.id);
        Ok(())
    }

    async fn apply_delete(&self, operation: &FileOperation) -> Result<()> {
        let Some(file) = self.index.lookup(&operation.full_path) else {
            info!(
                "Skipping DELETE for {}: no matching remote file",
                operation.full_path
            );
            return Ok(());
        };

        self.client.delete_file(file.id).await?;
        info!("Deleted {} (ID: {})", operation.full_path, file.id);
        Ok(())
    }

    /// Pre-fill untranslated entries: normalize each stage-0 original and
    /// mark it stage 1, then submit the transformed set as one write.
    /// Entries already past stage 0 never enter the outgoing batch, so human
    /// review work cannot be overwritten.
    async fn pretranslate(&self, file_id: u64, file_name: &str) -> Result<()> {
        let entries = self.client.file_translations(file_id).await?;

        let updates: Vec<TranslationEntry> = entries
            .into_iter()
            .filter(|e| e.stage == 0)
            .map(|mut e| {
                e.translation = Some(self.normalizer.convert(&e.original));
                e.stage = 1;
                e
            })
            .collect();

        if updates.is_empty() {
            return Ok(());
        }
        self.client
            .upload_translations(file_id, file_name, &updates)
            .await
    }
}
