use crate::client::RemoteClient;
use crate::config::Config;
use crate::diff::DiffParser;
use crate::download::DownloadMerger;
use crate::normalize::ScriptNormalizer;
use crate::project::ProjectIndex;
use crate::replace::Replacer;
use crate::upload::UploadReconciler;
use anyhow::Result;
use std::path::Path;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{error, info};

/// Drain a fan-out set, logging each unit's failure under its label. A
/// failed unit never cancels or fails its siblings; the run itself always
/// completes.
async fn drain(mut units: JoinSet<(String, Result<()>)>) {
    let (mut ok, mut failed) = (0usize, 0usize);
    while let Some(joined) = units.join_next().await {
        match joined {
            Ok((_, Ok(()))) => ok += 1,
            Ok((label, Err(e))) => {
                failed += 1;
                error!("Failed to sync {}: {:#}", label, e);
            }
            Err(e) => {
                failed += 1;
                error!("Sync unit panicked: {}", e);
            }
        }
    }
    info!("Run finished: {} ok, {} failed", ok, failed);
}

async fn load_normalizer(config: &Config) -> Result<ScriptNormalizer> {
    let path = config.mapping_file();
    if tokio::fs::try_exists(&path).await.unwrap_or(false) {
        ScriptNormalizer::load(&path).await
    } else {
        info!(
            "No normalization mapping at {}; pre-translations pass through unchanged",
            path.display()
        );
        Ok(ScriptNormalizer::identity())
    }
}

/// Upload mode: one concurrent unit per diff operation. Units launch as the
/// artifact streams; the remote admission gate, not the unit count, bounds
/// outstanding calls. A missing diff artifact aborts before anything runs.
pub async fn run_upload(client: Arc<RemoteClient>, config: &Config) -> Result<()> {
    let index = Arc::new(ProjectIndex::fetch(&client).await?);
    let normalizer = Arc::new(load_normalizer(config).await?);
    let mut parser = DiffParser::open(&config.diff_file()).await?;

    let reconciler = Arc::new(UploadReconciler::new(
        client,
        index,
        normalizer,
        config.source_dir(),
    ));

    let mut units = JoinSet::new();
    while let Some(operation) = parser.next_operation().await? {
        let reconciler = Arc::clone(&reconciler);
        units.spawn(async move {
            let label = operation.full_path.clone();
            (label, reconciler.apply(&operation).await)
        });
    }
    drain(units).await;
    Ok(())
}

/// Download mode: one concurrent unit per remote file record.
pub async fn run_download(client: Arc<RemoteClient>, config: &Config) -> Result<()> {
    let index = ProjectIndex::fetch(&client).await?;
    let merger = Arc::new(DownloadMerger::new(
        client,
        config.source_dir(),
        config.output_dir(),
    ));

    let mut units = JoinSet::new();
    for file in index.files().iter().cloned() {
        let merger = Arc::clone(&merger);
        units.spawn(async move {
            let label = file.name.clone();
            (label, merger.merge_file(&file).await)
        });
    }
    drain(units).await;
    Ok(())
}

/// Replace mode: one concurrent unit per remote file record, driven by a
/// reference mapping file.
pub async fn run_replace(
    client: Arc<RemoteClient>,
    config: &Config,
    reference_file: &Path,
) -> Result<()> {
    let index = ProjectIndex::fetch(&client).await?;
    let replacer = Arc::new(Replacer::load(client, reference_file).await?);

    let mut units = JoinSet::new();
    for file in index.files().iter().cloned() {
        let replacer = Arc::clone(&replacer);
        units.spawn(async move {
            let label = file.name.clone();
            (label, replacer.apply(&file).await)
        });
    }
    drain(units).await;
    Ok(())
}
