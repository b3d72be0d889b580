use anyhow::{bail, Context, Result};
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct Config {
    // Remote platform
    pub api_base: String,
    pub project_id: u64,
    pub tokens: Vec<String>,

    // Concurrency bound shared by all units within a run
    pub max_concurrency: usize,

    // Local project root
    pub root: PathBuf,
}

impl Config {
    /// Build the run configuration from environment variables plus the
    /// CLI-provided root folder and concurrency bound. Missing credentials
    /// or project id abort the run before any work is launched.
    pub fn from_env(root: PathBuf, max_concurrency: usize) -> Result<Self> {
        let tokens: Vec<String> = std::env::var("LOCSYNC_TOKENS")
            .context("LOCSYNC_TOKENS not set")?
            .split(',')
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect();
        if tokens.is_empty() {
            bail!("LOCSYNC_TOKENS contains no usable tokens");
        }

        let project_id = std::env::var("LOCSYNC_PROJECT_ID")
            .context("LOCSYNC_PROJECT_ID not set")?
            .parse()
            .context("LOCSYNC_PROJECT_ID is not a number")?;

        let api_base = std::env::var("LOCSYNC_API_BASE")
            .unwrap_or_else(|_| "https://paratranz.cn/api".to_string());

        Ok(Self {
            api_base,
            project_id,
            tokens,
            max_concurrency,
            root,
        })
    }

    /// Untranslated source tree.
    pub fn source_dir(&self) -> PathBuf {
        self.root.join("source")
    }

    /// Translated output tree; mirrors the source tree's relative paths.
    pub fn output_dir(&self) -> PathBuf {
        self.root.join("translated")
    }

    /// Change-log artifact consumed in upload mode.
    pub fn diff_file(&self) -> PathBuf {
        self.root.join("file-diff.txt")
    }

    /// Script-normalization mapping asset, if the project carries one.
    pub fn mapping_file(&self) -> PathBuf {
        self.root.join("normalize.json")
    }
}
