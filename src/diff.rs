use anyhow::{Context, Result};
use regex::Regex;
use std::path::Path;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader, Lines};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationType {
    Add,
    Modify,
    Delete,
}

/// One changed local file, classified from the diff artifact. Consumed
/// exactly once by the upload reconciler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileOperation {
    pub op_type: OperationType,
    /// Remote-side grouping: the path's parent directory ("" at the root).
    pub folder: String,
    /// Path relative to the source tree root.
    pub full_path: String,
}

/// Lazy, single-pass reader of a `git diff --name-status` artifact.
///
/// Recognized records are a status letter (`A`/`M`/`D`), a tab, and a path;
/// anything else (rename records, headers, blanks) is skipped. The sequence
/// is exhausted once; re-parsing means re-opening the artifact.
#[derive(Debug)]
pub struct DiffParser {
    lines: Lines<BufReader<File>>,
    record: Regex,
}

impl DiffParser {
    /// A missing artifact is a hard failure: upload mode cannot proceed
    /// with zero known operations.
    pub async fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .await
            .with_context(|| format!("Failed to open diff artifact {}", path.display()))?;

        Ok(Self {
            lines: BufReader::new(file).lines(),
            record: Regex::new(r"^([AMD])\t(.+)$").unwrap(),
        })
    }

    /// Next recognized change record, or `None` once the artifact is
    /// exhausted.
    pub async fn next_operation(&mut self) -> Result<Option<FileOperation>> {
        while let Some(line) = self
            .lines
            .next_line()
            .await
            .context("Failed to read diff artifact")?
        {
            let Some(caps) = self.record.captures(line.trim_end()) else {
                continue;
            };
            let op_type = match &caps[1] {
                "A" => OperationType::Add,
                "M" => OperationType::Modify,
                _ => OperationType::Delete,
            };
            let full_path = caps[2].to_string();
            return Ok(Some(FileOperation {
                op_type,
                folder: parent_folder(&full_path),
                full_path,
            }));
        }
        Ok(None)
    }
}

fn parent_folder(path: &str) -> String {
    path.rsplit_once('/')
        .map(|(parent, _)| parent.to_string())
        .unwrap_or_default()
}
