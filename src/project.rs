use crate::client::{ProjectFile, RemoteClient};
use anyhow::Result;

/// Filename component of a slash-separated path.
pub fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Immutable snapshot of the remote file listing, fetched once per run.
pub struct ProjectIndex {
    files: Vec<ProjectFile>,
}

impl ProjectIndex {
    pub async fn fetch(client: &RemoteClient) -> Result<Self> {
        Ok(Self {
            files: client.list_files().await?,
        })
    }

    pub fn from_files(files: Vec<ProjectFile>) -> Self {
        Self { files }
    }

    pub fn files(&self) -> &[ProjectFile] {
        &self.files
    }

    /// Resolve a local path to its remote record by filename component only,
    /// case-sensitive. When the listing contains duplicate names the first
    /// match wins; names are assumed unique within a project (known
    /// limitation, kept as-is pending an upstream uniqueness guarantee).
    pub fn lookup(&self, full_path: &str) -> Option<&ProjectFile> {
        let name = file_name(full_path);
        self.files.iter().find(|f| file_name(&f.name) == name)
    }
}
