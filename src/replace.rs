use crate::client::{ProjectFile, RemoteClient, TranslationEntry};
use crate::project::file_name;
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Bulk maintenance pass: rewrites remote translations from a reference
/// mapping of original text to its canonical translation. Unlike
/// pre-translation this deliberately overrides reviewed entries — the
/// reference file is the authority for the originals it maps.
#[derive(Debug)]
pub struct Replacer {
    client: Arc<RemoteClient>,
    reference: HashMap<String, String>,
}

impl Replacer {
    /// Load the reference mapping (a JSON object `original -> translation`).
    /// A missing or malformed reference file is a fatal startup failure.
    pub async fn load(client: Arc<RemoteClient>, path: &Path) -> Result<Self> {
        let text = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read reference file {}", path.display()))?;
        let reference = serde_json::from_str(&text)
            .with_context(|| format!("{} is not a JSON string mapping", path.display()))?;

        Ok(Self { client, reference })
    }

    pub fn from_reference(client: Arc<RemoteClient>, reference: HashMap<String, String>) -> Self {
        Self { client, reference }
    }

    /// Rewrite one file's entries whose original is mapped and whose stored
    /// translation differs; submit the changed set as one batch.
    pub async fn apply(&self, file: &ProjectFile) -> Result<()> {
        let entries = self.client.file_translations(file.id).await?;
        if entries.is_empty() {
            return Ok(());
        }

        let updates: Vec<TranslationEntry> = entries
            .into_iter()
            .filter_map(|mut e| {
                let replacement = self.reference.get(&e.original)?;
                if e.translation.as_deref() == Some(replacement.as_str()) {
                    return None;
                }
                e.translation = Some(replacement.clone());
                e.stage = 1;
                Some(e)
            })
            .collect();

        if updates.is_empty() {
            return Ok(());
        }
        self.client
            .upload_translations(file.id, file_name(&file.name), &updates)
            .await?;
        info!("Replaced {} entries in {}", updates.len(), file.name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::retry::RetryConfig;
    use std::path::PathBuf;
    use std::time::Duration;
    use tempfile::TempDir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_client(api_base: &str) -> Arc<RemoteClient> {
        let config = Config {
            api_base: api_base.to_string(),
            project_id: 1,
            tokens: vec!["token".to_string()],
            max_concurrency: 8,
            root: PathBuf::from("."),
        };
        Arc::new(
            RemoteClient::new(&config).with_retry(RetryConfig::new(1, Duration::from_millis(1))),
        )
    }

    fn reference(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn project_file(id: u64, name: &str) -> ProjectFile {
        ProjectFile {
            id,
            name: name.to_string(),
        }
    }

    #[tokio::test]
    async fn test_only_differing_mapped_entries_are_submitted() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/projects/1/files/3/translation"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {"key": "0", "original": "苹果", "translation": "apple", "stage": 1},
                {"key": "1", "original": "橙子", "translation": "Orange", "stage": 1},
                {"key": "2", "original": "梨", "translation": "pear", "stage": 1}
            ])))
            .mount(&mock_server)
            .await;

        Mock::given(method("POST"))
            .and(path("/projects/1/files/3/translation"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&mock_server)
            .await;

        let replacer = Replacer::from_reference(
            test_client(&mock_server.uri()),
            // 橙子 already matches; 梨 is unmapped
            reference(&[("苹果", "Apple"), ("橙子", "Orange")]),
        );
        replacer
            .apply(&project_file(3, "ch1.json"))
            .await
            .expect("apply");

        let requests = mock_server.received_requests().await.expect("requests");
        let batch = requests
            .iter()
            .find(|r| r.method.as_str() == "POST")
            .expect("batch submitted");
        let body = String::from_utf8_lossy(&batch.body);
        assert!(body.contains("Apple"));
        assert!(!body.contains("Orange"));
        assert!(!body.contains("pear"));
    }

    #[tokio::test]
    async fn test_no_changes_means_no_write() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/projects/1/files/3/translation"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {"key": "0", "original": "苹果", "translation": "Apple", "stage": 1}
            ])))
            .mount(&mock_server)
            .await;

        Mock::given(method("POST"))
            .and(path("/projects/1/files/3/translation"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&mock_server)
            .await;

        let replacer = Replacer::from_reference(
            test_client(&mock_server.uri()),
            reference(&[("苹果", "Apple")]),
        );
        replacer
            .apply(&project_file(3, "ch1.json"))
            .await
            .expect("apply");
    }

    #[tokio::test]
    async fn test_load_missing_reference_is_fatal() {
        let mock_server = MockServer::start().await;
        let dir = TempDir::new().expect("temp dir");

        let err = Replacer::load(
            test_client(&mock_server.uri()),
            &dir.path().join("absent.json"),
        )
        .await
        .unwrap_err();
        assert!(format!("{:#}", err).contains("reference file"));
    }
}
