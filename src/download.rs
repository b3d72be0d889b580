use crate::client::{ProjectFile, RemoteClient, TranslationEntry};
use anyhow::{Context, Result};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info};

/// Why one entry's key path failed to resolve against its document. These
/// are data errors in the translation records, not structural bugs: the
/// entry is dropped from the merge and its siblings still apply.
#[derive(Debug, Error)]
pub enum PatchError {
    #[error("segment '{0}' is not a valid array index")]
    InvalidIndex(String),
    #[error("index {index} is out of bounds (len {len})")]
    IndexOutOfBounds { index: usize, len: usize },
    #[error("key '{0}' not found")]
    MissingKey(String),
    #[error("segment '{0}' addresses a non-container value")]
    NotAContainer(String),
}

/// Merges one remote file's translations into its raw source document and
/// writes the result to the output tree. Calls are independent per file and
/// safe to run concurrently; no two units ever touch the same local path.
pub struct DownloadMerger {
    client: Arc<RemoteClient>,
    source_dir: PathBuf,
    output_dir: PathBuf,
}

impl DownloadMerger {
    pub fn new(client: Arc<RemoteClient>, source_dir: PathBuf, output_dir: PathBuf) -> Self {
        Self {
            client,
            source_dir,
            output_dir,
        }
    }

    pub async fn merge_file(&self, file: &ProjectFile) -> Result<()> {
        let entries = self.client.file_translations(file.id).await?;
        if entries.is_empty() {
            return Ok(());
        }

        let raw_path = self.source_dir.join(&file.name);
        let output_path = self.output_dir.join(&file.name);

        let text = tokio::fs::read_to_string(&raw_path)
            .await
            .with_context(|| format!("Failed to read {}", raw_path.display()))?;
        let mut document: Value = serde_json::from_str(&text)
            .with_context(|| format!("{} is not valid JSON", raw_path.display()))?;

        apply_translations(&mut document, &entries);

        if let Some(parent) = output_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let mut rendered =
            serde_json::to_string_pretty(&document).context("Failed to serialize merged document")?;
        rendered.push('\n');
        tokio::fs::write(&output_path, rendered)
            .await
            .with_context(|| format!("Failed to write {}", output_path.display()))?;

        info!("Merged translations for {}", file.name);
        Ok(())
    }
}

/// Patch reviewed entries into `document` at their key paths. Entries at
/// stage 0 or with a blank translation keep the source value in place; a
/// key that fails to resolve is logged and skipped, never aborting the rest
/// of the merge.
pub fn apply_translations(document: &mut Value, entries: &[TranslationEntry]) {
    for entry in entries {
        let translation = entry.translation.as_deref().unwrap_or("");
        if entry.stage == 0 || translation.is_empty() {
            continue;
        }
        if let Err(e) = apply_entry(document, &entry.key, translation) {
            error!("Translation error at {}: {}", entry.key, e);
        }
    }
}

fn apply_entry(document: &mut Value, key: &str, translation: &str) -> Result<(), PatchError> {
    let segments: Vec<&str> = key.split("->").collect();
    let Some((terminal, intermediate)) = segments.split_last() else {
        return Ok(());
    };

    let mut target = document;
    for segment in intermediate {
        target = descend(target, segment)?;
    }

    // Escaped newlines in stored translations become real line breaks.
    let value = Value::String(translation.replace("\\n", "\n"));
    match target {
        Value::Array(items) => {
            let index = parse_index(terminal)?;
            let len = items.len();
            let slot = items
                .get_mut(index)
                .ok_or(PatchError::IndexOutOfBounds { index, len })?;
            *slot = value;
        }
        // Terminal object assignment inserts, mirroring how new keys appear
        // upstream.
        Value::Object(map) => {
            map.insert((*terminal).to_string(), value);
        }
        _ => return Err(PatchError::NotAContainer((*terminal).to_string())),
    }
    Ok(())
}

/// The current container's tag decides how a segment reads: arrays parse it
/// as a decimal index, objects take it verbatim as a field name (digit-only
/// field names included).
fn descend<'a>(value: &'a mut Value, segment: &str) -> Result<&'a mut Value, PatchError> {
    match value {
        Value::Array(items) => {
            let index = parse_index(segment)?;
            let len = items.len();
            items
                .get_mut(index)
                .ok_or(PatchError::IndexOutOfBounds { index, len })
        }
        Value::Object(map) => map
            .get_mut(segment)
            .ok_or_else(|| PatchError::MissingKey(segment.to_string())),
        _ => Err(PatchError::NotAContainer(segment.to_string())),
    }
}

fn parse_index(segment: &str) -> Result<usize, PatchError> {
    segment
        .parse()
        .map_err(|_| PatchError::InvalidIndex(segment.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::retry::RetryConfig;
    use serde_json::json;
    use std::time::Duration;
    use tempfile::TempDir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn entry(key: &str, translation: Option<&str>, stage: i64) -> TranslationEntry {
        TranslationEntry {
            key: key.to_string(),
            original: "original".to_string(),
            translation: translation.map(|t| t.to_string()),
            stage,
            extra: serde_json::Map::new(),
        }
    }

    // ==================== Key-path Patching ====================

    #[test]
    fn test_key_path_round_trip_array_root() {
        let mut doc = json!([{"b": "x"}]);
        apply_translations(&mut doc, &[entry("0->b", Some("y"), 1)]);
        assert_eq!(doc, json!([{"b": "y"}]));
    }

    #[test]
    fn test_key_path_round_trip_nested_object() {
        let mut doc = json!({"a": [{"b": "x"}]});
        apply_translations(&mut doc, &[entry("a->0->b", Some("y"), 1)]);
        assert_eq!(doc, json!({"a": [{"b": "y"}]}));
    }

    #[test]
    fn test_stage_zero_never_alters_document() {
        let mut doc = json!({"a": "x"});
        apply_translations(&mut doc, &[entry("a", Some("should not apply"), 0)]);
        assert_eq!(doc, json!({"a": "x"}));
    }

    #[test]
    fn test_blank_translation_keeps_source_value() {
        let mut doc = json!({"a": "x"});
        apply_translations(
            &mut doc,
            &[entry("a", Some(""), 1), entry("a", None, 1)],
        );
        assert_eq!(doc, json!({"a": "x"}));
    }

    #[test]
    fn test_escaped_newlines_become_real_line_breaks() {
        let mut doc = json!(["x"]);
        apply_translations(&mut doc, &[entry("0", Some("line1\\nline2"), 1)]);
        assert_eq!(doc, json!(["line1\nline2"]));
    }

    #[test]
    fn test_fault_isolation_out_of_bounds_sibling() {
        let mut doc = json!(["a", "b"]);
        let entries = [
            entry("0", Some("first"), 1),
            entry("9", Some("lost"), 1),
            entry("1", Some("third"), 1),
        ];
        apply_translations(&mut doc, &entries);
        assert_eq!(doc, json!(["first", "third"]));
    }

    #[test]
    fn test_merge_is_idempotent() {
        let entries = [
            entry("a->0->b", Some("translated\\ntext"), 1),
            entry("a->1", Some("second"), 2),
        ];
        let source = json!({"a": [{"b": "x"}, "y"], "untouched": [1, 2]});

        let mut first = source.clone();
        apply_translations(&mut first, &entries);
        let mut second = first.clone();
        apply_translations(&mut second, &entries);

        assert_eq!(
            serde_json::to_string_pretty(&first).unwrap(),
            serde_json::to_string_pretty(&second).unwrap()
        );
    }

    #[test]
    fn test_terminal_object_assignment_inserts() {
        let mut doc = json!({"existing": "x"});
        apply_translations(&mut doc, &[entry("fresh", Some("inserted"), 1)]);
        assert_eq!(doc, json!({"existing": "x", "fresh": "inserted"}));
    }

    #[test]
    fn test_digit_segment_on_object_reads_as_field() {
        let mut doc = json!({"0": {"b": "x"}});
        apply_translations(&mut doc, &[entry("0->b", Some("y"), 1)]);
        assert_eq!(doc, json!({"0": {"b": "y"}}));
    }

    #[test]
    fn test_apply_entry_error_variants() {
        let mut doc = json!({"a": ["x"], "s": "scalar"});

        assert!(matches!(
            apply_entry(&mut doc, "a->nope", "t"),
            Err(PatchError::InvalidIndex(_))
        ));
        assert!(matches!(
            apply_entry(&mut doc, "a->5", "t"),
            Err(PatchError::IndexOutOfBounds { index: 5, len: 1 })
        ));
        assert!(matches!(
            apply_entry(&mut doc, "missing->x", "t"),
            Err(PatchError::MissingKey(_))
        ));
        assert!(matches!(
            apply_entry(&mut doc, "s->x", "t"),
            Err(PatchError::NotAContainer(_))
        ));
        // Document untouched by the failed entries
        assert_eq!(doc, json!({"a": ["x"], "s": "scalar"}));
    }

    // ==================== Whole-file Merge ====================

    fn test_merger(api_base: &str, source: PathBuf, output: PathBuf) -> DownloadMerger {
        let config = Config {
            api_base: api_base.to_string(),
            project_id: 1,
            tokens: vec!["token".to_string()],
            max_concurrency: 8,
            root: PathBuf::from("."),
        };
        let client = Arc::new(
            RemoteClient::new(&config).with_retry(RetryConfig::new(1, Duration::from_millis(1))),
        );
        DownloadMerger::new(client, source, output)
    }

    fn project_file(id: u64, name: &str) -> ProjectFile {
        ProjectFile {
            id,
            name: name.to_string(),
        }
    }

    #[tokio::test]
    async fn test_merge_file_writes_translated_output() {
        let mock_server = MockServer::start().await;
        let dir = TempDir::new().expect("temp dir");
        let source = dir.path().join("source");
        let output = dir.path().join("translated");
        std::fs::create_dir_all(source.join("story")).expect("dirs");
        std::fs::write(source.join("story/ch1.json"), r#"[{"text": "苹果"}]"#)
            .expect("write source");

        Mock::given(method("GET"))
            .and(path("/projects/1/files/3/translation"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"key": "0->text", "original": "苹果", "translation": "蘋果", "stage": 1}
            ])))
            .mount(&mock_server)
            .await;

        let merger = test_merger(&mock_server.uri(), source, output.clone());
        merger
            .merge_file(&project_file(3, "story/ch1.json"))
            .await
            .expect("merge");

        let merged = std::fs::read_to_string(output.join("story/ch1.json")).expect("output");
        let doc: Value = serde_json::from_str(&merged).expect("parse output");
        assert_eq!(doc, json!([{"text": "蘋果"}]));
        assert!(merged.ends_with('\n'));
    }

    #[tokio::test]
    async fn test_merge_file_no_entries_is_noop() {
        let mock_server = MockServer::start().await;
        let dir = TempDir::new().expect("temp dir");
        let source = dir.path().join("source");
        let output = dir.path().join("translated");
        std::fs::create_dir_all(&source).expect("dirs");
        std::fs::write(source.join("ch1.json"), r#"["x"]"#).expect("write source");

        Mock::given(method("GET"))
            .and(path("/projects/1/files/3/translation"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .mount(&mock_server)
            .await;

        let merger = test_merger(&mock_server.uri(), source, output.clone());
        merger
            .merge_file(&project_file(3, "ch1.json"))
            .await
            .expect("merge");

        assert!(!output.join("ch1.json").exists());
    }

    #[tokio::test]
    async fn test_merge_file_missing_source_is_unit_failure() {
        let mock_server = MockServer::start().await;
        let dir = TempDir::new().expect("temp dir");
        let source = dir.path().join("source");
        let output = dir.path().join("translated");

        Mock::given(method("GET"))
            .and(path("/projects/1/files/3/translation"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"key": "0", "original": "x", "translation": "y", "stage": 1}
            ])))
            .mount(&mock_server)
            .await;

        let merger = test_merger(&mock_server.uri(), source, output);
        let err = merger
            .merge_file(&project_file(3, "ch1.json"))
            .await
            .unwrap_err();
        assert!(format!("{:#}", err).contains("Failed to read"));
    }

    #[tokio::test]
    async fn test_merge_file_bad_entry_does_not_block_file() {
        let mock_server = MockServer::start().await;
        let dir = TempDir::new().expect("temp dir");
        let source = dir.path().join("source");
        let output = dir.path().join("translated");
        std::fs::create_dir_all(&source).expect("dirs");
        std::fs::write(source.join("ch1.json"), r#"["a", "b", "c"]"#).expect("write source");

        Mock::given(method("GET"))
            .and(path("/projects/1/files/3/translation"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"key": "0", "original": "a", "translation": "A", "stage": 1},
                {"key": "0->impossible", "original": "a", "translation": "?", "stage": 1},
                {"key": "2", "original": "c", "translation": "C", "stage": 1}
            ])))
            .mount(&mock_server)
            .await;

        let merger = test_merger(&mock_server.uri(), source, output.clone());
        merger
            .merge_file(&project_file(3, "ch1.json"))
            .await
            .expect("merge completes despite the bad key");

        let merged = std::fs::read_to_string(output.join("ch1.json")).expect("output");
        let doc: Value = serde_json::from_str(&merged).expect("parse output");
        assert_eq!(doc, json!(["A", "b", "C"]));
    }
}
