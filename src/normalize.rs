use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::path::Path;

/// Deterministic text transform used to pre-fill untranslated entries, e.g.
/// orthographic variant conversion. Driven by a JSON object mapping source
/// substrings to replacements; no I/O after load.
pub struct ScriptNormalizer {
    // Sorted longest-first so the longest mapping wins at each position.
    mappings: Vec<(String, String)>,
}

impl ScriptNormalizer {
    pub async fn load(path: &Path) -> Result<Self> {
        let text = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read mapping asset {}", path.display()))?;
        let map: BTreeMap<String, String> = serde_json::from_str(&text)
            .with_context(|| format!("{} is not a JSON string mapping", path.display()))?;

        Ok(Self::from_mappings(map.into_iter().collect()))
    }

    pub fn from_mappings(mut mappings: Vec<(String, String)>) -> Self {
        mappings.retain(|(from, _)| !from.is_empty());
        mappings.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then_with(|| a.0.cmp(&b.0)));
        Self { mappings }
    }

    /// The empty mapping: conversion passes text through unchanged.
    pub fn identity() -> Self {
        Self {
            mappings: Vec::new(),
        }
    }

    /// Scan left to right, applying the longest mapping match at each
    /// position; unmatched text passes through.
    pub fn convert(&self, text: &str) -> String {
        let mut out = String::with_capacity(text.len());
        let mut rest = text;

        'scan: while !rest.is_empty() {
            for (from, to) in &self.mappings {
                if rest.starts_with(from.as_str()) {
                    out.push_str(to);
                    rest = &rest[from.len()..];
                    continue 'scan;
                }
            }
            let Some(ch) = rest.chars().next() else { break };
            out.push(ch);
            rest = &rest[ch.len_utf8()..];
        }
        out
    }
}
