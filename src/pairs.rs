use std::collections::HashMap;
use std::path::Path;

use anyhow::Context;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

static ASS_TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\{[^}]+\}").expect("ass tag regex"));

/// One matched source/target subtitle line, as produced by the subtitle parser.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TranslationPairRecord {
    pub id: u64,
    #[serde(rename = "eng")]
    pub source_text: String,
    #[serde(rename = "chinese")]
    pub target_text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<serde_json::Value>,
}

impl TranslationPairRecord {
    pub fn new(id: u64, source_text: impl Into<String>, target_text: impl Into<String>) -> Self {
        Self {
            id,
            source_text: source_text.into(),
            target_text: target_text.into(),
            meta: None,
        }
    }

    /// Model-facing form of the record. Metadata never leaves the process.
    #[must_use]
    pub fn prompt_value(&self) -> serde_json::Value {
        serde_json::json!({
            "id": self.id,
            "eng": self.source_text,
            "chinese": self.target_text,
        })
    }

    #[must_use]
    pub fn prompt_json(&self) -> String {
        self.prompt_value().to_string()
    }
}

/// Strict shape of one element of a refinement reply.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RefinedPair {
    pub id: u64,
    pub eng: String,
    pub chinese: String,
}

#[must_use]
pub fn pairs_prompt_json(records: &[TranslationPairRecord]) -> String {
    let list: Vec<serde_json::Value> = records.iter().map(|r| r.prompt_value()).collect();
    serde_json::to_string_pretty(&list).unwrap_or_else(|_| "[]".to_string())
}

#[must_use]
pub fn ass_tag_counts(text: &str) -> HashMap<&str, usize> {
    let mut counts = HashMap::new();
    for m in ASS_TAG_RE.find_iter(text) {
        *counts.entry(m.as_str()).or_insert(0) += 1;
    }
    counts
}

/// True when every ASS override block of `original` survives in `modified` with the same count.
#[must_use]
pub fn tags_preserved(original: &str, modified: &str) -> bool {
    ass_tag_counts(original) == ass_tag_counts(modified)
}

pub fn load_pairs(path: &Path) -> anyhow::Result<Vec<TranslationPairRecord>> {
    let text =
        std::fs::read_to_string(path).with_context(|| format!("read pairs: {}", path.display()))?;
    let text = text.trim_start_matches('\u{FEFF}');
    let records: Vec<TranslationPairRecord> =
        serde_json::from_str(text).with_context(|| format!("parse pairs: {}", path.display()))?;
    Ok(records)
}

pub fn write_pairs(path: &Path, records: &[TranslationPairRecord]) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(records).context("serialize pairs")?;
    std::fs::write(path, json).with_context(|| format!("write pairs: {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_json_drops_meta() {
        let mut rec = TranslationPairRecord::new(3, "Hello", "你好");
        rec.meta = Some(serde_json::json!({"start": "0:00:01.00"}));
        let v: serde_json::Value = serde_json::from_str(&rec.prompt_json()).expect("json");
        assert_eq!(v["id"], 3);
        assert_eq!(v["eng"], "Hello");
        assert!(v.get("meta").is_none());
    }

    #[test]
    fn tags_must_survive_with_same_counts() {
        assert!(tags_preserved(r"{\i1}Hello{\i0}", r"{\i1}Hello.{\i0}"));
        assert!(!tags_preserved(r"{\i1}Hello{\i0}", "Hello."));
        assert!(!tags_preserved(r"{\b1}a", r"{\b1}a{\b1}"));
        assert!(tags_preserved("plain", "Plain."));
    }

    #[test]
    fn pairs_file_tolerates_bom() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("pairs.json");
        std::fs::write(
            &path,
            "\u{FEFF}[{\"id\":0,\"eng\":\"hi\",\"chinese\":\"嗨\",\"meta\":{\"layer\":0}}]",
        )
        .expect("write");
        let records = load_pairs(&path).expect("load");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].target_text, "嗨");
        assert!(records[0].meta.is_some());
    }
}
