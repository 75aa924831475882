use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;

use crate::pairs::TranslationPairRecord;

static CODE_FENCE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```(?:json)?\s*(.*?)```").expect("code fence regex"));

/// Token counting capability used by the token-budgeted chunker.
pub trait TokenEstimator {
    fn estimate(&self, text: &str) -> usize;
}

impl<F> TokenEstimator for F
where
    F: Fn(&str) -> usize,
{
    fn estimate(&self, text: &str) -> usize {
        self(text)
    }
}

/// Tokenizer-free estimate: one token per non-ASCII char, one per 4 ASCII chars.
#[derive(Clone, Copy, Debug, Default)]
pub struct HeuristicEstimator;

impl TokenEstimator for HeuristicEstimator {
    fn estimate(&self, text: &str) -> usize {
        let mut ascii = 0usize;
        let mut wide = 0usize;
        for ch in text.chars() {
            if ch.is_ascii() {
                ascii += 1;
            } else {
                wide += 1;
            }
        }
        wide + ascii.div_ceil(4)
    }
}

#[must_use]
pub fn estimate_record_tokens(
    estimator: &impl TokenEstimator,
    record: &TranslationPairRecord,
) -> usize {
    estimator.estimate(&record.prompt_json())
}

/// Pull the JSON array out of a model reply that may wrap it in prose or code fences.
#[must_use]
pub fn extract_json_array(text: &str) -> Option<serde_json::Value> {
    let trimmed = text.trim();
    if let Ok(v) = serde_json::from_str::<serde_json::Value>(trimmed) {
        if v.is_array() {
            return Some(v);
        }
    }
    if let Some(cap) = CODE_FENCE_RE.captures(trimmed) {
        if let Some(v) = first_array_from(cap.get(1).map(|m| m.as_str()).unwrap_or_default()) {
            return Some(v);
        }
    }
    first_array_from(trimmed)
}

fn first_array_from(text: &str) -> Option<serde_json::Value> {
    let mut offset = 0usize;
    while let Some(rel) = text[offset..].find('[') {
        let start = offset + rel;
        let mut de = serde_json::Deserializer::from_str(&text[start..]);
        if let Ok(v) = serde_json::Value::deserialize(&mut de) {
            if v.is_array() {
                return Some(v);
            }
        }
        offset = start + 1;
    }
    None
}

#[must_use]
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max_chars).collect();
    out.push('…');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heuristic_counts_wide_chars_individually() {
        assert_eq!(HeuristicEstimator.estimate(""), 0);
        assert_eq!(HeuristicEstimator.estimate("abcd"), 1);
        assert_eq!(HeuristicEstimator.estimate("abcde"), 2);
        assert_eq!(HeuristicEstimator.estimate("军法署"), 3);
    }

    #[test]
    fn closures_are_estimators() {
        let est = |s: &str| s.len() * 2;
        assert_eq!(est.estimate("abc"), 6);
    }

    #[test]
    fn finds_array_inside_prose_and_fences() {
        let fenced = "Sure:\n```json\n[{\"eng\":\"JAG\"}]\n```";
        assert_eq!(extract_json_array(fenced).expect("fenced")[0]["eng"], "JAG");

        let prose = "Here [not json] you go: [{\"id\": 1}] done";
        assert_eq!(extract_json_array(prose).expect("prose")[0]["id"], 1);

        assert!(extract_json_array("{\"eng\":\"JAG\"}").is_none());
        assert!(extract_json_array("nothing here").is_none());
    }

    #[test]
    fn truncate_marks_cut() {
        assert_eq!(truncate_chars("abc", 5), "abc");
        assert_eq!(truncate_chars("abcdef", 3), "abc…");
    }
}
