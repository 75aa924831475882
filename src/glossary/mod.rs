//! Cross-chunk terminology glossary.
//!
//! Candidates proposed by the extraction step flow through
//! [`validate::validate_candidates`] → [`Glossary::merge_batch`] → [`Glossary::prune`]
//! once per chunk, so the next chunk's prompt sees everything learned so far.

mod merge;
mod normalize;
mod prune;
pub mod snapshot;
mod validate;

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub use merge::{MergeEvent, MergePolicy, ReplaceRule};
pub use normalize::{normalize_term, normalized_key, NormalizedTerm};
pub use prune::retention_score;
pub use validate::{validate_candidate, validate_candidates, Rejection, ValidatedCandidate, Validation};

pub const MAX_EVIDENCE_IDS: usize = 5;
pub const DEFAULT_MAX_ENTRIES: usize = 100;
pub const DEFAULT_MIN_CONFIDENCE: f64 = 0.6;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TermCategory {
    Person,
    Place,
    Organization,
    Title,
    Acronym,
    Unit,
    Ship,
    Project,
    Law,
    Other,
}

impl TermCategory {
    pub const ALL: [TermCategory; 10] = [
        Self::Person,
        Self::Place,
        Self::Organization,
        Self::Title,
        Self::Acronym,
        Self::Unit,
        Self::Ship,
        Self::Project,
        Self::Law,
        Self::Other,
    ];

    /// Case-insensitive lookup; anything outside the closed set is `None`.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim().to_ascii_lowercase();
        Self::ALL.into_iter().find(|c| c.as_str() == s)
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Person => "person",
            Self::Place => "place",
            Self::Organization => "organization",
            Self::Title => "title",
            Self::Acronym => "acronym",
            Self::Unit => "unit",
            Self::Ship => "ship",
            Self::Project => "project",
            Self::Law => "law",
            Self::Other => "other",
        }
    }

    #[must_use]
    pub fn priority(self) -> u32 {
        match self {
            Self::Person => 90,
            Self::Organization => 80,
            Self::Place => 75,
            Self::Acronym => 70,
            Self::Unit => 65,
            Self::Ship => 60,
            Self::Title => 55,
            Self::Project => 50,
            Self::Law => 45,
            Self::Other => 10,
        }
    }
}

impl fmt::Display for TermCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One glossary record. The wire names match the extraction output and the snapshot file.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TerminologyEntry {
    #[serde(rename = "eng")]
    pub source_text: String,
    #[serde(rename = "zh")]
    pub target_text: String,
    #[serde(rename = "type")]
    pub category: TermCategory,
    pub confidence: f64,
    #[serde(default)]
    pub evidence_ids: Vec<i64>,
}

#[derive(Clone, Debug)]
struct Slot {
    key: String,
    entry: TerminologyEntry,
}

/// Per-batch accounting returned by [`Glossary::apply_batch`].
#[derive(Clone, Debug, Default)]
pub struct MergeReport {
    pub accepted: usize,
    pub rejected: Vec<Rejection>,
    pub events: Vec<MergeEvent>,
    pub pruned: Vec<TerminologyEntry>,
}

impl MergeReport {
    #[must_use]
    pub fn inserted(&self) -> usize {
        self.events
            .iter()
            .filter(|e| matches!(e, MergeEvent::Inserted { .. }))
            .count()
    }

    #[must_use]
    pub fn replaced(&self) -> usize {
        self.events
            .iter()
            .filter(|e| matches!(e, MergeEvent::Replaced { .. }))
            .count()
    }
}

/// Ordered key → entry map. Insertion order is kept for display and for pruning ties.
#[derive(Clone, Debug, Default)]
pub struct Glossary {
    slots: Vec<Slot>,
    index: HashMap<String, usize>,
}

impl Glossary {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&TerminologyEntry> {
        self.index.get(key).map(|&i| &self.slots[i].entry)
    }

    pub fn entries(&self) -> impl Iterator<Item = &TerminologyEntry> {
        self.slots.iter().map(|s| &s.entry)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.slots.iter().map(|s| s.key.as_str())
    }

    /// The exposed record list, in glossary order.
    #[must_use]
    pub fn to_records(&self) -> Vec<TerminologyEntry> {
        self.entries().cloned().collect()
    }

    /// Validate a raw extraction payload, merge the survivors, then prune to `max_entries`.
    pub fn apply_batch(
        &mut self,
        raw: &serde_json::Value,
        min_confidence: f64,
        policy: &MergePolicy,
        max_entries: usize,
    ) -> MergeReport {
        let Validation { accepted, rejected } = validate_candidates(raw, min_confidence);
        let accepted_count = accepted.len();
        let events = self.merge_batch(accepted, policy);
        let pruned = self.prune(max_entries);
        MergeReport {
            accepted: accepted_count,
            rejected,
            events,
            pruned,
        }
    }

    /// Rebuild a glossary from an exposed record list. Unkeyable entries are dropped,
    /// duplicate keys are folded through `policy` and the result is pruned to `max_entries`.
    #[must_use]
    pub fn from_records(
        records: Vec<TerminologyEntry>,
        policy: &MergePolicy,
        max_entries: usize,
    ) -> Self {
        let mut glossary = Self::new();
        for mut entry in records {
            let Some(term) = normalize_term(&entry.source_text) else {
                continue;
            };
            entry.source_text = term.display;
            entry.confidence = entry.confidence.clamp(0.0, 1.0);
            entry.evidence_ids = merge::union_evidence(&entry.evidence_ids, &[]);
            match glossary.index.get(&term.key).copied() {
                Some(i) => {
                    merge::merge_into(&mut glossary.slots[i].entry, &entry, policy);
                }
                None => glossary.insert_slot(term.key, entry),
            }
        }
        glossary.prune(max_entries);
        glossary
    }

    /// Textual context block handed to the refinement prompt.
    #[must_use]
    pub fn render_for_prompt(&self) -> String {
        if self.is_empty() {
            return String::new();
        }
        let mut out = String::new();
        out.push_str("**Terminology Reference:**\n");
        for e in self.entries() {
            out.push_str("- ");
            out.push_str(&e.source_text);
            out.push_str(" (");
            out.push_str(e.category.as_str());
            out.push_str("): ");
            out.push_str(&e.target_text);
            out.push('\n');
        }
        out
    }

    /// SHA-256 over the canonical record list.
    #[must_use]
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        for e in self.entries() {
            hasher.update(e.source_text.as_bytes());
            hasher.update(b"\x1f");
            hasher.update(e.target_text.as_bytes());
            hasher.update(b"\x1f");
            hasher.update(e.category.as_str().as_bytes());
            hasher.update(b"\x1f");
            hasher.update(e.confidence.to_bits().to_le_bytes());
            for id in &e.evidence_ids {
                hasher.update(id.to_le_bytes());
            }
            hasher.update(b"\n");
        }
        hex::encode(hasher.finalize())
    }

    fn insert_slot(&mut self, key: String, entry: TerminologyEntry) {
        self.index.insert(key.clone(), self.slots.len());
        self.slots.push(Slot { key, entry });
    }

    fn rebuild_index(&mut self) {
        self.index = self
            .slots
            .iter()
            .enumerate()
            .map(|(i, s)| (s.key.clone(), i))
            .collect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn policy() -> MergePolicy {
        MergePolicy::default()
    }

    #[test]
    fn category_parse_is_closed_and_case_insensitive() {
        assert_eq!(TermCategory::parse(" Person "), Some(TermCategory::Person));
        assert_eq!(TermCategory::parse("SHIP"), Some(TermCategory::Ship));
        assert_eq!(TermCategory::parse("vehicle"), None);
        assert_eq!(TermCategory::parse(""), None);
    }

    #[test]
    fn entry_wire_names_round_trip() {
        let e = TerminologyEntry {
            source_text: "JAG".to_string(),
            target_text: "军法署".to_string(),
            category: TermCategory::Organization,
            confidence: 0.85,
            evidence_ids: vec![1, 7],
        };
        let v = serde_json::to_value(&e).expect("ser");
        assert_eq!(
            v,
            json!({"eng": "JAG", "zh": "军法署", "type": "organization", "confidence": 0.85, "evidence_ids": [1, 7]})
        );
        let back: TerminologyEntry = serde_json::from_value(v).expect("de");
        assert_eq!(back, e);
    }

    #[test]
    fn apply_batch_reports_and_bounds_size() {
        let mut g = Glossary::new();
        let raw = json!([
            {"eng": "Harm", "zh": "哈姆", "type": "person", "confidence": 0.9, "evidence_ids": [1]},
            {"eng": "Mac", "zh": "麦克", "type": "person", "confidence": 0.7, "evidence_ids": [2]},
            {"eng": "Bud", "zh": "巴德", "type": "person", "confidence": 0.4},
            {"eng": "JAG", "zh": "军法署", "type": "organization", "confidence": 0.8}
        ]);
        let report = g.apply_batch(&raw, DEFAULT_MIN_CONFIDENCE, &policy(), 2);
        assert_eq!(report.accepted, 3);
        assert_eq!(report.rejected.len(), 1);
        assert_eq!(report.inserted(), 3);
        assert_eq!(report.pruned.len(), 1);
        assert_eq!(report.pruned[0].source_text, "Mac");
        assert_eq!(g.len(), 2);
        assert!(g.get("harm").is_some());
    }

    #[test]
    fn quoted_and_bare_forms_share_one_slot() {
        let mut g = Glossary::new();
        let report = g.apply_batch(
            &json!([
                {"eng": "JAG", "zh": "军法署", "type": "organization", "confidence": 0.8},
                {"eng": "‘JAG’", "zh": "军法署", "type": "organization", "confidence": 0.8}
            ]),
            0.6,
            &policy(),
            100,
        );
        assert_eq!(report.accepted, 2);
        assert_eq!(report.inserted(), 1);
        assert_eq!(g.len(), 1);
        assert_eq!(g.keys().collect::<Vec<_>>(), vec!["jag"]);
    }

    #[test]
    fn malformed_payload_leaves_glossary_untouched() {
        let mut g = Glossary::new();
        g.apply_batch(
            &json!([{"eng": "JAG", "zh": "军法署", "type": "organization", "confidence": 0.8}]),
            0.6,
            &policy(),
            100,
        );
        let before = g.digest();
        for raw in [json!({"terms": []}), json!("oops"), json!(null), json!([1, 2, "x"])] {
            let report = g.apply_batch(&raw, 0.6, &policy(), 100);
            assert_eq!(report.accepted, 0);
            assert!(report.events.is_empty());
        }
        assert_eq!(g.digest(), before);
    }

    #[test]
    fn from_records_folds_duplicates_and_skips_unkeyable() {
        let records = vec![
            TerminologyEntry {
                source_text: "JAG".to_string(),
                target_text: "军法处".to_string(),
                category: TermCategory::Organization,
                confidence: 0.65,
                evidence_ids: vec![1],
            },
            TerminologyEntry {
                source_text: "“”".to_string(),
                target_text: "x".to_string(),
                category: TermCategory::Other,
                confidence: 0.9,
                evidence_ids: vec![],
            },
            TerminologyEntry {
                source_text: "jag".to_string(),
                target_text: "军法署".to_string(),
                category: TermCategory::Organization,
                confidence: 0.85,
                evidence_ids: vec![2],
            },
        ];
        let g = Glossary::from_records(records, &policy(), 100);
        assert_eq!(g.len(), 1);
        let e = g.get("jag").expect("jag");
        assert_eq!(e.target_text, "军法署");
        assert_eq!(e.evidence_ids, vec![1, 2]);
    }

    #[test]
    fn from_records_stores_display_form_and_prunes() {
        let entry = |src: &str, conf: f64| TerminologyEntry {
            source_text: src.to_string(),
            target_text: format!("{src}-zh"),
            category: TermCategory::Person,
            confidence: conf,
            evidence_ids: vec![],
        };
        let g = Glossary::from_records(
            vec![entry("“JAG”", 0.9), entry("Harm", 0.7), entry("Mac", 0.8)],
            &policy(),
            2,
        );
        assert_eq!(g.len(), 2);
        assert_eq!(g.get("jag").map(|e| e.source_text.as_str()), Some("JAG"));
        assert!(g.get("harm").is_none());
        assert!(g.get("mac").is_some());
        assert!(g.render_for_prompt().contains("- JAG (person): "));
    }

    #[test]
    fn render_lists_entries_in_order() {
        let mut g = Glossary::new();
        assert_eq!(g.render_for_prompt(), "");
        g.apply_batch(
            &json!([
                {"eng": "Harm", "zh": "哈姆", "type": "person", "confidence": 0.9},
                {"eng": "JAG", "zh": "军法署", "type": "organization", "confidence": 0.8}
            ]),
            0.6,
            &policy(),
            100,
        );
        let text = g.render_for_prompt();
        let harm = text.find("- Harm (person): 哈姆").expect("harm line");
        let jag = text.find("- JAG (organization): 军法署").expect("jag line");
        assert!(harm < jag);
    }
}
