use anyhow::bail;
use serde::Deserialize;
use tracing::debug;

use super::validate::ValidatedCandidate;
use super::{Glossary, TermCategory, TerminologyEntry, MAX_EVIDENCE_IDS};

// Absorbs float noise such as 0.65 + 0.10 landing just above 0.75.
const EPS: f64 = 1e-9;

/// Thresholds of the replacement rule table. Empirical, so they are configurable.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct MergePolicy {
    /// Rule 2: confidence gain that always wins.
    pub replace_margin: f64,
    /// Rule 3: confidences closer than this count as a near tie.
    pub near_tie_window: f64,
    /// Rule 3: category priority lead required to win a near tie.
    pub category_priority_gap: u32,
    /// Rule 5: confidence gain required to overturn a differing translation.
    pub conflict_margin: f64,
}

impl Default for MergePolicy {
    fn default() -> Self {
        Self {
            replace_margin: 0.10,
            near_tie_window: 0.10,
            category_priority_gap: 10,
            conflict_margin: 0.15,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReplaceRule {
    FillEmptyTarget,
    ConfidenceGain,
    CategoryNearTie,
    UpgradeFromOther,
    TranslationConflict,
}

#[derive(Clone, Debug, PartialEq)]
pub enum MergeEvent {
    Inserted {
        key: String,
    },
    Replaced {
        key: String,
        rule: ReplaceRule,
        previous_target: String,
    },
    EvidenceOnly {
        key: String,
        changed: bool,
    },
}

impl MergePolicy {
    /// Margins must be finite and non-negative.
    pub fn validate(&self) -> anyhow::Result<()> {
        for (name, value) in [
            ("replace_margin", self.replace_margin),
            ("near_tie_window", self.near_tie_window),
            ("conflict_margin", self.conflict_margin),
        ] {
            if !value.is_finite() || value < 0.0 {
                bail!("{name} must be a finite number >= 0, got {value}");
            }
        }
        Ok(())
    }

    /// First matching rule, in table order.
    #[must_use]
    pub fn replacement_rule(
        &self,
        existing: &TerminologyEntry,
        candidate: &TerminologyEntry,
    ) -> Option<ReplaceRule> {
        let (ec, cc) = (existing.confidence, candidate.confidence);
        let (ep, cp) = (existing.category.priority(), candidate.category.priority());

        if existing.target_text.is_empty() && !candidate.target_text.is_empty() {
            return Some(ReplaceRule::FillEmptyTarget);
        }
        if cc + EPS >= ec + self.replace_margin {
            return Some(ReplaceRule::ConfidenceGain);
        }
        if (cc - ec).abs() + EPS < self.near_tie_window && cp > ep + self.category_priority_gap {
            return Some(ReplaceRule::CategoryNearTie);
        }
        if existing.category == TermCategory::Other
            && candidate.category != TermCategory::Other
            && cc + EPS >= ec
        {
            return Some(ReplaceRule::UpgradeFromOther);
        }
        if existing.target_text != candidate.target_text && cc + EPS >= ec + self.conflict_margin {
            return Some(ReplaceRule::TranslationConflict);
        }
        None
    }
}

/// Fold `candidate` into `existing`. Returns the rule that fired when the translation was replaced.
pub(super) fn merge_into(
    existing: &mut TerminologyEntry,
    candidate: &TerminologyEntry,
    policy: &MergePolicy,
) -> Option<ReplaceRule> {
    let rule = policy.replacement_rule(existing, candidate);
    if rule.is_some() {
        existing.source_text =
            more_descriptive(&existing.source_text, &candidate.source_text).to_string();
        if !candidate.target_text.is_empty() {
            existing.target_text = candidate.target_text.clone();
        }
        if candidate.category.priority() > existing.category.priority() {
            existing.category = candidate.category;
        }
    }
    existing.confidence = existing.confidence.max(candidate.confidence);
    existing.evidence_ids = union_evidence(&existing.evidence_ids, &candidate.evidence_ids);
    rule
}

/// Prefer a multi-word full form, then the longer string; ties keep `current`.
fn more_descriptive<'a>(current: &'a str, proposed: &'a str) -> &'a str {
    let multi = |s: &str| s.trim().contains(char::is_whitespace);
    match (multi(current), multi(proposed)) {
        (false, true) => proposed,
        (true, false) => current,
        _ if proposed.chars().count() > current.chars().count() => proposed,
        _ => current,
    }
}

pub(super) fn union_evidence(a: &[i64], b: &[i64]) -> Vec<i64> {
    let mut out: Vec<i64> = Vec::with_capacity(MAX_EVIDENCE_IDS);
    for &id in a.iter().chain(b) {
        if out.len() >= MAX_EVIDENCE_IDS {
            break;
        }
        if !out.contains(&id) {
            out.push(id);
        }
    }
    out
}

impl Glossary {
    /// Integrate validated candidates in order. Re-applying the same batch is a no-op.
    pub fn merge_batch(
        &mut self,
        candidates: impl IntoIterator<Item = ValidatedCandidate>,
        policy: &MergePolicy,
    ) -> Vec<MergeEvent> {
        let mut events = Vec::new();
        for ValidatedCandidate { key, entry } in candidates {
            let Some(i) = self.index.get(&key).copied() else {
                debug!(key = %key, target = %entry.target_text, "glossary insert");
                self.insert_slot(key.clone(), entry);
                events.push(MergeEvent::Inserted { key });
                continue;
            };

            let existing = &mut self.slots[i].entry;
            let before = existing.clone();
            match merge_into(existing, &entry, policy) {
                Some(rule) => {
                    debug!(
                        key = %key,
                        ?rule,
                        from = %before.target_text,
                        to = %existing.target_text,
                        "glossary replace"
                    );
                    events.push(MergeEvent::Replaced {
                        key,
                        rule,
                        previous_target: before.target_text,
                    });
                }
                None => {
                    let changed = *existing != before;
                    events.push(MergeEvent::EvidenceOnly { key, changed });
                }
            }
        }
        events
    }
}
