use tracing::debug;

use super::{Glossary, TerminologyEntry, MAX_EVIDENCE_IDS};

#[must_use]
pub fn retention_score(entry: &TerminologyEntry) -> f64 {
    entry.confidence * 10.0
        + entry.evidence_ids.len().min(MAX_EVIDENCE_IDS) as f64 * 0.5
        + f64::from(entry.category.priority()) / 100.0
}

impl Glossary {
    /// Keep the `max_entries` best-scoring entries; returns the discarded ones.
    ///
    /// Ties keep the earlier-inserted entry. Survivors stay in insertion order.
    pub fn prune(&mut self, max_entries: usize) -> Vec<TerminologyEntry> {
        if self.slots.len() <= max_entries {
            return Vec::new();
        }

        let mut ranked: Vec<(usize, f64)> = self
            .slots
            .iter()
            .enumerate()
            .map(|(i, s)| (i, retention_score(&s.entry)))
            .collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));

        let mut keep = vec![false; self.slots.len()];
        for &(i, _) in ranked.iter().take(max_entries) {
            keep[i] = true;
        }

        let mut removed = Vec::new();
        let slots = std::mem::take(&mut self.slots);
        for (slot, kept) in slots.into_iter().zip(keep) {
            if kept {
                self.slots.push(slot);
            } else {
                debug!(key = %slot.key, "glossary prune");
                removed.push(slot.entry);
            }
        }
        self.rebuild_index();
        removed
    }
}
