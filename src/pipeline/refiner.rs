use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::chunker::{chunk_records, is_exact_partition, ChunkStats, ChunkStrategy};
use crate::glossary::snapshot::write_snapshot;
use crate::glossary::{
    Glossary, MergePolicy, MergeReport, DEFAULT_MAX_ENTRIES, DEFAULT_MIN_CONFIDENCE,
};
use crate::pairs::{tags_preserved, RefinedPair, TranslationPairRecord};
use crate::pipeline::config::{
    DEFAULT_CHUNK_TOKEN_SOFT_LIMIT, DEFAULT_EXTRACT_ATTEMPTS, DEFAULT_GLOSSARY_RESERVE_TOKENS,
    DEFAULT_REFINE_ATTEMPTS,
};
use crate::pipeline::retry::{run_with_retry, RetryPolicy};
use crate::pipeline::stages::{CandidateExtractor, ChunkRefiner};
use crate::progress::RunProgress;
use crate::textutil::TokenEstimator;

/// Resolved knobs of one refinement run.
#[derive(Clone, Debug)]
pub struct RunSettings {
    pub pairs_per_chunk: Option<usize>,
    pub chunk_token_soft_limit: usize,
    pub glossary_reserve_tokens: usize,
    pub max_chunks: Option<usize>,
    /// Only the first N pairs are processed and written.
    pub dry_run_pairs: Option<usize>,
    pub min_confidence: f64,
    pub max_entries: usize,
    pub policy: MergePolicy,
    pub refine_retry: RetryPolicy,
    pub extract_retry: RetryPolicy,
    /// Glossary snapshot rewritten after every chunk.
    pub checkpoint: Option<PathBuf>,
}

impl Default for RunSettings {
    fn default() -> Self {
        let base = Duration::from_secs(1);
        let cap = Duration::from_secs(30);
        Self {
            pairs_per_chunk: None,
            chunk_token_soft_limit: DEFAULT_CHUNK_TOKEN_SOFT_LIMIT,
            glossary_reserve_tokens: DEFAULT_GLOSSARY_RESERVE_TOKENS,
            max_chunks: None,
            dry_run_pairs: None,
            min_confidence: DEFAULT_MIN_CONFIDENCE,
            max_entries: DEFAULT_MAX_ENTRIES,
            policy: MergePolicy::default(),
            refine_retry: RetryPolicy::new(DEFAULT_REFINE_ATTEMPTS, base, cap),
            extract_retry: RetryPolicy::new(DEFAULT_EXTRACT_ATTEMPTS, base, cap),
            checkpoint: None,
        }
    }
}

impl RunSettings {
    /// `base_prompt_tokens` is the estimated size of the refinement system prompt
    /// without glossary; the glossary reserve is added on top.
    #[must_use]
    pub fn strategy(&self, base_prompt_tokens: usize) -> ChunkStrategy {
        ChunkStrategy::from_settings(
            self.pairs_per_chunk,
            self.chunk_token_soft_limit,
            base_prompt_tokens + self.glossary_reserve_tokens,
        )
    }

    /// The records a run actually covers: all of them, or the dry-run prefix.
    #[must_use]
    pub fn input_slice<'a>(&self, records: &'a [TranslationPairRecord]) -> &'a [TranslationPairRecord] {
        match self.dry_run_pairs {
            Some(n) => &records[..n.min(records.len())],
            None => records,
        }
    }

    /// Chunk statistics for `records` without calling any model.
    #[must_use]
    pub fn plan(
        &self,
        records: &[TranslationPairRecord],
        estimator: &impl TokenEstimator,
        base_prompt: &str,
    ) -> ChunkStats {
        let strategy = self.strategy(estimator.estimate(base_prompt));
        ChunkStats::from_chunks(&chunk_records(self.input_slice(records), strategy, estimator))
    }
}

/// What happened when a refinement reply was laid over its chunk.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ApplyStats {
    pub applied: usize,
    pub missing: usize,
    pub unknown_ids: usize,
    pub tag_mismatches: usize,
}

#[derive(Clone, Debug, Default)]
pub struct ChunkReport {
    pub index: usize,
    pub pairs: usize,
    pub refine_error: Option<String>,
    pub extract_error: Option<String>,
    pub apply: ApplyStats,
    pub merge: MergeReport,
    pub glossary_len: usize,
}

#[derive(Clone, Debug, Default)]
pub struct RunReport {
    /// Every input record (after dry-run truncation), refined where possible, in input order.
    pub records: Vec<TranslationPairRecord>,
    pub stats: ChunkStats,
    pub chunks: Vec<ChunkReport>,
    /// Chunks left unrefined because of `max_chunks`.
    pub skipped_chunks: usize,
}

impl RunReport {
    #[must_use]
    pub fn refined_pairs(&self) -> usize {
        self.chunks.iter().map(|c| c.apply.applied).sum()
    }

    #[must_use]
    pub fn failed_chunks(&self) -> usize {
        self.chunks.iter().filter(|c| c.refine_error.is_some()).count()
    }
}

/// Overlay `refined` onto `original` by id. Unknown ids are ignored; records without a
/// reply, or whose reply changed the ASS override blocks, keep their original text.
pub fn apply_refined(
    original: &[TranslationPairRecord],
    refined: &[RefinedPair],
) -> (Vec<TranslationPairRecord>, ApplyStats) {
    let mut by_id: HashMap<u64, &RefinedPair> = HashMap::with_capacity(refined.len());
    for pair in refined {
        by_id.entry(pair.id).or_insert(pair);
    }
    let known: HashSet<u64> = original.iter().map(|r| r.id).collect();

    let mut stats = ApplyStats {
        unknown_ids: by_id.keys().filter(|id| !known.contains(*id)).count(),
        ..ApplyStats::default()
    };
    let out = original
        .iter()
        .map(|rec| {
            let Some(pair) = by_id.get(&rec.id) else {
                stats.missing += 1;
                return rec.clone();
            };
            if !tags_preserved(&rec.source_text, &pair.eng)
                || !tags_preserved(&rec.target_text, &pair.chinese)
            {
                warn!(id = rec.id, "refined pair altered ASS tags; keeping original");
                stats.tag_mismatches += 1;
                return rec.clone();
            }
            stats.applied += 1;
            TranslationPairRecord {
                id: rec.id,
                source_text: pair.eng.clone(),
                target_text: pair.chinese.clone(),
                meta: rec.meta.clone(),
            }
        })
        .collect();
    (out, stats)
}

/// Sequential chunk driver: refine, then learn terminology, one chunk at a time.
pub struct RefinePipeline<R, X, E> {
    refiner: R,
    extractor: X,
    estimator: E,
    settings: RunSettings,
    progress: RunProgress,
    sleep: fn(Duration),
}

impl<R, X, E> RefinePipeline<R, X, E>
where
    R: ChunkRefiner,
    X: CandidateExtractor,
    E: TokenEstimator,
{
    pub fn new(refiner: R, extractor: X, estimator: E, settings: RunSettings) -> Self {
        Self {
            refiner,
            extractor,
            estimator,
            settings,
            progress: RunProgress::new(true),
            sleep: std::thread::sleep,
        }
    }

    #[must_use]
    pub fn with_sleep(mut self, sleep: fn(Duration)) -> Self {
        self.sleep = sleep;
        self
    }

    #[must_use]
    pub fn with_progress(mut self, progress: RunProgress) -> Self {
        self.progress = progress;
        self
    }

    #[must_use]
    pub fn strategy(&self) -> ChunkStrategy {
        let base = self.estimator.estimate(&self.refiner.base_prompt());
        self.settings.strategy(base)
    }

    /// Refine `records` chunk by chunk, folding extracted terminology into `glossary`
    /// before the next chunk is sent. Model failures degrade to the original text and an
    /// unchanged glossary; they never abort the run.
    pub fn run(
        &mut self,
        records: &[TranslationPairRecord],
        glossary: &mut Glossary,
    ) -> RunReport {
        let input = self.settings.input_slice(records);
        if let Some(n) = self.settings.dry_run_pairs {
            info!(pairs = input.len(), limit = n, "dry run");
        }

        let strategy = self.strategy();
        let chunks = chunk_records(input, strategy, &self.estimator);
        debug_assert!(is_exact_partition(input, &chunks));
        let stats = ChunkStats::from_chunks(&chunks);
        info!(
            chunks = stats.num_chunks,
            pairs = stats.total_records,
            avg_tokens = stats.avg_tokens as u64,
            max_tokens = stats.max_tokens,
            ?strategy,
            "chunking done"
        );

        let total = chunks.len();
        let to_process = self.settings.max_chunks.map_or(total, |m| m.min(total));
        if to_process < total {
            info!(
                processing = to_process,
                skipped = total - to_process,
                "max_chunks limit"
            );
        }

        let mut output: Vec<TranslationPairRecord> = input.to_vec();
        let mut reports = Vec::with_capacity(to_process);
        let mut offset = 0usize;
        let sleep = self.sleep;

        for chunk in chunks.iter().take(to_process) {
            self.progress.chunk(chunk.index + 1, to_process, chunk.len());
            let span = offset..offset + chunk.len();
            offset = span.end;
            let mut report = ChunkReport {
                index: chunk.index,
                pairs: chunk.len(),
                ..ChunkReport::default()
            };

            let refiner = &mut self.refiner;
            let current: &Glossary = glossary;
            let refined = run_with_retry(
                &self.settings.refine_retry,
                "refine",
                |d| sleep(d),
                |attempt| {
                    debug!(chunk = chunk.index, attempt, "refine attempt");
                    refiner.refine(chunk, current)
                },
            );
            match refined {
                Ok(pairs) => {
                    if pairs.len() != chunk.len() {
                        warn!(
                            chunk = chunk.index,
                            expected = chunk.len(),
                            got = pairs.len(),
                            "refined pair count mismatch"
                        );
                    }
                    let (merged, apply) = apply_refined(chunk.records, &pairs);
                    output[span.clone()].clone_from_slice(&merged);
                    report.apply = apply;
                }
                Err(e) => {
                    warn!(chunk = chunk.index, error = %e, "refinement failed; keeping original text");
                    report.refine_error = Some(e.to_string());
                }
            }

            let extractor = &mut self.extractor;
            let refined_records = &output[span];
            let candidates = run_with_retry(
                &self.settings.extract_retry,
                "terminology",
                |d| sleep(d),
                |_| extractor.extract_candidates(chunk.index, refined_records),
            )
            .unwrap_or_else(|e| {
                warn!(chunk = chunk.index, error = %e, "terminology extraction failed; no new terms");
                report.extract_error = Some(e.to_string());
                Value::Array(Vec::new())
            });

            report.merge = glossary.apply_batch(
                &candidates,
                self.settings.min_confidence,
                &self.settings.policy,
                self.settings.max_entries,
            );
            report.glossary_len = glossary.len();
            info!(
                chunk = chunk.index,
                accepted = report.merge.accepted,
                rejected = report.merge.rejected.len(),
                inserted = report.merge.inserted(),
                replaced = report.merge.replaced(),
                pruned = report.merge.pruned.len(),
                glossary = glossary.len(),
                "glossary updated"
            );

            if let Some(path) = self.settings.checkpoint.as_deref() {
                match write_snapshot(path, glossary) {
                    Ok(()) => debug!(path = %path.display(), digest = %glossary.digest(), "glossary checkpoint"),
                    Err(e) => warn!(path = %path.display(), error = %e, "glossary checkpoint failed"),
                }
            }
            reports.push(report);
        }

        info!(elapsed = %self.progress.elapsed(), chunks = reports.len(), "run finished");
        RunReport {
            records: output,
            stats,
            chunks: reports,
            skipped_chunks: total - to_process,
        }
    }
}
