use crate::pairs::TranslationPairRecord;
use crate::textutil::{estimate_record_tokens, TokenEstimator};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChunkStrategy {
    /// Close a chunk before `overhead + running + next` would exceed `soft_limit`.
    TokenBudget { soft_limit: usize, overhead: usize },
    /// Consecutive groups of N records; the last group may be shorter.
    FixedCount(usize),
}

impl ChunkStrategy {
    /// A positive `pairs_per_chunk` selects fixed-count chunking.
    #[must_use]
    pub fn from_settings(pairs_per_chunk: Option<usize>, soft_limit: usize, overhead: usize) -> Self {
        match pairs_per_chunk {
            Some(n) if n > 0 => Self::FixedCount(n),
            _ => Self::TokenBudget {
                soft_limit,
                overhead,
            },
        }
    }
}

/// A contiguous, immutable run of input records.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Chunk<'a> {
    pub index: usize,
    pub records: &'a [TranslationPairRecord],
    /// Overhead (token strategy only) plus the estimated cost of every record.
    pub estimated_tokens: usize,
}

impl<'a> Chunk<'a> {
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

pub fn chunk_records<'a>(
    records: &'a [TranslationPairRecord],
    strategy: ChunkStrategy,
    estimator: &impl TokenEstimator,
) -> Vec<Chunk<'a>> {
    let costs: Vec<usize> = records
        .iter()
        .map(|r| estimate_record_tokens(estimator, r))
        .collect();
    match strategy {
        ChunkStrategy::FixedCount(n) => chunk_by_count(records, &costs, n),
        ChunkStrategy::TokenBudget {
            soft_limit,
            overhead,
        } => chunk_by_budget(records, &costs, soft_limit, overhead),
    }
}

fn chunk_by_count<'a>(
    records: &'a [TranslationPairRecord],
    costs: &[usize],
    n: usize,
) -> Vec<Chunk<'a>> {
    let n = n.max(1);
    records
        .chunks(n)
        .zip(costs.chunks(n))
        .enumerate()
        .map(|(index, (records, costs))| Chunk {
            index,
            records,
            estimated_tokens: costs.iter().sum(),
        })
        .collect()
}

fn chunk_by_budget<'a>(
    records: &'a [TranslationPairRecord],
    costs: &[usize],
    soft_limit: usize,
    overhead: usize,
) -> Vec<Chunk<'a>> {
    let mut chunks = Vec::new();
    let mut start = 0usize;
    let mut running = 0usize;
    for (i, &cost) in costs.iter().enumerate() {
        if i > start && overhead + running + cost > soft_limit {
            chunks.push(Chunk {
                index: chunks.len(),
                records: &records[start..i],
                estimated_tokens: overhead + running,
            });
            start = i;
            running = 0;
        }
        running += cost;
    }
    if start < records.len() {
        chunks.push(Chunk {
            index: chunks.len(),
            records: &records[start..],
            estimated_tokens: overhead + running,
        });
    }
    chunks
}

/// True when the chunks, concatenated in order, are exactly `original`.
#[must_use]
pub fn is_exact_partition(original: &[TranslationPairRecord], chunks: &[Chunk<'_>]) -> bool {
    let total: usize = chunks.iter().map(Chunk::len).sum();
    total == original.len()
        && chunks
            .iter()
            .flat_map(|c| c.records.iter())
            .zip(original)
            .all(|(a, b)| a == b)
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ChunkStats {
    pub num_chunks: usize,
    pub total_records: usize,
    pub avg_records: f64,
    pub min_records: usize,
    pub max_records: usize,
    pub avg_tokens: f64,
    pub min_tokens: usize,
    pub max_tokens: usize,
}

impl ChunkStats {
    #[must_use]
    pub fn from_chunks(chunks: &[Chunk<'_>]) -> Self {
        if chunks.is_empty() {
            return Self::default();
        }
        let n = chunks.len();
        let sizes = chunks.iter().map(Chunk::len);
        let tokens = chunks.iter().map(|c| c.estimated_tokens);
        let total_records: usize = sizes.clone().sum();
        let total_tokens: usize = tokens.clone().sum();
        Self {
            num_chunks: n,
            total_records,
            avg_records: total_records as f64 / n as f64,
            min_records: sizes.clone().min().unwrap_or(0),
            max_records: sizes.max().unwrap_or(0),
            avg_tokens: total_tokens as f64 / n as f64,
            min_tokens: tokens.clone().min().unwrap_or(0),
            max_tokens: tokens.max().unwrap_or(0),
        }
    }

    #[must_use]
    pub fn render_block(&self) -> String {
        let mut out = String::new();
        out.push_str("=== Chunk Statistics ===\n");
        out.push_str(&format!("Number of chunks: {}\n", self.num_chunks));
        out.push_str(&format!("Total pairs: {}\n", self.total_records));
        out.push_str(&format!("Average pairs per chunk: {:.1}\n", self.avg_records));
        out.push_str(&format!(
            "Pair range: {} - {}\n",
            self.min_records, self.max_records
        ));
        out.push_str(&format!("Average tokens per chunk: {:.0}\n", self.avg_tokens));
        out.push_str(&format!(
            "Token range: {} - {}\n",
            self.min_tokens, self.max_tokens
        ));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn records(n: usize) -> Vec<TranslationPairRecord> {
        (0..n as u64)
            .map(|i| TranslationPairRecord::new(i, format!("line {i}"), format!("第{i}行")))
            .collect()
    }

    /// Every record costs what its `eng` text says, e.g. "1200" costs 1200.
    fn priced(costs: &[usize]) -> Vec<TranslationPairRecord> {
        costs
            .iter()
            .enumerate()
            .map(|(i, c)| TranslationPairRecord::new(i as u64, c.to_string(), ""))
            .collect()
    }

    fn by_price(json: &str) -> usize {
        let v: serde_json::Value = serde_json::from_str(json).unwrap_or_default();
        v["eng"].as_str().and_then(|s| s.parse().ok()).unwrap_or(0)
    }

    fn sizes(chunks: &[Chunk<'_>]) -> Vec<usize> {
        chunks.iter().map(Chunk::len).collect()
    }

    #[test]
    fn fixed_count_seven_by_three() {
        let recs = records(7);
        let chunks = chunk_records(&recs, ChunkStrategy::FixedCount(3), &|_: &str| 1usize);
        assert_eq!(sizes(&chunks), vec![3, 3, 1]);
        assert_eq!(chunks[2].index, 2);
        let ids: Vec<u64> = chunks[1].records.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![3, 4, 5]);
        assert!(is_exact_partition(&recs, &chunks));
    }

    #[test]
    fn every_length_partitions_exactly() {
        for n in 0..12 {
            let recs = records(n);
            for strategy in [
                ChunkStrategy::FixedCount(1),
                ChunkStrategy::FixedCount(4),
                ChunkStrategy::FixedCount(50),
                ChunkStrategy::TokenBudget {
                    soft_limit: 40,
                    overhead: 10,
                },
                ChunkStrategy::TokenBudget {
                    soft_limit: 1,
                    overhead: 0,
                },
            ] {
                let chunks = chunk_records(&recs, strategy, &crate::textutil::HeuristicEstimator);
                assert!(is_exact_partition(&recs, &chunks), "n={n} {strategy:?}");
                assert!(chunks.iter().all(|c| !c.is_empty()));
                if n == 0 {
                    assert!(chunks.is_empty());
                }
            }
        }
    }

    #[test]
    fn oversized_record_sits_alone() {
        let recs = priced(&[5000]);
        let strategy = ChunkStrategy::TokenBudget {
            soft_limit: 3000,
            overhead: 0,
        };
        let chunks = chunk_records(&recs, strategy, &by_price);
        assert_eq!(sizes(&chunks), vec![1]);
        assert_eq!(chunks[0].estimated_tokens, 5000);

        let recs = priced(&[100, 200, 5000, 100, 100]);
        let chunks = chunk_records(&recs, strategy, &by_price);
        assert_eq!(sizes(&chunks), vec![2, 1, 2]);
        assert!(is_exact_partition(&recs, &chunks));
    }

    #[test]
    fn budget_counts_overhead_once_per_chunk() {
        let recs = priced(&[300, 300, 300, 300, 300]);
        let strategy = ChunkStrategy::TokenBudget {
            soft_limit: 1000,
            overhead: 400,
        };
        let chunks = chunk_records(&recs, strategy, &by_price);
        assert_eq!(sizes(&chunks), vec![2, 2, 1]);
        assert_eq!(chunks[0].estimated_tokens, 1000);
        assert_eq!(chunks[2].estimated_tokens, 700);
    }

    #[test]
    fn multi_record_chunks_respect_soft_limit() {
        let costs: Vec<usize> = (0..60).map(|i| (i * 37 % 450) + 1).collect();
        let recs = priced(&costs);
        let soft_limit = 1200;
        let overhead = 150;
        let chunks = chunk_records(
            &recs,
            ChunkStrategy::TokenBudget {
                soft_limit,
                overhead,
            },
            &by_price,
        );
        assert!(is_exact_partition(&recs, &chunks));
        for c in chunks.iter().filter(|c| c.len() > 1) {
            assert!(c.estimated_tokens <= soft_limit, "{c:?}");
        }
    }

    #[test]
    fn strategy_selection() {
        assert_eq!(
            ChunkStrategy::from_settings(Some(50), 60000, 1000),
            ChunkStrategy::FixedCount(50)
        );
        assert_eq!(
            ChunkStrategy::from_settings(Some(0), 60000, 1000),
            ChunkStrategy::TokenBudget {
                soft_limit: 60000,
                overhead: 1000
            }
        );
    }

    #[test]
    fn stats_summarize_chunks() {
        let recs = records(7);
        let chunks = chunk_records(&recs, ChunkStrategy::FixedCount(3), &|_: &str| 10usize);
        let stats = ChunkStats::from_chunks(&chunks);
        assert_eq!(stats.num_chunks, 3);
        assert_eq!(stats.total_records, 7);
        assert_eq!((stats.min_records, stats.max_records), (1, 3));
        assert_eq!((stats.min_tokens, stats.max_tokens), (10, 30));
        assert!(stats.render_block().contains("Number of chunks: 3"));
        assert_eq!(ChunkStats::from_chunks(&[]), ChunkStats::default());
    }
}
