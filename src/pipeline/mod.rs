mod config;
pub mod prompts;
pub mod refiner;
pub mod retry;
pub mod stages;
pub mod trace;

pub use config::{init_default_config, CliOverrides, PipelineConfig};
pub use refiner::{apply_refined, ApplyStats, ChunkReport, RefinePipeline, RunReport, RunSettings};
pub use retry::{run_with_retry, RetryExhausted, RetryPolicy, Retryable};
pub use stages::{
    CandidateExtractor, ChunkRefiner, ModelExtractor, ModelRefiner, StageError,
};
pub use trace::TraceWriter;
