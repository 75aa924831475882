use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context};

use crate::config::{
    find_default_config, load_config, AppConfig, CONFIG_ENV, DEFAULT_CONFIG_FILENAME,
};
use crate::glossary::{MergePolicy, DEFAULT_MAX_ENTRIES, DEFAULT_MIN_CONFIDENCE};
use crate::models::openai::{DEFAULT_API_KEY_ENV, DEFAULT_BASE_URL, DEFAULT_MODEL};
use crate::models::OpenAiConfig;
use crate::pipeline::prompts::{default_prompt_files, PromptSet, DEFAULT_PROMPTS_DIR};
use crate::pipeline::refiner::RunSettings;
use crate::pipeline::retry::RetryPolicy;

pub const DEFAULT_CHUNK_TOKEN_SOFT_LIMIT: usize = 60_000;
pub const DEFAULT_GLOSSARY_RESERVE_TOKENS: usize = 1_000;
pub const DEFAULT_DRY_RUN_PAIRS: usize = 10;
pub const DEFAULT_REFINE_ATTEMPTS: u32 = 3;
pub const DEFAULT_EXTRACT_ATTEMPTS: u32 = 2;
pub const DEFAULT_BASE_DELAY_MS: u64 = 1_000;
pub const DEFAULT_MAX_DELAY_MS: u64 = 30_000;
pub const DEFAULT_TIMEOUT_SECS: u64 = 240;
pub const DEFAULT_MAX_OUTPUT_TOKENS: u32 = 32_000;
pub const DEFAULT_TERMINOLOGY_MAX_OUTPUT_TOKENS: u32 = 4_000;

/// Command-line values that take precedence over the config file.
#[derive(Clone, Debug, Default)]
pub struct CliOverrides {
    pub model: Option<String>,
    pub pairs_per_chunk: Option<usize>,
    pub max_chunks: Option<usize>,
    pub dry_run: bool,
    pub glossary_max: Option<usize>,
    pub min_confidence: Option<f64>,
}

#[derive(Clone, Debug)]
pub struct PipelineConfig {
    pub config_path: PathBuf,

    pub run: RunSettings,

    pub refine_llm: OpenAiConfig,
    pub extract_llm: OpenAiConfig,
    pub refine_max_tokens: u32,
    pub extract_max_tokens: u32,

    pub trace_dir: PathBuf,
    pub trace_prompts: bool,
    pub checkpoint_glossary: bool,
    pub log_max_chars: usize,

    pub prompts: PromptSet,
}

impl PipelineConfig {
    pub fn from_paths_and_args(
        input: &Path,
        output: &Path,
        config_path: Option<PathBuf>,
        overrides: CliOverrides,
    ) -> anyhow::Result<Self> {
        let workdir = input
            .parent()
            .map(|p| p.to_path_buf())
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| PathBuf::from("."));
        let workdir = workdir.canonicalize().unwrap_or(workdir);

        let cfg_file = config_path
            .or_else(|| std::env::var(CONFIG_ENV).ok().map(PathBuf::from))
            .or_else(|| find_default_config(&workdir, DEFAULT_CONFIG_FILENAME));

        let mut file_cfg = AppConfig::default();
        if let Some(p) = cfg_file.as_ref() {
            if p.exists() {
                file_cfg = load_config(p)?;
            }
        }
        let cfg_path = cfg_file.unwrap_or_else(|| workdir.join(DEFAULT_CONFIG_FILENAME));

        let output_dir = output
            .parent()
            .map(|p| p.to_path_buf())
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| workdir.clone());

        let prompts = PromptSet::load(&cfg_path, &file_cfg).context("load prompts")?;
        Self::resolve(cfg_path, &output_dir, &file_cfg, overrides, prompts)
    }

    fn resolve(
        config_path: PathBuf,
        output_dir: &Path,
        file_cfg: &AppConfig,
        overrides: CliOverrides,
        prompts: PromptSet,
    ) -> anyhow::Result<Self> {
        let p = &file_cfg.pipeline;
        let g = &file_cfg.glossary;
        let llm = &file_cfg.llm;
        let r = &file_cfg.retry;

        let min_confidence = overrides
            .min_confidence
            .or(g.min_confidence)
            .unwrap_or(DEFAULT_MIN_CONFIDENCE);
        if !min_confidence.is_finite() || !(0.0..=1.0).contains(&min_confidence) {
            bail!("min_confidence must be within [0, 1], got {min_confidence}");
        }
        let max_entries = overrides
            .glossary_max
            .or(g.max_entries)
            .unwrap_or(DEFAULT_MAX_ENTRIES);
        if max_entries == 0 {
            bail!("glossary max_entries must be at least 1");
        }
        let policy = g.policy.clone().unwrap_or_default();
        policy.validate().context("glossary.policy")?;

        let base_delay = Duration::from_millis(r.base_delay_ms.unwrap_or(DEFAULT_BASE_DELAY_MS));
        let max_delay = Duration::from_millis(r.max_delay_ms.unwrap_or(DEFAULT_MAX_DELAY_MS));

        let run = RunSettings {
            pairs_per_chunk: overrides
                .pairs_per_chunk
                .or(p.pairs_per_chunk)
                .filter(|n| *n > 0),
            chunk_token_soft_limit: p
                .chunk_token_soft_limit
                .unwrap_or(DEFAULT_CHUNK_TOKEN_SOFT_LIMIT),
            glossary_reserve_tokens: p
                .glossary_reserve_tokens
                .unwrap_or(DEFAULT_GLOSSARY_RESERVE_TOKENS),
            max_chunks: overrides.max_chunks.or(p.max_chunks).filter(|n| *n > 0),
            dry_run_pairs: overrides
                .dry_run
                .then(|| p.dry_run_pairs.unwrap_or(DEFAULT_DRY_RUN_PAIRS)),
            min_confidence,
            max_entries,
            policy,
            refine_retry: RetryPolicy::new(
                r.refine_attempts.unwrap_or(DEFAULT_REFINE_ATTEMPTS),
                base_delay,
                max_delay,
            ),
            extract_retry: RetryPolicy::new(
                r.extract_attempts.unwrap_or(DEFAULT_EXTRACT_ATTEMPTS),
                base_delay,
                max_delay,
            ),
            checkpoint: None,
        };

        let model = overrides
            .model
            .or_else(|| llm.model.clone())
            .unwrap_or_else(|| DEFAULT_MODEL.to_string());
        let refine_llm = OpenAiConfig {
            base_url: llm
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            model: model.clone(),
            api_key_env: llm
                .api_key_env
                .clone()
                .unwrap_or_else(|| DEFAULT_API_KEY_ENV.to_string()),
            timeout: Duration::from_secs(llm.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS)),
            temperature: llm.temperature,
            reasoning_effort: llm.reasoning_effort.clone(),
        };
        let extract_llm = OpenAiConfig {
            model: llm.terminology_model.clone().unwrap_or(model),
            ..refine_llm.clone()
        };

        let trace_dir = p.trace_dir.clone().unwrap_or_else(|| "_trace".to_string());
        let trace_dir = if Path::new(&trace_dir).is_absolute() {
            PathBuf::from(trace_dir)
        } else {
            output_dir.join(trace_dir)
        };

        Ok(Self {
            config_path,
            run,
            refine_llm,
            extract_llm,
            refine_max_tokens: llm.max_output_tokens.unwrap_or(DEFAULT_MAX_OUTPUT_TOKENS),
            extract_max_tokens: llm
                .terminology_max_output_tokens
                .unwrap_or(DEFAULT_TERMINOLOGY_MAX_OUTPUT_TOKENS),
            trace_dir,
            trace_prompts: p.trace_prompts.unwrap_or(false),
            checkpoint_glossary: p.checkpoint_glossary.unwrap_or(true),
            log_max_chars: p.log_max_chars.unwrap_or(240),
            prompts,
        })
    }

    pub fn policy(&self) -> &MergePolicy {
        &self.run.policy
    }
}

pub fn init_default_config(dir: &Path, force: bool) -> anyhow::Result<PathBuf> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("create config dir: {}", dir.display()))?;
    let cfg_path = dir.join(DEFAULT_CONFIG_FILENAME);

    let prompts_dir = dir.join(DEFAULT_PROMPTS_DIR);
    std::fs::create_dir_all(&prompts_dir)
        .with_context(|| format!("create prompts dir: {}", prompts_dir.display()))?;

    for (fname, body) in default_prompt_files() {
        let p = prompts_dir.join(fname);
        if p.exists() && !force {
            continue;
        }
        std::fs::write(&p, body).with_context(|| format!("write prompt: {}", p.display()))?;
    }

    if cfg_path.exists() && !force {
        return Ok(cfg_path);
    }
    std::fs::write(&cfg_path, DEFAULT_CONFIG_TOML)
        .with_context(|| format!("write config: {}", cfg_path.display()))?;
    Ok(cfg_path)
}

const DEFAULT_CONFIG_TOML: &str = r#"[pipeline]
# Fixed pairs per chunk. Leave unset (or 0) to size chunks by token budget.
# pairs_per_chunk = 50
chunk_token_soft_limit = 60000
glossary_reserve_tokens = 1000
# max_chunks = 2
dry_run_pairs = 10

trace_dir = "_trace"
trace_prompts = false
checkpoint_glossary = true
log_max_chars = 240

[glossary]
max_entries = 100
min_confidence = 0.6

[glossary.policy]
replace_margin = 0.10
near_tie_window = 0.10
category_priority_gap = 10
conflict_margin = 0.15

[llm]
base_url = "https://api.openai.com/v1"
model = "gpt-5-mini"
# terminology_model = "gpt-5-mini"
api_key_env = "OPENAI_API_KEY"
timeout_secs = 240
max_output_tokens = 32000
terminology_max_output_tokens = 4000
# temperature = 0.3
# reasoning_effort = "low"

[retry]
refine_attempts = 3
extract_attempts = 2
base_delay_ms = 1000
max_delay_ms = 30000

[prompts]
refine_system = "prompts/refine_system.txt"
extract_terms = "prompts/extract_terms.json.txt"
"#;
