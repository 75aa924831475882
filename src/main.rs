use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{ArgAction, CommandFactory, Parser};
use tracing::info;

use subtitle_refiner::glossary::snapshot::{load_glossary, write_snapshot};
use subtitle_refiner::glossary::Glossary;
use subtitle_refiner::models::OpenAiChatModel;
use subtitle_refiner::pairs::{load_pairs, write_pairs};
use subtitle_refiner::pipeline::stages::render_refine_system;
use subtitle_refiner::pipeline::{
    init_default_config, CliOverrides, ModelExtractor, ModelRefiner, PipelineConfig,
    RefinePipeline, TraceWriter,
};
use subtitle_refiner::progress::RunProgress;
use subtitle_refiner::telemetry::init_tracing;
use subtitle_refiner::textutil::HeuristicEstimator;

#[derive(Parser, Debug)]
#[command(name = "subtitle-refiner")]
#[command(about = "Bilingual subtitle refiner with a cross-chunk terminology glossary", long_about = None)]
struct Args {
    /// Generate default config + prompt files, then exit
    #[arg(long)]
    init_config: bool,

    /// Directory to write config/prompt files (default: current directory)
    #[arg(long, value_name = "DIR")]
    init_config_dir: Option<PathBuf>,

    /// Overwrite existing config/prompt files when used with --init-config
    #[arg(long)]
    force: bool,

    /// Input pair list JSON (`[{"id", "eng", "chinese"}, ...]`)
    #[arg(value_name = "PAIRS_JSON")]
    input: Option<PathBuf>,

    /// Output pair list JSON (default: <input_stem>_refined.json)
    #[arg(short, long, value_name = "JSON")]
    output: Option<PathBuf>,

    /// Glossary snapshot to start from
    #[arg(long, value_name = "JSON")]
    glossary_in: Option<PathBuf>,

    /// Glossary snapshot to write (default: <output_stem>.terminology.json)
    #[arg(long, value_name = "JSON")]
    glossary_out: Option<PathBuf>,

    /// Config file path (default: search for subtitle-refiner.toml upwards)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Model name for refinement (and extraction unless terminology_model is set)
    #[arg(long)]
    model: Option<String>,

    /// Fixed pairs per chunk; 0 or unset sizes chunks by token budget
    #[arg(long)]
    pairs_per_chunk: Option<usize>,

    /// Refine at most N chunks; the rest is written unchanged
    #[arg(long)]
    max_chunks: Option<usize>,

    /// Only process the first few pairs (pipeline.dry_run_pairs, default 10)
    #[arg(long)]
    dry_run: bool,

    /// Maximum glossary entries kept after each chunk
    #[arg(long)]
    glossary_max: Option<usize>,

    /// Minimum confidence for extracted terms
    #[arg(long)]
    min_confidence: Option<f64>,

    /// Print chunk statistics and exit (no model calls)
    #[arg(long)]
    chunk_stats: bool,

    /// Validate + merge a candidate list JSON into --glossary-in, write --glossary-out (no model calls)
    #[arg(long, value_name = "JSON")]
    merge_candidates: Option<PathBuf>,

    /// More log output (-v debug, -vv trace); RUST_LOG takes precedence
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

impl Args {
    fn overrides(&self) -> CliOverrides {
        CliOverrides {
            model: self.model.clone(),
            pairs_per_chunk: self.pairs_per_chunk,
            max_chunks: self.max_chunks,
            dry_run: self.dry_run,
            glossary_max: self.glossary_max,
            min_confidence: self.min_confidence,
        }
    }
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);

    if args.init_config {
        let dir = args
            .init_config_dir
            .clone()
            .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));
        let cfg_path = init_default_config(&dir, args.force).context("init default config")?;
        eprintln!("Wrote config: {}", cfg_path.display());
        return Ok(());
    }

    if let Some(candidates) = args.merge_candidates.clone() {
        return merge_candidates(&args, &candidates);
    }

    let input = match args.input.clone() {
        Some(p) => p,
        None => {
            let mut cmd = Args::command();
            cmd.print_help().context("print help")?;
            eprintln!(
                "\n\nUSAGE:\n  subtitle-refiner <pairs.json>\n\nTIPS:\n  - Default config search: subtitle-refiner.toml (upwards), or set SUBTITLE_REFINER_CONFIG.\n  - The API key is read from OPENAI_API_KEY unless llm.api_key_env says otherwise.\n"
            );
            return Ok(());
        }
    };
    let output = args
        .output
        .clone()
        .unwrap_or_else(|| sibling_with_suffix(&input, "_refined.json"));
    let glossary_out = args
        .glossary_out
        .clone()
        .unwrap_or_else(|| sibling_with_suffix(&output, ".terminology.json"));

    let mut cfg =
        PipelineConfig::from_paths_and_args(&input, &output, args.config.clone(), args.overrides())
            .context("build config")?;
    let records = load_pairs(&input)?;

    if args.chunk_stats {
        let base_prompt = render_refine_system(&cfg.prompts.refine_system, &Glossary::new());
        let stats = cfg.run.plan(&records, &HeuristicEstimator, &base_prompt);
        print!("{}", stats.render_block());
        return Ok(());
    }

    let mut glossary = match args.glossary_in.as_deref() {
        Some(p) => load_glossary(p, cfg.policy(), cfg.run.max_entries)?,
        None => Glossary::new(),
    };
    info!(
        input = %input.display(),
        pairs = records.len(),
        glossary = glossary.len(),
        model = %cfg.refine_llm.model,
        config = %cfg.config_path.display(),
        "starting refinement"
    );

    cfg.run.checkpoint = cfg.checkpoint_glossary.then(|| glossary_out.clone());
    let trace = TraceWriter::new(cfg.trace_dir.clone(), cfg.trace_prompts)?;

    let refine_model =
        OpenAiChatModel::new(cfg.refine_llm.clone()).context("init refinement model")?;
    let extract_model =
        OpenAiChatModel::new(cfg.extract_llm.clone()).context("init terminology model")?;
    let refiner = ModelRefiner::new(
        refine_model,
        cfg.prompts.refine_system.clone(),
        cfg.refine_max_tokens,
    )
    .with_trace(trace.clone(), cfg.log_max_chars);
    let extractor = ModelExtractor::new(
        extract_model,
        cfg.prompts.extract_terms.clone(),
        cfg.run.min_confidence,
        cfg.extract_max_tokens,
    )
    .with_trace(trace, cfg.log_max_chars);

    let mut pipeline = RefinePipeline::new(refiner, extractor, HeuristicEstimator, cfg.run.clone())
        .with_progress(RunProgress::new(true));
    let report = pipeline.run(&records, &mut glossary);

    write_pairs(&output, &report.records)?;
    write_snapshot(&glossary_out, &glossary)?;
    info!(
        output = %output.display(),
        glossary_out = %glossary_out.display(),
        refined = report.refined_pairs(),
        failed_chunks = report.failed_chunks(),
        skipped_chunks = report.skipped_chunks,
        glossary = glossary.len(),
        digest = %glossary.digest(),
        "done"
    );
    Ok(())
}

fn merge_candidates(args: &Args, candidates: &Path) -> anyhow::Result<()> {
    let glossary_out = args
        .glossary_out
        .clone()
        .or_else(|| args.glossary_in.clone())
        .context("--merge-candidates needs --glossary-out (or --glossary-in to update in place)")?;
    let cfg = PipelineConfig::from_paths_and_args(
        candidates,
        &glossary_out,
        args.config.clone(),
        args.overrides(),
    )
    .context("build config")?;

    let mut glossary = match args.glossary_in.as_deref() {
        Some(p) => load_glossary(p, cfg.policy(), cfg.run.max_entries)?,
        None => Glossary::new(),
    };
    let text = std::fs::read_to_string(candidates)
        .with_context(|| format!("read candidates: {}", candidates.display()))?;
    let raw: serde_json::Value = serde_json::from_str(text.trim_start_matches('\u{FEFF}'))
        .with_context(|| format!("parse candidates: {}", candidates.display()))?;

    let report = glossary.apply_batch(
        &raw,
        cfg.run.min_confidence,
        cfg.policy(),
        cfg.run.max_entries,
    );
    write_snapshot(&glossary_out, &glossary)?;
    info!(
        accepted = report.accepted,
        rejected = report.rejected.len(),
        inserted = report.inserted(),
        replaced = report.replaced(),
        pruned = report.pruned.len(),
        glossary = glossary.len(),
        out = %glossary_out.display(),
        "candidates merged"
    );
    for r in &report.rejected {
        eprintln!("rejected: {r}");
    }
    Ok(())
}

fn sibling_with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("output")
        .to_string();
    path.with_file_name(format!("{stem}{suffix}"))
}
