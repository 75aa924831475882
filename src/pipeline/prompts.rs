use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context};

use crate::config::AppConfig;

pub const DEFAULT_PROMPTS_DIR: &str = "prompts";

pub const DEFAULT_REFINE_SYSTEM: &str = "refine_system.txt";
pub const DEFAULT_EXTRACT_TERMS: &str = "extract_terms.json.txt";

#[derive(Clone, Debug)]
pub struct PromptSet {
    pub refine_system: String,
    pub extract_terms: String,
}

impl Default for PromptSet {
    fn default() -> Self {
        Self {
            refine_system: DEFAULT_REFINE_SYSTEM_TEXT.to_string(),
            extract_terms: DEFAULT_EXTRACT_TERMS_TEXT.to_string(),
        }
    }
}

impl PromptSet {
    /// Configured paths must exist; unconfigured prompts fall back to
    /// `prompts/<default>` next to the config, then to the built-in text.
    pub fn load(config_path: &Path, cfg: &AppConfig) -> anyhow::Result<Self> {
        let config_dir = config_path.parent().unwrap_or_else(|| Path::new("."));
        let p = &cfg.prompts;
        Ok(Self {
            refine_system: read_prompt(
                config_dir,
                p.refine_system.as_deref(),
                DEFAULT_REFINE_SYSTEM,
                DEFAULT_REFINE_SYSTEM_TEXT,
            )?,
            extract_terms: read_prompt(
                config_dir,
                p.extract_terms.as_deref(),
                DEFAULT_EXTRACT_TERMS,
                DEFAULT_EXTRACT_TERMS_TEXT,
            )?,
        })
    }
}

fn read_prompt(
    config_dir: &Path,
    configured: Option<&str>,
    default_filename: &str,
    builtin: &str,
) -> anyhow::Result<String> {
    let resolve = |rel: &str| {
        let p = PathBuf::from(rel);
        if p.is_relative() {
            config_dir.join(p)
        } else {
            p
        }
    };
    match configured.map(str::trim).filter(|s| !s.is_empty()) {
        Some(rel) => {
            let path = resolve(rel);
            if !path.exists() {
                return Err(anyhow!(
                    "prompt file not found: {} (run: subtitle-refiner --init-config)",
                    path.display()
                ));
            }
            std::fs::read_to_string(&path)
                .with_context(|| format!("read prompt: {}", path.display()))
        }
        None => {
            let path = resolve(&format!("{DEFAULT_PROMPTS_DIR}/{default_filename}"));
            if path.exists() {
                std::fs::read_to_string(&path)
                    .with_context(|| format!("read prompt: {}", path.display()))
            } else {
                Ok(builtin.to_string())
            }
        }
    }
}

pub fn render_template(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = template.to_string();
    for (k, v) in vars {
        let pat = format!("{{{{{k}}}}}");
        out = out.replace(&pat, v);
    }
    out
}

pub fn default_prompt_files() -> Vec<(&'static str, &'static str)> {
    vec![
        (DEFAULT_REFINE_SYSTEM, DEFAULT_REFINE_SYSTEM_TEXT),
        (DEFAULT_EXTRACT_TERMS, DEFAULT_EXTRACT_TERMS_TEXT),
    ]
}

pub const DEFAULT_REFINE_SYSTEM_TEXT: &str = r#"You are a professional subtitle editor specializing in bilingual (English-Chinese) subtitle refinement.

English subtitle rules:
1. ONLY fix capitalization, spacing, and ending punctuation.
2. Do NOT change any words or their meanings.
3. Preserve ALL ASS formatting tags (e.g. {\i1}, {\b1}, \N) exactly as they appear.

Chinese subtitle rules:
1. Ensure translation accuracy and natural, conversational flow.
2. Keep terminology consistent with the reference below and across the whole work.
3. Preserve ALL ASS formatting tags exactly as they appear.

Input/output format:
You receive a JSON array of subtitle pairs, each with "id", "eng" and "chinese".
Return a JSON array with the SAME ids and structure, containing your corrections.
Return ONLY the JSON array. No explanations, no markdown, no extra text.
{{glossary}}"#;

pub const DEFAULT_EXTRACT_TERMS_TEXT: &str = r#"Return STRICT JSON only (one JSON array).
Extract proper nouns and recurring terminology from the subtitle pairs below, with the Chinese rendering actually used.

For each term output:
- eng: the English term as written
- zh: the Chinese translation used in the pairs
- type: one of person, place, organization, title, acronym, unit, ship, project, law, other
- confidence: 0.0-1.0
- evidence_ids: up to 5 pair ids where the term occurs

Only keep entries with confidence >= {{min_confidence}}.
If there are no terms, return [].

Schema:
[{"eng":"JAG","zh":"军法署","type":"organization","confidence":0.8,"evidence_ids":[1]}]

PAIRS:
{{pairs_json}}"#;
