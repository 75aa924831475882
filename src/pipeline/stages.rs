use serde_json::Value;
use tracing::{debug, warn};

use crate::chunker::Chunk;
use crate::glossary::Glossary;
use crate::models::{ChatModel, ModelError};
use crate::pairs::{pairs_prompt_json, RefinedPair, TranslationPairRecord};
use crate::pipeline::prompts::render_template;
use crate::pipeline::retry::Retryable;
use crate::pipeline::trace::TraceWriter;
use crate::textutil::{extract_json_array, truncate_chars};

#[derive(Debug, thiserror::Error)]
pub enum StageError {
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error("malformed response: {0}")]
    Malformed(String),
}

impl Retryable for StageError {
    /// Malformed replies count as transient.
    fn is_transient(&self) -> bool {
        match self {
            Self::Model(e) => e.is_transient(),
            Self::Malformed(_) => true,
        }
    }
}

/// Produces corrected pairs for one chunk, given the glossary so far.
pub trait ChunkRefiner {
    /// System prompt rendered with an empty glossary; its size is charged to every chunk.
    fn base_prompt(&self) -> String {
        String::new()
    }

    fn refine(
        &mut self,
        chunk: &Chunk<'_>,
        glossary: &Glossary,
    ) -> Result<Vec<RefinedPair>, StageError>;
}

/// Produces a raw candidate list (unvalidated JSON) from refined records.
pub trait CandidateExtractor {
    fn extract_candidates(
        &mut self,
        chunk_index: usize,
        records: &[TranslationPairRecord],
    ) -> Result<Value, StageError>;
}

pub fn render_refine_system(template: &str, glossary: &Glossary) -> String {
    let context = glossary.render_for_prompt();
    render_template(template, &[("glossary", context.as_str())])
}

/// Strict parse of a refinement reply: one JSON array of `{id, eng, chinese}`.
pub fn parse_refined_pairs(reply: &str) -> Result<Vec<RefinedPair>, StageError> {
    let arr = extract_json_array(reply)
        .ok_or_else(|| StageError::Malformed("no JSON array in reply".to_string()))?;
    serde_json::from_value(arr).map_err(|e| StageError::Malformed(e.to_string()))
}

fn trace_text(trace: &TraceWriter, chunk_index: usize, stage: &str, kind: &str, text: &str) {
    if let Err(e) = trace.write_chunk_text(chunk_index, stage, kind, text) {
        warn!(chunk = chunk_index, stage, error = %e, "trace write failed");
    }
}

pub struct ModelRefiner<M> {
    model: M,
    system_template: String,
    max_tokens: u32,
    trace: TraceWriter,
    log_max_chars: usize,
}

impl<M: ChatModel> ModelRefiner<M> {
    pub fn new(model: M, system_template: impl Into<String>, max_tokens: u32) -> Self {
        Self {
            model,
            system_template: system_template.into(),
            max_tokens,
            trace: TraceWriter::disabled(),
            log_max_chars: 240,
        }
    }

    #[must_use]
    pub fn with_trace(mut self, trace: TraceWriter, log_max_chars: usize) -> Self {
        self.trace = trace;
        self.log_max_chars = log_max_chars;
        self
    }
}

impl<M: ChatModel> ChunkRefiner for ModelRefiner<M> {
    fn base_prompt(&self) -> String {
        render_refine_system(&self.system_template, &Glossary::new())
    }

    fn refine(
        &mut self,
        chunk: &Chunk<'_>,
        glossary: &Glossary,
    ) -> Result<Vec<RefinedPair>, StageError> {
        let system = render_refine_system(&self.system_template, glossary);
        let user = pairs_prompt_json(chunk.records);
        trace_text(&self.trace, chunk.index, "refine", "system", &system);
        trace_text(&self.trace, chunk.index, "refine", "user", &user);

        let reply = self.model.chat(Some(&system), &user, self.max_tokens)?;
        trace_text(&self.trace, chunk.index, "refine", "response", &reply);
        debug!(
            model = self.model.name(),
            chunk = chunk.index,
            reply = %truncate_chars(&reply, self.log_max_chars),
            "refine reply"
        );
        parse_refined_pairs(&reply)
    }
}

pub struct ModelExtractor<M> {
    model: M,
    template: String,
    min_confidence: f64,
    max_tokens: u32,
    trace: TraceWriter,
    log_max_chars: usize,
}

impl<M: ChatModel> ModelExtractor<M> {
    pub fn new(
        model: M,
        template: impl Into<String>,
        min_confidence: f64,
        max_tokens: u32,
    ) -> Self {
        Self {
            model,
            template: template.into(),
            min_confidence,
            max_tokens,
            trace: TraceWriter::disabled(),
            log_max_chars: 240,
        }
    }

    #[must_use]
    pub fn with_trace(mut self, trace: TraceWriter, log_max_chars: usize) -> Self {
        self.trace = trace;
        self.log_max_chars = log_max_chars;
        self
    }

    fn render(&self, records: &[TranslationPairRecord]) -> String {
        let pairs_json = pairs_prompt_json(records);
        let min_conf = format!("{:.2}", self.min_confidence);
        render_template(
            &self.template,
            &[
                ("pairs_json", pairs_json.as_str()),
                ("min_confidence", min_conf.as_str()),
            ],
        )
    }
}

impl<M: ChatModel> CandidateExtractor for ModelExtractor<M> {
    fn extract_candidates(
        &mut self,
        chunk_index: usize,
        records: &[TranslationPairRecord],
    ) -> Result<Value, StageError> {
        let prompt = self.render(records);
        trace_text(&self.trace, chunk_index, "terms", "user", &prompt);

        let reply = self.model.chat(None, &prompt, self.max_tokens)?;
        trace_text(&self.trace, chunk_index, "terms", "response", &reply);
        debug!(
            model = self.model.name(),
            chunk = chunk_index,
            reply = %truncate_chars(&reply, self.log_max_chars),
            "terminology reply"
        );
        extract_json_array(&reply)
            .ok_or_else(|| StageError::Malformed("no JSON array in terminology reply".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use super::*;
    use crate::chunker::{chunk_records, ChunkStrategy};
    use crate::glossary::MergePolicy;

    /// Replays canned replies and records every prompt it was sent.
    struct ScriptedModel {
        replies: VecDeque<Result<String, ModelError>>,
        seen: Vec<(Option<String>, String)>,
    }

    impl ScriptedModel {
        fn new(replies: Vec<Result<String, ModelError>>) -> Self {
            Self {
                replies: replies.into(),
                seen: Vec::new(),
            }
        }
    }

    impl ChatModel for ScriptedModel {
        fn name(&self) -> &str {
            "scripted"
        }

        fn chat(
            &mut self,
            system_prompt: Option<&str>,
            user_prompt: &str,
            _max_tokens: u32,
        ) -> Result<String, ModelError> {
            self.seen
                .push((system_prompt.map(str::to_string), user_prompt.to_string()));
            self.replies.pop_front().unwrap_or(Err(ModelError::EmptyResponse))
        }
    }

    fn records() -> Vec<TranslationPairRecord> {
        vec![
            TranslationPairRecord::new(1, "the jag office", "军法署办公室"),
            TranslationPairRecord::new(2, "{\\i1}hello{\\i0}", "{\\i1}你好{\\i0}"),
        ]
    }

    #[test]
    fn refine_prompt_carries_glossary_and_pairs() {
        let recs = records();
        let chunks = chunk_records(&recs, ChunkStrategy::FixedCount(10), &|_: &str| 1usize);
        let mut glossary = Glossary::new();
        glossary.apply_batch(
            &serde_json::json!([{"eng": "JAG", "zh": "军法署", "type": "organization", "confidence": 0.9}]),
            0.6,
            &MergePolicy::default(),
            100,
        );

        let model = ScriptedModel::new(vec![Ok(
            "```json\n[{\"id\":1,\"eng\":\"The JAG office.\",\"chinese\":\"军法署办公室\"}]\n```"
                .to_string(),
        )]);
        let mut refiner = ModelRefiner::new(model, "Rules.\n{{glossary}}", 1000);
        let out = refiner.refine(&chunks[0], &glossary).expect("refine");
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].eng, "The JAG office.");

        let (system, user) = &refiner.model.seen[0];
        assert!(system
            .as_deref()
            .is_some_and(|s| s.contains("- JAG (organization): 军法署")));
        assert!(user.contains("\"id\": 2"));
        assert_eq!(refiner.base_prompt(), "Rules.\n");
    }

    #[test]
    fn refine_reply_without_array_is_malformed_and_retryable() {
        let recs = records();
        let chunks = chunk_records(&recs, ChunkStrategy::FixedCount(10), &|_: &str| 1usize);
        let model = ScriptedModel::new(vec![Ok("Sorry, I cannot help.".to_string())]);
        let mut refiner = ModelRefiner::new(model, "{{glossary}}", 1000);
        let err = refiner
            .refine(&chunks[0], &Glossary::new())
            .expect_err("malformed");
        assert!(matches!(err, StageError::Malformed(_)));
        assert!(err.is_transient());
    }

    #[test]
    fn refine_reply_with_wrong_shape_is_malformed() {
        assert!(matches!(
            parse_refined_pairs(r#"[{"id":"one","eng":"x"}]"#),
            Err(StageError::Malformed(_))
        ));
    }

    #[test]
    fn extractor_renders_threshold_and_returns_raw_array() {
        let model = ScriptedModel::new(vec![Ok(
            "Here you go: [{\"eng\":\"JAG\",\"zh\":\"军法署\",\"type\":\"organization\",\"confidence\":0.8}]"
                .to_string(),
        )]);
        let mut extractor = ModelExtractor::new(
            model,
            "min={{min_confidence}}\n{{pairs_json}}",
            0.6,
            800,
        );
        let raw = extractor.extract_candidates(0, &records()).expect("extract");
        assert_eq!(raw.as_array().map(Vec::len), Some(1));

        let (system, user) = &extractor.model.seen[0];
        assert!(system.is_none());
        assert!(user.starts_with("min=0.60\n"));
        assert!(user.contains("the jag office"));
    }

    #[test]
    fn permanent_model_errors_pass_through() {
        let model = ScriptedModel::new(vec![Err(ModelError::Status {
            status: 401,
            body: "unauthorized".to_string(),
        })]);
        let mut extractor = ModelExtractor::new(model, "{{pairs_json}}", 0.6, 800);
        let err = extractor
            .extract_candidates(0, &records())
            .expect_err("status");
        assert!(matches!(err, StageError::Model(ModelError::Status { status: 401, .. })));
        assert!(!err.is_transient());
    }
}
