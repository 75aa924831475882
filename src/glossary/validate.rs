use serde_json::Value;
use tracing::debug;

use super::normalize::normalize_term;
use super::{TermCategory, TerminologyEntry, MAX_EVIDENCE_IDS};

/// Why a candidate never reached the glossary.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum Rejection {
    #[error("payload is not a list")]
    NotAList,
    #[error("candidate #{index}: not an object")]
    NotAnObject { index: usize },
    #[error("candidate #{index}: empty source text")]
    EmptySource { index: usize },
    #[error("candidate #{index}: empty target text")]
    EmptyTarget { index: usize },
    #[error("candidate #{index}: missing or non-numeric confidence")]
    MissingConfidence { index: usize },
    #[error("candidate #{index}: confidence {confidence} outside [0, 1]")]
    ConfidenceOutOfRange { index: usize, confidence: f64 },
    #[error("candidate #{index}: confidence {confidence} below minimum {min}")]
    BelowThreshold {
        index: usize,
        confidence: f64,
        min: f64,
    },
    #[error("candidate #{index}: unknown category {value:?}")]
    UnknownCategory { index: usize, value: String },
}

#[derive(Clone, Debug, PartialEq)]
pub struct ValidatedCandidate {
    pub key: String,
    pub entry: TerminologyEntry,
}

#[derive(Clone, Debug, Default)]
pub struct Validation {
    pub accepted: Vec<ValidatedCandidate>,
    pub rejected: Vec<Rejection>,
}

/// Validate a whole extraction payload. Never fails: anything that is not a list of
/// well-formed objects simply contributes zero candidates.
#[must_use]
pub fn validate_candidates(raw: &Value, min_confidence: f64) -> Validation {
    let mut out = Validation::default();
    let Some(items) = raw.as_array() else {
        debug!(kind = value_kind(raw), "terminology payload rejected: not a list");
        out.rejected.push(Rejection::NotAList);
        return out;
    };
    for (index, item) in items.iter().enumerate() {
        match validate_candidate(index, item, min_confidence) {
            Ok(c) => out.accepted.push(c),
            Err(r) => {
                debug!(reason = %r, "terminology candidate dropped");
                out.rejected.push(r);
            }
        }
    }
    out
}

pub fn validate_candidate(
    index: usize,
    item: &Value,
    min_confidence: f64,
) -> Result<ValidatedCandidate, Rejection> {
    let obj = item.as_object().ok_or(Rejection::NotAnObject { index })?;

    let source = text_field(obj.get("eng"));
    let target = text_field(obj.get("zh"));
    if source.is_empty() {
        return Err(Rejection::EmptySource { index });
    }
    if target.is_empty() {
        return Err(Rejection::EmptyTarget { index });
    }

    let confidence = obj
        .get("confidence")
        .and_then(number_field)
        .ok_or(Rejection::MissingConfidence { index })?;
    if !(0.0..=1.0).contains(&confidence) {
        return Err(Rejection::ConfidenceOutOfRange { index, confidence });
    }
    if confidence < min_confidence {
        return Err(Rejection::BelowThreshold {
            index,
            confidence,
            min: min_confidence,
        });
    }

    let raw_category = text_field(obj.get("type"));
    let category = TermCategory::parse(&raw_category).ok_or(Rejection::UnknownCategory {
        index,
        value: raw_category.clone(),
    })?;

    let term = normalize_term(&source).ok_or(Rejection::EmptySource { index })?;
    let evidence_ids = obj.get("evidence_ids").map(evidence_field).unwrap_or_default();

    Ok(ValidatedCandidate {
        key: term.key,
        entry: TerminologyEntry {
            source_text: term.display,
            target_text: target,
            category,
            confidence,
            evidence_ids,
        },
    })
}

fn text_field(v: Option<&Value>) -> String {
    match v {
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    }
}

fn number_field(v: &Value) -> Option<f64> {
    let n = match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    n.is_finite().then_some(n)
}

/// Integer ids in first-seen order, duplicates dropped, at most [`MAX_EVIDENCE_IDS`].
fn evidence_field(v: &Value) -> Vec<i64> {
    let Some(items) = v.as_array() else {
        return Vec::new();
    };
    let mut ids: Vec<i64> = Vec::new();
    for item in items {
        let id = match item {
            Value::Number(n) => n
                .as_i64()
                .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
            Value::String(s) => s.trim().parse::<i64>().ok(),
            _ => None,
        };
        let Some(id) = id else { continue };
        if !ids.contains(&id) {
            ids.push(id);
        }
        if ids.len() >= MAX_EVIDENCE_IDS {
            break;
        }
    }
    ids
}

fn value_kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
