use once_cell::sync::Lazy;
use regex::Regex;
use unicode_normalization::UnicodeNormalization;

static LEADING_JUNK_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[\p{P}\p{S}\s]+").expect("leading junk regex"));
static TRAILING_JUNK_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[\p{P}\p{S}\s]+$").expect("trailing junk regex"));
static WS_RUN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("ws regex"));

/// Words whose trailing period is part of the term ("Adm.", "Lt.").
const ABBREVIATIONS: &[&str] = &[
    "adm", "capt", "cmdr", "col", "co", "corp", "dr", "gen", "inc", "jr", "lt", "ltd", "maj",
    "mr", "mrs", "ms", "prof", "sgt", "sr", "st", "vs",
];

/// A term's identity key plus the cleaned, case-preserving display form.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NormalizedTerm {
    pub key: String,
    pub display: String,
}

/// Canonicalize a term. `None` when nothing is left after cleaning.
#[must_use]
pub fn normalize_term(raw: &str) -> Option<NormalizedTerm> {
    let composed: String = raw.trim().nfkc().collect();
    let cleaned = strip_edges(&composed);
    let display = WS_RUN_RE.replace_all(cleaned, " ").into_owned();
    if display.is_empty() {
        return None;
    }
    let key = display.to_lowercase();
    Some(NormalizedTerm { key, display })
}

/// Drop punctuation, symbols and whitespace at both ends. Separators survive only
/// between other characters; a final period survives when it closes an abbreviation.
fn strip_edges(text: &str) -> &str {
    let text = LEADING_JUNK_RE.find(text).map_or(text, |m| &text[m.end()..]);
    let Some(m) = TRAILING_JUNK_RE.find(text) else {
        return text;
    };
    let body = &text[..m.start()];
    if m.as_str().starts_with('.') && ends_with_abbreviation(body) {
        &text[..=m.start()]
    } else {
        body
    }
}

fn ends_with_abbreviation(body: &str) -> bool {
    let Some(word) = body.rsplit(char::is_whitespace).next() else {
        return false;
    };
    if word.is_empty() || !word.chars().all(|c| c.is_alphabetic() || c == '.') {
        return false;
    }
    word.contains('.') || ABBREVIATIONS.contains(&word.to_lowercase().as_str())
}

#[must_use]
pub fn normalized_key(raw: &str) -> Option<String> {
    normalize_term(raw).map(|t| t.key)
}
