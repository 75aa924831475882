use std::path::Path;

use anyhow::Context;

use super::{Glossary, MergePolicy, TerminologyEntry};

/// Write the glossary as a pretty JSON record list (UTF-8 with BOM).
pub fn write_snapshot(path: &Path, glossary: &Glossary) -> anyhow::Result<()> {
    let records = glossary.to_records();
    let json = serde_json::to_string_pretty(&records).context("serialize glossary snapshot")?;
    let mut buf = String::with_capacity(json.len() + 3);
    buf.push('\u{FEFF}');
    buf.push_str(&json);
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create snapshot dir: {}", parent.display()))?;
    }
    std::fs::write(path, buf).with_context(|| format!("write glossary: {}", path.display()))?;
    Ok(())
}

pub fn read_snapshot(path: &Path) -> anyhow::Result<Vec<TerminologyEntry>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("read glossary: {}", path.display()))?;
    let records: Vec<TerminologyEntry> = serde_json::from_str(text.trim_start_matches('\u{FEFF}'))
        .with_context(|| format!("parse glossary: {}", path.display()))?;
    Ok(records)
}

pub fn load_glossary(
    path: &Path,
    policy: &MergePolicy,
    max_entries: usize,
) -> anyhow::Result<Glossary> {
    Ok(Glossary::from_records(read_snapshot(path)?, policy, max_entries))
}
