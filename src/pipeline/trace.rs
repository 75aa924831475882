use std::path::PathBuf;

use anyhow::Context;

/// Per-chunk dump of prompts and raw model replies.
#[derive(Clone, Debug)]
pub struct TraceWriter {
    dir: PathBuf,
    enabled: bool,
}

impl TraceWriter {
    pub fn new(dir: PathBuf, enabled: bool) -> anyhow::Result<Self> {
        if enabled {
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("create trace dir: {}", dir.display()))?;
        }
        Ok(Self { dir, enabled })
    }

    pub fn disabled() -> Self {
        Self {
            dir: PathBuf::new(),
            enabled: false,
        }
    }

    pub fn write_named_text(&self, name: &str, text: &str) -> anyhow::Result<()> {
        if !self.enabled {
            return Ok(());
        }
        let path = self.dir.join(sanitize_filename(name));
        std::fs::write(&path, text).with_context(|| format!("write trace: {}", path.display()))?;
        Ok(())
    }

    /// `chunk_000003.refine.response.txt`
    pub fn write_chunk_text(
        &self,
        chunk_index: usize,
        stage: &str,
        kind: &str,
        text: &str,
    ) -> anyhow::Result<()> {
        if !self.enabled {
            return Ok(());
        }
        let name = format!("chunk_{chunk_index:06}.{stage}.{kind}.txt");
        self.write_named_text(&name, text)
    }
}

fn sanitize_filename(name: &str) -> String {
    name.chars()
        .map(|ch| match ch {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            _ => ch,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_chunk_files_only_when_enabled() {
        let dir = tempfile::tempdir().expect("tempdir");
        let trace_dir = dir.path().join("trace");

        let off = TraceWriter::new(trace_dir.clone(), false).expect("writer");
        off.write_chunk_text(1, "refine", "prompt", "x").expect("noop");
        assert!(!trace_dir.exists());

        let on = TraceWriter::new(trace_dir.clone(), true).expect("writer");
        on.write_chunk_text(3, "refine", "response", "[]").expect("write");
        let body = std::fs::read_to_string(trace_dir.join("chunk_000003.refine.response.txt"))
            .expect("read");
        assert_eq!(body, "[]");
    }

    #[test]
    fn sanitizes_path_separators() {
        assert_eq!(sanitize_filename("a/b:c?.txt"), "a_b_c_.txt");
    }
}
