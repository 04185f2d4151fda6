use std::collections::HashSet;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use rust_embed::Embed;
use serde::{Deserialize, Serialize};

#[derive(Embed)]
#[folder = "assets/corpus/"]
struct CorpusAssets;

const BUNDLED_CORPUS: &str = "default.toml";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Text {
    pub id: u32,
    pub body: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Corpus {
    pub texts: Vec<Text>,
}

impl Corpus {
    /// Build a corpus, skipping blank texts. Duplicate ids are an error.
    pub fn new(texts: Vec<Text>) -> Result<Self> {
        let mut seen = HashSet::new();
        let mut kept = Vec::with_capacity(texts.len());
        for text in texts {
            if text.body.trim().is_empty() {
                continue;
            }
            if !seen.insert(text.id) {
                bail!("Duplicate text id {} in corpus", text.id);
            }
            kept.push(text);
        }
        Ok(Self { texts: kept })
    }

    /// The corpus compiled into the binary.
    pub fn bundled() -> Result<Self> {
        let file = CorpusAssets::get(BUNDLED_CORPUS).context("Bundled corpus is missing")?;
        let content = std::str::from_utf8(file.data.as_ref())?;
        Self::from_toml(content)
    }

    /// Load a corpus from a `.json` or `.toml` file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read corpus {}", path.display()))?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => {
                let corpus: Corpus = serde_json::from_str(&content)?;
                Self::new(corpus.texts)
            }
            _ => Self::from_toml(&content),
        }
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let corpus: Corpus = toml::from_str(content)?;
        Self::new(corpus.texts)
    }

    pub fn get(&self, id: u32) -> Option<&Text> {
        self.texts.iter().find(|t| t.id == id)
    }

    pub fn is_empty(&self) -> bool {
        self.texts.is_empty()
    }

    pub fn len(&self) -> usize {
        self.texts.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bundled_corpus_loads() {
        let corpus = Corpus::bundled().unwrap();
        assert!(!corpus.is_empty());
        assert!(corpus.len() >= 20);
        assert!(corpus.texts.iter().all(|t| !t.body.trim().is_empty()));
        assert!(corpus.get(1).is_some());
    }

    #[test]
    fn test_blank_texts_are_skipped() {
        let corpus = Corpus::from_toml(
            r#"
[[texts]]
id = 1
body = "fine"

[[texts]]
id = 2
body = "   "
"#,
        )
        .unwrap();
        assert_eq!(corpus.len(), 1);
        assert!(corpus.get(2).is_none());

        let empty = Corpus::from_toml("texts = []").unwrap();
        assert!(empty.is_empty());
    }

    #[test]
    fn test_duplicate_ids_are_rejected() {
        let texts = vec![
            Text { id: 1, body: "a".into() },
            Text { id: 1, body: "b".into() },
        ];
        let err = Corpus::new(texts).unwrap_err();
        assert!(err.to_string().contains("Duplicate text id 1"));
    }

    #[test]
    fn test_loads_json_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("corpus.json");
        fs::write(&path, r#"{"texts":[{"id":9,"body":"nine lives"}]}"#).unwrap();
        let corpus = Corpus::load(&path).unwrap();
        assert_eq!(corpus.get(9).unwrap().body, "nine lives");
    }
}
