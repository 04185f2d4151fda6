use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Result;
use serde::{Deserialize, Serialize};

const MAX_STRENGTH: u8 = 100;
const MAX_TOP: usize = 50;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_personalization_strength")]
    pub personalization_strength: u8,
    #[serde(default)]
    pub stress_mode: bool,
    #[serde(default = "default_top_bigrams")]
    pub top_bigrams: usize,
    #[serde(default = "default_top_letters")]
    pub top_letters: usize,
    /// Practice texts to use instead of the bundled corpus.
    #[serde(default)]
    pub corpus_path: Option<PathBuf>,
    /// Where profiles and sessions are stored.
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
}

fn default_personalization_strength() -> u8 {
    50
}
fn default_top_bigrams() -> usize {
    10
}
fn default_top_letters() -> usize {
    10
}

impl Default for Config {
    fn default() -> Self {
        Self {
            personalization_strength: default_personalization_strength(),
            stress_mode: false,
            top_bigrams: default_top_bigrams(),
            top_letters: default_top_letters(),
            corpus_path: None,
            data_dir: None,
        }
    }
}

impl Config {
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = fs::read_to_string(path)?;
            let mut config: Config = toml::from_str(&content)?;
            config.validate();
            Ok(config)
        } else {
            Ok(Config::default())
        }
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("typetrain")
            .join("config.toml")
    }

    /// Clamp values written by hand (or by older versions) into range.
    pub fn validate(&mut self) {
        self.personalization_strength = self.personalization_strength.min(MAX_STRENGTH);
        self.top_bigrams = self.top_bigrams.clamp(1, MAX_TOP);
        self.top_letters = self.top_letters.clamp(1, MAX_TOP);
    }

    /// Apply an admin update; only the fields given are changed.
    pub fn update(&mut self, strength: Option<u8>, stress_mode: Option<bool>) {
        if let Some(s) = strength {
            self.personalization_strength = s;
        }
        if let Some(stress) = stress_mode {
            self.stress_mode = stress;
        }
        self.validate();
    }
}
