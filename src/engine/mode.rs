use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Easy,
    Normal,
    Hard,
    Custom,
}

impl Mode {
    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Easy => "easy",
            Mode::Normal => "normal",
            Mode::Hard => "hard",
            Mode::Custom => "custom",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where the resolved mode came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModeSource {
    User,
    Config,
}

/// A mode the caller may request explicitly. `custom` is never accepted here.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ModeOverride(Mode);

impl ModeOverride {
    pub fn mode(self) -> Mode {
        self.0
    }
}

impl FromStr for ModeOverride {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "easy" => Ok(Self(Mode::Easy)),
            "normal" => Ok(Self(Mode::Normal)),
            "hard" => Ok(Self(Mode::Hard)),
            other => Err(format!("unsupported mode override: {other:?}")),
        }
    }
}

/// Map personalization strength and stress mode to a difficulty mode.
///
/// This is the single definition of the thresholds; both text selection and
/// the profile view go through it.
pub fn resolve_mode(strength: u8, stress: bool, explicit: Option<ModeOverride>) -> (Mode, ModeSource) {
    if let Some(o) = explicit {
        return (o.mode(), ModeSource::User);
    }
    let mode = if strength <= 30 && !stress {
        Mode::Easy
    } else if strength >= 90 && stress {
        Mode::Hard
    } else if (60..=80).contains(&strength) && !stress {
        Mode::Normal
    } else {
        Mode::Custom
    };
    (mode, ModeSource::Config)
}
