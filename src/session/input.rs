use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Largest accepted gap between two keystrokes.
pub const MAX_DELTA_MS: u32 = 5000;

/// One accepted keystroke. Immutable once stored.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyEvent {
    /// Position in the target text the keystroke was aimed at.
    pub idx: usize,
    /// The typed character; `None` for backspaces.
    pub typed: Option<char>,
    #[serde(alias = "deltaMsSincePrevKey")]
    pub delta_ms: u32,
    #[serde(alias = "isBackspace")]
    pub is_backspace: bool,
}

impl KeyEvent {
    pub fn key(idx: usize, typed: char, delta_ms: u32) -> Self {
        Self {
            idx,
            typed: Some(typed),
            delta_ms,
            is_backspace: false,
        }
    }

    pub fn backspace(idx: usize, delta_ms: u32) -> Self {
        Self {
            idx,
            typed: None,
            delta_ms,
            is_backspace: true,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EventRejection {
    #[error("event is not an object")]
    NotAnObject,
    #[error("idx must be a non-negative integer")]
    BadIndex,
    #[error("delta must be an integer between 0 and 5000 ms")]
    BadDelta,
    #[error("backspace flag must be a boolean")]
    BadBackspaceFlag,
    #[error("typed must be exactly one character")]
    BadTyped,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Rejected {
    /// Position of the event within its batch.
    pub position: usize,
    pub reason: EventRejection,
}

/// Outcome of validating one ingestion batch. Invalid events are dropped
/// individually; the rest of the batch still goes through.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ValidatedBatch {
    pub events: Vec<KeyEvent>,
    pub rejected: Vec<Rejected>,
}

impl ValidatedBatch {
    pub fn stored(&self) -> usize {
        self.events.len()
    }

    pub fn dropped(&self) -> usize {
        self.rejected.len()
    }
}

/// Validate a batch of client-supplied events.
///
/// Field names accept both snake_case and the camelCase spelling used by web
/// clients (`deltaMsSincePrevKey`, `isBackspace`).
pub fn validate_batch(raw: &[Value]) -> ValidatedBatch {
    let mut batch = ValidatedBatch::default();
    for (position, value) in raw.iter().enumerate() {
        match validate_event(value) {
            Ok(event) => batch.events.push(event),
            Err(reason) => batch.rejected.push(Rejected { position, reason }),
        }
    }
    batch
}

pub fn validate_event(value: &Value) -> Result<KeyEvent, EventRejection> {
    let obj = value.as_object().ok_or(EventRejection::NotAnObject)?;
    let field = |names: &[&str]| names.iter().find_map(|n| obj.get(*n));

    let idx = field(&["idx"])
        .and_then(whole_number)
        .and_then(|i| usize::try_from(i).ok())
        .ok_or(EventRejection::BadIndex)?;

    let delta_ms = field(&["delta_ms", "deltaMsSincePrevKey"])
        .and_then(whole_number)
        .filter(|d| *d <= u64::from(MAX_DELTA_MS))
        .ok_or(EventRejection::BadDelta)? as u32;

    let is_backspace = field(&["is_backspace", "isBackspace"])
        .and_then(Value::as_bool)
        .ok_or(EventRejection::BadBackspaceFlag)?;

    if is_backspace {
        return Ok(KeyEvent::backspace(idx, delta_ms));
    }

    let typed = field(&["typed"])
        .and_then(Value::as_str)
        .and_then(single_char)
        .ok_or(EventRejection::BadTyped)?;

    Ok(KeyEvent::key(idx, typed, delta_ms))
}

/// Largest integer a JSON number keeps exactly as a double.
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_991.0;

/// A non-negative integer, also when the client sent it as `100.0`.
fn whole_number(value: &Value) -> Option<u64> {
    value.as_u64().or_else(|| {
        value
            .as_f64()
            .filter(|f| *f >= 0.0 && f.fract() == 0.0 && *f <= MAX_SAFE_INTEGER)
            .map(|f| f as u64)
    })
}

fn single_char(s: &str) -> Option<char> {
    let mut chars = s.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => Some(c),
        _ => None,
    }
}
