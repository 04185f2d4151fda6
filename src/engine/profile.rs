use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::engine::ranking::top_n_by;
use crate::session::result::SessionReport;

// ---------------------------------------------------------------------------
// ErrorCounts
// ---------------------------------------------------------------------------

/// Error tallies keyed by bigram or letter.
///
/// Backed by an ordered map so iteration, serialization and top-N tie-breaks
/// are deterministic.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ErrorCounts<K: Ord>(BTreeMap<K, u64>);

pub type BigramCounts = ErrorCounts<String>;
pub type LetterCounts = ErrorCounts<char>;

impl<K: Ord> Default for ErrorCounts<K> {
    fn default() -> Self {
        Self(BTreeMap::new())
    }
}

impl<K: Ord + Clone> ErrorCounts<K> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &K) -> u64 {
        self.0.get(key).copied().unwrap_or(0)
    }

    pub fn increment(&mut self, key: K) {
        *self.0.entry(key).or_insert(0) += 1;
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, u64)> {
        self.0.iter().map(|(k, v)| (k, *v))
    }

    pub fn total(&self) -> u64 {
        self.0.values().sum()
    }

    /// Additive fold of `session` into these counts, returned as a new map.
    ///
    /// Not idempotent: folding the same session twice counts it twice.
    pub fn merge(&self, session: &Self) -> Self {
        let mut merged = self.0.clone();
        for (key, count) in &session.0 {
            *merged.entry(key.clone()).or_insert(0) += count;
        }
        Self(merged)
    }

    /// The `n` highest counts. Equal counts keep ascending key order.
    pub fn top_n(&self, n: usize) -> Vec<(K, u64)> {
        top_n_by(self.0.iter().map(|(k, v)| (k.clone(), *v)), n, |(_, v)| *v as f64)
    }
}

impl<K: Ord> FromIterator<(K, u64)> for ErrorCounts<K> {
    fn from_iter<I: IntoIterator<Item = (K, u64)>>(iter: I) -> Self {
        let mut map = BTreeMap::new();
        for (key, count) in iter {
            *map.entry(key).or_insert(0) += count;
        }
        Self(map)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BigramErrors {
    pub bigram: String,
    pub errors: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LetterErrors {
    pub letter: char,
    pub errors: u64,
}

pub fn top_bigrams(counts: &BigramCounts, n: usize) -> Vec<BigramErrors> {
    counts
        .top_n(n)
        .into_iter()
        .map(|(bigram, errors)| BigramErrors { bigram, errors })
        .collect()
}

pub fn top_letters(counts: &LetterCounts, n: usize) -> Vec<LetterErrors> {
    counts
        .top_n(n)
        .into_iter()
        .map(|(letter, errors)| LetterErrors { letter, errors })
        .collect()
}

// ---------------------------------------------------------------------------
// WeakBigramProfile
// ---------------------------------------------------------------------------

/// A user's cumulative error profile.
///
/// Never edited in place by the engine: `merged_with` returns the replacement.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WeakBigramProfile {
    pub uid: String,
    /// Display name set when the user identifies.
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub counts: BigramCounts,
    #[serde(default)]
    pub letters: LetterCounts,
    #[serde(default)]
    pub avg_wpm: f64,
    #[serde(default)]
    pub avg_accuracy: f64,
    #[serde(default)]
    pub sessions: u32,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    /// Ids of the sessions already folded into the counts.
    #[serde(default)]
    pub merged_sessions: BTreeSet<u64>,
}

impl WeakBigramProfile {
    pub fn new(uid: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            username: None,
            counts: BigramCounts::new(),
            letters: LetterCounts::new(),
            avg_wpm: 0.0,
            avg_accuracy: 0.0,
            sessions: 0,
            updated_at: None,
            merged_sessions: BTreeSet::new(),
        }
    }

    /// Fold one finished session into the profile.
    ///
    /// Counts are added; the averages become running means over all merged
    /// sessions.
    pub fn merged_with(&self, report: &SessionReport, now: DateTime<Utc>) -> Self {
        let n = self.sessions as f64;
        Self {
            uid: self.uid.clone(),
            username: self.username.clone(),
            counts: self.counts.merge(&report.bigram_errors),
            letters: self.letters.merge(&report.letter_errors),
            avg_wpm: (self.avg_wpm * n + report.wpm) / (n + 1.0),
            avg_accuracy: (self.avg_accuracy * n + report.accuracy) / (n + 1.0),
            sessions: self.sessions + 1,
            updated_at: Some(now),
            merged_sessions: self.merged_sessions.clone(),
        }
    }

    /// [`merged_with`](Self::merged_with), also recording `session_id` as merged.
    pub fn merged_session(&self, session_id: u64, report: &SessionReport, now: DateTime<Utc>) -> Self {
        let mut next = self.merged_with(report, now);
        next.merged_sessions.insert(session_id);
        next
    }

    pub fn has_merged(&self, session_id: u64) -> bool {
        self.merged_sessions.contains(&session_id)
    }

    /// Replace the display name; `None` keeps the current one.
    pub fn with_username(&self, username: Option<&str>) -> Self {
        let mut next = self.clone();
        if let Some(name) = username {
            next.username = Some(name.to_string());
        }
        next
    }

    pub fn weak_bigrams_top(&self, n: usize) -> Vec<BigramErrors> {
        top_bigrams(&self.counts, n)
    }

    pub fn weak_letters_top(&self, n: usize) -> Vec<LetterErrors> {
        top_letters(&self.letters, n)
    }
}
