use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::engine::bigram::error_bigram;
use crate::engine::profile::{BigramCounts, LetterCounts};
use crate::session::input::KeyEvent;

/// Gaps longer than this count as a pause.
pub const PAUSE_THRESHOLD_MS: u32 = 800;
/// Floor on elapsed time so near-instant sessions do not divide by zero.
const MIN_ELAPSED_MINUTES: f64 = 0.0001;
const CHARS_PER_WORD: f64 = 5.0;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionReport {
    pub wpm: f64,
    pub accuracy: f64,
    pub total_chars: usize,
    pub correct_chars: usize,
    pub wrong_chars: usize,
    pub backspaces: usize,
    pub avg_delta_ms: u64,
    pub pause_rate: f64,
    pub bigram_errors: BigramCounts,
    pub letter_errors: LetterCounts,
}

impl SessionReport {
    /// Derive session metrics from the full stored event log.
    ///
    /// Pure: the same log, text and timestamps always give the same report.
    /// Indices outside the text are clamped to its last character.
    pub fn analyze(
        events: &[KeyEvent],
        target: &str,
        started_at: DateTime<Utc>,
        ended_at: DateTime<Utc>,
    ) -> Self {
        let target: Vec<char> = target.chars().collect();
        let mut report = SessionReport::default();

        for ev in events {
            if ev.is_backspace {
                report.backspaces += 1;
                continue;
            }
            report.total_chars += 1;

            let pos = clamp_index(ev.idx, target.len());
            let expected = pos.map(|p| target[p]);
            if expected.is_some() && ev.typed == expected {
                report.correct_chars += 1;
                continue;
            }

            let (Some(pos), Some(expected)) = (pos, expected) else {
                continue;
            };
            if let Some(bigram) = error_bigram(&target, pos) {
                report.bigram_errors.increment(bigram);
            }
            if expected.is_ascii_alphabetic() {
                report.letter_errors.increment(expected.to_ascii_lowercase());
            }
        }

        report.wrong_chars = report.total_chars - report.correct_chars;
        let attempted = report.correct_chars + report.wrong_chars;
        report.accuracy = if attempted > 0 {
            report.correct_chars as f64 / attempted as f64 * 100.0
        } else {
            0.0
        };

        let minutes = elapsed_minutes(started_at, ended_at);
        report.wpm = (report.correct_chars as f64 / CHARS_PER_WORD) / minutes;

        if !events.is_empty() {
            let n = events.len() as f64;
            let sum: u64 = events.iter().map(|e| u64::from(e.delta_ms)).sum();
            report.avg_delta_ms = (sum as f64 / n).round() as u64;
            let pauses = events
                .iter()
                .filter(|e| e.delta_ms > PAUSE_THRESHOLD_MS)
                .count();
            report.pause_rate = pauses as f64 / n * 100.0;
        }

        report
    }
}

fn clamp_index(idx: usize, len: usize) -> Option<usize> {
    if len == 0 { None } else { Some(idx.min(len - 1)) }
}

fn elapsed_minutes(started_at: DateTime<Utc>, ended_at: DateTime<Utc>) -> f64 {
    let ms = (ended_at - started_at).num_milliseconds() as f64;
    (ms / 60_000.0).max(MIN_ELAPSED_MINUTES)
}
