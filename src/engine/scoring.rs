use std::collections::BTreeSet;

use crate::engine::bigram::bigrams;
use crate::engine::profile::BigramCounts;

const STRESS_CHARS_PER_POINT: f64 = 20.0;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TextScore {
    pub profile_score: u64,
    pub stress_bonus: f64,
    pub total_score: f64,
}

/// Score a text against a user's weak bigrams.
pub fn score(text: &str, weak: &BigramCounts, stress_mode: bool) -> TextScore {
    score_with_bigrams(&bigrams(text), text.chars().count(), weak, stress_mode)
}

/// Same as [`score`] with the text's bigram set and length already computed.
pub fn score_with_bigrams(
    text_bigrams: &BTreeSet<String>,
    text_len: usize,
    weak: &BigramCounts,
    stress_mode: bool,
) -> TextScore {
    let profile_score = profile_score(text_bigrams, weak);
    let stress_bonus = if stress_mode {
        text_len as f64 / STRESS_CHARS_PER_POINT
    } else {
        0.0
    };
    TextScore {
        profile_score,
        stress_bonus,
        total_score: profile_score as f64 + stress_bonus,
    }
}

fn profile_score(text_bigrams: &BTreeSet<String>, weak: &BigramCounts) -> u64 {
    weak.iter()
        .filter(|(bigram, _)| text_bigrams.contains(*bigram))
        .map(|(_, count)| count)
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn weak(entries: &[(&str, u64)]) -> BigramCounts {
        entries.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn test_empty_profile_scores_zero() {
        let s = score("the quick brown fox", &BigramCounts::new(), false);
        assert_eq!(s.profile_score, 0);
        assert_eq!(s.total_score, 0.0);
    }

    #[test]
    fn test_sums_counts_of_present_bigrams_only() {
        let profile = weak(&[("th", 3), ("he", 2), ("zz", 10)]);
        let s = score("The end", &profile, false);
        assert_eq!(s.profile_score, 5);
        assert_eq!(s.stress_bonus, 0.0);
        assert_eq!(s.total_score, 5.0);
    }

    #[test]
    fn test_repeated_bigram_counts_once() {
        let profile = weak(&[("ab", 4)]);
        assert_eq!(score("ababab", &profile, false).profile_score, 4);
    }

    #[test]
    fn test_stress_adds_length_bonus() {
        let profile = weak(&[("ab", 1)]);
        let text = "ab".repeat(15); // 30 chars
        let s = score(&text, &profile, true);
        assert_eq!(s.stress_bonus, 1.5);
        assert_eq!(s.total_score, 2.5);
    }
}
