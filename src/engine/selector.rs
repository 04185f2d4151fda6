use std::cmp::Reverse;
use std::collections::BTreeSet;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::corpus::Text;
use crate::engine::bigram::bigrams;
use crate::engine::mode::Mode;
use crate::engine::profile::BigramCounts;
use crate::engine::ranking::top_n_by;
use crate::engine::scoring::{TextScore, score_with_bigrams};
use crate::error::{Result, TrainerError};

/// Size of the length-based pools for `easy` and `hard`.
pub const POOL_SIZE: usize = 10;
/// Number of best-scoring candidates entering a weighted pick.
pub const SHORTLIST_SIZE: usize = 10;
/// Number of matched weak bigrams reported with a selection.
pub const MATCHES_TOP: usize = 8;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    Weighted,
    Random,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BigramWeight {
    pub bigram: String,
    pub weight: u64,
}

/// Everything the selector needs, passed in explicitly.
#[derive(Clone, Copy, Debug)]
pub struct SelectionRequest<'a> {
    pub corpus: &'a [Text],
    pub mode: Mode,
    pub strength: u8,
    pub stress_mode: bool,
    pub profile: &'a BigramCounts,
}

#[derive(Clone, Debug)]
pub struct Selection<'a> {
    pub text: &'a Text,
    pub mode: Mode,
    pub used_strategy: Strategy,
    pub profile_score: u64,
    pub total_score: f64,
    pub matches_top: Vec<BigramWeight>,
}

struct Candidate<'a> {
    text: &'a Text,
    len: usize,
    bigrams: BTreeSet<String>,
    score: TextScore,
}

/// Pick the next practice text.
///
/// With no usable error signal, or in `easy` mode, the pick is uniform over
/// the pool. Otherwise `hard` always personalizes and the other modes
/// personalize with probability `strength / 100`.
pub fn select<'a, R: Rng + ?Sized>(req: &SelectionRequest<'a>, rng: &mut R) -> Result<Selection<'a>> {
    if req.corpus.is_empty() {
        return Err(TrainerError::EmptyCorpus);
    }

    let candidates: Vec<Candidate<'a>> = req
        .corpus
        .iter()
        .map(|text| {
            let set = bigrams(&text.body);
            let len = text.body.chars().count();
            let score = score_with_bigrams(&set, len, req.profile, req.stress_mode);
            Candidate {
                text,
                len,
                bigrams: set,
                score,
            }
        })
        .collect();

    let has_signal = !req.profile.is_empty()
        && candidates.iter().any(|c| c.score.profile_score > 0);

    let pool = build_pool(&candidates, req.mode);
    let can_personalize = has_signal && req.mode != Mode::Easy;

    let personalize = can_personalize
        && (req.mode == Mode::Hard || rng.gen_range(0.0..1.0) < f64::from(req.strength) / 100.0);

    let (chosen, used_strategy) = if personalize {
        let shortlist = top_n_by(pool, SHORTLIST_SIZE, |c| c.score.total_score);
        let weights: Vec<f64> = shortlist.iter().map(|c| c.score.total_score).collect();
        let idx = weighted_pick(&weights, rng).unwrap_or(0);
        (shortlist[idx], Strategy::Weighted)
    } else {
        let idx = rng.gen_range(0..pool.len());
        (pool[idx], Strategy::Random)
    };

    Ok(Selection {
        text: chosen.text,
        mode: req.mode,
        used_strategy,
        profile_score: chosen.score.profile_score,
        total_score: chosen.score.total_score,
        matches_top: matching_bigrams(&chosen.bigrams, req.profile, MATCHES_TOP),
    })
}

fn build_pool<'c, 'a>(candidates: &'c [Candidate<'a>], mode: Mode) -> Vec<&'c Candidate<'a>> {
    let mut pool: Vec<&Candidate> = candidates.iter().collect();
    match mode {
        Mode::Easy => {
            pool.sort_by_key(|c| c.len);
            pool.truncate(POOL_SIZE);
        }
        Mode::Hard => {
            pool.sort_by_key(|c| Reverse(c.len));
            pool.truncate(POOL_SIZE);
        }
        Mode::Normal | Mode::Custom => {}
    }
    pool
}

/// Roulette-wheel choice over non-negative weights.
///
/// Returns `None` only for an empty slice. A non-positive (or non-finite)
/// total degrades to a uniform choice.
pub fn weighted_pick<R: Rng + ?Sized>(weights: &[f64], rng: &mut R) -> Option<usize> {
    if weights.is_empty() {
        return None;
    }
    let total: f64 = weights.iter().map(|w| w.max(0.0)).sum();
    if total <= 0.0 || !total.is_finite() {
        return Some(rng.gen_range(0..weights.len()));
    }

    let r = rng.gen_range(0.0..total);
    let mut cumulative = 0.0;
    for (i, w) in weights.iter().enumerate() {
        cumulative += w.max(0.0);
        if cumulative > r {
            return Some(i);
        }
    }
    // Float drift can leave r at or past the final cumulative sum.
    Some(weights.len() - 1)
}

/// The user's weak bigrams present in `text_bigrams`, heaviest first.
pub fn matching_bigrams(text_bigrams: &BTreeSet<String>, profile: &BigramCounts, n: usize) -> Vec<BigramWeight> {
    let matches = profile
        .iter()
        .filter(|(bigram, _)| text_bigrams.contains(*bigram))
        .map(|(bigram, count)| BigramWeight {
            bigram: bigram.clone(),
            weight: count,
        });
    top_n_by(matches, n, |m| m.weight as f64)
}
