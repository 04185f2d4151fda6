use anyhow::Result;
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::corpus::Corpus;
use crate::engine::mode::{Mode, ModeOverride, ModeSource, resolve_mode};
use crate::engine::profile::{BigramErrors, LetterErrors, WeakBigramProfile, top_letters};
use crate::engine::selector::{self, BigramWeight, SelectionRequest, Strategy};
use crate::error::TrainerError;
use crate::session::input::validate_batch;
use crate::session::state::Session;
use crate::store::{JsonStore, ProfileStore, SessionSummary};

/// Answer to a next-text request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NextText {
    pub text_id: u32,
    pub text: String,
    pub mode: Mode,
    pub mode_source: ModeSource,
    pub used_strategy: Strategy,
    pub personalization_strength: u8,
    pub stress_mode: bool,
    pub profile_score: u64,
    pub matches_top: Vec<BigramWeight>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestReport {
    pub stored: usize,
    pub dropped: usize,
    /// Length of the session's event log after this batch.
    pub total: usize,
}

/// Answer to a session-finish request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FinishedSession {
    pub session_id: u64,
    pub wpm: f64,
    pub accuracy: f64,
    pub total_chars: usize,
    pub correct_chars: usize,
    pub wrong_chars: usize,
    pub backspaces: usize,
    pub avg_delta_ms: u64,
    pub pause_rate: f64,
    pub weak_bigrams_top: Vec<BigramErrors>,
    pub weak_letters_top: Vec<LetterErrors>,
    pub profile: WeakBigramProfile,
}

/// What the profile page shows for one user.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProfileView {
    pub uid: String,
    pub username: Option<String>,
    pub mode: Mode,
    pub avg_wpm: f64,
    pub avg_accuracy: f64,
    pub sessions: Vec<SessionSummary>,
    pub weak_bigrams_top: Vec<BigramErrors>,
    pub weak_letters_top: Vec<LetterErrors>,
}

/// Orchestrates the engine against a corpus, a store and a config.
pub struct Trainer {
    pub corpus: Corpus,
    pub store: JsonStore,
    pub config: Config,
}

impl Trainer {
    pub fn new(corpus: Corpus, store: JsonStore, config: Config) -> Self {
        Self {
            corpus,
            store,
            config,
        }
    }

    fn profile_or_empty(&self, uid: &str) -> Result<WeakBigramProfile> {
        Ok(self
            .store
            .load_profile(uid)?
            .unwrap_or_else(|| WeakBigramProfile::new(uid)))
    }

    pub fn next_text<R: Rng + ?Sized>(
        &self,
        uid: &str,
        explicit: Option<ModeOverride>,
        rng: &mut R,
    ) -> Result<NextText> {
        let profile = self.profile_or_empty(uid)?;
        let strength = self.config.personalization_strength;
        let stress_mode = self.config.stress_mode;
        let (mode, mode_source) = resolve_mode(strength, stress_mode, explicit);

        let request = SelectionRequest {
            corpus: &self.corpus.texts,
            mode,
            strength,
            stress_mode,
            profile: &profile.counts,
        };
        let selection = selector::select(&request, rng)?;
        debug!(
            uid,
            text_id = selection.text.id,
            %mode,
            strategy = ?selection.used_strategy,
            profile_score = selection.profile_score,
            "selected next text"
        );

        Ok(NextText {
            text_id: selection.text.id,
            text: selection.text.body.clone(),
            mode,
            mode_source,
            used_strategy: selection.used_strategy,
            personalization_strength: strength,
            stress_mode,
            profile_score: selection.profile_score,
            matches_top: selection.matches_top,
        })
    }

    pub fn start_session(&self, uid: &str, text_id: u32, now: DateTime<Utc>) -> Result<Session> {
        if self.corpus.get(text_id).is_none() {
            return Err(TrainerError::UnknownText(text_id).into());
        }
        self.store.create_session(uid, text_id, now)
    }

    /// Validate and append one batch. Invalid events are dropped one by one.
    pub fn ingest_events(&self, session_id: u64, uid: &str, raw: &[Value]) -> Result<IngestReport> {
        let batch = validate_batch(raw);
        if batch.dropped() > 0 {
            warn!(
                session_id,
                dropped = batch.dropped(),
                first_reason = %batch.rejected[0].reason,
                "dropped invalid key events"
            );
        }
        let stored = batch.stored();
        let dropped = batch.dropped();
        let total = self.store.update_session(session_id, |s| {
            s.ensure_owner(uid)?;
            s.append(batch.events)
        })?;
        Ok(IngestReport {
            stored,
            dropped,
            total,
        })
    }

    /// Close the session, analyze its log and fold the result into the
    /// user's profile.
    ///
    /// Both steps run under one store lock. A repeated call is rejected once
    /// the session is in the profile, so no session is ever counted twice.
    pub fn finish_session(&self, session_id: u64, uid: &str, now: DateTime<Utc>) -> Result<FinishedSession> {
        let (report, profile) = self.store.finish_session(session_id, uid, now, |s| {
            let text = self
                .corpus
                .get(s.text_id)
                .ok_or(TrainerError::UnknownText(s.text_id))?;
            s.finish(&text.body, now).map(|_| ())
        })?;

        info!(
            session_id,
            uid,
            wpm = report.wpm,
            accuracy = report.accuracy,
            bigram_errors = report.bigram_errors.total(),
            "session finished"
        );

        Ok(FinishedSession {
            session_id,
            wpm: report.wpm,
            accuracy: report.accuracy,
            total_chars: report.total_chars,
            correct_chars: report.correct_chars,
            wrong_chars: report.wrong_chars,
            backspaces: report.backspaces,
            avg_delta_ms: report.avg_delta_ms,
            pause_rate: report.pause_rate,
            weak_bigrams_top: profile.weak_bigrams_top(self.config.top_bigrams),
            weak_letters_top: top_letters(&report.letter_errors, self.config.top_letters),
            profile,
        })
    }

    /// Register a user, optionally with a display name, so they are listed
    /// before their first session.
    pub fn identify(&self, uid: &str, username: Option<&str>) -> Result<WeakBigramProfile> {
        let profile = self
            .store
            .update_profile(uid, &mut |p| p.with_username(username))?;
        debug!(uid, username = ?profile.username, "user identified");
        Ok(profile)
    }

    pub fn profile_view(&self, uid: &str) -> Result<ProfileView> {
        let profile = self.profile_or_empty(uid)?;
        let (mode, _) = resolve_mode(
            self.config.personalization_strength,
            self.config.stress_mode,
            None,
        );
        Ok(ProfileView {
            uid: uid.to_string(),
            username: profile.username.clone(),
            mode,
            avg_wpm: profile.avg_wpm,
            avg_accuracy: profile.avg_accuracy,
            sessions: self.store.list_sessions(uid)?,
            weak_bigrams_top: profile.weak_bigrams_top(self.config.top_bigrams),
            weak_letters_top: profile.weak_letters_top(self.config.top_letters),
        })
    }
}
