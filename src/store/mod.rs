pub mod json_store;
pub mod schema;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::engine::profile::WeakBigramProfile;
use crate::session::state::Session;

pub use json_store::JsonStore;

/// Source and sink of per-user weak-bigram profiles.
pub trait ProfileStore {
    fn load_profile(&self, uid: &str) -> Result<Option<WeakBigramProfile>>;

    /// Atomic read-modify-write. `f` receives the stored profile (or a fresh
    /// empty one) and returns its replacement.
    fn update_profile(
        &self,
        uid: &str,
        f: &mut dyn FnMut(&WeakBigramProfile) -> WeakBigramProfile,
    ) -> Result<WeakBigramProfile>;
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSummary {
    pub uid: String,
    pub username: Option<String>,
    /// Finished sessions.
    pub sessions: usize,
}

/// One point of a user's progress history.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub id: u64,
    pub text_id: u32,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub wpm: f64,
    pub accuracy: f64,
}

impl SessionSummary {
    /// `None` for sessions that are still open.
    pub fn from_session(session: &Session) -> Option<Self> {
        let ended_at = session.ended_at?;
        let report = session.report.as_ref()?;
        Some(Self {
            id: session.id,
            text_id: session.text_id,
            started_at: session.started_at,
            ended_at,
            wpm: report.wpm,
            accuracy: report.accuracy,
        })
    }
}
