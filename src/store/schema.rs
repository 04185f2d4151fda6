use serde::{Deserialize, Serialize};

use crate::engine::profile::WeakBigramProfile;
use crate::session::state::Session;

pub const SCHEMA_VERSION: u32 = 1;

fn current_version() -> u32 {
    SCHEMA_VERSION
}

/// On-disk envelope for one user's profile.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProfileData {
    #[serde(default = "current_version")]
    pub schema_version: u32,
    pub profile: WeakBigramProfile,
}

impl ProfileData {
    pub fn new(profile: WeakBigramProfile) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            profile,
        }
    }

    /// Check if loaded data has a stale schema version and needs reset.
    pub fn needs_reset(&self) -> bool {
        self.schema_version != SCHEMA_VERSION
    }
}

/// On-disk envelope for one session and its event log.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionData {
    #[serde(default = "current_version")]
    pub schema_version: u32,
    pub session: Session,
}

impl SessionData {
    pub fn new(session: Session) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            session,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CounterData {
    pub schema_version: u32,
    pub next_session_id: u64,
}

impl Default for CounterData {
    fn default() -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            next_session_id: 1,
        }
    }
}
