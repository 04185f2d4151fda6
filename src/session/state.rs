use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, TrainerError};
use crate::session::input::KeyEvent;
use crate::session::result::SessionReport;

/// A typing session: open while accepting events, finished exactly once.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Session {
    pub id: u64,
    pub uid: String,
    pub text_id: u32,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub events: Vec<KeyEvent>,
    /// Metrics computed when the session was finished.
    #[serde(default)]
    pub report: Option<SessionReport>,
}

impl Session {
    pub fn new(id: u64, uid: impl Into<String>, text_id: u32, started_at: DateTime<Utc>) -> Self {
        Self {
            id,
            uid: uid.into(),
            text_id,
            started_at,
            ended_at: None,
            events: Vec::new(),
            report: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.ended_at.is_none()
    }

    pub fn ensure_owner(&self, uid: &str) -> Result<()> {
        if self.uid == uid {
            Ok(())
        } else {
            Err(TrainerError::UserMismatch {
                session_id: self.id,
                owner: self.uid.clone(),
                uid: uid.to_string(),
            })
        }
    }

    /// Append already-validated events. Returns the new log length.
    pub fn append(&mut self, events: impl IntoIterator<Item = KeyEvent>) -> Result<usize> {
        if !self.is_open() {
            return Err(TrainerError::SessionClosed(self.id));
        }
        self.events.extend(events);
        Ok(self.events.len())
    }

    /// Close the session and compute its report from the stored log.
    ///
    /// A second call fails; the caller must not merge the report twice.
    pub fn finish(&mut self, target: &str, ended_at: DateTime<Utc>) -> Result<&SessionReport> {
        if !self.is_open() {
            return Err(TrainerError::SessionAlreadyFinished(self.id));
        }
        let report = SessionReport::analyze(&self.events, target, self.started_at, ended_at);
        self.ended_at = Some(ended_at);
        Ok(&*self.report.insert(report))
    }

    /// Recompute metrics without touching the session.
    pub fn analyze(&self, target: &str) -> Option<SessionReport> {
        self.ended_at
            .map(|end| SessionReport::analyze(&self.events, target, self.started_at, end))
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    #[test]
    fn test_lifecycle_open_then_finished_once() {
        let start = Utc::now();
        let mut s = Session::new(1, "u1", 7, start);
        assert!(s.is_open());
        assert_eq!(s.append(vec![KeyEvent::key(0, 'h', 0), KeyEvent::key(1, 'i', 120)]).unwrap(), 2);

        let report = s.finish("hi", start + Duration::seconds(6)).unwrap().clone();
        assert_eq!(report.correct_chars, 2);
        assert!(!s.is_open());

        assert_eq!(
            s.finish("hi", start + Duration::seconds(9)).unwrap_err(),
            TrainerError::SessionAlreadyFinished(1)
        );
        assert_eq!(
            s.append(vec![KeyEvent::key(0, 'h', 0)]).unwrap_err(),
            TrainerError::SessionClosed(1)
        );
        // stored report is unchanged and recomputation matches it
        assert_eq!(s.report.as_ref(), Some(&report));
        assert_eq!(s.analyze("hi"), Some(report));
    }

    #[test]
    fn test_owner_check() {
        let s = Session::new(3, "alice", 1, Utc::now());
        assert!(s.ensure_owner("alice").is_ok());
        assert!(matches!(
            s.ensure_owner("bob"),
            Err(TrainerError::UserMismatch { session_id: 3, .. })
        ));
    }

    #[test]
    fn test_open_session_has_no_analysis() {
        let s = Session::new(4, "u", 1, Utc::now());
        assert_eq!(s.analyze("abc"), None);
    }
}
