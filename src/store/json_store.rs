use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use fd_lock::RwLock;
use serde::{Serialize, de::DeserializeOwned};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::engine::profile::WeakBigramProfile;
use crate::error::TrainerError;
use crate::session::result::SessionReport;
use crate::session::state::Session;
use crate::store::schema::{CounterData, ProfileData, SessionData};
use crate::store::{ProfileStore, SessionSummary, UserSummary};

const PROFILES_DIR: &str = "profiles";
const SESSIONS_DIR: &str = "sessions";
const COUNTER_FILE: &str = "counter.json";
const LOCK_FILE: &str = "store.lock";

/// File-backed store: one JSON file per profile and per session.
///
/// Every read-modify-write holds an exclusive lock on `store.lock`, which
/// serializes writers across threads, processes and separate `JsonStore`
/// values opened on the same directory. Writes go through a fresh temp file
/// plus rename, so readers never see a torn file and need no lock.
pub struct JsonStore {
    base_dir: PathBuf,
    lock: Mutex<RwLock<File>>,
}

impl JsonStore {
    pub fn new() -> Result<Self> {
        let base_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("typetrain");
        Self::with_base_dir(base_dir)
    }

    pub fn with_base_dir(base_dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(base_dir.join(PROFILES_DIR))?;
        fs::create_dir_all(base_dir.join(SESSIONS_DIR))?;
        let lock_file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(base_dir.join(LOCK_FILE))
            .with_context(|| format!("Failed to open lock file in {}", base_dir.display()))?;
        Ok(Self {
            base_dir,
            lock: Mutex::new(RwLock::new(lock_file)),
        })
    }

    /// Run `f` while holding the store-wide write lock. Not reentrant.
    fn locked<T>(&self, f: impl FnOnce() -> Result<T>) -> Result<T> {
        let mut file_lock = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let _held = file_lock.write().context("Failed to lock store")?;
        f()
    }

    fn profile_path(&self, uid: &str) -> PathBuf {
        self.base_dir
            .join(PROFILES_DIR)
            .join(format!("u-{}.json", file_key(uid)))
    }

    fn session_path(&self, id: u64) -> PathBuf {
        self.base_dir.join(SESSIONS_DIR).join(format!("{id}.json"))
    }

    fn load<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(path)?;
        let data = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        Ok(Some(data))
    }

    fn save<T: Serialize>(path: &Path, data: &T) -> Result<()> {
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        let mut tmp = NamedTempFile::new_in(dir)?;
        serde_json::to_writer_pretty(&mut tmp, data)?;
        tmp.as_file().sync_all()?;
        tmp.persist(path)
            .with_context(|| format!("Failed to replace {}", path.display()))?;
        Ok(())
    }

    fn read_profile(&self, uid: &str) -> Result<Option<WeakBigramProfile>> {
        let data: Option<ProfileData> = Self::load(&self.profile_path(uid))?;
        Ok(match data {
            Some(d) if d.needs_reset() => {
                warn!(uid, version = d.schema_version, "discarding profile with stale schema");
                None
            }
            Some(d) => Some(d.profile),
            None => None,
        })
    }

    fn read_session(&self, id: u64) -> Result<Session> {
        Self::load::<SessionData>(&self.session_path(id))?
            .map(|d| d.session)
            .ok_or_else(|| TrainerError::SessionNotFound(id).into())
    }

    /// Allocate an id and persist a new open session.
    pub fn create_session(&self, uid: &str, text_id: u32, started_at: DateTime<Utc>) -> Result<Session> {
        self.locked(|| {
            let counter_path = self.base_dir.join(COUNTER_FILE);
            let mut counter: CounterData = Self::load(&counter_path)?.unwrap_or_default();
            let id = counter.next_session_id;
            counter.next_session_id += 1;
            Self::save(&counter_path, &counter)?;

            let session = Session::new(id, uid, text_id, started_at);
            Self::save(&self.session_path(id), &SessionData::new(session.clone()))?;
            debug!(session_id = id, uid, text_id, "session created");
            Ok(session)
        })
    }

    pub fn load_session(&self, id: u64) -> Result<Option<Session>> {
        let data: Option<SessionData> = Self::load(&self.session_path(id))?;
        Ok(data.map(|d| d.session))
    }

    /// Run `f` against a stored session and persist the result atomically.
    ///
    /// Errors returned by `f` abort the update and leave the file untouched.
    pub fn update_session<T>(
        &self,
        id: u64,
        f: impl FnOnce(&mut Session) -> crate::error::Result<T>,
    ) -> Result<T> {
        self.locked(|| {
            let mut session = self.read_session(id)?;
            let out = f(&mut session)?;
            Self::save(&self.session_path(id), &SessionData::new(session))?;
            Ok(out)
        })
    }

    /// Close a session with `finish` and fold its report into the owner's
    /// profile, both under one lock.
    ///
    /// The profile records which sessions it has absorbed. A session that was
    /// closed but never merged (the profile write failed) is merged on the
    /// next call instead of being rejected, so each session lands in the
    /// profile exactly once.
    pub fn finish_session(
        &self,
        id: u64,
        uid: &str,
        now: DateTime<Utc>,
        finish: impl FnOnce(&mut Session) -> crate::error::Result<()>,
    ) -> Result<(SessionReport, WeakBigramProfile)> {
        self.locked(|| {
            let mut session = self.read_session(id)?;
            session.ensure_owner(uid)?;
            let current = self
                .read_profile(uid)?
                .unwrap_or_else(|| WeakBigramProfile::new(uid));

            let newly_finished = session.is_open();
            if newly_finished {
                finish(&mut session)?;
            } else if current.has_merged(id) {
                return Err(TrainerError::SessionAlreadyFinished(id).into());
            } else {
                warn!(session_id = id, uid, "merging a finished session that missed its profile update");
            }
            let report = session
                .report
                .clone()
                .ok_or(TrainerError::SessionAlreadyFinished(id))?;

            if newly_finished {
                Self::save(&self.session_path(id), &SessionData::new(session))?;
            }
            let next = current.merged_session(id, &report, now);
            Self::save(&self.profile_path(uid), &ProfileData::new(next.clone()))?;
            Ok((report, next))
        })
    }

    fn all_sessions(&self) -> Result<Vec<Session>> {
        let mut sessions: Vec<Session> = self
            .read_all::<SessionData>(SESSIONS_DIR)?
            .into_iter()
            .map(|d| d.session)
            .collect();
        sessions.sort_by_key(|s| (s.started_at, s.id));
        Ok(sessions)
    }

    /// Every readable `*.json` file in one of the store's subdirectories.
    fn read_all<T: DeserializeOwned>(&self, dir: &str) -> Result<Vec<T>> {
        let mut out = Vec::new();
        for entry in fs::read_dir(self.base_dir.join(dir))? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match Self::load::<T>(&path) {
                Ok(Some(d)) => out.push(d),
                Ok(None) => {}
                Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable file"),
            }
        }
        Ok(out)
    }

    /// Finished sessions of one user, oldest first.
    pub fn list_sessions(&self, uid: &str) -> Result<Vec<SessionSummary>> {
        Ok(self
            .all_sessions()?
            .into_iter()
            .filter(|s| s.uid == uid)
            .filter_map(|s| SessionSummary::from_session(&s))
            .collect())
    }

    /// Every user with a profile or a session, with finished-session counts.
    pub fn list_users(&self) -> Result<Vec<UserSummary>> {
        let mut users: BTreeMap<String, UserSummary> = BTreeMap::new();
        for data in self.read_all::<ProfileData>(PROFILES_DIR)? {
            if data.needs_reset() {
                continue;
            }
            let p = data.profile;
            users.insert(
                p.uid.clone(),
                UserSummary {
                    uid: p.uid,
                    username: p.username,
                    sessions: 0,
                },
            );
        }
        for s in self.all_sessions()? {
            let finished = usize::from(!s.is_open());
            users
                .entry(s.uid.clone())
                .or_insert_with(|| UserSummary {
                    uid: s.uid,
                    username: None,
                    sessions: 0,
                })
                .sessions += finished;
        }
        Ok(users.into_values().collect())
    }
}

impl ProfileStore for JsonStore {
    fn load_profile(&self, uid: &str) -> Result<Option<WeakBigramProfile>> {
        self.read_profile(uid)
    }

    fn update_profile(
        &self,
        uid: &str,
        f: &mut dyn FnMut(&WeakBigramProfile) -> WeakBigramProfile,
    ) -> Result<WeakBigramProfile> {
        self.locked(|| {
            let current = self
                .read_profile(uid)?
                .unwrap_or_else(|| WeakBigramProfile::new(uid));
            let next = f(&current);
            Self::save(&self.profile_path(uid), &ProfileData::new(next.clone()))?;
            Ok(next)
        })
    }
}

/// Injective, filesystem-safe encoding of a user id.
fn file_key(uid: &str) -> String {
    let mut out = String::with_capacity(uid.len());
    for c in uid.chars() {
        if c.is_ascii_alphanumeric() || c == '-' {
            out.push(c);
        } else {
            out.push_str(&format!("~{:x}~", c as u32));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use std::thread;

    use chrono::Duration;
    use tempfile::TempDir;

    use super::*;
    use crate::session::input::KeyEvent;

    fn make_test_store() -> (TempDir, JsonStore) {
        let dir = TempDir::new().unwrap();
        let store = JsonStore::with_base_dir(dir.path().to_path_buf()).unwrap();
        (dir, store)
    }

    fn report_with(bigram: &str) -> SessionReport {
        let mut report = SessionReport::default();
        report.bigram_errors.increment(bigram.to_string());
        report
    }

    fn finish_with_error(session: &mut Session) -> crate::error::Result<()> {
        let end = session.started_at + Duration::seconds(5);
        session.append(vec![KeyEvent::key(1, 'x', 100)])?;
        session.finish("the", end)?;
        Ok(())
    }

    #[test]
    fn test_missing_profile_is_none() {
        let (_dir, store) = make_test_store();
        assert!(store.load_profile("nobody").unwrap().is_none());
    }

    #[test]
    fn test_update_profile_creates_lazily() {
        let (_dir, store) = make_test_store();
        let report = report_with("th");
        let now = Utc::now();
        let p = store
            .update_profile("alice", &mut |p| p.merged_with(&report, now))
            .unwrap();
        assert_eq!(p.uid, "alice");
        assert_eq!(p.sessions, 1);

        let loaded = store.load_profile("alice").unwrap().unwrap();
        assert_eq!(loaded, p);
    }

    #[test]
    fn test_separate_stores_on_one_dir_lose_no_merges() {
        let dir = TempDir::new().unwrap();
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let path = dir.path().to_path_buf();
                thread::spawn(move || {
                    // one store per thread, as separate processes would have
                    let store = JsonStore::with_base_dir(path).unwrap();
                    let report = report_with("er");
                    for _ in 0..5 {
                        store
                            .update_profile("bob", &mut |p| p.merged_with(&report, Utc::now()))
                            .unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        let store = JsonStore::with_base_dir(dir.path().to_path_buf()).unwrap();
        let p = store.load_profile("bob").unwrap().unwrap();
        assert_eq!(p.counts.get(&"er".to_string()), 40);
        assert_eq!(p.sessions, 40);
    }

    #[test]
    fn test_parallel_starts_get_distinct_ids() {
        let dir = TempDir::new().unwrap();
        let handles: Vec<_> = (0..10)
            .map(|i| {
                let path = dir.path().to_path_buf();
                thread::spawn(move || {
                    let store = JsonStore::with_base_dir(path).unwrap();
                    (0..3)
                        .map(|_| store.create_session("u", i, Utc::now()).unwrap().id)
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        let mut ids: Vec<u64> = handles.into_iter().flat_map(|h| h.join().unwrap()).collect();
        ids.sort_unstable();
        assert_eq!(ids, (1..=30).collect::<Vec<u64>>());
        let store = JsonStore::with_base_dir(dir.path().to_path_buf()).unwrap();
        assert_eq!(store.all_sessions().unwrap().len(), 30);
    }

    #[test]
    fn test_parallel_finishes_of_one_user_all_merge() {
        let dir = TempDir::new().unwrap();
        let ids: Vec<u64> = {
            let store = JsonStore::with_base_dir(dir.path().to_path_buf()).unwrap();
            (0..12)
                .map(|_| store.create_session("pu", 1, Utc::now()).unwrap().id)
                .collect()
        };
        let handles: Vec<_> = ids
            .into_iter()
            .map(|id| {
                let path = dir.path().to_path_buf();
                thread::spawn(move || {
                    let store = JsonStore::with_base_dir(path).unwrap();
                    store
                        .finish_session(id, "pu", Utc::now(), finish_with_error)
                        .unwrap();
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        let store = JsonStore::with_base_dir(dir.path().to_path_buf()).unwrap();
        let p = store.load_profile("pu").unwrap().unwrap();
        assert_eq!(p.sessions, 12);
        assert_eq!(p.counts.get(&"th".to_string()), 12);
    }

    #[test]
    fn test_parallel_finishes_of_one_session_merge_once() {
        let dir = TempDir::new().unwrap();
        let id = JsonStore::with_base_dir(dir.path().to_path_buf())
            .unwrap()
            .create_session("pu", 1, Utc::now())
            .unwrap()
            .id;
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let path = dir.path().to_path_buf();
                thread::spawn(move || {
                    let store = JsonStore::with_base_dir(path).unwrap();
                    store
                        .finish_session(id, "pu", Utc::now(), finish_with_error)
                        .map_err(|e| e.downcast_ref::<TrainerError>().cloned())
                })
            })
            .collect();
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(
            results
                .iter()
                .filter_map(|r| r.as_ref().err())
                .all(|e| *e == Some(TrainerError::SessionAlreadyFinished(id)))
        );

        let store = JsonStore::with_base_dir(dir.path().to_path_buf()).unwrap();
        assert_eq!(store.load_profile("pu").unwrap().unwrap().sessions, 1);
    }

    #[test]
    fn test_finished_but_unmerged_session_is_merged_on_retry() {
        let (_dir, store) = make_test_store();
        let s = store.create_session("ann", 1, Utc::now()).unwrap();
        // the session was closed, but the profile write never happened
        store.update_session(s.id, finish_with_error).unwrap();
        assert!(store.load_profile("ann").unwrap().is_none());

        let (report, profile) = store
            .finish_session(s.id, "ann", Utc::now(), |_| unreachable!())
            .unwrap();
        assert_eq!(report.bigram_errors.get(&"th".to_string()), 1);
        assert_eq!(profile.sessions, 1);
        assert!(profile.has_merged(s.id));

        let again = store
            .finish_session(s.id, "ann", Utc::now(), |_| unreachable!())
            .unwrap_err();
        assert_eq!(
            again.downcast_ref::<TrainerError>(),
            Some(&TrainerError::SessionAlreadyFinished(s.id))
        );
        assert_eq!(store.load_profile("ann").unwrap().unwrap().sessions, 1);
    }

    #[test]
    fn test_failed_finish_leaves_session_open() {
        let (_dir, store) = make_test_store();
        let s = store.create_session("ann", 1, Utc::now()).unwrap();
        let err = store
            .finish_session(s.id, "ann", Utc::now(), |_| Err(TrainerError::UnknownText(1)))
            .unwrap_err();
        assert_eq!(err.downcast_ref::<TrainerError>(), Some(&TrainerError::UnknownText(1)));
        assert!(store.load_session(s.id).unwrap().unwrap().is_open());

        let wrong_user = store
            .finish_session(s.id, "eve", Utc::now(), finish_with_error)
            .unwrap_err();
        assert!(matches!(
            wrong_user.downcast_ref::<TrainerError>(),
            Some(TrainerError::UserMismatch { .. })
        ));
    }

    #[test]
    fn test_session_ids_are_sequential() {
        let (_dir, store) = make_test_store();
        let a = store.create_session("u", 1, Utc::now()).unwrap();
        let b = store.create_session("u", 2, Utc::now()).unwrap();
        assert_eq!(a.id, 1);
        assert_eq!(b.id, 2);
        assert_eq!(store.load_session(2).unwrap().unwrap().text_id, 2);
    }

    #[test]
    fn test_update_session_error_leaves_file_untouched() {
        let (_dir, store) = make_test_store();
        let s = store.create_session("u", 1, Utc::now()).unwrap();
        let err = store
            .update_session(s.id, |s| {
                s.append(vec![KeyEvent::key(0, 'a', 0)])?;
                s.ensure_owner("intruder")
            })
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<TrainerError>(),
            Some(TrainerError::UserMismatch { .. })
        ));
        assert!(store.load_session(s.id).unwrap().unwrap().events.is_empty());

        let missing = store.update_session(99, |_| Ok(())).unwrap_err();
        assert_eq!(
            missing.downcast_ref::<TrainerError>(),
            Some(&TrainerError::SessionNotFound(99))
        );
    }

    #[test]
    fn test_no_temp_files_left_behind() {
        let (dir, store) = make_test_store();
        let s = store.create_session("u", 1, Utc::now()).unwrap();
        store.finish_session(s.id, "u", Utc::now(), finish_with_error).unwrap();
        for sub in [PROFILES_DIR, SESSIONS_DIR] {
            for entry in fs::read_dir(dir.path().join(sub)).unwrap() {
                let path = entry.unwrap().path();
                assert_eq!(path.extension().and_then(|e| e.to_str()), Some("json"), "{path:?}");
            }
        }
    }

    #[test]
    fn test_list_users_and_sessions() {
        let (_dir, store) = make_test_store();
        let start = Utc::now();
        let s1 = store.create_session("ann", 1, start).unwrap();
        store.create_session("ann", 2, start + Duration::minutes(5)).unwrap();
        store.create_session("ben", 3, start).unwrap();
        store
            .update_session(s1.id, |s| s.finish("abc", start + Duration::minutes(1)).map(|_| ()))
            .unwrap();
        store
            .update_profile("cy", &mut |p| p.with_username(Some("Cy")))
            .unwrap();

        let users = store.list_users().unwrap();
        assert_eq!(
            users,
            vec![
                UserSummary { uid: "ann".into(), username: None, sessions: 1 },
                UserSummary { uid: "ben".into(), username: None, sessions: 0 },
                UserSummary { uid: "cy".into(), username: Some("Cy".into()), sessions: 0 },
            ]
        );

        let history = store.list_sessions("ann").unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].id, s1.id);
    }

    #[test]
    fn test_file_key_is_injective_and_safe() {
        assert_eq!(file_key("u_1"), "u~5f~1");
        assert_ne!(file_key("a/b"), file_key("a_b"));
        assert!(!file_key("../etc").contains('/'));
        assert!(!file_key("../etc").contains('.'));
    }

    #[test]
    fn test_stale_profile_schema_is_discarded() {
        let (_dir, store) = make_test_store();
        let mut data = ProfileData::new(WeakBigramProfile::new("old"));
        data.schema_version = 99;
        JsonStore::save(&store.profile_path("old"), &data).unwrap();
        assert!(store.load_profile("old").unwrap().is_none());
        assert!(store.list_users().unwrap().is_empty());
    }
}
