// ── JSON file repository ──
//
// Active records live in one JSON document. Each call reads the file,
// applies its change and writes the whole document back through a temp
// file and rename, so a crash leaves either the old or the new document
// on disk. Reading fresh on every call lets a one-shot CLI process and
// the daemon share the file.
//
// Ended records move to an append-only JSON-lines history next to it, so
// the document every transition rewrites only ever holds live sessions.
// The history is appended before the document is renamed into place; the
// document is the commit point, and on reading history it wins over any
// archived copy of the same record.

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{RepositoryError, SessionRepository};
use crate::model::{MacAddress, Session, SessionPatch};

const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Default, Serialize, Deserialize)]
struct Document {
    version: u32,
    sessions: Vec<Session>,
}

/// [`SessionRepository`] backed by a JSON file plus a history log.
#[derive(Debug)]
pub struct JsonFileRepository {
    path: PathBuf,
    history: PathBuf,
    /// Serializes read-modify-write cycles inside this process.
    guard: Mutex<()>,
}

impl JsonFileRepository {
    /// Use the document at `path`, creating parent directories as needed.
    /// A missing file reads as an empty repository.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, RepositoryError> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| RepositoryError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let repo = Self {
            history: path.with_extension("history.jsonl"),
            path,
            guard: Mutex::new(()),
        };
        // Fail early on a corrupt document rather than on first use.
        repo.load()?;
        Ok(repo)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The append-only log of ended records.
    pub fn history_path(&self) -> &Path {
        &self.history
    }

    fn lock(&self) -> MutexGuard<'_, ()> {
        self.guard.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn load(&self) -> Result<Vec<Session>, RepositoryError> {
        let raw = match fs::read(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(RepositoryError::Io {
                    path: self.path.clone(),
                    source,
                });
            }
        };
        let doc: Document =
            serde_json::from_slice(&raw).map_err(|source| RepositoryError::Corrupt {
                path: self.path.clone(),
                source,
            })?;
        Ok(doc.sessions)
    }

    /// Archived records, oldest ending first. A torn final line from an
    /// interrupted append is skipped.
    fn load_history(&self) -> Result<Vec<Session>, RepositoryError> {
        let raw = match fs::read(&self.history) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(RepositoryError::Io {
                    path: self.history.clone(),
                    source,
                });
            }
        };

        let mut records = Vec::new();
        let mut lines = raw.split(|b| *b == b'\n').peekable();
        while let Some(line) = lines.next() {
            if line.is_empty() {
                continue;
            }
            match serde_json::from_slice(line) {
                Ok(record) => records.push(record),
                Err(e) if lines.peek().is_none() => {
                    warn!(
                        path = %self.history.display(),
                        error = %e,
                        "skipping torn history line"
                    );
                }
                Err(source) => {
                    return Err(RepositoryError::Corrupt {
                        path: self.history.clone(),
                        source,
                    });
                }
            }
        }
        Ok(records)
    }

    fn append_history(&self, ended: &[Session]) -> Result<(), RepositoryError> {
        if ended.is_empty() {
            return Ok(());
        }
        let mut bytes = Vec::new();
        for record in ended {
            serde_json::to_writer(&mut bytes, record)?;
            bytes.push(b'\n');
        }

        let io_err = |source| RepositoryError::Io {
            path: self.history.clone(),
            source,
        };
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.history)
            .map_err(io_err)?;
        file.write_all(&bytes).map_err(io_err)?;
        file.sync_all().map_err(io_err)?;
        debug!(
            path = %self.history.display(),
            records = ended.len(),
            "ended sessions archived"
        );
        Ok(())
    }

    fn store(&self, sessions: Vec<Session>) -> Result<(), RepositoryError> {
        let (live, ended): (Vec<_>, Vec<_>) = sessions.into_iter().partition(|s| s.active);
        self.append_history(&ended)?;

        let doc = Document {
            version: FORMAT_VERSION,
            sessions: live,
        };
        let bytes = serde_json::to_vec_pretty(&doc)?;

        let tmp = self.path.with_extension("json.tmp");
        let io_err = |source| RepositoryError::Io {
            path: tmp.clone(),
            source,
        };
        let mut file = fs::File::create(&tmp).map_err(io_err)?;
        file.write_all(&bytes).map_err(io_err)?;
        file.sync_all().map_err(io_err)?;
        drop(file);

        fs::rename(&tmp, &self.path).map_err(|source| RepositoryError::Io {
            path: self.path.clone(),
            source,
        })?;
        debug!(path = %self.path.display(), records = doc.sessions.len(), "session file written");
        Ok(())
    }

    /// Load, mutate, store, all under the in-process lock.
    fn modify<T>(
        &self,
        change: impl FnOnce(&mut Vec<Session>) -> Result<T, RepositoryError>,
    ) -> Result<T, RepositoryError> {
        let _guard = self.lock();
        let mut sessions = self.load()?;
        let out = change(&mut sessions)?;
        self.store(sessions)?;
        Ok(out)
    }
}

impl SessionRepository for JsonFileRepository {
    fn add_session(&self, session: &Session) -> Result<(), RepositoryError> {
        self.modify(|records| super::add(records, session))
    }

    fn update_session(
        &self,
        mac: &MacAddress,
        patch: &SessionPatch,
    ) -> Result<Option<Session>, RepositoryError> {
        let _guard = self.lock();
        let mut sessions = self.load()?;
        let updated = super::update(&mut sessions, mac, patch);
        if updated.is_some() {
            self.store(sessions)?;
        }
        Ok(updated)
    }

    fn active_sessions(&self) -> Result<Vec<Session>, RepositoryError> {
        let _guard = self.lock();
        Ok(super::active(&self.load()?))
    }

    fn find_active(&self, mac: &MacAddress) -> Result<Option<Session>, RepositoryError> {
        let _guard = self.lock();
        Ok(super::find_active(&self.load()?, mac))
    }

    fn cleanup_expired_sessions(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<Session>, RepositoryError> {
        self.modify(|records| Ok(super::cleanup_expired(records, now)))
    }

    fn all_sessions(&self) -> Result<Vec<Session>, RepositoryError> {
        let _guard = self.lock();
        let mut records: Vec<Session> = Vec::new();
        let mut index = HashMap::new();
        for record in self.load_history()?.into_iter().chain(self.load()?) {
            match index.get(&record.id) {
                Some(&i) => records[i] = record,
                None => {
                    index.insert(record.id, records.len());
                    records.push(record);
                }
            }
        }
        records.sort_by_key(|s| s.start_time);
        Ok(records)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::model::EndReason;
    use chrono::TimeDelta;
    use pretty_assertions::assert_eq;

    fn session(mac: &str) -> Session {
        Session::new(MacAddress::parse(mac).unwrap(), None, Utc::now(), 15, 2)
    }

    #[test]
    fn missing_file_reads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let repo = JsonFileRepository::open(dir.path().join("state/sessions.json")).unwrap();
        assert!(repo.all_sessions().unwrap().is_empty());
        assert!(!repo.path().exists());
    }

    #[test]
    fn records_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sessions.json");
        let s = session("aa:aa:aa:aa:aa:aa");

        JsonFileRepository::open(&path)
            .unwrap()
            .add_session(&s)
            .unwrap();

        let reopened = JsonFileRepository::open(&path).unwrap();
        assert_eq!(reopened.active_sessions().unwrap(), vec![s]);
    }

    #[test]
    fn update_and_end_are_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let repo = JsonFileRepository::open(dir.path().join("sessions.json")).unwrap();
        let s = session("aa:aa:aa:aa:aa:aa");
        repo.add_session(&s).unwrap();

        let extended = repo
            .update_session(
                &s.mac,
                &SessionPatch {
                    end_time: Some(s.end_time + TimeDelta::minutes(10)),
                    add_minutes: 10,
                    ..SessionPatch::default()
                },
            )
            .unwrap()
            .unwrap();
        assert_eq!(extended.minutes_granted, 25);

        repo.update_session(&s.mac, &SessionPatch::end(EndReason::Manual, Utc::now()))
            .unwrap();
        assert!(repo.find_active(&s.mac).unwrap().is_none());
        assert_eq!(repo.all_sessions().unwrap().len(), 1);
    }

    #[test]
    fn no_temp_file_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        let repo = JsonFileRepository::open(dir.path().join("sessions.json")).unwrap();
        repo.add_session(&session("aa:aa:aa:aa:aa:aa")).unwrap();

        let names: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(names, vec!["sessions.json".to_owned()]);
    }

    fn stored_document(path: &Path) -> Document {
        serde_json::from_slice(&fs::read(path).unwrap()).unwrap()
    }

    #[test]
    fn ended_records_leave_the_live_document() {
        let dir = tempfile::tempdir().unwrap();
        let repo = JsonFileRepository::open(dir.path().join("sessions.json")).unwrap();
        let kept = session("bb:bb:bb:bb:bb:bb");
        repo.add_session(&kept).unwrap();

        let mac = MacAddress::parse("aa:aa:aa:aa:aa:aa").unwrap();
        for _ in 0..20 {
            repo.add_session(&session(mac.as_str())).unwrap();
            repo.update_session(&mac, &SessionPatch::end(EndReason::Manual, Utc::now()))
                .unwrap();
        }

        assert_eq!(stored_document(repo.path()).sessions, vec![kept.clone()]);
        let archived = fs::read_to_string(repo.history_path()).unwrap();
        assert_eq!(archived.lines().count(), 20);

        let all = repo.all_sessions().unwrap();
        assert_eq!(all.len(), 21);
        assert_eq!(all.iter().filter(|s| s.active).count(), 1);
        assert!(all.windows(2).all(|w| w[0].start_time <= w[1].start_time));
    }

    #[test]
    fn expired_cleanup_archives_records() {
        let dir = tempfile::tempdir().unwrap();
        let repo = JsonFileRepository::open(dir.path().join("sessions.json")).unwrap();
        let s = session("aa:aa:aa:aa:aa:aa");
        repo.add_session(&s).unwrap();

        let finalized = repo
            .cleanup_expired_sessions(s.end_time + TimeDelta::seconds(1))
            .unwrap();
        assert_eq!(finalized.len(), 1);
        assert!(stored_document(repo.path()).sessions.is_empty());

        let all = repo.all_sessions().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].end_reason, Some(EndReason::Expired));
    }

    #[test]
    fn older_document_with_ended_records_is_migrated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sessions.json");
        let mut ended = session("aa:aa:aa:aa:aa:aa");
        SessionPatch::end(EndReason::Manual, Utc::now()).apply(&mut ended);
        let live = session("bb:bb:bb:bb:bb:bb");
        let doc = Document {
            version: FORMAT_VERSION,
            sessions: vec![ended.clone(), live.clone()],
        };
        fs::write(&path, serde_json::to_vec(&doc).unwrap()).unwrap();

        let repo = JsonFileRepository::open(&path).unwrap();
        assert_eq!(repo.all_sessions().unwrap().len(), 2);

        let extra = session("cc:cc:cc:cc:cc:cc");
        repo.add_session(&extra).unwrap();
        assert_eq!(stored_document(&path).sessions, vec![live, extra]);
        assert_eq!(repo.all_sessions().unwrap().len(), 3);
        assert!(repo.all_sessions().unwrap().contains(&ended));
    }

    #[test]
    fn live_document_wins_over_an_uncommitted_archive() {
        let dir = tempfile::tempdir().unwrap();
        let repo = JsonFileRepository::open(dir.path().join("sessions.json")).unwrap();
        let s = session("aa:aa:aa:aa:aa:aa");
        repo.add_session(&s).unwrap();

        // Archived, but the crash came before the document was replaced.
        let mut ended = s.clone();
        SessionPatch::end(EndReason::Manual, Utc::now()).apply(&mut ended);
        repo.append_history(&[ended]).unwrap();

        assert_eq!(repo.all_sessions().unwrap(), vec![s.clone()]);
        assert_eq!(repo.find_active(&s.mac).unwrap(), Some(s));
    }

    #[test]
    fn torn_history_tail_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let repo = JsonFileRepository::open(dir.path().join("sessions.json")).unwrap();
        let s = session("aa:aa:aa:aa:aa:aa");
        repo.add_session(&s).unwrap();
        repo.update_session(&s.mac, &SessionPatch::end(EndReason::Manual, Utc::now()))
            .unwrap();

        let mut log = fs::OpenOptions::new()
            .append(true)
            .open(repo.history_path())
            .unwrap();
        log.write_all(br#"{"id":"0192"#).unwrap();

        let all = repo.all_sessions().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].id, s.id);
    }

    #[test]
    fn corrupt_history_line_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let repo = JsonFileRepository::open(dir.path().join("sessions.json")).unwrap();
        fs::write(repo.history_path(), b"garbage\n{}\n").unwrap();

        let err = repo.all_sessions().unwrap_err();
        assert!(matches!(err, RepositoryError::Corrupt { .. }));
    }

    #[test]
    fn corrupt_file_is_reported_on_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sessions.json");
        fs::write(&path, b"{not json").unwrap();

        let err = JsonFileRepository::open(&path).unwrap_err();
        assert!(matches!(err, RepositoryError::Corrupt { .. }));
    }
}
