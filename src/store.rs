// Credential store: captured account sessions persisted as one JSON file.
//
// The file is an envelope `{"cookies": [...], "metadata": {...}}`. Older
// files holding a bare array of records are still read. Any unreadable or
// unparsable file loads as an empty collection.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, TimeZone, Utc};
use rand::RngCore;
use serde::{Deserialize, Deserializer, Serialize};
use std::path::{Path, PathBuf};

use crate::error::Error;
use crate::session::{self, NO_TOKEN};

/// Lifecycle state of a record. Only `active` is ever produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountStatus {
    #[default]
    Active,
}

/// One captured remote identity. Field names on disk follow the legacy layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountRecord {
    #[serde(rename = "id")]
    pub local_id: String,
    #[serde(rename = "name")]
    pub display_name: String,
    #[serde(rename = "user_id")]
    pub remote_user_id: String,
    #[serde(rename = "cookie")]
    pub session_blob: String,
    #[serde(rename = "token", default = "no_token")]
    pub derived_token: String,
    #[serde(default)]
    pub status: AccountStatus,
    #[serde(rename = "added_date", default, deserialize_with = "lenient_timestamp")]
    pub added_at: Option<DateTime<Utc>>,
    #[serde(rename = "last_used", default, deserialize_with = "lenient_timestamp")]
    pub last_used_at: Option<DateTime<Utc>>,
    #[serde(rename = "added_by", default)]
    pub owner_tag: String,
}

impl AccountRecord {
    /// The derived token, unless it is the `N/A` sentinel.
    pub fn token(&self) -> Option<&str> {
        Some(self.derived_token.as_str()).filter(|t| !t.is_empty() && *t != NO_TOKEN)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreMetadata {
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub last_update: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_by: String,
    #[serde(default)]
    pub last_active_account: Option<String>,
}

#[derive(Serialize, Deserialize)]
struct Envelope {
    cookies: Vec<AccountRecord>,
    #[serde(default)]
    metadata: StoreMetadata,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OnDisk {
    Envelope(Envelope),
    Legacy(Vec<AccountRecord>),
}

/// Result of re-validating a stored blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationReport {
    pub remote_user_id: String,
    pub display_name: String,
    pub valid: bool,
    pub message: String,
}

fn no_token() -> String {
    NO_TOKEN.to_string()
}

// Older files wrote local wall-clock strings at UTC+8, either
// `2025-05-13 14:02:11` or `May 13, 2025`. Anything else loads as absent.
const LEGACY_OFFSET_SECS: i32 = 8 * 3600;

fn lenient_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<serde_json::Value> = Option::deserialize(deserializer)?;
    Ok(raw
        .as_ref()
        .and_then(serde_json::Value::as_str)
        .and_then(parse_timestamp))
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(t) = DateTime::parse_from_rfc3339(raw) {
        return Some(t.with_timezone(&Utc));
    }
    let local = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(raw, "%B %d, %Y")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })?;
    FixedOffset::east_opt(LEGACY_OFFSET_SECS)?
        .from_local_datetime(&local)
        .single()
        .map(|t| t.with_timezone(&Utc))
}

pub struct CredentialStore {
    path: PathBuf,
    owner_tag: String,
    records: Vec<AccountRecord>,
    metadata: StoreMetadata,
}

impl CredentialStore {
    /// Open (creating if needed) the store file at `path`.
    pub fn open(path: impl Into<PathBuf>, owner_tag: impl Into<String>) -> Self {
        let path = path.into();
        let mut store = Self {
            path,
            owner_tag: owner_tag.into(),
            records: Vec::new(),
            metadata: StoreMetadata::default(),
        };
        if !store.path.exists() {
            if let Err(e) = store.persist() {
                tracing::warn!(path = %store.path.display(), error = %e, "could not initialise store file");
            }
        }
        let (records, metadata) = load(&store.path);
        store.records = records;
        store.metadata = metadata;
        tracing::debug!(path = %store.path.display(), count = store.records.len(), "store loaded");
        store
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Insert or update the record for the blob's remote user id.
    pub fn add(
        &mut self,
        session_blob: &str,
        display_name: Option<&str>,
        derived_token: Option<&str>,
    ) -> Result<AccountRecord, Error> {
        let blob = session_blob.trim();
        let user_id = session::validate(blob)?;
        let name = display_name
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(str::to_string);
        let token = derived_token
            .map(str::trim)
            .filter(|t| !t.is_empty() && *t != NO_TOKEN)
            .map(str::to_string);

        let snapshot = self.snapshot();
        let record = match self.records.iter_mut().find(|r| r.remote_user_id == user_id) {
            Some(existing) => {
                existing.session_blob = blob.to_string();
                if let Some(token) = token {
                    existing.derived_token = token;
                }
                if let Some(name) = name {
                    existing.display_name = name;
                }
                existing.clone()
            }
            None => {
                let record = AccountRecord {
                    local_id: self.fresh_local_id(),
                    display_name: name
                        .or_else(|| session::name_hint(blob))
                        .unwrap_or_else(|| format!("User_{user_id}")),
                    remote_user_id: user_id,
                    session_blob: blob.to_string(),
                    derived_token: token.unwrap_or_else(no_token),
                    status: AccountStatus::Active,
                    added_at: Some(Utc::now()),
                    last_used_at: None,
                    owner_tag: self.owner_tag.clone(),
                };
                self.records.push(record.clone());
                record
            }
        };

        if let Err(e) = self.persist() {
            self.restore(snapshot);
            return Err(e);
        }
        tracing::info!(user_id = %record.remote_user_id, "stored account session");
        Ok(record)
    }

    /// Drop the record with `record`'s local id. Returns whether the
    /// change reached disk.
    pub fn remove(&mut self, record: &AccountRecord) -> bool {
        let snapshot = self.snapshot();
        self.records.retain(|r| r.local_id != record.local_id);
        if self.metadata.last_active_account.as_deref() == Some(record.local_id.as_str()) {
            self.metadata.last_active_account = None;
        }
        self.commit(snapshot)
    }

    pub fn list(&self) -> &[AccountRecord] {
        &self.records
    }

    pub fn has_any(&self) -> bool {
        !self.records.is_empty()
    }

    pub fn get_by_remote_id(&self, remote_user_id: &str) -> Option<&AccountRecord> {
        self.records.iter().find(|r| r.remote_user_id == remote_user_id)
    }

    /// Remember `local_id` as the selected account.
    pub fn set_current(&mut self, local_id: &str) -> bool {
        if !self.records.iter().any(|r| r.local_id == local_id) {
            return false;
        }
        let snapshot = self.snapshot();
        self.metadata.last_active_account = Some(local_id.to_string());
        self.commit(snapshot)
    }

    /// The selected account, falling back to the first record.
    pub fn current(&self) -> Option<&AccountRecord> {
        self.metadata
            .last_active_account
            .as_deref()
            .and_then(|id| self.records.iter().find(|r| r.local_id == id))
            .or_else(|| self.records.first())
    }

    /// Stamp `last_used_at` on the record for `remote_user_id`.
    pub fn touch(&mut self, remote_user_id: &str) -> bool {
        let snapshot = self.snapshot();
        match self.records.iter_mut().find(|r| r.remote_user_id == remote_user_id) {
            Some(record) => record.last_used_at = Some(Utc::now()),
            None => return false,
        }
        self.commit(snapshot)
    }

    pub fn validate_all(&self) -> Vec<ValidationReport> {
        self.records
            .iter()
            .map(|r| {
                let (valid, message) = match session::validate(&r.session_blob) {
                    Ok(_) => (true, "Session validation successful".to_string()),
                    Err(e) => (false, e.to_string()),
                };
                ValidationReport {
                    remote_user_id: r.remote_user_id.clone(),
                    display_name: r.display_name.clone(),
                    valid,
                    message,
                }
            })
            .collect()
    }

    fn fresh_local_id(&self) -> String {
        loop {
            let mut bytes = [0u8; 8];
            rand::thread_rng().fill_bytes(&mut bytes);
            let id: String = STANDARD.encode(bytes).chars().take(8).collect();
            if !self.records.iter().any(|r| r.local_id == id) {
                return id;
            }
        }
    }

    fn snapshot(&self) -> (Vec<AccountRecord>, StoreMetadata) {
        (self.records.clone(), self.metadata.clone())
    }

    fn restore(&mut self, snapshot: (Vec<AccountRecord>, StoreMetadata)) {
        self.records = snapshot.0;
        self.metadata = snapshot.1;
    }

    fn commit(&mut self, snapshot: (Vec<AccountRecord>, StoreMetadata)) -> bool {
        match self.persist() {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "store write failed, rolled back");
                self.restore(snapshot);
                false
            }
        }
    }

    /// Write the whole collection. Goes through a sibling temp file so a
    /// failed write never truncates the existing store.
    fn persist(&mut self) -> Result<(), Error> {
        self.metadata.last_update = Some(Utc::now());
        self.metadata.updated_by = self.owner_tag.clone();
        let envelope = Envelope {
            cookies: self.records.clone(),
            metadata: self.metadata.clone(),
        };
        let body = serde_json::to_string_pretty(&envelope)
            .map_err(|e| Error::Persistence(e.to_string()))?;

        let write = || -> std::io::Result<()> {
            if let Some(parent) = self.path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let tmp = self.path.with_extension("json.tmp");
            std::fs::write(&tmp, body)?;
            std::fs::rename(&tmp, &self.path)
        };
        write().map_err(|e| Error::Persistence(e.to_string()))
    }
}

fn load(path: &Path) -> (Vec<AccountRecord>, StoreMetadata) {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "store unreadable, starting empty");
            return Default::default();
        }
    };
    match serde_json::from_str::<OnDisk>(&raw) {
        Ok(OnDisk::Envelope(env)) => (env.cookies, env.metadata),
        Ok(OnDisk::Legacy(records)) => (records, StoreMetadata::default()),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "store unparsable, starting empty");
            Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn long_blob(user: &str) -> String {
        format!("c_user={user};xs={}", "abc123xyz".repeat(12))
    }

    fn open_tmp() -> (tempfile::TempDir, CredentialStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::open(dir.path().join("cookies.json"), "tester");
        (dir, store)
    }

    #[test]
    fn add_creates_record_with_user_id() {
        let (_dir, mut store) = open_tmp();
        let blob = long_blob("100");
        assert!(blob.len() >= 100);
        let rec = store.add(&blob, None, None).unwrap();
        assert_eq!(rec.remote_user_id, "100");
        assert_eq!(rec.display_name, "User_100");
        assert_eq!(rec.derived_token, NO_TOKEN);
        assert_eq!(rec.local_id.len(), 8);
        assert_eq!(rec.owner_tag, "tester");
        assert!(store.has_any());
    }

    #[test]
    fn invalid_blob_leaves_store_unchanged() {
        let (_dir, mut store) = open_tmp();
        store.add(&long_blob("1"), None, None).unwrap();
        for bad in ["xs=abc", "c_user=5", "", "c_user=x;xs=y"] {
            assert!(store.add(bad, None, None).is_err());
            assert_eq!(store.list().len(), 1);
        }
        let err = store.add("xs=abc", None, None).unwrap_err().to_string();
        assert!(err.contains("c_user"));
    }

    #[test]
    fn same_user_id_upserts() {
        let (_dir, mut store) = open_tmp();
        let first = store.add("c_user=7;xs=old", Some("Ana"), Some("EAAtoken1")).unwrap();
        let second = store.add("c_user=7;xs=new", None, Some(NO_TOKEN)).unwrap();
        assert_eq!(store.list().len(), 1);
        assert_eq!(second.local_id, first.local_id);
        assert_eq!(second.session_blob, "c_user=7;xs=new");
        assert_eq!(second.display_name, "Ana");
        assert_eq!(second.derived_token, "EAAtoken1");

        let third = store.add("c_user=7;xs=newer", Some("Bea"), None).unwrap();
        assert_eq!(third.display_name, "Bea");
    }

    #[test]
    fn remove_then_lookup_is_absent() {
        let (_dir, mut store) = open_tmp();
        let a = store.add(&long_blob("11"), None, None).unwrap();
        store.add(&long_blob("22"), None, None).unwrap();
        assert!(store.remove(&a));
        assert!(store.get_by_remote_id("11").is_none());
        assert!(store.get_by_remote_id("22").is_some());
    }

    #[test]
    fn reload_round_trips_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store").join("cookies.json");
        let blob = long_blob("555");
        {
            let mut store = CredentialStore::open(&path, "tester");
            store.add(&blob, Some("Five"), None).unwrap();
        }
        let store = CredentialStore::open(&path, "tester");
        let rec = store.get_by_remote_id("555").unwrap();
        assert_eq!(rec.session_blob, blob);
        assert_eq!(rec.display_name, "Five");
        assert!(rec.added_at.is_some());
    }

    #[test]
    fn legacy_array_and_garbage_files() {
        let dir = tempfile::tempdir().unwrap();
        let legacy = dir.path().join("legacy.json");
        std::fs::write(
            &legacy,
            r#"[{"id":"abcdefgh","name":"Old","user_id":"9","cookie":"c_user=9;xs=q",
                "token":"N/A","added_date":"May 13, 2025","last_used":null,
                "status":"active","added_by":"someone"}]"#,
        )
        .unwrap();
        let store = CredentialStore::open(&legacy, "tester");
        let rec = store.get_by_remote_id("9").unwrap();
        assert_eq!(rec.display_name, "Old");
        assert_eq!(
            rec.added_at,
            Some(Utc.with_ymd_and_hms(2025, 5, 12, 16, 0, 0).unwrap())
        );

        let garbage = dir.path().join("garbage.json");
        std::fs::write(&garbage, "{not json").unwrap();
        let store = CredentialStore::open(&garbage, "tester");
        assert!(!store.has_any());
    }

    #[test]
    fn legacy_timestamps_survive_rewrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cookies.json");
        std::fs::write(
            &path,
            r#"[{"id":"abcdefgh","name":"Old","user_id":"9","cookie":"c_user=9;xs=q",
                "added_date":"2025-05-13 14:02:11","last_used":"May 20, 2025"},
               {"id":"hgfedcba","name":"Odd","user_id":"8","cookie":"c_user=8;xs=q",
                "added_date":"sometime"}]"#,
        )
        .unwrap();
        {
            let mut store = CredentialStore::open(&path, "tester");
            store.add(&long_blob("10"), None, None).unwrap();
        }
        let store = CredentialStore::open(&path, "tester");
        let old = store.get_by_remote_id("9").unwrap();
        assert_eq!(
            old.added_at,
            Some(Utc.with_ymd_and_hms(2025, 5, 13, 6, 2, 11).unwrap())
        );
        assert_eq!(
            old.last_used_at,
            Some(Utc.with_ymd_and_hms(2025, 5, 19, 16, 0, 0).unwrap())
        );
        assert_eq!(store.get_by_remote_id("8").unwrap().added_at, None);
        assert_eq!(store.list().len(), 3);
    }

    #[test]
    fn failed_write_rolls_back() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, "file, not a directory").unwrap();
        let mut store = CredentialStore::open(blocker.join("cookies.json"), "tester");
        let err = store.add(&long_blob("3"), None, None).unwrap_err();
        assert!(matches!(err, Error::Persistence(_)));
        assert!(!store.has_any());
    }

    #[test]
    fn current_selection_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cookies.json");
        let mut store = CredentialStore::open(&path, "tester");
        let a = store.add(&long_blob("1"), None, None).unwrap();
        let b = store.add(&long_blob("2"), None, None).unwrap();
        assert_eq!(store.current().unwrap().local_id, a.local_id);
        assert!(store.set_current(&b.local_id));
        assert!(!store.set_current("missing"));
        assert!(store.touch("2"));
        assert!(!store.touch("404"));

        let store = CredentialStore::open(&path, "tester");
        let cur = store.current().unwrap();
        assert_eq!(cur.local_id, b.local_id);
        assert!(cur.last_used_at.is_some());
    }

    #[test]
    fn validate_all_flags_broken_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cookies.json");
        std::fs::write(
            &path,
            r#"{"cookies":[
                {"id":"a","name":"A","user_id":"1","cookie":"c_user=1;xs=ok"},
                {"id":"b","name":"B","user_id":"2","cookie":"c_user=2"}],
               "metadata":{}}"#,
        )
        .unwrap();
        let store = CredentialStore::open(&path, "tester");
        let report = store.validate_all();
        assert!(report[0].valid);
        assert!(!report[1].valid);
        assert!(report[1].message.contains("xs"));
    }
}
