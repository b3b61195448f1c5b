// Append-only audit trail. One human-readable line per event, files
// rotated by calendar month through a `_YYYYMM` suffix.

use chrono::{DateTime, Utc};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::session::mask_identifier;

#[derive(Debug, Clone)]
pub struct ActivityLog {
    dir: PathBuf,
}

impl ActivityLog {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Record a general action outcome.
    pub fn record(&self, action: &str, success: bool, details: &str) {
        let now = Utc::now();
        let status = if success { "SUCCESS" } else { "FAILURE" };
        let line = format!("[{}] {action} - {status}: {details}", stamp(&now));
        self.append("activity", &now, &line);
    }

    /// Record a login attempt; the identifier is masked before writing.
    pub fn record_login(&self, identifier: &str, success: bool, message: &str) {
        let now = Utc::now();
        let line = format!(
            "[{}] Identifier: {} | Success: {success} | Message: {message}",
            stamp(&now),
            mask_identifier(identifier.trim())
        );
        self.append("login_attempts", &now, &line);
    }

    /// Path of the file a given stem rotates to for `at`'s month.
    pub fn file_for(&self, stem: &str, at: &DateTime<Utc>) -> PathBuf {
        self.dir.join(format!("{stem}_{}.log", at.format("%Y%m")))
    }

    fn append(&self, stem: &str, at: &DateTime<Utc>, line: &str) {
        let path = self.file_for(stem, at);
        let result = std::fs::create_dir_all(&self.dir).and_then(|_| {
            let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
            writeln!(file, "{line}")
        });
        if let Err(e) = result {
            tracing::warn!(path = %path.display(), error = %e, "failed to append activity log");
        }
    }
}

fn stamp(at: &DateTime<Utc>) -> String {
    at.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}
