use crate::error::{Error, Result};
use crate::types::SessionSnapshot;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

// Result store semantics: one JSON file per (date, student), named
// `{date}_{student}_result.json`. Re-saving the same identity replaces the
// file; no intermediate checkpoint is retained.

pub const RECORD_SUFFIX: &str = "_result.json";

/// File name of the record for a (date, student) identity
pub fn record_file_name(date: &str, student_name: &str) -> String {
    format!("{}_{}{}", date, student_name, RECORD_SUFFIX)
}

/// Student names end up in file names, so they must be usable as one path
/// component.
pub fn validate_student_name(name: &str) -> Result<()> {
    let trimmed = name.trim();
    if trimmed.is_empty()
        || trimmed != name
        || name.contains(|c: char| c == '/' || c == '\\')
        || name == "."
        || name == ".."
    {
        return Err(Error::InvalidStudentName(name.to_string()));
    }
    Ok(())
}

/// Identifier of a persisted record (its file name)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RecordId(String);

impl RecordId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A record file that could not be decoded during a scan
#[derive(Debug, Clone)]
pub struct SkippedRecord {
    pub path: PathBuf,
    pub reason: String,
}

/// Outcome of scanning the whole store
#[derive(Debug, Clone, Default)]
pub struct LoadReport {
    pub records: Vec<SessionSnapshot>,
    pub skipped: Vec<SkippedRecord>,
}

impl LoadReport {
    pub fn skipped_count(&self) -> usize {
        self.skipped.len()
    }
}

/// Directory-backed store of session snapshots.
#[derive(Debug, Clone)]
pub struct ResultStore {
    root: PathBuf,
}

impl ResultStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn record_path(&self, date: &str, student_name: &str) -> PathBuf {
        self.root.join(record_file_name(date, student_name))
    }

    /// Write the full snapshot, replacing any earlier content for the same
    /// (date, student). The file is written beside the target and renamed
    /// over it, so readers never observe a half-written record.
    pub fn persist(&self, snapshot: &SessionSnapshot) -> Result<RecordId> {
        validate_student_name(&snapshot.student_name)?;

        let file_name = record_file_name(&snapshot.date, &snapshot.student_name);
        let path = self.root.join(&file_name);
        let payload = serde_json::to_vec_pretty(snapshot)?;

        fs::create_dir_all(&self.root).map_err(|source| Error::Persist {
            path: self.root.clone(),
            source,
        })?;

        let tmp_path = self.root.join(format!(".{}.tmp", file_name));
        fs::write(&tmp_path, &payload)
            .and_then(|_| fs::rename(&tmp_path, &path))
            .map_err(|source| {
                let _ = fs::remove_file(&tmp_path);
                Error::Persist {
                    path: path.clone(),
                    source,
                }
            })?;

        info!(
            student = %snapshot.student_name,
            date = %snapshot.date,
            finished = snapshot.is_finished,
            attempts = snapshot.solve_status.len(),
            "Result record persisted"
        );

        Ok(RecordId(file_name))
    }

    /// Read the record of one identity, `None` when it does not exist.
    pub fn load(&self, date: &str, student_name: &str) -> Result<Option<SessionSnapshot>> {
        validate_student_name(student_name)?;
        let path = self.record_path(date, student_name);

        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(Error::Read { path, source }),
        };

        Ok(Some(serde_json::from_slice(&bytes)?))
    }

    /// Read every record in the store.
    ///
    /// Unreadable or malformed files are skipped and listed in the report;
    /// a missing directory is an empty store. No ordering is guaranteed.
    pub fn load_all(&self) -> LoadReport {
        let mut report = LoadReport::default();

        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(root = %self.root.display(), error = %e, "Result store unreadable");
                }
                return report;
            }
        };

        for entry in entries.flatten() {
            let path = entry.path();
            let is_record = path
                .file_name()
                .and_then(|name| name.to_str())
                .map(|name| name.ends_with(RECORD_SUFFIX) && !name.starts_with('.'))
                .unwrap_or(false);
            if !is_record {
                continue;
            }

            match read_record(&path) {
                Ok(snapshot) => report.records.push(snapshot),
                Err(reason) => {
                    warn!(path = %path.display(), reason = %reason, "Skipping result record");
                    report.skipped.push(SkippedRecord { path, reason });
                }
            }
        }

        debug!(
            loaded = report.records.len(),
            skipped = report.skipped.len(),
            "Result store scanned"
        );

        report
    }
}

fn read_record(path: &Path) -> std::result::Result<SessionSnapshot, String> {
    let bytes = fs::read(path).map_err(|e| e.to_string())?;
    serde_json::from_slice(&bytes).map_err(|e| e.to_string())
}
