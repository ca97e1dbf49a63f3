//! Persisted result record format.
//!
//! Two generations of records exist on disk. The earlier one stores bare
//! `"PASS"`/`"FAIL"` strings per attempt key and has no sampled problem map;
//! the current one stores `{status, submissions, first_pass}` objects and the
//! sampled ids per chapter. Both decode into the same [`SessionSnapshot`],
//! and nothing outside this module sees the raw shapes.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::warn;

use crate::types::{AttemptKey, SessionSnapshot, SolveStatus, SolveStatusRecord, StatusEntry};

/// On-disk shape of a session snapshot. Field names match the record files
/// written by earlier deployments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultRecord {
    pub user_name: String,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub start_time: Option<String>,
    #[serde(default)]
    pub end_time: Option<String>,
    #[serde(default)]
    pub last_updated: Option<String>,
    #[serde(default)]
    pub is_finished: bool,
    #[serde(default)]
    pub solve_status: BTreeMap<String, RawStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_problems: Option<BTreeMap<u32, Vec<u32>>>,
    #[serde(default)]
    pub exit_logs: Vec<String>,
}

/// A solve-status value exactly as found in the file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawStatus {
    Structured(RawStatusRecord),
    Bare(String),
    Other(serde_json::Value),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawStatusRecord {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub submissions: Option<u32>,
    #[serde(default)]
    pub first_pass: Option<u32>,
}

impl From<RawStatus> for StatusEntry {
    fn from(raw: RawStatus) -> Self {
        match raw {
            RawStatus::Structured(record) => StatusEntry::Structured(SolveStatusRecord {
                status: record
                    .status
                    .as_deref()
                    .map(SolveStatus::from_legacy)
                    .unwrap_or_default(),
                submissions: record.submissions.unwrap_or(0),
                first_pass: record.first_pass.filter(|attempt| *attempt > 0),
            }),
            RawStatus::Bare(value) => StatusEntry::Legacy(SolveStatus::from_legacy(&value)),
            RawStatus::Other(_) => StatusEntry::Legacy(SolveStatus::Unattempted),
        }
    }
}

impl From<StatusEntry> for RawStatus {
    fn from(entry: StatusEntry) -> Self {
        match entry {
            StatusEntry::Legacy(status) => RawStatus::Bare(status.as_str().to_string()),
            StatusEntry::Structured(record) => RawStatus::Structured(RawStatusRecord {
                status: Some(record.status.as_str().to_string()),
                submissions: Some(record.submissions),
                first_pass: record.first_pass,
            }),
        }
    }
}

impl From<ResultRecord> for SessionSnapshot {
    fn from(record: ResultRecord) -> Self {
        let mut solve_status = BTreeMap::new();
        for (raw_key, raw_status) in record.solve_status {
            match raw_key.parse::<AttemptKey>() {
                Ok(key) => {
                    solve_status.insert(key, StatusEntry::from(raw_status));
                }
                Err(e) => {
                    warn!(student = %record.user_name, error = %e, "Dropping solve status entry");
                }
            }
        }

        SessionSnapshot {
            student_name: record.user_name,
            date: record.date.unwrap_or_default(),
            start_time: record.start_time,
            end_time: record.end_time,
            last_updated: record.last_updated,
            is_finished: record.is_finished,
            solve_status,
            sampled_problems: record.selected_problems,
            exit_events: record.exit_logs,
        }
    }
}

impl From<SessionSnapshot> for ResultRecord {
    fn from(snapshot: SessionSnapshot) -> Self {
        ResultRecord {
            user_name: snapshot.student_name,
            date: Some(snapshot.date),
            start_time: snapshot.start_time,
            end_time: snapshot.end_time,
            last_updated: snapshot.last_updated,
            is_finished: snapshot.is_finished,
            solve_status: snapshot
                .solve_status
                .into_iter()
                .map(|(key, entry)| (key.to_string(), RawStatus::from(entry)))
                .collect(),
            selected_problems: snapshot.sampled_problems,
            exit_logs: snapshot.exit_events,
        }
    }
}
