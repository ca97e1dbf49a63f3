use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::record::ResultRecord;

/// Expected output of a problem when no example exists.
pub const NO_EXAMPLE: &str = "-";

/// One input/expected-output pair of a problem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProblemTestCase {
    #[serde(default)]
    pub input: String,
    #[serde(default)]
    pub output: String,
}

impl ProblemTestCase {
    pub fn new(input: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            output: output.into(),
        }
    }
}

/// A problem as authored in the bank. Immutable at runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProblemRecord {
    pub id: u32,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub default_code: String,
    #[serde(default)]
    pub test_cases: Vec<ProblemTestCase>,
    /// Older problems carry a single example pair instead of test cases.
    #[serde(default)]
    pub example_input: Option<String>,
    #[serde(default)]
    pub example_output: Option<String>,
}

impl ProblemRecord {
    pub fn has_test_cases(&self) -> bool {
        !self.test_cases.is_empty()
    }
}

/// Ordered pool of problems covering one topic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chapter {
    #[serde(default, alias = "chapterName")]
    pub chapter_name: String,
    #[serde(default)]
    pub problems: Vec<ProblemRecord>,
}

/// Identity of a gradable unit within a session: `(chapter, problem)`.
///
/// Persisted as `"{chapter}_{problem}"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AttemptKey {
    pub chapter: u32,
    pub problem: u32,
}

impl AttemptKey {
    pub fn new(chapter: u32, problem: u32) -> Self {
        Self { chapter, problem }
    }
}

impl fmt::Display for AttemptKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.chapter, self.problem)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("malformed attempt key: {0:?}")]
pub struct ParseAttemptKeyError(String);

impl FromStr for AttemptKey {
    type Err = ParseAttemptKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || ParseAttemptKeyError(s.to_string());
        let (chapter, problem) = s.split_once('_').ok_or_else(malformed)?;
        Ok(Self {
            chapter: chapter.parse().map_err(|_| malformed())?,
            problem: problem.parse().map_err(|_| malformed())?,
        })
    }
}

impl Serialize for AttemptKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for AttemptKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SolveStatus {
    Pass,
    Fail,
    #[default]
    Unattempted,
}

impl SolveStatus {
    pub fn from_passed(passed: bool) -> Self {
        if passed {
            SolveStatus::Pass
        } else {
            SolveStatus::Fail
        }
    }

    /// Interpret a bare persisted status string. Anything other than
    /// `PASS`/`FAIL` counts as never attempted.
    pub fn from_legacy(value: &str) -> Self {
        match value {
            "PASS" => SolveStatus::Pass,
            "FAIL" => SolveStatus::Fail,
            _ => SolveStatus::Unattempted,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SolveStatus::Pass => "PASS",
            SolveStatus::Fail => "FAIL",
            SolveStatus::Unattempted => "UNATTEMPTED",
        }
    }
}

impl fmt::Display for SolveStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Attempt history of one key.
///
/// `submissions` grows by one per graded attempt, `first_pass` is the
/// submission count at the earliest pass and is never overwritten, and
/// `status` reflects the most recent attempt only.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SolveStatusRecord {
    pub status: SolveStatus,
    pub submissions: u32,
    pub first_pass: Option<u32>,
}

/// A solve-status value in either schema generation, decoded once at the
/// store boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusEntry {
    /// Bare `"PASS"`/`"FAIL"` string of the earlier record format.
    Legacy(SolveStatus),
    Structured(SolveStatusRecord),
}

impl StatusEntry {
    pub fn status(&self) -> SolveStatus {
        match self {
            StatusEntry::Legacy(status) => *status,
            StatusEntry::Structured(record) => record.status,
        }
    }

    pub fn is_pass(&self) -> bool {
        self.status() == SolveStatus::Pass
    }

    pub fn as_structured(&self) -> Option<&SolveStatusRecord> {
        match self {
            StatusEntry::Structured(record) => Some(record),
            StatusEntry::Legacy(_) => None,
        }
    }
}

/// Chapter index to the ordered ids sampled for it.
pub type SampledProblems = BTreeMap<u32, Vec<u32>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordSchema {
    /// Bare status strings and no sampled problem map.
    Legacy,
    Current,
}

/// Full state of one student's session, also the normalized form of every
/// persisted result record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "ResultRecord", into = "ResultRecord")]
pub struct SessionSnapshot {
    pub student_name: String,
    /// `YYYY-MM-DD`
    pub date: String,
    /// `HH:MM:SS`
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub last_updated: Option<String>,
    pub is_finished: bool,
    pub solve_status: BTreeMap<AttemptKey, StatusEntry>,
    pub sampled_problems: Option<SampledProblems>,
    pub exit_events: Vec<String>,
}

impl SessionSnapshot {
    pub fn new(student_name: impl Into<String>, date: impl Into<String>) -> Self {
        Self {
            student_name: student_name.into(),
            date: date.into(),
            start_time: None,
            end_time: None,
            last_updated: None,
            is_finished: false,
            solve_status: BTreeMap::new(),
            sampled_problems: None,
            exit_events: Vec::new(),
        }
    }

    pub fn schema(&self) -> RecordSchema {
        let structured = self
            .solve_status
            .values()
            .any(|entry| matches!(entry, StatusEntry::Structured(_)));
        if self.sampled_problems.is_some() || structured {
            RecordSchema::Current
        } else {
            RecordSchema::Legacy
        }
    }

    /// Sampled set, treating an empty map the same as an absent one.
    pub fn sampled(&self) -> Option<&SampledProblems> {
        self.sampled_problems.as_ref().filter(|map| !map.is_empty())
    }

    pub fn pass_count(&self) -> usize {
        self.solve_status.values().filter(|entry| entry.is_pass()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attempt_key_round_trips_through_display() {
        let key = AttemptKey::new(3, 42);
        assert_eq!(key.to_string(), "3_42");
        assert_eq!("3_42".parse::<AttemptKey>().unwrap(), key);
    }

    #[test]
    fn test_attempt_key_rejects_malformed() {
        assert!("3".parse::<AttemptKey>().is_err());
        assert!("a_1".parse::<AttemptKey>().is_err());
        assert!("1_b".parse::<AttemptKey>().is_err());
        assert!("1_2_3".parse::<AttemptKey>().is_err());
    }

    #[test]
    fn test_legacy_status_strings() {
        assert_eq!(SolveStatus::from_legacy("PASS"), SolveStatus::Pass);
        assert_eq!(SolveStatus::from_legacy("FAIL"), SolveStatus::Fail);
        assert_eq!(SolveStatus::from_legacy("pass"), SolveStatus::Unattempted);
        assert_eq!(SolveStatus::from_legacy(""), SolveStatus::Unattempted);
    }

    #[test]
    fn test_schema_detection() {
        let mut snapshot = SessionSnapshot::new("kim", "2025-01-02");
        snapshot
            .solve_status
            .insert(AttemptKey::new(0, 1), StatusEntry::Legacy(SolveStatus::Pass));
        assert_eq!(snapshot.schema(), RecordSchema::Legacy);

        snapshot.sampled_problems = Some(SampledProblems::new());
        assert_eq!(snapshot.schema(), RecordSchema::Current);
        assert!(snapshot.sampled().is_none());
    }
}
