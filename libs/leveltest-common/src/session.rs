//! Session context and submission state tracking.
//!
//! A [`Session`] exclusively owns one student's [`SessionSnapshot`]. Every
//! mutation (sampling a chapter, recording a graded attempt, an exit event,
//! finishing) goes through it, and it is handed explicitly to whoever needs
//! it. The snapshot is persisted with [`Session::checkpoint`].

use chrono::NaiveDateTime;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::BTreeMap;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::sampler::sample_ids;
use crate::store::{validate_student_name, RecordId, ResultStore};
use crate::types::{AttemptKey, SessionSnapshot, SolveStatus, SolveStatusRecord, StatusEntry};

pub const DATE_FORMAT: &str = "%Y-%m-%d";
pub const TIME_FORMAT: &str = "%H:%M:%S";
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Apply one graded attempt to the status map and return the updated record.
///
/// An absent key starts as `{FAIL, 0, None}`. A bare legacy value is promoted
/// to a structured record with no submissions before the attempt counts.
pub fn record_attempt(
    solve_status: &mut BTreeMap<AttemptKey, StatusEntry>,
    key: AttemptKey,
    all_passed: bool,
) -> SolveStatusRecord {
    let mut record = match solve_status.get(&key) {
        Some(StatusEntry::Structured(record)) => *record,
        Some(StatusEntry::Legacy(status)) => SolveStatusRecord {
            status: *status,
            submissions: 0,
            first_pass: None,
        },
        None => SolveStatusRecord {
            status: SolveStatus::Fail,
            submissions: 0,
            first_pass: None,
        },
    };

    record.submissions = record.submissions.saturating_add(1);
    record.status = SolveStatus::from_passed(all_passed);
    if all_passed && record.first_pass.is_none() {
        record.first_pass = Some(record.submissions);
    }

    solve_status.insert(key, StatusEntry::Structured(record));
    record
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChapterProgress {
    pub solved: usize,
    pub sampled: usize,
}

pub struct Session {
    snapshot: SessionSnapshot,
    sample_size: usize,
    rng: StdRng,
}

impl Session {
    /// Begin a new session for `student_name` at `now`.
    pub fn start(student_name: &str, now: NaiveDateTime, sample_size: usize) -> Result<Self> {
        validate_student_name(student_name)?;

        let mut snapshot = SessionSnapshot::new(student_name, now.format(DATE_FORMAT).to_string());
        snapshot.start_time = Some(now.format(TIME_FORMAT).to_string());
        snapshot.sampled_problems = Some(BTreeMap::new());

        info!(student = %student_name, date = %snapshot.date, "Session started");

        Ok(Self {
            snapshot,
            sample_size,
            rng: StdRng::from_entropy(),
        })
    }

    /// Continue a session from its persisted snapshot.
    pub fn resume(snapshot: SessionSnapshot, sample_size: usize) -> Self {
        debug!(student = %snapshot.student_name, date = %snapshot.date, "Session resumed");
        Self {
            snapshot,
            sample_size,
            rng: StdRng::from_entropy(),
        }
    }

    /// Fix the sampling seed, for reproducible sessions.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    pub fn snapshot(&self) -> &SessionSnapshot {
        &self.snapshot
    }

    pub fn into_snapshot(self) -> SessionSnapshot {
        self.snapshot
    }

    pub fn student_name(&self) -> &str {
        &self.snapshot.student_name
    }

    pub fn is_finished(&self) -> bool {
        self.snapshot.is_finished
    }

    /// Problems assigned to `chapter` in this session.
    ///
    /// The first call draws the sample and stores it in the snapshot; every
    /// later call returns the stored ids, whatever `pool_size` is passed.
    /// A finished session never draws: chapters it did not sample stay empty.
    pub fn sampled_problems(&mut self, chapter: u32, pool_size: u32) -> Vec<u32> {
        if let Some(ids) = self
            .snapshot
            .sampled_problems
            .as_ref()
            .and_then(|sampled| sampled.get(&chapter))
        {
            return ids.clone();
        }

        if self.snapshot.is_finished {
            debug!(chapter, "Finished session, chapter left unsampled");
            return Vec::new();
        }

        let ids = sample_ids(&mut self.rng, pool_size, self.sample_size);
        debug!(chapter, pool_size, ids = ?ids, "Chapter sampled");

        self.snapshot
            .sampled_problems
            .get_or_insert_with(BTreeMap::new)
            .insert(chapter, ids.clone());
        ids
    }

    /// Count one graded attempt for `key`.
    pub fn record_attempt(&mut self, key: AttemptKey, all_passed: bool) -> Result<SolveStatusRecord> {
        self.ensure_active()?;

        let record = record_attempt(&mut self.snapshot.solve_status, key, all_passed);
        info!(
            student = %self.snapshot.student_name,
            key = %key,
            status = %record.status,
            submissions = record.submissions,
            first_pass = ?record.first_pass,
            "Attempt recorded"
        );
        Ok(record)
    }

    /// Note that the student left the test screen at `at`.
    pub fn record_exit_event(&mut self, at: NaiveDateTime) -> Result<()> {
        self.ensure_active()?;
        self.snapshot
            .exit_events
            .push(at.format(TIMESTAMP_FORMAT).to_string());
        Ok(())
    }

    /// Close the session. This happens once; later calls fail.
    pub fn finish(&mut self, at: NaiveDateTime) -> Result<()> {
        self.ensure_active()?;
        self.snapshot.end_time = Some(at.format(TIME_FORMAT).to_string());
        self.snapshot.is_finished = true;
        info!(student = %self.snapshot.student_name, "Session finished");
        Ok(())
    }

    /// Persist the current snapshot. A failed write is returned to the
    /// caller and leaves the in-memory state exactly as it was.
    pub fn checkpoint(&mut self, store: &ResultStore, at: NaiveDateTime) -> Result<RecordId> {
        let previous = self
            .snapshot
            .last_updated
            .replace(at.format(TIME_FORMAT).to_string());

        store.persist(&self.snapshot).map_err(|e| {
            self.snapshot.last_updated = previous;
            e
        })
    }

    pub fn status(&self, key: AttemptKey) -> Option<&StatusEntry> {
        self.snapshot.solve_status.get(&key)
    }

    pub fn chapter_progress(&self, chapter: u32) -> ChapterProgress {
        let sampled = self
            .snapshot
            .sampled_problems
            .as_ref()
            .and_then(|sampled| sampled.get(&chapter))
            .map(Vec::len)
            .unwrap_or(0);
        let solved = self
            .snapshot
            .solve_status
            .iter()
            .filter(|(key, entry)| key.chapter == chapter && entry.is_pass())
            .count();
        ChapterProgress { solved, sampled }
    }

    fn ensure_active(&self) -> Result<()> {
        if self.snapshot.is_finished {
            return Err(Error::SessionFinished(self.snapshot.student_name.clone()));
        }
        Ok(())
    }
}
