//! Aggregation over persisted result records.
//!
//! Everything here is read-only and works on the normalized
//! [`SessionSnapshot`] form, so legacy and current records are scored by the
//! same rules. No function depends on the order records were loaded in, and
//! none of them fails: missing data scores as zero.

use serde::Serialize;
use std::collections::BTreeMap;

use crate::types::{AttemptKey, SessionSnapshot, SolveStatus, StatusEntry};

/// `part / whole * 100`, or 0 when `whole` is 0.
pub fn percentage(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64 * 100.0
    }
}

fn chapter_label(chapter_names: &[String], index: u32) -> String {
    chapter_names
        .get(index as usize)
        .cloned()
        .unwrap_or_else(|| format!("Chapter {}", index))
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RecordScore {
    pub pass_count: usize,
    pub total: usize,
    pub score: f64,
}

/// Overall score of one record.
///
/// The denominator is the number of sampled problems when the record has a
/// sampled set, otherwise the number of attempt keys it contains.
pub fn score(record: &SessionSnapshot) -> RecordScore {
    let total = match record.sampled() {
        Some(sampled) => sampled.values().map(Vec::len).sum(),
        None => record.solve_status.len(),
    };
    let pass_count = record.pass_count();

    RecordScore {
        pass_count,
        total,
        score: percentage(pass_count, total),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChapterScore {
    pub index: u32,
    pub name: String,
    pub passed: usize,
    pub total: usize,
    pub rate: f64,
}

/// Problem ids of one chapter: the sampled ids when recorded, otherwise
/// every attempt key of that chapter.
fn chapter_problem_ids(record: &SessionSnapshot, chapter: u32) -> Vec<u32> {
    if let Some(ids) = record.sampled().and_then(|sampled| sampled.get(&chapter)) {
        return ids.clone();
    }
    record
        .solve_status
        .keys()
        .filter(|key| key.chapter == chapter)
        .map(|key| key.problem)
        .collect()
}

/// Per-chapter pass rate for every chapter of the catalog.
pub fn chapter_scores(record: &SessionSnapshot, chapter_names: &[String]) -> Vec<ChapterScore> {
    chapter_names
        .iter()
        .enumerate()
        .map(|(idx, name)| {
            let chapter = idx as u32;
            let ids = chapter_problem_ids(record, chapter);
            let passed = ids
                .iter()
                .filter(|id| {
                    record
                        .solve_status
                        .get(&AttemptKey::new(chapter, **id))
                        .is_some_and(StatusEntry::is_pass)
                })
                .count();

            ChapterScore {
                index: chapter,
                name: name.clone(),
                passed,
                total: ids.len(),
                rate: percentage(passed, ids.len()),
            }
        })
        .collect()
}

/// Latest record per student, "latest" being the greatest `date` string.
/// Records sharing a student and a date are not ordered further.
pub fn latest_per_student(records: &[SessionSnapshot]) -> BTreeMap<&str, &SessionSnapshot> {
    let mut latest: BTreeMap<&str, &SessionSnapshot> = BTreeMap::new();
    for record in records {
        latest
            .entry(record.student_name.as_str())
            .and_modify(|current| {
                if record.date > current.date {
                    *current = record;
                }
            })
            .or_insert(record);
    }
    latest
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CohortStats {
    pub total_students: usize,
    pub total_records: usize,
    pub finished: usize,
    pub in_progress: usize,
    /// Mean score over finished records only.
    pub average_score: f64,
}

pub fn cohort_stats(records: &[SessionSnapshot]) -> CohortStats {
    let total_students = latest_per_student(records).len();
    let finished_scores: Vec<f64> = records
        .iter()
        .filter(|record| record.is_finished)
        .map(|record| score(record).score)
        .collect();

    let average_score = if finished_scores.is_empty() {
        0.0
    } else {
        finished_scores.iter().sum::<f64>() / finished_scores.len() as f64
    };

    CohortStats {
        total_students,
        total_records: records.len(),
        finished: finished_scores.len(),
        in_progress: records.len() - finished_scores.len(),
        average_score,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryEntry {
    pub date: String,
    pub is_finished: bool,
    pub score: RecordScore,
}

/// Every record of `student_name`, newest date first, each scored alone.
pub fn history(records: &[SessionSnapshot], student_name: &str) -> Vec<HistoryEntry> {
    let mut own: Vec<&SessionSnapshot> = records
        .iter()
        .filter(|record| record.student_name == student_name)
        .collect();
    own.sort_by(|a, b| b.date.cmp(&a.date));

    own.into_iter()
        .map(|record| HistoryEntry {
            date: record.date.clone(),
            is_finished: record.is_finished,
            score: score(record),
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StudentSummary {
    pub name: String,
    pub latest_date: String,
    pub is_finished: bool,
    pub score: RecordScore,
    pub exit_events: usize,
    pub record_count: usize,
}

/// One row per student built from their latest record, optionally filtered
/// by a case-insensitive name fragment, newest first.
pub fn student_summaries(records: &[SessionSnapshot], search: Option<&str>) -> Vec<StudentSummary> {
    let needle = search
        .map(str::trim)
        .filter(|term| !term.is_empty())
        .map(str::to_lowercase);

    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for record in records {
        *counts.entry(record.student_name.as_str()).or_default() += 1;
    }

    let mut summaries: Vec<StudentSummary> = latest_per_student(records)
        .into_iter()
        .filter(|(name, _)| {
            needle
                .as_ref()
                .map_or(true, |needle| name.to_lowercase().contains(needle.as_str()))
        })
        .map(|(name, latest)| StudentSummary {
            name: name.to_string(),
            latest_date: latest.date.clone(),
            is_finished: latest.is_finished,
            score: score(latest),
            exit_events: latest.exit_events.len(),
            record_count: counts.get(name).copied().unwrap_or(0),
        })
        .collect();

    summaries.sort_by(|a, b| {
        b.latest_date
            .cmp(&a.latest_date)
            .then_with(|| a.name.cmp(&b.name))
    });
    summaries
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubmissionStats {
    pub total_submissions: u32,
    /// Mean attempt number of the first pass, over passing problems.
    pub average_first_pass: f64,
    /// Mean submission count over problems not currently passing.
    pub average_failed_submissions: f64,
}

fn mean(values: &[u32]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().map(|v| *v as f64).sum::<f64>() / values.len() as f64
    }
}

/// Submission statistics over the structured entries of a record. Legacy
/// entries carry no counts and are ignored.
pub fn submission_stats(record: &SessionSnapshot) -> SubmissionStats {
    let mut total_submissions = 0;
    let mut first_passes = Vec::new();
    let mut failed = Vec::new();

    for entry in record.solve_status.values().filter_map(StatusEntry::as_structured) {
        total_submissions += entry.submissions;
        if entry.status == SolveStatus::Pass {
            first_passes.push(entry.first_pass.unwrap_or(entry.submissions));
        } else {
            failed.push(entry.submissions);
        }
    }

    SubmissionStats {
        total_submissions,
        average_first_pass: mean(&first_passes),
        average_failed_submissions: mean(&failed),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProblemDetail {
    pub chapter: u32,
    pub chapter_name: String,
    pub problem: u32,
    pub status: SolveStatus,
    /// `None` for legacy entries, which never counted submissions.
    pub submissions: Option<u32>,
    pub first_pass: Option<u32>,
}

/// Per-problem status rows. Records with a sampled set list every sampled
/// problem of the catalog chapters, attempted or not; older records list
/// the attempt keys they contain.
pub fn problem_details(record: &SessionSnapshot, chapter_names: &[String]) -> Vec<ProblemDetail> {
    let detail = |key: AttemptKey, entry: Option<&StatusEntry>| {
        let (status, submissions, first_pass) = match entry {
            Some(StatusEntry::Structured(r)) => (r.status, Some(r.submissions), r.first_pass),
            Some(StatusEntry::Legacy(status)) => (*status, None, None),
            None => (SolveStatus::Unattempted, Some(0), None),
        };
        ProblemDetail {
            chapter: key.chapter,
            chapter_name: chapter_label(chapter_names, key.chapter),
            problem: key.problem,
            status,
            submissions,
            first_pass,
        }
    };

    match record.sampled() {
        Some(sampled) => (0..chapter_names.len() as u32)
            .flat_map(move |chapter| {
                sampled
                    .get(&chapter)
                    .into_iter()
                    .flatten()
                    .map(move |id| AttemptKey::new(chapter, *id))
            })
            .map(|key| detail(key, record.solve_status.get(&key)))
            .collect(),
        None => record
            .solve_status
            .iter()
            .map(|(key, entry)| detail(*key, Some(entry)))
            .collect(),
    }
}

/// Everything the detail view shows for one student.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StudentReport {
    pub name: String,
    pub date: String,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub is_finished: bool,
    pub exit_events: Vec<String>,
    pub score: RecordScore,
    pub chapters: Vec<ChapterScore>,
    pub submissions: SubmissionStats,
    pub problems: Vec<ProblemDetail>,
    pub history: Vec<HistoryEntry>,
}

/// Detail report built from the student's latest record, `None` when the
/// student has no record.
pub fn student_report(
    records: &[SessionSnapshot],
    student_name: &str,
    chapter_names: &[String],
) -> Option<StudentReport> {
    let latest = *latest_per_student(records).get(student_name)?;

    Some(StudentReport {
        name: latest.student_name.clone(),
        date: latest.date.clone(),
        start_time: latest.start_time.clone(),
        end_time: latest.end_time.clone(),
        is_finished: latest.is_finished,
        exit_events: latest.exit_events.clone(),
        score: score(latest),
        chapters: chapter_scores(latest, chapter_names),
        submissions: submission_stats(latest),
        problems: problem_details(latest, chapter_names),
        history: history(records, student_name),
    })
}
