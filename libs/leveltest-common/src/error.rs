use std::path::PathBuf;

/// Errors surfaced by the session, problem bank and result store.
///
/// Grading faults are not represented here: a crashing submission is a
/// per-case diagnostic, never an error of the surrounding operation.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Requested problem is not part of the bank (content error).
    #[error("problem {problem} of chapter {chapter} is unavailable")]
    ProblemUnavailable { chapter: u32, problem: u32 },

    #[error("chapter {chapter} is unavailable: {reason}")]
    ChapterUnavailable { chapter: u32, reason: String },

    #[error("invalid student name: {0:?}")]
    InvalidStudentName(String),

    #[error("session of {0} is already finished")]
    SessionFinished(String),

    #[error("failed to persist {path}: {source}")]
    Persist {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration in {path}: {reason}")]
    Config { path: PathBuf, reason: String },

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
