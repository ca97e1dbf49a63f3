//! Test Evaluator - Output Comparison and Verdicts
//!
//! **Critical Properties:**
//! - Knows nothing about processes or containers
//! - Knows nothing about sessions or persistence
//! - Pure function: (execution, expected output) → case verdict
//!
//! **Normalization Rules:**
//! - Trim leading and trailing whitespace
//! - Unify line endings (`\r\n` and `\r` become `\n`)
//! - Case sensitive, internal whitespace preserved
//!
//! A case with an execution error never passes and has no actual output.

use leveltest_common::types::{ProblemTestCase, NO_EXAMPLE};
use serde::Serialize;

use crate::engine::{Execution, ExecutionError};

/// Canonical form of an output for comparison. `None` becomes empty text.
pub fn normalize(output: Option<&str>) -> String {
    match output {
        None => String::new(),
        Some(text) => text.trim().replace("\r\n", "\n").replace('\r', "\n"),
    }
}

/// Verdict for one executed case
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CaseResult {
    /// 1-based position in the test-case list
    pub index: usize,
    pub passed: bool,
    pub error: Option<ExecutionError>,
    pub input: String,
    /// Normalized expected output
    pub expected: String,
    /// Normalized actual output, `None` when execution failed
    pub actual: Option<String>,
    pub execution_time_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GradingMode {
    TestCases,
    LegacyExample,
}

/// Complete diagnostic report of one grading call
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GradeReport {
    pub all_passed: bool,
    pub mode: GradingMode,
    /// False when a legacy problem has no usable example output, so the
    /// attempt cannot be judged at all
    pub gradable: bool,
    pub cases: Vec<CaseResult>,
}

impl GradeReport {
    pub fn passed_count(&self) -> usize {
        self.cases.iter().filter(|case| case.passed).count()
    }

    pub fn total(&self) -> usize {
        self.cases.len()
    }

    /// Whether this grading counts as a submission. An ungradable example
    /// never does, and neither does an example run that failed to execute:
    /// the error is shown and the student tries again.
    pub fn counts_as_attempt(&self) -> bool {
        match self.mode {
            GradingMode::TestCases => self.gradable,
            GradingMode::LegacyExample => {
                self.gradable && self.cases.iter().all(|case| case.error.is_none())
            }
        }
    }
}

fn verdict(index: usize, input: &str, expected: String, execution: &Execution, comparable: bool) -> CaseResult {
    let (actual, error) = match &execution.outcome {
        Ok(stdout) => (Some(normalize(Some(stdout.as_str()))), None),
        Err(e) => (None, Some(e.clone())),
    };
    let passed = comparable && actual.as_deref() == Some(expected.as_str());

    CaseResult {
        index,
        passed,
        error,
        input: input.to_string(),
        expected,
        actual,
        execution_time_ms: execution.execution_time_ms,
    }
}

/// Evaluate one structured test case
pub fn evaluate_case(index: usize, test_case: &ProblemTestCase, execution: &Execution) -> CaseResult {
    let expected = normalize(Some(test_case.output.as_str()));
    verdict(index, &test_case.input, expected, execution, true)
}

/// Whether a legacy example output can be compared against at all
pub fn is_comparable_example(expected: Option<&str>) -> bool {
    let expected = normalize(expected);
    !expected.is_empty() && expected != NO_EXAMPLE
}

/// Evaluate the single legacy example comparison. Passing requires a
/// non-empty expected output that is not the "no example" sentinel.
pub fn evaluate_legacy(input: &str, expected: Option<&str>, execution: &Execution) -> CaseResult {
    let comparable = is_comparable_example(expected);
    verdict(1, input, normalize(expected), execution, comparable)
}

/// Fold case verdicts into a report. `all_passed` is false for an empty list.
pub fn aggregate(mode: GradingMode, gradable: bool, cases: Vec<CaseResult>) -> GradeReport {
    let all_passed = gradable && !cases.is_empty() && cases.iter().all(|case| case.passed);
    GradeReport {
        all_passed,
        mode,
        gradable,
        cases,
    }
}
