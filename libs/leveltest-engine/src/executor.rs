//! Grader - High-Level Orchestration
//!
//! **Architecture:**
//! 1. Run the submission once per test case with an [`ExecutionEngine`]
//! 2. Judge each capture with the evaluator
//! 3. Return the aggregated [`GradeReport`]
//!
//! Cases are independent executions and may run concurrently; the report
//! always lists them in test-case order and always covers every case.

use anyhow::Result;
use futures_util::stream::{self, StreamExt};
use leveltest_common::types::{ProblemRecord, ProblemTestCase, NO_EXAMPLE};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::{EngineBackend, RuntimeConfig};
use crate::engine::{build_engine, Execution, ExecutionEngine, StdinLines};
use crate::evaluator::{self, GradeReport, GradingMode};

pub struct Grader {
    engine: Arc<dyn ExecutionEngine>,
    max_parallel_cases: usize,
}

impl Grader {
    pub fn new(engine: Arc<dyn ExecutionEngine>, max_parallel_cases: usize) -> Self {
        Self {
            engine,
            max_parallel_cases: max_parallel_cases.max(1),
        }
    }

    pub fn from_config(backend: EngineBackend, config: &RuntimeConfig) -> Result<Self> {
        Ok(Self::new(build_engine(backend, config)?, config.max_parallel_cases))
    }

    pub fn engine_name(&self) -> &'static str {
        self.engine.name()
    }

    /// Run code once against the given stdin, without judging it
    pub async fn execute(&self, code: &str, stdin: &StdinLines) -> Execution {
        self.engine.execute(code, stdin).await
    }

    /// Grade code against every test case. An empty list is graded as a
    /// legacy example without an expected output, which never passes.
    pub async fn grade(&self, code: &str, test_cases: &[ProblemTestCase]) -> GradeReport {
        if test_cases.is_empty() {
            return self.grade_legacy(code, "", None).await;
        }

        info!(
            engine = self.engine.name(),
            test_cases = test_cases.len(),
            source_size = code.len(),
            "Grading submission"
        );

        let cases = stream::iter(test_cases.iter().enumerate())
            .map(|(idx, test_case)| async move {
                let stdin = StdinLines::from_text(&test_case.input);
                let execution = self.engine.execute(code, &stdin).await;
                evaluator::evaluate_case(idx + 1, test_case, &execution)
            })
            .buffered(self.max_parallel_cases)
            .collect::<Vec<_>>()
            .await;

        for case in &cases {
            match &case.error {
                Some(error) => warn!(
                    case = case.index,
                    reason = error.reason(),
                    execution_ms = case.execution_time_ms,
                    "Case failed to execute"
                ),
                None => debug!(
                    case = case.index,
                    passed = case.passed,
                    execution_ms = case.execution_time_ms,
                    "Case evaluated"
                ),
            }
        }

        let report = evaluator::aggregate(GradingMode::TestCases, true, cases);
        info!(
            all_passed = report.all_passed,
            passed = report.passed_count(),
            total = report.total(),
            "Grading completed"
        );
        report
    }

    /// Single execution compared against a problem's example output
    pub async fn grade_legacy(&self, code: &str, input: &str, expected: Option<&str>) -> GradeReport {
        let gradable = evaluator::is_comparable_example(expected);
        if !gradable {
            debug!("Legacy example has no comparable output");
        }

        let execution = self.engine.execute(code, &StdinLines::from_text(input)).await;
        let case = evaluator::evaluate_legacy(input, expected, &execution);
        let report = evaluator::aggregate(GradingMode::LegacyExample, gradable, vec![case]);

        info!(
            all_passed = report.all_passed,
            gradable,
            "Legacy example graded"
        );
        report
    }

    /// Grade a bank problem: its test cases when it has any, otherwise its
    /// example pair. `user_stdin` replaces the example input on the legacy
    /// path.
    pub async fn grade_problem(
        &self,
        code: &str,
        problem: &ProblemRecord,
        user_stdin: Option<&str>,
    ) -> GradeReport {
        if problem.has_test_cases() {
            return self.grade(code, &problem.test_cases).await;
        }

        let example_input = problem
            .example_input
            .as_deref()
            .filter(|input| input.trim() != NO_EXAMPLE);
        let input = user_stdin.or(example_input).unwrap_or("");

        self.grade_legacy(code, input, problem.example_output.as_deref())
            .await
    }
}
