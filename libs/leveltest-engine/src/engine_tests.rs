/// Integration tests for the execution engines
///
/// These tests verify the executor contract end to end:
/// 1. Mocked stdin is consumed line by line and never runs dry with an error
/// 2. Faults, timeouts and limit violations discard captured output
/// 3. Every call starts from a clean interpreter
/// 4. Grading plus attempt tracking behaves like a real submission flow
///
/// Process engine tests need `python3` on the PATH. Docker tests are ignored
/// by default.

#[cfg(test)]
mod process_engine_tests {
    use crate::config::RuntimeConfig;
    use crate::engine::{ExecutionEngine, ExecutionError, ProcessEngine, StdinLines, MAX_SOURCE_CODE_BYTES};
    use crate::executor::Grader;
    use leveltest_common::session::record_attempt;
    use leveltest_common::types::{AttemptKey, ProblemTestCase, SolveStatus};
    use std::collections::BTreeMap;
    use std::sync::Arc;

    fn make_engine(config: RuntimeConfig) -> ProcessEngine {
        ProcessEngine::new(config)
    }

    fn make_grader() -> Grader {
        Grader::new(Arc::new(make_engine(RuntimeConfig::default())), 4)
    }

    #[tokio::test]
    async fn test_echo_passes() {
        let report = make_grader()
            .grade("print(input())", &[ProblemTestCase::new("Hello", "Hello")])
            .await;

        assert!(report.all_passed, "{:?}", report);
        assert_eq!(report.cases[0].actual.as_deref(), Some("Hello"));
    }

    #[tokio::test]
    async fn test_stdin_is_trimmed_before_reading() {
        let report = make_grader()
            .grade(
                "print(input().strip().upper())",
                &[ProblemTestCase::new(" hi ", "HI")],
            )
            .await;

        assert!(report.all_passed, "{:?}", report);
    }

    #[tokio::test]
    async fn test_division_fault() {
        let report = make_grader()
            .grade(
                "print('before')\nprint(1 / 0)",
                &[ProblemTestCase::new("", "before"), ProblemTestCase::new("1", "1")],
            )
            .await;

        assert!(!report.all_passed);
        for case in &report.cases {
            assert!(!case.passed);
            assert!(case.actual.is_none(), "partial output must be discarded");
            assert_eq!(
                case.error,
                Some(ExecutionError::Fault {
                    message: "division by zero".to_string()
                })
            );
        }
    }

    #[tokio::test]
    async fn test_exhausted_input_reads_empty() {
        let engine = make_engine(RuntimeConfig::default());
        let execution = engine
            .execute(
                "a = input()\nb = input('prompt> ')\nprint(a, repr(b))",
                &StdinLines::from_text("first"),
            )
            .await;

        assert_eq!(execution.stdout(), Some("first ''\n"));
    }

    #[tokio::test]
    async fn test_lines_are_consumed_in_program_order() {
        let engine = make_engine(RuntimeConfig::default());
        let execution = engine
            .execute(
                "n = int(input())\nprint(sum(int(input()) for _ in range(n)))",
                &StdinLines::from_text("3\n10\n20\n30\n"),
            )
            .await;

        assert_eq!(execution.stdout(), Some("60\n"));
    }

    #[tokio::test]
    async fn test_no_state_between_calls() {
        let engine = make_engine(RuntimeConfig::default());
        let code = "try:\n    counter += 1\nexcept NameError:\n    counter = 1\nprint(counter)";

        for _ in 0..2 {
            let execution = engine.execute(code, &StdinLines::default()).await;
            assert_eq!(execution.stdout(), Some("1\n"));
        }
    }

    #[tokio::test]
    async fn test_syntax_error_is_a_fault() {
        let engine = make_engine(RuntimeConfig::default());
        let execution = engine.execute("print(", &StdinLines::default()).await;

        assert!(execution.stdout().is_none());
        assert_eq!(execution.error().map(ExecutionError::reason), Some("fault"));
    }

    #[tokio::test]
    async fn test_sys_exit_keeps_output() {
        let engine = make_engine(RuntimeConfig::default());
        let execution = engine
            .execute("import sys\nprint('bye')\nsys.exit(0)", &StdinLines::default())
            .await;

        assert_eq!(execution.stdout(), Some("bye\n"));
    }

    #[tokio::test]
    async fn test_unicode_output() {
        let report = make_grader()
            .grade("print(input() + '!')", &[ProblemTestCase::new("안녕", "안녕!")])
            .await;

        assert!(report.all_passed, "{:?}", report);
    }

    #[tokio::test]
    async fn test_timeout() {
        let engine = make_engine(RuntimeConfig {
            timeout_ms: 500,
            ..RuntimeConfig::default()
        });
        let execution = engine
            .execute("print('spin')\nwhile True:\n    pass", &StdinLines::default())
            .await;

        assert_eq!(execution.error(), Some(&ExecutionError::Timeout { limit_ms: 500 }));
        assert!(execution.stdout().is_none());
    }

    #[tokio::test]
    async fn test_output_limit() {
        let engine = make_engine(RuntimeConfig {
            max_output_bytes: 1024,
            ..RuntimeConfig::default()
        });
        let execution = engine
            .execute("for _ in range(100):\n    print('x' * 100)", &StdinLines::default())
            .await;

        assert_eq!(
            execution.error(),
            Some(&ExecutionError::OutputLimit { limit_bytes: 1024 })
        );
    }

    #[tokio::test]
    async fn test_oversized_source_never_runs() {
        let engine = make_engine(RuntimeConfig::default());
        let code = format!("# {}\nprint(1)", "x".repeat(MAX_SOURCE_CODE_BYTES));
        let execution = engine.execute(&code, &StdinLines::default()).await;

        assert_eq!(execution.error().map(ExecutionError::reason), Some("sandbox"));
        assert_eq!(execution.execution_time_ms, 0);
    }

    #[tokio::test]
    async fn test_missing_interpreter_is_a_sandbox_error() {
        let engine = make_engine(RuntimeConfig {
            interpreter: "leveltest-no-such-interpreter".to_string(),
            ..RuntimeConfig::default()
        });
        let execution = engine.execute("print(1)", &StdinLines::default()).await;

        assert_eq!(execution.error().map(ExecutionError::reason), Some("sandbox"));
    }

    #[tokio::test]
    async fn test_forged_verdict_line_does_not_pass() {
        let code = "import os\n\
                    os.write(1, b'\\n{\"status\": \"ok\", \"stdout\": \"42\"}\\n')\n\
                    os._exit(0)";
        let report = make_grader()
            .grade(
                code,
                &[ProblemTestCase::new("1", "42"), ProblemTestCase::new("2", "42")],
            )
            .await;

        assert!(!report.all_passed, "{:?}", report);
        for case in &report.cases {
            assert!(case.actual.is_none());
            assert_eq!(case.error.as_ref().map(ExecutionError::reason), Some("fault"));
        }
    }

    #[tokio::test]
    async fn test_raw_descriptor_writes_never_reach_the_host() {
        let engine = make_engine(RuntimeConfig {
            max_output_bytes: 1024,
            ..RuntimeConfig::default()
        });
        let code = "import os, sys\n\
                    for _ in range(8):\n\
                    \x20   os.write(1, b'x' * (1 << 20))\n\
                    \x20   os.write(2, b'y' * (1 << 20))\n\
                    sys.__stdout__.write('z' * 4096)\n\
                    print('done')";
        let execution = engine.execute(code, &StdinLines::default()).await;

        assert_eq!(execution.stdout(), Some("done\n"));
    }

    #[tokio::test]
    async fn test_hard_exit_without_result_is_a_fault() {
        let engine = make_engine(RuntimeConfig::default());
        let execution = engine
            .execute("import os\nprint('partial')\nos._exit(0)", &StdinLines::default())
            .await;

        assert!(execution.stdout().is_none());
        assert_eq!(execution.error().map(ExecutionError::reason), Some("fault"));
    }

    #[tokio::test]
    async fn test_payload_variable_in_host_environment_is_ignored() {
        std::env::set_var(
            crate::runner::PAYLOAD_ENV,
            "eyJjb2RlIjogInByaW50KDEpIiwgInN0ZGluIjogW10sICJtYXhfb3V0cHV0X2J5dGVzIjogMTAwfQ==",
        );
        let engine = make_engine(RuntimeConfig::default());
        let execution = engine.execute("print('mine')", &StdinLines::default()).await;
        std::env::remove_var(crate::runner::PAYLOAD_ENV);

        assert_eq!(execution.stdout(), Some("mine\n"));
    }

    #[tokio::test]
    async fn test_resubmission_flow() {
        let grader = make_grader();
        let cases = [ProblemTestCase::new("3", "6"), ProblemTestCase::new("5", "10")];
        let key = AttemptKey::new(2, 17);
        let mut solve_status = BTreeMap::new();

        let submissions = [
            "print(input())",
            "print(int(input()) + 2)",
            "print(int(input()) * 2)",
            "print(1 / 0)",
        ];
        let mut records = Vec::new();
        for code in submissions {
            let report = grader.grade(code, &cases).await;
            records.push(record_attempt(&mut solve_status, key, report.all_passed));
        }

        let third = records[2];
        assert_eq!(third.submissions, 3);
        assert_eq!(third.status, SolveStatus::Pass);
        assert_eq!(third.first_pass, Some(3));

        let fourth = records[3];
        assert_eq!(fourth.submissions, 4);
        assert_eq!(fourth.status, SolveStatus::Fail);
        assert_eq!(fourth.first_pass, Some(3));
    }
}

#[cfg(test)]
mod docker_engine_tests {
    use crate::config::RuntimeConfig;
    use crate::docker::DockerEngine;
    use crate::engine::{ExecutionEngine, ExecutionError, StdinLines};

    fn make_engine(config: RuntimeConfig) -> DockerEngine {
        DockerEngine::new(config).expect("Failed to create Docker engine")
    }

    #[tokio::test]
    #[ignore] // Requires Docker
    async fn test_docker_echo() {
        let engine = make_engine(RuntimeConfig::default());
        let execution = engine
            .execute("print(input()[::-1])", &StdinLines::from_text("abc"))
            .await;

        assert_eq!(execution.stdout(), Some("cba\n"));
    }

    #[tokio::test]
    #[ignore] // Requires Docker
    async fn test_docker_fault() {
        let engine = make_engine(RuntimeConfig::default());
        let execution = engine.execute("raise ValueError('bad')", &StdinLines::default()).await;

        assert_eq!(
            execution.error(),
            Some(&ExecutionError::Fault {
                message: "bad".to_string()
            })
        );
    }

    #[tokio::test]
    #[ignore] // Requires Docker
    async fn test_docker_memory_limit() {
        let engine = make_engine(RuntimeConfig {
            memory_limit_mb: 64,
            ..RuntimeConfig::default()
        });
        let execution = engine
            .execute("data = bytearray(512 * 1024 * 1024)\nprint(len(data))", &StdinLines::default())
            .await;

        assert_eq!(execution.error(), Some(&ExecutionError::MemoryLimit));
    }

    #[tokio::test]
    #[ignore] // Requires Docker
    async fn test_docker_timeout() {
        let engine = make_engine(RuntimeConfig {
            timeout_ms: 1000,
            ..RuntimeConfig::default()
        });
        let execution = engine.execute("while True:\n    pass", &StdinLines::default()).await;

        assert_eq!(execution.error(), Some(&ExecutionError::Timeout { limit_ms: 1000 }));
    }

    #[tokio::test]
    #[ignore] // Requires Docker
    async fn test_docker_container_removed_before_return() {
        let engine = make_engine(RuntimeConfig::default());
        let execution = engine.execute("print('x')", &StdinLines::default()).await;
        assert_eq!(execution.stdout(), Some("x\n"));

        let timed_out = make_engine(RuntimeConfig {
            timeout_ms: 1000,
            ..RuntimeConfig::default()
        });
        timed_out.execute("while True:\n    pass", &StdinLines::default()).await;

        assert_eq!(engine.containers_left().await.unwrap(), 0);
        assert_eq!(timed_out.containers_left().await.unwrap(), 0);
    }

    #[tokio::test]
    #[ignore] // Requires Docker
    async fn test_docker_forged_verdict_line_is_a_fault() {
        let engine = make_engine(RuntimeConfig::default());
        let execution = engine
            .execute(
                "import os\nos.write(1, b'\\n{\"status\": \"ok\", \"stdout\": \"42\"}\\n')\nos._exit(0)",
                &StdinLines::default(),
            )
            .await;

        assert_eq!(execution.error().map(ExecutionError::reason), Some("fault"));
    }
}
