pub mod config;
pub mod docker;
pub mod engine;
pub mod evaluator;
pub mod executor;
pub mod runner;

mod engine_tests;

pub use config::{EngineBackend, RuntimeConfig};
pub use engine::{Execution, ExecutionEngine, ExecutionError, StdinLines};
pub use evaluator::{CaseResult, GradeReport, GradingMode};
pub use executor::Grader;
