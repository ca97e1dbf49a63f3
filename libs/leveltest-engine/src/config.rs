// Runtime configuration for the execution engines
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;

pub const DEFAULT_RUNTIME_PATH: &str = "config/runtime.json";

/// Limits and interpreter settings shared by every backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Interpreter the process backend spawns
    pub interpreter: String,
    /// Image the docker backend runs, must provide `python3`
    pub image: String,
    pub timeout_ms: u64,
    pub memory_limit_mb: u32,
    pub cpu_limit: f32,
    pub max_output_bytes: usize,
    pub max_parallel_cases: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            interpreter: "python3".to_string(),
            image: "python:3.12-slim".to_string(),
            timeout_ms: 5000,
            memory_limit_mb: 256,
            cpu_limit: 0.5,
            max_output_bytes: 1024 * 1024,
            max_parallel_cases: 4,
        }
    }
}

impl RuntimeConfig {
    /// Load runtime settings from a JSON file. A missing file yields defaults.
    pub fn load(config_path: &Path) -> Result<Self> {
        if !config_path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read {}", config_path.display()))?;

        let config: RuntimeConfig = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {}", config_path.display()))?;

        if config.timeout_ms == 0 {
            bail!("timeout_ms must be positive in {}", config_path.display());
        }
        if config.max_parallel_cases == 0 {
            bail!("max_parallel_cases must be positive in {}", config_path.display());
        }

        Ok(config)
    }

    /// Load with default path (config/runtime.json)
    pub fn load_default() -> Result<Self> {
        Self::load(Path::new(DEFAULT_RUNTIME_PATH))
    }

    pub fn memory_limit_bytes(&self) -> i64 {
        (self.memory_limit_mb as i64) * 1024 * 1024
    }

    pub fn nano_cpus(&self) -> i64 {
        (self.cpu_limit as f64 * 1_000_000_000.0) as i64
    }
}

/// Which sandbox runs submissions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum EngineBackend {
    #[default]
    Process,
    Docker,
}

impl EngineBackend {
    /// Read `LEVELTEST_ENGINE`, falling back to the process backend.
    pub fn from_env() -> Result<Self> {
        match std::env::var("LEVELTEST_ENGINE") {
            Ok(value) => value.parse(),
            Err(_) => Ok(Self::default()),
        }
    }
}

impl FromStr for EngineBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "process" => Ok(EngineBackend::Process),
            "docker" => Ok(EngineBackend::Docker),
            other => bail!("Unknown engine backend: {} (valid: process, docker)", other),
        }
    }
}

impl fmt::Display for EngineBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineBackend::Process => write!(f, "process"),
            EngineBackend::Docker => write!(f, "docker"),
        }
    }
}
