// Application configuration: where records and problems live, and the
// chapter catalog a session samples from.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

pub const DEFAULT_CONFIG_PATH: &str = "config/leveltest.json";
pub const DEFAULT_PROBLEMS_PER_CHAPTER: usize = 10;
pub const DEFAULT_POOL_SIZE: u32 = 100;

const DEFAULT_CHAPTERS: [&str; 19] = [
    "Output",
    "Variables and Input",
    "Operators",
    "Strings 1",
    "Lists 1",
    "Conditionals",
    "Debugging",
    "Loops 1",
    "Loops 2",
    "Loops 3",
    "Strings 2",
    "Lists 2",
    "Lists 3",
    "Other Data Types",
    "Functions 1",
    "Functions 2",
    "Functions 3 - Recursion",
    "Classes",
    "File Input and Output",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChapterInfo {
    pub name: String,
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,
}

fn default_pool_size() -> u32 {
    DEFAULT_POOL_SIZE
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub results_dir: PathBuf,
    pub problems_dir: PathBuf,
    pub problems_per_chapter: usize,
    pub chapters: Vec<ChapterInfo>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            results_dir: PathBuf::from("results"),
            problems_dir: PathBuf::from("problems"),
            problems_per_chapter: DEFAULT_PROBLEMS_PER_CHAPTER,
            chapters: DEFAULT_CHAPTERS
                .iter()
                .map(|name| ChapterInfo {
                    name: name.to_string(),
                    pool_size: DEFAULT_POOL_SIZE,
                })
                .collect(),
        }
    }
}

impl Config {
    /// Load from a JSON file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path).map_err(|source| Error::Read {
            path: path.to_path_buf(),
            source,
        })?;

        serde_json::from_str(&content).map_err(|e| Error::Config {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Load the default file, then apply environment overrides
    pub fn load_default() -> Result<Self> {
        let mut config = Self::load(Path::new(DEFAULT_CONFIG_PATH))?;
        config.apply_env();
        Ok(config)
    }

    /// `LEVELTEST_RESULTS_DIR`, `LEVELTEST_PROBLEMS_DIR` and
    /// `LEVELTEST_PROBLEMS_PER_CHAPTER` override file values.
    pub fn apply_env(&mut self) {
        if let Ok(dir) = std::env::var("LEVELTEST_RESULTS_DIR") {
            self.results_dir = PathBuf::from(dir);
        }
        if let Ok(dir) = std::env::var("LEVELTEST_PROBLEMS_DIR") {
            self.problems_dir = PathBuf::from(dir);
        }
        if let Some(count) = std::env::var("LEVELTEST_PROBLEMS_PER_CHAPTER")
            .ok()
            .and_then(|value| value.parse().ok())
        {
            self.problems_per_chapter = count;
        }
    }

    pub fn chapter(&self, index: u32) -> Option<&ChapterInfo> {
        self.chapters.get(index as usize)
    }

    pub fn chapter_name(&self, index: u32) -> String {
        self.chapter(index)
            .map(|chapter| chapter.name.clone())
            .unwrap_or_else(|| format!("Chapter {}", index))
    }

    pub fn chapter_names(&self) -> Vec<String> {
        self.chapters.iter().map(|chapter| chapter.name.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.chapters.len(), 19);
        assert_eq!(config.problems_per_chapter, 10);
        assert!(config.chapters.iter().all(|c| c.pool_size == 100));
        assert_eq!(config.chapter_name(0), "Output");
        assert_eq!(config.chapter_name(42), "Chapter 42");
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(&dir.path().join("absent.json")).unwrap();
        assert_eq!(config.results_dir, PathBuf::from("results"));
    }

    #[test]
    fn test_load_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("leveltest.json");
        fs::write(
            &path,
            r#"{"problems_per_chapter": 3, "chapters": [{"name": "Basics"}, {"name": "Loops", "pool_size": 20}]}"#,
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.problems_per_chapter, 3);
        assert_eq!(config.chapters[0].pool_size, 100);
        assert_eq!(config.chapters[1].pool_size, 20);
        assert_eq!(config.problems_dir, PathBuf::from("problems"));
    }

    #[test]
    fn test_load_malformed_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("leveltest.json");
        fs::write(&path, "{ not json").unwrap();

        assert!(matches!(Config::load(&path), Err(Error::Config { .. })));
    }
}
