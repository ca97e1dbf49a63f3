use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::config::ChapterInfo;
use crate::error::{Error, Result};
use crate::types::{Chapter, ProblemRecord};

/// File name of a chapter in the bank, e.g. `01_Output.json`
pub fn chapter_file_name(index: u32, name: &str) -> String {
    format!("{:02}_{}.json", index + 1, name)
}

/// Read-only view over the externally authored problem files.
#[derive(Debug, Clone)]
pub struct ProblemBank {
    root: PathBuf,
    chapters: Vec<ChapterInfo>,
}

impl ProblemBank {
    pub fn new(root: impl Into<PathBuf>, chapters: Vec<ChapterInfo>) -> Self {
        Self {
            root: root.into(),
            chapters,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn chapters(&self) -> &[ChapterInfo] {
        &self.chapters
    }

    pub fn load_chapter(&self, index: u32) -> Result<Chapter> {
        let info = self
            .chapters
            .get(index as usize)
            .ok_or_else(|| Error::ChapterUnavailable {
                chapter: index,
                reason: "not in the chapter catalog".to_string(),
            })?;

        let path = self.root.join(chapter_file_name(index, &info.name));
        let unavailable = |reason: String| Error::ChapterUnavailable {
            chapter: index,
            reason,
        };

        let content = fs::read_to_string(&path)
            .map_err(|e| unavailable(format!("{}: {}", path.display(), e)))?;
        let mut chapter: Chapter = serde_json::from_str(&content)
            .map_err(|e| unavailable(format!("{}: {}", path.display(), e)))?;

        if chapter.chapter_name.is_empty() {
            chapter.chapter_name = info.name.clone();
        }

        debug!(chapter = index, problems = chapter.problems.len(), "Chapter loaded");
        Ok(chapter)
    }

    /// Look up one problem. A missing or unreadable chapter file reports the
    /// problem as unavailable, same as an unknown id.
    pub fn problem(&self, chapter: u32, problem: u32) -> Result<ProblemRecord> {
        let unavailable = || Error::ProblemUnavailable { chapter, problem };

        let loaded = self.load_chapter(chapter).map_err(|_| unavailable())?;
        loaded
            .problems
            .into_iter()
            .find(|p| p.id == problem)
            .ok_or_else(unavailable)
    }
}
