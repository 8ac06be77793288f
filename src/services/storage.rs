//! Shared filesystem layout.
//!
//! A single configurable root is mounted on both nodes:
//!
//! ```text
//! <root>/
//!   uploads/<company_id>/<uuid>/<filename>.pdf
//!   projects/<company_id>/analysis/<deck_slug>/slide_{N}.jpg
//!   results/job_{deck_id}_{epoch}_results.json
//! ```
//!
//! All writes are write-to-temp-then-rename so readers on the other node
//! never observe a partial file. Directories are created lazily.

use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::utils::{ApiError, ApiResult};

/// Path helper over the shared storage root.
#[derive(Debug, Clone)]
pub struct SharedStorage {
    root: PathBuf,
}

impl SharedStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Reject path components that would escape the shared root.
    fn validate_component(value: &str, what: &str) -> ApiResult<()> {
        if value.is_empty()
            || value.contains("..")
            || value.contains('/')
            || value.contains('\\')
        {
            return Err(ApiError::invalid_input(format!("invalid {}: {:?}", what, value)));
        }
        Ok(())
    }

    /// Target path for a freshly uploaded PDF; allocates a new uuid directory.
    pub fn upload_path(&self, company_id: &str, filename: &str) -> ApiResult<PathBuf> {
        Self::validate_component(company_id, "company_id")?;
        Self::validate_component(filename, "filename")?;
        Ok(self
            .root
            .join("uploads")
            .join(company_id)
            .join(Uuid::new_v4().to_string())
            .join(filename))
    }

    /// Slide image directory for a deck.
    pub fn slide_dir(&self, company_id: &str, deck_slug: &str) -> ApiResult<PathBuf> {
        Self::validate_component(company_id, "company_id")?;
        Self::validate_component(deck_slug, "deck_slug")?;
        Ok(self
            .root
            .join("projects")
            .join(company_id)
            .join("analysis")
            .join(deck_slug))
    }

    /// Absolute path of slide N (1-indexed) for a deck.
    pub fn slide_path(&self, company_id: &str, deck_slug: &str, page_number: usize) -> ApiResult<PathBuf> {
        Ok(self.slide_dir(company_id, deck_slug)?.join(format!("slide_{}.jpg", page_number)))
    }

    /// Slide path relative to the project directory, as stored in results.
    pub fn slide_relative_path(deck_slug: &str, page_number: usize) -> String {
        format!("analysis/{}/slide_{}.jpg", deck_slug, page_number)
    }

    /// Result file path for a deck; epoch is seconds since the Unix epoch.
    pub fn result_path(&self, deck_id: i64, epoch: i64) -> PathBuf {
        self.root
            .join("results")
            .join(format!("job_{}_{}_results.json", deck_id, epoch))
    }

    /// Result file path relative to the shared root, as stored on Deck rows.
    pub fn result_relative_path(deck_id: i64, epoch: i64) -> String {
        format!("results/job_{}_{}_results.json", deck_id, epoch)
    }

    pub fn results_dir(&self) -> PathBuf {
        self.root.join("results")
    }

    /// Resolve a path stored relative to the shared root.
    pub fn resolve(&self, relative: &str) -> ApiResult<PathBuf> {
        if relative.contains("..") {
            return Err(ApiError::invalid_input(format!("invalid relative path: {:?}", relative)));
        }
        Ok(self.root.join(relative.trim_start_matches('/')))
    }

    /// Write bytes atomically: create the parent, write to a temp sibling,
    /// then rename over the target.
    pub fn write_atomic(&self, path: &Path, bytes: &[u8]) -> ApiResult<()> {
        let parent = path
            .parent()
            .ok_or_else(|| ApiError::storage_error(format!("no parent for {:?}", path)))?;
        std::fs::create_dir_all(parent)
            .map_err(|e| ApiError::storage_error(format!("create {:?}: {}", parent, e)))?;

        let tmp = parent.join(format!(
            ".{}.tmp-{}",
            path.file_name().and_then(|n| n.to_str()).unwrap_or("file"),
            Uuid::new_v4()
        ));
        std::fs::write(&tmp, bytes)
            .map_err(|e| ApiError::storage_error(format!("write {:?}: {}", tmp, e)))?;
        std::fs::rename(&tmp, path).map_err(|e| {
            let _ = std::fs::remove_file(&tmp);
            ApiError::storage_error(format!("rename {:?} -> {:?}: {}", tmp, path, e))
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_paths_follow_convention() {
        let storage = SharedStorage::new("/mnt/shared");

        let slide = storage.slide_path("ismaning", "DeckA", 3).unwrap();
        assert_eq!(slide, PathBuf::from("/mnt/shared/projects/ismaning/analysis/DeckA/slide_3.jpg"));

        assert_eq!(SharedStorage::slide_relative_path("DeckA", 3), "analysis/DeckA/slide_3.jpg");

        let result = storage.result_path(42, 1700000000);
        assert_eq!(result, PathBuf::from("/mnt/shared/results/job_42_1700000000_results.json"));
    }

    #[test]
    fn traversal_components_are_rejected() {
        let storage = SharedStorage::new("/mnt/shared");
        assert!(storage.slide_dir("../etc", "deck").is_err());
        assert!(storage.slide_dir("acme", "a/b").is_err());
        assert!(storage.upload_path("acme", "..").is_err());
        assert!(storage.resolve("../outside").is_err());
    }

    #[test]
    fn write_atomic_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let storage = SharedStorage::new(dir.path());
        let target = dir.path().join("results").join("job_1_2_results.json");

        storage.write_atomic(&target, b"{}").unwrap();
        assert_eq!(std::fs::read(&target).unwrap(), b"{}");

        let leftovers: Vec<_> = std::fs::read_dir(target.parent().unwrap())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .filter(|n| n.to_string_lossy().contains("tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn write_atomic_overwrites_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let storage = SharedStorage::new(dir.path());
        let target = dir.path().join("file.json");

        storage.write_atomic(&target, b"first").unwrap();
        storage.write_atomic(&target, b"second").unwrap();
        assert_eq!(std::fs::read(&target).unwrap(), b"second");
    }
}
