//! Tag planner
//!
//! Pure, deterministic derivation of image tags from build metadata.

use ferry_core::domain::tag::{TagSet, is_valid_repository};

use crate::error::TagError;

/// Tag applied when the "latest" policy is enabled
pub const LATEST_TAG: &str = "latest";

/// Default number of commit characters kept in the commit tag
pub const DEFAULT_SHORT_SHA_LEN: usize = 7;

/// Plans the tag set of a release
#[derive(Debug, Clone, Copy)]
pub struct TagPlanner {
    short_sha_len: usize,
}

impl Default for TagPlanner {
    fn default() -> Self {
        Self::new(DEFAULT_SHORT_SHA_LEN)
    }
}

impl TagPlanner {
    /// # Arguments
    /// * `short_sha_len` - Commit characters kept in the commit tag (at least 1)
    pub fn new(short_sha_len: usize) -> Self {
        Self {
            short_sha_len: short_sha_len.max(1),
        }
    }

    /// Plans tags for `repository` at `commit`
    ///
    /// Yields `latest` first when `latest` is set, then the (shortened,
    /// lowercased) commit identifier. A missing commit is an error: the
    /// commit tag is never silently dropped.
    pub fn plan(
        &self,
        repository: &str,
        commit: Option<&str>,
        latest: bool,
    ) -> Result<TagSet, TagError> {
        if !is_valid_repository(repository) {
            return Err(TagError::InvalidRepository(repository.to_string()));
        }

        let commit = commit
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .ok_or(TagError::MissingProvenance)?;

        if !commit.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(TagError::InvalidCommit(commit.to_string()));
        }

        let short: String = commit
            .chars()
            .take(self.short_sha_len)
            .collect::<String>()
            .to_ascii_lowercase();

        let mut tags = Vec::with_capacity(2);
        if latest {
            tags.push(LATEST_TAG.to_string());
        }
        tags.push(short);

        Ok(TagSet::new(repository, tags)?)
    }
}
