//! Tag domain types

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Maximum length of an image tag
pub const MAX_TAG_LEN: usize = 128;

/// Violations of the TagSet invariants
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TagSetError {
    #[error("a tag set needs at least one tag")]
    Empty,

    #[error("duplicate tag '{0}'")]
    Duplicate(String),

    #[error("invalid tag '{0}'")]
    InvalidTag(String),
}

/// Ordered, non-empty set of unique tags for one image repository
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawTagSet", into = "RawTagSet")]
pub struct TagSet {
    repository: String,
    tags: Vec<String>,
}

impl TagSet {
    /// Builds a tag set, enforcing order-preserving uniqueness and tag grammar
    pub fn new(repository: impl Into<String>, tags: Vec<String>) -> Result<Self, TagSetError> {
        if tags.is_empty() {
            return Err(TagSetError::Empty);
        }

        for (idx, tag) in tags.iter().enumerate() {
            if !is_valid_tag(tag) {
                return Err(TagSetError::InvalidTag(tag.clone()));
            }
            if tags[..idx].contains(tag) {
                return Err(TagSetError::Duplicate(tag.clone()));
            }
        }

        Ok(Self {
            repository: repository.into(),
            tags,
        })
    }

    pub fn repository(&self) -> &str {
        &self.repository
    }

    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    pub fn len(&self) -> usize {
        self.tags.len()
    }

    /// Always false; kept for API symmetry with `len`
    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }

    /// The most specific tag (the last one planned), used for deployment
    pub fn primary(&self) -> &str {
        // Non-empty by construction
        self.tags.last().map(String::as_str).unwrap_or_default()
    }

    /// Fully qualified references for every tag under `registry`
    pub fn references(&self, registry: &str) -> Vec<ImageReference> {
        self.tags
            .iter()
            .map(|tag| ImageReference::new(registry, &self.repository, tag))
            .collect()
    }
}

#[derive(Serialize, Deserialize)]
struct RawTagSet {
    repository: String,
    tags: Vec<String>,
}

impl TryFrom<RawTagSet> for TagSet {
    type Error = TagSetError;

    fn try_from(raw: RawTagSet) -> Result<Self, Self::Error> {
        TagSet::new(raw.repository, raw.tags)
    }
}

impl From<TagSet> for RawTagSet {
    fn from(set: TagSet) -> Self {
        Self {
            repository: set.repository,
            tags: set.tags,
        }
    }
}

/// A `registry/repository:tag` image reference
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageReference {
    /// Registry host, empty for the backend's default registry
    pub registry: String,
    pub repository: String,
    pub tag: String,
}

impl ImageReference {
    pub fn new(registry: &str, repository: &str, tag: &str) -> Self {
        Self {
            registry: registry.trim_end_matches('/').to_string(),
            repository: repository.to_string(),
            tag: tag.to_string(),
        }
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.registry.is_empty() {
            write!(f, "{}:{}", self.repository, self.tag)
        } else {
            write!(f, "{}/{}:{}", self.registry, self.repository, self.tag)
        }
    }
}

/// Checks a tag against `[A-Za-z0-9_][A-Za-z0-9_.-]{0,127}`
pub fn is_valid_tag(tag: &str) -> bool {
    let mut chars = tag.chars();
    let Some(first) = chars.next() else {
        return false;
    };

    tag.len() <= MAX_TAG_LEN
        && (first.is_ascii_alphanumeric() || first == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
}

/// Checks a repository path: lowercase `/`-separated components of
/// alphanumerics joined by `.`, `_` or `-`
pub fn is_valid_repository(repository: &str) -> bool {
    !repository.is_empty()
        && repository.split('/').all(|component| {
            let bytes = component.as_bytes();
            !bytes.is_empty()
                && bytes[0].is_ascii_alphanumeric()
                && bytes[bytes.len() - 1].is_ascii_alphanumeric()
                && component
                    .chars()
                    .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '.' | '_' | '-'))
        })
}

/// Outcome of publishing one tag
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagOutcome {
    pub tag: String,
    pub reference: String,
    pub attempts: u32,
    pub error: Option<String>,
}

impl TagOutcome {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_set_rejects_empty() {
        assert_eq!(TagSet::new("app", vec![]), Err(TagSetError::Empty));
    }

    #[test]
    fn test_tag_set_rejects_duplicates() {
        let result = TagSet::new("app", vec!["latest".into(), "latest".into()]);
        assert_eq!(result, Err(TagSetError::Duplicate("latest".into())));
    }

    #[test]
    fn test_tag_set_keeps_order() {
        let set = TagSet::new("app", vec!["latest".into(), "abc123".into()]).unwrap();
        assert_eq!(set.tags(), &["latest".to_string(), "abc123".to_string()]);
        assert_eq!(set.primary(), "abc123");
        assert!(set.contains("latest"));
    }

    #[test]
    fn test_tag_set_deserialize_validates() {
        let json = r#"{"repository":"app","tags":[]}"#;
        assert!(serde_json::from_str::<TagSet>(json).is_err());
    }

    #[test]
    fn test_image_reference_display() {
        let reference = ImageReference::new("registry.local/", "team/app", "abc123");
        assert_eq!(reference.to_string(), "registry.local/team/app:abc123");

        let bare = ImageReference::new("", "app", "latest");
        assert_eq!(bare.to_string(), "app:latest");
    }

    #[test]
    fn test_tag_grammar() {
        assert!(is_valid_tag("latest"));
        assert!(is_valid_tag("_v1.2-rc"));
        assert!(!is_valid_tag(""));
        assert!(!is_valid_tag(".hidden"));
        assert!(!is_valid_tag("has space"));
        assert!(!is_valid_tag(&"a".repeat(129)));
    }

    #[test]
    fn test_repository_grammar() {
        assert!(is_valid_repository("app"));
        assert!(is_valid_repository("team/my-app"));
        assert!(!is_valid_repository("Team/app"));
        assert!(!is_valid_repository("team//app"));
        assert!(!is_valid_repository("-app"));
        assert!(!is_valid_repository(""));
    }
}
