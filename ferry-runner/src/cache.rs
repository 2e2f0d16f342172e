//! Build cache
//!
//! Keyed, append-only store of built artifacts. The key is a SHA-256 over
//! the content hashes of every file in the build context (minus excludes),
//! the Dockerfile path and the platform list. Entries are written once and
//! never replaced; eviction is left to whoever owns the cache directory.

use ferry_core::domain::build::{BuildSpec, ImageArtifact};
use glob::{MatchOptions, Pattern, PatternError};
use sha2::{Digest, Sha256};
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Directory-backed artifact cache
#[derive(Debug, Clone)]
pub struct BuildCache {
    root: PathBuf,
}

impl BuildCache {
    /// Creates a cache rooted at `root` (created lazily on first write)
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.root.join("entries").join(format!("{}.json", key))
    }

    /// Path of the ignore file handed to the build backend for `key`
    pub fn ignore_file_path(&self, key: &str) -> PathBuf {
        self.root.join("ignore").join(format!("{}.ignore", key))
    }

    /// Looks up a cached artifact; unreadable entries are treated as misses
    pub fn lookup(&self, key: &str) -> Option<ImageArtifact> {
        let path = self.entry_path(key);
        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!("Failed to read cache entry {}: {}", path.display(), e);
                return None;
            }
        };

        match serde_json::from_str(&contents) {
            Ok(artifact) => Some(artifact),
            Err(e) => {
                warn!("Ignoring corrupt cache entry {}: {}", path.display(), e);
                None
            }
        }
    }

    /// Records an artifact under its cache key
    ///
    /// Returns `false` when an entry already exists; existing entries are
    /// never overwritten.
    pub fn record(&self, artifact: &ImageArtifact) -> io::Result<bool> {
        let path = self.entry_path(&artifact.cache_key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                debug!("Cache entry {} already present", artifact.cache_key);
                return Ok(false);
            }
            Err(e) => return Err(e),
        };

        let json = serde_json::to_vec_pretty(artifact).map_err(io::Error::other)?;
        file.write_all(&json)?;
        Ok(true)
    }

    /// Writes the exclude patterns for `key` and returns the file path
    pub fn write_ignore_file(&self, key: &str, excludes: &[String]) -> io::Result<PathBuf> {
        let path = self.ignore_file_path(key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut contents = excludes.join("\n");
        contents.push('\n');
        fs::write(&path, contents)?;
        Ok(path)
    }
}

/// Computes the cache key for a build spec
///
/// Reads every file in the context; call from a blocking context.
pub fn compute_cache_key(spec: &BuildSpec) -> io::Result<String> {
    let excludes = ExcludeMatcher::new(&spec.excludes)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

    let mut files = Vec::new();
    collect_files(&spec.context_dir, Path::new(""), &excludes, &mut files)?;
    files.sort();

    let mut hasher = Sha256::new();
    hasher.update(b"platforms:");
    hasher.update(spec.platforms.join(",").as_bytes());
    hasher.update(b"\ndockerfile:");
    hasher.update(spec.dockerfile.to_string_lossy().as_bytes());
    hasher.update(b"\n");

    let dockerfile = spec.context_dir.join(&spec.dockerfile);
    if dockerfile.is_file() {
        hasher.update(file_digest(&dockerfile)?.as_bytes());
        hasher.update(b"\n");
    }

    for relative in &files {
        let digest = file_digest(&spec.context_dir.join(relative))?;
        hasher.update(relative.as_bytes());
        hasher.update([0u8]);
        hasher.update(digest.as_bytes());
        hasher.update(b"\n");
    }

    debug!(
        "Hashed {} file(s) in build context {}",
        files.len(),
        spec.context_dir.display()
    );

    Ok(format!("{:x}", hasher.finalize()))
}

fn file_digest(path: &Path) -> io::Result<String> {
    let bytes = fs::read(path)?;
    Ok(format!("{:x}", Sha256::digest(&bytes)))
}

/// Collects context-relative file paths (with `/` separators), skipping excludes
fn collect_files(
    root: &Path,
    relative: &Path,
    excludes: &ExcludeMatcher,
    out: &mut Vec<String>,
) -> io::Result<()> {
    for entry in fs::read_dir(root.join(relative))? {
        let entry = entry?;
        let rel_path = relative.join(entry.file_name());
        let rel = rel_path
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            // An excluded directory may still hold re-included files
            if excludes.is_excluded(&rel) && !excludes.has_exceptions() {
                continue;
            }
            collect_files(root, &rel_path, excludes, out)?;
        } else if file_type.is_file() && !excludes.is_excluded(&rel) {
            out.push(rel);
        }
    }
    Ok(())
}

/// Build-context exclude patterns with container ignore-file semantics
///
/// Patterns are anchored at the context root and evaluated in order; the
/// last matching pattern wins and a leading `!` re-includes. `*` and `?`
/// stay within one path component, `**` spans directories, and a pattern
/// matching a directory covers everything below it.
#[derive(Debug, Clone, Default)]
pub struct ExcludeMatcher {
    rules: Vec<ExcludeRule>,
}

#[derive(Debug, Clone)]
struct ExcludeRule {
    pattern: Pattern,
    exception: bool,
}

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

impl ExcludeMatcher {
    pub fn new(patterns: &[String]) -> Result<Self, PatternError> {
        let mut rules = Vec::new();
        for raw in patterns {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let (exception, body) = match line.strip_prefix('!') {
                Some(rest) => (true, rest.trim()),
                None => (false, line),
            };
            let body = body
                .trim_start_matches("./")
                .trim_start_matches('/')
                .trim_end_matches('/');
            if body.is_empty() {
                continue;
            }

            rules.push(ExcludeRule {
                pattern: Pattern::new(body)?,
                exception,
            });
        }
        Ok(Self { rules })
    }

    /// Whether any pattern re-includes paths
    pub fn has_exceptions(&self) -> bool {
        self.rules.iter().any(|r| r.exception)
    }

    /// Whether the context-relative path `rel_path` is left out of the build
    pub fn is_excluded(&self, rel_path: &str) -> bool {
        let mut excluded = false;
        for rule in &self.rules {
            if rule.matches(rel_path) {
                excluded = !rule.exception;
            }
        }
        excluded
    }
}

impl ExcludeRule {
    /// Matches the path itself or any of its parent directories
    fn matches(&self, rel_path: &str) -> bool {
        if self.pattern.matches_with(rel_path, MATCH_OPTIONS) {
            return true;
        }
        rel_path
            .match_indices('/')
            .any(|(i, _)| self.pattern.matches_with(&rel_path[..i], MATCH_OPTIONS))
    }
}
