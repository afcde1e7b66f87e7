//! Watch-target expansion.
//!
//! A configured path is a plain file, a directory, or an ant-style mask.
//! Expansion resolves it into the concrete report files present right now;
//! the watcher calls this every scan cycle, so everything here degrades to
//! an empty result instead of erroring. Only `.xml` regular files are
//! eligible under directories and masks; an explicitly configured file is
//! taken as-is.

use crate::error::{PipelineError, Result};
use chrono::{DateTime, Utc};
use regex::Regex;
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::debug;
use walkdir::WalkDir;

/// How a configured path resolves at scan time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetShape {
    File,
    Directory,
    Mask,
}

pub fn classify(path: &Path) -> TargetShape {
    if is_mask(path) {
        TargetShape::Mask
    } else if path.is_dir() {
        TargetShape::Directory
    } else {
        TargetShape::File
    }
}

fn is_mask(path: &Path) -> bool {
    let raw = path.to_string_lossy();
    raw.contains('*') || raw.contains('?')
}

/// Split a mask into its longest literal prefix directory and the pattern
/// remainder, `/`-normalized.
fn split_mask(mask: &str) -> (PathBuf, String) {
    let normalized = mask.replace('\\', "/");
    let wildcard = normalized
        .find(['*', '?'])
        .unwrap_or(normalized.len());
    match normalized[..wildcard].rfind('/') {
        Some(slash) if slash > 0 => (
            PathBuf::from(&normalized[..slash]),
            normalized[slash + 1..].to_string(),
        ),
        Some(_) => (PathBuf::from("/"), normalized[1..].to_string()),
        None => (PathBuf::from("."), normalized),
    }
}

/// Translate an ant-style pattern remainder into an anchored regex.
///
/// `**/` spans zero or more directories, `*` stays within one path segment,
/// `?` is a single non-separator character.
fn mask_to_regex(remainder: &str) -> Result<Regex> {
    let mut pattern = String::from("^");
    let mut rest = remainder;
    while !rest.is_empty() {
        if let Some(tail) = rest.strip_prefix("**/") {
            pattern.push_str("(?:[^/]+/)*");
            rest = tail;
        } else if let Some(tail) = rest.strip_prefix("**") {
            pattern.push_str(".*");
            rest = tail;
        } else if let Some(tail) = rest.strip_prefix('*') {
            pattern.push_str("[^/]*");
            rest = tail;
        } else if let Some(tail) = rest.strip_prefix('?') {
            pattern.push_str("[^/]");
            rest = tail;
        } else {
            let mut chars = rest.chars();
            let Some(ch) = chars.next() else { break };
            pattern.push_str(&regex::escape(ch.encode_utf8(&mut [0u8; 4])));
            rest = chars.as_str();
        }
    }
    pattern.push('$');
    Regex::new(&pattern).map_err(|e| PipelineError::Mask {
        mask: remainder.to_string(),
        reason: e.to_string(),
    })
}

struct MaskData {
    base: PathBuf,
    pattern: Regex,
}

/// Expands watch targets into concrete report files.
///
/// Owns the per-mask compilation cache (one entry per distinct mask string,
/// kept for the watcher's lifetime) and the freshness predicate.
pub struct PathMatcher {
    build_start: SystemTime,
    parse_out_of_date: bool,
    masks: HashMap<String, Option<MaskData>>,
}

impl PathMatcher {
    pub fn new(build_start: DateTime<Utc>, parse_out_of_date: bool) -> Self {
        Self {
            build_start: build_start.into(),
            parse_out_of_date,
            masks: HashMap::new(),
        }
    }

    /// A file is eligible unless it was last modified before the build
    /// started; `parse_out_of_date` disables the check entirely.
    pub fn is_fresh(&self, path: &Path) -> bool {
        if self.parse_out_of_date {
            return true;
        }
        match std::fs::metadata(path).and_then(|m| m.modified()) {
            Ok(mtime) => mtime >= self.build_start,
            Err(err) => {
                debug!(file = %path.display(), error = %err, "skipping unreadable file");
                false
            }
        }
    }

    /// True for a file that exists but fails the freshness cutoff.
    pub fn is_out_of_date(&self, path: &Path) -> bool {
        path.is_file()
            && matches!(
                std::fs::metadata(path).and_then(|m| m.modified()),
                Ok(mtime) if mtime < self.build_start
            )
    }

    /// Expand one configured path into the report files present right now.
    pub fn expand(&mut self, target: &Path) -> BTreeSet<PathBuf> {
        self.expand_inner(target, true)
    }

    /// Expansion without the freshness cutoff; used once at registration to
    /// tell the user about files that exist but will be ignored as stale.
    pub fn expand_ignoring_freshness(&mut self, target: &Path) -> BTreeSet<PathBuf> {
        self.expand_inner(target, false)
    }

    fn expand_inner(&mut self, target: &Path, check_fresh: bool) -> BTreeSet<PathBuf> {
        match classify(target) {
            TargetShape::File => {
                if target.is_file() && (!check_fresh || self.is_fresh(target)) {
                    BTreeSet::from([target.to_path_buf()])
                } else {
                    BTreeSet::new()
                }
            }
            TargetShape::Directory => self.expand_directory(target, check_fresh),
            TargetShape::Mask => self.expand_mask(target, check_fresh),
        }
    }

    /// Immediate child report files of a directory; inaccessible or empty
    /// directories expand to nothing.
    fn expand_directory(&self, dir: &Path, check_fresh: bool) -> BTreeSet<PathBuf> {
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(err) => {
                debug!(dir = %dir.display(), error = %err, "directory not accessible");
                return BTreeSet::new();
            }
        };
        entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| self.eligible_report_file(path, check_fresh))
            .collect()
    }

    fn expand_mask(&mut self, mask: &Path, check_fresh: bool) -> BTreeSet<PathBuf> {
        let key = mask.to_string_lossy().into_owned();
        let cached = self.masks.entry(key.clone()).or_insert_with(|| {
            let (base, remainder) = split_mask(&key);
            match mask_to_regex(&remainder) {
                Ok(pattern) => Some(MaskData { base, pattern }),
                Err(err) => {
                    debug!(mask = %key, error = %err, "ignoring unparsable mask");
                    None
                }
            }
        });
        // Regex clones share the compiled program; this keeps the cache
        // borrow from outlasting the walk below.
        let (base, pattern) = match cached {
            Some(data) => (data.base.clone(), data.pattern.clone()),
            None => return BTreeSet::new(),
        };

        let mut found = BTreeSet::new();
        for entry in WalkDir::new(&base).follow_links(false) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    debug!(mask = %key, error = %err, "skipping unreadable path");
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let rel = match entry.path().strip_prefix(&base) {
                Ok(rel) => rel,
                Err(_) => continue,
            };
            let rel = rel
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            if pattern.is_match(&rel) && self.eligible_report_file(entry.path(), check_fresh) {
                found.insert(entry.path().to_path_buf());
            }
        }
        found
    }

    fn eligible_report_file(&self, path: &Path, check_fresh: bool) -> bool {
        path.extension().map_or(false, |ext| ext == "xml")
            && path.is_file()
            && (!check_fresh || self.is_fresh(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;
    use filetime::{set_file_mtime, FileTime};
    use std::fs;

    fn past_build_start() -> DateTime<Utc> {
        Utc::now() - TimeDelta::hours(1)
    }

    fn touch(path: &Path) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, "<x/>").unwrap();
    }

    #[test]
    fn classifies_targets() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(classify(dir.path()), TargetShape::Directory);
        assert_eq!(classify(Path::new("a/*.xml")), TargetShape::Mask);
        assert_eq!(classify(Path::new("a/b?.xml")), TargetShape::Mask);
        assert_eq!(classify(&dir.path().join("missing.xml")), TargetShape::File);
    }

    #[test]
    fn splits_mask_at_longest_literal_prefix() {
        let (base, rest) = split_mask("a/b/*.xml");
        assert_eq!(base, PathBuf::from("a/b"));
        assert_eq!(rest, "*.xml");

        let (base, rest) = split_mask("*.xml");
        assert_eq!(base, PathBuf::from("."));
        assert_eq!(rest, "*.xml");

        let (base, rest) = split_mask("a/b?/c/*.xml");
        assert_eq!(base, PathBuf::from("a"));
        assert_eq!(rest, "b?/c/*.xml");
    }

    #[test]
    fn nonrecursive_mask_stays_in_one_segment() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a");
        touch(&a.join("x.xml"));
        touch(&a.join("y.txt"));
        touch(&a.join("b/z.xml"));

        let mut matcher = PathMatcher::new(past_build_start(), false);
        let found = matcher.expand(&a.join("*.xml"));
        assert_eq!(found, BTreeSet::from([a.join("x.xml")]));
    }

    #[test]
    fn recursive_mask_spans_directories() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a");
        touch(&a.join("x.xml"));
        touch(&a.join("y.txt"));
        touch(&a.join("b/z.xml"));

        let mut matcher = PathMatcher::new(past_build_start(), false);
        let found = matcher.expand(&a.join("**/*.xml"));
        assert_eq!(
            found,
            BTreeSet::from([a.join("x.xml"), a.join("b/z.xml")])
        );
    }

    #[test]
    fn directory_expansion_is_not_recursive() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("top.xml"));
        touch(&dir.path().join("notes.txt"));
        touch(&dir.path().join("sub/nested.xml"));

        let mut matcher = PathMatcher::new(past_build_start(), false);
        let found = matcher.expand(dir.path());
        assert_eq!(found, BTreeSet::from([dir.path().join("top.xml")]));
    }

    #[test]
    fn missing_directory_expands_to_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let mut matcher = PathMatcher::new(past_build_start(), false);
        assert!(matcher.expand(&dir.path().join("gone/*.xml")).is_empty());
    }

    #[test]
    fn stale_files_filtered_unless_configured() {
        let dir = tempfile::tempdir().unwrap();
        let report = dir.path().join("old.xml");
        touch(&report);
        set_file_mtime(&report, FileTime::from_unix_time(1_000_000, 0)).unwrap();

        let mut strict = PathMatcher::new(past_build_start(), false);
        assert!(strict.expand(dir.path()).is_empty());
        assert!(strict.is_out_of_date(&report));

        let mut lenient = PathMatcher::new(past_build_start(), true);
        assert_eq!(lenient.expand(dir.path()), BTreeSet::from([report]));
    }

    #[test]
    fn question_mark_matches_one_character() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("r1.xml"));
        touch(&dir.path().join("r22.xml"));

        let mut matcher = PathMatcher::new(past_build_start(), false);
        let found = matcher.expand(&dir.path().join("r?.xml"));
        assert_eq!(found, BTreeSet::from([dir.path().join("r1.xml")]));
    }
}
