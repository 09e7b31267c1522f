//! File and search backend used by the action handler.
//!
//! Every operation answers with a [`BackendReply`]: backend failures are shown
//! to the model as text and flagged, never propagated.

use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow, bail};
use chrono::{DateTime, Utc};
use regex::Regex;
use tracing::{debug, instrument};
use walkdir::{DirEntry, WalkDir};

use crate::core::actions::EditOp;

/// Cap on grep matches and glob results returned in one reply.
pub const MAX_SEARCH_RESULTS: usize = 200;

/// Directories never descended into by grep.
const SKIPPED_DIRS: [&str; 5] = [".git", "target", "node_modules", "__pycache__", ".venv"];

/// Text returned by a workspace operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendReply {
    pub content: String,
    pub is_error: bool,
}

impl BackendReply {
    pub fn ok(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: false,
        }
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: true,
        }
    }

    fn from_result(result: Result<String>) -> Self {
        match result {
            Ok(content) => Self::ok(content),
            Err(err) => Self::error(format!("[ERROR] {err:#}")),
        }
    }
}

/// File and search operations on the task workspace.
pub trait Workspace: Send + Sync {
    /// Line-numbered file contents. `offset` is the 0-based first line.
    fn read_file(&self, path: &str, offset: Option<usize>, limit: Option<usize>) -> BackendReply;
    fn write_file(&self, path: &str, content: &str) -> BackendReply;
    fn edit_file(&self, path: &str, edit: &EditOp) -> BackendReply;
    /// Apply all edits or none.
    fn multi_edit(&self, path: &str, edits: &[EditOp]) -> BackendReply;
    fn metadata(&self, paths: &[String]) -> BackendReply;
    fn grep(&self, pattern: &str, path: Option<&str>, include: Option<&str>) -> BackendReply;
    fn glob(&self, pattern: &str, path: Option<&str>) -> BackendReply;
    fn list_dir(&self, path: &str) -> BackendReply;
}

/// Workspace backed by the local filesystem.
#[derive(Debug, Clone)]
pub struct LocalWorkspace {
    root: PathBuf,
}

impl LocalWorkspace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> PathBuf {
        let candidate = Path::new(path);
        if candidate.is_absolute() {
            candidate.to_path_buf()
        } else {
            self.root.join(candidate)
        }
    }

    fn resolve_search_root(&self, path: Option<&str>) -> PathBuf {
        match path {
            Some(path) if !matches!(path.trim(), "" | "." | "./") => self.resolve(path),
            _ => self.root.clone(),
        }
    }

    fn display_path(&self, path: &Path) -> String {
        path.strip_prefix(&self.root)
            .unwrap_or(path)
            .display()
            .to_string()
    }

    fn try_read(&self, path: &str, offset: Option<usize>, limit: Option<usize>) -> Result<String> {
        let resolved = self.resolve(path);
        if resolved.is_dir() {
            bail!("{path} is a directory; use list or glob instead");
        }
        let contents = fs::read_to_string(&resolved).with_context(|| format!("read {path}"))?;
        if contents.is_empty() {
            return Ok(format!("{path} is empty"));
        }
        let offset = offset.unwrap_or(0);
        let lines: Vec<&str> = contents.lines().collect();
        let total = lines.len();
        let end = limit.map_or(total, |limit| offset.saturating_add(limit).min(total));
        if offset >= total {
            bail!("offset {offset} is past the end of {path} ({total} lines)");
        }
        let mut out = String::new();
        for (index, line) in lines[offset..end].iter().enumerate() {
            let _ = writeln!(out, "{:>6}\t{line}", offset + index + 1);
        }
        if end < total {
            let _ = write!(out, "... ({} more lines)", total - end);
        }
        Ok(out.trim_end_matches('\n').to_string())
    }

    fn try_write(&self, path: &str, content: &str) -> Result<String> {
        let resolved = self.resolve(path);
        if let Some(parent) = resolved.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create directory {}", parent.display()))?;
        }
        fs::write(&resolved, content).with_context(|| format!("write {path}"))?;
        Ok(format!("Wrote {} bytes to {path}", content.len()))
    }

    fn try_edit(&self, path: &str, edits: &[EditOp]) -> Result<String> {
        let resolved = self.resolve(path);
        let original = fs::read_to_string(&resolved).with_context(|| format!("read {path}"))?;
        let mut updated = original;
        let mut replacements = 0;
        for (index, edit) in edits.iter().enumerate() {
            let (next, count) = apply_edit(&updated, edit).map_err(|err| {
                if edits.len() > 1 {
                    anyhow!("edit {} of {}: {err}", index + 1, edits.len())
                } else {
                    err
                }
            })?;
            updated = next;
            replacements += count;
        }
        fs::write(&resolved, &updated).with_context(|| format!("write {path}"))?;
        Ok(format!(
            "Applied {} edit(s) to {path} ({replacements} replacement(s))",
            edits.len()
        ))
    }

    fn try_metadata(&self, paths: &[String]) -> (String, bool) {
        let mut out = String::new();
        let mut any_missing = false;
        for path in paths {
            let resolved = self.resolve(path);
            match fs::metadata(&resolved) {
                Ok(meta) => {
                    let kind = if meta.is_dir() { "directory" } else { "file" };
                    let modified = meta
                        .modified()
                        .map(|time| DateTime::<Utc>::from(time).to_rfc3339())
                        .unwrap_or_else(|_| "unknown".to_string());
                    let _ = write!(out, "{path}: {kind}, {} bytes", meta.len());
                    if meta.is_file()
                        && let Ok(contents) = fs::read_to_string(&resolved)
                    {
                        let _ = write!(out, ", {} lines", contents.lines().count());
                    }
                    let _ = writeln!(out, ", modified {modified}");
                }
                Err(_) => {
                    any_missing = true;
                    let _ = writeln!(out, "{path}: not found");
                }
            }
        }
        (out.trim_end().to_string(), any_missing)
    }

    fn try_grep(&self, pattern: &str, path: Option<&str>, include: Option<&str>) -> Result<String> {
        let regex = Regex::new(pattern).with_context(|| format!("invalid regex '{pattern}'"))?;
        let include = include
            .map(glob::Pattern::new)
            .transpose()
            .context("invalid include pattern")?;
        let search_root = self.resolve_search_root(path);
        if !search_root.exists() {
            bail!("path not found: {}", path.unwrap_or("."));
        }

        let mut matches = Vec::new();
        let mut truncated = false;
        let walker = WalkDir::new(&search_root)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| entry.depth() == 0 || !is_skipped_dir(entry));
        'files: for entry in walker.filter_map(std::result::Result::ok) {
            if !entry.file_type().is_file() {
                continue;
            }
            if let Some(include) = &include {
                let name = entry.file_name().to_string_lossy();
                if !include.matches(&name) {
                    continue;
                }
            }
            let Ok(contents) = fs::read_to_string(entry.path()) else {
                continue;
            };
            for (line_no, line) in contents.lines().enumerate() {
                if regex.is_match(line) {
                    if matches.len() == MAX_SEARCH_RESULTS {
                        truncated = true;
                        break 'files;
                    }
                    matches.push(format!(
                        "{}:{}: {}",
                        self.display_path(entry.path()),
                        line_no + 1,
                        line.trim_end()
                    ));
                }
            }
        }
        debug!(pattern, matches = matches.len(), "grep finished");
        if matches.is_empty() {
            return Ok(format!("No matches found for pattern '{pattern}'"));
        }
        let mut out = matches.join("\n");
        if truncated {
            let _ = write!(out, "\n... (results truncated at {MAX_SEARCH_RESULTS} matches)");
        }
        Ok(out)
    }

    fn try_glob(&self, pattern: &str, path: Option<&str>) -> Result<String> {
        let base = self.resolve_search_root(path);
        let full = base.join(pattern);
        let full = full.to_string_lossy();
        let mut found: Vec<String> = glob::glob(&full)
            .with_context(|| format!("invalid glob pattern '{pattern}'"))?
            .filter_map(std::result::Result::ok)
            .map(|path| self.display_path(&path))
            .collect();
        found.sort();
        if found.is_empty() {
            return Ok(format!("No files found matching '{pattern}'"));
        }
        let total = found.len();
        found.truncate(MAX_SEARCH_RESULTS);
        let mut out = found.join("\n");
        if total > MAX_SEARCH_RESULTS {
            let _ = write!(out, "\n... ({} more files)", total - MAX_SEARCH_RESULTS);
        }
        Ok(out)
    }

    fn try_list(&self, path: &str) -> Result<String> {
        let resolved = self.resolve(path);
        let mut entries: Vec<String> = fs::read_dir(&resolved)
            .with_context(|| format!("list {path}"))?
            .filter_map(std::result::Result::ok)
            .map(|entry| {
                let name = entry.file_name().to_string_lossy().into_owned();
                if entry.file_type().is_ok_and(|kind| kind.is_dir()) {
                    format!("{name}/")
                } else {
                    name
                }
            })
            .collect();
        entries.sort();
        if entries.is_empty() {
            return Ok(format!("{path} is empty"));
        }
        Ok(format!("{path}\n{}", entries.join("\n")))
    }
}

fn is_skipped_dir(entry: &DirEntry) -> bool {
    entry.file_type().is_dir()
        && SKIPPED_DIRS
            .iter()
            .any(|skipped| entry.file_name() == *skipped)
}

/// Apply one edit; returns the new text and the number of replacements.
fn apply_edit(text: &str, edit: &EditOp) -> Result<(String, usize)> {
    if edit.old_string.is_empty() {
        bail!("old_string must not be empty");
    }
    if edit.old_string == edit.new_string {
        bail!("old_string and new_string are identical");
    }
    let occurrences = text.matches(&edit.old_string).count();
    match occurrences {
        0 => bail!("old_string not found"),
        1 => Ok((text.replacen(&edit.old_string, &edit.new_string, 1), 1)),
        n if edit.replace_all => Ok((text.replace(&edit.old_string, &edit.new_string), n)),
        n => bail!(
            "old_string appears {n} times; add surrounding context or set replace_all: true"
        ),
    }
}

impl Workspace for LocalWorkspace {
    #[instrument(skip_all, fields(path = %path))]
    fn read_file(&self, path: &str, offset: Option<usize>, limit: Option<usize>) -> BackendReply {
        BackendReply::from_result(self.try_read(path, offset, limit))
    }

    #[instrument(skip_all, fields(path = %path))]
    fn write_file(&self, path: &str, content: &str) -> BackendReply {
        BackendReply::from_result(self.try_write(path, content))
    }

    #[instrument(skip_all, fields(path = %path))]
    fn edit_file(&self, path: &str, edit: &EditOp) -> BackendReply {
        BackendReply::from_result(self.try_edit(path, std::slice::from_ref(edit)))
    }

    #[instrument(skip_all, fields(path = %path, edits = edits.len()))]
    fn multi_edit(&self, path: &str, edits: &[EditOp]) -> BackendReply {
        if edits.is_empty() {
            return BackendReply::error("[ERROR] multi_edit requires at least one edit");
        }
        BackendReply::from_result(self.try_edit(path, edits))
    }

    fn metadata(&self, paths: &[String]) -> BackendReply {
        let (content, any_missing) = self.try_metadata(paths);
        BackendReply {
            content,
            is_error: any_missing,
        }
    }

    #[instrument(skip_all, fields(pattern = %pattern))]
    fn grep(&self, pattern: &str, path: Option<&str>, include: Option<&str>) -> BackendReply {
        BackendReply::from_result(self.try_grep(pattern, path, include))
    }

    #[instrument(skip_all, fields(pattern = %pattern))]
    fn glob(&self, pattern: &str, path: Option<&str>) -> BackendReply {
        BackendReply::from_result(self.try_glob(pattern, path))
    }

    fn list_dir(&self, path: &str) -> BackendReply {
        BackendReply::from_result(self.try_list(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn edit(old: &str, new: &str, replace_all: bool) -> EditOp {
        EditOp {
            old_string: old.to_string(),
            new_string: new.to_string(),
            replace_all,
        }
    }

    fn workspace() -> (tempfile::TempDir, LocalWorkspace) {
        let temp = tempfile::tempdir().expect("tempdir");
        let workspace = LocalWorkspace::new(temp.path());
        (temp, workspace)
    }

    #[test]
    fn read_numbers_lines_and_honors_window() {
        let (temp, ws) = workspace();
        fs::write(temp.path().join("a.txt"), "one\ntwo\nthree\nfour\n").expect("write");
        let reply = ws.read_file("a.txt", Some(1), Some(2));
        assert!(!reply.is_error);
        assert_eq!(
            reply.content,
            "     2\ttwo\n     3\tthree\n... (1 more lines)"
        );
    }

    #[test]
    fn read_missing_file_is_an_error_reply() {
        let (_temp, ws) = workspace();
        let reply = ws.read_file("missing.rs", None, None);
        assert!(reply.is_error);
        assert!(reply.content.starts_with("[ERROR] read missing.rs"));
    }

    #[test]
    fn write_creates_parent_directories() {
        let (temp, ws) = workspace();
        let reply = ws.write_file("nested/dir/file.rs", "fn main() {}\n");
        assert!(!reply.is_error, "{}", reply.content);
        let written = fs::read_to_string(temp.path().join("nested/dir/file.rs")).expect("read");
        assert_eq!(written, "fn main() {}\n");
    }

    #[test]
    fn ambiguous_edit_is_rejected_unless_replace_all() {
        let (temp, ws) = workspace();
        let path = temp.path().join("dup.txt");
        fs::write(&path, "x = 1\nx = 1\n").expect("write");
        let reply = ws.edit_file("dup.txt", &edit("x = 1", "x = 2", false));
        assert!(reply.is_error);
        assert!(reply.content.contains("appears 2 times"));
        let reply = ws.edit_file("dup.txt", &edit("x = 1", "x = 2", true));
        assert!(!reply.is_error);
        assert_eq!(fs::read_to_string(&path).expect("read"), "x = 2\nx = 2\n");
    }

    #[test]
    fn multi_edit_is_all_or_nothing() {
        let (temp, ws) = workspace();
        let path = temp.path().join("lib.rs");
        fs::write(&path, "alpha beta").expect("write");
        let reply = ws.multi_edit(
            "lib.rs",
            &[edit("alpha", "ALPHA", false), edit("gamma", "GAMMA", false)],
        );
        assert!(reply.is_error);
        assert!(reply.content.contains("edit 2 of 2"));
        assert_eq!(fs::read_to_string(&path).expect("read"), "alpha beta");

        let reply = ws.multi_edit(
            "lib.rs",
            &[edit("alpha", "ALPHA", false), edit("beta", "BETA", false)],
        );
        assert!(!reply.is_error);
        assert_eq!(fs::read_to_string(&path).expect("read"), "ALPHA BETA");
    }

    #[test]
    fn grep_reports_relative_paths_and_skips_vcs_dirs() {
        let (temp, ws) = workspace();
        fs::create_dir_all(temp.path().join("src")).expect("mkdir");
        fs::create_dir_all(temp.path().join(".git")).expect("mkdir");
        fs::write(temp.path().join("src/lib.rs"), "fn parse() {}\nfn other() {}\n").expect("write");
        fs::write(temp.path().join("src/notes.md"), "parse docs\n").expect("write");
        fs::write(temp.path().join(".git/HEAD"), "parse\n").expect("write");

        let reply = ws.grep("parse", None, Some("*.rs"));
        assert!(!reply.is_error, "{}", reply.content);
        assert_eq!(reply.content, "src/lib.rs:1: fn parse() {}");

        let reply = ws.grep("nothing_here", Some("src"), None);
        assert!(reply.content.starts_with("No matches found"));
    }

    #[test]
    fn grep_rejects_invalid_regex() {
        let (_temp, ws) = workspace();
        let reply = ws.grep("(unclosed", None, None);
        assert!(reply.is_error);
    }

    #[test]
    fn glob_results_are_sorted_and_relative() {
        let (temp, ws) = workspace();
        fs::create_dir_all(temp.path().join("src/core")).expect("mkdir");
        fs::write(temp.path().join("src/b.rs"), "").expect("write");
        fs::write(temp.path().join("src/core/a.rs"), "").expect("write");
        let reply = ws.glob("**/*.rs", None);
        assert!(!reply.is_error, "{}", reply.content);
        assert_eq!(reply.content, "src/b.rs\nsrc/core/a.rs");
    }

    #[test]
    fn list_dir_marks_directories() {
        let (temp, ws) = workspace();
        fs::create_dir_all(temp.path().join("src")).expect("mkdir");
        fs::write(temp.path().join("Cargo.toml"), "").expect("write");
        let reply = ws.list_dir("./");
        assert_eq!(reply.content, "./\nCargo.toml\nsrc/");
    }

    #[test]
    fn metadata_flags_missing_paths() {
        let (temp, ws) = workspace();
        fs::write(temp.path().join("a.txt"), "1\n2\n").expect("write");
        let reply = ws.metadata(&["a.txt".to_string(), "ghost.txt".to_string()]);
        assert!(reply.is_error);
        assert!(reply.content.contains("a.txt: file, 4 bytes, 2 lines"));
        assert!(reply.content.contains("ghost.txt: not found"));
    }
}
