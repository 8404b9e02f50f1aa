mod scanner;

pub use scanner::{scan, Tag};

use crate::error::{ConfigError, ExtractError};
use crate::log::EXTRACT;
use globset::{Glob, GlobSet, GlobSetBuilder};
use ignore::WalkBuilder;
use regex::Regex;
use std::collections::HashSet;
use std::fs;
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tracing::{debug, warn};

static PLACEHOLDER: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"\$(\d+)").ok());

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TagKind {
    Inline,
    SqlFile,
}

/// Type arguments already attached to a tag
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Annotation {
    /// Brackets included
    pub range: Range<usize>,
    /// Text between the brackets, trimmed
    pub text: String,
}

/// One query found in a source file
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueryRecord {
    pub file: PathBuf,
    /// The template literal, or the whole file for `.sql` files
    pub range: Range<usize>,
    /// 1-based line the query starts on
    pub line: usize,
    /// Text sent to the database, with interpolations replaced by positional parameters
    pub raw_sql: String,
    pub annotation: Option<Annotation>,
    /// Offset where type arguments are inserted when there is no annotation
    pub tag_end: usize,
    pub tag_kind: TagKind,
    pub param_count: usize,
}

/// A file's content as read at extraction time, with its queries
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceFile {
    pub path: PathBuf,
    pub content: String,
    pub queries: Vec<QueryRecord>,
}

impl SourceFile {
    pub fn is_sql_file(&self) -> bool {
        is_sql_path(&self.path)
    }
}

/// Include and exclude patterns, matched against paths relative to the root directory
#[derive(Clone, Debug)]
pub struct FileFilter {
    include: GlobSet,
    exclude: GlobSet,
    /// Directories whose every file is excluded, from exclude patterns ending in `/**`
    exclude_dirs: GlobSet,
}

impl FileFilter {
    pub fn new(include: &[String], exclude: &[String]) -> Result<FileFilter, ConfigError> {
        let dirs: Vec<String> = exclude
            .iter()
            .filter_map(|pattern| pattern.strip_suffix("/**"))
            .map(str::to_owned)
            .collect();

        Ok(FileFilter {
            include: glob_set(include)?,
            exclude: glob_set(exclude)?,
            exclude_dirs: glob_set(&dirs)?,
        })
    }

    pub fn is_match(&self, relative: &Path) -> bool {
        self.include.is_match(relative) && !self.exclude.is_match(relative)
    }

    /// A directory that is not worth descending into
    pub fn is_excluded_dir(&self, relative: &Path) -> bool {
        relative.file_name().is_some_and(|name| name == ".git")
            || self.exclude_dirs.is_match(relative)
    }
}

fn glob_set(patterns: &[String]) -> Result<GlobSet, ConfigError> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern).map_err(|source| ConfigError::InvalidGlob {
            pattern: pattern.to_owned(),
            source,
        })?;
        builder.add(glob);
    }
    builder.build().map_err(|source| ConfigError::InvalidGlob {
        pattern: patterns.join(", "),
        source,
    })
}

///
/// Files under `root` selected by `filter`, in path order.
/// When `only` is set, files outside it are skipped.
///
pub fn discover(root: &Path, filter: &FileFilter, only: Option<&HashSet<PathBuf>>) -> Vec<PathBuf> {
    let mut files = vec![];

    let prune = filter.clone();
    let base = root.to_path_buf();

    let walker = WalkBuilder::new(root)
        .standard_filters(false)
        .sort_by_file_name(|a, b| a.cmp(b))
        .filter_entry(move |entry| {
            if entry.depth() == 0 || !entry.file_type().is_some_and(|t| t.is_dir()) {
                return true;
            }
            let path = entry.path();
            !prune.is_excluded_dir(path.strip_prefix(&base).unwrap_or(path))
        })
        .build();

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                warn!(target: EXTRACT, msg = "Could not read directory entry", error = err.to_string());
                continue;
            }
        };

        if !entry.file_type().is_some_and(|t| t.is_file()) {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);

        if !filter.is_match(relative) {
            continue;
        }

        if let Some(only) = only {
            let absolute = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
            if !only.contains(&absolute) {
                continue;
            }
        }

        files.push(path.to_path_buf());
    }

    debug!(target: EXTRACT, msg = "Discovered files", count = files.len());
    files
}

///
/// Read a file and find its queries.
///
/// A `.sql` file is one query. Anything else is scanned for `sql` tags.
///
pub fn extract_file(path: &Path) -> Result<SourceFile, ExtractError> {
    let content = fs::read_to_string(path)?;

    let queries = if is_sql_path(path) {
        sql_file_query(path, &content).into_iter().collect()
    } else {
        scan(&content)?
            .into_iter()
            .map(|tag| inline_query(path, &content, tag))
            .collect()
    };

    Ok(SourceFile {
        path: path.to_path_buf(),
        content,
        queries,
    })
}

fn sql_file_query(path: &Path, content: &str) -> Option<QueryRecord> {
    if content.trim().is_empty() {
        return None;
    }

    let param_count = PLACEHOLDER
        .as_ref()
        .map(|re| {
            re.captures_iter(content)
                .filter_map(|caps| caps[1].parse::<usize>().ok())
                .max()
                .unwrap_or(0)
        })
        .unwrap_or(0);

    Some(QueryRecord {
        file: path.to_path_buf(),
        range: 0..content.len(),
        line: 1,
        raw_sql: content.to_owned(),
        annotation: None,
        tag_end: 0,
        tag_kind: TagKind::SqlFile,
        param_count,
    })
}

fn inline_query(path: &Path, content: &str, tag: Tag) -> QueryRecord {
    let annotation = tag.type_arguments.map(|range| Annotation {
        text: content[range.start + 1..range.end - 1].trim().to_owned(),
        range,
    });

    QueryRecord {
        file: path.to_path_buf(),
        range: tag.template,
        line: tag.line,
        raw_sql: tag.sql,
        annotation,
        tag_end: tag.tag_end,
        tag_kind: TagKind::Inline,
        param_count: tag.param_count,
    }
}

pub fn is_sql_path(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "sql")
}
