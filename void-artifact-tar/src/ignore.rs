//! Gitignore-style path filtering for artifact builds.
//!
//! Rules are evaluated in declaration order and the last matching rule
//! decides whether a path is kept. Supported syntax:
//!
//! - `!pattern` re-includes paths excluded by an earlier rule
//! - `/pattern` (or any pattern with an interior `/`) is anchored to the root
//!   of the walked tree; other patterns match a path component at any depth
//! - `pattern/` only matches directories
//! - `*`, `?`, `[...]` and `{a,b}` glob within a single path component, and a
//!   `**` component matches any number of directories
//!
//! A rule matching a directory also matches everything beneath it, so once a
//! directory is excluded its subtree is pruned and cannot be re-included.

use std::io::BufRead;

use fast_glob::glob_match;

use crate::error::{Result, TarError};

const ANY_DIRS: &str = "**";

// ---------------------------------------------------------------------------
// IgnoreRule
// ---------------------------------------------------------------------------

/// A single parsed ignore pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IgnoreRule {
    pattern: String,
    components: Vec<String>,
    negate: bool,
    anchored: bool,
    dir_only: bool,
}

impl IgnoreRule {
    /// Parse one pattern. Comment and blank lines are not accepted here; use
    /// [`IgnoreMatcher::parse_lines`] for pattern files.
    pub fn parse(raw: &str) -> Result<Self> {
        let invalid = |reason: &str| TarError::InvalidIgnorePattern {
            pattern: raw.to_string(),
            reason: reason.to_string(),
        };

        let mut text = raw.trim_end();
        let mut negate = false;
        if let Some(rest) = text.strip_prefix('\\') {
            // `\!` and `\#` escape a literal leading character.
            text = rest;
        } else if let Some(rest) = text.strip_prefix('!') {
            negate = true;
            text = rest;
        }

        let dir_only = text.ends_with('/');
        let text = text.strip_suffix('/').unwrap_or(text);
        let leading_slash = text.starts_with('/');
        let text = text.strip_prefix('/').unwrap_or(text);

        if text.is_empty() {
            return Err(invalid("pattern is empty"));
        }

        let components: Vec<String> = text.split('/').map(str::to_string).collect();
        for component in &components {
            if component.is_empty() {
                return Err(invalid("empty path component"));
            }
            if component != ANY_DIRS && component.contains(ANY_DIRS) {
                return Err(invalid("`**` must be a whole path component"));
            }
            if !brackets_balanced(component) {
                return Err(invalid("unterminated character class"));
            }
        }

        Ok(Self {
            pattern: raw.to_string(),
            anchored: leading_slash || components.len() > 1,
            components,
            negate,
            dir_only,
        })
    }

    /// The pattern text as supplied by the caller.
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// `true` for `!pattern` rules, which force inclusion.
    pub fn is_negated(&self) -> bool {
        self.negate
    }

    /// `true` when the rule only matches relative to the tree root.
    pub fn is_anchored(&self) -> bool {
        self.anchored
    }

    /// `true` for `pattern/` rules, which only match directories.
    pub fn is_dir_only(&self) -> bool {
        self.dir_only
    }

    /// Whether this rule matches `path` (split into components) or one of its
    /// ancestor directories.
    fn matches(&self, path: &[&str], is_dir: bool) -> bool {
        if self.anchored {
            match_prefix(&self.components, path, is_dir, self.dir_only)
        } else {
            (0..path.len())
                .any(|start| match_prefix(&self.components, &path[start..], is_dir, self.dir_only))
        }
    }
}

/// Match `pattern` against a leading run of `path`. Any remaining components
/// are descendants of the matched entry, which is then necessarily a
/// directory.
fn match_prefix(pattern: &[String], path: &[&str], is_dir: bool, dir_only: bool) -> bool {
    match pattern.split_first() {
        None => !dir_only || is_dir || !path.is_empty(),
        Some((head, rest)) if head == ANY_DIRS => {
            if rest.is_empty() {
                // Trailing `**` matches everything inside, not the directory itself.
                !path.is_empty() && (!dir_only || is_dir || path.len() > 1)
            } else {
                (0..=path.len()).any(|skip| match_prefix(rest, &path[skip..], is_dir, dir_only))
            }
        }
        Some((head, rest)) => match path.split_first() {
            Some((name, tail)) if glob_match(head.as_str(), *name) => {
                match_prefix(rest, tail, is_dir, dir_only)
            }
            _ => false,
        },
    }
}

fn brackets_balanced(component: &str) -> bool {
    let mut open = false;
    let mut escaped = false;
    for c in component.chars() {
        match c {
            _ if escaped => escaped = false,
            '\\' => escaped = true,
            '[' if !open => open = true,
            ']' if open => open = false,
            _ => {}
        }
    }
    !open
}

// ---------------------------------------------------------------------------
// IgnoreMatcher
// ---------------------------------------------------------------------------

/// Outcome of evaluating a path against the rule set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Keep the entry.
    Include,
    /// Drop this file or symlink.
    Exclude,
    /// Drop this directory and do not descend into it.
    Prune,
}

/// Ordered ignore rule set; the last matching rule wins.
#[derive(Debug, Clone, Default)]
pub struct IgnoreMatcher {
    rules: Vec<IgnoreRule>,
}

impl IgnoreMatcher {
    pub fn new(rules: Vec<IgnoreRule>) -> Self {
        Self { rules }
    }

    /// Parse each pattern with [`IgnoreRule::parse`].
    pub fn from_patterns<I, S>(patterns: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let rules = patterns
            .into_iter()
            .map(|p| IgnoreRule::parse(p.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::new(rules))
    }

    /// Parse gitignore-formatted text. Blank lines and `#` comments are
    /// skipped.
    pub fn parse_lines<R: BufRead>(reader: R) -> Result<Self> {
        let mut rules = Vec::new();
        for line in reader.lines() {
            let line = line.map_err(|source| TarError::Io {
                op: "read ignore patterns",
                path: Default::default(),
                source,
            })?;
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            rules.push(IgnoreRule::parse(line.trim_start())?);
        }
        Ok(Self::new(rules))
    }

    pub fn rules(&self) -> &[IgnoreRule] {
        &self.rules
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Evaluate a forward-slash separated path relative to the tree root.
    pub fn decide(&self, relative_path: &str, is_dir: bool) -> Decision {
        let path: Vec<&str> = relative_path
            .split('/')
            .filter(|c| !c.is_empty() && *c != ".")
            .collect();
        if path.is_empty() {
            return Decision::Include;
        }

        let mut included = true;
        for rule in &self.rules {
            if rule.matches(&path, is_dir) {
                included = rule.negate;
            }
        }

        match (included, is_dir) {
            (true, _) => Decision::Include,
            (false, true) => Decision::Prune,
            (false, false) => Decision::Exclude,
        }
    }

    /// `true` when the path survives the rule set.
    pub fn matches(&self, relative_path: &str, is_dir: bool) -> bool {
        self.decide(relative_path, is_dir) == Decision::Include
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
