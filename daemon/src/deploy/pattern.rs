//! Shell-style glob matching for tracked files
//!
//! Patterns support `*`, `?`, `[abc]`, `[a-z]` and `[!abc]`. Matching is
//! case-sensitive and `*` also crosses `/`. An include pattern matches
//! either the full POSIX relative path or the file name, so `*.json` tracks
//! `config/a.json` as well as `a.json`. Exclude patterns only match the
//! full relative path.

use regex::Regex;

use crate::errors::DaemonError;

/// A compiled list of glob patterns
#[derive(Debug, Clone, Default)]
pub struct PatternSet {
    regexes: Vec<Regex>,
}

impl PatternSet {
    /// Compile every pattern. Any glob that does not compile is an error.
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self, DaemonError> {
        let mut regexes = Vec::with_capacity(patterns.len());
        let mut errors = Vec::new();
        for pattern in patterns {
            match compile(pattern.as_ref()) {
                Ok(re) => regexes.push(re),
                Err(e) => errors.push(e),
            }
        }
        if !errors.is_empty() {
            return Err(DaemonError::ConfigError(errors));
        }
        Ok(Self { regexes })
    }

    pub fn is_empty(&self) -> bool {
        self.regexes.is_empty()
    }

    /// Whether any pattern matches `rel_path` (POSIX separators) or its file name
    pub fn matches(&self, rel_path: &str) -> bool {
        let file_name = rel_path.rsplit('/').next().unwrap_or(rel_path);
        self.regexes
            .iter()
            .any(|re| re.is_match(rel_path) || re.is_match(file_name))
    }

    /// Whether any pattern matches the whole of `rel_path`
    pub fn matches_path(&self, rel_path: &str) -> bool {
        self.regexes.iter().any(|re| re.is_match(rel_path))
    }
}

/// Check that `pattern` is a usable glob
pub fn check_glob(pattern: &str) -> Result<(), String> {
    compile(pattern).map(|_| ())
}

fn compile(pattern: &str) -> Result<Regex, String> {
    Regex::new(&glob_to_regex(pattern)).map_err(|_| format!("invalid glob pattern '{pattern}'"))
}

/// Tracks files matching an include set and no exclude pattern
#[derive(Debug, Clone, Default)]
pub struct FileFilter {
    include: PatternSet,
    exclude: PatternSet,
}

impl FileFilter {
    pub fn new<S: AsRef<str>>(include: &[S], exclude: &[S]) -> Result<Self, DaemonError> {
        Ok(Self {
            include: PatternSet::new(include)?,
            exclude: PatternSet::new(exclude)?,
        })
    }

    pub fn is_tracked(&self, rel_path: &str) -> bool {
        self.include.matches(rel_path) && !self.exclude.matches_path(rel_path)
    }
}

fn glob_to_regex(pattern: &str) -> String {
    let chars: Vec<char> = pattern.chars().collect();
    let mut out = String::from("(?s)^");
    let mut i = 0;

    while i < chars.len() {
        match chars[i] {
            '*' => {
                // Collapse runs of '*'
                while i + 1 < chars.len() && chars[i + 1] == '*' {
                    i += 1;
                }
                out.push_str(".*");
            }
            '?' => out.push('.'),
            '[' => match class_end(&chars, i) {
                Some(end) => {
                    out.push_str(&class_to_regex(&chars[i + 1..end]));
                    i = end;
                }
                None => out.push_str(r"\["),
            },
            c => out.push_str(&regex::escape(&c.to_string())),
        }
        i += 1;
    }

    out.push('$');
    out
}

/// Index of the `]` closing the class opened at `start`, if any
fn class_end(chars: &[char], start: usize) -> Option<usize> {
    let mut j = start + 1;
    if j < chars.len() && chars[j] == '!' {
        j += 1;
    }
    // A leading ']' is part of the class
    if j < chars.len() && chars[j] == ']' {
        j += 1;
    }
    while j < chars.len() && chars[j] != ']' {
        j += 1;
    }
    (j < chars.len()).then_some(j)
}

fn class_to_regex(body: &[char]) -> String {
    let (negated, body) = match body.first() {
        Some('!') => (true, &body[1..]),
        _ => (false, body),
    };

    let mut out = String::from("[");
    if negated {
        out.push('^');
    }
    for (k, c) in body.iter().enumerate() {
        match c {
            '\\' | '[' | ']' | '&' | '~' => {
                out.push('\\');
                out.push(*c);
            }
            '^' if k == 0 => out.push_str(r"\^"),
            c => out.push(*c),
        }
    }
    out.push(']');
    out
}
