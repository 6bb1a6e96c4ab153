//! Ignore rules for build-tree discovery
//!
//! Handles the default ignore set plus caller-supplied glob patterns.

use globset::{Glob, GlobSet, GlobSetBuilder};
use std::fs;
use std::path::Path;

/// Names ignored at any depth, as a file or a directory
pub const DEFAULT_IGNORED_NAMES: &[&str] = &[
    ".git",
    ".svn",
    ".hg",
    "node_modules",
    ".DS_Store",
    "Thumbs.db",
    "*.swp",
    ".env",
    ".env.*",
];

/// Errors for ignore rules
#[derive(Debug, thiserror::Error)]
pub enum ExcludeError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Glob pattern error: {0}")]
    GlobError(#[from] globset::Error),
}

/// Ignore rules for filtering discovered files
#[derive(Debug, Clone)]
pub struct ExcludeRules {
    glob_set: GlobSet,
    custom: Vec<String>,
}

impl ExcludeRules {
    /// Create rules with only the default ignore set
    pub fn new() -> Result<Self, ExcludeError> {
        Self::with_patterns::<&str>(&[])
    }

    /// Create rules with the defaults plus `patterns`
    pub fn with_patterns<S: AsRef<str>>(patterns: &[S]) -> Result<Self, ExcludeError> {
        let mut builder = GlobSetBuilder::new();

        for name in DEFAULT_IGNORED_NAMES {
            builder.add(Glob::new(&format!("**/{}", name))?);
            builder.add(Glob::new(&format!("**/{}/**", name))?);
        }

        let mut custom = Vec::new();
        for pattern in patterns {
            let pattern = pattern.as_ref().trim();
            if pattern.is_empty() {
                continue;
            }
            builder.add(Glob::new(pattern)?);
            custom.push(pattern.to_string());
        }

        Ok(Self {
            glob_set: builder.build()?,
            custom,
        })
    }

    /// Add patterns from an ignore file (one glob per line, `#` comments)
    pub fn with_ignore_file(self, path: &Path) -> Result<Self, ExcludeError> {
        let contents = fs::read_to_string(path)?;
        let mut patterns = self.custom.clone();
        patterns.extend(
            contents
                .lines()
                .map(|l| l.trim())
                .filter(|l| !l.is_empty() && !l.starts_with('#'))
                .map(String::from),
        );
        Self::with_patterns(&patterns)
    }

    /// Custom patterns in effect (defaults excluded)
    pub fn custom_patterns(&self) -> &[String] {
        &self.custom
    }

    /// Check if a root-relative path is ignored
    pub fn is_excluded(&self, path: &Path) -> bool {
        let path_str = path.to_string_lossy();
        self.glob_set.is_match(path_str.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_ignores_vcs_at_any_depth() {
        let rules = ExcludeRules::new().unwrap();

        assert!(rules.is_excluded(Path::new(".git")));
        assert!(rules.is_excluded(Path::new(".git/config")));
        assert!(rules.is_excluded(Path::new("vendor/lib/.git/HEAD")));
        assert!(rules.is_excluded(Path::new("node_modules/react/index.js")));
    }

    #[test]
    fn test_default_ignores_os_noise() {
        let rules = ExcludeRules::new().unwrap();

        assert!(rules.is_excluded(Path::new(".DS_Store")));
        assert!(rules.is_excluded(Path::new("assets/.DS_Store")));
        assert!(rules.is_excluded(Path::new("img/Thumbs.db")));
        assert!(rules.is_excluded(Path::new(".env.production")));
    }

    #[test]
    fn test_site_files_not_ignored() {
        let rules = ExcludeRules::new().unwrap();

        assert!(!rules.is_excluded(Path::new("index.html")));
        assert!(!rules.is_excluded(Path::new("assets/app.js")));
        assert!(!rules.is_excluded(Path::new("environment.json")));
    }

    #[test]
    fn test_custom_patterns() {
        let rules = ExcludeRules::with_patterns(&["*.map", "drafts/**"]).unwrap();

        assert!(rules.is_excluded(Path::new("assets/app.js.map")));
        assert!(rules.is_excluded(Path::new("drafts/post.html")));
        assert!(!rules.is_excluded(Path::new("assets/app.js")));
        assert_eq!(rules.custom_patterns(), &["*.map".to_string(), "drafts/**".to_string()]);
    }

    #[test]
    fn test_ignore_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let ignore = dir.path().join(".attestignore");
        fs::write(&ignore, "# comment\n*.bak\n\nprivate/**\n").unwrap();

        let rules = ExcludeRules::new().unwrap().with_ignore_file(&ignore).unwrap();

        assert!(rules.is_excluded(Path::new("index.html.bak")));
        assert!(rules.is_excluded(Path::new("private/key.txt")));
        assert!(!rules.is_excluded(Path::new("index.html")));
    }

    #[test]
    fn test_invalid_pattern_errors() {
        assert!(ExcludeRules::with_patterns(&["[unclosed"]).is_err());
    }
}
