//! Ignore rules for watched roots
//!
//! Patterns use gitignore syntax and are anchored at each watch root:
//! 1. Config patterns (`[ignore] patterns = [...]`)
//! 2. The root's own `.gitignore` (optional, disabled by default)
//!
//! A path under an ignored directory is itself ignored, so a single
//! `node_modules/` rule silences the whole subtree.

use crate::error::WatchError;
use ignore::gitignore::{Gitignore, GitignoreBuilder};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Ignore rule matcher covering every watch root
#[derive(Debug, Clone, Default)]
pub struct IgnoreRules {
    /// One matcher per root, longest root first
    matchers: Vec<RootMatcher>,
}

#[derive(Debug, Clone)]
struct RootMatcher {
    root: PathBuf,
    gitignore: Gitignore,
}

impl IgnoreRules {
    /// Build rules for the given roots
    pub fn load(roots: &[PathBuf], config: &IgnoreConfig) -> Result<Self, WatchError> {
        let mut matchers = Vec::with_capacity(roots.len());

        for root in roots {
            let mut builder = GitignoreBuilder::new(root);

            for pattern in &config.patterns {
                builder.add_line(None, pattern).map_err(|e| {
                    WatchError::InvalidConfig(format!("bad ignore pattern '{}': {}", pattern, e))
                })?;
            }

            if config.use_gitignore {
                let gitignore_path = root.join(".gitignore");
                if gitignore_path.is_file() {
                    // Malformed lines are skipped; the rest of the file still applies
                    if let Some(err) = builder.add(&gitignore_path) {
                        warn!("Partially invalid {}: {}", gitignore_path.display(), err);
                    }
                    debug!("Loaded {}", gitignore_path.display());
                }
            }

            let gitignore = builder
                .build()
                .map_err(|e| WatchError::InvalidConfig(e.to_string()))?;

            matchers.push(RootMatcher {
                root: root.clone(),
                gitignore,
            });
        }

        // Nested roots: the innermost root's rules win
        matchers.sort_by(|a, b| {
            b.root
                .components()
                .count()
                .cmp(&a.root.components().count())
        });

        Ok(Self { matchers })
    }

    /// Check if a path should be ignored
    ///
    /// Roots themselves and paths outside every root are never ignored here;
    /// containment is the tracker's concern.
    pub fn should_ignore(&self, path: &Path, is_dir: bool) -> bool {
        let Some(matcher) = self.matchers.iter().find(|m| path.starts_with(&m.root)) else {
            return false;
        };

        if path == matcher.root || matcher.gitignore.is_empty() {
            return false;
        }

        matcher
            .gitignore
            .matched_path_or_any_parents(path, is_dir)
            .is_ignore()
    }

    /// Number of roots with at least one active rule
    pub fn active_sources(&self) -> usize {
        self.matchers
            .iter()
            .filter(|m| !m.gitignore.is_empty())
            .count()
    }
}

/// Ignore configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IgnoreConfig {
    /// Honour each root's `.gitignore` (default: false)
    #[serde(default)]
    pub use_gitignore: bool,

    /// Gitignore-syntax patterns relative to each root
    #[serde(default)]
    pub patterns: Vec<String>,
}
