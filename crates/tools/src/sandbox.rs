//! Path sandbox for file-touching tools.
//!
//! When a sandbox root is configured, path-like tool parameters are
//! rewritten before the handler runs: relative paths join the root,
//! and absolute paths that escape the root collapse to
//! `<root>/<basename>`. Shell tools additionally get absolute path
//! tokens in their command strings rewritten and HOME/TMPDIR pointed
//! at the root.

use std::path::{Component, Path, PathBuf};

/// A configured sandbox root.
#[derive(Debug, Clone)]
pub struct Sandbox {
    root: PathBuf,
}

impl Sandbox {
    /// Create a sandbox rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The sandbox root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Rewrite one path according to the sandbox rules.
    pub fn resolve(&self, path: &str) -> PathBuf {
        let candidate = Path::new(path);
        let joined = if candidate.is_absolute() {
            normalize(candidate)
        } else {
            normalize(&self.root.join(candidate))
        };
        if joined.starts_with(&self.root) {
            joined
        } else {
            // Escapes redirect to the root, keeping only the file name.
            let basename = candidate
                .file_name()
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("unnamed"));
            self.root.join(basename)
        }
    }

    /// Whether a parameter name is path-like: `path`, `*_path`, `*Path`.
    pub fn is_path_param(name: &str) -> bool {
        name == "path" || name.ends_with("_path") || name.ends_with("Path")
    }

    /// Rewrite every path-like string parameter in place.
    pub fn rewrite_params(&self, params: &mut serde_json::Value) {
        let Some(map) = params.as_object_mut() else {
            return;
        };
        for (name, value) in map.iter_mut() {
            if Self::is_path_param(name)
                && let Some(path) = value.as_str()
            {
                *value = serde_json::Value::String(self.resolve(path).display().to_string());
            }
        }
    }

    /// Rewrite absolute path tokens inside a shell command string.
    pub fn rewrite_command(&self, command: &str) -> String {
        command
            .split(' ')
            .map(|token| {
                if token.starts_with('/') {
                    self.resolve(token).display().to_string()
                } else {
                    token.to_string()
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Environment overrides for subprocess tools.
    pub fn env(&self) -> Vec<(&'static str, String)> {
        let root = self.root.display().to_string();
        vec![("HOME", root.clone()), ("TMPDIR", root)]
    }
}

/// Lexical normalization: resolves `.` and `..` without touching the
/// filesystem.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    out
}
