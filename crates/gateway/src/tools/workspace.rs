use std::io;
use std::path::{Component, Path, PathBuf};

use super::error::{ToolError, ToolResult};

/// A directory that filesystem tools are confined to.
///
/// Relative paths are resolved against the root. Absolute paths, `..` that
/// climbs above the root, and symlinks that lead outside it are rejected
/// rather than clamped.
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    pub fn new<P: AsRef<Path>>(root: P) -> io::Result<Self> {
        std::fs::create_dir_all(root.as_ref())?;
        let root = root.as_ref().canonicalize()?;
        Ok(Self { root })
    }

    /// Map a workspace-relative path to a location inside the root
    pub fn resolve(&self, relative: &str) -> ToolResult<PathBuf> {
        let path = Path::new(relative);
        let mut normalized = PathBuf::new();

        for component in path.components() {
            match component {
                Component::CurDir => {}
                Component::Normal(part) => normalized.push(part),
                Component::ParentDir => {
                    if !normalized.pop() {
                        return Err(ToolError::PathEscape(relative.to_string()));
                    }
                }
                Component::RootDir | Component::Prefix(_) => {
                    return Err(ToolError::PathEscape(relative.to_string()));
                }
            }
        }

        let candidate = self.root.join(&normalized);
        self.ensure_contained(&candidate, relative)?;
        Ok(candidate)
    }

    /// Follow symlinks on the deepest part of the path that exists
    fn ensure_contained(&self, candidate: &Path, relative: &str) -> ToolResult<()> {
        let existing = candidate
            .ancestors()
            .find(|p| std::fs::symlink_metadata(p).is_ok())
            .unwrap_or(self.root.as_path());

        // a dangling symlink cannot be canonicalized and is treated as escaping
        let real = existing
            .canonicalize()
            .map_err(|_| ToolError::PathEscape(relative.to_string()))?;
        if real.starts_with(&self.root) {
            Ok(())
        } else {
            Err(ToolError::PathEscape(relative.to_string()))
        }
    }

    pub async fn write(&self, relative: &str, content: &str) -> ToolResult<u64> {
        let path = self.resolve(relative)?;
        if path == self.root {
            return Err(ToolError::InvalidParameters(
                "'path' must name a file".to_string(),
            ));
        }
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| io_error(relative, e))?;
        }
        tokio::fs::write(&path, content)
            .await
            .map_err(|e| io_error(relative, e))?;
        Ok(content.len() as u64)
    }

    pub async fn read(&self, relative: &str) -> ToolResult<String> {
        let path = self.resolve(relative)?;
        tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| io_error(relative, e))
    }

    /// Sorted entry names; directories carry a trailing `/`
    pub async fn list(&self, relative: &str) -> ToolResult<Vec<String>> {
        let path = self.resolve(relative)?;
        let mut dir = tokio::fs::read_dir(&path)
            .await
            .map_err(|e| io_error(relative, e))?;

        let mut entries = Vec::new();
        while let Some(entry) = dir.next_entry().await.map_err(|e| io_error(relative, e))? {
            let mut name = entry.file_name().to_string_lossy().into_owned();
            if entry
                .file_type()
                .await
                .map(|t| t.is_dir())
                .unwrap_or(false)
            {
                name.push('/');
            }
            entries.push(name);
        }
        entries.sort();
        Ok(entries)
    }
}

fn io_error(relative: &str, error: io::Error) -> ToolError {
    match error.kind() {
        io::ErrorKind::NotFound => {
            ToolError::InvalidParameters(format!("The path '{}' does not exist", relative))
        }
        _ => ToolError::ExecutionError(format!("{}: {}", relative, error)),
    }
}
