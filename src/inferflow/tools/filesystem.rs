//! File System Tool
//!
//! Safe, base-directory-rooted file operations for agents. Every agent binds
//! its file-system tool to the base directory from its configuration; all
//! paths are resolved against that root and requests that escape it
//! (`../../../etc/passwd`) are rejected before any I/O happens.
//!
//! Operations mirror what steps actually need: read/write/append/delete,
//! directory listing, existence checks, and JSON convenience wrappers for
//! working-configuration files.

use crate::inferflow::tools::{FileSystem, ToolError};
use async_trait::async_trait;
use std::fs;
use std::path::{Component, Path, PathBuf};

/// Base-directory-rooted file system access.
pub struct FileSystemTool {
    base_dir: PathBuf,
}

impl FileSystemTool {
    /// Create a tool rooted at `base_dir`. The directory is created if it
    /// does not exist yet.
    pub fn new(base_dir: impl Into<PathBuf>) -> Result<Self, ToolError> {
        let base_dir = base_dir.into();
        if !base_dir.exists() {
            fs::create_dir_all(&base_dir)?;
        }
        let base_dir = base_dir
            .canonicalize()
            .map_err(|e| ToolError::Io(format!("cannot resolve base dir: {}", e)))?;
        Ok(Self { base_dir })
    }

    /// Resolve a relative path inside the base directory, rejecting
    /// traversal.
    fn resolve(&self, path: &str) -> Result<PathBuf, ToolError> {
        let requested = Path::new(path);
        if requested.is_absolute() {
            return Err(ToolError::InvalidParameters(format!(
                "absolute paths are not allowed: {}",
                path
            )));
        }
        let mut resolved = self.base_dir.clone();
        for component in requested.components() {
            match component {
                Component::Normal(part) => resolved.push(part),
                Component::CurDir => {}
                Component::ParentDir => {
                    resolved.pop();
                    if !resolved.starts_with(&self.base_dir) {
                        return Err(ToolError::InvalidParameters(format!(
                            "path escapes the base directory: {}",
                            path
                        )));
                    }
                }
                _ => {
                    return Err(ToolError::InvalidParameters(format!(
                        "unsupported path component in: {}",
                        path
                    )))
                }
            }
        }
        if !resolved.starts_with(&self.base_dir) {
            return Err(ToolError::InvalidParameters(format!(
                "path escapes the base directory: {}",
                path
            )));
        }
        Ok(resolved)
    }
}

#[async_trait]
impl FileSystem for FileSystemTool {
    fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    async fn read(&self, path: &str) -> Result<String, ToolError> {
        let resolved = self.resolve(path)?;
        if resolved.is_dir() {
            return Err(ToolError::InvalidParameters(format!(
                "is a directory: {}",
                path
            )));
        }
        Ok(fs::read_to_string(&resolved)?)
    }

    async fn write(&self, path: &str, content: &str) -> Result<String, ToolError> {
        let resolved = self.resolve(path)?;
        if let Some(parent) = resolved.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&resolved, content)?;
        Ok(resolved.display().to_string())
    }

    async fn append(&self, path: &str, content: &str) -> Result<String, ToolError> {
        use std::io::Write;
        let resolved = self.resolve(path)?;
        if let Some(parent) = resolved.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&resolved)?;
        file.write_all(content.as_bytes())?;
        Ok(resolved.display().to_string())
    }

    async fn delete(&self, path: &str) -> Result<String, ToolError> {
        let resolved = self.resolve(path)?;
        if !resolved.exists() {
            return Err(ToolError::NotFound(path.to_string()));
        }
        if resolved.is_dir() {
            fs::remove_dir_all(&resolved)?;
        } else {
            fs::remove_file(&resolved)?;
        }
        Ok(resolved.display().to_string())
    }

    async fn list_directory(&self, path: &str) -> Result<Vec<String>, ToolError> {
        let resolved = self.resolve(path)?;
        if !resolved.is_dir() {
            return Err(ToolError::InvalidParameters(format!(
                "not a directory: {}",
                path
            )));
        }
        let mut names = Vec::new();
        for entry in fs::read_dir(&resolved)? {
            let entry = entry?;
            names.push(entry.file_name().to_string_lossy().to_string());
        }
        names.sort();
        Ok(names)
    }

    async fn exists(&self, path: &str) -> Result<bool, ToolError> {
        Ok(self.resolve(path)?.exists())
    }

    async fn read_json(&self, path: &str) -> Result<serde_json::Value, ToolError> {
        let content = self.read(path).await?;
        serde_json::from_str(&content)
            .map_err(|e| ToolError::ExecutionFailed(format!("invalid JSON in {}: {}", path, e)))
    }

    async fn write_json(
        &self,
        path: &str,
        value: &serde_json::Value,
    ) -> Result<String, ToolError> {
        let content = serde_json::to_string_pretty(value)
            .map_err(|e| ToolError::ExecutionFailed(format!("cannot serialise JSON: {}", e)))?;
        self.write(path, &content).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tool() -> (tempfile::TempDir, FileSystemTool) {
        let dir = tempfile::tempdir().unwrap();
        let tool = FileSystemTool::new(dir.path()).unwrap();
        (dir, tool)
    }

    #[tokio::test]
    async fn write_read_round_trip() {
        let (_dir, tool) = tool();
        tool.write("notes/a.txt", "hello").await.unwrap();
        assert_eq!(tool.read("notes/a.txt").await.unwrap(), "hello");
        assert!(tool.exists("notes/a.txt").await.unwrap());
    }

    #[tokio::test]
    async fn traversal_is_blocked() {
        let (_dir, tool) = tool();
        assert!(matches!(
            tool.read("../../etc/passwd").await,
            Err(ToolError::InvalidParameters(_))
        ));
        assert!(matches!(
            tool.write("/etc/hosts", "x").await,
            Err(ToolError::InvalidParameters(_))
        ));
    }

    #[tokio::test]
    async fn missing_files_surface_not_found() {
        let (_dir, tool) = tool();
        assert!(matches!(
            tool.read("absent.txt").await,
            Err(ToolError::NotFound(_))
        ));
        assert!(matches!(
            tool.delete("absent.txt").await,
            Err(ToolError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn list_directory_is_sorted() {
        let (_dir, tool) = tool();
        tool.write("b.txt", "").await.unwrap();
        tool.write("a.txt", "").await.unwrap();
        assert_eq!(
            tool.list_directory(".").await.unwrap(),
            vec!["a.txt".to_string(), "b.txt".to_string()]
        );
    }

    #[tokio::test]
    async fn json_round_trip() {
        let (_dir, tool) = tool();
        let value = serde_json::json!({"k": [1, 2, 3]});
        tool.write_json("data.json", &value).await.unwrap();
        assert_eq!(tool.read_json("data.json").await.unwrap(), value);
    }

    #[tokio::test]
    async fn append_accumulates() {
        let (_dir, tool) = tool();
        tool.append("log.txt", "a").await.unwrap();
        tool.append("log.txt", "b").await.unwrap();
        assert_eq!(tool.read("log.txt").await.unwrap(), "ab");
    }
}
