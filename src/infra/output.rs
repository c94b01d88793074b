//! Filesystem writer for exported documents.

use std::{io, path::PathBuf};

use thiserror::Error;
use tokio::fs;

use crate::domain::route::ExportTarget;

#[derive(Debug, Error)]
#[error("failed to write `{}`", path.display())]
pub struct FileWriteError {
    pub path: PathBuf,
    #[source]
    pub source: io::Error,
}

/// Writes documents under the export root, one file per target.
#[derive(Debug, Clone)]
pub struct RouteWriter {
    root: PathBuf,
}

impl RouteWriter {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Create missing parent directories, then write `document` to the
    /// target's file, replacing whatever was there. Returns the written path.
    pub async fn write(
        &self,
        target: &ExportTarget,
        document: &str,
    ) -> Result<PathBuf, FileWriteError> {
        let path = target.output_path(&self.root);

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|source| FileWriteError {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }

        fs::write(&path, document.as_bytes())
            .await
            .map_err(|source| FileWriteError {
                path: path.clone(),
                source,
            })?;

        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::domain::route::Route;

    #[tokio::test]
    async fn nested_routes_create_directories() {
        let dir = TempDir::new().expect("temp dir");
        let writer = RouteWriter::new(dir.path());
        let target = ExportTarget::page(Route::parse("/docs/intro").expect("route"));

        let path = writer.write(&target, "<p>intro</p>").await.expect("write");

        assert_eq!(path, dir.path().join("docs/intro/index.html"));
        assert_eq!(std::fs::read_to_string(path).expect("read"), "<p>intro</p>");
    }

    #[tokio::test]
    async fn existing_file_is_replaced() {
        let dir = TempDir::new().expect("temp dir");
        std::fs::write(dir.path().join("index.html"), "old shell").expect("seed");
        let writer = RouteWriter::new(dir.path());

        writer
            .write(&ExportTarget::page(Route::root()), "new")
            .await
            .expect("write");

        assert_eq!(
            std::fs::read_to_string(dir.path().join("index.html")).expect("read"),
            "new"
        );
    }

    #[tokio::test]
    async fn blocked_directory_reports_path() {
        let dir = TempDir::new().expect("temp dir");
        std::fs::write(dir.path().join("about"), "a file, not a directory").expect("seed");
        let writer = RouteWriter::new(dir.path());

        let err = writer
            .write(&ExportTarget::page(Route::parse("/about").expect("route")), "x")
            .await
            .expect_err("parent is a file");

        assert_eq!(err.path, dir.path().join("about"));
    }
}
