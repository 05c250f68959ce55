//! Local workspace mirrors.
//!
//! Each sandbox owns a directory `<base>/<sandbox id>` holding the
//! authoritative copy of its files. The in-sandbox filesystem is a replica
//! that is only refreshed by [`crate::sync::SyncProtocol::push`].

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use devbox_core::fs_policy::{to_slash_path, validate_workspace_path};
use devbox_core::template::ProjectTemplate;
use devbox_core::{Error, Result, SandboxId};

/// On-disk mirrors for every sandbox, rooted at one base directory.
#[derive(Debug, Clone)]
pub struct WorkspaceMirror {
    base: PathBuf,
}

impl WorkspaceMirror {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    /// Mirror root for a sandbox. The directory may not exist yet.
    pub fn root(&self, id: &SandboxId) -> Result<PathBuf> {
        let raw = id.as_str();
        if raw.is_empty()
            || raw == "."
            || raw == ".."
            || raw.contains(['/', '\\', '\0'])
        {
            return Err(Error::path_invalid(format!("invalid sandbox id: {:?}", raw)));
        }
        Ok(self.base.join(raw))
    }

    pub async fn exists(&self, id: &SandboxId) -> bool {
        match self.root(id) {
            Ok(root) => tokio::fs::metadata(&root)
                .await
                .map(|m| m.is_dir())
                .unwrap_or(false),
            Err(_) => false,
        }
    }

    /// Create the mirror root if needed and return it.
    pub async fn ensure(&self, id: &SandboxId) -> Result<PathBuf> {
        let root = self.root(id)?;
        tokio::fs::create_dir_all(&root).await?;
        Ok(root)
    }

    /// Write `content` at `relative_path`, creating parent directories.
    ///
    /// The mirror root itself is never created here: writing to a sandbox
    /// without a mirror fails with `MirrorMissing`. Parents are created one
    /// level at a time below the root, so a write racing a [`Self::delete`]
    /// cannot bring the root back.
    pub async fn write(&self, id: &SandboxId, relative_path: &str, content: &[u8]) -> Result<()> {
        let root = self.root(id)?;
        let rel = validate_workspace_path(&root, relative_path)?;
        let missing = || Error::mirror_missing(id.as_str());

        if !tokio::fs::try_exists(&root).await? {
            return Err(missing());
        }

        let mut dir = root.clone();
        if let Some(parent) = rel.parent() {
            for component in parent.components() {
                dir.push(component);
                match tokio::fs::create_dir(&dir).await {
                    Ok(()) => {}
                    Err(e) if e.kind() == ErrorKind::AlreadyExists => {}
                    Err(e) if e.kind() == ErrorKind::NotFound => return Err(missing()),
                    Err(e) => return Err(e.into()),
                }
            }
        }

        match tokio::fs::write(root.join(&rel), content).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => return Err(missing()),
            Err(e) => return Err(e.into()),
        }

        tracing::debug!(
            sandbox_id = %id,
            path = %to_slash_path(&rel),
            bytes = content.len(),
            "Mirror file written"
        );
        Ok(())
    }

    pub async fn read(&self, id: &SandboxId, relative_path: &str) -> Result<Vec<u8>> {
        let root = self.root(id)?;
        let rel = validate_workspace_path(&root, relative_path)?;

        match tokio::fs::read(root.join(&rel)).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if matches!(e.kind(), ErrorKind::NotFound | ErrorKind::IsADirectory) => Err(
                Error::not_found(format!("file '{}' in sandbox {}", relative_path, id)),
            ),
            Err(e) => Err(e.into()),
        }
    }

    /// Every directory and file under the mirror, relative and slash-separated.
    ///
    /// Directories come first, then files, each group sorted by path. A missing
    /// mirror yields an empty list.
    pub async fn read_all(&self, id: &SandboxId) -> Result<Vec<String>> {
        let root = self.root(id)?;
        if !tokio::fs::try_exists(&root).await? {
            return Ok(Vec::new());
        }

        let listing = tokio::task::spawn_blocking(move || -> Result<Vec<String>> {
            let mut dirs = Vec::new();
            let mut files = Vec::new();

            for entry in WalkDir::new(&root).min_depth(1).follow_links(false) {
                let entry = entry.map_err(|e| Error::Io(std::io::Error::other(e)))?;
                let rel = entry
                    .path()
                    .strip_prefix(&root)
                    .map_err(|e| Error::internal(e.to_string()))?;
                let name = to_slash_path(rel);
                if entry.file_type().is_dir() {
                    dirs.push(name);
                } else {
                    files.push(name);
                }
            }

            dirs.sort();
            files.sort();
            dirs.extend(files);
            Ok(dirs)
        })
        .await
        .map_err(|e| Error::internal(format!("mirror listing task failed: {}", e)))??;

        Ok(listing)
    }

    /// Remove one file or directory. Absent paths are not an error.
    pub async fn remove_file(&self, id: &SandboxId, relative_path: &str) -> Result<()> {
        let root = self.root(id)?;
        let rel = validate_workspace_path(&root, relative_path)?;
        let target = root.join(&rel);

        let result = match tokio::fs::symlink_metadata(&target).await {
            Ok(meta) if meta.is_dir() => tokio::fs::remove_dir_all(&target).await,
            Ok(_) => tokio::fs::remove_file(&target).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => {
                tracing::debug!(sandbox_id = %id, path = %to_slash_path(&rel), "Mirror path removed");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Recursively remove the whole mirror. Idempotent.
    pub async fn delete(&self, id: &SandboxId) -> Result<()> {
        let root = self.root(id)?;
        match tokio::fs::remove_dir_all(&root).await {
            Ok(()) => {
                tracing::info!(sandbox_id = %id, "Workspace mirror deleted");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Write every file of a hydrated starter template into an existing
    /// mirror. Returns the file count.
    pub async fn seed(&self, id: &SandboxId, template: &ProjectTemplate) -> Result<usize> {
        for file in &template.files {
            self.write(id, &file.path, file.content.as_bytes()).await?;
        }
        tracing::info!(
            sandbox_id = %id,
            template = %template.name,
            files = template.files.len(),
            "Workspace mirror seeded"
        );
        Ok(template.files.len())
    }
}
