//! Pushes a workspace mirror into its running sandbox.

use std::sync::Arc;

use bytes::Bytes;

use devbox_core::config::SandboxSettings;
use devbox_core::{Error, Result, SandboxId};

use crate::archive::{pack_dir_to_tempfile, Compression};
use crate::engine::ContainerEngine;
use crate::mirror::WorkspaceMirror;

/// Archive-based mirror → sandbox transfer.
#[derive(Clone)]
pub struct SyncProtocol {
    engine: Arc<dyn ContainerEngine>,
    mirror: WorkspaceMirror,
    working_root: String,
    compression: Compression,
}

impl SyncProtocol {
    pub fn new(
        engine: Arc<dyn ContainerEngine>,
        mirror: WorkspaceMirror,
        settings: &SandboxSettings,
    ) -> Self {
        Self {
            engine,
            mirror,
            working_root: settings.working_root.clone(),
            compression: Compression::from_flag(settings.compress_archives),
        }
    }

    /// Replace the files under the sandbox's working root with the mirror's.
    ///
    /// Returns the archive size in bytes. A `TransferFailed` error means the
    /// sandbox may hold a partial copy and the whole push should be retried.
    pub async fn push(&self, id: &SandboxId) -> Result<u64> {
        if !self.mirror.exists(id).await {
            return Err(Error::mirror_missing(id.as_str()));
        }
        let root = self.mirror.root(id)?;
        let spool_dir = self.mirror.base().to_path_buf();
        let compression = self.compression;

        // The spool file is deleted when `spool` drops, on every path out.
        let spool = tokio::task::spawn_blocking(move || {
            pack_dir_to_tempfile(&root, compression, &spool_dir)
        })
        .await
        .map_err(|e| Error::internal(format!("archive task failed: {}", e)))?
        .map_err(|e| {
            Error::transfer_failed(format!("failed to pack mirror of sandbox {}: {}", id, e))
        })?;

        let archive = tokio::fs::read(spool.path()).await?;
        let size = archive.len() as u64;

        self.engine
            .upload_archive(id.as_str(), &self.working_root, Bytes::from(archive))
            .await
            .map_err(|e| match e {
                Error::NotFound(_) | Error::TransferFailed(_) | Error::EngineUnavailable(_) => e,
                other => Error::transfer_failed(format!(
                    "upload to sandbox {} failed: {}",
                    id, other
                )),
            })?;

        tracing::info!(
            sandbox_id = %id,
            bytes = size,
            target = %self.working_root,
            "Workspace synced"
        );
        drop(spool);
        Ok(size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::ContainerSpec;
    use crate::mock::MockEngine;
    use std::collections::HashMap;

    async fn setup() -> (tempfile::TempDir, Arc<MockEngine>, SyncProtocol, SandboxId) {
        let dir = tempfile::tempdir().unwrap();
        let engine = Arc::new(MockEngine::new().with_image("node:18"));
        let id = engine
            .create_container(&ContainerSpec {
                name: "ai-dev-sync-1".into(),
                image: "node:18".into(),
                working_dir: "/app".into(),
                port: 41600,
                bind_host: "127.0.0.1".into(),
                labels: HashMap::new(),
            })
            .await
            .unwrap();
        engine.start(&id).await.unwrap();

        let settings = SandboxSettings::default().with_workdirs_base(dir.path());
        let sync = SyncProtocol::new(engine.clone(), WorkspaceMirror::new(dir.path()), &settings);
        (dir, engine, sync, SandboxId::new(id))
    }

    #[tokio::test]
    async fn test_push_replaces_sandbox_files() {
        let (dir, engine, sync, id) = setup().await;
        let mirror = WorkspaceMirror::new(dir.path());
        mirror.ensure(&id).await.unwrap();

        mirror.write(&id, "App.txt", b"v1").await.unwrap();
        sync.push(&id).await.unwrap();
        assert_eq!(engine.file(id.as_str(), "App.txt"), Some(b"v1".to_vec()));

        mirror.write(&id, "App.txt", b"v2").await.unwrap();
        sync.push(&id).await.unwrap();
        assert_eq!(engine.file(id.as_str(), "App.txt"), Some(b"v2".to_vec()));
    }

    #[tokio::test]
    async fn test_push_without_mirror_fails() {
        let (_dir, _engine, sync, id) = setup().await;
        let err = sync.push(&id).await.unwrap_err();
        assert!(matches!(err, Error::MirrorMissing(_)));
    }

    #[tokio::test]
    async fn test_push_leaves_no_spool_file() {
        let (dir, engine, sync, id) = setup().await;
        let mirror = WorkspaceMirror::new(dir.path());
        mirror.ensure(&id).await.unwrap();
        mirror.write(&id, "index.html", b"<html/>").await.unwrap();

        engine.fail_next_upload();
        let err = sync.push(&id).await.unwrap_err();
        assert!(err.is_retryable());

        sync.push(&id).await.unwrap();

        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with(".sync-"))
            .collect();
        assert!(leftovers.is_empty());
    }
}
