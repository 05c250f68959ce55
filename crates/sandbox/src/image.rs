//! Base image resolution with a single fallback.

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};

use devbox_core::{Error, PullProgress, Result};

use crate::engine::ContainerEngine;

const PROGRESS_CAPACITY: usize = 256;

/// Ensures a base image is present locally, pulling it when absent.
pub struct ImageResolver {
    engine: Arc<dyn ContainerEngine>,
    progress: broadcast::Sender<PullProgress>,
}

impl ImageResolver {
    pub fn new(engine: Arc<dyn ContainerEngine>) -> Self {
        let (progress, _) = broadcast::channel(PROGRESS_CAPACITY);
        Self { engine, progress }
    }

    /// Receive progress of every pull started after subscribing.
    pub fn subscribe(&self) -> broadcast::Receiver<PullProgress> {
        self.progress.subscribe()
    }

    /// Resolve `primary`, or `fallback` if pulling `primary` fails.
    ///
    /// Returns the image that is now available locally.
    pub async fn ensure(&self, primary: &str, fallback: &str) -> Result<String> {
        let primary_err = match self.ensure_one(primary).await {
            Ok(()) => return Ok(primary.to_string()),
            Err(e @ Error::EngineUnavailable(_)) => return Err(e),
            Err(e) => e,
        };

        if fallback.is_empty() || fallback == primary {
            return Err(Error::image_unavailable(format!(
                "{}: {}",
                primary, primary_err
            )));
        }

        tracing::warn!(
            image = %primary,
            fallback = %fallback,
            error = %primary_err,
            "Primary image unavailable, trying fallback"
        );

        match self.ensure_one(fallback).await {
            Ok(()) => Ok(fallback.to_string()),
            Err(e @ Error::EngineUnavailable(_)) => Err(e),
            Err(fallback_err) => Err(Error::image_unavailable(format!(
                "{} ({}); fallback {} ({})",
                primary, primary_err, fallback, fallback_err
            ))),
        }
    }

    async fn ensure_one(&self, image: &str) -> Result<()> {
        if self.engine.image_exists(image).await? {
            tracing::debug!(image = %image, "Image present locally");
            return Ok(());
        }

        tracing::info!(image = %image, "Pulling image");
        let (tx, mut rx) = mpsc::unbounded_channel::<PullProgress>();
        let broadcast = self.progress.clone();
        let forward = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                tracing::debug!(
                    image = %event.image,
                    status = %event.status,
                    progress = event.progress.as_deref().unwrap_or(""),
                    "Pull progress"
                );
                // No subscribers is fine.
                let _ = broadcast.send(event);
            }
        });

        let result = self.engine.pull_image(image, tx).await;
        // The sender was moved into the pull, so the forwarder drains and ends.
        let _ = forward.await;
        result
    }
}
