#![deny(unused)]
//! Sandbox lifecycle and workspace synchronization for Devbox.
//!
//! This crate provisions Docker sandboxes for previewing generated projects,
//! keeps a local mirror of each sandbox's workspace, pushes that mirror into
//! the sandbox as a tar archive, runs commands with bounded timeouts, and
//! rebuilds the dev server after edits.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────┐
//! │  SandboxService (one method per operation) │
//! ├──────────────────────┬─────────────────────┤
//! │  SandboxRegistry     │  RebuildPipeline    │
//! │   ImageResolver      │   SyncProtocol      │
//! │   PortAllocator      │   ExecChannel       │
//! ├──────────────────────┴─────────────────────┤
//! │  WorkspaceMirror (<workdirs>/<id>)         │
//! │  archive (tar, optional gzip)              │
//! ├────────────────────────────────────────────┤
//! │  ContainerEngine: DockerEngine | MockEngine│
//! └────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use devbox_sandbox::{DockerEngine, SandboxService};
//!
//! let engine = Arc::new(DockerEngine::new()?);
//! let service = SandboxService::new(engine, config.sandbox.clone());
//!
//! let sandbox = service.create_project("calc").await?;
//! service.write_file(&sandbox.id, "src/App.tsx", source.as_bytes()).await?;
//! service.rebuild(&sandbox.id, None).await?;
//! ```

pub mod archive;
pub mod engine;
pub mod exec;
pub mod image;
pub mod mirror;
pub mod mock;
pub mod ports;
pub mod rebuild;
pub mod registry;
pub mod service;
pub mod sync;

pub use engine::{ContainerEngine, ContainerInfo, ContainerSpec, DockerEngine};
pub use exec::ExecChannel;
pub use mirror::WorkspaceMirror;
pub use mock::MockEngine;
pub use ports::PortAllocator;
pub use rebuild::RebuildPipeline;
pub use registry::SandboxRegistry;
pub use service::SandboxService;
pub use sync::SyncProtocol;
