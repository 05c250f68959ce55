#![deny(unused)]
//! Core types, traits, and error definitions for Devbox.
//!
//! This crate provides the building blocks shared by the sandbox engine,
//! the HTTP gateway and the binary: the error taxonomy, layered
//! configuration, sandbox data types, audit events, the workspace path
//! policy and starter-template hydration.

pub mod config;
pub mod error;
pub mod events;
pub mod fs_policy;
pub mod template;
pub mod traits;
pub mod types;

pub use error::{Error, Result};
pub use events::*;
pub use traits::*;
pub use types::*;
