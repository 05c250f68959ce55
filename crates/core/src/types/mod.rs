//! Core types shared across Devbox crates.

pub mod sandbox;

pub use sandbox::*;
