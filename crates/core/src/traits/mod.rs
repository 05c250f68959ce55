//! Core traits for Devbox.

pub mod events;

pub use events::*;
