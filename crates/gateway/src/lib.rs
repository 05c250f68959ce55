#![deny(unused)]
//! HTTP gateway for Devbox.
//!
//! This crate exposes the sandbox service over a local JSON API. Every
//! response carries `success`; failures add an `error` object with a stable
//! code and a message.

pub mod response;
pub mod server;

pub use response::{ApiError, ApiResponse, ErrorBody};
pub use server::{GatewayConfig, GatewayServer};
