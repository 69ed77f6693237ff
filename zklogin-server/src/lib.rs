#![deny(clippy::all, clippy::pedantic, clippy::nursery)]
//! HTTP service for zkLogin proof generation.

pub mod api;
pub mod args;
pub mod telemetry;

pub use api::{router, spawn_sweeper, ApiError, AppState};
pub use args::Args;
