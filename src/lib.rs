//! Multi-variant wheel release pipeline
//!
//! Builds, verifies and publishes Python wheels for several CPU-feature
//! variants of one package: test index first, install check, then the
//! production index and a release on the hosting service.

pub mod build;
pub mod core;
pub mod orchestration;
pub mod plugins;
pub mod security;
pub mod telemetry;
pub mod validation;

pub use crate::core::*;
pub use security::{CommandError, SafeCommandExecutor, SecureTokenManager};
