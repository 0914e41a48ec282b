//! Permission Resolver Module
//!
//! Reconstructs permission scopes (parent and library chains plus role
//! assignments) from flat closure rows and collects permission changes per
//! transaction, applying them once just before the transaction commits.
#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

pub mod config;
pub mod domain;
pub mod infra;
pub mod module;

pub use config::{PermissionResolverConfig, SeedConfig};
pub use module::{InProcessInfra, PermissionResolverModule};
