#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
//! Permission Resolver SDK
//!
//! This crate provides the public API for the `permission_resolver` module:
//!
//! - [`PermissionResolverClient`] - Read path: resolved permission scopes as snapshots
//! - [`PermissionChangesClient`] - Write path: per-transaction [`ChangeBuilder`]s
//! - [`PermissionRowSource`], [`PermissionChangeWriter`] - Collaborators the module consumes
//! - [`TransactionContext`], [`TransactionSynchronization`] - Ambient transaction capability
//! - [`PermissionsSnapshot`], [`Assignment`], [`PermissionsChange`] - Models
//! - [`PermissionResolverError`] - Error types
//!
//! ## Usage
//!
//! ```ignore
//! use permission_resolver_sdk::{PermissionChangesClient, PermissionResolverClient, TargetRef};
//!
//! // Read: one fetch for the closure, one for the assignments
//! let snapshot = resolver.get_permissions("emf:instance").await?;
//!
//! // Write: every service touching the same target shares one builder per transaction
//! changes
//!     .builder(&TargetRef::new("emf:instance"))?
//!     .add_role_assignment_change("regular_user", "CONSUMER")?
//!     .inherit_from_parent_change(true)?;
//! ```

pub mod api;
pub mod changes;
pub mod error;
pub mod models;
pub mod transaction;

// Re-export main types at crate root
pub use api::{
    PermissionChangeWriter, PermissionChangesClient, PermissionResolverClient, PermissionRowSource,
};
pub use changes::{ChangeBuilder, PermissionsChange};
pub use error::PermissionResolverError;
pub use models::{
    Assignment, AssignmentRow, ClosureRow, FlagCode, FlagEncoding, PermissionModelType,
    PermissionsSnapshot, TargetId, TargetRef,
};
pub use transaction::{
    TransactionContext, TransactionId, TransactionStatus, TransactionSynchronization,
};
