//! Domain layer for the permission resolver.

pub mod aggregator;
pub mod changes;
pub mod error;
pub mod hierarchy;
pub mod local_client;
pub mod resolver;

pub use aggregator::{AggregatorState, ChangeAggregator};
pub use changes::TransactionalPermissionChanges;
pub use error::DomainError;
pub use hierarchy::{PermissionGraph, PermissionNode};
pub use local_client::{PermissionChangesLocalClient, PermissionResolverLocalClient};
pub use resolver::HierarchyResolver;
