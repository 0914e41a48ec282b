//! Configuration for the permission resolver.

use permission_resolver_sdk::{AssignmentRow, ClosureRow, FlagEncoding};
use serde::Deserialize;

/// Configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PermissionResolverConfig {
    /// Raw codes the store uses for boolean flag columns.
    pub flag_encoding: FlagEncoding,
    /// Rows loaded into the in-memory store at startup.
    pub seed: SeedConfig,
}

/// Initial contents of the in-memory store.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SeedConfig {
    pub scopes: Vec<ClosureRow>,
    pub assignments: Vec<AssignmentRow>,
}

impl PermissionResolverConfig {
    /// Parse from a JSON value, e.g. the module's section of the app config.
    ///
    /// # Errors
    ///
    /// Unknown fields or mistyped values.
    pub fn from_value(value: serde_json::Value) -> anyhow::Result<Self> {
        Ok(serde_json::from_value(value)?)
    }
}
