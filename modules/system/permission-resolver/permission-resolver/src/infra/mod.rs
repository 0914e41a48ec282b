//! In-process infrastructure adapters.

pub mod local_tx;
pub mod memory_store;

pub use local_tx::{BoxTxFuture, LocalTransactionManager};
pub use memory_store::InMemoryPermissionStore;
