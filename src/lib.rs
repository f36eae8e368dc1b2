// ABOUTME: Library root for storage-operator - exposes the reconciliation engine for testing.
// ABOUTME: The daemon binary is in main.rs.

pub mod backend;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod flow;
pub mod http;
pub mod loops;
pub mod shutdown;
pub mod store;
pub mod types;
pub mod volume_config;
