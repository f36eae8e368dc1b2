// ABOUTME: Type-safe identifiers and validated domain types.
// ABOUTME: Uses phantom types to prevent worker id / hostname confusion at compile time.

mod id;
mod namespace;
mod worker_error;

pub use id::{Hostname, HostnameMarker, Id, IdError, MAX_WORKER_ID_LEN, WorkerId, WorkerMarker};
pub use namespace::{NAMESPACE_PREFIX, Namespace};
pub use worker_error::{UnknownErrorKind, WorkerErrorKind};
