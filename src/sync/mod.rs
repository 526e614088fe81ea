//! Offline queue and replay: submissions that cannot reach the Activity Store
//! are persisted in a workspace slot and replayed in order when the host
//! reports connectivity again.

mod connectivity;
mod queue;
mod service;
mod settings;

pub use connectivity::{ConnectivityEvent, ConnectivityMonitor, Subscription};
pub use service::{FlushPolicy, FlushReport, SyncError, SyncService};
pub use settings::{StoreKind, SyncSettings};
