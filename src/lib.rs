//! SkillSwap notification sync library.
//!
//! Keeps a session's notification list and unread counter in step with the
//! REST notification service (pull) and the real-time push channel (push).
//! Re-exports the modules used by the CLI and the integration tests in `tests/`.

pub mod api;
pub mod channel;
pub mod config;
pub mod errors;
pub mod models;
pub mod reconciler;
pub mod store;
pub mod sync;

pub use errors::{SyncError, SyncResult};
pub use reconciler::{Reconciler, SyncState};
pub use sync::{InitialLoad, NotificationSync};
