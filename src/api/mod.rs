//! Pull side of the sync client: the REST notification service.

use async_trait::async_trait;

use crate::errors::SyncResult;
use crate::models::{NotificationPage, Session};

pub mod client;

pub use client::HttpNotificationApi;

/// The notification service as seen by the reconciler.
///
/// Every call is authenticated with the session's bearer token.
#[async_trait]
pub trait NotificationApi: Send + Sync {
    /// `GET /notifications?page=&limit=`
    async fn list(&self, session: &Session, page: u32, limit: u32) -> SyncResult<NotificationPage>;

    /// `GET /notifications/unread-count`
    async fn unread_count(&self, session: &Session) -> SyncResult<u64>;

    /// `PUT /notifications/{id}/read`
    async fn mark_read(&self, session: &Session, id: &str) -> SyncResult<()>;

    /// `PUT /notifications/read-all`
    async fn mark_all_read(&self, session: &Session) -> SyncResult<()>;

    /// `DELETE /notifications/{id}`
    async fn delete(&self, session: &Session, id: &str) -> SyncResult<()>;
}
