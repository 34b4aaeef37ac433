//! The single writer of the notification store.
//!
//! Merges two sources into one [`NotificationStore`]:
//!   - pull: REST fetches through a [`NotificationApi`]
//!   - push: [`ChannelEvent`]s from the session's push channel
//!
//! and applies the user actions (mark read, mark all read, delete)
//! optimistically, before their network request goes out.
//!
//! Two guards keep late responses from landing in the wrong place:
//!   - a session generation, bumped on every activate/deactivate, so nothing
//!     from a torn-down session is ever applied
//!   - a fetch sequence number, so only the most recently issued page fetch
//!     may write the list

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{RwLock, RwLockWriteGuard};
use tracing::{debug, info, warn};

use crate::api::NotificationApi;
use crate::channel::ChannelEvent;
use crate::config::MutationFailurePolicy;
use crate::errors::{SyncError, SyncResult};
use crate::models::{NotificationPage, NotificationRecord, Session};
use crate::store::NotificationStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Inactive,
    /// Channel opening and initial fetch in flight.
    Activating,
    Active,
}

struct Inner {
    store: NotificationStore,
    session: Option<Session>,
    generation: u64,
    state: SyncState,
}

pub struct Reconciler {
    api: Arc<dyn NotificationApi>,
    inner: RwLock<Inner>,
    fetch_seq: AtomicU64,
    policy: MutationFailurePolicy,
    default_page_size: u32,
}

impl Reconciler {
    pub fn new(api: Arc<dyn NotificationApi>, policy: MutationFailurePolicy, default_page_size: u32) -> Self {
        Self {
            api,
            inner: RwLock::new(Inner {
                store: NotificationStore::new(),
                session: None,
                generation: 0,
                state: SyncState::Inactive,
            }),
            fetch_seq: AtomicU64::new(0),
            policy,
            default_page_size: default_page_size.max(1),
        }
    }

    pub fn policy(&self) -> MutationFailurePolicy {
        self.policy
    }

    pub fn default_page_size(&self) -> u32 {
        self.default_page_size
    }

    // ── Lifecycle ─────────────────────────────────────────────

    /// Start a fresh, empty store for `session`. Returns the new generation.
    pub async fn activate(&self, session: Session) -> u64 {
        let mut inner = self.inner.write().await;
        inner.generation += 1;
        inner.store.clear();
        inner.state = SyncState::Activating;
        info!(
            session_id = %session.session_id(),
            user_id = %session.user_id(),
            generation = inner.generation,
            "notification sync activating"
        );
        inner.session = Some(session);
        inner.generation
    }

    /// ACTIVATING → ACTIVE, if `generation` is still current.
    pub async fn mark_active(&self, generation: u64) -> bool {
        let mut inner = self.inner.write().await;
        if inner.generation != generation || inner.state != SyncState::Activating {
            return false;
        }
        inner.state = SyncState::Active;
        true
    }

    /// Tear the session down: clear the store and invalidate everything in
    /// flight.
    pub async fn deactivate(&self) {
        let mut inner = self.inner.write().await;
        inner.generation += 1;
        inner.store.clear();
        inner.state = SyncState::Inactive;
        if let Some(session) = inner.session.take() {
            info!(session_id = %session.session_id(), "notification sync deactivated");
        }
    }

    pub async fn state(&self) -> SyncState {
        self.inner.read().await.state
    }

    pub async fn session(&self) -> Option<Session> {
        self.inner.read().await.session.clone()
    }

    /// Point-in-time copy of the store.
    pub async fn snapshot(&self) -> NotificationStore {
        self.inner.read().await.store.clone()
    }

    pub async fn unread_count(&self) -> u64 {
        self.inner.read().await.store.unread_count()
    }

    async fn current(&self) -> Option<(Session, u64)> {
        let inner = self.inner.read().await;
        inner.session.clone().map(|s| (s, inner.generation))
    }

    /// Write guard plus the session and generation it was taken under, so an
    /// optimistic change lands in the same session the request is sent for.
    async fn begin(&self) -> SyncResult<(Session, u64, RwLockWriteGuard<'_, Inner>)> {
        let inner = self.inner.write().await;
        let session = inner.session.clone().ok_or(SyncError::NoSession)?;
        let generation = inner.generation;
        Ok((session, generation, inner))
    }

    // ── Pull ──────────────────────────────────────────────────

    /// Load one page, replacing the list wholesale.
    ///
    /// On failure the list is emptied and pagination reset to page 1. Either
    /// way the store is only touched if this is still the latest fetch of the
    /// current session. `unread_count` is never changed here.
    pub async fn fetch_notifications(&self, page: u32, page_size: u32) -> SyncResult<NotificationPage> {
        let (session, generation) = self.current().await.ok_or(SyncError::NoSession)?;
        let page = page.max(1);
        let page_size = page_size.max(1);
        let seq = self.fetch_seq.fetch_add(1, Ordering::SeqCst) + 1;

        let result = self.api.list(&session, page, page_size).await;

        let mut inner = self.inner.write().await;
        if inner.generation != generation || self.fetch_seq.load(Ordering::SeqCst) != seq {
            debug!(seq, page, "discarding stale notification page");
            return result;
        }

        match &result {
            Ok(data) => {
                debug!(
                    session_id = %session.session_id(),
                    seq,
                    page = data.current_page,
                    count = data.notifications.len(),
                    "notification page loaded"
                );
                inner.store.replace_page(data.clone(), page_size);
            }
            Err(e) => {
                warn!(session_id = %session.session_id(), seq, page, error = %e, "notification fetch failed, clearing list");
                inner.store.reset_page();
            }
        }
        result
    }

    /// Refresh the server-wide unread total. `Ok(None)` when there is no
    /// session.
    pub async fn fetch_unread_count(&self) -> SyncResult<Option<u64>> {
        let Some((session, generation)) = self.current().await else {
            return Ok(None);
        };

        let count = self.api.unread_count(&session).await.map_err(|e| {
            warn!(session_id = %session.session_id(), error = %e, "unread count fetch failed");
            e
        })?;

        let mut inner = self.inner.write().await;
        if inner.generation == generation {
            inner.store.set_unread_count(count);
        }
        Ok(Some(count))
    }

    // ── User actions ──────────────────────────────────────────

    /// Flip `read` locally, tell the server, then re-pull the unread total.
    pub async fn mark_as_read(&self, id: &str) -> SyncResult<()> {
        let (session, generation, previous) = {
            let (session, generation, mut inner) = self.begin().await?;
            let previous = inner.store.set_read(id, true);
            (session, generation, previous)
        };

        if let Err(e) = self.api.mark_read(&session, id).await {
            warn!(notification_id = %id, error = %e, "mark as read failed");
            if self.policy == MutationFailurePolicy::Rollback && previous == Some(false) {
                let mut inner = self.inner.write().await;
                if inner.generation == generation {
                    inner.store.set_read(id, false);
                }
            }
            return Err(e);
        }

        if let Err(e) = self.fetch_unread_count().await {
            debug!(notification_id = %id, error = %e, "unread count refresh after mark as read failed");
        }
        Ok(())
    }

    /// Mark everything read locally and zero the counter, tell the server,
    /// then reload the current page.
    pub async fn mark_all_as_read(&self) -> SyncResult<()> {
        let (session, generation, flipped, previous_count) = {
            let (session, generation, mut inner) = self.begin().await?;
            let previous_count = inner.store.unread_count();
            (session, generation, inner.store.mark_all_read(), previous_count)
        };

        if let Err(e) = self.api.mark_all_read(&session).await {
            warn!(error = %e, "mark all as read failed");
            if self.policy == MutationFailurePolicy::Rollback {
                let mut inner = self.inner.write().await;
                if inner.generation == generation {
                    for id in &flipped {
                        inner.store.set_read(id, false);
                    }
                    inner.store.set_unread_count(previous_count);
                }
            }
            return Err(e);
        }

        let (page, page_size) = {
            let inner = self.inner.read().await;
            (
                inner.store.pagination().current_page,
                inner.store.page_size().unwrap_or(self.default_page_size),
            )
        };
        if let Err(e) = self.fetch_notifications(page, page_size).await {
            debug!(error = %e, "resync after mark all as read failed");
        }
        Ok(())
    }

    /// Drop a notification locally (adjusting the unread total if it was
    /// unread), then delete it on the server. No re-fetch.
    pub async fn delete_notification(&self, id: &str) -> SyncResult<()> {
        let (session, generation, removed) = {
            let (session, generation, mut inner) = self.begin().await?;
            let removed = inner.store.remove(id);
            if removed.as_ref().is_some_and(|(_, r)| r.is_unread()) {
                inner.store.decrement_unread();
            }
            (session, generation, removed)
        };

        if let Err(e) = self.api.delete(&session, id).await {
            warn!(notification_id = %id, error = %e, "delete notification failed");
            if self.policy == MutationFailurePolicy::Rollback {
                if let Some((index, record)) = removed {
                    let mut inner = self.inner.write().await;
                    if inner.generation == generation {
                        let unread = record.is_unread();
                        if inner.store.restore(index, record) && unread {
                            let count = inner.store.unread_count();
                            inner.store.set_unread_count(count + 1);
                        }
                    }
                }
            }
            return Err(e);
        }
        Ok(())
    }

    // ── Push ──────────────────────────────────────────────────

    /// Apply one push channel event from the session `generation`.
    /// Returns `true` if the store changed.
    pub async fn handle_event(&self, generation: u64, event: ChannelEvent) -> bool {
        match event {
            ChannelEvent::Connected => {
                info!(generation, "push channel connected");
                false
            }
            ChannelEvent::ConnectError(e) => {
                warn!(generation, error = %e, "push channel connect error");
                false
            }
            ChannelEvent::Disconnected(reason) => {
                info!(generation, reason = %reason, "push channel disconnected");
                false
            }
            ChannelEvent::Notification(record) => self.apply_push(generation, record).await,
        }
    }

    async fn apply_push(&self, generation: u64, record: NotificationRecord) -> bool {
        let mut inner = self.inner.write().await;
        if inner.generation != generation {
            debug!(notification_id = %record.id, "dropping push from a closed session");
            return false;
        }
        let Some(user_id) = inner.session.as_ref().map(|s| s.user_id().to_string()) else {
            return false;
        };
        if record.recipient_id != user_id {
            debug!(
                notification_id = %record.id,
                recipient_id = %record.recipient_id,
                "dropping push addressed to another user"
            );
            return false;
        }
        let outcome = inner.store.apply_push(record);
        debug!(?outcome, unread = inner.store.unread_count(), "push applied");
        true
    }
}

// ── Tests ─────────────────────────────────────────────────────
