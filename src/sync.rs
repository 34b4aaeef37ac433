//! Session lifecycle for the notification sync client.
//!
//! `NotificationSync` is the Session Gate: nothing runs until `start` is
//! handed a [`Session`] (user id + token). Starting:
//!   1. tears down any previous session (channel closed, store cleared)
//!   2. gives the reconciler a fresh store
//!   3. opens exactly one push channel and a listener feeding it into the
//!      reconciler
//!   4. pulls page 1 and the unread total
//!
//! `stop` (or dropping the client) closes the channel exactly once and
//! detaches the listener before the store is cleared.

use std::sync::Arc;

use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::api::{HttpNotificationApi, NotificationApi};
use crate::channel::{ChannelEvent, PushTransport, Subscription, SubscriptionHandle, WebSocketTransport};
use crate::config::{Config, MutationFailurePolicy};
use crate::errors::SyncResult;
use crate::models::{NotificationPage, NotificationRecord, Session};
use crate::reconciler::{Reconciler, SyncState};
use crate::store::NotificationStore;

const UPDATE_BUFFER: usize = 64;

/// Outcome of the initial pull. Either half may have failed independently;
/// the session stays active regardless.
#[derive(Debug)]
pub struct InitialLoad {
    pub page: SyncResult<NotificationPage>,
    pub unread: SyncResult<Option<u64>>,
}

struct ActiveSession {
    session: Session,
    generation: u64,
    channel: SubscriptionHandle,
    listener: JoinHandle<()>,
}

pub struct NotificationSync {
    reconciler: Arc<Reconciler>,
    transport: Arc<dyn PushTransport>,
    active: Mutex<Option<ActiveSession>>,
    updates: broadcast::Sender<NotificationRecord>,
}

impl NotificationSync {
    pub fn new(
        api: Arc<dyn NotificationApi>,
        transport: Arc<dyn PushTransport>,
        policy: MutationFailurePolicy,
        page_size: u32,
    ) -> Self {
        let (updates, _) = broadcast::channel(UPDATE_BUFFER);
        Self {
            reconciler: Arc::new(Reconciler::new(api, policy, page_size)),
            transport,
            active: Mutex::new(None),
            updates,
        }
    }

    pub fn from_config(cfg: &Config) -> anyhow::Result<Self> {
        let api = HttpNotificationApi::from_config(cfg)?;
        let transport = WebSocketTransport::from_config(cfg);
        Ok(Self::new(
            Arc::new(api),
            Arc::new(transport),
            cfg.on_mutation_failure,
            cfg.page_size,
        ))
    }

    /// The reconciler: all reads and user actions go through it.
    pub fn reconciler(&self) -> &Arc<Reconciler> {
        &self.reconciler
    }

    pub async fn snapshot(&self) -> NotificationStore {
        self.reconciler.snapshot().await
    }

    pub async fn state(&self) -> SyncState {
        self.reconciler.state().await
    }

    /// Records applied from the push channel, in arrival order.
    pub fn updates(&self) -> broadcast::Receiver<NotificationRecord> {
        self.updates.subscribe()
    }

    /// Activate `session`, replacing any session already running.
    ///
    /// Fails only if the push channel cannot be set up at all; fetch
    /// failures are reported in [`InitialLoad`].
    pub async fn start(&self, session: Session) -> SyncResult<InitialLoad> {
        let generation = {
            let mut active = self.active.lock().await;
            if let Some(previous) = active.take() {
                info!(
                    session_id = %previous.session.session_id(),
                    "replacing active notification session"
                );
                self.teardown(previous).await;
            }

            let generation = self.reconciler.activate(session.clone()).await;
            let subscription = match self.transport.subscribe(&session) {
                Ok(s) => s,
                Err(e) => {
                    self.reconciler.deactivate().await;
                    return Err(e);
                }
            };
            let channel = subscription.handle();
            let listener = tokio::spawn(listen(
                self.reconciler.clone(),
                generation,
                subscription,
                self.updates.clone(),
            ));

            *active = Some(ActiveSession {
                session,
                generation,
                channel,
                listener,
            });
            generation
        };

        let page_size = self.reconciler.default_page_size();
        let (page, unread) = tokio::join!(
            self.reconciler.fetch_notifications(1, page_size),
            self.reconciler.fetch_unread_count(),
        );
        self.reconciler.mark_active(generation).await;

        Ok(InitialLoad { page, unread })
    }

    /// End the current session. Returns `false` if none was running.
    pub async fn stop(&self) -> bool {
        let previous = self.active.lock().await.take();
        match previous {
            Some(active) => {
                self.teardown(active).await;
                true
            }
            None => false,
        }
    }

    pub async fn is_active(&self) -> bool {
        self.active.lock().await.is_some()
    }

    async fn teardown(&self, active: ActiveSession) {
        if active.channel.close() {
            debug!(
                session_id = %active.session.session_id(),
                generation = active.generation,
                "push channel closed"
            );
        }
        active.listener.abort();
        let _ = active.listener.await;
        self.reconciler.deactivate().await;
    }
}

impl Drop for NotificationSync {
    fn drop(&mut self) {
        if let Ok(mut active) = self.active.try_lock() {
            if let Some(active) = active.take() {
                active.channel.close();
                active.listener.abort();
            }
        }
    }
}

async fn listen(
    reconciler: Arc<Reconciler>,
    generation: u64,
    mut subscription: Subscription,
    updates: broadcast::Sender<NotificationRecord>,
) {
    while let Some(event) = subscription.next().await {
        let pushed = match &event {
            ChannelEvent::Notification(record) => Some(record.clone()),
            _ => None,
        };
        if reconciler.handle_event(generation, event).await {
            if let Some(record) = pushed {
                let _ = updates.send(record);
            }
        }
    }
    debug!(generation, "push listener finished");
}

// ── Tests ─────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::EventSink;
    use crate::errors::SyncError;
    use crate::models::NotificationKind;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    struct StaticApi {
        page: Vec<NotificationRecord>,
        unread: u64,
    }

    #[async_trait]
    impl NotificationApi for StaticApi {
        async fn list(&self, _s: &Session, page: u32, _limit: u32) -> SyncResult<NotificationPage> {
            Ok(NotificationPage {
                notifications: self.page.clone(),
                total_pages: 1,
                current_page: page,
                total: self.page.len() as u64,
            })
        }
        async fn unread_count(&self, _s: &Session) -> SyncResult<u64> {
            Ok(self.unread)
        }
        async fn mark_read(&self, _s: &Session, _id: &str) -> SyncResult<()> {
            Ok(())
        }
        async fn mark_all_read(&self, _s: &Session) -> SyncResult<()> {
            Ok(())
        }
        async fn delete(&self, _s: &Session, _id: &str) -> SyncResult<()> {
            Ok(())
        }
    }

    /// Hands out in-process channels and keeps the producer halves.
    #[derive(Default)]
    struct MemoryTransport {
        sinks: std::sync::Mutex<Vec<(String, EventSink)>>,
        fail: AtomicBool,
    }

    impl MemoryTransport {
        fn emit(&self, index: usize, event: ChannelEvent) -> bool {
            self.sinks.lock().unwrap()[index].1.emit(event)
        }
        fn is_closed(&self, index: usize) -> bool {
            self.sinks.lock().unwrap()[index].1.is_closed()
        }
        fn opened(&self) -> usize {
            self.sinks.lock().unwrap().len()
        }
    }

    impl PushTransport for MemoryTransport {
        fn subscribe(&self, session: &Session) -> SyncResult<Subscription> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(SyncError::Channel("refused".into()));
            }
            let (sink, sub) = Subscription::pair();
            self.sinks
                .lock()
                .unwrap()
                .push((session.user_id().to_string(), sink));
            Ok(sub)
        }
    }

    fn notif(id: &str, recipient: &str) -> NotificationRecord {
        NotificationRecord {
            id: id.into(),
            recipient_id: recipient.into(),
            kind: NotificationKind::Review,
            title: "New review".into(),
            message: "You got five stars".into(),
            link: Some("/reviews/1".into()),
            read: false,
            created_at: Utc::now(),
        }
    }

    fn client(transport: Arc<MemoryTransport>) -> NotificationSync {
        let api = StaticApi {
            page: vec![notif("a", "u1"), notif("b", "u1"), notif("c", "u1")],
            unread: 3,
        };
        NotificationSync::new(
            Arc::new(api),
            transport,
            MutationFailurePolicy::KeepOptimistic,
            20,
        )
    }

    async fn eventually<F, Fut>(mut check: F)
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        for _ in 0..200 {
            if check().await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition never became true");
    }

    #[tokio::test]
    async fn test_start_loads_and_goes_active() {
        let transport = Arc::new(MemoryTransport::default());
        let sync = client(transport.clone());
        assert_eq!(sync.state().await, SyncState::Inactive);

        let load = sync.start(Session::new("u1", "tok").unwrap()).await.unwrap();
        assert_eq!(load.page.unwrap().notifications.len(), 3);
        assert_eq!(load.unread, Ok(Some(3)));

        let snap = sync.snapshot().await;
        assert_eq!(snap.len(), 3);
        assert_eq!(snap.unread_count(), 3);
        assert_eq!(sync.state().await, SyncState::Active);
        assert_eq!(transport.opened(), 1);
    }

    #[tokio::test]
    async fn test_push_flows_into_store_and_updates() {
        let transport = Arc::new(MemoryTransport::default());
        let sync = client(transport.clone());
        let mut updates = sync.updates();
        sync.start(Session::new("u1", "tok").unwrap()).await.unwrap();

        assert!(transport.emit(0, ChannelEvent::Connected));
        assert!(transport.emit(0, ChannelEvent::Notification(notif("x", "u2"))));
        assert!(transport.emit(0, ChannelEvent::Notification(notif("n", "u1"))));

        let pushed = tokio::time::timeout(Duration::from_secs(1), updates.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(pushed.id, "n");

        let snap = sync.snapshot().await;
        assert_eq!(snap.items()[0].id, "n");
        assert!(snap.get("x").is_none());
        assert_eq!(snap.unread_count(), 4);
    }

    #[tokio::test]
    async fn test_restart_closes_previous_channel_first() {
        let transport = Arc::new(MemoryTransport::default());
        let sync = client(transport.clone());
        sync.start(Session::new("u1", "tok").unwrap()).await.unwrap();
        sync.start(Session::new("u3", "tok2").unwrap()).await.unwrap();

        assert_eq!(transport.opened(), 2);
        assert!(transport.is_closed(0));
        assert!(!transport.is_closed(1));

        // The old channel can no longer reach the store.
        assert!(!transport.emit(0, ChannelEvent::Notification(notif("old", "u1"))));
        transport.emit(1, ChannelEvent::Notification(notif("new", "u3")));
        let sync_ref = &sync;
        eventually(|| async move { sync_ref.snapshot().await.get("new").is_some() }).await;
        assert!(sync.snapshot().await.get("old").is_none());
        assert_eq!(
            sync.reconciler().session().await.map(|s| s.user_id().to_string()),
            Some("u3".to_string())
        );
    }

    #[tokio::test]
    async fn test_stop_tears_down_once() {
        let transport = Arc::new(MemoryTransport::default());
        let sync = client(transport.clone());
        sync.start(Session::new("u1", "tok").unwrap()).await.unwrap();

        assert!(sync.stop().await);
        assert!(!sync.stop().await);
        assert!(transport.is_closed(0));
        assert!(!transport.emit(0, ChannelEvent::Notification(notif("late", "u1"))));

        let snap = sync.snapshot().await;
        assert!(snap.is_empty());
        assert_eq!(snap.unread_count(), 0);
        assert_eq!(sync.state().await, SyncState::Inactive);
        assert!(!sync.is_active().await);
    }

    #[tokio::test]
    async fn test_channel_setup_failure_leaves_inactive() {
        let transport = Arc::new(MemoryTransport::default());
        transport.fail.store(true, Ordering::SeqCst);
        let sync = client(transport.clone());

        let err = sync.start(Session::new("u1", "tok").unwrap()).await.unwrap_err();
        assert!(matches!(err, SyncError::Channel(_)));
        assert_eq!(sync.state().await, SyncState::Inactive);
        assert!(!sync.is_active().await);
    }

    #[tokio::test]
    async fn test_drop_closes_channel() {
        let transport = Arc::new(MemoryTransport::default());
        let sync = client(transport.clone());
        sync.start(Session::new("u1", "tok").unwrap()).await.unwrap();
        drop(sync);
        assert!(transport.is_closed(0));
    }
}
