//! In-memory notification list for one session.
//!
//! Holds the loaded page (newest first), the server-reported unread total and
//! the pagination of the last successful fetch.
//!
//! `unread_count` is the server's cross-page total. It is *not* derived from
//! the `read` flags of the loaded page and the two are allowed to disagree;
//! `loaded_unread()` gives the page-local figure.
//!
//! Everything that mutates is `pub(crate)`: outside this crate the store is
//! read-only and only the reconciler writes to it.

use std::collections::HashSet;

use crate::models::{NotificationPage, NotificationRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    pub current_page: u32,
    pub total_pages: u32,
    pub total: u64,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            current_page: 1,
            total_pages: 1,
            total: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// New id, prepended.
    Inserted,
    /// Id already present; the stored record was replaced and moved to the front.
    Replaced,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct NotificationStore {
    items: Vec<NotificationRecord>,
    unread_count: u64,
    pagination: Pagination,
    page_size: Option<u32>,
}

impl NotificationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn items(&self) -> &[NotificationRecord] {
        &self.items
    }

    pub fn get(&self, id: &str) -> Option<&NotificationRecord> {
        self.items.iter().find(|n| n.id == id)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn unread_count(&self) -> u64 {
        self.unread_count
    }

    /// Unread records on the loaded page only.
    pub fn loaded_unread(&self) -> usize {
        self.items.iter().filter(|n| n.is_unread()).count()
    }

    pub fn pagination(&self) -> Pagination {
        self.pagination
    }

    /// Page size of the last fetch, if any.
    pub fn page_size(&self) -> Option<u32> {
        self.page_size
    }

    // ── mutation (reconciler only) ─────────────────────────────

    /// Replace the loaded page wholesale. Leaves `unread_count` alone.
    /// Repeated ids keep their first (newest) occurrence.
    pub(crate) fn replace_page(&mut self, page: NotificationPage, page_size: u32) {
        let mut seen = HashSet::with_capacity(page.notifications.len());
        self.items = page
            .notifications
            .into_iter()
            .filter(|n| seen.insert(n.id.clone()))
            .collect();
        self.pagination = Pagination {
            current_page: page.current_page.max(1),
            total_pages: page.total_pages,
            total: page.total,
        };
        self.page_size = Some(page_size);
    }

    /// Failed fetch: drop the list and go back to page 1.
    pub(crate) fn reset_page(&mut self) {
        self.items.clear();
        self.pagination = Pagination::default();
    }

    pub(crate) fn set_unread_count(&mut self, count: u64) {
        self.unread_count = count;
    }

    pub(crate) fn decrement_unread(&mut self) {
        self.unread_count = self.unread_count.saturating_sub(1);
    }

    /// Put a pushed record at the front, keeping ids unique.
    ///
    /// `unread_count` goes up by one when the record is unread and was not
    /// already held as unread.
    pub(crate) fn apply_push(&mut self, record: NotificationRecord) -> PushOutcome {
        let previous = self
            .items
            .iter()
            .position(|n| n.id == record.id)
            .map(|idx| self.items.remove(idx));

        let was_unread = previous.as_ref().is_some_and(NotificationRecord::is_unread);
        if record.is_unread() && !was_unread {
            self.unread_count += 1;
        }
        self.items.insert(0, record);

        match previous {
            Some(_) => PushOutcome::Replaced,
            None => PushOutcome::Inserted,
        }
    }

    /// Set `read` on one record. Returns its previous value, or `None` if the
    /// id is not loaded.
    pub(crate) fn set_read(&mut self, id: &str, read: bool) -> Option<bool> {
        let item = self.items.iter_mut().find(|n| n.id == id)?;
        Some(std::mem::replace(&mut item.read, read))
    }

    /// Mark every loaded record read and zero the unread total. Returns the
    /// ids that flipped.
    pub(crate) fn mark_all_read(&mut self) -> Vec<String> {
        let flipped = self
            .items
            .iter_mut()
            .filter(|n| !n.read)
            .map(|n| {
                n.read = true;
                n.id.clone()
            })
            .collect();
        self.unread_count = 0;
        flipped
    }

    /// Remove a record, returning it with its former position.
    pub(crate) fn remove(&mut self, id: &str) -> Option<(usize, NotificationRecord)> {
        let idx = self.items.iter().position(|n| n.id == id)?;
        Some((idx, self.items.remove(idx)))
    }

    /// Put a removed record back. Returns `false` (and does nothing) if the
    /// id has reappeared meanwhile.
    pub(crate) fn restore(&mut self, index: usize, record: NotificationRecord) -> bool {
        if self.get(&record.id).is_some() {
            return false;
        }
        let index = index.min(self.items.len());
        self.items.insert(index, record);
        true
    }

    pub(crate) fn clear(&mut self) {
        *self = Self::default();
    }
}

// ── Tests ─────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NotificationKind;
    use chrono::Utc;

    fn rec(id: &str, read: bool) -> NotificationRecord {
        NotificationRecord {
            id: id.into(),
            recipient_id: "u1".into(),
            kind: NotificationKind::Project,
            title: format!("title {}", id),
            message: "m".into(),
            link: None,
            read,
            created_at: Utc::now(),
        }
    }

    fn page(items: Vec<NotificationRecord>, current: u32) -> NotificationPage {
        let total = items.len() as u64;
        NotificationPage {
            notifications: items,
            total_pages: 4,
            current_page: current,
            total,
        }
    }

    #[test]
    fn test_replace_page_dedupes_and_keeps_unread_total() {
        let mut store = NotificationStore::new();
        store.set_unread_count(9);
        store.replace_page(page(vec![rec("a", false), rec("b", true), rec("a", true)], 2), 20);

        let ids: Vec<_> = store.items().iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, ["a", "b"]);
        assert!(!store.get("a").unwrap().read);
        assert_eq!(store.unread_count(), 9);
        assert_eq!(store.loaded_unread(), 1);
        assert_eq!(store.pagination().current_page, 2);
        assert_eq!(store.page_size(), Some(20));
    }

    #[test]
    fn test_reset_page_goes_back_to_page_one() {
        let mut store = NotificationStore::new();
        store.replace_page(page(vec![rec("a", false)], 3), 20);
        store.reset_page();
        assert!(store.is_empty());
        assert_eq!(store.pagination(), Pagination::default());
    }

    #[test]
    fn test_push_prepends_and_counts() {
        let mut store = NotificationStore::new();
        store.replace_page(page(vec![rec("n1", false)], 1), 20);
        store.set_unread_count(1);

        assert_eq!(store.apply_push(rec("n2", false)), PushOutcome::Inserted);
        assert_eq!(store.items()[0].id, "n2");
        assert_eq!(store.unread_count(), 2);

        // Already-read pushes don't count.
        store.apply_push(rec("n3", true));
        assert_eq!(store.unread_count(), 2);
    }

    #[test]
    fn test_duplicate_push_replaces() {
        let mut store = NotificationStore::new();
        store.replace_page(page(vec![rec("n1", false), rec("n2", false)], 1), 20);
        store.set_unread_count(2);

        assert_eq!(store.apply_push(rec("n2", false)), PushOutcome::Replaced);
        assert_eq!(store.len(), 2);
        assert_eq!(store.items()[0].id, "n2");
        assert_eq!(store.unread_count(), 2);

        // A read record re-pushed as unread counts again.
        store.set_read("n1", true);
        store.apply_push(rec("n1", false));
        assert_eq!(store.unread_count(), 3);
    }

    #[test]
    fn test_unread_decrement_floors_at_zero() {
        let mut store = NotificationStore::new();
        store.set_unread_count(1);
        store.decrement_unread();
        store.decrement_unread();
        assert_eq!(store.unread_count(), 0);
    }

    #[test]
    fn test_mark_all_read_reports_flipped_ids() {
        let mut store = NotificationStore::new();
        store.replace_page(page(vec![rec("a", false), rec("b", true), rec("c", false)], 1), 20);
        store.set_unread_count(5);
        let flipped = store.mark_all_read();
        assert_eq!(flipped, ["a", "c"]);
        assert!(store.items().iter().all(|n| n.read));
        assert_eq!(store.unread_count(), 0);
    }

    #[test]
    fn test_remove_and_restore() {
        let mut store = NotificationStore::new();
        store.replace_page(page(vec![rec("a", false), rec("b", false), rec("c", false)], 1), 20);
        let (idx, removed) = store.remove("b").unwrap();
        assert_eq!(idx, 1);
        assert!(store.remove("b").is_none());

        assert!(store.restore(idx, removed.clone()));
        let ids: Vec<_> = store.items().iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, ["a", "b", "c"]);

        // Restoring an id that is already present does nothing.
        assert!(!store.restore(0, removed));
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn test_set_read_unknown_id() {
        let mut store = NotificationStore::new();
        assert_eq!(store.set_read("missing", true), None);
    }
}
