use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Category tag carried by every notification.
///
/// Unknown tags coming off the wire land in `Other` so that a new server-side
/// category never breaks deserialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Project,
    Bid,
    Message,
    Review,
    Verification,
    #[serde(other)]
    Other,
}

impl NotificationKind {
    pub fn icon(self) -> &'static str {
        match self {
            NotificationKind::Project => "briefcase",
            NotificationKind::Bid => "gavel",
            NotificationKind::Message => "chat",
            NotificationKind::Review => "star",
            NotificationKind::Verification => "shield-check",
            NotificationKind::Other => "bell",
        }
    }

    /// Route prefix the UI uses when a notification has no explicit link.
    pub fn route_prefix(self) -> Option<&'static str> {
        match self {
            NotificationKind::Project => Some("/projects"),
            NotificationKind::Bid => Some("/bids"),
            NotificationKind::Message => Some("/messages"),
            NotificationKind::Review => Some("/reviews"),
            NotificationKind::Verification => Some("/profile/verification"),
            NotificationKind::Other => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationRecord {
    #[serde(alias = "_id")]
    pub id: String,
    #[serde(alias = "recipient")]
    pub recipient_id: String,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
    #[serde(default)]
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

impl NotificationRecord {
    /// Navigation target, if any. `"#"` and empty links are not navigable.
    pub fn target(&self) -> Option<&str> {
        match self.link.as_deref().map(str::trim) {
            None | Some("") | Some("#") => None,
            Some(link) => Some(link),
        }
    }

    pub fn is_unread(&self) -> bool {
        !self.read
    }
}

/// One page of `GET /notifications`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationPage {
    pub notifications: Vec<NotificationRecord>,
    pub total_pages: u32,
    pub current_page: u32,
    pub total: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnreadCount {
    pub unread_count: u64,
}

/// Group records by calendar day (UTC), keeping the incoming order both for
/// the groups and within each group.
pub fn group_by_day(items: &[NotificationRecord]) -> Vec<(NaiveDate, Vec<&NotificationRecord>)> {
    let mut groups: Vec<(NaiveDate, Vec<&NotificationRecord>)> = Vec::new();
    for item in items {
        let day = item.created_at.date_naive();
        match groups.iter_mut().find(|(d, _)| *d == day) {
            Some((_, bucket)) => bucket.push(item),
            None => groups.push((day, vec![item])),
        }
    }
    groups
}

// ── Tests ─────────────────────────────────────────────────────
