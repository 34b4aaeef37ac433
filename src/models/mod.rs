pub mod notification;
pub mod session;

pub use notification::{group_by_day, NotificationKind, NotificationPage, NotificationRecord, UnreadCount};
pub use session::Session;
