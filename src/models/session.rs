use uuid::Uuid;

use crate::errors::{SyncError, SyncResult};

/// Authenticated identity the sync client runs under.
///
/// A session only exists once both the user id and the bearer token are
/// known; `new` refuses anything less.
#[derive(Clone, PartialEq, Eq)]
pub struct Session {
    user_id: String,
    token: String,
    /// Correlation id for logs, fresh per login.
    session_id: Uuid,
}

impl Session {
    pub fn new(user_id: impl Into<String>, token: impl Into<String>) -> SyncResult<Self> {
        let user_id = user_id.into().trim().to_string();
        let token = token.into().trim().to_string();
        if user_id.is_empty() {
            return Err(SyncError::InvalidSession("user id is empty".into()));
        }
        if token.is_empty() {
            return Err(SyncError::InvalidSession("token is empty".into()));
        }
        Ok(Self {
            user_id,
            token,
            session_id: Uuid::new_v4(),
        })
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }
}

// Keep the bearer token out of logs.
impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("user_id", &self.user_id)
            .field("session_id", &self.session_id)
            .finish_non_exhaustive()
    }
}
