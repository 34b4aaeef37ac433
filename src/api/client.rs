//! HTTP implementation of the notification service contract.
//! Uses reqwest-middleware for transient-failure retries.

use async_trait::async_trait;
use reqwest::Method;
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware, RequestBuilder};
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};
use serde::de::DeserializeOwned;
use std::time::Duration;

use super::NotificationApi;
use crate::config::Config;
use crate::errors::{SyncError, SyncResult};
use crate::models::{NotificationPage, Session, UnreadCount};

pub struct HttpNotificationApi {
    base_url: String,
    client: ClientWithMiddleware,
}

impl HttpNotificationApi {
    pub fn new(base_url: impl Into<String>, timeout: Duration, max_retries: u32) -> anyhow::Result<Self> {
        let reqwest_client = reqwest::Client::builder()
            .use_rustls_tls()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(5))
            .user_agent(concat!("skillswap-notify/", env!("CARGO_PKG_VERSION")))
            .build()?;

        let mut builder = ClientBuilder::new(reqwest_client);
        if max_retries > 0 {
            let retry_policy = ExponentialBackoff::builder().build_with_max_retries(max_retries);
            builder = builder.with(RetryTransientMiddleware::new_with_policy(retry_policy));
        }

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: builder.build(),
        })
    }

    pub fn from_config(cfg: &Config) -> anyhow::Result<Self> {
        Self::new(cfg.api_url.clone(), cfg.http_timeout(), cfg.http_retries)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, method: Method, path: &str, session: &Session) -> RequestBuilder {
        self.client
            .request(method, format!("{}{}", self.base_url, path))
            .bearer_auth(session.token())
            .header("Accept", "application/json")
    }

    /// Send and require a 2xx. Returns the raw body.
    async fn execute(&self, req: RequestBuilder) -> SyncResult<String> {
        let resp = req.send().await.map_err(|e| {
            tracing::warn!("notification service unreachable: {}", e);
            SyncError::from(e)
        })?;

        let status = resp.status();
        let url = resp.url().to_string();
        let body = resp.text().await.map_err(SyncError::from)?;

        if !status.is_success() {
            tracing::info!(%url, %status, "notification service returned an error");
            return Err(SyncError::from_response(status, &body));
        }
        Ok(body)
    }

    async fn execute_json<T: DeserializeOwned>(&self, req: RequestBuilder) -> SyncResult<T> {
        let body = self.execute(req).await?;
        serde_json::from_str(&body).map_err(|e| {
            tracing::info!(
                "failed to deserialize notification response: {} (body: {})",
                e,
                body_preview(&body)
            );
            SyncError::Malformed(e.to_string())
        })
    }
}

/// First 200 characters of a body, cut on a char boundary.
fn body_preview(body: &str) -> &str {
    body.char_indices()
        .nth(200)
        .map_or(body, |(i, _)| &body[..i])
}

fn id_path(id: &str, suffix: &str) -> String {
    format!("/notifications/{}{}", urlencoding::encode(id), suffix)
}

#[async_trait]
impl NotificationApi for HttpNotificationApi {
    async fn list(&self, session: &Session, page: u32, limit: u32) -> SyncResult<NotificationPage> {
        let req = self
            .request(Method::GET, "/notifications", session)
            .query(&[("page", page), ("limit", limit)]);
        self.execute_json(req).await
    }

    async fn unread_count(&self, session: &Session) -> SyncResult<u64> {
        let req = self.request(Method::GET, "/notifications/unread-count", session);
        let count: UnreadCount = self.execute_json(req).await?;
        Ok(count.unread_count)
    }

    async fn mark_read(&self, session: &Session, id: &str) -> SyncResult<()> {
        let req = self.request(Method::PUT, &id_path(id, "/read"), session);
        self.execute(req).await.map(|_| ())
    }

    async fn mark_all_read(&self, session: &Session) -> SyncResult<()> {
        // The body may echo updated preferences; nothing here needs them.
        let req = self.request(Method::PUT, "/notifications/read-all", session);
        self.execute(req).await.map(|_| ())
    }

    async fn delete(&self, session: &Session, id: &str) -> SyncResult<()> {
        let req = self.request(Method::DELETE, &id_path(id, ""), session);
        self.execute(req).await.map(|_| ())
    }
}

// ── Tests ──────────────────────────────────────────────────────
