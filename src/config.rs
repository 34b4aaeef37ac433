use std::time::Duration;

/// What to do with an optimistic local change when the server rejects it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MutationFailurePolicy {
    /// Leave the local change in place; the next pull reconciles it.
    #[default]
    KeepOptimistic,
    /// Restore the pre-mutation local state.
    Rollback,
}

impl std::str::FromStr for MutationFailurePolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "keep-optimistic" | "keep_optimistic" | "keep" => Ok(Self::KeepOptimistic),
            "rollback" => Ok(Self::Rollback),
            other => anyhow::bail!(
                "unknown mutation failure policy '{}' (expected keep-optimistic or rollback)",
                other
            ),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    /// REST base URL, e.g. `https://api.skillswap.dev/api`.
    pub api_url: String,
    /// Push channel URL. Derived from `api_url` when not set.
    pub ws_url: String,
    pub page_size: u32,
    pub http_timeout_secs: u64,
    /// Retries for transient HTTP failures. 0 = disabled.
    pub http_retries: u32,
    pub reconnect_delay_ms: u64,
    /// Consecutive failed connects before the push channel gives up.
    /// `None` = keep trying.
    pub reconnect_attempts: Option<u32>,
    pub on_mutation_failure: MutationFailurePolicy,
    pub user_id: Option<String>,
    pub token: Option<String>,
    pub log_json: bool,
}

impl Config {
    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}

impl Default for Config {
    fn default() -> Self {
        let api_url = "http://localhost:5000/api".to_string();
        Self {
            ws_url: derive_ws_url(&api_url),
            api_url,
            page_size: 20,
            http_timeout_secs: 15,
            http_retries: 2,
            reconnect_delay_ms: 1000,
            reconnect_attempts: None,
            on_mutation_failure: MutationFailurePolicy::KeepOptimistic,
            user_id: None,
            token: None,
            log_json: false,
        }
    }
}

pub fn load() -> anyhow::Result<Config> {
    dotenvy::dotenv().ok();
    load_from(|key| std::env::var(key).ok())
}

/// Build a config from an arbitrary variable lookup.
pub fn load_from<F>(var: F) -> anyhow::Result<Config>
where
    F: Fn(&str) -> Option<String>,
{
    let defaults = Config::default();
    let non_empty = |key: &str| var(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

    let api_url = non_empty("SKILLSWAP_API_URL")
        .map(|u| u.trim_end_matches('/').to_string())
        .unwrap_or(defaults.api_url);
    url::Url::parse(&api_url)
        .map_err(|e| anyhow::anyhow!("SKILLSWAP_API_URL '{}' is not a valid URL: {}", api_url, e))?;

    let ws_url = non_empty("SKILLSWAP_WS_URL").unwrap_or_else(|| derive_ws_url(&api_url));

    let on_mutation_failure = match non_empty("SKILLSWAP_ON_MUTATION_FAILURE") {
        Some(v) => v.parse()?,
        None => defaults.on_mutation_failure,
    };

    Ok(Config {
        api_url,
        ws_url,
        page_size: non_empty("SKILLSWAP_PAGE_SIZE")
            .and_then(|v| v.parse::<u32>().ok())
            .filter(|n| *n > 0)
            .unwrap_or(defaults.page_size),
        http_timeout_secs: non_empty("SKILLSWAP_HTTP_TIMEOUT_SECS")
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.http_timeout_secs),
        http_retries: non_empty("SKILLSWAP_HTTP_RETRIES")
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.http_retries),
        reconnect_delay_ms: non_empty("SKILLSWAP_RECONNECT_DELAY_MS")
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.reconnect_delay_ms),
        reconnect_attempts: non_empty("SKILLSWAP_RECONNECT_ATTEMPTS").and_then(|v| v.parse().ok()),
        on_mutation_failure,
        user_id: non_empty("SKILLSWAP_USER_ID"),
        token: non_empty("SKILLSWAP_TOKEN"),
        log_json: matches!(
            non_empty("SKILLSWAP_LOG_JSON").as_deref(),
            Some("1") | Some("true") | Some("yes")
        ),
    })
}

/// `http(s)://host/api` → `ws(s)://host/ws`.
fn derive_ws_url(api_url: &str) -> String {
    match url::Url::parse(api_url) {
        Ok(mut u) => {
            let scheme = if u.scheme() == "https" { "wss" } else { "ws" };
            let _ = u.set_scheme(scheme);
            u.set_path("/ws");
            u.set_query(None);
            u.to_string()
        }
        Err(_) => api_url
            .replace("https://", "wss://")
            .replace("http://", "ws://"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn test_defaults() {
        let cfg = load_from(lookup(&[])).unwrap();
        assert_eq!(cfg.api_url, "http://localhost:5000/api");
        assert_eq!(cfg.ws_url, "ws://localhost:5000/ws");
        assert_eq!(cfg.page_size, 20);
        assert_eq!(cfg.on_mutation_failure, MutationFailurePolicy::KeepOptimistic);
        assert!(cfg.reconnect_attempts.is_none());
    }

    #[test]
    fn test_ws_url_derived_from_https_api() {
        let cfg = load_from(lookup(&[("SKILLSWAP_API_URL", "https://api.skillswap.dev/api/")])).unwrap();
        assert_eq!(cfg.api_url, "https://api.skillswap.dev/api");
        assert_eq!(cfg.ws_url, "wss://api.skillswap.dev/ws");
    }

    #[test]
    fn test_explicit_values() {
        let cfg = load_from(lookup(&[
            ("SKILLSWAP_WS_URL", "ws://push.local:9000/socket"),
            ("SKILLSWAP_PAGE_SIZE", "50"),
            ("SKILLSWAP_RECONNECT_ATTEMPTS", "3"),
            ("SKILLSWAP_ON_MUTATION_FAILURE", "rollback"),
            ("SKILLSWAP_USER_ID", "u1"),
        ]))
        .unwrap();
        assert_eq!(cfg.ws_url, "ws://push.local:9000/socket");
        assert_eq!(cfg.page_size, 50);
        assert_eq!(cfg.reconnect_attempts, Some(3));
        assert_eq!(cfg.on_mutation_failure, MutationFailurePolicy::Rollback);
        assert_eq!(cfg.user_id.as_deref(), Some("u1"));
        assert!(cfg.token.is_none());
    }

    #[test]
    fn test_bad_numbers_fall_back() {
        let cfg = load_from(lookup(&[
            ("SKILLSWAP_PAGE_SIZE", "0"),
            ("SKILLSWAP_HTTP_RETRIES", "lots"),
        ]))
        .unwrap();
        assert_eq!(cfg.page_size, 20);
        assert_eq!(cfg.http_retries, 2);
    }

    #[test]
    fn test_bad_policy_is_an_error() {
        assert!(load_from(lookup(&[("SKILLSWAP_ON_MUTATION_FAILURE", "panic")])).is_err());
        assert!(load_from(lookup(&[("SKILLSWAP_API_URL", "not a url")])).is_err());
    }
}
