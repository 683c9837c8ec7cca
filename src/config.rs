use std::env;
use std::time::Duration;

use log::warn;
use url::Url;

use crate::backoff::ReconnectPolicy;
use crate::error::Result;
use crate::models::Identity;

pub const DEFAULT_SERVER_URL: &str = "ws://127.0.0.1:3003/ws";

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub server_url: String,
    pub connect_timeout: Duration,
    pub reconnect: ReconnectPolicy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            server_url: DEFAULT_SERVER_URL.to_string(),
            connect_timeout: Duration::from_secs(10),
            reconnect: ReconnectPolicy::default(),
        }
    }
}

impl SessionConfig {
    pub fn new(server_url: impl Into<String>) -> Self {
        SessionConfig {
            server_url: server_url.into(),
            ..Default::default()
        }
    }

    /// Reads overrides from `ROOM_SYNC_URL`, `ROOM_SYNC_CONNECT_TIMEOUT_MS`
    /// and `ROOM_SYNC_MAX_ATTEMPTS`. Unparseable values fall back to the
    /// defaults.
    pub fn from_env() -> Self {
        let mut config = SessionConfig::default();

        if let Ok(url) = env::var("ROOM_SYNC_URL") {
            config.server_url = url;
        }
        if let Some(ms) = parse_var::<u64>("ROOM_SYNC_CONNECT_TIMEOUT_MS") {
            config.connect_timeout = Duration::from_millis(ms);
        }
        if let Some(attempts) = parse_var::<u32>("ROOM_SYNC_MAX_ATTEMPTS") {
            config.reconnect.max_attempts = attempts;
        }

        config
    }

    /// Server URL with the credential attached as query parameters.
    pub fn connect_url(&self, identity: &Identity) -> Result<Url> {
        let mut url = Url::parse(&self.server_url)?;
        url.query_pairs_mut()
            .append_pair("token", &identity.token)
            .append_pair("userId", &identity.user_id);
        Ok(url)
    }
}

fn parse_var<T: std::str::FromStr>(name: &str) -> Option<T> {
    let raw = env::var(name).ok()?;
    match raw.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!("Ignoring {}={:?}: not a valid number", name, raw);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_url_carries_credential() {
        let config = SessionConfig::new("wss://chat.example.com/socket");
        let url = config
            .connect_url(&Identity::new("abc def", "user-1"))
            .unwrap();
        assert_eq!(url.scheme(), "wss");
        assert_eq!(url.path(), "/socket");
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert_eq!(
            pairs,
            vec![
                ("token".to_string(), "abc def".to_string()),
                ("userId".to_string(), "user-1".to_string()),
            ]
        );
    }

    #[test]
    fn invalid_url_is_reported() {
        let config = SessionConfig::new("not a url");
        assert!(matches!(
            config.connect_url(&Identity::new("t", "u")),
            Err(crate::error::ChatError::InvalidUrl(_))
        ));
    }
}
