use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};

/// Phoenix client defaults: reconnect backoff steps, then a flat 5s.
const RECONNECT_STEPS_MS: [u64; 9] = [10, 50, 100, 150, 200, 250, 500, 1000, 2000];
const RECONNECT_CEILING: Duration = Duration::from_secs(5);

/// Socket transport configuration.
#[derive(Debug)]
pub struct TransportConfig {
    /// Base endpoint of the GraphQL socket, e.g. `ws://localhost:4000`.
    pub socket_endpoint: String,
    /// Sent as the `token` connect parameter when present.
    pub auth_token: Option<SecretString>,
    pub heartbeat_interval: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            socket_endpoint: "ws://localhost:4000".into(),
            auth_token: None,
            heartbeat_interval: Duration::from_secs(30),
        }
    }
}

impl TransportConfig {
    /// Full websocket URL for the Phoenix socket mounted at `/socket`.
    /// The endpoint is not validated; the token is percent-encoded.
    pub fn socket_url(&self) -> String {
        let base = self.socket_endpoint.trim_end_matches('/');
        let base = if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            base.to_string()
        };

        let mut url = format!("{base}/socket/websocket?vsn=2.0.0");
        if let Some(token) = &self.auth_token {
            url.push_str("&token=");
            url.push_str(&urlencoding::encode(token.expose_secret()));
        }
        url
    }
}

/// Delay before reconnect attempt number `attempt` (zero-based).
pub fn reconnect_delay(attempt: u32) -> Duration {
    RECONNECT_STEPS_MS
        .get(attempt as usize)
        .map(|ms| Duration::from_millis(*ms))
        .unwrap_or(RECONNECT_CEILING)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn socket_url_appends_path_and_version() {
        let config = TransportConfig {
            socket_endpoint: "ws://localhost:4000/".into(),
            ..Default::default()
        };
        assert_eq!(config.socket_url(), "ws://localhost:4000/socket/websocket?vsn=2.0.0");
    }

    #[test]
    fn socket_url_maps_http_schemes() {
        let plain = TransportConfig {
            socket_endpoint: "http://example.test".into(),
            ..Default::default()
        };
        assert_eq!(plain.socket_url(), "ws://example.test/socket/websocket?vsn=2.0.0");

        let tls = TransportConfig {
            socket_endpoint: "https://example.test".into(),
            ..Default::default()
        };
        assert!(tls.socket_url().starts_with("wss://example.test/socket"));
    }

    #[test]
    fn socket_url_carries_token() {
        let config = TransportConfig {
            auth_token: Some(SecretString::from("abc.def")),
            ..Default::default()
        };
        assert!(config.socket_url().ends_with("?vsn=2.0.0&token=abc.def"));
    }

    #[test]
    fn socket_url_encodes_token() {
        let config = TransportConfig {
            auth_token: Some(SecretString::from("a&b=c+d #%")),
            ..Default::default()
        };
        assert_eq!(
            config.socket_url(),
            "ws://localhost:4000/socket/websocket?vsn=2.0.0&token=a%26b%3Dc%2Bd%20%23%25"
        );
    }

    #[test]
    fn reconnect_backoff_steps_then_ceiling() {
        assert_eq!(reconnect_delay(0), Duration::from_millis(10));
        assert_eq!(reconnect_delay(8), Duration::from_millis(2000));
        assert_eq!(reconnect_delay(9), Duration::from_secs(5));
        assert_eq!(reconnect_delay(500), Duration::from_secs(5));
    }

    #[test]
    fn debug_does_not_leak_token() {
        let config = TransportConfig {
            auth_token: Some(SecretString::from("super-secret")),
            ..Default::default()
        };
        assert!(!format!("{config:?}").contains("super-secret"));
    }
}
