use std::time::Duration;

use clap::Parser;
use url::Url;
use webdav_session_core::{LockRequest, LockTimeout, QualifiedName};

/// Connection settings for the webdav-session client.
#[derive(Parser, Debug, Clone)]
pub struct Config {
    /// Base URL of the WebDAV collection relative paths resolve against
    #[arg(long, env = "WEBDAV_URL")]
    pub url: Url,

    /// Username for HTTP basic authentication
    #[arg(long, env = "WEBDAV_USERNAME")]
    pub username: Option<String>,

    /// Password for HTTP basic authentication
    #[arg(long, env = "WEBDAV_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// Per-request timeout (seconds)
    #[arg(long, default_value = "30", env = "WEBDAV_TIMEOUT_SECS")]
    pub timeout_secs: u64,

    /// Lock lifetime requested from the server (seconds, 0 = infinite)
    #[arg(long, default_value = "600", env = "WEBDAV_LOCK_TIMEOUT_SECS")]
    pub lock_timeout_secs: u64,

    /// Text placed in the owner element of LOCK requests
    #[arg(long, env = "WEBDAV_LOCK_OWNER")]
    pub lock_owner: Option<String>,
}

impl Config {
    pub fn session_options(&self) -> SessionOptions {
        let lock_timeout = match self.lock_timeout_secs {
            0 => LockTimeout::Infinite,
            secs => LockTimeout::Seconds(secs),
        };
        SessionOptions {
            base_url: self.url.clone(),
            username: self.username.clone(),
            password: self.password.clone(),
            timeout: Duration::from_secs(self.timeout_secs),
            lock: LockRequest {
                owner: self.lock_owner.clone(),
                timeout: Some(lock_timeout),
                ..LockRequest::default()
            },
            extra_properties: Vec::new(),
        }
    }
}

/// Everything a [`Session`](crate::Session) needs to talk to one server.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub base_url: Url,
    pub username: Option<String>,
    pub password: Option<String>,
    pub timeout: Duration,
    /// Defaults for LOCK requests issued through [`Session::lock`](crate::Session::lock).
    pub lock: LockRequest,
    /// Extra properties requested alongside `allprop` in PROPFIND.
    pub extra_properties: Vec<QualifiedName>,
}

impl SessionOptions {
    pub fn new(base_url: Url) -> Self {
        Self {
            base_url,
            username: None,
            password: None,
            timeout: Duration::from_secs(30),
            lock: LockRequest::default(),
            extra_properties: Vec::new(),
        }
    }

    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_from_args() {
        let config = Config::try_parse_from([
            "webdav-session",
            "--url",
            "http://host/dav/",
            "--lock-timeout-secs",
            "0",
            "--lock-owner",
            "alice",
        ])
        .unwrap();

        let options = config.session_options();
        assert_eq!(options.base_url.as_str(), "http://host/dav/");
        assert_eq!(options.timeout, Duration::from_secs(30));
        assert_eq!(options.lock.timeout, Some(LockTimeout::Infinite));
        assert_eq!(options.lock.owner.as_deref(), Some("alice"));
        assert!(options.username.is_none());
    }

    #[test]
    fn test_lock_timeout_seconds() {
        let config = Config::try_parse_from([
            "webdav-session",
            "--url",
            "http://host/dav/",
            "--lock-timeout-secs",
            "120",
        ])
        .unwrap();
        assert_eq!(
            config.session_options().lock.timeout,
            Some(LockTimeout::Seconds(120))
        );
    }

    #[test]
    fn test_options_defaults() {
        let options = SessionOptions::new(Url::parse("http://host/dav/").unwrap())
            .with_credentials("alice", "secret");
        assert_eq!(options.username.as_deref(), Some("alice"));
        assert_eq!(options.password.as_deref(), Some("secret"));
        assert_eq!(options.lock, LockRequest::default());
        assert!(options.extra_properties.is_empty());
    }
}
