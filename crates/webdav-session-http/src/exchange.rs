use async_trait::async_trait;
use reqwest::{Client, Method};
use tracing::{debug, instrument};
use webdav_session_core::{DavError, DavRequest, DavResponse, Exchange, Result};

use crate::config::SessionOptions;

/// [`Exchange`] over a pooled `reqwest` client.
pub struct ReqwestExchange {
    http: Client,
    username: Option<String>,
    password: Option<String>,
}

impl ReqwestExchange {
    pub fn new(options: &SessionOptions) -> Result<Self> {
        let http = Client::builder()
            .timeout(options.timeout)
            .user_agent(concat!("webdav-session/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| DavError::Transport(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self::with_client(http, options))
    }

    pub fn with_client(http: Client, options: &SessionOptions) -> Self {
        Self {
            http,
            username: options.username.clone(),
            password: options.password.clone(),
        }
    }
}

#[async_trait]
impl Exchange for ReqwestExchange {
    #[instrument(skip(self, request), level = "debug", fields(method = %request.method, url = %request.url))]
    async fn send(&self, request: DavRequest) -> Result<DavResponse> {
        let method = Method::from_bytes(request.method.as_str().as_bytes())
            .map_err(|e| DavError::InvalidInput(format!("Bad method {}: {}", request.method, e)))?;

        let mut builder = self.http.request(method, request.url.clone());
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(username) = &self.username {
            builder = builder.basic_auth(username, self.password.as_ref());
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().await.map_err(|e| {
            DavError::Transport(format!("{} {} failed: {}", request.method, request.url, e))
        })?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            })
            .collect();
        let body = response
            .bytes()
            .await
            .map_err(|e| {
                DavError::Transport(format!(
                    "Failed to read {} {} response: {}",
                    request.method, request.url, e
                ))
            })?
            .to_vec();

        debug!("{} {} -> {} ({} bytes)", request.method, request.url, status, body.len());
        Ok(DavResponse {
            status,
            headers,
            body,
        })
    }
}
