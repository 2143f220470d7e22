//! The request/response primitive a session is built on.
//!
//! Transport concerns (connection reuse, TLS, authentication, retries) live
//! in the implementation, not here.

use std::fmt;

use async_trait::async_trait;
use url::Url;

use crate::error::{DavError, Result};

/// HTTP and WebDAV methods issued by a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DavMethod {
    Get,
    Put,
    Delete,
    Mkcol,
    Copy,
    Move,
    Propfind,
    Proppatch,
    Lock,
    Unlock,
}

impl DavMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            DavMethod::Get => "GET",
            DavMethod::Put => "PUT",
            DavMethod::Delete => "DELETE",
            DavMethod::Mkcol => "MKCOL",
            DavMethod::Copy => "COPY",
            DavMethod::Move => "MOVE",
            DavMethod::Propfind => "PROPFIND",
            DavMethod::Proppatch => "PROPPATCH",
            DavMethod::Lock => "LOCK",
            DavMethod::Unlock => "UNLOCK",
        }
    }
}

impl fmt::Display for DavMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct DavRequest {
    pub method: DavMethod,
    pub url: Url,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
}

impl DavRequest {
    pub fn new(method: DavMethod, url: Url) -> Self {
        Self {
            method,
            url,
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((name.to_string(), value.into()));
        self
    }

    /// Attach an XML body with the matching content type.
    pub fn xml_body(self, body: String) -> Self {
        let mut req = self.header("Content-Type", "application/xml; charset=utf-8");
        req.body = Some(body.into_bytes());
        req
    }

    pub fn body(mut self, body: Vec<u8>) -> Self {
        self.body = Some(body);
        self
    }

    /// First value of a header, matched case-insensitively.
    pub fn header_value(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }
}

#[derive(Debug, Clone, Default)]
pub struct DavResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl DavResponse {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            ..Default::default()
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// First value of a header, matched case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    pub fn text(&self) -> Result<&str> {
        std::str::from_utf8(&self.body)
            .map_err(|e| DavError::Malformed(format!("Response body is not UTF-8: {}", e)))
    }

    /// Fail with [`DavError::UnexpectedStatus`] unless the status is one of
    /// `expected`.
    pub fn expect_status(self, method: DavMethod, url: &Url, expected: &[u16]) -> Result<Self> {
        if expected.contains(&self.status) {
            return Ok(self);
        }
        Err(DavError::UnexpectedStatus {
            method: method.to_string(),
            url: url.to_string(),
            expected: expected
                .iter()
                .map(|s| s.to_string())
                .collect::<Vec<_>>()
                .join("|"),
            actual: self.status,
        })
    }
}

fn find_header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

/// Sends one request and returns the complete response.
///
/// A non-success status is a normal response, not an error; `Err` is for
/// failures to complete the exchange at all.
#[async_trait]
pub trait Exchange: Send + Sync {
    async fn send(&self, request: DavRequest) -> Result<DavResponse>;
}
