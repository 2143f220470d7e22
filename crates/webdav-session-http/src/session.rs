//! The caller-facing session.
//!
//! Every operation resolves its path against the base URL, attaches an `If`
//! header when a held lock covers the target, checks the reply status and
//! decodes multistatus bodies. Locks taken through the session are released
//! on [`Session::close`], or in the background when the session is dropped.

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info, instrument, warn};
use url::Url;
use webdav_session_core::uri::{combine, ensure_collection};
use webdav_session_core::xml::{propfind_body, proppatch_body};
use webdav_session_core::{
    decode, decode_self, if_header, DavError, DavMethod, DavRequest, DavResponse, Depth, Exchange,
    HeldLock, LockAcquireResult, LockRegistry, LockReleaseResult, LockRequest, LockToken,
    MultiStatus, PropertyDiff, ResourceDescriptor, Result,
};

use crate::config::SessionOptions;
use crate::exchange::ReqwestExchange;

pub struct Session {
    base: Url,
    exchange: Arc<dyn Exchange>,
    locks: Arc<LockRegistry>,
    options: SessionOptions,
    closed: bool,
}

impl Session {
    /// Open a session over HTTP.
    pub fn new(options: SessionOptions) -> Result<Self> {
        let exchange = Arc::new(ReqwestExchange::new(&options)?);
        Ok(Self::with_exchange(options, exchange))
    }

    /// Open a session over any transport.
    pub fn with_exchange(options: SessionOptions, exchange: Arc<dyn Exchange>) -> Self {
        let mut base = options.base_url.clone();
        ensure_collection(&mut base);
        Self {
            base,
            locks: Arc::new(LockRegistry::new(Arc::clone(&exchange))),
            exchange,
            options,
            closed: false,
        }
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    /// Resolve `path` against the base URL. Absolute URLs pass through.
    pub fn resolve(&self, path: &str, collection: bool) -> Result<Url> {
        combine(&self.base, path, collection)
    }

    /// Children of the collection at `path` (PROPFIND, Depth 1).
    #[instrument(skip(self), level = "debug")]
    pub async fn list(&self, path: &str) -> Result<Vec<ResourceDescriptor>> {
        let url = self.resolve(path, true)?;
        let multistatus = self.propfind(&url, Depth::One).await?;
        let entries = decode(&multistatus, &url);
        debug!("Listed {} entries under {}", entries.len(), url);
        Ok(entries)
    }

    /// Properties of the resource at `path` itself (PROPFIND, Depth 0).
    #[instrument(skip(self), level = "debug")]
    pub async fn stat(&self, path: &str) -> Result<ResourceDescriptor> {
        let url = self.resolve(path, false)?;
        let multistatus = self.propfind(&url, Depth::Zero).await?;
        decode_self(&multistatus, &url).ok_or_else(|| DavError::NotFound(url.to_string()))
    }

    #[instrument(skip(self), level = "debug")]
    pub async fn download(&self, path: &str) -> Result<Vec<u8>> {
        let url = self.resolve(path, false)?;
        let response = self.call(DavRequest::new(DavMethod::Get, url), &[200]).await?;
        Ok(response.body)
    }

    /// Download `path` into a local file. Returns the number of bytes written.
    #[instrument(skip(self), level = "debug")]
    pub async fn download_to(&self, path: &str, local: &Path) -> Result<u64> {
        let data = self.download(path).await?;
        tokio::fs::write(local, &data).await?;
        Ok(data.len() as u64)
    }

    #[instrument(skip(self, data), level = "debug", fields(bytes = data.len()))]
    pub async fn upload(&self, path: &str, data: Vec<u8>) -> Result<()> {
        let url = self.resolve(path, false)?;
        let request = self.conditional(DavRequest::new(DavMethod::Put, url).body(data));
        self.call(request, &[200, 201, 204]).await?;
        Ok(())
    }

    /// Upload a local file to `path`. Returns the number of bytes sent.
    #[instrument(skip(self), level = "debug")]
    pub async fn upload_from(&self, path: &str, local: &Path) -> Result<u64> {
        let data = tokio::fs::read(local).await?;
        let len = data.len() as u64;
        self.upload(path, data).await?;
        Ok(len)
    }

    #[instrument(skip(self), level = "debug")]
    pub async fn create_dir(&self, path: &str) -> Result<()> {
        let url = self.resolve(path, true)?;
        let request = self.conditional(DavRequest::new(DavMethod::Mkcol, url));
        self.call(request, &[201]).await?;
        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    pub async fn delete(&self, path: &str) -> Result<()> {
        let url = self.resolve(path, false)?;
        let request = self.conditional(DavRequest::new(DavMethod::Delete, url.clone()));
        let response = self.call(request, &[200, 204, 207]).await?;
        if response.status == 207 {
            check_multistatus(&response)?;
        }
        self.locks.forget(&url).await;
        Ok(())
    }

    /// MOVE `from` to `to`. Tokens covering either side are sent.
    #[instrument(skip(self), level = "debug")]
    pub async fn move_to(&self, from: &str, to: &str, overwrite: bool) -> Result<()> {
        let source = self.resolve(from, false)?;
        let destination = self.resolve(to, false)?;
        let source_token = self.locks.find_affecting(&source);
        let destination_token = self.locks.find_affecting(&destination);
        let condition = if_header(
            source_token.as_ref().map(|t| (&source, t)),
            destination_token.as_ref().map(|t| (&destination, t)),
        );
        self.transfer(DavMethod::Move, source.clone(), destination, overwrite, condition)
            .await?;
        self.locks.forget(&source).await;
        Ok(())
    }

    /// COPY `from` to `to`. Only a token covering the destination is sent.
    #[instrument(skip(self), level = "debug")]
    pub async fn copy_to(&self, from: &str, to: &str, overwrite: bool) -> Result<()> {
        let source = self.resolve(from, false)?;
        let destination = self.resolve(to, false)?;
        let destination_token = self.locks.find_affecting(&destination);
        let condition = if_header(None, destination_token.as_ref().map(|t| (&destination, t)));
        self.transfer(DavMethod::Copy, source, destination, overwrite, condition)
            .await
    }

    /// Set and remove dead properties. Fails unless every change succeeded.
    #[instrument(skip(self, diff), level = "debug")]
    pub async fn patch_properties(&self, path: &str, diff: &PropertyDiff) -> Result<()> {
        if diff.is_empty() {
            debug!("Empty property diff for {}, nothing to send", path);
            return Ok(());
        }
        let url = self.resolve(path, false)?;
        let request =
            self.conditional(DavRequest::new(DavMethod::Proppatch, url).xml_body(proppatch_body(diff)));
        let response = self.call(request, &[207]).await?;
        check_multistatus(&response)
    }

    /// Lock `path` with the session's default lock parameters.
    pub async fn lock(&self, path: &str) -> Result<LockToken> {
        let request = self.options.lock.clone();
        self.lock_with(path, &request).await
    }

    /// Lock `path`. A path already locked by this session is not locked
    /// again; the held token is returned.
    #[instrument(skip(self, request), level = "debug")]
    pub async fn lock_with(&self, path: &str, request: &LockRequest) -> Result<LockToken> {
        let root = self.resolve(path, false)?;
        match self.locks.acquire(&root, request).await? {
            LockAcquireResult::Acquired(token) | LockAcquireResult::AlreadyHeld(token) => Ok(token),
            LockAcquireResult::Rejected { reason, .. } => Err(DavError::LockRejected {
                root: root.to_string(),
                reason,
            }),
        }
    }

    /// Extend the lock held on `path` by the default lock timeout.
    pub async fn refresh_lock(&self, path: &str) -> Result<LockToken> {
        let root = self.resolve(path, false)?;
        self.locks.refresh(&root, self.options.lock.timeout).await
    }

    pub async fn unlock(&self, path: &str) -> Result<LockReleaseResult> {
        let root = self.resolve(path, false)?;
        self.locks.release(&root).await
    }

    pub fn held_locks(&self) -> Vec<HeldLock> {
        self.locks.held_locks()
    }

    /// Release every held lock and end the session. Returns how many locks
    /// were released; failures are logged.
    pub async fn close(mut self) -> usize {
        let released = self.locks.drain_all().await;
        let remaining = self.locks.len();
        if remaining > 0 {
            warn!("Session closed with {} locks still held", remaining);
        }
        info!("Session on {} closed, released {} locks", self.base, released);
        self.closed = true;
        released
    }

    async fn propfind(&self, url: &Url, depth: Depth) -> Result<MultiStatus> {
        let request = DavRequest::new(DavMethod::Propfind, url.clone())
            .header("Depth", depth.as_header())
            .xml_body(propfind_body(&self.options.extra_properties));
        let response = self.call(request, &[207]).await?;
        MultiStatus::parse(response.text()?)
    }

    async fn transfer(
        &self,
        method: DavMethod,
        source: Url,
        destination: Url,
        overwrite: bool,
        condition: Option<String>,
    ) -> Result<()> {
        let mut request = DavRequest::new(method, source)
            .header("Destination", destination.as_str())
            .header("Overwrite", if overwrite { "T" } else { "F" });
        if let Some(condition) = condition {
            request = request.header("If", condition);
        }
        let response = self.call(request, &[201, 204, 207]).await?;
        if response.status == 207 {
            check_multistatus(&response)?;
        }
        Ok(())
    }

    /// Add an `If` header when a held lock covers the request URL.
    fn conditional(&self, request: DavRequest) -> DavRequest {
        match self.locks.find_affecting(&request.url) {
            Some(token) => {
                let value = token.if_value().to_string();
                request.header("If", value)
            }
            None => request,
        }
    }

    async fn call(&self, request: DavRequest, expected: &[u16]) -> Result<DavResponse> {
        let method = request.method;
        let url = request.url.clone();
        let response = self.exchange.send(request).await?;
        if response.status == 404 && !expected.contains(&404) {
            return Err(DavError::NotFound(url.to_string()));
        }
        response.expect_status(method, &url, expected)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.closed || self.locks.is_empty() {
            return;
        }
        let held = self.locks.len();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                debug!("Session dropped with {} held locks, releasing in background", held);
                let locks = Arc::clone(&self.locks);
                handle.spawn(async move {
                    locks.drain_all().await;
                });
            }
            Err(_) => warn!(
                "Session dropped outside a tokio runtime with {} held locks, leaving them to expire",
                held
            ),
        }
    }
}

fn check_multistatus(response: &DavResponse) -> Result<()> {
    let failures = MultiStatus::parse(response.text()?)?.failures();
    if failures.is_empty() {
        return Ok(());
    }
    Err(DavError::PartialFailure(failures.join("; ")))
}
