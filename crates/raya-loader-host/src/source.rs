//! Source providers
//!
//! A [`SourceProvider`] fetches a module URL and answers with an HTTP-like
//! response. Status and content type are checked by the instantiator, not
//! here.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::Path;
use std::rc::Rc;
use std::time::Duration;

use futures_util::future::{self, FutureExt, LocalBoxFuture};
use log::debug;
use rustc_hash::FxHashMap;
use thiserror::Error;
use url::Url;

/// Errors that can occur while fetching a module
#[derive(Debug, Error)]
pub enum FetchError {
    /// The provider gave up waiting
    #[error("Fetch timed out after {0:?}")]
    Timeout(Duration),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The provider does not handle this URL
    #[error("Unsupported URL: {0}")]
    UnsupportedUrl(String),
}

/// Result of fetching a module URL
#[derive(Debug, Clone, PartialEq)]
pub struct FetchResponse {
    /// HTTP-style status code
    pub status: u16,
    /// Reason phrase
    pub status_text: String,
    /// Headers, keyed by lowercase name
    pub headers: BTreeMap<String, String>,
    /// Content bytes
    pub body: Vec<u8>,
}

impl FetchResponse {
    /// A `200 OK` response
    pub fn ok(content_type: &str, body: impl Into<Vec<u8>>) -> Self {
        let mut headers = BTreeMap::new();
        headers.insert("content-type".to_string(), content_type.to_string());
        Self {
            status: 200,
            status_text: "OK".to_string(),
            headers,
            body: body.into(),
        }
    }

    /// A bodiless response with the given status
    pub fn status(status: u16, status_text: &str) -> Self {
        Self {
            status,
            status_text: status_text.to_string(),
            headers: BTreeMap::new(),
            body: Vec::new(),
        }
    }

    pub fn not_found() -> Self {
        Self::status(404, "Not Found")
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    /// Media type without parameters, lowercased
    pub fn content_type(&self) -> Option<String> {
        self.header("content-type").map(|value| {
            value
                .split(';')
                .next()
                .unwrap_or_default()
                .trim()
                .to_ascii_lowercase()
        })
    }
}

/// Fetches module sources
pub trait SourceProvider {
    fn fetch(&self, url: &Url) -> LocalBoxFuture<'static, Result<FetchResponse, FetchError>>;
}

impl<S: SourceProvider + ?Sized> SourceProvider for Rc<S> {
    fn fetch(&self, url: &Url) -> LocalBoxFuture<'static, Result<FetchResponse, FetchError>> {
        (**self).fetch(url)
    }
}

/// Content type for a file, by extension
pub fn content_type_for(path: &Path) -> &'static str {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("js") | Some("mjs") | Some("cjs") => "application/javascript",
        Some("json") => "application/json",
        Some("wasm") => "application/wasm",
        Some("css") => "text/css",
        _ => "application/octet-stream",
    }
}

/// In-memory sources, keyed by URL
#[derive(Default)]
pub struct MemorySource {
    responses: RefCell<FxHashMap<String, FetchResponse>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `body` with `content_type` at `url`
    pub fn insert(&self, url: &str, content_type: &str, body: &str) {
        self.insert_response(url, FetchResponse::ok(content_type, body));
    }

    /// Serve a JavaScript module at `url`
    pub fn insert_script(&self, url: &str, body: &str) {
        self.insert(url, "application/javascript", body);
    }

    /// Serve an arbitrary response at `url`
    pub fn insert_response(&self, url: &str, response: FetchResponse) {
        self.responses.borrow_mut().insert(url.to_string(), response);
    }

    pub fn len(&self) -> usize {
        self.responses.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.responses.borrow().is_empty()
    }
}

impl SourceProvider for MemorySource {
    fn fetch(&self, url: &Url) -> LocalBoxFuture<'static, Result<FetchResponse, FetchError>> {
        let response = self
            .responses
            .borrow()
            .get(url.as_str())
            .cloned()
            .unwrap_or_else(FetchResponse::not_found);
        future::ready(Ok(response)).boxed_local()
    }
}

/// Reads `file:` URLs from disk
#[derive(Debug, Default, Clone, Copy)]
pub struct FileSource;

impl FileSource {
    pub fn new() -> Self {
        Self
    }
}

impl SourceProvider for FileSource {
    fn fetch(&self, url: &Url) -> LocalBoxFuture<'static, Result<FetchResponse, FetchError>> {
        let path = match url.to_file_path() {
            Ok(path) if url.scheme() == "file" => path,
            _ => {
                return future::ready(Err(FetchError::UnsupportedUrl(url.to_string())))
                    .boxed_local()
            }
        };
        async move {
            debug!("reading {}", path.display());
            match tokio::fs::read(&path).await {
                Ok(body) => Ok(FetchResponse::ok(content_type_for(&path), body)),
                Err(e) if e.kind() == ErrorKind::NotFound => Ok(FetchResponse::not_found()),
                Err(e) => Err(FetchError::Io(e)),
            }
        }
        .boxed_local()
    }
}

/// Fails a fetch that takes longer than a fixed duration
pub struct TimeoutSource<S> {
    inner: S,
    timeout: Duration,
}

impl<S: SourceProvider> TimeoutSource<S> {
    pub fn new(inner: S, timeout: Duration) -> Self {
        Self { inner, timeout }
    }
}

impl<S: SourceProvider> SourceProvider for TimeoutSource<S> {
    fn fetch(&self, url: &Url) -> LocalBoxFuture<'static, Result<FetchResponse, FetchError>> {
        let pending = self.inner.fetch(url);
        let limit = self.timeout;
        async move {
            match tokio::time::timeout(limit, pending).await {
                Ok(result) => result,
                Err(_) => Err(FetchError::Timeout(limit)),
            }
        }
        .boxed_local()
    }
}
