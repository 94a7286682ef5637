use crate::request::Request;
use crate::response::Response;
use async_trait::async_trait;
use fnv::FnvBuildHasher;
use once_cell::sync::Lazy;
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;

/// Finalizes a merged error record into a concrete response.
#[async_trait]
pub trait ErrorHandler: Send + Sync {
    async fn handle(&self, request: &Request, response: &mut Response, details: &ErrorDetails);
}

pub type SharedErrorHandler = Arc<dyn ErrorHandler>;

/// The merged, handler-free error record passed to an [`ErrorHandler`].
#[derive(Debug, Clone)]
pub struct ErrorDetails {
    pub status_code: u16,
    pub headers: HashMap<String, String>,
    pub body: String,
}

/// A partial error specification for one status code (or the default).
///
/// Three layers of these merge per-field, later layers winning: built-in
/// defaults, server-level overrides, then the call-site override. Fields
/// left `None` defer to earlier layers.
#[derive(Clone, Default, Deserialize)]
pub struct ErrorSpec {
    #[serde(default)]
    pub headers: Option<HashMap<String, String>>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(skip)]
    pub handler: Option<SharedErrorHandler>,
}

impl ErrorSpec {
    pub fn body(body: impl Into<String>) -> Self {
        Self {
            body: Some(body.into()),
            ..Self::default()
        }
    }

    pub fn with_headers(mut self, headers: HashMap<String, String>) -> Self {
        self.headers = Some(headers);
        self
    }

    pub fn with_handler(mut self, handler: SharedErrorHandler) -> Self {
        self.handler = Some(handler);
        self
    }

    /// Overlays `other` on top of this spec, field by field. Bodies and
    /// header maps are replaced wholesale, not deep-merged.
    fn overlay(&mut self, other: &ErrorSpec) {
        if let Some(headers) = &other.headers {
            self.headers = Some(headers.clone());
        }
        if let Some(body) = &other.body {
            self.body = Some(body.clone());
        }
        if let Some(handler) = &other.handler {
            self.handler = Some(handler.clone());
        }
    }
}

impl Debug for ErrorSpec {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErrorSpec")
            .field("headers", &self.headers)
            .field("body", &self.body)
            .field("handler", &self.handler.as_ref().map(|_| "..."))
            .finish()
    }
}

impl From<&str> for ErrorSpec {
    fn from(body: &str) -> Self {
        ErrorSpec::body(body)
    }
}

impl From<String> for ErrorSpec {
    fn from(body: String) -> Self {
        ErrorSpec::body(body)
    }
}

/// The built-in handler: writes the merged head and body, nothing else.
struct DefaultErrorHandler;

#[async_trait]
impl ErrorHandler for DefaultErrorHandler {
    async fn handle(&self, _request: &Request, response: &mut Response, details: &ErrorDetails) {
        response.write_head(details.status_code, details.headers.clone());
        response.end(details.body.as_bytes());
    }
}

static BUILTIN_SPECS: Lazy<HashMap<u16, ErrorSpec, FnvBuildHasher>> = Lazy::new(|| {
    let seeded = [
        (400, "Bad Request"),
        (401, "Unauthorized"),
        (403, "Forbidden"),
        (404, "Not Found"),
        (408, "Request Timeout"),
        (410, "Gone"),
        (500, "Internal Server Error"),
        (503, "Service Unavailable"),
    ];
    seeded
        .into_iter()
        .map(|(code, body)| (code, ErrorSpec::body(body)))
        .collect()
});

fn builtin_default() -> ErrorSpec {
    let mut headers = HashMap::new();
    headers.insert(
        "Content-Type".to_string(),
        "text/plain; charset=utf-8".to_string(),
    );
    ErrorSpec {
        headers: Some(headers),
        body: Some(String::new()),
        handler: Some(Arc::new(DefaultErrorHandler)),
    }
}

/// Per-status-code error policy: built-in defaults plus server-level
/// overrides, finalized against call-site overrides at raise time.
pub struct ErrorTable {
    default_spec: ErrorSpec,
    by_code: HashMap<u16, ErrorSpec, FnvBuildHasher>,
}

impl ErrorTable {
    pub fn new() -> Self {
        Self {
            default_spec: builtin_default(),
            by_code: BUILTIN_SPECS.clone(),
        }
    }

    /// Server-level override for one status code. Merges per-field into the
    /// seeded spec when one exists, otherwise registers the code as new, so
    /// any numeric status is usable.
    pub fn set(&mut self, status_code: u16, spec: ErrorSpec) {
        self.by_code
            .entry(status_code)
            .and_modify(|existing| existing.overlay(&spec))
            .or_insert(spec);
    }

    /// Server-level override for the catch-all default spec.
    pub fn set_default(&mut self, spec: ErrorSpec) {
        self.default_spec.overlay(&spec);
    }

    /// Resolves `status_code` through the three-layer merge and invokes the
    /// resolved handler. When the merged record carries no handler, the
    /// merge itself is the only effect: the caller is assumed to have
    /// written the response already, or to intend to.
    pub async fn finalize(
        &self,
        request: &Request,
        response: &mut Response,
        status_code: u16,
        overrides: Option<ErrorSpec>,
    ) {
        let mut merged = self.default_spec.clone();
        if let Some(spec) = self.by_code.get(&status_code) {
            merged.overlay(spec);
        }
        if let Some(spec) = &overrides {
            merged.overlay(spec);
        }

        let handler = merged.handler.take();
        let details = ErrorDetails {
            status_code,
            headers: merged.headers.unwrap_or_default(),
            body: merged.body.unwrap_or_default(),
        };

        match handler {
            Some(handler) => handler.handle(request, response, &details).await,
            None => log::debug!(
                "no handler after merge for status {status_code}; response left untouched"
            ),
        }
    }
}

impl Default for ErrorTable {
    fn default() -> Self {
        Self::new()
    }
}
