use crate::pattern::Captures;
use fnv::FnvBuildHasher;
use std::collections::HashMap;
use uuid::Uuid;

/// An incoming request as seen by the dispatch engine.
///
/// The transport collaborator builds one of these per request: method and
/// target come off the wire, headers and body are whatever it already
/// parsed. The path is the target with the query string split off. Captures
/// are annotated by the engine when a matcher succeeds.
pub struct Request {
    id: Uuid,
    method: String,
    path: String,
    query: String,
    headers: HashMap<String, String, FnvBuildHasher>,
    body: Vec<u8>,
    captures: Captures,
}

impl Request {
    pub fn new(method: impl Into<String>, target: &str) -> Self {
        let (path, query) = match target.split_once('?') {
            Some((path, query)) => (path.to_string(), query.to_string()),
            None => (target.to_string(), String::new()),
        };
        Self {
            id: Uuid::new_v4(),
            method: method.into(),
            path,
            query,
            headers: HashMap::with_hasher(FnvBuildHasher::default()),
            body: Vec::new(),
            captures: Captures::default(),
        }
    }

    /// Correlation id for this request, carried through dispatch logs.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// The raw method string. Dispatch parses it against the closed method
    /// set; unrecognized methods fall through to the not-found path.
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Pathname part of the request target.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Query string part of the request target, without the `?`.
    pub fn query_string(&self) -> &str {
        &self.query
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Header names are stored lowercased.
    pub fn set_header(&mut self, name: &str, value: impl Into<String>) -> &mut Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.set_header(name, value);
        self
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn set_body(&mut self, body: Vec<u8>) {
        self.body = body;
    }

    pub fn with_body(mut self, body: Vec<u8>) -> Self {
        self.body = body;
        self
    }

    /// Parameters captured from the path by the matched pattern. Empty until
    /// a matcher succeeds for this request.
    pub fn params(&self) -> &Captures {
        &self.captures
    }

    pub(crate) fn set_captures(&mut self, captures: Captures) {
        self.captures = captures;
    }

    /// Parameters parsed from the query string. Values are percent-decoded;
    /// a value that fails to decode becomes an empty string.
    pub fn query_params(&self) -> HashMap<String, String> {
        let mut params = HashMap::new();
        if self.query.is_empty() {
            return params;
        }
        for pair in self.query.split('&') {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            let decoded = urlencoding::decode(value)
                .map(|v| v.into_owned())
                .unwrap_or_default();
            params.insert(key.to_string(), decoded);
        }
        params
    }

    /// The token from an `Authorization: Bearer` header, if present.
    pub fn bearer(&self) -> Option<&str> {
        self.header("authorization")?.strip_prefix("Bearer ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_is_split_into_path_and_query() {
        let request = Request::new("GET", "/search?q=routers&page=2");
        assert_eq!(request.path(), "/search");
        assert_eq!(request.query_string(), "q=routers&page=2");

        let bare = Request::new("GET", "/search");
        assert_eq!(bare.path(), "/search");
        assert_eq!(bare.query_string(), "");
    }

    #[test]
    fn query_params_are_percent_decoded() {
        let request = Request::new("GET", "/search?q=one%20two&flag");
        let params = request.query_params();
        assert_eq!(params.get("q").map(String::as_str), Some("one two"));
        assert_eq!(params.get("flag").map(String::as_str), Some(""));
    }

    #[test]
    fn undecodable_query_values_become_empty() {
        let request = Request::new("GET", "/search?q=%ff%fe");
        let params = request.query_params();
        assert_eq!(params.get("q").map(String::as_str), Some(""));
    }

    #[test]
    fn header_lookup_is_case_insensitive() {
        let request = Request::new("GET", "/").with_header("X-Trace", "abc");
        assert_eq!(request.header("x-trace"), Some("abc"));
        assert_eq!(request.header("X-TRACE"), Some("abc"));
    }

    #[test]
    fn bearer_token_is_extracted() {
        let request = Request::new("GET", "/").with_header("Authorization", "Bearer t0k3n");
        assert_eq!(request.bearer(), Some("t0k3n"));

        let basic = Request::new("GET", "/").with_header("Authorization", "Basic dXNlcg==");
        assert_eq!(basic.bearer(), None);
    }
}
