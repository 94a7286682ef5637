use crate::error::{ErrorSpec, ErrorTable};
use crate::handler::{HandlerError, Outcome, SharedHandler};
use crate::middleware::{MapNode, MiddlewareDecl, RouteMap, RouteTuple};
use crate::pattern::{CompileError, Matcher};
use crate::registry::{ListenerEntry, ListenerRegistry, Method, MethodSpec};
use crate::request::Request;
use crate::response::Response;
use log::{debug, trace};
use std::str::FromStr;
use std::sync::Arc;

/// A route registration target: a pattern string still to be compiled, or an
/// already compiled matcher.
pub enum RouteTarget {
    Pattern(String),
    Matcher(Arc<Matcher>),
}

impl From<&str> for RouteTarget {
    fn from(pattern: &str) -> Self {
        RouteTarget::Pattern(pattern.to_string())
    }
}

impl From<String> for RouteTarget {
    fn from(pattern: String) -> Self {
        RouteTarget::Pattern(pattern)
    }
}

impl From<Matcher> for RouteTarget {
    fn from(matcher: Matcher) -> Self {
        RouteTarget::Matcher(Arc::new(matcher))
    }
}

impl From<Arc<Matcher>> for RouteTarget {
    fn from(matcher: Arc<Matcher>) -> Self {
        RouteTarget::Matcher(matcher)
    }
}

/// The routing and dispatch engine.
///
/// A router owns its listener registry and error table; there is no
/// process-wide shared state. Registration requires `&mut self` and is
/// expected to complete before the transport starts handing requests to
/// [`Router::dispatch`], which borrows `&self`; mutating the registry while
/// requests are in flight is not a supported access pattern.
pub struct Router {
    registry: ListenerRegistry,
    errors: ErrorTable,
}

impl Router {
    pub fn new() -> Self {
        Self {
            registry: ListenerRegistry::new(),
            errors: ErrorTable::new(),
        }
    }

    /// Server-level error override for one status code (merged per-field
    /// over the built-in spec).
    pub fn set_error_spec(&mut self, status_code: u16, spec: ErrorSpec) -> &mut Self {
        self.errors.set(status_code, spec);
        self
    }

    /// Server-level override for the catch-all default error spec.
    pub fn set_default_error_spec(&mut self, spec: ErrorSpec) -> &mut Self {
        self.errors.set_default(spec);
        self
    }

    /// Registers a handler for a method (or `ALL`) and a route target.
    ///
    /// Fails fast when the pattern does not compile: patterns are static
    /// configuration, not runtime input.
    pub fn add_request_listener(
        &mut self,
        method: impl Into<MethodSpec>,
        target: impl Into<RouteTarget>,
        handler: SharedHandler,
        priority: i64,
    ) -> Result<&mut Self, CompileError> {
        let matcher = match target.into() {
            RouteTarget::Pattern(pattern) => Arc::new(Matcher::compile(&pattern)?),
            RouteTarget::Matcher(matcher) => matcher,
        };
        self.registry.insert(method.into(), matcher, handler, priority);
        Ok(self)
    }

    pub fn get(
        &mut self,
        pattern: impl Into<RouteTarget>,
        handler: SharedHandler,
    ) -> Result<&mut Self, CompileError> {
        self.add_request_listener(Method::Get, pattern, handler, 0)
    }

    pub fn post(
        &mut self,
        pattern: impl Into<RouteTarget>,
        handler: SharedHandler,
    ) -> Result<&mut Self, CompileError> {
        self.add_request_listener(Method::Post, pattern, handler, 0)
    }

    pub fn put(
        &mut self,
        pattern: impl Into<RouteTarget>,
        handler: SharedHandler,
    ) -> Result<&mut Self, CompileError> {
        self.add_request_listener(Method::Put, pattern, handler, 0)
    }

    pub fn patch(
        &mut self,
        pattern: impl Into<RouteTarget>,
        handler: SharedHandler,
    ) -> Result<&mut Self, CompileError> {
        self.add_request_listener(Method::Patch, pattern, handler, 0)
    }

    pub fn delete(
        &mut self,
        pattern: impl Into<RouteTarget>,
        handler: SharedHandler,
    ) -> Result<&mut Self, CompileError> {
        self.add_request_listener(Method::Delete, pattern, handler, 0)
    }

    /// Normalizes a middleware declaration into registry insertions.
    ///
    /// One exhaustive match over the declaration shapes: a provider
    /// replicates its own listener map (then gets its one-time binding
    /// hook), tuples default the method to GET when omitted, and nested
    /// maps are walked with method keys fixing the method and other keys
    /// extending the path prefix.
    pub fn add_middleware(
        &mut self,
        decl: impl Into<MiddlewareDecl>,
    ) -> Result<&mut Self, CompileError> {
        match decl.into() {
            MiddlewareDecl::Provider(provider) => {
                let fallback = provider.default_priority();
                for listener in provider.listeners() {
                    let priority = listener.priority.unwrap_or(fallback);
                    self.add_request_listener(
                        listener.method,
                        listener.pattern.as_str(),
                        listener.handler,
                        priority,
                    )?;
                }
                provider.bind_to(self);
            }
            MiddlewareDecl::Route(tuple) => {
                self.register_tuple(tuple)?;
            }
            MiddlewareDecl::Routes(tuples) => {
                for tuple in tuples {
                    self.register_tuple(tuple)?;
                }
            }
            MiddlewareDecl::Map(map) => {
                self.register_map("", None, map)?;
            }
        }
        Ok(self)
    }

    fn register_tuple(&mut self, tuple: RouteTuple) -> Result<(), CompileError> {
        let method = tuple.method.unwrap_or(Method::Get);
        self.add_request_listener(
            method,
            tuple.pattern.as_str(),
            tuple.handler,
            tuple.priority.unwrap_or(0),
        )?;
        Ok(())
    }

    fn register_map(
        &mut self,
        prefix: &str,
        method: Option<MethodSpec>,
        map: RouteMap,
    ) -> Result<(), CompileError> {
        for (key, node) in map.entries {
            if let Ok(fixed) = MethodSpec::from_str(&key) {
                match node {
                    MapNode::Map(inner) => self.register_map(prefix, Some(fixed), inner)?,
                    MapNode::Handler(handler) => {
                        let pattern = if prefix.is_empty() { "/" } else { prefix };
                        self.add_request_listener(fixed, pattern, handler, 0)?;
                    }
                }
                continue;
            }

            let pattern = format!("{prefix}{key}");
            match node {
                MapNode::Map(inner) => self.register_map(&pattern, method, inner)?,
                MapNode::Handler(handler) => {
                    let spec = method.unwrap_or(MethodSpec::One(Method::Get));
                    self.add_request_listener(spec, pattern.as_str(), handler, 0)?;
                }
            }
        }
        Ok(())
    }

    /// Dispatches one request through the registry.
    ///
    /// Walks the method's ordered entries, invoking matching handlers until
    /// one handles the request. An unknown method, an exhausted list, or a
    /// chain that never handles the request all finalize through the 404
    /// error path. Handler failures propagate to the caller untouched.
    pub async fn dispatch(
        &self,
        request: &mut Request,
        response: &mut Response,
    ) -> Result<(), HandlerError> {
        trace!(
            "dispatch {} {} {}",
            request.id(),
            request.method(),
            request.path()
        );

        let outcome = match Method::from_str(request.method()) {
            Ok(method) => {
                let entries = self.registry.entries(method);
                run_chain(entries, 0, request, response).await?.0
            }
            Err(_) => Outcome::NotHandled,
        };

        if !outcome.is_handled() {
            debug!(
                "unmatched {} {} {}",
                request.id(),
                request.method(),
                request.path()
            );
            self.raise(request, response, 404, None).await;
        }
        Ok(())
    }

    /// Raises an explicit status code through the error finalizer, merging
    /// the call-site override over the configured specs.
    pub async fn raise(
        &self,
        request: &Request,
        response: &mut Response,
        status_code: u16,
        overrides: Option<ErrorSpec>,
    ) {
        self.errors
            .finalize(request, response, status_code, overrides)
            .await;
    }

    pub async fn bad_request(
        &self,
        request: &Request,
        response: &mut Response,
        overrides: Option<ErrorSpec>,
    ) {
        self.raise(request, response, 400, overrides).await;
    }

    pub async fn unauthorized(
        &self,
        request: &Request,
        response: &mut Response,
        overrides: Option<ErrorSpec>,
    ) {
        self.raise(request, response, 401, overrides).await;
    }

    pub async fn forbidden(
        &self,
        request: &Request,
        response: &mut Response,
        overrides: Option<ErrorSpec>,
    ) {
        self.raise(request, response, 403, overrides).await;
    }

    pub async fn not_found(
        &self,
        request: &Request,
        response: &mut Response,
        overrides: Option<ErrorSpec>,
    ) {
        self.raise(request, response, 404, overrides).await;
    }

    pub async fn request_timeout(
        &self,
        request: &Request,
        response: &mut Response,
        overrides: Option<ErrorSpec>,
    ) {
        self.raise(request, response, 408, overrides).await;
    }

    pub async fn gone(
        &self,
        request: &Request,
        response: &mut Response,
        overrides: Option<ErrorSpec>,
    ) {
        self.raise(request, response, 410, overrides).await;
    }

    pub async fn internal_server_error(
        &self,
        request: &Request,
        response: &mut Response,
        overrides: Option<ErrorSpec>,
    ) {
        self.raise(request, response, 500, overrides).await;
    }

    pub async fn service_unavailable(
        &self,
        request: &Request,
        response: &mut Response,
        overrides: Option<ErrorSpec>,
    ) {
        self.raise(request, response, 503, overrides).await;
    }

    /// Number of registered listener entries across all methods.
    pub fn listener_count(&self) -> usize {
        self.registry.len()
    }
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

/// The continuation handed to a handler.
///
/// Holds the method's entry sequence and the index of the next entry to try.
/// `run` resumes matching there and reports the downstream outcome back to
/// the handler that called it. The index only advances: entries behind it
/// are never revisited, even when the handler afterwards returns
/// `NotHandled`.
pub struct Next<'a> {
    entries: &'a [ListenerEntry],
    cursor: usize,
}

impl<'a> Next<'a> {
    /// A continuation with nothing left to try. `run` immediately reports
    /// `NotHandled`.
    pub fn detached() -> Next<'static> {
        Next {
            entries: &[],
            cursor: 0,
        }
    }

    /// Resumes matching at the following entry.
    pub async fn run(
        &mut self,
        request: &mut Request,
        response: &mut Response,
    ) -> Result<Outcome, HandlerError> {
        let (outcome, consumed) =
            run_chain(self.entries, self.cursor, request, response).await?;
        self.cursor = consumed;
        Ok(outcome)
    }
}

/// Walks `entries` starting at `start`, invoking matching handlers in order
/// until one handles the request or the list is exhausted. Returns the
/// outcome together with the index the walk stopped at, so nested `next`
/// invocations and the outer loop share one ever-advancing position.
async fn run_chain(
    entries: &[ListenerEntry],
    start: usize,
    request: &mut Request,
    response: &mut Response,
) -> Result<(Outcome, usize), HandlerError> {
    let mut index = start;
    while index < entries.len() {
        let entry = &entries[index];
        index += 1;

        let Some(captures) = entry.matcher().captures(request.path()) else {
            continue;
        };
        trace!(
            "request {} matched {} (weight {})",
            request.id(),
            entry.matcher().pattern(),
            entry.weight()
        );
        request.set_captures(captures);

        let mut next = Next { entries, cursor: index };
        let outcome = entry.handler().exec(request, response, &mut next).await?;
        // The handler may have consumed further entries through `next`.
        index = index.max(next.cursor);

        if outcome.is_handled() {
            return Ok((Outcome::Handled, index));
        }
    }
    Ok((Outcome::NotHandled, index))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::Handler;
    use crate::middleware::{ListenerDecl, Middleware, RouteMap, RouteTuple};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Appends its tag to the shared trace, then reports the configured
    /// outcome.
    struct TraceHandler {
        tag: &'static str,
        trace: Arc<Mutex<Vec<&'static str>>>,
        outcome: Outcome,
    }

    impl TraceHandler {
        fn shared(
            tag: &'static str,
            trace: &Arc<Mutex<Vec<&'static str>>>,
            outcome: Outcome,
        ) -> SharedHandler {
            Arc::new(Self {
                tag,
                trace: trace.clone(),
                outcome,
            })
        }
    }

    #[async_trait]
    impl Handler for TraceHandler {
        async fn exec(
            &self,
            _request: &mut Request,
            _response: &mut Response,
            _next: &mut Next<'_>,
        ) -> Result<Outcome, HandlerError> {
            self.trace.lock().unwrap().push(self.tag);
            Ok(self.outcome)
        }

        fn name(&self) -> &str {
            self.tag
        }
    }

    /// Ends the response with its tag as the body.
    struct BodyHandler {
        tag: &'static str,
    }

    impl BodyHandler {
        fn shared(tag: &'static str) -> SharedHandler {
            Arc::new(Self { tag })
        }
    }

    #[async_trait]
    impl Handler for BodyHandler {
        async fn exec(
            &self,
            _request: &mut Request,
            response: &mut Response,
            _next: &mut Next<'_>,
        ) -> Result<Outcome, HandlerError> {
            response.text(self.tag);
            Ok(Outcome::Handled)
        }
    }

    async fn send(router: &Router, method: &str, target: &str) -> Response {
        let mut request = Request::new(method, target);
        let mut response = Response::new();
        router.dispatch(&mut request, &mut response).await.unwrap();
        response
    }

    #[tokio::test]
    async fn most_specific_entry_wins() {
        let mut router = Router::new();
        router.get("/users/:id", BodyHandler::shared("param")).unwrap();
        router
            .get("/users/special", BodyHandler::shared("literal"))
            .unwrap();

        let response = send(&router, "GET", "/users/special").await;
        assert_eq!(response.body(), b"literal");

        let response = send(&router, "GET", "/users/42").await;
        assert_eq!(response.body(), b"param");
    }

    #[tokio::test]
    async fn captures_are_annotated_on_the_request() {
        struct EchoParam;

        #[async_trait]
        impl Handler for EchoParam {
            async fn exec(
                &self,
                request: &mut Request,
                response: &mut Response,
                _next: &mut Next<'_>,
            ) -> Result<Outcome, HandlerError> {
                let id = request.params().name("id").unwrap_or("?").to_string();
                response.text(&id);
                Ok(Outcome::Handled)
            }
        }

        let mut router = Router::new();
        router.get("/users/:id", Arc::new(EchoParam)).unwrap();

        let response = send(&router, "GET", "/users/42").await;
        assert_eq!(response.body(), b"42");
    }

    #[tokio::test]
    async fn not_handled_falls_through_to_next_matching_entry() {
        let trace = Arc::new(Mutex::new(Vec::new()));
        let mut router = Router::new();
        router
            .add_request_listener(
                Method::Get,
                "/files/latest",
                TraceHandler::shared("first", &trace, Outcome::NotHandled),
                0,
            )
            .unwrap();
        router
            .get("/files/*", BodyHandler::shared("fallback"))
            .unwrap();

        let response = send(&router, "GET", "/files/latest").await;
        assert_eq!(response.body(), b"fallback");
        assert_eq!(*trace.lock().unwrap(), ["first"]);
    }

    #[tokio::test]
    async fn exhausted_chain_resolves_to_404() {
        let trace = Arc::new(Mutex::new(Vec::new()));
        let mut router = Router::new();
        router
            .add_request_listener(
                Method::Get,
                "/ping",
                TraceHandler::shared("declined", &trace, Outcome::NotHandled),
                0,
            )
            .unwrap();

        let response = send(&router, "GET", "/ping").await;
        assert_eq!(response.status(), 404);
        assert_eq!(response.body(), b"Not Found");
    }

    #[tokio::test]
    async fn unregistered_method_resolves_to_404() {
        let mut router = Router::new();
        router.get("/ping", BodyHandler::shared("pong")).unwrap();

        let response = send(&router, "OPTIONS", "/ping").await;
        assert_eq!(response.status(), 404);
    }

    #[tokio::test]
    async fn next_resumes_the_chain_and_reports_downstream_outcome() {
        /// Defers to the rest of the chain, recording what came back, and
        /// reports handled either way.
        struct Deferring {
            saw_downstream: Arc<AtomicUsize>,
        }

        #[async_trait]
        impl Handler for Deferring {
            async fn exec(
                &self,
                request: &mut Request,
                response: &mut Response,
                next: &mut Next<'_>,
            ) -> Result<Outcome, HandlerError> {
                let downstream = next.run(request, response).await?;
                if downstream.is_handled() {
                    self.saw_downstream.fetch_add(1, Ordering::SeqCst);
                }
                Ok(Outcome::Handled)
            }
        }

        let saw_downstream = Arc::new(AtomicUsize::new(0));
        let mut router = Router::new();
        router
            .add_request_listener(
                Method::Get,
                "/data",
                Arc::new(Deferring {
                    saw_downstream: saw_downstream.clone(),
                }),
                1,
            )
            .unwrap();
        router.get("/data", BodyHandler::shared("payload")).unwrap();

        let response = send(&router, "GET", "/data").await;
        assert_eq!(response.body(), b"payload");
        assert_eq!(saw_downstream.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn entries_are_visited_at_most_once() {
        // The upstream handler defers via `next`, the downstream handler
        // declines; the walk must not retry the downstream entry after the
        // upstream returns NotHandled itself.
        struct DeferThenDecline;

        #[async_trait]
        impl Handler for DeferThenDecline {
            async fn exec(
                &self,
                request: &mut Request,
                response: &mut Response,
                next: &mut Next<'_>,
            ) -> Result<Outcome, HandlerError> {
                let _ = next.run(request, response).await?;
                Ok(Outcome::NotHandled)
            }
        }

        let trace = Arc::new(Mutex::new(Vec::new()));
        let mut router = Router::new();
        router
            .add_request_listener(Method::Get, "/x", Arc::new(DeferThenDecline), 1)
            .unwrap();
        router
            .add_request_listener(
                Method::Get,
                "/x",
                TraceHandler::shared("once", &trace, Outcome::NotHandled),
                0,
            )
            .unwrap();

        let response = send(&router, "GET", "/x").await;
        assert_eq!(response.status(), 404);
        assert_eq!(*trace.lock().unwrap(), ["once"]);
    }

    #[tokio::test]
    async fn all_spec_registers_every_method() {
        let mut router = Router::new();
        router
            .add_request_listener(MethodSpec::All, "/ping", BodyHandler::shared("pong"), 0)
            .unwrap();

        for method in ["GET", "POST", "PUT", "PATCH", "DELETE"] {
            let response = send(&router, method, "/ping").await;
            assert_eq!(response.body(), b"pong", "method {method}");
        }
    }

    #[tokio::test]
    async fn tuple_middleware_defaults_method_to_get() {
        let mut router = Router::new();
        router
            .add_middleware(RouteTuple::new("/ping", BodyHandler::shared("pong")))
            .unwrap();

        let response = send(&router, "GET", "/ping").await;
        assert_eq!(response.body(), b"pong");

        let response = send(&router, "POST", "/ping").await;
        assert_eq!(response.status(), 404);
    }

    #[tokio::test]
    async fn tuple_array_middleware_registers_each_tuple() {
        let mut router = Router::new();
        router
            .add_middleware(vec![
                RouteTuple::new("/a", BodyHandler::shared("a")),
                RouteTuple::with_method(Method::Post, "/b", BodyHandler::shared("b")),
            ])
            .unwrap();

        assert_eq!(send(&router, "GET", "/a").await.body(), b"a");
        assert_eq!(send(&router, "POST", "/b").await.body(), b"b");
    }

    #[tokio::test]
    async fn nested_map_middleware_walks_prefixes_and_methods() {
        let map = RouteMap::new()
            .scope(
                "/api",
                RouteMap::new()
                    .handler("/health", BodyHandler::shared("ok"))
                    .scope(
                        "POST",
                        RouteMap::new().handler("/users", BodyHandler::shared("created")),
                    ),
            )
            .handler("/root", BodyHandler::shared("root"));

        let mut router = Router::new();
        router.add_middleware(map).unwrap();

        assert_eq!(send(&router, "GET", "/api/health").await.body(), b"ok");
        assert_eq!(send(&router, "POST", "/api/users").await.body(), b"created");
        assert_eq!(send(&router, "GET", "/root").await.body(), b"root");
        // The method fixed for a subtree does not leak outside it.
        assert_eq!(send(&router, "POST", "/api/health").await.status(), 404);
    }

    #[tokio::test]
    async fn provider_middleware_replicates_listeners_and_binds_once() {
        struct ApiMiddleware {
            bound: Arc<AtomicUsize>,
        }

        impl Middleware for ApiMiddleware {
            fn listeners(&self) -> Vec<ListenerDecl> {
                vec![
                    ListenerDecl::new(Method::Get, "/status", BodyHandler::shared("up")),
                    ListenerDecl::new(Method::Get, "/version", BodyHandler::shared("1"))
                        .priority(2),
                ]
            }

            fn default_priority(&self) -> i64 {
                1
            }

            fn bind_to(&self, router: &mut Router) {
                self.bound.fetch_add(1, Ordering::SeqCst);
                // The hook may register more listeners itself.
                let _ = router.get("/bound", BodyHandler::shared("hook"));
            }
        }

        let bound = Arc::new(AtomicUsize::new(0));
        let mut router = Router::new();
        router
            .add_middleware(MiddlewareDecl::Provider(Arc::new(ApiMiddleware {
                bound: bound.clone(),
            })))
            .unwrap();

        assert_eq!(bound.load(Ordering::SeqCst), 1);
        assert_eq!(send(&router, "GET", "/status").await.body(), b"up");
        assert_eq!(send(&router, "GET", "/version").await.body(), b"1");
        assert_eq!(send(&router, "GET", "/bound").await.body(), b"hook");
    }

    #[tokio::test]
    async fn empty_map_registers_nothing() {
        let mut router = Router::new();
        router.add_middleware(RouteMap::new()).unwrap();
        assert_eq!(router.listener_count(), 0);
    }

    #[tokio::test]
    async fn bad_pattern_fails_registration() {
        let mut router = Router::new();
        let result = router.get("/users/:", BodyHandler::shared("never"));
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn raise_merges_call_site_overrides() {
        let mut router = Router::new();
        router.set_error_spec(403, ErrorSpec::body("off limits"));

        let request = Request::new("GET", "/secret");
        let mut response = Response::new();
        router.forbidden(&request, &mut response, None).await;
        assert_eq!(response.status(), 403);
        assert_eq!(response.body(), b"off limits");

        let mut response = Response::new();
        router
            .raise(&request, &mut response, 403, Some("really off limits".into()))
            .await;
        assert_eq!(response.body(), b"really off limits");
    }
}
