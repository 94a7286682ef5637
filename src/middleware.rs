use crate::handler::SharedHandler;
use crate::registry::{Method, MethodSpec};
use crate::router::Router;
use std::sync::Arc;

/// A middleware source that owns its own listener declarations.
///
/// Implementors expose per-method `(pattern, handler, priority?)` entries and
/// may hook into the router once after their entries are replicated.
pub trait Middleware: Send + Sync {
    fn listeners(&self) -> Vec<ListenerDecl>;

    /// Priority applied to entries that do not carry their own.
    fn default_priority(&self) -> i64 {
        0
    }

    /// One-time binding hook, invoked with the router after this
    /// middleware's listeners have been registered.
    fn bind_to(&self, _router: &mut Router) {}
}

/// One listener declaration contributed by a [`Middleware`].
pub struct ListenerDecl {
    pub method: MethodSpec,
    pub pattern: String,
    pub handler: SharedHandler,
    pub priority: Option<i64>,
}

impl ListenerDecl {
    pub fn new(
        method: impl Into<MethodSpec>,
        pattern: impl Into<String>,
        handler: SharedHandler,
    ) -> Self {
        Self {
            method: method.into(),
            pattern: pattern.into(),
            handler,
            priority: None,
        }
    }

    pub fn priority(mut self, priority: i64) -> Self {
        self.priority = Some(priority);
        self
    }
}

/// A single route registration, method defaulting to GET when omitted.
pub struct RouteTuple {
    pub method: Option<Method>,
    pub pattern: String,
    pub handler: SharedHandler,
    pub priority: Option<i64>,
}

impl RouteTuple {
    pub fn new(pattern: impl Into<String>, handler: SharedHandler) -> Self {
        Self {
            method: None,
            pattern: pattern.into(),
            handler,
            priority: None,
        }
    }

    pub fn with_method(
        method: Method,
        pattern: impl Into<String>,
        handler: SharedHandler,
    ) -> Self {
        Self {
            method: Some(method),
            pattern: pattern.into(),
            handler,
            priority: None,
        }
    }

    pub fn priority(mut self, priority: i64) -> Self {
        self.priority = Some(priority);
        self
    }
}

/// A node in a nested route map: either a handler leaf or a sub-map.
pub enum MapNode {
    Handler(SharedHandler),
    Map(RouteMap),
}

/// A nested route mapping.
///
/// Keys are walked in insertion order. A key that parses as a method name
/// (or `ALL`) fixes the method for its subtree without touching the path
/// prefix; any other key concatenates onto the accumulated prefix. Handler
/// leaves register at the accumulated path, defaulting to GET when no method
/// was fixed along the way.
#[derive(Default)]
pub struct RouteMap {
    pub(crate) entries: Vec<(String, MapNode)>,
}

impl RouteMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handler(mut self, key: impl Into<String>, handler: SharedHandler) -> Self {
        self.entries.push((key.into(), MapNode::Handler(handler)));
        self
    }

    pub fn scope(mut self, key: impl Into<String>, map: RouteMap) -> Self {
        self.entries.push((key.into(), MapNode::Map(map)));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// The closed set of middleware declaration shapes the normalizer accepts.
///
/// The shape is decided once at the registration boundary; the normalizer in
/// [`Router::add_middleware`] is a single exhaustive match over this type.
pub enum MiddlewareDecl {
    /// An object owning its own per-method listener map plus an optional
    /// binding hook.
    Provider(Arc<dyn Middleware>),
    /// A single `(method?, pattern, handler, priority?)` tuple.
    Route(RouteTuple),
    /// A list of such tuples.
    Routes(Vec<RouteTuple>),
    /// A nested mapping keyed by path fragment and/or method name.
    Map(RouteMap),
}

impl From<RouteTuple> for MiddlewareDecl {
    fn from(tuple: RouteTuple) -> Self {
        MiddlewareDecl::Route(tuple)
    }
}

impl From<Vec<RouteTuple>> for MiddlewareDecl {
    fn from(tuples: Vec<RouteTuple>) -> Self {
        MiddlewareDecl::Routes(tuples)
    }
}

impl From<RouteMap> for MiddlewareDecl {
    fn from(map: RouteMap) -> Self {
        MiddlewareDecl::Map(map)
    }
}

impl From<Arc<dyn Middleware>> for MiddlewareDecl {
    fn from(provider: Arc<dyn Middleware>) -> Self {
        MiddlewareDecl::Provider(provider)
    }
}
