//! An embeddable HTTP request router: route patterns with named, optional,
//! and wildcard segments, specificity-ordered listeners per method, chain
//! dispatch with an explicit continuation, and a layered error finalizer.

pub mod error;
pub mod handler;
pub mod middleware;
pub mod pattern;
pub mod registry;
pub mod request;
pub mod response;
pub mod router;
#[cfg(feature = "hyper")]
pub mod transport;

pub use error::{ErrorDetails, ErrorHandler, ErrorSpec, SharedErrorHandler};
pub use handler::{FnHandler, Handler, HandlerError, Outcome, SharedHandler};
pub use middleware::{ListenerDecl, MapNode, Middleware, MiddlewareDecl, RouteMap, RouteTuple};
pub use pattern::{Captures, CompileError, Matcher};
pub use registry::{Method, MethodSpec, UnknownMethod};
pub use request::Request;
pub use response::Response;
pub use router::{Next, RouteTarget, Router};
