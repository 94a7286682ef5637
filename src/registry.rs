use crate::handler::SharedHandler;
use crate::pattern::Matcher;
use fnv::FnvBuildHasher;
use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;

/// The closed set of HTTP methods the router dispatches on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl Method {
    pub const ALL: [Method; 5] = [
        Method::Get,
        Method::Post,
        Method::Put,
        Method::Patch,
        Method::Delete,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
        }
    }
}

impl Display for Method {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Error, Debug)]
#[error("'{0}' is not a supported HTTP method.")]
pub struct UnknownMethod(pub String);

impl FromStr for Method {
    type Err = UnknownMethod;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "GET" => Ok(Method::Get),
            "POST" => Ok(Method::Post),
            "PUT" => Ok(Method::Put),
            "PATCH" => Ok(Method::Patch),
            "DELETE" => Ok(Method::Delete),
            other => Err(UnknownMethod(other.to_string())),
        }
    }
}

/// A registration target: one method, or all of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodSpec {
    One(Method),
    All,
}

impl From<Method> for MethodSpec {
    fn from(method: Method) -> Self {
        MethodSpec::One(method)
    }
}

impl FromStr for MethodSpec {
    type Err = UnknownMethod;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "ALL" {
            return Ok(MethodSpec::All);
        }
        Method::from_str(s).map(MethodSpec::One)
    }
}

/// One registered listener: a compiled matcher, the handler to invoke, and
/// the registrant-supplied priority.
pub struct ListenerEntry {
    matcher: Arc<Matcher>,
    handler: SharedHandler,
    priority: i64,
    weight: i64,
    captures: usize,
}

impl ListenerEntry {
    pub fn matcher(&self) -> &Matcher {
        &self.matcher
    }

    pub fn handler(&self) -> &SharedHandler {
        &self.handler
    }

    pub fn priority(&self) -> i64 {
        self.priority
    }

    pub fn weight(&self) -> i64 {
        self.weight
    }
}

/// Specificity weight for one entry. Priority dominates; among equal
/// priorities deeper patterns win and wildcard tokens each cost one point.
/// Computed from the parsed pattern structure, never from regex source text.
/// Equal weights are broken by total capture count (fewer captures first),
/// so a literal pattern is tried before a parameterized one of the same
/// depth; see [`ListenerRegistry::insert`].
fn specificity_weight(priority: i64, matcher: &Matcher) -> i64 {
    priority * 1000 + (matcher.depth() as i64 * 10 - matcher.wildcards() as i64)
}

/// Per-method, specificity-ordered listener lists.
///
/// The registry is built during server composition and is read-only during
/// dispatch; registration takes `&mut self` while dispatch borrows `&self`,
/// so concurrent mutation during live traffic is not expressible without
/// external synchronization.
pub struct ListenerRegistry {
    listeners: HashMap<Method, Vec<ListenerEntry>, FnvBuildHasher>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        let mut listeners = HashMap::with_hasher(FnvBuildHasher::default());
        for method in Method::ALL {
            listeners.insert(method, Vec::new());
        }
        Self { listeners }
    }

    /// Inserts an entry, keeping each method's list sorted by descending
    /// weight, with fewer capturing tokens (parameters plus wildcards)
    /// breaking equal weights. Equal weight and capture count preserve
    /// insertion order: the new entry goes at the end of its run.
    /// `MethodSpec::All` inserts an independent entry into every method's
    /// list.
    pub fn insert(
        &mut self,
        spec: MethodSpec,
        matcher: Arc<Matcher>,
        handler: SharedHandler,
        priority: i64,
    ) {
        match spec {
            MethodSpec::One(method) => {
                self.insert_one(method, matcher, handler, priority)
            }
            MethodSpec::All => {
                for method in Method::ALL {
                    self.insert_one(method, matcher.clone(), handler.clone(), priority);
                }
            }
        }
    }

    fn insert_one(
        &mut self,
        method: Method,
        matcher: Arc<Matcher>,
        handler: SharedHandler,
        priority: i64,
    ) {
        let weight = specificity_weight(priority, &matcher);
        let captures = matcher.params() + matcher.wildcards();
        log::trace!(
            "registering {} {} (weight {})",
            method,
            matcher.pattern(),
            weight
        );

        let list = self.listeners.entry(method).or_default();
        let position = list
            .iter()
            .position(|entry| {
                entry.weight < weight
                    || (entry.weight == weight && entry.captures > captures)
            })
            .unwrap_or(list.len());
        list.insert(
            position,
            ListenerEntry {
                matcher,
                handler,
                priority,
                weight,
                captures,
            },
        );
    }

    /// The ordered entry sequence for one method.
    pub fn entries(&self, method: Method) -> &[ListenerEntry] {
        self.listeners.get(&method).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.listeners.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ListenerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::{Handler, HandlerError, Outcome};
    use crate::request::Request;
    use crate::response::Response;
    use crate::router::Next;
    use async_trait::async_trait;

    #[derive(Debug)]
    struct DummyHandler;

    #[async_trait]
    impl Handler for DummyHandler {
        async fn exec(
            &self,
            _request: &mut Request,
            _response: &mut Response,
            _next: &mut Next<'_>,
        ) -> Result<Outcome, HandlerError> {
            Ok(Outcome::Handled)
        }
    }

    fn insert(registry: &mut ListenerRegistry, spec: MethodSpec, pattern: &str, priority: i64) {
        let matcher = Arc::new(Matcher::compile(pattern).unwrap());
        registry.insert(spec, matcher, Arc::new(DummyHandler), priority);
    }

    #[test]
    fn literal_sorts_before_parameter_at_equal_weight() {
        let mut registry = ListenerRegistry::new();
        insert(&mut registry, Method::Get.into(), "/users/:id", 0);
        insert(&mut registry, Method::Get.into(), "/users/special", 0);

        let entries = registry.entries(Method::Get);
        assert_eq!(entries.len(), 2);
        // Same weight, but the capture-free pattern breaks the tie even
        // though it was registered second.
        assert_eq!(entries[0].weight(), entries[1].weight());
        assert_eq!(entries[0].matcher().pattern(), "/users/special");
        assert_eq!(entries[1].matcher().pattern(), "/users/:id");
    }

    #[test]
    fn parameters_do_not_reduce_the_weight() {
        let mut registry = ListenerRegistry::new();
        insert(&mut registry, Method::Get.into(), "/u/*/lit", 0);
        insert(&mut registry, Method::Get.into(), "/u/:a/:b", 0);

        // Only wildcards count against the weight, so the parameterized
        // pattern outranks the wildcard one outright; captures break ties
        // only among equal weights.
        let entries = registry.entries(Method::Get);
        assert_eq!(entries[0].matcher().pattern(), "/u/:a/:b");
        assert_eq!(entries[1].matcher().pattern(), "/u/*/lit");
        assert_eq!(entries[0].weight(), 30);
        assert_eq!(entries[1].weight(), 29);
    }

    #[test]
    fn wildcard_entries_sort_after_deeper_patterns() {
        let mut registry = ListenerRegistry::new();
        insert(&mut registry, Method::Get.into(), "/files/*", 0);
        insert(&mut registry, Method::Get.into(), "/files/latest", 0);

        let entries = registry.entries(Method::Get);
        assert_eq!(entries[0].matcher().pattern(), "/files/latest");
        assert_eq!(entries[1].matcher().pattern(), "/files/*");
    }

    #[test]
    fn priority_dominates_structure() {
        let mut registry = ListenerRegistry::new();
        insert(&mut registry, Method::Get.into(), "/a/b/c/d", 0);
        insert(&mut registry, Method::Get.into(), "/a", 1);

        let entries = registry.entries(Method::Get);
        assert_eq!(entries[0].matcher().pattern(), "/a");
        assert_eq!(entries[0].priority(), 1);
    }

    #[test]
    fn equal_weight_preserves_insertion_order() {
        let mut registry = ListenerRegistry::new();
        insert(&mut registry, Method::Get.into(), "/one/:a", 0);
        insert(&mut registry, Method::Get.into(), "/two/:b", 0);
        insert(&mut registry, Method::Get.into(), "/three/:c", 0);

        let patterns: Vec<_> = registry
            .entries(Method::Get)
            .iter()
            .map(|e| e.matcher().pattern().to_string())
            .collect();
        assert_eq!(patterns, ["/one/:a", "/two/:b", "/three/:c"]);
    }

    #[test]
    fn all_replicates_independent_entries_per_method() {
        let mut registry = ListenerRegistry::new();
        insert(&mut registry, MethodSpec::All, "/ping", 0);

        for method in Method::ALL {
            assert_eq!(registry.entries(method).len(), 1);
        }

        // A later GET-only insertion reorders only the GET list.
        insert(&mut registry, Method::Get.into(), "/ping/deep/pattern", 0);
        assert_eq!(registry.entries(Method::Get).len(), 2);
        assert_eq!(registry.entries(Method::Post).len(), 1);
        assert_eq!(
            registry.entries(Method::Get)[0].matcher().pattern(),
            "/ping/deep/pattern"
        );
    }

    #[test]
    fn method_parsing_is_strict() {
        assert!(Method::from_str("GET").is_ok());
        assert!(Method::from_str("get").is_err());
        assert!(Method::from_str("OPTIONS").is_err());
        assert!(matches!(MethodSpec::from_str("ALL"), Ok(MethodSpec::All)));
    }
}
