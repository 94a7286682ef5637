use crate::request::Request;
use crate::response::Response;
use crate::router::Next;
use async_trait::async_trait;
use futures_util::future::BoxFuture;
use std::borrow::Cow;
use std::sync::Arc;
use thiserror::Error;

/// What a handler's completion means to the dispatch chain.
///
/// `NotHandled` is the "try the next candidate" sentinel; any other
/// completion counts as having fully handled the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Handled,
    NotHandled,
}

impl Outcome {
    pub fn is_handled(&self) -> bool {
        matches!(self, Outcome::Handled)
    }
}

/// A failure raised by a handler's own asynchronous work.
///
/// The dispatch engine propagates these to the transport layer unchanged;
/// converting a failure into an error status is the handler's job.
#[derive(Error, Debug)]
#[error("Handler failed: {message}")]
pub struct HandlerError {
    message: Cow<'static, str>,
}

impl HandlerError {
    pub fn new(message: impl Into<Cow<'static, str>>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// A request handler participating in a dispatch chain.
///
/// Handlers run with the matched request (captures already annotated), the
/// response sink, and a `next` continuation. Calling `next.run()` resumes
/// matching at the following registry entry and yields the downstream
/// outcome; returning `Outcome::NotHandled` without calling `next` has the
/// same effect.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn exec(
        &self,
        request: &mut Request,
        response: &mut Response,
        next: &mut Next<'_>,
    ) -> Result<Outcome, HandlerError>;

    fn name(&self) -> &str {
        "handler"
    }
}

pub type SharedHandler = Arc<dyn Handler>;

/// Adapts a plain async function into a [`Handler`].
///
/// The function receives the request and response only; use a full `Handler`
/// implementation when the `next` continuation is needed.
pub struct FnHandler<F> {
    f: F,
}

impl<F> FnHandler<F>
where
    F: for<'a> Fn(
            &'a mut Request,
            &'a mut Response,
        ) -> BoxFuture<'a, Result<Outcome, HandlerError>>
        + Send
        + Sync
        + 'static,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }

    pub fn shared(f: F) -> SharedHandler {
        Arc::new(Self::new(f))
    }
}

#[async_trait]
impl<F> Handler for FnHandler<F>
where
    F: for<'a> Fn(
            &'a mut Request,
            &'a mut Response,
        ) -> BoxFuture<'a, Result<Outcome, HandlerError>>
        + Send
        + Sync
        + 'static,
{
    async fn exec(
        &self,
        request: &mut Request,
        response: &mut Response,
        _next: &mut Next<'_>,
    ) -> Result<Outcome, HandlerError> {
        (self.f)(request, response).await
    }

    fn name(&self) -> &str {
        "fn handler"
    }
}
