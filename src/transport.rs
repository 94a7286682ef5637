//! Hyper 1.x boundary: converts between hyper's request/response types and
//! the router's own, and drives an accept loop over a Tokio listener.

use crate::request::Request;
use crate::response::Response;
use crate::router::Router;
use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use log::{info, warn};
use std::convert::Infallible;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Failed to read the request body: {0}")]
    Body(hyper::Error),

    #[error("Failed to accept a connection: {0}")]
    Accept(std::io::Error),
}

impl TransportError {
    #[inline]
    pub(crate) fn body(err: hyper::Error) -> Self {
        TransportError::Body(err)
    }

    #[inline]
    pub(crate) fn accept(err: std::io::Error) -> Self {
        TransportError::Accept(err)
    }
}

/// Builds a router request from a hyper request, collecting the full body
/// into memory.
pub async fn from_hyper(hyper_request: hyper::Request<Incoming>) -> Result<Request, TransportError> {
    let method = hyper_request.method().as_str().to_string();
    let target = hyper_request
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| hyper_request.uri().path().to_string());

    let mut request = Request::new(&method, &target);
    for (name, value) in hyper_request.headers() {
        if let Ok(value) = value.to_str() {
            request.set_header(name.as_str(), value);
        }
    }

    let body = hyper_request
        .into_body()
        .collect()
        .await
        .map_err(TransportError::body)?
        .to_bytes();
    request.set_body(body.to_vec());
    Ok(request)
}

/// Converts a finished router response into a hyper response. Headers that
/// do not form valid header names or values are skipped.
pub fn to_hyper(response: Response) -> hyper::Response<Full<Bytes>> {
    let (status, headers, body) = response.into_parts();
    let mut builder = hyper::Response::builder()
        .status(hyper::StatusCode::from_u16(status).unwrap_or(hyper::StatusCode::OK));
    for (name, value) in headers {
        if let (Ok(name), Ok(value)) = (
            hyper::header::HeaderName::try_from(name.as_str()),
            hyper::header::HeaderValue::try_from(value.as_str()),
        ) {
            builder = builder.header(name, value);
        }
    }
    builder
        .body(Full::new(Bytes::from(body)))
        .unwrap_or_else(|_| hyper::Response::new(Full::new(Bytes::new())))
}

/// Runs one request through the router, finalizing transport and handler
/// failures as 500s.
pub async fn handle(
    router: &Router,
    hyper_request: hyper::Request<Incoming>,
) -> hyper::Response<Full<Bytes>> {
    let mut request = match from_hyper(hyper_request).await {
        Ok(request) => request,
        Err(err) => {
            warn!("Failed to read request: {err}");
            let request = Request::new("GET", "/");
            let mut response = Response::new();
            router.internal_server_error(&request, &mut response, None).await;
            return to_hyper(response);
        }
    };

    let mut response = Response::new();
    if let Err(err) = router.dispatch(&mut request, &mut response).await {
        warn!("Handler failed for request {}: {err}", request.id());
        if !response.closed() {
            router
                .internal_server_error(&request, &mut response, None)
                .await;
        }
    }
    to_hyper(response)
}

/// Accept loop: serves HTTP/1 connections from `listener` until the listener
/// fails. Each connection runs on its own task.
pub async fn serve(router: Arc<Router>, listener: TcpListener) -> Result<(), TransportError> {
    if let Ok(addr) = listener.local_addr() {
        info!("Listening on {addr}");
    }

    loop {
        let (stream, peer) = listener.accept().await.map_err(TransportError::accept)?;
        let io = TokioIo::new(stream);
        let router = router.clone();

        tokio::task::spawn(async move {
            let service = service_fn(move |hyper_request| {
                let router = router.clone();
                async move {
                    Ok::<_, Infallible>(handle(&router, hyper_request).await)
                }
            });

            if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                warn!("Connection from {peer} failed: {err}");
            }
        });
    }
}
