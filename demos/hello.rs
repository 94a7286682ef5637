use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tokio::net::TcpListener;

use signpost::{
    ErrorSpec, Handler, HandlerError, Method, Next, Outcome, Request, Response, RouteMap,
    RouteTuple, Router,
};

// Handler for the greeting endpoint
struct GreetingHandler;

#[async_trait]
impl Handler for GreetingHandler {
    async fn exec(
        &self,
        request: &mut Request,
        response: &mut Response,
        _next: &mut Next<'_>,
    ) -> Result<Outcome, HandlerError> {
        let name = request
            .params()
            .name("name")
            .unwrap_or("world")
            .to_string();
        response.text(&format!("Hello, {name}!"));
        Ok(Outcome::Handled)
    }
}

// Handler for the echo endpoint
struct EchoHandler;

#[async_trait]
impl Handler for EchoHandler {
    async fn exec(
        &self,
        request: &mut Request,
        response: &mut Response,
        _next: &mut Next<'_>,
    ) -> Result<Outcome, HandlerError> {
        let body = request.body().to_vec();
        response.write_head(200, [("Content-Type", "application/octet-stream")]);
        response.end(body);
        Ok(Outcome::Handled)
    }
}

#[derive(Serialize)]
struct TimeBody {
    now: String,
}

// Handler for the time endpoint
struct TimeHandler;

#[async_trait]
impl Handler for TimeHandler {
    async fn exec(
        &self,
        _request: &mut Request,
        response: &mut Response,
        _next: &mut Next<'_>,
    ) -> Result<Outcome, HandlerError> {
        let now = chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
        response
            .json(&TimeBody { now })
            .map_err(|e| HandlerError::new(format!("Failed to serialize time: {e}")))?;
        Ok(Outcome::Handled)
    }
}

// Logs every request, then hands off to the rest of the chain
struct AccessLog;

#[async_trait]
impl Handler for AccessLog {
    async fn exec(
        &self,
        request: &mut Request,
        _response: &mut Response,
        _next: &mut Next<'_>,
    ) -> Result<Outcome, HandlerError> {
        log::info!("{} {} {}", request.id(), request.method(), request.path());
        Ok(Outcome::NotHandled)
    }
}

fn create_router() -> Result<Router, Box<dyn std::error::Error>> {
    let mut router = Router::new();

    // The access log runs first on every method thanks to its priority.
    router.add_request_listener("ALL".parse::<signpost::MethodSpec>()?, "*", Arc::new(AccessLog), 10)?;

    // Single tuple: method defaults to GET.
    router.add_middleware(RouteTuple::new("/greet/:name?", Arc::new(GreetingHandler)))?;

    // Tuple array with an explicit method.
    router.add_middleware(vec![RouteTuple::with_method(
        Method::Post,
        "/echo",
        Arc::new(EchoHandler) as Arc<dyn Handler>,
    )])?;

    // Nested map: prefixes concatenate, a method key fixes the method.
    router.add_middleware(
        RouteMap::new().scope(
            "/api",
            RouteMap::new().handler("/time", Arc::new(TimeHandler) as Arc<dyn Handler>),
        ),
    )?;

    // Server-level 404 override; built-in headers and handler still apply.
    router.set_error_spec(404, ErrorSpec::body("Nothing here.\n"));

    Ok(router)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let router = Arc::new(create_router()?);
    let listener = TcpListener::bind("127.0.0.1:3000").await?;

    println!("Server running on http://127.0.0.1:3000");
    println!("  GET  /greet/:name? - Returns a greeting");
    println!("  POST /echo         - Echoes back the request body");
    println!("  GET  /api/time     - Returns the current server time");

    signpost::transport::serve(router, listener).await?;
    Ok(())
}
