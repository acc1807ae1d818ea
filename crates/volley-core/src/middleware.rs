use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;

use crate::context::Context;
use crate::error::AppError;
use crate::http::{AppResult, BoxFuture};

pub type BoxMiddleware = Arc<dyn Middleware>;

/// A step in the request pipeline.
///
/// Implementations read and modify `ctx` and decide whether to hand control to the rest of
/// the chain with [`Next::run`]. Code after `next.run(ctx).await` runs once everything
/// downstream has finished.
#[async_trait]
pub trait Middleware: Send + Sync + 'static {
    async fn handle(&self, ctx: &mut Context, next: Next<'_>) -> AppResult;
}

/// Cursor over the rest of a middleware chain.
#[derive(Clone, Copy)]
pub struct Next<'a> {
    chain: &'a [BoxMiddleware],
    cursor: usize,
    terminal: Option<&'a dyn Middleware>,
}

impl<'a> Next<'a> {
    pub fn new(chain: &'a [BoxMiddleware]) -> Self {
        Self {
            chain,
            cursor: 0,
            terminal: None,
        }
    }

    /// A chain that ends in `terminal` once every middleware has called through.
    pub fn with_terminal(chain: &'a [BoxMiddleware], terminal: &'a dyn Middleware) -> Self {
        Self {
            chain,
            cursor: 0,
            terminal: Some(terminal),
        }
    }

    /// Number of middlewares that would still run, terminal included.
    pub fn remaining(&self) -> usize {
        self.chain.len().saturating_sub(self.cursor) + usize::from(self.terminal.is_some())
    }

    pub async fn run(self, ctx: &mut Context) -> AppResult {
        if let Some(middleware) = self.chain.get(self.cursor) {
            let next = Next {
                cursor: self.cursor + 1,
                ..self
            };
            middleware.handle(ctx, next).await
        } else if let Some(terminal) = self.terminal {
            terminal.handle(ctx, Next::new(&[])).await
        } else {
            Ok(())
        }
    }
}

/// Run `chain` against `ctx`, starting from its first middleware.
pub async fn invoke_middlewares(ctx: &mut Context, chain: &[BoxMiddleware]) -> AppResult {
    Next::new(chain).run(ctx).await
}

pub struct RequestLogger;

#[async_trait]
impl Middleware for RequestLogger {
    async fn handle(&self, ctx: &mut Context, next: Next<'_>) -> AppResult {
        let method = ctx.method().clone();
        let path = ctx.path().to_string();
        let start = Instant::now();

        match next.run(ctx).await {
            Ok(()) => {
                let elapsed = start.elapsed().as_secs_f64() * 1000.0;
                tracing::info!(
                    "request method={} path={} status={} elapsed_ms={:.2}",
                    method,
                    path,
                    ctx.status().as_u16(),
                    elapsed
                );
                Ok(())
            }
            Err(err) => {
                let elapsed = start.elapsed().as_secs_f64() * 1000.0;
                tracing::error!(
                    "request method={} path={} status={} error={} elapsed_ms={:.2}",
                    method,
                    path,
                    err.http_status().as_u16(),
                    err.message(),
                    elapsed
                );
                Err(err)
            }
        }
    }
}

/// Terminal middleware of every application. Reaching it means every middleware passed the
/// request on and nobody claimed it.
pub struct NotFound;

#[async_trait]
impl Middleware for NotFound {
    async fn handle(&self, _ctx: &mut Context, _next: Next<'_>) -> AppResult {
        Err(AppError::no_handler())
    }
}

pub struct FnMiddleware<F>
where
    F: Send + Sync + 'static,
{
    f: F,
}

impl<F> FnMiddleware<F>
where
    F: Send + Sync + 'static,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F> Middleware for FnMiddleware<F>
where
    F: for<'a> Fn(&'a mut Context, Next<'a>) -> BoxFuture<'a, AppResult> + Send + Sync + 'static,
{
    async fn handle(&self, ctx: &mut Context, next: Next<'_>) -> AppResult {
        (self.f)(ctx, next).await
    }
}

/// Build a middleware from an async closure.
///
/// ```ignore
/// app.use_middleware(middleware_fn(|ctx, next| Box::pin(async move {
///     ctx.response_mut().headers_mut().set("X-Powered-By", "volley");
///     next.run(ctx).await
/// })));
/// ```
pub fn middleware_fn<F>(f: F) -> FnMiddleware<F>
where
    F: for<'a> Fn(&'a mut Context, Next<'a>) -> BoxFuture<'a, AppResult> + Send + Sync + 'static,
{
    FnMiddleware::new(f)
}

pub struct HandlerFn<F>
where
    F: Send + Sync + 'static,
{
    f: F,
}

#[async_trait]
impl<F> Middleware for HandlerFn<F>
where
    F: Fn(&mut Context) -> AppResult + Send + Sync + 'static,
{
    async fn handle(&self, ctx: &mut Context, _next: Next<'_>) -> AppResult {
        (self.f)(ctx)
    }
}

/// Build an endpoint from a synchronous closure. It never calls the rest of the chain.
pub fn handler_fn<F>(f: F) -> HandlerFn<F>
where
    F: Fn(&mut Context) -> AppResult + Send + Sync + 'static,
{
    HandlerFn { f }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body::Body;
    use crate::headers::Headers;
    use crate::http::{Method, StatusCode};
    use crate::request::Request;
    use crate::response::Response;
    use futures::executor::block_on;
    use std::sync::Mutex;

    struct RecordingMiddleware {
        log: Arc<Mutex<Vec<String>>>,
        name: &'static str,
    }

    #[async_trait]
    impl Middleware for RecordingMiddleware {
        async fn handle(&self, ctx: &mut Context, next: Next<'_>) -> AppResult {
            self.log.lock().unwrap().push(format!("{} before", self.name));
            next.run(ctx).await?;
            self.log.lock().unwrap().push(format!("{} after", self.name));
            Ok(())
        }
    }

    struct ShortCircuit;

    #[async_trait]
    impl Middleware for ShortCircuit {
        async fn handle(&self, ctx: &mut Context, _next: Next<'_>) -> AppResult {
            ctx.set_status(StatusCode::UNAUTHORIZED);
            Ok(())
        }
    }

    fn empty_context() -> Context {
        Context::new(
            Request::memory(Method::GET, "/test", Headers::new(), Body::empty()),
            Response::transport(),
        )
    }

    fn recorder(log: &Arc<Mutex<Vec<String>>>, name: &'static str) -> BoxMiddleware {
        Arc::new(RecordingMiddleware {
            log: Arc::clone(log),
            name,
        })
    }

    #[test]
    fn middleware_chain_runs_like_an_onion() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain = vec![recorder(&log, "first"), recorder(&log, "second")];

        let mut ctx = empty_context();
        block_on(invoke_middlewares(&mut ctx, &chain)).expect("chain");

        assert_eq!(
            *log.lock().unwrap(),
            vec!["first before", "second before", "second after", "first after"]
        );
    }

    #[test]
    fn middleware_can_short_circuit() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain: Vec<BoxMiddleware> = vec![Arc::new(ShortCircuit), recorder(&log, "never")];
        let mut ctx = empty_context();
        block_on(invoke_middlewares(&mut ctx, &chain)).expect("chain");
        assert_eq!(ctx.status(), StatusCode::UNAUTHORIZED);
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn empty_chain_is_a_no_op() {
        let mut ctx = empty_context();
        block_on(invoke_middlewares(&mut ctx, &[])).expect("chain");
        assert_eq!(ctx.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn terminal_runs_after_chain() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain = vec![recorder(&log, "first")];
        let terminal = RecordingMiddleware {
            log: Arc::clone(&log),
            name: "terminal",
        };
        let next = Next::with_terminal(&chain, &terminal);
        assert_eq!(next.remaining(), 2);

        let mut ctx = empty_context();
        block_on(next.run(&mut ctx)).expect("chain");
        assert_eq!(
            *log.lock().unwrap(),
            vec!["first before", "terminal before", "terminal after", "first after"]
        );
    }

    #[test]
    fn errors_propagate_outward() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain: Vec<BoxMiddleware> = vec![
            recorder(&log, "outer"),
            Arc::new(handler_fn(|_ctx: &mut Context| {
                Err(AppError::bad_request("boom"))
            })),
        ];
        let mut ctx = empty_context();
        let err = block_on(invoke_middlewares(&mut ctx, &chain)).expect_err("error");
        assert_eq!(err.http_status(), StatusCode::BAD_REQUEST);
        assert_eq!(*log.lock().unwrap(), vec!["outer before"]);
    }

    #[test]
    fn request_logger_passes_through_success() {
        let chain: Vec<BoxMiddleware> = vec![
            Arc::new(RequestLogger),
            Arc::new(handler_fn(|ctx: &mut Context| {
                ctx.response_mut().set_body("ok");
                Ok(())
            })),
        ];
        let mut ctx = empty_context();
        block_on(invoke_middlewares(&mut ctx, &chain)).expect("chain");
        assert_eq!(ctx.status(), StatusCode::OK);
    }

    #[test]
    fn request_logger_propagates_error() {
        let chain: Vec<BoxMiddleware> = vec![
            Arc::new(RequestLogger),
            Arc::new(handler_fn(|_ctx: &mut Context| Err(AppError::bad_request("boom")))),
        ];
        let mut ctx = empty_context();
        let err = block_on(invoke_middlewares(&mut ctx, &chain)).expect_err("error");
        assert_eq!(err.http_status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn middleware_fn_wraps_downstream() {
        let chain: Vec<BoxMiddleware> = vec![
            Arc::new(middleware_fn(|ctx, next| {
                Box::pin(async move {
                    ctx.response_mut().headers_mut().set("X-Before", "1");
                    next.run(ctx).await?;
                    let status = ctx.status().as_u16();
                    ctx.response_mut().headers_mut().set("X-Status", u64::from(status));
                    Ok(())
                })
            })),
            Arc::new(handler_fn(|ctx: &mut Context| {
                ctx.set_status(StatusCode::CREATED);
                Ok(())
            })),
        ];
        let mut ctx = empty_context();
        block_on(invoke_middlewares(&mut ctx, &chain)).expect("chain");
        let headers = ctx.response().headers();
        assert_eq!(headers.get("x-before").as_deref(), Some("1"));
        assert_eq!(headers.get("x-status").as_deref(), Some("201"));
    }

    #[test]
    fn not_found_fails_even_after_upstream_changes() {
        let chain: Vec<BoxMiddleware> = vec![Arc::new(middleware_fn(|ctx, next| {
            Box::pin(async move {
                ctx.set_status(StatusCode::NO_CONTENT);
                next.run(ctx).await
            })
        }))];
        let mut ctx = empty_context();
        let err = block_on(Next::with_terminal(&chain, &NotFound).run(&mut ctx))
            .expect_err("no handler");
        assert!(err.is_no_handler());
        assert_eq!(err.http_status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn not_found_is_skipped_on_short_circuit() {
        let chain: Vec<BoxMiddleware> = vec![Arc::new(handler_fn(|ctx: &mut Context| {
            ctx.response_mut().set_body("hi");
            Ok(())
        }))];
        let mut ctx = empty_context();
        block_on(Next::with_terminal(&chain, &NotFound).run(&mut ctx)).expect("handled");
        assert_eq!(ctx.status(), StatusCode::OK);
    }
}
