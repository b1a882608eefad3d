//! Module proxy front end: URL grammar, status mapping and file serving.

mod request;
mod response;

use std::{future::Future, sync::Arc, time::Instant};

use anyhow::Result;
use govein_adapter::{ModuleVersion, ProxyFile};
use percent_encoding::percent_decode_str;
use rama::{
    Service,
    error::BoxError,
    extensions::ExtensionsRef,
    http::{Body, Method, Request, Response, StatusCode},
};
use tracing::{debug, error, warn};

use crate::{
    error::ProxyError,
    logger::{StatusRecorder, elapsed_millis},
};

pub use request::{ProxyRequest, RouteError};
pub use response::{error_status, http_date};

/// Per-request state created before any operation runs.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub start: Instant,
    pub target: String,
}

impl Default for RequestContext {
    fn default() -> Self {
        Self {
            start: Instant::now(),
            target: String::new(),
        }
    }
}

impl RequestContext {
    pub fn from_request(req: &Request<Body>) -> Self {
        Self {
            start: Instant::now(),
            target: req.uri().to_string(),
        }
    }

    /// Milliseconds since the request reached the front end.
    pub fn elapsed_ms(&self) -> u64 {
        elapsed_millis(self.start.elapsed())
    }
}

/// Operations the front end dispatches parsed requests to.
pub trait ServerOps: Send + Sync + 'static {
    fn request_context(&self, req: &Request<Body>) -> Result<RequestContext, ProxyError> {
        Ok(RequestContext::from_request(req))
    }

    /// Returns false when the module must not be served.
    fn filter(&self, ctx: &RequestContext, module_path: &str) -> bool;

    fn list(
        &self,
        ctx: &RequestContext,
        module_path: &str,
    ) -> impl Future<Output = Result<ProxyFile, ProxyError>> + Send;

    fn latest(
        &self,
        ctx: &RequestContext,
        module_path: &str,
    ) -> impl Future<Output = Result<ProxyFile, ProxyError>> + Send;

    fn info(
        &self,
        ctx: &RequestContext,
        module: &ModuleVersion,
    ) -> impl Future<Output = Result<ProxyFile, ProxyError>> + Send;

    fn go_mod(
        &self,
        ctx: &RequestContext,
        module: &ModuleVersion,
    ) -> impl Future<Output = Result<ProxyFile, ProxyError>> + Send;

    fn zip(
        &self,
        ctx: &RequestContext,
        module: &ModuleVersion,
    ) -> impl Future<Output = Result<ProxyFile, ProxyError>> + Send;
}

/// Serves the module proxy protocol on top of a [`ServerOps`] implementation.
pub struct ModProxyServer<O> {
    ops: Arc<O>,
}

impl<O> Clone for ModProxyServer<O> {
    fn clone(&self) -> Self {
        Self {
            ops: self.ops.clone(),
        }
    }
}

impl<O: ServerOps> ModProxyServer<O> {
    pub fn new(ops: O) -> Self {
        Self { ops: Arc::new(ops) }
    }

    pub fn ops(&self) -> &O {
        &self.ops
    }

    async fn handle(&self, req: Request<Body>) -> Result<Response<Body>> {
        let head_only = req.method() == Method::HEAD;
        if req.method() != Method::GET && !head_only {
            return response::respond_text(StatusCode::METHOD_NOT_ALLOWED, "method not allowed\n");
        }

        let ctx = match self.ops.request_context(&req) {
            Ok(ctx) => ctx,
            Err(err) => return response::respond_error(&err),
        };

        let Ok(path) = percent_decode_str(req.uri().path()).decode_utf8() else {
            return response::respond_text(StatusCode::NOT_FOUND, "invalid path encoding\n");
        };
        let request = match ProxyRequest::from_path(&path) {
            Ok(request) => request,
            Err(err) => {
                debug!(request_target = %ctx.target, error = %err, "unroutable request");
                return response::respond_text(StatusCode::NOT_FOUND, &format!("{err}\n"));
            }
        };

        let module_path = request.module_path();
        if !self.ops.filter(&ctx, module_path) {
            debug!(module = %module_path, "module rejected by access rules");
            return response::respond_error(&ProxyError::Forbidden(module_path.to_string()));
        }

        let result = match &request {
            ProxyRequest::List { module } => self.ops.list(&ctx, module).await,
            ProxyRequest::Latest { module } => self.ops.latest(&ctx, module).await,
            ProxyRequest::Info(mv) => self.ops.info(&ctx, mv).await,
            ProxyRequest::GoMod(mv) => self.ops.go_mod(&ctx, mv).await,
            ProxyRequest::Zip(mv) => self.ops.zip(&ctx, mv).await,
        };

        match result {
            Ok(file) => response::respond_file(file, request.content_type(), head_only),
            Err(err) => {
                let status = error_status(&err);
                if status.is_server_error() {
                    error!(
                        operation = request.operation(),
                        module = %module_path,
                        %status,
                        error = %err,
                        elapsed_ms = ctx.elapsed_ms(),
                        request_target = %ctx.target,
                        "proxy operation failed"
                    );
                } else {
                    warn!(
                        operation = request.operation(),
                        module = %module_path,
                        %status,
                        error = %err,
                        elapsed_ms = ctx.elapsed_ms(),
                        request_target = %ctx.target,
                        "proxy operation rejected"
                    );
                }
                response::respond_error(&err)
            }
        }
    }
}

impl<O: ServerOps> Service<Request<Body>> for ModProxyServer<O> {
    type Output = Response<Body>;
    type Error = BoxError;

    async fn serve(&self, req: Request<Body>) -> Result<Self::Output, Self::Error> {
        let recorder = req.extensions().get::<StatusRecorder>().cloned();
        let resp = self.handle(req).await?;
        if let Some(recorder) = recorder {
            recorder.record(resp.status());
        }
        Ok(resp)
    }
}
