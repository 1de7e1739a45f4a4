// src/server/handler.rs
use hyper::header::HeaderValue;
use hyper::{Body, Request, Response};
use std::convert::Infallible;
use std::sync::Arc;
use tower::Service;
use tracing::Instrument;

use crate::proxy::{ClientAddr, Proxy, REQUEST_ID_HEADER};
use crate::server::StaticFiles;

/// Entry point for every inbound request: static assets under their prefix,
/// everything else through the proxy. Always produces a response.
#[derive(Clone)]
pub struct RequestHandler {
    proxy: Arc<Proxy>,
    static_files: Option<Arc<StaticFiles>>,
}

impl RequestHandler {
    pub fn new(proxy: Arc<Proxy>) -> Self {
        Self {
            proxy,
            static_files: None,
        }
    }

    pub fn with_static_files(mut self, static_files: StaticFiles) -> Self {
        self.static_files = Some(Arc::new(static_files));
        self
    }

    async fn dispatch(
        proxy: Arc<Proxy>,
        static_files: Option<Arc<StaticFiles>>,
        req: Request<Body>,
    ) -> Response<Body> {
        if let Some(files) = static_files.filter(|f| f.matches(req.uri().path())) {
            let method = req.method().clone();
            let path = req.uri().path().to_owned();
            return files.serve(&method, &path).await;
        }

        match proxy.handle(req).await {
            Ok(response) => response,
            Err(e) => {
                tracing::error!(%e, "proxy error");
                e.into()
            }
        }
    }
}

impl Service<Request<Body>> for RequestHandler {
    type Response = Response<Body>;
    type Error = Infallible;
    type Future = futures::future::BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(
        &mut self,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        std::task::Poll::Ready(Ok(()))
    }

    fn call(&mut self, mut req: Request<Body>) -> Self::Future {
        let proxy = self.proxy.clone();
        let static_files = self.static_files.clone();

        let request_id = match req.headers().get(REQUEST_ID_HEADER) {
            Some(existing) => existing.clone(),
            None => {
                let generated = HeaderValue::from_str(&uuid::Uuid::new_v4().to_string())
                    .unwrap_or_else(|_| HeaderValue::from_static("unknown"));
                req.headers_mut().insert(REQUEST_ID_HEADER, generated.clone());
                generated
            }
        };

        let client = req
            .extensions()
            .get::<ClientAddr>()
            .map(|ClientAddr(addr)| addr.to_string())
            .unwrap_or_default();
        let span = tracing::info_span!(
            "request",
            id = request_id.to_str().unwrap_or("-"),
            client = %client,
        );

        Box::pin(
            async move {
                let mut response = Self::dispatch(proxy, static_files, req).await;
                response.headers_mut().insert(REQUEST_ID_HEADER, request_id);
                Ok(response)
            }
            .instrument(span),
        )
    }
}
