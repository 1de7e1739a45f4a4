// ────────────────────────────────
// src/server/builder.rs
// ────────────────────────────────
use crate::proxy::ClientAddr;
use crate::server::listener::bind_tcp;
use anyhow::{anyhow, Result};
use hyper::{server::conn::Http, Body, Request, Response};
use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tower::{Service, ServiceExt};

const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Builder pattern so `main.rs` can inject its handler.
pub struct ServerBuilder<H>
where
    H: Service<Request<Body>, Response = Response<Body>> + Send + Clone + 'static,
    H::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    H::Future: Send + 'static,
{
    addr: SocketAddr,
    listener: Option<TcpListener>,
    handler: Option<H>,
    drain_timeout: Duration,
}

impl<H> ServerBuilder<H>
where
    H: Service<Request<Body>, Response = Response<Body>> + Send + Clone + 'static,
    H::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    H::Future: Send + 'static,
{
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            listener: None,
            handler: None,
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
        }
    }

    /// Serve on an already bound listener instead of binding `addr`.
    pub fn with_listener(mut self, listener: TcpListener) -> Self {
        self.listener = Some(listener);
        self
    }

    /// Inject your request handler (usually wraps `proxy::Proxy`).
    pub fn with_handler(mut self, handler: H) -> Self {
        self.handler = Some(handler);
        self
    }

    /// Upper bound on how long shutdown waits for in-flight requests.
    pub fn with_drain_timeout(mut self, drain_timeout: Duration) -> Self {
        self.drain_timeout = drain_timeout;
        self
    }

    /// Accept connections until `shutdown` resolves, one Tokio task per
    /// connection. On shutdown, idle connections are closed and requests in
    /// flight are allowed to finish (up to the drain timeout) before this
    /// returns.
    pub async fn serve_with_shutdown<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let handler = self
            .handler
            .ok_or_else(|| anyhow!("handler must be set via with_handler()"))?;

        let listener = match self.listener {
            Some(listener) => listener,
            None => bind_tcp(self.addr).await?,
        };
        tracing::info!("HTTP server listening on {}", listener.local_addr()?);

        let (closing_tx, closing_rx) = watch::channel(false);
        let mut connections = JoinSet::new();
        tokio::pin!(shutdown);

        loop {
            let (stream, peer) = tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok(conn) => conn,
                    Err(err) => {
                        tracing::warn!(%err, "failed to accept connection");
                        continue;
                    }
                },
                // Reap finished connection tasks.
                Some(_) = connections.join_next(), if !connections.is_empty() => continue,
                _ = &mut shutdown => break,
            };

            // Tag every request on this connection with the caller's address.
            let svc = handler.clone().map_request(move |mut req: Request<Body>| {
                req.extensions_mut().insert(ClientAddr(peer));
                req
            });
            let mut closing = closing_rx.clone();

            connections.spawn(async move {
                let conn = Http::new().serve_connection(stream, svc);
                tokio::pin!(conn);

                let result = tokio::select! {
                    res = conn.as_mut() => res,
                    _ = closing.changed() => {
                        conn.as_mut().graceful_shutdown();
                        conn.await
                    }
                };
                if let Err(err) = result {
                    tracing::warn!(%peer, %err, "connection error");
                }
            });
        }

        drop(listener);
        tracing::info!(
            open = connections.len(),
            "HTTP server no longer accepting connections, draining"
        );
        let _ = closing_tx.send(true);

        let drained = tokio::time::timeout(self.drain_timeout, async {
            while connections.join_next().await.is_some() {}
        })
        .await
        .is_ok();
        if !drained {
            tracing::warn!(
                open = connections.len(),
                "drain timeout elapsed, aborting remaining connections"
            );
            connections.abort_all();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BackendConfig, Config};
    use crate::proxy::{BackendPool, Proxy};
    use crate::server::RequestHandler;
    use hyper::StatusCode;
    use std::sync::Arc;
    use std::time::Instant;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use url::Url;

    // Answers every connection after `delay`.
    async fn slow_backend(delay: Duration) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let mut buf = [0u8; 1024];
                    let _ = stream.read(&mut buf).await;
                    tokio::time::sleep(delay).await;
                    let _ = stream
                        .write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 4\r\nconnection: close\r\n\r\nslow")
                        .await;
                });
            }
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn shutdown_waits_for_in_flight_requests() {
        let backend = slow_backend(Duration::from_millis(600)).await;
        let config = Config {
            backends: vec![BackendConfig { url: Url::parse(&backend).unwrap() }],
            ..Config::default()
        };
        let pool = BackendPool::new(config.backends.clone());
        let handler = RequestHandler::new(Arc::new(Proxy::new(&config, pool, None)));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        let server = tokio::spawn(
            ServerBuilder::new(addr)
                .with_listener(listener)
                .with_handler(handler)
                .serve_with_shutdown(async {
                    let _ = stop_rx.await;
                }),
        );

        let started = Instant::now();
        let request = tokio::spawn(async move {
            let uri: hyper::Uri = format!("http://{}/", addr).parse().unwrap();
            hyper::Client::new().get(uri).await
        });

        tokio::time::sleep(Duration::from_millis(150)).await;
        let _ = stop_tx.send(());

        tokio::time::timeout(Duration::from_secs(5), server)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert!(
            started.elapsed() >= Duration::from_millis(500),
            "server returned before the in-flight request finished"
        );

        let response = request.await.unwrap().unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = hyper::body::to_bytes(response.into_body()).await.unwrap();
        assert_eq!(&body[..], b"slow");
    }

    #[tokio::test]
    async fn drain_timeout_bounds_shutdown() {
        let backend = slow_backend(Duration::from_secs(10)).await;
        let config = Config {
            backends: vec![BackendConfig { url: Url::parse(&backend).unwrap() }],
            ..Config::default()
        };
        let pool = BackendPool::new(config.backends.clone());
        let handler = RequestHandler::new(Arc::new(Proxy::new(&config, pool, None)));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        let server = tokio::spawn(
            ServerBuilder::new(addr)
                .with_listener(listener)
                .with_handler(handler)
                .with_drain_timeout(Duration::from_millis(200))
                .serve_with_shutdown(async {
                    let _ = stop_rx.await;
                }),
        );

        let _request = tokio::spawn(async move {
            let uri: hyper::Uri = format!("http://{}/", addr).parse().unwrap();
            hyper::Client::new().get(uri).await
        });

        tokio::time::sleep(Duration::from_millis(100)).await;
        let _ = stop_tx.send(());

        tokio::time::timeout(Duration::from_secs(2), server)
            .await
            .expect("shutdown should not wait past the drain timeout")
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn missing_handler_is_an_error() {
        let builder: ServerBuilder<RequestHandler> = ServerBuilder::new(([127, 0, 0, 1], 0).into());
        assert!(builder.serve_with_shutdown(async {}).await.is_err());
    }
}
