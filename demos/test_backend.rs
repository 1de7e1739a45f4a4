//! demos/test_backend.rs
//! Toy upstream for trying the gateway locally.
//! Run: cargo run --example test_backend -- <port> [name]
//!
//! Env: BASE_DELAY_MS, JITTER_MS, FAIL_PCT, FLIP_HEALTH_SECS (0 = never).

use hyper::{
    service::{make_service_fn, service_fn},
    Body, Request, Response, Server, StatusCode,
};
use rand::Rng;
use std::{
    convert::Infallible,
    net::SocketAddr,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::time::sleep;
use tracing::info;

#[derive(Clone)]
struct DemoBackend {
    name:       String,
    served:     Arc<AtomicU64>,
    healthy:    Arc<AtomicBool>,
    base_delay: u64,
    jitter_ms:  u64,
    fail_pct:   f64,
}

fn status(code: StatusCode, body: &'static str) -> Response<Body> {
    let mut response = Response::new(Body::from(body));
    *response.status_mut() = code;
    response
}

async fn handle(req: Request<Body>, backend: DemoBackend) -> Result<Response<Body>, Infallible> {
    let path = req.uri().path().to_owned();

    // The gateway health-checks `/` by default; `/health` works too.
    if path == "/" || path == "/health" {
        if !backend.healthy.load(Ordering::SeqCst) {
            return Ok(status(StatusCode::SERVICE_UNAVAILABLE, "unhealthy"));
        }
        if path == "/health" {
            return Ok(status(StatusCode::OK, "ok"));
        }
    }

    let n = backend.served.fetch_add(1, Ordering::SeqCst) + 1;

    let delay = backend.base_delay + rand::thread_rng().gen_range(0..=backend.jitter_ms);
    if delay > 0 {
        sleep(Duration::from_millis(delay)).await;
    }

    if backend.fail_pct > 0.0 && rand::thread_rng().gen_bool((backend.fail_pct / 100.0).min(1.0)) {
        return Ok(status(StatusCode::INTERNAL_SERVER_ERROR, "injected failure"));
    }

    let body = format!(
        r#"{{"backend":"{}","served":{},"method":"{}","path":"{}","delay_ms":{}}}"#,
        backend.name,
        n,
        req.method(),
        path,
        delay
    );

    let mut response = Response::new(Body::from(body));
    response.headers_mut().insert(
        hyper::header::CONTENT_TYPE,
        hyper::header::HeaderValue::from_static("application/json"),
    );
    Ok(response)
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive("info".parse()?),
        )
        .init();

    let port: u16 = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "8080".into())
        .parse()?;
    let name = std::env::args()
        .nth(2)
        .unwrap_or_else(|| format!("backend-{port}"));

    let backend = DemoBackend {
        name: name.clone(),
        served: Arc::new(AtomicU64::new(0)),
        healthy: Arc::new(AtomicBool::new(true)),
        base_delay: env_or("BASE_DELAY_MS", 0),
        jitter_ms: env_or("JITTER_MS", 0),
        fail_pct: env_or("FAIL_PCT", 0.0),
    };

    let flip_secs: u64 = env_or("FLIP_HEALTH_SECS", 0);
    if flip_secs > 0 {
        let backend = backend.clone();
        tokio::spawn(async move {
            loop {
                sleep(Duration::from_secs(flip_secs)).await;
                let was = backend.healthy.fetch_xor(true, Ordering::SeqCst);
                info!(backend = %backend.name, healthy = !was, "health flipped");
            }
        });
    }

    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let make_svc = make_service_fn(move |_conn| {
        let backend = backend.clone();
        async move {
            Ok::<_, Infallible>(service_fn(move |req| handle(req, backend.clone())))
        }
    });

    info!(%addr, %name, "demo backend listening");
    Server::bind(&addr).serve(make_svc).await?;
    Ok(())
}
