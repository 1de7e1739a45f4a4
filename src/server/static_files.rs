// src/server/static_files.rs
use hyper::{header, Body, Method, Response, StatusCode};
use percent_encoding::percent_decode_str;
use std::path::{Component, Path, PathBuf};

/// Serves files from a local directory under a fixed URL prefix, e.g.
/// `/static/css/site.css` → `<root>/css/site.css`.
#[derive(Debug, Clone)]
pub struct StaticFiles {
    root: PathBuf,
    prefix: String,
}

impl StaticFiles {
    pub fn new(root: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            prefix: prefix.into(),
        }
    }

    pub fn matches(&self, path: &str) -> bool {
        path.starts_with(&self.prefix)
    }

    pub async fn serve(&self, method: &Method, path: &str) -> Response<Body> {
        if method != Method::GET && method != Method::HEAD {
            return plain(StatusCode::METHOD_NOT_ALLOWED, "Method not allowed");
        }

        let relative = path.strip_prefix(&self.prefix).unwrap_or("");
        // Decode before resolving so an encoded `..` is still refused.
        let relative = match percent_decode_str(relative).decode_utf8() {
            Ok(decoded) => decoded,
            Err(_) => return plain(StatusCode::BAD_REQUEST, "Bad request"),
        };
        let file = match self.resolve(&relative) {
            Some(file) => file,
            None => return plain(StatusCode::BAD_REQUEST, "Bad request"),
        };

        match tokio::fs::read(&file).await {
            Ok(contents) => {
                let len = contents.len();
                let body = if method == Method::HEAD {
                    Body::empty()
                } else {
                    Body::from(contents)
                };
                let mut response = Response::new(body);
                let headers = response.headers_mut();
                headers.insert(header::CONTENT_TYPE, header::HeaderValue::from_static(content_type(&file)));
                headers.insert(header::CONTENT_LENGTH, header::HeaderValue::from(len));
                response
            }
            Err(err) => {
                tracing::debug!(path = %file.display(), %err, "static file not served");
                plain(StatusCode::NOT_FOUND, "Not found")
            }
        }
    }

    // Only plain path segments are allowed; anything that could climb out of
    // the root is refused.
    fn resolve(&self, relative: &str) -> Option<PathBuf> {
        let relative = Path::new(relative);
        if relative.as_os_str().is_empty() {
            return None;
        }
        if !relative.components().all(|c| matches!(c, Component::Normal(_))) {
            return None;
        }
        Some(self.root.join(relative))
    }
}

fn plain(status: StatusCode, message: &'static str) -> Response<Body> {
    let mut response = Response::new(Body::from(message));
    *response.status_mut() = status;
    response
}

fn content_type(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        Some("html") | Some("htm") => "text/html; charset=utf-8",
        Some("css") => "text/css; charset=utf-8",
        Some("js") => "application/javascript",
        Some("json") => "application/json",
        Some("txt") => "text/plain; charset=utf-8",
        Some("svg") => "image/svg+xml",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("ico") => "image/x-icon",
        _ => "application/octet-stream",
    }
}
