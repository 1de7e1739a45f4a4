// src/proxy/backend.rs
use crate::config::backend_id;
use url::Url;

/// One upstream server. Identity and address are fixed for the life of the
/// process; health lives in the `HealthRegistry`, not here.
#[derive(Debug)]
pub struct Backend {
    pub id: String,
    pub url: Url,
}

impl Backend {
    pub fn new(url: Url) -> Self {
        Self {
            id: backend_id(&url),
            url,
        }
    }

    /// Absolute URI for `path_and_query` on this backend. A base path on the
    /// backend URL is kept as a prefix.
    pub fn target_uri(&self, path_and_query: &str) -> String {
        let base = self.url.as_str().trim_end_matches('/');
        if path_and_query.starts_with('/') {
            format!("{}{}", base, path_and_query)
        } else {
            format!("{}/{}", base, path_and_query)
        }
    }
}
