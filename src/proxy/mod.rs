// src/proxy/mod.rs
mod backend;
mod pool;
#[allow(clippy::module_inception)]
mod proxy;

pub use backend::Backend;
pub use pool::BackendPool;
pub use proxy::{ClientAddr, Proxy, ProxyError, REQUEST_ID_HEADER};
