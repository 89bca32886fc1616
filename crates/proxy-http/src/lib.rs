mod controller;
mod proxy;

pub use controller::{mount_all, Controller};
pub use proxy::{modify_json_body, strip_accept_encoding, ProxyError, ProxyRequest};
