//! HTTP signaling endpoint

pub mod shared;
pub use shared::AppState;

pub mod http_server;
pub use http_server::{router, run_http_server};
