//! HTTP binding for the kernel: axum router, built-in guards, request
//! logging, and application bootstrap.

pub mod app;
pub mod demo;
pub mod guards;
pub mod interceptors;
pub mod router;

pub use app::{App, Server};
