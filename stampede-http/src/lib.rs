//! HTTP/1.1 client used by load-test iterations.
//!
//! Every exchange reports its duration and an estimate of the bytes that crossed the wire,
//! so callers can record `http_*` and `data_*` samples without touching hyper directly.

#![forbid(unsafe_code)]

mod client;
mod error;
mod types;
mod wire;

pub use client::{DEFAULT_CONNECT_TIMEOUT, HttpClient};
pub use error::{Error, FailureKind, Result};
pub use http::Method;
pub use types::{HttpRequest, HttpResponse};
