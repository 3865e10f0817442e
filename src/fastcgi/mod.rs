//! FastCGI transport
//!
//! - `protocol`: record and name/value pair codec
//! - `request`: request/response model and form decoding
//! - `server`: Unix socket Responder
//! - `client`: one-shot client for diagnostics and tests

pub mod client;
pub mod protocol;
pub mod request;
pub mod server;

pub use client::FastCgiClient;
pub use request::{Request, Response};
pub use server::{FastCgiServer, Handler};
