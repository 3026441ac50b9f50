//! Thin JSON-over-HTTP/1.1 surface in front of the [`Engine`](crate::engine::Engine).

mod routes;
mod server;
mod wire;

pub use server::{bind, serve};
