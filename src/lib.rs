//! Core library for the `loadctl` CLI.
//!
//! `loadctl` orchestrates load-generator runs (workspace allocation, properties
//! compilation, process launch, result retrieval and retention) and manages the
//! lifecycle of remote monitoring agents. The [`engine::Engine`] facade ties the
//! pieces together and is served over a small JSON HTTP surface by `loadctl serve`.
pub mod agent;
pub mod api;
pub mod args;
pub mod config;
pub mod domain;
pub mod engine;
pub mod entry;
pub mod error;
pub mod exec;
pub mod logger;
pub mod orchestrator;
pub mod shutdown;
pub mod store;
