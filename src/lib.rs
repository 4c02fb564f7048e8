//! Generative media job queue
//!
//! This library provides the core of the genmedia-jobs system: a job record
//! state machine that dispatches structured or free-text generation requests
//! to per-model backends, polls asynchronous operations through a durable
//! delayed-task queue, and writes results back exactly once.

pub mod app_state;
pub mod config;
pub mod db;
pub mod models;
pub mod routes;
pub mod services;

/// Build identifier stamped into `metadata.version` of every job this build touches.
pub const BUILD_VERSION: &str = concat!(env!("CARGO_PKG_NAME"), "@", env!("CARGO_PKG_VERSION"));
