//! Adaptive Tutor Client Library Crate
//!
//! Everything the `tutor` binary needs besides the session core: environment
//! configuration, the websocket transport for streaming chat, and the REST
//! client for the tutor's request/response endpoints. The binary in
//! `bin/tutor.rs` is a thin wrapper around this library.

pub mod api;
pub mod config;
pub mod models;
pub mod render;
pub mod ws;
