//! switchyard-gateway: HTTP API over the switchboard
//!
//! Thin transport only. Every routing and dispatch decision is made by
//! `switchyard_core::Switchboard`; this crate maps requests onto it and
//! errors onto status codes.

pub mod protocol;
pub mod server;

pub use protocol::ApiError;
pub use server::{GatewayServer, GatewayState};
