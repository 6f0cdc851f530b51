//! switchyard-rewrite: standalone prompt rewrite and route service
//!
//! Detects which pattern a prompt belongs to, rewrites it with that pattern's
//! preamble, and recommends agents. Runs as its own process; the router in
//! `switchyard-core` talks to it over HTTP and copes with it being absent.

pub mod patterns;
pub mod server;

pub use patterns::{Analysis, PatternAnalyzer, PatternFile, PatternSpec, default_patterns};
pub use server::{RewriteServer, RewriteState};
