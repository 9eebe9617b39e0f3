// Path: crates/proxy/src/lib.rs
//! # Mech Signing Proxy
//!
//! A loopback-only HTTP server that mediates **all** private-key operations
//! for the agent subprocess. The agent receives the proxy URL and a random
//! bearer token through its environment and never sees the key itself.
//!
//! Server side: [`server::SigningProxy`]. Agent side: [`client::ProxyClient`]
//! with the bounded retry contract (10 s timeout, at most two retries with
//! exponential backoff, 4xx never retried).

pub mod client;
pub mod dispatch;
pub mod identity;
pub mod server;

pub use client::{ProxyClient, ProxyClientError};
pub use identity::{new_identity_slot, ActiveIdentity, IdentitySlot};
pub use server::SigningProxy;
