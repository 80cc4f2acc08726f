//! Integration tests for tun-proxy
//!
//! These drive a real reactor thread over a datagram socket pair standing in
//! for the virtual interface, with loopback UDP sockets as session sockets.
//!
//! # Test Organization
//!
//! - `common`: interface pairs, an echo server and relay handlers
//! - `reactor`: packet relay, multiplexing, eviction and cancellation
//! - `lifecycle`: start, stop and teardown sequencing
//! - `rewrite`: HTTP request rewriting through the public API
//!
//! # Test Requirements
//!
//! No privileges or network access are needed; everything runs on loopback.

pub mod common;
pub mod lifecycle;
pub mod reactor;
pub mod rewrite;
