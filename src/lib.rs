//! spdylink - SPDY protocol engine over TLS
//!
//! This crate implements the SPDY/3 family of multiplexed, flow-controlled
//! framing protocols on top of an established byte stream, together with the
//! TLS application-protocol negotiation that decides whether a connection
//! speaks SPDY or falls back to HTTP/1.1.

pub mod http;
