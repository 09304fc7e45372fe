//! Per-connection TLS negotiation core.
//!
//! This crate supplies the glue a host HTTP server needs to turn a raw
//! client connection into a decrypted request stream: certificate
//! registration and selection, a two-phase-equivalent handshake that
//! inspects SNI/ALPN before committing to a virtual host, ALPN negotiation
//! with a host-driven protocol switch, and the connection-reuse
//! compatibility rule that governs which vhost may serve a given request.
//!
//! The underlying TLS library, the byte-level I/O filter, the directive
//! parser and the session-resumption cache are all external collaborators;
//! this crate only declares the traits it needs from them (see [`host`]).
//!
//! Module map:
//! - [`certs`] — Certificate Registry (C1): load-once certified-key cache.
//! - [`profile`] — Protocol Profile (C2): supported TLS versions/ciphers.
//! - [`config`] — §3 data model: `GlobalConfig`, `VhostConfig`, directive setters.
//! - [`assembler`] — Server Config Assembler (C3): builds a vhost's base `rustls::ServerConfig`.
//! - [`connection`] — Connection State (C4) and its lifecycle state machine.
//! - [`handshake`] — Handshake Orchestrator (C5): vhost resolution, ALPN, cert selection.
//! - [`gate`] — Request Gate (C6): per-request admission and the compatibility rule.
//! - [`bootstrap`] — Post-Config Bootstrap (C7): one-shot process init.
//! - [`host`] — traits the host implements for this crate to call into.
//! - [`vhost_match`] — hostname/wildcard matching helper.
//! - [`error`] — `TlsCoreError` and the error taxonomy.
//! - [`logging`] — channel-based logging used throughout.

pub mod assembler;
pub mod bootstrap;
pub mod certs;
pub mod config;
pub mod connection;
pub mod error;
pub mod gate;
pub mod handshake;
pub mod host;
pub mod logging;
pub mod profile;
pub mod vhost_match;

pub use bootstrap::{post_config, GlobalState};
pub use config::{ClientAuthMode, GlobalConfig, GlobalConfigBuilder, VhostConfig, VhostConfigBuilder};
pub use connection::{conn_disable, conn_init, ConnState, ConnectionState};
pub use error::{Result, TlsCoreError};
pub use gate::{request_check, GateDecision};
pub use handshake::{post_handshake, HandshakeOrchestrator};
