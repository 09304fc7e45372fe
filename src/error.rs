//! Error taxonomy for the TLS core.
//!
//! Configuration errors abort `post_config`; per-connection handshake
//! errors mark the connection `DISABLED` and are surfaced to the I/O
//! filter as a TLS alert where possible. Per-request errors never reach
//! this enum — the request gate maps them directly to HTTP statuses.

use std::io;

#[derive(Debug, thiserror::Error)]
pub enum TlsCoreError {
  #[error("configuration error: {0}")]
  Configuration(String),

  #[error("failed to load certificate material for {spec}: {source}")]
  CertLoad { spec: String, #[source] source: io::Error },

  #[error("rustls error: {0}")]
  Rustls(#[from] rustls::Error),

  #[error("no virtual host matches SNI \"{sni}\" and strict SNI is enabled")]
  NoVhostStrictSni { sni: String },

  #[error("no certificate could be selected for this connection")]
  NoCertificateSelected,

  #[error("client certificate required but none was presented")]
  ClientCertRequired,

  #[error("invalid connection state transition: {0}")]
  InvalidStateTransition(String),

  #[error("connection aborted: {0}")]
  Aborted(String),
}

pub type Result<T> = std::result::Result<T, TlsCoreError>;
