//! Connection State (C4): per-connection lifecycle and the fields the
//! handshake orchestrator and request gate read and mutate.

use std::sync::Arc;

use rustls_pki_types::CertificateDer;

use crate::config::{DirConfig, VhostConfig};
use crate::error::{Result, TlsCoreError};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnState {
  Init,
  Disabled,
  PreHandshake,
  Handshake,
  Traffic,
  Notified,
  Done,
}

pub struct ConnectionState {
  pub id: u64,
  pub server: Arc<VhostConfig>,
  state: ConnState,
  server_reassigned: bool,

  pub client_hello_seen: bool,
  pub sni_hostname: Option<String>,
  pub alpn: Vec<Vec<u8>>,
  pub application_protocol: Vec<u8>,

  pub local_keys: Vec<Arc<rustls::sign::CertifiedKey>>,
  pub key: Option<Arc<rustls::sign::CertifiedKey>>,
  pub key_cloned: bool,
  pub service_unavailable: bool,

  pub peer_certificates: Option<Vec<CertificateDer<'static>>>,
  pub tls_protocol_id: Option<u16>,
  pub tls_protocol_name: Option<String>,
  pub tls_cipher_id: Option<u16>,
  pub tls_cipher_name: Option<String>,

  pub dir_config: Option<Arc<DirConfig>>,
  pub last_error: Option<TlsCoreError>,
}

impl ConnectionState {
  pub fn new(id: u64, base_server: Arc<VhostConfig>) -> Self {
    Self {
      id,
      server: base_server,
      state: ConnState::Init,
      server_reassigned: false,
      client_hello_seen: false,
      sni_hostname: None,
      alpn: Vec::new(),
      application_protocol: b"http/1.1".to_vec(),
      local_keys: Vec::new(),
      key: None,
      key_cloned: false,
      service_unavailable: false,
      peer_certificates: None,
      tls_protocol_id: None,
      tls_protocol_name: None,
      tls_cipher_id: None,
      tls_cipher_name: None,
      dir_config: None,
      last_error: None,
    }
  }

  pub fn state(&self) -> ConnState {
    self.state
  }

  pub fn is_enabled(&self) -> bool {
    !matches!(self.state, ConnState::Init | ConnState::Disabled)
  }

  /// Enforces the permitted-edges graph of the lifecycle state machine.
  /// Same-state transitions are a no-op. All other edges not listed here
  /// are rejected, including any attempt to move backwards.
  pub fn advance_to(&mut self, next: ConnState) -> Result<()> {
    if self.state == next {
      return Ok(());
    }
    let allowed = matches!(
      (self.state, next),
      (ConnState::Init, ConnState::Disabled)
        | (ConnState::Init, ConnState::PreHandshake)
        | (ConnState::PreHandshake, ConnState::Handshake)
        | (ConnState::Handshake, ConnState::Traffic)
        | (ConnState::Traffic, ConnState::Notified)
        | (ConnState::Notified, ConnState::Done)
    );
    if !allowed {
      return Err(TlsCoreError::InvalidStateTransition(format!(
        "{:?} -> {:?}",
        self.state, next
      )));
    }
    self.state = next;
    Ok(())
  }

  /// Cancellation path (§5): forces the connection to `DISABLED` from any
  /// non-terminal state, bypassing the normal forward-only graph.
  pub fn abort(&mut self, reason: impl Into<String>) {
    self.last_error = Some(TlsCoreError::Aborted(reason.into()));
    self.state = ConnState::Disabled;
  }

  /// `server` may be reassigned at most once, during vhost resolution.
  pub fn reassign_server(&mut self, new_server: Arc<VhostConfig>) -> Result<()> {
    if self.server_reassigned {
      return Err(TlsCoreError::InvalidStateTransition(
        "server was already reassigned once for this connection".into(),
      ));
    }
    self.server = new_server;
    self.server_reassigned = true;
    Ok(())
  }

  pub fn bind(&mut self, dir_config: Arc<DirConfig>) {
    self.dir_config = Some(dir_config);
  }

  /// `key_cloned` can only be true alongside a selected key.
  pub fn set_key(&mut self, key: Arc<rustls::sign::CertifiedKey>, cloned: bool) {
    self.key = Some(key);
    self.key_cloned = cloned;
  }

  pub fn record_error(&mut self, err: TlsCoreError, logger: &crate::logging::ErrorLogger) {
    logger.log_sync(&err.to_string());
    self.last_error = Some(err);
  }

  /// Per-connection handshake error path (§7): logs `err`, stashes it as
  /// `last_error` via `record_error`, and forces the connection to
  /// `DISABLED` regardless of its current state. Unlike `abort`, which
  /// replaces `last_error` with a generic cancellation reason, this keeps
  /// the original error available for later exposition.
  pub fn fail(&mut self, err: TlsCoreError, logger: &crate::logging::ErrorLogger) {
    self.record_error(err, logger);
    self.state = ConnState::Disabled;
  }
}

/// Host hook: called once per new connection. Advances `INIT` to
/// `PRE_HANDSHAKE` or `DISABLED` depending on whether TLS applies to this
/// connection, and returns whether TLS processing is now active.
pub fn conn_init(cc: &mut ConnectionState, tls_enabled: bool) -> bool {
  if cc.state() == ConnState::Init {
    let target = if tls_enabled { ConnState::PreHandshake } else { ConnState::Disabled };
    cc.advance_to(target).expect("INIT may always advance to PRE_HANDSHAKE or DISABLED");
  }
  cc.is_enabled()
}

/// Host hook: explicitly disables TLS for a connection still in `INIT`.
pub fn conn_disable(cc: &mut ConnectionState) {
  if cc.state() == ConnState::Init {
    let _ = cc.advance_to(ConnState::Disabled);
  }
}
