//! Handshake Orchestrator (C5): vhost resolution from SNI, ALPN negotiation
//! and protocol switch, certificate selection — collapsed onto
//! `rustls::server::Acceptor` (see `SPEC_FULL.md` §4's collapse decision)
//! instead of the original mod_tls's throwaway-session probe.
//!
//! The orchestrator never touches a socket. A host feeds raw bytes into an
//! `Acceptor`, and once it yields an `Accepted`, calls [`HandshakeOrchestrator::accept`]
//! with it; the returned `ServerConnection` is what actually drives the wire
//! protocol from then on.

use std::sync::Arc;

use rustls::crypto::CryptoProvider;
use rustls::server::{Accepted, ClientHello, ServerConnection};
use rustls::sign::CertifiedKey;
use rustls::ServerConfig;

use crate::assembler::{select_certified_key, OneCertifiedKeyResolver};
use crate::certs::{build_one_shot_key, CertificateRegistry};
use crate::config::VhostConfig;
use crate::connection::{ConnState, ConnectionState};
use crate::error::{Result, TlsCoreError};
use crate::host::{ChallengeAnswerer, OcspProvider, ProtocolRegistry, VhostIterator};
use crate::logging::ErrorLogger;

const HTTP11: &[u8] = b"http/1.1";
const H2: &[u8] = b"h2";

/// The fields of a client hello this core cares about, lifted out of
/// rustls's borrowed `ClientHello<'_>` so vhost/ALPN resolution can be unit
/// tested without driving an actual TLS handshake.
#[derive(Clone, Debug, Default)]
pub struct HelloInfo {
  pub sni: Option<String>,
  pub alpn: Vec<Vec<u8>>,
  pub signature_schemes: Vec<rustls::SignatureScheme>,
}

impl From<&ClientHello<'_>> for HelloInfo {
  fn from(hello: &ClientHello<'_>) -> Self {
    Self {
      sni: hello.server_name().map(|s| s.to_string()),
      alpn: hello
        .alpn()
        .map(|protocols| protocols.map(|p| p.to_vec()).collect())
        .unwrap_or_default(),
      signature_schemes: hello.signature_schemes().to_vec(),
    }
  }
}

/// Outcome of §4.4 step 1 — which branch the vhost resolution took, needed
/// to recompute `service_unavailable` per step 2 ("if SNI matched").
enum VhostResolution {
  MatchedBySni(Arc<VhostConfig>),
  KeptInitial,
}

/// Resolves the vhost to use for this handshake (§4.4 step 1).
fn resolve_vhost(
  vhosts: &dyn VhostIterator,
  initial: &Arc<VhostConfig>,
  sni: Option<&str>,
) -> Result<VhostResolution> {
  let Some(sni) = sni else {
    return Ok(VhostResolution::KeptInitial);
  };

  if let Some(vhost) = vhosts.find_by_sni(sni) {
    return Ok(VhostResolution::MatchedBySni(vhost));
  }
  if vhosts.base_server_name_matches(sni) {
    return Ok(VhostResolution::MatchedBySni(vhosts.base_server()));
  }
  if initial.strict_sni {
    return Err(TlsCoreError::NoVhostStrictSni { sni: sni.to_string() });
  }
  Ok(VhostResolution::KeptInitial)
}

pub struct HandshakeOrchestrator<'a> {
  pub vhosts: &'a dyn VhostIterator,
  pub registry: &'a CertificateRegistry,
  pub provider: &'a Arc<CryptoProvider>,
  pub protocols: &'a dyn ProtocolRegistry,
  pub challenge_answerer: Option<&'a dyn ChallengeAnswerer>,
  pub ocsp: Option<&'a dyn OcspProvider>,
  pub logger: ErrorLogger,
}

impl HandshakeOrchestrator<'_> {
  /// Phase 2 entry point, given an `Accepted` handle the host produced by
  /// feeding the client's bytes into a `rustls::server::Acceptor`. Performs
  /// vhost resolution, ALPN negotiation and protocol switch, certificate
  /// selection (including OCSP stapling and the ACME challenge path), then
  /// hands the resulting config to rustls to finish the handshake.
  pub fn accept(&self, cc: &mut ConnectionState, accepted: Accepted) -> Result<ServerConnection> {
    let hello = HelloInfo::from(&accepted.client_hello());
    self.record_hello(cc, &hello);

    let initial = cc.server.clone();
    let resolution = match resolve_vhost(self.vhosts, &initial, hello.sni.as_deref()) {
      Ok(r) => r,
      Err(err) => return Err(self.fail(cc, err)),
    };
    let (vhost, matched_by_sni) = match resolution {
      VhostResolution::MatchedBySni(v) => (v, true),
      VhostResolution::KeptInitial => (initial.clone(), false),
    };

    cc.service_unavailable = matched_by_sni && vhost.service_unavailable;

    if !Arc::ptr_eq(&vhost, &initial) {
      if let Err(err) = cc.reassign_server(vhost.clone()) {
        return Err(self.fail(cc, err));
      }
    }

    let base_config = match vhost.base_tls_config.clone().or_else(|| initial.base_tls_config.clone()) {
      Some(cfg) => cfg,
      None => {
        let err = TlsCoreError::Configuration(format!("{}: no base TLS config was assembled", vhost.name));
        return Err(self.fail(cc, err));
      }
    };
    let mut config = (*base_config).clone();

    if let Err(err) = self.negotiate_alpn(cc, &vhost, &hello, &mut config) {
      return Err(self.fail(cc, err));
    }
    if let Err(err) = self.select_certificate(cc, &vhost, &hello, &mut config) {
      return Err(self.fail(cc, err));
    }

    if let Err(err) = cc.advance_to(ConnState::Handshake) {
      return Err(self.fail(cc, err));
    }

    accepted
      .into_connection(Arc::new(config))
      .map_err(|(err, _alert)| self.fail(cc, TlsCoreError::Rustls(err)))
  }

  /// §7: logs `err`, stashes it on `cc`, forces the connection to
  /// `DISABLED`, and returns the `Aborted` error this function's callers
  /// propagate to the I/O filter ("all mark the connection aborted and
  /// transition state to DISABLED").
  fn fail(&self, cc: &mut ConnectionState, err: TlsCoreError) -> TlsCoreError {
    let msg = err.to_string();
    cc.fail(err, &self.logger);
    TlsCoreError::Aborted(msg)
  }

  fn record_hello(&self, cc: &mut ConnectionState, hello: &HelloInfo) {
    cc.client_hello_seen = true;
    cc.sni_hostname = hello.sni.clone();
    cc.alpn = hello.alpn.clone();
  }

  /// §4.6: asks the host's protocol registry to pick a protocol, switches
  /// the host's processor if it changed, and narrows the per-connection
  /// config's ALPN list to exactly that choice. A protocol outside
  /// {http/1.1, h2} is treated as an ACME-style challenge.
  fn negotiate_alpn(
    &self,
    cc: &mut ConnectionState,
    vhost: &Arc<VhostConfig>,
    hello: &HelloInfo,
    config: &mut ServerConfig,
  ) -> Result<()> {
    let Some(chosen) = self.protocols.select_protocol(vhost, &hello.alpn) else {
      return Ok(());
    };
    if chosen == cc.application_protocol {
      return Ok(());
    }

    self
      .protocols
      .switch_protocol(cc.id, &chosen)
      .map_err(|e| TlsCoreError::Configuration(e.to_string()))?;
    config.alpn_protocols = vec![chosen.clone()];
    cc.application_protocol = chosen.clone();

    if chosen != HTTP11 && chosen != H2 {
      self.answer_challenge(cc, &chosen);
    }
    Ok(())
  }

  fn answer_challenge(&self, cc: &mut ConnectionState, protocol: &[u8]) {
    let Some(answerer) = self.challenge_answerer else {
      return;
    };
    let Some((cert_pem, key_pem)) = answerer.answer_challenge(cc.sni_hostname.as_deref()) else {
      return;
    };
    match build_one_shot_key(self.provider, &cert_pem, &key_pem) {
      Ok(key) => {
        cc.local_keys = vec![key];
        cc.service_unavailable = true;
        self.logger.warn_sync(&format!(
          "connection {}: answering ACME challenge protocol {:?}, no real requests will be served",
          cc.id,
          String::from_utf8_lossy(protocol)
        ));
      }
      Err(err) => self
        .logger
        .warn_sync(&format!("connection {}: failed to load challenge certificate: {err}", cc.id)),
    }
  }

  /// §4.5: picks a certified key (preferring `local_keys` when the ACME
  /// challenge path populated it), attempts OCSP stapling, installs a
  /// resolver pinned to the chosen key on the per-connection config.
  fn select_certificate(
    &self,
    cc: &mut ConnectionState,
    vhost: &Arc<VhostConfig>,
    hello: &HelloInfo,
    config: &mut ServerConfig,
  ) -> Result<()> {
    let candidates: &[Arc<CertifiedKey>] = if !cc.local_keys.is_empty() {
      &cc.local_keys
    } else {
      &vhost.certified_keys
    };
    if candidates.is_empty() {
      return Err(TlsCoreError::NoCertificateSelected);
    }

    let key = select_certified_key(candidates, &hello.signature_schemes).ok_or(TlsCoreError::NoCertificateSelected)?;

    let (final_key, cloned) = match self.ocsp.and_then(|ocsp| ocsp.staple(&key)) {
      Some(stapled) => (stapled, true),
      None => (key, false),
    };
    if let Some(id) = self.registry.id_of(&final_key) {
      self.logger.log_sync(&format!("connection {}: presenting certificate {id}", cc.id));
    }
    cc.set_key(final_key.clone(), cloned);
    config.cert_resolver = Arc::new(OneCertifiedKeyResolver::new(final_key));
    Ok(())
  }
}

/// §4.7 post-handshake: reads and caches negotiated parameters once the I/O
/// filter reports the handshake complete. Per §7, a failure here marks the
/// connection aborted, logs once via `logger`, and transitions to DISABLED.
pub fn post_handshake(
  cc: &mut ConnectionState,
  session: &ServerConnection,
  client_auth_required: bool,
  logger: &ErrorLogger,
) -> Result<()> {
  let negotiated_protocol = session.protocol_version();
  let negotiated_cipher_suite = session.negotiated_cipher_suite();
  cc.tls_protocol_id = negotiated_protocol.map(u16::from);
  cc.tls_protocol_name = negotiated_protocol.map(|v| format!("{v:?}"));
  cc.tls_cipher_id = negotiated_cipher_suite.map(|cs| u16::from(cs.suite()));
  cc.tls_cipher_name = negotiated_cipher_suite.map(|cs| format!("{:?}", cs.suite()));

  let peer_certs = session.peer_certificates().map(|certs| certs.to_vec());
  if client_auth_required && peer_certs.is_none() {
    cc.fail(TlsCoreError::ClientCertRequired, logger);
    return Err(TlsCoreError::ClientCertRequired);
  }
  cc.peer_certificates = peer_certs;

  if let Err(err) = cc.advance_to(ConnState::Traffic) {
    let msg = err.to_string();
    cc.fail(err, logger);
    return Err(TlsCoreError::Aborted(msg));
  }
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::collections::HashMap;
  use std::sync::Mutex;

  struct FakeVhosts {
    by_name: HashMap<String, Arc<VhostConfig>>,
    base: Arc<VhostConfig>,
  }

  impl VhostIterator for FakeVhosts {
    fn find_by_sni(&self, sni: &str) -> Option<Arc<VhostConfig>> {
      self.by_name.get(sni).cloned()
    }
    fn base_server_name_matches(&self, sni: &str) -> bool {
      self.base.name == sni
    }
    fn base_server(&self) -> Arc<VhostConfig> {
      self.base.clone()
    }
  }

  fn base_vhost() -> Arc<VhostConfig> {
    Arc::new(VhostConfig::new("default"))
  }

  #[test]
  fn sni_match_selects_named_vhost() {
    let a = Arc::new(VhostConfig::new("a.example.com"));
    let vhosts = FakeVhosts {
      by_name: HashMap::from([("a.example.com".to_string(), a.clone())]),
      base: base_vhost(),
    };
    match resolve_vhost(&vhosts, &base_vhost(), Some("a.example.com")).unwrap() {
      VhostResolution::MatchedBySni(v) => assert_eq!(v.name, "a.example.com"),
      _ => panic!("expected a match"),
    }
  }

  #[test]
  fn no_sni_keeps_initial_vhost() {
    let vhosts = FakeVhosts {
      by_name: HashMap::new(),
      base: base_vhost(),
    };
    assert!(matches!(
      resolve_vhost(&vhosts, &base_vhost(), None).unwrap(),
      VhostResolution::KeptInitial
    ));
  }

  #[test]
  fn strict_sni_with_no_match_fails() {
    let mut initial = VhostConfig::new("default");
    initial.strict_sni = true;
    let vhosts = FakeVhosts {
      by_name: HashMap::new(),
      base: base_vhost(),
    };
    let err = resolve_vhost(&vhosts, &Arc::new(initial), Some("c.example.com")).unwrap_err();
    assert!(matches!(err, TlsCoreError::NoVhostStrictSni { .. }));
  }

  #[test]
  fn non_strict_sni_with_no_match_keeps_initial() {
    let vhosts = FakeVhosts {
      by_name: HashMap::new(),
      base: base_vhost(),
    };
    assert!(matches!(
      resolve_vhost(&vhosts, &base_vhost(), Some("nope.example.com")).unwrap(),
      VhostResolution::KeptInitial
    ));
  }

  #[test]
  fn unmatched_sni_falls_back_to_base_server_by_name() {
    let base = Arc::new(VhostConfig::new("b.example.com"));
    let vhosts = FakeVhosts {
      by_name: HashMap::new(),
      base: base.clone(),
    };
    match resolve_vhost(&vhosts, &base_vhost(), Some("b.example.com")).unwrap() {
      VhostResolution::MatchedBySni(v) => assert_eq!(v.name, "b.example.com"),
      _ => panic!("expected the base server to match by name"),
    }
  }

  struct FakeProtocols {
    chosen: Mutex<Option<Vec<u8>>>,
    switched: Mutex<Vec<Vec<u8>>>,
  }

  impl ProtocolRegistry for FakeProtocols {
    fn select_protocol(&self, _vhost: &VhostConfig, _proposed: &[Vec<u8>]) -> Option<Vec<u8>> {
      self.chosen.lock().unwrap().clone()
    }
    fn switch_protocol(&self, _connection_id: u64, protocol: &[u8]) -> anyhow::Result<()> {
      self.switched.lock().unwrap().push(protocol.to_vec());
      Ok(())
    }
  }

  fn provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::aws_lc_rs::default_provider())
  }

  fn logger() -> ErrorLogger {
    let (tx, _rx) = async_channel::unbounded();
    ErrorLogger::new(None, tx)
  }

  #[test]
  fn same_protocol_as_current_does_not_trigger_a_switch() {
    let vhost = base_vhost();
    let mut cc = ConnectionState::new(1, vhost.clone());
    let provider = provider();
    let protocols = FakeProtocols {
      chosen: Mutex::new(Some(b"http/1.1".to_vec())),
      switched: Mutex::new(Vec::new()),
    };
    let vhosts = FakeVhosts {
      by_name: HashMap::new(),
      base: vhost.clone(),
    };
    let registry = CertificateRegistry::new(provider.clone());
    let orchestrator = HandshakeOrchestrator {
      vhosts: &vhosts,
      registry: &registry,
      provider: &provider,
      protocols: &protocols,
      challenge_answerer: None,
      ocsp: None,
      logger: logger(),
    };
    let mut cfg = ServerConfig::builder_with_provider(provider.clone())
      .with_safe_default_protocol_versions()
      .unwrap()
      .with_no_client_auth()
      .with_cert_resolver(Arc::new(crate::assembler::VhostKeysResolver::new(vec![])));
    orchestrator
      .negotiate_alpn(&mut cc, &vhost, &HelloInfo::default(), &mut cfg)
      .unwrap();
    assert!(protocols.switched.lock().unwrap().is_empty());
  }

  #[test]
  fn switching_to_h2_narrows_alpn_and_calls_switch_protocol() {
    let vhost = base_vhost();
    let mut cc = ConnectionState::new(1, vhost.clone());
    let provider = provider();
    let protocols = FakeProtocols {
      chosen: Mutex::new(Some(b"h2".to_vec())),
      switched: Mutex::new(Vec::new()),
    };
    let vhosts = FakeVhosts {
      by_name: HashMap::new(),
      base: vhost.clone(),
    };
    let registry = CertificateRegistry::new(provider.clone());
    let orchestrator = HandshakeOrchestrator {
      vhosts: &vhosts,
      registry: &registry,
      provider: &provider,
      protocols: &protocols,
      challenge_answerer: None,
      ocsp: None,
      logger: logger(),
    };
    let mut cfg = ServerConfig::builder_with_provider(provider.clone())
      .with_safe_default_protocol_versions()
      .unwrap()
      .with_no_client_auth()
      .with_cert_resolver(Arc::new(crate::assembler::VhostKeysResolver::new(vec![])));
    orchestrator
      .negotiate_alpn(&mut cc, &vhost, &HelloInfo::default(), &mut cfg)
      .unwrap();
    assert_eq!(cfg.alpn_protocols, vec![b"h2".to_vec()]);
    assert_eq!(cc.application_protocol, b"h2".to_vec());
    assert_eq!(protocols.switched.lock().unwrap().as_slice(), [b"h2".to_vec()]);
  }

  struct FixedChallengeAnswerer {
    pem: (Vec<u8>, Vec<u8>),
  }

  impl ChallengeAnswerer for FixedChallengeAnswerer {
    fn answer_challenge(&self, _sni: Option<&str>) -> Option<(Vec<u8>, Vec<u8>)> {
      Some(self.pem.clone())
    }
  }

  #[test]
  fn acme_challenge_protocol_populates_local_keys_and_marks_unavailable() {
    let cert = rcgen::generate_simple_self_signed(vec!["challenge.example.com".to_string()]).unwrap();
    let pem = (cert.cert.pem().into_bytes(), cert.signing_key.serialize_pem().into_bytes());

    let vhost = base_vhost();
    let mut cc = ConnectionState::new(1, vhost.clone());
    let provider = provider();
    let protocols = FakeProtocols {
      chosen: Mutex::new(Some(b"acme-tls/1".to_vec())),
      switched: Mutex::new(Vec::new()),
    };
    let vhosts = FakeVhosts {
      by_name: HashMap::new(),
      base: vhost.clone(),
    };
    let registry = CertificateRegistry::new(provider.clone());
    let answerer = FixedChallengeAnswerer { pem };
    let orchestrator = HandshakeOrchestrator {
      vhosts: &vhosts,
      registry: &registry,
      provider: &provider,
      protocols: &protocols,
      challenge_answerer: Some(&answerer),
      ocsp: None,
      logger: logger(),
    };
    let mut cfg = ServerConfig::builder_with_provider(provider.clone())
      .with_safe_default_protocol_versions()
      .unwrap()
      .with_no_client_auth()
      .with_cert_resolver(Arc::new(crate::assembler::VhostKeysResolver::new(vec![])));
    orchestrator
      .negotiate_alpn(&mut cc, &vhost, &HelloInfo::default(), &mut cfg)
      .unwrap();
    assert_eq!(cc.local_keys.len(), 1);
    assert!(cc.service_unavailable);
  }
}
