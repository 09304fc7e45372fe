//! Data model (§3): the directive-facing configuration structs this core
//! owns, plus one builder setter per directive named in the external
//! interfaces so a host's directive parser has a typed surface to call
//! into (compare `ferron/src/setup/tls.rs`'s `get_entry!`/`get_value!`
//! reads of an already-parsed `ServerConfiguration`).

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;

use rustls::sign::CertifiedKey;

use crate::certs::{CertificateSource, CertificateSpec};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ClientAuthMode {
  #[default]
  None,
  Optional,
  Required,
}

/// Directory-scoped options, bound to a connection via `conn_bind`.
#[derive(Clone, Debug, Default)]
pub struct DirConfig {
  pub std_env_vars: bool,
}

#[derive(Clone)]
pub struct GlobalConfig {
  pub tls_listen_addresses: HashSet<SocketAddr>,
  pub session_cache_spec: Option<String>,
}

impl Default for GlobalConfig {
  fn default() -> Self {
    Self {
      tls_listen_addresses: HashSet::new(),
      session_cache_spec: None,
    }
  }
}

pub struct GlobalConfigBuilder {
  cfg: GlobalConfig,
}

impl GlobalConfigBuilder {
  pub fn new() -> Self {
    Self {
      cfg: GlobalConfig::default(),
    }
  }

  pub fn tls_listen(mut self, addr: SocketAddr) -> Self {
    self.cfg.tls_listen_addresses.insert(addr);
    self
  }

  pub fn tls_session_cache(mut self, spec: impl Into<String>) -> Self {
    self.cfg.session_cache_spec = Some(spec.into());
    self
  }

  pub fn build(self) -> GlobalConfig {
    self.cfg
  }
}

/// Per-virtual-host TLS configuration. Populated by directive setters,
/// then filled in by the assembler (`certified_keys`, `base_tls_config`,
/// `service_unavailable`, `enabled`).
#[derive(Clone)]
pub struct VhostConfig {
  pub name: String,
  pub base_server: bool,
  pub listen_addrs: Vec<SocketAddr>,
  pub enabled: bool,

  pub cert_specs: Vec<CertificateSpec>,
  pub tls_protocol_min: u16,
  pub pref_ciphers: Vec<u16>,
  pub supp_ciphers: HashSet<u16>,
  pub honor_client_order: bool,
  pub strict_sni: bool,
  pub client_auth: ClientAuthMode,
  pub client_ca: Option<CertificateSource>,
  pub alpn_protocols: Vec<Vec<u8>>,
  pub dir_config: DirConfig,

  pub service_unavailable: bool,
  pub certified_keys: Vec<Arc<CertifiedKey>>,
  pub base_tls_config: Option<Arc<rustls::ServerConfig>>,
}

impl VhostConfig {
  pub fn new(name: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      base_server: false,
      listen_addrs: Vec::new(),
      enabled: false,
      cert_specs: Vec::new(),
      tls_protocol_min: 0,
      pref_ciphers: Vec::new(),
      supp_ciphers: HashSet::new(),
      honor_client_order: false,
      strict_sni: false,
      client_auth: ClientAuthMode::None,
      client_ca: None,
      alpn_protocols: Vec::new(),
      dir_config: DirConfig::default(),
      service_unavailable: false,
      certified_keys: Vec::new(),
      base_tls_config: None,
    }
  }

  /// Fills unset fields with defaults. Idempotent: only fills fields that
  /// are still at their unset sentinel, so calling it twice never
  /// overwrites an explicitly configured value with a default.
  pub fn apply_defaults(&mut self) {
    if self.alpn_protocols.is_empty() {
      self.alpn_protocols = vec![b"http/1.1".to_vec()];
    }
  }
}

pub struct VhostConfigBuilder {
  cfg: VhostConfig,
}

impl VhostConfigBuilder {
  pub fn new(name: impl Into<String>) -> Self {
    Self {
      cfg: VhostConfig::new(name),
    }
  }

  pub fn base_server(mut self, is_base: bool) -> Self {
    self.cfg.base_server = is_base;
    self
  }

  pub fn enabled(mut self, value: bool) -> Self {
    self.cfg.enabled = value;
    self
  }

  pub fn listen_addr(mut self, addr: SocketAddr) -> Self {
    self.cfg.listen_addrs.push(addr);
    self
  }

  pub fn tls_certificate(mut self, cert: CertificateSource, key: CertificateSource) -> Self {
    self.cfg.cert_specs.push(CertificateSpec::new(cert, key));
    self
  }

  pub fn tls_protocol(mut self, min: u16) -> Self {
    self.cfg.tls_protocol_min = min;
    self
  }

  pub fn tls_ciphers_prefer(mut self, ids: Vec<u16>) -> Self {
    self.cfg.pref_ciphers = ids;
    self
  }

  pub fn tls_ciphers_suppress(mut self, ids: impl IntoIterator<Item = u16>) -> Self {
    self.cfg.supp_ciphers = ids.into_iter().collect();
    self
  }

  pub fn tls_honor_client_order(mut self, value: bool) -> Self {
    self.cfg.honor_client_order = value;
    self
  }

  pub fn tls_strict_sni(mut self, value: bool) -> Self {
    self.cfg.strict_sni = value;
    self
  }

  pub fn tls_client_authentication(mut self, mode: ClientAuthMode) -> Self {
    self.cfg.client_auth = mode;
    self
  }

  pub fn tls_client_ca(mut self, ca: CertificateSource) -> Self {
    self.cfg.client_ca = Some(ca);
    self
  }

  pub fn tls_options_std_env_vars(mut self, value: bool) -> Self {
    self.cfg.dir_config.std_env_vars = value;
    self
  }

  pub fn alpn_protocols(mut self, protocols: Vec<Vec<u8>>) -> Self {
    self.cfg.alpn_protocols = protocols;
    self
  }

  pub fn build(mut self) -> VhostConfig {
    self.cfg.apply_defaults();
    self.cfg
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn apply_defaults_is_idempotent() {
    let mut cfg = VhostConfig::new("example.com");
    cfg.apply_defaults();
    let after_first = cfg.alpn_protocols.clone();
    cfg.apply_defaults();
    assert_eq!(cfg.alpn_protocols, after_first);
  }

  #[test]
  fn explicit_alpn_list_survives_apply_defaults() {
    let mut cfg = VhostConfigBuilder::new("example.com")
      .alpn_protocols(vec![b"h2".to_vec()])
      .build();
    cfg.apply_defaults();
    assert_eq!(cfg.alpn_protocols, vec![b"h2".to_vec()]);
  }
}
