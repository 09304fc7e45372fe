//! Post-Config Bootstrap (C7): one-shot, process-wide initialization run
//! after directives are parsed. Builds the Protocol Profile and Certificate
//! Registry, assembles every enabled vhost's base TLS config via C3, and
//! constructs the global hello-config retained for API-contract
//! compatibility with the two-phase description (see `handshake.rs`'s
//! collapse decision — this crate no longer drives a throwaway handshake
//! against it, but a host integration may still want a minimal
//! "TLS is live on this listener" config to hand to lower layers).

use std::net::SocketAddr;
use std::sync::Arc;

use rustls::crypto::CryptoProvider;
use rustls::server::NoClientAuth;
use rustls::ServerConfig;

use crate::assembler::{ServerConfigAssembler, VhostKeysResolver};
use crate::certs::CertificateRegistry;
use crate::config::{GlobalConfig, VhostConfig};
use crate::error::Result;
use crate::host::{CertContributor, SessionCache};
use crate::logging::ErrorLogger;
use crate::profile::ProtocolProfile;

pub struct GlobalState {
  pub config: GlobalConfig,
  pub profile: ProtocolProfile,
  pub registry: CertificateRegistry,
  pub provider: Arc<CryptoProvider>,
  pub hello_config: Arc<ServerConfig>,
}

/// Runs once per process. Mirrors the teacher's `init_crypto_provider` +
/// per-vhost assembly sequence (`tls_single.rs`, `tls.rs::handle_manual_tls`),
/// generalized to the full directive set this core owns.
pub fn post_config(
  config: GlobalConfig,
  provider: Arc<CryptoProvider>,
  vhosts: &mut [VhostConfig],
  cert_contributor: Option<&dyn CertContributor>,
  session_cache: Option<Arc<dyn SessionCache>>,
  logger: ErrorLogger,
) -> Result<GlobalState> {
  let profile = ProtocolProfile::new(&provider);
  let registry = CertificateRegistry::new(provider.clone());

  resolve_listen_addresses(&config, vhosts);

  let assembler = ServerConfigAssembler {
    profile: &profile,
    registry: &registry,
    provider: provider.clone(),
    cert_contributor,
    session_cache,
    logger: logger.clone(),
  };

  for vhost in vhosts.iter_mut() {
    if !vhost.enabled {
      continue;
    }
    assembler.assemble(vhost)?;
  }

  let hello_config = Arc::new(build_hello_config(&provider)?);

  Ok(GlobalState {
    config,
    profile,
    registry,
    provider,
    hello_config,
  })
}

/// A minimal config whose only purpose, in the original two-phase design,
/// was to run the client-hello callback and then be discarded. Kept as a
/// cheap, always-valid placeholder config a host can attach to a listener
/// before the first byte of a connection has even arrived.
fn build_hello_config(provider: &Arc<CryptoProvider>) -> Result<ServerConfig> {
  let mut config = ServerConfig::builder_with_provider(provider.clone())
    .with_safe_default_protocol_versions()?
    .with_client_cert_verifier(Arc::new(NoClientAuth))
    .with_cert_resolver(Arc::new(VhostKeysResolver::new(Vec::new())));
  config.alpn_protocols = vec![b"http/1.1".to_vec()];
  Ok(config)
}

/// Resolves the Open Question in §9: whether a configured listen address
/// `candidate` should accept connections destined for `target`. Compares
/// `candidate`'s address bytes against `target`'s, rather than the source's
/// apparent self-comparison bug.
pub fn listens_on(candidate: SocketAddr, target: SocketAddr) -> bool {
  if candidate.port() != target.port() {
    return false;
  }
  candidate.ip().is_unspecified() || candidate.ip() == target.ip()
}

/// C7's listen-address matching (System Overview, mirrors the original's
/// `sc->enabled = we_listen_on(...)`): a vhost already marked `enabled` by
/// its directives is disabled after all if none of its listen addresses are
/// actually covered by a TLS-enabled listen address from `GlobalConfig`. A
/// vhost with no listen addresses of its own (inheriting the base server's)
/// is left untouched. The base server always listens regardless of address
/// match, per the original's `we_listen_on` unconditionally returning true
/// for `sc->base_server`.
fn resolve_listen_addresses(config: &GlobalConfig, vhosts: &mut [VhostConfig]) {
  if config.tls_listen_addresses.is_empty() {
    return;
  }
  for vhost in vhosts.iter_mut() {
    if !vhost.enabled || vhost.base_server || vhost.listen_addrs.is_empty() {
      continue;
    }
    let listens = vhost
      .listen_addrs
      .iter()
      .any(|addr| config.tls_listen_addresses.iter().any(|tls_addr| listens_on(*tls_addr, *addr)));
    if !listens {
      vhost.enabled = false;
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::net::{IpAddr, Ipv4Addr};

  fn addr(ip: &str, port: u16) -> SocketAddr {
    SocketAddr::new(ip.parse::<IpAddr>().unwrap(), port)
  }

  #[test]
  fn exact_address_and_port_match() {
    assert!(listens_on(addr("127.0.0.1", 443), addr("127.0.0.1", 443)));
  }

  #[test]
  fn differing_port_never_matches() {
    assert!(!listens_on(addr("127.0.0.1", 443), addr("127.0.0.1", 8443)));
  }

  #[test]
  fn unspecified_listen_address_matches_any_ip_on_the_same_port() {
    assert!(listens_on(SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 443), addr("10.0.0.5", 443)));
  }

  #[test]
  fn distinct_specific_addresses_do_not_match() {
    assert!(!listens_on(addr("10.0.0.1", 443), addr("10.0.0.2", 443)));
  }

  #[test]
  fn vhost_listening_on_an_address_outside_tls_listen_is_disabled() {
    let config = GlobalConfig {
      tls_listen_addresses: std::collections::HashSet::from([addr("127.0.0.1", 443)]),
      session_cache_spec: None,
    };
    let mut vhost = VhostConfig::new("a.example.com");
    vhost.enabled = true;
    vhost.listen_addrs = vec![addr("127.0.0.1", 8080)];
    let mut vhosts = [vhost];
    resolve_listen_addresses(&config, &mut vhosts);
    assert!(!vhosts[0].enabled);
  }

  #[test]
  fn vhost_listening_on_a_tls_enabled_address_stays_enabled() {
    let config = GlobalConfig {
      tls_listen_addresses: std::collections::HashSet::from([addr("127.0.0.1", 443)]),
      session_cache_spec: None,
    };
    let mut vhost = VhostConfig::new("a.example.com");
    vhost.enabled = true;
    vhost.listen_addrs = vec![addr("127.0.0.1", 443)];
    let mut vhosts = [vhost];
    resolve_listen_addresses(&config, &mut vhosts);
    assert!(vhosts[0].enabled);
  }

  #[test]
  fn vhost_with_no_listen_addresses_of_its_own_is_left_untouched() {
    let config = GlobalConfig {
      tls_listen_addresses: std::collections::HashSet::from([addr("127.0.0.1", 443)]),
      session_cache_spec: None,
    };
    let mut vhost = VhostConfig::new("a.example.com");
    vhost.enabled = true;
    let mut vhosts = [vhost];
    resolve_listen_addresses(&config, &mut vhosts);
    assert!(vhosts[0].enabled);
  }

  #[test]
  fn base_server_stays_enabled_regardless_of_listen_address_match() {
    let config = GlobalConfig {
      tls_listen_addresses: std::collections::HashSet::from([addr("127.0.0.1", 443)]),
      session_cache_spec: None,
    };
    let mut vhost = VhostConfig::new("default");
    vhost.enabled = true;
    vhost.base_server = true;
    vhost.listen_addrs = vec![addr("10.0.0.9", 9443)];
    let mut vhosts = [vhost];
    resolve_listen_addresses(&config, &mut vhosts);
    assert!(vhosts[0].enabled);
  }
}
