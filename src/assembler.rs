//! Server Config Assembler (C3): turns a `VhostConfig` into a base
//! `rustls::ServerConfig`, following the same builder-assembly sequence as
//! the teacher's `tls_single.rs` (`init_crypto_provider`, `set_cipher_suites`,
//! `set_ecdh_curves`, `set_tls_version`), generalized to run per vhost
//! instead of once for the whole process.

use std::sync::Arc;

use rustls::crypto::CryptoProvider;
use rustls::server::{NoClientAuth, ResolvesServerCert, WebPkiClientVerifier};
use rustls::sign::CertifiedKey;
use rustls::{RootCertStore, ServerConfig};

use crate::certs::CertificateRegistry;
use crate::config::{ClientAuthMode, VhostConfig};
use crate::error::{Result, TlsCoreError};
use crate::host::{CertContributor, SessionCache};
use crate::logging::ErrorLogger;
use crate::profile::ProtocolProfile;

/// Picks the best certified key for a hello's offered signature schemes,
/// by iterating candidates in configuration order and returning the first
/// whose signing key can produce a compatible signature. Shared between
/// the assembler's base-config fallback resolver and the per-connection
/// pinned resolver built in `handshake.rs`.
pub fn select_certified_key(
  keys: &[Arc<CertifiedKey>],
  schemes: &[rustls::SignatureScheme],
) -> Option<Arc<CertifiedKey>> {
  keys
    .iter()
    .find(|k| k.key.choose_scheme(schemes).is_some())
    .cloned()
}

/// Certificate-selection callback (§4.5) installed on a vhost's base
/// config. Real connections never see this directly — `handshake.rs`
/// precomputes the selection and installs a pinned resolver per
/// connection instead — but it keeps the base config usable on its own
/// and gives cert selection one shared implementation.
#[derive(Debug)]
pub struct VhostKeysResolver {
  keys: Vec<Arc<CertifiedKey>>,
}

impl VhostKeysResolver {
  pub fn new(keys: Vec<Arc<CertifiedKey>>) -> Self {
    Self { keys }
  }
}

impl ResolvesServerCert for VhostKeysResolver {
  fn resolve(&self, client_hello: rustls::server::ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
    select_certified_key(&self.keys, client_hello.signature_schemes())
  }
}

/// A resolver pinned to a single, already-selected key. Mirrors the
/// teacher's `OneCertifiedKeyResolver`.
#[derive(Debug)]
pub struct OneCertifiedKeyResolver {
  key: Arc<CertifiedKey>,
}

impl OneCertifiedKeyResolver {
  pub fn new(key: Arc<CertifiedKey>) -> Self {
    Self { key }
  }
}

impl ResolvesServerCert for OneCertifiedKeyResolver {
  fn resolve(&self, _client_hello: rustls::server::ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
    Some(self.key.clone())
  }
}

pub struct ServerConfigAssembler<'a> {
  pub profile: &'a ProtocolProfile,
  pub registry: &'a CertificateRegistry,
  pub provider: Arc<CryptoProvider>,
  pub cert_contributor: Option<&'a dyn CertContributor>,
  pub session_cache: Option<Arc<dyn SessionCache>>,
  pub logger: ErrorLogger,
}

impl ServerConfigAssembler<'_> {
  /// Steps 1-10 of the assembler, run once per enabled vhost at
  /// post-config time.
  pub fn assemble(&self, vhost: &mut VhostConfig) -> Result<()> {
    self.resolve_cert_specs(vhost)?;
    self.load_keys(vhost)?;

    let ciphers = self.configure_ciphers(vhost);
    let mut provider = (*self.provider).clone();
    provider.cipher_suites = ciphers;
    let provider = Arc::new(provider);

    let versions = self.profile.versions_at_least(vhost.tls_protocol_min);
    if versions.is_empty() {
      return Err(TlsCoreError::Configuration(format!(
        "{}: TLSProtocol minimum {:#06x} is above every version this library supports",
        vhost.name, vhost.tls_protocol_min
      )));
    }
    if let Some(lowest) = self.profile.lowest_selected_version(vhost.tls_protocol_min) {
      if vhost.tls_protocol_min != 0 && lowest != vhost.tls_protocol_min {
        self.logger.warn_sync(&format!(
          "{}: effective minimum TLS version is {:#06x}, not the configured {:#06x}",
          vhost.name, lowest, vhost.tls_protocol_min
        ));
      }
    }

    let versions_builder = ServerConfig::builder_with_provider(provider).with_protocol_versions(&versions)?;

    let verifier_builder = if let Some(ca) = &vhost.client_ca {
      let mut roots = RootCertStore::empty();
      for cert in crate::certs::load_ca_certs(ca).map_err(|source| TlsCoreError::CertLoad {
        spec: vhost.name.clone(),
        source,
      })? {
        roots
          .add(cert)
          .map_err(|e| TlsCoreError::Configuration(format!("{}: invalid CA certificate: {e}", vhost.name)))?;
      }
      let roots = Arc::new(roots);
      match vhost.client_auth {
        ClientAuthMode::Required => versions_builder.with_client_cert_verifier(
          WebPkiClientVerifier::builder(roots)
            .build()
            .map_err(|e| TlsCoreError::Configuration(format!("{}: {e}", vhost.name)))?,
        ),
        ClientAuthMode::Optional => versions_builder.with_client_cert_verifier(
          WebPkiClientVerifier::builder(roots)
            .allow_unauthenticated()
            .build()
            .map_err(|e| TlsCoreError::Configuration(format!("{}: {e}", vhost.name)))?,
        ),
        ClientAuthMode::None => versions_builder.with_client_cert_verifier(Arc::new(NoClientAuth)),
      }
    } else {
      if vhost.client_auth != ClientAuthMode::None {
        return Err(TlsCoreError::Configuration(format!(
          "{}: TLSClientAuthentication is set but no TLSClientCA is configured",
          vhost.name
        )));
      }
      versions_builder.with_client_cert_verifier(Arc::new(NoClientAuth))
    };

    let resolver: Arc<dyn ResolvesServerCert> = Arc::new(VhostKeysResolver::new(vhost.certified_keys.clone()));
    let mut config = verifier_builder.with_cert_resolver(resolver);

    config.ignore_client_order = !vhost.honor_client_order;
    config.alpn_protocols = vhost.alpn_protocols.clone();
    if let Some(cache) = &self.session_cache {
      config.session_storage = cache.clone();
    }

    vhost.base_tls_config = Some(Arc::new(config));
    Ok(())
  }

  fn resolve_cert_specs(&self, vhost: &mut VhostConfig) -> Result<()> {
    if let Some(contributor) = self.cert_contributor {
      vhost.cert_specs.extend(contributor.add_cert_files(&vhost.name));
    }
    if !vhost.cert_specs.is_empty() {
      return Ok(());
    }
    if let Some(contributor) = self.cert_contributor {
      let fallback = contributor.add_fallback_cert_files(&vhost.name);
      if !fallback.is_empty() {
        vhost.cert_specs = fallback;
        vhost.service_unavailable = true;
        self.logger.warn_sync(&format!(
          "{}: no certificates configured, falling back to a self-signed pair and answering 503",
          vhost.name
        ));
        return Ok(());
      }
    }
    if vhost.base_server {
      return Ok(());
    }
    Err(TlsCoreError::Configuration(format!(
      "{}: no certificates configured and no fallback available",
      vhost.name
    )))
  }

  fn load_keys(&self, vhost: &mut VhostConfig) -> Result<()> {
    let mut keys = Vec::with_capacity(vhost.cert_specs.len());
    for spec in &vhost.cert_specs {
      keys.push(self.registry.get_or_load(spec)?);
    }
    vhost.certified_keys = keys;
    Ok(())
  }

  /// Mirrors the teacher's `set_ciphers`: configured preferences move to
  /// the front, in the order given, followed by the remaining supported
  /// suites in library order; suppressed suites are dropped first.
  fn configure_ciphers(&self, vhost: &VhostConfig) -> Vec<rustls::SupportedCipherSuite> {
    let allowed: Vec<u16> = self
      .profile
      .supported_cipher_ids()
      .into_iter()
      .filter(|id| !vhost.supp_ciphers.contains(id))
      .collect();

    let mut unsupported = Vec::new();
    let mut ordered: Vec<u16> = Vec::new();
    for &id in &vhost.pref_ciphers {
      if allowed.contains(&id) {
        if !ordered.contains(&id) {
          ordered.push(id);
        }
      } else if !self.profile.cipher_id_known(id) {
        unsupported.push(id);
      }
    }
    for &id in &allowed {
      if !ordered.contains(&id) {
        ordered.push(id);
      }
    }

    if !unsupported.is_empty() {
      self.logger.warn_sync(&format!(
        "{}: TLSCiphersPrefer names ciphers this library does not support: {:?}",
        vhost.name, unsupported
      ));
    }

    ordered.into_iter().filter_map(|id| self.profile.rustls_suite(id)).collect()
  }
}
