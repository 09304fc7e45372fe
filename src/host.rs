//! Traits for the external collaborators named in the external-interfaces
//! contract. The host (the surrounding web server) implements these; this
//! crate only calls into them.

use std::sync::Arc;

use crate::certs::CertificateSpec;
use crate::config::VhostConfig;

/// Finds the virtual host a SNI hostname names, and tells whether the base
/// server itself would claim a given hostname. Matching rules are the
/// host's own (see [`crate::vhost_match::match_hostname`] for a reusable
/// implementation).
pub trait VhostIterator: Send + Sync {
  fn find_by_sni(&self, sni: &str) -> Option<Arc<VhostConfig>>;
  fn base_server_name_matches(&self, sni: &str) -> bool;
  fn base_server(&self) -> Arc<VhostConfig>;
}

/// ALPN protocol bookkeeping and the module switch a negotiated protocol
/// triggers on a connection (e.g. handing a connection to an HTTP/2
/// handler).
pub trait ProtocolRegistry: Send + Sync {
  fn select_protocol(&self, vhost: &VhostConfig, proposed: &[Vec<u8>]) -> Option<Vec<u8>>;
  fn switch_protocol(&self, connection_id: u64, protocol: &[u8]) -> anyhow::Result<()>;
}

/// Lets a directive-defined certificate provider (e.g. an ACME module)
/// contribute certificate specs for a vhost at post-config time, and a
/// fallback self-signed pair when none are configured at all.
pub trait CertContributor: Send + Sync {
  fn add_cert_files(&self, vhost_name: &str) -> Vec<CertificateSpec>;
  fn add_fallback_cert_files(&self, vhost_name: &str) -> Vec<CertificateSpec>;
}

/// Answers an ACME `tls-alpn-01` style challenge for a SNI name, returning
/// a one-shot (cert PEM, key PEM) pair when one is pending.
pub trait ChallengeAnswerer: Send + Sync {
  fn answer_challenge(&self, sni: Option<&str>) -> Option<(Vec<u8>, Vec<u8>)>;
}

/// Marker trait tying this crate's session-cache directive to a concrete
/// `rustls` session store, which is out of scope for this crate to
/// implement.
pub trait SessionCache: rustls::server::StoresServerSessions + Send + Sync {}
impl<T: rustls::server::StoresServerSessions + Send + Sync> SessionCache for T {}

/// Attempts OCSP stapling for an already-selected certified key, returning
/// a clone carrying the stapled response, or `None` if stapling is
/// unavailable or not attempted.
pub trait OcspProvider: Send + Sync {
  fn staple(&self, key: &Arc<rustls::sign::CertifiedKey>) -> Option<Arc<rustls::sign::CertifiedKey>>;
}
