//! Protocol Profile (C2): the set of TLS protocol versions and cipher
//! suites the underlying crypto provider supports, exposed with stable
//! 16-bit IDs so directives can reference them without depending on
//! `rustls` enum layouts directly.

use std::collections::HashMap;
use std::sync::Arc;

use rustls::crypto::CryptoProvider;
use rustls::version::{TLS12, TLS13};
use rustls::{CipherSuite, SupportedCipherSuite, SupportedProtocolVersion};

/// Wire value of TLS 1.2, per RFC 5246.
pub const TLS1_2: u16 = 0x0303;
/// Wire value of TLS 1.3, per RFC 8446.
pub const TLS1_3: u16 = 0x0304;

pub struct ProtocolProfile {
  versions: Vec<(u16, &'static str, &'static SupportedProtocolVersion)>,
  cipher_suites: Vec<SupportedCipherSuite>,
  cipher_names: HashMap<u16, String>,
}

impl ProtocolProfile {
  /// Built once from the process's crypto provider, in the library's
  /// default preference order (TLS 1.3 before TLS 1.2; cipher suites in
  /// `provider.cipher_suites` order).
  pub fn new(provider: &Arc<CryptoProvider>) -> Self {
    let cipher_suites = provider.cipher_suites.clone();
    let cipher_names = cipher_suites
      .iter()
      .map(|cs| (u16::from(cs.suite()), format!("{:?}", cs.suite())))
      .collect();
    Self {
      versions: vec![(TLS1_3, "TLSv1.3", &TLS13), (TLS1_2, "TLSv1.2", &TLS12)],
      cipher_suites,
      cipher_names,
    }
  }

  pub fn supported_version_ids(&self) -> Vec<u16> {
    self.versions.iter().map(|(id, ..)| *id).collect()
  }

  pub fn version_name(&self, id: u16) -> Option<&'static str> {
    self.versions.iter().find(|(v, ..)| *v == id).map(|(_, n, _)| *n)
  }

  /// Versions at or above `min`, in library preference order. `min == 0`
  /// means "library default", i.e. no filtering.
  pub fn versions_at_least(&self, min: u16) -> Vec<&'static SupportedProtocolVersion> {
    self
      .versions
      .iter()
      .filter(|(id, ..)| min == 0 || *id >= min)
      .map(|(_, _, v)| *v)
      .collect()
  }

  /// Lowest numeric version ID selected by `versions_at_least(min)`, used
  /// to detect whether the assembler had to widen the floor above what was
  /// configured.
  pub fn lowest_selected_version(&self, min: u16) -> Option<u16> {
    self
      .versions
      .iter()
      .filter(|(id, ..)| min == 0 || *id >= min)
      .map(|(id, ..)| *id)
      .min()
  }

  pub fn supported_cipher_ids(&self) -> Vec<u16> {
    self.cipher_suites.iter().map(|cs| u16::from(cs.suite())).collect()
  }

  pub fn cipher_id_known(&self, id: u16) -> bool {
    self.cipher_names.contains_key(&id)
  }

  pub fn cipher_name(&self, id: u16) -> Option<&str> {
    self.cipher_names.get(&id).map(|s| s.as_str())
  }

  pub fn rustls_suite(&self, id: u16) -> Option<SupportedCipherSuite> {
    self
      .cipher_suites
      .iter()
      .copied()
      .find(|cs| u16::from(cs.suite()) == id)
  }

  pub fn cipher_suites(&self) -> &[SupportedCipherSuite] {
    &self.cipher_suites
  }
}

pub fn cipher_id(suite: CipherSuite) -> u16 {
  u16::from(suite)
}

#[cfg(test)]
mod tests {
  use super::*;

  fn profile() -> ProtocolProfile {
    ProtocolProfile::new(&Arc::new(rustls::crypto::aws_lc_rs::default_provider()))
  }

  #[test]
  fn min_zero_returns_every_supported_version() {
    let profile = profile();
    assert_eq!(profile.versions_at_least(0).len(), profile.supported_version_ids().len());
  }

  #[test]
  fn versions_at_least_preserves_library_preference_order() {
    let profile = profile();
    let ids: Vec<u16> = profile.versions_at_least(TLS1_2).iter().map(|v| {
      if std::ptr::eq(*v, &TLS13) { TLS1_3 } else { TLS1_2 }
    }).collect();
    assert_eq!(ids, vec![TLS1_3, TLS1_2]);
  }

  #[test]
  fn min_above_every_supported_version_yields_empty_list() {
    let profile = profile();
    assert!(profile.versions_at_least(0x0305).is_empty());
  }

  #[test]
  fn unknown_cipher_id_is_reported_as_unknown() {
    let profile = profile();
    assert!(!profile.cipher_id_known(0xffff));
  }
}
