//! Certificate Registry (C1): load-once, dedup-by-spec cache of certified
//! keys, adapted from the teacher's `load_certs`/`load_private_key` helpers
//! in `util/tls.rs`.

use std::collections::HashMap;
use std::fs::File;
use std::hash::{Hash, Hasher};
use std::io::{self, BufReader};
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use rustls::crypto::CryptoProvider;
use rustls::sign::CertifiedKey;
use rustls_pki_types::{CertificateDer, PrivateKeyDer};

use crate::error::{Result, TlsCoreError};

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum CertificateSource {
  File(PathBuf),
  Pem(Vec<u8>),
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CertificateSpec {
  pub cert: CertificateSource,
  pub key: CertificateSource,
}

impl CertificateSpec {
  pub fn new(cert: CertificateSource, key: CertificateSource) -> Self {
    Self { cert, key }
  }

  fn stable_id(&self) -> String {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    self.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
  }

  fn label(&self) -> String {
    match &self.cert {
      CertificateSource::File(p) => p.display().to_string(),
      CertificateSource::Pem(_) => "<inline pem>".to_string(),
    }
  }
}

struct LoadedKey {
  key: Arc<CertifiedKey>,
  id: String,
}

pub struct CertificateRegistry {
  provider: Arc<CryptoProvider>,
  loaded: RwLock<HashMap<CertificateSpec, LoadedKey>>,
}

impl CertificateRegistry {
  pub fn new(provider: Arc<CryptoProvider>) -> Self {
    Self {
      provider,
      loaded: RwLock::new(HashMap::new()),
    }
  }

  /// Returns the handle for `spec`, loading and signing it once. Two specs
  /// with equal sources always return the same `Arc`.
  pub fn get_or_load(&self, spec: &CertificateSpec) -> Result<Arc<CertifiedKey>> {
    if let Some(loaded) = self.loaded.read().unwrap().get(spec) {
      return Ok(loaded.key.clone());
    }
    let mut guard = self.loaded.write().unwrap();
    if let Some(loaded) = guard.get(spec) {
      return Ok(loaded.key.clone());
    }

    let certs = load_certs(&spec.cert).map_err(|source| TlsCoreError::CertLoad {
      spec: spec.label(),
      source,
    })?;
    let key_der = load_private_key(&spec.key).map_err(|source| TlsCoreError::CertLoad {
      spec: spec.label(),
      source,
    })?;
    let signing_key = self
      .provider
      .key_provider
      .load_private_key(key_der)
      .map_err(TlsCoreError::Rustls)?;
    let certified = Arc::new(CertifiedKey::new(certs, signing_key));
    let id = spec.stable_id();
    guard.insert(
      spec.clone(),
      LoadedKey {
        key: certified.clone(),
        id,
      },
    );
    Ok(certified)
  }

  /// Reverse lookup for logging: the registry-assigned stable ID for an
  /// already-loaded key, by object identity.
  pub fn id_of(&self, key: &Arc<CertifiedKey>) -> Option<String> {
    self
      .loaded
      .read()
      .unwrap()
      .values()
      .find(|l| Arc::ptr_eq(&l.key, key))
      .map(|l| l.id.clone())
  }

  pub fn clear(&self) {
    self.loaded.write().unwrap().clear();
  }
}

fn load_certs(source: &CertificateSource) -> io::Result<Vec<CertificateDer<'static>>> {
  match source {
    CertificateSource::File(path) => {
      let mut reader = BufReader::new(File::open(path)?);
      rustls_pemfile::certs(&mut reader).collect::<io::Result<Vec<_>>>()
    }
    CertificateSource::Pem(bytes) => {
      let mut reader = BufReader::new(bytes.as_slice());
      rustls_pemfile::certs(&mut reader).collect::<io::Result<Vec<_>>>()
    }
  }
}

/// Loads a CA bundle for client-certificate verification. Unlike
/// `get_or_load`, this is not deduplicated through the registry: CA bundles
/// are read once per vhost at post-config and handed straight to a
/// `RootCertStore`, which has no notion of a shared handle to cache.
pub fn load_ca_certs(source: &CertificateSource) -> io::Result<Vec<CertificateDer<'static>>> {
  load_certs(source)
}

/// Builds a certified key that is never registered anywhere — used for the
/// ACME `tls-alpn-01` challenge path, where the key is connection-scoped and
/// thrown away once the challenge handshake completes (§9 Open Question:
/// `local_keys` are treated as purely connection-local, never indexed).
pub fn build_one_shot_key(
  provider: &Arc<CryptoProvider>,
  cert_pem: &[u8],
  key_pem: &[u8],
) -> Result<Arc<CertifiedKey>> {
  let cert_source = CertificateSource::Pem(cert_pem.to_vec());
  let key_source = CertificateSource::Pem(key_pem.to_vec());
  let certs = load_certs(&cert_source).map_err(|source| TlsCoreError::CertLoad {
    spec: "<acme challenge certificate>".to_string(),
    source,
  })?;
  let key_der = load_private_key(&key_source).map_err(|source| TlsCoreError::CertLoad {
    spec: "<acme challenge key>".to_string(),
    source,
  })?;
  let signing_key = provider
    .key_provider
    .load_private_key(key_der)
    .map_err(TlsCoreError::Rustls)?;
  Ok(Arc::new(CertifiedKey::new(certs, signing_key)))
}

fn load_private_key(source: &CertificateSource) -> io::Result<PrivateKeyDer<'static>> {
  let key = match source {
    CertificateSource::File(path) => {
      let mut reader = BufReader::new(File::open(path)?);
      rustls_pemfile::private_key(&mut reader)?
    }
    CertificateSource::Pem(bytes) => {
      let mut reader = BufReader::new(bytes.as_slice());
      rustls_pemfile::private_key(&mut reader)?
    }
  };
  key.ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "no private key found in source"))
}

#[cfg(test)]
mod tests {
  use super::*;

  fn provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::aws_lc_rs::default_provider())
  }

  fn self_signed() -> (Vec<u8>, Vec<u8>) {
    let cert = rcgen::generate_simple_self_signed(vec!["example.com".to_string()]).unwrap();
    (
      cert.cert.pem().into_bytes(),
      cert.signing_key.serialize_pem().into_bytes(),
    )
  }

  #[test]
  fn same_spec_returns_the_same_handle() {
    let (cert_pem, key_pem) = self_signed();
    let registry = CertificateRegistry::new(provider());
    let spec = CertificateSpec::new(
      CertificateSource::Pem(cert_pem),
      CertificateSource::Pem(key_pem),
    );
    let a = registry.get_or_load(&spec).unwrap();
    let b = registry.get_or_load(&spec).unwrap();
    assert!(Arc::ptr_eq(&a, &b));
  }

  #[test]
  fn distinct_specs_get_distinct_handles() {
    let (cert_pem_a, key_pem_a) = self_signed();
    let (cert_pem_b, key_pem_b) = self_signed();
    let registry = CertificateRegistry::new(provider());
    let a = registry
      .get_or_load(&CertificateSpec::new(
        CertificateSource::Pem(cert_pem_a),
        CertificateSource::Pem(key_pem_a),
      ))
      .unwrap();
    let b = registry
      .get_or_load(&CertificateSpec::new(
        CertificateSource::Pem(cert_pem_b),
        CertificateSource::Pem(key_pem_b),
      ))
      .unwrap();
    assert!(!Arc::ptr_eq(&a, &b));
  }
}
