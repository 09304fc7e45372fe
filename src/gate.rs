//! Request Gate (C6): per-request admission checks. Never aborts the
//! connection — only maps to an HTTP status or declines (lets the request
//! proceed).

use crate::config::VhostConfig;
use crate::connection::ConnectionState;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GateDecision {
  Decline,
  ServiceUnavailable,
  SniRequired,
  MisdirectedRequest,
}

/// §4.8: evaluated in order. `vhosts_need_sni` tells whether the host has
/// more than one name-based vhost configured on this listener, i.e.
/// whether an SNI-less connection is genuinely ambiguous.
pub fn request_check(cc: &ConnectionState, requested_vhost: &VhostConfig, vhosts_need_sni: bool) -> GateDecision {
  if !cc.is_enabled() {
    return GateDecision::Decline;
  }
  if cc.service_unavailable {
    return GateDecision::ServiceUnavailable;
  }
  if cc.sni_hostname.is_none() && vhosts_need_sni {
    return GateDecision::SniRequired;
  }
  if !is_compatible(&cc.server, requested_vhost, cc.tls_protocol_id, cc.tls_cipher_id) {
    return GateDecision::MisdirectedRequest;
  }
  GateDecision::Decline
}

/// The connection-reuse compatibility rule (§4.8). Certificate differences
/// are never a reason to reject — only protocol-floor and suppressed-cipher
/// mismatches are.
pub fn is_compatible(
  connection_vhost: &VhostConfig,
  requested_vhost: &VhostConfig,
  negotiated_protocol: Option<u16>,
  negotiated_cipher: Option<u16>,
) -> bool {
  if std::ptr::eq(connection_vhost, requested_vhost) || connection_vhost.name == requested_vhost.name {
    return true;
  }
  let protocol_ok = requested_vhost.tls_protocol_min == 0
    || negotiated_protocol.is_some_and(|id| id >= requested_vhost.tls_protocol_min);
  let cipher_ok = negotiated_cipher.map_or(true, |id| !requested_vhost.supp_ciphers.contains(&id));
  protocol_ok && cipher_ok
}
