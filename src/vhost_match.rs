//! Hostname matching against a configured server name, including a single
//! leading wildcard label (`*.example.com`).
//!
//! Adapted from the host's own hostname matcher; the virtual-host iterator
//! a host implements for [`crate::host::VhostIterator`] is free to reuse
//! this helper or supply its own matching rules.

pub fn match_hostname(hostname: Option<&str>, req_hostname: Option<&str>) -> bool {
  if hostname.is_none() || hostname == Some("*") {
    return true;
  }

  if let (Some(hostname), Some(req_hostname)) = (hostname, req_hostname) {
    if hostname.starts_with("*.") && hostname != "*." {
      let hostnames_root = &hostname[2..];
      if req_hostname == hostnames_root
        || (req_hostname.len() > hostnames_root.len()
          && req_hostname.ends_with(&format!(".{}", hostnames_root)[..]))
      {
        return true;
      }
    } else if req_hostname == hostname {
      return true;
    }
  }

  false
}
