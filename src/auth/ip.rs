//! Canonical IP handling for token pinning.
//!
//! Every stored or compared address uses the 16-byte form: IPv4 addresses
//! become IPv4-mapped IPv6, so `192.0.2.1` and `::ffff:192.0.2.1` compare
//! equal regardless of how the client spelled them.

use std::net::IpAddr;

use crate::infra::{GatewayError, Result};

/// Canonicalizes one IP address to its 16-byte string form.
pub fn canonicalize_ip(ip: &str) -> Result<String> {
    let parsed: IpAddr = ip
        .trim()
        .parse()
        .map_err(|_| GatewayError::IpInvalid(ip.to_string()))?;

    let v6 = match parsed {
        IpAddr::V4(v4) => v4.to_ipv6_mapped(),
        IpAddr::V6(v6) => v6,
    };
    Ok(v6.to_string())
}

/// Canonicalizes a list, failing on the first invalid entry.
pub fn canonicalize_ips(ips: &[String]) -> Result<Vec<String>> {
    ips.iter().map(|ip| canonicalize_ip(ip)).collect()
}

/// Allow-list check over canonical forms. An empty list permits any IP.
pub fn is_ip_allowed(ip: &str, allowed: &[String]) -> bool {
    allowed.is_empty() || allowed.iter().any(|a| a == ip)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ipv4_maps_into_ipv6() {
        assert_eq!(canonicalize_ip("192.0.2.1").unwrap(), "::ffff:192.0.2.1");
        assert_eq!(canonicalize_ip("127.0.0.1").unwrap(), "::ffff:127.0.0.1");
    }

    #[test]
    fn equivalent_spellings_canonicalize_equal() {
        let dotted = canonicalize_ip("192.0.2.1").unwrap();
        let mapped = canonicalize_ip("::ffff:192.0.2.1").unwrap();
        assert_eq!(dotted, mapped);

        let long = canonicalize_ip("2001:db8:0:0:0:0:0:1").unwrap();
        let short = canonicalize_ip("2001:db8::1").unwrap();
        assert_eq!(long, short);
    }

    #[test]
    fn canonicalization_is_idempotent() {
        for input in ["10.1.2.3", "2001:db8::1", "::1"] {
            let once = canonicalize_ip(input).unwrap();
            let twice = canonicalize_ip(&once).unwrap();
            assert_eq!(once, twice);
        }
    }

    #[test]
    fn invalid_addresses_are_rejected() {
        for bad in ["", "999.0.0.1", "not-an-ip", "192.0.2.1/24"] {
            assert!(matches!(
                canonicalize_ip(bad).unwrap_err(),
                GatewayError::IpInvalid(_)
            ));
        }
    }

    #[test]
    fn list_canonicalization_fails_fast() {
        let ok = canonicalize_ips(&["192.0.2.1".to_string(), "::1".to_string()]).unwrap();
        assert_eq!(ok, vec!["::ffff:192.0.2.1", "::1"]);

        assert!(canonicalize_ips(&["192.0.2.1".to_string(), "bad".to_string()]).is_err());
    }

    #[test]
    fn empty_allow_list_permits_everything() {
        assert!(is_ip_allowed("::ffff:192.0.2.1", &[]));
    }

    #[test]
    fn single_entry_allow_list_rejects_everything_else() {
        let allowed = vec![canonicalize_ip("192.0.2.1").unwrap()];
        assert!(is_ip_allowed(&canonicalize_ip("::ffff:192.0.2.1").unwrap(), &allowed));
        assert!(!is_ip_allowed(&canonicalize_ip("192.0.2.2").unwrap(), &allowed));
        assert!(!is_ip_allowed(&canonicalize_ip("2001:db8::1").unwrap(), &allowed));
    }
}
