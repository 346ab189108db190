use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use thiserror::Error;

/// A host name that did not resolve to any usable address.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("could not resolve {host}:{port}: {reason}")]
pub struct ResolveError {
    pub host: String,
    pub port: u16,
    pub reason: String,
}

/// Resolve `host:port` to the first address the system resolver returns.
pub async fn resolve(host: &str, port: u16) -> Result<SocketAddr, ResolveError> {
    let fail = |reason: String| ResolveError {
        host: host.to_string(),
        port,
        reason,
    };
    let mut addrs = tokio::net::lookup_host((host, port))
        .await
        .map_err(|e| fail(e.to_string()))?;
    addrs
        .next()
        .ok_or_else(|| fail("no addresses found".to_string()))
}

/// Wildcard address with an OS-chosen port in the same family as `target`.
pub fn unspecified_for(target: &SocketAddr) -> SocketAddr {
    let ip = match target {
        SocketAddr::V4(_) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        SocketAddr::V6(_) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
    };
    SocketAddr::new(ip, 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn resolves_numeric_address() {
        let addr = resolve("127.0.0.1", 9000).await.unwrap();
        assert_eq!(addr, "127.0.0.1:9000".parse::<SocketAddr>().unwrap());
    }

    #[tokio::test]
    async fn unresolvable_host_is_reported() {
        let err = resolve("definitely-not-a-host.invalid", 1).await.unwrap_err();
        assert_eq!(err.port, 1);
        assert_eq!(err.host, "definitely-not-a-host.invalid");
    }

    #[test]
    fn unspecified_matches_family() {
        let v4: SocketAddr = "10.0.0.1:5".parse().unwrap();
        let v6: SocketAddr = "[::1]:5".parse().unwrap();
        assert_eq!(unspecified_for(&v4), "0.0.0.0:0".parse::<SocketAddr>().unwrap());
        assert_eq!(unspecified_for(&v6), "[::]:0".parse::<SocketAddr>().unwrap());
    }
}
