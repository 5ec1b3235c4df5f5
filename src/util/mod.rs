use std::net::{IpAddr, SocketAddr};

use systemstat::{Platform, System};
use tracing::debug;

/// Pick an IPv4 address other machines on the network can reach us on.
///
/// Iterates over all network interfaces provided by `systemstat`, skipping any
/// loopback, link-local or broadcast addresses.
///
/// ## Returns
///
/// * `Some(IpAddr)`: The first routable network interface.
/// * `None`: The interfaces could not be listed or none is routable.
pub fn select_host_address() -> Option<IpAddr> {
    let networks = match System::new().networks() {
        Ok(networks) => networks,
        Err(e) => {
            debug!("Listing network interfaces failed: {}", e);
            return None;
        }
    };

    networks
        .values()
        .flat_map(|net| net.addrs.iter())
        .find_map(|n| match n.addr {
            systemstat::IpAddr::V4(v)
                if !v.is_loopback() && !v.is_link_local() && !v.is_broadcast() =>
            {
                Some(IpAddr::V4(v))
            }
            _ => None,
        })
}

/// The address to advertise for a listener bound to `bound`.
///
/// A wildcard bind is replaced by the host's routable address when there is
/// one.
pub fn advertised_addr(bound: SocketAddr, host: Option<IpAddr>) -> SocketAddr {
    match host {
        Some(ip) if bound.ip().is_unspecified() => SocketAddr::new(ip, bound.port()),
        _ => bound,
    }
}
