use std::net::IpAddr;

use pnet_datalink::{MacAddr, NetworkInterface};
use tracing::{debug, info};

/// Name fragments of virtualization and tunnel adapters that must never be
/// picked as the ingest endpoint.
const VIRTUAL_ADAPTER_MARKERS: &[&str] = &[
    "vmnet", "vbox", "virbr", "virtual", "docker", "veth", "br-", "bridge", "tun", "tap", "utun",
    "hyper-v", "wsl", "zt", "tailscale",
];

/// Picks the RTMP ingest endpoint for this host.
///
/// The first active, non-loopback interface with a real (non-zero) hardware
/// address, an IPv4 address and a non-virtual name wins. The choice is made
/// once per session and is immutable afterwards.
pub fn resolve_endpoint(port: u16, app: &str) -> Option<String> {
    resolve_from(pnet_datalink::interfaces(), port, app)
}

fn resolve_from(interfaces: Vec<NetworkInterface>, port: u16, app: &str) -> Option<String> {
    for iface in interfaces {
        if !iface.is_up() || iface.is_loopback() {
            continue;
        }
        match iface.mac {
            Some(mac) if mac != MacAddr::zero() => {}
            _ => {
                debug!(name = %iface.name, "skipping interface without hardware address");
                continue;
            }
        }
        if is_virtual_adapter(&iface.name) {
            debug!(name = %iface.name, "skipping virtualization adapter");
            continue;
        }
        let Some(addr) = first_ipv4(&iface) else {
            continue;
        };

        let url = format!("rtmp://{addr}:{port}/live/{app}");
        info!(name = %iface.name, %addr, %url, "resolved ingest endpoint");
        return Some(url);
    }

    info!("no qualifying network interface, ingest endpoint not ready");
    None
}

fn first_ipv4(iface: &NetworkInterface) -> Option<IpAddr> {
    iface
        .ips
        .iter()
        .map(|network| network.ip())
        .find(|ip| ip.is_ipv4())
}

fn is_virtual_adapter(name: &str) -> bool {
    let lowered = name.to_ascii_lowercase();
    VIRTUAL_ADAPTER_MARKERS
        .iter()
        .any(|marker| lowered.contains(marker))
}
