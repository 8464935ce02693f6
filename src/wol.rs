//! Wake-on-LAN magic-packet sender.

use crate::models::Host;
use anyhow::{bail, Context, Result};
use std::net::{Ipv4Addr, SocketAddrV4, UdpSocket};
use tracing::{debug, warn};

fn parse_mac(mac: &str) -> Result<[u8; 6]> {
    // Separator-agnostic: "aa:bb:..", "aa-bb-..", bare hex all accepted.
    let hex: String = mac.chars().filter(|c| c.is_ascii_hexdigit()).collect();
    if hex.len() != 12 {
        bail!("invalid MAC address: {mac}");
    }
    let mut out = [0u8; 6];
    for (i, byte) in out.iter_mut().enumerate() {
        *byte = u8::from_str_radix(&hex[i * 2..i * 2 + 2], 16)
            .with_context(|| format!("invalid MAC address: {mac}"))?;
    }
    Ok(out)
}

/// 6 x 0xFF followed by 16 repetitions of the MAC.
fn magic_packet(mac: [u8; 6]) -> [u8; 102] {
    let mut pkt = [0u8; 102];
    pkt[..6].fill(0xFF);
    for i in 0..16 {
        let base = 6 + i * 6;
        pkt[base..base + 6].copy_from_slice(&mac);
    }
    pkt
}

fn parse_broadcast(hint: Option<&str>) -> Ipv4Addr {
    hint.and_then(|s| s.parse::<Ipv4Addr>().ok())
        .unwrap_or(Ipv4Addr::new(255, 255, 255, 255))
}

/// Sends the magic packet for `host` over UDP broadcast, ports 9 and 7,
/// plus unicast to the host address. Succeeds if at least one send went
/// out; requires a MAC on the host record.
pub fn send_wake(host: &Host, broadcast_hint: Option<&str>) -> Result<()> {
    let Some(mac_str) = host.mac.as_deref() else {
        bail!("no MAC address available for host {}", host.name);
    };
    let mac = parse_mac(mac_str)?;
    let pkt = magic_packet(mac);
    let bcast = parse_broadcast(broadcast_hint);

    let sock = UdpSocket::bind(("0.0.0.0", 0)).context("binding WOL socket")?;
    sock.set_broadcast(true).context("enabling broadcast")?;

    let mut sent = false;
    let mut last_err = None;
    for port in [9u16, 7u16] {
        let addr = SocketAddrV4::new(bcast, port);
        match sock.send_to(&pkt, addr) {
            Ok(_) => sent = true,
            Err(e) => {
                warn!("WOL send to {addr} failed: {e}");
                last_err = Some(e);
            }
        }
        // Some NICs ignore broadcast frames; unicast as well when the
        // host address parses as IPv4.
        if let Ok(ip) = host.address.parse::<Ipv4Addr>() {
            if sock.send_to(&pkt, SocketAddrV4::new(ip, port)).is_ok() {
                sent = true;
            }
        }
    }

    if sent {
        debug!("WOL packet sent for {} ({mac_str})", host.name);
        Ok(())
    } else {
        match last_err {
            Some(e) => Err(e).context("WOL send failed"),
            None => bail!("WOL send failed"),
        }
    }
}
