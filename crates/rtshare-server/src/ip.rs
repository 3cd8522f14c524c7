//! Client IP resolution.
//!
//! Candidates in priority order: first entry of `X-Forwarded-For`, then
//! `X-Real-IP`, then the transport remote address. The first candidate that
//! normalizes to an address wins. Normalizing strips a port and IPv6
//! brackets; anything left that is not an IP literal is treated as a hostname
//! and resolved through DNS.

use std::net::{IpAddr, SocketAddr};

use crate::connection::PeerInfo;

/// Resolve the client IP for a connection.
///
/// Falls back to the transport address, so this never fails.
pub async fn resolve_remote_ip(peer: &PeerInfo) -> String {
    let forwarded = peer
        .forwarded_for
        .as_deref()
        .and_then(|v| v.split(',').next())
        .map(str::trim);
    let real_ip = peer.real_ip.as_deref().map(str::trim);

    for candidate in [forwarded, real_ip].into_iter().flatten() {
        if candidate.is_empty() {
            continue;
        }
        if let Some(ip) = normalize(candidate).await {
            return ip.to_string();
        }
        tracing::debug!(candidate, "unresolvable forwarded address, skipping");
    }

    peer.remote_addr.ip().to_string()
}

/// Parse an IP literal, tolerating a port and IPv6 brackets.
pub fn parse_ip(raw: &str) -> Option<IpAddr> {
    let raw = raw.trim();

    if let Ok(ip) = raw.parse::<IpAddr>() {
        return Some(ip);
    }
    if let Ok(addr) = raw.parse::<SocketAddr>() {
        return Some(addr.ip());
    }

    let host = strip_port(raw);
    host.trim_start_matches('[').trim_end_matches(']').parse().ok()
}

async fn normalize(candidate: &str) -> Option<IpAddr> {
    if let Some(ip) = parse_ip(candidate) {
        return Some(ip);
    }

    let host = strip_port(candidate);
    if host.is_empty() {
        return None;
    }

    match tokio::net::lookup_host((host, 0)).await {
        Ok(mut addrs) => addrs.next().map(|a| a.ip()),
        Err(e) => {
            tracing::debug!(host, error = %e, "DNS lookup failed");
            None
        },
    }
}

/// Drop a trailing `:port` unless the colon belongs to a bare IPv6 address.
fn strip_port(raw: &str) -> &str {
    if let Some(rest) = raw.strip_prefix('[') {
        return rest.split(']').next().unwrap_or(rest);
    }
    match raw.rsplit_once(':') {
        Some((host, port)) if !host.contains(':') && port.parse::<u16>().is_ok() => host,
        _ => raw,
    }
}
