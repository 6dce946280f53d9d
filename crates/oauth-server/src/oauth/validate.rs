//! URI validators for client metadata and authorization requests

use std::net::IpAddr;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use url::{Host, Url};

use crate::resolver::HostResolver;

const PNG_SIGNATURE: &[u8] = b"\x89PNG\r\n\x1a\n";
const LOGO_PREFIX: &str = "data:image/png;base64,";

/// Checks a redirect URI.
///
/// - `https` needs a host
/// - `http` is only allowed with a loopback IP address
/// - any other scheme is accepted, for native apps (`net.myapp:callback`)
pub fn is_valid_redirect_uri(value: &str) -> bool {
    let Ok(url) = Url::parse(value) else {
        return false;
    };

    match url.scheme() {
        "https" => url.host_str().is_some_and(|h| !h.is_empty()),
        "http" => match url.host() {
            Some(Host::Ipv4(ip)) => ip.is_loopback(),
            Some(Host::Ipv6(ip)) => ip.is_loopback(),
            _ => false,
        },
        _ => true,
    }
}

/// Checks a client URI: https only, and every address the host resolves to
/// must be public.
pub async fn is_valid_client_uri(value: &str, resolver: &dyn HostResolver) -> bool {
    let Ok(url) = Url::parse(value) else {
        return false;
    };
    if url.scheme() != "https" {
        return false;
    }

    // The url crate already applies IDNA to domains
    let ips = match url.host() {
        Some(Host::Ipv4(ip)) => vec![IpAddr::V4(ip)],
        Some(Host::Ipv6(ip)) => vec![IpAddr::V6(ip)],
        Some(Host::Domain(domain)) if !domain.is_empty() => {
            match resolver.lookup(domain).await {
                Ok(ips) => ips,
                Err(err) => {
                    tracing::debug!("Cannot resolve client URI host {}: {}", domain, err);
                    return false;
                }
            }
        }
        _ => return false,
    };

    !ips.is_empty() && ips.iter().all(|ip| is_public_ip(*ip))
}

fn is_public_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(ip) => {
            !(ip.is_loopback() || ip.is_private() || ip.is_link_local() || ip.is_unspecified())
        }
        IpAddr::V6(ip) => {
            if let Some(v4) = ip.to_ipv4_mapped() {
                return is_public_ip(IpAddr::V4(v4));
            }
            let unique_local = (ip.segments()[0] & 0xfe00) == 0xfc00;
            let link_local = (ip.segments()[0] & 0xffc0) == 0xfe80;
            !(ip.is_loopback() || ip.is_unspecified() || unique_local || link_local)
        }
    }
}

/// Checks a logo URI: empty, or an inline PNG data URI.
pub fn is_valid_logo_uri(value: &str) -> bool {
    if value.is_empty() {
        return true;
    }
    let Some(data) = value.strip_prefix(LOGO_PREFIX) else {
        return false;
    };
    let Ok(image) = STANDARD.decode(data.trim()) else {
        return false;
    };

    is_png_header(&image)
}

/// Validates the PNG signature and the IHDR chunk that must follow it.
fn is_png_header(data: &[u8]) -> bool {
    // signature, IHDR length, "IHDR", 13 bytes of header
    if data.len() < 8 + 4 + 4 + 13 || !data.starts_with(PNG_SIGNATURE) {
        return false;
    }

    let chunk = &data[8..];
    let length = u32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
    if length != 13 || &chunk[4..8] != b"IHDR" {
        return false;
    }

    let header = &chunk[8..21];
    let width = u32::from_be_bytes([header[0], header[1], header[2], header[3]]);
    let height = u32::from_be_bytes([header[4], header[5], header[6], header[7]]);
    let bit_depth = header[8];
    let color_type = header[9];

    let depth_ok = match color_type {
        0 => matches!(bit_depth, 1 | 2 | 4 | 8 | 16),
        3 => matches!(bit_depth, 1 | 2 | 4 | 8),
        2 | 4 | 6 => matches!(bit_depth, 8 | 16),
        _ => false,
    };

    width > 0 && height > 0 && depth_ok
}
