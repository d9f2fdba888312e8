use std::ops::Range;

use etherparse::{Ethernet2Header, LinkSlice, NetSlice, SlicedPacket, TransportSlice};

use super::{Layer, LinkKind, Protocol};

struct Flat {
    protocol: Protocol,
    header: String,
    span: Range<usize>,
}

/// Decode the layer chain of `data`, outermost first.
pub(super) fn decode_layers(link: LinkKind, data: &[u8]) -> Option<Layer> {
    if data.is_empty() {
        return None;
    }
    let flat = match slice(link, data) {
        Some(sliced) => flatten(data, &sliced),
        None => Vec::new(),
    };
    if flat.is_empty() {
        return Some(Layer {
            protocol: Protocol::Opaque,
            header: format!("{} bytes", data.len()),
            span: 0..data.len(),
            inner: None,
        });
    }
    nest(flat)
}

fn slice(link: LinkKind, data: &[u8]) -> Option<SlicedPacket<'_>> {
    let sliced = match link {
        LinkKind::Ethernet => SlicedPacket::from_ethernet(data),
        LinkKind::RawIp => SlicedPacket::from_ip(data),
        LinkKind::Other(_) => return None,
    };
    match sliced {
        Ok(sliced) => Some(sliced),
        Err(err) => {
            log::trace!("frame of {} bytes kept opaque: {}", data.len(), err);
            None
        }
    }
}

fn flatten(data: &[u8], sliced: &SlicedPacket<'_>) -> Vec<Flat> {
    let mut flat = Vec::new();

    if let Some(link) = &sliced.link {
        let header = match link {
            LinkSlice::Ethernet2(eth) => format!(
                "{} -> {} type {:#06x}",
                mac(&eth.source()),
                mac(&eth.destination()),
                eth.ether_type().0
            ),
            _ => "link".to_string(),
        };
        flat.push(Flat {
            protocol: Protocol::Ethernet,
            header,
            span: 0..data.len(),
        });
    }

    let Some(net) = &sliced.net else {
        if !flat.is_empty() && data.len() > Ethernet2Header::LEN {
            flat.push(Flat {
                protocol: Protocol::Payload,
                header: format!("{} bytes", data.len() - Ethernet2Header::LEN),
                span: Ethernet2Header::LEN..data.len(),
            });
        }
        return flat;
    };

    let (protocol, header, header_bytes) = match net {
        NetSlice::Ipv4(ipv4) => (
            Protocol::Ipv4,
            format!(
                "{} -> {}",
                ipv4.header().source_addr(),
                ipv4.header().destination_addr()
            ),
            ipv4.header().slice(),
        ),
        NetSlice::Ipv6(ipv6) => (
            Protocol::Ipv6,
            format!(
                "{} -> {}",
                ipv6.header().source_addr(),
                ipv6.header().destination_addr()
            ),
            ipv6.header().slice(),
        ),
    };
    let Some(ip_payload) = net.ip_payload_ref() else {
        return flat;
    };
    let (Some(header_span), Some(payload_span)) = (
        span_of(data, header_bytes),
        span_of(data, ip_payload.payload),
    ) else {
        return flat;
    };
    flat.push(Flat {
        protocol,
        header,
        span: header_span.start..payload_span.end,
    });

    let (protocol, header, inner) = match &sliced.transport {
        Some(TransportSlice::Udp(udp)) => (
            Protocol::Udp,
            format!("{} -> {}", udp.source_port(), udp.destination_port()),
            Some(udp.payload()),
        ),
        Some(TransportSlice::Tcp(tcp)) => (
            Protocol::Tcp,
            format!("{} -> {}", tcp.source_port(), tcp.destination_port()),
            Some(tcp.payload()),
        ),
        _ if !ip_payload.payload.is_empty() => (
            Protocol::Transport,
            format!("ip protocol {}", ip_payload.ip_number.0),
            None,
        ),
        _ => return flat,
    };
    flat.push(Flat {
        protocol,
        header,
        span: payload_span,
    });

    if let Some(payload) = inner.filter(|payload| !payload.is_empty()) {
        if let Some(span) = span_of(data, payload) {
            flat.push(Flat {
                protocol: Protocol::Payload,
                header: format!("{} bytes", payload.len()),
                span,
            });
        }
    }
    flat
}

fn nest(flat: Vec<Flat>) -> Option<Layer> {
    flat.into_iter().rev().fold(None, |inner, part| {
        Some(Layer {
            protocol: part.protocol,
            header: part.header,
            span: part.span,
            inner: inner.map(Box::new),
        })
    })
}

/// Position of `part` within `frame`, when `part` is a sub-slice of it.
fn span_of(frame: &[u8], part: &[u8]) -> Option<Range<usize>> {
    let base = frame.as_ptr() as usize;
    let start = (part.as_ptr() as usize).checked_sub(base)?;
    let end = start.checked_add(part.len())?;
    (end <= frame.len()).then_some(start..end)
}

fn mac(bytes: &[u8; 6]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(":")
}
