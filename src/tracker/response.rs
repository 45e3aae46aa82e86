//! Decodes a tracker's bencoded announce response.
//!
//! The `peers` value comes in two shapes: a single binary string packing
//! 6 bytes per peer (compact model), or a list of dictionaries each with an
//! `ip` and a `port` key. Both are in active use by real trackers. The
//! compact model's bytes are not valid UTF-8 in general, which trips up
//! generic bencode decoders that assume string values are text; rather than
//! decode the whole response generically and risk that, the `peers` value is
//! located and extracted by a direct byte scan.

use crate::error::TrackerError;
use crate::peer::state::PeerAddr;
use serde_bencode::value::Value;

const PEERS_PART_HEADER: &[u8] = b"5:peers";
const DICT_MODEL_IDENTIFIER: &[u8] = b"5:peersld2:ip";
const PEER_SIZE: usize = 6;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackerResponse {
    pub interval: Option<i64>,
    pub peers: Vec<PeerAddr>,
}

/// Decodes a full tracker announce response body.
pub fn decode(bytes: &[u8]) -> Result<TrackerResponse, TrackerError> {
    if find_subslice(bytes, DICT_MODEL_IDENTIFIER).is_some() {
        decode_dictionary_model(bytes)
    } else {
        decode_binary_model(bytes)
    }
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn decode_binary_model(bytes: &[u8]) -> Result<TrackerResponse, TrackerError> {
    let header_pos =
        find_subslice(bytes, PEERS_PART_HEADER).ok_or(TrackerError::MissingPeersKey)?;

    let mut cursor = header_pos + PEERS_PART_HEADER.len();
    let mut peers_byte_count: usize = 0;
    while cursor < bytes.len() && bytes[cursor].is_ascii_digit() {
        peers_byte_count = peers_byte_count * 10 + (bytes[cursor] - b'0') as usize;
        cursor += 1;
    }
    if cursor >= bytes.len() || bytes[cursor] != b':' {
        return Err(TrackerError::MissingPeersKey);
    }
    cursor += 1; // skip ':'

    if peers_byte_count % PEER_SIZE != 0 {
        return Err(TrackerError::InvalidCompactPeerListLength(peers_byte_count));
    }
    let peers_part_end = cursor + peers_byte_count;
    if peers_part_end > bytes.len() {
        return Err(TrackerError::InvalidCompactPeerListLength(peers_byte_count));
    }

    let mut peers = Vec::with_capacity(peers_byte_count / PEER_SIZE);
    let mut i = cursor;
    while i + PEER_SIZE <= peers_part_end {
        let ip = u32::from_be_bytes([bytes[i], bytes[i + 1], bytes[i + 2], bytes[i + 3]]);
        let port = u16::from_be_bytes([bytes[i + 4], bytes[i + 5]]);
        peers.push(PeerAddr::new(ip, port));
        i += PEER_SIZE;
    }

    // reassemble the response without the "5:peers<n>:<raw bytes>" span so
    // the rest (interval, tracker id, ...) can still be bdecoded normally.
    // the exact span is known here, so this works regardless of where
    // `peers` falls among the dict's keys.
    let mut remainder = Vec::with_capacity(bytes.len() - (peers_part_end - header_pos));
    remainder.extend_from_slice(&bytes[..header_pos]);
    remainder.extend_from_slice(&bytes[peers_part_end..]);

    let interval = extract_interval(&remainder);
    Ok(TrackerResponse { interval, peers })
}

fn decode_dictionary_model(bytes: &[u8]) -> Result<TrackerResponse, TrackerError> {
    let value: Value = serde_bencode::from_bytes(bytes).map_err(TrackerError::Bencode)?;
    let dict = match value {
        Value::Dict(d) => d,
        _ => return Err(TrackerError::MissingPeersKey),
    };

    let interval = dict.get(b"interval".as_slice()).and_then(as_int);

    let peer_list = match dict.get(b"peers".as_slice()) {
        Some(Value::List(items)) => items,
        _ => return Err(TrackerError::MissingPeersKey),
    };

    let mut peers = Vec::with_capacity(peer_list.len());
    for item in peer_list {
        let peer_dict = match item {
            Value::Dict(d) => d,
            _ => continue,
        };
        let ip = match peer_dict.get(b"ip".as_slice()) {
            Some(Value::Bytes(raw)) => parse_ipv4(raw)?,
            _ => continue,
        };
        let port = match peer_dict.get(b"port".as_slice()).and_then(as_int) {
            Some(p) => p as u16,
            None => continue,
        };
        peers.push(PeerAddr::new(ip, port));
    }

    Ok(TrackerResponse { interval, peers })
}

fn as_int(value: &Value) -> Option<i64> {
    match value {
        Value::Int(i) => Some(*i),
        _ => None,
    }
}

fn parse_ipv4(raw: &[u8]) -> Result<u32, TrackerError> {
    let s = std::str::from_utf8(raw).map_err(|_| TrackerError::InvalidPeerAddress)?;
    let addr: std::net::Ipv4Addr =
        s.parse().map_err(|_| TrackerError::InvalidPeerAddress)?;
    Ok(u32::from(addr))
}

fn extract_interval(remainder: &[u8]) -> Option<i64> {
    let value: Value = serde_bencode::from_bytes(remainder).ok()?;
    match value {
        Value::Dict(d) => d.get(b"interval".as_slice()).and_then(as_int),
        _ => None,
    }
}

/// Helper available to tests (and anyone hand-building a compact-model
/// fixture) for the inverse of the binary-model decode.
#[cfg(test)]
fn encode_compact_peer_list(peers: &[PeerAddr]) -> Vec<u8> {
    let mut body = Vec::with_capacity(peers.len() * PEER_SIZE);
    for peer in peers {
        body.extend_from_slice(&peer.ip.to_be_bytes());
        body.extend_from_slice(&peer.port.to_be_bytes());
    }
    body
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wrap_compact_response(interval: i64, peer_bytes: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(b"d8:intervali");
        out.extend_from_slice(interval.to_string().as_bytes());
        out.extend_from_slice(b"e5:peers");
        out.extend_from_slice(peer_bytes.len().to_string().as_bytes());
        out.push(b':');
        out.extend_from_slice(peer_bytes);
        out.push(b'e');
        out
    }

    #[test]
    fn test_compact_model_round_trip_for_n_peers() {
        for &n in &[0usize, 1, 6, 1000] {
            let peers: Vec<PeerAddr> = (0..n)
                .map(|i| PeerAddr::new(0x0A000000 + i as u32, 1000 + i as u16))
                .collect();
            let peer_bytes = encode_compact_peer_list(&peers);
            let response = wrap_compact_response(1800, &peer_bytes);
            let decoded = decode(&response).unwrap();
            assert_eq!(decoded.peers, peers);
            assert_eq!(decoded.interval, Some(1800));
        }
    }

    #[test]
    fn test_compact_model_two_named_peers() {
        let peers = vec![
            PeerAddr::new(u32::from(std::net::Ipv4Addr::new(10, 0, 0, 1)), 6881),
            PeerAddr::new(u32::from(std::net::Ipv4Addr::new(192, 168, 1, 2)), 51413),
        ];
        let peer_bytes = encode_compact_peer_list(&peers);
        let response = wrap_compact_response(900, &peer_bytes);
        let decoded = decode(&response).unwrap();
        assert_eq!(decoded.peers, peers);
    }

    #[test]
    fn test_compact_model_rejects_non_multiple_of_six() {
        let mut response = wrap_compact_response(900, &[1, 2, 3, 4, 5, 6]);
        // corrupt the declared byte count to something not a multiple of 6
        let corrupted: Vec<u8> = String::from_utf8(response.clone())
            .map(|s| s.replacen("5:peers6:", "5:peers7:", 1))
            .map(|s| s.into_bytes())
            .unwrap_or_else(|_| {
                response.truncate(0);
                response.clone()
            });
        assert!(matches!(
            decode(&corrupted),
            Err(TrackerError::InvalidCompactPeerListLength(7))
        ));
    }

    #[test]
    fn test_dictionary_model_same_logical_peers_as_compact() {
        let dict_response = b"d8:intervali900e5:peersld2:ip9:10.0.0.14:porti6881eed2:ip13:192.168.1.24:porti51413eeee";
        let decoded = decode(dict_response).unwrap();
        let expected = vec![
            PeerAddr::new(u32::from(std::net::Ipv4Addr::new(10, 0, 0, 1)), 6881),
            PeerAddr::new(u32::from(std::net::Ipv4Addr::new(192, 168, 1, 2)), 51413),
        ];
        assert_eq!(decoded.peers, expected);
        assert_eq!(decoded.interval, Some(900));
    }

    #[test]
    fn test_missing_peers_key_is_an_error() {
        let response = b"d8:intervali900ee";
        assert!(matches!(
            decode(response),
            Err(TrackerError::MissingPeersKey)
        ));
    }
}
