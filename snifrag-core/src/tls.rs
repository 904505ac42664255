//! TLS 1.3 ClientHello parsing.
//!
//! The proxy never terminates TLS; it only needs to decode the very first
//! handshake message far enough to locate the SNI and confirm the client is
//! offering TLS 1.3. Input is adversarial, so every length field is checked
//! against the bytes actually present.

use crate::codec::{be16, be32};
use crate::error::{Error, Result};
use std::ops::Range;

/// TLS record content type for handshake messages
pub const CONTENT_TYPE_HANDSHAKE: u8 = 0x16;

/// Plaintext records are capped at 2^14 bytes by RFC 8446
pub const MAX_RECORD_LEN: usize = 16384;

const HANDSHAKE_TYPE_CLIENT_HELLO: u8 = 0x01;
const EXT_SERVER_NAME: u16 = 0x0000;
const EXT_KEY_SHARE: u16 = 0x0033;
const SNI_NAME_TYPE_DNS: u8 = 0x00;

/// The 5-byte outer framing of a TLS record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    pub content_type: u8,
    pub version: [u8; 2],
    pub length: usize,
}

impl RecordHeader {
    pub fn parse(bytes: &[u8; 5]) -> Result<Self> {
        if bytes[0] != CONTENT_TYPE_HANDSHAKE {
            return Err(Error::MalformedTls("record content type"));
        }
        let length = be16([bytes[3], bytes[4]]) as usize;
        if length == 0 || length > MAX_RECORD_LEN {
            return Err(Error::MalformedTls("record length"));
        }
        Ok(Self {
            content_type: bytes[0],
            version: [bytes[1], bytes[2]],
            length,
        })
    }

    /// Record type + legacy version, reused verbatim on every emitted
    /// fragment record.
    pub fn prefix(&self) -> [u8; 3] {
        [self.content_type, self.version[0], self.version[1]]
    }
}

/// What the pipeline needs out of a ClientHello
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientHello {
    pub sni: String,
    /// Byte range of the SNI host name within the handshake message,
    /// including nothing but the name itself. Empty when no SNI was present.
    pub sni_range: Range<usize>,
    pub is_tls13: bool,
}

/// Parse the record payload of a handshake record: the full ClientHello
/// including its 4-byte handshake header.
pub fn parse_client_hello(payload: &[u8]) -> Result<ClientHello> {
    if payload.len() < 4 {
        return Err(Error::MalformedTls("handshake header"));
    }
    if payload[0] != HANDSHAKE_TYPE_CLIENT_HELLO {
        return Err(Error::MalformedTls("handshake type"));
    }
    let body_len = be32(&payload[1..4]) as usize;
    if payload.len() != body_len + 4 {
        return Err(Error::MalformedTls("handshake length"));
    }

    let mut pos = 4usize;

    // legacy_version (2) + random (32)
    pos = skip(payload, pos, 2 + 32, "random")?;

    // session_id
    let session_id_len = read_u8(payload, pos, "session id length")? as usize;
    pos = skip(payload, pos + 1, session_id_len, "session id")?;

    // cipher_suites
    let cipher_suites_len = read_u16(payload, pos, "cipher suites length")? as usize;
    pos = skip(payload, pos + 2, cipher_suites_len, "cipher suites")?;

    // compression_methods
    let compression_len = read_u8(payload, pos, "compression methods length")? as usize;
    pos = skip(payload, pos + 1, compression_len, "compression methods")?;

    // extensions
    let extensions_len = read_u16(payload, pos, "extensions length")? as usize;
    pos += 2;
    if payload.len() - pos != extensions_len {
        return Err(Error::MalformedTls("extensions length"));
    }

    let mut sni = String::new();
    let mut sni_range = 0..0;
    let mut is_tls13 = false;

    while pos < payload.len() {
        let ext_id = read_u16(payload, pos, "extension id")?;
        let ext_len = read_u16(payload, pos + 2, "extension length")? as usize;
        let body_start = pos + 4;
        let body_end = body_start + ext_len;
        if body_end > payload.len() {
            return Err(Error::MalformedTls("extension body"));
        }

        match ext_id {
            EXT_SERVER_NAME => {
                let body = &payload[body_start..body_end];
                // server_name_list length (2), name type (1), name length (2)
                if body.len() < 5 {
                    return Err(Error::MalformedTls("server name extension"));
                }
                if body[2] == SNI_NAME_TYPE_DNS {
                    let name_len = be16([body[3], body[4]]) as usize;
                    if 5 + name_len > body.len() {
                        return Err(Error::MalformedTls("server name length"));
                    }
                    let name_start = body_start + 5;
                    sni = String::from_utf8(body[5..5 + name_len].to_vec())
                        .map_err(|_| Error::MalformedTls("server name encoding"))?;
                    sni_range = name_start..name_start + name_len;
                }
            }
            EXT_KEY_SHARE => is_tls13 = true,
            _ => {}
        }

        pos = body_end;
    }

    Ok(ClientHello {
        sni,
        sni_range,
        is_tls13,
    })
}

fn read_u8(payload: &[u8], pos: usize, what: &'static str) -> Result<u8> {
    payload
        .get(pos)
        .copied()
        .ok_or(Error::MalformedTls(what))
}

fn read_u16(payload: &[u8], pos: usize, what: &'static str) -> Result<u16> {
    match (payload.get(pos), payload.get(pos + 1)) {
        (Some(&a), Some(&b)) => Ok(be16([a, b])),
        _ => Err(Error::MalformedTls(what)),
    }
}

fn skip(payload: &[u8], pos: usize, count: usize, what: &'static str) -> Result<usize> {
    let next = pos.checked_add(count).ok_or(Error::MalformedTls(what))?;
    if next > payload.len() {
        return Err(Error::MalformedTls(what));
    }
    Ok(next)
}

#[cfg(test)]
pub(crate) mod test_support {
    /// Build a synthetic ClientHello handshake message (no record header)
    /// with the given SNI and, optionally, a key_share extension marking it
    /// as TLS 1.3. Returns the message bytes.
    pub fn build_client_hello(sni: &str, tls13: bool) -> Vec<u8> {
        let mut extensions = Vec::new();

        if !sni.is_empty() {
            let name = sni.as_bytes();
            let mut body = Vec::new();
            body.extend_from_slice(&((name.len() as u16 + 3).to_be_bytes())); // server_name_list
            body.push(0x00); // name type: host_name
            body.extend_from_slice(&(name.len() as u16).to_be_bytes());
            body.extend_from_slice(name);

            extensions.extend_from_slice(&[0x00, 0x00]); // server_name
            extensions.extend_from_slice(&(body.len() as u16).to_be_bytes());
            extensions.extend_from_slice(&body);
        }

        // supported_versions, carried for realism but ignored by the parser
        extensions.extend_from_slice(&[0x00, 0x2b, 0x00, 0x03, 0x02, 0x03, 0x04]);

        if tls13 {
            // key_share with an empty client share list
            extensions.extend_from_slice(&[0x00, 0x33, 0x00, 0x02, 0x00, 0x00]);
        }

        let mut body = Vec::new();
        body.extend_from_slice(&[0x03, 0x03]); // legacy_version
        body.extend_from_slice(&[0xab; 32]); // random
        body.push(0x00); // session_id
        body.extend_from_slice(&[0x00, 0x02, 0x13, 0x01]); // cipher_suites
        body.extend_from_slice(&[0x01, 0x00]); // compression_methods
        body.extend_from_slice(&(extensions.len() as u16).to_be_bytes());
        body.extend_from_slice(&extensions);

        let mut message = vec![0x01];
        message.extend_from_slice(&(body.len() as u32).to_be_bytes()[1..]);
        message.extend_from_slice(&body);
        message
    }

    /// Wrap a handshake message in a single TLS record.
    pub fn wrap_record(message: &[u8]) -> Vec<u8> {
        let mut record = vec![0x16, 0x03, 0x01];
        record.extend_from_slice(&(message.len() as u16).to_be_bytes());
        record.extend_from_slice(message);
        record
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::build_client_hello;
    use super::*;

    #[test]
    fn test_parse_extracts_sni_and_tls13() {
        let message = build_client_hello("example.com", true);
        let hello = parse_client_hello(&message).unwrap();

        assert_eq!(hello.sni, "example.com");
        assert!(hello.is_tls13);
        assert_eq!(
            &message[hello.sni_range.clone()],
            b"example.com",
            "sni_range must point at the name bytes"
        );
    }

    #[test]
    fn test_parse_without_key_share() {
        let message = build_client_hello("example.com", false);
        let hello = parse_client_hello(&message).unwrap();
        assert!(!hello.is_tls13);
    }

    #[test]
    fn test_parse_without_sni() {
        let message = build_client_hello("", true);
        let hello = parse_client_hello(&message).unwrap();
        assert!(hello.sni.is_empty());
        assert!(hello.sni_range.is_empty());
    }

    #[test]
    fn test_reject_wrong_handshake_type() {
        let mut message = build_client_hello("example.com", true);
        message[0] = 0x02; // ServerHello
        assert!(matches!(
            parse_client_hello(&message),
            Err(Error::MalformedTls("handshake type"))
        ));
    }

    #[test]
    fn test_reject_length_mismatch() {
        let mut message = build_client_hello("example.com", true);
        message.push(0x00); // trailing garbage disagrees with the header length
        assert!(matches!(
            parse_client_hello(&message),
            Err(Error::MalformedTls("handshake length"))
        ));
    }

    #[test]
    fn test_reject_bad_extensions_length() {
        let mut message = build_client_hello("example.com", true);
        // The extensions-length field sits at a fixed offset for this builder:
        // handshake header (4) + legacy_version (2) + random (32)
        // + session_id (1) + cipher_suites (4) + compression (2).
        let len_pos = 45;
        let declared = be16([message[len_pos], message[len_pos + 1]]);
        message[len_pos..len_pos + 2].copy_from_slice(&(declared + 1).to_be_bytes());
        assert!(matches!(
            parse_client_hello(&message),
            Err(Error::MalformedTls("extensions length"))
        ));
    }

    #[test]
    fn test_reject_truncated_extension_body() {
        let mut message = build_client_hello("example.com", true);
        // Grow a declared extension length beyond the actual payload while
        // keeping the outer lengths consistent is impossible, so instead chop
        // the tail and fix the outer header only.
        let new_len = message.len() - 3;
        message.truncate(new_len);
        let body_len = (new_len - 4) as u32;
        message[1..4].copy_from_slice(&body_len.to_be_bytes()[1..]);
        assert!(parse_client_hello(&message).is_err());
    }

    #[test]
    fn test_record_header() {
        let header = RecordHeader::parse(&[0x16, 0x03, 0x01, 0x01, 0x00]).unwrap();
        assert_eq!(header.length, 256);
        assert_eq!(header.prefix(), [0x16, 0x03, 0x01]);

        assert!(matches!(
            RecordHeader::parse(&[0x17, 0x03, 0x01, 0x01, 0x00]),
            Err(Error::MalformedTls("record content type"))
        ));
        assert!(matches!(
            RecordHeader::parse(&[0x16, 0x03, 0x01, 0xff, 0xff]),
            Err(Error::MalformedTls("record length"))
        ));
    }
}
