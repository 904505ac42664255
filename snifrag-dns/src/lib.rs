//! Snifrag DNS - DNS-over-HTTPS resolution for the proxy data path
//!
//! The resolver speaks Cloudflare's JSON DoH API and reaches the endpoint
//! through the proxy's own listener, so the DoH connection itself gets the
//! fragmented-ClientHello treatment. Results are cached with TTL awareness,
//! and concurrent lookups for the same name are collapsed into a single
//! upstream query.

pub mod cache;
pub mod doh;
pub mod error;
pub mod resolver;

pub use cache::DohCache;
pub use doh::{Answer, DohTransport, HttpsTransport};
pub use error::{DnsError, Result};
pub use resolver::DohResolver;

/// DNS record types the proxy resolves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordType {
    A,
    AAAA,
}

impl RecordType {
    /// Numeric RR type as it appears in the JSON `Answer.type` field
    pub fn answer_code(self) -> u16 {
        match self {
            RecordType::A => 1,
            RecordType::AAAA => 28,
        }
    }

    /// Query-string form for the `type=` parameter
    pub fn as_str(self) -> &'static str {
        match self {
            RecordType::A => "A",
            RecordType::AAAA => "AAAA",
        }
    }
}

impl std::fmt::Display for RecordType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cache and single-flight key: `"{name_lowercased}/{qtype}"`
pub fn lookup_key(name: &str, qtype: RecordType) -> String {
    format!("{}/{}", name.to_lowercase(), qtype)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_key_is_case_insensitive() {
        assert_eq!(lookup_key("Example.COM", RecordType::A), "example.com/A");
        assert_eq!(
            lookup_key("example.com", RecordType::AAAA),
            lookup_key("EXAMPLE.com", RecordType::AAAA)
        );
    }
}
