//! ClientHello fragmentation.
//!
//! The handshake message is re-framed into several TLS records cut so that
//! the SNI never travels whole inside one record, then the record stream is
//! partitioned again into per-write chunks so the bytes also cross TCP
//! segment boundaries. A conforming receiver reassembles the records into a
//! message byte-identical to the original; the transform is a legal TLS
//! rewrite whatever the cut points.

use crate::codec::{be16_encode, random_slice};
use rand::Rng;
use std::ops::Range;

/// Minimum record fragment length outside the SNI
const RECORD_MIN_FRAG: usize = 8;
/// Minimum record fragment length inside the SNI; small enough that any
/// realistic host name is split across at least two records
const SNI_MIN_FRAG: usize = 4;
/// Minimum per-write chunk length
const CHUNK_MIN_LEN: usize = 4;

/// An immutable plan for the first upstream write: the original handshake
/// bytes, where the SNI sits inside them, and the record-type/version prefix
/// every emitted record must carry.
#[derive(Debug, Clone)]
pub struct FragmentJob {
    handshake: Vec<u8>,
    sni_range: Range<usize>,
    prefix: [u8; 3],
}

impl FragmentJob {
    pub fn new(handshake: Vec<u8>, sni_range: Range<usize>, prefix: [u8; 3]) -> Self {
        debug_assert!(sni_range.end <= handshake.len());
        Self {
            handshake,
            sni_range,
            prefix,
        }
    }

    /// Re-frame the handshake into multiple TLS records and return the
    /// concatenated record stream.
    pub fn records<R: Rng>(&self, rng: &mut R) -> Vec<u8> {
        let spans = [
            (0..self.sni_range.start, RECORD_MIN_FRAG),
            (self.sni_range.clone(), SNI_MIN_FRAG),
            (self.sni_range.end..self.handshake.len(), RECORD_MIN_FRAG),
        ];

        let mut out = Vec::with_capacity(self.handshake.len() + 64);
        for (span, min_len) in spans {
            if span.is_empty() {
                continue;
            }
            for piece in random_slice(span, min_len, rng) {
                let body = &self.handshake[piece];
                out.extend_from_slice(&self.prefix);
                out.extend_from_slice(&be16_encode(body.len() as u16));
                out.extend_from_slice(body);
            }
        }
        out
    }

    /// The full upstream payload, partitioned into the chunks the pipeline
    /// writes as separate TCP sends.
    pub fn chunks<R: Rng>(&self, rng: &mut R) -> Vec<Vec<u8>> {
        let stream = self.records(rng);
        random_slice(0..stream.len(), CHUNK_MIN_LEN, rng)
            .into_iter()
            .map(|r| stream[r].to_vec())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tls::test_support::build_client_hello;
    use crate::tls::parse_client_hello;
    use rand::rngs::SmallRng;
    use rand::SeedableRng;

    const PREFIX: [u8; 3] = [0x16, 0x03, 0x01];

    /// Split a record stream back into (prefix, body) pairs.
    fn split_records(mut stream: &[u8]) -> Vec<([u8; 3], Vec<u8>)> {
        let mut records = Vec::new();
        while !stream.is_empty() {
            assert!(stream.len() >= 5, "truncated record header");
            let prefix = [stream[0], stream[1], stream[2]];
            let len = u16::from_be_bytes([stream[3], stream[4]]) as usize;
            assert!(stream.len() >= 5 + len, "truncated record body");
            records.push((prefix, stream[5..5 + len].to_vec()));
            stream = &stream[5 + len..];
        }
        records
    }

    fn job_for(sni: &str) -> (Vec<u8>, FragmentJob) {
        let message = build_client_hello(sni, true);
        let hello = parse_client_hello(&message).unwrap();
        let job = FragmentJob::new(message.clone(), hello.sni_range, PREFIX);
        (message, job)
    }

    #[test]
    fn test_records_reassemble_to_original() {
        let (message, job) = job_for("videos.example.com");
        for seed in 0..16 {
            let mut rng = SmallRng::seed_from_u64(seed);
            let records = split_records(&job.records(&mut rng));

            assert!(records.len() >= 2);
            let mut reassembled = Vec::new();
            for (prefix, body) in &records {
                assert_eq!(*prefix, PREFIX);
                reassembled.extend_from_slice(body);
            }
            assert_eq!(reassembled, message);
        }
    }

    #[test]
    fn test_sni_spans_multiple_records() {
        let (message, job) = job_for("videos.example.com");
        let hello = parse_client_hello(&message).unwrap();

        for seed in 0..16 {
            let mut rng = SmallRng::seed_from_u64(seed);
            let records = split_records(&job.records(&mut rng));

            // Map each record body back to its byte range in the message and
            // count the ones overlapping the SNI.
            let mut offset = 0usize;
            let mut overlapping = 0usize;
            for (_, body) in &records {
                let range = offset..offset + body.len();
                if range.start < hello.sni_range.end && hello.sni_range.start < range.end {
                    overlapping += 1;
                }
                offset = range.end;
            }
            assert!(
                overlapping >= 2,
                "seed {}: SNI contained in a single record",
                seed
            );
        }
    }

    #[test]
    fn test_chunks_concatenate_to_record_stream() {
        let (_, job) = job_for("example.com");
        // Identical seeds make records() inside chunks() reproducible.
        let mut rng_a = SmallRng::seed_from_u64(99);
        let mut rng_b = SmallRng::seed_from_u64(99);

        let stream = job.records(&mut rng_a);
        let chunks: Vec<u8> = job.chunks(&mut rng_b).into_iter().flatten().collect();
        assert_eq!(chunks, stream);
    }

    #[test]
    fn test_chunk_lengths() {
        let (_, job) = job_for("example.com");
        let mut rng = SmallRng::seed_from_u64(3);
        let chunks = job.chunks(&mut rng);

        assert!(chunks.len() >= 2);
        for (i, chunk) in chunks.iter().enumerate() {
            if i + 1 < chunks.len() {
                assert!(chunk.len() >= CHUNK_MIN_LEN);
            } else {
                assert!(!chunk.is_empty());
            }
        }
    }
}
