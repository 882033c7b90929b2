//! UBX stream parser.

use crate::checksum::fletcher8;
use crate::parser::ParserStats;
use crate::ubx::{SYNC_CHAR_1, SYNC_CHAR_2};

/// Default maximum accepted payload length. The receiver is configured for
/// navigation and sensor messages only, none of which exceeds this.
pub const DEFAULT_MAX_PAYLOAD_LEN: usize = 512;

/// Reassembles UBX frames (`B5 62 | class | id | len | payload | ckA ckB`)
/// from a byte stream.
///
/// The parser keeps a bounded rolling buffer: bytes of a frame in flight are
/// retained until the frame completes or fails validation. On a checksum
/// mismatch only the sync bytes are dropped and the remainder is rescanned,
/// so a valid frame overlapping the corrupted one is still found.
pub struct UbxParser {
    buf: Vec<u8>,
    max_payload_len: usize,
    stats: ParserStats,
}

impl Default for UbxParser {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_PAYLOAD_LEN)
    }
}

impl UbxParser {
    pub fn new(max_payload_len: usize) -> Self {
        Self {
            buf: Vec::new(),
            max_payload_len,
            stats: ParserStats::default(),
        }
    }

    pub fn stats(&self) -> ParserStats {
        self.stats
    }

    /// Bytes currently buffered waiting for a frame to complete.
    pub fn buffer_len(&self) -> usize {
        self.buf.len()
    }

    pub fn reset(&mut self) {
        self.buf.clear();
        self.stats = ParserStats::default();
    }

    /// Feeds a chunk of bytes, returning every complete validated frame.
    pub fn consume(&mut self, chunk: &[u8]) -> Vec<Vec<u8>> {
        self.buf.extend_from_slice(chunk);
        let mut out = Vec::new();
        loop {
            let pos = match self.buf.iter().position(|b| *b == SYNC_CHAR_1) {
                Some(pos) => pos,
                None => {
                    if !self.buf.is_empty() {
                        self.stats.junk += 1;
                        self.buf.clear();
                    }
                    break;
                },
            };
            if pos > 0 {
                self.stats.junk += 1;
                self.buf.drain(..pos);
            }
            if self.buf.len() < 2 {
                break;
            }
            if self.buf[1] != SYNC_CHAR_2 {
                self.stats.junk += 1;
                self.buf.drain(..1);
                continue;
            }
            if self.buf.len() < 6 {
                break;
            }
            let pack_len = usize::from(u16::from_le_bytes([self.buf[4], self.buf[5]]));
            if pack_len > self.max_payload_len {
                self.stats.too_long += 1;
                self.buf.drain(..2);
                continue;
            }
            let total = 8 + pack_len;
            if self.buf.len() < total {
                break;
            }
            let (ck_a, ck_b) = fletcher8(&self.buf[2..6 + pack_len]);
            if (ck_a, ck_b) != (self.buf[6 + pack_len], self.buf[7 + pack_len]) {
                self.stats.checksum_errors += 1;
                self.buf.drain(..2);
                continue;
            }
            out.push(self.buf[..total].to_vec());
            self.buf.drain(..total);
            self.stats.frames += 1;
        }
        out
    }
}
