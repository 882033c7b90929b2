//! Motor-controller ASCII stream parser.

use crate::checksum::xor8;
use crate::parser::ParserStats;

/// Sentences longer than this are firmware bugs or line noise.
pub const MAX_PAYLOAD_LEN: usize = 240;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Waiting for `$`.
    FindStart,
    /// Collecting payload characters `[0-9A-Z,-]`.
    Payload,
    /// Reading the two uppercase hex checksum digits, terminated by CR.
    Checksum,
    /// Waiting for the final LF.
    Terminator,
    /// Discarding until LF or a new `$` after an error.
    Discard,
}

/// Reassembles motor-controller sentences (`$<payload>*XX\r\n`, XOR-8
/// checksum) from a byte stream.
///
/// A new `$` anywhere inside a sentence abandons the torso (one junk event)
/// and starts over, so a sentence following a truncated one is never lost.
pub struct MotorParser {
    state: State,
    payload: Vec<u8>,
    cs: Vec<u8>,
    raw: Vec<u8>,
    stats: ParserStats,
}

impl Default for MotorParser {
    fn default() -> Self {
        Self::new()
    }
}

impl MotorParser {
    pub fn new() -> Self {
        Self {
            state: State::FindStart,
            payload: Vec::new(),
            cs: Vec::new(),
            raw: Vec::new(),
            stats: ParserStats::default(),
        }
    }

    pub fn stats(&self) -> ParserStats {
        self.stats
    }

    pub fn reset(&mut self) {
        self.abort();
        self.stats = ParserStats::default();
    }

    /// Feeds a chunk of bytes, returning every complete validated sentence
    /// including `$`, `*`, checksum and CRLF.
    pub fn consume(&mut self, chunk: &[u8]) -> Vec<Vec<u8>> {
        let mut out = Vec::new();
        for &b in chunk {
            match self.state {
                State::FindStart => {
                    if b == b'$' {
                        self.begin();
                    }
                },
                State::Payload => {
                    if b == b'$' {
                        self.stats.junk += 1;
                        self.begin();
                    } else if b == b'*' {
                        self.raw.push(b);
                        self.cs.clear();
                        self.state = State::Checksum;
                    } else if is_payload_char(b) {
                        if self.payload.len() >= MAX_PAYLOAD_LEN {
                            self.stats.too_long += 1;
                            self.state = State::Discard;
                        } else {
                            self.payload.push(b);
                            self.raw.push(b);
                        }
                    } else if b == b'\r' || b == b'\n' {
                        self.stats.junk += 1;
                        self.abort();
                    } else {
                        self.stats.bad_char += 1;
                        self.state = State::Discard;
                    }
                },
                State::Checksum => {
                    if b == b'$' {
                        self.stats.junk += 1;
                        self.begin();
                    } else if is_hex_upper(b) {
                        if self.cs.len() < 2 {
                            self.cs.push(b);
                            self.raw.push(b);
                        } else {
                            self.stats.junk += 1;
                            self.state = State::Discard;
                        }
                    } else if b == b'\r' {
                        if self.cs.len() == 2 {
                            self.raw.push(b);
                            self.state = State::Terminator;
                        } else {
                            self.stats.junk += 1;
                            self.abort();
                        }
                    } else {
                        self.stats.junk += 1;
                        self.state = State::Discard;
                    }
                },
                State::Terminator => {
                    if b == b'\n' {
                        self.raw.push(b);
                        if self.checksum_ok() {
                            self.stats.frames += 1;
                            out.push(std::mem::take(&mut self.raw));
                        } else {
                            self.stats.checksum_errors += 1;
                        }
                        self.abort();
                    } else if b == b'$' {
                        self.stats.junk += 1;
                        self.begin();
                    } else {
                        self.stats.junk += 1;
                        self.state = State::Discard;
                    }
                },
                State::Discard => {
                    if b == b'$' {
                        self.begin();
                    } else if b == b'\n' {
                        self.abort();
                    }
                },
            }
        }
        out
    }

    fn begin(&mut self) {
        self.raw.clear();
        self.raw.push(b'$');
        self.payload.clear();
        self.cs.clear();
        self.state = State::Payload;
    }

    fn abort(&mut self) {
        self.state = State::FindStart;
        self.payload.clear();
        self.cs.clear();
        self.raw.clear();
    }

    fn checksum_ok(&self) -> bool {
        let calc = xor8(&self.payload);
        core::str::from_utf8(&self.cs)
            .ok()
            .and_then(|s| u8::from_str_radix(s, 16).ok())
            .is_some_and(|v| v == calc)
    }
}

fn is_payload_char(b: u8) -> bool {
    b.is_ascii_digit() || b.is_ascii_uppercase() || b == b',' || b == b'-'
}

fn is_hex_upper(b: u8) -> bool {
    b.is_ascii_digit() || (b'A'..=b'F').contains(&b)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sentence(payload: &[u8]) -> Vec<u8> {
        let mut out = vec![b'$'];
        out.extend_from_slice(payload);
        out.extend_from_slice(format!("*{:02X}\r\n", xor8(payload)).as_bytes());
        out
    }

    #[test]
    fn valid_sentences_pass_through() {
        let mut parser = MotorParser::new();
        let ok1 = sentence(b"ABC,123");
        let ok2 = sentence(b"VEL-1,XYZ");
        let mut stream = ok1.clone();
        stream.extend_from_slice(&ok2);
        assert_eq!(parser.consume(&stream), vec![ok1, ok2]);
        assert_eq!(parser.stats().frames, 2);
    }

    #[test]
    fn mixed_stream_counts_each_error_class() {
        let mut parser = MotorParser::new();
        let ok1 = sentence(b"ABC,123");
        let ok2 = sentence(b"MSM,7F");
        let bad_char = b"$ABC,12z*00\r\n".to_vec();
        let bad_cs = b"$ABC,123*00\r\n".to_vec();
        // A new `$` mid-sentence: the torso is junk, the follow-up survives.
        let junk_mid = b"salkdhaslj$\r\nABC,1$VEL,2*00\r\n".to_vec();

        let mut stream = ok1.clone();
        stream.extend_from_slice(&bad_char);
        stream.extend_from_slice(&bad_cs);
        stream.extend_from_slice(&junk_mid);
        stream.extend_from_slice(&ok2);

        let out = parser.consume(&stream);
        assert_eq!(out, vec![ok1, ok2]);
        let stats = parser.stats();
        assert_eq!(stats.bad_char, 1);
        // bad_cs and the VEL,2*00 tail both fail the checksum.
        assert_eq!(stats.checksum_errors, 2);
        // One junk event: the CR that cut the "$\r\n" torso short.
        assert_eq!(stats.junk, 1);
    }

    #[test]
    fn oversized_payload_is_dropped() {
        let mut parser = MotorParser::new();
        let long = vec![b'A'; MAX_PAYLOAD_LEN + 1];
        let mut stream = sentence(&long);
        let ok = sentence(b"ODM,1,2,3,4,5");
        stream.extend_from_slice(&ok);
        assert_eq!(parser.consume(&stream), vec![ok]);
        assert_eq!(parser.stats().too_long, 1);
    }

    #[test]
    fn byte_by_byte_equals_one_go() {
        let ok = sentence(b"IAM,50,10,20,30,40");
        let mut one_go = MotorParser::new();
        let expect = one_go.consume(&ok);

        let mut stepped = MotorParser::new();
        let mut got = Vec::new();
        for b in &ok {
            got.extend(stepped.consume(&[*b]));
        }
        assert_eq!(expect, got);
        assert_eq!(one_go.stats(), stepped.stats());
    }
}
