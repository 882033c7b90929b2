//! Unicore heading-receiver ASCII stream parser.

use crate::checksum::unicore_crc32;
use crate::parser::ParserStats;

/// UNIHEADINGA with a full satellite block stays well below this.
pub const MAX_PAYLOAD_LEN: usize = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Waiting for `#`.
    FindStart,
    /// Collecting payload characters.
    Payload,
    /// Reading the eight hex CRC digits, terminated by CR.
    Crc,
    /// Waiting for the final LF.
    Terminator,
    /// Discarding until LF or a new `#` after an error.
    Discard,
}

/// Reassembles Unicore sentences (`#<payload>*XXXXXXXX\r\n`, reflected
/// CRC-32 over the payload between `#` and `*`) from a byte stream.
pub struct UnicoreParser {
    state: State,
    payload: Vec<u8>,
    crc: Vec<u8>,
    raw: Vec<u8>,
    stats: ParserStats,
}

impl Default for UnicoreParser {
    fn default() -> Self {
        Self::new()
    }
}

impl UnicoreParser {
    pub fn new() -> Self {
        Self {
            state: State::FindStart,
            payload: Vec::new(),
            crc: Vec::new(),
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
    /// including `#`, `*`, CRC and CRLF.
    pub fn consume(&mut self, chunk: &[u8]) -> Vec<Vec<u8>> {
        let mut out = Vec::new();
        for &b in chunk {
            match self.state {
                State::FindStart => {
                    if b == b'#' {
                        self.begin();
                    }
                },
                State::Payload => {
                    if b == b'#' {
                        self.stats.junk += 1;
                        self.begin();
                    } else if b == b'*' {
                        self.raw.push(b);
                        self.crc.clear();
                        self.state = State::Crc;
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
                State::Crc => {
                    if b == b'#' {
                        self.stats.junk += 1;
                        self.begin();
                    } else if b.is_ascii_hexdigit() {
                        if self.crc.len() < 8 {
                            self.crc.push(b);
                            self.raw.push(b);
                        } else {
                            self.stats.junk += 1;
                            self.state = State::Discard;
                        }
                    } else if b == b'\r' {
                        if self.crc.len() == 8 {
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
                        if self.crc_ok() {
                            self.stats.frames += 1;
                            out.push(std::mem::take(&mut self.raw));
                        } else {
                            self.stats.checksum_errors += 1;
                        }
                        self.abort();
                    } else if b == b'#' {
                        self.stats.junk += 1;
                        self.begin();
                    } else {
                        self.stats.junk += 1;
                        self.state = State::Discard;
                    }
                },
                State::Discard => {
                    if b == b'#' {
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
        self.raw.push(b'#');
        self.payload.clear();
        self.crc.clear();
        self.state = State::Payload;
    }

    fn abort(&mut self) {
        self.state = State::FindStart;
        self.payload.clear();
        self.crc.clear();
        self.raw.clear();
    }

    fn crc_ok(&self) -> bool {
        let calc = unicore_crc32(&self.payload);
        core::str::from_utf8(&self.crc)
            .ok()
            .and_then(|s| u32::from_str_radix(s, 16).ok())
            .is_some_and(|v| v == calc)
    }
}

fn is_payload_char(b: u8) -> bool {
    b.is_ascii_alphanumeric()
        || matches!(b, b'.' | b',' | b'-' | b'_' | b'"' | b'/' | b';' | b' ')
}

#[cfg(test)]
mod tests {
    use super::*;

    const UNIHEADING: &[u8] = b"#UNIHEADINGA,97,GPS,FINE,2190,365174000,0,0,18,12;\
        INSUFFICIENT_OBS,NONE,0.0000,0.0000,0.0000,0.0000,0.0000,0.0000,\
        \"\",0,0,0,0,0,00,0,0*ee072604\r\n";
    const OBSVHA: &[u8] = b"#OBSVHA,97,GPS,FINE,2190,359897000,0,0,18,14;0*9d38304c\r\n";

    fn sentence(payload: &[u8]) -> Vec<u8> {
        let mut out = vec![b'#'];
        out.extend_from_slice(payload);
        out.extend_from_slice(format!("*{:08x}\r\n", unicore_crc32(payload)).as_bytes());
        out
    }

    #[test]
    fn receiver_samples_parse() {
        let mut parser = UnicoreParser::new();
        let mut stream = UNIHEADING.to_vec();
        stream.extend_from_slice(OBSVHA);
        let out = parser.consume(&stream);
        assert_eq!(out, vec![UNIHEADING.to_vec(), OBSVHA.to_vec()]);
        assert_eq!(parser.stats().frames, 2);
        assert_eq!(parser.stats().checksum_errors, 0);
    }

    #[test]
    fn noisy_stream_recovers() {
        let mut parser = UnicoreParser::new();
        let ok = sentence(b"VERSIONA,79,GPS,FINE,2326,378237000,15434,0,18,889;TEST1,\"A\"");
        let bad_char = b"##ABC,12\x01*00000000\r\n".to_vec();
        let bad_crc = b"#ABC,123*00000000\r\n".to_vec();

        let mut stream = b"noise".to_vec();
        stream.extend_from_slice(&bad_char);
        stream.extend_from_slice(&bad_crc);
        stream.extend_from_slice(&ok);

        assert_eq!(parser.consume(&stream), vec![ok]);
        let stats = parser.stats();
        assert_eq!(stats.bad_char, 1);
        assert_eq!(stats.checksum_errors, 1);
        // The doubled `#` restarts the sentence once.
        assert_eq!(stats.junk, 1);
    }

    #[test]
    fn crc_must_have_exactly_eight_digits() {
        let mut parser = UnicoreParser::new();
        assert!(parser.consume(b"#ABC*1234\r\n").is_empty());
        assert_eq!(parser.stats().junk, 1);
    }
}
