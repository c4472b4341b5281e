//! Splits the incoming byte stream into response lines
//!
//! Lines end at `\n`; a `\r` directly before it is trimmed. Bytes after the
//! last terminator are carried over to the next [`ResponseLineSplitter::feed`]
//! call, so a line or a `\r\n` pair may be split across reads.
//!
//! Lines are handed out as raw bytes. Serial line noise is not valid UTF-8,
//! and decoding is left to whoever classifies the line.

/// Accumulates raw bytes and yields complete lines
#[derive(Debug, Default, Clone)]
pub struct ResponseLineSplitter {
    carry: Vec<u8>,
}

impl ResponseLineSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `bytes` and return every line they complete, in order
    ///
    /// Back-to-back terminators yield empty lines.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<Vec<u8>> {
        let mut lines = Vec::new();
        let mut rest = bytes;

        while let Some(pos) = rest.iter().position(|&b| b == b'\n') {
            self.carry.extend_from_slice(&rest[..pos]);
            if self.carry.last() == Some(&b'\r') {
                self.carry.pop();
            }
            lines.push(std::mem::take(&mut self.carry));
            rest = &rest[pos + 1..];
        }

        self.carry.extend_from_slice(rest);
        lines
    }

    /// Bytes received since the last terminator
    pub fn pending(&self) -> &[u8] {
        &self.carry
    }

    /// Drop any partial line, e.g. after a reconnect
    pub fn reset(&mut self) {
        self.carry.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(lines: Vec<Vec<u8>>) -> Vec<String> {
        lines
            .into_iter()
            .map(|l| String::from_utf8(l).unwrap())
            .collect()
    }

    #[test]
    fn test_crlf_and_lf_across_chunks() {
        let mut splitter = ResponseLineSplitter::new();
        assert_eq!(text(splitter.feed(b"ok\r\n")), vec!["ok"]);
        assert_eq!(text(splitter.feed(b"ok\n")), vec!["ok"]);
    }

    #[test]
    fn test_empty_input() {
        let mut splitter = ResponseLineSplitter::new();
        assert!(splitter.feed(b"").is_empty());
        assert!(splitter.pending().is_empty());
    }

    #[test]
    fn test_partial_line_is_carried() {
        let mut splitter = ResponseLineSplitter::new();
        assert!(splitter.feed(b"<Idle|MPos:0.000,").is_empty());
        assert_eq!(splitter.pending(), b"<Idle|MPos:0.000,");
        assert_eq!(
            text(splitter.feed(b"0.000,0.000>\r\nok")),
            vec!["<Idle|MPos:0.000,0.000,0.000>"]
        );
        assert_eq!(splitter.pending(), b"ok");
    }

    #[test]
    fn test_terminator_split_between_cr_and_lf() {
        let mut splitter = ResponseLineSplitter::new();
        assert!(splitter.feed(b"error:9\r").is_empty());
        assert_eq!(text(splitter.feed(b"\n")), vec!["error:9"]);
    }

    #[test]
    fn test_back_to_back_terminators_are_not_coalesced() {
        let mut splitter = ResponseLineSplitter::new();
        assert_eq!(text(splitter.feed(b"ok\n\n\r\nok\n")), vec!["ok", "", "", "ok"]);
    }

    #[test]
    fn test_trailing_terminator_waits_for_more() {
        let mut splitter = ResponseLineSplitter::new();
        assert_eq!(text(splitter.feed(b"ok\n")), vec!["ok"]);
        assert!(splitter.feed(b"").is_empty());
        assert!(splitter.pending().is_empty());
    }

    #[test]
    fn test_reset_drops_partial_line() {
        let mut splitter = ResponseLineSplitter::new();
        splitter.feed(b"Grbl 1.1");
        splitter.reset();
        assert_eq!(text(splitter.feed(b"ok\n")), vec!["ok"]);
    }

    #[test]
    fn test_invalid_utf8_is_kept_verbatim() {
        let mut splitter = ResponseLineSplitter::new();
        let lines = splitter.feed(b"ok\xff\xfe\r\n\x80<Idle>\n");
        assert_eq!(lines, vec![b"ok\xff\xfe".to_vec(), b"\x80<Idle>".to_vec()]);
    }
}
