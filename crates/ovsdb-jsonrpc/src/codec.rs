//! Self-delimiting JSON frame decoder
//!
//! OVSDB frames are bare JSON objects on the stream with no length prefix or
//! terminator. The decoder counts braces outside string literals to find the
//! end of each object, then hands the slice to serde_json. Scanning resumes
//! where the previous call stopped, so a partial frame is never re-examined
//! from the start.

use serde_json::Value;
use tracing::{trace, warn};

use ovsdb_core::{Error, Result};

/// Default cap before the oversize warning fires (1 MiB).
pub const DEFAULT_MAX_FRAME: usize = 1024 * 1024;

#[derive(Debug)]
pub struct JsonFrameDecoder {
    buf: Vec<u8>,
    /// resume offset for the brace scan
    scan_pos: usize,
    depth: u32,
    in_string: bool,
    escaped: bool,
    max_frame: usize,
    warned: bool,
    frames_read: u64,
}

impl JsonFrameDecoder {
    pub fn new(max_frame: usize) -> Self {
        Self {
            buf: Vec::new(),
            scan_pos: 0,
            depth: 0,
            in_string: false,
            escaped: false,
            max_frame,
            warned: false,
            frames_read: 0,
        }
    }

    /// Append raw bytes read from the transport.
    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Number of complete frames decoded so far.
    pub fn frames_read(&self) -> u64 {
        self.frames_read
    }

    /// Bytes buffered but not yet consumed by a complete frame.
    pub fn pending_bytes(&self) -> usize {
        self.buf.len()
    }

    /// Extract the next complete frame, if the buffer holds one.
    ///
    /// Returns `Ok(None)` when more bytes are needed. A frame that is not
    /// valid JSON, or leading bytes that cannot start an object, are
    /// protocol errors.
    pub fn next_frame(&mut self) -> Result<Option<Value>> {
        // Discard inter-frame whitespace before the opening brace.
        if self.depth == 0 {
            let skip = self
                .buf
                .iter()
                .take_while(|b| matches!(b, b' ' | b'\t' | b'\r' | b'\n'))
                .count();
            if skip > 0 {
                self.buf.drain(..skip);
                self.scan_pos = 0;
            }
            if let Some(&first) = self.buf.first() {
                if first != b'{' {
                    return Err(Error::protocol(format!(
                        "expected start of JSON object, got byte 0x{first:02x}"
                    )));
                }
            }
        }

        let mut end = None;
        for index in self.scan_pos..self.buf.len() {
            let byte = self.buf[index];
            if self.in_string {
                if self.escaped {
                    self.escaped = false;
                } else if byte == b'\\' {
                    self.escaped = true;
                } else if byte == b'"' {
                    self.in_string = false;
                }
            } else {
                match byte {
                    b'"' => self.in_string = true,
                    b'{' => self.depth += 1,
                    b'}' => {
                        self.depth = self.depth.saturating_sub(1);
                        if self.depth == 0 {
                            end = Some(index);
                        }
                    }
                    _ => {}
                }
            }
            if let Some(end) = end {
                let frame: Value = serde_json::from_slice(&self.buf[..=end])?;
                self.buf.drain(..=end);
                self.scan_pos = 0;
                self.frames_read += 1;
                trace!(frames_read = self.frames_read, "decoded frame");
                return Ok(Some(frame));
            }
        }

        self.scan_pos = self.buf.len();
        // An over-long frame is tolerated; warn once per connection so a
        // scale environment is not broken by a big initial snapshot.
        if self.buf.len() >= self.max_frame && !self.warned {
            self.warned = true;
            warn!(
                limit = self.max_frame,
                buffered = self.buf.len(),
                "frame limit reached while scanning for end of JSON object"
            );
        }
        Ok(None)
    }
}

impl Default for JsonFrameDecoder {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn collect(decoder: &mut JsonFrameDecoder) -> Vec<Value> {
        let mut frames = Vec::new();
        while let Some(frame) = decoder.next_frame().unwrap() {
            frames.push(frame);
        }
        frames
    }

    #[test]
    fn test_single_frame() {
        let mut decoder = JsonFrameDecoder::default();
        decoder.extend(br#"{"method":"echo","params":[],"id":0}"#);
        let frames = collect(&mut decoder);
        assert_eq!(frames, vec![json!({"method": "echo", "params": [], "id": 0})]);
        assert_eq!(decoder.pending_bytes(), 0);
    }

    #[test]
    fn test_frame_split_across_reads() {
        let mut decoder = JsonFrameDecoder::default();
        decoder.extend(br#"{"result":{"tab"#);
        assert!(decoder.next_frame().unwrap().is_none());
        decoder.extend(br#"les":{}},"error":null,"id":1}"#);
        let frames = collect(&mut decoder);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0]["id"], json!(1));
    }

    #[test]
    fn test_braces_inside_strings_do_not_frame() {
        let mut decoder = JsonFrameDecoder::default();
        decoder.extend(br#"{"result":"}{ \" {","error":null,"id":2}"#);
        let frames = collect(&mut decoder);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0]["result"], json!("}{ \" {"));
    }

    #[test]
    fn test_escaped_backslash_before_quote() {
        let mut decoder = JsonFrameDecoder::default();
        decoder.extend(br#"{"result":"c:\\","error":null,"id":3}"#);
        let frames = collect(&mut decoder);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0]["result"], json!("c:\\"));
    }

    #[test]
    fn test_multiple_frames_in_one_read() {
        let mut decoder = JsonFrameDecoder::default();
        decoder.extend(br#"{"id":1,"result":[],"error":null} {"id":2,"result":[],"error":null}"#);
        let frames = collect(&mut decoder);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0]["id"], json!(1));
        assert_eq!(frames[1]["id"], json!(2));
    }

    #[test]
    fn test_interframe_whitespace_skipped() {
        let mut decoder = JsonFrameDecoder::default();
        decoder.extend(b"\r\n \t{\"id\":7,\"result\":null,\"error\":null}\n");
        let frames = collect(&mut decoder);
        assert_eq!(frames.len(), 1);
    }

    #[test]
    fn test_non_object_leading_byte_is_protocol_error() {
        let mut decoder = JsonFrameDecoder::default();
        decoder.extend(b"[1,2,3]");
        assert!(decoder.next_frame().is_err());
    }

    #[test]
    fn test_scan_resumes_without_restarting() {
        let mut decoder = JsonFrameDecoder::new(64);
        // Feed byte by byte; the scan must still find the frame exactly once.
        let payload = br#"{"id":9,"result":{"a":{"b":"}"}},"error":null}"#;
        for byte in payload.iter() {
            decoder.extend(std::slice::from_ref(byte));
            if let Some(frame) = decoder.next_frame().unwrap() {
                assert_eq!(frame["id"], json!(9));
                return;
            }
        }
        panic!("frame never completed");
    }
}
