//! Stream framing for log4j XML events.
//!
//! [`Log4jEventCodec`] splits an unbounded byte stream into event fragments.
//! A frame ends at the closing `</log4j:event>` tag, or at the end of a
//! self-closing `<log4j:event .../>` root. The decoder never waits for EOF
//! to yield a complete event.
//!
//! Bytes that precede the root tag stay in the frame so the parser can
//! degrade them instead of losing them silently.
//!
//! The decoder remembers how far it has scanned, so each call only looks at
//! newly buffered bytes (plus a tag's length of overlap).

use bytes::{Buf, BytesMut};
use tokio_util::codec::Decoder;

use super::FORMAT_LOG4J;
use crate::error::ReceiverError;

const OPEN_TAG: &[u8] = b"<log4j:event";
const CLOSE_TAG: &[u8] = b"</log4j:event";

/// Default upper bound on a single event (1 MiB).
pub const DEFAULT_MAX_FRAME: usize = 1024 * 1024;

/// Progress through the frame currently being buffered.
#[derive(Debug, Clone, Default)]
struct Scan {
    /// Offset of the root start tag.
    open: Option<usize>,
    /// Offset just past the root start tag.
    body: Option<usize>,
    /// Where the next search for the pending tag resumes.
    resume: usize,
}

impl Scan {
    fn consumed(&mut self, n: usize) {
        self.open = self.open.map(|o| o.saturating_sub(n));
        self.body = self.body.map(|b| b.saturating_sub(n));
        self.resume = self.resume.saturating_sub(n);
    }
}

#[derive(Debug, Clone)]
pub struct Log4jEventCodec {
    max_frame: usize,
    scan: Scan,
}

impl Log4jEventCodec {
    pub fn new() -> Self {
        Self::with_max_frame(DEFAULT_MAX_FRAME)
    }

    pub fn with_max_frame(max_frame: usize) -> Self {
        Self {
            max_frame,
            scan: Scan::default(),
        }
    }

    /// End offset (exclusive) of the first complete event in `buf`.
    fn frame_end(&mut self, buf: &[u8]) -> Option<usize> {
        let scan = &mut self.scan;
        let open = match scan.open {
            Some(open) => open,
            None => {
                let Some(open) = find(buf, OPEN_TAG, scan.resume) else {
                    scan.resume = overlap_start(buf, OPEN_TAG, 0);
                    return None;
                };
                scan.open = Some(open);
                open
            }
        };
        let body = match scan.body {
            Some(body) => body,
            None => {
                let tag_end = start_tag_end(buf, open + OPEN_TAG.len())?;
                if buf[tag_end - 1] == b'/' {
                    return Some(tag_end + 1);
                }
                scan.body = Some(tag_end + 1);
                scan.resume = tag_end + 1;
                tag_end + 1
            }
        };
        let Some(close) = find(buf, CLOSE_TAG, scan.resume.max(body)) else {
            scan.resume = overlap_start(buf, CLOSE_TAG, body);
            return None;
        };
        scan.resume = close;
        let gt = buf[close + CLOSE_TAG.len()..].iter().position(|b| *b == b'>')?;
        Some(close + CLOSE_TAG.len() + gt + 1)
    }
}

impl Default for Log4jEventCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for Log4jEventCodec {
    type Item = String;
    type Error = ReceiverError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<String>, ReceiverError> {
        let leading = src.iter().take_while(|b| b.is_ascii_whitespace()).count();
        src.advance(leading);
        self.scan.consumed(leading);

        match self.frame_end(src) {
            Some(end) => {
                self.scan = Scan::default();
                let frame = src.split_to(end);
                Ok(Some(String::from_utf8_lossy(&frame).into_owned()))
            }
            None if src.len() > self.max_frame => {
                let size = src.len();
                src.clear();
                self.scan = Scan::default();
                Err(ReceiverError::parse(
                    FORMAT_LOG4J,
                    format!("event exceeds {} bytes ({size} buffered)", self.max_frame),
                ))
            }
            None => Ok(None),
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<String>, ReceiverError> {
        if let Some(frame) = self.decode(src)? {
            return Ok(Some(frame));
        }
        if src.iter().all(u8::is_ascii_whitespace) {
            src.clear();
            return Ok(None);
        }
        // trailing partial event; the parser degrades it
        self.scan = Scan::default();
        let rest = src.split();
        Ok(Some(String::from_utf8_lossy(&rest).into_owned()))
    }
}

fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    haystack
        .get(from..)?
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|p| p + from)
}

/// First offset at or after `floor` where `needle` could still begin in a
/// longer `buf`.
fn overlap_start(buf: &[u8], needle: &[u8], floor: usize) -> usize {
    buf.len().saturating_sub(needle.len() - 1).max(floor)
}

/// Index of the `>` closing a start tag, skipping quoted attribute values.
fn start_tag_end(buf: &[u8], from: usize) -> Option<usize> {
    let mut quote: Option<u8> = None;
    for (i, b) in buf.iter().enumerate().skip(from) {
        match (quote, *b) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, b'"' | b'\'') => quote = Some(*b),
            (None, b'>') => return Some(i),
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(codec: &mut Log4jEventCodec, input: &[u8]) -> Vec<String> {
        let mut buf = BytesMut::from(input);
        let mut out = Vec::new();
        while let Some(frame) = codec.decode(&mut buf).unwrap() {
            out.push(frame);
        }
        out
    }

    #[test]
    fn splits_consecutive_events() {
        let mut codec = Log4jEventCodec::new();
        let input = b"<log4j:event logger=\"a\"><log4j:message>1</log4j:message></log4j:event>\r\n<log4j:event logger=\"b\"/>";
        let frames = decode_all(&mut codec, input);
        assert_eq!(frames.len(), 2);
        assert!(frames[0].ends_with("</log4j:event>"));
        assert_eq!(frames[1], "<log4j:event logger=\"b\"/>");
    }

    #[test]
    fn waits_for_closing_tag() {
        let mut codec = Log4jEventCodec::new();
        let mut buf = BytesMut::from(&b"<log4j:event logger=\"a\"><log4j:message>par"[..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        buf.extend_from_slice(b"tial</log4j:message></log4j:event>");
        let frame = codec.decode(&mut buf).unwrap().unwrap();
        assert!(frame.contains("partial"));
        assert!(buf.is_empty());
    }

    #[test]
    fn scan_resumes_where_it_stopped() {
        let mut codec = Log4jEventCodec::new();
        let mut buf = BytesMut::from(&b"<log4j:event logger=\"a\"><log4j:message>"[..]);
        buf.extend_from_slice(&[b'x'; 4096]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        assert_eq!(codec.scan.open, Some(0));
        assert_eq!(codec.scan.resume, buf.len() - (CLOSE_TAG.len() - 1));

        // close tag split across reads
        buf.extend_from_slice(b"</log4j:message></log4j:ev");
        assert!(codec.decode(&mut buf).unwrap().is_none());
        buf.extend_from_slice(b"ent>\n<log4j:ev");
        let frame = codec.decode(&mut buf).unwrap().unwrap();
        assert!(frame.ends_with("</log4j:event>"));
        assert_eq!(codec.scan.open, None);
        assert_eq!(codec.scan.resume, 0);

        // open tag split across reads, after leading whitespace
        assert!(codec.decode(&mut buf).unwrap().is_none());
        buf.extend_from_slice(b"ent logger=\"b\"/>");
        assert_eq!(
            codec.decode(&mut buf).unwrap().unwrap(),
            "<log4j:event logger=\"b\"/>"
        );
        assert!(buf.is_empty());
    }

    #[test]
    fn quoted_gt_does_not_end_the_start_tag() {
        let mut codec = Log4jEventCodec::new();
        let frames = decode_all(&mut codec, b"<log4j:event logger=\"a>b\" level=\"INFO\"/>");
        assert_eq!(frames.len(), 1);
    }

    #[test]
    fn leading_garbage_stays_in_frame() {
        let mut codec = Log4jEventCodec::new();
        let frames = decode_all(&mut codec, b"junk<log4j:event logger=\"a\"/>");
        assert_eq!(frames, vec!["junk<log4j:event logger=\"a\"/>".to_owned()]);
    }

    #[test]
    fn oversized_frame_is_an_error() {
        let mut codec = Log4jEventCodec::with_max_frame(16);
        let mut buf = BytesMut::from(&b"<log4j:event logger=\"aaaaaaaaaaaaaaaa\">"[..]);
        assert!(codec.decode(&mut buf).is_err());
        assert!(buf.is_empty());
    }

    #[test]
    fn eof_flushes_partial_event() {
        let mut codec = Log4jEventCodec::new();
        let mut buf = BytesMut::from(&b"<log4j:event logger=\"a\"><log4j:mess"[..]);
        let frame = codec.decode_eof(&mut buf).unwrap().unwrap();
        assert!(frame.starts_with("<log4j:event"));
        assert!(codec.decode_eof(&mut buf).unwrap().is_none());
    }

    #[test]
    fn eof_on_whitespace_yields_nothing() {
        let mut codec = Log4jEventCodec::new();
        let mut buf = BytesMut::from(&b"  \n"[..]);
        assert!(codec.decode_eof(&mut buf).unwrap().is_none());
    }
}
