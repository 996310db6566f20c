use crate::proto::command::Command;
use bytes::{Buf, BufMut, BytesMut};
use std::io;
use tokio_util::codec::{Decoder, Encoder};
use tracing::warn;

/// Longest response line accepted before the buffer is discarded.
pub const MAX_LINE_LEN: usize = 256;

const EOL: &[u8] = b"\r\n";

/// Line framing for the scale link: commands go out as `<code>\r\n`,
/// responses come back as CR/LF terminated ASCII lines.
#[derive(Default)]
pub struct ScaleCodec {
    // Bytes already searched for a terminator
    next_index: usize,
    // Inside an overlong line, skip up to the next terminator
    is_discarding: bool,
}

impl ScaleCodec {
    fn line_from_bytes(raw: &[u8]) -> String {
        // 7-bit data path, ignore whatever ends up in the parity bit
        let ascii: Vec<u8> = raw.iter().map(|b| b & 0x7f).collect();
        String::from_utf8_lossy(&ascii).trim().to_string()
    }
}

impl Decoder for ScaleCodec {
    type Item = String;
    // A malformed line is not a framing problem, the parser decides what
    // it means. The decoder itself never fails.
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            let offset = src[self.next_index..].iter().position(|b| *b == b'\n');
            match (self.is_discarding, offset) {
                (true, Some(n)) => {
                    // Drop the tail of the overlong line, terminator included
                    src.advance(self.next_index + n + 1);
                    self.next_index = 0;
                    self.is_discarding = false;
                }
                (true, None) => {
                    src.advance(src.len());
                    self.next_index = 0;
                    return Ok(None);
                }
                (false, Some(n)) => {
                    let end = self.next_index + n;
                    self.next_index = 0;
                    let raw = src.split_to(end + 1);
                    return Ok(Some(Self::line_from_bytes(&raw[..end])));
                }
                (false, None) if src.len() > MAX_LINE_LEN => {
                    warn!(len = src.len(), "discarding overlong line");
                    src.advance(src.len());
                    self.next_index = 0;
                    self.is_discarding = true;
                    return Ok(None);
                }
                (false, None) => {
                    self.next_index = src.len();
                    return Ok(None);
                }
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.decode(src)? {
            Some(line) => Ok(Some(line)),
            None => {
                self.next_index = 0;
                if src.is_empty() || self.is_discarding {
                    src.clear();
                    self.is_discarding = false;
                    Ok(None)
                } else {
                    let raw = src.split_to(src.len());
                    let line = Self::line_from_bytes(&raw);
                    Ok((!line.is_empty()).then_some(line))
                }
            }
        }
    }
}

impl Encoder<Command> for ScaleCodec {
    type Error = io::Error;

    fn encode(&mut self, item: Command, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let code = item.code();
        if code.is_empty() {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "Empty command"));
        }
        if !code.is_ascii() || code.bytes().any(|b| b == b'\r' || b == b'\n') {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("Command is not a single ASCII line: {:?}", code),
            ));
        }
        dst.reserve(code.len() + EOL.len());
        dst.put_slice(code.as_bytes());
        dst.put_slice(EOL);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(codec: &mut ScaleCodec, buf: &mut BytesMut) -> Vec<String> {
        let mut lines = Vec::new();
        while let Some(line) = codec.decode(buf).unwrap() {
            lines.push(line);
        }
        lines
    }

    #[test]
    fn test_encode_query() {
        let mut codec = ScaleCodec::default();
        let mut buf = BytesMut::new();
        codec.encode(Command::Query, &mut buf).unwrap();
        assert_eq!(&buf[..], b"Q\r\n");
    }

    #[test]
    fn test_encode_rejects_bad_commands() {
        let mut codec = ScaleCodec::default();
        let mut buf = BytesMut::new();
        for bad in ["", "Q\r", "T\nQ", "Wägen"] {
            let err = codec.encode(Command::from(bad), &mut buf).unwrap_err();
            assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
        }
        assert!(buf.is_empty());
    }

    #[test]
    fn test_decode_lines() {
        let mut codec = ScaleCodec::default();
        let mut buf = BytesMut::from(&b"ST,+00012.34 kg\r\nOL\r\n"[..]);
        assert_eq!(decode_all(&mut codec, &mut buf), ["ST,+00012.34 kg", "OL"]);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_decode_partial() {
        let mut codec = ScaleCodec::default();
        let mut buf = BytesMut::from(&b"US,0.5"[..]);
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
        buf.extend_from_slice(b"0 kg\r");
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
        buf.extend_from_slice(b"\n?");
        assert_eq!(codec.decode(&mut buf).unwrap(), Some("US,0.50 kg".to_string()));
        assert_eq!(&buf[..], b"?");
    }

    #[test]
    fn test_decode_empty_line() {
        let mut codec = ScaleCodec::default();
        let mut buf = BytesMut::from(&b"\r\nI\r\n"[..]);
        assert_eq!(decode_all(&mut codec, &mut buf), ["", "I"]);
    }

    #[test]
    fn test_decode_masks_parity_bit() {
        let mut codec = ScaleCodec::default();
        let mut buf = BytesMut::from(&[b'O' | 0x80, b'L', b'\r', b'\n'][..]);
        assert_eq!(codec.decode(&mut buf).unwrap(), Some("OL".to_string()));
    }

    #[test]
    fn test_decode_discards_overlong_line() {
        let mut codec = ScaleCodec::default();
        let mut buf = BytesMut::from(&[b'X'; MAX_LINE_LEN + 44][..]);
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
        assert!(buf.is_empty());

        // The tail of the dropped line must not surface as a line of its own
        buf.extend_from_slice(b"XXXX\r\nST,1.00 kg\r\n");
        assert_eq!(codec.decode(&mut buf).unwrap(), Some("ST,1.00 kg".to_string()));
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_decode_overlong_tail_in_pieces() {
        let mut codec = ScaleCodec::default();
        let mut buf = BytesMut::from(&[b'X'; MAX_LINE_LEN + 1][..]);
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
        buf.extend_from_slice(b"XX");
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
        buf.extend_from_slice(b"X\r\nOL\r\n");
        assert_eq!(decode_all(&mut codec, &mut buf), ["OL"]);
    }

    #[test]
    fn test_decode_eof_inside_overlong_line() {
        let mut codec = ScaleCodec::default();
        let mut buf = BytesMut::from(&[b'X'; MAX_LINE_LEN + 1][..]);
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
        buf.extend_from_slice(b"XXX");
        assert_eq!(codec.decode_eof(&mut buf).unwrap(), None);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_decode_eof_remainder() {
        let mut codec = ScaleCodec::default();
        let mut buf = BytesMut::from(&b"OL\r\nST,2.00 kg"[..]);
        assert_eq!(codec.decode_eof(&mut buf).unwrap(), Some("OL".to_string()));
        assert_eq!(codec.decode_eof(&mut buf).unwrap(), Some("ST,2.00 kg".to_string()));
        assert_eq!(codec.decode_eof(&mut buf).unwrap(), None);
    }
}
