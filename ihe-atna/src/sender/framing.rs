//! RFC 5425 octet-counting framing for stream transports
//!
//! Each frame is `MSG-LEN SP MSG`, where `MSG-LEN` is the payload length in
//! ASCII decimal with no leading zero. The same codec is used by the sender
//! and by anything reading the stream back.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::io;
use tokio_util::codec::{Decoder, Encoder};

/// Upper bound on a single frame accepted by the decoder
pub const DEFAULT_MAX_FRAME_LENGTH: usize = 8 * 1024 * 1024;

// usize::MAX has 20 decimal digits; anything longer is garbage
const MAX_LENGTH_DIGITS: usize = 20;

#[derive(Debug, Clone)]
pub struct OctetCountingCodec {
    max_frame_length: usize,
    pending: Option<usize>,
}

impl OctetCountingCodec {
    pub fn new() -> Self {
        Self::with_max_length(DEFAULT_MAX_FRAME_LENGTH)
    }

    pub fn with_max_length(max_frame_length: usize) -> Self {
        Self {
            max_frame_length,
            pending: None,
        }
    }

    pub fn max_frame_length(&self) -> usize {
        self.max_frame_length
    }

    fn decode_header(&self, src: &mut BytesMut) -> io::Result<Option<usize>> {
        let Some(space) = src.iter().take(MAX_LENGTH_DIGITS + 1).position(|b| *b == b' ') else {
            if src.len() > MAX_LENGTH_DIGITS {
                return Err(invalid("frame length prefix too long"));
            }
            if let Some(bad) = src.iter().find(|b| !b.is_ascii_digit()) {
                return Err(invalid(&format!("unexpected byte 0x{:02x} in frame length", bad)));
            }
            return Ok(None);
        };

        let digits = &src[..space];
        if digits.is_empty() || !digits.iter().all(u8::is_ascii_digit) || digits[0] == b'0' {
            return Err(invalid("malformed frame length"));
        }

        let len = std::str::from_utf8(digits)
            .ok()
            .and_then(|s| s.parse::<usize>().ok())
            .ok_or_else(|| invalid("frame length out of range"))?;
        if len > self.max_frame_length {
            return Err(invalid(&format!(
                "frame of {} bytes exceeds limit of {}",
                len, self.max_frame_length
            )));
        }

        src.advance(space + 1);
        Ok(Some(len))
    }
}

impl Default for OctetCountingCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for OctetCountingCodec {
    type Item = Bytes;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> io::Result<Option<Bytes>> {
        let len = match self.pending {
            Some(len) => len,
            None => match self.decode_header(src)? {
                Some(len) => {
                    self.pending = Some(len);
                    len
                }
                None => return Ok(None),
            },
        };

        if src.len() < len {
            src.reserve(len - src.len());
            return Ok(None);
        }

        self.pending = None;
        Ok(Some(src.split_to(len).freeze()))
    }
}

impl Encoder<Bytes> for OctetCountingCodec {
    type Error = io::Error;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> io::Result<()> {
        if item.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "empty frames cannot be octet-counted",
            ));
        }
        let header = format!("{} ", item.len());
        dst.reserve(header.len() + item.len());
        dst.put_slice(header.as_bytes());
        dst.put(item);
        Ok(())
    }
}

fn invalid(msg: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(payload: &'static [u8]) -> BytesMut {
        let mut dst = BytesMut::new();
        OctetCountingCodec::new()
            .encode(Bytes::from_static(payload), &mut dst)
            .unwrap();
        dst
    }

    #[test]
    fn test_encode_prefix() {
        assert_eq!(&encode(b"<AuditMessage/>")[..], b"15 <AuditMessage/>");
    }

    #[test]
    fn test_decode_across_partial_reads() {
        let mut codec = OctetCountingCodec::new();
        let mut buf = BytesMut::new();

        buf.extend_from_slice(b"1");
        assert!(codec.decode(&mut buf).unwrap().is_none());
        buf.extend_from_slice(b"1 hello");
        assert!(codec.decode(&mut buf).unwrap().is_none());
        buf.extend_from_slice(b" world3 abc");
        assert_eq!(codec.decode(&mut buf).unwrap().unwrap(), "hello world");
        assert_eq!(codec.decode(&mut buf).unwrap().unwrap(), "abc");
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_payload_may_contain_spaces_and_digits() {
        let mut codec = OctetCountingCodec::new();
        let mut buf = encode(b"12 34 <x/>");
        assert_eq!(codec.decode(&mut buf).unwrap().unwrap(), "12 34 <x/>");
    }

    #[test]
    fn test_rejects_malformed_headers() {
        for bad in [&b"abc def"[..], &b"012 x"[..], &b" 3 abc"[..], &b"1x"[..]] {
            let mut buf = BytesMut::from(bad);
            assert_eq!(
                OctetCountingCodec::new().decode(&mut buf).unwrap_err().kind(),
                io::ErrorKind::InvalidData,
                "input {:?}",
                bad
            );
        }
    }

    #[test]
    fn test_rejects_oversized_frame() {
        let mut buf = BytesMut::from(&b"100 "[..]);
        let err = OctetCountingCodec::with_max_length(10)
            .decode(&mut buf)
            .unwrap_err();
        assert!(err.to_string().contains("exceeds limit"));
    }

    #[test]
    fn test_empty_frame_rejected() {
        let mut dst = BytesMut::new();
        assert!(OctetCountingCodec::new()
            .encode(Bytes::new(), &mut dst)
            .is_err());
    }
}
