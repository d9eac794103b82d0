// Copyright (C) 2025 The loom authors. This program is free software: you can
// redistribute it and/or modify it under the terms of the GNU General Public
// License as published by the Free Software Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

//! Line codec with a per-session text encoding. The engine only ever sees
//! Rust strings; whatever the client speaks (utf-8, latin-1, ...) is decoded
//! and re-encoded here at the socket boundary. ANSI sequences pass through
//! untouched.

use std::io;

use encoding_rs::Encoding;
use tokio_util::bytes::{BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

pub struct EncodedLinesCodec {
    encoding: &'static Encoding,
    next_index: usize,
}

impl EncodedLinesCodec {
    /// `label` is a WHATWG encoding label from the session record; unknown
    /// labels fall back to utf-8.
    pub fn for_label(label: &str) -> Self {
        let encoding =
            Encoding::for_label(label.as_bytes()).unwrap_or(encoding_rs::UTF_8);
        Self {
            encoding,
            next_index: 0,
        }
    }
}

impl Decoder for EncodedLinesCodec {
    type Item = String;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<String>, io::Error> {
        let Some(offset) = src[self.next_index..].iter().position(|&b| b == b'\n') else {
            self.next_index = src.len();
            return Ok(None);
        };
        let newline_index = self.next_index + offset;
        self.next_index = 0;
        let mut line = src.split_to(newline_index + 1);
        line.truncate(line.len() - 1);
        if line.last() == Some(&b'\r') {
            line.truncate(line.len() - 1);
        }
        let (decoded, _, _) = self.encoding.decode(&line);
        Ok(Some(decoded.into_owned()))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<String>, io::Error> {
        if let Some(line) = self.decode(src)? {
            return Ok(Some(line));
        }
        if src.is_empty() {
            return Ok(None);
        }
        // Trailing bytes with no newline still count as a final line at EOF.
        let line = src.split_to(src.len());
        self.next_index = 0;
        let (decoded, _, _) = self.encoding.decode(&line);
        Ok(Some(decoded.into_owned()))
    }
}

impl Encoder<String> for EncodedLinesCodec {
    type Error = io::Error;

    fn encode(&mut self, item: String, dst: &mut BytesMut) -> Result<(), io::Error> {
        let (encoded, _, _) = self.encoding.encode(&item);
        dst.reserve(encoded.len() + 2);
        dst.put_slice(&encoded);
        dst.put_slice(b"\r\n");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_decodes_crlf_lines() {
        let mut codec = EncodedLinesCodec::for_label("utf-8");
        let mut buf = BytesMut::from(&b"look\r\nsay hi\npartial"[..]);
        assert_eq!(codec.decode(&mut buf).unwrap(), Some("look".to_string()));
        assert_eq!(codec.decode(&mut buf).unwrap(), Some("say hi".to_string()));
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
        assert_eq!(
            codec.decode_eof(&mut buf).unwrap(),
            Some("partial".to_string())
        );
    }

    #[test]
    fn test_latin1_round_trip() {
        let mut codec = EncodedLinesCodec::for_label("iso-8859-1");
        let mut buf = BytesMut::from(&[0xe9, b'\n'][..]);
        assert_eq!(codec.decode(&mut buf).unwrap(), Some("\u{e9}".to_string()));

        let mut out = BytesMut::new();
        codec.encode("\u{e9}".to_string(), &mut out).unwrap();
        assert_eq!(&out[..], &[0xe9, b'\r', b'\n']);
    }

    #[test]
    fn test_unknown_label_falls_back_to_utf8() {
        let mut codec = EncodedLinesCodec::for_label("klingon");
        let mut buf = BytesMut::from(&"caf\u{e9}\n".as_bytes()[..]);
        assert_eq!(codec.decode(&mut buf).unwrap(), Some("caf\u{e9}".to_string()));
    }
}
