//! Newline-delimited JSON framing.
//!
//! One UTF-8 JSON object per line. Per-frame problems (bad JSON, bad UTF-8,
//! overlong line) come out of the decoder as items, so a `Framed` stream keeps going
//! after them; only I/O failure ends the stream.

use std::io;
use std::marker::PhantomData;

use bytes::BytesMut;
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder, LinesCodec, LinesCodecError};

/// 1 MiB.
pub const DEFAULT_MAX_FRAME_BYTES: usize = 1024 * 1024;

/// A single bad frame. The connection survives it.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("malformed frame: {0}")]
    Malformed(#[source] serde_json::Error),

    #[error("frame is not valid UTF-8")]
    InvalidUtf8,

    #[error("frame exceeds the maximum length")]
    Oversized,
}

/// The byte stream itself failed. The connection is over.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("failed to encode frame: {0}")]
    Encode(#[from] serde_json::Error),
}

impl From<LinesCodecError> for TransportError {
    fn from(e: LinesCodecError) -> Self {
        match e {
            LinesCodecError::Io(e) => Self::Io(e),
            LinesCodecError::MaxLineLengthExceeded => {
                Self::Io(io::Error::new(io::ErrorKind::InvalidData, e))
            }
        }
    }
}

/// Decodes lines into `T`; encodes anything `Serialize` as one line.
pub struct WireCodec<T> {
    lines: LinesCodec,
    _frame: PhantomData<fn() -> T>,
}

impl<T> WireCodec<T> {
    pub fn new(max_frame_bytes: usize) -> Self {
        Self {
            lines: LinesCodec::new_with_max_length(max_frame_bytes),
            _frame: PhantomData,
        }
    }

    pub fn max_frame_bytes(&self) -> usize {
        self.lines.max_length()
    }
}

impl<T> Default for WireCodec<T> {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_BYTES)
    }
}

impl<T: DeserializeOwned> WireCodec<T> {
    fn frame(
        line: Result<Option<String>, LinesCodecError>,
    ) -> Result<Option<Result<T, FrameError>>, TransportError> {
        match line {
            Ok(Some(line)) => Ok(Some(
                serde_json::from_str(&line).map_err(FrameError::Malformed),
            )),
            Ok(None) => Ok(None),
            // LinesCodec discards the rest of the line on its own.
            Err(LinesCodecError::MaxLineLengthExceeded) => Ok(Some(Err(FrameError::Oversized))),
            // The offending line is already split off the buffer.
            Err(LinesCodecError::Io(e)) if e.kind() == io::ErrorKind::InvalidData => {
                Ok(Some(Err(FrameError::InvalidUtf8)))
            }
            Err(LinesCodecError::Io(e)) => Err(e.into()),
        }
    }
}

impl<T: DeserializeOwned> Decoder for WireCodec<T> {
    type Item = Result<T, FrameError>;
    type Error = TransportError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            match self.lines.decode(src) {
                // Blank keep-alive lines
                Ok(Some(line)) if line.trim().is_empty() => continue,
                other => return Self::frame(other),
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            match self.lines.decode_eof(src) {
                Ok(Some(line)) if line.trim().is_empty() => continue,
                other => return Self::frame(other),
            }
        }
    }
}

impl<T, U: Serialize> Encoder<U> for WireCodec<T> {
    type Error = TransportError;

    fn encode(&mut self, item: U, dst: &mut BytesMut) -> Result<(), Self::Error> {
        // Compact serde_json output never contains a raw newline.
        let line = serde_json::to_string(&item)?;
        self.lines.encode(line, dst)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_types::wire::{WireRequest, WireResponse};

    fn codec() -> WireCodec<WireRequest> {
        WireCodec::new(64)
    }

    #[test]
    fn partial_frames_wait_for_newline() {
        let mut codec = codec();
        let mut buf = BytesMut::from(&b"{\"action\":\"lo"[..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(b"gin\"}\n");
        let req = codec.decode(&mut buf).unwrap().unwrap().unwrap();
        assert_eq!(req.action, "login");
    }

    #[test]
    fn coalesced_frames_split_cleanly() {
        let mut codec = codec();
        let mut buf = BytesMut::from(&b"{\"action\":\"a\"}\n\n{\"action\":\"b\"}\n"[..]);
        let first = codec.decode(&mut buf).unwrap().unwrap().unwrap();
        let second = codec.decode(&mut buf).unwrap().unwrap().unwrap();
        assert_eq!((first.action.as_str(), second.action.as_str()), ("a", "b"));
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn malformed_frame_does_not_poison_the_codec() {
        let mut codec = codec();
        let mut buf = BytesMut::from(&b"not json\n{\"action\":\"ok\"}\n"[..]);
        assert!(matches!(
            codec.decode(&mut buf).unwrap().unwrap(),
            Err(FrameError::Malformed(_))
        ));
        assert_eq!(codec.decode(&mut buf).unwrap().unwrap().unwrap().action, "ok");
    }

    #[test]
    fn invalid_utf8_is_a_frame_error() {
        let mut codec = codec();
        let mut buf = BytesMut::new();
        buf.extend_from_slice(b"{\"action\":\"\xff\xfe\"}\n");
        buf.extend_from_slice(b"{\"action\":\"ok\"}\n");
        assert!(matches!(
            codec.decode(&mut buf).unwrap().unwrap(),
            Err(FrameError::InvalidUtf8)
        ));
        assert_eq!(codec.decode(&mut buf).unwrap().unwrap().unwrap().action, "ok");
    }

    #[test]
    fn wrong_shape_is_malformed() {
        let mut codec = codec();
        let mut buf = BytesMut::from(&b"[1,2,3]\n"[..]);
        assert!(matches!(
            codec.decode(&mut buf).unwrap().unwrap(),
            Err(FrameError::Malformed(_))
        ));
    }

    #[test]
    fn oversized_frame_is_discarded() {
        let mut codec = codec();
        assert_eq!(codec.max_frame_bytes(), 64);
        let mut buf = BytesMut::new();
        buf.extend_from_slice(format!("{{\"action\":\"{}\"}}\n", "x".repeat(200)).as_bytes());
        buf.extend_from_slice(b"{\"action\":\"next\"}\n");

        assert!(matches!(
            codec.decode(&mut buf).unwrap().unwrap(),
            Err(FrameError::Oversized)
        ));
        let next = loop {
            if let Some(frame) = codec.decode(&mut buf).unwrap() {
                break frame.unwrap();
            }
        };
        assert_eq!(next.action, "next");
    }

    #[test]
    fn trailing_frame_without_newline_at_eof() {
        let mut codec = codec();
        let mut buf = BytesMut::from(&b"{\"action\":\"last\"}"[..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        let req = codec.decode_eof(&mut buf).unwrap().unwrap().unwrap();
        assert_eq!(req.action, "last");
    }

    #[test]
    fn encodes_one_line_per_frame() {
        let mut codec = codec();
        let mut buf = BytesMut::new();
        let response = WireResponse::failure(&parley_types::error::ActionError::UnknownAction);
        codec.encode(&response, &mut buf).unwrap();
        assert_eq!(
            &buf[..],
            &b"{\"success\":false,\"error\":\"Unknown action\"}\n"[..]
        );
    }
}
