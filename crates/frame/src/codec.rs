use bytes::{Buf as _, BytesMut};
use tracing::{instrument, trace};

use crate::{CountedBuffer, Frame, Header, HEADER_LEN, MAX_FRAME_SIZE};

/// Decodes frames from a byte stream.
///
/// The payload and identity records of each decoded frame share a single
/// [`CountedBuffer`]. Decoded frames carry no sender.
pub struct Decoder {
    header: Option<Header>,
    max_size: u32,
}

impl Decoder {
    /// Decoder rejecting payloads larger than `max_size`.
    #[must_use]
    pub fn new(max_size: u32) -> Self {
        Self {
            header: None,
            max_size,
        }
    }
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new(MAX_FRAME_SIZE - 1)
    }
}

impl tokio_util::codec::Decoder for Decoder {
    type Item = Frame;
    type Error = std::io::Error;

    #[instrument(level = "trace", skip_all)]
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let header = if let Some(header) = self.header.take() {
            header
        } else {
            if src.len() < HEADER_LEN {
                src.reserve(HEADER_LEN - src.len());
                return Ok(None);
            }
            let header = Header::decode(src, self.max_size).map_err(|err| {
                std::io::Error::new(std::io::ErrorKind::InvalidData, format!("{err:#}"))
            })?;
            trace!(?header, "decoded frame header");
            src.advance(HEADER_LEN);
            header
        };
        let n = header.body_len();
        if src.len() < n {
            src.reserve(n - src.len());
            self.header = Some(header);
            return Ok(None);
        }
        trace!(n, "decoding frame body");
        let buf = CountedBuffer::from(src.split_to(n).freeze());
        let size = header.size as usize;
        let mut frame = Frame::with_buffer(buf.clone(), 0..size);
        frame.set_kind(header.kind);
        if header.num_ident > 0 {
            frame.set_stack(&buf, size, header.num_ident);
        }
        Ok(Some(frame))
    }
}

/// Encodes frames by copying their wire segments.
///
/// Writers able to issue vectored writes should prefer [`Frame::descriptors`], which
/// avoids the copy.
pub struct Encoder;

impl tokio_util::codec::Encoder<&Frame> for Encoder {
    type Error = std::io::Error;

    #[instrument(level = "trace", skip_all)]
    fn encode(&mut self, frame: &Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let header = frame.header();
        trace!(?header, "encoding frame");
        dst.reserve(HEADER_LEN + header.body_len());
        dst.extend_from_slice(&header.encode());
        for segment in frame.layout().skip(1) {
            dst.extend_from_slice(frame.segment_bytes(segment));
        }
        Ok(())
    }
}
