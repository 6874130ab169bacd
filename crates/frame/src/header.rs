use anyhow::{ensure, Context as _};

use crate::MAX_FRAME_SIZE;

/// Framing protocol version written into every header.
pub const PROTOCOL_VERSION: u8 = 1;

/// Encoded size of [`Header`].
pub const HEADER_LEN: usize = 8;

/// Fixed-size header preceding every frame on the wire.
///
/// ```text
/// ┌─────────┬──────┬───────────┬───────┬────────────────┐
/// │ version │ type │ num_ident │ flags │ frame_size     │
/// │ u8      │ u8   │ u8        │ u8    │ u32 big-endian │
/// └─────────┴──────┴───────────┴───────┴────────────────┘
/// ```
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Header {
    pub version: u8,
    /// Application-defined frame type
    pub kind: u8,
    /// Identity records following the payload, pushed sender included
    pub num_ident: u8,
    /// Reserved, always 0
    pub flags: u8,
    /// Payload length
    pub size: u32,
}

impl Header {
    #[must_use]
    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let [s0, s1, s2, s3] = self.size.to_be_bytes();
        [
            self.version,
            self.kind,
            self.num_ident,
            self.flags,
            s0,
            s1,
            s2,
            s3,
        ]
    }

    /// Parses a header from the start of `buf`, accepting payloads up to `max_size`.
    pub fn decode(buf: &[u8], max_size: u32) -> anyhow::Result<Self> {
        let buf: &[u8; HEADER_LEN] = buf
            .get(..HEADER_LEN)
            .and_then(|buf| buf.try_into().ok())
            .with_context(|| format!("header requires {HEADER_LEN} bytes, got {}", buf.len()))?;
        let [version, kind, num_ident, flags, s0, s1, s2, s3] = *buf;
        ensure!(
            version == PROTOCOL_VERSION,
            "unsupported protocol version `{version}`"
        );
        let size = u32::from_be_bytes([s0, s1, s2, s3]);
        ensure!(
            size <= max_size && size < MAX_FRAME_SIZE,
            "frame size of `{size}` exceeds maximum of `{}`",
            max_size.min(MAX_FRAME_SIZE - 1)
        );
        Ok(Self {
            version,
            kind,
            num_ident,
            flags,
            size,
        })
    }

    /// Bytes following the header on the wire.
    #[must_use]
    pub fn body_len(&self) -> usize {
        self.size as usize + usize::from(self.num_ident) * crate::IDENT_LEN
    }
}
