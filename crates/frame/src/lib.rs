//! Frames: the unit of transfer between hopwire sockets.
//!
//! A [`Frame`] wraps an opaque payload together with the envelope of socket
//! identities it has been routed through. All byte storage is held in
//! [`CountedBuffer`]s, shared between frames wherever the contents are identical, and
//! frames are serialized with vectored writes directly from that storage.

mod buffer;
#[cfg(feature = "codec")]
mod codec;
mod frame;
mod header;
mod ident;
pub mod iov;
mod key;

pub use buffer::CountedBuffer;
#[cfg(feature = "codec")]
pub use codec::{Decoder as FrameDecoder, Encoder as FrameEncoder};
pub use frame::{Frame, MAX_FRAME_SIZE};
pub use header::{Header, HEADER_LEN, PROTOCOL_VERSION};
pub use ident::{Ident, IdentStack, Sender, IDENT_LEN};
pub use iov::{Advance, Iovecs, MAX_IOVECS};
pub use key::{Key, MAX_KEY_LEN};
