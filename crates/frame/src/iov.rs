//! Resumable scatter/gather serialization of frames
//!
//! A frame is written as up to [`MAX_IOVECS`] contiguous segments:
//!
//! ```text
//! [header][payload][identity stack][sender]
//! ```
//!
//! [`Frame::descriptors`] exposes the remaining parts of these segments for a single
//! vectored write, and [`Frame::advance`] (or [`Frame::consume`]) records how much of
//! them the underlying writer accepted, so that the next call picks up where the
//! previous one stopped without copying or re-encoding anything.

use core::ops::Deref;

use std::io::IoSlice;

use tracing::trace;

use crate::{Frame, IdentStack, Sender, HEADER_LEN, IDENT_LEN};

/// Maximum number of descriptors a frame is written as.
pub const MAX_IOVECS: usize = 4;

/// Kind of a wire segment.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub(crate) enum Segment {
    #[default]
    Header,
    Payload,
    Stack,
    Sender,
}

#[derive(Clone, Copy, Debug, Default)]
struct Cursor {
    segment: Segment,
    /// Offset of the first unwritten byte within the segment
    start: usize,
    /// Unwritten bytes remaining
    len: usize,
}

/// Write progress of a frame. `set == 0` means no descriptors are built.
#[derive(Clone, Debug, Default)]
pub(crate) struct IoState {
    cursors: [Cursor; MAX_IOVECS],
    set: usize,
}

impl IoState {
    pub(crate) fn reset(&mut self) {
        self.set = 0;
    }

    /// Whether part, but not all, of the frame has been written.
    fn in_progress(&self) -> bool {
        let cursors = &self.cursors[..self.set];
        cursors.iter().any(|c| c.start > 0) && cursors.iter().any(|c| c.len > 0)
    }

    /// Discards descriptors ahead of a change to the wire image.
    ///
    /// # Panics
    ///
    /// Panics if the frame is partially written, since rebuilding would send the
    /// written bytes again.
    pub(crate) fn invalidate(&mut self) {
        assert!(
            !self.in_progress(),
            "frame modified while partially written, call `Frame::reset` first"
        );
        self.reset();
    }
}

/// Result of [`Frame::advance`]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Advance {
    /// Bytes actually consumed from the descriptor
    pub consumed: usize,
    /// Whether the last populated descriptor has been fully written
    pub done: bool,
}

/// Remaining descriptors of a frame, ready for a vectored write such as
/// [`std::io::Write::write_vectored`].
///
/// Dereferences to the populated descriptors only. Fully written descriptors stay in
/// place with zero length, so indices remain stable across [`Frame::advance`] calls.
#[derive(Clone, Copy, Debug)]
pub struct Iovecs<'a> {
    slices: [IoSlice<'a>; MAX_IOVECS],
    count: usize,
}

impl Iovecs<'_> {
    /// Total unwritten bytes.
    pub fn remaining(&self) -> usize {
        self.iter().map(|s| s.len()).sum()
    }

    /// Descriptors including the unused trailing slots, which are always empty.
    pub fn all(&self) -> &[IoSlice<'_>; MAX_IOVECS] {
        &self.slices
    }
}

impl<'a> Deref for Iovecs<'a> {
    type Target = [IoSlice<'a>];

    fn deref(&self) -> &Self::Target {
        &self.slices[..self.count]
    }
}

impl Frame {
    pub(crate) fn layout(&self) -> impl Iterator<Item = Segment> {
        let stack = self.stack.as_ref().is_some_and(|stack| !stack.is_empty());
        [Segment::Header, Segment::Payload]
            .into_iter()
            .chain(stack.then_some(Segment::Stack))
            .chain(self.push_sender.then_some(Segment::Sender))
    }

    /// Complete bytes of `segment`. The header segment is only valid once the
    /// descriptors are built.
    pub(crate) fn segment_bytes(&self, segment: Segment) -> &[u8] {
        match segment {
            Segment::Header => &self.header,
            Segment::Payload => self.data(),
            Segment::Stack => self.stack.as_ref().map_or(&[][..], IdentStack::as_bytes),
            Segment::Sender => self.sender.as_ref().map_or(&[][..], Sender::as_bytes),
        }
    }

    /// Number of populated descriptors, 0 if they are not built.
    pub fn iovecs_set(&self) -> usize {
        self.iov.set
    }

    /// Descriptors of the frame as it currently stands on the wire.
    ///
    /// The first call encodes the header and lays out 2 to 4 descriptors: header,
    /// payload, identity stack (if non-empty) and sender (if pushed). Subsequent calls
    /// return the same descriptors, reflecting any progress recorded by
    /// [`Frame::advance`], until [`Frame::reset`] is called.
    ///
    /// # Panics
    ///
    /// Panics if the header cannot be built, see [`Frame::header`].
    pub fn descriptors(&mut self) -> Iovecs<'_> {
        if self.iov.set == 0 {
            self.header = self.header().encode();
            let mut cursors = [Cursor::default(); MAX_IOVECS];
            let mut set = 0;
            for (cursor, segment) in cursors.iter_mut().zip(self.layout()) {
                let len = match segment {
                    Segment::Header => HEADER_LEN,
                    Segment::Sender => IDENT_LEN,
                    Segment::Payload | Segment::Stack => self.segment_bytes(segment).len(),
                };
                *cursor = Cursor {
                    segment,
                    start: 0,
                    len,
                };
                set += 1;
            }
            trace!(set, size = self.size, "built frame descriptors");
            self.iov = IoState { cursors, set };
        }
        let mut slices = [IoSlice::new(&[]); MAX_IOVECS];
        for (slice, Cursor { segment, start, len }) in
            slices.iter_mut().zip(&self.iov.cursors[..self.iov.set])
        {
            *slice = IoSlice::new(&self.segment_bytes(*segment)[*start..*start + *len]);
        }
        Iovecs {
            slices,
            count: self.iov.set,
        }
    }

    /// Records that `offset` bytes of descriptor `index` have been written.
    ///
    /// Writing the whole remainder (or more) empties the descriptor, completing the
    /// frame if it was the last populated one. The returned count is clamped to what
    /// the descriptor had left.
    ///
    /// # Panics
    ///
    /// Panics if descriptor `index` is not populated.
    pub fn advance(&mut self, index: usize, offset: usize) -> Advance {
        let set = self.iov.set;
        assert!(index < set, "descriptor `{index}` is not populated, {set} are set");
        let cursor = &mut self.iov.cursors[index];
        let adv = if offset >= cursor.len {
            let consumed = cursor.len;
            cursor.start += consumed;
            cursor.len = 0;
            Advance {
                consumed,
                done: index == set - 1,
            }
        } else {
            cursor.start += offset;
            cursor.len -= offset;
            Advance {
                consumed: offset,
                done: false,
            }
        };
        trace!(index, offset, ?adv, "advanced frame descriptor");
        adv
    }

    /// Records that `n` bytes were written from the start of the remaining descriptors,
    /// as reported by a vectored write.
    ///
    /// Returns `true` once the frame has been written completely.
    ///
    /// # Panics
    ///
    /// Panics if the descriptors are not built.
    pub fn consume(&mut self, mut n: usize) -> bool {
        assert!(self.iov.set > 0, "frame descriptors are not built");
        for index in 0..self.iov.set {
            let Advance { consumed, done } = self.advance(index, n);
            n -= consumed;
            if done {
                return true;
            }
            if n == 0 && self.iov.cursors[index].len > 0 {
                return false;
            }
        }
        false
    }

    /// Discards the descriptors, so the next [`Frame::descriptors`] call starts over.
    pub fn reset(&mut self) {
        self.iov.reset();
    }
}
