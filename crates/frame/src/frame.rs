use core::fmt;
use core::ops::Range;

use bytes::Bytes;
use tracing::{instrument, trace};

use crate::iov::IoState;
use crate::{
    CountedBuffer, Header, Ident, IdentStack, Sender, HEADER_LEN, IDENT_LEN, PROTOCOL_VERSION,
};

/// Exclusive upper bound of a frame payload size.
pub const MAX_FRAME_SIZE: u32 = 1 << 26;

fn checked_size(n: usize) -> u32 {
    assert!(
        n < MAX_FRAME_SIZE as usize,
        "frame size of `{n}` exceeds maximum of `{}`",
        MAX_FRAME_SIZE - 1
    );
    n as u32
}

/// Unit of transfer between sockets.
///
/// A frame holds exactly one reference into each buffer it touches: the payload, the
/// identity stack (if any) and the sender identity (if any). Dropping the frame gives
/// those references back. Frames destined for several peers are duplicated with
/// [`Frame::copy_partial`], which shares all buffers while tracking write progress
/// separately.
pub struct Frame {
    pub(crate) buffer: CountedBuffer,
    pub(crate) offset: usize,
    pub(crate) size: u32,
    pub(crate) kind: u8,
    pub(crate) stack: Option<IdentStack>,
    pub(crate) sender: Option<Sender>,
    pub(crate) push_sender: bool,
    pub(crate) header: [u8; HEADER_LEN],
    pub(crate) iov: IoState,
}

impl Frame {
    /// Takes ownership of `data`, which is passed to `release` once the last frame
    /// (or other holder) referencing it is dropped.
    ///
    /// # Panics
    ///
    /// Panics if `data` is not shorter than [`MAX_FRAME_SIZE`].
    pub fn new<T, F>(data: T, release: F) -> Self
    where
        T: AsRef<[u8]> + Send + Sync + 'static,
        F: FnOnce(T) + Send + 'static,
    {
        checked_size(data.as_ref().len());
        let buffer = CountedBuffer::new(data, release);
        let n = buffer.len();
        Self::with_buffer(buffer, 0..n)
    }

    /// Frame over `range` of an existing `buffer`, allowing several frames (or a
    /// frame and its identity stack) to share one allocation.
    ///
    /// # Panics
    ///
    /// Panics if `range` lies outside of `buffer` or is not shorter than [`MAX_FRAME_SIZE`].
    pub fn with_buffer(buffer: CountedBuffer, range: Range<usize>) -> Self {
        assert!(
            range.start <= range.end && range.end <= buffer.len(),
            "payload range {range:?} exceeds buffer of length {}",
            buffer.len()
        );
        let size = checked_size(range.len());
        Self {
            buffer,
            offset: range.start,
            size,
            kind: 0,
            stack: None,
            sender: None,
            push_sender: false,
            header: [0; HEADER_LEN],
            iov: IoState::default(),
        }
    }

    /// Copies `data` into storage owned by the frame.
    ///
    /// # Panics
    ///
    /// Panics if `data` is not shorter than [`MAX_FRAME_SIZE`].
    pub fn copy_from_slice(data: &[u8]) -> Self {
        checked_size(data.len());
        Self::from_vec(data.to_vec())
    }

    pub fn from_vec(data: Vec<u8>) -> Self {
        Self::new(data, drop)
    }

    /// Duplicates the frame, sharing the payload, identity stack and sender buffers.
    ///
    /// The copy starts with no descriptors built, so its write progress is independent
    /// of `self`.
    #[must_use]
    pub fn copy_partial(&self) -> Self {
        assert!(self.size < MAX_FRAME_SIZE);
        Self {
            buffer: self.buffer.clone(),
            offset: self.offset,
            size: self.size,
            kind: self.kind,
            stack: self.stack.clone(),
            sender: self.sender.clone(),
            push_sender: self.push_sender,
            header: [0; HEADER_LEN],
            iov: IoState::default(),
        }
    }

    /// Like [`Frame::copy_partial`], but the copy resumes from the write progress
    /// of `self`.
    #[must_use]
    pub fn copy_partial_resumed(&self) -> Self {
        let mut copy = self.copy_partial();
        copy.header = self.header;
        copy.iov = self.iov.clone();
        copy
    }

    /// Payload bytes
    pub fn data(&self) -> &[u8] {
        self.buffer.slice(self.offset..self.offset + self.size as usize)
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    /// Buffer backing the payload
    pub fn buffer(&self) -> &CountedBuffer {
        &self.buffer
    }

    /// Application-defined frame type
    pub fn kind(&self) -> u8 {
        self.kind
    }

    pub fn set_kind(&mut self, kind: u8) {
        self.iov.invalidate();
        self.kind = kind;
    }

    pub fn stack(&self) -> Option<&IdentStack> {
        self.stack.as_ref()
    }

    /// Number of identity records in the stack, not counting a pushed sender.
    pub fn num_ident(&self) -> u8 {
        self.stack.as_ref().map_or(0, IdentStack::count)
    }

    /// Identity records in wire order: the stack, oldest first, followed by the
    /// sender if it is pushed.
    pub fn idents(&self) -> impl Iterator<Item = Ident> + '_ {
        self.stack
            .iter()
            .flat_map(|stack| stack.iter())
            .chain(
                self.sender
                    .as_ref()
                    .filter(|_| self.push_sender)
                    .map(Sender::ident),
            )
    }

    /// Attaches `count` identity records starting at `offset` within `buf`.
    ///
    /// The records are referenced, not copied.
    pub fn set_stack(&mut self, buf: &CountedBuffer, offset: usize, count: u8) {
        self.iov.invalidate();
        self.stack = Some(IdentStack::new(buf, offset, count));
    }

    /// Makes `to` share the identity stack of `self`.
    ///
    /// Both frames reference the same storage afterwards. Nothing happens if `self`
    /// carries no stack or `to` already shares it.
    #[instrument(level = "trace", skip_all)]
    pub fn clone_stack(&self, to: &mut Frame) {
        let Some(stack) = &self.stack else {
            return;
        };
        if to
            .stack
            .as_ref()
            .is_some_and(|current| current.same_storage(stack))
        {
            trace!("identity stack already shared");
            return;
        }
        trace!(count = stack.count(), "sharing identity stack");
        to.iov.invalidate();
        to.stack = Some(stack.clone());
    }

    /// Replaces the identity stack of `to` with a fresh copy of the stack of `self`,
    /// followed by the sender of `self` if it has one.
    ///
    /// Storage referenced by `self` is never written, so other frames sharing it keep
    /// observing the shorter stack.
    ///
    /// # Panics
    ///
    /// Panics if the resulting stack exceeds [`u8::MAX`] records.
    #[instrument(level = "trace", skip_all)]
    pub fn extend_stack(&self, to: &mut Frame) {
        to.iov.invalidate();
        to.stack = None;

        let records = self.stack.as_ref().map_or(&[][..], IdentStack::as_bytes);
        let sender = self.sender.as_ref().map(Sender::as_bytes);
        let count = usize::from(self.num_ident()) + usize::from(sender.is_some());
        assert!(
            count <= usize::from(u8::MAX),
            "identity stack of {count} records does not fit the header"
        );
        trace!(count, "extending identity stack");
        if count == 0 {
            return;
        }
        let mut data = Vec::with_capacity(count * IDENT_LEN);
        data.extend_from_slice(records);
        if let Some(sender) = sender {
            data.extend_from_slice(sender);
        }
        to.stack = Some(IdentStack::new(
            &CountedBuffer::from_vec(data),
            0,
            count as u8,
        ));
    }

    /// Drops the newest identity record, returning it.
    ///
    /// Only this frame's view shrinks; the records remain intact for every other
    /// holder of the storage.
    pub fn stack_pop(&mut self) -> Option<Ident> {
        self.stack.as_ref()?;
        self.iov.invalidate();
        let stack = self.stack.as_mut()?;
        let ident = stack.truncate_last();
        if stack.is_empty() {
            self.stack = None;
        }
        ident
    }

    pub fn sender(&self) -> Option<&Sender> {
        self.sender.as_ref()
    }

    /// Replaces the sender identity, releasing the previous one.
    pub fn set_sender(&mut self, sender: Option<Sender>) {
        self.iov.invalidate();
        self.sender = sender;
    }

    /// Whether the sender identity is appended to the stack on the wire.
    pub fn push_sender(&self) -> bool {
        self.push_sender
    }

    pub fn set_push_sender(&mut self, push: bool) {
        self.iov.invalidate();
        self.push_sender = push;
    }

    /// Appends the sender identity on the wire.
    pub fn stack_push_sender(&mut self) {
        self.set_push_sender(true);
    }

    /// Releases the payload, leaving an empty frame which keeps its identities.
    pub fn clear(&mut self) {
        self.iov.invalidate();
        self.buffer = CountedBuffer::empty();
        self.offset = 0;
        self.size = 0;
    }

    /// Header describing the frame as it currently stands.
    ///
    /// # Panics
    ///
    /// Panics if the sender is pushed without one being set, or if the stack and the
    /// pushed sender exceed [`u8::MAX`] records.
    pub fn header(&self) -> Header {
        let num_ident = if self.push_sender {
            assert!(self.sender.is_some(), "pushed sender identity is not set");
            assert!(
                self.num_ident() < u8::MAX,
                "identity stack of 256 records does not fit the header"
            );
            self.num_ident() + 1
        } else {
            self.num_ident()
        };
        Header {
            version: PROTOCOL_VERSION,
            kind: self.kind,
            num_ident,
            flags: 0,
            size: self.size,
        }
    }
}

impl From<Bytes> for Frame {
    fn from(data: Bytes) -> Self {
        Self::new(data, drop)
    }
}

impl From<Vec<u8>> for Frame {
    fn from(data: Vec<u8>) -> Self {
        Self::from_vec(data)
    }
}

impl Drop for Frame {
    fn drop(&mut self) {
        trace!(
            size = self.size,
            refs = self.buffer.ref_count(),
            "dropping frame"
        );
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("kind", &self.kind)
            .field("size", &self.size)
            .field("stack", &self.stack.as_ref().map(IdentStack::len))
            .field("sender", &self.sender.as_ref().map(Sender::ident))
            .field("push_sender", &self.push_sender)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;

    fn tracked(data: &[u8]) -> (Frame, Arc<AtomicUsize>) {
        let released = Arc::new(AtomicUsize::new(0));
        let frame = Frame::new(data.to_vec(), {
            let released = Arc::clone(&released);
            move |_| {
                released.fetch_add(1, Ordering::SeqCst);
            }
        });
        (frame, released)
    }

    fn stacked(idents: &[Ident]) -> Frame {
        let mut frame = Frame::copy_from_slice(b"payload");
        let stack = IdentStack::from_idents(idents);
        frame.set_stack(stack.buffer(), 0, stack.count());
        frame
    }

    #[test_log::test]
    fn new_releases_on_drop() {
        let (frame, released) = tracked(b"hello");
        assert_eq!(frame.data(), b"hello");
        assert_eq!(frame.size(), 5);
        assert_eq!(frame.buffer().ref_count(), 1);
        drop(frame);
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[test_log::test]
    fn frames_share_a_buffer() {
        let buf = CountedBuffer::copy_from_slice(b"headpayloadtail");
        let a = Frame::with_buffer(buf.clone(), 4..11);
        let b = Frame::with_buffer(buf.clone(), 0..4);
        assert_eq!(a.data(), b"payload");
        assert_eq!(b.data(), b"head");
        assert_eq!(buf.ref_count(), 3);
        drop(a);
        drop(b);
        assert_eq!(buf.ref_count(), 1);
    }

    #[test_log::test]
    #[should_panic(expected = "exceeds maximum")]
    fn oversized_payload() {
        let _ = Frame::from_vec(vec![0; MAX_FRAME_SIZE as usize]);
    }

    #[test_log::test]
    fn copy_partial_outlives_original() {
        let (mut frame, released) = tracked(b"shared payload");
        frame.set_sender(Some(Sender::from(Ident::random())));
        let stack = IdentStack::from_idents(&[Ident::random()]);
        frame.set_stack(stack.buffer(), 0, 1);
        drop(stack);
        frame.set_kind(3);

        let copy = frame.copy_partial();
        assert_eq!(frame.buffer().ref_count(), 2);
        assert_eq!(frame.stack().unwrap().buffer().ref_count(), 2);
        assert_eq!(frame.sender().unwrap().buffer().ref_count(), 2);

        drop(frame);
        assert_eq!(released.load(Ordering::SeqCst), 0);
        assert_eq!(copy.data(), b"shared payload");
        assert_eq!(copy.kind(), 3);
        assert_eq!(copy.buffer().ref_count(), 1);
        assert_eq!(copy.stack().unwrap().buffer().ref_count(), 1);

        let copy = std::thread::spawn(move || {
            assert_eq!(copy.data(), b"shared payload");
            copy
        })
        .join()
        .unwrap();
        drop(copy);
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[test_log::test]
    fn clone_stack_shares_storage() {
        let idents = [Ident::random(), Ident::random()];
        let from = stacked(&idents);
        let mut to = stacked(&[Ident::random()]);
        let old = to.stack().unwrap().buffer().clone();
        assert_eq!(old.ref_count(), 2);

        from.clone_stack(&mut to);
        assert_eq!(old.ref_count(), 1);
        let (a, b) = (from.stack().unwrap(), to.stack().unwrap());
        assert!(a.same_storage(b));
        assert!(a.buffer().ptr_eq(b.buffer()));
        assert_eq!(a.buffer().ref_count(), 2);
        assert_eq!(to.idents().collect::<Vec<_>>(), idents);

        // sharing again takes no extra reference
        from.clone_stack(&mut to);
        assert_eq!(from.stack().unwrap().buffer().ref_count(), 2);
    }

    #[test_log::test]
    fn clone_stack_without_stack_is_noop() {
        let from = Frame::copy_from_slice(b"");
        let idents = [Ident::random()];
        let mut to = stacked(&idents);
        from.clone_stack(&mut to);
        assert_eq!(to.idents().collect::<Vec<_>>(), idents);
    }

    #[test_log::test]
    fn extend_stack_copies() {
        let idents = [Ident::random(), Ident::random()];
        let hop = Ident::random();
        let mut from = stacked(&idents);
        from.set_sender(Some(Sender::from(hop)));
        let original = from.stack().unwrap().clone();

        let mut to = Frame::copy_from_slice(b"reply");
        from.extend_stack(&mut to);

        let stack = to.stack().unwrap();
        assert_eq!(usize::from(to.num_ident()), idents.len() + 1);
        assert_eq!(stack.iter().collect::<Vec<_>>(), [idents[0], idents[1], hop]);
        assert!(!stack.buffer().ptr_eq(original.buffer()));
        assert_eq!(stack.buffer().ref_count(), 1);
        // source records are untouched and still referenced only by `from` and `original`
        assert_eq!(original.iter().collect::<Vec<_>>(), idents);
        assert_eq!(original.buffer().ref_count(), 2);
        assert_eq!(from.num_ident(), 2);
    }

    #[test_log::test]
    fn extend_stack_replaces_previous() {
        let from = stacked(&[Ident::random()]);
        let mut to = stacked(&[Ident::random(), Ident::random()]);
        let old = to.stack().unwrap().buffer().clone();
        from.extend_stack(&mut to);
        assert_eq!(old.ref_count(), 1);
        assert_eq!(to.num_ident(), 1);

        let bare = Frame::copy_from_slice(b"");
        bare.extend_stack(&mut to);
        assert!(to.stack().is_none());
        assert_eq!(to.num_ident(), 0);
    }

    #[test_log::test]
    fn stack_pop_keeps_shared_records() {
        let idents = [Ident::random(), Ident::random()];
        let mut a = stacked(&idents);
        let mut b = a.copy_partial();

        assert_eq!(b.stack_pop(), Some(idents[1]));
        assert_eq!(b.idents().collect::<Vec<_>>(), [idents[0]]);
        assert_eq!(a.idents().collect::<Vec<_>>(), idents);

        assert_eq!(b.stack_pop(), Some(idents[0]));
        assert!(b.stack().is_none());
        assert_eq!(b.stack_pop(), None);
        assert_eq!(a.stack().unwrap().buffer().ref_count(), 1);
        assert_eq!(a.stack_pop(), Some(idents[1]));
    }

    #[test_log::test]
    fn set_sender_releases_previous() {
        let mut frame = Frame::copy_from_slice(b"x");
        let first = Sender::from(Ident::random());
        let buf = first.buffer().clone();
        frame.set_sender(Some(first));
        assert_eq!(buf.ref_count(), 2);

        let ident = Ident::random();
        let shared = CountedBuffer::copy_from_slice(ident.as_bytes());
        frame.set_sender(Some(Sender::new(&shared, 0)));
        assert_eq!(buf.ref_count(), 1);
        assert_eq!(shared.ref_count(), 2);
        assert_eq!(frame.sender().map(Sender::ident), Some(ident));

        frame.set_sender(None);
        assert_eq!(shared.ref_count(), 1);
    }

    #[test_log::test]
    fn clear_releases_payload() {
        let (mut frame, released) = tracked(b"consumed");
        let idents = [Ident::random()];
        let stack = IdentStack::from_idents(&idents);
        frame.set_stack(stack.buffer(), 0, 1);
        frame.clear();
        assert_eq!(released.load(Ordering::SeqCst), 1);
        assert_eq!(frame.size(), 0);
        assert!(frame.data().is_empty());
        assert_eq!(frame.idents().collect::<Vec<_>>(), idents);
    }

    #[test_log::test]
    fn header_counts_pushed_sender() {
        let mut frame = stacked(&[Ident::random(), Ident::random()]);
        frame.set_kind(9);
        assert_eq!(
            frame.header(),
            Header {
                version: PROTOCOL_VERSION,
                kind: 9,
                num_ident: 2,
                flags: 0,
                size: 7,
            }
        );
        frame.set_sender(Some(Sender::from(Ident::random())));
        frame.stack_push_sender();
        assert_eq!(frame.header().num_ident, 3);
        assert_eq!(frame.idents().count(), 3);
        assert_eq!(frame.header().body_len(), 7 + 3 * IDENT_LEN);
    }

    #[test_log::test]
    #[should_panic(expected = "pushed sender identity is not set")]
    fn pushed_sender_must_be_set() {
        let mut frame = Frame::copy_from_slice(b"x");
        frame.set_push_sender(true);
        let _ = frame.header();
    }
}
