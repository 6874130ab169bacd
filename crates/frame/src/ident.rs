//! Socket identities and the identity envelope carried by frames

use core::fmt;
use core::ops::Range;

use uuid::Uuid;

use crate::CountedBuffer;

/// Width of a single identity record on the wire.
pub const IDENT_LEN: usize = 16;

/// Identity of a socket, recorded by every hop a frame passes through.
#[derive(Clone, Copy, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Ident([u8; IDENT_LEN]);

impl Ident {
    /// Generates a fresh random identity.
    #[must_use]
    pub fn random() -> Self {
        Self(Uuid::new_v4().into_bytes())
    }

    #[must_use]
    pub const fn from_bytes(bytes: [u8; IDENT_LEN]) -> Self {
        Self(bytes)
    }

    /// # Panics
    ///
    /// Panics if `bytes` is not exactly [`IDENT_LEN`] long.
    #[must_use]
    pub fn from_slice(bytes: &[u8]) -> Self {
        let mut ident = [0; IDENT_LEN];
        ident.copy_from_slice(bytes);
        Self::from_bytes(ident)
    }

    pub const fn as_bytes(&self) -> &[u8; IDENT_LEN] {
        &self.0
    }
}

impl From<Uuid> for Ident {
    fn from(id: Uuid) -> Self {
        Self(id.into_bytes())
    }
}

impl From<Ident> for Uuid {
    fn from(Ident(id): Ident) -> Self {
        Uuid::from_bytes(id)
    }
}

impl fmt::Display for Ident {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", Uuid::from_bytes(self.0).hyphenated())
    }
}

impl fmt::Debug for Ident {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Ident({self})")
    }
}

/// View of `count` consecutive identity records within a [`CountedBuffer`], oldest
/// hop first.
///
/// The records are never written through a stack; stacks which need to diverge are
/// rebuilt into fresh storage.
#[derive(Clone, Debug)]
pub struct IdentStack {
    buf: CountedBuffer,
    offset: usize,
    count: u8,
}

impl IdentStack {
    /// # Panics
    ///
    /// Panics if the records do not fit within `buf`.
    pub fn new(buf: &CountedBuffer, offset: usize, count: u8) -> Self {
        let end = offset + usize::from(count) * IDENT_LEN;
        assert!(
            end <= buf.len(),
            "identity stack `{offset}..{end}` exceeds buffer of length {}",
            buf.len()
        );
        Self {
            buf: buf.clone(),
            offset,
            count,
        }
    }

    /// Copies `idents` into a dedicated buffer.
    ///
    /// # Panics
    ///
    /// Panics if more than [`u8::MAX`] identities are given.
    pub fn from_idents(idents: &[Ident]) -> Self {
        let count = u8::try_from(idents.len()).unwrap_or_else(|_| {
            panic!("identity stack of {} records does not fit the header", idents.len())
        });
        let data = idents.iter().flat_map(Ident::as_bytes).copied().collect();
        Self::new(&CountedBuffer::from_vec(data), 0, count)
    }

    pub fn len(&self) -> usize {
        self.count.into()
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Number of records as carried in the wire header.
    pub fn count(&self) -> u8 {
        self.count
    }

    fn range(&self) -> Range<usize> {
        self.offset..self.offset + self.len() * IDENT_LEN
    }

    /// Raw records as they appear on the wire.
    pub fn as_bytes(&self) -> &[u8] {
        self.buf.slice(self.range())
    }

    pub fn get(&self, i: usize) -> Option<Ident> {
        self.as_bytes()
            .chunks_exact(IDENT_LEN)
            .nth(i)
            .map(Ident::from_slice)
    }

    pub fn iter(&self) -> impl ExactSizeIterator<Item = Ident> + '_ {
        self.as_bytes().chunks_exact(IDENT_LEN).map(Ident::from_slice)
    }

    /// Newest record, the last hop that pushed itself.
    pub fn last(&self) -> Option<Ident> {
        self.len().checked_sub(1).and_then(|i| self.get(i))
    }

    /// Buffer backing the records.
    pub fn buffer(&self) -> &CountedBuffer {
        &self.buf
    }

    /// Whether both stacks view the same records of the same storage.
    pub fn same_storage(&self, other: &Self) -> bool {
        self.buf.ptr_eq(&other.buf) && self.range() == other.range()
    }

    /// Drops the newest record from this view, leaving the storage untouched.
    pub(crate) fn truncate_last(&mut self) -> Option<Ident> {
        let last = self.last()?;
        self.count -= 1;
        Some(last)
    }
}

/// Identity of the hop currently holding a frame, backed by a [`CountedBuffer`].
#[derive(Clone, Debug)]
pub struct Sender {
    buf: CountedBuffer,
    offset: usize,
}

impl Sender {
    /// Refers to the [`IDENT_LEN`] bytes of `buf` starting at `offset`.
    ///
    /// # Panics
    ///
    /// Panics if the identity does not fit within `buf`.
    pub fn new(buf: &CountedBuffer, offset: usize) -> Self {
        assert!(
            offset + IDENT_LEN <= buf.len(),
            "sender at `{offset}` exceeds buffer of length {}",
            buf.len()
        );
        Self {
            buf: buf.clone(),
            offset,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.buf.slice(self.offset..self.offset + IDENT_LEN)
    }

    pub fn ident(&self) -> Ident {
        Ident::from_slice(self.as_bytes())
    }

    pub fn buffer(&self) -> &CountedBuffer {
        &self.buf
    }
}

impl From<Ident> for Sender {
    fn from(ident: Ident) -> Self {
        Self::new(&CountedBuffer::copy_from_slice(ident.as_bytes()), 0)
    }
}
