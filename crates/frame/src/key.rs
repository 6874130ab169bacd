use core::cmp::Ordering;
use core::fmt;
use core::hash::{Hash, Hasher};
use core::ops::Range;

use crate::CountedBuffer;

/// Longest byte string a [`Key`] may hold.
pub const MAX_KEY_LEN: usize = u8::MAX as usize;

/// Short byte string borrowed from a [`CountedBuffer`], used as a lookup key.
///
/// Keys order by length first and only compare bytes when lengths are equal, so
/// `[0xff]` sorts before `[0x00, 0x00]`. This is a total order suitable for sorted
/// containers, but it is not the ordering of plain byte strings.
#[derive(Clone)]
pub struct Key {
    buf: CountedBuffer,
    offset: usize,
    len: u8,
}

impl Key {
    /// Takes a reference to `buf` and keys on the bytes within `range`.
    ///
    /// # Panics
    ///
    /// Panics if `range` is out of bounds of `buf` or longer than [`MAX_KEY_LEN`].
    pub fn new(buf: &CountedBuffer, range: Range<usize>) -> Self {
        assert!(
            range.start <= range.end && range.end <= buf.len(),
            "key range {range:?} exceeds buffer of length {}",
            buf.len()
        );
        assert!(
            range.len() <= MAX_KEY_LEN,
            "key length {} exceeds maximum of {MAX_KEY_LEN}",
            range.len()
        );
        Self {
            buf: buf.clone(),
            offset: range.start,
            len: range.len() as u8,
        }
    }

    /// Copies `data` into a dedicated buffer.
    pub fn copy_from_slice(data: &[u8]) -> Self {
        let buf = CountedBuffer::copy_from_slice(data);
        Self::new(&buf, 0..data.len())
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.buf.slice(self.offset..self.offset + usize::from(self.len))
    }

    pub fn len(&self) -> usize {
        self.len.into()
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Buffer backing this key.
    pub fn buffer(&self) -> &CountedBuffer {
        &self.buf
    }
}

impl Ord for Key {
    fn cmp(&self, other: &Self) -> Ordering {
        self.len
            .cmp(&other.len)
            .then_with(|| self.as_bytes().cmp(other.as_bytes()))
    }
}

impl PartialOrd for Key {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Key {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other).is_eq()
    }
}

impl Eq for Key {}

impl Hash for Key {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.as_bytes().hash(state);
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Key({:02x?})", self.as_bytes())
    }
}
