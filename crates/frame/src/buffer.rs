//! Reference-counted byte storage

use core::fmt;
use core::ops::Range;

use std::sync::{Arc, Mutex, PoisonError};

use bytes::Bytes;
use tracing::trace;

trait Storage: Send + Sync {
    fn bytes(&self) -> &[u8];
}

/// Storage paired with the action run once the last reference is gone.
struct Release<T, F>
where
    F: FnOnce(T),
{
    data: Option<T>,
    release: Mutex<Option<F>>,
}

impl<T, F> Storage for Release<T, F>
where
    T: AsRef<[u8]> + Send + Sync,
    F: FnOnce(T) + Send,
{
    fn bytes(&self) -> &[u8] {
        match &self.data {
            Some(data) => data.as_ref(),
            None => &[],
        }
    }
}

impl<T, F> Drop for Release<T, F>
where
    F: FnOnce(T),
{
    fn drop(&mut self) {
        let release = self
            .release
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let (Some(data), Some(release)) = (self.data.take(), release) {
            release(data);
        }
    }
}

/// Shared handle to an immutable byte region.
///
/// Cloning a [`CountedBuffer`] takes another reference, dropping one gives it back.
/// The release action passed at construction runs exactly once, on whichever thread
/// drops the final reference. Counting is atomic, so handles may freely cross threads.
#[derive(Clone)]
pub struct CountedBuffer(Arc<dyn Storage>);

impl CountedBuffer {
    /// Wraps `data`, calling `release` with it once the last reference is dropped.
    ///
    /// Any context the release action needs is captured by the closure.
    pub fn new<T, F>(data: T, release: F) -> Self
    where
        T: AsRef<[u8]> + Send + Sync + 'static,
        F: FnOnce(T) + Send + 'static,
    {
        Self(Arc::new(Release {
            data: Some(data),
            release: Mutex::new(Some(move |data: T| {
                trace!(len = data.as_ref().len(), "releasing counted buffer");
                release(data);
            })),
        }))
    }

    /// Buffer owning `data`, which is simply dropped on release.
    pub fn from_vec(data: Vec<u8>) -> Self {
        Self::new(data, drop)
    }

    /// Copies `data` into a freshly allocated owned buffer.
    pub fn copy_from_slice(data: &[u8]) -> Self {
        Self::from_vec(data.to_vec())
    }

    /// Zero-length marker buffer with a no-op release.
    pub fn empty() -> Self {
        Self::new([0u8; 0], |_| {})
    }

    /// Entire contents of the buffer.
    pub fn as_bytes(&self) -> &[u8] {
        self.0.bytes()
    }

    /// Contents within `range`.
    ///
    /// # Panics
    ///
    /// Panics if `range` is not within the buffer.
    pub fn slice(&self, range: Range<usize>) -> &[u8] {
        &self.as_bytes()[range]
    }

    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.as_bytes().is_empty()
    }

    /// Number of live references to this buffer.
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.0)
    }

    /// Whether both handles refer to the same underlying storage.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl From<Vec<u8>> for CountedBuffer {
    fn from(data: Vec<u8>) -> Self {
        Self::from_vec(data)
    }
}

impl From<Bytes> for CountedBuffer {
    fn from(data: Bytes) -> Self {
        Self::new(data, drop)
    }
}

impl AsRef<[u8]> for CountedBuffer {
    fn as_ref(&self) -> &[u8] {
        self.as_bytes()
    }
}

impl fmt::Debug for CountedBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CountedBuffer")
            .field("len", &self.len())
            .field("refs", &self.ref_count())
            .finish()
    }
}
