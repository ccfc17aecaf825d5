//! Bounds-clamped views over shared packet storage
//!
//! A [`BufferView`] is an `(offset, length)` window into a byte buffer that
//! may be shared with other views. Parsing carves headers, options and
//! payloads out of one received datagram without copying; serialization can
//! write a header straight into room reserved in front of a payload.
//!
//! Construction and slicing never fail: out-of-range offsets and lengths
//! are narrowed to what the storage holds. The storage is fixed-size and
//! only reachable through views, so a view's bounds stay valid for its
//! whole life.

use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;

type Storage = Arc<RwLock<Box<[u8]>>>;

fn storage(data: Vec<u8>) -> Storage {
    Arc::new(RwLock::new(data.into_boxed_slice()))
}

/// A window into shared byte storage
#[derive(Clone)]
pub struct BufferView {
    storage: Storage,
    offset: usize,
    length: usize,
}

impl BufferView {
    /// Take ownership of `data` and view part of it, clamping `offset` and
    /// `length` to fit
    pub fn new(data: Vec<u8>, offset: usize, length: usize) -> Self {
        let capacity = data.len();
        let offset = offset.min(capacity);
        let length = length.min(capacity - offset);
        BufferView {
            storage: storage(data),
            offset,
            length,
        }
    }

    /// A zero-length view over empty storage
    pub fn empty() -> Self {
        Self::from_vec(Vec::new())
    }

    /// Take ownership of `data` and view all of it
    pub fn from_vec(data: Vec<u8>) -> Self {
        let length = data.len();
        BufferView {
            storage: storage(data),
            offset: 0,
            length,
        }
    }

    /// Allocate zeroed storage of `headroom + length` bytes and view the
    /// last `length` of them
    ///
    /// The bytes in front of the view are left for a lower layer to write
    /// its header into.
    pub fn with_headroom(headroom: usize, length: usize) -> Self {
        BufferView {
            storage: storage(vec![0u8; headroom + length]),
            offset: headroom,
            length,
        }
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn len(&self) -> usize {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Bytes of storage available in front of this view
    pub fn headroom(&self) -> usize {
        self.offset
    }

    /// Read the byte at `index` (relative to the view)
    pub fn get(&self, index: usize) -> Option<u8> {
        if index >= self.length {
            return None;
        }
        Some(self.storage.read()[self.offset + index])
    }

    /// Write the byte at `index` through to the storage
    ///
    /// Returns false if `index` is outside the view.
    pub fn set(&self, index: usize, value: u8) -> bool {
        if index >= self.length {
            return false;
        }
        self.storage.write()[self.offset + index] = value;
        true
    }

    /// Sub-view relative to this one, clamped to this view's bounds
    pub fn slice(&self, offset: usize, length: usize) -> BufferView {
        let offset = offset.min(self.length);
        let length = length.min(self.length - offset);
        BufferView {
            storage: Arc::clone(&self.storage),
            offset: self.offset + offset,
            length,
        }
    }

    /// Everything from `offset` to the end of this view
    pub fn slice_from(&self, offset: usize) -> BufferView {
        self.slice(offset, usize::MAX)
    }

    /// Grow the view backwards over `count` bytes of headroom
    ///
    /// Returns `None` if the storage does not hold that many bytes in front
    /// of the view.
    pub fn extend_front(&self, count: usize) -> Option<BufferView> {
        if count > self.offset {
            return None;
        }
        Some(BufferView {
            storage: Arc::clone(&self.storage),
            offset: self.offset - count,
            length: self.length + count,
        })
    }

    /// Deep copy of the viewed bytes into fresh storage starting at offset 0
    pub fn to_owned_copy(&self) -> BufferView {
        Self::from_vec(self.to_vec())
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.with_slice(|bytes| bytes.to_vec())
    }

    /// Run `f` over the viewed bytes
    ///
    /// The storage stays read-locked for the duration of the call, so `f`
    /// must not write through another view of the same storage.
    pub fn with_slice<T>(&self, f: impl FnOnce(&[u8]) -> T) -> T {
        let storage = self.storage.read();
        f(&storage[self.offset..self.offset + self.length])
    }

    /// Run `f` over the viewed bytes mutably
    ///
    /// The storage stays write-locked for the duration of the call.
    pub fn with_slice_mut<T>(&self, f: impl FnOnce(&mut [u8]) -> T) -> T {
        let mut storage = self.storage.write();
        f(&mut storage[self.offset..self.offset + self.length])
    }

    /// Whether both views sit on the same storage
    pub fn shares_storage(&self, other: &BufferView) -> bool {
        Arc::ptr_eq(&self.storage, &other.storage)
    }
}

impl Default for BufferView {
    fn default() -> Self {
        Self::empty()
    }
}

impl From<Vec<u8>> for BufferView {
    fn from(data: Vec<u8>) -> Self {
        Self::from_vec(data)
    }
}

impl From<&[u8]> for BufferView {
    fn from(data: &[u8]) -> Self {
        Self::from_vec(data.to_vec())
    }
}

impl PartialEq for BufferView {
    fn eq(&self, other: &Self) -> bool {
        if self.length != other.length {
            return false;
        }
        // Copy one side first so the two read locks are never held together.
        let ours = self.to_vec();
        other.with_slice(|theirs| ours == theirs)
    }
}

impl Eq for BufferView {}

impl fmt::Debug for BufferView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferView")
            .field("offset", &self.offset)
            .field("length", &self.length)
            .field("bytes", &self.to_vec())
            .finish()
    }
}
