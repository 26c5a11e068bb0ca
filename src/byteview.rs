//! Provides the immutable value type which is stored in caches and sent over the wire.
use std::fmt;
use std::fmt::{Debug, Display};

use bytes::Bytes;

use crate::lru::ByteSize;

/// Holds an immutable view of bytes.
///
/// Once created, the content of a view never changes. Cloning a view is cheap as the underlying
/// buffer is reference counted. Whenever a caller needs a buffer it can modify,
/// [to_vec](ByteView::to_vec) hands out a fresh copy.
///
/// # Examples
/// ```
/// # use geecache::ByteView;
/// let view = ByteView::from("Hello");
/// assert_eq!(view.len(), 5);
///
/// // Modifying a copy doesn't affect the view...
/// let mut copy = view.to_vec();
/// copy[0] = b'J';
/// assert_eq!(view.to_string(), "Hello");
/// ```
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct ByteView {
    data: Bytes,
}

impl ByteView {
    /// Creates a view by copying the given slice.
    pub fn copy_from_slice(data: &[u8]) -> Self {
        ByteView {
            data: Bytes::copy_from_slice(data),
        }
    }

    /// Returns the number of bytes in this view.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Determines if this view is empty.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Provides read-only access to the underlying bytes.
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Returns a copy of the data which can be modified freely.
    pub fn to_vec(&self) -> Vec<u8> {
        self.data.to_vec()
    }

    /// Converts this view into the underlying buffer.
    pub fn into_bytes(self) -> Bytes {
        self.data
    }
}

impl From<Vec<u8>> for ByteView {
    fn from(data: Vec<u8>) -> Self {
        ByteView { data: data.into() }
    }
}

impl From<Bytes> for ByteView {
    fn from(data: Bytes) -> Self {
        ByteView { data }
    }
}

impl From<&[u8]> for ByteView {
    fn from(data: &[u8]) -> Self {
        ByteView::copy_from_slice(data)
    }
}

impl From<&str> for ByteView {
    fn from(data: &str) -> Self {
        ByteView::copy_from_slice(data.as_bytes())
    }
}

impl From<String> for ByteView {
    fn from(data: String) -> Self {
        ByteView::from(data.into_bytes())
    }
}

impl AsRef<[u8]> for ByteView {
    fn as_ref(&self) -> &[u8] {
        &self.data
    }
}

impl ByteSize for ByteView {
    fn allocated_size(&self) -> usize {
        self.data.len()
    }
}

impl Display for ByteView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.data))
    }
}

impl Debug for ByteView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ByteView({:?})", self.data)
    }
}

#[cfg(test)]
mod tests {
    use crate::lru::ByteSize;
    use crate::ByteView;

    #[test]
    fn views_are_isolated_from_their_source() {
        let mut source = b"geecache".to_vec();
        let view = ByteView::from(&source[..]);
        source[0] = b'G';

        assert_eq!(view.as_slice(), b"geecache");
        assert_eq!(view.allocated_size(), 8);
    }

    #[test]
    fn copies_are_isolated_from_the_view() {
        let view = ByteView::from("630");
        let mut copy = view.to_vec();
        copy.clear();

        assert_eq!(view.to_string(), "630");
        assert_eq!(view.len(), 3);
        assert!(!view.is_empty());
        assert!(ByteView::default().is_empty());
    }
}
