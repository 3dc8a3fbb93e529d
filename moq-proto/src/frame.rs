use thiserror::Error;

/// The destination is smaller than the buffered payload.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("destination too short: {available} < {needed}")]
pub struct FrameTooShort {
    pub needed: usize,
    pub available: usize,
}

/// A reusable frame payload buffer.
///
/// Unlike a Vec, [FrameBuffer::write] replaces the contents instead of
/// appending, so the same buffer can be handed one frame after another.
/// The backing allocation is reused between frames, but is released once it
/// would waste more than twice the payload size, so a single huge frame
/// doesn't pin its allocation for the rest of the track.
#[derive(Default, Debug, Clone)]
pub struct FrameBuffer {
    data: Vec<u8>,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// The payload length, not the allocation size.
    pub fn byte_len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Replace the contents with a copy of `src`.
    pub fn write(&mut self, src: &[u8]) {
        self.reserve_exact(src.len());
        self.data.clear();
        self.data.extend_from_slice(src);
    }

    /// Resize to `len` bytes, zero filled, applying the same allocation rule
    /// as [Self::write]. Used to size the buffer before reading into it.
    pub fn resize(&mut self, len: usize) {
        self.reserve_exact(len);
        self.data.resize(len, 0);
    }

    /// Copy the payload into `dst`, returning the number of bytes copied.
    pub fn copy_to(&self, dst: &mut [u8]) -> Result<usize, FrameTooShort> {
        if dst.len() < self.data.len() {
            return Err(FrameTooShort {
                needed: self.data.len(),
                available: dst.len(),
            });
        }

        dst[..self.data.len()].copy_from_slice(&self.data);
        Ok(self.data.len())
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }

    fn reserve_exact(&mut self, len: usize) {
        let capacity = self.data.capacity();
        if capacity < len || capacity > len.saturating_mul(2) {
            self.data = Vec::with_capacity(len);
        }
    }
}

impl From<&[u8]> for FrameBuffer {
    fn from(src: &[u8]) -> Self {
        let mut buf = Self::new();
        buf.write(src);
        buf
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn write_replaces() {
        let mut buf = FrameBuffer::new();
        buf.write(&[1, 2, 3]);
        assert_eq!(buf.byte_len(), 3);

        buf.write(&[4, 5]);
        assert_eq!(buf.byte_len(), 2);
        assert_eq!(buf.as_slice(), &[4, 5]);
    }

    #[test]
    fn copy_to_short() {
        let mut buf = FrameBuffer::new();
        buf.write(&[1, 2, 3]);

        let mut dst = [0u8; 2];
        assert_eq!(
            buf.copy_to(&mut dst),
            Err(FrameTooShort {
                needed: 3,
                available: 2
            })
        );

        let mut dst = [0u8; 4];
        assert_eq!(buf.copy_to(&mut dst), Ok(3));
        assert_eq!(dst, [1, 2, 3, 0]);
    }

    #[test]
    fn releases_oversized_allocation() {
        let mut buf = FrameBuffer::new();
        buf.write(&vec![7u8; 4096]);
        let large = buf.data.capacity();
        assert!(large >= 4096);

        // A small frame should not keep the 4 KiB allocation around.
        buf.write(&[1, 2, 3]);
        assert!(buf.data.capacity() < large);
        assert_eq!(buf.as_slice(), &[1, 2, 3]);
    }

    #[test]
    fn reuses_close_allocation() {
        let mut buf = FrameBuffer::new();
        buf.write(&[0u8; 100]);
        let capacity = buf.data.capacity();

        buf.write(&[1u8; 60]);
        assert_eq!(buf.data.capacity(), capacity);
    }
}
