//! Bounded inbound byte buffer

/// Default buffer capacity (64 KiB)
pub const DEFAULT_BUFFER_CAPACITY: usize = 64 * 1024;

/// Ordered bytes received from the transport and not yet framed
///
/// The buffer never grows past its capacity. When a push does not fit, the
/// oldest unconsumed bytes stay and the excess of the new chunk is refused.
#[derive(Debug, Clone)]
pub struct InboundBuffer {
    data: Vec<u8>,
    capacity: usize,
}

impl InboundBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            data: Vec::with_capacity(capacity.min(4096)),
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes that can still be pushed
    pub fn remaining(&self) -> usize {
        self.capacity - self.data.len()
    }

    /// Append as much of `bytes` as fits; returns the number accepted
    pub fn push(&mut self, bytes: &[u8]) -> usize {
        let accepted = bytes.len().min(self.remaining());
        self.data.extend_from_slice(&bytes[..accepted]);
        accepted
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Remove and return the first `n` bytes
    pub fn take(&mut self, n: usize) -> Vec<u8> {
        let n = n.min(self.data.len());
        self.data.drain(..n).collect()
    }

    /// Remove and return everything
    pub fn take_all(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.data)
    }

    pub fn clear(&mut self) {
        self.data.clear();
    }
}

impl Default for InboundBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_CAPACITY)
    }
}
