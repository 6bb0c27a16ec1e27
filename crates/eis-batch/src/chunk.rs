//! Chunk accumulation

/// Buffers processed records up to a fixed chunk size
///
/// `push` hands back a full chunk once the buffer reaches capacity;
/// `flush` drains the partial final chunk when the source is exhausted.
pub struct ChunkBuffer<R> {
    capacity: usize,
    items: Vec<R>,
}

impl<R> ChunkBuffer<R> {
    /// Create a buffer; `capacity` must be at least 1
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "chunk size must be at least 1");
        Self {
            capacity,
            items: Vec::with_capacity(capacity),
        }
    }

    /// Add a record, returning a full chunk when capacity is reached
    pub fn push(&mut self, record: R) -> Option<Vec<R>> {
        self.items.push(record);
        if self.items.len() == self.capacity {
            Some(std::mem::replace(
                &mut self.items,
                Vec::with_capacity(self.capacity),
            ))
        } else {
            None
        }
    }

    /// Drain whatever remains as a final (possibly partial) chunk
    pub fn flush(&mut self) -> Option<Vec<R>> {
        if self.items.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.items))
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
