use std::sync::atomic::{AtomicU8, Ordering};

/// Fixed-capacity byte storage shared by the filler and the drainer.
///
/// Cells are atomics so that both sides can hold a shared reference. Which cells each side
/// may touch is decided by the cursors in [`super::Shared`], not by this type.
pub(crate) struct Ring {
    cells: Box<[AtomicU8]>,
}

impl Ring {
    pub fn new(capacity: usize) -> Self {
        Self {
            cells: (0..capacity.max(1)).map(|_| AtomicU8::new(0)).collect(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.cells.len()
    }

    /// Buffer index of logical position `pos`, where `offset` maps to index 0.
    ///
    /// `offset` only moves by whole capacities between resets, so any value of it observed
    /// since the last reset yields the same index.
    pub fn index(&self, pos: u64, offset: u64) -> usize {
        let capacity = self.cells.len() as u64;
        let index = if pos >= offset {
            (pos - offset) % capacity
        } else {
            (capacity - (offset - pos) % capacity) % capacity
        };
        index as usize
    }

    /// Store `data` at `index`. The caller keeps the write inside the buffer.
    pub fn write(&self, index: usize, data: &[u8]) {
        for (cell, &byte) in self.cells[index..index + data.len()].iter().zip(data) {
            cell.store(byte, Ordering::Relaxed);
        }
    }

    /// Copy `out.len()` bytes starting at `index`, wrapping around the end.
    pub fn read(&self, index: usize, out: &mut [u8]) {
        let first = out.len().min(self.cells.len() - index);
        let (head, tail) = out.split_at_mut(first);
        for (byte, cell) in head.iter_mut().zip(&self.cells[index..]) {
            *byte = cell.load(Ordering::Relaxed);
        }
        for (byte, cell) in tail.iter_mut().zip(self.cells.iter()) {
            *byte = cell.load(Ordering::Relaxed);
        }
    }
}
