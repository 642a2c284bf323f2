//! Reference side-array: owned (non-primitive) call arguments.
//!
//! The byte region cannot hold values with drop glue or pointers the
//! consumer must take ownership of, so each slot gets `arity` cells in a
//! parallel array, co-indexed by slot position:
//!
//! ```text
//! slot p owns cells [p * arity, p * arity + arity)
//! ```
//!
//! There is no lock. A cell is written only by the producer owning the slot
//! (before `write_release`) and read or cleared only by the consumer (after
//! `read_acquire`, before `read_release`); the indicator's release/acquire
//! pair orders both hand-overs.

use std::cell::UnsafeCell;

pub struct ReferenceArray<R> {
    cells: Box<[UnsafeCell<Option<R>>]>,
    arity: usize,
    mask: usize,
}

// Safety: values cross from producer threads to the consumer thread, so R
// must be Send. Concurrent access to a cell is ruled out by the slot protocol.
unsafe impl<R: Send> Send for ReferenceArray<R> {}
unsafe impl<R: Send> Sync for ReferenceArray<R> {}

impl<R> ReferenceArray<R> {
    /// Creates `capacity * arity` empty cells. `capacity` must be a power of two.
    pub fn new(capacity: usize, arity: usize) -> Self {
        assert!(capacity.is_power_of_two(), "capacity {capacity} not a power of 2");
        let cells = (0..capacity * arity)
            .map(|_| UnsafeCell::new(None))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self {
            cells,
            arity,
            mask: capacity - 1,
        }
    }

    /// Reference cells reserved per slot.
    #[inline]
    pub fn arity(&self) -> usize {
        self.arity
    }

    #[inline]
    fn cell(&self, index: u64, ordinal: usize) -> &UnsafeCell<Option<R>> {
        assert!(
            ordinal < self.arity,
            "reference ordinal {ordinal} outside slot arity {}",
            self.arity
        );
        let position = (index as usize) & self.mask;
        &self.cells[position * self.arity + ordinal]
    }

    /// Stores a reference for the slot claimed at `index`.
    ///
    /// # Safety
    ///
    /// The caller must own the claimed, not yet published slot at `index`.
    #[inline]
    pub(crate) unsafe fn put(&self, index: u64, ordinal: usize, value: Option<R>) {
        *self.cell(index, ordinal).get() = value;
    }

    /// Moves a reference out of the slot acquired at `index`.
    ///
    /// # Safety
    ///
    /// The caller must be the consumer holding the acquired slot at `index`.
    #[inline]
    pub(crate) unsafe fn take(&self, index: u64, ordinal: usize) -> Option<R> {
        (*self.cell(index, ordinal).get()).take()
    }

    /// Drops every reference still held by the slot at `index`.
    ///
    /// # Safety
    ///
    /// The caller must own the slot at `index` (either side of the hand-over).
    pub(crate) unsafe fn clear(&self, index: u64) {
        for ordinal in 0..self.arity {
            *self.cell(index, ordinal).get() = None;
        }
    }
}
