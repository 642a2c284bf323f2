//! Backing region: the flat byte arena that holds ring indices and slots.
//!
//! This is the only module that reinterprets raw bytes. Everything above it
//! talks in terms of [`Slot`]s, payload byte offsets and field widths.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │ header line 0 (128B): producer_index: AtomicU64             │
//! ├──────────────────────────────────────────────────────────────┤
//! │ header line 1 (128B): consumer_index: AtomicU64             │
//! ├──────────────────────────────────────────────────────────────┤
//! │ slot 0: [indicator: u32][pad: u32][payload: message_size]   │
//! │ slot 1: ...                                    (stride % 8 == 0)
//! │ slot capacity-1                                             │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! The indices live inside the region (not in the owning struct) so a
//! memory-mapped region carries the complete primitive state of the ring.

use crate::{ChannelError, MAX_CAPACITY};
use std::alloc::{self, Layout};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU32, AtomicU64};

/// Alignment and spacing used to keep hot fields on separate cache lines.
///
/// 128 rather than 64 because adjacent-line prefetchers on Intel/AMD pull
/// cache lines in pairs.
pub const CACHE_LINE: usize = 128;

/// Width of the per-slot indicator field.
pub const INDICATOR_SIZE: usize = 4;

/// Offset of the payload inside a slot. The indicator is padded out to 8 so
/// that 8-byte payload fields stay naturally aligned.
pub const PAYLOAD_OFFSET: usize = 8;

const PRODUCER_INDEX_OFFSET: usize = 0;
const CONSUMER_INDEX_OFFSET: usize = CACHE_LINE;

/// Bytes in front of the first slot.
pub const HEADER_SIZE: usize = 2 * CACHE_LINE;

/// Geometry of a ring: slot count, payload size and slot stride.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotLayout {
    capacity: usize,
    message_size: usize,
    stride: usize,
}

impl SlotLayout {
    /// Computes the layout for `capacity` slots of `message_size` payload bytes.
    ///
    /// `capacity` must already be a power of two no larger than
    /// [`MAX_CAPACITY`]; slot positions are `index & (capacity - 1)`.
    pub fn new(capacity: usize, message_size: usize) -> Result<Self, ChannelError> {
        if !capacity.is_power_of_two() || capacity > MAX_CAPACITY {
            return Err(ChannelError::InvalidCapacity {
                requested: capacity,
                max: MAX_CAPACITY,
            });
        }
        let overflow = ChannelError::LayoutOverflow {
            capacity,
            message_size,
        };
        let stride = PAYLOAD_OFFSET
            .checked_add(message_size)
            .and_then(|s| s.checked_next_multiple_of(8))
            .ok_or(overflow)?;
        let layout = Self {
            capacity,
            message_size,
            stride,
        };
        // Validate the total up front so required_bytes() cannot overflow later.
        stride
            .checked_mul(capacity)
            .and_then(|b| b.checked_add(HEADER_SIZE))
            .filter(|b| Layout::from_size_align(*b, CACHE_LINE).is_ok())
            .ok_or(overflow)?;
        Ok(layout)
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    pub fn mask(&self) -> usize {
        self.capacity - 1
    }

    /// Payload bytes per slot.
    #[inline]
    pub fn message_size(&self) -> usize {
        self.message_size
    }

    /// Distance in bytes between consecutive slots.
    #[inline]
    pub fn stride(&self) -> usize {
        self.stride
    }

    /// Total bytes a region must provide for this layout.
    #[inline]
    pub fn required_bytes(&self) -> usize {
        HEADER_SIZE + self.capacity * self.stride
    }

    /// Slot handle for a ring sequence number.
    #[inline]
    pub(crate) fn slot(&self, index: u64) -> Slot {
        let position = (index as usize) & self.mask();
        Slot {
            index,
            offset: HEADER_SIZE + position * self.stride,
        }
    }
}

/// A claimed or acquired slot: the ring sequence number and its byte offset.
///
/// Only the slot protocols create these, so an offset is always in bounds
/// for the region that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slot {
    index: u64,
    offset: usize,
}

impl Slot {
    /// Monotonic ring sequence number this slot was claimed at.
    #[inline]
    pub fn index(&self) -> u64 {
        self.index
    }

    /// Byte offset of the slot (its indicator) from the region base.
    #[inline]
    pub fn offset(&self) -> usize {
        self.offset
    }
}

enum Backing {
    Heap(Layout),
    #[cfg(feature = "mmap")]
    Mapped(#[allow(dead_code)] memmap2::MmapMut),
}

/// Owned backing memory for one ring.
pub struct Region {
    base: NonNull<u8>,
    len: usize,
    layout: SlotLayout,
    backing: Backing,
}

// Safety: the region is raw memory; every concurrent access goes through
// atomics (indices, indicators) or through payload bytes whose ownership is
// handed over by the indicator's release/acquire pair.
unsafe impl Send for Region {}
unsafe impl Sync for Region {}

impl Region {
    /// Allocates a zeroed, cache-line aligned region on the heap.
    pub fn heap(layout: SlotLayout) -> Self {
        let alloc_layout = Layout::from_size_align(layout.required_bytes(), CACHE_LINE)
            .unwrap_or_else(|_| unreachable!("validated by SlotLayout::new"));
        // SAFETY: the layout has non-zero size (HEADER_SIZE > 0).
        let ptr = unsafe { alloc::alloc_zeroed(alloc_layout) };
        let Some(base) = NonNull::new(ptr) else {
            alloc::handle_alloc_error(alloc_layout);
        };
        Self {
            base,
            len: alloc_layout.size(),
            layout,
            backing: Backing::Heap(alloc_layout),
        }
    }

    /// Places the ring on a memory map.
    ///
    /// With `initialize` the header and every slot are zeroed; without it the
    /// existing indices and committed slots are adopted as they are. Reference
    /// arguments never live in the map, so adopted slots only carry their
    /// primitive fields.
    #[cfg(feature = "mmap")]
    pub fn mapped(
        mut map: memmap2::MmapMut,
        layout: SlotLayout,
        initialize: bool,
    ) -> Result<Self, ChannelError> {
        let required = layout.required_bytes();
        if map.len() < required {
            return Err(ChannelError::RegionTooSmall {
                required,
                actual: map.len(),
            });
        }
        if initialize {
            map[..required].fill(0);
        }
        // Maps are page aligned, which covers every field alignment used here.
        let base = NonNull::from(&mut map[..]).cast::<u8>();
        let region = Self {
            base,
            len: map.len(),
            layout,
            backing: Backing::Mapped(map),
        };
        if !initialize {
            region.check_indices()?;
        }
        Ok(region)
    }

    /// Rejects adopted indices that no sequence of claims and reads produces.
    #[cfg(feature = "mmap")]
    fn check_indices(&self) -> Result<(), ChannelError> {
        use std::sync::atomic::Ordering;

        let producer = self.producer_index().load(Ordering::Acquire);
        let consumer = self.consumer_index().load(Ordering::Acquire);
        let capacity = self.layout.capacity;
        match producer.checked_sub(consumer) {
            Some(occupied) if occupied <= capacity as u64 => Ok(()),
            _ => Err(ChannelError::InconsistentIndices {
                producer,
                consumer,
                capacity,
            }),
        }
    }

    #[inline]
    pub fn layout(&self) -> &SlotLayout {
        &self.layout
    }

    /// Length of the underlying memory in bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns true if this region lives on a memory map.
    pub fn is_mapped(&self) -> bool {
        !matches!(self.backing, Backing::Heap(_))
    }

    // ---------------------------------------------------------------------
    // ATOMIC FIELDS
    // ---------------------------------------------------------------------

    #[inline]
    fn atomic_u64(&self, offset: usize) -> &AtomicU64 {
        debug_assert!(offset % 8 == 0 && offset + 8 <= self.len);
        // SAFETY: offset is 8-aligned within the region, the base is at least
        // 8-aligned, and this location is only ever accessed atomically.
        unsafe { &*self.base.as_ptr().add(offset).cast::<AtomicU64>() }
    }

    /// Producer sequence counter (next index to claim).
    #[inline]
    pub(crate) fn producer_index(&self) -> &AtomicU64 {
        self.atomic_u64(PRODUCER_INDEX_OFFSET)
    }

    /// Consumer sequence counter (next index to read).
    #[inline]
    pub(crate) fn consumer_index(&self) -> &AtomicU64 {
        self.atomic_u64(CONSUMER_INDEX_OFFSET)
    }

    /// The indicator word of a slot.
    #[inline]
    pub(crate) fn indicator(&self, slot: Slot) -> &AtomicU32 {
        debug_assert!(slot.offset + PAYLOAD_OFFSET <= self.len);
        // SAFETY: slot offsets come from SlotLayout::slot, are 8-aligned and
        // in bounds; the indicator is only ever accessed atomically.
        unsafe { &*self.base.as_ptr().add(slot.offset).cast::<AtomicU32>() }
    }

    // ---------------------------------------------------------------------
    // PAYLOAD FIELDS
    // ---------------------------------------------------------------------

    #[inline]
    fn field_ptr(&self, slot: Slot, field_offset: usize, width: usize) -> *mut u8 {
        assert!(
            field_offset + width <= self.layout.message_size,
            "field [{field_offset}, +{width}) outside message size {}",
            self.layout.message_size
        );
        debug_assert!(field_offset % width == 0, "misaligned field at {field_offset}");
        // SAFETY: bounds checked above against the slot's payload.
        unsafe {
            self.base
                .as_ptr()
                .add(slot.offset + PAYLOAD_OFFSET + field_offset)
        }
    }

    /// Stores the low `width` bytes of `bits` into a payload field.
    ///
    /// # Safety
    ///
    /// The caller must own the slot: it was claimed by `write_acquire` and has
    /// not yet been published with `write_release`.
    #[inline]
    pub(crate) unsafe fn store_field(&self, slot: Slot, field_offset: usize, width: usize, bits: u64) {
        let ptr = self.field_ptr(slot, field_offset, width);
        match width {
            1 => ptr.write(bits as u8),
            2 => ptr.cast::<u16>().write(bits as u16),
            4 => ptr.cast::<u32>().write(bits as u32),
            8 => ptr.cast::<u64>().write(bits),
            _ => unreachable!("unsupported field width {width}"),
        }
    }

    /// Loads a payload field of `width` bytes, zero-extended to 64 bits.
    ///
    /// # Safety
    ///
    /// The caller must hold the slot between `read_acquire` and `read_release`.
    #[inline]
    pub(crate) unsafe fn load_field(&self, slot: Slot, field_offset: usize, width: usize) -> u64 {
        let ptr = self.field_ptr(slot, field_offset, width);
        match width {
            1 => u64::from(ptr.read()),
            2 => u64::from(ptr.cast::<u16>().read()),
            4 => u64::from(ptr.cast::<u32>().read()),
            8 => ptr.cast::<u64>().read(),
            _ => unreachable!("unsupported field width {width}"),
        }
    }

    /// Raw pointer to a slot's payload, for callers doing their own layout.
    #[inline]
    pub(crate) fn payload_ptr(&self, slot: Slot) -> *mut u8 {
        // SAFETY: slot offsets are in bounds by construction.
        unsafe { self.base.as_ptr().add(slot.offset + PAYLOAD_OFFSET) }
    }
}

impl Drop for Region {
    fn drop(&mut self) {
        match &self.backing {
            Backing::Heap(layout) => {
                // SAFETY: allocated in Region::heap with exactly this layout.
                unsafe { alloc::dealloc(self.base.as_ptr(), *layout) }
            }
            #[cfg(feature = "mmap")]
            Backing::Mapped(_) => {}
        }
    }
}

impl std::fmt::Debug for Region {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Region")
            .field("len", &self.len)
            .field("layout", &self.layout)
            .field("mapped", &self.is_mapped())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;

    #[test]
    fn test_layout_stride_is_eight_aligned() {
        let layout = SlotLayout::new(16, 13).unwrap();
        assert_eq!(layout.stride(), 24);
        assert_eq!(layout.required_bytes(), HEADER_SIZE + 16 * 24);

        let empty = SlotLayout::new(4, 0).unwrap();
        assert_eq!(empty.stride(), PAYLOAD_OFFSET);
    }

    #[test]
    fn test_layout_rejects_overflow() {
        assert!(matches!(
            SlotLayout::new(1 << 30, usize::MAX / 2),
            Err(ChannelError::LayoutOverflow { .. })
        ));
    }

    #[test]
    fn test_layout_requires_power_of_two_capacity() {
        for capacity in [0, 3, 6, MAX_CAPACITY * 2] {
            assert_eq!(
                SlotLayout::new(capacity, 8),
                Err(ChannelError::InvalidCapacity {
                    requested: capacity,
                    max: MAX_CAPACITY,
                })
            );
        }
        assert_eq!(SlotLayout::new(1, 8).unwrap().mask(), 0);
        assert_eq!(SlotLayout::new(MAX_CAPACITY, 0).unwrap().capacity(), MAX_CAPACITY);
    }

    #[test]
    fn test_slot_offsets_wrap_with_mask() {
        let layout = SlotLayout::new(4, 16).unwrap();
        assert_eq!(layout.slot(0).offset(), HEADER_SIZE);
        assert_eq!(layout.slot(1).offset(), HEADER_SIZE + 24);
        assert_eq!(layout.slot(4).offset(), HEADER_SIZE);
        assert_eq!(layout.slot(6).index(), 6);
    }

    #[test]
    fn test_heap_region_starts_zeroed() {
        let region = Region::heap(SlotLayout::new(8, 16).unwrap());
        assert!(!region.is_mapped());
        assert_eq!(region.producer_index().load(Ordering::Relaxed), 0);
        assert_eq!(region.consumer_index().load(Ordering::Relaxed), 0);
        for i in 0..8 {
            let slot = region.layout().slot(i);
            assert_eq!(region.indicator(slot).load(Ordering::Relaxed), 0);
        }
    }

    #[test]
    fn test_field_store_load_widths() {
        let region = Region::heap(SlotLayout::new(2, 16).unwrap());
        let slot = region.layout().slot(1);
        unsafe {
            region.store_field(slot, 0, 1, 0xAB);
            region.store_field(slot, 2, 2, 0xBEEF);
            region.store_field(slot, 4, 4, 0xDEAD_BEEF);
            region.store_field(slot, 8, 8, u64::MAX - 1);
            assert_eq!(region.load_field(slot, 0, 1), 0xAB);
            assert_eq!(region.load_field(slot, 2, 2), 0xBEEF);
            assert_eq!(region.load_field(slot, 4, 4), 0xDEAD_BEEF);
            assert_eq!(region.load_field(slot, 8, 8), u64::MAX - 1);
        }
        // Neighbouring slot untouched
        let other = region.layout().slot(0);
        unsafe {
            assert_eq!(region.load_field(other, 8, 8), 0);
        }
    }

    #[test]
    #[should_panic(expected = "outside message size")]
    fn test_field_out_of_bounds_panics() {
        let region = Region::heap(SlotLayout::new(2, 8).unwrap());
        let slot = region.layout().slot(0);
        unsafe { region.store_field(slot, 8, 4, 1) };
    }

    #[cfg(feature = "mmap")]
    #[test]
    fn test_mapped_region_checks_length() {
        let layout = SlotLayout::new(16, 32).unwrap();
        let small = memmap2::MmapMut::map_anon(64).unwrap();
        assert!(matches!(
            Region::mapped(small, layout, true),
            Err(ChannelError::RegionTooSmall { .. })
        ));

        let map = memmap2::MmapMut::map_anon(layout.required_bytes()).unwrap();
        let region = Region::mapped(map, layout, true).unwrap();
        assert!(region.is_mapped());
        assert_eq!(region.producer_index().load(Ordering::Relaxed), 0);
    }

    #[cfg(feature = "mmap")]
    #[test]
    fn test_adopted_map_indices_are_checked() {
        let layout = SlotLayout::new(4, 8).unwrap();
        let adopt = |producer: u64, consumer: u64| {
            let mut map = memmap2::MmapMut::map_anon(layout.required_bytes()).unwrap();
            map[PRODUCER_INDEX_OFFSET..PRODUCER_INDEX_OFFSET + 8]
                .copy_from_slice(&producer.to_ne_bytes());
            map[CONSUMER_INDEX_OFFSET..CONSUMER_INDEX_OFFSET + 8]
                .copy_from_slice(&consumer.to_ne_bytes());
            Region::mapped(map, layout, false)
        };

        let region = adopt(7, 3).unwrap();
        assert_eq!(region.producer_index().load(Ordering::Relaxed), 7);
        assert!(adopt(9, 9).is_ok());
        assert_eq!(
            adopt(2, 5).unwrap_err(),
            ChannelError::InconsistentIndices {
                producer: 2,
                consumer: 5,
                capacity: 4,
            }
        );
        assert!(matches!(
            adopt(10, 5),
            Err(ChannelError::InconsistentIndices { .. })
        ));
    }
}
