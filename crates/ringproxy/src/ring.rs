use crate::protocol::{self, SlotProtocol};
use crate::region::{Region, Slot, SlotLayout};
use crate::{ChannelError, Config, MAX_CAPACITY};
use std::marker::PhantomData;
use std::num::NonZeroU32;

/// Fixed message size ring buffer - the slot engine under a channel.
///
/// Each slot holds one message of `message_size` payload bytes plus an
/// indicator; the indicator doubles as emptiness flag and message tag.
/// `P` selects the claim discipline ([`Spsc`](crate::Spsc) or
/// [`Mpsc`](crate::Mpsc)).
///
/// The slot operations are `unsafe` because the ring cannot itself enforce
/// how many threads act as producer or consumer;
/// [`Channel`](crate::Channel) is the safe front end.
///
/// # Example
///
/// ```
/// use ringproxy_rs::{Config, RingBuffer, Spsc};
///
/// let ring = RingBuffer::<Spsc>::new(&Config::new(10, false), 16).unwrap();
/// assert_eq!(ring.capacity(), 16);
///
/// unsafe {
///     let slot = ring.write_acquire().unwrap();
///     ring.payload_ptr(slot).cast::<u64>().write(42);
///     ring.write_release(slot, 1);
///
///     let (slot, call_type) = ring.read_acquire().unwrap();
///     assert_eq!(call_type.get(), 1);
///     assert_eq!(ring.payload_ptr(slot).cast::<u64>().read(), 42);
///     ring.read_release(slot);
/// }
/// assert!(ring.is_empty());
/// ```
pub struct RingBuffer<P: SlotProtocol> {
    region: Region,
    _protocol: PhantomData<P>,
}

impl<P: SlotProtocol> RingBuffer<P> {
    /// Creates a heap-backed ring with `message_size` payload bytes per slot.
    pub fn new(config: &Config, message_size: usize) -> Result<Self, ChannelError> {
        let capacity = config
            .effective_capacity()
            .ok_or(ChannelError::InvalidCapacity {
                requested: config.capacity,
                max: MAX_CAPACITY,
            })?;
        let layout = SlotLayout::new(capacity, message_size)?;
        Ok(Self::with_region(Region::heap(layout)))
    }

    /// Wraps an existing region (e.g. a memory map).
    pub fn with_region(region: Region) -> Self {
        Self {
            region,
            _protocol: PhantomData,
        }
    }

    // ---------------------------------------------------------------------
    // STATUS
    // ---------------------------------------------------------------------

    /// Effective (power of two) slot count.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.region.layout().capacity()
    }

    /// Payload bytes per slot.
    #[inline]
    pub fn message_size(&self) -> usize {
        self.region.layout().message_size()
    }

    /// Point-in-time estimate of `producer_index - consumer_index`.
    ///
    /// Concurrent producers may be mid-claim, so treat it as a bound only.
    #[inline]
    pub fn size(&self) -> usize {
        protocol::occupancy(&self.region)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    #[inline]
    pub fn region(&self) -> &Region {
        &self.region
    }

    // ---------------------------------------------------------------------
    // PRODUCER API
    // ---------------------------------------------------------------------

    /// Claims a slot, or `None` when no slot is free.
    ///
    /// # Safety
    ///
    /// No more than `P::MAX_PRODUCERS` threads may be producing at once.
    #[inline]
    pub unsafe fn write_acquire(&self) -> Option<Slot> {
        P::write_acquire(&self.region)
    }

    /// Publishes a claimed slot. `call_type_id` must be non-zero.
    ///
    /// # Safety
    ///
    /// `slot` must come from `write_acquire` on this ring and must not have
    /// been released already.
    #[inline]
    pub unsafe fn write_release(&self, slot: Slot, call_type_id: u32) {
        P::write_release(&self.region, slot, call_type_id);
    }

    // ---------------------------------------------------------------------
    // CONSUMER API
    // ---------------------------------------------------------------------

    /// Acquires the next committed slot and its call type.
    ///
    /// # Safety
    ///
    /// Only one thread may consume.
    #[inline]
    pub unsafe fn read_acquire(&self) -> Option<(Slot, NonZeroU32)> {
        P::read_acquire(&self.region)
    }

    /// Releases an acquired slot back to producers.
    ///
    /// # Safety
    ///
    /// `slot` must come from `read_acquire` on this ring and must not have
    /// been released already.
    #[inline]
    pub unsafe fn read_release(&self, slot: Slot) {
        P::read_release(&self.region, slot);
    }

    /// Raw pointer to a slot's payload (`message_size` bytes, 8-aligned).
    ///
    /// Dereferencing it is only sound while the caller owns the slot.
    #[inline]
    pub fn payload_ptr(&self, slot: Slot) -> *mut u8 {
        self.region.payload_ptr(slot)
    }
}

impl<P: SlotProtocol> std::fmt::Debug for RingBuffer<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RingBuffer")
            .field("protocol", &P::NAME)
            .field("capacity", &self.capacity())
            .field("message_size", &self.message_size())
            .field("size", &self.size())
            .finish()
    }
}
