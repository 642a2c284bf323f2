use crate::invariants::{
    debug_assert_bounded_occupancy, debug_assert_committed_tag, debug_assert_monotonic,
    debug_assert_slot_free,
};
use crate::region::{Region, Slot};
use std::num::NonZeroU32;
use std::sync::atomic::Ordering;

// =============================================================================
// MEMORY ORDERING & SYNCHRONIZATION STRATEGY
// =============================================================================
//
// Every slot carries one indicator word. It is the only synchronization point
// for the slot's payload bytes and reference cells:
//
//   0            free / claimed-but-uncommitted
//   call type    committed, not yet released by the consumer
//
// ## Sequence Numbers
//
// `producer_index` and `consumer_index` are unbounded u64 sequence numbers;
// the physical slot is `index & (capacity - 1)`. At 10 billion calls/second
// a wrap takes ~58 years, so there is no ABA on the indices.
//
// ## Memory Ordering Protocol
//
// **Producer (claim → encode → publish):**
// 1. Load `consumer_index` with Acquire, bail out if the ring is full
// 2. Load the target indicator with Acquire; bail out unless it is 0. This
//    synchronizes with the consumer's Release clear, so the consumer's reads
//    of the previous occupant happen-before our writes
// 3. Claim the index (SPSC: plain store, MPSC: CAS)
// 4. Write payload fields and reference cells (no ordering needed)
// 5. Store the call type into the indicator with Release (publishes 4)
//
// **Consumer (acquire → decode → release):**
// 1. Load the indicator at `consumer_index` with Acquire; 0 means empty.
//    Synchronizes with step 5 above
// 2. Advance `consumer_index` (single writer, Release for producers' step 1)
// 3. Read payload fields, take reference cells
// 4. Store 0 into the indicator with Release (hands the slot back)
//
// Steps 5 and 4 must come last on their side, after both the byte payload and
// the reference cells. `publish` and `release` below are the only places that
// store an indicator.
//
// =============================================================================

/// Indicator tag for a slot whose producer claimed it but failed to encode.
///
/// The consumer releases such slots without dispatching them.
pub const ABANDONED_CALL: u32 = u32::MAX;

/// Slot-claiming discipline over a [`Region`].
///
/// The read side is shared: there is exactly one consumer in both variants,
/// so only the write-side claim differs.
pub trait SlotProtocol: Send + Sync + 'static {
    /// Producers allowed to write concurrently.
    const MAX_PRODUCERS: usize;

    /// Short name used in log output.
    const NAME: &'static str;

    /// Claims the slot at the current producer index, or `None` if no slot is
    /// free (ring full, or the consumer has not yet released the target slot).
    ///
    /// # Safety
    ///
    /// At most [`Self::MAX_PRODUCERS`] threads may call this concurrently.
    unsafe fn write_acquire(region: &Region) -> Option<Slot>;

    /// Publishes a claimed slot under `call_type_id`.
    #[inline]
    fn write_release(region: &Region, slot: Slot, call_type_id: u32) {
        publish(region, slot, call_type_id);
    }

    /// Acquires the next committed slot, or `None` if the ring is empty.
    ///
    /// # Safety
    ///
    /// Only one thread may act as consumer.
    #[inline]
    unsafe fn read_acquire(region: &Region) -> Option<(Slot, NonZeroU32)> {
        let consumer = region.consumer_index().load(Ordering::Relaxed);
        let slot = region.layout().slot(consumer);
        let call_type_id = is_committed(region, slot)?;

        let next = consumer + 1;
        debug_assert_monotonic!("consumer_index", consumer, next);
        region.consumer_index().store(next, Ordering::Release);
        Some((slot, call_type_id))
    }

    /// Hands an acquired slot back to producers.
    #[inline]
    fn read_release(region: &Region, slot: Slot) {
        release(region, slot);
    }
}

/// Single producer, single consumer.
#[derive(Debug)]
pub enum Spsc {}

/// Multiple producers (CAS claim), single consumer.
#[derive(Debug)]
pub enum Mpsc {}

impl SlotProtocol for Spsc {
    const MAX_PRODUCERS: usize = 1;
    const NAME: &'static str = "spsc";

    #[inline]
    unsafe fn write_acquire(region: &Region) -> Option<Slot> {
        let layout = region.layout();
        // Only this producer writes producer_index.
        let producer = region.producer_index().load(Ordering::Relaxed);
        let consumer = region.consumer_index().load(Ordering::Acquire);
        if producer - consumer >= layout.capacity() as u64 {
            return None;
        }

        // The consumer advances its index on acquire, before it releases the
        // slot, so the index difference alone does not prove the slot is free.
        let slot = layout.slot(producer);
        if !is_released(region, slot) {
            return None;
        }

        let next = producer + 1;
        debug_assert_monotonic!("producer_index", producer, next);
        debug_assert_bounded_occupancy!(next, consumer, layout.capacity());
        region.producer_index().store(next, Ordering::Relaxed);
        Some(slot)
    }
}

impl SlotProtocol for Mpsc {
    const MAX_PRODUCERS: usize = usize::MAX;
    const NAME: &'static str = "mpsc";

    #[inline]
    unsafe fn write_acquire(region: &Region) -> Option<Slot> {
        let layout = region.layout();
        loop {
            let producer = region.producer_index().load(Ordering::Acquire);
            let slot = layout.slot(producer);

            let consumer = region.consumer_index().load(Ordering::Acquire);
            if producer >= consumer + layout.capacity() as u64 {
                return None;
            }

            // Per-slot check: another producer may have raced ahead of a
            // consumer that acquired this slot but has not released it yet.
            if !is_released(region, slot) {
                return None;
            }

            if region
                .producer_index()
                .compare_exchange_weak(producer, producer + 1, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                debug_assert_bounded_occupancy!(producer + 1, consumer, layout.capacity());
                debug_assert_slot_free!(region.indicator(slot).load(Ordering::Relaxed), producer);
                return Some(slot);
            }
        }
    }
}

// =============================================================================
// INDICATOR PREDICATES AND STORES
// =============================================================================

/// Consumer-side predicate: the slot holds a committed call ready to read.
#[inline]
pub fn is_committed(region: &Region, slot: Slot) -> Option<NonZeroU32> {
    NonZeroU32::new(region.indicator(slot).load(Ordering::Acquire))
}

/// Producer-side predicate: the consumer has released the slot's previous
/// occupant, so it may be claimed again.
#[inline]
pub fn is_released(region: &Region, slot: Slot) -> bool {
    region.indicator(slot).load(Ordering::Acquire) == 0
}

#[inline]
fn publish(region: &Region, slot: Slot, call_type_id: u32) {
    debug_assert_committed_tag!(call_type_id);
    region.indicator(slot).store(call_type_id, Ordering::Release);
}

#[inline]
fn release(region: &Region, slot: Slot) {
    region.indicator(slot).store(0, Ordering::Release);
}

/// Snapshot of claimed-but-not-acquired plus in-flight slots.
///
/// Loads the consumer index first so the difference cannot underflow; the
/// result is clamped because the two loads are not one atomic snapshot.
#[inline]
pub fn occupancy(region: &Region) -> usize {
    let consumer = region.consumer_index().load(Ordering::Acquire);
    let producer = region.producer_index().load(Ordering::Acquire);
    (producer.saturating_sub(consumer) as usize).min(region.layout().capacity())
}
