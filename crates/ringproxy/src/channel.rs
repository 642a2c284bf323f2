use crate::codec::{CallReader, CallWriter};
use crate::descriptor::Interface;
use crate::metrics::{Metrics, MetricsSnapshot};
use crate::protocol::{Mpsc, SlotProtocol, Spsc, ABANDONED_CALL};
use crate::references::ReferenceArray;
use crate::region::{Region, Slot, SlotLayout};
use crate::ring::RingBuffer;
use crate::wait::{BusySpin, GiveUp, WaitStrategy};
use crate::{CallError, ChannelError, Config, DispatchError};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// The consumer-side implementation of a proxied interface.
///
/// `dispatch` receives each call in ring order and decodes its arguments
/// from the [`CallReader`]. An error aborts the current `consume` batch
/// after the failing call's slot has been released.
pub trait Dispatcher<R> {
    type Error;

    fn dispatch(&mut self, call: CallReader<'_, R>) -> Result<(), Self::Error>;
}

impl<R, E, F> Dispatcher<R> for F
where
    F: FnMut(CallReader<'_, R>) -> Result<(), E>,
{
    type Error = E;

    #[inline]
    fn dispatch(&mut self, call: CallReader<'_, R>) -> Result<(), E> {
        self(call)
    }
}

struct Shared<R, P: SlotProtocol, W> {
    ring: RingBuffer<P>,
    refs: ReferenceArray<R>,
    interface: Interface,
    wait: W,
    metrics: Metrics,
    enable_metrics: bool,
    producers: AtomicUsize,
}

impl<R, P: SlotProtocol, W> Shared<R, P, W> {
    #[inline]
    fn metrics(&self) -> Option<&Metrics> {
        self.enable_metrics.then_some(&self.metrics)
    }
}

/// A method-call channel for one [`Interface`].
///
/// Producers obtained from [`register`](Self::register) encode calls into
/// the ring; the owner of the channel is the single consumer and drains it
/// with [`consume`](Self::consume). `R` is the type carried by reference
/// arguments, `P` the slot protocol, `W` the producers' wait strategy.
///
/// # Example
///
/// ```
/// use ringproxy_rs::{CallReader, Config, FailFast, Interface, MpscChannel};
/// use std::convert::Infallible;
///
/// let iface = Interface::builder("Counter")
///     .method("add", |m| m.primitive::<u64>())
///     .build()
///     .unwrap();
/// let mut channel = MpscChannel::<(), _>::new(Config::default(), iface, FailFast).unwrap();
///
/// let mut producer = channel.register().unwrap();
/// for n in 1..=3u64 {
///     let mut call = producer.begin_call(1).unwrap();
///     call.write(n);
///     call.commit();
/// }
///
/// let mut total = 0;
/// let processed = channel
///     .consume_with(16, |mut call: CallReader<'_, ()>| {
///         total += call.read::<u64>();
///         Ok::<_, Infallible>(())
///     })
///     .unwrap();
/// assert_eq!((processed, total), (3, 6));
/// ```
pub struct Channel<R, P: SlotProtocol, W = BusySpin> {
    shared: Arc<Shared<R, P, W>>,
}

/// Single-producer channel.
pub type SpscChannel<R, W = BusySpin> = Channel<R, Spsc, W>;

/// Multi-producer channel.
pub type MpscChannel<R, W = BusySpin> = Channel<R, Mpsc, W>;

impl<R, P: SlotProtocol, W: WaitStrategy> Channel<R, P, W> {
    /// Creates a heap-backed channel sized for `interface`.
    pub fn new(config: Config, interface: Interface, wait: W) -> Result<Self, ChannelError> {
        let ring = RingBuffer::new(&config, interface.message_size())?;
        Ok(Self::assemble(ring, interface, wait, config.enable_metrics))
    }

    /// Creates a channel over a caller-provided region, e.g. a memory map.
    ///
    /// The region's layout must have room for the interface's widest call;
    /// see [`Interface::slot_layout`].
    pub fn with_region(
        region: Region,
        interface: Interface,
        wait: W,
        enable_metrics: bool,
    ) -> Result<Self, ChannelError> {
        let layout = *region.layout();
        if layout.message_size() < interface.message_size() {
            let needed = SlotLayout::new(layout.capacity(), interface.message_size())?;
            return Err(ChannelError::RegionTooSmall {
                required: needed.required_bytes(),
                actual: region.len(),
            });
        }
        let ring = RingBuffer::with_region(region);
        Ok(Self::assemble(ring, interface, wait, enable_metrics))
    }

    fn assemble(ring: RingBuffer<P>, interface: Interface, wait: W, enable_metrics: bool) -> Self {
        let refs = ReferenceArray::new(ring.capacity(), interface.reference_arity());
        log::debug!(
            "{} channel for {}: capacity {}, message size {}, reference arity {}",
            P::NAME,
            interface.name(),
            ring.capacity(),
            ring.message_size(),
            interface.reference_arity()
        );
        Self {
            shared: Arc::new(Shared {
                ring,
                refs,
                interface,
                wait,
                metrics: Metrics::new(),
                enable_metrics,
                producers: AtomicUsize::new(0),
            }),
        }
    }

    /// Registers a producer.
    ///
    /// A single-producer channel hands out one producer at a time; a new one
    /// can be registered after the previous one is dropped.
    pub fn register(&self) -> Result<Producer<R, P, W>, ChannelError> {
        self.shared
            .producers
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < P::MAX_PRODUCERS).then_some(n + 1)
            })
            .map_err(|_| ChannelError::TooManyProducers {
                max: P::MAX_PRODUCERS,
            })?;
        log::debug!(
            "registered {} producer for {}",
            P::NAME,
            self.shared.interface.name()
        );
        Ok(Producer {
            shared: Arc::clone(&self.shared),
        })
    }

    /// Dispatches up to `limit` committed calls, in ring order.
    ///
    /// Returns the number dispatched, which is smaller than `limit` when the
    /// ring runs empty. Abandoned slots are released without dispatch and
    /// are not counted. If the dispatcher fails, the failing call's slot is
    /// released first and the error reports how many calls preceded it.
    pub fn consume<D>(
        &mut self,
        dispatcher: &mut D,
        limit: usize,
    ) -> Result<usize, DispatchError<D::Error>>
    where
        D: Dispatcher<R> + ?Sized,
    {
        let shared = &*self.shared;
        let mut processed = 0;
        while processed < limit {
            // SAFETY: `&mut self` on the only channel handle makes this the
            // only consumer.
            let Some((slot, call_type)) = (unsafe { shared.ring.read_acquire() }) else {
                break;
            };
            let _release = ReleaseGuard { shared, slot };

            let Some(descriptor) = shared.interface.descriptor(call_type.get()) else {
                if call_type.get() != ABANDONED_CALL {
                    log::warn!(
                        "skipping slot {} with unknown call type {}",
                        slot.index(),
                        call_type
                    );
                }
                continue;
            };
            // SAFETY: acquired above, released by the guard.
            let call = unsafe { CallReader::new(shared.ring.region(), &shared.refs, descriptor, slot) };
            if let Err(source) = dispatcher.dispatch(call) {
                if let Some(metrics) = shared.metrics() {
                    metrics.add_calls_consumed(processed as u64);
                    metrics.add_dispatch_failure();
                }
                return Err(DispatchError { processed, source });
            }
            processed += 1;
        }
        if let Some(metrics) = shared.metrics() {
            metrics.add_calls_consumed(processed as u64);
        }
        Ok(processed)
    }

    /// [`consume`](Self::consume) with a closure as the dispatcher.
    pub fn consume_with<F, E>(&mut self, limit: usize, mut dispatch: F) -> Result<usize, DispatchError<E>>
    where
        F: FnMut(CallReader<'_, R>) -> Result<(), E>,
    {
        self.consume(&mut dispatch, limit)
    }

    // ---------------------------------------------------------------------
    // STATUS
    // ---------------------------------------------------------------------

    /// Point-in-time count of claimed, not yet consumed slots.
    #[inline]
    pub fn size(&self) -> usize {
        self.shared.ring.size()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.shared.ring.is_empty()
    }

    /// Effective (power of two) capacity.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.shared.ring.capacity()
    }

    #[inline]
    pub fn interface(&self) -> &Interface {
        &self.shared.interface
    }

    /// Currently registered producers.
    pub fn producer_count(&self) -> usize {
        self.shared.producers.load(Ordering::Acquire)
    }

    /// Counter snapshot; all zero unless metrics are enabled.
    pub fn metrics(&self) -> MetricsSnapshot {
        self.shared.metrics.snapshot()
    }
}

impl<R, P: SlotProtocol, W> std::fmt::Debug for Channel<R, P, W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("interface", &self.shared.interface.name())
            .field("ring", &self.shared.ring)
            .field("producers", &self.shared.producers.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

/// Clears a consumed slot's references and hands it back to producers,
/// even if dispatch panics.
struct ReleaseGuard<'a, R, P: SlotProtocol, W> {
    shared: &'a Shared<R, P, W>,
    slot: Slot,
}

impl<R, P: SlotProtocol, W> Drop for ReleaseGuard<'_, R, P, W> {
    fn drop(&mut self) {
        // SAFETY: the consumer still holds the acquired slot.
        unsafe { self.shared.refs.clear(self.slot.index()) };
        P::read_release(self.shared.ring.region(), self.slot);
    }
}

/// Call-emitting handle for a [`Channel`].
///
/// Each call goes through [`begin_call`](Self::begin_call), the argument
/// writes, and [`CallWriter::commit`]. Taking `&mut self` keeps one call in
/// flight per producer, so a producer's calls reach the consumer in the
/// order they were made.
pub struct Producer<R, P: SlotProtocol, W = BusySpin> {
    shared: Arc<Shared<R, P, W>>,
}

impl<R, P: SlotProtocol, W: WaitStrategy> Producer<R, P, W> {
    /// Claims a slot for a call to `call_type_id`, waiting as the channel's
    /// wait strategy decides while the ring is full.
    pub fn begin_call(&mut self, call_type_id: u32) -> Result<CallWriter<'_, R>, CallError> {
        if self.shared.interface.descriptor(call_type_id).is_none() {
            return Err(CallError::UnknownCall(call_type_id));
        }
        let slot = self.claim_waiting()?;
        // SAFETY: the slot was just claimed by this producer.
        Ok(unsafe { self.writer(call_type_id, slot) })
    }

    /// Claim loop: retries `write_acquire` until a slot frees up or the
    /// wait strategy gives up.
    fn claim_waiting(&self) -> Result<Slot, CallError> {
        let shared = &*self.shared;
        let mut counter = 0;
        let mut idle_rounds = 0u64;
        let slot = loop {
            // SAFETY: register() bounds the producers to P::MAX_PRODUCERS.
            if let Some(slot) = unsafe { shared.ring.write_acquire() } {
                break slot;
            }
            idle_rounds += 1;
            match shared.wait.idle(counter) {
                Ok(next) => counter = next,
                Err(GiveUp) => {
                    if let Some(metrics) = shared.metrics() {
                        metrics.add_idle_rounds(idle_rounds);
                    }
                    return Err(CallError::QueueFull {
                        capacity: shared.ring.capacity(),
                    });
                }
            }
        };
        if idle_rounds > 0 {
            if let Some(metrics) = shared.metrics() {
                metrics.add_idle_rounds(idle_rounds);
            }
        }
        Ok(slot)
    }

    /// Claims a slot without waiting; `QueueFull` if none is free.
    pub fn try_begin_call(&mut self, call_type_id: u32) -> Result<CallWriter<'_, R>, CallError> {
        let shared = &*self.shared;
        if shared.interface.descriptor(call_type_id).is_none() {
            return Err(CallError::UnknownCall(call_type_id));
        }
        // SAFETY: register() bounds the producers to P::MAX_PRODUCERS.
        match unsafe { shared.ring.write_acquire() } {
            // SAFETY: the slot was just claimed by this producer.
            Some(slot) => Ok(unsafe { self.writer(call_type_id, slot) }),
            None => Err(CallError::QueueFull {
                capacity: shared.ring.capacity(),
            }),
        }
    }

    /// # Safety
    ///
    /// `slot` must be claimed and unpublished, and `call_type_id` known.
    unsafe fn writer(&self, call_type_id: u32, slot: Slot) -> CallWriter<'_, R> {
        let shared = &*self.shared;
        let descriptor = shared
            .interface
            .descriptor(call_type_id)
            .unwrap_or_else(|| unreachable!("call type checked by caller"));
        CallWriter::new(
            shared.ring.region(),
            &shared.refs,
            descriptor,
            slot,
            P::write_release,
            shared.metrics(),
        )
    }

    #[inline]
    pub fn interface(&self) -> &Interface {
        &self.shared.interface
    }

    /// Effective (power of two) capacity of the channel.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.shared.ring.capacity()
    }
}

impl<R, W: WaitStrategy> Producer<R, Mpsc, W> {
    /// [`begin_call`](Self::begin_call) through a shared handle.
    ///
    /// MPSC claims are CAS-based, so one handle may serve several threads
    /// at once (e.g. behind a `log::Log` implementation). Calls made
    /// concurrently through it are ordered by their claims only.
    pub fn begin_call_shared(&self, call_type_id: u32) -> Result<CallWriter<'_, R>, CallError> {
        let shared = &*self.shared;
        if shared.interface.descriptor(call_type_id).is_none() {
            return Err(CallError::UnknownCall(call_type_id));
        }
        let slot = self.claim_waiting()?;
        // SAFETY: the slot was just claimed through this handle.
        Ok(unsafe { self.writer(call_type_id, slot) })
    }
}

impl<R, W> Clone for Producer<R, Mpsc, W> {
    fn clone(&self) -> Self {
        self.shared.producers.fetch_add(1, Ordering::Relaxed);
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<R, P: SlotProtocol, W> Drop for Producer<R, P, W> {
    fn drop(&mut self) {
        self.shared.producers.fetch_sub(1, Ordering::Release);
    }
}

impl<R, P: SlotProtocol, W> std::fmt::Debug for Producer<R, P, W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Producer")
            .field("protocol", &P::NAME)
            .field("interface", &self.shared.interface.name())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wait::FailFast;
    use std::convert::Infallible;
    use std::panic::{self, AssertUnwindSafe};

    fn counter_interface() -> Interface {
        Interface::builder("Counter")
            .method("add", |m| m.primitive::<u32>())
            .method("label", |m| m.reference())
            .build()
            .unwrap()
    }

    fn send<P: SlotProtocol, W: WaitStrategy>(producer: &mut Producer<String, P, W>, n: u32) {
        let mut call = producer.begin_call(1).unwrap();
        call.write(n);
        call.commit();
    }

    fn drain<P: SlotProtocol, W: WaitStrategy>(channel: &mut Channel<String, P, W>) -> Vec<u32> {
        let mut seen = Vec::new();
        channel
            .consume_with(usize::MAX, |mut call: CallReader<'_, String>| {
                seen.push(call.read::<u32>());
                Ok::<_, Infallible>(())
            })
            .unwrap();
        seen
    }

    #[test]
    fn test_spsc_allows_one_producer_at_a_time() {
        let channel = SpscChannel::<String>::new(Config::default(), counter_interface(), BusySpin)
            .unwrap();
        let first = channel.register().unwrap();
        assert_eq!(
            channel.register().unwrap_err(),
            ChannelError::TooManyProducers { max: 1 }
        );
        drop(first);
        assert!(channel.register().is_ok());
    }

    #[test]
    fn test_mpsc_producer_clones_are_counted() {
        let channel = MpscChannel::<String>::new(Config::default(), counter_interface(), BusySpin)
            .unwrap();
        let producer = channel.register().unwrap();
        let clone = producer.clone();
        assert_eq!(channel.producer_count(), 2);
        drop(producer);
        drop(clone);
        assert_eq!(channel.producer_count(), 0);
    }

    #[test]
    fn test_unknown_call_is_rejected() {
        let channel = MpscChannel::<String>::new(Config::default(), counter_interface(), BusySpin)
            .unwrap();
        let mut producer = channel.register().unwrap();
        assert_eq!(producer.begin_call(0).unwrap_err(), CallError::UnknownCall(0));
        assert_eq!(producer.try_begin_call(3).unwrap_err(), CallError::UnknownCall(3));
        assert!(channel.is_empty());
    }

    #[test]
    fn test_consume_respects_limit() {
        let mut channel =
            SpscChannel::<String>::new(Config::new(8, false), counter_interface(), BusySpin)
                .unwrap();
        let mut producer = channel.register().unwrap();
        for n in 0..5 {
            send(&mut producer, n);
        }
        let mut seen = Vec::new();
        let processed = channel
            .consume_with(3, |mut call: CallReader<'_, String>| {
                seen.push(call.read::<u32>());
                Ok::<_, Infallible>(())
            })
            .unwrap();
        assert_eq!(processed, 3);
        assert_eq!(seen, [0, 1, 2]);
        assert_eq!(channel.size(), 2);
        assert_eq!(drain(&mut channel), [3, 4]);
    }

    #[test]
    fn test_try_begin_call_fails_when_full() {
        let mut channel =
            SpscChannel::<String>::new(Config::new(2, false), counter_interface(), BusySpin)
                .unwrap();
        let mut producer = channel.register().unwrap();
        send(&mut producer, 1);
        send(&mut producer, 2);
        assert_eq!(
            producer.try_begin_call(1).unwrap_err(),
            CallError::QueueFull { capacity: 2 }
        );
        assert_eq!(drain(&mut channel), [1, 2]);
        assert!(producer.try_begin_call(1).is_ok());
    }

    #[test]
    fn test_dispatch_error_releases_failing_slot() {
        let mut channel =
            MpscChannel::<String, _>::new(Config::new(4, true), counter_interface(), FailFast)
                .unwrap();
        let mut producer = channel.register().unwrap();
        for n in 0..3 {
            send(&mut producer, n);
        }
        let err = channel
            .consume_with(10, |mut call: CallReader<'_, String>| match call.read::<u32>() {
                1 => Err("one"),
                _ => Ok(()),
            })
            .unwrap_err();
        assert_eq!(err.processed, 1);
        assert_eq!(err.source, "one");
        assert_eq!(drain(&mut channel), [2]);

        let metrics = channel.metrics();
        assert_eq!(metrics.calls_produced, 3);
        assert_eq!(metrics.calls_consumed, 2);
        assert_eq!(metrics.dispatch_failures, 1);
    }

    #[test]
    fn test_panicking_dispatch_still_releases_slot() {
        let mut channel =
            SpscChannel::<String, _>::new(Config::new(1, false), counter_interface(), FailFast)
                .unwrap();
        let mut producer = channel.register().unwrap();
        send(&mut producer, 9);

        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            channel.consume_with(1, |_call: CallReader<'_, String>| -> Result<(), Infallible> {
                panic!("dispatch blew up")
            })
        }));
        assert!(result.is_err());
        assert!(channel.is_empty());
        send(&mut producer, 10);
        assert_eq!(drain(&mut channel), [10]);
    }

    #[test]
    fn test_unread_references_are_dropped_on_release() {
        let mut channel =
            SpscChannel::<Arc<str>, _>::new(Config::new(2, false), counter_interface(), FailFast)
                .unwrap();
        let mut producer = channel.register().unwrap();
        let label: Arc<str> = Arc::from("label");
        let mut call = producer.begin_call(2).unwrap();
        call.write_ref(Arc::clone(&label));
        call.commit();
        assert_eq!(Arc::strong_count(&label), 2);

        let processed = channel
            .consume_with(1, |_call: CallReader<'_, Arc<str>>| Ok::<_, Infallible>(()))
            .unwrap();
        assert_eq!(processed, 1);
        assert_eq!(Arc::strong_count(&label), 1);
    }

    #[test]
    fn test_abandoned_calls_are_skipped() {
        let mut channel =
            MpscChannel::<String, _>::new(Config::new(4, true), counter_interface(), FailFast)
                .unwrap();
        let mut producer = channel.register().unwrap();
        send(&mut producer, 1);
        drop(producer.begin_call(1).unwrap());
        send(&mut producer, 3);

        assert_eq!(drain(&mut channel), [1, 3]);
        assert!(channel.is_empty());
        assert_eq!(channel.metrics().calls_abandoned, 1);
        assert_eq!(channel.metrics().calls_consumed, 2);
    }

    #[test]
    fn test_shared_mpsc_handle_across_threads() {
        let mut channel =
            MpscChannel::<String>::new(Config::new(256, false), counter_interface(), BusySpin)
                .unwrap();
        let producer = channel.register().unwrap();
        std::thread::scope(|s| {
            for t in 0..4u32 {
                let producer = &producer;
                s.spawn(move || {
                    for i in 0..50 {
                        let mut call = producer.begin_call_shared(1).unwrap();
                        call.write(t * 1000 + i);
                        call.commit();
                    }
                });
            }
        });
        let mut seen = drain(&mut channel);
        seen.sort_unstable();
        let expected: Vec<u32> = (0..4).flat_map(|t| (0..50).map(move |i| t * 1000 + i)).collect();
        assert_eq!(seen, expected);
        assert_eq!(channel.producer_count(), 1);
    }

    #[test]
    fn test_region_must_fit_interface() {
        let region = Region::heap(SlotLayout::new(4, 2).unwrap());
        let err = SpscChannel::<String>::with_region(region, counter_interface(), BusySpin, false)
            .unwrap_err();
        assert!(matches!(err, ChannelError::RegionTooSmall { .. }));
    }

    #[test]
    fn test_caller_region_needs_power_of_two_slots() {
        assert_eq!(
            SlotLayout::new(3, 4).unwrap_err(),
            ChannelError::InvalidCapacity {
                requested: 3,
                max: crate::MAX_CAPACITY,
            }
        );

        let region = Region::heap(SlotLayout::new(4, 4).unwrap());
        let mut channel =
            MpscChannel::<String, _>::with_region(region, counter_interface(), FailFast, false)
                .unwrap();
        let producer = channel.register().unwrap();
        let mut first = producer.begin_call_shared(1).unwrap();
        let mut second = producer.begin_call_shared(1).unwrap();
        first.write(111u32);
        second.write(222u32);
        first.commit();
        second.commit();
        assert_eq!(drain(&mut channel), [111, 222]);
    }
}
