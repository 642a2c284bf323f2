//! Miri-compatible tests for detecting undefined behavior.
//!
//! Run with: `cargo +nightly miri test --test miri_tests`
//!
//! Small capacities and few iterations keep interpretation fast while still
//! covering the unsafe paths: raw field stores and loads in the region, the
//! reference side-array cells, wrap-around, abandoned slots and teardown
//! with unconsumed references.

use ringproxy_rs::{
    BusySpin, CallReader, Config, FailFast, Interface, MpscChannel, RingBuffer, Spsc, SpscChannel,
};
use std::convert::Infallible;
use std::sync::Arc;
use std::thread;

fn interface() -> Interface {
    Interface::builder("Miri")
        .method("prims", |m| {
            m.primitive::<u8>().primitive::<u64>().primitive::<u16>()
        })
        .method("refs", |m| m.reference().references(2))
        .build()
        .unwrap()
}

/// Raw ring operations without the codec.
#[test]
fn miri_ring_raw_payload() {
    let ring = RingBuffer::<Spsc>::new(&Config::new(2, false), 16).unwrap();
    for round in 0..3u64 {
        unsafe {
            let slot = ring.write_acquire().unwrap();
            ring.payload_ptr(slot).cast::<u64>().write(round);
            ring.payload_ptr(slot).add(8).cast::<u64>().write(!round);
            ring.write_release(slot, 1);

            let (slot, _) = ring.read_acquire().unwrap();
            assert_eq!(ring.payload_ptr(slot).cast::<u64>().read(), round);
            assert_eq!(ring.payload_ptr(slot).add(8).cast::<u64>().read(), !round);
            ring.read_release(slot);
        }
    }
}

/// Fill and drain several times to exercise wrap-around of fields and cells.
#[test]
fn miri_channel_wrap_around() {
    let mut channel = SpscChannel::<Arc<u32>, _>::new(Config::new(2, false), interface(), FailFast)
        .unwrap();
    let mut producer = channel.register().unwrap();

    for round in 0..3u32 {
        for i in 0..2u32 {
            let mut call = producer.begin_call(2).unwrap();
            call.write_ref(Arc::new(round * 10 + i))
                .write_refs([Arc::new(i), Arc::new(round)])
                .unwrap();
            call.commit();
        }
        assert!(producer.try_begin_call(1).is_err());

        let mut sum = 0;
        let processed = channel
            .consume_with(8, |mut call: CallReader<'_, Arc<u32>>| {
                sum += *call.read_ref().unwrap();
                sum += call.read_refs().iter().map(|v| **v).sum::<u32>();
                Ok::<_, Infallible>(())
            })
            .unwrap();
        assert_eq!(processed, 2);
        assert_eq!(sum, (round * 20 + 1) + 1 + 2 * round);
    }
}

/// Dropping a channel with committed calls frees their references.
#[test]
fn miri_drop_with_pending_references() {
    let value = Arc::new(5u32);
    {
        let channel = SpscChannel::<Arc<u32>, _>::new(Config::new(4, false), interface(), FailFast)
            .unwrap();
        let mut producer = channel.register().unwrap();
        let mut call = producer.begin_call(2).unwrap();
        call.write_ref(Arc::clone(&value))
            .write_refs([Arc::clone(&value)])
            .unwrap();
        call.commit();
        assert_eq!(Arc::strong_count(&value), 3);
    }
    assert_eq!(Arc::strong_count(&value), 1);
}

/// A half-written call is abandoned, never read.
#[test]
fn miri_abandoned_call() {
    let mut channel = SpscChannel::<Arc<u32>, _>::new(Config::new(2, false), interface(), FailFast)
        .unwrap();
    let mut producer = channel.register().unwrap();
    {
        let mut call = producer.begin_call(1).unwrap();
        call.write(1u8);
    }
    let mut call = producer.begin_call(1).unwrap();
    call.write(2u8).write(u64::MAX).write(3u16);
    call.commit();

    let mut got = Vec::new();
    channel
        .consume_with(4, |mut call: CallReader<'_, Arc<u32>>| {
            got.push((call.read::<u8>(), call.read::<u64>(), call.read::<u16>()));
            Ok::<_, Infallible>(())
        })
        .unwrap();
    assert_eq!(got, [(2, u64::MAX, 3)]);
}

/// Two producers and a consumer, few iterations.
#[test]
fn miri_mpsc_threads() {
    let mut channel = MpscChannel::<Arc<u32>>::new(Config::new(4, false), interface(), BusySpin)
        .unwrap();
    let producer = channel.register().unwrap();

    let handles: Vec<_> = (0..2u8)
        .map(|id| {
            let mut producer = producer.clone();
            thread::spawn(move || {
                for i in 0..5u64 {
                    let mut call = producer.begin_call(1).unwrap();
                    call.write(id).write(i).write(0u16);
                    call.commit();
                }
            })
        })
        .collect();
    drop(producer);

    let mut total = 0;
    while total < 10 {
        total += channel
            .consume_with(4, |mut call: CallReader<'_, Arc<u32>>| {
                assert!(call.read::<u8>() < 2);
                assert!(call.read::<u64>() < 5);
                Ok::<_, Infallible>(())
            })
            .unwrap();
    }
    for handle in handles {
        handle.join().unwrap();
    }
}
