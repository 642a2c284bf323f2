//! RingProxy - Lock-Free Method-Call Channels
//!
//! Producers invoke methods of an [`Interface`] by encoding each call into a
//! fixed-size slot of a ring buffer; a single consumer later decodes the
//! calls and dispatches them to the real implementation. A call costs the
//! producer one slot claim, a few plain stores and one release store.
//!
//! # Key Features
//!
//! - One indicator word per slot, both emptiness flag and call type tag
//! - SPSC (plain index store) and MPSC (CAS claim) slot protocols
//! - Primitive arguments in the ring, owned references in a co-indexed side-array
//! - 128-byte separated indices (prefetcher false sharing elimination)
//! - Pluggable producer backpressure: spin, yield, park, fail fast
//! - Optional memory-mapped backing (`mmap` feature)
//!
//! # Example
//!
//! ```
//! use ringproxy_rs::{BusySpin, CallReader, Config, Interface, SpscChannel};
//! use std::convert::Infallible;
//!
//! let greeter = Interface::builder("Greeter")
//!     .method("greet", |m| m.primitive::<u32>().reference())
//!     .build()
//!     .unwrap();
//! let mut channel = SpscChannel::<String>::new(Config::default(), greeter, BusySpin).unwrap();
//! let mut producer = channel.register().unwrap();
//!
//! let mut call = producer.begin_call(1).unwrap();
//! call.write(3u32).write_ref("world".to_string());
//! call.commit();
//!
//! channel
//!     .consume_with(64, |mut call: CallReader<'_, String>| {
//!         let times = call.read::<u32>();
//!         let name = call.read_ref().unwrap_or_default();
//!         for _ in 0..times {
//!             println!("hello {name}");
//!         }
//!         Ok::<_, Infallible>(())
//!     })
//!     .unwrap();
//! ```

mod backoff;
mod channel;
mod codec;
mod config;
mod descriptor;
mod error;
mod invariants;
mod metrics;
mod protocol;
mod references;
mod region;
mod ring;
mod wait;

pub use backoff::Backoff;
pub use channel::{Channel, Dispatcher, MpscChannel, Producer, SpscChannel};
pub use codec::{CallReader, CallWriter};
pub use config::{Config, HIGH_THROUGHPUT_CONFIG, LOW_LATENCY_CONFIG, MAX_CAPACITY};
pub use descriptor::{
    CallDescriptor, DescriptorBuilder, Field, FieldKind, Interface, InterfaceBuilder, Primitive,
};
pub use error::{CallError, ChannelError, DispatchError};
pub use metrics::{Metrics, MetricsSnapshot};
pub use protocol::{is_committed, is_released, Mpsc, SlotProtocol, Spsc, ABANDONED_CALL};
pub use region::{Region, Slot, SlotLayout, CACHE_LINE, HEADER_SIZE, PAYLOAD_OFFSET};
pub use ring::RingBuffer;
pub use wait::{BackoffThenFail, BusySpin, FailFast, GiveUp, Parking, WaitStrategy, Yielding};
