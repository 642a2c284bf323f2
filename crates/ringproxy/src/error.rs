//! Error types for channel construction, producing and consuming.

use thiserror::Error;

/// Errors raised while building a channel or registering a producer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ChannelError {
    /// Requested capacity is zero or too large to round to a power of two.
    #[error("invalid capacity {requested} (must be in 1..={max})")]
    InvalidCapacity {
        /// The capacity asked for.
        requested: usize,
        /// The largest accepted capacity.
        max: usize,
    },

    /// The interface declares no methods.
    #[error("interface declares no methods")]
    EmptyInterface,

    /// Too many producers registered (a single-producer channel allows one).
    #[error("too many producers registered (max: {max})")]
    TooManyProducers {
        /// The maximum number of producers for this slot protocol.
        max: usize,
    },

    /// Slot count times slot stride does not fit in memory.
    #[error("ring layout overflows: {capacity} slots of {message_size} bytes")]
    LayoutOverflow {
        /// Effective slot count.
        capacity: usize,
        /// Payload bytes per slot.
        message_size: usize,
    },

    /// An adopted region's indices break `consumer <= producer <= consumer + capacity`.
    #[error("inconsistent ring indices: producer {producer}, consumer {consumer}, capacity {capacity}")]
    InconsistentIndices {
        /// Adopted producer index.
        producer: u64,
        /// Adopted consumer index.
        consumer: u64,
        /// Slot count of the layout.
        capacity: usize,
    },

    /// A caller-supplied backing region cannot hold the ring.
    #[error("backing region too small: need {required} bytes, have {actual}")]
    RegionTooSmall {
        /// Bytes the ring layout needs.
        required: usize,
        /// Bytes the region provides.
        actual: usize,
    },
}

/// Errors surfaced to the producing caller of a proxied method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CallError {
    /// No slot was free and the wait strategy gave up.
    #[error("queue is full (capacity {capacity})")]
    QueueFull {
        /// Effective capacity of the channel.
        capacity: usize,
    },

    /// A variable-arity argument carried more elements than its descriptor reserves.
    #[error("call {call_type_id}: {actual} variable arguments exceed reserved arity {max}")]
    ArgumentOverflow {
        /// Method whose call overflowed.
        call_type_id: u32,
        /// Elements reserved at descriptor construction.
        max: usize,
        /// Elements supplied at call time.
        actual: usize,
    },

    /// The call type id is not part of this channel's interface.
    #[error("unknown call type id {0}")]
    UnknownCall(u32),
}

impl CallError {
    /// Returns `true` if retrying the same call may succeed (e.g., `QueueFull`).
    #[inline]
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::QueueFull { .. })
    }
}

/// An error raised by the dispatched implementation while consuming.
///
/// The slot holding the failing call is already released when this is
/// returned; calls dispatched before it in the same batch stay processed.
#[derive(Debug, Error)]
#[error("dispatch failed after {processed} calls in batch")]
pub struct DispatchError<E> {
    /// Calls completed in this batch before the failure.
    pub processed: usize,
    /// The implementation's error.
    #[source]
    pub source: E,
}

impl<E> DispatchError<E> {
    /// Unwraps the implementation's error.
    pub fn into_source(self) -> E {
        self.source
    }
}
