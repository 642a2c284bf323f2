//! Call codec: arguments in and out of a slot, following a [`CallDescriptor`].
//!
//! [`CallWriter`] encodes one call into a claimed slot and publishes it on
//! [`commit`](CallWriter::commit). [`CallReader`] decodes an acquired slot
//! for the consumer. Both walk the descriptor's fields in declaration order,
//! so a reader sees arguments in exactly the order they were written.
//!
//! A writer that is dropped without committing (early `?` return on
//! [`CallError::ArgumentOverflow`], a panic while encoding) still owns a
//! claimed slot that the consumer will wait on. It publishes the slot as
//! [`ABANDONED_CALL`] after dropping any references already written, and the
//! consumer skips it.

use crate::descriptor::{CallDescriptor, Field, Primitive};
use crate::metrics::Metrics;
use crate::protocol::ABANDONED_CALL;
use crate::references::ReferenceArray;
use crate::region::{Region, Slot};
use crate::CallError;

/// Publishes a slot under a call type id (the protocol's `write_release`).
pub(crate) type Publish = fn(&Region, Slot, u32);

/// Encodes the arguments of one call into a claimed slot.
///
/// Arguments must be written in declaration order with the declared types;
/// anything else is a programming error and panics (the slot is then
/// abandoned, not leaked).
#[must_use = "a call is only delivered once committed"]
pub struct CallWriter<'a, R> {
    region: &'a Region,
    refs: &'a ReferenceArray<R>,
    descriptor: &'a CallDescriptor,
    slot: Slot,
    cursor: usize,
    publish: Publish,
    metrics: Option<&'a Metrics>,
    committed: bool,
}

impl<'a, R> CallWriter<'a, R> {
    /// # Safety
    ///
    /// `slot` must have been claimed by `write_acquire` on `region` and not
    /// yet published; `refs` must be the side-array paired with `region`.
    pub(crate) unsafe fn new(
        region: &'a Region,
        refs: &'a ReferenceArray<R>,
        descriptor: &'a CallDescriptor,
        slot: Slot,
        publish: Publish,
        metrics: Option<&'a Metrics>,
    ) -> Self {
        Self {
            region,
            refs,
            descriptor,
            slot,
            cursor: 0,
            publish,
            metrics,
            committed: false,
        }
    }

    #[inline]
    pub fn call_type_id(&self) -> u32 {
        self.descriptor.call_type_id()
    }

    #[inline]
    pub fn descriptor(&self) -> &CallDescriptor {
        self.descriptor
    }

    fn next_field(&mut self) -> Field {
        let Some(field) = self.descriptor.fields().get(self.cursor) else {
            panic!(
                "{}: more arguments written than the {} declared",
                self.descriptor.name(),
                self.descriptor.fields().len()
            );
        };
        self.cursor += 1;
        *field
    }

    /// Writes the next argument, a primitive of type `T`.
    pub fn write<T: Primitive>(&mut self, value: T) -> &mut Self {
        match self.next_field() {
            Field::Primitive { kind, offset } if kind == T::KIND => {
                // SAFETY: this writer owns the claimed, unpublished slot.
                unsafe {
                    self.region
                        .store_field(self.slot, offset, kind.width(), value.to_bits());
                }
            }
            other => self.mismatch(other, "a primitive"),
        }
        self
    }

    /// Writes the next argument, a non-null reference.
    #[inline]
    pub fn write_ref(&mut self, value: R) -> &mut Self {
        self.write_opt_ref(Some(value))
    }

    /// Writes the next argument, a nullable reference.
    pub fn write_opt_ref(&mut self, value: Option<R>) -> &mut Self {
        match self.next_field() {
            // SAFETY: this writer owns the claimed, unpublished slot.
            Field::Reference { ordinal } => unsafe {
                self.refs.put(self.slot.index(), ordinal, value);
            },
            other => self.mismatch(other, "a reference"),
        }
        self
    }

    /// Writes the next argument, a variable-arity run of references.
    ///
    /// Fails with [`CallError::ArgumentOverflow`] if `values` holds more
    /// elements than the descriptor reserved.
    pub fn write_refs<I>(&mut self, values: I) -> Result<&mut Self, CallError>
    where
        I: IntoIterator<Item = R>,
        I::IntoIter: ExactSizeIterator,
    {
        let (count_offset, first_ordinal, max) = match self.next_field() {
            Field::References {
                count_offset,
                first_ordinal,
                max,
            } => (count_offset, first_ordinal, max),
            other => self.mismatch(other, "a reference run"),
        };
        let values = values.into_iter();
        if values.len() > max {
            return Err(CallError::ArgumentOverflow {
                call_type_id: self.call_type_id(),
                max,
                actual: values.len(),
            });
        }

        let index = self.slot.index();
        let mut count = 0u32;
        for value in values.take(max) {
            // SAFETY: this writer owns the claimed, unpublished slot.
            unsafe {
                self.refs
                    .put(index, first_ordinal + count as usize, Some(value));
            }
            count += 1;
        }
        // SAFETY: as above.
        unsafe {
            self.region
                .store_field(self.slot, count_offset, 4, u64::from(count));
        }
        Ok(self)
    }

    /// Publishes the call to the consumer.
    ///
    /// # Panics
    ///
    /// If fewer arguments were written than the method declares.
    pub fn commit(mut self) {
        let declared = self.descriptor.fields().len();
        assert!(
            self.cursor == declared,
            "{}: committed after {} of {} arguments",
            self.descriptor.name(),
            self.cursor,
            declared
        );
        (self.publish)(self.region, self.slot, self.descriptor.call_type_id());
        self.committed = true;
        if let Some(metrics) = self.metrics {
            metrics.add_call_produced();
        }
    }

    fn mismatch(&self, field: Field, wanted: &str) -> ! {
        panic!(
            "{}: argument {} is {:?}, not {}",
            self.descriptor.name(),
            self.cursor - 1,
            field,
            wanted
        );
    }
}

impl<R> Drop for CallWriter<'_, R> {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        // SAFETY: the slot is still claimed and unpublished by this writer.
        unsafe { self.refs.clear(self.slot.index()) };
        (self.publish)(self.region, self.slot, ABANDONED_CALL);
        if let Some(metrics) = self.metrics {
            metrics.add_call_abandoned();
        }
        log::warn!(
            "abandoned {} call at slot index {} after {} arguments",
            self.descriptor.name(),
            self.slot.index(),
            self.cursor
        );
    }
}

impl<R> std::fmt::Debug for CallWriter<'_, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallWriter")
            .field("call", &self.descriptor.name())
            .field("slot", &self.slot)
            .field("written", &self.cursor)
            .finish_non_exhaustive()
    }
}

/// Decodes one acquired call for dispatch.
///
/// Read arguments in declaration order. References that are not read are
/// dropped when the slot is released.
pub struct CallReader<'a, R> {
    region: &'a Region,
    refs: &'a ReferenceArray<R>,
    descriptor: &'a CallDescriptor,
    slot: Slot,
    cursor: usize,
}

impl<'a, R> CallReader<'a, R> {
    /// # Safety
    ///
    /// `slot` must have been acquired by `read_acquire` on `region` and not
    /// yet released; `refs` must be the side-array paired with `region`.
    pub(crate) unsafe fn new(
        region: &'a Region,
        refs: &'a ReferenceArray<R>,
        descriptor: &'a CallDescriptor,
        slot: Slot,
    ) -> Self {
        Self {
            region,
            refs,
            descriptor,
            slot,
            cursor: 0,
        }
    }

    #[inline]
    pub fn call_type_id(&self) -> u32 {
        self.descriptor.call_type_id()
    }

    /// Method name, as declared on the interface.
    #[inline]
    pub fn name(&self) -> &'static str {
        self.descriptor.name()
    }

    #[inline]
    pub fn descriptor(&self) -> &CallDescriptor {
        self.descriptor
    }

    /// Arguments not yet read.
    #[inline]
    pub fn remaining(&self) -> usize {
        self.descriptor.fields().len() - self.cursor
    }

    fn next_field(&mut self) -> Field {
        let Some(field) = self.descriptor.fields().get(self.cursor) else {
            panic!(
                "{}: read past the {} declared arguments",
                self.descriptor.name(),
                self.descriptor.fields().len()
            );
        };
        self.cursor += 1;
        *field
    }

    /// Reads the next argument, a primitive of type `T`.
    pub fn read<T: Primitive>(&mut self) -> T {
        match self.next_field() {
            Field::Primitive { kind, offset } if kind == T::KIND => {
                // SAFETY: the consumer holds the acquired slot.
                let bits = unsafe { self.region.load_field(self.slot, offset, kind.width()) };
                T::from_bits(bits)
            }
            other => self.mismatch(other, "a primitive"),
        }
    }

    /// Takes the next argument, a nullable reference.
    pub fn read_ref(&mut self) -> Option<R> {
        match self.next_field() {
            // SAFETY: the consumer holds the acquired slot.
            Field::Reference { ordinal } => unsafe { self.refs.take(self.slot.index(), ordinal) },
            other => self.mismatch(other, "a reference"),
        }
    }

    /// Takes the next argument, a variable-arity run of references.
    pub fn read_refs(&mut self) -> Vec<R> {
        match self.next_field() {
            Field::References {
                count_offset,
                first_ordinal,
                max,
            } => {
                let index = self.slot.index();
                // SAFETY: the consumer holds the acquired slot.
                let count = unsafe { self.region.load_field(self.slot, count_offset, 4) } as usize;
                (first_ordinal..first_ordinal + count.min(max))
                    // SAFETY: as above.
                    .filter_map(|ordinal| unsafe { self.refs.take(index, ordinal) })
                    .collect()
            }
            other => self.mismatch(other, "a reference run"),
        }
    }

    /// Skips the next argument without decoding it.
    pub fn skip(&mut self) {
        self.next_field();
    }

    fn mismatch(&self, field: Field, wanted: &str) -> ! {
        panic!(
            "{}: argument {} is {:?}, not {}",
            self.descriptor.name(),
            self.cursor - 1,
            field,
            wanted
        );
    }
}

impl<R> std::fmt::Debug for CallReader<'_, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallReader")
            .field("call", &self.descriptor.name())
            .field("slot", &self.slot)
            .field("read", &self.cursor)
            .finish_non_exhaustive()
    }
}
