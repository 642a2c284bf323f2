//! Call descriptors: the static mapping from a method signature to a slot layout.
//!
//! An [`Interface`] is built once per channel and never changes afterwards.
//! Each method gets a dense call type id (1, 2, ... in declaration order; 0
//! means "empty slot") and a list of [`Field`]s:
//!
//! - primitive fields at precomputed, naturally aligned payload offsets
//! - reference fields at ordinals inside the slot's reference range
//! - variable-arity reference runs, with the element count in a `u32` field
//!
//! ```
//! use ringproxy_rs::Interface;
//!
//! let iface = Interface::builder("Demo")
//!     .method("call1", |m| m.primitive::<i32>().primitive::<i32>())
//!     .method("call2", |m| m.primitive::<f32>().primitive::<f64>().primitive::<bool>())
//!     .method("call3", |m| m)
//!     .build()
//!     .unwrap();
//!
//! assert_eq!(iface.by_name("call2").unwrap().call_type_id(), 2);
//! // f32 at 0, f64 aligned up to 8, bool at 16
//! assert_eq!(iface.message_size(), 17);
//! ```

use crate::protocol::ABANDONED_CALL;
use crate::region::SlotLayout;
use crate::{ChannelError, Config, MAX_CAPACITY};

/// Width class of a primitive argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldKind {
    Bool,
    I8,
    U8,
    I16,
    U16,
    Char,
    I32,
    U32,
    F32,
    I64,
    U64,
    F64,
}

impl FieldKind {
    /// Size in bytes (also the field's alignment).
    pub const fn width(self) -> usize {
        match self {
            Self::Bool | Self::I8 | Self::U8 => 1,
            Self::I16 | Self::U16 => 2,
            Self::Char | Self::I32 | Self::U32 | Self::F32 => 4,
            Self::I64 | Self::U64 | Self::F64 => 8,
        }
    }
}

mod sealed {
    pub trait Sealed {}
}

/// A value that can travel in a slot's byte payload.
///
/// Implemented for `bool`, `char`, the 8 to 64 bit integers, `f32` and `f64`.
pub trait Primitive: Copy + sealed::Sealed + 'static {
    const KIND: FieldKind;

    /// Raw bits, of which the low `KIND.width()` bytes are stored.
    fn to_bits(self) -> u64;

    /// Rebuilds the value from the stored bytes (zero-extended).
    fn from_bits(bits: u64) -> Self;
}

macro_rules! impl_int_primitive {
    ($($ty:ty => $kind:ident),* $(,)?) => {$(
        impl sealed::Sealed for $ty {}
        impl Primitive for $ty {
            const KIND: FieldKind = FieldKind::$kind;
            #[inline]
            fn to_bits(self) -> u64 {
                self as u64
            }
            #[inline]
            fn from_bits(bits: u64) -> Self {
                bits as $ty
            }
        }
    )*};
}

impl_int_primitive!(
    i8 => I8, u8 => U8, i16 => I16, u16 => U16,
    i32 => I32, u32 => U32, i64 => I64, u64 => U64,
);

impl sealed::Sealed for bool {}
impl Primitive for bool {
    const KIND: FieldKind = FieldKind::Bool;
    #[inline]
    fn to_bits(self) -> u64 {
        u64::from(self)
    }
    #[inline]
    fn from_bits(bits: u64) -> Self {
        bits != 0
    }
}

impl sealed::Sealed for char {}
impl Primitive for char {
    const KIND: FieldKind = FieldKind::Char;
    #[inline]
    fn to_bits(self) -> u64 {
        u64::from(u32::from(self))
    }
    #[inline]
    fn from_bits(bits: u64) -> Self {
        char::from_u32(bits as u32).unwrap_or(char::REPLACEMENT_CHARACTER)
    }
}

impl sealed::Sealed for f32 {}
impl Primitive for f32 {
    const KIND: FieldKind = FieldKind::F32;
    #[inline]
    fn to_bits(self) -> u64 {
        u64::from(f32::to_bits(self))
    }
    #[inline]
    fn from_bits(bits: u64) -> Self {
        f32::from_bits(bits as u32)
    }
}

impl sealed::Sealed for f64 {}
impl Primitive for f64 {
    const KIND: FieldKind = FieldKind::F64;
    #[inline]
    fn to_bits(self) -> u64 {
        f64::to_bits(self)
    }
    #[inline]
    fn from_bits(bits: u64) -> Self {
        f64::from_bits(bits)
    }
}

/// One argument position of a method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    /// A primitive at a payload byte offset.
    Primitive { kind: FieldKind, offset: usize },
    /// A single (nullable) reference at an ordinal of the slot's reference range.
    Reference { ordinal: usize },
    /// Up to `max` references starting at `first_ordinal`; the actual count
    /// is a `u32` at `count_offset`.
    References {
        count_offset: usize,
        first_ordinal: usize,
        max: usize,
    },
}

/// Static metadata for one method: type tag, field layout, reference arity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallDescriptor {
    call_type_id: u32,
    name: &'static str,
    fields: Vec<Field>,
    message_size: usize,
    reference_arity: usize,
}

impl CallDescriptor {
    #[inline]
    pub fn call_type_id(&self) -> u32 {
        self.call_type_id
    }

    #[inline]
    pub fn name(&self) -> &'static str {
        self.name
    }

    #[inline]
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    /// Payload bytes this method needs.
    #[inline]
    pub fn message_size(&self) -> usize {
        self.message_size
    }

    /// Reference cells this method needs.
    #[inline]
    pub fn reference_arity(&self) -> usize {
        self.reference_arity
    }
}

/// Accumulates the fields of one method, assigning offsets as it goes.
#[derive(Debug, Default)]
pub struct DescriptorBuilder {
    fields: Vec<Field>,
    next_offset: usize,
    next_ordinal: usize,
}

impl DescriptorBuilder {
    fn place(&mut self, kind: FieldKind) -> usize {
        let offset = self.next_offset.next_multiple_of(kind.width());
        self.next_offset = offset + kind.width();
        offset
    }

    /// Appends a primitive argument of type `T`.
    pub fn primitive<T: Primitive>(mut self) -> Self {
        let offset = self.place(T::KIND);
        self.fields.push(Field::Primitive {
            kind: T::KIND,
            offset,
        });
        self
    }

    /// Appends a single reference argument.
    pub fn reference(mut self) -> Self {
        self.fields.push(Field::Reference {
            ordinal: self.next_ordinal,
        });
        self.next_ordinal += 1;
        self
    }

    /// Appends a variable-arity reference argument holding at most `max` elements.
    pub fn references(mut self, max: usize) -> Self {
        let count_offset = self.place(FieldKind::U32);
        self.fields.push(Field::References {
            count_offset,
            first_ordinal: self.next_ordinal,
            max,
        });
        self.next_ordinal += max;
        self
    }

    fn build(self, call_type_id: u32, name: &'static str) -> CallDescriptor {
        CallDescriptor {
            call_type_id,
            name,
            fields: self.fields,
            message_size: self.next_offset,
            reference_arity: self.next_ordinal,
        }
    }
}

/// The full set of call descriptors for one proxied interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interface {
    name: &'static str,
    methods: Vec<CallDescriptor>,
    message_size: usize,
    reference_arity: usize,
}

impl Interface {
    pub fn builder(name: &'static str) -> InterfaceBuilder {
        InterfaceBuilder {
            name,
            methods: Vec::new(),
        }
    }

    #[inline]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Descriptor for a call type id, or `None` for 0 and unknown ids.
    #[inline]
    pub fn descriptor(&self, call_type_id: u32) -> Option<&CallDescriptor> {
        let index = (call_type_id as usize).checked_sub(1)?;
        self.methods.get(index)
    }

    /// Descriptor for a method name.
    pub fn by_name(&self, name: &str) -> Option<&CallDescriptor> {
        self.methods.iter().find(|m| m.name == name)
    }

    /// Payload bytes per slot: the widest method's message size.
    #[inline]
    pub fn message_size(&self) -> usize {
        self.message_size
    }

    /// Reference cells per slot: the largest method arity.
    #[inline]
    pub fn reference_arity(&self) -> usize {
        self.reference_arity
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.methods.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CallDescriptor> {
        self.methods.iter()
    }

    /// Slot geometry for a ring carrying this interface under `config`.
    ///
    /// Use it to size a caller-provided region before
    /// [`Channel::with_region`](crate::Channel::with_region).
    pub fn slot_layout(&self, config: &Config) -> Result<SlotLayout, ChannelError> {
        let capacity = config
            .effective_capacity()
            .ok_or(ChannelError::InvalidCapacity {
                requested: config.capacity,
                max: MAX_CAPACITY,
            })?;
        SlotLayout::new(capacity, self.message_size)
    }
}

/// Builds an [`Interface`]; call type ids follow declaration order from 1.
#[derive(Debug)]
pub struct InterfaceBuilder {
    name: &'static str,
    methods: Vec<(&'static str, DescriptorBuilder)>,
}

impl InterfaceBuilder {
    /// Declares the next method. Its call type id is its 1-based position.
    pub fn method<F>(mut self, name: &'static str, fields: F) -> Self
    where
        F: FnOnce(DescriptorBuilder) -> DescriptorBuilder,
    {
        self.methods.push((name, fields(DescriptorBuilder::default())));
        self
    }

    pub fn build(self) -> Result<Interface, ChannelError> {
        if self.methods.is_empty() {
            return Err(ChannelError::EmptyInterface);
        }
        let methods: Vec<CallDescriptor> = self
            .methods
            .into_iter()
            .zip(1u32..ABANDONED_CALL)
            .map(|((name, builder), id)| builder.build(id, name))
            .collect();
        let message_size = methods.iter().map(|m| m.message_size).max().unwrap_or(0);
        let reference_arity = methods.iter().map(|m| m.reference_arity).max().unwrap_or(0);
        Ok(Interface {
            name: self.name,
            methods,
            message_size,
            reference_arity,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offsets_respect_natural_alignment() {
        let iface = Interface::builder("Aligned")
            .method("mixed", |m| {
                m.primitive::<u8>()
                    .primitive::<i64>()
                    .primitive::<i16>()
                    .primitive::<f32>()
            })
            .build()
            .unwrap();
        let offsets: Vec<usize> = iface
            .descriptor(1)
            .unwrap()
            .fields()
            .iter()
            .map(|f| match f {
                Field::Primitive { offset, .. } => *offset,
                other => panic!("unexpected field {other:?}"),
            })
            .collect();
        assert_eq!(offsets, vec![0, 8, 16, 20]);
        assert_eq!(iface.message_size(), 24);
    }

    #[test]
    fn test_references_get_consecutive_ordinals() {
        let iface = Interface::builder("Refs")
            .method("call6", |m| m.primitive::<i32>().reference().references(3))
            .build()
            .unwrap();
        let call6 = iface.descriptor(1).unwrap();
        assert_eq!(
            call6.fields(),
            &[
                Field::Primitive {
                    kind: FieldKind::I32,
                    offset: 0
                },
                Field::Reference { ordinal: 0 },
                Field::References {
                    count_offset: 4,
                    first_ordinal: 1,
                    max: 3
                },
            ]
        );
        assert_eq!(call6.reference_arity(), 4);
        assert_eq!(call6.message_size(), 8);
    }

    #[test]
    fn test_interface_takes_widest_method() {
        let iface = Interface::builder("Widest")
            .method("small", |m| m.primitive::<u8>().reference())
            .method("wide", |m| m.primitive::<u64>().primitive::<u64>())
            .method("refs", |m| m.references(5))
            .build()
            .unwrap();
        assert_eq!(iface.len(), 3);
        assert_eq!(iface.message_size(), 16);
        assert_eq!(iface.reference_arity(), 5);
        assert!(iface.descriptor(0).is_none());
        assert!(iface.descriptor(4).is_none());
        assert_eq!(iface.by_name("wide").unwrap().call_type_id(), 2);
    }

    #[test]
    fn test_empty_interface_rejected() {
        assert_eq!(
            Interface::builder("Nothing").build(),
            Err(ChannelError::EmptyInterface)
        );
    }

    #[test]
    fn test_signed_and_float_bits_survive_truncation() {
        assert_eq!(i8::from_bits(u64::from((-5i8).to_bits() as u8)), -5);
        assert_eq!(i16::from_bits(u64::from(i16::MIN.to_bits() as u16)), i16::MIN);
        assert_eq!(i32::from_bits(u64::from((-1i32).to_bits() as u32)), -1);
        assert!(<f32 as Primitive>::from_bits(<f32 as Primitive>::to_bits(f32::NAN)).is_nan());
        assert_eq!(
            <f64 as Primitive>::from_bits(<f64 as Primitive>::to_bits(-0.0)).to_bits(),
            (-0.0f64).to_bits()
        );
        assert_eq!(char::from_bits('λ'.to_bits()), 'λ');
    }
}
