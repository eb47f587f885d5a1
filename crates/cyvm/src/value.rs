// Value - 64-bit tagged value shared between host and VM
//
// NaN-boxing layout:
// - Any bit pattern whose quiet-NaN window (bits 50..62) is not fully set
//   is an IEEE-754 double, stored verbatim.
// - Quiet-NaN window set, sign bit clear: primitive, tag in bits 32..34.
// - Quiet-NaN window set, sign bit set: heap object reference,
//   generation in bits 32..47, slot index in bits 0..31.
//
// Doubles whose NaN payload collides with the tagged window are
// canonicalized to the default quiet NaN (0x7FF8_0000_0000_0000).
use crate::heap::ObjectId;

// ============ Bit layout ============
pub const QNAN: u64 = 0x7FFC_0000_0000_0000;
pub const SIGN_BIT: u64 = 0x8000_0000_0000_0000;
const OBJECT_MASK: u64 = SIGN_BIT | QNAN;
const TAG_SHIFT: u32 = 32;
const TAG_MASK: u64 = 0x7 << TAG_SHIFT;
const GENERATION_MASK: u64 = 0xFFFF << TAG_SHIFT;
const CANONICAL_NAN: u64 = 0x7FF8_0000_0000_0000;

// ============ Primitive tags ============
pub const TAG_NONE: u8 = 0;
pub const TAG_BOOLEAN: u8 = 1;
pub const TAG_INTERRUPT: u8 = 2;

const fn tagged(tag: u8, payload: u32) -> u64 {
    QNAN | ((tag as u64) << TAG_SHIFT) | payload as u64
}

/// The boundary value. Copyable; heap references carry a release
/// obligation tracked by the owning VM, not by this type.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct Value(u64);

/// Decoded view of a [`Value`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ValueKind {
    None,
    Bool(bool),
    Number(f64),
    Object(ObjectId),
    /// Internal marker returned by natives that raised a panic.
    Interrupt,
}

impl Value {
    pub const NONE: Value = Value(tagged(TAG_NONE, 0));
    pub const TRUE: Value = Value(tagged(TAG_BOOLEAN, 1));
    pub const FALSE: Value = Value(tagged(TAG_BOOLEAN, 0));
    pub(crate) const INTERRUPT: Value = Value(tagged(TAG_INTERRUPT, 0));

    // ============ Constructors ============

    #[inline(always)]
    pub const fn none() -> Self {
        Self::NONE
    }

    #[inline(always)]
    pub const fn boolean(b: bool) -> Self {
        if b { Self::TRUE } else { Self::FALSE }
    }

    #[inline(always)]
    pub fn number(n: f64) -> Self {
        let bits = n.to_bits();
        if bits & QNAN == QNAN {
            Value(CANONICAL_NAN)
        } else {
            Value(bits)
        }
    }

    #[inline(always)]
    pub(crate) const fn object(id: ObjectId) -> Self {
        Value(
            OBJECT_MASK
                | ((id.generation as u64) << TAG_SHIFT)
                | id.index as u64,
        )
    }

    #[inline(always)]
    pub const fn from_bits(bits: u64) -> Self {
        Value(bits)
    }

    #[inline(always)]
    pub const fn to_bits(self) -> u64 {
        self.0
    }

    // ============ Predicates ============

    #[inline(always)]
    pub const fn is_number(self) -> bool {
        self.0 & QNAN != QNAN
    }

    #[inline(always)]
    pub const fn is_object(self) -> bool {
        self.0 & OBJECT_MASK == OBJECT_MASK
    }

    #[inline(always)]
    pub const fn is_none(self) -> bool {
        self.0 == Self::NONE.0
    }

    #[inline(always)]
    pub const fn is_bool(self) -> bool {
        self.0 == Self::TRUE.0 || self.0 == Self::FALSE.0
    }

    #[inline(always)]
    pub(crate) const fn is_interrupt(self) -> bool {
        self.0 == Self::INTERRUPT.0
    }

    /// Only `none` and `false` are falsy.
    #[inline(always)]
    pub const fn is_truthy(self) -> bool {
        !(self.is_none() || self.0 == Self::FALSE.0)
    }

    // ============ Accessors ============

    /// Reinterprets the bits as a double. Meaningful only when
    /// [`Value::is_number`] holds.
    #[inline(always)]
    pub const fn as_f64_unchecked(self) -> f64 {
        f64::from_bits(self.0)
    }

    #[inline(always)]
    pub const fn as_number(self) -> Option<f64> {
        if self.is_number() {
            Some(f64::from_bits(self.0))
        } else {
            None
        }
    }

    #[inline(always)]
    pub const fn as_bool(self) -> Option<bool> {
        match self.0 {
            x if x == Self::TRUE.0 => Some(true),
            x if x == Self::FALSE.0 => Some(false),
            _ => None,
        }
    }

    #[inline(always)]
    pub const fn as_object_id(self) -> Option<ObjectId> {
        if self.is_object() {
            Some(ObjectId {
                index: self.0 as u32,
                generation: ((self.0 & GENERATION_MASK) >> TAG_SHIFT) as u16,
            })
        } else {
            None
        }
    }

    pub fn kind(self) -> ValueKind {
        if self.is_number() {
            return ValueKind::Number(f64::from_bits(self.0));
        }
        if let Some(id) = self.as_object_id() {
            return ValueKind::Object(id);
        }
        match ((self.0 & TAG_MASK) >> TAG_SHIFT) as u8 {
            TAG_BOOLEAN => ValueKind::Bool(self.0 & 1 == 1),
            TAG_INTERRUPT => ValueKind::Interrupt,
            _ => ValueKind::None,
        }
    }
}

impl Default for Value {
    fn default() -> Self {
        Self::NONE
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::number(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::boolean(b)
    }
}

impl std::fmt::Debug for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.kind() {
            ValueKind::None => write!(f, "none"),
            ValueKind::Bool(b) => write!(f, "{}", b),
            ValueKind::Number(n) => write!(f, "{}", n),
            ValueKind::Object(id) => write!(f, "object({}@{})", id.index, id.generation),
            ValueKind::Interrupt => write!(f, "interrupt"),
        }
    }
}
