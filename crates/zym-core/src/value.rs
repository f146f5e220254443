//! NaN-boxed runtime values
//!
//! Every Zym value fits in 64 bits. Doubles are stored as their raw IEEE-754
//! bit pattern; every other variant lives in the mantissa of a quiet NaN that
//! no arithmetic result is allowed to produce (NaN results are canonicalized
//! on construction).
//!
//! ```text
//! double      any pattern where (bits & QNAN) != QNAN
//! null        QNAN | 1
//! false       QNAN | 2
//! true        QNAN | 3
//! enum        QNAN | ENUM_FLAG | type_id << 16 | variant
//! object      SIGN | QNAN | generation << 32 | index
//! ```

use std::fmt;

use crate::object::ObjRef;

const SIGN_BIT: u64 = 0x8000_0000_0000_0000;
const QNAN: u64 = 0x7ffc_0000_0000_0000;
const ENUM_FLAG: u64 = 0x0001_0000_0000_0000;
const OBJECT_MASK: u64 = SIGN_BIT | QNAN;
const ENUM_MASK: u64 = SIGN_BIT | QNAN | ENUM_FLAG;
const PAYLOAD_MASK: u64 = 0x0000_ffff_ffff_ffff;
const CANONICAL_NAN: u64 = 0x7ff8_0000_0000_0000;

const TAG_NULL: u64 = 1;
const TAG_FALSE: u64 = 2;
const TAG_TRUE: u64 = 3;

/// A 64-bit tagged value
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Value(u64);

impl Value {
    pub const NULL: Value = Value(QNAN | TAG_NULL);
    pub const FALSE: Value = Value(QNAN | TAG_FALSE);
    pub const TRUE: Value = Value(QNAN | TAG_TRUE);

    /// Box a double. NaN inputs collapse to the canonical quiet NaN so they
    /// can never alias a tagged pattern.
    #[inline]
    pub fn number(n: f64) -> Self {
        if n.is_nan() {
            Value(CANONICAL_NAN)
        } else {
            Value(n.to_bits())
        }
    }

    #[inline]
    pub const fn bool(b: bool) -> Self {
        if b {
            Self::TRUE
        } else {
            Self::FALSE
        }
    }

    /// Pack an enum variant
    #[inline]
    pub const fn enum_variant(type_id: u16, variant: u16) -> Self {
        Value(QNAN | ENUM_FLAG | ((type_id as u64) << 16) | variant as u64)
    }

    #[inline]
    pub const fn object(obj: ObjRef) -> Self {
        Value(OBJECT_MASK | (obj.to_payload() & PAYLOAD_MASK))
    }

    /// Raw bit pattern
    #[inline]
    pub const fn to_bits(self) -> u64 {
        self.0
    }

    #[inline]
    pub const fn is_double(self) -> bool {
        (self.0 & QNAN) != QNAN
    }

    #[inline]
    pub const fn is_null(self) -> bool {
        self.0 == Self::NULL.0
    }

    #[inline]
    pub const fn is_true(self) -> bool {
        self.0 == Self::TRUE.0
    }

    #[inline]
    pub const fn is_false(self) -> bool {
        self.0 == Self::FALSE.0
    }

    #[inline]
    pub const fn is_bool(self) -> bool {
        (self.0 | 1) == Self::TRUE.0
    }

    #[inline]
    pub const fn is_enum(self) -> bool {
        (self.0 & ENUM_MASK) == (QNAN | ENUM_FLAG)
    }

    #[inline]
    pub const fn is_object(self) -> bool {
        (self.0 & OBJECT_MASK) == OBJECT_MASK
    }

    /// Reinterpret the bits as a double. Only meaningful when `is_double`.
    #[inline]
    pub fn as_double(self) -> f64 {
        f64::from_bits(self.0)
    }

    #[inline]
    pub fn as_number(self) -> Option<f64> {
        if self.is_double() {
            Some(self.as_double())
        } else {
            None
        }
    }

    #[inline]
    pub const fn as_bool(self) -> Option<bool> {
        if self.is_bool() {
            Some(self.is_true())
        } else {
            None
        }
    }

    /// `(type_id, variant)` of an enum value
    #[inline]
    pub const fn as_enum(self) -> Option<(u16, u16)> {
        if self.is_enum() {
            Some(((self.0 >> 16) as u16, self.0 as u16))
        } else {
            None
        }
    }

    #[inline]
    pub const fn as_object(self) -> Option<ObjRef> {
        if self.is_object() {
            Some(ObjRef::from_payload(self.0 & PAYLOAD_MASK))
        } else {
            None
        }
    }

    /// Only `null` and `false` are falsy
    #[inline]
    pub const fn is_truthy(self) -> bool {
        !(self.is_null() || self.is_false())
    }

    /// Name of the value's primitive category, without consulting the heap
    pub const fn primitive_type_name(self) -> &'static str {
        if self.is_double() {
            "number"
        } else if self.is_null() {
            "null"
        } else if self.is_bool() {
            "bool"
        } else if self.is_enum() {
            "enum"
        } else {
            "object"
        }
    }
}

impl Default for Value {
    fn default() -> Self {
        Self::NULL
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::number(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::bool(b)
    }
}

impl From<ObjRef> for Value {
    fn from(obj: ObjRef) -> Self {
        Value::object(obj)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_double() {
            write!(f, "Double({})", self.as_double())
        } else if self.is_null() {
            write!(f, "Null")
        } else if let Some(b) = self.as_bool() {
            write!(f, "Bool({b})")
        } else if let Some((ty, variant)) = self.as_enum() {
            write!(f, "Enum({ty}:{variant})")
        } else if let Some(obj) = self.as_object() {
            write!(f, "Object({obj:?})")
        } else {
            write!(f, "Invalid({:#018x})", self.0)
        }
    }
}
