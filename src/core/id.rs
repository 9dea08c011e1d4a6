//! Ring coordinate types.

use std::{
    fmt,
    ops::{
        Add, AddAssign, BitAnd, BitAndAssign, BitOr, BitOrAssign, BitXor, BitXorAssign, Mul,
        MulAssign, Not, Shl, ShlAssign, Shr, ShrAssign, Sub, SubAssign,
    },
    str::FromStr,
};

use crate::core::error::Error;

/// An unsigned 128-bit integer with wrapping arithmetic.
///
/// Every operator wraps modulo 2^128, so walking forward from [`LargeInteger::MAX`] lands on
/// [`LargeInteger::ZERO`] and distances on the ring can be computed with a plain subtraction.
/// Ordering is lexicographic on the `(high, low)` word pair.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LargeInteger(u128);

impl LargeInteger {
    /// The number of hex digits in the string representation.
    pub const HEX_DIGITS: usize = 32;

    pub const ZERO: Self = Self(0);
    pub const ONE: Self = Self(1);
    pub const MAX: Self = Self(u128::MAX);

    /// Creates a value from its high and low 64-bit words.
    pub const fn new(high: u64, low: u64) -> Self {
        Self(((high as u128) << 64) | low as u128)
    }

    pub const fn from_u128(value: u128) -> Self {
        Self(value)
    }

    pub const fn as_u128(&self) -> u128 {
        self.0
    }

    /// Returns the most-significant 64 bits.
    pub const fn high(&self) -> u64 {
        (self.0 >> 64) as u64
    }

    /// Returns the least-significant 64 bits.
    pub const fn low(&self) -> u64 {
        self.0 as u64
    }

    /// Returns `true` if the top bit is clear, i.e. the value is in the lower half of the ring.
    pub const fn is_smaller_part(&self) -> bool {
        self.0 >> 127 == 0
    }

    /// Adds one, wrapping to zero past the maximum.
    pub fn increment(&mut self) {
        self.0 = self.0.wrapping_add(1);
    }

    /// Subtracts one, wrapping to the maximum below zero.
    pub fn decrement(&mut self) {
        self.0 = self.0.wrapping_sub(1);
    }

    /// Two's complement negation, the distance walked in the opposite direction.
    pub const fn wrapping_neg(&self) -> Self {
        Self(self.0.wrapping_neg())
    }

    #[doc(hidden)]
    /// Convenience function for generating random values during testing.
    pub fn rand() -> Self {
        use rand::{thread_rng, Rng};

        Self(thread_rng().gen())
    }
}

impl From<u64> for LargeInteger {
    fn from(value: u64) -> Self {
        Self(value.into())
    }
}

impl From<u128> for LargeInteger {
    fn from(value: u128) -> Self {
        Self(value)
    }
}

macro_rules! impl_wrapping_op {
    ($trait:ident, $fn:ident, $assign_trait:ident, $assign_fn:ident, $op:ident) => {
        impl $trait for LargeInteger {
            type Output = Self;

            fn $fn(self, rhs: Self) -> Self {
                Self(self.0.$op(rhs.0))
            }
        }

        impl $assign_trait for LargeInteger {
            fn $assign_fn(&mut self, rhs: Self) {
                self.0 = self.0.$op(rhs.0);
            }
        }
    };
}

impl_wrapping_op!(Add, add, AddAssign, add_assign, wrapping_add);
impl_wrapping_op!(Sub, sub, SubAssign, sub_assign, wrapping_sub);
impl_wrapping_op!(Mul, mul, MulAssign, mul_assign, wrapping_mul);

macro_rules! impl_bit_op {
    ($trait:ident, $fn:ident, $assign_trait:ident, $assign_fn:ident, $op:tt) => {
        impl $trait for LargeInteger {
            type Output = Self;

            fn $fn(self, rhs: Self) -> Self {
                Self(self.0 $op rhs.0)
            }
        }

        impl $assign_trait for LargeInteger {
            fn $assign_fn(&mut self, rhs: Self) {
                self.0 = self.0 $op rhs.0;
            }
        }
    };
}

impl_bit_op!(BitAnd, bitand, BitAndAssign, bitand_assign, &);
impl_bit_op!(BitOr, bitor, BitOrAssign, bitor_assign, |);
impl_bit_op!(BitXor, bitxor, BitXorAssign, bitxor_assign, ^);

impl Not for LargeInteger {
    type Output = Self;

    fn not(self) -> Self {
        Self(!self.0)
    }
}

// Logical shifts, counts of 128 or more shift every bit out.
impl Shl<u32> for LargeInteger {
    type Output = Self;

    fn shl(self, count: u32) -> Self {
        Self(self.0.checked_shl(count).unwrap_or(0))
    }
}

impl ShlAssign<u32> for LargeInteger {
    fn shl_assign(&mut self, count: u32) {
        *self = *self << count;
    }
}

impl Shr<u32> for LargeInteger {
    type Output = Self;

    fn shr(self, count: u32) -> Self {
        Self(self.0.checked_shr(count).unwrap_or(0))
    }
}

impl ShrAssign<u32> for LargeInteger {
    fn shr_assign(&mut self, count: u32) {
        *self = *self >> count;
    }
}

impl fmt::Display for LargeInteger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

impl FromStr for LargeInteger {
    type Err = Error;

    /// Parses up to 32 hex digits, case-insensitive, without a `0x` prefix.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty()
            || s.len() > Self::HEX_DIGITS
            || !s.bytes().all(|b| b.is_ascii_hexdigit())
        {
            return Err(Error::InvalidNodeId(s.to_owned()));
        }

        u128::from_str_radix(s, 16)
            .map(Self)
            .map_err(|_| Error::InvalidNodeId(s.to_owned()))
    }
}

/// A position on the 128-bit ring.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(LargeInteger);

impl NodeId {
    pub const MIN: Self = Self(LargeInteger::ZERO);
    pub const MAX: Self = Self(LargeInteger::MAX);

    pub const fn new(value: LargeInteger) -> Self {
        Self(value)
    }

    pub const fn value(&self) -> LargeInteger {
        self.0
    }

    /// The distance walked forward (clockwise) from this identifier to `other`.
    pub fn succ_dist(&self, other: NodeId) -> LargeInteger {
        other.0 - self.0
    }

    /// The distance walked backward (counter-clockwise) from this identifier to `other`.
    pub fn pred_dist(&self, other: NodeId) -> LargeInteger {
        self.0 - other.0
    }

    /// The shorter of the two directional distances.
    pub fn min_dist(&self, other: NodeId) -> LargeInteger {
        let succ = self.succ_dist(other);
        if succ.is_smaller_part() {
            succ
        } else {
            succ.wrapping_neg()
        }
    }

    /// The midpoint walking forward from this identifier to `other`.
    ///
    /// Ties resolve toward `self`: the point belongs to the lower half, so the range owned by
    /// `other` starts strictly after it.
    pub fn succ_mid_point(&self, other: NodeId) -> NodeId {
        NodeId(self.0 + (self.succ_dist(other) >> 1))
    }

    /// The midpoint walking backward from this identifier to `other`, same tie-break as
    /// [`NodeId::succ_mid_point`] (the lower identifier keeps the point).
    pub fn pred_mid_point(&self, other: NodeId) -> NodeId {
        other.succ_mid_point(*self)
    }

    /// Returns `true` if `self` lies strictly between `from` and `to` walking forward.
    pub fn is_between(&self, from: NodeId, to: NodeId) -> bool {
        let offset = from.succ_dist(*self);
        offset != LargeInteger::ZERO && offset < from.succ_dist(to)
    }

    #[doc(hidden)]
    /// Convenience function for generating random identifiers during testing.
    pub fn rand() -> Self {
        Self(LargeInteger::rand())
    }
}

impl From<u64> for NodeId {
    fn from(value: u64) -> Self {
        Self(value.into())
    }
}

impl From<LargeInteger> for NodeId {
    fn from(value: LargeInteger) -> Self {
        Self(value)
    }
}

impl Add<LargeInteger> for NodeId {
    type Output = NodeId;

    fn add(self, rhs: LargeInteger) -> NodeId {
        NodeId(self.0 + rhs)
    }
}

impl Sub<LargeInteger> for NodeId {
    type Output = NodeId;

    fn sub(self, rhs: LargeInteger) -> NodeId {
        NodeId(self.0 - rhs)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for NodeId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse().map(Self)
    }
}

/// A node identity together with its incarnation counter.
///
/// The instance id grows every time the process behind an identifier restarts, so a higher
/// instance always supersedes a lower one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeInstance {
    pub id: NodeId,
    pub instance_id: u64,
}

impl NodeInstance {
    pub const fn new(id: NodeId, instance_id: u64) -> Self {
        Self { id, instance_id }
    }
}

impl fmt::Display for NodeInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.id, self.instance_id)
    }
}
