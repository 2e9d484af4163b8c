// SPDX-License-Identifier: BSD-3-Clause
//! Lattice for values of integer variables

use ascent::{lattice::constant_propagation::ConstPropagation, Lattice};

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct Value(ConstPropagation<i64>);

// ------------------------------------------------------------------
// Constructors

impl Value {
    #[inline]
    pub fn bottom() -> Self {
        Value(ConstPropagation::Bottom)
    }

    #[inline]
    pub fn constant(i: i64) -> Self {
        Value(ConstPropagation::Constant(i))
    }

    #[inline]
    pub fn top() -> Self {
        Value(ConstPropagation::Top)
    }

    #[inline]
    pub fn as_constant(&self) -> Option<i64> {
        match self.0 {
            ConstPropagation::Constant(c) => Some(c),
            _ => None,
        }
    }
}

// ------------------------------------------------------------------
// Operations

impl Value {
    fn lift(self, other: Self, op: impl FnOnce(i64, i64) -> i64) -> Self {
        match (self.0, other.0) {
            (ConstPropagation::Bottom, _) | (_, ConstPropagation::Bottom) => Self::bottom(),
            (ConstPropagation::Constant(c), ConstPropagation::Constant(d)) => {
                Self::constant(op(c, d))
            }
            _ => Self::top(),
        }
    }

    #[inline]
    pub fn add(self, other: Self) -> Self {
        self.lift(other, i64::wrapping_add)
    }

    #[inline]
    pub fn sub(self, other: Self) -> Self {
        self.lift(other, i64::wrapping_sub)
    }

    #[inline]
    pub fn mul(self, other: Self) -> Self {
        // zero absorbs unknown operands
        match (self.as_constant(), other.as_constant()) {
            (Some(0), _) if other != Self::bottom() => Self::constant(0),
            (_, Some(0)) if self != Self::bottom() => Self::constant(0),
            _ => self.lift(other, i64::wrapping_mul),
        }
    }

    #[inline]
    pub fn join(self, other: Self) -> Self {
        Value(self.0.join(other.0))
    }

    #[inline]
    pub fn meet(self, other: Self) -> Self {
        Value(self.0.meet(other.0))
    }

    /// Whether `self` is below `other` in the lattice order.
    #[inline]
    pub fn is_less_or_equal(self, other: Self) -> bool {
        self.join(other) == other
    }
}

// ------------------------------------------------------------------
// Traits

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.0 {
            ConstPropagation::Bottom => write!(f, "⊥"),
            ConstPropagation::Constant(c) => write!(f, "{}", c),
            ConstPropagation::Top => write!(f, "⊤"),
        }
    }
}

impl From<Option<i64>> for Value {
    /// A known value or, for `None`, any value.
    fn from(value: Option<i64>) -> Self {
        value.map_or_else(Value::top, Value::constant)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arithmetic() {
        let two = Value::constant(2);
        let three = Value::constant(3);
        assert_eq!(two.add(three), Value::constant(5));
        assert_eq!(two.sub(three), Value::constant(-1));
        assert_eq!(two.mul(three), Value::constant(6));
        assert_eq!(two.add(Value::top()), Value::top());
        assert_eq!(Value::constant(0).mul(Value::top()), Value::constant(0));
        assert_eq!(Value::bottom().add(two), Value::bottom());
    }

    #[test]
    fn order() {
        let one = Value::constant(1);
        assert_eq!(one.join(Value::constant(2)), Value::top());
        assert_eq!(one.join(one), one);
        assert_eq!(one.meet(Value::top()), one);
        assert!(one.is_less_or_equal(Value::top()));
        assert!(Value::bottom().is_less_or_equal(one));
        assert!(!Value::top().is_less_or_equal(one));
        assert!(!one.is_less_or_equal(Value::constant(2)));
    }

    #[test]
    fn display() {
        assert_eq!(Value::constant(-4).to_string(), "-4");
        assert_eq!(Value::top().to_string(), "⊤");
        assert_eq!(Value::bottom().to_string(), "⊥");
    }
}
