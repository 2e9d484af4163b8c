// SPDX-License-Identifier: BSD-3-Clause
//! Precomputed hashes.
//!
//! Cache keys are compared often and their components can be large, so their
//! hash is computed once when the key is built.

use std::hash::{Hash, Hasher};
use std::marker::PhantomData;

/// A precomputed hash for a value of type `T`.
///
/// The type parameter `T` is phantom, it exists solely to prevent mixing up
/// hashes of data of different types.
#[derive(Debug)]
pub struct PrecomputedHash<T> {
    hash: u64,
    phantom: PhantomData<fn() -> T>,
}

/// Manually implemented to avoid unnecessary trait bound
impl<T> Copy for PrecomputedHash<T> {}

/// Manually implemented to avoid unnecessary trait bound
impl<T> Clone for PrecomputedHash<T> {
    #[inline]
    fn clone(&self) -> Self {
        *self
    }
}

/// Manually implemented to avoid unnecessary trait bound
impl<T> PartialEq for PrecomputedHash<T> {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        self.hash.eq(&other.hash)
    }
}

/// Manually implemented to avoid unnecessary trait bound
impl<T> Eq for PrecomputedHash<T> {}

/// Manually implemented to avoid unnecessary trait bound
impl<T> Hash for PrecomputedHash<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.hash);
    }
}

impl<T> PrecomputedHash<T> {
    pub fn new(val: &T) -> Self
    where
        T: Hash,
    {
        Self::from_u64(fx_hash(val))
    }

    #[inline]
    pub(crate) fn from_u64(hash: u64) -> Self {
        PrecomputedHash {
            hash,
            phantom: PhantomData,
        }
    }

    #[inline]
    pub fn to_u64(self) -> u64 {
        self.hash
    }
}

/// Hash a value with [`rustc_hash::FxHasher`].
pub fn fx_hash<T: Hash + ?Sized>(val: &T) -> u64 {
    let mut hasher = rustc_hash::FxHasher::default();
    val.hash(&mut hasher);
    hasher.finish()
}
