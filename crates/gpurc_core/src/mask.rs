//! Typed membership sets over engines, PBDMAs and runlists.
//!
//! Hardware reports engine and runlist membership as bitmasks. `IdSet` keeps
//! the same membership semantics (bit `n` set means id `n` is a member) but
//! only exposes typed ids, so callers iterate members instead of shifting bits.
//! Iteration is always in ascending id order.

use crate::id::{EngineId, MaskIndex, PbdmaId, RunlistId};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::marker::PhantomData;

/// Largest id (exclusive) an `IdSet` can hold
pub const MASK_CAPACITY: u32 = u64::BITS;

/// Set of engines
pub type EngineMask = IdSet<EngineId>;
/// Set of PBDMAs
pub type PbdmaMask = IdSet<PbdmaId>;
/// Set of runlists
pub type RunlistMask = IdSet<RunlistId>;

/// A set of typed hardware ids backed by a 64-bit membership word
pub struct IdSet<T> {
    bits: u64,
    _marker: PhantomData<T>,
}

impl<T: MaskIndex> IdSet<T> {
    /// Create an empty set
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            bits: 0,
            _marker: PhantomData,
        }
    }

    /// Create from a raw hardware membership word
    #[must_use]
    pub const fn from_bits(bits: u64) -> Self {
        Self {
            bits,
            _marker: PhantomData,
        }
    }

    /// Create a set holding a single id
    #[must_use]
    pub fn single(id: T) -> Self {
        let mut set = Self::empty();
        set.insert(id);
        set
    }

    /// Get the raw membership word
    #[must_use]
    pub const fn bits(&self) -> u64 {
        self.bits
    }

    /// Add an id, returning true if it was not already present
    ///
    /// Ids at or above [`MASK_CAPACITY`] cannot be represented and are refused.
    pub fn insert(&mut self, id: T) -> bool {
        let index = id.index();
        if index >= MASK_CAPACITY {
            return false;
        }
        let bit = 1u64 << index;
        let fresh = self.bits & bit == 0;
        self.bits |= bit;
        fresh
    }

    /// Remove an id, returning true if it was present
    pub fn remove(&mut self, id: T) -> bool {
        let index = id.index();
        if index >= MASK_CAPACITY {
            return false;
        }
        let bit = 1u64 << index;
        let present = self.bits & bit != 0;
        self.bits &= !bit;
        present
    }

    /// Check membership
    #[must_use]
    pub fn contains(&self, id: T) -> bool {
        let index = id.index();
        index < MASK_CAPACITY && self.bits & (1u64 << index) != 0
    }

    /// Check if the set is empty
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.bits == 0
    }

    /// Number of members
    #[must_use]
    pub const fn len(&self) -> usize {
        self.bits.count_ones() as usize
    }

    /// Lowest member (first-set-bit order)
    #[must_use]
    pub fn first(&self) -> Option<T> {
        if self.bits == 0 {
            None
        } else {
            Some(T::from_index(self.bits.trailing_zeros()))
        }
    }

    /// Members of either set
    #[must_use]
    pub const fn union(self, other: Self) -> Self {
        Self::from_bits(self.bits | other.bits)
    }

    /// Members of both sets
    #[must_use]
    pub const fn intersection(self, other: Self) -> Self {
        Self::from_bits(self.bits & other.bits)
    }

    /// Members of `self` not in `other`
    #[must_use]
    pub const fn difference(self, other: Self) -> Self {
        Self::from_bits(self.bits & !other.bits)
    }

    /// Check whether the two sets share a member
    #[must_use]
    pub const fn intersects(&self, other: &Self) -> bool {
        self.bits & other.bits != 0
    }

    /// Iterate members in ascending order
    #[must_use]
    pub fn iter(&self) -> Iter<T> {
        Iter {
            remaining: self.bits,
            _marker: PhantomData,
        }
    }
}

impl<T> Clone for IdSet<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for IdSet<T> {}

impl<T> PartialEq for IdSet<T> {
    fn eq(&self, other: &Self) -> bool {
        self.bits == other.bits
    }
}

impl<T> Eq for IdSet<T> {}

impl<T> std::hash::Hash for IdSet<T> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.bits.hash(state);
    }
}

impl<T: MaskIndex> Default for IdSet<T> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<T: MaskIndex + fmt::Debug> fmt::Debug for IdSet<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

impl<T: MaskIndex + fmt::Display> fmt::Display for IdSet<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, id) in self.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{}", id)?;
        }
        write!(f, "}}")
    }
}

impl<T> Serialize for IdSet<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(self.bits)
    }
}

impl<'de, T: MaskIndex> Deserialize<'de> for IdSet<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        u64::deserialize(deserializer).map(Self::from_bits)
    }
}

impl<T: MaskIndex> FromIterator<T> for IdSet<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let mut set = Self::empty();
        set.extend(iter);
        set
    }
}

impl<T: MaskIndex> Extend<T> for IdSet<T> {
    fn extend<I: IntoIterator<Item = T>>(&mut self, iter: I) {
        for id in iter {
            self.insert(id);
        }
    }
}

impl<T: MaskIndex> IntoIterator for IdSet<T> {
    type Item = T;
    type IntoIter = Iter<T>;

    fn into_iter(self) -> Iter<T> {
        self.iter()
    }
}

impl<T: MaskIndex> IntoIterator for &IdSet<T> {
    type Item = T;
    type IntoIter = Iter<T>;

    fn into_iter(self) -> Iter<T> {
        self.iter()
    }
}

/// Ascending iterator over the members of an [`IdSet`]
pub struct Iter<T> {
    remaining: u64,
    _marker: PhantomData<T>,
}

impl<T: MaskIndex> Iterator for Iter<T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        if self.remaining == 0 {
            return None;
        }
        let index = self.remaining.trailing_zeros();
        self.remaining &= self.remaining - 1;
        Some(T::from_index(index))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = self.remaining.count_ones() as usize;
        (n, Some(n))
    }
}

impl<T: MaskIndex> ExactSizeIterator for Iter<T> {}
