//! # Bitfield
//!
//! Growable bitset, 64 bits per word.
//!
//! Used for entity shapes (which families an entity holds), pool occupancy
//! and slot liveness. Shapes combine with AND/OR for queries.

use std::ops::{BitAnd, BitOr};

/// A growable set of bit positions.
///
/// Bits past the allocated words read as zero. Equality ignores trailing
/// zero words, so two fields with the same set bits compare equal whatever
/// their capacity.
#[derive(Clone, Debug, Default)]
pub struct Bitfield {
    /// 1 = set, 0 = clear. 64 bits per u64.
    words: Vec<u64>,
}

impl Bitfield {
    /// Creates an empty bitfield.
    #[must_use]
    pub const fn new() -> Self {
        Self { words: Vec::new() }
    }

    /// Creates an empty bitfield able to hold `bits` bits without growing.
    #[must_use]
    pub fn with_capacity(bits: usize) -> Self {
        Self {
            words: vec![0; bits.div_ceil(64)],
        }
    }

    /// Grows storage so `bit` is addressable.
    #[inline]
    pub fn ensure(&mut self, bit: usize) {
        let word = bit / 64;
        if word >= self.words.len() {
            self.words.resize(word + 1, 0);
        }
    }

    /// Sets a bit, growing as needed.
    #[inline]
    pub fn set(&mut self, bit: usize) {
        self.ensure(bit);
        self.words[bit / 64] |= 1u64 << (bit % 64);
    }

    /// Clears a bit. Clearing past the end is a no-op.
    #[inline]
    pub fn clear(&mut self, bit: usize) {
        if let Some(word) = self.words.get_mut(bit / 64) {
            *word &= !(1u64 << (bit % 64));
        }
    }

    /// Checks whether a bit is set.
    #[inline]
    #[must_use]
    pub fn has(&self, bit: usize) -> bool {
        self.words
            .get(bit / 64)
            .is_some_and(|word| (word >> (bit % 64)) & 1 == 1)
    }

    /// Clears every bit, keeping capacity.
    pub fn clear_all(&mut self) {
        for word in &mut self.words {
            *word = 0;
        }
    }

    /// Number of set bits.
    #[must_use]
    pub fn count_bits(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Returns true when no bit is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|w| *w == 0)
    }

    /// Number of addressable bits.
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.words.len() * 64
    }

    /// True if every bit set in `other` is also set here.
    #[must_use]
    pub fn contains_all(&self, other: &Self) -> bool {
        other.words.iter().enumerate().all(|(i, word)| {
            let mine = self.words.get(i).copied().unwrap_or(0);
            mine & word == *word
        })
    }

    /// True if at least one bit is set in both fields.
    #[must_use]
    pub fn intersects(&self, other: &Self) -> bool {
        self.words
            .iter()
            .zip(&other.words)
            .any(|(a, b)| a & b != 0)
    }

    /// Iterates over the positions of set bits in ascending order.
    pub fn iter(&self) -> Ones<'_> {
        Ones {
            words: &self.words,
            word_index: 0,
            current: self.words.first().copied().unwrap_or(0),
        }
    }
}

impl PartialEq for Bitfield {
    fn eq(&self, other: &Self) -> bool {
        let longest = self.words.len().max(other.words.len());
        (0..longest).all(|i| {
            self.words.get(i).copied().unwrap_or(0) == other.words.get(i).copied().unwrap_or(0)
        })
    }
}

impl Eq for Bitfield {}

impl BitAnd for &Bitfield {
    type Output = Bitfield;

    fn bitand(self, rhs: Self) -> Bitfield {
        Bitfield {
            words: self
                .words
                .iter()
                .zip(&rhs.words)
                .map(|(a, b)| a & b)
                .collect(),
        }
    }
}

impl BitOr for &Bitfield {
    type Output = Bitfield;

    fn bitor(self, rhs: Self) -> Bitfield {
        let longest = self.words.len().max(rhs.words.len());
        Bitfield {
            words: (0..longest)
                .map(|i| {
                    self.words.get(i).copied().unwrap_or(0) | rhs.words.get(i).copied().unwrap_or(0)
                })
                .collect(),
        }
    }
}

impl FromIterator<usize> for Bitfield {
    fn from_iter<I: IntoIterator<Item = usize>>(iter: I) -> Self {
        let mut field = Self::new();
        for bit in iter {
            field.set(bit);
        }
        field
    }
}

impl<'a> IntoIterator for &'a Bitfield {
    type Item = usize;
    type IntoIter = Ones<'a>;

    fn into_iter(self) -> Ones<'a> {
        self.iter()
    }
}

/// Iterator over set bit positions.
pub struct Ones<'a> {
    words: &'a [u64],
    word_index: usize,
    current: u64,
}

impl Iterator for Ones<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        loop {
            if self.current != 0 {
                let bit = self.current.trailing_zeros() as usize;
                // Clear lowest set bit
                self.current &= self.current - 1;
                return Some(self.word_index * 64 + bit);
            }
            self.word_index += 1;
            self.current = *self.words.get(self.word_index)?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_clear_has() {
        let mut bits = Bitfield::new();
        assert!(!bits.has(130));

        bits.set(130);
        bits.set(3);
        assert!(bits.has(130));
        assert!(bits.has(3));
        assert_eq!(bits.count_bits(), 2);

        bits.clear(130);
        assert!(!bits.has(130));
        bits.clear(10_000);
        assert_eq!(bits.count_bits(), 1);
    }

    #[test]
    fn test_iter_ascending() {
        let bits: Bitfield = [200, 0, 63, 64].into_iter().collect();
        assert_eq!(bits.iter().collect::<Vec<_>>(), vec![0, 63, 64, 200]);
        assert_eq!(Bitfield::new().iter().count(), 0);
    }

    #[test]
    fn test_equality_ignores_capacity() {
        let mut a = Bitfield::with_capacity(1024);
        let mut b = Bitfield::new();
        assert_eq!(a, b);

        a.set(5);
        b.set(5);
        assert_eq!(a, b);

        b.set(700);
        b.clear(700);
        assert_eq!(a, b);
    }

    #[test]
    fn test_and_or_queries() {
        let shape: Bitfield = [1, 2, 70].into_iter().collect();
        let query: Bitfield = [1, 70].into_iter().collect();
        let other: Bitfield = [3].into_iter().collect();

        assert!(shape.contains_all(&query));
        assert!(!query.contains_all(&shape));
        assert!(shape.intersects(&query));
        assert!(!shape.intersects(&other));

        assert_eq!(&shape & &query, query);
        let union = &query | &other;
        assert_eq!(union.iter().collect::<Vec<_>>(), vec![1, 3, 70]);
    }
}
