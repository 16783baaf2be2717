//! Bit-field operations on the unsigned integers that back hardware
//! registers, command words and DMA descriptors

#![cfg_attr(not(test), no_std)]


use core::mem;
use core::ops::{Range, RangeBounds, Bound};

/// Bitwise access to the fields packed into an unsigned integer
pub trait Integer: Copy + PartialEq + Sized {
    /// Number of bits
    ///
    /// ```rust
    /// use num::Integer;
    ///
    /// assert_eq!(u32::BIT_LENGTH, 32);
    /// assert_eq!(u8::BIT_LENGTH, 8);
    /// ```
    const BIT_LENGTH: usize;

    /// Sets the bit in index i, where the least significant bit has index 0
    /// and the highest significant bit has index BIT_LENGTH - 1
    ///
    /// ```rust
    /// use num::Integer;
    ///
    /// let mut n = 0u32;
    /// n.set_bit(1);
    /// assert_eq!(n, 2u32);
    /// ```
    ///
    /// ## Panics
    ///
    /// Will panic if the index i is out of bounds of the bit length
    fn set_bit(&mut self, i: usize);

    /// Clears the bit in index i
    ///
    /// ```rust
    /// use num::Integer;
    ///
    /// let mut n = 0b1010_1011_1u16;
    /// n.unset_bit(4);
    /// assert_eq!(n, 0b1010_0011_1u16);
    /// ```
    fn unset_bit(&mut self, i: usize);

    /// Returns the bit state of the bit at the ith index
    ///
    /// ```rust
    /// use num::{Integer, BitState};
    ///
    /// let n = 0b1101101u32;
    /// assert_eq!(BitState::Set, n.get_bit(3));
    /// ```
    fn get_bit(&self, i: usize) -> BitState;

    /// Sets range of bits to the supplied value
    ///
    /// ```rust
    /// use num::Integer;
    ///
    /// let mut n = 0u64;
    /// n.set_bits(2..5, 0b111);
    /// assert_eq!(n, 0b11100);
    /// ```
    ///
    /// ## Panics
    ///
    /// Will panic if the range is out of the bit length or if the
    /// value does not fit in the range
    fn set_bits<R: RangeBounds<usize>>(&mut self, range: R, value: Self);

    /// Gets the bits in the range specified, shifted down to bit 0
    ///
    /// ```rust
    /// use num::Integer;
    ///
    /// let n = 0b1011011u8;
    /// assert_eq!(0b1011, n.get_bits(3..=6));
    /// ```
    fn get_bits<R: RangeBounds<usize>>(&self, range: R) -> Self;

    /// Returns true if the bit at index i is set
    fn is_set(&self, i: usize) -> bool {
        self.get_bit(i) == BitState::Set
    }

    /// Builder form of `set_bit`/`unset_bit`
    ///
    /// ```rust
    /// use num::Integer;
    ///
    /// assert_eq!(0u16.with_bit(15, true), 0x8000);
    /// assert_eq!(0xffu8.with_bit(0, false), 0xfe);
    /// ```
    fn with_bit(mut self, i: usize, set: bool) -> Self {
        if set {
            self.set_bit(i);
        } else {
            self.unset_bit(i);
        }
        self
    }

    /// Builder form of `set_bits`
    ///
    /// ```rust
    /// use num::Integer;
    ///
    /// assert_eq!(0u32.with_bits(28..32, 0x2).with_bits(20..28, 0x4), 0x2040_0000);
    /// ```
    fn with_bits<R: RangeBounds<usize>>(mut self, range: R, value: Self) -> Self {
        self.set_bits(range, value);
        self
    }

    fn as_u8(&self) -> u8;

    fn as_u16(&self) -> u16;

    fn as_u32(&self) -> u32;

    fn as_u64(&self) -> u64;

    fn as_usize(&self) -> usize;
}

macro_rules! impl_int {
    ($($T:ty)+) => {$(
        impl Integer for $T {
            const BIT_LENGTH: usize = mem::size_of::<$T>() * 8;

            fn set_bit(&mut self, i: usize) {
                assert!(i < Self::BIT_LENGTH);
                *self |= 1 << i;
            }

            fn unset_bit(&mut self, i: usize) {
                assert!(i < Self::BIT_LENGTH);
                *self &= !(1 << i);
            }

            fn get_bit(&self, i: usize) -> BitState {
                assert!(i < Self::BIT_LENGTH);
                if (*self >> i) & 1 == 1 {
                    BitState::Set
                } else {
                    BitState::Unset
                }
            }

            fn set_bits<R: RangeBounds<usize>>(&mut self, range: R, value: Self) {
                let range = to_range(range, Self::BIT_LENGTH);
                assert!(range.start < range.end);
                assert!(range.end <= Self::BIT_LENGTH);
                let width = range.end - range.start;
                let field = <$T>::MAX >> (Self::BIT_LENGTH - width);
                assert!(value & !field == 0, "The given value does not fit in the given range");
                *self = *self & !(field << range.start) | (value << range.start);
            }

            fn get_bits<R: RangeBounds<usize>>(&self, range: R) -> Self {
                let range = to_range(range, Self::BIT_LENGTH);
                assert!(range.start < range.end);
                assert!(range.end <= Self::BIT_LENGTH);
                let width = range.end - range.start;
                (*self >> range.start) & (<$T>::MAX >> (Self::BIT_LENGTH - width))
            }

            fn as_u8(&self) -> u8 {
                *self as u8
            }

            fn as_u16(&self) -> u16 {
                *self as u16
            }

            fn as_u32(&self) -> u32 {
                *self as u32
            }

            fn as_u64(&self) -> u64 {
                *self as u64
            }

            #[inline]
            fn as_usize(&self) -> usize {
                *self as usize
            }
        }
    )+}
}

impl_int! { u8 u16 u32 u64 usize }

/// Represents whether or not a bit has been set
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum BitState {
    Set,
    Unset
}

fn to_range<R: RangeBounds<usize>>(range: R, max_length: usize) -> Range<usize> {
    let start = match range.start_bound() {
        Bound::Included(&i) => i,
        Bound::Excluded(&i) => i + 1,
        Bound::Unbounded    => 0
    };
    let end = match range.end_bound() {
        Bound::Included(&i) => i + 1,
        Bound::Excluded(&i) => i,
        Bound::Unbounded    => max_length
    };
    start..end
}
