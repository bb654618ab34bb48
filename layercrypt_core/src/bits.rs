//! Bit-range codec.
//!
//! `extract` reads bits `[start, stop)` of every element (row-major, channel
//! axis innermost) and packs them back to back, most significant bit first,
//! into 32-bit words. Unused low bits of the final word take the high bits of
//! the caller's pad value. `insert` is the exact inverse and leaves every bit
//! outside the range untouched.
//!
//! Float32 arrays must be 2D; byte arrays may be 2D or 3D.

use crate::array::NdArray;
use crate::error::{CipherError, Result};
use crate::params::BitRange;

pub const WORD_BITS: u32 = 32;

/// Fixed-width element whose raw bits can be sliced.
pub trait BitElement: Copy {
    const BITS: u32;
    const NAME: &'static str;

    fn to_bits(self) -> u32;
    fn from_bits(bits: u32) -> Self;
    fn supports_ndim(ndim: usize) -> bool;
}

impl BitElement for f32 {
    const BITS: u32 = 32;
    const NAME: &'static str = "float32";

    fn to_bits(self) -> u32 {
        f32::to_bits(self)
    }

    fn from_bits(bits: u32) -> Self {
        f32::from_bits(bits)
    }

    fn supports_ndim(ndim: usize) -> bool {
        ndim == 2
    }
}

impl BitElement for u8 {
    const BITS: u32 = 8;
    const NAME: &'static str = "uint8";

    fn to_bits(self) -> u32 {
        self as u32
    }

    fn from_bits(bits: u32) -> Self {
        bits as u8
    }

    fn supports_ndim(ndim: usize) -> bool {
        ndim == 2 || ndim == 3
    }
}

/// Number of 32-bit words needed to pack `range` from `elements` values.
pub fn buffer_len(range: BitRange, elements: usize) -> usize {
    let bits = range.width() as usize * elements;
    bits.div_ceil(WORD_BITS as usize)
}

fn check<T: BitElement>(array: &NdArray<T>, range: BitRange) -> Result<()> {
    if !T::supports_ndim(array.ndim()) {
        return Err(CipherError::UnsupportedArray {
            dtype: T::NAME,
            shape: array.shape().to_vec(),
        });
    }
    if range.stop() > T::BITS {
        return Err(CipherError::InvalidRange {
            start: range.start(),
            stop: range.stop(),
            width: T::BITS,
        });
    }
    Ok(())
}

const fn low_mask(width: u32) -> u64 {
    (1u64 << width) - 1
}

fn slice_bits<T: BitElement>(value: T, range: BitRange) -> u32 {
    ((value.to_bits() >> (T::BITS - range.stop())) as u64 & low_mask(range.width())) as u32
}

struct BitWriter {
    words: Vec<u32>,
    acc: u64,
    filled: u32,
}

impl BitWriter {
    fn with_capacity(words: usize) -> Self {
        Self {
            words: Vec::with_capacity(words),
            acc: 0,
            filled: 0,
        }
    }

    fn push(&mut self, block: u32, width: u32) {
        self.acc = (self.acc << width) | block as u64;
        self.filled += width;
        if self.filled >= WORD_BITS {
            self.filled -= WORD_BITS;
            self.words.push((self.acc >> self.filled) as u32);
            self.acc &= low_mask(self.filled);
        }
    }

    fn finish(mut self, pad: u32) -> Vec<u32> {
        if self.filled > 0 {
            let head = (self.acc << (WORD_BITS - self.filled)) as u32;
            self.words.push(head | (pad >> self.filled));
        }
        self.words
    }
}

struct BitReader<'a> {
    words: std::slice::Iter<'a, u32>,
    acc: u64,
    available: u32,
}

impl<'a> BitReader<'a> {
    fn new(words: &'a [u32]) -> Self {
        Self {
            words: words.iter(),
            acc: 0,
            available: 0,
        }
    }

    fn next(&mut self, width: u32) -> Option<u32> {
        if self.available < width {
            let word = *self.words.next()?;
            self.acc = (self.acc << WORD_BITS) | word as u64;
            self.available += WORD_BITS;
        }
        self.available -= width;
        let block = (self.acc >> self.available) & low_mask(width);
        self.acc &= low_mask(self.available);
        Some(block as u32)
    }
}

/// Packs bits `range` of every element of `array` into 32-bit words.
pub fn extract<T: BitElement>(array: &NdArray<T>, range: BitRange, pad: u32) -> Result<Vec<u32>> {
    check(array, range)?;
    let width = range.width();
    let mut writer = BitWriter::with_capacity(buffer_len(range, array.len()));
    for value in array.as_slice() {
        writer.push(slice_bits(*value, range), width);
    }
    Ok(writer.finish(pad))
}

/// Overwrites bits `range` of every element of `array` from `buffer`.
///
/// `buffer` must hold exactly `buffer_len(range, array.len())` words.
pub fn insert<T: BitElement>(array: &mut NdArray<T>, buffer: &[u32], range: BitRange) -> Result<()> {
    check(array, range)?;
    let expected = buffer_len(range, array.len());
    if buffer.len() != expected {
        return Err(CipherError::MalformedMetadata(
            "packed buffer length does not match array size",
        ));
    }
    let width = range.width();
    let shift = T::BITS - range.stop();
    let mask = (low_mask(width) as u32) << shift;
    let mut reader = BitReader::new(buffer);
    for value in array.as_mut_slice() {
        let block = reader.next(width).ok_or(CipherError::MalformedMetadata(
            "packed buffer exhausted",
        ))?;
        let bits = (value.to_bits() & !mask) | (block << shift);
        *value = T::from_bits(bits);
    }
    Ok(())
}

/// A cipher-eligible array: float32 mesh data or uint8 image data.
#[derive(Clone, Debug, PartialEq)]
pub enum TierArray {
    Float(NdArray<f32>),
    Byte(NdArray<u8>),
}

impl TierArray {
    pub fn len(&self) -> usize {
        match self {
            TierArray::Float(arr) => arr.len(),
            TierArray::Byte(arr) => arr.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn extract(&self, range: BitRange, pad: u32) -> Result<Vec<u32>> {
        match self {
            TierArray::Float(arr) => extract(arr, range, pad),
            TierArray::Byte(arr) => extract(arr, range, pad),
        }
    }

    pub fn insert(&mut self, buffer: &[u32], range: BitRange) -> Result<()> {
        match self {
            TierArray::Float(arr) => insert(arr, buffer, range),
            TierArray::Byte(arr) => insert(arr, buffer, range),
        }
    }
}

/// Serializes packed words as little-endian bytes.
pub fn words_to_bytes(words: &[u32]) -> Vec<u8> {
    words.iter().flat_map(|word| word.to_le_bytes()).collect()
}

/// Reads little-endian bytes back into words. Trailing bytes that do not fill
/// a word are rejected.
pub fn bytes_to_words(bytes: &[u8]) -> Result<Vec<u32>> {
    if bytes.len() % 4 != 0 {
        return Err(CipherError::MalformedMetadata(
            "byte stream is not word aligned",
        ));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}
