//! Bitmap storage strategies.
//!
//! Every strategy represents membership over a window `[0, len)` of a bounded domain. They are observably
//! equivalent and only differ in the memory they use per value.

use num_bigint::BigUint;

/// Bitmap builder. Selects a storage strategy at construction time.
pub trait BitmapBuilder: Default + Sync {
    type Bitmap: Bitmap;

    /// Creates a new zeroed bitmap covering `len` values.
    fn build(&self, len: usize) -> Self::Bitmap;

    /// Returns the number of domain values a single pass covers.
    ///
    /// # Arguments
    /// * `length` - Domain size
    /// * `available` - Number of values that fit into available memory
    fn window_size(&self, _length: u64, available: u64) -> u64 {
        available
    }

    /// Returns the number of bits of memory a single domain value occupies.
    fn bits_per_value(&self) -> u64;
}

/// Base bitmap interface.
pub trait Bitmap: Send {
    /// Marks the value at `index` as present.
    fn set(&mut self, index: usize);

    /// Checks whether the value at `index` is present.
    fn test(&self, index: usize) -> bool;

    /// Returns the number of values the bitmap covers.
    fn len(&self) -> usize;

    /// Returns how many times the value at `index` was recorded.
    fn count(&self, index: usize) -> u32 {
        self.test(index) as u32
    }

    /// Maximum number of occurrences a single slot can hold.
    fn limit(&self) -> u32 {
        1
    }

    /// Records one occurrence of the value at `index`.
    /// Returns `false` and leaves the slot untouched if it already holds [`Bitmap::limit`] occurrences.
    fn record(&mut self, index: usize) -> bool {
        if self.count(index) >= self.limit() {
            return false;
        }
        self.set(index);
        return true;
    }

    /// Returns the first present index not less than `from`.
    fn next_one(&self, from: usize) -> Option<usize> {
        (from..self.len()).find(|index| self.test(*index))
    }

    /// Returns an iterator over the present indexes in ascending order.
    fn ones(&self) -> Ones<'_, Self>
    where
        Self: Sized,
    {
        Ones { bitmap: self, index: 0 }
    }
}

/// Ascending iterator over the present indexes of a bitmap.
pub struct Ones<'a, B: Bitmap> {
    bitmap: &'a B,
    index: usize,
}

impl<'a, B: Bitmap> Iterator for Ones<'a, B> {
    type Item = usize;

    fn next(&mut self) -> Option<Self::Item> {
        let index = self.bitmap.next_one(self.index)?;
        self.index = index + 1;
        Some(index)
    }
}

/// Naive bitmap builder. The bitmap always covers the whole domain so sorting takes a single pass.
#[derive(Clone, Default)]
pub struct NaiveBitmapBuilder;

impl BitmapBuilder for NaiveBitmapBuilder {
    type Bitmap = NaiveBitmap;

    fn build(&self, len: usize) -> Self::Bitmap {
        NaiveBitmap { cells: vec![0; len] }
    }

    fn window_size(&self, length: u64, _available: u64) -> u64 {
        length
    }

    fn bits_per_value(&self) -> u64 {
        u32::BITS as u64
    }
}

/// Bitmap using an integer-sized cell per value. No packing at all.
pub struct NaiveBitmap {
    cells: Vec<u32>,
}

impl Bitmap for NaiveBitmap {
    fn set(&mut self, index: usize) {
        self.cells[index] = 1;
    }

    fn test(&self, index: usize) -> bool {
        self.cells[index] == 1
    }

    fn len(&self) -> usize {
        self.cells.len()
    }
}

/// Byte bitmap builder.
#[derive(Clone, Default)]
pub struct ByteBitmapBuilder;

impl BitmapBuilder for ByteBitmapBuilder {
    type Bitmap = ByteBitmap;

    fn build(&self, len: usize) -> Self::Bitmap {
        ByteBitmap { bytes: vec![0; len] }
    }

    fn bits_per_value(&self) -> u64 {
        u8::BITS as u64
    }
}

/// Bitmap using a byte per value.
pub struct ByteBitmap {
    bytes: Vec<u8>,
}

impl Bitmap for ByteBitmap {
    fn set(&mut self, index: usize) {
        self.bytes[index] = 1;
    }

    fn test(&self, index: usize) -> bool {
        self.bytes[index] != 0
    }

    fn len(&self) -> usize {
        self.bytes.len()
    }
}

/// Arbitrary-precision bitmap builder.
#[derive(Clone, Default)]
pub struct BigUintBitmapBuilder;

impl BitmapBuilder for BigUintBitmapBuilder {
    type Bitmap = BigUintBitmap;

    fn build(&self, len: usize) -> Self::Bitmap {
        BigUintBitmap {
            bits: BigUint::default(),
            len,
        }
    }

    fn bits_per_value(&self) -> u64 {
        1
    }
}

/// Bitmap backed by an arbitrary-precision unsigned integer.
pub struct BigUintBitmap {
    bits: BigUint,
    len: usize,
}

impl Bitmap for BigUintBitmap {
    fn set(&mut self, index: usize) {
        assert!(index < self.len, "index {} out of bitmap bounds {}", index, self.len);
        self.bits.set_bit(index as u64, true);
    }

    fn test(&self, index: usize) -> bool {
        self.bits.bit(index as u64)
    }

    fn len(&self) -> usize {
        self.len
    }
}

/// Fixed-width word bitmap builder.
#[derive(Clone, Default)]
pub struct WordBitmapBuilder;

impl BitmapBuilder for WordBitmapBuilder {
    type Bitmap = WordBitmap;

    fn build(&self, len: usize) -> Self::Bitmap {
        WordBitmap {
            words: vec![0; (len + WORD_BITS - 1) / WORD_BITS],
            len,
        }
    }

    fn bits_per_value(&self) -> u64 {
        1
    }
}

const WORD_BITS: usize = u64::BITS as usize;
const WORD_SHIFT: usize = 6;
const WORD_MASK: usize = WORD_BITS - 1;

/// Bitmap packed into 64-bit words.
pub struct WordBitmap {
    words: Vec<u64>,
    len: usize,
}

impl Bitmap for WordBitmap {
    fn set(&mut self, index: usize) {
        assert!(index < self.len, "index {} out of bitmap bounds {}", index, self.len);
        self.words[index >> WORD_SHIFT] |= 1 << (index & WORD_MASK);
    }

    fn test(&self, index: usize) -> bool {
        self.words[index >> WORD_SHIFT] & (1 << (index & WORD_MASK)) != 0
    }

    fn len(&self) -> usize {
        self.len
    }

    /// Skips empty words and finds the lowest set bit with `trailing_zeros`.
    fn next_one(&self, from: usize) -> Option<usize> {
        if from >= self.len {
            return None;
        }

        let mut word_index = from >> WORD_SHIFT;
        // bits below `from` are masked out of the first word
        let mut word = self.words[word_index] & (u64::MAX << (from & WORD_MASK));
        loop {
            if word != 0 {
                return Some((word_index << WORD_SHIFT) + word.trailing_zeros() as usize);
            }
            word_index += 1;
            word = *self.words.get(word_index)?;
        }
    }
}

/// Counting bitmap builder. Allows each value to occur up to `max_repeats` times.
#[derive(Clone)]
pub struct CountingBitmapBuilder {
    max_repeats: u32,
}

impl CountingBitmapBuilder {
    /// Creates a builder for slots holding up to `max_repeats` occurrences. Zero is treated as one.
    pub fn new(max_repeats: u32) -> Self {
        CountingBitmapBuilder {
            max_repeats: max_repeats.max(1),
        }
    }

    /// Number of bits a single counter takes: `ceil(log2(max_repeats + 1))`.
    pub fn slot_bits(&self) -> u32 {
        u32::BITS - self.max_repeats.leading_zeros()
    }
}

impl Default for CountingBitmapBuilder {
    fn default() -> Self {
        CountingBitmapBuilder { max_repeats: 1 }
    }
}

impl BitmapBuilder for CountingBitmapBuilder {
    type Bitmap = CountingBitmap;

    fn build(&self, len: usize) -> Self::Bitmap {
        let slot_bits = self.slot_bits() as usize;
        // slots never straddle a word boundary
        let slots_per_word = WORD_BITS / slot_bits;

        CountingBitmap {
            words: vec![0; (len + slots_per_word - 1) / slots_per_word],
            len,
            limit: self.max_repeats,
            slot_bits,
            slots_per_word,
        }
    }

    fn bits_per_value(&self) -> u64 {
        self.slot_bits() as u64
    }
}

/// Bitmap holding a small saturating counter per value, packed into 64-bit words.
pub struct CountingBitmap {
    words: Vec<u64>,
    len: usize,
    limit: u32,
    slot_bits: usize,
    slots_per_word: usize,
}

impl CountingBitmap {
    fn locate(&self, index: usize) -> (usize, usize, u64) {
        assert!(index < self.len, "index {} out of bitmap bounds {}", index, self.len);
        let word = index / self.slots_per_word;
        let shift = (index % self.slots_per_word) * self.slot_bits;
        let mask = (1u64 << self.slot_bits) - 1;
        (word, shift, mask)
    }
}

impl Bitmap for CountingBitmap {
    /// Increments the counter at `index`, saturating at the limit.
    fn set(&mut self, index: usize) {
        let count = self.count(index);
        if count >= self.limit {
            return;
        }
        let (word, shift, mask) = self.locate(index);
        self.words[word] = (self.words[word] & !(mask << shift)) | (((count + 1) as u64) << shift);
    }

    fn test(&self, index: usize) -> bool {
        self.count(index) > 0
    }

    fn len(&self) -> usize {
        self.len
    }

    fn count(&self, index: usize) -> u32 {
        let (word, shift, mask) = self.locate(index);
        ((self.words[word] >> shift) & mask) as u32
    }

    fn limit(&self) -> u32 {
        self.limit
    }
}
