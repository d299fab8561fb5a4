//! `bitmap-sort` is a constrained-memory bitmap sort and missing number search over files of bounded integers.
//!
//! When every value of a data set is known to lie in a bounded domain `[0, length)` and no other data is
//! attached to it, the set can be represented by a single bit per domain value. Sorting then takes one
//! sequential scan to mark the bits and one ordered walk over the bitmap to emit the values. If the bitmap
//! doesn't fit into available memory the domain is split into windows and the input is scanned once per window,
//! trading I/O for memory.
//!
//! # Overview
//!
//! `bitmap-sort` supports the following features:
//!
//! * **Multi-pass sorting:**
//!   the number of passes is derived from the domain size and the number of values available memory can hold.
//! * **Interchangeable bitmap storage:**
//!   a cell per value, a byte per value, an arbitrary-precision integer or packed 64-bit words. Every strategy
//!   produces the same output, only memory consumption differs.
//! * **Bounded repeats:**
//!   values may occur up to a configured number of times, each kept in a small packed counter.
//! * **Parallel passes:**
//!   passes only read the input, so several of them may run at once on a thread pool.
//! * **Missing number search:**
//!   finds a value absent from a file of 32-bit big-endian records using constant memory and one file pass per
//!   domain bit.
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//!
//! use log;
//!
//! use bitmap_sort::{BoundedSorter, BoundedSorterBuilder, MissingFinderBuilder, WordBitmapBuilder};
//!
//! fn main() {
//!     let sorter: BoundedSorter<WordBitmapBuilder> = BoundedSorterBuilder::new().build().unwrap();
//!     let summary = sorter
//!         .sort(Path::new("input.txt"), Path::new("output.txt"), 27_000, 16_000)
//!         .unwrap();
//!     log::info!("sorted in {} passes", summary.passes);
//!
//!     let finder = MissingFinderBuilder::new().with_tmp_dir(Path::new("./")).build().unwrap();
//!     let missing = finder.find(Path::new("input.bin"), 20, 1_000_000).unwrap();
//!     log::info!("{} is missing", missing);
//! }
//! ```

pub mod bitmap;
pub mod missing;
pub mod record;
pub mod sort;

pub use bitmap::{
    BigUintBitmap, BigUintBitmapBuilder, Bitmap, BitmapBuilder, ByteBitmap, ByteBitmapBuilder, CountingBitmap,
    CountingBitmapBuilder, NaiveBitmap, NaiveBitmapBuilder, WordBitmap, WordBitmapBuilder,
};
pub use missing::{MissingFinder, MissingFinderBuilder, SearchError};
pub use record::{BinaryRecordReader, RecordError, TextRecordReader};
pub use sort::{BoundedSorter, BoundedSorterBuilder, SortError, SortSummary};
