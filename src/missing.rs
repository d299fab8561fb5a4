//! Missing number finder.
//!
//! Finds an integer absent from a file of fixed-width records by splitting the file bit by bit, most significant
//! bit first, and following the smaller half. Every level makes a single sequential pass over its input and
//! writes the two halves to partition files, so working memory stays constant regardless of the input size.
//!
//! Records may repeat. A half that turns out to cover its whole sub-range is abandoned in favour of its sibling.

use log;
use std::error::Error;
use std::fmt;
use std::fmt::Display;
use std::fs;
use std::io;
use std::io::prelude::*;
use std::path::{Path, PathBuf};

use crate::record::{write_binary_record, BinaryRecordReader, RecordError, RECORD_SIZE};

/// Search error.
#[derive(Debug)]
pub enum SearchError {
    /// Domain width is out of `1..=32` or the decided prefix covers the whole domain.
    InvalidDomain { domain_bits: u32, position: u32 },
    /// Mask has bits set outside of the already decided prefix.
    InvalidMask { mask: u32, position: u32 },
    /// Record lies outside of the searched range `[low, high)`.
    ValueOutOfRange { value: u32, offset: u64, low: u64, high: u64 },
    /// Input holds more records than declared.
    RecordCount { expected: u64, actual: u64 },
    /// Every value of the searched range `[low, high)` occurs in the input.
    NoMissingValue { low: u64, high: u64 },
    /// Input can't be split into whole records.
    MalformedRecord { offset: u64, content: String },
    /// Temporary directory or file creation error.
    TempDir(io::Error),
    /// Common I/O error.
    IO(io::Error),
}

impl Error for SearchError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match &self {
            SearchError::TempDir(err) => Some(err),
            SearchError::IO(err) => Some(err),
            _ => None,
        }
    }
}

impl Display for SearchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self {
            SearchError::InvalidDomain { domain_bits, position } => {
                write!(f, "invalid domain: {} bits searched from position {}", domain_bits, position)
            }
            SearchError::InvalidMask { mask, position } => {
                write!(f, "mask {:#x} has undecided bits set at position {}", mask, position)
            }
            SearchError::ValueOutOfRange {
                value,
                offset,
                low,
                high,
            } => write!(f, "value {} at offset {} is out of range [{}, {})", value, offset, low, high),
            SearchError::RecordCount { expected, actual } => {
                write!(f, "expected at most {} records, found {}", expected, actual)
            }
            SearchError::NoMissingValue { low, high } => {
                write!(f, "every value of [{}, {}) is present", low, high)
            }
            SearchError::MalformedRecord { offset, content } => {
                write!(f, "malformed record at offset {}: {}", offset, content)
            }
            SearchError::TempDir(err) => write!(f, "temporary directory or file not created: {}", err),
            SearchError::IO(err) => write!(f, "I/O operation failed: {}", err),
        }
    }
}

impl From<RecordError> for SearchError {
    fn from(err: RecordError) -> Self {
        match err {
            RecordError::IO(err) => SearchError::IO(err),
            RecordError::Malformed { position, content } => SearchError::MalformedRecord {
                offset: position,
                content,
            },
        }
    }
}

/// Partition bucket a record falls into by the value of the examined bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Bucket {
    Ones,
    Zeros,
}

impl Display for Bucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Bucket::Ones => write!(f, "ones"),
            Bucket::Zeros => write!(f, "zeros"),
        }
    }
}

/// Partition file. Removed from the file system when dropped.
struct PartitionFile {
    path: PathBuf,
    records: u64,
}

impl PartitionFile {
    fn path(dir: &Path, mask: u32, position: u32, bucket: Bucket) -> PathBuf {
        dir.join(format!("{:02}-{:08x}.{}.bin", position, mask, bucket))
    }
}

impl Drop for PartitionFile {
    fn drop(&mut self) {
        match fs::remove_file(&self.path) {
            Ok(()) => log::trace!("partition {} removed", self.path.display()),
            Err(err) => log::warn!("partition {} not removed: {}", self.path.display(), err),
        }
    }
}

struct PartitionWriter {
    writer: io::BufWriter<fs::File>,
    file: PartitionFile,
}

impl PartitionWriter {
    fn create(path: PathBuf, buf_size: Option<usize>) -> Result<Self, SearchError> {
        let file = fs::File::create(&path).map_err(|err| SearchError::TempDir(err))?;
        let writer = match buf_size {
            Some(buf_size) => io::BufWriter::with_capacity(buf_size, file),
            None => io::BufWriter::new(file),
        };

        return Ok(PartitionWriter {
            writer,
            file: PartitionFile { path, records: 0 },
        });
    }

    fn write(&mut self, value: u32) -> Result<(), SearchError> {
        write_binary_record(&mut self.writer, value).map_err(|err| SearchError::IO(err))?;
        self.file.records += 1;
        return Ok(());
    }

    fn finish(mut self) -> Result<PartitionFile, SearchError> {
        self.writer.flush().map_err(|err| SearchError::IO(err))?;
        return Ok(self.file);
    }
}

/// Missing finder builder. Provides methods for [`MissingFinder`] initialization.
#[derive(Clone, Default)]
pub struct MissingFinderBuilder {
    /// Directory to be used to store partition files.
    tmp_dir: Option<Box<Path>>,
    /// Record file read/write buffer size.
    rw_buf_size: Option<usize>,
}

impl MissingFinderBuilder {
    /// Creates an instance of a builder with default parameters.
    pub fn new() -> Self {
        MissingFinderBuilder::default()
    }

    /// Builds a [`MissingFinder`] instance using provided configuration.
    pub fn build(self) -> Result<MissingFinder, SearchError> {
        MissingFinder::new(self.tmp_dir.as_deref(), self.rw_buf_size)
    }

    /// Sets directory to be used to store partition files.
    pub fn with_tmp_dir(mut self, path: &Path) -> MissingFinderBuilder {
        self.tmp_dir = Some(path.into());
        return self;
    }

    /// Sets record file read/write buffer size.
    pub fn with_rw_buf_size(mut self, buf_size: usize) -> MissingFinderBuilder {
        self.rw_buf_size = Some(buf_size);
        return self;
    }
}

/// Missing finder.
pub struct MissingFinder {
    /// Directory partition files are created in.
    tmp_dir: tempfile::TempDir,
    /// Record file read/write buffer size.
    rw_buf_size: Option<usize>,
}

impl MissingFinder {
    /// Creates a new missing finder instance.
    ///
    /// # Arguments
    /// * `tmp_path` - Directory to be used to store partition files. If the parameter is [`None`] default OS
    ///   temporary directory will be used.
    /// * `rw_buf_size` - Record file read/write buffer size.
    pub fn new(tmp_path: Option<&Path>, rw_buf_size: Option<usize>) -> Result<Self, SearchError> {
        return Ok(MissingFinder {
            tmp_dir: Self::init_tmp_directory(tmp_path)?,
            rw_buf_size,
        });
    }

    fn init_tmp_directory(tmp_path: Option<&Path>) -> Result<tempfile::TempDir, SearchError> {
        let tmp_dir = if let Some(tmp_path) = tmp_path {
            tempfile::tempdir_in(tmp_path)
        } else {
            tempfile::tempdir()
        }
        .map_err(|err| SearchError::TempDir(err))?;

        log::info!("using {} as a temporary directory", tmp_dir.path().display());

        return Ok(tmp_dir);
    }

    /// Finds a value in `[0, 2^domain_bits)` that doesn't occur in the input.
    ///
    /// # Arguments
    /// * `input` - File of 32-bit big-endian records, values may repeat
    /// * `domain_bits` - Domain width in bits, `1..=32`
    /// * `count` - Maximum number of records in the input. Only checked against the actual number of records,
    ///   duplicates let it reach or exceed the domain size.
    pub fn find(&self, input: &Path, domain_bits: u32, count: u64) -> Result<u32, SearchError> {
        self.find_from(input, domain_bits, count, 0, 0)
    }

    /// Finds a missing value within the sub-range whose top `position` bits are already decided.
    ///
    /// Every input record must share these top bits with `mask`; bits of `mask` below the decided prefix must
    /// be zero. The input is split by the bit at `position` (counting from the most significant bit of the
    /// domain) and the search continues in the half holding fewer records, falling back to the other half
    /// if the first one turns out to be full.
    pub fn find_from(
        &self,
        input: &Path,
        domain_bits: u32,
        count: u64,
        mask: u32,
        position: u32,
    ) -> Result<u32, SearchError> {
        if domain_bits == 0 || domain_bits > u32::BITS || position >= domain_bits {
            return Err(SearchError::InvalidDomain { domain_bits, position });
        }
        // number of undecided bits
        let range_bits = domain_bits - position;
        if (mask as u64) >> domain_bits != 0 || (mask as u64) & ((1u64 << range_bits) - 1) != 0 {
            return Err(SearchError::InvalidMask { mask, position });
        }

        match self.search(input, domain_bits, mask, position, Some(count))? {
            Some(missing) => Ok(missing),
            None => {
                let low = mask as u64;
                Err(SearchError::NoMissingValue {
                    low,
                    high: low + (1u64 << range_bits),
                })
            }
        }
    }

    /// Searches the sub-range selected by `mask` and `position`. Returns [`None`] if every value of it is present.
    fn search(
        &self,
        input: &Path,
        domain_bits: u32,
        mask: u32,
        position: u32,
        count: Option<u64>,
    ) -> Result<Option<u32>, SearchError> {
        let range_bits = domain_bits - position;
        let bit = range_bits - 1;
        log::debug!("partitioning {} by bit {} (mask: {:#x})", input.display(), bit, mask);

        let (ones, zeros) = self.partition(input, mask, position, range_bits)?;
        let actual = ones.records + zeros.records;
        if let Some(count) = count {
            if actual > count {
                return Err(SearchError::RecordCount { expected: count, actual });
            }
        }

        if zeros.records == 0 {
            return Ok(Some(mask));
        }
        if ones.records == 0 {
            return Ok(Some(mask | 1 << bit));
        }
        if bit == 0 {
            return Ok(None);
        }

        // both partitions live until this level returns, the second one is needed if the first is full
        let halves = if ones.records < zeros.records {
            [(&ones, mask | 1 << bit), (&zeros, mask)]
        } else {
            [(&zeros, mask), (&ones, mask | 1 << bit)]
        };

        for (half, half_mask) in halves {
            if let Some(missing) = self.search(&half.path, domain_bits, half_mask, position + 1, None)? {
                return Ok(Some(missing));
            }
            log::debug!("sub-range {:#x} at bit {} is full", half_mask, bit - 1);
        }

        return Ok(None);
    }

    fn partition(
        &self,
        input: &Path,
        mask: u32,
        position: u32,
        range_bits: u32,
    ) -> Result<(PartitionFile, PartitionFile), SearchError> {
        let file = fs::File::open(input).map_err(|err| SearchError::IO(err))?;
        let reader = match self.rw_buf_size {
            Some(buf_size) => io::BufReader::with_capacity(buf_size, file),
            None => io::BufReader::new(file),
        };

        let dir = self.tmp_dir.path();
        let mut ones = PartitionWriter::create(PartitionFile::path(dir, mask, position, Bucket::Ones), self.rw_buf_size)?;
        let mut zeros =
            PartitionWriter::create(PartitionFile::path(dir, mask, position, Bucket::Zeros), self.rw_buf_size)?;

        let prefix = (mask as u64) >> range_bits;
        let mut records = BinaryRecordReader::new(reader);

        while let Some(value) = records.next() {
            let value = value?;

            if (value as u64) >> range_bits != prefix {
                let low = prefix << range_bits;
                return Err(SearchError::ValueOutOfRange {
                    value,
                    offset: records.offset() - RECORD_SIZE as u64,
                    low,
                    high: low + (1u64 << range_bits),
                });
            }

            if (value >> (range_bits - 1)) & 1 == 1 {
                ones.write(value)?;
            } else {
                zeros.write(value)?;
            }
        }

        return Ok((ones.finish()?, zeros.finish()?));
    }
}
