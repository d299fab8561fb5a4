//! Bounded bitmap sorter.

use log;
use std::error::Error;
use std::fmt;
use std::fmt::Display;
use std::fs;
use std::io;
use std::io::prelude::*;
use std::path::Path;

use crate::bitmap::{Bitmap, BitmapBuilder, WordBitmapBuilder};
use crate::record::{write_text_record, RecordError, TextRecordReader};

/// Sorting error.
#[derive(Debug)]
pub enum SortError {
    /// Input value lies outside of the `[0, length)` domain.
    InvalidDomain { value: i64, length: u64, line: u64 },
    /// No memory available to sort a non-empty domain.
    InvalidAvailable { length: u64, available: u64 },
    /// Input value occurs more than once.
    DuplicateValue { value: u64, line: u64 },
    /// Input value occurs more times than the repeat limit allows.
    RepeatLimit { value: u64, limit: u32, line: u64 },
    /// Input line is not an integer.
    MalformedRecord { line: u64, content: String },
    /// Temporary output file creation or persisting error.
    TempFile(io::Error),
    /// Workers thread pool initialization error.
    ThreadPoolBuildError(rayon::ThreadPoolBuildError),
    /// Common I/O error.
    IO(io::Error),
}

impl Error for SortError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match &self {
            SortError::TempFile(err) => Some(err),
            SortError::ThreadPoolBuildError(err) => Some(err),
            SortError::IO(err) => Some(err),
            _ => None,
        }
    }
}

impl Display for SortError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self {
            SortError::InvalidDomain { value, length, line } => {
                write!(f, "value {} at line {} is out of range [0, {})", value, line, length)
            }
            SortError::InvalidAvailable { length, available } => {
                write!(f, "{} available values can't cover domain [0, {})", available, length)
            }
            SortError::DuplicateValue { value, line } => write!(f, "duplicate value {} at line {}", value, line),
            SortError::RepeatLimit { value, limit, line } => {
                write!(f, "value {} at line {} occurs more than {} times", value, line, limit)
            }
            SortError::MalformedRecord { line, content } => {
                write!(f, "line {} is not a valid integer: {:?}", line, content)
            }
            SortError::TempFile(err) => write!(f, "temporary output file error: {}", err),
            SortError::ThreadPoolBuildError(err) => write!(f, "thread pool initialization failed: {}", err),
            SortError::IO(err) => write!(f, "I/O operation failed: {}", err),
        }
    }
}

impl From<RecordError> for SortError {
    fn from(err: RecordError) -> Self {
        match err {
            RecordError::IO(err) => SortError::IO(err),
            RecordError::Malformed { position, content } => SortError::MalformedRecord { line: position, content },
        }
    }
}

/// Sorting result summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortSummary {
    /// Number of passes made over the input.
    pub passes: u64,
    /// Number of values written to the output.
    pub values: u64,
}

/// Bounded sorter builder. Provides methods for [`BoundedSorter`] initialization.
#[derive(Clone)]
pub struct BoundedSorterBuilder<B = WordBitmapBuilder>
where
    B: BitmapBuilder,
{
    /// Number of passes to be run in parallel.
    threads_number: Option<usize>,
    /// Input/output file buffer size.
    rw_buf_size: Option<usize>,
    /// Bitmap builder.
    bitmap_builder: B,
}

impl<B> BoundedSorterBuilder<B>
where
    B: BitmapBuilder,
{
    /// Creates an instance of a builder with default parameters.
    pub fn new() -> Self {
        BoundedSorterBuilder::default()
    }

    /// Builds a [`BoundedSorter`] instance using provided configuration.
    pub fn build(self) -> Result<BoundedSorter<B>, SortError> {
        BoundedSorter::new(self.threads_number, self.bitmap_builder, self.rw_buf_size)
    }

    /// Sets number of passes to be run in parallel.
    pub fn with_threads_number(mut self, threads_number: usize) -> BoundedSorterBuilder<B> {
        self.threads_number = Some(threads_number);
        return self;
    }

    /// Sets bitmap builder.
    pub fn with_bitmap(mut self, bitmap_builder: B) -> BoundedSorterBuilder<B> {
        self.bitmap_builder = bitmap_builder;
        return self;
    }

    /// Sets input/output read/write buffer size.
    pub fn with_rw_buf_size(mut self, buf_size: usize) -> BoundedSorterBuilder<B> {
        self.rw_buf_size = Some(buf_size);
        return self;
    }
}

impl<B> Default for BoundedSorterBuilder<B>
where
    B: BitmapBuilder,
{
    fn default() -> Self {
        BoundedSorterBuilder {
            threads_number: None,
            rw_buf_size: None,
            bitmap_builder: B::default(),
        }
    }
}

/// Sub-range `[min, min + len)` of the domain covered by one pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Window {
    min: u64,
    len: usize,
}

impl Window {
    fn contains(&self, value: u64) -> bool {
        value >= self.min && value - self.min < self.len as u64
    }
}

/// Bounded sorter.
///
/// Sorts a file of distinct integers from a known domain `[0, length)` by marking their presence in a bitmap.
/// When the bitmap can't cover the whole domain, the input is scanned once per domain window.
pub struct BoundedSorter<B = WordBitmapBuilder>
where
    B: BitmapBuilder,
{
    /// Parallel passes thread pool. Passes run sequentially if not set.
    thread_pool: Option<rayon::ThreadPool>,
    /// Number of passes run at once.
    threads_number: usize,
    /// Bitmap builder.
    bitmap_builder: B,
    /// Input/output file buffer size.
    rw_buf_size: Option<usize>,
}

impl<B> BoundedSorter<B>
where
    B: BitmapBuilder,
{
    /// Creates a new bounded sorter instance.
    ///
    /// # Arguments
    /// * `threads_number` - Number of passes to be run in parallel. If the parameter is [`None`] or `1`
    ///   passes run sequentially on the calling thread. Every parallel pass holds its own bitmap.
    /// * `bitmap_builder` - An instance of a bitmap builder that will be used for pass bitmap creation.
    /// * `rw_buf_size` - Input/output file buffer size.
    pub fn new(
        threads_number: Option<usize>,
        bitmap_builder: B,
        rw_buf_size: Option<usize>,
    ) -> Result<Self, SortError> {
        let threads_number = threads_number.unwrap_or(1).max(1);

        return Ok(BoundedSorter {
            thread_pool: Self::init_thread_pool(threads_number)?,
            threads_number,
            bitmap_builder,
            rw_buf_size,
        });
    }

    fn init_thread_pool(threads_number: usize) -> Result<Option<rayon::ThreadPool>, SortError> {
        if threads_number == 1 {
            log::info!("running passes sequentially");
            return Ok(None);
        }

        log::info!("initializing thread-pool (threads: {})", threads_number);
        let thread_pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads_number)
            .build()
            .map_err(|err| SortError::ThreadPoolBuildError(err))?;

        return Ok(Some(thread_pool));
    }

    /// Sorts integers from the input file into the output file.
    ///
    /// The output is written to a temporary file next to `output` and moved over it only when the sort
    /// succeeded, so a failed sort leaves `output` untouched.
    ///
    /// # Arguments
    /// * `input` - File holding one integer per line
    /// * `output` - File the sorted integers are written to
    /// * `length` - Domain size, every input value must be in `[0, length)`
    /// * `available` - Number of values a single pass bitmap can hold
    pub fn sort(&self, input: &Path, output: &Path, length: u64, available: u64) -> Result<SortSummary, SortError> {
        let windows = self.plan(length, available)?;
        log::info!(
            "sorting {} into {} (domain: {}, passes: {})",
            input.display(),
            output.display(),
            length,
            windows.len()
        );

        let output_dir = match output.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        let mut tmp_file = tempfile::NamedTempFile::new_in(output_dir).map_err(|err| SortError::TempFile(err))?;

        let mut values = 0;
        {
            let mut writer = match self.rw_buf_size {
                Some(buf_size) => io::BufWriter::with_capacity(buf_size, tmp_file.as_file_mut()),
                None => io::BufWriter::new(tmp_file.as_file_mut()),
            };

            match &self.thread_pool {
                None => {
                    for window in windows.iter() {
                        let bitmap = self.scan(input, *window, length)?;
                        values += Self::emit(&bitmap, *window, &mut writer)?;
                    }
                }
                Some(thread_pool) => {
                    for group in windows.chunks(self.threads_number) {
                        let bitmaps = thread_pool.install(|| {
                            use rayon::prelude::*;

                            group
                                .par_iter()
                                .map(|window| self.scan(input, *window, length))
                                .collect::<Result<Vec<_>, _>>()
                        })?;

                        for (bitmap, window) in bitmaps.iter().zip(group) {
                            values += Self::emit(bitmap, *window, &mut writer)?;
                        }
                    }
                }
            }

            writer.flush().map_err(|err| SortError::IO(err))?;
        }

        tmp_file.persist(output).map_err(|err| SortError::TempFile(err.error))?;
        log::debug!("sorting done ({} values written)", values);

        return Ok(SortSummary {
            passes: windows.len() as u64,
            values,
        });
    }

    fn plan(&self, length: u64, available: u64) -> Result<Vec<Window>, SortError> {
        let window_size = self.bitmap_builder.window_size(length, available);

        if length == 0 {
            // a single pass still validates the input
            return Ok(vec![Window { min: 0, len: 0 }]);
        }
        if window_size == 0 {
            return Err(SortError::InvalidAvailable { length, available });
        }

        let window_size = window_size.min(length);
        let passes = (length - 1) / window_size + 1;
        let mut windows = Vec::new();

        for pass in 0..passes {
            let min = pass * window_size;
            // a window bitmap must be addressable on this target
            let len = usize::try_from(window_size.min(length - min))
                .map_err(|_| SortError::InvalidAvailable { length, available })?;
            windows.push(Window { min, len });
        }

        return Ok(windows);
    }

    fn scan(&self, input: &Path, window: Window, length: u64) -> Result<B::Bitmap, SortError> {
        log::debug!("scanning pass window [{}, {})", window.min, window.min + window.len as u64);

        let file = fs::File::open(input).map_err(|err| SortError::IO(err))?;
        let reader = match self.rw_buf_size {
            Some(buf_size) => io::BufReader::with_capacity(buf_size, file),
            None => io::BufReader::new(file),
        };

        let mut bitmap = self.bitmap_builder.build(window.len);
        let mut records = TextRecordReader::new(reader);

        while let Some(value) = records.next() {
            let value = value?;
            let line = records.line();

            if value < 0 || value as u64 >= length {
                return Err(SortError::InvalidDomain { value, length, line });
            }
            let value = value as u64;
            if !window.contains(value) {
                continue;
            }

            if !bitmap.record((value - window.min) as usize) {
                let limit = bitmap.limit();
                return Err(if limit == 1 {
                    SortError::DuplicateValue { value, line }
                } else {
                    SortError::RepeatLimit { value, limit, line }
                });
            }
        }

        return Ok(bitmap);
    }

    fn emit<W: Write>(bitmap: &B::Bitmap, window: Window, writer: &mut W) -> Result<u64, SortError> {
        let mut written = 0;

        for index in bitmap.ones() {
            let value = window.min + index as u64;
            for _ in 0..bitmap.count(index) {
                write_text_record(writer, value).map_err(|err| SortError::IO(err))?;
                written += 1;
            }
        }

        return Ok(written);
    }
}

#[cfg(test)]
mod test {
    use std::fs;
    use std::path::{Path, PathBuf};

    use rand::seq::SliceRandom;
    use rstest::*;

    use super::{BoundedSorter, BoundedSorterBuilder, SortError, SortSummary, Window};
    use crate::bitmap::{
        BigUintBitmapBuilder, BitmapBuilder, ByteBitmapBuilder, CountingBitmapBuilder, NaiveBitmapBuilder,
        WordBitmapBuilder,
    };

    #[fixture]
    fn tmp_dir() -> tempfile::TempDir {
        tempfile::tempdir().unwrap()
    }

    fn write_input(dir: &Path, values: &[i64]) -> PathBuf {
        let path = dir.join("input.txt");
        let content: String = values.iter().map(|value| format!("{}\n", value)).collect();
        fs::write(&path, content).unwrap();
        return path;
    }

    fn read_output(path: &Path) -> Vec<u64> {
        fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(|line| line.parse().unwrap())
            .collect()
    }

    fn shuffled(length: i64) -> Vec<i64> {
        let mut values = Vec::from_iter(0..length);
        values.shuffle(&mut rand::thread_rng());
        return values;
    }

    fn run_sort<B: BitmapBuilder>(
        dir: &Path,
        builder: B,
        values: &[i64],
        length: u64,
        available: u64,
    ) -> Result<(SortSummary, PathBuf), SortError> {
        let input = write_input(dir, values);
        let output = dir.join("output.txt");

        let sorter: BoundedSorter<B> = BoundedSorterBuilder::new().with_bitmap(builder).build()?;
        let summary = sorter.sort(&input, &output, length, available)?;

        return Ok((summary, output));
    }

    #[rstest]
    #[case(5, 1)]
    #[case(2, 3)]
    fn test_sort_small_input(tmp_dir: tempfile::TempDir, #[case] available: u64, #[case] passes: u64) {
        let (summary, output) =
            run_sort(tmp_dir.path(), WordBitmapBuilder, &[4, 1, 3, 0, 2], 5, available).unwrap();

        assert_eq!(summary, SortSummary { passes, values: 5 });
        assert_eq!(read_output(&output), vec![0, 1, 2, 3, 4]);
    }

    fn check_sort<B: BitmapBuilder>(builder: B, available: u64) {
        let tmp_dir = tempfile::tempdir().unwrap();
        let input = shuffled(100);

        let (summary, output) = run_sort(tmp_dir.path(), builder, &input, 100, available).unwrap();

        assert_eq!(summary.values, 100);
        assert_eq!(read_output(&output), Vec::from_iter(0..100));
    }

    #[rstest]
    fn test_naive_sort(#[values(1, 10, 50, 100)] available: u64) {
        check_sort(NaiveBitmapBuilder, available);
    }

    #[rstest]
    fn test_byte_sort(#[values(1, 10, 50, 100)] available: u64) {
        check_sort(ByteBitmapBuilder, available);
    }

    #[rstest]
    fn test_biguint_sort(#[values(1, 10, 50, 100)] available: u64) {
        check_sort(BigUintBitmapBuilder, available);
    }

    #[rstest]
    fn test_word_sort(#[values(1, 10, 50, 100)] available: u64) {
        check_sort(WordBitmapBuilder, available);
    }

    #[rstest]
    fn test_counting_sort(#[values(1, 10, 50, 100)] available: u64) {
        check_sort(CountingBitmapBuilder::new(1), available);
    }

    fn sorted_bytes<B: BitmapBuilder>(dir: &Path, builder: B, values: &[i64], length: u64, available: u64) -> Vec<u8> {
        let (_, output) = run_sort(dir, builder, values, length, available).unwrap();
        return fs::read(output).unwrap();
    }

    #[rstest]
    #[case(7)]
    #[case(64)]
    fn test_bitmaps_produce_identical_output(tmp_dir: tempfile::TempDir, #[case] available: u64) {
        let values: Vec<i64> = shuffled(300).into_iter().filter(|value| value % 3 != 0).collect();

        let naive = sorted_bytes(tmp_dir.path(), NaiveBitmapBuilder, &values, 300, available);
        let bytes = sorted_bytes(tmp_dir.path(), ByteBitmapBuilder, &values, 300, available);
        let biguint = sorted_bytes(tmp_dir.path(), BigUintBitmapBuilder, &values, 300, available);
        let words = sorted_bytes(tmp_dir.path(), WordBitmapBuilder, &values, 300, available);

        let expected: String = (0..300).filter(|value| value % 3 != 0).map(|value| format!("{}\n", value)).collect();
        assert_eq!(naive, expected.as_bytes());
        assert_eq!(bytes, naive);
        assert_eq!(biguint, naive);
        assert_eq!(words, naive);
    }

    #[rstest]
    fn test_sort_is_idempotent(tmp_dir: tempfile::TempDir) {
        let input = write_input(tmp_dir.path(), &shuffled(50));
        let output = tmp_dir.path().join("output.txt");
        let sorter: BoundedSorter = BoundedSorterBuilder::new().build().unwrap();

        sorter.sort(&input, &output, 50, 8).unwrap();
        let first = fs::read(&output).unwrap();
        sorter.sort(&input, &output, 50, 8).unwrap();
        let second = fs::read(&output).unwrap();

        assert_eq!(first, second);
    }

    #[rstest]
    fn test_sort_in_place(tmp_dir: tempfile::TempDir) {
        let input = write_input(tmp_dir.path(), &[4, 1, 3, 0, 2]);
        let sorter: BoundedSorter = BoundedSorterBuilder::new().build().unwrap();

        sorter.sort(&input, &input, 5, 2).unwrap();

        assert_eq!(read_output(&input), vec![0, 1, 2, 3, 4]);
    }

    #[rstest]
    #[case(40, 1)]
    #[case(1, 40)]
    #[case(3, 14)]
    fn test_pass_count(tmp_dir: tempfile::TempDir, #[case] available: u64, #[case] passes: u64) {
        let (summary, _) = run_sort(tmp_dir.path(), ByteBitmapBuilder, &shuffled(40), 40, available).unwrap();
        assert_eq!(summary.passes, passes);
    }

    #[rstest]
    fn test_naive_sort_is_single_pass(tmp_dir: tempfile::TempDir) {
        let (summary, _) = run_sort(tmp_dir.path(), NaiveBitmapBuilder, &shuffled(40), 40, 1).unwrap();
        assert_eq!(summary.passes, 1);
    }

    #[rstest]
    fn test_parallel_passes(tmp_dir: tempfile::TempDir) {
        let input = write_input(tmp_dir.path(), &shuffled(100));
        let output = tmp_dir.path().join("output.txt");

        let sorter: BoundedSorter<WordBitmapBuilder> = BoundedSorterBuilder::new()
            .with_threads_number(3)
            .with_rw_buf_size(64)
            .build()
            .unwrap();
        let summary = sorter.sort(&input, &output, 100, 7).unwrap();

        assert_eq!(summary, SortSummary { passes: 15, values: 100 });
        assert_eq!(read_output(&output), Vec::from_iter(0..100));
    }

    #[rstest]
    fn test_duplicate_value(tmp_dir: tempfile::TempDir) {
        let result = run_sort(tmp_dir.path(), WordBitmapBuilder, &[4, 1, 3, 0, 4], 5, 2);

        match result {
            Err(SortError::DuplicateValue { value, line }) => {
                assert_eq!(value, 4);
                assert_eq!(line, 5);
            }
            other => panic!("unexpected result: {:?}", other),
        }
        // earlier passes must not leak into the output
        assert!(!tmp_dir.path().join("output.txt").exists());
    }

    #[rstest]
    fn test_failed_sort_keeps_previous_output(tmp_dir: tempfile::TempDir) {
        let output = tmp_dir.path().join("output.txt");
        fs::write(&output, "previous\n").unwrap();

        let result = run_sort(tmp_dir.path(), ByteBitmapBuilder, &[0, 1, 1], 2, 1);

        assert!(matches!(result, Err(SortError::DuplicateValue { value: 1, line: 3 })));
        assert_eq!(fs::read_to_string(&output).unwrap(), "previous\n");
    }

    #[rstest]
    #[case(5)]
    #[case(6)]
    #[case(-1)]
    fn test_out_of_range_value(tmp_dir: tempfile::TempDir, #[case] invalid: i64) {
        let result = run_sort(tmp_dir.path(), WordBitmapBuilder, &[0, 1, invalid, 2], 5, 5);

        match result {
            Err(SortError::InvalidDomain { value, length, line }) => {
                assert_eq!(value, invalid);
                assert_eq!(length, 5);
                assert_eq!(line, 3);
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[rstest]
    fn test_malformed_record(tmp_dir: tempfile::TempDir) {
        let input = tmp_dir.path().join("input.txt");
        fs::write(&input, "1\n0\nabc\n").unwrap();
        let sorter: BoundedSorter = BoundedSorterBuilder::new().build().unwrap();

        let result = sorter.sort(&input, &tmp_dir.path().join("output.txt"), 5, 5);

        assert!(matches!(result, Err(SortError::MalformedRecord { line: 3, .. })));
    }

    #[rstest]
    fn test_missing_input(tmp_dir: tempfile::TempDir) {
        let sorter: BoundedSorter = BoundedSorterBuilder::new().build().unwrap();

        let result = sorter.sort(&tmp_dir.path().join("absent.txt"), &tmp_dir.path().join("output.txt"), 5, 5);

        assert!(matches!(result, Err(SortError::IO(_))));
    }

    #[rstest]
    fn test_no_available_memory(tmp_dir: tempfile::TempDir) {
        let result = run_sort(tmp_dir.path(), WordBitmapBuilder, &[0], 5, 0);
        assert!(matches!(result, Err(SortError::InvalidAvailable { length: 5, available: 0 })));
    }

    #[test]
    fn test_window_plan() {
        let sorter: BoundedSorter = BoundedSorterBuilder::new().build().unwrap();

        let windows = sorter.plan(5, 2).unwrap();
        assert_eq!(
            windows,
            vec![Window { min: 0, len: 2 }, Window { min: 2, len: 2 }, Window { min: 4, len: 1 }]
        );
        // available beyond the domain is clamped to a single window
        assert_eq!(sorter.plan(5, u64::MAX).unwrap(), vec![Window { min: 0, len: 5 }]);
    }

    #[cfg(target_pointer_width = "32")]
    #[test]
    fn test_window_exceeding_address_space() {
        let sorter: BoundedSorter = BoundedSorterBuilder::new().build().unwrap();

        let result = sorter.plan(1 << 40, 1 << 40);

        assert!(matches!(result, Err(SortError::InvalidAvailable { .. })));
    }

    #[rstest]
    fn test_non_utf8_line(tmp_dir: tempfile::TempDir) {
        let input = tmp_dir.path().join("input.txt");
        fs::write(&input, b"1\n\xff\xfe\n0\n").unwrap();
        let sorter: BoundedSorter = BoundedSorterBuilder::new().build().unwrap();

        let result = sorter.sort(&input, &tmp_dir.path().join("output.txt"), 5, 5);

        assert!(matches!(result, Err(SortError::MalformedRecord { line: 2, .. })));
    }

    #[rstest]
    fn test_empty_domain(tmp_dir: tempfile::TempDir) {
        let (summary, output) = run_sort(tmp_dir.path(), WordBitmapBuilder, &[], 0, 0).unwrap();
        assert_eq!(summary, SortSummary { passes: 1, values: 0 });
        assert_eq!(read_output(&output), Vec::<u64>::new());

        let result = run_sort(tmp_dir.path(), WordBitmapBuilder, &[0], 0, 0);
        assert!(matches!(result, Err(SortError::InvalidDomain { value: 0, length: 0, line: 1 })));
    }

    #[rstest]
    #[case(3, Some(vec![0, 1, 3, 3, 3, 4]))]
    #[case(2, None)]
    fn test_bounded_repeats(tmp_dir: tempfile::TempDir, #[case] max_repeats: u32, #[case] expected: Option<Vec<u64>>) {
        let values = [3, 1, 3, 4, 0, 3];
        let result = run_sort(tmp_dir.path(), CountingBitmapBuilder::new(max_repeats), &values, 5, 2);

        match (result, expected) {
            (Ok((summary, output)), Some(expected)) => {
                assert_eq!(summary.values, 6);
                assert_eq!(read_output(&output), expected);
            }
            (Err(SortError::RepeatLimit { value, limit, line }), None) => {
                assert_eq!(value, 3);
                assert_eq!(limit, max_repeats);
                assert_eq!(line, 6);
            }
            (other, _) => panic!("unexpected result: {:?}", other),
        }
    }
}
