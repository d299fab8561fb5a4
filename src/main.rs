use std::path;
use std::process;

use bytesize::ByteSize;
use clap::ArgEnum;
use env_logger;
use log;

use bitmap_sort::{
    BigUintBitmapBuilder, BitmapBuilder, BoundedSorter, BoundedSorterBuilder, ByteBitmapBuilder,
    CountingBitmapBuilder, MissingFinderBuilder, NaiveBitmapBuilder, WordBitmapBuilder,
};

fn main() {
    let arg_parser = build_arg_parser();

    let log_level: LogLevel = arg_parser.value_of_t_or_exit("log_level");
    init_logger(log_level);

    match arg_parser.subcommand() {
        Some(("sort", args)) => sort(args),
        Some(("missing", args)) => missing(args),
        _ => unreachable!("subcommand is required"),
    }
}

/// Amount of memory a single pass may use.
#[derive(Copy, Clone)]
enum Budget {
    Values(u64),
    Bytes(u64),
}

fn sort(args: &clap::ArgMatches) {
    let input = path::Path::new(args.value_of("input").expect("value is required"));
    let output = path::Path::new(args.value_of("output").expect("value is required"));
    let length: u64 = args.value_of_t_or_exit("length");
    let bitmap: BitmapKind = args.value_of_t_or_exit("bitmap");
    let max_repeats: Option<u32> = args
        .is_present("max_repeats")
        .then(|| args.value_of_t_or_exit("max_repeats"));
    let threads: Option<usize> = args
        .is_present("threads")
        .then(|| args.value_of_t_or_exit("threads"));
    let rw_buf_size = args.value_of("rw_buf_size").map(parse_byte_size);

    let budget = if args.is_present("available") {
        Budget::Values(args.value_of_t_or_exit("available"))
    } else {
        Budget::Bytes(parse_byte_size(args.value_of("memory").expect("value is required")) as u64)
    };

    let options = SortOptions {
        input,
        output,
        length,
        budget,
        threads,
        rw_buf_size,
    };

    if let Some(max_repeats) = max_repeats {
        log::info!("using counting bitmap (max repeats: {})", max_repeats);
        return run_sort(CountingBitmapBuilder::new(max_repeats), options);
    }
    match bitmap {
        BitmapKind::Naive => run_sort(NaiveBitmapBuilder, options),
        BitmapKind::Bytes => run_sort(ByteBitmapBuilder, options),
        BitmapKind::Bigint => run_sort(BigUintBitmapBuilder, options),
        BitmapKind::Words => run_sort(WordBitmapBuilder, options),
    }
}

struct SortOptions<'a> {
    input: &'a path::Path,
    output: &'a path::Path,
    length: u64,
    budget: Budget,
    threads: Option<usize>,
    rw_buf_size: Option<usize>,
}

fn run_sort<B: BitmapBuilder>(bitmap_builder: B, options: SortOptions) {
    let available = match options.budget {
        Budget::Values(available) => available,
        Budget::Bytes(bytes) => bytes.saturating_mul(8) / bitmap_builder.bits_per_value(),
    };
    log::info!("pass bitmap holds {} values", available);

    let mut sorter_builder = BoundedSorterBuilder::new().with_bitmap(bitmap_builder);
    if let Some(threads) = options.threads {
        sorter_builder = sorter_builder.with_threads_number(threads);
    }
    if let Some(rw_buf_size) = options.rw_buf_size {
        sorter_builder = sorter_builder.with_rw_buf_size(rw_buf_size);
    }

    let sorter: BoundedSorter<B> = match sorter_builder.build() {
        Ok(sorter) => sorter,
        Err(err) => {
            log::error!("sorter initialization error: {}", err);
            process::exit(1);
        }
    };

    match sorter.sort(options.input, options.output, options.length, available) {
        Ok(summary) => log::info!("{} values sorted in {} passes", summary.values, summary.passes),
        Err(err) => {
            log::error!("data sorting error: {}", err);
            process::exit(1);
        }
    }
}

fn missing(args: &clap::ArgMatches) {
    let input = path::Path::new(args.value_of("input").expect("value is required"));
    let domain_bits: u32 = args.value_of_t_or_exit("bits");
    let count: u64 = args.value_of_t_or_exit("count");
    let tmp_dir: Option<&str> = args.value_of("tmp_dir");
    let rw_buf_size = args.value_of("rw_buf_size").map(parse_byte_size);

    let mut finder_builder = MissingFinderBuilder::new();
    if let Some(tmp_dir) = tmp_dir {
        finder_builder = finder_builder.with_tmp_dir(path::Path::new(tmp_dir));
    }
    if let Some(rw_buf_size) = rw_buf_size {
        finder_builder = finder_builder.with_rw_buf_size(rw_buf_size);
    }

    let finder = match finder_builder.build() {
        Ok(finder) => finder,
        Err(err) => {
            log::error!("finder initialization error: {}", err);
            process::exit(1);
        }
    };

    match finder.find(input, domain_bits, count) {
        Ok(missing) => println!("{}", missing),
        Err(err) => {
            log::error!("missing value search error: {}", err);
            process::exit(1);
        }
    }
}

fn parse_byte_size(value: &str) -> usize {
    value.parse::<ByteSize>().expect("value is pre-validated").as_u64() as usize
}

fn validate_byte_size(value: &str) -> Result<(), String> {
    match value.parse::<ByteSize>() {
        Ok(_) => Ok(()),
        Err(err) => Err(format!("Size format incorrect: {}", err)),
    }
}

#[derive(Copy, Clone, clap::ArgEnum)]
enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn possible_values() -> impl Iterator<Item = clap::PossibleValue<'static>> {
        Self::value_variants().iter().filter_map(|v| v.to_possible_value())
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        <LogLevel as clap::ArgEnum>::from_str(s, false)
    }
}

#[derive(Copy, Clone, clap::ArgEnum)]
enum BitmapKind {
    Naive,
    Bytes,
    Bigint,
    Words,
}

impl BitmapKind {
    pub fn possible_values() -> impl Iterator<Item = clap::PossibleValue<'static>> {
        BitmapKind::value_variants().iter().filter_map(|v| v.to_possible_value())
    }
}

impl std::str::FromStr for BitmapKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        <BitmapKind as clap::ArgEnum>::from_str(s, false)
    }
}

fn build_arg_parser() -> clap::ArgMatches {
    clap::App::new("bitmap-sort")
        .about("bounded integer bitmap sort and missing number search")
        .subcommand_required(true)
        .arg(
            clap::Arg::new("log_level")
                .short('l')
                .long("loglevel")
                .help("logging level")
                .takes_value(true)
                .default_value("info")
                .possible_values(LogLevel::possible_values()),
        )
        .subcommand(
            clap::App::new("sort")
                .about("sorts a file of distinct integers from [0, length)")
                .arg(
                    clap::Arg::new("input")
                        .short('i')
                        .long("input")
                        .help("file to be sorted, one integer per line")
                        .required(true)
                        .takes_value(true),
                )
                .arg(
                    clap::Arg::new("output")
                        .short('o')
                        .long("output")
                        .help("result file")
                        .required(true)
                        .takes_value(true),
                )
                .arg(
                    clap::Arg::new("length")
                        .short('n')
                        .long("length")
                        .help("domain size, every value must be less than it")
                        .required(true)
                        .takes_value(true),
                )
                .arg(
                    clap::Arg::new("available")
                        .short('a')
                        .long("available")
                        .help("number of values a single pass can hold")
                        .takes_value(true)
                        .required_unless_present("memory")
                        .conflicts_with("memory"),
                )
                .arg(
                    clap::Arg::new("memory")
                        .short('m')
                        .long("memory")
                        .help("memory a single pass can use")
                        .takes_value(true)
                        .validator(validate_byte_size),
                )
                .arg(
                    clap::Arg::new("bitmap")
                        .short('b')
                        .long("bitmap")
                        .help("bitmap storage")
                        .takes_value(true)
                        .default_value("words")
                        .possible_values(BitmapKind::possible_values()),
                )
                .arg(
                    clap::Arg::new("max_repeats")
                        .short('r')
                        .long("max-repeats")
                        .help("number of times a value may occur, uses a counting bitmap")
                        .takes_value(true),
                )
                .arg(
                    clap::Arg::new("threads")
                        .short('t')
                        .long("threads")
                        .help("number of passes to run in parallel")
                        .takes_value(true),
                )
                .arg(
                    clap::Arg::new("rw_buf_size")
                        .long("rw-buf-size")
                        .help("file read/write buffer size")
                        .takes_value(true)
                        .validator(validate_byte_size),
                ),
        )
        .subcommand(
            clap::App::new("missing")
                .about("finds a value absent from a file of 32-bit big-endian integers")
                .arg(
                    clap::Arg::new("input")
                        .short('i')
                        .long("input")
                        .help("file to be searched")
                        .required(true)
                        .takes_value(true),
                )
                .arg(
                    clap::Arg::new("bits")
                        .short('w')
                        .long("bits")
                        .help("domain width in bits")
                        .required(true)
                        .takes_value(true),
                )
                .arg(
                    clap::Arg::new("count")
                        .short('c')
                        .long("count")
                        .help("maximum number of integers in the file")
                        .required(true)
                        .takes_value(true),
                )
                .arg(
                    clap::Arg::new("tmp_dir")
                        .short('d')
                        .long("tmp-dir")
                        .help("directory to be used to store partition files")
                        .takes_value(true),
                )
                .arg(
                    clap::Arg::new("rw_buf_size")
                        .long("rw-buf-size")
                        .help("file read/write buffer size")
                        .takes_value(true)
                        .validator(validate_byte_size),
                ),
        )
        .get_matches()
}

fn init_logger(log_level: LogLevel) {
    env_logger::Builder::new()
        .filter_level(match log_level {
            LogLevel::Off => log::LevelFilter::Off,
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        })
        .format_timestamp_millis()
        .init();
}
