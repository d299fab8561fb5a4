use std::fs;
use std::io::{self, prelude::*};
use std::path;

use env_logger;
use log;
use rand::seq::SliceRandom;

use bitmap_sort::record::{write_binary_record, write_text_record};
use bitmap_sort::{BoundedSorter, BoundedSorterBuilder, MissingFinderBuilder, WordBitmapBuilder};

fn main() {
    env_logger::Builder::new().filter_level(log::LevelFilter::Debug).init();

    let mut values = Vec::from_iter(0..27_000u32);
    values.shuffle(&mut rand::thread_rng());

    let mut input_writer = io::BufWriter::new(fs::File::create("input.txt").unwrap());
    for value in values.iter() {
        write_text_record(&mut input_writer, *value as u64).unwrap();
    }
    input_writer.flush().unwrap();

    let sorter: BoundedSorter<WordBitmapBuilder> = BoundedSorterBuilder::new().build().unwrap();
    let summary = sorter
        .sort(path::Path::new("input.txt"), path::Path::new("output.txt"), 27_000, 16_000)
        .unwrap();
    log::info!("{} values sorted in {} passes", summary.values, summary.passes);

    let mut binary_writer = io::BufWriter::new(fs::File::create("input.bin").unwrap());
    for value in values.iter().filter(|value| **value != 4_242) {
        write_binary_record(&mut binary_writer, *value).unwrap();
    }
    binary_writer.flush().unwrap();

    let finder = MissingFinderBuilder::new()
        .with_tmp_dir(path::Path::new("./"))
        .build()
        .unwrap();
    let missing = finder.find(path::Path::new("input.bin"), 15, 26_999).unwrap();
    log::info!("{} is missing", missing);
}
