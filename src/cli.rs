// bxtools: Barcode-aware filtering and demultiplexing of linked-read alignments.
//
// Copyright 2025 Tommi Mäklin [tommi@maklin.fi].
//
// Copyrights in this project are retained by contributors. No copyright assignment
// is required to contribute to this project.
//
// Except as otherwise noted (below and/or in individual files), this
// project is licensed under the Apache License, Version 2.0
// <LICENSE-APACHE> or <http://www.apache.org/licenses/LICENSE-2.0> or
// the MIT license, <LICENSE-MIT> or <http://opensource.org/licenses/MIT>,
// at your option.
//
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use noodles_sam::alignment::record::data::field::Tag;

use bxtools::demux::DEFAULT_FLUSH_EVERY;
use bxtools::demux::membership::{DEFAULT_MAX_BARCODES, DEFAULT_MIN_BARCODES};
use bxtools::filter::DEFAULT_MAX_DISTANCE;
use bxtools::record::parse_tag;

#[derive(Parser)]
#[command(version)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    // Drop reads without a nearby alignment sharing their barcode
    Amfilter {
        // Input SAM file
        #[arg(group = "input", required = true, help = "Input SAM file")]
        input_file: PathBuf,

        // Output file path, `-` for stdout
        #[arg(short = 'o', long = "output", default_value = "-")]
        out_file: PathBuf,

        // Alignments closer than this belong to the same molecule
        #[arg(short = 'd', long = "distance", default_value_t = DEFAULT_MAX_DISTANCE)]
        max_distance: i64,

        // Barcode tag
        #[arg(long = "tag", default_value = "BX", value_parser = parse_tag)]
        barcode_tag: Tag,

        // Tag marking invalid alignments with value 0
        #[arg(long = "validity-tag", default_value = "AM", value_parser = parse_tag)]
        validity_tag: Tag,

        // Verbosity
        #[arg(short = 'v', long = "verbose", default_value_t = false)]
        verbose: bool,
    },

    // Split reads into one SAM file per barcode list
    Demux {
        // Input SAM file, `-` for stdin
        #[arg(group = "input", required = true, help = "Input SAM file")]
        input_file: PathBuf,

        // Directory with one barcode list per target
        #[arg(short = 'l', long = "lists", required = true)]
        lists_dir: PathBuf,

        // Output directory
        #[arg(short = 'o', long = "out-dir", required = true)]
        out_dir: PathBuf,

        // Records held in memory between flushes
        #[arg(long = "flush-every", default_value_t = DEFAULT_FLUSH_EVERY)]
        flush_every: usize,

        // Barcodes read from each list
        #[arg(long = "max-barcodes", default_value_t = DEFAULT_MAX_BARCODES)]
        max_barcodes: usize,

        // Lists with this many barcodes or fewer are skipped
        #[arg(long = "min-barcodes", default_value_t = DEFAULT_MIN_BARCODES)]
        min_barcodes: usize,

        // Barcode tag
        #[arg(long = "tag", default_value = "BX", value_parser = parse_tag)]
        barcode_tag: Tag,

        // Verbosity
        #[arg(short = 'v', long = "verbose", default_value_t = false)]
        verbose: bool,
    },

    // Keep reads whose barcode is in a list
    Extract {
        // Input SAM file, `-` for stdin
        #[arg(group = "input", required = true, help = "Input SAM file")]
        input_file: PathBuf,

        // Barcode list, optionally gzipped
        #[arg(short = 'b', long = "barcodes", required = true)]
        barcode_list: PathBuf,

        // Output file path, `-` for stdout
        #[arg(short = 'o', long = "output", default_value = "-")]
        out_file: PathBuf,

        // Barcode tag
        #[arg(long = "tag", default_value = "BX", value_parser = parse_tag)]
        barcode_tag: Tag,

        // Verbosity
        #[arg(short = 'v', long = "verbose", default_value_t = false)]
        verbose: bool,
    },

    // Keep a fraction of the barcodes
    Subsample {
        // Input SAM file
        #[arg(group = "input", required = true, help = "Input SAM file")]
        input_file: PathBuf,

        // Fraction of barcodes to keep
        #[arg(short = 'r', long = "ratio", required = true)]
        ratio: f64,

        // Output file path, `-` for stdout
        #[arg(short = 'o', long = "output", default_value = "-")]
        out_file: PathBuf,

        // Barcode tag
        #[arg(long = "tag", default_value = "BX", value_parser = parse_tag)]
        barcode_tag: Tag,

        // Verbosity
        #[arg(short = 'v', long = "verbose", default_value_t = false)]
        verbose: bool,
    },

    // Keep read pairs by alignment quality
    Filter {
        // Input SAM file grouped by query name, `-` for stdin
        #[arg(group = "input", required = true, help = "Input SAM file")]
        input_file: PathBuf,

        // Output file path, `-` for stdout
        #[arg(short = 'o', long = "output", default_value = "-")]
        out_file: PathBuf,

        // Minimum mapping quality of every alignment in a pair
        #[arg(short = 'q', long = "mapping-quality", default_value_t = 0)]
        min_mapping_quality: u8,

        // Largest soft clipped fraction of any alignment
        #[arg(short = 's', long = "max-soft-clipping", default_value_t = 1.0)]
        max_soft_clipping: f64,

        // Largest hard clipped fraction of any alignment
        #[arg(short = 'c', long = "max-hard-clipping", default_value_t = 1.0)]
        max_hard_clipping: f64,

        // Keep suspicious pairs instead
        #[arg(short = 'b', long = "filter-bad", default_value_t = false)]
        filter_bad: bool,

        // Verbosity
        #[arg(short = 'v', long = "verbose", default_value_t = false)]
        verbose: bool,
    },

    // Write the barcodes seen on each reference sequence
    SplitByRef {
        // Input SAM file, `-` for stdin
        #[arg(group = "input", required = true, help = "Input SAM file")]
        input_file: PathBuf,

        // Output directory
        #[arg(short = 'o', long = "out-dir", required = true)]
        out_dir: PathBuf,

        // Barcode tag
        #[arg(long = "tag", default_value = "BX", value_parser = parse_tag)]
        barcode_tag: Tag,

        // Verbosity
        #[arg(short = 'v', long = "verbose", default_value_t = false)]
        verbose: bool,
    },

    // Rebuild paired FASTQ files from name grouped alignments
    Bamtofastq {
        // Input SAM file, `-` for stdin
        #[arg(group = "input", required = true, help = "Input SAM file")]
        input_file: PathBuf,

        // Output directory
        #[arg(short = 'o', long = "out-dir", default_value = ".")]
        out_dir: PathBuf,

        // Compress the output with gzip
        #[arg(short = 'z', long = "gzip", default_value_t = false)]
        gzip: bool,

        // Barcode tag
        #[arg(long = "tag", default_value = "BX", value_parser = parse_tag)]
        barcode_tag: Tag,

        // Verbosity
        #[arg(short = 'v', long = "verbose", default_value_t = false)]
        verbose: bool,
    },
}
