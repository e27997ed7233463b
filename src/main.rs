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
use clap::{CommandFactory, Parser};

use bxtools::demux::DemuxOptions;
use bxtools::filter::FilterOptions;
use bxtools::pair_filter::PairFilterOptions;

mod cli;

type E = Box<dyn std::error::Error>;

/// Initializes the logger with verbosity given in `log_max_level`.
fn init_log(log_max_level: usize) {
    // Only fails if a logger was already set.
    let _ = stderrlog::new()
    .module(module_path!())
    .quiet(false)
    .verbosity(log_max_level)
    .timestamp(stderrlog::Timestamp::Off)
    .init();
}

fn run(
    command: &cli::Commands,
) -> Result<(), E> {
    match command {
        // Amfilter
        cli::Commands::Amfilter {
            input_file,
            out_file,
            max_distance,
            barcode_tag,
            validity_tag,
            verbose,
        } => {
            init_log(if *verbose { 2 } else { 1 });
            let options = FilterOptions {
                barcode_tag: *barcode_tag,
                validity_tag: *validity_tag,
                max_distance: *max_distance,
            };
            bxtools::amfilter(input_file, out_file, &options)?;
        },

        // Demux
        cli::Commands::Demux {
            input_file,
            lists_dir,
            out_dir,
            flush_every,
            max_barcodes,
            min_barcodes,
            barcode_tag,
            verbose,
        } => {
            init_log(if *verbose { 2 } else { 1 });
            let options = DemuxOptions {
                barcode_tag: *barcode_tag,
                flush_every: *flush_every,
                max_barcodes: *max_barcodes,
                min_barcodes: *min_barcodes,
            };
            bxtools::demultiplex(input_file, lists_dir, out_dir, &options)?;
        },

        // Extract
        cli::Commands::Extract {
            input_file,
            barcode_list,
            out_file,
            barcode_tag,
            verbose,
        } => {
            init_log(if *verbose { 2 } else { 1 });
            let n = bxtools::extract(input_file, barcode_list, out_file, barcode_tag)?;
            log::info!("Extracted {} records", n);
        },

        // Subsample
        cli::Commands::Subsample {
            input_file,
            ratio,
            out_file,
            barcode_tag,
            verbose,
        } => {
            init_log(if *verbose { 2 } else { 1 });
            let n = bxtools::subsample(input_file, out_file, *ratio, barcode_tag)?;
            log::info!("Wrote {} records", n);
        },

        // Filter
        cli::Commands::Filter {
            input_file,
            out_file,
            min_mapping_quality,
            max_soft_clipping,
            max_hard_clipping,
            filter_bad,
            verbose,
        } => {
            init_log(if *verbose { 2 } else { 1 });
            let options = PairFilterOptions {
                min_mapping_quality: *min_mapping_quality,
                max_soft_clipping: *max_soft_clipping,
                max_hard_clipping: *max_hard_clipping,
                filter_bad: *filter_bad,
            };
            bxtools::filter_pairs(input_file, out_file, &options)?;
        },

        // Split by reference
        cli::Commands::SplitByRef {
            input_file,
            out_dir,
            barcode_tag,
            verbose,
        } => {
            init_log(if *verbose { 2 } else { 1 });
            let n = bxtools::split_by_reference(input_file, out_dir, barcode_tag)?;
            log::info!("Wrote barcode lists for {} reference sequences", n);
        },

        // Bamtofastq
        cli::Commands::Bamtofastq {
            input_file,
            out_dir,
            gzip,
            barcode_tag,
            verbose,
        } => {
            init_log(if *verbose { 2 } else { 1 });
            bxtools::sam_to_fastq(input_file, out_dir, *gzip, barcode_tag)?;
        },
    }
    Ok(())
}

fn main() {
    let cli = cli::Cli::parse();

    // Subcommands:
    let Some(command) = &cli.command else {
        let _ = cli::Cli::command().print_help();
        std::process::exit(1);
    };

    if let Err(e) = run(command) {
        init_log(1);
        log::error!("{}", e);
        std::process::exit(1);
    }
}
