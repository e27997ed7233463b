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

//! Per-barcode proximity filter for linked-read alignments.
//!
//! Reads sharing a barcode should come from a single long molecule and
//! therefore land close to each other on the reference. [WindowFilter]
//! follows the most recent run of alignments for every barcode and marks
//! reads that never found a neighbour within the distance threshold for
//! removal.
//!
//! Filtering happens in two passes over the same stream:
//!   1. [collect_discards] runs a [WindowFilter] over every record and
//!      returns the read names to remove. The decision for the last run of
//!      a barcode is only known once the stream has ended.
//!   2. [write_kept] replays the stream and writes every record whose read
//!      name is not in the [DiscardSet].
//!
//! Distances are compared on the linear position alone. Two reads on
//! different reference sequences can be considered neighbours if their
//! positions happen to be close.
//!
use std::collections::HashMap;
use std::collections::HashSet;
use std::io::BufRead;
use std::io::Write;

use noodles_sam as sam;
use noodles_sam::alignment::RecordBuf;
use noodles_sam::alignment::io::Write as AlignmentWrite;
use noodles_sam::alignment::record::data::field::Tag;

use crate::record;

type E = Box<dyn std::error::Error>;

/// Maximum gap between consecutive alignments of one molecule.
pub const DEFAULT_MAX_DISTANCE: i64 = 15_000;

/// Read names to drop when replaying the stream.
pub type DiscardSet = HashSet<String>;

/// Settings for [WindowFilter].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FilterOptions {
    /// Tag holding the barcode.
    pub barcode_tag: Tag,
    /// Tag whose value `0` marks an alignment as invalid.
    pub validity_tag: Tag,
    /// Alignments closer than this (strictly) belong to the same molecule.
    pub max_distance: i64,
}

impl Default for FilterOptions {
    fn default() -> Self {
        FilterOptions {
            barcode_tag: record::barcode_tag(),
            validity_tag: record::validity_tag(),
            max_distance: DEFAULT_MAX_DISTANCE,
        }
    }
}

/// Most recent run of alignments seen for one barcode.
#[derive(Clone, Debug, PartialEq, Eq)]
enum Window {
    /// One alignment without a confirmed neighbour yet.
    Singleton { read_id: String, pos: i64 },
    /// Two or more neighbouring alignments, only the last position matters.
    Cluster { last_pos: i64 },
}

/// Single pass state machine deciding which reads to discard.
///
/// ## Usage
///
/// ```rust
/// use bxtools::filter::{FilterOptions, WindowFilter};
///
/// let mut filter = WindowFilter::new(&FilterOptions::default());
/// filter.observe_fields("r1", Some("AAAC-1"), 100, false);
/// filter.observe_fields("r2", Some("AAAC-1"), 5_000, false);
/// filter.observe_fields("r3", Some("GGTA-1"), 100, false);
///
/// let discard = filter.finish();
///
/// // r3 is the only read with barcode GGTA-1
/// assert!(discard.contains("r3"));
/// assert_eq!(discard.len(), 1);
/// ```
#[derive(Debug)]
pub struct WindowFilter {
    options: FilterOptions,
    windows: HashMap<String, Window>,
    discard: DiscardSet,
}

impl WindowFilter {
    pub fn new(
        options: &FilterOptions,
    ) -> Self {
        WindowFilter {
            options: options.clone(),
            windows: HashMap::new(),
            discard: DiscardSet::new(),
        }
    }

    /// Updates the state with one alignment record.
    pub fn observe(
        &mut self,
        record: &RecordBuf,
    ) {
        let read_id = record::query_name(record);
        let barcode = record::barcode(record, &self.options.barcode_tag);
        let invalid = record::is_invalid(record, &self.options.validity_tag);
        self.observe_fields(&read_id, barcode.as_deref(), record::position(record), invalid);
    }

    /// Updates the state with the fields [observe](WindowFilter::observe) reads from a record.
    pub fn observe_fields(
        &mut self,
        read_id: &str,
        barcode: Option<&str>,
        pos: i64,
        invalid: bool,
    ) {
        if invalid {
            // Invalid alignments never join or break a window.
            self.discard.insert(read_id.to_string());
            return
        }

        let Some(barcode) = barcode else {
            return
        };

        let max_distance = self.options.max_distance;
        let fresh = Window::Singleton { read_id: read_id.to_string(), pos };

        let next = match self.windows.remove(barcode) {
            None => fresh,
            Some(Window::Singleton { read_id: prev_id, pos: prev_pos }) => {
                if (pos - prev_pos).abs() < max_distance {
                    Window::Cluster { last_pos: pos }
                } else {
                    self.discard.insert(prev_id);
                    fresh
                }
            },
            Some(Window::Cluster { last_pos }) => {
                if (pos - last_pos).abs() < max_distance {
                    Window::Cluster { last_pos: pos }
                } else {
                    fresh
                }
            },
        };
        self.windows.insert(barcode.to_string(), next);
    }

    /// Number of read names marked for removal so far.
    ///
    /// Does not include singletons still waiting for a neighbour.
    pub fn n_discarded(
        &self,
    ) -> usize {
        self.discard.len()
    }

    /// Resolves the remaining windows and returns the final [DiscardSet].
    ///
    /// Windows that still hold a single alignment at the end of the stream
    /// are discarded.
    pub fn finish(
        self,
    ) -> DiscardSet {
        let mut discard = self.discard;
        self.windows.into_values().for_each(|window| {
            if let Window::Singleton { read_id, .. } = window {
                discard.insert(read_id);
            }
        });
        discard
    }
}

/// First pass: runs a [WindowFilter] over all records in `reader`.
pub fn collect_discards<R: BufRead>(
    reader: &mut sam::io::Reader<R>,
    header: &sam::Header,
    options: &FilterOptions,
) -> Result<DiscardSet, E> {
    let mut filter = WindowFilter::new(options);
    let mut count = 0_usize;
    for result in reader.record_bufs(header) {
        let record = result?;
        filter.observe(&record);
        count += 1;
        if count % crate::PROGRESS_INTERVAL == 0 {
            log::info!("{} records scanned, {} reads marked for removal", count, filter.n_discarded());
        }
    }
    let discard = filter.finish();
    log::info!("Scanned {} records, {} reads will be removed", count, discard.len());
    Ok(discard)
}

/// Second pass: writes every record of `reader` not named in `discard`.
///
/// Returns the number of records written.
pub fn write_kept<R: BufRead, W: Write>(
    reader: &mut sam::io::Reader<R>,
    header: &sam::Header,
    writer: &mut sam::io::Writer<W>,
    discard: &DiscardSet,
) -> Result<usize, E> {
    let mut n_written = 0_usize;
    for result in reader.record_bufs(header) {
        let record = result?;
        if !discard.contains(&record::query_name(&record)) {
            writer.write_alignment_record(header, &record)?;
            n_written += 1;
        }
    }
    Ok(n_written)
}

// Tests
#[cfg(test)]
mod tests {

    fn run(
        reads: &[(&str, Option<&str>, i64)],
    ) -> super::DiscardSet {
        use super::{FilterOptions, WindowFilter};

        let mut filter = WindowFilter::new(&FilterOptions::default());
        reads.iter().for_each(|(id, bx, pos)| filter.observe_fields(id, *bx, *pos, false));
        filter.finish()
    }

    #[test]
    fn lone_read_is_discarded() {
        let got = run(&[("r1", Some("A"), 100)]);

        assert!(got.contains("r1"));
        assert_eq!(got.len(), 1);
    }

    #[test]
    fn untagged_reads_are_never_discarded() {
        let got = run(&[
            ("r1", None, 100),
            ("r2", None, 900_000),
            ("r3", Some("A"), 100),
            ("r4", None, 50),
        ]);

        assert!(!got.contains("r1"));
        assert!(!got.contains("r2"));
        assert!(!got.contains("r4"));
        assert!(got.contains("r3"));
    }

    #[test]
    fn close_monotone_run_is_kept() {
        let reads: Vec<(String, i64)> = (0..50).map(|i| (format!("r{}", i), 1000 + i * 14_999)).collect();
        let input: Vec<(&str, Option<&str>, i64)> = reads.iter().map(|(id, pos)| (id.as_str(), Some("A"), *pos)).collect();

        let got = run(&input);

        assert!(got.is_empty());
    }

    #[test]
    fn gap_equal_to_threshold_splits() {
        let got = run(&[
            ("r1", Some("A"), 1000),
            ("r2", Some("A"), 16_000),
        ]);

        // Neither read has a neighbour closer than the threshold.
        assert!(got.contains("r1"));
        assert!(got.contains("r2"));
    }

    #[test]
    fn singleton_discarded_when_window_moves_on() {
        let got = run(&[
            ("r1", Some("A"), 1000),
            ("r2", Some("A"), 500_000),
            ("r3", Some("A"), 500_100),
        ]);

        let expected: super::DiscardSet = ["r1".to_string()].into_iter().collect();
        assert_eq!(got, expected);
    }

    #[test]
    fn confirmed_cluster_tail_is_kept_on_reset() {
        let got = run(&[
            ("r1", Some("A"), 1000),
            ("r2", Some("A"), 2000),
            ("r3", Some("A"), 900_000),
            ("r4", Some("A"), 900_500),
        ]);

        assert!(got.is_empty());
    }

    #[test]
    fn cluster_extends_from_last_position() {
        let got = run(&[
            ("r1", Some("A"), 0),
            ("r2", Some("A"), 10_000),
            ("r3", Some("A"), 24_000),
        ]);

        // r3 is 24kb from r1 but only 14kb from r2.
        assert!(got.is_empty());
    }

    #[test]
    fn interleaved_barcodes_are_independent() {
        let got = run(&[
            ("r1", Some("A"), 1000),
            ("r2", Some("B"), 1000),
            ("r3", Some("A"), 1500),
            ("r4", Some("C"), 1000),
            ("r5", Some("B"), 80_000),
        ]);

        let expected: super::DiscardSet = ["r2", "r4", "r5"].iter().map(|x| x.to_string()).collect();
        assert_eq!(got, expected);
    }

    #[test]
    fn invalid_read_does_not_touch_window() {
        use super::{FilterOptions, WindowFilter};

        let mut filter = WindowFilter::new(&FilterOptions::default());
        filter.observe_fields("r1", Some("A"), 1000, false);
        filter.observe_fields("r2", Some("A"), 900_000, true);
        filter.observe_fields("r3", Some("A"), 1200, false);
        let got = filter.finish();

        let expected: super::DiscardSet = ["r2".to_string()].into_iter().collect();
        assert_eq!(got, expected);
    }

    #[test]
    fn reference_is_ignored_when_comparing_positions() {
        use super::collect_discards;
        use super::FilterOptions;

        // Same barcode, different chromosomes, nearby positions: kept as one molecule.
        let data: Vec<u8> = b"@SQ\tSN:chr1\tLN:1000000\n@SQ\tSN:chr2\tLN:1000000\n\
r1\t0\tchr1\t1001\t60\t4M\t*\t0\t0\tACGT\tIIII\tBX:Z:A\n\
r2\t0\tchr2\t1101\t60\t4M\t*\t0\t0\tACGT\tIIII\tBX:Z:A\n".to_vec();
        let mut reader = noodles_sam::io::Reader::new(&data[..]);
        let header = reader.read_header().unwrap();

        let got = collect_discards(&mut reader, &header, &FilterOptions::default()).unwrap();

        assert!(got.is_empty());
    }

    #[test]
    fn two_pass_filter_on_sam_text() {
        use super::{collect_discards, write_kept};
        use super::FilterOptions;

        let data: Vec<u8> = b"@SQ\tSN:chr1\tLN:1000000\n\
r1\t0\tchr1\t1001\t60\t4M\t*\t0\t0\tACGT\tIIII\tBX:Z:A\tAM:A:1\n\
r2\t0\tchr1\t1101\t60\t4M\t*\t0\t0\tACGT\tIIII\tBX:Z:B\tAM:A:1\n\
r3\t0\tchr1\t2001\t60\t4M\t*\t0\t0\tACGT\tIIII\tBX:Z:A\tAM:A:0\n\
r4\t0\tchr1\t3001\t60\t4M\t*\t0\t0\tACGT\tIIII\tBX:Z:A\tAM:A:1\n\
r5\t0\tchr1\t4001\t60\t4M\t*\t0\t0\tACGT\tIIII\n".to_vec();
        let mut reader = noodles_sam::io::Reader::new(&data[..]);
        let header = reader.read_header().unwrap();
        let discard = collect_discards(&mut reader, &header, &FilterOptions::default()).unwrap();

        let mut replay = noodles_sam::io::Reader::new(&data[..]);
        replay.read_header().unwrap();
        let mut writer = noodles_sam::io::Writer::new(Vec::new());
        let n_written = write_kept(&mut replay, &header, &mut writer, &discard).unwrap();

        let got = String::from_utf8(writer.get_ref().clone()).unwrap();
        let names: Vec<&str> = got.lines().map(|line| line.split('\t').next().unwrap()).collect();

        assert_eq!(n_written, 3);
        assert_eq!(names, vec!["r1", "r4", "r5"]);
    }
}
