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

//! Selecting records by barcode: extraction by list and subsampling.
//!
use std::collections::HashSet;
use std::io::BufRead;
use std::io::Write;

use indexmap::set::IndexSet;
use noodles_sam as sam;
use noodles_sam::alignment::io::Write as AlignmentWrite;
use noodles_sam::alignment::record::data::field::Tag;

use crate::record;

type E = Box<dyn std::error::Error>;

#[derive(Debug, Clone)]
pub struct InvalidRatio(pub f64);

impl std::fmt::Display for InvalidRatio {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "subsampling ratio must be between 0 and 1, got {}", self.0)
    }
}

impl std::error::Error for InvalidRatio {}

/// Writes the records whose barcode is in `barcodes`.
///
/// Records without a barcode are dropped. Returns the number of records
/// written.
pub fn extract_barcodes<R: BufRead, W: Write>(
    reader: &mut sam::io::Reader<R>,
    header: &sam::Header,
    writer: &mut sam::io::Writer<W>,
    barcodes: &HashSet<String>,
    tag: &Tag,
) -> Result<usize, E> {
    let mut n_written = 0_usize;
    for result in reader.record_bufs(header) {
        let record = result?;
        if record::barcode(&record, tag).is_some_and(|bx| barcodes.contains(&bx)) {
            writer.write_alignment_record(header, &record)?;
            n_written += 1;
        }
    }
    Ok(n_written)
}

/// Distinct barcodes in `reader` in the order they first appear.
pub fn collect_barcodes<R: BufRead>(
    reader: &mut sam::io::Reader<R>,
    header: &sam::Header,
    tag: &Tag,
) -> Result<IndexSet<String>, E> {
    let mut barcodes: IndexSet<String> = IndexSet::new();
    for result in reader.record_bufs(header) {
        if let Some(bx) = record::barcode(&result?, tag) {
            barcodes.insert(bx);
        }
    }
    Ok(barcodes)
}

/// Picks the first `floor(ratio * barcodes.len())` barcodes.
pub fn choose_barcodes(
    barcodes: &IndexSet<String>,
    ratio: f64,
) -> Result<HashSet<String>, E> {
    if !(0.0..=1.0).contains(&ratio) {
        return Err(Box::new(InvalidRatio(ratio)))
    }
    let n_keep = (barcodes.len() as f64 * ratio).floor() as usize;
    log::info!("{} out of {} barcodes will be kept", n_keep, barcodes.len());
    Ok(barcodes.iter().take(n_keep).cloned().collect())
}

/// Writes untagged records and the records of barcodes in `keep`.
pub fn write_subsample<R: BufRead, W: Write>(
    reader: &mut sam::io::Reader<R>,
    header: &sam::Header,
    writer: &mut sam::io::Writer<W>,
    keep: &HashSet<String>,
    tag: &Tag,
) -> Result<usize, E> {
    let mut n_written = 0_usize;
    for result in reader.record_bufs(header) {
        let record = result?;
        let write = match record::barcode(&record, tag) {
            Some(bx) => keep.contains(&bx),
            None => true,
        };
        if write {
            writer.write_alignment_record(header, &record)?;
            n_written += 1;
        }
    }
    Ok(n_written)
}

// Tests
#[cfg(test)]
mod tests {

    const DATA: &[u8] = b"@SQ\tSN:chr1\tLN:1000000\n\
r1\t0\tchr1\t101\t60\t4M\t*\t0\t0\tACGT\tIIII\tBX:Z:A\n\
r2\t0\tchr1\t201\t60\t4M\t*\t0\t0\tACGT\tIIII\tBX:Z:B\n\
r3\t0\tchr1\t301\t60\t4M\t*\t0\t0\tACGT\tIIII\n\
r4\t0\tchr1\t401\t60\t4M\t*\t0\t0\tACGT\tIIII\tBX:Z:C\n\
r5\t0\tchr1\t501\t60\t4M\t*\t0\t0\tACGT\tIIII\tBX:Z:A\n";

    fn written_names(
        bytes: &[u8],
    ) -> Vec<String> {
        String::from_utf8(bytes.to_vec()).unwrap().lines()
            .map(|line| line.split('\t').next().unwrap().to_string())
            .collect()
    }

    #[test]
    fn extract_listed_barcodes() {
        use super::extract_barcodes;
        use crate::record::barcode_tag;
        use std::collections::HashSet;

        let mut reader = noodles_sam::io::Reader::new(DATA);
        let header = reader.read_header().unwrap();
        let mut writer = noodles_sam::io::Writer::new(Vec::new());
        let barcodes: HashSet<String> = ["A".to_string(), "C".to_string()].into_iter().collect();

        let n = extract_barcodes(&mut reader, &header, &mut writer, &barcodes, &barcode_tag()).unwrap();

        assert_eq!(n, 3);
        assert_eq!(written_names(writer.get_ref()), vec!["r1", "r4", "r5"]);
    }

    #[test]
    fn subsample_keeps_first_seen_barcodes() {
        use super::{choose_barcodes, collect_barcodes, write_subsample};
        use crate::record::barcode_tag;

        let mut reader = noodles_sam::io::Reader::new(DATA);
        let header = reader.read_header().unwrap();
        let all = collect_barcodes(&mut reader, &header, &barcode_tag()).unwrap();

        assert_eq!(all.iter().cloned().collect::<Vec<String>>(), vec!["A", "B", "C"]);

        let keep = choose_barcodes(&all, 0.5).unwrap();
        assert_eq!(keep.len(), 1);
        assert!(keep.contains("A"));

        let mut replay = noodles_sam::io::Reader::new(DATA);
        replay.read_header().unwrap();
        let mut writer = noodles_sam::io::Writer::new(Vec::new());
        let n = write_subsample(&mut replay, &header, &mut writer, &keep, &barcode_tag()).unwrap();

        assert_eq!(n, 3);
        assert_eq!(written_names(writer.get_ref()), vec!["r1", "r3", "r5"]);
    }

    #[test]
    fn ratio_out_of_range() {
        use super::choose_barcodes;
        use indexmap::set::IndexSet;

        let barcodes: IndexSet<String> = IndexSet::new();

        assert!(choose_barcodes(&barcodes, 1.5).is_err());
        assert!(choose_barcodes(&barcodes, -0.1).is_err());
        assert!(choose_barcodes(&barcodes, 1.0).is_ok());
    }
}
