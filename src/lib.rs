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

//! bxtools is a library and a command-line client for working with
//! linked-read alignments, where each read carries a barcode (the `BX` tag)
//! identifying the long molecule it came from.
//!
//! bxtools processes [SAM](https://samtools.github.io/hts-specs/SAMv1.pdf)
//! streams in a single forward pass (two for the commands that need to know
//! the whole stream before writing). Nothing is indexed and there is no
//! random access.
//!
//! ## Usage
//!
//! ### Command line
//!
//! The bxtools CLI supports the following subcommands:
//!   - `bxtools amfilter` remove reads without a nearby alignment sharing their barcode.
//!   - `bxtools demux` split a stream into one file per barcode list.
//!   - `bxtools extract` keep the reads whose barcode is in a list.
//!   - `bxtools subsample` keep a fraction of the barcodes.
//!   - `bxtools filter` keep read pairs by mapping quality, clipping, and indel length.
//!   - `bxtools split-by-ref` write the barcodes seen on each reference sequence.
//!   - `bxtools bamtofastq` rebuild paired FASTQ files keeping the barcode.
//!
//! ### Rust API
//!
//! The functions in this module take paths and run a whole command. The
//! building blocks operate on [noodles_sam] readers and writers:
//!
//!   - [WindowFilter](filter::WindowFilter): per-barcode proximity state deciding which reads to discard.
//!   - [Demultiplexer](demux::Demultiplexer): buffered fan-out of records to the targets of a [MembershipTable](demux::MembershipTable).
//!   - [record]: the tag and field accessors every command uses.
//!

use std::collections::HashSet;
use std::path::Path;

use noodles_sam::alignment::record::data::field::Tag;

pub mod barcodes;
pub mod demux;
pub mod extract;
pub mod fastq;
pub mod filter;
pub mod pair_filter;
pub mod record;
pub mod split;
pub mod stream;

type E = Box<dyn std::error::Error>;

pub(crate) const PROGRESS_INTERVAL: usize = 100_000;

fn require_file(
    path: &Path,
    command: &str,
) -> Result<(), E> {
    if path.to_str() == Some("-") {
        return Err(format!("{} reads its input twice and cannot read from stdin", command).into())
    }
    Ok(())
}

/// Removes reads that do not form a molecule with other reads of their barcode.
///
/// Reads `input` twice: once to decide which read names to drop with a
/// [WindowFilter](filter::WindowFilter), and once to write the remaining
/// records to `output` (`-` for stdout) in their original order.
///
/// Returns the number of records written.
///
/// ## Errors
///
/// Fails if `input` is `-`, or if `input` or `output` cannot be opened.
///
pub fn amfilter(
    input: &Path,
    output: &Path,
    options: &filter::FilterOptions,
) -> Result<usize, E> {
    require_file(input, "amfilter")?;

    let (mut reader, header) = stream::open_reader(input)?;
    let discard = filter::collect_discards(&mut reader, &header, options)?;
    drop(reader);

    let (mut replay, _) = stream::open_reader(input)?;
    let mut writer = stream::create_writer(output, &header)?;
    let n_written = filter::write_kept(&mut replay, &header, &mut writer, &discard)?;
    stream::close_writer(writer)?;

    log::info!("Wrote {} records to {}", n_written, output.display());
    Ok(n_written)
}

/// Writes each record of `input` to `<out_dir>/<target>.sam` for every target
/// whose barcode list in `lists_dir` contains the record's barcode.
///
/// See [demux] for how targets are registered and how output is buffered.
///
/// Returns the number of barcoded records read.
pub fn demultiplex(
    input: &Path,
    lists_dir: &Path,
    out_dir: &Path,
    options: &demux::DemuxOptions,
) -> Result<usize, E> {
    let (mut reader, header) = stream::open_reader(input)?;
    let table = demux::MembershipTable::from_dir(lists_dir, options.max_barcodes, options.min_barcodes)?;
    log::info!("Registered {} targets covering {} barcodes", table.targets().len(), table.n_barcodes());
    if table.is_empty() {
        log::warn!("No barcode list in {} has more than {} barcodes", lists_dir.display(), options.min_barcodes);
    }

    let destinations = demux::OutputDir::new(out_dir)?;
    let mut demuxer = demux::Demultiplexer::new(table, destinations, header.clone(), options)?;
    for result in reader.record_bufs(&header) {
        demuxer.push(result?)?;
    }
    let n_records = demuxer.n_records();
    demuxer.finish()?;

    log::info!("Demultiplexed {} barcoded records", n_records);
    Ok(n_records)
}

/// Writes the records of `input` whose barcode is listed in `list` to `output`.
pub fn extract(
    input: &Path,
    list: &Path,
    output: &Path,
    tag: &Tag,
) -> Result<usize, E> {
    let (mut reader, header) = stream::open_reader(input)?;
    let barcodes: HashSet<String> = barcodes::read_barcode_file(list, None)?.into_iter().collect();
    log::info!("Extracting {} barcodes", barcodes.len());

    let mut writer = stream::create_writer(output, &header)?;
    let n_written = extract::extract_barcodes(&mut reader, &header, &mut writer, &barcodes, tag)?;
    stream::close_writer(writer)?;
    Ok(n_written)
}

/// Keeps `ratio` of the barcodes of `input` and writes their records to `output`.
///
/// Untagged records are always written.
pub fn subsample(
    input: &Path,
    output: &Path,
    ratio: f64,
    tag: &Tag,
) -> Result<usize, E> {
    require_file(input, "subsample")?;

    let (mut reader, header) = stream::open_reader(input)?;
    let all = extract::collect_barcodes(&mut reader, &header, tag)?;
    let keep = extract::choose_barcodes(&all, ratio)?;
    drop(reader);

    let (mut replay, _) = stream::open_reader(input)?;
    let mut writer = stream::create_writer(output, &header)?;
    let n_written = extract::write_subsample(&mut replay, &header, &mut writer, &keep, tag)?;
    stream::close_writer(writer)?;
    Ok(n_written)
}

/// Writes the query name groups of `input` accepted by [pair_filter::keep_group] to `output`.
///
/// Returns the number of records written.
pub fn filter_pairs(
    input: &Path,
    output: &Path,
    options: &pair_filter::PairFilterOptions,
) -> Result<usize, E> {
    let (mut reader, header) = stream::open_reader(input)?;
    log::info!("Max soft clipping {}, filtering {} pairs", options.max_soft_clipping,
               if options.filter_bad { "suspicious" } else { "well placed" });

    let mut writer = stream::create_writer(output, &header)?;
    let n_written = pair_filter::filter_groups(&mut reader, &header, &mut writer, options)?;
    stream::close_writer(writer)?;
    Ok(n_written)
}

/// Writes `<out_dir>/<reference>.txt` listing the barcodes seen on each reference.
pub fn split_by_reference(
    input: &Path,
    out_dir: &Path,
    tag: &Tag,
) -> Result<usize, E> {
    let (mut reader, header) = stream::open_reader(input)?;
    let lists = split::barcodes_by_reference(&mut reader, &header, tag)?;
    split::write_reference_lists(&lists, out_dir)
}

/// Rebuilds `<out_dir>/<stem>_R1.fastq` and `_R2.fastq` from query name grouped `input`.
pub fn sam_to_fastq(
    input: &Path,
    out_dir: &Path,
    gzip: bool,
    tag: &Tag,
) -> Result<usize, E> {
    let (mut reader, header) = stream::open_reader(input)?;
    let (r1_path, r2_path) = fastq::output_paths(input, out_dir, gzip);
    let mut first = fastq::FastqWriter::create(&r1_path, gzip)?;
    let mut second = fastq::FastqWriter::create(&r2_path, gzip)?;

    let n_pairs = fastq::sam_to_fastq(&mut reader, &header, &mut first, &mut second, tag)?;
    first.finish()?;
    second.finish()?;

    log::info!("Wrote {} read pairs to {} and {}", n_pairs, r1_path.display(), r2_path.display());
    Ok(n_pairs)
}

// Tests
#[cfg(test)]
mod tests {
    use noodles_sam as sam;
    use noodles_sam::alignment::RecordBuf;

    /// Parses a SAM text fixture into its header and records.
    pub(crate) fn read_fixture(
        data: &[u8],
    ) -> (sam::Header, Vec<RecordBuf>) {
        let mut reader = sam::io::Reader::new(data);
        let header = reader.read_header().unwrap();
        let records = reader.record_bufs(&header).map(|r| r.unwrap()).collect();
        (header, records)
    }

    const HEADER: &str = "@SQ\tSN:chr1\tLN:1000000\n";

    fn body_lines(
        path: &std::path::Path,
    ) -> Vec<String> {
        std::fs::read_to_string(path).unwrap().lines()
            .filter(|line| !line.starts_with('@'))
            .map(|line| line.to_string())
            .collect()
    }

    #[test]
    fn amfilter_end_to_end_is_idempotent() {
        use super::amfilter;
        use crate::filter::FilterOptions;

        let lines = [
            "r1\t0\tchr1\t1001\t60\t4M\t*\t0\t0\tACGT\tIIII\tBX:Z:A",
            "r2\t0\tchr1\t1001\t60\t4M\t*\t0\t0\tACGT\tIIII\tBX:Z:B",
            "r3\t0\tchr1\t5001\t60\t4M\t*\t0\t0\tACGT\tIIII\tBX:Z:A",
            "r4\t0\tchr1\t400001\t60\t4M\t*\t0\t0\tACGT\tIIII\tBX:Z:A",
            "r5\t0\tchr1\t900001\t60\t4M\t*\t0\t0\tACGT\tIIII\tBX:Z:A",
            "r6\t0\tchr1\t900501\t60\t4M\t*\t0\t0\tACGT\tIIII\tBX:Z:A",
            "r7\t0\tchr1\t950001\t60\t4M\t*\t0\t0\tACGT\tIIII",
            "r8\t0\tchr1\t950001\t60\t4M\t*\t0\t0\tACGT\tIIII\tBX:Z:C\tAM:A:0",
        ];
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.sam");
        std::fs::write(&input, format!("{}{}\n", HEADER, lines.join("\n"))).unwrap();

        let once = dir.path().join("once.sam");
        let twice = dir.path().join("twice.sam");
        let n_once = amfilter(&input, &once, &FilterOptions::default()).unwrap();
        let n_twice = amfilter(&once, &twice, &FilterOptions::default()).unwrap();

        let expected: Vec<String> = [0, 2, 4, 5, 6].iter().map(|i| lines[*i].to_string()).collect();
        assert_eq!(n_once, 5);
        assert_eq!(body_lines(&once), expected);
        assert_eq!(n_twice, 5);
        assert_eq!(std::fs::read(&once).unwrap(), std::fs::read(&twice).unwrap());
    }

    #[test]
    fn amfilter_missing_input_fails() {
        use super::amfilter;
        use crate::filter::FilterOptions;

        let dir = tempfile::tempdir().unwrap();
        let got = amfilter(&dir.path().join("missing.sam"), &dir.path().join("out.sam"), &FilterOptions::default());

        assert!(got.is_err());
        assert!(!dir.path().join("out.sam").exists());
    }

    #[test]
    fn filter_pairs_end_to_end() {
        use super::filter_pairs;
        use crate::pair_filter::PairFilterOptions;

        let lines = [
            "r1\t65\tchr1\t1001\t60\t4M\t*\t0\t0\tACGT\tIIII\tBX:Z:A",
            "r1\t129\tchr1\t2001\t60\t4M\t*\t0\t0\tACGT\tIIII\tBX:Z:A",
            "r2\t65\tchr1\t1001\t60\t1S3M\t*\t0\t0\tACGT\tIIII\tBX:Z:A",
            "r2\t129\tchr1\t2001\t60\t4M\t*\t0\t0\tACGT\tIIII\tBX:Z:A",
        ];
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.sam");
        std::fs::write(&input, format!("{}{}\n", HEADER, lines.join("\n"))).unwrap();

        let output = dir.path().join("out.sam");
        let options = PairFilterOptions { max_soft_clipping: 0.1, ..Default::default() };
        let n = filter_pairs(&input, &output, &options).unwrap();

        assert_eq!(n, 2);
        assert_eq!(body_lines(&output), vec![lines[0], lines[1]]);
    }

    #[test]
    fn demultiplex_end_to_end() {
        use super::demultiplex;
        use crate::demux::DemuxOptions;

        let dir = tempfile::tempdir().unwrap();
        let lists = dir.path().join("lists");
        std::fs::create_dir(&lists).unwrap();
        std::fs::write(lists.join("A.txt"), "a1\na2\na3\na4\na5\nS\n").unwrap();
        std::fs::write(lists.join("B.txt"), "b1\nb2\nb3\n").unwrap();
        std::fs::write(lists.join("C.txt"), "c1\nc2\nc3\nc4\nc5\nS\n").unwrap();

        let lines = [
            "r1\t0\tchr1\t1001\t60\t4M\t*\t0\t0\tACGT\tIIII\tBX:Z:a1",
            "r2\t0\tchr1\t2001\t60\t4M\t*\t0\t0\tACGT\tIIII\tBX:Z:b1",
            "r3\t16\tchr1\t3001\t37\t2S2M\t*\t0\t0\tACGT\tABCD\tBX:Z:S\tRG:Z:rg1",
            "r4\t0\tchr1\t4001\t60\t4M\t*\t0\t0\tACGT\tIIII",
            "r5\t0\tchr1\t5001\t60\t4M\t*\t0\t0\tACGT\tIIII\tBX:Z:c2",
            "r6\t0\tchr1\t6001\t60\t4M\t*\t0\t0\tACGT\tIIII\tBX:Z:a2",
        ];
        let input = dir.path().join("in.sam");
        std::fs::write(&input, format!("{}{}\n", HEADER, lines.join("\n"))).unwrap();

        let out = dir.path().join("out");
        let options = DemuxOptions { flush_every: 2, ..Default::default() };
        let n = demultiplex(&input, &lists, &out, &options).unwrap();

        assert_eq!(n, 5);
        assert!(!out.join("B.sam").exists());
        assert_eq!(body_lines(&out.join("A.sam")), vec![lines[0], lines[2], lines[5]]);
        assert_eq!(body_lines(&out.join("C.sam")), vec![lines[2], lines[4]]);
        assert!(std::fs::read_to_string(out.join("A.sam")).unwrap().starts_with(HEADER));
    }

    #[test]
    fn demultiplex_truncates_previous_output() {
        use super::demultiplex;
        use crate::demux::DemuxOptions;

        let dir = tempfile::tempdir().unwrap();
        let lists = dir.path().join("lists");
        std::fs::create_dir(&lists).unwrap();
        std::fs::write(lists.join("A.txt"), "a1 a2 a3 a4 a5 a6\n").unwrap();
        let input = dir.path().join("in.sam");
        std::fs::write(&input, format!("{}r1\t0\tchr1\t1001\t60\t4M\t*\t0\t0\tACGT\tIIII\tBX:Z:a6\n", HEADER)).unwrap();

        let out = dir.path().join("out");
        demultiplex(&input, &lists, &out, &DemuxOptions::default()).unwrap();
        demultiplex(&input, &lists, &out, &DemuxOptions::default()).unwrap();

        assert_eq!(body_lines(&out.join("A.sam")).len(), 1);
    }

    #[test]
    fn split_then_demultiplex() {
        use super::{demultiplex, split_by_reference};
        use crate::demux::DemuxOptions;
        use crate::record::barcode_tag;

        let dir = tempfile::tempdir().unwrap();
        let mut data = String::from("@SQ\tSN:chr1\tLN:1000000\n@SQ\tSN:chr2\tLN:1000000\n");
        (0..6).for_each(|i| data += &format!("r{}\t0\tchr1\t{}\t60\t4M\t*\t0\t0\tACGT\tIIII\tBX:Z:bx{}\n", i, 1001 + i, i));
        data += "s1\t0\tchr2\t1001\t60\t4M\t*\t0\t0\tACGT\tIIII\tBX:Z:bx0\n";
        let input = dir.path().join("in.sam");
        std::fs::write(&input, data).unwrap();

        let lists = dir.path().join("lists");
        assert_eq!(split_by_reference(&input, &lists, &barcode_tag()).unwrap(), 2);

        let out = dir.path().join("out");
        demultiplex(&input, &lists, &out, &DemuxOptions::default()).unwrap();

        // chr1 lists 6 barcodes, chr2 only one.
        assert_eq!(body_lines(&out.join("chr1.sam")).len(), 7);
        assert!(!out.join("chr2.sam").exists());
    }

    #[test]
    fn sam_to_fastq_files() {
        use super::sam_to_fastq;
        use crate::record::barcode_tag;
        use needletail::parse_fastx_file;

        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("sample.sam");
        std::fs::write(&input, format!("{}\
r1\t65\tchr1\t1001\t60\t4M\t*\t0\t0\tACGT\tIIII\tBX:Z:A\n\
r1\t129\tchr1\t2001\t60\t4M\t*\t0\t0\tGGGA\tIIII\tBX:Z:A\n", HEADER)).unwrap();

        let n = sam_to_fastq(&input, dir.path(), true, &barcode_tag()).unwrap();
        assert_eq!(n, 1);

        let mut reader = parse_fastx_file(dir.path().join("sample_R2.fastq.gz")).unwrap();
        let record = reader.next().unwrap().unwrap();

        assert_eq!(record.id(), b"r1 BX:Z:A");
        assert_eq!(record.seq().as_ref(), b"GGGA");
        assert!(reader.next().is_none());
    }
}
