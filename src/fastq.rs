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

//! Converting query name grouped alignments back to paired FASTQ.
//!
//! All alignments of a read pair are expected to be adjacent in the input.
//! The original reads are rebuilt from the primary and supplementary
//! alignments: each alignment contributes the bases between its hard clips,
//! so a read split into several hard clipped pieces is stitched back
//! together. Bases that no alignment covers are written as `N` with quality
//! `!`.
//!
//! The barcode of the first alignment is appended to the FASTQ header as
//! `BX:Z:<barcode>`.
//!
use std::fs::File;
use std::io::BufRead;
use std::io::BufWriter;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;

use flate2::Compression;
use flate2::write::GzEncoder;
use needletail::parser::LineEnding;
use needletail::parser::write_fastq;
use noodles_sam as sam;
use noodles_sam::alignment::RecordBuf;
use noodles_sam::alignment::record::data::field::Tag;

use crate::record;
use crate::stream::StreamOpenError;

type E = Box<dyn std::error::Error>;

const UNKNOWN_BASE: u8 = b'N';
const UNKNOWN_QUAL: u8 = b'!';

fn complement(
    base: u8,
) -> u8 {
    match base {
        b'A' => b'T',
        b'C' => b'G',
        b'G' => b'C',
        b'T' => b'A',
        b'a' => b't',
        b'c' => b'g',
        b'g' => b'c',
        b't' => b'a',
        b'n' => b'n',
        _ => b'N',
    }
}

pub fn reverse_complement(
    seq: &[u8],
) -> Vec<u8> {
    seq.iter().rev().map(|base| complement(*base)).collect()
}

/// One mate rebuilt from its alignments.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Mate {
    pub seq: Vec<u8>,
    pub qual: Vec<u8>,
}

impl Mate {
    /// Copies the aligned bases of `record` into their place in the read.
    fn place(
        &mut self,
        record: &RecordBuf,
    ) {
        let bases = record.sequence().as_ref();
        if bases.is_empty() {
            return
        }

        let reverse = record.flags().is_reverse_complemented();
        let (mut start, mut end) = record::clipped_offsets(record);
        if reverse {
            std::mem::swap(&mut start, &mut end);
        }
        let total = record::unclipped_query_len(record).max(start + bases.len() + end);

        if self.seq.len() < total {
            self.seq.resize(total, UNKNOWN_BASE);
            self.qual.resize(total, UNKNOWN_QUAL);
        }

        let scores = record.quality_scores().as_ref();
        let mut seq = bases.to_vec();
        let mut qual: Vec<u8> = if scores.len() == bases.len() {
            scores.iter().map(|q| q + 33).collect()
        } else {
            vec![UNKNOWN_QUAL; bases.len()]
        };
        if reverse {
            seq = reverse_complement(&seq);
            qual.reverse();
        }

        self.seq[start..(start + seq.len())].copy_from_slice(&seq);
        self.qual[start..(start + qual.len())].copy_from_slice(&qual);
    }
}

/// A read pair rebuilt from all alignments sharing one query name.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReadPair {
    pub name: String,
    pub barcode: Option<String>,
    pub first: Mate,
    pub second: Mate,
}

impl ReadPair {
    /// FASTQ header line contents (without the leading `@`).
    pub fn header_line(
        &self,
    ) -> String {
        match &self.barcode {
            Some(bx) => format!("{} BX:Z:{}", self.name, bx),
            None => self.name.clone(),
        }
    }
}

/// Rebuilds the pair from `records`, skipping secondary alignments.
///
/// Alignments flagged as the first segment go to [ReadPair::first], all
/// others to [ReadPair::second].
pub fn rebuild_pair(
    records: &[RecordBuf],
    tag: &Tag,
) -> Option<ReadPair> {
    let head = records.first()?;
    let mut pair = ReadPair {
        name: record::query_name(head),
        barcode: record::barcode(head, tag),
        ..Default::default()
    };
    records.iter().filter(|r| !r.flags().is_secondary()).for_each(|r| {
        if r.flags().is_first_segment() {
            pair.first.place(r);
        } else {
            pair.second.place(r);
        }
    });
    Some(pair)
}

/// Writes `pair` as one record to each of `first` and `second`.
pub fn write_pair<W1: Write, W2: Write>(
    pair: &ReadPair,
    first: &mut W1,
    second: &mut W2,
) -> Result<(), E> {
    let id = pair.header_line();
    write_fastq(id.as_bytes(), &pair.first.seq, Some(pair.first.qual.as_slice()), first, LineEnding::Unix)?;
    write_fastq(id.as_bytes(), &pair.second.seq, Some(pair.second.qual.as_slice()), second, LineEnding::Unix)?;
    Ok(())
}

/// Converts every query name group in `reader` to a FASTQ pair.
///
/// Returns the number of pairs written.
pub fn sam_to_fastq<R: BufRead, W1: Write, W2: Write>(
    reader: &mut sam::io::Reader<R>,
    header: &sam::Header,
    first: &mut W1,
    second: &mut W2,
    tag: &Tag,
) -> Result<usize, E> {
    let mut n_pairs = 0_usize;
    let mut group: Vec<RecordBuf> = Vec::new();
    let mut current_name = String::new();

    for result in reader.record_bufs(header) {
        let record = result?;
        let name = record::query_name(&record);
        if name != current_name && !group.is_empty() {
            if let Some(pair) = rebuild_pair(&group, tag) {
                write_pair(&pair, first, second)?;
                n_pairs += 1;
            }
            group.clear();
        }
        current_name = name;
        group.push(record);
    }
    if let Some(pair) = rebuild_pair(&group, tag) {
        write_pair(&pair, first, second)?;
        n_pairs += 1;
    }

    Ok(n_pairs)
}

/// FASTQ output file, optionally gzip compressed.
pub enum FastqWriter {
    Plain(BufWriter<File>),
    Gzip(GzEncoder<BufWriter<File>>),
}

impl Write for FastqWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match self {
            FastqWriter::Plain(w) => w.write(buf),
            FastqWriter::Gzip(w) => w.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match self {
            FastqWriter::Plain(w) => w.flush(),
            FastqWriter::Gzip(w) => w.flush(),
        }
    }
}

impl FastqWriter {
    pub fn create(
        path: &Path,
        gzip: bool,
    ) -> Result<Self, E> {
        let f = File::create(path).map_err(|source| StreamOpenError{ path: path.to_path_buf(), source })?;
        let conn = BufWriter::new(f);
        if gzip {
            Ok(FastqWriter::Gzip(GzEncoder::new(conn, Compression::default())))
        } else {
            Ok(FastqWriter::Plain(conn))
        }
    }

    /// Writes the gzip trailer if needed and flushes the file.
    pub fn finish(
        self,
    ) -> Result<(), E> {
        match self {
            FastqWriter::Plain(mut w) => w.flush()?,
            FastqWriter::Gzip(w) => w.finish()?.flush()?,
        }
        Ok(())
    }
}

/// Paths of the read 1 and read 2 files for `input` in `dir`.
///
/// `sample.sam` gives `sample_R1.fastq` and `sample_R2.fastq`.
pub fn output_paths(
    input: &Path,
    dir: &Path,
    gzip: bool,
) -> (PathBuf, PathBuf) {
    let stem = if input.to_str() == Some("-") {
        "stdin".to_string()
    } else {
        input.file_stem().map_or("reads".to_string(), |s| s.to_string_lossy().to_string())
    };
    let suffix = if gzip { ".fastq.gz" } else { ".fastq" };
    (dir.join(format!("{}_R1{}", stem, suffix)), dir.join(format!("{}_R2{}", stem, suffix)))
}

// Tests
#[cfg(test)]
mod tests {

    #[test]
    fn reverse_complement_bases() {
        use super::reverse_complement;

        assert_eq!(reverse_complement(b"AACGn"), b"nCGTT".to_vec());
    }

    #[test]
    fn rebuild_pair_with_reverse_mate() {
        use super::rebuild_pair;
        use crate::record::barcode_tag;

        let data: Vec<u8> = b"@SQ\tSN:chr1\tLN:1000000\n\
r1\t65\tchr1\t101\t60\t8M\t*\t0\t0\tAACCGGTT\tABCDEFGH\tBX:Z:AAAC-1\n\
r1\t321\tchr1\t901\t0\t8M\t*\t0\t0\tAACCGGTT\tABCDEFGH\tBX:Z:AAAC-1\n\
r1\t145\tchr1\t301\t60\t4M\t*\t0\t0\tAACG\tABCD\tBX:Z:AAAC-1\n".to_vec();
        let (_, records) = crate::tests::read_fixture(&data);

        let got = rebuild_pair(&records, &barcode_tag()).unwrap();

        assert_eq!(got.header_line(), "r1 BX:Z:AAAC-1");
        assert_eq!(got.first.seq, b"AACCGGTT".to_vec());
        assert_eq!(got.first.qual, b"ABCDEFGH".to_vec());
        assert_eq!(got.second.seq, b"CGTT".to_vec());
        assert_eq!(got.second.qual, b"DCBA".to_vec());
    }

    #[test]
    fn rebuild_hard_clipped_pieces() {
        use super::rebuild_pair;
        use crate::record::barcode_tag;

        let data: Vec<u8> = b"@SQ\tSN:chr1\tLN:1000000\n\
r2\t65\tchr1\t101\t60\t3H5M\t*\t0\t0\tACGTA\tIIIII\n\
r2\t2113\tchr1\t5001\t60\t3M5H\t*\t0\t0\tGGG\t###\n".to_vec();
        let (_, records) = crate::tests::read_fixture(&data);

        let got = rebuild_pair(&records, &barcode_tag()).unwrap();

        assert_eq!(got.header_line(), "r2");
        assert_eq!(got.first.seq, b"GGGACGTA".to_vec());
        assert_eq!(got.first.qual, b"###IIIII".to_vec());
        assert!(got.second.seq.is_empty());
    }

    #[test]
    fn uncovered_bases_are_unknown() {
        use super::rebuild_pair;
        use crate::record::barcode_tag;

        let data: Vec<u8> = b"@SQ\tSN:chr1\tLN:1000000\n\
r3\t65\tchr1\t101\t60\t2H4M\t*\t0\t0\tACGT\tIIII\n".to_vec();
        let (_, records) = crate::tests::read_fixture(&data);

        let got = rebuild_pair(&records, &barcode_tag()).unwrap();

        assert_eq!(got.first.seq, b"NNACGT".to_vec());
        assert_eq!(got.first.qual, b"!!IIII".to_vec());
    }

    #[test]
    fn convert_groups_to_fastq() {
        use super::sam_to_fastq;
        use crate::record::barcode_tag;

        let data: Vec<u8> = b"@SQ\tSN:chr1\tLN:1000000\n\
r1\t65\tchr1\t101\t60\t4M\t*\t0\t0\tACGT\tIIII\tBX:Z:A\n\
r1\t129\tchr1\t301\t60\t4M\t*\t0\t0\tGGGG\tIIII\tBX:Z:A\n\
r2\t65\tchr1\t101\t60\t4M\t*\t0\t0\tTTTT\tIIII\n\
r2\t129\tchr1\t301\t60\t4M\t*\t0\t0\tCCCC\tIIII\n".to_vec();
        let mut reader = noodles_sam::io::Reader::new(&data[..]);
        let header = reader.read_header().unwrap();
        let mut first: Vec<u8> = Vec::new();
        let mut second: Vec<u8> = Vec::new();

        let n = sam_to_fastq(&mut reader, &header, &mut first, &mut second, &barcode_tag()).unwrap();

        assert_eq!(n, 2);
        assert_eq!(first, b"@r1 BX:Z:A\nACGT\n+\nIIII\n@r2\nTTTT\n+\nIIII\n".to_vec());
        assert_eq!(second, b"@r1 BX:Z:A\nGGGG\n+\nIIII\n@r2\nCCCC\n+\nIIII\n".to_vec());
    }

    #[test]
    fn output_file_names() {
        use super::output_paths;
        use std::path::{Path, PathBuf};

        let (r1, r2) = output_paths(Path::new("/data/sample.sam"), Path::new("out"), false);
        assert_eq!(r1, PathBuf::from("out/sample_R1.fastq"));
        assert_eq!(r2, PathBuf::from("out/sample_R2.fastq"));

        let (r1, _) = output_paths(Path::new("-"), Path::new("out"), true);
        assert_eq!(r1, PathBuf::from("out/stdin_R1.fastq.gz"));
    }
}
