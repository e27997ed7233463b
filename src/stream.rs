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

//! Opening SAM streams for reading, truncating writes, and appending writes.
//!
//! A path of `-` refers to stdin or stdout. Every failure to open a stream is
//! reported as a [StreamOpenError] naming the offending path.
//!
use std::fs::File;
use std::fs::OpenOptions;
use std::io::BufRead;
use std::io::BufReader;
use std::io::BufWriter;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;

use noodles_sam as sam;

type E = Box<dyn std::error::Error>;

pub type SamReader = sam::io::Reader<Box<dyn BufRead>>;
pub type SamWriter = sam::io::Writer<Box<dyn Write>>;

#[derive(Debug)]
pub struct StreamOpenError {
    pub path: PathBuf,
    pub source: std::io::Error,
}

impl std::fmt::Display for StreamOpenError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "failed to open {}: {}", self.path.display(), self.source)
    }
}

impl std::error::Error for StreamOpenError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

fn is_std_stream(
    path: &Path,
) -> bool {
    path.to_str() == Some("-")
}

fn open_error(
    path: &Path,
    source: std::io::Error,
) -> E {
    Box::new(StreamOpenError{ path: path.to_path_buf(), source })
}

/// Opens a SAM file (or stdin for `-`) and consumes its header.
pub fn open_reader(
    path: &Path,
) -> Result<(SamReader, sam::Header), E> {
    let inner: Box<dyn BufRead> = if is_std_stream(path) {
        Box::new(BufReader::new(std::io::stdin()))
    } else {
        let f = File::open(path).map_err(|e| open_error(path, e))?;
        Box::new(BufReader::new(f))
    };
    let mut reader = sam::io::Reader::new(inner);
    let header = reader.read_header().map_err(|e| open_error(path, e))?;
    Ok((reader, header))
}

/// Creates (truncating) a SAM file, or stdout for `-`, and writes `header`.
pub fn create_writer(
    path: &Path,
    header: &sam::Header,
) -> Result<SamWriter, E> {
    let inner: Box<dyn Write> = if is_std_stream(path) {
        Box::new(BufWriter::new(std::io::stdout()))
    } else {
        let f = File::create(path).map_err(|e| open_error(path, e))?;
        Box::new(BufWriter::new(f))
    };
    let mut writer = sam::io::Writer::new(inner);
    writer.write_header(header)?;
    Ok(writer)
}

/// Opens an existing SAM file for appending records.
///
/// No header is written; the file is expected to have been set up with
/// [create_writer] beforehand.
pub fn append_writer(
    path: &Path,
) -> Result<SamWriter, E> {
    let f = OpenOptions::new().append(true).open(path).map_err(|e| open_error(path, e))?;
    let inner: Box<dyn Write> = Box::new(BufWriter::new(f));
    Ok(sam::io::Writer::new(inner))
}

/// Flushes and drops a writer, surfacing errors that `Drop` would swallow.
pub fn close_writer(
    mut writer: SamWriter,
) -> Result<(), E> {
    writer.get_mut().flush()?;
    Ok(())
}

// Tests
#[cfg(test)]
mod tests {

    #[test]
    fn open_missing_file_names_path() {
        use super::open_reader;
        use std::path::PathBuf;

        let path = PathBuf::from("/nonexistent/dir/in.sam");
        let err = open_reader(&path).err().unwrap();

        assert!(err.to_string().contains("/nonexistent/dir/in.sam"));
    }

    #[test]
    fn create_then_append() {
        use super::{append_writer, close_writer, create_writer, open_reader};
        use noodles_sam::alignment::io::Write as AlignmentWrite;

        let data: Vec<u8> = b"@SQ\tSN:chr1\tLN:100000\n\
r1\t0\tchr1\t101\t60\t4M\t*\t0\t0\tACGT\tIIII\tBX:Z:A\n".to_vec();
        let (header, records) = crate::tests::read_fixture(&data);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.sam");

        let writer = create_writer(&path, &header).unwrap();
        close_writer(writer).unwrap();
        for _ in 0..2 {
            let mut writer = append_writer(&path).unwrap();
            writer.write_alignment_record(&header, &records[0]).unwrap();
            close_writer(writer).unwrap();
        }

        let (mut reader, got_header) = open_reader(&path).unwrap();
        let got: Vec<_> = reader.record_bufs(&got_header).map(|r| r.unwrap()).collect();

        assert_eq!(got_header.reference_sequences().len(), 1);
        assert_eq!(got, vec![records[0].clone(), records[0].clone()]);
    }

    #[test]
    fn append_requires_existing_file() {
        use super::append_writer;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.sam");

        assert!(append_writer(&path).is_err());
    }
}
