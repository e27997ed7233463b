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

//! Barcode lists per reference sequence.
//!
//! The lists written by [write_reference_lists] can be used directly as
//! membership lists for [demux](crate::demux).
//!
use std::collections::BTreeSet;
use std::fs::File;
use std::io::BufRead;
use std::io::BufWriter;
use std::io::Write;
use std::path::Path;

use indexmap::map::IndexMap;
use noodles_sam as sam;
use noodles_sam::alignment::record::data::field::Tag;

use crate::record;
use crate::stream::StreamOpenError;

type E = Box<dyn std::error::Error>;

/// Sorted barcodes seen on each reference sequence.
///
/// References are listed in the order they first appear in the stream.
/// Unplaced and untagged records are skipped.
pub fn barcodes_by_reference<R: BufRead>(
    reader: &mut sam::io::Reader<R>,
    header: &sam::Header,
    tag: &Tag,
) -> Result<IndexMap<String, BTreeSet<String>>, E> {
    let mut lists: IndexMap<String, BTreeSet<String>> = IndexMap::new();
    for result in reader.record_bufs(header) {
        let record = result?;
        let Some(bx) = record::barcode(&record, tag) else {
            continue
        };
        if let Some(reference) = record::reference_name(&record, header) {
            lists.entry(reference).or_default().insert(bx);
        }
    }
    Ok(lists)
}

/// Writes `<dir>/<reference>.txt` with one barcode per line for each list.
///
/// Returns the number of files written.
pub fn write_reference_lists(
    lists: &IndexMap<String, BTreeSet<String>>,
    dir: &Path,
) -> Result<usize, E> {
    std::fs::create_dir_all(dir).map_err(|source| StreamOpenError{ path: dir.to_path_buf(), source })?;
    for (reference, barcodes) in lists {
        let path = dir.join(format!("{}.txt", reference));
        let f = File::create(&path).map_err(|source| StreamOpenError{ path: path.clone(), source })?;
        let mut conn = BufWriter::new(f);
        for bx in barcodes {
            writeln!(conn, "{}", bx)?;
        }
        conn.flush()?;
    }
    Ok(lists.len())
}
