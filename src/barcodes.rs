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

//! Reading plain text barcode lists.
//!
//! A list holds whitespace separated barcode tokens, conventionally one per
//! line. Tokens are taken verbatim, there is no validation of the barcode
//! format. Lists ending in `.gz` are decompressed on the fly.
//!
use std::fs::File;
use std::io::BufRead;
use std::io::BufReader;
use std::path::Path;

use bstr::ByteSlice;
use flate2::read::MultiGzDecoder;

use crate::stream::StreamOpenError;

type E = Box<dyn std::error::Error>;

/// Opens a barcode list, transparently decompressing `.gz` files.
pub fn open_list(
    path: &Path,
) -> Result<Box<dyn BufRead>, E> {
    let f = File::open(path).map_err(|source| StreamOpenError{ path: path.to_path_buf(), source })?;
    if path.extension().is_some_and(|ext| ext == "gz") {
        Ok(Box::new(BufReader::new(MultiGzDecoder::new(f))))
    } else {
        Ok(Box::new(BufReader::new(f)))
    }
}

/// Reads at most `limit` barcode tokens from `conn`.
///
/// Reading stops as soon as `limit` tokens have been collected, the rest of
/// the input is left unread. Tokens that are not valid UTF-8 are skipped and
/// do not count towards `limit`.
pub fn read_barcodes<R: BufRead>(
    conn: &mut R,
    limit: Option<usize>,
) -> Result<Vec<String>, E> {
    let limit = limit.unwrap_or(usize::MAX);
    let mut barcodes: Vec<String> = Vec::new();
    let mut line: Vec<u8> = Vec::new();
    while barcodes.len() < limit {
        line.clear();
        if conn.read_until(b'\n', &mut line)? == 0 {
            break;
        }
        for token in line.fields() {
            if barcodes.len() == limit {
                break;
            }
            match token.to_str() {
                Ok(barcode) => barcodes.push(barcode.to_string()),
                Err(_) => log::debug!("Skipping malformed barcode {:?}", token.as_bstr()),
            }
        }
    }
    Ok(barcodes)
}

/// Reads at most `limit` barcode tokens from the list at `path`.
pub fn read_barcode_file(
    path: &Path,
    limit: Option<usize>,
) -> Result<Vec<String>, E> {
    let mut conn = open_list(path)?;
    read_barcodes(&mut conn, limit)
}
