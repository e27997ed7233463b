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

//! Alignment quality filtering of read groups.
//!
//! Records sharing a query name (a read pair with its supplementary and
//! secondary alignments) must be adjacent in the input. Each group is kept
//! or dropped as a whole.
//!
//! In the default mode a group is kept when every alignment in it passes all
//! of these checks:
//!   - mapping quality of at least `min_mapping_quality`.
//!   - soft clipped fraction of the stored sequence at most `max_soft_clipping`.
//!   - hard clipped fraction at most `max_hard_clipping`.
//!   - no insertion or deletion longer than [MAX_INDEL_LEN] bases.
//!   - all alignments on the same reference sequence.
//!
//! With `filter_bad` set the selection is inverted towards suspicious
//! groups: high quality reads that are unmapped or placed on decoy
//! sequences, and heavily soft clipped reads whose clipped ends are
//! themselves of high quality.
//!
use std::io::BufRead;
use std::io::Write;

use noodles_sam as sam;
use noodles_sam::alignment::RecordBuf;
use noodles_sam::alignment::io::Write as AlignmentWrite;
use noodles_sam::alignment::record::cigar::op::Kind;

use crate::record;

type E = Box<dyn std::error::Error>;

/// Longest insertion or deletion allowed in the default mode.
pub const MAX_INDEL_LEN: usize = 3;

/// Phred score a read, or the clipped part of one, needs to count as high quality.
pub const GOOD_PHRED: f64 = 31.0;

/// Aligned bases a clipped read needs in `filter_bad` mode.
pub const MIN_MATCH_BASES: usize = 50;

/// A clipped read may have more than this many clipped bases on one end only.
pub const MAX_TWO_SIDED_CLIP: usize = 25;

/// Settings for [keep_group].
#[derive(Clone, Debug, PartialEq)]
pub struct PairFilterOptions {
    pub min_mapping_quality: u8,
    pub max_soft_clipping: f64,
    pub max_hard_clipping: f64,
    pub filter_bad: bool,
}

impl Default for PairFilterOptions {
    fn default() -> Self {
        PairFilterOptions {
            min_mapping_quality: 0,
            max_soft_clipping: 1.0,
            max_hard_clipping: 1.0,
            filter_bad: false,
        }
    }
}

/// Clipped bases of `kind` over the stored sequence length exceed `max`.
///
/// A record without a stored sequence only exceeds when it has clipped bases.
fn clipped_over(
    record: &RecordBuf,
    kind: Kind,
    max: f64,
) -> bool {
    let clipped = record::cigar_total(record, kind);
    let len = record.sequence().as_ref().len();
    if len == 0 {
        return clipped > 0
    }
    clipped as f64 / len as f64 > max
}

fn same_reference(
    records: &[RecordBuf],
) -> bool {
    let first = records.first().and_then(|r| r.reference_sequence_id());
    records.iter().all(|r| r.reference_sequence_id() == first)
}

fn is_decoy_or_unplaced(
    name: &str,
) -> bool {
    name.starts_with("hs") || name.contains("Un")
}

/// Integer mean of the phred scores in `range` reaches [GOOD_PHRED].
fn clipped_end_is_good(
    scores: &[u8],
    range: std::ops::Range<usize>,
) -> bool {
    if range.is_empty() {
        return true
    }
    let Some(window) = scores.get(range) else {
        return false
    };
    let sum: usize = window.iter().map(|q| *q as usize).sum();
    (sum / window.len()) as f64 >= GOOD_PHRED
}

/// Checks a soft clipped alignment for an aligned core and high quality clips.
fn is_confident_clip(
    record: &RecordBuf,
) -> bool {
    if record::cigar_total(record, Kind::Match) < MIN_MATCH_BASES {
        return false
    }
    let len = record.sequence().as_ref().len();
    let (leading, trailing) = record::soft_clipped_offsets(record);
    if leading > MAX_TWO_SIDED_CLIP && trailing > MAX_TWO_SIDED_CLIP {
        return false
    }
    let scores = record.quality_scores().as_ref();
    clipped_end_is_good(scores, 0..leading)
        && clipped_end_is_good(scores, len.saturating_sub(trailing)..len)
}

/// Default mode: every alignment in `records` is well placed.
pub fn passes_checks(
    records: &[RecordBuf],
    options: &PairFilterOptions,
) -> bool {
    records.iter().all(|r| record::mapping_quality(r) >= options.min_mapping_quality)
        && records.iter().all(|r| !clipped_over(r, Kind::SoftClip, options.max_soft_clipping))
        && records.iter().all(|r| !clipped_over(r, Kind::HardClip, options.max_hard_clipping))
        && records.iter().all(|r| {
            record::cigar_longest(r, Kind::Insertion) <= MAX_INDEL_LEN
                && record::cigar_longest(r, Kind::Deletion) <= MAX_INDEL_LEN
        })
        && same_reference(records)
}

/// `filter_bad` mode: the group looks like an artefact worth inspecting.
pub fn is_suspicious(
    records: &[RecordBuf],
    header: &sam::Header,
    options: &PairFilterOptions,
) -> bool {
    if records.iter().all(|r| record::mean_phred(r) >= GOOD_PHRED) {
        let misplaced = records.iter().any(|r| {
            r.flags().is_unmapped()
                || record::reference_name(r, header).is_some_and(|name| is_decoy_or_unplaced(&name))
        });
        if misplaced {
            log::debug!("Keeping {}: high quality but unmapped or on a decoy", record::query_name(&records[0]));
            return true
        }
    }

    if records.iter().any(|r| clipped_over(r, Kind::SoftClip, options.max_soft_clipping)) {
        let keep = same_reference(records) && records.iter().all(is_confident_clip);
        if keep {
            log::debug!("Keeping {}: soft clipped", record::query_name(&records[0]));
        }
        return keep
    }
    false
}

/// Decides whether a query name group is written.
pub fn keep_group(
    records: &[RecordBuf],
    header: &sam::Header,
    options: &PairFilterOptions,
) -> bool {
    if records.is_empty() {
        return false
    }
    if options.filter_bad {
        is_suspicious(records, header, options)
    } else {
        passes_checks(records, options)
    }
}

/// Writes every query name group of `reader` accepted by [keep_group].
///
/// Returns the number of records written.
pub fn filter_groups<R: BufRead, W: Write>(
    reader: &mut sam::io::Reader<R>,
    header: &sam::Header,
    writer: &mut sam::io::Writer<W>,
    options: &PairFilterOptions,
) -> Result<usize, E> {
    let mut n_written = 0_usize;
    let mut n_read = 0_usize;
    let mut group: Vec<RecordBuf> = Vec::new();
    let mut current_name = String::new();

    let mut emit = |group: &[RecordBuf], writer: &mut sam::io::Writer<W>| -> Result<(), E> {
        if keep_group(group, header, options) {
            for record in group {
                writer.write_alignment_record(header, record)?;
            }
            n_written += group.len();
        }
        Ok(())
    };

    for result in reader.record_bufs(header) {
        let record = result?;
        let name = record::query_name(&record);
        if name != current_name && !group.is_empty() {
            emit(&group, writer)?;
            group.clear();
        }
        current_name = name;
        group.push(record);

        n_read += 1;
        if n_read % crate::PROGRESS_INTERVAL == 0 {
            log::info!("{} records processed", n_read);
        }
    }
    emit(&group, writer)?;

    log::info!("Kept {} out of {} records", n_written, n_read);
    Ok(n_written)
}
