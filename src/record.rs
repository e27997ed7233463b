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

//! Field accessors for [RecordBuf] alignment records.
//!
//! The filtering and demultiplexing code only ever looks at a record through
//! these functions, so the tag conventions (which tag holds the barcode,
//! what counts as an invalid alignment) live in one place.
//!
use bstr::ByteSlice;
use noodles_sam as sam;
use noodles_sam::alignment::RecordBuf;
use noodles_sam::alignment::record::cigar::op::Kind;
use noodles_sam::alignment::record::data::field::Tag;
use noodles_sam::alignment::record_buf::data::field::Value;

/// Linked-read barcode tag, `BX`.
pub fn barcode_tag() -> Tag {
    Tag::from([b'B', b'X'])
}

/// Alignment validity tag, `AM`.
pub fn validity_tag() -> Tag {
    Tag::from([b'A', b'M'])
}

/// Parses a two character tag name such as `BX`.
pub fn parse_tag(
    name: &str,
) -> Result<Tag, String> {
    let bytes = name.as_bytes();
    if bytes.len() != 2 || !bytes[0].is_ascii_alphabetic() || !bytes[1].is_ascii_alphanumeric() {
        return Err(format!("'{}' is not a valid SAM tag", name))
    }
    Ok(Tag::from([bytes[0], bytes[1]]))
}

fn value_to_string(
    value: &Value,
) -> Option<String> {
    match value {
        Value::String(s) => Some(s.to_str_lossy().into_owned()),
        Value::Hex(s) => Some(s.to_string()),
        Value::Character(c) => Some((*c as char).to_string()),
        Value::Int8(x) => Some(x.to_string()),
        Value::UInt8(x) => Some(x.to_string()),
        Value::Int16(x) => Some(x.to_string()),
        Value::UInt16(x) => Some(x.to_string()),
        Value::Int32(x) => Some(x.to_string()),
        Value::UInt32(x) => Some(x.to_string()),
        _ => None,
    }
}

/// Returns the value of a string-like tag.
///
/// Absent tags, empty values, and values that have no text form (floats,
/// arrays) are all reported as `None`.
pub fn tag_string(
    record: &RecordBuf,
    tag: &Tag,
) -> Option<String> {
    record.data().get(tag).and_then(value_to_string).filter(|s| !s.is_empty())
}

/// Barcode of `record` stored in `tag`, if any.
pub fn barcode(
    record: &RecordBuf,
    tag: &Tag,
) -> Option<String> {
    match record.data().get(tag)? {
        Value::String(s) if !s.is_empty() => Some(s.to_string()),
        Value::Character(c) => Some((*c as char).to_string()),
        _ => None,
    }
}

/// True if `tag` explicitly marks the alignment as invalid (value `0`).
///
/// A missing tag is not a mark of invalidity.
pub fn is_invalid(
    record: &RecordBuf,
    tag: &Tag,
) -> bool {
    tag_string(record, tag).is_some_and(|value| value == "0")
}

/// Query name, or an empty string for records without one.
pub fn query_name(
    record: &RecordBuf,
) -> String {
    record.name().map(|name| name.to_str_lossy().into_owned()).unwrap_or_default()
}

/// 0-based leftmost alignment position, `-1` for unplaced records.
pub fn position(
    record: &RecordBuf,
) -> i64 {
    record.alignment_start().map_or(-1, |pos| usize::from(pos) as i64 - 1)
}

/// Name of the reference sequence the record is placed on.
pub fn reference_name(
    record: &RecordBuf,
    header: &sam::Header,
) -> Option<String> {
    record.reference_sequence_id()
          .and_then(|id| header.reference_sequences().get_index(id))
          .map(|(name, _)| name.to_str_lossy().into_owned())
}

/// Lengths of the leading and trailing hard clips.
pub fn clipped_offsets(
    record: &RecordBuf,
) -> (usize, usize) {
    let ops = record.cigar().as_ref();
    let leading = ops.first().filter(|op| op.kind() == Kind::HardClip).map_or(0, |op| op.len());
    let trailing = if ops.len() > 1 {
        ops.last().filter(|op| op.kind() == Kind::HardClip).map_or(0, |op| op.len())
    } else {
        0
    };
    (leading, trailing)
}

/// Length of the original read, counting bases removed by hard clipping.
///
/// Records without a cigar report the length of their stored sequence.
pub fn unclipped_query_len(
    record: &RecordBuf,
) -> usize {
    let ops = record.cigar().as_ref();
    if ops.is_empty() {
        return record.sequence().as_ref().len()
    }
    ops.iter().filter(|op| {
        matches!(op.kind(),
                 Kind::Match | Kind::Insertion | Kind::SoftClip | Kind::HardClip
                 | Kind::SequenceMatch | Kind::SequenceMismatch)
    }).map(|op| op.len()).sum()
}

/// Mapping quality, `255` when unavailable.
pub fn mapping_quality(
    record: &RecordBuf,
) -> u8 {
    record.mapping_quality().map_or(255, |mq| mq.get())
}

/// Total length of the cigar operations of `kind`.
pub fn cigar_total(
    record: &RecordBuf,
    kind: Kind,
) -> usize {
    record.cigar().as_ref().iter().filter(|op| op.kind() == kind).map(|op| op.len()).sum()
}

/// Length of the longest cigar operation of `kind`, 0 if there is none.
pub fn cigar_longest(
    record: &RecordBuf,
    kind: Kind,
) -> usize {
    record.cigar().as_ref().iter().filter(|op| op.kind() == kind).map(|op| op.len()).max().unwrap_or(0)
}

/// Lengths of the leading and trailing soft clips.
///
/// Hard clips outside the soft clips are skipped, they are not part of the
/// stored sequence.
pub fn soft_clipped_offsets(
    record: &RecordBuf,
) -> (usize, usize) {
    let ops: Vec<_> = record.cigar().as_ref().iter().filter(|op| op.kind() != Kind::HardClip).collect();
    let leading = ops.first().filter(|op| op.kind() == Kind::SoftClip).map_or(0, |op| op.len());
    let trailing = if ops.len() > 1 {
        ops.last().filter(|op| op.kind() == Kind::SoftClip).map_or(0, |op| op.len())
    } else {
        0
    };
    (leading, trailing)
}

/// Mean phred score over the stored qualities, 0 if there are none.
pub fn mean_phred(
    record: &RecordBuf,
) -> f64 {
    let scores = record.quality_scores().as_ref();
    if scores.is_empty() {
        return 0.0
    }
    scores.iter().map(|q| *q as f64).sum::<f64>() / scores.len() as f64
}
