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

//! Splitting one alignment stream into many by barcode membership.
//!
//! A [MembershipTable] binds each barcode to the targets whose barcode lists
//! contain it. [Demultiplexer] buffers every incoming record for each of its
//! targets and periodically appends the buffers to the [Destinations], so
//! memory use is bounded by the flush interval and not by the input size.
//!
//! A record bound to several targets is stored once and shared by all the
//! buffers that hold it.
//!
pub mod membership;

pub use membership::MembershipTable;

use std::path::Path;
use std::path::PathBuf;
use std::rc::Rc;

use noodles_sam as sam;
use noodles_sam::alignment::RecordBuf;
use noodles_sam::alignment::io::Write as AlignmentWrite;
use noodles_sam::alignment::record::data::field::Tag;

use crate::record;
use crate::stream;

type E = Box<dyn std::error::Error>;

/// Records processed between flushes.
pub const DEFAULT_FLUSH_EVERY: usize = 100_000;

/// Settings for [Demultiplexer] and [MembershipTable::from_dir].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DemuxOptions {
    /// Tag holding the barcode.
    pub barcode_tag: Tag,
    /// Number of barcoded records between flushes.
    pub flush_every: usize,
    /// Barcodes read from each list.
    pub max_barcodes: usize,
    /// Lists with this many barcodes or fewer are ignored.
    pub min_barcodes: usize,
}

impl Default for DemuxOptions {
    fn default() -> Self {
        DemuxOptions {
            barcode_tag: record::barcode_tag(),
            flush_every: DEFAULT_FLUSH_EVERY,
            max_barcodes: membership::DEFAULT_MAX_BARCODES,
            min_barcodes: membership::DEFAULT_MIN_BARCODES,
        }
    }
}

/// Where the records of each target end up.
pub trait Destinations {
    /// Sets up an empty destination for `target`, discarding earlier contents.
    fn create(
        &mut self,
        target: &str,
        header: &sam::Header,
    ) -> Result<(), E>;

    /// Appends `records` to the destination of `target` in the given order.
    fn append(
        &mut self,
        target: &str,
        header: &sam::Header,
        records: &[Rc<RecordBuf>],
    ) -> Result<(), E>;
}

/// One SAM file per target in a directory.
#[derive(Clone, Debug)]
pub struct OutputDir {
    dir: PathBuf,
}

impl OutputDir {
    /// Creates `dir` if it does not exist yet.
    pub fn new(
        dir: &Path,
    ) -> Result<Self, E> {
        std::fs::create_dir_all(dir).map_err(|source| stream::StreamOpenError{ path: dir.to_path_buf(), source })?;
        Ok(OutputDir { dir: dir.to_path_buf() })
    }

    pub fn path_for(
        &self,
        target: &str,
    ) -> PathBuf {
        self.dir.join(format!("{}.sam", target))
    }
}

impl Destinations for OutputDir {
    fn create(
        &mut self,
        target: &str,
        header: &sam::Header,
    ) -> Result<(), E> {
        let writer = stream::create_writer(&self.path_for(target), header)?;
        stream::close_writer(writer)
    }

    fn append(
        &mut self,
        target: &str,
        header: &sam::Header,
        records: &[Rc<RecordBuf>],
    ) -> Result<(), E> {
        let mut writer = stream::append_writer(&self.path_for(target))?;
        for record in records {
            writer.write_alignment_record(header, &**record)?;
        }
        stream::close_writer(writer)
    }
}

/// Buffered fan-out of records to the targets of a [MembershipTable].
///
/// Every registered target gets its destination created when the
/// demultiplexer is constructed, even if no record ever matches it.
pub struct Demultiplexer<D: Destinations> {
    table: MembershipTable,
    destinations: D,
    header: sam::Header,
    barcode_tag: Tag,
    flush_every: usize,

    // One buffer per target, indexed like `table.targets()`.
    buffers: Vec<Vec<Rc<RecordBuf>>>,
    n_records: usize,
    n_flushes: usize,
}

impl<D: Destinations> Demultiplexer<D> {
    pub fn new(
        table: MembershipTable,
        mut destinations: D,
        header: sam::Header,
        options: &DemuxOptions,
    ) -> Result<Self, E> {
        if options.flush_every == 0 {
            return Err("flush interval must be at least 1 record".into())
        }
        for target in table.targets() {
            destinations.create(target, &header)?;
        }
        let buffers = vec![Vec::new(); table.targets().len()];
        Ok(Demultiplexer {
            table, destinations, header,
            barcode_tag: options.barcode_tag,
            flush_every: options.flush_every,
            buffers,
            n_records: 0,
            n_flushes: 0,
        })
    }

    /// Routes `record` to the buffers of its targets.
    ///
    /// Records without a barcode are dropped and do not count towards the
    /// flush interval.
    pub fn push(
        &mut self,
        record: RecordBuf,
    ) -> Result<(), E> {
        let Some(barcode) = record::barcode(&record, &self.barcode_tag) else {
            return Ok(())
        };

        let targets = self.table.lookup(&barcode);
        if !targets.is_empty() {
            let shared = Rc::new(record);
            targets.iter().for_each(|idx| self.buffers[*idx].push(Rc::clone(&shared)));
        }

        self.n_records += 1;
        if self.n_records % self.flush_every == 0 {
            self.flush()?;
        }
        if self.n_records % crate::PROGRESS_INTERVAL == 0 {
            log::info!("{} barcoded records processed", self.n_records);
        }
        Ok(())
    }

    /// Appends every buffer to its destination and empties it.
    pub fn flush(
        &mut self,
    ) -> Result<(), E> {
        let n_buffered: usize = self.buffers.iter().map(|buffer| buffer.len()).sum();
        log::debug!("Flushing {} buffered records to {} targets", n_buffered, self.buffers.len());
        for (target, buffer) in self.table.targets().iter().zip(self.buffers.iter_mut()) {
            self.destinations.append(target, &self.header, buffer.as_slice())?;
            buffer.clear();
        }
        self.n_flushes += 1;
        Ok(())
    }

    /// Barcoded records seen so far.
    pub fn n_records(
        &self,
    ) -> usize {
        self.n_records
    }

    /// Flushes performed so far.
    pub fn n_flushes(
        &self,
    ) -> usize {
        self.n_flushes
    }

    /// Performs the final flush and hands back the destinations.
    pub fn finish(
        mut self,
    ) -> Result<D, E> {
        self.flush()?;
        Ok(self.destinations)
    }
}
