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
use std::path::Path;
use std::path::PathBuf;

use indexmap::map::IndexMap;
use indexmap::set::IndexSet;

use crate::barcodes::read_barcode_file;
use crate::stream::StreamOpenError;

type E = Box<dyn std::error::Error>;

/// Barcodes read from each list file.
pub const DEFAULT_MAX_BARCODES: usize = 100;

/// A list must hold more barcodes than this to become a target.
pub const DEFAULT_MIN_BARCODES: usize = 5;

/// Mapping from barcode to the targets whose lists contain it.
///
/// Targets are identified by their index in [targets](MembershipTable::targets),
/// which is also the order they were registered in.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MembershipTable {
    targets: Vec<String>,
    by_barcode: IndexMap<String, Vec<usize>>,
}

/// Derives the target name from a list file name.
///
/// `chr1.txt` and `chr1.txt.gz` both become `chr1`.
pub fn target_name(
    path: &Path,
) -> Option<String> {
    let file_name = path.file_name()?.to_str()?;
    let file_name = file_name.strip_suffix(".gz").unwrap_or(file_name);
    let stem = Path::new(file_name).file_stem()?.to_str()?;
    Some(stem.to_string())
}

impl MembershipTable {
    pub fn new() -> Self {
        MembershipTable::default()
    }

    /// Registers `name` with `barcodes` if there are more than `min_barcodes` of them.
    ///
    /// Repeated barcodes are only counted and bound once. Returns whether the
    /// target was registered.
    ///
    /// ## Usage
    ///
    /// ```rust
    /// use bxtools::demux::MembershipTable;
    ///
    /// let shared: Vec<String> = ["a", "b", "c", "d", "e", "s"].iter().map(|x| x.to_string()).collect();
    /// let few: Vec<String> = ["f", "g", "s"].iter().map(|x| x.to_string()).collect();
    ///
    /// let mut table = MembershipTable::new();
    /// assert!(table.add_target("chr1", &shared, 5));
    /// assert!(!table.add_target("chr2", &few, 5));
    ///
    /// assert_eq!(table.lookup("s"), &[0]);
    /// assert!(table.lookup("f").is_empty());
    /// ```
    pub fn add_target(
        &mut self,
        name: &str,
        barcodes: &[String],
        min_barcodes: usize,
    ) -> bool {
        let distinct: IndexSet<&String> = barcodes.iter().collect();

        if distinct.len() <= min_barcodes {
            return false
        }

        let idx = self.targets.len();
        self.targets.push(name.to_string());
        distinct.into_iter().for_each(|barcode| {
            self.by_barcode.entry(barcode.clone()).or_default().push(idx);
        });
        true
    }

    /// Builds the table from every barcode list in `dir`.
    ///
    /// Files are visited in file name order. At most `max_barcodes` tokens
    /// are read from each list.
    pub fn from_dir(
        dir: &Path,
        max_barcodes: usize,
        min_barcodes: usize,
    ) -> Result<Self, E> {
        let entries = std::fs::read_dir(dir).map_err(|source| StreamOpenError{ path: dir.to_path_buf(), source })?;
        let mut paths: Vec<PathBuf> = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.is_file() {
                paths.push(path);
            }
        }
        paths.sort();

        let mut table = MembershipTable::new();
        for path in paths {
            let Some(name) = target_name(&path) else {
                log::warn!("Skipping {}, cannot derive a target name", path.display());
                continue
            };
            let barcodes = read_barcode_file(&path, Some(max_barcodes))?;
            if table.add_target(&name, &barcodes, min_barcodes) {
                log::debug!("Registered target {} with {} barcodes", name, barcodes.len());
            } else {
                log::info!("Skipping target {}, only {} barcodes", name, barcodes.len());
            }
        }
        Ok(table)
    }

    /// Registered target names.
    pub fn targets(
        &self,
    ) -> &[String] {
        &self.targets
    }

    /// Indexes of the targets bound to `barcode`.
    pub fn lookup(
        &self,
        barcode: &str,
    ) -> &[usize] {
        self.by_barcode.get(barcode).map(|targets| targets.as_slice()).unwrap_or(&[])
    }

    /// Names of the targets bound to `barcode`.
    pub fn target_names(
        &self,
        barcode: &str,
    ) -> Vec<&str> {
        self.lookup(barcode).iter().map(|idx| self.targets[*idx].as_str()).collect()
    }

    pub fn n_barcodes(
        &self,
    ) -> usize {
        self.by_barcode.len()
    }

    pub fn is_empty(
        &self,
    ) -> bool {
        self.targets.is_empty()
    }
}
