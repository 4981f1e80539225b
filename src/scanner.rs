//! Record store scanning: find per-unit record files and keep the newest
//! revision of each unit.
//!
//! A record file is any `*.json` file whose name contains
//! `V<6 digits>_<YYYYMMDD>_<HHMMSS>`. Other files are ignored.

use crate::debug::{DebugLogger, Field};
use crate::error::ProtocolError;
use crate::unit::{UNIT_DIGITS, UNIT_PREFIX, UnitIdentity};
use chrono::NaiveDateTime;
use rayon::prelude::*;
use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

pub const RECORD_EXTENSION: &str = "json";
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

const DATE_DIGITS: usize = 8;
const TIME_DIGITS: usize = 6;
const TOKEN_LEN: usize = 1 + UNIT_DIGITS + 1 + DATE_DIGITS + 1 + TIME_DIGITS;

/// One candidate record file for a unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordRevision {
    pub unit: UnitIdentity,
    pub timestamp: NaiveDateTime,
    pub path: PathBuf,
}

impl RecordRevision {
    /// Newer timestamp wins; on equal timestamps the lexicographically smaller
    /// path wins, so the choice never depends on traversal order.
    fn supersedes(&self, other: &RecordRevision) -> bool {
        match self.timestamp.cmp(&other.timestamp) {
            std::cmp::Ordering::Greater => true,
            std::cmp::Ordering::Less => false,
            std::cmp::Ordering::Equal => self.path < other.path,
        }
    }
}

#[derive(Debug)]
enum Candidate {
    Valid(RecordRevision),
    BadTimestamp {
        unit: UnitIdentity,
        path: PathBuf,
        token: String,
    },
}

/// Splits a record file name into its unit identity and raw timestamp token.
/// Returns `None` for names that do not carry the identity/timestamp pattern.
pub fn parse_record_file_name(file_name: &str) -> Option<(UnitIdentity, &str)> {
    let bytes = file_name.as_bytes();
    if bytes.len() < TOKEN_LEN {
        return None;
    }
    for start in 0..=bytes.len() - TOKEN_LEN {
        if bytes[start] != UNIT_PREFIX as u8 {
            continue;
        }
        let window = &bytes[start..start + TOKEN_LEN];
        let shape_ok = window.iter().enumerate().skip(1).all(|(idx, b)| {
            if idx == 1 + UNIT_DIGITS || idx == 2 + UNIT_DIGITS + DATE_DIGITS {
                *b == b'_'
            } else {
                b.is_ascii_digit()
            }
        });
        if !shape_ok {
            continue;
        }
        // The window is pure ASCII, so these slices sit on char boundaries.
        let unit = UnitIdentity::parse_token(&file_name[start..start + 1 + UNIT_DIGITS])?;
        let ts = &file_name[start + 2 + UNIT_DIGITS..start + TOKEN_LEN];
        return Some((unit, ts));
    }
    None
}

fn candidate_for(path: &Path) -> Option<Candidate> {
    if path.extension().and_then(|ext| ext.to_str()) != Some(RECORD_EXTENSION) {
        return None;
    }
    let file_name = path.file_name()?.to_str()?;
    let (unit, token) = parse_record_file_name(file_name)?;
    match NaiveDateTime::parse_from_str(token, TIMESTAMP_FORMAT) {
        Ok(timestamp) => Some(Candidate::Valid(RecordRevision {
            unit,
            timestamp,
            path: path.to_path_buf(),
        })),
        Err(_) => Some(Candidate::BadTimestamp {
            unit,
            path: path.to_path_buf(),
            token: token.to_string(),
        }),
    }
}

/// Regular files and symlinks that resolve to a regular file. Symlinked
/// directories are not descended.
fn is_record_file(file_type: std::fs::FileType, path: &Path) -> bool {
    file_type.is_file() || (file_type.is_symlink() && path.is_file())
}

/// An entry that cannot be read only fails the scan when it is itself a
/// record file; unreadable unrelated subtrees are skipped.
fn blocks_scan(path: Option<&Path>) -> bool {
    path.is_some_and(|path| candidate_for(path).is_some())
}

fn walk_candidates(dir: &Path) -> Result<Vec<Candidate>, ProtocolError> {
    let mut out = Vec::new();
    for entry in WalkDir::new(dir).follow_links(false) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) if blocks_scan(err.path()) => return Err(io::Error::from(err).into()),
            Err(_) => continue,
        };
        if !is_record_file(entry.file_type(), entry.path()) {
            continue;
        }
        if let Some(candidate) = candidate_for(entry.path()) {
            out.push(candidate);
        }
    }
    Ok(out)
}

/// Newest revision per unit, plus the units whose file names carried an
/// unparseable timestamp.
#[derive(Debug, Default)]
pub struct RevisionIndex {
    latest: BTreeMap<UnitIdentity, RecordRevision>,
    invalid: BTreeMap<UnitIdentity, (PathBuf, String)>,
}

impl RevisionIndex {
    /// Walks `root` recursively. Top-level subdirectories are walked in parallel;
    /// the result is independent of traversal order.
    pub fn scan(root: &Path) -> Result<Self, ProtocolError> {
        Self::scan_with(root, None)
    }

    pub(crate) fn scan_with(root: &Path, debug: Option<&DebugLogger>) -> Result<Self, ProtocolError> {
        if !root.is_dir() {
            return Err(ProtocolError::MissingRoot(root.to_path_buf()));
        }

        let mut top_files: Vec<PathBuf> = Vec::new();
        let mut subdirs: Vec<PathBuf> = Vec::new();
        for entry in std::fs::read_dir(root)? {
            let Ok(entry) = entry else {
                continue;
            };
            let path = entry.path();
            match entry.file_type() {
                Ok(file_type) if file_type.is_dir() => subdirs.push(path),
                Ok(file_type) if is_record_file(file_type, &path) => top_files.push(path),
                Ok(_) => {}
                Err(err) if blocks_scan(Some(&path)) => return Err(err.into()),
                Err(_) => {}
            }
        }

        let mut candidates: Vec<Candidate> =
            top_files.iter().filter_map(|p| candidate_for(p)).collect();
        let nested: Vec<Vec<Candidate>> = subdirs
            .par_iter()
            .map(|dir| walk_candidates(dir))
            .collect::<Result<_, _>>()?;
        candidates.extend(nested.into_iter().flatten());

        let mut index = RevisionIndex::default();
        for candidate in candidates {
            index.insert(candidate, debug);
        }
        if let Some(logger) = debug {
            for revision in index.latest.values() {
                revision_event(logger, "selected", revision);
            }
            logger.event(
                "scan.summary",
                &[
                    ("root", Field::Str(&root.display().to_string())),
                    ("units", Field::Num(index.latest.len() as u64)),
                    ("invalid", Field::Num(index.invalid.len() as u64)),
                ],
            );
        }
        Ok(index)
    }

    fn insert(&mut self, candidate: Candidate, debug: Option<&DebugLogger>) {
        match candidate {
            Candidate::BadTimestamp { unit, path, token } => {
                let slot = self.invalid.entry(unit).or_insert_with(|| (path.clone(), token.clone()));
                if path < slot.0 {
                    *slot = (path, token);
                }
            }
            Candidate::Valid(revision) => {
                let unit = revision.unit;
                let keep_current = self
                    .latest
                    .get(&unit)
                    .is_some_and(|current| !revision.supersedes(current));
                let superseded = if keep_current {
                    Some(revision)
                } else {
                    self.latest.insert(unit, revision)
                };
                if let (Some(logger), Some(old)) = (debug, superseded) {
                    revision_event(logger, "superseded", &old);
                }
            }
        }
    }

    /// The authoritative revision for `unit`. A unit with any unparseable
    /// revision timestamp is rejected even if other revisions parsed.
    pub fn resolve(&self, unit: UnitIdentity) -> Result<&RecordRevision, ProtocolError> {
        if let Some((path, token)) = self.invalid.get(&unit) {
            return Err(ProtocolError::InvalidTimestamp {
                path: path.clone(),
                token: token.clone(),
            });
        }
        self.latest
            .get(&unit)
            .ok_or(ProtocolError::MissingUnit(unit))
    }

    /// Latest revisions sorted by unit identity ascending.
    pub fn revisions(&self) -> impl Iterator<Item = &RecordRevision> {
        self.latest.values()
    }
}

fn revision_event(logger: &DebugLogger, status: &str, revision: &RecordRevision) {
    logger.event(
        "scan.revision",
        &[
            ("status", Field::Str(status)),
            ("unit", Field::Str(&revision.unit.to_string())),
            ("path", Field::Str(&revision.path.display().to_string())),
        ],
    );
}

/// Latest revision of every unit under `root`, sorted by unit identity.
/// Fails on the first (lowest unit) record file with an unparseable timestamp.
pub fn scan_latest_revisions(root: &Path) -> Result<Vec<RecordRevision>, ProtocolError> {
    let index = RevisionIndex::scan(root)?;
    if let Some((_, (path, token))) = index.invalid.iter().next() {
        return Err(ProtocolError::InvalidTimestamp {
            path: path.clone(),
            token: token.clone(),
        });
    }
    Ok(index.latest.into_values().collect())
}
