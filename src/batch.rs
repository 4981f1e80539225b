use crate::debug::{DebugLogger, Field};
use crate::disposition::DispositionTracker;
use crate::error::ProtocolError;
use crate::record::UnitRecord;
use crate::unit::{UnitIdentity, UnitRange};
use crate::validator::ValidationContext;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

/// Validated records of one contiguous unit range. Frozen: only read access.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    range: UnitRange,
    units: BTreeMap<UnitIdentity, UnitRecord>,
    card_type: String,
    test_order: Vec<String>,
    test_names: BTreeSet<String>,
    repairable: Vec<UnitIdentity>,
    unrepairable: Vec<UnitIdentity>,
    source_paths: Vec<PathBuf>,
}

impl Batch {
    pub fn range(&self) -> UnitRange {
        self.range
    }

    pub fn card_type(&self) -> &str {
        &self.card_type
    }

    /// Agreed test names in the order the first unit listed them.
    pub fn test_order(&self) -> &[String] {
        &self.test_order
    }

    pub fn test_names(&self) -> &BTreeSet<String> {
        &self.test_names
    }

    pub fn unit(&self, unit: UnitIdentity) -> Option<&UnitRecord> {
        self.units.get(&unit)
    }

    /// Records in ascending unit order.
    pub fn units(&self) -> impl Iterator<Item = &UnitRecord> {
        self.units.values()
    }

    pub fn first_unit(&self) -> Option<&UnitRecord> {
        self.units.get(&self.range.min())
    }

    pub fn repairable_units(&self) -> &[UnitIdentity] {
        &self.repairable
    }

    pub fn unrepairable_units(&self) -> &[UnitIdentity] {
        &self.unrepairable
    }

    /// Record files the batch was built from, in ascending unit order.
    pub fn source_paths(&self) -> &[PathBuf] {
        &self.source_paths
    }

    pub fn total_count(&self) -> usize {
        self.range.len()
    }

    pub fn repairable_count(&self) -> usize {
        self.repairable.len()
    }

    pub fn unrepairable_count(&self) -> usize {
        self.unrepairable.len()
    }

    pub fn ok_count(&self) -> usize {
        self.total_count()
            .saturating_sub(self.repairable_count() + self.unrepairable_count())
    }
}

/// Accumulates validated records until the whole range has been seen.
#[derive(Debug, Default)]
pub struct BatchAggregator {
    units: BTreeMap<UnitIdentity, UnitRecord>,
    source_paths: Vec<PathBuf>,
}

impl BatchAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn insert(&mut self, record: UnitRecord, source: &Path) -> Result<(), ProtocolError> {
        let unit = record.unit();
        if self.units.contains_key(&unit) {
            return Err(ProtocolError::DuplicateUnit(unit));
        }
        self.units.insert(unit, record);
        self.source_paths.push(source.to_path_buf());
        Ok(())
    }

    /// Closes the batch. Every identity in `range` must have been inserted.
    pub fn freeze(
        self,
        range: UnitRange,
        context: &ValidationContext,
        tracker: DispositionTracker,
    ) -> Result<Batch, ProtocolError> {
        self.freeze_with(range, context, tracker, None)
    }

    pub(crate) fn freeze_with(
        self,
        range: UnitRange,
        context: &ValidationContext,
        tracker: DispositionTracker,
        debug: Option<&DebugLogger>,
    ) -> Result<Batch, ProtocolError> {
        if let Some(missing) = range.iter().find(|unit| !self.units.contains_key(unit)) {
            return Err(ProtocolError::MissingUnit(missing));
        }
        if let Some(outside) = self.units.keys().find(|unit| !range.contains(**unit)) {
            return Err(ProtocolError::InvalidConfiguration(format!(
                "unit {} is outside batch range {}",
                outside,
                range.label()
            )));
        }
        let test_order = context.expected_test_order().to_vec();
        let test_names = test_order.iter().cloned().collect();
        let (repairable, unrepairable) = tracker.into_lists();
        let batch = Batch {
            range,
            units: self.units,
            card_type: context.expected_card_type().unwrap_or_default().to_string(),
            test_order,
            test_names,
            repairable,
            unrepairable,
            source_paths: self.source_paths,
        };
        if let Some(logger) = debug {
            logger.event(
                "batch.frozen",
                &[
                    ("range", Field::Str(&range.label())),
                    ("card_type", Field::Str(batch.card_type())),
                    ("units", Field::Num(batch.units.len() as u64)),
                    ("repairable", Field::Num(batch.repairable_count() as u64)),
                    ("unrepairable", Field::Num(batch.unrepairable_count() as u64)),
                ],
            );
        }
        Ok(batch)
    }
}
