use crate::batch::{Batch, BatchAggregator};
use crate::debug::DebugLogger;
use crate::disposition::{DecisionSource, DispositionTracker};
use crate::error::ProtocolError;
use crate::perf::{PerfLogger, timed};
use crate::scanner::RevisionIndex;
use crate::unit::UnitRange;
use crate::validator::ValidationContext;
use std::path::Path;

/// Scans `root`, validates the latest revision of every unit in `range` in
/// ascending order and returns the frozen batch. Any failure aborts the run
/// without a partial batch.
pub fn process_batch(
    root: &Path,
    range: UnitRange,
    decisions: &mut dyn DecisionSource,
) -> Result<Batch, ProtocolError> {
    process_batch_with(root, range, decisions, None, None)
}

pub(crate) fn process_batch_with(
    root: &Path,
    range: UnitRange,
    decisions: &mut dyn DecisionSource,
    debug: Option<&DebugLogger>,
    perf: Option<&PerfLogger>,
) -> Result<Batch, ProtocolError> {
    let index = timed(perf, "process.scan", || RevisionIndex::scan_with(root, debug))?;

    let mut context = ValidationContext::new();
    let mut tracker = DispositionTracker::new();
    let mut aggregator = BatchAggregator::new();

    timed(perf, "process.validate", || -> Result<(), ProtocolError> {
        for unit in range.iter() {
            let revision = index.resolve(unit)?;
            let bytes = read_record(&revision.path)?;
            let raw = mfg_record_contract::parse_record_bytes(&bytes).map_err(|err| {
                ProtocolError::Schema {
                    path: revision.path.clone(),
                    message: err.to_string(),
                }
            })?;
            let record = context.validate_with(
                unit,
                &revision.path,
                raw,
                &mut tracker,
                decisions,
                debug,
            )?;
            aggregator.insert(record, &revision.path)?;
        }
        Ok(())
    })?;

    aggregator.freeze_with(range, &context, tracker, debug)
}

fn read_record(path: &Path) -> Result<Vec<u8>, ProtocolError> {
    std::fs::read(path).map_err(|source| ProtocolError::ReadRecord {
        path: path.to_path_buf(),
        source,
    })
}
