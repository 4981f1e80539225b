use crate::debug::{DebugLogger, Field};
use crate::disposition::{DecisionSource, DispositionTracker};
use crate::error::ProtocolError;
use crate::record::UnitRecord;
use crate::unit::UnitIdentity;
use mfg_record_contract::RawRecord;
use std::collections::BTreeSet;
use std::path::Path;

/// Cross-record expectations for one batch run. The first accepted unit sets
/// the card type and the test-name set every later unit must match.
#[derive(Debug, Clone, Default)]
pub struct ValidationContext {
    expected_card_type: Option<String>,
    expected_test_order: Vec<String>,
    expected_test_names: Option<BTreeSet<String>>,
}

impl ValidationContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn expected_card_type(&self) -> Option<&str> {
        self.expected_card_type.as_deref()
    }

    /// Test names in the order the first unit listed them.
    pub fn expected_test_order(&self) -> &[String] {
        &self.expected_test_order
    }

    /// Checks, in order: declared identity, all tests executed, failure
    /// disposition, card type, test-name set. The first failing check aborts.
    pub fn validate(
        &mut self,
        expected: UnitIdentity,
        path: &Path,
        raw: RawRecord,
        tracker: &mut DispositionTracker,
        decisions: &mut dyn DecisionSource,
    ) -> Result<UnitRecord, ProtocolError> {
        self.validate_with(expected, path, raw, tracker, decisions, None)
    }

    pub(crate) fn validate_with(
        &mut self,
        expected: UnitIdentity,
        path: &Path,
        raw: RawRecord,
        tracker: &mut DispositionTracker,
        decisions: &mut dyn DecisionSource,
        debug: Option<&DebugLogger>,
    ) -> Result<UnitRecord, ProtocolError> {
        if raw.serial_number != expected.number() as u64 {
            return Err(ProtocolError::IdentityMismatch {
                path: path.to_path_buf(),
                expected,
                found: raw.serial_number,
            });
        }

        if !raw.all_tests_done {
            return Err(ProtocolError::IncompleteTesting {
                path: path.to_path_buf(),
                unit: expected,
            });
        }

        if !raw.passed {
            tracker.handle_failure_with(expected, decisions, debug)?;
        }

        self.check_card_type(path, &raw.card_type)?;
        self.check_test_names(path, &raw)?;

        if let Some(logger) = debug {
            logger.event(
                "validate.unit",
                &[
                    ("unit", Field::Str(&expected.to_string())),
                    ("path", Field::Str(&path.display().to_string())),
                    ("passed", Field::Bool(raw.passed)),
                    ("tests", Field::Num(raw.tests.len() as u64)),
                ],
            );
        }
        Ok(UnitRecord::from_raw(expected, raw))
    }

    fn check_card_type(&mut self, path: &Path, card_type: &str) -> Result<(), ProtocolError> {
        if let Some(expected) = self.expected_card_type.as_deref() {
            if expected != card_type {
                return Err(ProtocolError::InconsistentCardType {
                    path: path.to_path_buf(),
                    expected: expected.to_string(),
                    found: card_type.to_string(),
                });
            }
            return Ok(());
        }
        self.expected_card_type = Some(card_type.to_string());
        Ok(())
    }

    fn check_test_names(&mut self, path: &Path, raw: &RawRecord) -> Result<(), ProtocolError> {
        let current: BTreeSet<String> = raw.tests.iter().map(|t| t.name.clone()).collect();
        if let Some(expected) = self.expected_test_names.as_ref() {
            if &current == expected {
                return Ok(());
            }
            // BTreeSet differences iterate in sorted order.
            let extra: Vec<String> = current.difference(expected).cloned().collect();
            let missing: Vec<String> = expected.difference(&current).cloned().collect();
            return Err(ProtocolError::InconsistentTestSet {
                path: path.to_path_buf(),
                extra,
                missing,
            });
        }
        self.expected_test_order = raw.tests.iter().map(|t| t.name.clone()).collect();
        self.expected_test_names = Some(current);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disposition::ScriptedDecisions;
    use mfg_record_contract::{RawTest, ResultValue};

    fn raw(sn: u64, card: &str, passed: bool, done: bool, names: &[&str]) -> RawRecord {
        RawRecord {
            serial_number: sn,
            card_type: card.to_string(),
            passed,
            all_tests_done: done,
            user_name: "op".to_string(),
            tests: names
                .iter()
                .map(|name| RawTest {
                    name: name.to_string(),
                    passed: true,
                    result: ResultValue::Integer(1),
                    report: true,
                    unit: None,
                    min: None,
                    max: None,
                })
                .collect(),
        }
    }

    fn unit(n: u32) -> UnitIdentity {
        UnitIdentity::new(n).expect("unit")
    }

    #[test]
    fn first_unit_sets_expectations() {
        let mut ctx = ValidationContext::new();
        let mut tracker = DispositionTracker::new();
        let mut script = ScriptedDecisions::default();
        let record = ctx
            .validate(
                unit(1),
                Path::new("a.json"),
                raw(1, "CT", true, true, &["B", "A"]),
                &mut tracker,
                &mut script,
            )
            .expect("valid");
        assert_eq!(record.unit(), unit(1));
        assert_eq!(ctx.expected_card_type(), Some("CT"));
        assert_eq!(ctx.expected_test_order(), &["B".to_string(), "A".to_string()]);
        assert!(script.asked().is_empty());
    }

    #[test]
    fn identity_mismatch_is_checked_first() {
        let mut ctx = ValidationContext::new();
        let mut tracker = DispositionTracker::new();
        let mut script = ScriptedDecisions::default();
        let err = ctx
            .validate(
                unit(2),
                Path::new("V000002_x.json"),
                raw(3, "CT", false, false, &["A"]),
                &mut tracker,
                &mut script,
            )
            .expect_err("mismatch");
        assert!(matches!(err, ProtocolError::IdentityMismatch { found: 3, .. }));
        assert!(script.asked().is_empty());
    }

    #[test]
    fn incomplete_testing_precedes_disposition() {
        let mut ctx = ValidationContext::new();
        let mut tracker = DispositionTracker::new();
        let mut script = ScriptedDecisions::new([true, true]);
        let err = ctx
            .validate(
                unit(1),
                Path::new("a.json"),
                raw(1, "CT", false, false, &["A"]),
                &mut tracker,
                &mut script,
            )
            .expect_err("incomplete");
        assert!(matches!(err, ProtocolError::IncompleteTesting { .. }));
        assert!(script.asked().is_empty());
    }

    #[test]
    fn card_type_divergence_reports_both_values() {
        let mut ctx = ValidationContext::new();
        let mut tracker = DispositionTracker::new();
        let mut script = ScriptedDecisions::default();
        ctx.validate(
            unit(1),
            Path::new("a.json"),
            raw(1, "CT-A", true, true, &["X"]),
            &mut tracker,
            &mut script,
        )
        .expect("first");
        let err = ctx
            .validate(
                unit(2),
                Path::new("b.json"),
                raw(2, "CT-B", true, true, &["X"]),
                &mut tracker,
                &mut script,
            )
            .expect_err("card type");
        match err {
            ProtocolError::InconsistentCardType {
                expected, found, ..
            } => {
                assert_eq!(expected, "CT-A");
                assert_eq!(found, "CT-B");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_set_difference_is_relative_to_first_unit() {
        let mut ctx = ValidationContext::new();
        let mut tracker = DispositionTracker::new();
        let mut script = ScriptedDecisions::default();
        ctx.validate(
            unit(1),
            Path::new("a.json"),
            raw(1, "CT", true, true, &["X", "Y"]),
            &mut tracker,
            &mut script,
        )
        .expect("first");
        let err = ctx
            .validate(
                unit(2),
                Path::new("b.json"),
                raw(2, "CT", true, true, &["X", "Z"]),
                &mut tracker,
                &mut script,
            )
            .expect_err("test set");
        match err {
            ProtocolError::InconsistentTestSet { extra, missing, .. } => {
                assert_eq!(extra, vec!["Z".to_string()]);
                assert_eq!(missing, vec!["Y".to_string()]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn hidden_tests_take_part_in_the_set_check() {
        let mut ctx = ValidationContext::new();
        let mut tracker = DispositionTracker::new();
        let mut script = ScriptedDecisions::default();
        let mut first = raw(1, "CT", true, true, &["A", "H"]);
        first.tests[1].report = false;
        ctx.validate(unit(1), Path::new("a.json"), first, &mut tracker, &mut script)
            .expect("first");
        let err = ctx
            .validate(
                unit(2),
                Path::new("b.json"),
                raw(2, "CT", true, true, &["A"]),
                &mut tracker,
                &mut script,
            )
            .expect_err("hidden test missing");
        match err {
            ProtocolError::InconsistentTestSet { extra, missing, .. } => {
                assert!(extra.is_empty());
                assert_eq!(missing, vec!["H".to_string()]);
            }
            other => panic!("unexpected error: {other}"),
        }
        // Hidden tests keep their place in the expected order.
        assert_eq!(ctx.expected_test_order(), &["A".to_string(), "H".to_string()]);
    }

    #[test]
    fn same_names_in_another_order_are_accepted() {
        let mut ctx = ValidationContext::new();
        let mut tracker = DispositionTracker::new();
        let mut script = ScriptedDecisions::default();
        for (n, names) in [(1u32, ["A", "B"]), (2, ["B", "A"])] {
            ctx.validate(
                unit(n),
                Path::new("r.json"),
                raw(n as u64, "CT", true, true, &names),
                &mut tracker,
                &mut script,
            )
            .expect("valid");
        }
        assert_eq!(ctx.expected_test_order(), &["A".to_string(), "B".to_string()]);
    }

    #[test]
    fn failing_unit_is_classified_before_consistency_checks() {
        let mut ctx = ValidationContext::new();
        let mut tracker = DispositionTracker::new();
        let mut script = ScriptedDecisions::new([true, false]);
        ctx.validate(
            unit(1),
            Path::new("a.json"),
            raw(1, "CT", false, true, &["A"]),
            &mut tracker,
            &mut script,
        )
        .expect("continued");
        assert_eq!(tracker.unrepairable(), &[unit(1)]);
        assert_eq!(script.asked().len(), 2);
    }
}
