use crate::unit::UnitIdentity;
use mfg_record_contract::{RawRecord, RawTest};
use std::collections::{BTreeMap, BTreeSet};

pub use mfg_record_contract::ResultValue;

/// Outcome of one named test on one unit.
#[derive(Debug, Clone, PartialEq)]
pub struct TestResult {
    name: String,
    passed: bool,
    result: ResultValue,
    display: bool,
    unit_of_measure: Option<String>,
    lower_bound: Option<f64>,
    upper_bound: Option<f64>,
}

impl TestResult {
    pub fn new(name: impl Into<String>, passed: bool, result: ResultValue, display: bool) -> Self {
        Self {
            name: name.into(),
            passed,
            result,
            display,
            unit_of_measure: None,
            lower_bound: None,
            upper_bound: None,
        }
    }

    pub fn with_unit_of_measure(mut self, unit: impl Into<String>) -> Self {
        self.unit_of_measure = Some(unit.into());
        self
    }

    pub fn with_bounds(mut self, lower: Option<f64>, upper: Option<f64>) -> Self {
        self.lower_bound = lower;
        self.upper_bound = upper;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn passed(&self) -> bool {
        self.passed
    }

    pub fn result(&self) -> &ResultValue {
        &self.result
    }

    /// Whether the test gets a row in the rendered result grid.
    pub fn display(&self) -> bool {
        self.display
    }

    pub fn unit_of_measure(&self) -> Option<&str> {
        self.unit_of_measure.as_deref()
    }

    pub fn lower_bound(&self) -> Option<f64> {
        self.lower_bound
    }

    pub fn upper_bound(&self) -> Option<f64> {
        self.upper_bound
    }
}

impl From<RawTest> for TestResult {
    fn from(raw: RawTest) -> Self {
        Self {
            name: raw.name,
            passed: raw.passed,
            result: raw.result,
            display: raw.report,
            unit_of_measure: raw.unit,
            lower_bound: raw.min,
            upper_bound: raw.max,
        }
    }
}

/// Validated data of one unit. Never mutated after construction.
#[derive(Debug, Clone, PartialEq)]
pub struct UnitRecord {
    unit: UnitIdentity,
    card_type: String,
    operator: String,
    all_tests_executed: bool,
    passed: bool,
    tests: Vec<TestResult>,
    by_name: BTreeMap<String, usize>,
}

impl UnitRecord {
    /// Test names must be unique; the record contract rejects duplicates
    /// before this point, and later duplicates here are ignored.
    pub fn new(
        unit: UnitIdentity,
        card_type: impl Into<String>,
        operator: impl Into<String>,
        all_tests_executed: bool,
        passed: bool,
        tests: Vec<TestResult>,
    ) -> Self {
        let mut by_name = BTreeMap::new();
        let mut kept = Vec::with_capacity(tests.len());
        for test in tests {
            if by_name.contains_key(test.name()) {
                continue;
            }
            by_name.insert(test.name().to_string(), kept.len());
            kept.push(test);
        }
        Self {
            unit,
            card_type: card_type.into(),
            operator: operator.into(),
            all_tests_executed,
            passed,
            tests: kept,
            by_name,
        }
    }

    pub fn from_raw(unit: UnitIdentity, raw: RawRecord) -> Self {
        let tests = raw.tests.into_iter().map(TestResult::from).collect();
        Self::new(
            unit,
            raw.card_type,
            raw.user_name,
            raw.all_tests_done,
            raw.passed,
            tests,
        )
    }

    pub fn unit(&self) -> UnitIdentity {
        self.unit
    }

    pub fn card_type(&self) -> &str {
        &self.card_type
    }

    pub fn operator(&self) -> &str {
        &self.operator
    }

    pub fn all_tests_executed(&self) -> bool {
        self.all_tests_executed
    }

    pub fn passed(&self) -> bool {
        self.passed
    }

    /// Tests in the order the record lists them.
    pub fn tests(&self) -> &[TestResult] {
        &self.tests
    }

    pub fn test(&self, name: &str) -> Option<&TestResult> {
        self.by_name.get(name).map(|idx| &self.tests[*idx])
    }

    pub fn test_names(&self) -> BTreeSet<&str> {
        self.by_name.keys().map(String::as_str).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mfg_record_contract::parse_record_str;

    #[test]
    fn from_raw_keeps_test_order_and_optional_fields() {
        let raw = parse_record_str(
            r#"{
                "SafeBytes": {"SN": 5},
                "CardTypeName": "CT-1",
                "Passed": false,
                "AllTestsDone": true,
                "UserName": "op",
                "Tests": [
                    {"Name": "Zeta", "Passed": true, "ResultDesc": 1.5, "Report": true, "Unit": "mA", "Min": 1, "Max": 2},
                    {"Name": "Alpha", "Passed": false, "ResultDesc": "open", "Report": false}
                ]
            }"#,
        )
        .expect("parse");
        let record = UnitRecord::from_raw(UnitIdentity::new(5).expect("unit"), raw);
        let names: Vec<&str> = record.tests().iter().map(TestResult::name).collect();
        assert_eq!(names, vec!["Zeta", "Alpha"]);
        let zeta = record.test("Zeta").expect("zeta");
        assert_eq!(zeta.unit_of_measure(), Some("mA"));
        assert_eq!(zeta.lower_bound(), Some(1.0));
        assert_eq!(zeta.upper_bound(), Some(2.0));
        assert!(!record.test("Alpha").expect("alpha").display());
        assert_eq!(record.operator(), "op");
        assert!(!record.passed());
    }

    #[test]
    fn duplicate_names_keep_first_entry() {
        let record = UnitRecord::new(
            UnitIdentity::new(1).expect("unit"),
            "CT",
            "op",
            true,
            true,
            vec![
                TestResult::new("A", true, ResultValue::Integer(1), true),
                TestResult::new("A", false, ResultValue::Integer(2), true),
            ],
        );
        assert_eq!(record.tests().len(), 1);
        assert!(record.test("A").expect("a").passed());
    }
}
