use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::OnceLock;

pub const CONTRACT_ID: &str = "mfg.record_contract";
pub const CONTRACT_VERSION: &str = "1";

pub const FIELD_SAFE_BYTES: &str = "SafeBytes";
pub const FIELD_SERIAL_NUMBER: &str = "SN";
pub const FIELD_CARD_TYPE: &str = "CardTypeName";
pub const FIELD_PASSED: &str = "Passed";
pub const FIELD_ALL_TESTS_DONE: &str = "AllTestsDone";
pub const FIELD_USER_NAME: &str = "UserName";
pub const FIELD_TESTS: &str = "Tests";
pub const FIELD_TEST_NAME: &str = "Name";
pub const FIELD_TEST_PASSED: &str = "Passed";
pub const FIELD_TEST_RESULT_DESC: &str = "ResultDesc";
pub const FIELD_TEST_REPORT: &str = "Report";
pub const FIELD_TEST_UNIT: &str = "Unit";
pub const FIELD_TEST_MIN: &str = "Min";
pub const FIELD_TEST_MAX: &str = "Max";

// Order matters for the fingerprint: it is the order fields are checked in.
const CONTRACT_FIELDS: [&str; 13] = [
    "SafeBytes.SN",
    "CardTypeName",
    "Passed",
    "AllTestsDone",
    "UserName",
    "Tests",
    "Tests[].Name",
    "Tests[].Passed",
    "Tests[].ResultDesc",
    "Tests[].Report",
    "Tests[].Unit?",
    "Tests[].Min?",
    "Tests[].Max?",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContractErrorKind {
    Json(String),
    Missing,
    WrongType { expected: &'static str },
    DuplicateTestName(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractError {
    /// Dotted field path, e.g. `Tests[3].Passed`. Empty for whole-document errors.
    pub field: String,
    pub kind: ContractErrorKind,
}

impl ContractError {
    fn missing(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            kind: ContractErrorKind::Missing,
        }
    }

    fn wrong_type(field: impl Into<String>, expected: &'static str) -> Self {
        Self {
            field: field.into(),
            kind: ContractErrorKind::WrongType { expected },
        }
    }
}

impl fmt::Display for ContractError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ContractErrorKind::Json(message) => write!(f, "invalid JSON: {}", message),
            ContractErrorKind::Missing => write!(f, "missing field `{}`", self.field),
            ContractErrorKind::WrongType { expected } => {
                write!(f, "field `{}` must be {}", self.field, expected)
            }
            ContractErrorKind::DuplicateTestName(name) => {
                write!(f, "duplicate test name `{}` at `{}`", name, self.field)
            }
        }
    }
}

impl std::error::Error for ContractError {}

/// Result description of a single test. Numbers keep their integer/float origin
/// because the report shows them as written. Integers above `i64::MAX` stay
/// exact as `Unsigned`.
#[derive(Debug, Clone, PartialEq)]
pub enum ResultValue {
    Integer(i64),
    Unsigned(u64),
    Float(f64),
    Bool(bool),
    Text(String),
}

impl ResultValue {
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            ResultValue::Integer(_) | ResultValue::Unsigned(_) | ResultValue::Float(_)
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RawTest {
    pub name: String,
    pub passed: bool,
    pub result: ResultValue,
    pub report: bool,
    pub unit: Option<String>,
    pub min: Option<f64>,
    pub max: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RawRecord {
    pub serial_number: u64,
    pub card_type: String,
    pub passed: bool,
    pub all_tests_done: bool,
    pub user_name: String,
    pub tests: Vec<RawTest>,
}

pub fn parse_record_bytes(bytes: &[u8]) -> Result<RawRecord, ContractError> {
    let value: Value = serde_json::from_slice(bytes).map_err(|err| ContractError {
        field: String::new(),
        kind: ContractErrorKind::Json(err.to_string()),
    })?;
    parse_record_value(&value)
}

pub fn parse_record_str(raw: &str) -> Result<RawRecord, ContractError> {
    parse_record_bytes(raw.as_bytes())
}

pub fn parse_record_value(value: &Value) -> Result<RawRecord, ContractError> {
    let root = value
        .as_object()
        .ok_or_else(|| ContractError::wrong_type("", "an object"))?;

    let safe_bytes = required(root, FIELD_SAFE_BYTES, FIELD_SAFE_BYTES)?
        .as_object()
        .ok_or_else(|| ContractError::wrong_type(FIELD_SAFE_BYTES, "an object"))?;
    let sn_path = format!("{}.{}", FIELD_SAFE_BYTES, FIELD_SERIAL_NUMBER);
    let serial_number = required(safe_bytes, FIELD_SERIAL_NUMBER, &sn_path)?
        .as_u64()
        .ok_or_else(|| ContractError::wrong_type(sn_path.as_str(), "a non-negative integer"))?;

    let card_type = required_str(root, FIELD_CARD_TYPE, FIELD_CARD_TYPE)?;
    let passed = required_bool(root, FIELD_PASSED, FIELD_PASSED)?;
    let all_tests_done = required_bool(root, FIELD_ALL_TESTS_DONE, FIELD_ALL_TESTS_DONE)?;
    let user_name = required_str(root, FIELD_USER_NAME, FIELD_USER_NAME)?;

    let entries = required(root, FIELD_TESTS, FIELD_TESTS)?
        .as_array()
        .ok_or_else(|| ContractError::wrong_type(FIELD_TESTS, "an array"))?;
    let mut seen: BTreeSet<String> = BTreeSet::new();
    let mut tests = Vec::with_capacity(entries.len());
    for (idx, entry) in entries.iter().enumerate() {
        let base = format!("{}[{}]", FIELD_TESTS, idx);
        let test = parse_test(entry, &base)?;
        if !seen.insert(test.name.clone()) {
            return Err(ContractError {
                field: format!("{base}.{FIELD_TEST_NAME}"),
                kind: ContractErrorKind::DuplicateTestName(test.name),
            });
        }
        tests.push(test);
    }

    Ok(RawRecord {
        serial_number,
        card_type,
        passed,
        all_tests_done,
        user_name,
        tests,
    })
}

fn parse_test(entry: &Value, base: &str) -> Result<RawTest, ContractError> {
    let obj = entry
        .as_object()
        .ok_or_else(|| ContractError::wrong_type(base, "an object"))?;
    let path = |field: &str| format!("{base}.{field}");

    let name = required_str(obj, FIELD_TEST_NAME, &path(FIELD_TEST_NAME))?;
    let passed = required_bool(obj, FIELD_TEST_PASSED, &path(FIELD_TEST_PASSED))?;
    let result = result_value(required(
        obj,
        FIELD_TEST_RESULT_DESC,
        &path(FIELD_TEST_RESULT_DESC),
    )?);
    let report = required_bool(obj, FIELD_TEST_REPORT, &path(FIELD_TEST_REPORT))?;

    let unit = match obj.get(FIELD_TEST_UNIT) {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) if s.is_empty() => None,
        Some(Value::String(s)) => Some(s.clone()),
        Some(_) => return Err(ContractError::wrong_type(path(FIELD_TEST_UNIT), "a string")),
    };
    let min = optional_number(obj, FIELD_TEST_MIN, &path(FIELD_TEST_MIN))?;
    let max = optional_number(obj, FIELD_TEST_MAX, &path(FIELD_TEST_MAX))?;

    Ok(RawTest {
        name,
        passed,
        result,
        report,
        unit,
        min,
        max,
    })
}

fn result_value(value: &Value) -> ResultValue {
    match value {
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                ResultValue::Integer(i)
            } else if let Some(u) = n.as_u64() {
                ResultValue::Unsigned(u)
            } else if let Some(f) = n.as_f64() {
                ResultValue::Float(f)
            } else {
                ResultValue::Text(n.to_string())
            }
        }
        Value::String(s) => ResultValue::Text(s.clone()),
        Value::Bool(b) => ResultValue::Bool(*b),
        // Null and nested values are kept verbatim as text.
        other => ResultValue::Text(other.to_string()),
    }
}

fn required<'a>(
    obj: &'a Map<String, Value>,
    key: &str,
    path: &str,
) -> Result<&'a Value, ContractError> {
    obj.get(key).ok_or_else(|| ContractError::missing(path))
}

fn required_str(obj: &Map<String, Value>, key: &str, path: &str) -> Result<String, ContractError> {
    required(obj, key, path)?
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| ContractError::wrong_type(path, "a string"))
}

fn required_bool(obj: &Map<String, Value>, key: &str, path: &str) -> Result<bool, ContractError> {
    required(obj, key, path)?
        .as_bool()
        .ok_or_else(|| ContractError::wrong_type(path, "a boolean"))
}

fn optional_number(
    obj: &Map<String, Value>,
    key: &str,
    path: &str,
) -> Result<Option<f64>, ContractError> {
    match obj.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => Ok(n.as_f64()),
        Some(_) => Err(ContractError::wrong_type(path, "a number")),
    }
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    let mut out = String::with_capacity(digest.len() * 2);
    for b in digest {
        use std::fmt::Write;
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}

static CONTRACT_FINGERPRINT: OnceLock<String> = OnceLock::new();

/// Fingerprint of the contract id, version and checked field list. Embedded in
/// generated documents so a reader can tell which record layout was accepted.
pub fn contract_fingerprint_sha256() -> String {
    CONTRACT_FINGERPRINT
        .get_or_init(|| {
            let mut material = format!("{CONTRACT_ID}\n{CONTRACT_VERSION}\n");
            for field in CONTRACT_FIELDS {
                material.push_str(field);
                material.push('\n');
            }
            sha256_hex(material.as_bytes())
        })
        .clone()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "SafeBytes": {"SN": 17},
        "CardTypeName": "BIOM.2.6MA",
        "Passed": true,
        "AllTestsDone": true,
        "UserName": "operator",
        "Tests": [
            {"Name": "Supply 5V", "Passed": true, "ResultDesc": 4.98, "Report": true, "Unit": "V", "Min": 4.75, "Max": 5.25},
            {"Name": "Firmware", "Passed": true, "ResultDesc": "1.2.0", "Report": true},
            {"Name": "Relay count", "Passed": false, "ResultDesc": 3, "Report": false, "Unit": ""}
        ]
    }"#;

    #[test]
    fn parses_complete_record() {
        let record = parse_record_str(SAMPLE).expect("parse");
        assert_eq!(record.serial_number, 17);
        assert_eq!(record.card_type, "BIOM.2.6MA");
        assert!(record.passed && record.all_tests_done);
        assert_eq!(record.tests.len(), 3);
        assert_eq!(record.tests[0].result, ResultValue::Float(4.98));
        assert_eq!(record.tests[0].unit.as_deref(), Some("V"));
        assert_eq!(record.tests[0].min, Some(4.75));
        assert_eq!(record.tests[1].result, ResultValue::Text("1.2.0".to_string()));
        assert_eq!(record.tests[1].max, None);
        assert_eq!(record.tests[2].result, ResultValue::Integer(3));
        assert_eq!(record.tests[2].unit, None);
        assert!(!record.tests[2].report);
    }

    #[test]
    fn reports_missing_nested_field_path() {
        let raw = SAMPLE.replace(r#""Report": false, "#, "");
        let err = parse_record_str(&raw).expect_err("missing report flag");
        assert_eq!(err.field, "Tests[2].Report");
        assert_eq!(err.kind, ContractErrorKind::Missing);
        assert!(err.to_string().contains("missing field `Tests[2].Report`"));
    }

    #[test]
    fn rejects_mistyped_serial_number() {
        let raw = SAMPLE.replace(r#""SN": 17"#, r#""SN": "17""#);
        let err = parse_record_str(&raw).expect_err("string serial");
        assert_eq!(err.field, "SafeBytes.SN");
        assert!(matches!(err.kind, ContractErrorKind::WrongType { .. }));
    }

    #[test]
    fn rejects_duplicate_test_names() {
        let raw = SAMPLE.replace(r#""Name": "Firmware""#, r#""Name": "Supply 5V""#);
        let err = parse_record_str(&raw).expect_err("duplicate");
        assert_eq!(
            err.kind,
            ContractErrorKind::DuplicateTestName("Supply 5V".to_string())
        );
    }

    #[test]
    fn rejects_invalid_json() {
        let err = parse_record_str("{ not json").expect_err("invalid");
        assert!(matches!(err.kind, ContractErrorKind::Json(_)));
    }

    #[test]
    fn non_string_result_description_is_kept_as_text() {
        let raw = SAMPLE.replace(r#""ResultDesc": "1.2.0""#, r#""ResultDesc": null"#);
        let record = parse_record_str(&raw).expect("parse");
        assert_eq!(record.tests[1].result, ResultValue::Text("null".to_string()));
        assert!(!record.tests[1].result.is_numeric());
    }

    #[test]
    fn integers_beyond_i64_stay_exact() {
        let raw = SAMPLE.replace(r#""ResultDesc": 3"#, r#""ResultDesc": 18446744073709551615"#);
        let record = parse_record_str(&raw).expect("parse");
        assert_eq!(record.tests[2].result, ResultValue::Unsigned(u64::MAX));
        assert!(record.tests[2].result.is_numeric());

        let raw = SAMPLE.replace(r#""ResultDesc": 3"#, r#""ResultDesc": -3"#);
        let record = parse_record_str(&raw).expect("parse");
        assert_eq!(record.tests[2].result, ResultValue::Integer(-3));
    }

    #[test]
    fn boolean_result_description_keeps_its_value() {
        let raw = SAMPLE.replace(r#""ResultDesc": "1.2.0""#, r#""ResultDesc": false"#);
        let record = parse_record_str(&raw).expect("parse");
        assert_eq!(record.tests[1].result, ResultValue::Bool(false));
        assert!(!record.tests[1].result.is_numeric());
    }

    #[test]
    fn fingerprints_are_stable() {
        let a = contract_fingerprint_sha256();
        let b = contract_fingerprint_sha256();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
