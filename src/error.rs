use crate::unit::UnitIdentity;
use std::fmt;
use std::path::PathBuf;

#[derive(Debug)]
pub enum ProtocolError {
    MissingRoot(PathBuf),
    InvalidTimestamp {
        path: PathBuf,
        token: String,
    },
    MissingUnit(UnitIdentity),
    Schema {
        path: PathBuf,
        message: String,
    },
    ReadRecord {
        path: PathBuf,
        source: std::io::Error,
    },
    IdentityMismatch {
        path: PathBuf,
        expected: UnitIdentity,
        found: u64,
    },
    IncompleteTesting {
        path: PathBuf,
        unit: UnitIdentity,
    },
    InconsistentCardType {
        path: PathBuf,
        expected: String,
        found: String,
    },
    InconsistentTestSet {
        path: PathBuf,
        extra: Vec<String>,
        missing: Vec<String>,
    },
    UserAborted(UnitIdentity),
    DuplicateUnit(UnitIdentity),
    InvalidConfiguration(String),
    Pdf(String),
    Io(std::io::Error),
}

impl ProtocolError {
    /// Operator declined to continue past a failing unit. Not a data defect.
    pub fn is_operator_abort(&self) -> bool {
        matches!(self, ProtocolError::UserAborted(_))
    }
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolError::MissingRoot(path) => {
                write!(f, "records directory does not exist: {}", path.display())
            }
            ProtocolError::InvalidTimestamp { path, token } => write!(
                f,
                "invalid revision timestamp `{}` in {}",
                token,
                path.display()
            ),
            ProtocolError::MissingUnit(unit) => write!(f, "no record found for {}", unit),
            ProtocolError::Schema { path, message } => {
                write!(f, "invalid record {}: {}", path.display(), message)
            }
            ProtocolError::ReadRecord { path, source } => {
                write!(f, "cannot read record {}: {}", path.display(), source)
            }
            ProtocolError::IdentityMismatch {
                path,
                expected,
                found,
            } => write!(
                f,
                "serial number mismatch in {}: expected {}, record declares {}",
                path.display(),
                expected,
                found
            ),
            ProtocolError::IncompleteTesting { path, unit } => write!(
                f,
                "not all tests were executed for {} ({})",
                unit,
                path.display()
            ),
            ProtocolError::InconsistentCardType {
                path,
                expected,
                found,
            } => write!(
                f,
                "card type mismatch in {}: expected `{}`, found `{}`",
                path.display(),
                expected,
                found
            ),
            ProtocolError::InconsistentTestSet {
                path,
                extra,
                missing,
            } => write!(
                f,
                "test names differ in {}: extra {:?}, missing {:?}",
                path.display(),
                extra,
                missing
            ),
            ProtocolError::UserAborted(unit) => {
                write!(f, "processing aborted by operator at failing unit {}", unit)
            }
            ProtocolError::DuplicateUnit(unit) => {
                write!(f, "unit {} was aggregated twice", unit)
            }
            ProtocolError::InvalidConfiguration(message) => {
                write!(f, "invalid configuration: {}", message)
            }
            ProtocolError::Pdf(message) => write!(f, "pdf error: {}", message),
            ProtocolError::Io(err) => write!(f, "io error: {}", err),
        }
    }
}

impl std::error::Error for ProtocolError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ProtocolError::Io(err) => Some(err),
            ProtocolError::ReadRecord { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<std::io::Error> for ProtocolError {
    fn from(value: std::io::Error) -> Self {
        ProtocolError::Io(value)
    }
}

impl From<lopdf::Error> for ProtocolError {
    fn from(value: lopdf::Error) -> Self {
        ProtocolError::Pdf(value.to_string())
    }
}
