use crate::error::ProtocolError;
use std::fmt;

pub const UNIT_PREFIX: char = 'V';
pub const UNIT_DIGITS: usize = 6;
pub const MAX_UNIT_NUMBER: u32 = 999_999;

/// Production number of one unit, rendered as `V` + six zero-padded digits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UnitIdentity(u32);

impl UnitIdentity {
    pub fn new(number: u32) -> Result<Self, ProtocolError> {
        if number > MAX_UNIT_NUMBER {
            return Err(ProtocolError::InvalidConfiguration(format!(
                "production number {} does not fit in {} digits",
                number, UNIT_DIGITS
            )));
        }
        Ok(Self(number))
    }

    pub fn number(self) -> u32 {
        self.0
    }

    /// Parses a `V000123` token. Anything else, including surrounding text, is rejected.
    pub fn parse_token(token: &str) -> Option<Self> {
        let digits = token.strip_prefix(UNIT_PREFIX)?;
        if digits.len() != UNIT_DIGITS || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        digits.parse::<u32>().ok().map(Self)
    }

    pub(crate) fn offset(self, delta: u32) -> Option<Self> {
        let next = self.0.checked_add(delta)?;
        (next <= MAX_UNIT_NUMBER).then_some(Self(next))
    }
}

impl fmt::Display for UnitIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{:06}", UNIT_PREFIX, self.0)
    }
}

/// Inclusive `[min, max]` range of production numbers making up one batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnitRange {
    min: UnitIdentity,
    max: UnitIdentity,
}

impl UnitRange {
    pub fn new(min: u32, max: u32) -> Result<Self, ProtocolError> {
        let min = UnitIdentity::new(min)?;
        let max = UnitIdentity::new(max)?;
        if min > max {
            return Err(ProtocolError::InvalidConfiguration(format!(
                "empty unit range {} - {}",
                min, max
            )));
        }
        Ok(Self { min, max })
    }

    pub fn min(&self) -> UnitIdentity {
        self.min
    }

    pub fn max(&self) -> UnitIdentity {
        self.max
    }

    pub fn len(&self) -> usize {
        (self.max.0 - self.min.0) as usize + 1
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn contains(&self, unit: UnitIdentity) -> bool {
        self.min <= unit && unit <= self.max
    }

    /// Ascending identities from `min` to `max`.
    pub fn iter(&self) -> impl Iterator<Item = UnitIdentity> + use<> {
        (self.min.0..=self.max.0).map(UnitIdentity)
    }

    pub fn label(&self) -> String {
        format!("{} - {}", self.min, self.max)
    }
}
