//! Tiling of the unit x test result grid into pages.
//!
//! Units are split into bands of [`UNITS_PER_BAND`] consecutive identities
//! starting at the batch minimum. Within each unit band the reportable tests
//! are split into bands of [`TESTS_PER_PAGE`], keeping the order the first unit
//! listed them. Each (unit band, test band) pair is one page.

use crate::batch::Batch;
use crate::record::{ResultValue, TestResult};
use crate::unit::UnitIdentity;
use std::ops::Range;

pub const UNITS_PER_BAND: u32 = 10;
pub const TESTS_PER_PAGE: usize = 44;
pub const CELL_TEXT_MAX_CHARS: usize = 5;
pub const PASS_MARKER: &str = "PASS";
pub const FAIL_MARKER: &str = "FAIL";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageDescriptor {
    /// Zero-based position among result pages.
    pub ordinal: usize,
    pub unit_band_start: UnitIdentity,
    pub unit_band_end: UnitIdentity,
    /// Indices into [`Pagination::reportable_tests`].
    pub tests: Range<usize>,
}

impl PageDescriptor {
    pub fn units(&self) -> impl Iterator<Item = UnitIdentity> + use<> {
        let start = self.unit_band_start.number();
        let end = self.unit_band_end.number();
        (start..=end).filter_map(|n| UnitIdentity::new(n).ok())
    }

    pub fn unit_count(&self) -> usize {
        (self.unit_band_end.number() - self.unit_band_start.number()) as usize + 1
    }

    pub fn band_label(&self) -> String {
        format!("{} - {}", self.unit_band_start, self.unit_band_end)
    }
}

/// Text and pass flag of one grid cell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CellValue {
    pub text: String,
    pub passed: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Pagination {
    reportable: Vec<String>,
    pages: Vec<PageDescriptor>,
}

impl Pagination {
    pub fn reportable_tests(&self) -> &[String] {
        &self.reportable
    }

    pub fn pages(&self) -> &[PageDescriptor] {
        &self.pages
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    pub fn page_tests(&self, page: &PageDescriptor) -> &[String] {
        let end = page.tests.end.min(self.reportable.len());
        let start = page.tests.start.min(end);
        &self.reportable[start..end]
    }
}

/// Test names laid out in the grid: the first unit's tests with the display
/// flag set, in that unit's order.
pub fn reportable_tests(batch: &Batch) -> Vec<String> {
    let Some(first) = batch.first_unit() else {
        return Vec::new();
    };
    batch
        .test_order()
        .iter()
        .filter(|name| first.test(name).is_some_and(TestResult::display))
        .cloned()
        .collect()
}

pub fn paginate(batch: &Batch) -> Pagination {
    let reportable = reportable_tests(batch);
    let mut pages = Vec::new();
    if reportable.is_empty() {
        return Pagination { reportable, pages };
    }

    let range = batch.range();
    let mut band_start = range.min();
    loop {
        let band_end = band_start
            .offset(UNITS_PER_BAND - 1)
            .filter(|end| *end <= range.max())
            .unwrap_or(range.max());
        let mut test_start = 0;
        while test_start < reportable.len() {
            let test_end = (test_start + TESTS_PER_PAGE).min(reportable.len());
            pages.push(PageDescriptor {
                ordinal: pages.len(),
                unit_band_start: band_start,
                unit_band_end: band_end,
                tests: test_start..test_end,
            });
            test_start = test_end;
        }
        match band_end.offset(1) {
            Some(next) if next <= range.max() => band_start = next,
            _ => break,
        }
    }
    Pagination { reportable, pages }
}

/// Numeric and boolean results show their value cut to five characters;
/// anything else shows the pass or fail marker.
pub fn cell_display(test: &TestResult) -> CellValue {
    let text = match test.result() {
        ResultValue::Integer(value) => truncate(&value.to_string()),
        ResultValue::Unsigned(value) => truncate(&value.to_string()),
        ResultValue::Float(value) => truncate(&format_float(*value)),
        ResultValue::Bool(true) => "True".to_string(),
        ResultValue::Bool(false) => "False".to_string(),
        ResultValue::Text(_) if test.passed() => PASS_MARKER.to_string(),
        ResultValue::Text(_) => FAIL_MARKER.to_string(),
    };
    CellValue {
        text,
        passed: test.passed(),
    }
}

/// Cells of one page, row-major: for each test, every unit of the band.
pub fn page_cells<'a>(
    batch: &'a Batch,
    pagination: &'a Pagination,
    page: &'a PageDescriptor,
) -> impl Iterator<Item = (UnitIdentity, &'a str, CellValue)> + 'a {
    pagination.page_tests(page).iter().flat_map(move |name| {
        page.units().filter_map(move |unit| {
            let test = batch.unit(unit)?.test(name)?;
            Some((unit, name.as_str(), cell_display(test)))
        })
    })
}

fn truncate(text: &str) -> String {
    text.chars().take(CELL_TEXT_MAX_CHARS).collect()
}

/// Shortest round-trip float text: integral values keep a `.0`, very large or
/// very small magnitudes use `d.ddde+XX` notation.
fn format_float(value: f64) -> String {
    if value.is_nan() {
        return "nan".to_string();
    }
    if value.is_infinite() {
        return if value > 0.0 { "inf" } else { "-inf" }.to_string();
    }
    let magnitude = value.abs();
    if magnitude != 0.0 && !(1e-4..1e16).contains(&magnitude) {
        let sci = format!("{:e}", value);
        let (mantissa, exponent) = sci.split_once('e').unwrap_or((sci.as_str(), "0"));
        let exponent: i32 = exponent.parse().unwrap_or(0);
        let sign = if exponent < 0 { '-' } else { '+' };
        return format!("{}e{}{:02}", mantissa, sign, exponent.abs());
    }
    if value.fract() == 0.0 {
        format!("{:.1}", value)
    } else {
        format!("{}", value)
    }
}
