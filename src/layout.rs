//! Page composition for the protocol document.
//!
//! Positions are in millimetres from the top-left page corner. Text helpers
//! take the baseline position.

use crate::batch::Batch;
use crate::canvas::{Canvas, Command, Document, FONT_BOLD, FONT_REGULAR};
use crate::header::ProtocolHeader;
use crate::pagination::{PageDescriptor, Pagination, page_cells};
use crate::types::{Color, Pt, Size};

pub const TITLE: &str = "PRODUCTION PROTOCOL";
pub const SUBTITLE: &str = "Generated by mfg-protocol";
pub const PAGE_NUMBER_TEMPLATE: &str = "{page}/{pages}";
pub const PROTOCOL_NUMBER_TEMPLATE: &str = "Protocol number: {protocol}";
pub const PAGE_KIND_KEY: &str = "page.kind";

const LEFT_MARGIN: f32 = 15.0;
const LEFT_MARGIN_INSIDE: f32 = 17.0;
const TOP_ROW: f32 = 17.0;
const FRAME_WIDTH: f32 = 180.0;
const VALUE_COLUMN: f32 = 90.0;
const NOTE_WRAP_CHARS: usize = 48;

const TEST_COLUMN: f32 = 65.0;
const UNIT_COLUMN: f32 = 9.0;
const COLUMN_SPACING: f32 = 1.0;
const ROW_HEIGHT: f32 = 5.0;
const UNIT_LABEL_HEIGHT: f32 = 20.0;

// Footer positions in points from the bottom-left corner.
const FOOTER_PAGE_X: f32 = 535.0;
const FOOTER_PROTOCOL_X: f32 = 42.0;
const FOOTER_BASELINE: f32 = 20.0;
const FOOTER_FONT_SIZE: f32 = 10.0;

fn mm(value: f32) -> Pt {
    Pt::from_mm(value)
}

fn text(canvas: &mut Canvas, x: f32, baseline: f32, size: f32, bold: bool, value: &str) {
    canvas.set_font_name(if bold { FONT_BOLD } else { FONT_REGULAR });
    canvas.set_font_size(Pt::from_f32(size));
    canvas.set_fill_color(Color::BLACK);
    canvas.draw_string(mm(x), mm(baseline) - Pt::from_f32(size), value);
}

fn frame(canvas: &mut Canvas, x: f32, top: f32, width: f32, height: f32, line: f32, fill: Color) {
    canvas.set_fill_color(fill);
    canvas.fill_rect(mm(x), mm(top), mm(width), mm(height));
    canvas.set_stroke_color(Color::BLACK);
    canvas.set_line_width(Pt::from_f32(line));
    canvas.stroke_rect(mm(x), mm(top), mm(width), mm(height));
}

fn checkbox(canvas: &mut Canvas, x: f32, bottom: f32, size: f32, checked: bool) {
    canvas.set_stroke_color(Color::BLACK);
    canvas.set_line_width(Pt::from_f32(0.8));
    canvas.stroke_rect(mm(x), mm(bottom - size), mm(size), mm(size));
    if checked {
        canvas.set_line_width(Pt::from_f32(1.2));
        canvas.move_to(mm(x + 0.8), mm(bottom - size / 2.0));
        canvas.line_to(mm(x + size / 2.0), mm(bottom - 0.8));
        canvas.line_to(mm(x + size - 0.8), mm(bottom - size + 0.8));
        canvas.stroke();
    }
}

/// Greedy word wrap by character count.
fn wrap(value: &str, max_chars: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();
    for word in value.split_whitespace() {
        let needed = if current.is_empty() {
            word.chars().count()
        } else {
            current.chars().count() + 1 + word.chars().count()
        };
        if needed > max_chars && !current.is_empty() {
            lines.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(word);
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines
}

/// Label/value rows of section A1.
pub fn header_fields(header: &ProtocolHeader, batch: &Batch) -> Vec<(&'static str, String)> {
    vec![
        ("Protocol number:", header.protocol_number.clone()),
        ("Product code:", batch.card_type().to_string()),
        ("Production number range:", batch.range().label()),
        ("Quantity - released to production:", batch.total_count().to_string()),
        (
            "Quantity - unrepairable rejects / PNR:",
            batch.unrepairable_count().to_string(),
        ),
        (
            "Quantity - repairable rejects / PNR:",
            batch.repairable_count().to_string(),
        ),
        ("Quantity - produced OK:", batch.ok_count().to_string()),
        ("Production documentation:", header.production_doc.clone()),
        ("Check date:", header.check_date_label()),
        ("Worker name:", header.worker.clone()),
        ("Note:", header.note.clone()),
    ]
}

fn draw_header_page(canvas: &mut Canvas, header: &ProtocolHeader, batch: &Batch) {
    canvas.meta(PAGE_KIND_KEY, "header");
    let mut row = TOP_ROW;
    text(canvas, LEFT_MARGIN, row, 20.0, true, TITLE);
    row += 10.0;
    text(canvas, LEFT_MARGIN, row, 12.0, true, SUBTITLE);
    row += 5.0;

    frame(canvas, LEFT_MARGIN, row, FRAME_WIDTH, 113.0, 1.5, Color::WHITE);
    row += 7.0;
    text(canvas, LEFT_MARGIN_INSIDE, row, 12.0, true, "A1: Header");
    row += 10.0;
    for (idx, (label, value)) in header_fields(header, batch).into_iter().enumerate() {
        text(canvas, LEFT_MARGIN_INSIDE, row, 10.0, false, label);
        let top = row - 5.0;
        match idx {
            // Reject counts get a second box for the PNR reference.
            4 | 5 => {
                frame(canvas, VALUE_COLUMN, top, 60.0, 7.0, 0.5, Color::LIGHT_BLUE);
                frame(canvas, VALUE_COLUMN + 65.0, top, 30.0, 7.0, 0.5, Color::LIGHT_BLUE);
            }
            9 => frame(canvas, VALUE_COLUMN, top, 95.0, 7.0, 0.5, Color::LIGHT_BLUE),
            10 => frame(canvas, VALUE_COLUMN, top, 95.0, 14.0, 0.5, Color::LIGHT_BLUE),
            _ => frame(canvas, VALUE_COLUMN, top, 60.0, 7.0, 0.5, Color::LIGHT_BLUE),
        }
        if idx == 10 {
            for (line_idx, line) in wrap(&value, NOTE_WRAP_CHARS).iter().enumerate() {
                text(canvas, VALUE_COLUMN + 3.0, row + line_idx as f32 * 4.0, 10.0, false, line);
            }
        } else if !value.is_empty() {
            text(canvas, VALUE_COLUMN + 3.0, row, 10.0, false, &value);
        }
        row += 8.0;
    }

    row += 12.0;
    frame(canvas, LEFT_MARGIN, row, FRAME_WIDTH, 37.0, 1.5, Color::WHITE);
    row += 7.0;
    text(canvas, LEFT_MARGIN_INSIDE, row, 12.0, true, "A2: Processing");
    row += 13.0;
    for label in ["Registered in HOW list:", "Output inspection validity:"] {
        text(canvas, LEFT_MARGIN_INSIDE, row, 10.0, false, label);
        frame(canvas, VALUE_COLUMN, row - 5.0, 60.0, 7.0, 0.5, Color::LIGHT_BLUE);
        row += 8.0;
    }

    row += 5.0;
    frame(canvas, LEFT_MARGIN, row, FRAME_WIDTH, 95.0, 1.5, Color::WHITE);
    row += 7.0;
    text(canvas, LEFT_MARGIN_INSIDE, row, 12.0, true, "B1: Operation blocks record");
    row += 13.0;
    for (step, checked) in header.operations.iter() {
        text(canvas, LEFT_MARGIN_INSIDE, row, 10.0, false, &format!("{}:", step.label()));
        checkbox(canvas, VALUE_COLUMN, row, 4.0, checked);
        row += 6.0;
    }
}

fn draw_results_page(
    canvas: &mut Canvas,
    batch: &Batch,
    pagination: &Pagination,
    page: &PageDescriptor,
) {
    canvas.meta(PAGE_KIND_KEY, "results");
    canvas.meta("band", page.band_label());
    let mut row = TOP_ROW;
    text(canvas, LEFT_MARGIN, row, 20.0, true, TITLE);
    row += 15.0;
    frame(canvas, LEFT_MARGIN, row, FRAME_WIDTH, 253.0, 1.5, Color::WHITE);
    row += 7.0;
    text(
        canvas,
        LEFT_MARGIN + 2.0,
        row,
        12.0,
        true,
        &format!("B2: Test results for units {}", page.band_label()),
    );
    row += 5.0;

    let x_test = LEFT_MARGIN + 2.0;
    let x_unit = x_test + TEST_COLUMN - 10.0;
    let column_x = |offset: u32| x_test + TEST_COLUMN + offset as f32 * (UNIT_COLUMN + COLUMN_SPACING);
    let band_start = page.unit_band_start.number();

    canvas.set_font_name(FONT_BOLD);
    canvas.set_font_size(Pt::from_f32(8.0));
    canvas.set_fill_color(Color::BLACK);
    let label_baseline = row + UNIT_LABEL_HEIGHT - 5.0;
    for unit in page.units() {
        let x = column_x(unit.number() - band_start) + 4.0;
        canvas.draw_string_rotated(mm(x), mm(label_baseline), 90.0, unit.to_string());
    }
    row += UNIT_LABEL_HEIGHT;

    // Row labels use the band's first unit.
    let band_record = batch.unit(page.unit_band_start);
    let mut cells = page_cells(batch, pagination, page).peekable();
    for name in pagination.page_tests(page) {
        text(canvas, x_test, row, 7.0, false, name);
        let uom = band_record
            .and_then(|record| record.test(name))
            .and_then(|test| test.unit_of_measure());
        if let Some(uom) = uom {
            text(canvas, x_unit, row, 7.0, false, &format!("[{uom}]"));
        }
        while let Some((unit, _, cell)) = cells.next_if(|(_, cell_test, _)| *cell_test == name.as_str()) {
            let x = column_x(unit.number() - band_start);
            let fill = if cell.passed {
                Color::LIGHT_GREEN
            } else {
                Color::LIGHT_RED
            };
            frame(canvas, x - 1.0, row - 3.0, UNIT_COLUMN, ROW_HEIGHT - 1.0, 0.3, fill);
            text(canvas, x, row, 6.0, false, &cell.text);
        }
        row += ROW_HEIGHT;
    }
}

/// Replaces `{page}`, `{pages}` and `{protocol}` in a footer template.
pub fn substitute_placeholders(template: &str, page: usize, pages: usize, protocol: &str) -> String {
    template
        .replace("{page}", &page.to_string())
        .replace("{pages}", &pages.to_string())
        .replace("{protocol}", protocol)
}

/// Adds the page counter and protocol number to every page.
pub fn apply_footer(doc: &mut Document, protocol_number: &str) {
    let total_pages = doc.pages.len();
    let size = Pt::from_f32(FOOTER_FONT_SIZE);
    let y = doc.page_size.height - Pt::from_f32(FOOTER_BASELINE) - size;
    for (idx0, page) in doc.pages.iter_mut().enumerate() {
        let page_number = idx0 + 1;
        page.commands.push(Command::SetFillColor(Color::BLACK));
        page.commands
            .push(Command::SetFontName(FONT_REGULAR.to_string()));
        page.commands.push(Command::SetFontSize(size));
        for (x, template) in [
            (FOOTER_PAGE_X, PAGE_NUMBER_TEMPLATE),
            (FOOTER_PROTOCOL_X, PROTOCOL_NUMBER_TEMPLATE),
        ] {
            page.commands.push(Command::DrawString {
                x: Pt::from_f32(x),
                y,
                text: substitute_placeholders(template, page_number, total_pages, protocol_number),
            });
        }
    }
}

/// Header page, then one page per descriptor, then the footer on every page.
pub fn render_protocol(
    header: &ProtocolHeader,
    batch: &Batch,
    pagination: &Pagination,
    page_size: Size,
) -> Document {
    let mut canvas = Canvas::new(page_size);
    draw_header_page(&mut canvas, header, batch);
    for page in pagination.pages() {
        canvas.show_page();
        draw_results_page(&mut canvas, batch, pagination, page);
    }
    let mut doc = canvas.finish();
    apply_footer(&mut doc, &header.protocol_number);
    doc
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::BatchAggregator;
    use crate::disposition::{DispositionTracker, ScriptedDecisions};
    use crate::pagination::paginate;
    use crate::record::ResultValue;
    use crate::unit::{UnitIdentity, UnitRange};
    use crate::validator::ValidationContext;
    use chrono::NaiveDate;
    use mfg_record_contract::{RawRecord, RawTest};
    use std::path::Path;

    fn batch(min: u32, max: u32, failing: u32) -> Batch {
        let range = UnitRange::new(min, max).expect("range");
        let mut ctx = ValidationContext::new();
        let mut tracker = DispositionTracker::new();
        let mut script = ScriptedDecisions::new([true, false]);
        let mut agg = BatchAggregator::new();
        for unit in range.iter() {
            let fails = unit.number() == failing;
            let raw = RawRecord {
                serial_number: unit.number() as u64,
                card_type: "CT-9".to_string(),
                passed: !fails,
                all_tests_done: true,
                user_name: "op".to_string(),
                tests: vec![
                    RawTest {
                        name: "Supply".to_string(),
                        passed: !fails,
                        result: ResultValue::Float(4.987654),
                        report: true,
                        unit: Some("V".to_string()),
                        min: Some(4.5),
                        max: Some(5.5),
                    },
                    RawTest {
                        name: "Relay".to_string(),
                        passed: true,
                        result: ResultValue::Text("closed".to_string()),
                        report: true,
                        unit: None,
                        min: None,
                        max: None,
                    },
                ],
            };
            let record = ctx
                .validate(unit, Path::new("r.json"), raw, &mut tracker, &mut script)
                .expect("valid");
            agg.insert(record, Path::new("r.json")).expect("insert");
        }
        agg.freeze(range, &ctx, tracker).expect("freeze")
    }

    fn header() -> ProtocolHeader {
        ProtocolHeader::new("42")
            .with_worker("J. Doe")
            .with_check_date(NaiveDate::from_ymd_opt(2024, 1, 31).expect("date"))
            .with_note("first article")
    }

    #[test]
    fn header_page_lists_counts_and_range() {
        let batch = batch(1, 12, 3);
        let doc = render_protocol(&header(), &batch, &paginate(&batch), Size::a4());
        let texts: Vec<&str> = doc.pages[0].texts().collect();
        for expected in [
            "V000001 - V000012",
            "CT-9",
            "12",
            "11",
            "31.01.2024",
            "J. Doe",
            "first article",
            "Input check:",
            "Finishing work:",
        ] {
            assert!(texts.contains(&expected), "missing {expected}");
        }
        // Unrepairable count is 1, repairable 0.
        let fields = header_fields(&header(), &batch);
        assert_eq!(fields[4].1, "1");
        assert_eq!(fields[5].1, "0");
    }

    #[test]
    fn results_pages_follow_header_with_footer() {
        let batch = batch(1, 12, 3);
        let pagination = paginate(&batch);
        let doc = render_protocol(&header(), &batch, &pagination, Size::a4());
        assert_eq!(doc.pages.len(), 1 + pagination.page_count());
        assert_eq!(doc.pages.len(), 3);

        let last: Vec<&str> = doc.pages[2].texts().collect();
        assert!(last.contains(&"3/3"));
        assert!(last.contains(&"Protocol number: 42"));
        assert!(last.contains(&"B2: Test results for units V000011 - V000012"));
        assert!(last.contains(&"V000012"));
        assert!(!last.contains(&"V000013"));

        let first: Vec<&str> = doc.pages[1].texts().collect();
        assert!(first.contains(&"[V]"));
        assert!(first.contains(&"4.987"));
        assert!(first.contains(&"PASS"));
    }

    #[test]
    fn failing_cells_are_red() {
        let batch = batch(1, 3, 2);
        let doc = render_protocol(&header(), &batch, &paginate(&batch), Size::a4());
        let commands = &doc.pages[1].commands;
        let red = commands
            .iter()
            .filter(|cmd| **cmd == Command::SetFillColor(Color::LIGHT_RED))
            .count();
        assert_eq!(red, 1);
        let rotated = commands
            .iter()
            .filter(|cmd| matches!(cmd, Command::DrawStringRotated { .. }))
            .count();
        assert_eq!(rotated, 3);
    }

    #[test]
    fn note_wraps_on_word_boundaries() {
        assert_eq!(wrap("aa bb cc", 5), vec!["aa bb", "cc"]);
        assert!(wrap("", 5).is_empty());
        assert_eq!(substitute_placeholders(PAGE_NUMBER_TEMPLATE, 2, 9, "x"), "2/9");
    }

    #[test]
    fn rotated_labels_only_for_band_units() {
        let unit = UnitIdentity::new(3).expect("unit");
        let batch = batch(1, 3, 0);
        let doc = render_protocol(&header(), &batch, &paginate(&batch), Size::a4());
        assert!(doc.pages[1].texts().any(|t| t == unit.to_string()));
    }
}
