//! Writer for canvas documents: one uncompressed content stream per page,
//! base-14 Helvetica faces with WinAnsi encoding.

use crate::canvas::{Command, Document, FONT_BOLD, FONT_REGULAR, Page};
use crate::metrics::{DocumentMetrics, PageMetrics};
use crate::types::{Color, Pt};
use fixed::types::I32F32;
use std::io::{self, Write};
use std::time::Instant;

pub const PRODUCER: &str = "mfg-protocol";

const CATALOG_ID: usize = 1;
const PAGES_ID: usize = 2;
const FONT_REGULAR_ID: usize = 3;
const FONT_BOLD_ID: usize = 4;
const FIRST_PAGE_ID: usize = 5;

fn font_resource(name: &str) -> &'static str {
    if name == FONT_BOLD { "F2" } else { "F1" }
}

pub fn document_to_pdf(document: &Document, title: Option<&str>) -> io::Result<Vec<u8>> {
    document_to_pdf_with_metrics(document, title).map(|(bytes, _)| bytes)
}

pub fn document_to_pdf_with_metrics(
    document: &Document,
    title: Option<&str>,
) -> io::Result<(Vec<u8>, DocumentMetrics)> {
    let mut out = Vec::new();
    let metrics = write_document(&mut out, document, title)?;
    Ok((out, metrics))
}

/// Object layout: catalog, page tree, two fonts, then a page/content pair per
/// page and the info dictionary last.
fn write_document<W: Write>(
    writer: &mut W,
    document: &Document,
    title: Option<&str>,
) -> io::Result<DocumentMetrics> {
    let page_count = document.pages.len();
    let info_id = FIRST_PAGE_ID + page_count * 2;
    let object_count = info_id;
    let mut offsets = vec![0usize; object_count + 1];
    let mut offset = 0usize;
    let mut metrics = DocumentMetrics::default();

    write_bytes(writer, b"%PDF-1.7\n%\xE2\xE3\xCF\xD3\n", &mut offset)?;
    write_pdf_object(
        writer,
        &mut offset,
        &mut offsets,
        CATALOG_ID,
        &format!("<< /Type /Catalog /Pages {} 0 R >>", PAGES_ID),
    )?;
    let kids: Vec<String> = (0..page_count)
        .map(|idx| format!("{} 0 R", FIRST_PAGE_ID + idx * 2))
        .collect();
    write_pdf_object(
        writer,
        &mut offset,
        &mut offsets,
        PAGES_ID,
        &format!(
            "<< /Type /Pages /Kids [{}] /Count {} /MediaBox [0 0 {} {}] >>",
            kids.join(" "),
            page_count,
            fmt_pt(document.page_size.width),
            fmt_pt(document.page_size.height)
        ),
    )?;
    write_pdf_object(writer, &mut offset, &mut offsets, FONT_REGULAR_ID, &font_object(FONT_REGULAR))?;
    write_pdf_object(writer, &mut offset, &mut offsets, FONT_BOLD_ID, &font_object(FONT_BOLD))?;

    for (idx, page) in document.pages.iter().enumerate() {
        let start = Instant::now();
        let page_id = FIRST_PAGE_ID + idx * 2;
        let content_id = page_id + 1;
        let (content, unencodable_chars) = render_page(page, document.page_size.height);
        write_pdf_object(
            writer,
            &mut offset,
            &mut offsets,
            page_id,
            &format!(
                "<< /Type /Page /Parent {} 0 R /Resources << /Font << /F1 {} 0 R /F2 {} 0 R >> >> /Contents {} 0 R >>",
                PAGES_ID, FONT_REGULAR_ID, FONT_BOLD_ID, content_id
            ),
        )?;
        write_pdf_object(writer, &mut offset, &mut offsets, content_id, &stream_object(&content))?;
        let render_ms = start.elapsed().as_secs_f64() * 1000.0;
        metrics.total_render_ms += render_ms;
        metrics.pages.push(PageMetrics {
            page_number: idx + 1,
            render_ms,
            command_count: page.commands.len(),
            text_count: page.texts().count(),
            content_bytes: content.len(),
            unencodable_chars,
        });
    }
    write_pdf_object(writer, &mut offset, &mut offsets, info_id, &info_object(title))?;

    let xref_start = offset;
    write_str(writer, &format!("xref\n0 {}\n", object_count + 1), &mut offset)?;
    write_str(writer, "0000000000 65535 f \n", &mut offset)?;
    for obj_offset in offsets.iter().skip(1) {
        write_str(writer, &format!("{:010} 00000 n \n", obj_offset), &mut offset)?;
    }
    write_str(
        writer,
        &format!(
            "trailer\n<< /Size {} /Root {} 0 R /Info {} 0 R >>\nstartxref\n{}\n%%EOF",
            object_count + 1,
            CATALOG_ID,
            info_id,
            xref_start
        ),
        &mut offset,
    )?;
    metrics.total_bytes = offset;
    Ok(metrics)
}

/// Content stream text and the number of characters that had no WinAnsi code.
fn render_page(page: &Page, page_height: Pt) -> (String, usize) {
    let mut out = String::new();
    let mut replaced = 0usize;
    let mut current_font_size = Pt::from_f32(12.0);
    let mut current_font_name = FONT_REGULAR.to_string();

    for cmd in &page.commands {
        match cmd {
            Command::SaveState => out.push_str("q\n"),
            Command::RestoreState => out.push_str("Q\n"),
            Command::Meta { .. } => {}
            Command::SetFillColor(color) => out.push_str(&color_to_pdf_fill(*color)),
            Command::SetStrokeColor(color) => out.push_str(&color_to_pdf_stroke(*color)),
            Command::SetLineWidth(width) => {
                out.push_str(&format!("{} w\n", fmt_pt(*width)));
            }
            Command::SetFontName(name) => {
                current_font_name = name.clone();
            }
            Command::SetFontSize(size) => {
                current_font_size = *size;
            }
            Command::MoveTo { x, y } => {
                out.push_str(&format!("{} {} m\n", fmt_pt(*x), fmt_pt(page_height - *y)));
            }
            Command::LineTo { x, y } => {
                out.push_str(&format!("{} {} l\n", fmt_pt(*x), fmt_pt(page_height - *y)));
            }
            Command::ClosePath => out.push_str("h\n"),
            Command::Stroke => out.push_str("S\n"),
            Command::DrawString { x, y, text } => {
                out.push_str("BT\n");
                out.push_str(&format!(
                    "/{} {} Tf\n",
                    font_resource(&current_font_name),
                    fmt_pt(current_font_size)
                ));
                out.push_str(&format!(
                    "{} {} Td\n",
                    fmt_pt(*x),
                    fmt_pt(page_height - *y - current_font_size)
                ));
                let encoded = encode_winansi_pdf_string(text);
                replaced += encoded.replaced;
                out.push_str(&format!("({}) Tj\n", encoded.text));
                out.push_str("ET\n");
            }
            Command::DrawStringRotated {
                x,
                y,
                angle_degrees,
                text,
            } => {
                let angle = angle_degrees.to_radians();
                let sin = libm::sinf(angle);
                let cos = libm::cosf(angle);
                out.push_str("BT\n");
                out.push_str(&format!(
                    "/{} {} Tf\n",
                    font_resource(&current_font_name),
                    fmt_pt(current_font_size)
                ));
                out.push_str(&format!(
                    "{} {} {} {} {} {} Tm\n",
                    fmt(cos),
                    fmt(sin),
                    fmt(-sin),
                    fmt(cos),
                    fmt_pt(*x),
                    fmt_pt(page_height - *y)
                ));
                let encoded = encode_winansi_pdf_string(text);
                replaced += encoded.replaced;
                out.push_str(&format!("({}) Tj\n", encoded.text));
                out.push_str("ET\n");
            }
            Command::FillRect {
                x,
                y,
                width,
                height,
            } => {
                out.push_str(&format!(
                    "{} {} {} {} re\nf\n",
                    fmt_pt(*x),
                    fmt_pt(page_height - *y - *height),
                    fmt_pt(*width),
                    fmt_pt(*height)
                ));
            }
            Command::StrokeRect {
                x,
                y,
                width,
                height,
            } => {
                out.push_str(&format!(
                    "{} {} {} {} re\nS\n",
                    fmt_pt(*x),
                    fmt_pt(page_height - *y - *height),
                    fmt_pt(*width),
                    fmt_pt(*height)
                ));
            }
        }
    }

    (out, replaced)
}

fn font_object(name: &str) -> String {
    format!(
        "<< /Type /Font /Subtype /Type1 /BaseFont /{} /Encoding /WinAnsiEncoding >>",
        name
    )
}

fn stream_object(content: &str) -> String {
    let length = content.len();
    format!("<< /Length {} >>\nstream\n{}\nendstream", length, content)
}

fn info_object(title: Option<&str>) -> String {
    let mut entries: Vec<String> = Vec::new();
    if let Some(title) = title {
        entries.push(format!("/Title ({})", encode_winansi_pdf_string(title).text));
    }
    entries.push(format!("/Producer ({})", PRODUCER));
    format!("<< {} >>", entries.join(" "))
}

fn write_pdf_object<W: Write>(
    writer: &mut W,
    offset: &mut usize,
    offsets: &mut [usize],
    obj_id: usize,
    body: &str,
) -> io::Result<()> {
    if let Some(slot) = offsets.get_mut(obj_id) {
        *slot = *offset;
    }
    write_str(writer, &format!("{} 0 obj\n", obj_id), offset)?;
    write_bytes(writer, body.as_bytes(), offset)?;
    write_bytes(writer, b"\nendobj\n", offset)?;
    Ok(())
}

fn write_bytes<W: Write>(writer: &mut W, data: &[u8], offset: &mut usize) -> io::Result<()> {
    writer.write_all(data)?;
    *offset += data.len();
    Ok(())
}

fn write_str<W: Write>(writer: &mut W, data: &str, offset: &mut usize) -> io::Result<()> {
    write_bytes(writer, data.as_bytes(), offset)
}

pub(crate) struct WinAnsiEncoded {
    pub(crate) text: String,
    pub(crate) replaced: usize,
}

/// Escaped PDF literal-string body. Characters outside WinAnsi become `?`.
pub(crate) fn encode_winansi_pdf_string(input: &str) -> WinAnsiEncoded {
    let mut out = String::new();
    let mut replaced = 0usize;
    for ch in input.chars() {
        let byte = match ch {
            '\u{0000}'..='\u{007F}' => ch as u8,
            '\u{00A0}'..='\u{00FF}' => ch as u8,
            // cp1252 additions
            '\u{20AC}' => 0x80,
            '\u{201A}' => 0x82,
            '\u{0192}' => 0x83,
            '\u{201E}' => 0x84,
            '\u{2026}' => 0x85,
            '\u{2020}' => 0x86,
            '\u{2021}' => 0x87,
            '\u{02C6}' => 0x88,
            '\u{2030}' => 0x89,
            '\u{0160}' => 0x8A,
            '\u{2039}' => 0x8B,
            '\u{0152}' => 0x8C,
            '\u{017D}' => 0x8E,
            '\u{2018}' => 0x91,
            '\u{2019}' => 0x92,
            '\u{201C}' => 0x93,
            '\u{201D}' => 0x94,
            '\u{2022}' => 0x95,
            '\u{2013}' => 0x96,
            '\u{2014}' => 0x97,
            '\u{02DC}' => 0x98,
            '\u{2122}' => 0x99,
            '\u{0161}' => 0x9A,
            '\u{203A}' => 0x9B,
            '\u{0153}' => 0x9C,
            '\u{017E}' => 0x9E,
            '\u{0178}' => 0x9F,
            _ => {
                replaced += 1;
                b'?'
            }
        };

        match byte {
            b'\\' => out.push_str("\\\\"),
            b'(' => out.push_str("\\("),
            b')' => out.push_str("\\)"),
            b'\n' => out.push_str("\\n"),
            b'\r' => out.push_str("\\r"),
            b if b < 0x20 || b >= 0x7f => out.push_str(&format!("\\{:03o}", b)),
            b => out.push(b as char),
        }
    }

    WinAnsiEncoded {
        text: out,
        replaced,
    }
}

fn fmt(value: f32) -> String {
    if !value.is_finite() {
        return "0".to_string();
    }
    let fixed = I32F32::from_num(value);
    let scaled = (fixed * I32F32::from_num(1000)).round();
    let milli: i64 = scaled.to_num();
    format_milli(milli)
}

fn format_milli(milli: i64) -> String {
    if milli == 0 {
        return "0".to_string();
    }
    let sign = if milli < 0 { "-" } else { "" };
    let abs = milli.abs();
    let int_part = abs / 1000;
    let frac_part = abs % 1000;
    if frac_part == 0 {
        format!("{}{}", sign, int_part)
    } else {
        let mut s = format!("{}{}.{:03}", sign, int_part, frac_part);
        while s.ends_with('0') {
            s.pop();
        }
        s
    }
}

fn fmt_pt(value: Pt) -> String {
    format_milli(value.to_milli_i64())
}

fn clamp_unit(value: f32) -> f32 {
    if value.is_nan() { 0.0 } else { value.clamp(0.0, 1.0) }
}

fn color_to_pdf_fill(color: Color) -> String {
    format!(
        "{} {} {} rg\n",
        fmt(clamp_unit(color.r)),
        fmt(clamp_unit(color.g)),
        fmt(clamp_unit(color.b))
    )
}

fn color_to_pdf_stroke(color: Color) -> String {
    format!(
        "{} {} {} RG\n",
        fmt(clamp_unit(color.r)),
        fmt(clamp_unit(color.g)),
        fmt(clamp_unit(color.b))
    )
}
