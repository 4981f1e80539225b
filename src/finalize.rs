//! Post-processing of the written protocol: disposition notes on the header
//! page and the source records embedded as file attachments.

use crate::batch::Batch;
use crate::error::ProtocolError;
use crate::types::Color;
use crate::unit::UnitIdentity;
use lopdf::{Document as LoDocument, Object as LoObject, ObjectId as LoObjectId, Stream as LoStream, dictionary};
use mfg_record_contract::{CONTRACT_ID, CONTRACT_VERSION, contract_fingerprint_sha256, sha256_hex};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub const UNREPAIRABLE_NOTE_TITLE: &str = "Unrepairable rejects";
pub const REPAIRABLE_NOTE_TITLE: &str = "Repairable rejects";
pub const CONTRACT_INFO_KEY: &str = "MfgRecordContract";

// Note anchors in points from the bottom-left corner of page 1.
const UNREPAIRABLE_NOTE_AT: (i64, i64) = (525, 607);
const REPAIRABLE_NOTE_AT: (i64, i64) = (525, 584);
const NOTE_ICON_SIZE: i64 = 20;
const NOTE_YELLOW: Color = Color::NOTE_YELLOW;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentRecord {
    pub name: String,
    pub path: PathBuf,
    pub sha256: String,
    pub size: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FinalizeSummary {
    pub annotations: usize,
    pub attachments: Vec<AttachmentRecord>,
}

/// `Protocol_<number>_<card type>.pdf`, with path separators replaced.
pub fn protocol_file_name(protocol_number: &str, card_type: &str) -> String {
    let clean = |value: &str| -> String {
        value
            .chars()
            .map(|ch| if matches!(ch, '/' | '\\' | ':') { '_' } else { ch })
            .collect()
    };
    format!("Protocol_{}_{}.pdf", clean(protocol_number), clean(card_type))
}

fn note_text(title: &str, units: &[UnitIdentity]) -> String {
    let mut text = format!("{title}:");
    for unit in units {
        text.push('\n');
        text.push_str(&unit.to_string());
    }
    text
}

fn text_annotation(title: &str, units: &[UnitIdentity], at: (i64, i64)) -> lopdf::Dictionary {
    let (x, y) = at;
    dictionary! {
        "Type" => "Annot",
        "Subtype" => "Text",
        "F" => 4,
        "T" => LoObject::string_literal(title),
        "Contents" => LoObject::string_literal(note_text(title, units)),
        "Rect" => vec![x.into(), y.into(), (x + NOTE_ICON_SIZE).into(), (y + NOTE_ICON_SIZE).into()],
        "C" => vec![
            LoObject::Real(NOTE_YELLOW.r),
            LoObject::Real(NOTE_YELLOW.g),
            LoObject::Real(NOTE_YELLOW.b),
        ],
        "Open" => true,
    }
}

fn first_page_id(doc: &LoDocument) -> Result<LoObjectId, ProtocolError> {
    doc.get_pages()
        .get(&1)
        .copied()
        .ok_or_else(|| ProtocolError::Pdf("document has no pages".to_string()))
}

fn add_disposition_notes(doc: &mut LoDocument, batch: &Batch) -> Result<usize, ProtocolError> {
    let page_id = first_page_id(doc)?;
    let mut refs: Vec<LoObject> = Vec::new();
    for (title, units, at) in [
        (UNREPAIRABLE_NOTE_TITLE, batch.unrepairable_units(), UNREPAIRABLE_NOTE_AT),
        (REPAIRABLE_NOTE_TITLE, batch.repairable_units(), REPAIRABLE_NOTE_AT),
    ] {
        if units.is_empty() {
            continue;
        }
        let id = doc.add_object(text_annotation(title, units, at));
        refs.push(LoObject::Reference(id));
    }
    if refs.is_empty() {
        return Ok(0);
    }
    let added = refs.len();
    let page = doc
        .get_object_mut(page_id)
        .and_then(LoObject::as_dict_mut)?;
    let mut annots = page
        .get(b"Annots")
        .and_then(LoObject::as_array)
        .cloned()
        .unwrap_or_default();
    annots.extend(refs);
    page.set("Annots", annots);
    Ok(added)
}

fn attachment_name(path: &Path, taken: &BTreeMap<String, LoObject>) -> String {
    let base = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    if !taken.contains_key(&base) {
        return base;
    }
    let mut n = 2;
    loop {
        let candidate = format!("{base} ({n})");
        if !taken.contains_key(&candidate) {
            return candidate;
        }
        n += 1;
    }
}

fn catalog_id(doc: &LoDocument) -> Result<LoObjectId, ProtocolError> {
    Ok(doc.trailer.get(b"Root").and_then(LoObject::as_reference)?)
}

fn embed_sources(
    doc: &mut LoDocument,
    sources: &[PathBuf],
) -> Result<Vec<AttachmentRecord>, ProtocolError> {
    // Name tree entries must be sorted by key.
    let mut entries: BTreeMap<String, LoObject> = BTreeMap::new();
    let mut records = Vec::with_capacity(sources.len());
    for path in sources {
        let bytes = std::fs::read(path)?;
        let sha256 = sha256_hex(&bytes);
        let size = bytes.len();
        let name = attachment_name(path, &entries);
        let file_id = doc.add_object(LoStream::new(
            dictionary! {
                "Type" => "EmbeddedFile",
                "Params" => dictionary! { "Size" => size as i64 },
            },
            bytes,
        ));
        let spec_id = doc.add_object(dictionary! {
            "Type" => "Filespec",
            "F" => LoObject::string_literal(name.as_str()),
            "UF" => LoObject::string_literal(name.as_str()),
            "Desc" => LoObject::string_literal(format!("SHA-256 {sha256}")),
            "EF" => dictionary! { "F" => file_id },
        });
        entries.insert(name.clone(), LoObject::Reference(spec_id));
        records.push(AttachmentRecord {
            name,
            path: path.clone(),
            sha256,
            size,
        });
    }
    if entries.is_empty() {
        return Ok(records);
    }

    let mut names: Vec<LoObject> = Vec::with_capacity(entries.len() * 2);
    for (name, spec) in entries {
        names.push(LoObject::string_literal(name));
        names.push(spec);
    }
    let root_id = catalog_id(doc)?;
    let catalog = doc
        .get_object_mut(root_id)
        .and_then(LoObject::as_dict_mut)?;
    catalog.set(
        "Names",
        dictionary! {
            "EmbeddedFiles" => dictionary! { "Names" => names },
        },
    );
    Ok(records)
}

fn stamp_contract(doc: &mut LoDocument) -> Result<(), ProtocolError> {
    let value = LoObject::string_literal(format!(
        "{} v{} sha256:{}",
        CONTRACT_ID,
        CONTRACT_VERSION,
        contract_fingerprint_sha256()
    ));
    match doc.trailer.get(b"Info").and_then(LoObject::as_reference) {
        Ok(info_id) => {
            let info = doc.get_object_mut(info_id).and_then(LoObject::as_dict_mut)?;
            info.set(CONTRACT_INFO_KEY, value);
        }
        Err(_) => {
            let info_id = doc.add_object(dictionary! { CONTRACT_INFO_KEY => value });
            doc.trailer.set("Info", info_id);
        }
    }
    Ok(())
}

/// Loads the written protocol, adds the disposition notes, stamps the record
/// contract and, when `attach_sources` is set, embeds every source record.
/// The result is saved to `out_path`.
pub fn finalize_protocol(
    pdf: &[u8],
    out_path: &Path,
    batch: &Batch,
    attach_sources: bool,
) -> Result<FinalizeSummary, ProtocolError> {
    let mut doc = LoDocument::load_mem(pdf)?;
    if doc.is_encrypted() {
        return Err(ProtocolError::Pdf("protocol PDF is encrypted".to_string()));
    }
    let annotations = add_disposition_notes(&mut doc, batch)?;
    let attachments = if attach_sources {
        embed_sources(&mut doc, batch.source_paths())?
    } else {
        Vec::new()
    };
    stamp_contract(&mut doc)?;
    doc.compress();
    doc.save(out_path)?;
    Ok(FinalizeSummary {
        annotations,
        attachments,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disposition::ScriptedDecisions;
    use crate::header::ProtocolHeader;
    use crate::layout::render_protocol;
    use crate::pagination::paginate;
    use crate::pdf::document_to_pdf;
    use crate::process::fixtures::{record_name, temp_root, write_record};
    use crate::process::process_batch;
    use crate::types::Size;
    use crate::unit::UnitRange;

    fn string_bytes(obj: &LoObject) -> Vec<u8> {
        match obj {
            LoObject::String(bytes, _) => bytes.clone(),
            other => panic!("not a string: {other:?}"),
        }
    }

    fn protocol(root: &Path, answers: Vec<bool>) -> (Batch, Vec<u8>) {
        let range = UnitRange::new(1, 4).expect("range");
        let mut script = ScriptedDecisions::new(answers);
        let batch = process_batch(root, range, &mut script).expect("batch");
        let pagination = paginate(&batch);
        let doc = render_protocol(&ProtocolHeader::new("7"), &batch, &pagination, Size::a4());
        let bytes = document_to_pdf(&doc, Some("Protocol 7")).expect("pdf");
        (batch, bytes)
    }

    fn write_batch(root: &Path) {
        for sn in 1..=4 {
            let passed = sn % 2 == 1;
            write_record(
                &root.join("records").join(record_name(sn, "20240301_120000")),
                sn,
                "CT",
                passed,
                &[("Voltage", passed, "5", true)],
            );
        }
    }

    #[test]
    fn file_name_combines_number_and_card_type() {
        assert_eq!(protocol_file_name("12", "CT-5"), "Protocol_12_CT-5.pdf");
        assert_eq!(protocol_file_name("1/2", "A\\B"), "Protocol_1_2_A_B.pdf");
    }

    #[test]
    fn notes_and_attachments_are_added() {
        let root = temp_root("finalize");
        write_batch(&root);
        // Unit 2: repairable. Unit 4: unrepairable.
        let (batch, bytes) = protocol(&root, vec![true, true, true, false]);
        let out = root.join(protocol_file_name("7", batch.card_type()));
        let summary = finalize_protocol(&bytes, &out, &batch, true).expect("finalize");
        assert_eq!(summary.annotations, 2);
        assert_eq!(summary.attachments.len(), 4);

        let doc = LoDocument::load(&out).expect("load");
        let page_id = *doc.get_pages().get(&1).expect("page 1");
        let page = doc.get_object(page_id).and_then(LoObject::as_dict).expect("page");
        let annots = page.get(b"Annots").and_then(LoObject::as_array).expect("annots");
        assert_eq!(annots.len(), 2);
        let first = annots[0]
            .as_reference()
            .and_then(|id| doc.get_object(id))
            .and_then(LoObject::as_dict)
            .expect("annot");
        assert_eq!(
            string_bytes(first.get(b"Contents").expect("contents")),
            b"Unrepairable rejects:\nV000004".to_vec()
        );

        let catalog_id = doc.trailer.get(b"Root").and_then(LoObject::as_reference).expect("root");
        let catalog = doc.get_object(catalog_id).and_then(LoObject::as_dict).expect("catalog");
        let names = catalog
            .get(b"Names")
            .and_then(LoObject::as_dict)
            .and_then(|d| d.get(b"EmbeddedFiles"))
            .and_then(LoObject::as_dict)
            .and_then(|d| d.get(b"Names"))
            .and_then(LoObject::as_array)
            .expect("embedded files");
        assert_eq!(names.len(), 8);
        assert_eq!(string_bytes(&names[0]), record_name(1, "20240301_120000").into_bytes());
        let spec = names[1]
            .as_reference()
            .and_then(|id| doc.get_object(id))
            .and_then(LoObject::as_dict)
            .expect("filespec");
        let source = std::fs::read(&batch.source_paths()[0]).expect("source");
        let desc = String::from_utf8(string_bytes(spec.get(b"Desc").expect("desc"))).expect("utf8");
        assert_eq!(desc, format!("SHA-256 {}", sha256_hex(&source)));
    }

    #[test]
    fn clean_batch_gets_no_notes_and_optional_attachments() {
        let root = temp_root("finalize_clean");
        for sn in 1..=4 {
            write_record(
                &root.join(record_name(sn, "20240301_120000")),
                sn,
                "CT",
                true,
                &[("Voltage", true, "5", true)],
            );
        }
        let (batch, bytes) = protocol(&root, Vec::new());
        let out = root.join("out.pdf");
        let summary = finalize_protocol(&bytes, &out, &batch, false).expect("finalize");
        assert_eq!(summary, FinalizeSummary::default());

        let doc = LoDocument::load(&out).expect("load");
        let info_id = doc.trailer.get(b"Info").and_then(LoObject::as_reference).expect("info");
        let info = doc.get_object(info_id).and_then(LoObject::as_dict).expect("info dict");
        let stamp = String::from_utf8(string_bytes(info.get(CONTRACT_INFO_KEY.as_bytes()).expect("stamp")))
            .expect("utf8");
        assert!(stamp.starts_with("mfg.record_contract v1 sha256:"));
    }
}
