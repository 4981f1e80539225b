mod batch;
mod canvas;
mod debug;
mod disposition;
mod error;
mod finalize;
mod header;
mod layout;
mod metrics;
mod pagination;
mod pdf;
mod perf;
mod process;
mod record;
mod scanner;
mod types;
mod unit;
mod validator;

pub use batch::{Batch, BatchAggregator};
pub use canvas::{Canvas, Command, Document, Page};
use debug::{DebugLogger, Field};
pub use disposition::{
    ConsoleDecisions, DecisionSource, Disposition, DispositionTracker, ScriptedDecisions,
    classify_prompt, continue_prompt,
};
pub use error::ProtocolError;
pub use finalize::{AttachmentRecord, FinalizeSummary, finalize_protocol, protocol_file_name};
pub use header::{OperationChecklist, OperationStep, ProtocolHeader};
pub use layout::{apply_footer, header_fields, render_protocol, substitute_placeholders};
pub use metrics::{DocumentMetrics, PageMetrics};
pub use pagination::{
    CellValue, PageDescriptor, Pagination, cell_display, page_cells, paginate, reportable_tests,
};
pub use pdf::{document_to_pdf, document_to_pdf_with_metrics};
use perf::{PerfLogger, timed};
pub use process::process_batch;
pub use record::{ResultValue, TestResult, UnitRecord};
pub use scanner::{RecordRevision, RevisionIndex, parse_record_file_name, scan_latest_revisions};
pub use types::{Color, Pt, Size};
pub use unit::{UnitIdentity, UnitRange};
pub use validator::ValidationContext;

use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Runs one batch from the records directory to a finalized protocol PDF.
pub struct ProtocolGenerator {
    records_root: PathBuf,
    range: UnitRange,
    header: ProtocolHeader,
    page_size: Size,
    attach_sources: bool,
    debug: Option<Arc<DebugLogger>>,
    perf: Option<Arc<PerfLogger>>,
}

#[derive(Clone)]
pub struct ProtocolGeneratorBuilder {
    records_root: Option<PathBuf>,
    unit_range: Option<(u32, u32)>,
    header: Option<ProtocolHeader>,
    page_size: Size,
    attach_sources: bool,
    debug_path: Option<PathBuf>,
    perf_path: Option<PathBuf>,
}

/// Everything a run produced. The batch keeps the disposition lists and the
/// source paths that were attached.
#[derive(Debug, Clone)]
pub struct ProtocolOutput {
    pub path: PathBuf,
    pub batch: Batch,
    pub pagination: Pagination,
    pub metrics: DocumentMetrics,
    pub finalize: FinalizeSummary,
}

impl ProtocolOutput {
    pub fn repairable_units(&self) -> &[UnitIdentity] {
        self.batch.repairable_units()
    }

    pub fn unrepairable_units(&self) -> &[UnitIdentity] {
        self.batch.unrepairable_units()
    }

    pub fn source_paths(&self) -> &[PathBuf] {
        self.batch.source_paths()
    }
}

impl ProtocolGenerator {
    pub fn builder() -> ProtocolGeneratorBuilder {
        ProtocolGeneratorBuilder::new()
    }

    pub fn header(&self) -> &ProtocolHeader {
        &self.header
    }

    pub fn unit_range(&self) -> UnitRange {
        self.range
    }

    fn emit_debug_summary(&self, context: &str) {
        if let Some(logger) = self.debug.as_deref() {
            logger.emit_summary(context);
            logger.flush();
        }
        if let Some(perf) = self.perf.as_deref() {
            perf.flush();
        }
    }

    /// Scans, validates and aggregates the configured range.
    pub fn process(&self, decisions: &mut dyn DecisionSource) -> Result<Batch, ProtocolError> {
        let result = process::process_batch_with(
            &self.records_root,
            self.range,
            decisions,
            self.debug.as_deref(),
            self.perf.as_deref(),
        );
        self.emit_debug_summary("process");
        result
    }

    /// Full run: process, paginate, render, write and finalize into
    /// `output_dir/Protocol_<number>_<card type>.pdf`.
    pub fn generate(
        &self,
        decisions: &mut dyn DecisionSource,
        output_dir: &Path,
    ) -> Result<ProtocolOutput, ProtocolError> {
        let result = self.generate_inner(decisions, output_dir);
        if let (Err(err), Some(logger)) = (&result, self.debug.as_deref()) {
            logger.event(
                "generate.failed",
                &[
                    ("error", Field::Str(&err.to_string())),
                    ("operator_abort", Field::Bool(err.is_operator_abort())),
                ],
            );
        }
        self.emit_debug_summary("generate");
        result
    }

    fn generate_inner(
        &self,
        decisions: &mut dyn DecisionSource,
        output_dir: &Path,
    ) -> Result<ProtocolOutput, ProtocolError> {
        let debug = self.debug.as_deref();
        let perf = self.perf.as_deref();

        let batch =
            process::process_batch_with(&self.records_root, self.range, decisions, debug, perf)?;

        let pagination = timed(perf, "paginate", || paginate(&batch));
        if let Some(logger) = debug {
            logger.increment("paginate.pages", pagination.page_count() as u64);
            let unit_bands = pagination
                .pages()
                .iter()
                .map(|page| page.unit_band_start)
                .collect::<std::collections::BTreeSet<_>>()
                .len();
            logger.event(
                "paginate.summary",
                &[
                    ("pages", Field::Num(pagination.page_count() as u64)),
                    ("unit_bands", Field::Num(unit_bands as u64)),
                    (
                        "reportable_tests",
                        Field::Num(pagination.reportable_tests().len() as u64),
                    ),
                ],
            );
        }

        let document = timed(perf, "render", || {
            render_protocol(&self.header, &batch, &pagination, self.page_size)
        });
        let title = format!("Protocol {}", self.header.protocol_number);
        let (bytes, metrics) = timed(perf, "pdf", || {
            document_to_pdf_with_metrics(&document, Some(&title))
        })?;
        if let Some(logger) = debug {
            for page in &metrics.pages {
                logger.event(
                    "render.page",
                    &[
                        ("page", Field::Num(page.page_number as u64)),
                        ("commands", Field::Num(page.command_count as u64)),
                        ("texts", Field::Num(page.text_count as u64)),
                        ("content_bytes", Field::Num(page.content_bytes as u64)),
                        ("unencodable_chars", Field::Num(page.unencodable_chars as u64)),
                    ],
                );
            }
        }

        std::fs::create_dir_all(output_dir)?;
        let path = output_dir.join(protocol_file_name(
            &self.header.protocol_number,
            batch.card_type(),
        ));
        let finalize = timed(perf, "finalize", || {
            finalize_protocol(&bytes, &path, &batch, self.attach_sources)
        })?;
        if let Some(logger) = debug {
            logger.event(
                "finalize.annotations",
                &[("count", Field::Num(finalize.annotations as u64))],
            );
            for attachment in &finalize.attachments {
                logger.event(
                    "finalize.attachment",
                    &[
                        ("name", Field::Str(&attachment.name)),
                        ("sha256", Field::Str(&attachment.sha256)),
                        ("bytes", Field::Num(attachment.size as u64)),
                    ],
                );
            }
            logger.event(
                "finalize.saved",
                &[("path", Field::Str(&path.display().to_string()))],
            );
        }

        Ok(ProtocolOutput {
            path,
            batch,
            pagination,
            metrics,
            finalize,
        })
    }
}

impl Default for ProtocolGeneratorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ProtocolGeneratorBuilder {
    pub fn new() -> Self {
        Self {
            records_root: None,
            unit_range: None,
            header: None,
            page_size: Size::a4(),
            attach_sources: true,
            debug_path: None,
            perf_path: None,
        }
    }

    pub fn records_root(mut self, path: impl Into<PathBuf>) -> Self {
        self.records_root = Some(path.into());
        self
    }

    pub fn unit_range(mut self, min: u32, max: u32) -> Self {
        self.unit_range = Some((min, max));
        self
    }

    pub fn header(mut self, header: ProtocolHeader) -> Self {
        self.header = Some(header);
        self
    }

    pub fn page_size(mut self, size: Size) -> Self {
        self.page_size = size;
        self
    }

    pub fn attach_sources(mut self, enabled: bool) -> Self {
        self.attach_sources = enabled;
        self
    }

    pub fn debug_log(mut self, path: impl Into<PathBuf>) -> Self {
        self.debug_path = Some(path.into());
        self
    }

    pub fn perf_log(mut self, path: impl Into<PathBuf>) -> Self {
        self.perf_path = Some(path.into());
        self
    }

    pub fn build(self) -> Result<ProtocolGenerator, ProtocolError> {
        let records_root = self.records_root.ok_or_else(|| {
            ProtocolError::InvalidConfiguration("records_root is required".to_string())
        })?;
        let (min, max) = self.unit_range.ok_or_else(|| {
            ProtocolError::InvalidConfiguration("unit_range is required".to_string())
        })?;
        let range = UnitRange::new(min, max)?;
        let header = self.header.ok_or_else(|| {
            ProtocolError::InvalidConfiguration("header is required".to_string())
        })?;
        if header.protocol_number.trim().is_empty() {
            return Err(ProtocolError::InvalidConfiguration(
                "protocol number must not be empty".to_string(),
            ));
        }
        let debug = if let Some(path) = self.debug_path {
            Some(Arc::new(DebugLogger::new(path)?))
        } else {
            None
        };
        let perf = if let Some(path) = self.perf_path {
            Some(Arc::new(PerfLogger::new(path)?))
        } else {
            None
        };
        Ok(ProtocolGenerator {
            records_root,
            range,
            header,
            page_size: self.page_size,
            attach_sources: self.attach_sources,
            debug,
            perf,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::fixtures::{record_name, temp_root, write_record};
    use lopdf::Document as LoDocument;

    fn header() -> ProtocolHeader {
        ProtocolHeader::new("42").with_worker("Novak")
    }

    #[test]
    fn build_requires_root_range_and_header() {
        let err = ProtocolGenerator::builder()
            .unit_range(1, 2)
            .header(header())
            .build()
            .err()
            .expect("missing root");
        assert!(matches!(err, ProtocolError::InvalidConfiguration(_)));

        let err = ProtocolGenerator::builder()
            .records_root("/tmp")
            .unit_range(5, 2)
            .header(header())
            .build()
            .err()
            .expect("inverted range");
        assert!(matches!(err, ProtocolError::InvalidConfiguration(_)));

        let err = ProtocolGenerator::builder()
            .records_root("/tmp")
            .unit_range(1, 2)
            .header(ProtocolHeader::new("  "))
            .build()
            .err()
            .expect("blank number");
        assert!(matches!(err, ProtocolError::InvalidConfiguration(_)));
    }

    #[test]
    fn generate_writes_named_protocol_with_logs() {
        let root = temp_root("generate");
        let records = root.join("records");
        for sn in 1..=12 {
            let passed = sn != 3;
            write_record(
                &records.join(record_name(sn, "20240301_080000")),
                sn,
                "CT-7",
                passed,
                &[("Supply", passed, "4.98765", true), ("Id", true, "\"ok\"", false)],
            );
        }
        let out_dir = root.join("out");
        let debug_path = root.join("debug.jsonl");
        let generator = ProtocolGenerator::builder()
            .records_root(&records)
            .unit_range(1, 12)
            .header(header())
            .debug_log(&debug_path)
            .perf_log(root.join("perf.log"))
            .build()
            .expect("build");
        let mut script = ScriptedDecisions::new([true, false]);
        let output = generator.generate(&mut script, &out_dir).expect("generate");

        assert_eq!(output.path, out_dir.join("Protocol_42_CT-7.pdf"));
        assert_eq!(output.unrepairable_units(), &[UnitIdentity::new(3).expect("unit")]);
        assert!(output.repairable_units().is_empty());
        assert_eq!(output.source_paths().len(), 12);
        assert_eq!(output.finalize.attachments.len(), 12);
        // Two unit bands of a single test band each, plus the header page.
        assert_eq!(output.pagination.page_count(), 2);
        assert_eq!(output.metrics.pages.len(), 3);

        let doc = LoDocument::load(&output.path).expect("load");
        assert_eq!(doc.get_pages().len(), 3);

        drop(generator);
        let log = std::fs::read_to_string(&debug_path).expect("debug log");
        assert!(log.contains("\"type\":\"paginate.summary\",\"pages\":2,\"unit_bands\":2"));
        assert!(log.contains("\"type\":\"finalize.saved\""));
        assert_eq!(log.matches("\"type\":\"render.page\"").count(), 3);
        // One summary per run, covering scan and validation as well.
        let summaries: Vec<&str> = log
            .lines()
            .filter(|l| l.contains("\"type\":\"debug.summary\""))
            .collect();
        assert_eq!(summaries.len(), 1);
        assert!(summaries[0].contains("\"context\":\"generate\""));
        assert!(summaries[0].contains("\"scan.summary\":1"));
        assert!(summaries[0].contains("\"validate.unit\":12"));
        assert!(summaries[0].contains("\"batch.frozen\":1"));
    }

    #[test]
    fn aborted_run_writes_nothing() {
        let root = temp_root("generate_abort");
        write_record(
            &root.join(record_name(1, "20240301_080000")),
            1,
            "CT",
            false,
            &[("Supply", false, "1", true)],
        );
        let generator = ProtocolGenerator::builder()
            .records_root(&root)
            .unit_range(1, 1)
            .header(header())
            .build()
            .expect("build");
        let out_dir = root.join("out");
        let err = generator
            .generate(&mut ScriptedDecisions::new([false]), &out_dir)
            .err()
            .expect("abort");
        assert!(err.is_operator_abort());
        assert!(!out_dir.exists());
    }
}
