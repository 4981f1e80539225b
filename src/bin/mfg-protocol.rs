//! `mfg-protocol`: builds the production protocol PDF for one batch of units.

use clap::Parser;
use mfg_protocol::{
    ConsoleDecisions, OperationChecklist, ProtocolGenerator, ProtocolHeader, ProtocolOutput,
};
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

/// Production protocol generator.
#[derive(Parser, Debug)]
#[command(name = "mfg-protocol", version, about = "Aggregate unit test records into a production protocol PDF")]
struct Cli {
    /// Directory searched recursively for `V######_YYYYMMDD_HHMMSS*.json` records.
    #[arg(long)]
    records: PathBuf,

    /// First unit number of the batch.
    #[arg(long)]
    min: u32,

    /// Last unit number of the batch (inclusive).
    #[arg(long)]
    max: u32,

    #[arg(long = "protocol-number")]
    protocol_number: String,

    #[arg(long)]
    worker: Option<String>,

    /// Production documentation identifier.
    #[arg(long = "production-doc")]
    production_doc: Option<String>,

    #[arg(long, default_value = "")]
    note: String,

    /// Output directory for the protocol.
    #[arg(long, default_value = ".")]
    output: PathBuf,

    /// JSON-lines debug event log.
    #[arg(long = "debug-log")]
    debug_log: Option<PathBuf>,

    /// Span timing log; a `_hot.log` summary is written next to it.
    #[arg(long = "perf-log")]
    perf_log: Option<PathBuf>,

    /// Accept the default operations checklist without prompting.
    #[arg(long)]
    defaults: bool,

    /// Open the finished protocol in the system viewer.
    #[arg(long)]
    open: bool,
}

const EXIT_ERROR: u8 = 1;
const EXIT_ABORTED: u8 = 2;

fn header_from(cli: &Cli, operations: OperationChecklist) -> ProtocolHeader {
    let mut header = ProtocolHeader::new(cli.protocol_number.clone())
        .with_note(cli.note.clone())
        .with_operations(operations);
    if let Some(worker) = &cli.worker {
        header = header.with_worker(worker.clone());
    }
    if let Some(doc) = &cli.production_doc {
        header = header.with_production_doc(doc.clone());
    }
    header
}

fn report(output: &ProtocolOutput, out: &mut impl Write) {
    let batch = &output.batch;
    let _ = writeln!(out, "Protocol written to {}", output.path.display());
    let _ = writeln!(
        out,
        "Units {}: {} total, {} OK, {} repairable, {} unrepairable",
        batch.range().label(),
        batch.total_count(),
        batch.ok_count(),
        batch.repairable_count(),
        batch.unrepairable_count()
    );
    let _ = writeln!(
        out,
        "{} result pages, {} attached records",
        output.pagination.page_count(),
        output.finalize.attachments.len()
    );
}

fn open_in_viewer(path: &Path) -> std::io::Result<()> {
    let mut command = if cfg!(target_os = "windows") {
        let mut cmd = std::process::Command::new("cmd");
        cmd.args(["/C", "start", ""]);
        cmd
    } else if cfg!(target_os = "macos") {
        std::process::Command::new("open")
    } else {
        std::process::Command::new("xdg-open")
    };
    command.arg(path).spawn().map(|_| ())
}

fn run(cli: Cli, input: impl BufRead, mut out: impl Write, mut err: impl Write) -> u8 {
    let mut console = ConsoleDecisions::new(input, &mut out);
    let operations = if cli.defaults {
        OperationChecklist::defaults()
    } else {
        OperationChecklist::from_decisions(&mut console)
    };

    let mut builder = ProtocolGenerator::builder()
        .records_root(&cli.records)
        .unit_range(cli.min, cli.max)
        .header(header_from(&cli, operations));
    if let Some(path) = &cli.debug_log {
        builder = builder.debug_log(path);
    }
    if let Some(path) = &cli.perf_log {
        builder = builder.perf_log(path);
    }
    let generator = match builder.build() {
        Ok(generator) => generator,
        Err(e) => {
            let _ = writeln!(err, "error: {e}");
            return EXIT_ERROR;
        }
    };

    let output = match generator.generate(&mut console, &cli.output) {
        Ok(output) => output,
        Err(e) if e.is_operator_abort() => {
            let _ = writeln!(err, "aborted: {e}");
            return EXIT_ABORTED;
        }
        Err(e) => {
            let _ = writeln!(err, "error: {e}");
            return EXIT_ERROR;
        }
    };
    drop(console);
    report(&output, &mut out);

    if cli.open {
        if let Err(e) = open_in_viewer(&output.path) {
            let _ = writeln!(err, "warning: could not open {}: {e}", output.path.display());
        }
    }
    0
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let stdin = std::io::stdin();
    let code = run(cli, stdin.lock(), std::io::stdout(), std::io::stderr());
    ExitCode::from(code)
}
