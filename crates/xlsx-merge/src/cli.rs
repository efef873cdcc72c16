use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, ValueEnum};
use flexi_logger::{Logger, LoggerHandle};
use serde::Serialize;

use crate::{MergeOptions, MergeReport, PackageLimits, WorkbookMerger, FIRST_CUSTOM_NUM_FMT_ID};

#[derive(Clone, Debug, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Parser)]
#[command(about = "Merge the worksheets of several XLSX/XLSM workbooks into one workbook.")]
pub struct Args {
    /// Workbooks to merge, in order. The first one is the base workbook.
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// Where to write the merged workbook. The extension is replaced by `.xlsx` or `.xlsm`
    /// depending on whether the result carries macros.
    #[arg(
        short,
        long,
        value_name = "PATH",
        required_unless_present_any = ["stdout", "unpacked_dir"]
    )]
    output: Option<PathBuf>,

    /// Write the merged workbook to stdout instead of a file. The report goes to stderr.
    #[arg(long, conflicts_with = "output")]
    stdout: bool,

    /// Suggested file name reported alongside `--stdout` output.
    #[arg(long, value_name = "NAME", requires = "stdout")]
    download_name: Option<String>,

    /// Also write the merged parts, unzipped, below this directory.
    #[arg(long, value_name = "DIR")]
    unpacked_dir: Option<PathBuf>,

    /// Do not ask Excel to recalculate every formula when the merged workbook is opened.
    #[arg(long)]
    no_full_calc: bool,

    /// Keep imported sheet names as they are, even when they clash with existing ones.
    #[arg(long)]
    keep_duplicate_sheet_names: bool,

    /// Lowest id given to imported custom number formats.
    #[arg(long, value_name = "ID", default_value_t = FIRST_CUSTOM_NUM_FMT_ID)]
    num_fmt_seed: u32,

    /// Maximum inflated size of a single part, in bytes.
    #[arg(long, value_name = "BYTES")]
    max_part_bytes: Option<u64>,

    /// Maximum inflated size of one input workbook, in bytes.
    #[arg(long, value_name = "BYTES")]
    max_package_bytes: Option<u64>,

    /// Report format.
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,

    /// More log output (repeatable). `RUST_LOG` takes precedence.
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,

    /// Only log errors.
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,
}

impl Args {
    fn merge_options(&self) -> MergeOptions {
        let defaults = PackageLimits::default();
        MergeOptions {
            limits: PackageLimits {
                max_part_bytes: self.max_part_bytes.unwrap_or(defaults.max_part_bytes),
                max_total_bytes: self.max_package_bytes.unwrap_or(defaults.max_total_bytes),
            },
            force_full_calc_on_load: !self.no_full_calc,
            unique_sheet_names: !self.keep_duplicate_sheet_names,
            first_custom_num_fmt_id: self.num_fmt_seed,
        }
    }

    fn log_spec(&self) -> &'static str {
        if self.quiet {
            return "error";
        }
        match self.verbose {
            0 => "warn",
            1 => "info",
            _ => "debug",
        }
    }
}

#[derive(Debug, Serialize)]
struct JsonReport<'a> {
    output: Option<String>,
    #[serde(flatten)]
    report: &'a MergeReport,
}

pub fn run() -> Result<()> {
    let args = Args::parse();
    let _logger = init_logging(&args)?;
    run_with_args(args)
}

fn init_logging(args: &Args) -> Result<LoggerHandle> {
    Logger::try_with_env_or_str(args.log_spec())
        .context("invalid log specification")?
        .log_to_stderr()
        .start()
        .context("failed to start logger")
}

pub fn run_with_args(args: Args) -> Result<()> {
    let mut merger = WorkbookMerger::with_options(args.merge_options());
    for input in &args.inputs {
        merger
            .add_file(input)
            .with_context(|| format!("failed to merge {}", input.display()))?;
    }

    if let Some(dir) = &args.unpacked_dir {
        merger
            .extract_to_dir(dir)
            .with_context(|| format!("failed to unpack into {}", dir.display()))?;
    }

    let output = if args.stdout {
        let download = merger.download(args.download_name.as_deref())?;
        let mut stdout = io::stdout().lock();
        ignore_broken_pipe(
            stdout
                .write_all(&download.bytes)
                .and_then(|()| stdout.flush()),
        )
        .context("failed to write the merged workbook to stdout")?;
        Some(download.file_name)
    } else if let Some(dest) = &args.output {
        let written = merger
            .save(dest)
            .with_context(|| format!("failed to write {}", dest.display()))?;
        Some(written.display().to_string())
    } else {
        None
    };

    let report = merger.report();
    let written = if args.stdout {
        write_report(&mut io::stderr().lock(), &args.format, output.as_deref(), report)
    } else {
        write_report(&mut io::stdout().lock(), &args.format, output.as_deref(), report)
    };
    ignore_broken_pipe(written).context("failed to write the merge report")?;
    Ok(())
}

fn write_report(
    out: &mut impl Write,
    format: &OutputFormat,
    output: Option<&str>,
    report: &MergeReport,
) -> io::Result<()> {
    match format {
        OutputFormat::Text => {
            writeln!(out, "Workbook merge report")?;
            writeln!(out, "  output: {}", output.unwrap_or("(none)"))?;
            writeln!(out, "  inputs: {}", report.inputs.join(", "))?;
            if !report.skipped.is_empty() {
                let skipped: Vec<String> = report
                    .skipped
                    .iter()
                    .map(|p| p.display().to_string())
                    .collect();
                writeln!(out, "  skipped: {}", skipped.join(", "))?;
            }
            writeln!(out)?;

            writeln!(out, "Sheets ({}):", report.sheets.len())?;
            for sheet in &report.sheets {
                writeln!(
                    out,
                    "  {:>3}  {}  ({}: {})",
                    sheet.number, sheet.name, sheet.source, sheet.source_part
                )?;
            }

            if !report.warnings.is_empty() {
                writeln!(out)?;
                writeln!(out, "Warnings ({}):", report.warnings.len())?;
                for warning in &report.warnings {
                    writeln!(out, "  - {warning}")?;
                }
            }
            Ok(())
        }
        OutputFormat::Json => {
            let json = JsonReport {
                output: output.map(str::to_string),
                report,
            };
            serde_json::to_writer(&mut *out, &json)?;
            out.write_all(b"\n")
        }
    }
}

/// A closed downstream pipe (`xlsx-merge ... | head`) is not a failure.
fn ignore_broken_pipe(result: io::Result<()>) -> io::Result<()> {
    match result {
        Err(err) if err.kind() == io::ErrorKind::BrokenPipe => Ok(()),
        other => other,
    }
}
