//! DMARC Analyzer - command-line front end
//!
//! Reads one or more DMARC aggregate reports (gzip, zip or raw XML), parses and
//! analyzes them, and prints the results as JSON, CSV, or a coloured table.
//! Results are optionally forwarded to a webhook.

use anyhow::{Context, Result};
use clap::error::ErrorKind;
use clap::{CommandFactory, Parser};
use colored::*;
use dmarc_analyzer::models::{DkimAuthResult, SpfAuthResult};
use dmarc_analyzer::webhook::WebhookHandler;
use dmarc_analyzer::{analyze_payload, AnalyzedReport, Config, DmarcError, Extractor};
use prettytable::{row, Cell, Row, Table};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::str::FromStr;

/// CLI arguments for the DMARC analyzer.
#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "DMARC aggregate report analyzer",
    long_about = "Decompresses, parses and analyzes DMARC aggregate (rua) reports. \
                  Each report is summarized and rated, with issues and recommendations.\n\n\
                  Use - as FILE to read a report from stdin."
)]
struct Cli {
    /// Report files (.xml, .xml.gz, .zip); - reads stdin
    #[arg(required = true, value_parser)]
    files: Vec<PathBuf>,

    /// Filename hint used for format detection instead of the path's file name
    #[arg(long)]
    filename: Option<String>,

    /// MIME content-type hint used for format detection
    #[arg(long, default_value = "")]
    content_type: String,

    /// Output format: json, table, csv
    #[arg(short, long, default_value = "json")]
    output: OutputFormat,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

/// Supported output formats.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
enum OutputFormat {
    Table,
    Csv,
    Json,
}

impl Cli {
    /// Checks argument combinations clap cannot express on its own.
    fn validate(&self) -> Result<(), String> {
        let stdin_inputs = self.files.iter().filter(|f| f.as_path() == Path::new("-")).count();
        if stdin_inputs > 1 {
            return Err("stdin (-) can only be given once".to_string());
        }
        Ok(())
    }
}

impl FromStr for OutputFormat {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "table" => Ok(OutputFormat::Table),
            "csv" => Ok(OutputFormat::Csv),
            "json" => Ok(OutputFormat::Json),
            _ => Err(format!("Invalid output format: {}", s)),
        }
    }
}

/// Outcome for one input, in the shape printed by the JSON output.
#[derive(Debug, Serialize)]
struct FileResult {
    file: String,
    #[serde(flatten)]
    report: Option<AnalyzedReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<ErrorBody>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    kind: &'static str,
    message: String,
}

impl FileResult {
    fn new(file: String, outcome: dmarc_analyzer::Result<AnalyzedReport>) -> Self {
        match outcome {
            Ok(report) => FileResult {
                file,
                report: Some(report),
                error: None,
            },
            Err(e) => FileResult {
                file,
                report: None,
                error: Some(ErrorBody {
                    kind: e.kind(),
                    message: error_chain(&e),
                }),
            },
        }
    }
}

/// One CSV line per source record.
#[derive(Debug, Serialize)]
struct CsvRow<'a> {
    file: &'a str,
    org_name: &'a str,
    report_id: &'a str,
    domain: &'a str,
    source_ip: &'a str,
    count: u64,
    disposition: String,
    dkim: String,
    spf: String,
    passed: bool,
    header_from: &'a str,
}

/// Joins an error with its causes, skipping causes already shown in the message.
fn error_chain(err: &DmarcError) -> String {
    let mut message = err.to_string();
    let mut source = std::error::Error::source(err);
    while let Some(cause) = source {
        let text = cause.to_string();
        if !message.contains(&text) {
            message.push_str(": ");
            message.push_str(&text);
        }
        source = cause.source();
    }
    message
}

fn analyze_input(
    path: &Path,
    cli: &Cli,
    config: &Config,
) -> dmarc_analyzer::Result<AnalyzedReport> {
    let extractor = Extractor::new(config);
    let (bytes, default_name) = if path == Path::new("-") {
        (extractor.read_stream(io::stdin().lock())?, String::new())
    } else {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        (extractor.read_file(path)?, name)
    };
    let filename = cli.filename.clone().unwrap_or(default_name);
    analyze_payload(&bytes, &filename, &cli.content_type, config)
}

/// Formats a DKIM auth result; "No signature" when no domain was reported.
fn format_dkim(d: &DkimAuthResult) -> String {
    if d.domain.trim().is_empty() {
        "No signature".to_string()
    } else {
        match d.selector.as_deref().map(str::trim) {
            Some(selector) if !selector.is_empty() => {
                format!("{} (selector: {}): {}", d.domain, selector, d.result)
            }
            _ => format!("{}:{}", d.domain, d.result),
        }
    }
}

/// Formats an SPF auth result; "No SPF record" when no domain was reported.
fn format_spf(spf: &SpfAuthResult) -> String {
    if spf.domain.trim().is_empty() {
        "No SPF record".to_string()
    } else {
        format!("{}:{}", spf.domain, spf.result)
    }
}

/// Parses a `#RRGGBB` colour.
fn hex_rgb(hex: &str) -> Option<(u8, u8, u8)> {
    let digits = hex.strip_prefix('#')?;
    if digits.len() != 6 {
        return None;
    }
    let channel = |i: usize| u8::from_str_radix(digits.get(i..i + 2)?, 16).ok();
    Some((channel(0)?, channel(2)?, channel(4)?))
}

fn print_table(file: &str, result: &AnalyzedReport) {
    let AnalyzedReport {
        report,
        summary,
        analysis,
    } = result;
    let policy = &report.policy;

    println!("{}", file.bold().underline());
    println!("{}", "DMARC Policy Information".bold().blue());
    println!("{}", "----------------------------".dimmed());
    println!("{}: {}", "Reporter".bold(), report.metadata.org_name);
    println!("{}: {}", "Report ID".bold(), report.metadata.report_id);
    println!(
        "{}: {} to {}",
        "Period".bold(),
        report.metadata.date_range.begin.format("%Y-%m-%d %H:%M"),
        report.metadata.date_range.end.format("%Y-%m-%d %H:%M")
    );
    println!("{}: {}", "Domain".bold(), policy.domain);
    println!("{}: {}", "SPF Alignment".bold(), policy.aspf);
    println!("{}: {}", "DKIM Alignment".bold(), policy.adkim);
    println!("{}: {}", "Policy".bold(), policy.policy);
    println!("{}: {}", "Subdomain Policy".bold(), policy.subdomain_policy);
    println!("{}: {}\n", "Percentage Applied".bold(), policy.pct);

    let rating = analysis.rating.to_string();
    let rating = match hex_rgb(&analysis.rating_color) {
        Some((r, g, b)) => rating.truecolor(r, g, b).bold(),
        None => rating.bold(),
    };
    println!("{}", "Summary".bold().blue());
    println!("{}", "----------------------------".dimmed());
    println!("{}: {} ({})", "Rating".bold(), rating, analysis.tier);
    println!("{}: {}%", "Health Score".bold(), analysis.health_score);
    println!("{}: {}", "Total Messages".bold(), summary.total_messages);
    println!(
        "{}: {} ({}%)",
        "Passed".bold(),
        summary.passed_messages.to_string().green(),
        summary.pass_rate
    );
    println!("{}: {}", "Failed".bold(), summary.failed_messages.to_string().red());
    println!("{}: {}%", "DKIM Pass Rate".bold(), summary.dkim_pass_rate);
    println!("{}: {}%\n", "SPF Pass Rate".bold(), summary.spf_pass_rate);

    if !analysis.issues.is_empty() {
        println!("{}", "Issues".bold().yellow());
        for issue in &analysis.issues {
            println!("  - {}", issue);
        }
    }
    if !analysis.recommendations.is_empty() {
        println!("{}", "Recommendations".bold().cyan());
        for recommendation in &analysis.recommendations {
            println!("  - {}", recommendation);
        }
    }
    println!();

    if summary.top_sources.is_empty() {
        println!("{}\n", "No DMARC records found.".yellow());
        return;
    }

    let mut sources = Table::new();
    sources.add_row(row!["Top Source IP", "Messages"]);
    for source in &summary.top_sources {
        sources.add_row(row![source.ip, source.count]);
    }
    sources.printstd();

    let mut records = Table::new();
    records.add_row(row!["Source IP", "Count", "Disposition", "DMARC", "SPF", "DKIM"]);
    for record in &report.records {
        let dmarc = if record.passed() {
            "pass".green().to_string()
        } else {
            "fail".red().to_string()
        };
        let spf_str = if record.spf_auth.is_empty() {
            format!("{} (no auth results)", record.spf())
        } else {
            record.spf_auth.iter().map(format_spf).collect::<Vec<_>>().join(", ")
        };
        let dkim_str = if record.dkim_auth.is_empty() {
            "No DKIM signature".to_string()
        } else {
            record.dkim_auth.iter().map(format_dkim).collect::<Vec<_>>().join(", ")
        };
        records.add_row(Row::new(vec![
            Cell::new(&record.source_ip),
            Cell::new(&record.count.to_string()),
            Cell::new(&record.disposition().to_string()),
            Cell::new(&dmarc),
            Cell::new(&spf_str),
            Cell::new(&dkim_str),
        ]));
    }
    records.printstd();
    println!();
}

fn write_csv(results: &[FileResult]) -> Result<()> {
    let mut wtr = csv::Writer::from_writer(io::stdout());
    for result in results {
        let Some(analyzed) = &result.report else {
            continue;
        };
        let report = &analyzed.report;
        for record in &report.records {
            wtr.serialize(CsvRow {
                file: &result.file,
                org_name: &report.metadata.org_name,
                report_id: &report.metadata.report_id,
                domain: &report.policy.domain,
                source_ip: &record.source_ip,
                count: record.count,
                disposition: record.disposition().to_string(),
                dkim: record.dkim().to_string(),
                spf: record.spf().to_string(),
                passed: record.passed(),
                header_from: &record.header_from,
            })?;
        }
    }
    wtr.flush()?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    if let Err(message) = cli.validate() {
        Cli::command().error(ErrorKind::ArgumentConflict, message).exit();
    }

    // Initialize logging based on verbosity.
    env_logger::Builder::from_env(env_logger::Env::default())
        .filter_level(if cli.verbose { log::LevelFilter::Debug } else { log::LevelFilter::Info })
        .parse_default_env()
        .init();

    let config = Config::new().context("Failed to load configuration")?;
    let webhook = WebhookHandler::from_config(&config).context("Failed to set up webhook")?;

    let results: Vec<FileResult> = cli
        .files
        .par_iter()
        .map(|path| {
            log::info!("Processing file: {}", path.display());
            let outcome = analyze_input(path, &cli, &config);
            if let Err(e) = &outcome {
                log::error!("{}: {}", path.display(), e);
            }
            FileResult::new(path.display().to_string(), outcome)
        })
        .collect();

    let mut success = results.iter().all(|r| r.error.is_none());

    match cli.output {
        OutputFormat::Json => {
            let json = if results.len() == 1 {
                serde_json::to_string_pretty(&results[0])?
            } else {
                serde_json::to_string_pretty(&results)?
            };
            println!("{}", json);
        }
        OutputFormat::Csv => write_csv(&results)?,
        OutputFormat::Table => {
            for result in &results {
                match (&result.report, &result.error) {
                    (Some(report), _) => print_table(&result.file, report),
                    (None, Some(error)) => {
                        eprintln!("{}: {}", result.file.bold(), error.message.red())
                    }
                    (None, None) => {}
                }
            }
        }
    }

    if let Some(handler) = webhook {
        let reports: Vec<AnalyzedReport> = results.into_iter().filter_map(|r| r.report).collect();
        if !reports.is_empty() {
            log::info!("Sending {} report(s) to webhook", reports.len());
            if let Err(e) = handler.send(&reports).await {
                log::error!("Failed to send webhook: {:#}", e);
                success = false;
            }
        }
    }

    Ok(if success { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}
