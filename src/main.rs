use anyhow::{Context, Result, bail};
use clap::{ArgAction, Parser};
use glob::glob;
use log::error;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

mod content;
mod error;
mod process_pages;
mod recolor_params;
mod rewrite;

use content::{DEFAULT_MAX_DEPTH, MAX_DEPTH_LIMIT};
use process_pages::{RecolorReport, recolor_file};
use recolor_params::{DEFAULT_RULES, RecolorParams, RuleKind, UnresolvedPolicy};

/// Replace blue fill colors with white in PDF page content, for printing
#[derive(Parser, Debug)]
#[command(name = "pdf_whiteout", version, about = "Replace blue fill colors with white in PDF page content")]
struct Args {
    /// Input PDF files or glob patterns
    #[arg(required = true)]
    inputs: Vec<String>,
    /// Output file (only with a single input; default: <stem><suffix>.<ext>)
    #[arg(short, long)]
    output: Option<PathBuf>,
    /// Appended to the input file stem to name the output
    #[arg(long, default_value = "_optimized")]
    suffix: String,
    /// Rewrite rule to apply, repeatable, in order (default: cmyk then rgb)
    #[arg(long = "rule", value_enum)]
    rules: Vec<RuleKind>,
    /// Maximum indirections followed per /Contents entry (1-256)
    #[arg(
        long,
        default_value_t = DEFAULT_MAX_DEPTH as u16,
        value_parser = clap::value_parser!(u16).range(1..=MAX_DEPTH_LIMIT as i64)
    )]
    max_depth: u16,
    /// Pages with unreadable content: keep them as they are, or blank the unreadable parts
    #[arg(long, value_enum, default_value_t = UnresolvedPolicy::Keep)]
    unresolved: UnresolvedPolicy,
    /// Flate-compress streams before saving
    #[arg(long, default_value_t = false)]
    compress: bool,
    /// Keep objects that are no longer referenced
    #[arg(long, default_value_t = false)]
    no_prune: bool,
    /// Print one JSON report per input instead of a summary line
    #[arg(long, default_value_t = false)]
    json: bool,
    /// More log output (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
    /// Only log warnings and errors
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,
}

impl Args {
    fn params(&self) -> RecolorParams {
        RecolorParams {
            rules: if self.rules.is_empty() { DEFAULT_RULES.to_vec() } else { self.rules.clone() },
            max_depth: usize::from(self.max_depth),
            unresolved: self.unresolved,
            prune: !self.no_prune,
            compress: self.compress,
        }
    }

    fn log_level(&self) -> &'static str {
        if self.quiet {
            return "warn";
        }
        match self.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }
}

#[derive(Serialize)]
struct FileSummary<'a> {
    input: &'a Path,
    output: &'a Path,
    params: &'a RecolorParams,
    #[serde(flatten)]
    report: &'a RecolorReport,
}

/// `manual.pdf` -> `manual_optimized.pdf`, next to the input
fn derive_output_path(input: &Path, suffix: &str) -> PathBuf {
    let mut name = input.file_stem().map(|s| s.to_os_string()).unwrap_or_default();
    name.push(suffix);
    if let Some(ext) = input.extension() {
        name.push(".");
        name.push(ext);
    }
    input.with_file_name(name)
}

fn is_pattern(arg: &str) -> bool {
    arg.contains(['*', '?', '['])
}

/// Plain paths are passed through (existence is checked later); patterns
/// must match at least one file.
fn expand_inputs(args: &[String]) -> Result<Vec<PathBuf>> {
    let mut inputs = Vec::new();
    for arg in args {
        if !is_pattern(arg) {
            inputs.push(PathBuf::from(arg));
            continue;
        }
        let mut matched: Vec<PathBuf> = glob(arg)
            .with_context(|| format!("invalid glob pattern {arg:?}"))?
            .filter_map(|e| e.ok())
            .collect();
        if matched.is_empty() {
            bail!("no files match {arg:?}");
        }
        matched.sort();
        inputs.extend(matched);
    }
    Ok(inputs)
}

fn print_report(
    json: bool,
    input: &Path,
    output: &Path,
    params: &RecolorParams,
    report: &RecolorReport,
) -> Result<()> {
    if json {
        let summary = FileSummary { input, output, params, report };
        println!("{}", serde_json::to_string(&summary)?);
    } else {
        println!(
            "Done. Modified {} of {} pages ({} skipped). Output: {}",
            report.modified,
            report.pages,
            report.skipped,
            output.display()
        );
    }
    Ok(())
}

fn run(args: &Args) -> Result<()> {
    let inputs = expand_inputs(&args.inputs)?;
    if args.output.is_some() && inputs.len() != 1 {
        bail!("--output needs exactly one input, got {}", inputs.len());
    }

    let params = args.params();
    let mut failed = 0;
    for input in &inputs {
        let output = args
            .output
            .clone()
            .unwrap_or_else(|| derive_output_path(input, &args.suffix));
        let result = recolor_file(input, &output, &params)
            .with_context(|| format!("failed to process {}", input.display()));
        match result {
            Ok(report) => print_report(args.json, input, &output, &params, &report)?,
            Err(e) => {
                error!("{e:?}");
                failed += 1;
            }
        }
    }

    if failed > 0 {
        bail!("{failed} of {} inputs failed", inputs.len());
    }
    Ok(())
}

fn main() -> ExitCode {
    let args = Args::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(args.log_level())).init();

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:?}");
            ExitCode::FAILURE
        }
    }
}
