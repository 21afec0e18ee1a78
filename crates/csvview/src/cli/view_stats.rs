// cli/view_stats.rs - `csvview view-stats` subcommand
//
// Opens one CSV file as a view and reports timing metrics for each phase of
// its lifecycle.
//
// Phases measured:
//   1. stat    - reading the file snapshot (mtime, size)
//   2. load    - parsing the CSV and building the table
//   3. count   - counting all rows through the query path
//   4. query   - first page of a search (`--q`, empty by default)
//   5. resolve - identifier lookup of the last row (worst case scan)

use std::path::PathBuf;
use std::time::{Duration, Instant};

use crate::config::ViewConfig;
use crate::error::Result;
use crate::perf::TimingGuard;
use crate::query::QueryRequest;
use crate::snapshot::get_file_snapshot;
use crate::view::CsvView;

/// Parsed arguments for the `view-stats` subcommand.
#[derive(Debug)]
pub struct ViewStatsArgs {
    pub path: PathBuf,
    pub csv: bool,
    pub only: Option<String>,
    pub search: Option<String>,
}

/// Result of running a single phase.
pub struct PhaseResult {
    pub name: String,
    pub duration: Duration,
    pub peak_rss_bytes: Option<u64>,
    pub detail: String,
}

const VALID_PHASES: &[&str] = &["stat", "load", "count", "query", "resolve"];

/// Parse `view-stats` arguments from the remaining CLI args.
///
/// Expected usage: `csvview view-stats <csv> [--csv] [--only <phase>] [--q <text>]`
pub fn parse_args(args: &mut impl Iterator<Item = String>) -> Result<ViewStatsArgs, String> {
    let mut path: Option<PathBuf> = None;
    let mut csv = false;
    let mut only: Option<String> = None;
    let mut search: Option<String> = None;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--csv" => csv = true,
            "--only" => {
                let phase = args
                    .next()
                    .ok_or_else(|| "--only requires a phase name".to_string())?;
                if !VALID_PHASES.contains(&phase.as_str()) {
                    return Err(format!(
                        "Unknown phase '{}'. Valid phases: {}",
                        phase,
                        VALID_PHASES.join(", ")
                    ));
                }
                only = Some(phase);
            }
            "--q" => {
                search = Some(
                    args.next()
                        .ok_or_else(|| "--q requires a search text".to_string())?,
                );
            }
            other if other.starts_with('-') => {
                return Err(format!("Unknown flag: '{}'", other));
            }
            _ => {
                if path.is_some() {
                    return Err("Multiple paths provided; expected exactly one".to_string());
                }
                path = Some(PathBuf::from(arg));
            }
        }
    }

    let path = path.ok_or_else(|| "Missing required <csv> argument".to_string())?;
    if !path.is_file() {
        return Err(format!("Not a file: {}", path.display()));
    }

    Ok(ViewStatsArgs {
        path,
        csv,
        only,
        search,
    })
}

/// Run the view-stats command and return phase results.
pub fn run_view_stats(args: &ViewStatsArgs) -> Result<Vec<PhaseResult>> {
    let mut results = Vec::new();
    let should_run = |phase: &str| -> bool {
        args.only.as_ref().map_or(true, |only| only == phase)
    };

    if should_run("stat") {
        let (snapshot, duration) = timed("view-stats:stat", || get_file_snapshot(&args.path))?;
        results.push(phase("stat", duration, format!("{} bytes", snapshot.size)));
    }
    if args.only.as_deref() == Some("stat") {
        return Ok(results);
    }

    let name = args
        .path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("csv")
        .to_string();
    let view = CsvView::open(ViewConfig::new(name, &args.path))?;

    // Later phases would otherwise absorb the initial load.
    let ((_, revision), duration) = timed("view-stats:load", || view.ensure_current())?;
    if should_run("load") {
        let columns = view.columns()?.len();
        results.push(phase(
            "load",
            duration,
            format!("{} rows, {} columns", revision.row_count, columns),
        ));
    }

    if should_run("count") {
        let request = QueryRequest::new().page(1, 1);
        let (result, duration) = timed("view-stats:count", || view.query(&request))?;
        results.push(phase("count", duration, format!("{} rows", result.total)));
    }

    if should_run("query") {
        let mut request = QueryRequest::new();
        request.free_text = args.search.clone();
        let (result, duration) = timed("view-stats:query", || view.query(&request))?;
        results.push(phase(
            "query",
            duration,
            format!("{} matches, {} returned", result.total, result.items.len()),
        ));
    }

    if should_run("resolve") {
        let last = view.query(&QueryRequest::new().page(revision.row_count.max(1) as u64, 1))?;
        match last.items.first() {
            Some(row) => {
                let (found, duration) =
                    timed("view-stats:resolve", || view.resolve_by_identifier(&row.id))?;
                let detail = format!("{} found at row {}", found.id, found.index);
                results.push(phase("resolve", duration, detail));
            }
            None => results.push(phase("resolve", Duration::ZERO, "empty table".to_string())),
        }
    }

    Ok(results)
}

fn timed<T>(label: &'static str, f: impl FnOnce() -> Result<T>) -> Result<(T, Duration)> {
    let _guard = TimingGuard::new(label);
    let start = Instant::now();
    let value = f()?;
    Ok((value, start.elapsed()))
}

fn phase(name: &str, duration: Duration, detail: String) -> PhaseResult {
    PhaseResult {
        name: name.to_string(),
        duration,
        peak_rss_bytes: crate::perf::peak_rss_bytes(),
        detail,
    }
}

/// Print phase results in human-readable format.
pub fn print_results(results: &[PhaseResult]) {
    println!("=== csvview View Stats ===\n");
    for result in results {
        let rss_str = match result.peak_rss_bytes {
            Some(bytes) => format_bytes(bytes),
            None => "N/A".to_string(),
        };
        println!(
            "  {:<10} {:>10.2?}   RSS: {:<10}  ({})",
            result.name, result.duration, rss_str, result.detail
        );
    }

    if results.len() > 1 {
        let total: Duration = results.iter().map(|r| r.duration).sum();
        println!("\n  {:<10} {:>10.2?}", "TOTAL", total);
    }
    println!();
}

/// Print phase results in CSV format.
pub fn print_results_csv(results: &[PhaseResult]) -> csv::Result<()> {
    write_results_csv(std::io::stdout(), results)
}

fn write_results_csv<W: std::io::Write>(out: W, results: &[PhaseResult]) -> csv::Result<()> {
    let mut writer = csv::Writer::from_writer(out);
    writer.write_record(["phase", "duration_ms", "peak_rss_bytes", "detail"])?;
    for result in results {
        let rss = result
            .peak_rss_bytes
            .map_or(String::new(), |b| b.to_string());
        let duration_ms = format!("{:.3}", result.duration.as_secs_f64() * 1000.0);
        writer.write_record([
            result.name.as_str(),
            duration_ms.as_str(),
            rss.as_str(),
            result.detail.as_str(),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

/// Format a byte count as a human-readable string (e.g., "12.3 MB").
fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = 1024 * KB;
    const GB: u64 = 1024 * MB;
    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}
