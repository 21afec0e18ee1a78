//
// main.rs
//
// csvview command line entry point
//

use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use csvview::catalog::ViewCatalog;
use csvview::cli;
use csvview::config::{default_config_path, load_catalog_config, CatalogConfig};
use csvview::error::ViewError;

fn print_usage() {
    println!(
        "csvview {}, cached queryable views over CSV files.",
        env!("CARGO_PKG_VERSION")
    );
    print!(
        r#"
Usage: csvview [OPTIONS]
       csvview <COMMAND> [ARGS]

Available options:

--stdio                      Serve JSON requests over stdio, one per line
  --config <file>            View catalog config (default: $XDG_CONFIG_HOME/csvview/views.json)
  --data-dir <dir>           Register every *.csv under <dir> as a view
--version                    Print the version
--help                       Print this help message

Commands:

query <csv> [--q TEXT] [--regex] [--page N] [--page-size N]
            [--min COL=V] [--max COL=V] [--in COL=A,B]
                             Print one page of matching rows as JSON
lookup <csv> <token> [--identity A,B] [--prefix TAG] [--width N]
                             Print the row with the given identifier as JSON
view-stats <csv> [--csv] [--only <phase>] [--q TEXT]
                             Report per-phase timings (stat, load, count, query, resolve)

"#
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mut argv = env::args();
    argv.next(); // skip executable name

    let mut use_stdio = false;
    let mut config_path: Option<PathBuf> = None;
    let mut data_dir: Option<PathBuf> = None;

    while let Some(arg) = argv.next() {
        match arg.as_str() {
            "query" => {
                env_logger::init();
                let args = cli::query::parse_query_args(&mut argv).map_err(anyhow::Error::msg)?;
                return emit(cli::query::run_query(&args));
            }
            "lookup" => {
                env_logger::init();
                let args = cli::query::parse_lookup_args(&mut argv).map_err(anyhow::Error::msg)?;
                return emit(cli::query::run_lookup(&args));
            }
            "view-stats" => {
                env_logger::init();
                let args = cli::view_stats::parse_args(&mut argv).map_err(anyhow::Error::msg)?;
                let results = cli::view_stats::run_view_stats(&args)?;
                if args.csv {
                    cli::view_stats::print_results_csv(&results)?;
                } else {
                    cli::view_stats::print_results(&results);
                }
                return Ok(());
            }
            "--stdio" => use_stdio = true,
            "--config" => {
                let value = argv
                    .next()
                    .ok_or_else(|| anyhow::anyhow!("--config requires a file path"))?;
                config_path = Some(PathBuf::from(value));
            }
            "--data-dir" => {
                let value = argv
                    .next()
                    .ok_or_else(|| anyhow::anyhow!("--data-dir requires a directory"))?;
                data_dir = Some(PathBuf::from(value));
            }
            "--version" => {
                println!("csvview {}", env!("CARGO_PKG_VERSION"));
                return Ok(());
            }
            "--help" => {
                print_usage();
                return Ok(());
            }
            other => {
                return Err(anyhow::anyhow!("Unknown argument: '{other}'"));
            }
        }
    }

    if !use_stdio {
        print_usage();
        return Ok(());
    }

    env_logger::init();

    let mut config = match config_path {
        Some(path) => load_catalog_config(&path)?,
        None => match default_config_path().filter(|p| p.is_file()) {
            Some(path) => load_catalog_config(&path)?,
            None => {
                log::info!("No config file found; starting with an empty catalog");
                CatalogConfig::new()
            }
        },
    };
    if data_dir.is_some() {
        config.data_dir = data_dir;
    }

    let catalog = Arc::new(ViewCatalog::from_config(config));
    csvview::service::start_stdio(catalog).await
}

/// Print a result as JSON, or the error payload followed by a failing exit.
fn emit<T: serde::Serialize>(result: Result<T, ViewError>) -> anyhow::Result<()> {
    match result {
        Ok(value) => {
            println!("{}", serde_json::to_string_pretty(&value)?);
            Ok(())
        }
        Err(err) => {
            println!("{}", serde_json::to_string_pretty(&err.to_payload())?);
            anyhow::bail!(err)
        }
    }
}
