// cli/query.rs - `csvview query` and `csvview lookup` subcommands
//
// One-shot access to a single CSV file without a config: the file is opened
// as a default view (every column selected and searchable).

use std::path::{Path, PathBuf};

use crate::config::ViewConfig;
use crate::error::Result;
use crate::identity::{IdentityScheme, DEFAULT_PREFIX, DEFAULT_WIDTH};
use crate::query::{Filter, QueryRequest};
use crate::view::{CsvView, QueryResult, Row};

#[derive(Debug)]
pub struct QueryArgs {
    pub path: PathBuf,
    pub request: QueryRequest,
}

#[derive(Debug)]
pub struct LookupArgs {
    pub path: PathBuf,
    pub token: String,
    pub identity: IdentityScheme,
}

/// Parse `query` arguments.
///
/// Expected usage: `csvview query <csv> [--q TEXT] [--regex] [--page N]
/// [--page-size N] [--min COL=V] [--max COL=V] [--in COL=A,B]`
pub fn parse_query_args(args: &mut impl Iterator<Item = String>) -> Result<QueryArgs, String> {
    let mut path: Option<PathBuf> = None;
    let mut request = QueryRequest::new();

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--q" => request.free_text = Some(value_for(args, "--q")?),
            "--regex" => request.use_regex = true,
            "--page" => request.page = number_for(args, "--page")?,
            "--page-size" => request.page_size = number_for(args, "--page-size")?,
            "--min" | "--max" => {
                let (column, value) = pair_for(args, &arg)?;
                let (min, max) = if arg == "--min" {
                    (Some(value), None)
                } else {
                    (None, Some(value))
                };
                request.filters.push(Filter::Range { column, min, max });
            }
            "--in" => {
                let (column, list) = pair_for(args, "--in")?;
                let values = list
                    .split(',')
                    .map(str::trim)
                    .filter(|v| !v.is_empty())
                    .map(str::to_string)
                    .collect();
                request.filters.push(Filter::Categorical { column, values });
            }
            other if other.starts_with('-') => {
                return Err(format!("Unknown flag: '{}'", other));
            }
            _ => set_path(&mut path, arg)?,
        }
    }

    let path = path.ok_or_else(|| "Missing required <csv> argument".to_string())?;
    Ok(QueryArgs {
        path,
        request: request.normalized(),
    })
}

/// Parse `lookup` arguments.
///
/// Expected usage: `csvview lookup <csv> <token> [--identity A,B] [--prefix TAG] [--width N]`
pub fn parse_lookup_args(args: &mut impl Iterator<Item = String>) -> Result<LookupArgs, String> {
    let mut positional: Vec<String> = Vec::new();
    let mut columns: Vec<String> = Vec::new();
    let mut prefix = DEFAULT_PREFIX.to_string();
    let mut width = DEFAULT_WIDTH;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--identity" => {
                columns = value_for(args, "--identity")?
                    .split(',')
                    .map(str::trim)
                    .filter(|c| !c.is_empty())
                    .map(str::to_string)
                    .collect();
            }
            "--prefix" => prefix = value_for(args, "--prefix")?,
            "--width" => width = number_for(args, "--width")? as usize,
            other if other.starts_with('-') => {
                return Err(format!("Unknown flag: '{}'", other));
            }
            _ => positional.push(arg),
        }
    }

    let mut positional = positional.into_iter();
    let path = positional
        .next()
        .map(PathBuf::from)
        .ok_or_else(|| "Missing required <csv> argument".to_string())?;
    let token = positional
        .next()
        .ok_or_else(|| "Missing required <token> argument".to_string())?;
    if positional.next().is_some() {
        return Err("Too many arguments; expected <csv> <token>".to_string());
    }

    Ok(LookupArgs {
        path,
        token,
        identity: IdentityScheme::new(columns, prefix, width),
    })
}

fn set_path(path: &mut Option<PathBuf>, arg: String) -> Result<(), String> {
    if path.is_some() {
        return Err("Multiple paths provided; expected exactly one".to_string());
    }
    *path = Some(PathBuf::from(arg));
    Ok(())
}

fn value_for(args: &mut impl Iterator<Item = String>, flag: &str) -> Result<String, String> {
    args.next().ok_or_else(|| format!("{} requires a value", flag))
}

fn number_for(args: &mut impl Iterator<Item = String>, flag: &str) -> Result<u64, String> {
    let value = value_for(args, flag)?;
    value
        .parse()
        .map_err(|_| format!("{} expects a non-negative integer, got '{}'", flag, value))
}

fn pair_for(
    args: &mut impl Iterator<Item = String>,
    flag: &str,
) -> Result<(String, String), String> {
    let value = value_for(args, flag)?;
    let (column, rest) = value
        .split_once('=')
        .ok_or_else(|| format!("{} expects COLUMN=VALUE, got '{}'", flag, value))?;
    Ok((column.to_string(), rest.to_string()))
}

fn default_view(path: &Path, identity: Option<IdentityScheme>) -> Result<CsvView> {
    let name = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("csv")
        .to_string();
    let mut config = ViewConfig::new(name, path);
    if let Some(identity) = identity {
        config.identity = identity;
    }
    CsvView::open(config)
}

pub fn run_query(args: &QueryArgs) -> Result<QueryResult> {
    default_view(&args.path, None)?.query(&args.request)
}

pub fn run_lookup(args: &LookupArgs) -> Result<Row> {
    default_view(&args.path, Some(args.identity.clone()))?.resolve_by_identifier(&args.token)
}
