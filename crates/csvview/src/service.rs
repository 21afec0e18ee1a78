//
// service.rs
//
// Line-delimited JSON request loop over stdio
//

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};

use crate::catalog::ViewCatalog;
use crate::error::{ErrorPayload, ViewError};
use crate::query::QueryRequest;

#[derive(Debug, Deserialize)]
struct Request {
    #[serde(default)]
    id: Value,
    method: String,
    #[serde(default)]
    params: Map<String, Value>,
}

#[derive(Debug, Serialize)]
struct Response {
    id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<ErrorPayload>,
}

impl Response {
    fn result(id: Value, result: Value) -> Self {
        Self {
            id,
            result: Some(result),
            error: None,
        }
    }

    fn error(id: Value, error: ErrorPayload) -> Self {
        Self {
            id,
            result: None,
            error: Some(error),
        }
    }
}

/// Serve requests on stdin, writing one response line per request to stdout.
pub async fn start_stdio(catalog: Arc<ViewCatalog>) -> anyhow::Result<()> {
    log::info!("Serving {} views over stdio", catalog.names().len());
    serve(catalog, BufReader::new(tokio::io::stdin()), tokio::io::stdout()).await
}

/// Request loop. Returns when the input closes; request failures are
/// answered with an error payload and never end the loop.
pub async fn serve<R, W>(catalog: Arc<ViewCatalog>, reader: R, mut writer: W) -> anyhow::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = reader.lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let response = handle_line(&catalog, &line).await;
        let mut out = serde_json::to_string(&response)?;
        out.push('\n');
        writer.write_all(out.as_bytes()).await?;
        writer.flush().await?;
    }
    log::info!("Input closed; shutting down");
    if let Ok(metrics) = crate::perf::metrics().lock() {
        metrics.log_summary();
    }
    Ok(())
}

async fn handle_line(catalog: &Arc<ViewCatalog>, line: &str) -> Response {
    let request: Request = match serde_json::from_str(line) {
        Ok(request) => request,
        Err(err) => {
            log::debug!("Malformed request line: {}", err);
            return Response::error(
                Value::Null,
                ErrorPayload::bad_request(format!("malformed request: {}", err)),
            );
        }
    };

    let id = request.id;
    let method = request.method;
    let params = request.params;
    let catalog = Arc::clone(catalog);
    // View operations hold a blocking lock and do file I/O.
    let outcome =
        tokio::task::spawn_blocking(move || dispatch(&catalog, &method, &params)).await;

    match outcome {
        Ok(Ok(result)) => Response::result(id, result),
        Ok(Err(payload)) => Response::error(id, payload),
        Err(err) => {
            log::error!("Request handler panicked or was cancelled: {}", err);
            Response::error(id, ErrorPayload::internal(err.to_string()))
        }
    }
}

/// Run one method against the catalog.
pub fn dispatch(
    catalog: &ViewCatalog,
    method: &str,
    params: &Map<String, Value>,
) -> Result<Value, ErrorPayload> {
    log::trace!("dispatch {} {:?}", method, params);
    match method {
        "views" => {
            let views: Vec<Value> = catalog
                .definitions()
                .into_iter()
                .map(|c| json!({ "name": c.name, "path": c.source_path }))
                .collect();
            Ok(Value::Array(views))
        }
        "columns" => {
            let view = view_param(catalog, params)?;
            to_json(view.columns().map_err(boundary)?)
        }
        "query" => {
            let view = view_param(catalog, params)?;
            let flat = flatten_params(params);
            let request = QueryRequest::from_params(&flat, view.config());
            to_json(view.query(&request).map_err(boundary)?)
        }
        "lookup" => {
            let view = view_param(catalog, params)?;
            let token = str_param(params, "id")?;
            to_json(view.resolve_by_identifier(token).map_err(boundary)?)
        }
        "distinct" => {
            let view = view_param(catalog, params)?;
            let column = str_param(params, "column")?;
            to_json(view.distinct_values(column).map_err(boundary)?)
        }
        "bounds" => {
            let view = view_param(catalog, params)?;
            let column = str_param(params, "column")?;
            let bounds = view.numeric_bounds(column).map_err(boundary)?;
            Ok(match bounds {
                Some((min, max)) => json!({ "min": min, "max": max }),
                None => Value::Null,
            })
        }
        "stats" => {
            let view = view_param(catalog, params)?;
            to_json(view.stats())
        }
        other => Err(ErrorPayload::bad_request(format!(
            "unknown method '{}'",
            other
        ))),
    }
}

/// Convert a view error into its payload, logging by severity.
fn boundary(err: ViewError) -> ErrorPayload {
    let payload = err.to_payload();
    if payload.status >= 500 {
        log::warn!("Request failed: {}", err);
    } else {
        log::debug!("Request rejected ({}): {}", payload.status, err);
    }
    payload
}

fn to_json<T: Serialize>(value: T) -> Result<Value, ErrorPayload> {
    serde_json::to_value(value).map_err(|e| ErrorPayload::internal(e.to_string()))
}

fn str_param<'a>(params: &'a Map<String, Value>, key: &str) -> Result<&'a str, ErrorPayload> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| ErrorPayload::bad_request(format!("missing string parameter '{}'", key)))
}

fn view_param(
    catalog: &ViewCatalog,
    params: &Map<String, Value>,
) -> Result<Arc<crate::view::CsvView>, ErrorPayload> {
    let name = str_param(params, "view")?;
    catalog.get(name).map_err(boundary)
}

/// Flatten JSON params to the string form a query string would carry.
/// Arrays become comma-separated lists; nulls and objects are dropped.
fn flatten_params(params: &Map<String, Value>) -> HashMap<String, String> {
    params
        .iter()
        .filter(|(key, _)| key.as_str() != "view")
        .filter_map(|(key, value)| scalar_text(value).map(|text| (key.clone(), text)))
        .collect()
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Array(items) => Some(
            items
                .iter()
                .filter_map(scalar_text)
                .collect::<Vec<_>>()
                .join(","),
        ),
        Value::Null | Value::Object(_) => None,
    }
}
