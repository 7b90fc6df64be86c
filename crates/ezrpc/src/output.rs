use std::io::{IsTerminal, Write};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;
use serde_json::Value;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

#[derive(Serialize)]
struct CallOutput<'a> {
    method: &'a str,
    endpoint: &'a str,
    elapsed_ms: f64,
    result: &'a Value,
}

/// Print the result of a successful call.
pub fn print_result(method: &str, endpoint: &str, elapsed_ms: f64, result: &Value, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let out = CallOutput {
                method,
                endpoint,
                elapsed_ms,
                result,
            };
            print_json(&out);
        }
        OutputFormat::Table => {
            let mut table = new_table(vec!["METHOD", "ENDPOINT", "ELAPSED", "RESULT"]);
            table.add_row(vec![
                method.to_string(),
                endpoint.to_string(),
                format!("{elapsed_ms:.2}ms"),
                compact(result),
            ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "{}",
                serde_json::to_string_pretty(result).unwrap_or_else(|_| "null".to_string())
            );
        }
        OutputFormat::Raw => print_raw(compact(result).as_bytes()),
    }
}

/// Print `key: value` rows, as a table or a single JSON object.
pub fn print_fields<T: Serialize>(value: &T, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(value),
        OutputFormat::Table | OutputFormat::Pretty => {
            let Ok(Value::Object(fields)) = serde_json::to_value(value) else {
                print_json(value);
                return;
            };
            if matches!(format, OutputFormat::Pretty) {
                for (key, field) in &fields {
                    println!("{key}: {}", display(field));
                }
                return;
            }
            let mut table = new_table(vec!["FIELD", "VALUE"]);
            for (key, field) in &fields {
                table.add_row(vec![key.clone(), display(field)]);
            }
            println!("{table}");
        }
        OutputFormat::Raw => {
            let text = serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string());
            print_raw(text.as_bytes());
        }
    }
}

pub fn print_json<T: Serialize>(value: &T) {
    println!(
        "{}",
        serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
    );
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.write_all(b"\n");
    let _ = out.flush();
}

fn new_table(header: Vec<&str>) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(header);
    table
}

fn compact(value: &Value) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "null".to_string())
}

/// Strings without quotes, `null` as a dash, everything else as JSON.
fn display(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Null => "-".to_string(),
        other => compact(other),
    }
}
