use std::io::{self, Write};

use serde::Serialize;
use serde_json::Value;

use crate::domain::LinkStatus;
use crate::upload::{ProgressEvent, ProgressSink, UploadResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    Human,
    Json,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_json<T: Serialize + ?Sized>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

impl ProgressSink for JsonOutput {
    fn event(&self, _event: ProgressEvent) {}
}

/// Reports progress through the log.
pub struct LogProgress;

impl ProgressSink for LogProgress {
    fn event(&self, event: ProgressEvent) {
        match event.elapsed {
            Some(elapsed) => tracing::info!("{} ({:.1}s)", event.message, elapsed.as_secs_f64()),
            None => tracing::info!("{}", event.message),
        }
    }
}

const GREEN: &str = "\x1b[32m";
const YELLOW: &str = "\x1b[33m";
const CYAN: &str = "\x1b[36m";
const RED: &str = "\x1b[31m";
const RESET: &str = "\x1b[0m";

pub fn print_upload_summary(result: &UploadResult) {
    let name = result
        .created
        .get("dataset_name")
        .and_then(Value::as_str)
        .unwrap_or("-");
    println!("{CYAN}Upload summary{RESET}");
    println!("{GREEN}created dataset {} ({name}){RESET}", result.dsid);

    if result.outcomes.is_empty() {
        println!("no linked records");
    }
    for outcome in &result.outcomes {
        match outcome.status {
            LinkStatus::Success => {
                println!("{GREEN}  linked {} {}{RESET}", outcome.kind, outcome.target);
            }
            LinkStatus::Error => println!(
                "{RED}  failed {} {}: {}{RESET}",
                outcome.kind,
                outcome.target,
                outcome.error.as_deref().unwrap_or("unknown error")
            ),
        }
    }
    for warning in &result.warnings {
        println!("{YELLOW}  warning: {warning}{RESET}");
    }

    if result.is_complete() {
        println!("{GREEN}all {} link(s) succeeded{RESET}", result.outcomes.len());
    } else {
        println!(
            "{YELLOW}{} of {} link(s) failed{RESET}",
            result.failed_links(),
            result.outcomes.len()
        );
    }
}

/// One line per record: id and name, for list commands.
pub fn print_records(records: &[Value], id_field: &str, name_field: &str) {
    if records.is_empty() {
        println!("no records found");
        return;
    }
    for record in records {
        let id = record.get(id_field).and_then(Value::as_str).unwrap_or("-");
        let name = record
            .get(name_field)
            .and_then(Value::as_str)
            .unwrap_or("");
        println!("{CYAN}{id}{RESET}  {name}");
    }
}

/// Top-level fields of a record, one per line.
pub fn print_record(record: &Value) {
    let Some(fields) = record.as_object() else {
        println!("{record}");
        return;
    };
    for (key, value) in fields {
        match value {
            Value::String(text) => println!("{CYAN}{key}{RESET}: {text}"),
            Value::Null => println!("{CYAN}{key}{RESET}: -"),
            other => println!("{CYAN}{key}{RESET}: {other}"),
        }
    }
}
