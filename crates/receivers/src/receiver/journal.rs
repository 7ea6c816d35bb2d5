//! systemd journal backend for the event log receiver.
//!
//! Follows `journalctl --follow --output=json` and maps each JSON record onto
//! an [`EventLogEntry`]:
//!
//! | Journal field | Entry field |
//! |---|---|
//! | `MESSAGE` | message (string or byte array) |
//! | `PRIORITY` | entry type: 0-3 error, 4 warning, 5-6 information |
//! | `SYSLOG_IDENTIFIER`, else `_COMM` | source |
//! | `__REALTIME_TIMESTAMP` | time generated (microseconds) |
//! | `_PID` | instance id |
//! | `_SYSTEMD_UNIT` | category |
//! | `_UID` | user name |
//!
//! Log names map to journal selections: `System` follows `--system`, `User`
//! follows `--user`, `Application` follows everything and any other name is
//! treated as a unit. A non-local machine name selects a container with
//! `--machine`.

use std::path::PathBuf;
use std::process::Stdio;

use chrono::{DateTime, Local};
use futures_util::StreamExt;
use serde_json::Value;
use tokio::process::{Child, ChildStdout, Command};
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, LinesCodec};
use tracing::{debug, info, warn};

use super::event_log::{EntryType, EventLogEntry, EventLogSource, LOCAL_MACHINE};
use crate::error::ReceiverError;

/// Default reader binary, looked up on `PATH`.
pub const JOURNALCTL: &str = "journalctl";

/// Longest journal record accepted, in bytes.
const MAX_RECORD: usize = 1024 * 1024;

/// Event log backed by the systemd journal.
#[derive(Debug, Clone)]
pub struct JournalEventLog {
    program: PathBuf,
}

impl JournalEventLog {
    pub fn new() -> Self {
        Self::with_program(JOURNALCTL)
    }

    /// Uses `program` instead of `journalctl` from `PATH`.
    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Default for JournalEventLog {
    fn default() -> Self {
        Self::new()
    }
}

/// Command line selecting `(machine, log, source)`.
pub fn journal_args(machine: &str, log: &str, source: &str) -> Vec<String> {
    let mut args: Vec<String> = ["--follow", "--lines=0", "--output=json", "--no-pager", "--quiet"]
        .into_iter()
        .map(str::to_owned)
        .collect();
    if !machine.is_empty() && machine != LOCAL_MACHINE {
        args.push(format!("--machine={machine}"));
    }
    match log.to_ascii_lowercase().as_str() {
        "" | "application" => {}
        "system" => args.push("--system".to_owned()),
        "user" => args.push("--user".to_owned()),
        _ => args.push(format!("--unit={log}")),
    }
    if !source.is_empty() {
        args.push(format!("--identifier={source}"));
    }
    args
}

/// Syslog priority to entry type.
pub fn priority_entry_type(priority: Option<u8>) -> EntryType {
    match priority {
        Some(0..=3) => EntryType::Error,
        Some(4) => EntryType::Warning,
        Some(5 | 6) => EntryType::Information,
        _ => EntryType::Other,
    }
}

fn text_field(record: &Value, key: &str) -> Option<String> {
    match record.get(key)? {
        Value::String(s) => Some(s.clone()),
        // non-UTF-8 payloads are exported as byte arrays
        Value::Array(bytes) => {
            let raw: Vec<u8> = bytes
                .iter()
                .filter_map(|b| b.as_u64().and_then(|b| u8::try_from(b).ok()))
                .collect();
            Some(String::from_utf8_lossy(&raw).into_owned())
        }
        _ => None,
    }
}

fn number_field<T: std::str::FromStr>(record: &Value, key: &str) -> Option<T> {
    record.get(key)?.as_str()?.parse().ok()
}

/// Maps one journal JSON record; `None` when it carries no message.
pub fn journal_entry(record: &Value) -> Option<EventLogEntry> {
    let message = text_field(record, "MESSAGE")?;
    let source = text_field(record, "SYSLOG_IDENTIFIER")
        .or_else(|| text_field(record, "_COMM"))
        .unwrap_or_default();

    let mut entry = EventLogEntry::new(
        source,
        priority_entry_type(number_field(record, "PRIORITY")),
        message,
    );
    if let Some(ts) = number_field::<i64>(record, "__REALTIME_TIMESTAMP")
        .and_then(DateTime::from_timestamp_micros)
    {
        entry.time_generated = ts.with_timezone(&Local);
    }
    entry.instance_id = number_field(record, "_PID").unwrap_or(0);
    entry.category = text_field(record, "_SYSTEMD_UNIT").unwrap_or_default();
    entry.user_name = text_field(record, "_UID").unwrap_or_default();
    Some(entry)
}

impl EventLogSource for JournalEventLog {
    fn subscribe(
        &self,
        machine: &str,
        log: &str,
        source: &str,
    ) -> Result<mpsc::UnboundedReceiver<EventLogEntry>, ReceiverError> {
        let args = journal_args(machine, log, source);
        let mut child = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                ReceiverError::transport(
                    "event_log",
                    format!("failed to start {}: {e}", self.program.display()),
                )
            })?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ReceiverError::transport("event_log", "journal reader has no stdout"))?;

        info!(receiver = "event_log", program = %self.program.display(), ?args, "following journal");
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(follow(child, stdout, tx));
        Ok(rx)
    }
}

/// Forwards records until the subscriber goes away or the reader exits.
async fn follow(mut child: Child, stdout: ChildStdout, tx: mpsc::UnboundedSender<EventLogEntry>) {
    let mut lines = FramedRead::new(stdout, LinesCodec::new_with_max_length(MAX_RECORD));
    loop {
        tokio::select! {
            next = lines.next() => match next {
                Some(Ok(line)) => match serde_json::from_str::<Value>(&line) {
                    Ok(record) => {
                        if let Some(entry) = journal_entry(&record) {
                            if tx.send(entry).is_err() {
                                break;
                            }
                        }
                    }
                    Err(e) => {
                        crate::parser::record_parse_error("journal_json");
                        debug!(receiver = "event_log", error = %e, "skipping unreadable journal record");
                    }
                },
                Some(Err(e)) => {
                    warn!(receiver = "event_log", error = %e, "journal stream failed");
                    break;
                }
                None => {
                    warn!(receiver = "event_log", "journal reader exited");
                    break;
                }
            },
            () = tx.closed() => break,
        }
    }

    if let Err(e) = child.kill().await {
        debug!(receiver = "event_log", error = %e, "journal reader already stopped");
    }
}
