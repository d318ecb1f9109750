//! Event line formatting

use chrono::{DateTime, SecondsFormat, Utc};
use owo_colors::OwoColorize;
use std::io::IsTerminal;
use watcher::{ChangeEvent, ChangeKind, WatchError, WatchEvent};

/// Writes one line per event to stdout (errors to stderr)
pub struct Printer {
    json: bool,
    color: bool,
}

impl Printer {
    /// Colour only when writing human-readable lines to a terminal
    pub fn detect(json: bool) -> Self {
        Self {
            json,
            color: !json && std::io::stdout().is_terminal(),
        }
    }

    pub fn print(&self, event: &WatchEvent) {
        let line = self.format(event, Utc::now());
        match event {
            WatchEvent::Error(_) => eprintln!("{}", line),
            _ => println!("{}", line),
        }
    }

    /// Render `event`; `now` stamps events that carry no timestamp
    pub fn format(&self, event: &WatchEvent, now: DateTime<Utc>) -> String {
        if self.json {
            return format_json(event, now);
        }

        match event {
            WatchEvent::Change(change) => self.format_change(change),
            WatchEvent::Ready => {
                let text = "Ready. Watching for changes...";
                if self.color {
                    format!("{} {}", self.stamp(now), text.bold())
                } else {
                    format!("{} {}", self.stamp(now), text)
                }
            }
            WatchEvent::Error(err) => {
                if self.color {
                    format!("{} {} {}", self.stamp(now), "Error:".red().bold(), err)
                } else {
                    format!("{} Error: {}", self.stamp(now), err)
                }
            }
        }
    }

    fn format_change(&self, change: &ChangeEvent) -> String {
        let label = format!("{}:", change.kind.label());
        let label = if self.color {
            match change.kind {
                ChangeKind::Created => label.green().to_string(),
                ChangeKind::Modified => label.yellow().to_string(),
                ChangeKind::Deleted => label.red().to_string(),
                ChangeKind::DirectoryCreated => label.cyan().to_string(),
                ChangeKind::DirectoryDeleted => label.magenta().to_string(),
            }
        } else {
            label
        };
        format!("{} {} {}", self.stamp(change.timestamp), label, change.path.display())
    }

    fn stamp(&self, at: DateTime<Utc>) -> String {
        let stamp = format!("[{}]", timestamp(at));
        if self.color {
            stamp.dimmed().to_string()
        } else {
            stamp
        }
    }
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn format_json(event: &WatchEvent, now: DateTime<Utc>) -> String {
    let value = match event {
        WatchEvent::Change(change) => serde_json::json!({
            "kind": change.kind,
            "path": change.path,
            "timestamp": timestamp(change.timestamp),
        }),
        WatchEvent::Ready => serde_json::json!({
            "kind": "ready",
            "timestamp": timestamp(now),
        }),
        WatchEvent::Error(err) => serde_json::json!({
            "kind": "error",
            "category": category_name(err),
            "message": err.to_string(),
            "timestamp": timestamp(now),
        }),
    };
    value.to_string()
}

fn category_name(err: &WatchError) -> &'static str {
    use watcher::ErrorCategory::*;
    match err.category() {
        Configuration => "configuration",
        BackendUnavailable => "backend_unavailable",
        TransientIo => "transient_io",
        Misuse => "misuse",
    }
}
