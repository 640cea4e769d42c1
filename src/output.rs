//! Progress, log and result output
//!
//! - Human mode: logs and progress on stderr, summaries and results on stdout
//! - Agent mode: every event is one JSON line on stdout (schema v: 1)

use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Mutex;

const SCHEMA_VERSION: u8 = 1;

/// Event wrapper with schema version
#[derive(Serialize)]
struct Event<T: Serialize> {
    v: u8,
    #[serde(rename = "type")]
    event_type: String,
    payload: T,
}

/// Output handler, passed by reference to everything that reports progress
pub struct Output {
    agent_mode: bool,
    verbose: bool,
    captured: Option<Mutex<Vec<String>>>,
}

impl Output {
    pub fn new(agent_mode: bool, verbose: bool) -> Self {
        Self {
            agent_mode,
            verbose,
            captured: None,
        }
    }

    /// Human-mode sink that records lines instead of printing them
    #[cfg(test)]
    pub fn capture() -> Self {
        Self {
            agent_mode: false,
            verbose: true,
            captured: Some(Mutex::new(Vec::new())),
        }
    }

    /// Agent-mode sink that records JSON lines instead of printing them
    #[cfg(test)]
    pub fn capture_agent() -> Self {
        Self {
            agent_mode: true,
            verbose: false,
            captured: Some(Mutex::new(Vec::new())),
        }
    }

    /// Lines recorded by a capturing sink
    #[cfg(test)]
    pub fn lines(&self) -> Vec<String> {
        self.captured
            .as_ref()
            .and_then(|c| c.lock().ok().map(|l| l.clone()))
            .unwrap_or_default()
    }

    fn stderr(&self, line: String) {
        match &self.captured {
            Some(buf) => {
                if let Ok(mut lines) = buf.lock() {
                    lines.push(line);
                }
            }
            None => eprintln!("{}", line),
        }
    }

    fn stdout(&self, line: String) {
        match &self.captured {
            Some(buf) => {
                if let Ok(mut lines) = buf.lock() {
                    lines.push(line);
                }
            }
            None => println!("{}", line),
        }
    }

    fn emit<T: Serialize>(&self, event_type: &str, payload: T) {
        let event = Event {
            v: SCHEMA_VERSION,
            event_type: event_type.to_string(),
            payload,
        };
        if let Ok(line) = serde_json::to_string(&event) {
            self.stdout(line);
        }
    }

    /// Log message (stderr for human, JSON Lines for agent)
    pub fn log(&self, level: &str, message: &str) {
        if self.agent_mode {
            self.emit("log", json!({"level": level, "message": message}));
        } else {
            self.stderr(format!("[{}] {}", level.to_uppercase(), message));
        }
    }

    pub fn info(&self, message: &str) {
        self.log("info", message);
    }

    pub fn warn(&self, message: &str) {
        self.log("warn", message);
    }

    /// Only shown with --verbose
    pub fn debug(&self, message: &str) {
        if self.verbose {
            self.log("debug", message);
        }
    }

    /// Progress update
    pub fn progress(&self, percent: u8, message: &str) {
        if self.agent_mode {
            self.emit("progress", json!({"percent": percent, "message": message}));
        } else {
            self.stderr(format!("[{:3}%] {}", percent, message));
        }
    }

    /// Two-column table for humans, a `summary` event with the rows keyed by name for agents
    pub fn summary(&self, title: &str, rows: &[(&str, String)]) {
        if self.agent_mode {
            let rows: serde_json::Map<String, Value> = rows
                .iter()
                .map(|(name, value)| (name.to_string(), Value::String(value.clone())))
                .collect();
            self.emit("summary", json!({"title": title, "rows": rows}));
            return;
        }

        let name_width = rows.iter().map(|(name, _)| name.len()).max().unwrap_or(0);
        let value_width = rows.iter().map(|(_, value)| value.len()).max().unwrap_or(0);
        let value_width = value_width.max(title.len());

        let border = format!(
            "+-{}-+-{}-+",
            "-".repeat(name_width),
            "-".repeat(value_width)
        );
        self.stdout(border.clone());
        self.stdout(format!(
            "| {:name_width$} | {:value_width$} |",
            "",
            title,
            name_width = name_width,
            value_width = value_width
        ));
        self.stdout(border.clone());
        for (name, value) in rows {
            self.stdout(format!(
                "| {:name_width$} | {:value_width$} |",
                name,
                value,
                name_width = name_width,
                value_width = value_width
            ));
        }
        self.stdout(border);
    }

    /// Final result (JSON Lines for agent, pretty JSON only with --verbose for humans)
    pub fn result<T: Serialize>(&self, data: T) {
        if self.agent_mode {
            self.emit("result", data);
        } else if self.verbose {
            if let Ok(pretty) = serde_json::to_string_pretty(&data) {
                self.stdout(pretty);
            }
        }
    }

    /// Print the error and exit with status 1
    pub fn error(&self, err: PebbleError) -> ! {
        if self.agent_mode {
            self.emit("error", &err);
        } else {
            eprintln!(
                "Error [{}][{}]: {}",
                err.cat,
                err.code,
                err.message.as_deref().unwrap_or("")
            );
            for hint in &err.fix {
                eprintln!("  Fix: {}", hint);
            }
            if let Some(details) = &err.details {
                eprintln!("  Details: {}", details);
            }
        }
        std::process::exit(1);
    }
}

/// User-facing error record
#[derive(Debug, Serialize)]
pub struct PebbleError {
    pub code: String,
    pub cat: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub op: Option<String>,
    pub fix: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl PebbleError {
    fn new(cat: &str, code: &str, message: &str, fix: &str) -> Self {
        Self {
            code: code.into(),
            cat: cat.into(),
            op: None,
            fix: vec![fix.into()],
            message: Some(message.into()),
            details: None,
        }
    }

    /// Network error
    pub fn net(code: &str, message: &str) -> Self {
        Self::new("net", code, message, "Check your network connection and DNS resolution")
    }

    /// Input error
    pub fn input(code: &str, message: &str) -> Self {
        Self::new("in", code, message, "Check the command-line flags and .env values")
    }

    /// Auth error
    pub fn auth(code: &str, message: &str) -> Self {
        Self::new("auth", code, message, "Check RUNCLOUD_API_KEY and its permissions")
    }

    /// External service error
    pub fn ext(code: &str, message: &str) -> Self {
        Self::new("ext", code, message, "Inspect the response and retry once the cause is fixed")
    }

    /// System error
    pub fn sys(code: &str, message: &str) -> Self {
        Self::new("sys", code, message, "Report this failure with the full output")
    }

    /// Add operation context
    pub fn with_op(mut self, op: &str) -> Self {
        self.op = Some(op.into());
        self
    }

    /// Replace the default fix hint
    pub fn with_fix(mut self, fix: &str) -> Self {
        self.fix = vec![fix.into()];
        self
    }

    /// Add details
    pub fn with_details<T: Serialize>(mut self, details: T) -> Self {
        self.details = serde_json::to_value(details).ok();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capture_records_levels_in_human_format() {
        let out = Output::capture();
        out.info("creating app");
        out.warn("cache skipped");
        out.debug("POST /servers/1/webapps");

        assert_eq!(
            out.lines(),
            vec![
                "[INFO] creating app",
                "[WARN] cache skipped",
                "[DEBUG] POST /servers/1/webapps",
            ]
        );
    }

    #[test]
    fn summary_aligns_columns() {
        let out = Output::capture();
        out.summary("Done", &[("URL", "http://a.test".into()), ("Admin user", "admin".into())]);

        let lines = out.lines();
        assert_eq!(lines.len(), 6);
        assert!(lines.iter().all(|l| l.len() == lines[0].len()));
        assert!(lines[3].starts_with("| URL        | http://a.test"));
    }

    #[test]
    fn agent_summary_is_one_event() {
        let out = Output::capture_agent();
        out.summary("Done", &[("URL", "http://a.test".into()), ("Admin user", "admin".into())]);

        let lines = out.lines();
        assert_eq!(lines.len(), 1);
        let event: Value = serde_json::from_str(&lines[0]).unwrap();
        assert_eq!(event["v"], 1);
        assert_eq!(event["type"], "summary");
        assert_eq!(event["payload"]["title"], "Done");
        assert_eq!(event["payload"]["rows"]["URL"], "http://a.test");
        assert_eq!(event["payload"]["rows"]["Admin user"], "admin");
    }

    #[test]
    fn pebble_error_serializes_without_empty_fields() {
        let err = PebbleError::auth("UNAUTHORIZED", "API key rejected").with_op("create");
        let value = serde_json::to_value(&err).unwrap();

        assert_eq!(value["cat"], "auth");
        assert_eq!(value["op"], "create");
        assert!(value.get("details").is_none());
    }
}
