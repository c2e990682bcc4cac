//! Output formatting for the CLI.
//!
//! Human-readable text by default; with `--json` only the JSON document is
//! written to stdout so it can be piped. Logs always go to stderr.

use serde::Serialize;

/// Output handler for CLI messages.
#[derive(Debug, Clone, Copy)]
pub struct Output {
    json: bool,
}

impl Output {
    pub fn new(json: bool) -> Self {
        Self { json }
    }

    pub fn is_json(&self) -> bool {
        self.json
    }

    pub fn success(&self, msg: &str) {
        if self.json {
            return;
        }
        println!("✓ {}", msg);
    }

    pub fn info(&self, msg: &str) {
        if self.json {
            return;
        }
        println!("ℹ {}", msg);
    }

    pub fn error(&self, msg: &str) {
        if self.json {
            eprintln!("{}", serde_json::json!({ "error": msg }));
            return;
        }
        eprintln!("✗ {}", msg);
    }

    pub fn header(&self, msg: &str) {
        if self.json {
            return;
        }
        println!("\n{}", msg);
        println!("{}", "─".repeat(msg.chars().count()));
    }

    pub fn kv(&self, key: &str, value: impl std::fmt::Display) {
        if self.json {
            return;
        }
        println!("  {:<18} {}", format!("{key}:"), value);
    }

    pub fn table_row(&self, cols: &[&str], widths: &[usize]) {
        if self.json {
            return;
        }
        let formatted: Vec<String> = cols
            .iter()
            .zip(widths.iter())
            .map(|(col, width)| format!("{:width$}", col, width = width))
            .collect();
        println!("  {}", formatted.join("  ").trim_end());
    }

    /// Prints `value` as pretty JSON when in JSON mode.
    ///
    /// Returns whether it printed, so text rendering can be skipped.
    pub fn json<T: Serialize>(&self, value: &T) -> anyhow::Result<bool> {
        if !self.json {
            return Ok(false);
        }
        println!("{}", serde_json::to_string_pretty(value)?);
        Ok(true)
    }
}
