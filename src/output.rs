//! Shared output formatting for canopy CLI commands.

use serde::Serialize;

use crate::error::Result;

pub const SCHEMA_VERSION: &str = "canopy.v1";

/// One command's output: a JSON envelope or a short human rendering.
#[derive(Debug, Clone)]
pub struct Output {
    command: String,
    header: String,
    data: serde_json::Value,
    summary: Vec<(String, String)>,
    warnings: Vec<String>,
}

impl Output {
    pub fn new<T: Serialize>(
        command: impl Into<String>,
        header: impl Into<String>,
        data: T,
    ) -> Result<Self> {
        Ok(Self {
            command: command.into(),
            header: header.into(),
            data: serde_json::to_value(data)?,
            summary: Vec::new(),
            warnings: Vec::new(),
        })
    }

    pub fn summary(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.summary.push((key.into(), value.into()));
        self
    }

    pub fn warning(mut self, value: impl Into<String>) -> Self {
        self.warnings.push(value.into());
        self
    }

    pub fn emit(&self, json: bool, quiet: bool) -> Result<()> {
        if json {
            return self.emit_json();
        }
        if quiet {
            return Ok(());
        }
        self.emit_human();
        Ok(())
    }

    fn emit_json(&self) -> Result<()> {
        #[derive(Serialize)]
        struct Envelope<'a> {
            schema_version: &'static str,
            command: &'a str,
            status: &'static str,
            data: &'a serde_json::Value,
            #[serde(skip_serializing_if = "Vec::is_empty")]
            warnings: &'a Vec<String>,
        }

        let envelope = Envelope {
            schema_version: SCHEMA_VERSION,
            command: &self.command,
            status: "ok",
            data: &self.data,
            warnings: &self.warnings,
        };
        println!("{}", serde_json::to_string_pretty(&envelope)?);
        Ok(())
    }

    fn emit_human(&self) {
        println!("{}", self.header);
        for (key, value) in &self.summary {
            println!("  {key}: {value}");
        }
        for warning in &self.warnings {
            eprintln!("warning: {warning}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_with_summary_and_warnings() {
        let output = Output::new("workspace.list", "2 workspaces", vec!["a", "b"])
            .unwrap()
            .summary("active", "2")
            .warning("one repo is dirty");
        assert_eq!(output.summary.len(), 1);
        assert_eq!(output.warnings.len(), 1);
        output.emit(true, false).unwrap();
    }
}
