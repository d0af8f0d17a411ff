//! In-memory command runner used by tests and benchmarks.
//!
//! It understands the handful of command shapes the exporter issues:
//! the multi-file `fgrep` search, `cat <file>`, and exact command lines
//! registered with [`ScriptedRunner::with_response`].

use super::CommandRunner;
use crate::error::{ExporterError, Result};
use crate::metrics::preread::SEARCH_COMMAND;
use async_trait::async_trait;
use chrono::{FixedOffset, Offset, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

/// Scripted stand-in for a remote host.
#[derive(Debug, Default)]
pub struct ScriptedRunner {
    files: HashMap<String, String>,
    responses: HashMap<String, String>,
    offset_secs: i32,
    offline: bool,
    failures: HashSet<String>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `contents` for `path` through both `cat` and the batch search.
    pub fn with_file(mut self, path: impl Into<String>, contents: impl Into<String>) -> Self {
        self.files.insert(path.into(), contents.into());
        self
    }

    /// Answer an exact command line with `output`.
    pub fn with_response(mut self, command: impl Into<String>, output: impl Into<String>) -> Self {
        self.responses.insert(command.into(), output.into());
        self
    }

    pub fn with_clock_offset(mut self, secs: i32) -> Self {
        self.offset_secs = secs;
        self
    }

    /// Fail every command as if the transport were down.
    pub fn offline(mut self) -> Self {
        self.offline = true;
        self
    }

    /// Fail `command` exactly, as if the session had dropped.
    pub fn failing(mut self, command: impl Into<String>) -> Self {
        self.failures.insert(command.into());
        self
    }

    /// Every command line executed so far, in order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Like grep, lines are only prefixed with `path:` when more than one
    /// file operand is given.
    fn search(&self, args: &str) -> String {
        let operands: Vec<&str> = args
            .split_whitespace()
            .flat_map(|pattern| self.expand(pattern))
            .collect();
        let prefixed = operands.len() > 1;

        let mut output = String::new();
        for path in operands {
            let Some(contents) = self.files.get(path) else {
                continue;
            };
            for line in contents.lines() {
                if prefixed {
                    output.push_str(path);
                    output.push(':');
                }
                output.push_str(line);
                output.push('\n');
            }
        }
        output
    }

    /// Shell-style expansion of `<dir>/*.prom`. A glob without matches and
    /// any other argument are passed through as written.
    fn expand<'a>(&'a self, pattern: &'a str) -> Vec<&'a str> {
        let Some(dir) = pattern.strip_suffix("/*.prom") else {
            return vec![pattern];
        };
        let mut matches: Vec<&str> = self
            .files
            .keys()
            .map(String::as_str)
            .filter(|path| {
                path.strip_prefix(dir)
                    .map_or(false, |rest| rest.starts_with('/') && rest.ends_with(".prom"))
            })
            .collect();
        if matches.is_empty() {
            return vec![pattern];
        }
        matches.sort_unstable();
        matches
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn execute(&self, command: &str) -> Result<String> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(command.to_string());
        }

        if self.offline || self.failures.contains(command) {
            return Err(ExporterError::exec_error("remote host unreachable"));
        }

        if let Some(output) = self.responses.get(command) {
            return Ok(output.clone());
        }
        if let Some(args) = command.strip_prefix(SEARCH_COMMAND) {
            return Ok(self.search(args));
        }
        if let Some(path) = command.strip_prefix("/bin/cat ") {
            return Ok(self.files.get(path.trim()).cloned().unwrap_or_default());
        }

        Err(ExporterError::exec_error(format!("no scripted response for {:?}", command)))
    }

    fn clock_offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.offset_secs).unwrap_or_else(|| Utc.fix())
    }
}
