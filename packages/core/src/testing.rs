//! Scripted command runner for unit tests.

use std::cell::RefCell;

use crate::error::Result;
use crate::executor::{CommandOutput, CommandRunner};

/// Answers commands from a list of prefix rules and records every call.
///
/// Rules are matched in insertion order against the full command line
/// (`program arg1 arg2 ...`). Unmatched commands succeed with no output.
#[derive(Default)]
pub(crate) struct ScriptedRunner {
    rules: Vec<(String, CommandOutput)>,
    calls: RefCell<Vec<String>>,
}

impl ScriptedRunner {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn on_ok(mut self, prefix: &str, stdout: &str) -> Self {
        self.rules.push((
            prefix.to_string(),
            CommandOutput {
                code: Some(0),
                stdout: stdout.to_string(),
                stderr: String::new(),
            },
        ));
        self
    }

    pub(crate) fn on_fail(mut self, prefix: &str, code: i32, stderr: &str) -> Self {
        self.rules.push((
            prefix.to_string(),
            CommandOutput {
                code: Some(code),
                stdout: String::new(),
                stderr: stderr.to_string(),
            },
        ));
        self
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }

    pub(crate) fn called(&self, prefix: &str) -> bool {
        self.calls.borrow().iter().any(|c| c.starts_with(prefix))
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(&self, program: &str, args: &[&str]) -> Result<CommandOutput> {
        let line = std::iter::once(program)
            .chain(args.iter().copied())
            .collect::<Vec<_>>()
            .join(" ");
        self.calls.borrow_mut().push(line.clone());

        let output = self
            .rules
            .iter()
            .find(|(prefix, _)| line.starts_with(prefix.as_str()))
            .map(|(_, output)| output.clone())
            .unwrap_or(CommandOutput {
                code: Some(0),
                ..Default::default()
            });
        Ok(output)
    }
}
