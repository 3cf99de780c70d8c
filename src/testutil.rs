//! Scripted session fakes for unit tests.
//!
//! A [`ScriptedConnector`] hands out executors that answer commands from a
//! substring-matched rule table and record everything they were asked to run,
//! so command sequences can be asserted without a live host.

use crate::error::{AppError, Result};
use crate::session::{Connector, ExecutionResult, Executor};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Clone)]
enum Response {
    Output(String),
    Error(String),
}

#[derive(Clone)]
struct Rule {
    needle: String,
    response: Response,
}

/// Connector whose executors answer from a shared rule table
pub struct ScriptedConnector {
    rules: Arc<Vec<Rule>>,
    log: Arc<Mutex<Vec<String>>>,
    refuse_connect: bool,
}

impl ScriptedConnector {
    /// Rules applied to every command of every session; first substring
    /// match wins, unmatched commands succeed with empty output.
    pub fn repeating(rules: Vec<(&str, &str)>) -> Self {
        let rules = rules
            .into_iter()
            .map(|(needle, stdout)| Rule {
                needle: needle.to_string(),
                response: Response::Output(stdout.to_string()),
            })
            .collect();
        Self {
            rules: Arc::new(rules),
            log: Arc::new(Mutex::new(Vec::new())),
            refuse_connect: false,
        }
    }

    /// Commands containing `needle` fail instead of answering
    pub fn with_failure(mut self, needle: &str, message: &str) -> Self {
        let mut rules = (*self.rules).clone();
        rules.insert(
            0,
            Rule {
                needle: needle.to_string(),
                response: Response::Error(message.to_string()),
            },
        );
        self.rules = Arc::new(rules);
        self
    }

    /// Connector that refuses every connection attempt
    pub fn unreachable() -> Self {
        Self {
            rules: Arc::new(Vec::new()),
            log: Arc::new(Mutex::new(Vec::new())),
            refuse_connect: true,
        }
    }

    /// Every command executed through any session, in order
    pub fn commands(&self) -> Vec<String> {
        self.log.lock().map(|l| l.clone()).unwrap_or_default()
    }
}

impl Connector for ScriptedConnector {
    fn connect(&self, _persistent: bool) -> Result<Box<dyn Executor>> {
        if self.refuse_connect {
            return Err(AppError::connection("scripted host unreachable"));
        }
        Ok(Box::new(ScriptedExecutor {
            rules: Arc::clone(&self.rules),
            log: Arc::clone(&self.log),
        }))
    }
}

struct ScriptedExecutor {
    rules: Arc<Vec<Rule>>,
    log: Arc<Mutex<Vec<String>>>,
}

impl Executor for ScriptedExecutor {
    fn execute(&mut self, command: &str) -> Result<ExecutionResult> {
        if let Ok(mut log) = self.log.lock() {
            log.push(command.to_string());
        }
        for rule in self.rules.iter() {
            if command.contains(&rule.needle) {
                return match &rule.response {
                    Response::Output(stdout) => Ok(ExecutionResult::ok(stdout.clone())),
                    Response::Error(message) => Err(AppError::session(message.clone())),
                };
            }
        }
        Ok(ExecutionResult::ok(String::new()))
    }

    fn execute_with_timeout(&mut self, command: &str, _timeout: Duration) -> Result<ExecutionResult> {
        self.execute(command)
    }

    fn close(&mut self) {}
}
