//! Execution engine: runs snippets against a persistent namespace and
//! captures what they print, raise and plot.

use std::any::Any;
use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::config::Config;
use crate::lang::{self, FigureRegistry, Interpreter, Namespace, Streams, Value};
use crate::session::RestoredSession;

mod capture;
mod plot;

use capture::CaptureGuard;
pub use plot::{render_png, PlotArtifact, RenderError};
use plot::FigureScope;

/// Everything one run of a snippet produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub sequence: u64,
    pub source: String,
    pub stdout: String,
    pub stderr: String,
    pub error: String,
    pub result: Option<String>,
    pub artifacts: Vec<PlotArtifact>,
    pub success: bool,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariableInfo {
    pub type_name: String,
    pub repr: String,
    pub size: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineOptions {
    /// Bind `math` and `plt` into every fresh namespace.
    pub inject_libraries: bool,
    pub repr_limit: usize,
    pub traceback_limit: usize,
    pub figure_size: (u32, u32),
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            inject_libraries: true,
            repr_limit: 100,
            traceback_limit: 20,
            figure_size: (640, 480),
        }
    }
}

impl EngineOptions {
    pub fn from_config(cfg: &Config) -> Self {
        let defaults = Self::default();
        Self {
            inject_libraries: cfg.get_bool("INJECT_LIBRARIES"),
            repr_limit: cfg.get_usize("REPR_LIMIT").unwrap_or(defaults.repr_limit),
            traceback_limit: cfg
                .get_usize("TRACEBACK_LIMIT")
                .filter(|n| *n > 0)
                .unwrap_or(defaults.traceback_limit),
            figure_size: cfg.figure_size(),
        }
    }
}

enum Mode {
    Statements,
    Expression,
}

/// A console session: one namespace, its history, and the figure registry
/// and stream sinks snippets run against.
pub struct Engine {
    options: EngineOptions,
    namespace: Namespace,
    history: Vec<ExecutionRecord>,
    figures: FigureRegistry,
    streams: Streams,
}

impl Engine {
    pub fn new(options: EngineOptions) -> Self {
        let figures = FigureRegistry::new(options.figure_size);
        let mut engine = Self {
            options,
            namespace: Namespace::new(),
            history: Vec::new(),
            figures,
            streams: Streams::default(),
        };
        engine.inject_prelude();
        engine
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    fn inject_prelude(&mut self) {
        if self.options.inject_libraries {
            for (name, value) in lang::prelude() {
                self.namespace.insert(name, value);
            }
        }
    }

    fn is_prelude_binding(&self, name: &str, value: &Value) -> bool {
        self.options.inject_libraries
            && matches!(value, Value::Module(_))
            && lang::prelude().iter().any(|(n, _)| *n == name)
    }

    /// Runs a snippet of statements. Never fails: faults land in the record.
    pub fn run(&mut self, source: &str) -> ExecutionRecord {
        self.execute(source, Mode::Statements)
    }

    /// Evaluates a single expression, recording its repr as the result.
    pub fn evaluate(&mut self, expression: &str) -> ExecutionRecord {
        self.execute(expression, Mode::Expression)
    }

    fn execute(&mut self, source: &str, mode: Mode) -> ExecutionRecord {
        let sequence = self.history.len() as u64 + 1;
        let mut record = ExecutionRecord {
            sequence,
            source: source.to_string(),
            stdout: String::new(),
            stderr: String::new(),
            error: String::new(),
            result: None,
            artifacts: Vec::new(),
            success: true,
            timestamp: Utc::now(),
        };

        if !source.trim().is_empty() {
            let limit = self.options.traceback_limit;
            let mut capture = CaptureGuard::new(&mut self.streams);
            let mut scope = FigureScope::enter(&mut self.figures);

            let run = AssertUnwindSafe(|| match mode {
                Mode::Statements => match lang::parse_program(source) {
                    Ok(program) => {
                        let mut interp =
                            Interpreter::new(&mut self.namespace, &mut scope, &mut capture);
                        interp
                            .execute(&program)
                            .map(|_| None)
                            .map_err(|e| e.traceback(limit))
                    }
                    Err(e) => Err(e.to_report()),
                },
                Mode::Expression => match lang::parse_expression(source.trim()) {
                    Ok(expr) => {
                        let mut interp =
                            Interpreter::new(&mut self.namespace, &mut scope, &mut capture);
                        interp
                            .evaluate(&expr)
                            .map(|v| Some(v.repr()))
                            .map_err(|e| e.traceback(limit))
                    }
                    Err(e) => Err(e.to_report()),
                },
            });
            let outcome: Result<Option<String>, String> =
                panic::catch_unwind(run).unwrap_or_else(|payload| Err(internal_error(&*payload)));

            record.artifacts = scope.finish();
            let (stdout, stderr) = capture.finish();
            record.stdout = stdout;
            record.stderr = stderr;
            match outcome {
                Ok(result) => record.result = result,
                Err(error) => {
                    record.error = error;
                    record.success = false;
                }
            }
        }

        debug!(
            sequence,
            success = record.success,
            stdout_bytes = record.stdout.len(),
            artifacts = record.artifacts.len(),
            "snippet executed"
        );
        self.history.push(record.clone());
        record
    }

    pub fn history(&self) -> &[ExecutionRecord] {
        &self.history
    }

    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    /// Bindings the user created: no dunder names, no untouched prelude.
    pub fn user_entries(&self) -> impl Iterator<Item = (&String, &Value)> + '_ {
        self.namespace
            .iter()
            .filter(|(name, value)| !name.starts_with("__") && !self.is_prelude_binding(name, value))
    }

    /// User-visible variables with a short description of each.
    pub fn variables(&self) -> BTreeMap<String, VariableInfo> {
        self.user_entries()
            .map(|(name, value)| (name.clone(), describe(value, self.options.repr_limit)))
            .collect()
    }

    /// Back to the state of a freshly constructed engine.
    pub fn reset(&mut self) {
        self.namespace.clear();
        self.history.clear();
        self.figures.close_all();
        self.inject_prelude();
    }

    /// Drops user variables, keeping modules (injected or imported) and history.
    pub fn clear_variables(&mut self) {
        self.namespace
            .retain(|_, value| matches!(value, Value::Module(_)));
        self.inject_prelude();
    }

    /// Binds `name` directly, bypassing snippet execution.
    pub fn bind(&mut self, name: &str, value: Value) -> anyhow::Result<()> {
        if !lang::is_identifier(name) {
            anyhow::bail!("invalid variable name: {name:?}");
        }
        self.namespace.insert(name, value);
        Ok(())
    }

    pub fn unbind(&mut self, name: &str) -> Option<Value> {
        self.namespace.remove(name)
    }

    /// Number of bindings, excluding dunder names.
    pub fn namespace_len(&self) -> usize {
        self.namespace
            .iter()
            .filter(|(name, _)| !name.starts_with("__"))
            .count()
    }

    /// Replaces namespace and history with a loaded session.
    pub fn restore(&mut self, session: RestoredSession) {
        self.namespace.clear();
        self.figures.close_all();
        self.inject_prelude();
        for (name, value) in session.entries {
            self.namespace.insert(name, value);
        }
        self.history = session.history;
    }
}

/// Report for a fault inside the interpreter itself; the namespace keeps
/// whatever the snippet bound before it.
fn internal_error(payload: &(dyn Any + Send)) -> String {
    let detail = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown fault".to_string());
    error!(%detail, "interpreter fault while running snippet");
    format!("SystemError: internal interpreter error: {detail}\n")
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(EngineOptions::default())
    }
}

pub fn describe(value: &Value, repr_limit: usize) -> VariableInfo {
    let full = value.repr();
    let repr = if full.chars().count() > repr_limit {
        let mut cut: String = full.chars().take(repr_limit).collect();
        cut.push_str("...");
        cut
    } else {
        full
    };
    let size = match value.len() {
        Some(n) => format!("length: {n}"),
        None => "scalar".to_string(),
    };
    VariableInfo {
        type_name: value.type_name(),
        repr,
        size,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn repr_is_truncated_with_ellipsis() {
        let info = describe(&Value::from("x".repeat(300)), 10);
        assert_eq!(info.repr, "'xxxxxxxxx...");
        assert_eq!(info.size, "length: 300");
        assert_eq!(info.type_name, "str");
    }

    #[test]
    fn scalars_have_no_length() {
        assert_eq!(describe(&Value::Int(3), 100).size, "scalar");
    }

    #[test]
    fn prelude_is_hidden_from_variables() {
        let engine = Engine::default();
        assert!(engine.variables().is_empty());
        assert_eq!(engine.namespace_len(), 2);
    }
}
