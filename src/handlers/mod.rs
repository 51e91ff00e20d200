//! Front-end handlers: the batch runner and the interactive console share a
//! [`Workspace`] holding the engine and everything needed around it.

pub mod repl;
pub mod run;

use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use is_terminal::IsTerminal;
use tracing::info;

use snipcon::{
    config::Config,
    execution::{Engine, EngineOptions, ExecutionRecord},
    printer::{stats_text, Color, MarkdownPrinter, TextPrinter},
    session::{self, ExportFormat, SessionFiles},
};

/// Where a session goes to or comes from: a bare name lives in the session
/// directory, anything that looks like a path is used as-is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Named(String),
    Path(PathBuf),
}

impl Target {
    pub fn parse(arg: &str) -> Self {
        if arg.contains(['/', '\\', '.']) {
            Target::Path(PathBuf::from(arg))
        } else {
            Target::Named(arg.to_string())
        }
    }
}

pub struct Workspace {
    pub engine: Engine,
    pub files: SessionFiles,
    pub printer: TextPrinter,
    pub markdown: bool,
    pub plots_dir: Option<PathBuf>,
}

impl Workspace {
    pub fn new(cfg: &Config, no_prelude: bool, markdown: bool, plots_dir: Option<PathBuf>) -> Result<Self> {
        let mut options = EngineOptions::from_config(cfg);
        if no_prelude {
            options.inject_libraries = false;
        }
        let color = cfg.get("DEFAULT_COLOR").and_then(|c| Color::from_name(&c));
        if let Some(dir) = &plots_dir {
            fs::create_dir_all(dir)
                .with_context(|| format!("creating plots directory {}", dir.display()))?;
        }
        Ok(Self {
            engine: Engine::new(options),
            files: SessionFiles::from_config(cfg)?,
            printer: TextPrinter {
                color,
                styled: std::io::stdout().is_terminal(),
            },
            markdown,
            plots_dir,
        })
    }

    /// Runs a snippet, prints what it produced and stores its figures.
    pub fn run_snippet(&mut self, source: &str) -> Result<ExecutionRecord> {
        let record = self.engine.run(source);
        self.printer.print_record(&record);
        self.write_plots(&record)?;
        Ok(record)
    }

    /// Like [`Workspace::run_snippet`] but echoes the expression's value.
    pub fn evaluate(&mut self, expression: &str) -> Result<ExecutionRecord> {
        let record = self.engine.evaluate(expression);
        let shown = ExecutionRecord {
            result: record.result.clone().filter(|r| r != "None"),
            ..record.clone()
        };
        self.printer.print_record(&shown);
        self.write_plots(&shown)?;
        Ok(record)
    }

    fn write_plots(&self, record: &ExecutionRecord) -> Result<()> {
        let Some(dir) = &self.plots_dir else {
            return Ok(());
        };
        for artifact in &record.artifacts {
            let path = dir.join(format!(
                "snippet{:03}_fig{}.{}",
                record.sequence,
                artifact.index + 1,
                artifact.format
            ));
            fs::write(&path, &artifact.data)
                .with_context(|| format!("writing figure {}", path.display()))?;
            info!(path = %path.display(), "figure written");
        }
        Ok(())
    }

    pub fn save(&self, target: &Target) -> Result<()> {
        let saved = session::save(&self.engine)?;
        match target {
            Target::Named(name) => self.files.write(name, &saved.blob)?,
            Target::Path(path) => fs::write(path, &saved.blob)
                .with_context(|| format!("writing session {}", path.display()))?,
        }
        if saved.unserializable > 0 {
            self.printer.print(&format!(
                "saved; {} variable(s) could not be saved: {}",
                saved.unserializable,
                saved.omitted_names.join(", ")
            ));
        }
        Ok(())
    }

    pub fn load(&mut self, target: &Target) -> Result<()> {
        let blob = match target {
            Target::Named(name) => self.files.read(name)?,
            Target::Path(path) => read_text(path)?,
        };
        self.restore_blob(&blob)
    }

    fn restore_blob(&mut self, blob: &str) -> Result<()> {
        let restored = session::load(blob).context("loading session")?;
        for failure in &restored.failures {
            self.printer
                .print(&format!("skipped `{}`: {}", failure.name, failure.reason));
        }
        self.engine.restore(restored);
        Ok(())
    }

    pub fn export(&self, path: &Path, format: ExportFormat) -> Result<()> {
        let text = session::export(self.engine.history(), format)?;
        fs::write(path, text).with_context(|| format!("writing transcript {}", path.display()))
    }

    pub fn backup(&self) -> Result<String> {
        let saved = session::save(&self.engine)?;
        self.files.backup(&saved.blob)
    }

    pub fn restore_backup(&mut self, key: &str) -> Result<()> {
        let blob = self.files.read_backup(key)?;
        self.restore_blob(&blob)
    }

    pub fn show_backups(&self) {
        let backups = self.files.list_backups();
        if backups.is_empty() {
            self.printer.print("(no backups)");
        }
        for key in backups {
            println!("{key}");
        }
    }

    pub fn show_sessions(&self) {
        for name in self.files.list() {
            println!("{name}");
        }
    }

    pub fn show_vars(&self) {
        self.printer.print_variables(&self.engine.variables());
    }

    pub fn show_stats(&self) {
        let stats = session::stats(self.engine.history());
        if self.markdown {
            MarkdownPrinter::default().print(&stats_markdown(&stats_text(&stats)));
        } else {
            self.printer.print_stats(&stats);
        }
    }

    pub fn show_history(&self) -> Result<()> {
        if self.markdown {
            let md = session::export(self.engine.history(), ExportFormat::Markdown)?;
            MarkdownPrinter::default().print(&md);
            return Ok(());
        }
        for record in self.engine.history() {
            let status = if record.success { "ok " } else { "err" };
            let first = record.source.lines().next().unwrap_or("");
            let more = if record.source.lines().count() > 1 { " ..." } else { "" };
            println!("[{:>3}] {status} {first}{more}", record.sequence);
        }
        Ok(())
    }
}

fn read_text(path: &Path) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))
}

// `label:   value` lines as a two-column markdown table.
fn stats_markdown(text: &str) -> String {
    let mut md = String::from("|stat|value|\n|-|-|\n");
    for line in text.lines() {
        if let Some((label, value)) = line.split_once(':') {
            md.push_str(&format!("|{}|{}|\n", label.trim(), value.trim()));
        }
    }
    md
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn bare_names_are_session_names() {
        assert_eq!(Target::parse("work"), Target::Named("work".into()));
        assert_eq!(Target::parse("out/s.json"), Target::Path("out/s.json".into()));
        assert_eq!(Target::parse("s.json"), Target::Path("s.json".into()));
    }

    #[test]
    fn stats_table() {
        let md = stats_markdown("code blocks:   2\nfirst run:     2024-01-01 00:00:00 UTC\n");
        assert_eq!(
            md,
            "|stat|value|\n|-|-|\n|code blocks|2|\n|first run|2024-01-01 00:00:00 UTC|\n"
        );
    }
}
