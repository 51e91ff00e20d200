use std::path::PathBuf;

use clap::{ArgGroup, Parser, ValueEnum};

use snipcon::session::ExportFormat;

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatArg {
    Md,
    Json,
}

impl From<FormatArg> for ExportFormat {
    fn from(f: FormatArg) -> Self {
        match f {
            FormatArg::Md => ExportFormat::Markdown,
            FormatArg::Json => ExportFormat::Json,
        }
    }
}

#[derive(Parser, Debug, Clone)]
#[command(name = "snipcon", about = "Interactive snippet console with output, error and plot capture", version)]
#[command(group(ArgGroup::new("md_switch").args(["md", "no_md"]).multiple(false)))]
#[command(group(ArgGroup::new("restore_source").args(["load", "restore_backup"]).multiple(false)))]
pub struct Cli {
    /// Snippet files to run, in order. Use `-` for stdin.
    #[arg(value_name = "FILES")]
    pub files: Vec<PathBuf>,

    /// Run CODE as a snippet. Can be repeated; runs after FILES.
    #[arg(short = 'e', long = "exec", value_name = "CODE", action = clap::ArgAction::Append)]
    pub exec: Vec<String>,

    /// Load a saved session before running anything.
    #[arg(long, value_name = "PATH")]
    pub load: Option<PathBuf>,

    /// Save the session when done.
    #[arg(long, value_name = "PATH")]
    pub save: Option<PathBuf>,

    /// Export a transcript of the session when done.
    #[arg(long, value_name = "PATH")]
    pub export: Option<PathBuf>,

    /// Transcript format for --export.
    #[arg(long, value_enum, default_value_t = FormatArg::Md, requires = "export")]
    pub format: FormatArg,

    /// Write captured figures as PNG files into DIR.
    #[arg(long = "plots-dir", value_name = "DIR")]
    pub plots_dir: Option<PathBuf>,

    /// Print the variable table when done.
    #[arg(long)]
    pub vars: bool,

    /// Print session statistics when done.
    #[arg(long)]
    pub stats: bool,

    /// Store a timestamped backup of the session when done.
    #[arg(long)]
    pub backup: bool,

    /// List stored backups and exit.
    #[arg(long = "list-backups")]
    pub list_backups: bool,

    /// Start from a stored backup.
    #[arg(long = "restore-backup", value_name = "KEY")]
    pub restore_backup: Option<String>,

    /// Do not bind `math` and `plt` into the namespace.
    #[arg(long = "no-prelude")]
    pub no_prelude: bool,

    /// Enter the interactive console (default when nothing else is run).
    #[arg(long)]
    pub repl: bool,

    /// Render markdown transcripts and stats with termimad.
    #[arg(long)]
    pub md: bool,
    /// Print plain text instead of rendered markdown.
    #[arg(long = "no-md")]
    pub no_md: bool,
}

impl Cli {
    pub fn parse() -> Self {
        <Self as Parser>::parse()
    }

    /// Explicit `--repl`, or nothing at all to run or report.
    pub fn wants_repl(&self) -> bool {
        self.repl
            || (self.files.is_empty()
                && self.exec.is_empty()
                && self.save.is_none()
                && self.export.is_none()
                && !self.vars
                && !self.stats
                && !self.backup)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn md_switches_conflict() {
        assert!(Cli::try_parse_from(["snipcon", "--md", "--no-md"]).is_err());
    }

    #[test]
    fn format_requires_export() {
        assert!(Cli::try_parse_from(["snipcon", "--format", "json"]).is_err());
        let cli = Cli::try_parse_from(["snipcon", "--export", "out.json", "--format", "json", "-e", "x=1"]).unwrap();
        assert_eq!(cli.format, FormatArg::Json);
        assert!(!cli.wants_repl());
    }

    #[test]
    fn bare_invocation_is_interactive() {
        let cli = Cli::try_parse_from(["snipcon"]).unwrap();
        assert!(cli.wants_repl());
    }
}
