//! Batch mode: run files and `-e` snippets, then report and persist.

use std::io::{self, Read};

use anyhow::{bail, Result};
use tracing::debug;

use snipcon::config::Config;

use crate::cli::Cli;
use crate::handlers::{repl, read_text, Target, Workspace};

pub fn run(args: &Cli, cfg: &Config, markdown: bool) -> Result<()> {
    let mut ws = Workspace::new(cfg, args.no_prelude, markdown, args.plots_dir.clone())?;

    if args.list_backups {
        ws.show_backups();
        return Ok(());
    }

    if let Some(path) = &args.load {
        ws.load(&Target::Path(path.clone()))?;
    } else if let Some(key) = &args.restore_backup {
        ws.restore_backup(key)?;
    }

    let mut failed = 0usize;
    for file in &args.files {
        let source = if file.as_os_str() == "-" {
            let mut buf = String::new();
            io::stdin().read_to_string(&mut buf)?;
            buf
        } else {
            read_text(file)?
        };
        debug!(file = %file.display(), "running file");
        if !ws.run_snippet(&source)?.success {
            failed += 1;
        }
    }
    for code in &args.exec {
        if !ws.run_snippet(code)?.success {
            failed += 1;
        }
    }

    if args.wants_repl() {
        repl::run(&mut ws)?;
    }

    if args.vars {
        ws.show_vars();
    }
    if args.stats {
        ws.show_stats();
    }
    if let Some(path) = &args.save {
        ws.save(&Target::Path(path.clone()))?;
    }
    if let Some(path) = &args.export {
        ws.export(path, args.format.into())?;
    }
    if args.backup {
        let key = ws.backup()?;
        ws.printer.print(&format!("backup stored as {key}"));
    }

    if failed > 0 {
        bail!("{failed} snippet(s) raised an error");
    }
    Ok(())
}
