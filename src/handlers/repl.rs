//! Line-oriented console. Snippets are read a line at a time; a line ending
//! in `:` opens a block that runs once an empty line is entered.

use std::{
    io::{self, Write},
    path::Path,
};

use anyhow::{bail, Result};
use owo_colors::OwoColorize;

use snipcon::{lang, session::ExportFormat};

use crate::handlers::{Target, Workspace};

const HELP: &str = "\
%vars                  list variables
%reset                 start over (namespace and history)
%clear                 drop variables, keep modules and history
%history               list executed snippets
%stats                 session statistics
%save NAME|PATH        save the session
%load NAME|PATH        replace the session with a saved one
%sessions              list named sessions
%export PATH [md|json] write a transcript
%backup                store a timestamped backup
%backups               list backups, newest first
%restore KEY           replace the session with a backup
%delbackup KEY         delete a backup
%quit                  leave the console";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Vars,
    Reset,
    Clear,
    History,
    Stats,
    Save(Target),
    Load(Target),
    Sessions,
    Export(String, ExportFormat),
    Backup,
    Backups,
    Restore(String),
    DeleteBackup(String),
    Help,
    Quit,
}

impl Command {
    /// Parses a `%` line. `Ok(None)` means the line is not a command.
    pub fn parse(line: &str) -> Result<Option<Command>> {
        let Some(rest) = line.trim().strip_prefix('%') else {
            return Ok(None);
        };
        let mut words = rest.split_whitespace();
        let name = words.next().unwrap_or("");
        let args: Vec<&str> = words.collect();
        let one = |what: &str| -> Result<String> {
            match args.as_slice() {
                [arg] => Ok(arg.to_string()),
                _ => bail!("usage: %{name} {what}"),
            }
        };
        let cmd = match name {
            "vars" | "who" => Command::Vars,
            "reset" => Command::Reset,
            "clear" => Command::Clear,
            "history" => Command::History,
            "stats" => Command::Stats,
            "save" => Command::Save(Target::parse(&one("NAME|PATH")?)),
            "load" => Command::Load(Target::parse(&one("NAME|PATH")?)),
            "sessions" => Command::Sessions,
            "export" => match args.as_slice() {
                [path] => Command::Export(path.to_string(), ExportFormat::Markdown),
                [path, format] => Command::Export(path.to_string(), format.parse()?),
                _ => bail!("usage: %export PATH [md|json]"),
            },
            "backup" => Command::Backup,
            "backups" => Command::Backups,
            "restore" => Command::Restore(one("KEY")?),
            "delbackup" => Command::DeleteBackup(one("KEY")?),
            "help" | "?" => Command::Help,
            "quit" | "exit" | "q" => Command::Quit,
            other => bail!("unknown command %{other} (try %help)"),
        };
        Ok(Some(cmd))
    }
}

/// A line that opens an indented block.
fn opens_block(line: &str) -> bool {
    let trimmed = line.trim_end();
    trimmed.ends_with(':') || trimmed.ends_with('\\')
}

fn read_line(prompt: &str) -> Result<Option<String>> {
    print!("{prompt}");
    io::stdout().flush().ok();
    let mut line = String::new();
    if io::stdin().read_line(&mut line)? == 0 {
        return Ok(None);
    }
    Ok(Some(line.trim_end_matches(['\n', '\r']).to_string()))
}

pub fn run(ws: &mut Workspace) -> Result<()> {
    let styled = ws.printer.styled;
    let prompt = if styled { format!("{} ", ">>>".green()) } else { ">>> ".to_string() };
    let more = if styled { format!("{} ", "...".green()) } else { "... ".to_string() };
    println!("snipcon console. %help lists commands, %quit or Ctrl-D leaves.");

    while let Some(line) = read_line(&prompt)? {
        if line.trim().is_empty() {
            continue;
        }
        match Command::parse(&line) {
            Ok(Some(Command::Quit)) => break,
            Ok(Some(cmd)) => {
                if let Err(e) = dispatch(ws, cmd) {
                    eprintln!("{}", format!("error: {e:#}").red());
                }
                continue;
            }
            Ok(None) => {}
            Err(e) => {
                eprintln!("{}", format!("error: {e:#}").red());
                continue;
            }
        }

        let mut source = line;
        if opens_block(&source) {
            while let Some(next) = read_line(&more)? {
                if next.trim().is_empty() {
                    break;
                }
                source.push('\n');
                source.push_str(&next);
            }
        }

        if !source.contains('\n') && lang::parse_expression(source.trim()).is_ok() {
            ws.evaluate(&source)?;
        } else {
            ws.run_snippet(&source)?;
        }
    }
    Ok(())
}

fn dispatch(ws: &mut Workspace, cmd: Command) -> Result<()> {
    match cmd {
        Command::Vars => ws.show_vars(),
        Command::Reset => {
            ws.engine.reset();
            ws.printer.print("namespace and history reset");
        }
        Command::Clear => {
            ws.engine.clear_variables();
            ws.printer.print("variables cleared");
        }
        Command::History => ws.show_history()?,
        Command::Stats => ws.show_stats(),
        Command::Save(target) => {
            ws.save(&target)?;
            ws.printer.print("session saved");
        }
        Command::Load(target) => {
            ws.load(&target)?;
            ws.printer.print(&format!(
                "session loaded: {} snippet(s), {} variable(s)",
                ws.engine.history().len(),
                ws.engine.variables().len()
            ));
        }
        Command::Sessions => ws.show_sessions(),
        Command::Export(path, format) => {
            ws.export(Path::new(&path), format)?;
            ws.printer.print(&format!("transcript written to {path}"));
        }
        Command::Backup => {
            let key = ws.backup()?;
            ws.printer.print(&format!("backup stored as {key}"));
        }
        Command::Backups => ws.show_backups(),
        Command::Restore(key) => {
            ws.restore_backup(&key)?;
            ws.printer.print(&format!("restored {key}"));
        }
        Command::DeleteBackup(key) => {
            ws.files.delete_backup(&key)?;
            ws.printer.print(&format!("deleted {key}"));
        }
        Command::Help => println!("{HELP}"),
        Command::Quit => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn plain_code_is_not_a_command() {
        assert_eq!(Command::parse("x = 1").unwrap(), None);
        assert_eq!(Command::parse("print('%d')").unwrap(), None);
    }

    #[test]
    fn commands_with_arguments() {
        assert_eq!(
            Command::parse("%save work").unwrap(),
            Some(Command::Save(Target::Named("work".into())))
        );
        assert_eq!(
            Command::parse(" %export out.json json").unwrap(),
            Some(Command::Export("out.json".into(), ExportFormat::Json))
        );
        assert_eq!(
            Command::parse("%export t.md").unwrap(),
            Some(Command::Export("t.md".into(), ExportFormat::Markdown))
        );
        assert!(Command::parse("%restore").is_err());
        assert!(Command::parse("%bogus").is_err());
    }

    #[test]
    fn block_openers() {
        assert!(opens_block("for i in range(3):"));
        assert!(opens_block("def f(x):  "));
        assert!(!opens_block("x = {'a': 1}"));
    }
}
