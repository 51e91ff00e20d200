use std::fmt::Write as _;
use std::str::FromStr;

use anyhow::bail;

use crate::execution::ExecutionRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExportFormat {
    #[default]
    Markdown,
    Json,
}

impl FromStr for ExportFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "md" | "markdown" => Ok(Self::Markdown),
            "json" => Ok(Self::Json),
            other => bail!("unknown export format `{other}` (expected md or json)"),
        }
    }
}

/// Renders a transcript of `history`. Only captured records are used, nothing
/// is re-executed.
pub fn export(history: &[ExecutionRecord], format: ExportFormat) -> anyhow::Result<String> {
    match format {
        ExportFormat::Markdown => Ok(markdown(history)),
        ExportFormat::Json => Ok(serde_json::to_string_pretty(history)?),
    }
}

fn markdown(history: &[ExecutionRecord]) -> String {
    let mut out = String::from("# snipcon session\n");
    for record in history {
        let status = if record.success { "ok" } else { "error" };
        let _ = write!(
            out,
            "\n## [{}] {} ({status})\n\n",
            record.sequence,
            record.timestamp.format("%Y-%m-%d %H:%M:%S UTC")
        );
        fenced(&mut out, "python", &record.source);
        if let Some(result) = &record.result {
            out.push_str("Result:\n\n");
            fenced(&mut out, "", result);
        }
        if !record.stdout.is_empty() {
            out.push_str("Output:\n\n");
            fenced(&mut out, "text", &record.stdout);
        }
        if !record.stderr.is_empty() {
            out.push_str("Stderr:\n\n");
            fenced(&mut out, "text", &record.stderr);
        }
        if !record.error.is_empty() {
            out.push_str("Error:\n\n");
            fenced(&mut out, "text", &record.error);
        }
        for artifact in &record.artifacts {
            let alt = artifact
                .title
                .clone()
                .unwrap_or_else(|| format!("figure {}", artifact.index + 1));
            let _ = writeln!(out, "![{alt}]({})\n", artifact.data_url());
        }
    }
    out
}

// Widens the fence when the body itself contains backtick runs.
fn fenced(out: &mut String, lang: &str, body: &str) {
    let longest = body
        .split(|c| c != '`')
        .map(str::len)
        .max()
        .unwrap_or(0);
    let fence = "`".repeat(longest.max(2) + 1);
    let _ = writeln!(out, "{fence}{lang}");
    out.push_str(body);
    if !body.ends_with('\n') {
        out.push('\n');
    }
    let _ = writeln!(out, "{fence}\n");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::Engine;

    #[test]
    fn markdown_has_code_output_and_errors() {
        let mut engine = Engine::default();
        engine.run("print('hi')");
        engine.run("raise KeyError('k')");
        let md = export(engine.history(), ExportFormat::Markdown).unwrap();
        assert!(md.starts_with("# snipcon session\n"));
        assert!(md.contains("```python\nprint('hi')\n```"));
        assert!(md.contains("```text\nhi\n```"));
        assert!(md.contains("Error:\n\n```text\nTraceback"));
        assert!(md.contains("KeyError"));
        assert!(md.contains("(error)"));
    }

    #[test]
    fn fence_grows_past_backticks_in_body() {
        let mut out = String::new();
        fenced(&mut out, "text", "a ```` b");
        assert!(out.starts_with("`````text\n"));
    }

    #[test]
    fn format_names() {
        assert_eq!("md".parse::<ExportFormat>().unwrap(), ExportFormat::Markdown);
        assert_eq!("JSON".parse::<ExportFormat>().unwrap(), ExportFormat::Json);
        assert!("pdf".parse::<ExportFormat>().is_err());
    }
}
