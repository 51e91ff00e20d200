//! Session persistence: a versioned JSON document holding the execution
//! history and the saveable part of the namespace.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::execution::{Engine, ExecutionRecord};
use crate::lang::{is_identifier, Value};

mod export;
mod snapshot;
mod store;

pub use export::{export, ExportFormat};
pub use snapshot::{SerializationError, StoredValue};
pub use store::SessionFiles;

pub const FORMAT_NAME: &str = "snipcon-session";
pub const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Header {
    format: String,
    version: u32,
    saved_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct NamespaceSection {
    entries: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    omitted: usize,
}

#[derive(Serialize)]
struct Document<'a> {
    header: Header,
    history: &'a [ExecutionRecord],
    namespace: NamespaceSection,
}

/// Output of [`save`].
#[derive(Debug, Clone)]
pub struct SavedSession {
    pub blob: String,
    /// Entries that could not be saved and were left out.
    pub unserializable: usize,
    pub omitted_names: Vec<String>,
}

/// A namespace entry that could not be brought back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreFailure {
    pub name: String,
    pub reason: String,
}

/// Output of [`load`], ready for [`Engine::restore`].
#[derive(Debug, Clone)]
pub struct RestoredSession {
    pub saved_at: DateTime<Utc>,
    pub entries: Vec<(String, Value)>,
    pub history: Vec<ExecutionRecord>,
    pub failures: Vec<RestoreFailure>,
    /// The count of entries the saving side had to leave out.
    pub omitted: usize,
}

#[derive(Debug, Error)]
pub enum FormatError {
    #[error("session document is not valid JSON: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("session document has no `{0}` section")]
    MissingSection(&'static str),
    #[error("session `{section}` section is invalid: {source}")]
    InvalidSection {
        section: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("not a snipcon session (format `{0}`)")]
    WrongFormat(String),
    #[error("unsupported session version {found} (this build reads {})", FORMAT_VERSION)]
    UnsupportedVersion { found: u32 },
}

/// Serializes the engine's history and every saveable user variable.
pub fn save(engine: &Engine) -> anyhow::Result<SavedSession> {
    let mut namespace = NamespaceSection::default();
    let mut omitted_names = Vec::new();

    for (name, value) in engine.user_entries() {
        match StoredValue::capture(value) {
            Ok(stored) => {
                namespace
                    .entries
                    .insert(name.clone(), serde_json::to_value(stored)?);
            }
            Err(e) => {
                warn!(name = %name, error = %e, "leaving variable out of saved session");
                omitted_names.push(name.clone());
            }
        }
    }
    namespace.omitted = omitted_names.len();

    let doc = Document {
        header: Header {
            format: FORMAT_NAME.to_string(),
            version: FORMAT_VERSION,
            saved_at: Utc::now(),
        },
        history: engine.history(),
        namespace,
    };
    let blob = serde_json::to_string_pretty(&doc)?;

    Ok(SavedSession {
        blob,
        unserializable: omitted_names.len(),
        omitted_names,
    })
}

/// Parses a saved session. Anything structurally wrong fails the whole load;
/// individual namespace entries that do not decode are reported and skipped.
pub fn load(blob: &str) -> Result<RestoredSession, FormatError> {
    let mut doc: serde_json::Map<String, serde_json::Value> = serde_json::from_str(blob)?;

    let header: Header = section(&mut doc, "header")?;
    if header.format != FORMAT_NAME {
        return Err(FormatError::WrongFormat(header.format));
    }
    if header.version == 0 || header.version > FORMAT_VERSION {
        return Err(FormatError::UnsupportedVersion {
            found: header.version,
        });
    }
    let history: Vec<ExecutionRecord> = section(&mut doc, "history")?;
    let namespace: NamespaceSection = section(&mut doc, "namespace")?;

    let mut entries = Vec::with_capacity(namespace.entries.len());
    let mut failures = Vec::new();
    for (name, json) in namespace.entries {
        let decoded = if is_identifier(&name) {
            serde_json::from_value::<StoredValue>(json)
                .map_err(|e| e.to_string())
                .and_then(StoredValue::into_value)
        } else {
            Err("not a valid identifier".to_string())
        };
        match decoded {
            Ok(value) => entries.push((name, value)),
            Err(reason) => {
                warn!(name = %name, reason = %reason, "skipping namespace entry on restore");
                failures.push(RestoreFailure { name, reason });
            }
        }
    }

    Ok(RestoredSession {
        saved_at: header.saved_at,
        entries,
        history,
        failures,
        omitted: namespace.omitted,
    })
}

fn section<T: serde::de::DeserializeOwned>(
    doc: &mut serde_json::Map<String, serde_json::Value>,
    name: &'static str,
) -> Result<T, FormatError> {
    let raw = doc.remove(name).ok_or(FormatError::MissingSection(name))?;
    serde_json::from_value(raw).map_err(|source| FormatError::InvalidSection {
        section: name,
        source,
    })
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SessionStats {
    pub code_blocks: usize,
    pub total_lines: usize,
    pub executions: usize,
    pub successful: usize,
    pub failed: usize,
    pub artifacts: usize,
    pub first_activity: Option<DateTime<Utc>>,
    pub last_activity: Option<DateTime<Utc>>,
}

pub fn stats(history: &[ExecutionRecord]) -> SessionStats {
    let successful = history.iter().filter(|r| r.success).count();
    SessionStats {
        code_blocks: history.iter().filter(|r| !r.source.trim().is_empty()).count(),
        total_lines: history.iter().map(|r| r.source.lines().count()).sum(),
        executions: history.len(),
        successful,
        failed: history.len() - successful,
        artifacts: history.iter().map(|r| r.artifacts.len()).sum(),
        first_activity: history.first().map(|r| r.timestamp),
        last_activity: history.last().map(|r| r.timestamp),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn future_versions_are_rejected() {
        let blob = r#"{"header":{"format":"snipcon-session","version":7,"saved_at":"2024-01-01T00:00:00Z"},
                       "history":[],"namespace":{"entries":{},"omitted":0}}"#;
        assert!(matches!(
            load(blob),
            Err(FormatError::UnsupportedVersion { found: 7 })
        ));
    }

    #[test]
    fn missing_history_is_a_format_error() {
        let blob = r#"{"header":{"format":"snipcon-session","version":1,"saved_at":"2024-01-01T00:00:00Z"},
                       "namespace":{"entries":{}}}"#;
        assert!(matches!(load(blob), Err(FormatError::MissingSection("history"))));
    }

    #[test]
    fn bad_entries_are_skipped_individually() {
        let blob = r#"{"header":{"format":"snipcon-session","version":1,"saved_at":"2024-01-01T00:00:00Z"},
                       "history":[],
                       "namespace":{"entries":{
                           "ok":{"type":"int","value":1},
                           "2bad":{"type":"int","value":2},
                           "weird":{"type":"lambda","value":"x"}
                       }}}"#;
        let restored = load(blob).unwrap();
        assert_eq!(restored.entries.len(), 1);
        assert_eq!(restored.entries[0].0, "ok");
        let names: Vec<_> = restored.failures.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["2bad", "weird"]);
    }

    #[test]
    fn stats_count_lines_and_outcomes() {
        let mut engine = Engine::default();
        engine.run("a = 1\nb = 2");
        engine.run("raise ValueError('x')");
        engine.run("");
        let s = stats(engine.history());
        assert_eq!(s.code_blocks, 2);
        assert_eq!(s.total_lines, 3);
        assert_eq!(s.executions, 3);
        assert_eq!(s.successful, 2);
        assert_eq!(s.failed, 1);
        assert!(s.first_activity <= s.last_activity);
    }
}
