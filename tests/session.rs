use anyhow::Result;
use pretty_assertions::assert_eq;
use snipcon::execution::{Engine, EngineOptions};
use snipcon::lang::Value;
use snipcon::session::{self, ExportFormat, FormatError, SessionFiles};

fn populated() -> Engine {
    let mut engine = Engine::default();
    engine.run("x = 5\nratio = 0.25\nname = 'snip'\nflags = [True, None]");
    engine.run("pair = (1, 'a')\ntable = {'k': [1, 2], 3: 'three'}\nr = range(0, 10, 2)");
    engine.run("def double(v):\n    return v * 2\nplt.plot([1, 2, 3])");
    engine.run("print(double(x))");
    engine.run("raise ValueError('nope')");
    engine
}

#[test]
fn round_trip_reproduces_history_and_values() -> Result<()> {
    let engine = populated();
    let saved = session::save(&engine)?;
    // `double` is a function and cannot be stored
    assert_eq!(saved.unserializable, 1);
    assert_eq!(saved.omitted_names, vec!["double".to_string()]);

    let restored = session::load(&saved.blob)?;
    assert_eq!(restored.history, engine.history());
    assert!(restored.failures.is_empty());
    assert_eq!(restored.omitted, 1);

    let mut target = Engine::default();
    target.restore(restored);
    assert_eq!(target.history(), engine.history());
    for name in ["x", "ratio", "name", "flags", "pair", "table", "r"] {
        let original = engine.namespace().get(name).map(Value::repr);
        let back = target.namespace().get(name).map(Value::repr);
        assert_eq!(back, original, "{name}");
    }
    assert!(target.namespace().get("double").is_none());

    // restored state is live
    let record = target.run("print(x * 2, table[3], len(r))");
    assert_eq!(record.stdout, "10 three 5\n");
    assert_eq!(record.sequence, engine.history().len() as u64 + 1);
    Ok(())
}

#[test]
fn saved_artifacts_survive_as_base64() -> Result<()> {
    let engine = populated();
    let saved = session::save(&engine)?;
    let doc: serde_json::Value = serde_json::from_str(&saved.blob)?;
    assert_eq!(doc["header"]["format"], "snipcon-session");
    assert_eq!(doc["header"]["version"], 1);
    assert_eq!(doc["namespace"]["entries"]["x"], serde_json::json!({"type": "int", "value": 5}));
    let data = doc["history"][2]["artifacts"][0]["data"].as_str().unwrap_or_default();
    assert!(data.starts_with("iVBORw0KGgo"), "png magic in base64");

    let restored = session::load(&saved.blob)?;
    assert_eq!(restored.history[2].artifacts, engine.history()[2].artifacts);
    Ok(())
}

#[test]
fn save_is_deterministic_apart_from_timestamp() -> Result<()> {
    let engine = populated();
    let strip = |blob: &str| -> Result<serde_json::Value> {
        let mut doc: serde_json::Value = serde_json::from_str(blob)?;
        doc["header"]["saved_at"] = serde_json::Value::Null;
        Ok(doc)
    };
    let a = strip(&session::save(&engine)?.blob)?;
    let b = strip(&session::save(&engine)?.blob)?;
    assert_eq!(a, b);
    Ok(())
}

#[test]
fn malformed_documents_are_rejected_whole() {
    assert!(matches!(session::load("{not json"), Err(FormatError::Malformed(_))));
    assert!(matches!(session::load("[]"), Err(FormatError::Malformed(_))));
    assert!(matches!(
        session::load(r#"{"history": [], "namespace": {"entries": {}}}"#),
        Err(FormatError::MissingSection("header"))
    ));
    assert!(matches!(
        session::load(
            r#"{"header": {"format": "other", "version": 1, "saved_at": "2024-01-01T00:00:00Z"},
                "history": [], "namespace": {"entries": {}}}"#
        ),
        Err(FormatError::WrongFormat(_))
    ));
    assert!(matches!(
        session::load(
            r#"{"header": {"format": "snipcon-session", "version": 1, "saved_at": "2024-01-01T00:00:00Z"},
                "history": [{"sequence": "one"}], "namespace": {"entries": {}}}"#
        ),
        Err(FormatError::InvalidSection { section: "history", .. })
    ));
}

#[test]
fn failed_load_leaves_engine_untouched() {
    let mut engine = populated();
    let before = engine.history().len();
    if let Ok(restored) = session::load("garbage") {
        engine.restore(restored);
    }
    assert_eq!(engine.history().len(), before);
    assert_eq!(engine.namespace().get("x"), Some(&Value::Int(5)));
}

#[test]
fn exports_operate_on_records() -> Result<()> {
    let engine = populated();

    let md = session::export(engine.history(), ExportFormat::Markdown)?;
    assert!(md.contains("x = 5"));
    assert!(md.contains("```text\n10\n```"));
    assert!(md.contains("ValueError: nope"));
    assert!(md.contains("](data:image/png;base64,iVBORw0KGgo"));

    let json = session::export(engine.history(), ExportFormat::Json)?;
    let records: serde_json::Value = serde_json::from_str(&json)?;
    assert_eq!(records.as_array().map(Vec::len), Some(engine.history().len()));
    assert_eq!(records[3]["stdout"], "10\n");
    Ok(())
}

#[test]
fn stats_summarise_history() {
    let engine = populated();
    let stats = session::stats(engine.history());
    assert_eq!(stats.executions, 5);
    assert_eq!(stats.successful, 4);
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.artifacts, 1);
    assert_eq!(stats.total_lines, 4 + 3 + 3 + 1 + 1);
}

#[test]
fn backups_on_disk_restore_a_session() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let files = SessionFiles::new(dir.path().join("sessions"), 5)?;
    let engine = populated();

    let key = files.backup(&session::save(&engine)?.blob)?;
    assert!(key.starts_with("backup_"));
    assert_eq!(files.list_backups(), vec![key.clone()]);

    let mut other = Engine::default();
    other.restore(session::load(&files.read_backup(&key)?)?);
    assert_eq!(other.history().len(), 5);
    assert_eq!(other.variables().len(), engine.variables().len() - 1);

    files.write("named", &session::save(&other)?.blob)?;
    assert_eq!(files.list(), vec!["named".to_string()]);
    Ok(())
}

#[test]
fn floats_survive_save_and_load_bit_for_bit() -> Result<()> {
    let samples = [
        -1.8218816927580057e294,
        0.1,
        1.0 / 3.0,
        5e-324,
        2.2250738585072014e-308,
        f64::MAX,
        -0.0,
        6.02214076e23,
    ];
    let mut engine = Engine::new(EngineOptions {
        inject_libraries: false,
        ..EngineOptions::default()
    });
    for (i, f) in samples.iter().enumerate() {
        engine.bind(&format!("f{i}"), Value::Float(*f))?;
    }
    engine.bind("all", Value::list(samples.iter().map(|f| Value::Float(*f)).collect()))?;

    let mut target = Engine::default();
    target.restore(session::load(&session::save(&engine)?.blob)?);
    for (i, f) in samples.iter().enumerate() {
        match target.namespace().get(&format!("f{i}")) {
            Some(Value::Float(back)) => assert_eq!(back.to_bits(), f.to_bits(), "f{i}"),
            other => panic!("f{i} restored as {other:?}"),
        }
    }
    let Some(Value::List(all)) = target.namespace().get("all") else {
        panic!("list of floats was not restored");
    };
    let bits: Vec<u64> = all
        .borrow()
        .iter()
        .filter_map(Value::as_f64)
        .map(f64::to_bits)
        .collect();
    assert_eq!(bits, samples.iter().map(|f| f.to_bits()).collect::<Vec<_>>());
    Ok(())
}
