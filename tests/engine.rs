use pretty_assertions::assert_eq;
use snipcon::execution::{Engine, EngineOptions};
use snipcon::lang::Value;

#[test]
fn state_persists_between_runs() {
    let mut engine = Engine::default();

    let first = engine.run("a = 2\nprint(a*3)");
    assert!(first.success);
    assert_eq!(first.stdout, "6\n");
    assert!(first.artifacts.is_empty());

    let second = engine.run("print(a)");
    assert_eq!(second.stdout, "2\n");
    assert_eq!(second.sequence, 2);
}

#[test]
fn assignment_then_use() {
    let mut engine = Engine::default();
    engine.run("x = 5");
    let record = engine.run("print(x + 1)");
    assert_eq!(record.stdout, "6\n");
    assert_eq!(record.error, "");
}

#[test]
fn raise_is_captured_not_propagated() {
    let mut engine = Engine::default();
    let record = engine.run("raise ValueError('bad')");
    assert!(!record.success);
    assert!(record.error.contains("ValueError"));
    assert!(record.error.contains("bad"));
    assert_eq!(record.stdout, "");
    assert_eq!(engine.history().len(), 1);
}

#[test]
fn output_before_the_fault_is_kept() {
    let mut engine = Engine::default();
    let record = engine.run("print('before')\nn = 1\nn / 0\nprint('after')");
    assert!(!record.success);
    assert_eq!(record.stdout, "before\n");
    assert!(record.error.starts_with("Traceback (most recent call last):\n"));
    assert!(record.error.contains("line 3"));
    assert!(record.error.trim_end().ends_with("ZeroDivisionError: division by zero"));
    // bindings made before the fault survive
    assert_eq!(engine.namespace().get("n"), Some(&Value::Int(1)));
}

#[test]
fn stderr_is_captured_separately() {
    let mut engine = Engine::default();
    let record = engine.run("import sys\nprint('out')\nprint('warn', file=sys.stderr)\nsys.stderr.write('x')");
    assert!(record.success, "{}", record.error);
    assert_eq!(record.stdout, "out\n");
    assert_eq!(record.stderr, "warn\nx");
}

#[test]
fn syntax_errors_leave_namespace_alone() {
    let mut engine = Engine::default();
    engine.run("y = 1");
    let record = engine.run("y = 2\nif y\n    y = 3");
    assert!(!record.success);
    assert!(record.error.contains("SyntaxError"));
    assert_eq!(engine.namespace().get("y"), Some(&Value::Int(1)));
}

#[test]
fn empty_snippet_is_a_successful_noop() {
    let mut engine = Engine::default();
    let record = engine.run("   \n\t");
    assert!(record.success);
    assert_eq!(record.stdout, "");
    assert_eq!(record.result, None);
    assert_eq!(engine.history().len(), 1);
}

#[test]
fn figures_are_captured_once() {
    let mut engine = Engine::default();
    let with_plot = engine.run("plt.plot([1, 2, 3], [4, 1, 9])\nplt.title('demo')\nplt.show()");
    assert!(with_plot.success, "{}", with_plot.error);
    assert_eq!(with_plot.artifacts.len(), 1);
    let artifact = &with_plot.artifacts[0];
    assert_eq!(artifact.format, "png");
    assert_eq!((artifact.width, artifact.height), (640, 480));
    assert_eq!(artifact.title.as_deref(), Some("demo"));
    assert_eq!(&artifact.data[..8], b"\x89PNG\r\n\x1a\n");

    let without = engine.run("z = 1");
    assert!(without.artifacts.is_empty());
}

#[test]
fn figures_in_creation_order() {
    let mut engine = Engine::default();
    let record = engine.run(
        "import matplotlib.pyplot as p\n\
         p.figure()\np.title('one')\np.plot([0, 1])\n\
         p.figure(figsize=(4, 3), dpi=50)\np.title('two')\np.bar([1, 2], [3, 4])",
    );
    assert!(record.success, "{}", record.error);
    let titles: Vec<_> = record.artifacts.iter().map(|a| a.title.clone()).collect();
    assert_eq!(titles, vec![Some("one".to_string()), Some("two".to_string())]);
    assert_eq!(record.artifacts[1].index, 1);
    assert_eq!((record.artifacts[1].width, record.artifacts[1].height), (200, 150));
}

#[test]
fn figures_from_failed_runs_do_not_leak() {
    let mut engine = Engine::default();
    let failed = engine.run("plt.plot([1, 2])\nraise RuntimeError('boom')");
    assert!(!failed.success);
    assert_eq!(failed.artifacts.len(), 1);
    let next = engine.run("print('clean')");
    assert!(next.artifacts.is_empty());
}

#[test]
fn evaluate_records_repr() {
    let mut engine = Engine::default();
    engine.run("items = [1, 'two', 3.0]");
    let record = engine.evaluate("items");
    assert_eq!(record.result.as_deref(), Some("[1, 'two', 3.0]"));

    let bad = engine.evaluate("missing + 1");
    assert!(!bad.success);
    assert!(bad.error.contains("NameError: name 'missing' is not defined"));
    assert_eq!(bad.result, None);
}

#[test]
fn reset_matches_a_fresh_engine() {
    let mut engine = Engine::default();
    engine.run("a = 1\ndef f():\n    return a");
    engine.run("plt.plot([1])");
    engine.reset();

    let fresh = Engine::default();
    assert!(engine.history().is_empty());
    assert_eq!(engine.namespace().names(), fresh.namespace().names());
    assert_eq!(engine.variables(), fresh.variables());
    assert_eq!(engine.run("print(1)").sequence, 1);
}

#[test]
fn clear_variables_keeps_modules_and_history() {
    let mut engine = Engine::default();
    engine.run("import sys\nx = 1\ny = [1, 2]");
    engine.clear_variables();
    assert!(engine.variables().get("x").is_none());
    assert!(engine.namespace().contains("sys"));
    assert!(engine.namespace().contains("math"));
    assert_eq!(engine.history().len(), 1);
}

#[test]
fn variables_describe_user_bindings() {
    let mut engine = Engine::default();
    engine.run("n = 3\nname = 'abc'\n__hidden = 1");
    let vars = engine.variables();
    assert_eq!(vars.keys().cloned().collect::<Vec<_>>(), vec!["n", "name"]);
    assert_eq!(vars["n"].type_name, "int");
    assert_eq!(vars["n"].size, "scalar");
    assert_eq!(vars["name"].repr, "'abc'");
    assert_eq!(vars["name"].size, "length: 3");
}

#[test]
fn bind_and_unbind() -> anyhow::Result<()> {
    let mut engine = Engine::new(EngineOptions {
        inject_libraries: false,
        ..EngineOptions::default()
    });
    assert_eq!(engine.namespace_len(), 0);

    engine.bind("answer", Value::Int(42))?;
    assert!(engine.bind("not valid", Value::None).is_err());
    assert!(engine.bind("for", Value::None).is_err());
    assert_eq!(engine.run("print(answer)").stdout, "42\n");
    assert_eq!(engine.namespace_len(), 1);

    assert_eq!(engine.unbind("answer"), Some(Value::Int(42)));
    assert_eq!(engine.unbind("answer"), None);
    assert!(!engine.run("answer").success);
    Ok(())
}

#[test]
fn prelude_can_be_disabled() {
    let mut engine = Engine::new(EngineOptions {
        inject_libraries: false,
        ..EngineOptions::default()
    });
    let record = engine.run("math.sqrt(4)");
    assert!(record.error.contains("NameError"));
    let record = engine.run("import math\nprint(math.sqrt(16))");
    assert_eq!(record.stdout, "4.0\n");
}

#[test]
fn traceback_respects_frame_limit() {
    let mut engine = Engine::new(EngineOptions {
        traceback_limit: 2,
        ..EngineOptions::default()
    });
    let record = engine.run("def f(n):\n    if n == 0:\n        raise KeyError('k')\n    return f(n - 1)\nf(5)");
    assert!(!record.success);
    let frames = record.error.matches("File \"<console>\"").count();
    assert_eq!(frames, 2);
    assert!(record.error.contains("earlier frames omitted"));
}

#[test]
fn engines_do_not_share_state() {
    let mut first = Engine::default();
    let mut second = Engine::default();
    first.run("shared = 1");
    let plotted = first.run("plt.figure()\nplt.plot([1, 2])");
    assert_eq!(plotted.artifacts.len(), 1);

    let record = second.run("print(shared)");
    assert!(record.error.contains("NameError"), "{}", record.error);
    assert_eq!(record.sequence, 1);
    assert!(second.run("x = 1").artifacts.is_empty());
    assert_eq!(first.history().len(), 2);
    assert_eq!(second.history().len(), 2);
    assert!(second.variables().get("shared").is_none());
}

#[test]
fn integer_edges_do_not_crash_the_host() {
    let mut engine = Engine::default();
    engine.run("big = range(-9223372036854775807 - 1, 9223372036854775807)");

    let record = engine.run(
        "print([1, 2][1::9223372036854775807])\n\
         print(9223372036854775806 in big, big[-1])\n\
         print(round(5, -9223372036854775807 - 1))\n\
         print(range(10)[2:8:2], range(10)[::-1])",
    );
    assert!(record.success, "{}", record.error);
    assert_eq!(
        record.stdout,
        "[2]\nTrue 9223372036854775806\n0\nrange(2, 8, 2) range(9, -1, -1)\n"
    );

    for (source, kind) in [
        ("len(big)", "OverflowError"),
        ("list(enumerate([1, 2], 9223372036854775807))", "OverflowError"),
        ("math.gcd(-9223372036854775807 - 1, 0)", "OverflowError"),
        ("'ab' * 10 ** 18", "MemoryError"),
        ("list(big)", "MemoryError"),
    ] {
        let record = engine.run(source);
        assert!(!record.success, "{source}");
        assert!(record.error.contains(kind), "{source}: {}", record.error);
    }
    assert_eq!(engine.run("print('alive')").stdout, "alive\n");
}

#[test]
fn recursion_is_bounded_before_the_host_stack() {
    let mut engine = Engine::default();
    let record = engine.run(
        "def depth(n):\n    if n == 0:\n        return 0\n    return 1 + depth(n - 1)\nprint(depth(150))",
    );
    assert!(record.success, "{}", record.error);
    assert_eq!(record.stdout, "150\n");

    let runaway = engine.run("def f(n):\n    return f(n + 1)\nf(0)");
    assert!(runaway.error.contains("RecursionError"), "{}", runaway.error);
    assert_eq!(engine.run("print(depth(3))").stdout, "3\n");
}

#[test]
fn deeply_nested_containers_are_safe() {
    let mut engine = Engine::default();
    let record = engine.run(
        "x = []\nfor i in range(100000):\n    x = [x]\n\
         y = []\nfor i in range(100000):\n    y = [y]\n\
         x == y",
    );
    assert!(!record.success);
    assert!(record.error.contains("RecursionError"), "{}", record.error);

    let record = engine.run("x = None\ny = None\nprint('released')");
    assert_eq!(record.stdout, "released\n");

    let record = engine.run("a = [1]\na.append(a)\nprint(a)");
    assert_eq!(record.stdout, "[1, [...]]\n");
}
