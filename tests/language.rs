use pretty_assertions::assert_eq;
use snipcon::execution::Engine;

fn output(source: &str) -> String {
    let mut engine = Engine::default();
    let record = engine.run(source);
    assert!(record.success, "snippet failed:\n{}", record.error);
    record.stdout
}

fn error(source: &str) -> String {
    let mut engine = Engine::default();
    let record = engine.run(source);
    assert!(!record.success, "snippet unexpectedly succeeded");
    record.error
}

#[test]
fn control_flow() {
    let src = "\
total = 0
for i in range(10):
    if i % 2 == 0:
        continue
    elif i > 7:
        break
    total += i
print(total)
n = 3
while n:
    n -= 1
print('done', n)
";
    assert_eq!(output(src), "16\ndone 0\n");
}

#[test]
fn functions_defaults_and_closures_over_globals() {
    let src = "\
scale = 10
def f(a, b=2, c=None):
    return a * b + scale
def bump():
    global scale
    scale += 1
print(f(1), f(1, 3), f(a=2, b=1))
bump()
print(scale)
";
    assert_eq!(output(src), "12 13 12\n11\n");
}

#[test]
fn exceptions_are_catchable() {
    let src = "\
try:
    {}['missing']
except KeyError as e:
    print('caught', e, type(e) == KeyError)
finally:
    print('cleanup')
try:
    raise TypeError('t')
except (ValueError, TypeError):
    print('tuple handler')
";
    assert_eq!(
        output(src),
        "caught 'missing' True\ncleanup\ntuple handler\n"
    );
}

#[test]
fn strings_and_formatting() {
    let src = "\
name = 'world'
pi = 3.14159
print(f'hello {name}! {pi:.2f} {len(name):>4}')
print('{}-{}'.format('a', 1), 'x'.upper() * 3, ', '.join(['p', 'q']))
print('abc'[::-1], 'a,b'.split(','))
";
    assert_eq!(
        output(src),
        "hello world! 3.14    5\na-1 XXX p, q\ncba ['a', 'b']\n"
    );
}

#[test]
fn containers() {
    let src = "\
xs = [3, 1, 2]
xs.append(0)
xs.sort()
d = {'a': 1}
d['b'] = 2
squares = [x * x for x in xs if x]
print(xs, sorted(d.keys()), squares, (1,) + (2,))
print(sum(xs), max(xs), min(d.values()), list(zip(xs, 'ab')))
";
    assert_eq!(
        output(src),
        "[0, 1, 2, 3] ['a', 'b'] [1, 4, 9] (1, 2)\n6 3 1 [(0, 'a'), (1, 'b')]\n"
    );
}

#[test]
fn math_module() {
    assert_eq!(output("print(math.floor(2.7), math.pi > 3, math.sqrt(9))"), "2 True 3.0\n");
}

#[test]
fn runaway_recursion_is_an_error() {
    let err = error("def f(n):\n    return f(n + 1)\nf(0)");
    assert!(err.contains("RecursionError"), "{err}");
}

#[test]
fn unknown_modules_fail_cleanly() {
    let err = error("import numpy");
    assert!(err.contains("ModuleNotFoundError: No module named 'numpy'"), "{err}");
}

#[test]
fn integer_overflow_is_reported() {
    let err = error("x = 2 ** 62\nx * 8");
    assert!(err.contains("OverflowError"), "{err}");
}

#[test]
fn indentation_errors_are_named() {
    let err = error("if True:\nprint(1)");
    assert!(err.contains("IndentationError"), "{err}");
}
