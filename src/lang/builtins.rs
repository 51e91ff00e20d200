//! Builtin functions, builtin-type methods and the importable library modules.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::rc::Rc;

use crate::lang::ast::BinOp;
use crate::lang::exception::{is_exception_class, is_subclass, Exception};
use crate::lang::figure::{FigureId, Rgb, Series, SeriesKind};
use crate::lang::interp::{
    binary_op, check_hashable, collect, normalize_index, partial_order, CallArgs, EvalResult,
    Interpreter, MAX_SEQUENCE_LEN,
};
use crate::lang::value::{
    format_float, Builtin, BuiltinFn, Dict, DictRef, ListRef, Module, RangeValue, StreamKind, Value,
};

/// Builtin types that are callable as constructors.
const CLASSES: &[&str] = &[
    "int", "float", "str", "bool", "list", "tuple", "dict", "range", "object",
];

const FUNCTIONS: &[(&str, BuiltinFn)] = &[
    ("print", print),
    ("len", len),
    ("abs", abs),
    ("min", min),
    ("max", max),
    ("sum", sum),
    ("round", round),
    ("sorted", sorted),
    ("reversed", reversed),
    ("enumerate", enumerate),
    ("zip", zip),
    ("map", map),
    ("filter", filter),
    ("any", any),
    ("all", all),
    ("isinstance", isinstance),
    ("repr", repr),
    ("type", type_of),
    ("dir", dir),
    ("pow", pow),
    ("divmod", divmod),
    ("format", format),
    ("chr", chr),
    ("ord", ord),
    ("callable", callable),
];

/// Resolves a name that is neither local nor global.
pub fn lookup(name: &str) -> Option<Value> {
    if CLASSES.contains(&name) || is_exception_class(name) {
        return Some(Value::Class(name.into()));
    }
    FUNCTIONS
        .iter()
        .find(|(n, _)| *n == name)
        .map(|(n, f)| builtin(n, *f))
}

fn builtin(name: &'static str, func: BuiltinFn) -> Value {
    Value::Builtin(Builtin { name, func })
}

// ---- argument helpers ------------------------------------------------------

fn single(args: CallArgs, func: &str) -> EvalResult<Value> {
    args.reject_keywords(func)?;
    args.arity(func, 1, 1)?;
    Ok(args.positional.into_iter().next().unwrap_or_default())
}

fn real(value: &Value) -> EvalResult<f64> {
    value.as_f64().ok_or_else(|| {
        Exception::type_error(format!("must be real number, not {}", value.type_name()))
    })
}

fn integer(value: &Value) -> EvalResult<i64> {
    value.as_int().ok_or_else(|| {
        Exception::type_error(format!(
            "'{}' object cannot be interpreted as an integer",
            value.type_name()
        ))
    })
}

fn text(value: &Value, func: &str) -> EvalResult<Rc<str>> {
    match value {
        Value::Str(s) => Ok(Rc::clone(s)),
        other => Err(Exception::type_error(format!(
            "{func}() argument must be str, not {}",
            other.type_name()
        ))),
    }
}

fn optional_text(value: Option<Value>, default: &str, name: &str) -> EvalResult<String> {
    match value.as_ref() {
        None | Some(Value::None) => Ok(default.to_string()),
        Some(Value::Str(s)) => Ok(s.to_string()),
        Some(other) => Err(Exception::type_error(format!(
            "{name} must be None or a string, not {}",
            other.type_name()
        ))),
    }
}

fn key_function(args: &mut CallArgs) -> Option<Value> {
    args.take_keyword("key")
        .filter(|k| !matches!(k, Value::None))
}

fn apply_key(interp: &mut Interpreter<'_>, key: Option<&Value>, item: &Value) -> EvalResult<Value> {
    match key {
        Some(f) => interp.call_value(f, CallArgs::positional(vec![item.clone()])),
        None => Ok(item.clone()),
    }
}

/// Stable sort by Python ordering, optionally through a key function.
fn sort_values(
    interp: &mut Interpreter<'_>,
    items: Vec<Value>,
    key: Option<Value>,
    reverse: bool,
) -> EvalResult<Vec<Value>> {
    let mut keyed = Vec::with_capacity(items.len());
    for item in items {
        keyed.push((apply_key(interp, key.as_ref(), &item)?, item));
    }
    let mut failure = None;
    keyed.sort_by(|(a, _), (b, _)| {
        let ord = match partial_order(a, b) {
            Ok(ord) => ord.unwrap_or(Ordering::Equal),
            Err(e) => {
                failure.get_or_insert(e);
                Ordering::Equal
            }
        };
        if reverse {
            ord.reverse()
        } else {
            ord
        }
    });
    match failure {
        Some(e) => Err(e),
        None => Ok(keyed.into_iter().map(|(_, v)| v).collect()),
    }
}

// ---- builtin functions -----------------------------------------------------

fn print(interp: &mut Interpreter<'_>, mut args: CallArgs) -> EvalResult<Value> {
    let sep = optional_text(args.take_keyword("sep"), " ", "sep")?;
    let end = optional_text(args.take_keyword("end"), "\n", "end")?;
    let stream = match args.take_keyword("file") {
        None | Some(Value::None) => StreamKind::Stdout,
        Some(Value::Stream(kind)) => kind,
        Some(other) => return Err(Exception::attribute_error(&other, "write")),
    };
    args.take_keyword("flush");
    args.reject_keywords("print")?;

    let mut line = args
        .positional
        .iter()
        .map(Value::to_display)
        .collect::<Vec<_>>()
        .join(&sep);
    line.push_str(&end);
    interp.write(stream, &line);
    Ok(Value::None)
}

fn len(_: &mut Interpreter<'_>, args: CallArgs) -> EvalResult<Value> {
    let value = single(args, "len")?;
    match value.len() {
        Some(n) => i64::try_from(n).map(Value::Int).map_err(|_| Exception::overflow()),
        None => Err(Exception::type_error(format!(
            "object of type '{}' has no len()",
            value.type_name()
        ))),
    }
}

fn abs(_: &mut Interpreter<'_>, args: CallArgs) -> EvalResult<Value> {
    match single(args, "abs")? {
        Value::Float(f) => Ok(Value::Float(f.abs())),
        v if v.as_int().is_some() => v
            .as_int()
            .and_then(i64::checked_abs)
            .map(Value::Int)
            .ok_or_else(Exception::overflow),
        other => Err(Exception::type_error(format!(
            "bad operand type for abs(): '{}'",
            other.type_name()
        ))),
    }
}

fn extremum(
    interp: &mut Interpreter<'_>,
    mut args: CallArgs,
    func: &str,
    wanted: Ordering,
) -> EvalResult<Value> {
    let key = key_function(&mut args);
    let default = args.take_keyword("default");
    args.reject_keywords(func)?;
    let items = match args.positional.len() {
        0 => {
            return Err(Exception::type_error(format!(
                "{func} expected at least 1 argument, got 0"
            )))
        }
        1 => collect(&args.positional[0])?,
        _ => args.positional,
    };
    if items.is_empty() {
        return default.ok_or_else(|| {
            Exception::value_error(format!("{func}() arg is an empty sequence"))
        });
    }

    let mut best: Option<(Value, Value)> = None;
    for item in items {
        let k = apply_key(interp, key.as_ref(), &item)?;
        let replace = match &best {
            None => true,
            Some((best_key, _)) => partial_order(&k, best_key)? == Some(wanted),
        };
        if replace {
            best = Some((k, item));
        }
    }
    Ok(best.map(|(_, item)| item).unwrap_or_default())
}

fn min(interp: &mut Interpreter<'_>, args: CallArgs) -> EvalResult<Value> {
    extremum(interp, args, "min", Ordering::Less)
}

fn max(interp: &mut Interpreter<'_>, args: CallArgs) -> EvalResult<Value> {
    extremum(interp, args, "max", Ordering::Greater)
}

fn sum(_: &mut Interpreter<'_>, mut args: CallArgs) -> EvalResult<Value> {
    let start_kw = args.take_keyword("start");
    args.reject_keywords("sum")?;
    args.arity("sum", 1, 2)?;
    let mut positional = args.positional.into_iter();
    let iterable = positional.next().unwrap_or_default();
    let mut total = positional.next().or(start_kw).unwrap_or(Value::Int(0));
    if matches!(total, Value::Str(_)) {
        return Err(Exception::type_error(
            "sum() can't sum strings [use ''.join(seq) instead]",
        ));
    }
    for item in collect(&iterable)? {
        total = binary_op(BinOp::Add, &total, &item)?;
    }
    Ok(total)
}

fn float_to_int(f: f64) -> EvalResult<i64> {
    if f.is_nan() {
        return Err(Exception::value_error("cannot convert float NaN to integer"));
    }
    if f.is_infinite() {
        return Err(Exception::new(
            "OverflowError",
            "cannot convert float infinity to integer",
        ));
    }
    let t = f.trunc();
    if t < i64::MIN as f64 || t >= i64::MAX as f64 {
        return Err(Exception::overflow());
    }
    Ok(t as i64)
}

fn round(_: &mut Interpreter<'_>, mut args: CallArgs) -> EvalResult<Value> {
    let ndigits_kw = args.take_keyword("ndigits");
    args.reject_keywords("round")?;
    args.arity("round", 1, 2)?;
    let mut positional = args.positional.into_iter();
    let number = positional.next().unwrap_or_default();
    let ndigits = match positional.next().or(ndigits_kw) {
        None | Some(Value::None) => None,
        Some(v) => Some(integer(&v)?),
    };
    match (&number, ndigits) {
        (Value::Float(f), None) => Ok(Value::Int(float_to_int(f.round_ties_even())?)),
        (Value::Float(f), Some(n)) => {
            let factor = 10f64.powi(n.clamp(-308, 308) as i32);
            Ok(Value::Float((f * factor).round_ties_even() / factor))
        }
        (v, None) if v.as_int().is_some() => Ok(Value::Int(v.as_int().unwrap_or(0))),
        (v, Some(n)) if v.as_int().is_some() => {
            let i = v.as_int().unwrap_or(0);
            if n >= 0 {
                return Ok(Value::Int(i));
            }
            let Some(p) = n
                .checked_neg()
                .and_then(|e| u32::try_from(e).ok())
                .and_then(|e| 10i64.checked_pow(e))
            else {
                return Ok(Value::Int(0));
            };
            let rounded = (i as f64 / p as f64).round_ties_even() as i64;
            rounded.checked_mul(p).map(Value::Int).ok_or_else(Exception::overflow)
        }
        (other, _) => Err(Exception::type_error(format!(
            "type {} doesn't define __round__ method",
            other.type_name()
        ))),
    }
}

fn sorted(interp: &mut Interpreter<'_>, mut args: CallArgs) -> EvalResult<Value> {
    let key = key_function(&mut args);
    let reverse = args.take_keyword("reverse").is_some_and(|v| v.truthy());
    let iterable = single(args, "sorted")?;
    let items = collect(&iterable)?;
    Ok(Value::list(sort_values(interp, items, key, reverse)?))
}

fn reversed(_: &mut Interpreter<'_>, args: CallArgs) -> EvalResult<Value> {
    let value = single(args, "reversed")?;
    if matches!(value, Value::Dict(_)) {
        return Err(Exception::type_error("'dict' object is not reversible"));
    }
    let mut items = collect(&value)?;
    items.reverse();
    Ok(Value::list(items))
}

fn enumerate(_: &mut Interpreter<'_>, mut args: CallArgs) -> EvalResult<Value> {
    let start_kw = args.take_keyword("start");
    args.reject_keywords("enumerate")?;
    args.arity("enumerate", 1, 2)?;
    let mut positional = args.positional.into_iter();
    let iterable = positional.next().unwrap_or_default();
    let start = match positional.next().or(start_kw) {
        Some(v) => integer(&v)?,
        None => 0,
    };
    let items = collect(&iterable)?
        .into_iter()
        .enumerate()
        .map(|(i, v)| {
            i64::try_from(i)
                .ok()
                .and_then(|i| start.checked_add(i))
                .map(|n| Value::tuple(vec![Value::Int(n), v]))
                .ok_or_else(Exception::overflow)
        })
        .collect::<EvalResult<Vec<_>>>()?;
    Ok(Value::list(items))
}

fn zip(_: &mut Interpreter<'_>, args: CallArgs) -> EvalResult<Value> {
    args.reject_keywords("zip")?;
    let columns = args
        .positional
        .iter()
        .map(collect)
        .collect::<EvalResult<Vec<_>>>()?;
    let rows = columns.iter().map(Vec::len).min().unwrap_or(0);
    let zipped = (0..rows)
        .map(|i| Value::tuple(columns.iter().map(|c| c[i].clone()).collect()))
        .collect();
    Ok(Value::list(zipped))
}

fn map(interp: &mut Interpreter<'_>, args: CallArgs) -> EvalResult<Value> {
    args.reject_keywords("map")?;
    if args.len() < 2 {
        return Err(Exception::type_error("map() must have at least two arguments."));
    }
    let mut positional = args.positional.into_iter();
    let func = positional.next().unwrap_or_default();
    let columns = positional
        .map(|v| collect(&v))
        .collect::<EvalResult<Vec<_>>>()?;
    let rows = columns.iter().map(Vec::len).min().unwrap_or(0);
    let mut out = Vec::with_capacity(rows);
    for i in 0..rows {
        let call_args = columns.iter().map(|c| c[i].clone()).collect();
        out.push(interp.call_value(&func, CallArgs::positional(call_args))?);
    }
    Ok(Value::list(out))
}

fn filter(interp: &mut Interpreter<'_>, args: CallArgs) -> EvalResult<Value> {
    args.reject_keywords("filter")?;
    args.arity("filter", 2, 2)?;
    let predicate = args.positional[0].clone();
    let mut out = Vec::new();
    for item in collect(&args.positional[1])? {
        let keep = match &predicate {
            Value::None => item.truthy(),
            f => interp
                .call_value(f, CallArgs::positional(vec![item.clone()]))?
                .truthy(),
        };
        if keep {
            out.push(item);
        }
    }
    Ok(Value::list(out))
}

fn any(_: &mut Interpreter<'_>, args: CallArgs) -> EvalResult<Value> {
    let iterable = single(args, "any")?;
    Ok(Value::Bool(collect(&iterable)?.iter().any(Value::truthy)))
}

fn all(_: &mut Interpreter<'_>, args: CallArgs) -> EvalResult<Value> {
    let iterable = single(args, "all")?;
    Ok(Value::Bool(collect(&iterable)?.iter().all(Value::truthy)))
}

fn instance_of(value: &Value, class: &str) -> bool {
    if class == "object" {
        return true;
    }
    let type_name = value.type_name();
    type_name == class
        || (class == "int" && matches!(value, Value::Bool(_)))
        || (matches!(value, Value::Exception(_)) && is_subclass(&type_name, class))
}

fn isinstance(_: &mut Interpreter<'_>, args: CallArgs) -> EvalResult<Value> {
    args.reject_keywords("isinstance")?;
    args.arity("isinstance", 2, 2)?;
    let classes = match &args.positional[1] {
        Value::Tuple(items) => items.to_vec(),
        other => vec![other.clone()],
    };
    for class in &classes {
        match class {
            Value::Class(name) => {
                if instance_of(&args.positional[0], name) {
                    return Ok(Value::Bool(true));
                }
            }
            _ => {
                return Err(Exception::type_error(
                    "isinstance() arg 2 must be a type or tuple of types",
                ))
            }
        }
    }
    Ok(Value::Bool(false))
}

fn repr(_: &mut Interpreter<'_>, args: CallArgs) -> EvalResult<Value> {
    Ok(Value::from(single(args, "repr")?.repr()))
}

fn type_of(_: &mut Interpreter<'_>, args: CallArgs) -> EvalResult<Value> {
    Ok(Value::Class(single(args, "type")?.type_name().into()))
}

fn dir(interp: &mut Interpreter<'_>, args: CallArgs) -> EvalResult<Value> {
    args.reject_keywords("dir")?;
    args.arity("dir", 0, 1)?;
    let names: Vec<String> = match args.positional.first() {
        None => interp.visible_names(),
        Some(Value::Module(module)) => module.attrs.keys().cloned().collect(),
        Some(other) => method_names(other).iter().map(|s| s.to_string()).collect(),
    };
    Ok(Value::list(names.into_iter().map(Value::from).collect()))
}

fn pow(_: &mut Interpreter<'_>, args: CallArgs) -> EvalResult<Value> {
    args.reject_keywords("pow")?;
    args.arity("pow", 2, 2)?;
    binary_op(BinOp::Pow, &args.positional[0], &args.positional[1])
}

fn divmod(_: &mut Interpreter<'_>, args: CallArgs) -> EvalResult<Value> {
    args.reject_keywords("divmod")?;
    args.arity("divmod", 2, 2)?;
    let (a, b) = (&args.positional[0], &args.positional[1]);
    Ok(Value::tuple(vec![
        binary_op(BinOp::FloorDiv, a, b)?,
        binary_op(BinOp::Mod, a, b)?,
    ]))
}

fn format(_: &mut Interpreter<'_>, args: CallArgs) -> EvalResult<Value> {
    args.reject_keywords("format")?;
    args.arity("format", 1, 2)?;
    let spec = match args.positional.get(1) {
        Some(v) => text(v, "format")?,
        None => Rc::from(""),
    };
    Ok(Value::from(format_value(&args.positional[0], &spec)?))
}

fn chr(_: &mut Interpreter<'_>, args: CallArgs) -> EvalResult<Value> {
    let code = integer(&single(args, "chr")?)?;
    u32::try_from(code)
        .ok()
        .and_then(char::from_u32)
        .map(|c| Value::from(c.to_string()))
        .ok_or_else(|| Exception::value_error("chr() arg not in range(0x110000)"))
}

fn ord(_: &mut Interpreter<'_>, args: CallArgs) -> EvalResult<Value> {
    let value = single(args, "ord")?;
    let s = text(&value, "ord")?;
    let mut chars = s.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => Ok(Value::Int(c as i64)),
        _ => Err(Exception::type_error(format!(
            "ord() expected a character, but string of length {} found",
            s.chars().count()
        ))),
    }
}

fn callable(_: &mut Interpreter<'_>, args: CallArgs) -> EvalResult<Value> {
    let value = single(args, "callable")?;
    Ok(Value::Bool(matches!(
        value,
        Value::Function(_) | Value::Builtin(_) | Value::Method(_) | Value::Class(_)
    )))
}

// ---- constructors ----------------------------------------------------------

fn parse_int(s: &str, base: u32) -> Option<i64> {
    let cleaned: String = s.trim().chars().filter(|c| *c != '_').collect();
    let (negative, digits) = match cleaned.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, cleaned.strip_prefix('+').unwrap_or(&cleaned)),
    };
    let digits = match base {
        16 => digits.strip_prefix("0x").or(digits.strip_prefix("0X")).unwrap_or(digits),
        8 => digits.strip_prefix("0o").or(digits.strip_prefix("0O")).unwrap_or(digits),
        2 => digits.strip_prefix("0b").or(digits.strip_prefix("0B")).unwrap_or(digits),
        _ => digits,
    };
    if digits.is_empty() || digits.starts_with(['+', '-']) {
        return None;
    }
    let magnitude = i64::from_str_radix(digits, base).ok()?;
    Some(if negative { -magnitude } else { magnitude })
}

fn construct_int(mut args: CallArgs) -> EvalResult<Value> {
    let base_kw = args.take_keyword("base");
    args.reject_keywords("int")?;
    args.arity("int", 0, 2)?;
    let mut positional = args.positional.into_iter();
    let Some(value) = positional.next() else {
        return Ok(Value::Int(0));
    };
    let base = positional.next().or(base_kw);
    match (&value, base) {
        (Value::Str(s), base) => {
            let base = match base {
                Some(b) => integer(&b)?,
                None => 10,
            };
            if !(2..=36).contains(&base) {
                return Err(Exception::value_error("int() base must be >= 2 and <= 36"));
            }
            parse_int(s, base as u32).map(Value::Int).ok_or_else(|| {
                Exception::value_error(format!(
                    "invalid literal for int() with base {base}: {}",
                    value.repr()
                ))
            })
        }
        (_, Some(_)) => Err(Exception::type_error(
            "int() can't convert non-string with explicit base",
        )),
        (Value::Float(f), None) => Ok(Value::Int(float_to_int(*f)?)),
        (v, None) if v.as_int().is_some() => Ok(Value::Int(v.as_int().unwrap_or(0))),
        (other, None) => Err(Exception::type_error(format!(
            "int() argument must be a string or a real number, not '{}'",
            other.type_name()
        ))),
    }
}

fn construct_float(args: CallArgs) -> EvalResult<Value> {
    args.reject_keywords("float")?;
    args.arity("float", 0, 1)?;
    let Some(value) = args.positional.first() else {
        return Ok(Value::Float(0.0));
    };
    match value {
        Value::Str(s) => {
            let cleaned: String = s.trim().chars().filter(|c| *c != '_').collect();
            cleaned.parse::<f64>().map(Value::Float).map_err(|_| {
                Exception::value_error(format!(
                    "could not convert string to float: {}",
                    value.repr()
                ))
            })
        }
        v => v.as_f64().map(Value::Float).ok_or_else(|| {
            Exception::type_error(format!(
                "float() argument must be a string or a real number, not '{}'",
                v.type_name()
            ))
        }),
    }
}

fn construct_dict(args: CallArgs) -> EvalResult<Value> {
    args.arity("dict", 0, 1)?;
    let mut dict = Dict::new();
    if let Some(source) = args.positional.first() {
        for (k, v) in pairs_of(source)? {
            dict.insert(k, v);
        }
    }
    for (key, value) in args.keywords {
        dict.insert(Value::from(key), value);
    }
    Ok(Value::dict(dict))
}

/// Key/value pairs of a mapping, or of an iterable of two-item sequences.
fn pairs_of(source: &Value) -> EvalResult<Vec<(Value, Value)>> {
    if let Value::Dict(other) = source {
        return Ok(other.borrow().iter().cloned().collect());
    }
    let mut pairs = Vec::new();
    for (i, item) in collect(source)?.into_iter().enumerate() {
        let pair = collect(&item).map_err(|_| {
            Exception::type_error(format!(
                "cannot convert dictionary update sequence element #{i} to a sequence"
            ))
        })?;
        let [key, value]: [Value; 2] = pair.try_into().map_err(|p: Vec<Value>| {
            Exception::value_error(format!(
                "dictionary update sequence element #{i} has length {}; 2 is required",
                p.len()
            ))
        })?;
        check_hashable(&key)?;
        pairs.push((key, value));
    }
    Ok(pairs)
}

fn construct_range(args: CallArgs) -> EvalResult<Value> {
    args.reject_keywords("range")?;
    args.arity("range", 1, 3)?;
    let bounds = args
        .positional
        .iter()
        .map(integer)
        .collect::<EvalResult<Vec<_>>>()?;
    let range = match *bounds.as_slice() {
        [stop] => RangeValue::new(0, stop, 1)?,
        [start, stop] => RangeValue::new(start, stop, 1)?,
        [start, stop, step] => RangeValue::new(start, stop, step)?,
        _ => return Err(Exception::type_error("range expected at most 3 arguments")),
    };
    Ok(Value::Range(range))
}

fn construct_exception(kind: &str, args: CallArgs) -> EvalResult<Value> {
    args.reject_keywords(kind)?;
    let message = match args.positional.as_slice() {
        [] => String::new(),
        [single] => single.to_display(),
        many => Value::tuple(many.to_vec()).repr(),
    };
    Ok(Exception::new(kind, message).to_value())
}

/// Calling a class object.
pub fn construct(_: &mut Interpreter<'_>, class: &str, args: CallArgs) -> EvalResult<Value> {
    match class {
        "int" => construct_int(args),
        "float" => construct_float(args),
        "str" => {
            args.reject_keywords("str")?;
            args.arity("str", 0, 1)?;
            Ok(Value::from(
                args.positional.first().map(Value::to_display).unwrap_or_default(),
            ))
        }
        "bool" => {
            args.reject_keywords("bool")?;
            args.arity("bool", 0, 1)?;
            Ok(Value::Bool(args.positional.first().is_some_and(Value::truthy)))
        }
        "list" | "tuple" => {
            args.reject_keywords(class)?;
            args.arity(class, 0, 1)?;
            let items = match args.positional.first() {
                Some(v) => collect(v)?,
                None => Vec::new(),
            };
            Ok(if class == "list" {
                Value::list(items)
            } else {
                Value::tuple(items)
            })
        }
        "dict" => construct_dict(args),
        "range" => construct_range(args),
        kind if is_exception_class(kind) => construct_exception(kind, args),
        other => Err(Exception::type_error(format!(
            "cannot create '{other}' instances"
        ))),
    }
}

// ---- methods ---------------------------------------------------------------

const LIST_METHODS: &[&str] = &[
    "append", "clear", "copy", "count", "extend", "index", "insert", "pop", "remove", "reverse",
    "sort",
];
const DICT_METHODS: &[&str] = &[
    "clear", "copy", "get", "items", "keys", "pop", "setdefault", "update", "values",
];
const STR_METHODS: &[&str] = &[
    "capitalize", "count", "endswith", "find", "format", "isalpha", "isdigit", "join", "lower",
    "lstrip", "replace", "rstrip", "split", "splitlines", "startswith", "strip", "title", "upper",
    "zfill",
];
const TUPLE_METHODS: &[&str] = &["count", "index"];
const STREAM_METHODS: &[&str] = &["flush", "write"];

fn method_names(value: &Value) -> &'static [&'static str] {
    match value {
        Value::List(_) => LIST_METHODS,
        Value::Dict(_) => DICT_METHODS,
        Value::Str(_) => STR_METHODS,
        Value::Tuple(_) => TUPLE_METHODS,
        Value::Stream(_) => STREAM_METHODS,
        _ => &[],
    }
}

pub fn has_method(value: &Value, name: &str) -> bool {
    method_names(value).contains(&name)
}

pub fn call_method(
    interp: &mut Interpreter<'_>,
    receiver: &Value,
    name: &str,
    args: CallArgs,
) -> EvalResult<Value> {
    match receiver {
        Value::List(items) => list_method(interp, items, name, args),
        Value::Dict(dict) => dict_method(dict, name, args),
        Value::Str(s) => str_method(s, name, args),
        Value::Tuple(items) => {
            args.reject_keywords(name)?;
            args.arity(name, 1, 1)?;
            sequence_search(items, name, &args.positional[0], "tuple")
        }
        Value::Stream(kind) => {
            args.reject_keywords(name)?;
            if name == "flush" {
                return Ok(Value::None);
            }
            args.arity("write", 1, 1)?;
            let s = text(&args.positional[0], "write")?;
            interp.write(*kind, &s);
            Ok(Value::Int(s.chars().count() as i64))
        }
        other => Err(Exception::attribute_error(other, name)),
    }
}

fn sequence_search(items: &[Value], name: &str, needle: &Value, what: &str) -> EvalResult<Value> {
    if name == "count" {
        return Ok(Value::Int(items.iter().filter(|v| v.py_eq(needle)).count() as i64));
    }
    items
        .iter()
        .position(|v| v.py_eq(needle))
        .map(|i| Value::Int(i as i64))
        .ok_or_else(|| Exception::value_error(format!("{} is not in {what}", needle.repr())))
}

fn list_method(
    interp: &mut Interpreter<'_>,
    items: &ListRef,
    name: &str,
    mut args: CallArgs,
) -> EvalResult<Value> {
    if name == "sort" {
        let key = key_function(&mut args);
        let reverse = args.take_keyword("reverse").is_some_and(|v| v.truthy());
        args.reject_keywords("sort")?;
        args.arity("sort", 0, 0)?;
        let current = items.borrow().clone();
        let ordered = sort_values(interp, current, key, reverse)?;
        *items.borrow_mut() = ordered;
        return Ok(Value::None);
    }
    args.reject_keywords(name)?;
    let argc = args.len();
    let mut positional = args.positional.into_iter();
    match name {
        "append" => {
            args_exactly(argc, 1, "append")?;
            items.borrow_mut().push(positional.next().unwrap_or_default());
        }
        "extend" => {
            args_exactly(argc, 1, "extend")?;
            let extra = collect(&positional.next().unwrap_or_default())?;
            items.borrow_mut().extend(extra);
        }
        "insert" => {
            args_exactly(argc, 2, "insert")?;
            let index = integer(&positional.next().unwrap_or_default())?;
            let value = positional.next().unwrap_or_default();
            let mut items = items.borrow_mut();
            let len = items.len() as i64;
            let at = if index < 0 { index.saturating_add(len).max(0) } else { index.min(len) };
            items.insert(at as usize, value);
        }
        "pop" => {
            if argc > 1 {
                return Err(Exception::type_error(format!(
                    "pop expected at most 1 argument, got {argc}"
                )));
            }
            let mut items = items.borrow_mut();
            if items.is_empty() {
                return Err(Exception::index_error("pop from empty list"));
            }
            let idx = match positional.next() {
                Some(index) => normalize_index(&index, items.len(), "list")?
                    .ok_or_else(|| Exception::index_error("pop index out of range"))?,
                None => items.len() - 1,
            };
            return Ok(items.remove(idx));
        }
        "remove" => {
            args_exactly(argc, 1, "remove")?;
            let needle = positional.next().unwrap_or_default();
            let pos = items.borrow().iter().position(|v| v.py_eq(&needle));
            match pos {
                Some(pos) => {
                    items.borrow_mut().remove(pos);
                }
                None => return Err(Exception::value_error("list.remove(x): x not in list")),
            }
        }
        "index" | "count" => {
            args_exactly(argc, 1, name)?;
            let needle = positional.next().unwrap_or_default();
            let snapshot = items.borrow().clone();
            return sequence_search(&snapshot, name, &needle, "list");
        }
        "reverse" => {
            args_exactly(argc, 0, "reverse")?;
            items.borrow_mut().reverse();
        }
        "copy" => {
            args_exactly(argc, 0, "copy")?;
            return Ok(Value::list(items.borrow().clone()));
        }
        "clear" => {
            args_exactly(argc, 0, "clear")?;
            items.borrow_mut().clear();
        }
        other => return Err(Exception::attribute_error(&Value::List(Rc::clone(items)), other)),
    }
    Ok(Value::None)
}

fn args_exactly(given: usize, expected: usize, name: &str) -> EvalResult<()> {
    if given == expected {
        return Ok(());
    }
    Err(Exception::type_error(format!(
        "{name}() takes exactly {expected} argument{} ({given} given)",
        if expected == 1 { "" } else { "s" }
    )))
}

fn dict_method(dict: &DictRef, name: &str, args: CallArgs) -> EvalResult<Value> {
    if name == "update" {
        args.arity("update", 0, 1)?;
        let mut pairs = match args.positional.first() {
            Some(source) => pairs_of(source)?,
            None => Vec::new(),
        };
        pairs.extend(args.keywords.into_iter().map(|(k, v)| (Value::from(k), v)));
        let mut dict = dict.borrow_mut();
        for (key, value) in pairs {
            dict.insert(key, value);
        }
        return Ok(Value::None);
    }
    args.reject_keywords(name)?;
    let mut dict = dict.borrow_mut();
    let argc = args.len();
    let mut positional = args.positional.into_iter();
    match name {
        "keys" => Ok(Value::list(dict.keys())),
        "values" => Ok(Value::list(dict.values())),
        "items" => Ok(Value::list(
            dict.iter()
                .map(|(k, v)| Value::tuple(vec![k.clone(), v.clone()]))
                .collect(),
        )),
        "get" => {
            if !(1..=2).contains(&argc) {
                return Err(Exception::type_error(format!(
                    "get expected 1 or 2 arguments, got {argc}"
                )));
            }
            let key = positional.next().unwrap_or_default();
            check_hashable(&key)?;
            let default = positional.next().unwrap_or_default();
            Ok(dict.get(&key).cloned().unwrap_or(default))
        }
        "pop" => {
            if !(1..=2).contains(&argc) {
                return Err(Exception::type_error(format!(
                    "pop expected 1 or 2 arguments, got {argc}"
                )));
            }
            let key = positional.next().unwrap_or_default();
            check_hashable(&key)?;
            match (dict.remove(&key), positional.next()) {
                (Some(v), _) => Ok(v),
                (None, Some(default)) => Ok(default),
                (None, None) => Err(Exception::key_error(&key)),
            }
        }
        "setdefault" => {
            let key = positional.next().unwrap_or_default();
            check_hashable(&key)?;
            if let Some(existing) = dict.get(&key) {
                return Ok(existing.clone());
            }
            let default = positional.next().unwrap_or_default();
            dict.insert(key, default.clone());
            Ok(default)
        }
        "copy" => Ok(Value::dict(dict.clone())),
        "clear" => {
            dict.clear();
            Ok(Value::None)
        }
        other => Err(Exception::new(
            "AttributeError",
            format!("'dict' object has no attribute '{other}'"),
        )),
    }
}

fn str_method(s: &Rc<str>, name: &str, args: CallArgs) -> EvalResult<Value> {
    if name == "format" {
        return format_template(s, &args).map(Value::from);
    }
    args.reject_keywords(name)?;
    let positional = &args.positional;
    let arg_text = |i: usize| -> EvalResult<Option<Rc<str>>> {
        match positional.get(i) {
            None | Some(Value::None) => Ok(None),
            Some(v) => text(v, name).map(Some),
        }
    };
    let value = match name {
        "upper" => Value::from(s.to_uppercase()),
        "lower" => Value::from(s.to_lowercase()),
        "title" => Value::from(title_case(s)),
        "capitalize" => {
            let mut chars = s.chars();
            let out = match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
                None => String::new(),
            };
            Value::from(out)
        }
        "strip" | "lstrip" | "rstrip" => {
            args.arity(name, 0, 1)?;
            let chars = arg_text(0)?;
            let matcher = |c: char| match &chars {
                Some(set) => set.contains(c),
                None => c.is_whitespace(),
            };
            let out = match name {
                "strip" => s.trim_matches(matcher),
                "lstrip" => s.trim_start_matches(matcher),
                _ => s.trim_end_matches(matcher),
            };
            Value::from(out)
        }
        "split" => {
            args.arity("split", 0, 2)?;
            let maxsplit = match positional.get(1) {
                Some(v) => integer(v)?,
                None => -1,
            };
            let parts = match arg_text(0)? {
                Some(sep) if sep.is_empty() => {
                    return Err(Exception::value_error("empty separator"))
                }
                Some(sep) if maxsplit >= 0 => s
                    .splitn(maxsplit as usize + 1, &*sep)
                    .map(str::to_string)
                    .collect(),
                Some(sep) => s.split(&*sep).map(str::to_string).collect(),
                None => split_whitespace(s, maxsplit),
            };
            Value::list(parts.into_iter().map(Value::from).collect())
        }
        "splitlines" => Value::list(s.lines().map(Value::from).collect()),
        "join" => {
            args.arity("join", 1, 1)?;
            let mut pieces = Vec::new();
            for (i, item) in collect(&positional[0])?.into_iter().enumerate() {
                match &item {
                    Value::Str(piece) => pieces.push(Rc::clone(piece)),
                    other => {
                        return Err(Exception::type_error(format!(
                            "sequence item {i}: expected str instance, {} found",
                            other.type_name()
                        )))
                    }
                }
            }
            Value::from(pieces.iter().map(|p| &**p).collect::<Vec<&str>>().join(&**s))
        }
        "replace" => {
            args.arity("replace", 2, 3)?;
            let old = text(&positional[0], "replace")?;
            let new = text(&positional[1], "replace")?;
            match positional.get(2).map(integer).transpose()? {
                Some(n) if n >= 0 => Value::from(s.replacen(&*old, &new, n as usize)),
                _ => Value::from(s.replace(&*old, &new)),
            }
        }
        "startswith" | "endswith" => {
            args.arity(name, 1, 1)?;
            let candidates = match &positional[0] {
                Value::Tuple(items) => items.to_vec(),
                other => vec![other.clone()],
            };
            let mut hit = false;
            for candidate in &candidates {
                let affix = text(candidate, name)?;
                hit |= if name == "startswith" {
                    s.starts_with(&*affix)
                } else {
                    s.ends_with(&*affix)
                };
            }
            Value::Bool(hit)
        }
        "find" => {
            args.arity("find", 1, 1)?;
            let needle = text(&positional[0], "find")?;
            let index = s
                .find(&*needle)
                .map(|byte| s[..byte].chars().count() as i64)
                .unwrap_or(-1);
            Value::Int(index)
        }
        "count" => {
            args.arity("count", 1, 1)?;
            let needle = text(&positional[0], "count")?;
            let n = if needle.is_empty() {
                s.chars().count() + 1
            } else {
                s.matches(&*needle).count()
            };
            Value::Int(n as i64)
        }
        "isdigit" => Value::Bool(!s.is_empty() && s.chars().all(|c| c.is_ascii_digit())),
        "isalpha" => Value::Bool(!s.is_empty() && s.chars().all(char::is_alphabetic)),
        "zfill" => {
            args.arity("zfill", 1, 1)?;
            let width = usize::try_from(integer(&positional[0])?.max(0)).unwrap_or(usize::MAX);
            if width > MAX_SEQUENCE_LEN {
                return Err(Exception::new("MemoryError", ""));
            }
            let len = s.chars().count();
            if len >= width {
                Value::str(Rc::clone(s))
            } else {
                let (sign, digits) = match s.strip_prefix(['-', '+']) {
                    Some(rest) => (&s[..1], rest),
                    None => ("", &**s),
                };
                Value::from(format!("{sign}{}{digits}", "0".repeat(width - len)))
            }
        }
        other => {
            return Err(Exception::new(
                "AttributeError",
                format!("'str' object has no attribute '{other}'"),
            ))
        }
    };
    Ok(value)
}

fn title_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut at_word_start = true;
    for c in s.chars() {
        if c.is_alphabetic() {
            if at_word_start {
                out.extend(c.to_uppercase());
            } else {
                out.extend(c.to_lowercase());
            }
            at_word_start = false;
        } else {
            out.push(c);
            at_word_start = true;
        }
    }
    out
}

fn split_whitespace(s: &str, maxsplit: i64) -> Vec<String> {
    let mut parts = Vec::new();
    let mut rest = s.trim_start();
    while !rest.is_empty() {
        if maxsplit >= 0 && parts.len() as i64 == maxsplit {
            parts.push(rest.to_string());
            break;
        }
        match rest.find(char::is_whitespace) {
            Some(i) => {
                parts.push(rest[..i].to_string());
                rest = rest[i..].trim_start();
            }
            None => {
                parts.push(rest.to_string());
                break;
            }
        }
    }
    parts
}

/// `str.format`: `{}`, `{0}`, `{name}`, with optional `!r` and `:spec`.
fn format_template(template: &str, args: &CallArgs) -> EvalResult<String> {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.chars().peekable();
    let mut auto_index = 0usize;
    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                out.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                out.push('}');
            }
            '{' => {
                let mut field = String::new();
                loop {
                    match chars.next() {
                        Some('}') => break,
                        Some(ch) => field.push(ch),
                        None => {
                            return Err(Exception::value_error(
                                "expected '}' before end of string",
                            ))
                        }
                    }
                }
                let (head, spec) = match field.split_once(':') {
                    Some((h, s)) => (h, s),
                    None => (field.as_str(), ""),
                };
                let (name, conversion) = match head.split_once('!') {
                    Some((n, c)) => (n, Some(c)),
                    None => (head, None),
                };
                let value = if name.is_empty() {
                    let v = args.positional.get(auto_index);
                    auto_index += 1;
                    v.cloned().ok_or_else(|| {
                        Exception::index_error(format!(
                            "Replacement index {} out of range for positional args tuple",
                            auto_index - 1
                        ))
                    })?
                } else if let Ok(i) = name.parse::<usize>() {
                    args.positional.get(i).cloned().ok_or_else(|| {
                        Exception::index_error(format!(
                            "Replacement index {i} out of range for positional args tuple"
                        ))
                    })?
                } else {
                    args.keywords
                        .iter()
                        .find(|(k, _)| k == name)
                        .map(|(_, v)| v.clone())
                        .ok_or_else(|| Exception::key_error(&Value::from(name)))?
                };
                let rendered = match conversion {
                    Some("r") => value.repr(),
                    Some("s") | None => format_value(&value, spec)?,
                    Some(other) => {
                        return Err(Exception::value_error(format!(
                            "Unknown conversion specifier {other}"
                        )))
                    }
                };
                out.push_str(&rendered);
            }
            '}' => {
                return Err(Exception::value_error(
                    "Single '}' encountered in format string",
                ))
            }
            c => out.push(c),
        }
    }
    Ok(out)
}

// ---- format specs ----------------------------------------------------------

#[derive(Debug, Default)]
struct FormatSpec {
    fill: Option<char>,
    align: Option<char>,
    sign: Option<char>,
    zero: bool,
    width: usize,
    grouping: bool,
    precision: Option<usize>,
    kind: Option<char>,
}

impl FormatSpec {
    fn parse(spec: &str) -> Option<Self> {
        let chars: Vec<char> = spec.chars().collect();
        let mut parsed = FormatSpec::default();
        let mut i = 0;
        let is_align = |c: char| matches!(c, '<' | '>' | '^' | '=');

        if chars.len() >= 2 && is_align(chars[1]) {
            parsed.fill = Some(chars[0]);
            parsed.align = Some(chars[1]);
            i = 2;
        } else if chars.first().copied().is_some_and(is_align) {
            parsed.align = Some(chars[0]);
            i = 1;
        }
        if let Some(&c) = chars.get(i).filter(|c| matches!(c, '+' | '-' | ' ')) {
            parsed.sign = Some(c);
            i += 1;
        }
        if chars.get(i) == Some(&'0') {
            parsed.zero = true;
            i += 1;
        }
        let start = i;
        while chars.get(i).is_some_and(char::is_ascii_digit) {
            i += 1;
        }
        if i > start {
            parsed.width = chars[start..i].iter().collect::<String>().parse().ok()?;
        }
        if matches!(chars.get(i), Some(',') | Some('_')) {
            parsed.grouping = true;
            i += 1;
        }
        if chars.get(i) == Some(&'.') {
            i += 1;
            let start = i;
            while chars.get(i).is_some_and(char::is_ascii_digit) {
                i += 1;
            }
            if i == start {
                return None;
            }
            parsed.precision = chars[start..i].iter().collect::<String>().parse().ok();
        }
        if let Some(&c) = chars.get(i) {
            parsed.kind = Some(c);
            i += 1;
        }
        (i == chars.len()).then_some(parsed)
    }
}

fn exponent_form(x: f64, precision: usize, upper: bool) -> String {
    let raw = format!("{x:.precision$e}");
    let (mantissa, exp) = raw.split_once('e').unwrap_or((&raw, "0"));
    let (sign, digits) = match exp.strip_prefix('-') {
        Some(d) => ('-', d),
        None => ('+', exp),
    };
    let e = if upper { 'E' } else { 'e' };
    format!("{mantissa}{e}{sign}{digits:0>2}")
}

fn strip_fraction_zeros(s: &str) -> String {
    if !s.contains('.') {
        return s.to_string();
    }
    s.trim_end_matches('0').trim_end_matches('.').to_string()
}

fn general_form(x: f64, precision: usize, upper: bool) -> String {
    let p = precision.max(1);
    if x == 0.0 {
        return "0".to_string();
    }
    let scientific = format!("{x:.prec$e}", prec = p - 1);
    let exp: i32 = scientific
        .split_once('e')
        .and_then(|(_, e)| e.parse().ok())
        .unwrap_or(0);
    if exp < -4 || exp >= p as i32 {
        let formatted = exponent_form(x, p - 1, upper);
        let marker = if upper { 'E' } else { 'e' };
        match formatted.split_once(marker) {
            Some((mantissa, rest)) => format!("{}{marker}{rest}", strip_fraction_zeros(mantissa)),
            None => formatted,
        }
    } else {
        let decimals = (p as i32 - 1 - exp).max(0) as usize;
        strip_fraction_zeros(&format!("{x:.decimals$}"))
    }
}

fn non_finite(x: f64) -> Option<String> {
    if x.is_nan() {
        Some("nan".to_string())
    } else if x.is_infinite() {
        Some(if x > 0.0 { "inf" } else { "-inf" }.to_string())
    } else {
        None
    }
}

fn group_thousands(digits: &str) -> String {
    let (int_part, rest) = match digits.find(|c: char| !c.is_ascii_digit()) {
        Some(i) => digits.split_at(i),
        None => (digits, ""),
    };
    let mut out = String::with_capacity(int_part.len() + int_part.len() / 3);
    for (i, c) in int_part.chars().enumerate() {
        if i > 0 && (int_part.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out.push_str(rest);
    out
}

/// Renders `value` according to a format-spec mini-language string.
pub fn format_value(value: &Value, spec: &str) -> EvalResult<String> {
    if spec.is_empty() {
        return Ok(value.to_display());
    }
    let spec = FormatSpec::parse(spec)
        .ok_or_else(|| Exception::value_error("Invalid format specifier"))?;
    let unknown = |code: char| {
        Exception::value_error(format!(
            "Unknown format code '{code}' for object of type '{}'",
            value.type_name()
        ))
    };

    let numeric = value.is_numeric();
    let body = match spec.kind {
        Some(code @ ('f' | 'F' | '%' | 'e' | 'E' | 'g' | 'G')) => {
            let x = value.as_f64().ok_or_else(|| unknown(code))?;
            let precision = spec.precision.unwrap_or(6);
            match (non_finite(x), code) {
                (Some(s), '%') => format!("{s}%"),
                (Some(s), _) => s,
                (None, 'f' | 'F') => format!("{x:.precision$}"),
                (None, '%') => format!("{:.precision$}%", x * 100.0),
                (None, 'e' | 'E') => exponent_form(x, precision, code == 'E'),
                (None, _) => general_form(x, precision, code == 'G'),
            }
        }
        Some('d') => match value {
            Value::Float(_) => return Err(unknown('d')),
            v => v.as_int().ok_or_else(|| unknown('d'))?.to_string(),
        },
        Some('s') => match value {
            Value::Str(s) => truncate(s, spec.precision),
            _ => return Err(unknown('s')),
        },
        Some(code) => return Err(unknown(code)),
        None => match value {
            Value::Float(f) => match spec.precision {
                Some(p) => non_finite(*f).unwrap_or_else(|| general_form(*f, p, false)),
                None => format_float(*f),
            },
            Value::Int(_) | Value::Bool(_) if spec.precision.is_some() => {
                return Err(Exception::value_error(
                    "Precision not allowed in integer format specifier",
                ))
            }
            Value::Str(s) => truncate(s, spec.precision),
            other => other.to_display(),
        },
    };

    let (sign, magnitude) = if numeric {
        match body.strip_prefix('-') {
            Some(rest) => ("-", rest.to_string()),
            None => (
                match spec.sign {
                    Some('+') => "+",
                    Some(' ') => " ",
                    _ => "",
                },
                body,
            ),
        }
    } else {
        ("", body)
    };
    let magnitude = if spec.grouping && numeric {
        group_thousands(&magnitude)
    } else {
        magnitude
    };

    let (fill, align) = match (spec.fill, spec.align, spec.zero) {
        (fill, Some(align), _) => (fill.unwrap_or(' '), align),
        (_, None, true) => ('0', '='),
        (_, None, false) => (' ', if numeric { '>' } else { '<' }),
    };
    let len = sign.chars().count() + magnitude.chars().count();
    let pad = spec.width.saturating_sub(len);
    if pad > MAX_SEQUENCE_LEN {
        return Err(Exception::new("MemoryError", ""));
    }
    let fill_str = |n: usize| fill.to_string().repeat(n);
    Ok(match align {
        '<' => format!("{sign}{magnitude}{}", fill_str(pad)),
        '^' => format!(
            "{}{sign}{magnitude}{}",
            fill_str(pad / 2),
            fill_str(pad - pad / 2)
        ),
        '=' => format!("{sign}{}{magnitude}", fill_str(pad)),
        _ => format!("{}{sign}{magnitude}", fill_str(pad)),
    })
}

fn truncate(s: &str, precision: Option<usize>) -> String {
    match precision {
        Some(p) => s.chars().take(p).collect(),
        None => s.to_string(),
    }
}

// ---- modules ---------------------------------------------------------------

fn module(name: &str, attrs: Vec<(&str, Value)>) -> Value {
    Value::Module(Rc::new(Module {
        name: name.to_string(),
        attrs: attrs
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect::<BTreeMap<_, _>>(),
    }))
}

/// Resolves an `import` of a dotted module path.
pub fn import_module(name: &str) -> EvalResult<Value> {
    match name {
        "math" => Ok(math_module()),
        "sys" => Ok(sys_module()),
        "matplotlib" => Ok(matplotlib_module()),
        "matplotlib.pyplot" => Ok(pyplot_module()),
        _ => Err(Exception::new(
            "ModuleNotFoundError",
            format!("No module named '{name}'"),
        )),
    }
}

/// Library bindings injected into a fresh namespace.
pub fn prelude() -> Vec<(&'static str, Value)> {
    vec![("math", math_module()), ("plt", pyplot_module())]
}

fn single_real(args: CallArgs, func: &str) -> EvalResult<f64> {
    real(&single(args, func)?)
}

fn domain_error() -> Exception {
    Exception::value_error("math domain error")
}

fn range_error() -> Exception {
    Exception::new("OverflowError", "math range error")
}

macro_rules! real_fn {
    ($name:ident, $py:literal, $op:expr) => {
        fn $name(_: &mut Interpreter<'_>, args: CallArgs) -> EvalResult<Value> {
            let x = single_real(args, $py)?;
            let op: fn(f64) -> f64 = $op;
            Ok(Value::Float(op(x)))
        }
    };
}

real_fn!(math_sin, "sin", f64::sin);
real_fn!(math_cos, "cos", f64::cos);
real_fn!(math_tan, "tan", f64::tan);
real_fn!(math_atan, "atan", f64::atan);
real_fn!(math_fabs, "fabs", f64::abs);
real_fn!(math_radians, "radians", f64::to_radians);
real_fn!(math_degrees, "degrees", f64::to_degrees);

fn math_sqrt(_: &mut Interpreter<'_>, args: CallArgs) -> EvalResult<Value> {
    let x = single_real(args, "sqrt")?;
    if x < 0.0 {
        return Err(domain_error());
    }
    Ok(Value::Float(x.sqrt()))
}

fn math_asin(_: &mut Interpreter<'_>, args: CallArgs) -> EvalResult<Value> {
    let x = single_real(args, "asin")?;
    if !(-1.0..=1.0).contains(&x) {
        return Err(domain_error());
    }
    Ok(Value::Float(x.asin()))
}

fn math_acos(_: &mut Interpreter<'_>, args: CallArgs) -> EvalResult<Value> {
    let x = single_real(args, "acos")?;
    if !(-1.0..=1.0).contains(&x) {
        return Err(domain_error());
    }
    Ok(Value::Float(x.acos()))
}

fn math_exp(_: &mut Interpreter<'_>, args: CallArgs) -> EvalResult<Value> {
    let y = single_real(args, "exp")?.exp();
    if y.is_infinite() {
        return Err(range_error());
    }
    Ok(Value::Float(y))
}

fn math_log(_: &mut Interpreter<'_>, args: CallArgs) -> EvalResult<Value> {
    args.reject_keywords("log")?;
    args.arity("log", 1, 2)?;
    let x = real(&args.positional[0])?;
    if x <= 0.0 {
        return Err(domain_error());
    }
    match args.positional.get(1) {
        Some(base) => {
            let base = real(base)?;
            if base <= 0.0 || base == 1.0 {
                return Err(domain_error());
            }
            Ok(Value::Float(x.ln() / base.ln()))
        }
        None => Ok(Value::Float(x.ln())),
    }
}

fn math_log10(_: &mut Interpreter<'_>, args: CallArgs) -> EvalResult<Value> {
    let x = single_real(args, "log10")?;
    if x <= 0.0 {
        return Err(domain_error());
    }
    Ok(Value::Float(x.log10()))
}

fn math_log2(_: &mut Interpreter<'_>, args: CallArgs) -> EvalResult<Value> {
    let x = single_real(args, "log2")?;
    if x <= 0.0 {
        return Err(domain_error());
    }
    Ok(Value::Float(x.log2()))
}

fn math_floor(_: &mut Interpreter<'_>, args: CallArgs) -> EvalResult<Value> {
    match single(args, "floor")? {
        Value::Float(f) => Ok(Value::Int(float_to_int(f.floor())?)),
        v => Ok(Value::Int(integer(&v)?)),
    }
}

fn math_ceil(_: &mut Interpreter<'_>, args: CallArgs) -> EvalResult<Value> {
    match single(args, "ceil")? {
        Value::Float(f) => Ok(Value::Int(float_to_int(f.ceil())?)),
        v => Ok(Value::Int(integer(&v)?)),
    }
}

fn math_pow(_: &mut Interpreter<'_>, args: CallArgs) -> EvalResult<Value> {
    args.reject_keywords("pow")?;
    args.arity("pow", 2, 2)?;
    let (x, y) = (real(&args.positional[0])?, real(&args.positional[1])?);
    if x == 0.0 && y < 0.0 {
        return Err(domain_error());
    }
    Ok(Value::Float(x.powf(y)))
}

fn math_atan2(_: &mut Interpreter<'_>, args: CallArgs) -> EvalResult<Value> {
    args.reject_keywords("atan2")?;
    args.arity("atan2", 2, 2)?;
    let (y, x) = (real(&args.positional[0])?, real(&args.positional[1])?);
    Ok(Value::Float(y.atan2(x)))
}

fn math_hypot(_: &mut Interpreter<'_>, args: CallArgs) -> EvalResult<Value> {
    args.reject_keywords("hypot")?;
    let mut total = 0.0f64;
    for v in &args.positional {
        let x = real(v)?;
        total += x * x;
    }
    Ok(Value::Float(total.sqrt()))
}

fn math_isnan(_: &mut Interpreter<'_>, args: CallArgs) -> EvalResult<Value> {
    Ok(Value::Bool(single_real(args, "isnan")?.is_nan()))
}

fn math_isinf(_: &mut Interpreter<'_>, args: CallArgs) -> EvalResult<Value> {
    Ok(Value::Bool(single_real(args, "isinf")?.is_infinite()))
}

fn math_isfinite(_: &mut Interpreter<'_>, args: CallArgs) -> EvalResult<Value> {
    Ok(Value::Bool(single_real(args, "isfinite")?.is_finite()))
}

fn math_factorial(_: &mut Interpreter<'_>, args: CallArgs) -> EvalResult<Value> {
    let n = integer(&single(args, "factorial")?)?;
    if n < 0 {
        return Err(Exception::value_error(
            "factorial() not defined for negative values",
        ));
    }
    (1..=n)
        .try_fold(1i64, |acc, k| acc.checked_mul(k))
        .map(Value::Int)
        .ok_or_else(Exception::overflow)
}

fn math_gcd(_: &mut Interpreter<'_>, args: CallArgs) -> EvalResult<Value> {
    args.reject_keywords("gcd")?;
    let mut acc = 0u64;
    for v in &args.positional {
        let mut b = integer(v)?.unsigned_abs();
        let mut a = acc;
        while b != 0 {
            (a, b) = (b, a % b);
        }
        acc = a;
    }
    i64::try_from(acc).map(Value::Int).map_err(|_| Exception::overflow())
}

fn math_module() -> Value {
    module(
        "math",
        vec![
            ("pi", Value::Float(std::f64::consts::PI)),
            ("e", Value::Float(std::f64::consts::E)),
            ("tau", Value::Float(std::f64::consts::TAU)),
            ("inf", Value::Float(f64::INFINITY)),
            ("nan", Value::Float(f64::NAN)),
            ("sqrt", builtin("sqrt", math_sqrt)),
            ("sin", builtin("sin", math_sin)),
            ("cos", builtin("cos", math_cos)),
            ("tan", builtin("tan", math_tan)),
            ("asin", builtin("asin", math_asin)),
            ("acos", builtin("acos", math_acos)),
            ("atan", builtin("atan", math_atan)),
            ("atan2", builtin("atan2", math_atan2)),
            ("exp", builtin("exp", math_exp)),
            ("log", builtin("log", math_log)),
            ("log10", builtin("log10", math_log10)),
            ("log2", builtin("log2", math_log2)),
            ("floor", builtin("floor", math_floor)),
            ("ceil", builtin("ceil", math_ceil)),
            ("fabs", builtin("fabs", math_fabs)),
            ("pow", builtin("pow", math_pow)),
            ("hypot", builtin("hypot", math_hypot)),
            ("radians", builtin("radians", math_radians)),
            ("degrees", builtin("degrees", math_degrees)),
            ("isnan", builtin("isnan", math_isnan)),
            ("isinf", builtin("isinf", math_isinf)),
            ("isfinite", builtin("isfinite", math_isfinite)),
            ("factorial", builtin("factorial", math_factorial)),
            ("gcd", builtin("gcd", math_gcd)),
        ],
    )
}

fn sys_module() -> Value {
    module(
        "sys",
        vec![
            ("stdout", Value::Stream(StreamKind::Stdout)),
            ("stderr", Value::Stream(StreamKind::Stderr)),
            (
                "version",
                Value::from(concat!("snipcon ", env!("CARGO_PKG_VERSION"))),
            ),
            ("platform", Value::from(std::env::consts::OS)),
            ("maxsize", Value::Int(i64::MAX)),
        ],
    )
}

fn mpl_use(_: &mut Interpreter<'_>, mut args: CallArgs) -> EvalResult<Value> {
    args.take_keyword("force");
    args.reject_keywords("use")?;
    args.arity("use", 1, 1)?;
    text(&args.positional[0], "use")?;
    Ok(Value::None)
}

fn matplotlib_module() -> Value {
    module(
        "matplotlib",
        vec![
            ("use", builtin("use", mpl_use)),
            ("pyplot", pyplot_module()),
            ("__version__", Value::from("3.8-compatible")),
        ],
    )
}

fn pyplot_module() -> Value {
    module(
        "matplotlib.pyplot",
        vec![
            ("figure", builtin("figure", plt_figure)),
            ("plot", builtin("plot", plt_plot)),
            ("scatter", builtin("scatter", plt_scatter)),
            ("bar", builtin("bar", plt_bar)),
            ("title", builtin("title", plt_title)),
            ("xlabel", builtin("xlabel", plt_xlabel)),
            ("ylabel", builtin("ylabel", plt_ylabel)),
            ("legend", builtin("legend", plt_legend)),
            ("grid", builtin("grid", plt_grid)),
            ("show", builtin("show", plt_show)),
            ("close", builtin("close", plt_close)),
            ("clf", builtin("clf", plt_clf)),
            ("gcf", builtin("gcf", plt_gcf)),
        ],
    )
}

// ---- pyplot ----------------------------------------------------------------

fn data_series(value: &Value) -> EvalResult<Vec<f64>> {
    collect(value)?
        .iter()
        .map(|v| {
            v.as_f64().ok_or_else(|| {
                Exception::type_error(format!("could not convert {} to float", v.type_name()))
            })
        })
        .collect()
}

fn parse_color(value: &Value) -> EvalResult<Rgb> {
    let invalid = || Exception::value_error(format!("{} is not a valid color value", value.repr()));
    match value {
        Value::Str(s) => Rgb::parse(s).ok_or_else(invalid),
        Value::Tuple(parts) if parts.len() == 3 || parts.len() == 4 => {
            let channel = |v: &Value| -> EvalResult<u8> {
                let f = v.as_f64().ok_or_else(invalid)?;
                if !(0.0..=1.0).contains(&f) {
                    return Err(invalid());
                }
                Ok((f * 255.0).round() as u8)
            };
            Ok(Rgb(channel(&parts[0])?, channel(&parts[1])?, channel(&parts[2])?))
        }
        _ => Err(invalid()),
    }
}

struct SeriesStyle {
    label: Option<String>,
    color: Option<Rgb>,
}

/// Pulls the styling keywords this backend honours; the rest are accepted
/// and ignored the way an unsupported artist property would be.
fn series_style(args: &mut CallArgs) -> EvalResult<SeriesStyle> {
    let label = match args.take_keyword("label") {
        None | Some(Value::None) => None,
        Some(v) => Some(v.to_display()),
    };
    let color = match args.take_keyword("color").or_else(|| args.take_keyword("c")) {
        None | Some(Value::None) => None,
        Some(v) => Some(parse_color(&v)?),
    };
    args.keywords.clear();
    Ok(SeriesStyle { label, color })
}

fn push_series(
    interp: &mut Interpreter<'_>,
    kind: SeriesKind,
    xs: Vec<f64>,
    ys: Vec<f64>,
    style: SeriesStyle,
) -> EvalResult<Value> {
    if xs.len() != ys.len() {
        return Err(Exception::value_error(format!(
            "x and y must have same first dimension, but have shapes ({},) and ({},)",
            xs.len(),
            ys.len()
        )));
    }
    let figure = interp.figures().current_mut();
    let color = style.color.unwrap_or_else(|| figure.next_color());
    figure.series.push(Series {
        kind,
        xs,
        ys,
        label: style.label,
        color,
    });
    Ok(Value::None)
}

fn plt_plot(interp: &mut Interpreter<'_>, mut args: CallArgs) -> EvalResult<Value> {
    let mut style = series_style(&mut args)?;
    let mut data = args.positional;
    let fmt = match data.last() {
        Some(Value::Str(s)) if data.len() > 1 => Some(s.to_string()),
        _ => None,
    };
    if fmt.is_some() {
        data.pop();
    }
    let (xs, ys) = match data.as_slice() {
        [ys] => {
            let ys = data_series(ys)?;
            ((0..ys.len()).map(|i| i as f64).collect(), ys)
        }
        [xs, ys] => (data_series(xs)?, data_series(ys)?),
        other => {
            return Err(Exception::type_error(format!(
                "plot() takes 1 or 2 data arguments, got {}",
                other.len()
            )))
        }
    };
    let mut kind = SeriesKind::Line;
    if let Some(fmt) = &fmt {
        if style.color.is_none() {
            style.color = fmt
                .chars()
                .find(|c| "bgrcmykw".contains(*c))
                .and_then(|c| Rgb::parse(&c.to_string()));
        }
        let has_marker = fmt.chars().any(|c| "o.s^vx*+d".contains(c));
        if has_marker && !fmt.contains('-') {
            kind = SeriesKind::Scatter;
        }
    }
    push_series(interp, kind, xs, ys, style)
}

fn plt_scatter(interp: &mut Interpreter<'_>, mut args: CallArgs) -> EvalResult<Value> {
    let style = series_style(&mut args)?;
    if args.len() < 2 {
        return Err(Exception::type_error(
            "scatter() missing required positional arguments: 'x' and 'y'",
        ));
    }
    let xs = data_series(&args.positional[0])?;
    let ys = data_series(&args.positional[1])?;
    push_series(interp, SeriesKind::Scatter, xs, ys, style)
}

fn plt_bar(interp: &mut Interpreter<'_>, mut args: CallArgs) -> EvalResult<Value> {
    let style = series_style(&mut args)?;
    if args.len() < 2 {
        return Err(Exception::type_error(
            "bar() missing required positional arguments: 'x' and 'height'",
        ));
    }
    let positions = collect(&args.positional[0])?;
    let xs = if positions.iter().all(Value::is_numeric) {
        data_series(&args.positional[0])?
    } else {
        (0..positions.len()).map(|i| i as f64).collect()
    };
    let ys = data_series(&args.positional[1])?;
    push_series(interp, SeriesKind::Bar, xs, ys, style)
}

fn label_text(args: CallArgs, func: &str) -> EvalResult<String> {
    args.arity(func, 1, 1)?;
    Ok(args.positional[0].to_display())
}

fn plt_title(interp: &mut Interpreter<'_>, args: CallArgs) -> EvalResult<Value> {
    let title = label_text(args, "title")?;
    interp.figures().current_mut().title = Some(title);
    Ok(Value::None)
}

fn plt_xlabel(interp: &mut Interpreter<'_>, args: CallArgs) -> EvalResult<Value> {
    let label = label_text(args, "xlabel")?;
    interp.figures().current_mut().xlabel = Some(label);
    Ok(Value::None)
}

fn plt_ylabel(interp: &mut Interpreter<'_>, args: CallArgs) -> EvalResult<Value> {
    let label = label_text(args, "ylabel")?;
    interp.figures().current_mut().ylabel = Some(label);
    Ok(Value::None)
}

fn plt_legend(interp: &mut Interpreter<'_>, _: CallArgs) -> EvalResult<Value> {
    interp.figures().current_mut().legend = true;
    Ok(Value::None)
}

fn plt_grid(interp: &mut Interpreter<'_>, mut args: CallArgs) -> EvalResult<Value> {
    let visible = args
        .take_keyword("visible")
        .or_else(|| args.positional.first().cloned())
        .map_or(true, |v| v.truthy());
    interp.figures().current_mut().grid = visible;
    Ok(Value::None)
}

fn plt_show(_: &mut Interpreter<'_>, _: CallArgs) -> EvalResult<Value> {
    Ok(Value::None)
}

fn plt_close(interp: &mut Interpreter<'_>, args: CallArgs) -> EvalResult<Value> {
    args.reject_keywords("close")?;
    args.arity("close", 0, 1)?;
    let figures = interp.figures();
    match args.positional.first() {
        None | Some(Value::None) => figures.close_current(),
        Some(Value::Str(s)) if &**s == "all" => figures.close_all(),
        Some(Value::Figure(id)) => figures.close(*id),
        Some(v) if v.as_int().is_some() => {
            let n = v.as_int().unwrap_or(0);
            figures.close(FigureId(u32::try_from(n).unwrap_or(0)));
        }
        Some(other) => {
            return Err(Exception::type_error(format!(
                "close() argument must be a Figure, an int, a string, or None, not {}",
                other.type_name()
            )))
        }
    }
    Ok(Value::None)
}

fn plt_clf(interp: &mut Interpreter<'_>, _: CallArgs) -> EvalResult<Value> {
    interp.figures().current_mut();
    interp.figures().clear_current();
    Ok(Value::None)
}

fn plt_gcf(interp: &mut Interpreter<'_>, _: CallArgs) -> EvalResult<Value> {
    Ok(Value::Figure(interp.figures().current_mut().id))
}

fn plt_figure(interp: &mut Interpreter<'_>, mut args: CallArgs) -> EvalResult<Value> {
    let figsize = args.take_keyword("figsize");
    let dpi = match args.take_keyword("dpi") {
        None | Some(Value::None) => 100.0,
        Some(v) => real(&v)?,
    };
    let num = args
        .take_keyword("num")
        .or_else(|| args.positional.first().cloned());
    args.keywords.clear();

    let size = match figsize {
        None | Some(Value::None) => None,
        Some(v) => {
            let dims = data_series(&v)?;
            let &[w, h] = dims.as_slice() else {
                return Err(Exception::value_error("figsize must be a (width, height) pair"));
            };
            if !(w > 0.0 && h > 0.0 && (w * dpi) < 10_000.0 && (h * dpi) < 10_000.0) {
                return Err(Exception::value_error(format!(
                    "figure size must be positive finite not ({w}, {h})"
                )));
            }
            Some(((w * dpi).round() as u32, (h * dpi).round() as u32))
        }
    };
    let figures = interp.figures();
    let id = match num {
        None | Some(Value::None) => figures.new_figure(size),
        Some(Value::Figure(id)) => figures.select(id, size),
        Some(v) => {
            let n = integer(&v)?;
            let n = u32::try_from(n)
                .ok()
                .filter(|n| *n > 0)
                .ok_or_else(|| Exception::value_error("figure number must be positive"))?;
            figures.select(FigureId(n), size)
        }
    };
    Ok(Value::Figure(id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_specs() {
        assert_eq!(format_value(&Value::Float(3.14159), ".2f").unwrap(), "3.14");
        assert_eq!(format_value(&Value::Int(42), ">5").unwrap(), "   42");
        assert_eq!(format_value(&Value::from("ab"), "^6").unwrap(), "  ab  ");
        assert_eq!(format_value(&Value::Int(1234567), ",").unwrap(), "1,234,567");
        assert_eq!(format_value(&Value::Int(-7), "05").unwrap(), "-0007");
        assert_eq!(format_value(&Value::Float(0.25), ".0%").unwrap(), "25%");
        assert_eq!(format_value(&Value::Float(12345.678), ".3e").unwrap(), "1.235e+04");
        assert_eq!(format_value(&Value::Float(3.14159), ".3").unwrap(), "3.14");
        assert!(format_value(&Value::from("x"), "d").is_err());
    }

    #[test]
    fn str_format_fields() {
        let args = CallArgs {
            positional: vec![Value::Int(1), Value::from("b")],
            keywords: vec![("name".into(), Value::Float(0.5))],
        };
        let out = format_template("{} {!r} {name:.1f} {{}} {0}", &args).unwrap();
        assert_eq!(out, "1 'b' 0.5 {} 1");
    }

    #[test]
    fn int_parsing() {
        assert_eq!(parse_int(" 42 ", 10), Some(42));
        assert_eq!(parse_int("-ff", 16), Some(-255));
        assert_eq!(parse_int("1_000", 10), Some(1000));
        assert_eq!(parse_int("4.5", 10), None);
    }

    #[test]
    fn unknown_module_is_not_found() {
        let err = import_module("numpy").unwrap_err();
        assert_eq!(err.kind, "ModuleNotFoundError");
    }
}
