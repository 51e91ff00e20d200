use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use crate::lang::ast::FunctionDef;
use crate::lang::exception::Exception;
use crate::lang::figure::FigureId;
use crate::lang::interp::{CallArgs, Interpreter, SliceBounds, MAX_SEQUENCE_LEN};
use crate::lang::lexer::Keyword;

/// Containers nested deeper than this are elided by repr, and refused by
/// equality and serialization.
pub const MAX_CONTAINER_DEPTH: usize = 64;

pub type ListRef = Rc<RefCell<Vec<Value>>>;
pub type DictRef = Rc<RefCell<Dict>>;
pub type BuiltinFn = fn(&mut Interpreter<'_>, CallArgs) -> Result<Value, Exception>;

/// Insertion-ordered mapping with Python key equality.
#[derive(Clone, Default)]
pub struct Dict {
    entries: Vec<(Value, Value)>,
}

impl Dict {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &Value) -> Option<&Value> {
        self.entries
            .iter()
            .find(|(k, _)| k.py_eq(key))
            .map(|(_, v)| v)
    }

    /// Callers are responsible for checking that `key` is hashable.
    pub fn insert(&mut self, key: Value, value: Value) {
        match self.entries.iter_mut().find(|(k, _)| k.py_eq(&key)) {
            Some(slot) => slot.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn remove(&mut self, key: &Value) -> Option<Value> {
        let pos = self.entries.iter().position(|(k, _)| k.py_eq(key))?;
        Some(self.entries.remove(pos).1)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &(Value, Value)> {
        self.entries.iter()
    }

    pub fn keys(&self) -> Vec<Value> {
        self.entries.iter().map(|(k, _)| k.clone()).collect()
    }

    pub fn values(&self) -> Vec<Value> {
        self.entries.iter().map(|(_, v)| v.clone()).collect()
    }
}

impl FromIterator<(Value, Value)> for Dict {
    fn from_iter<T: IntoIterator<Item = (Value, Value)>>(iter: T) -> Self {
        let mut dict = Dict::new();
        for (k, v) in iter {
            dict.insert(k, v);
        }
        dict
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeValue {
    pub start: i64,
    pub stop: i64,
    pub step: i64,
}

impl RangeValue {
    pub fn new(start: i64, stop: i64, step: i64) -> Result<Self, Exception> {
        if step == 0 {
            return Err(Exception::value_error("range() arg 3 must not be zero"));
        }
        Ok(Self { start, stop, step })
    }

    pub fn len(&self) -> usize {
        let (start, stop, step) = (self.start as i128, self.stop as i128, self.step as i128);
        let n = if step > 0 && start < stop {
            (stop - start + step - 1) / step
        } else if step < 0 && start > stop {
            (start - stop - step - 1) / (-step)
        } else {
            0
        };
        n as usize
    }

    pub fn get(&self, index: usize) -> Option<i64> {
        if index >= self.len() {
            return None;
        }
        i64::try_from(i128::from(self.start) + i128::from(self.step) * index as i128).ok()
    }

    pub fn contains(&self, value: i64) -> bool {
        let in_bounds = if self.step > 0 {
            value >= self.start && value < self.stop
        } else {
            value <= self.start && value > self.stop
        };
        in_bounds && (i128::from(value) - i128::from(self.start)) % i128::from(self.step) == 0
    }

    /// The sub-range picked by a slice; a list when the result has no
    /// representable `range` form.
    pub fn slice(&self, bounds: SliceBounds) -> Result<Value, Exception> {
        let start = i128::from(self.start) + bounds.first * i128::from(self.step);
        let step = bounds.step * i128::from(self.step);
        if bounds.count == 0 {
            let at = start.clamp(i64::MIN.into(), i64::MAX.into()) as i64;
            return Ok(Value::Range(RangeValue {
                start: at,
                stop: at,
                step: 1,
            }));
        }
        let stop = start + bounds.count as i128 * step;
        if let (Ok(start), Ok(stop), Ok(step)) =
            (i64::try_from(start), i64::try_from(stop), i64::try_from(step))
        {
            return Ok(Value::Range(RangeValue { start, stop, step }));
        }
        if bounds.count > MAX_SEQUENCE_LEN {
            return Err(Exception::new("MemoryError", ""));
        }
        Ok(Value::list(
            bounds
                .indices()
                .filter_map(|i| self.get(i))
                .map(Value::Int)
                .collect(),
        ))
    }
}

pub struct Function {
    pub def: Rc<FunctionDef>,
    pub defaults: Vec<Option<Value>>,
}

#[derive(Clone, Copy)]
pub struct Builtin {
    pub name: &'static str,
    pub func: BuiltinFn,
}

pub struct BoundMethod {
    pub receiver: Value,
    pub name: String,
}

pub struct Module {
    pub name: String,
    pub attrs: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExceptionValue {
    pub kind: String,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Stdout,
    Stderr,
}

#[derive(Clone, Default)]
pub enum Value {
    #[default]
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Rc<str>),
    List(ListRef),
    Tuple(Rc<Vec<Value>>),
    Dict(DictRef),
    Range(RangeValue),
    Function(Rc<Function>),
    Builtin(Builtin),
    Method(Rc<BoundMethod>),
    Module(Rc<Module>),
    /// A class object: a builtin type (`int`, `list`, ...) or an exception class.
    Class(Rc<str>),
    Exception(Rc<ExceptionValue>),
    Figure(FigureId),
    Stream(StreamKind),
}

impl Value {
    pub fn str(s: impl Into<Rc<str>>) -> Self {
        Self::Str(s.into())
    }

    pub fn list(items: Vec<Value>) -> Self {
        Self::List(Rc::new(RefCell::new(items)))
    }

    pub fn tuple(items: Vec<Value>) -> Self {
        Self::Tuple(Rc::new(items))
    }

    pub fn dict(dict: Dict) -> Self {
        Self::Dict(Rc::new(RefCell::new(dict)))
    }

    pub fn type_name(&self) -> String {
        let name = match self {
            Self::None => "NoneType",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Str(_) => "str",
            Self::List(_) => "list",
            Self::Tuple(_) => "tuple",
            Self::Dict(_) => "dict",
            Self::Range(_) => "range",
            Self::Function(_) => "function",
            Self::Builtin(_) => "builtin_function_or_method",
            Self::Method(_) => "method",
            Self::Module(_) => "module",
            Self::Class(_) => "type",
            Self::Exception(e) => return e.kind.clone(),
            Self::Figure(_) => "Figure",
            Self::Stream(_) => "TextIOWrapper",
        };
        name.to_string()
    }

    pub fn truthy(&self) -> bool {
        match self {
            Self::None => false,
            Self::Bool(b) => *b,
            Self::Int(i) => *i != 0,
            Self::Float(f) => *f != 0.0,
            Self::Str(s) => !s.is_empty(),
            Self::List(l) => !l.borrow().is_empty(),
            Self::Tuple(t) => !t.is_empty(),
            Self::Dict(d) => !d.borrow().is_empty(),
            Self::Range(r) => r.len() > 0,
            _ => true,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Self::Int(i) => Some(*i as f64),
            Self::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Bool(b) => Some(i64::from(*b)),
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Self::Bool(_) | Self::Int(_) | Self::Float(_))
    }

    /// Number of elements for sized values.
    pub fn len(&self) -> Option<usize> {
        match self {
            Self::Str(s) => Some(s.chars().count()),
            Self::List(l) => Some(l.borrow().len()),
            Self::Tuple(t) => Some(t.len()),
            Self::Dict(d) => Some(d.borrow().len()),
            Self::Range(r) => Some(r.len()),
            _ => None,
        }
    }

    pub fn is_hashable(&self) -> bool {
        match self {
            Self::None
            | Self::Bool(_)
            | Self::Int(_)
            | Self::Float(_)
            | Self::Str(_)
            | Self::Range(_)
            | Self::Class(_) => true,
            Self::Tuple(items) => items.iter().all(Value::is_hashable),
            _ => false,
        }
    }

    /// Identity comparison (`is`).
    pub fn is_same(&self, other: &Value) -> bool {
        match (self, other) {
            (Self::None, Self::None) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Str(a), Self::Str(b)) => Rc::ptr_eq(a, b) || a == b,
            (Self::List(a), Self::List(b)) => Rc::ptr_eq(a, b),
            (Self::Tuple(a), Self::Tuple(b)) => Rc::ptr_eq(a, b),
            (Self::Dict(a), Self::Dict(b)) => Rc::ptr_eq(a, b),
            (Self::Function(a), Self::Function(b)) => Rc::ptr_eq(a, b),
            (Self::Method(a), Self::Method(b)) => Rc::ptr_eq(a, b),
            (Self::Module(a), Self::Module(b)) => Rc::ptr_eq(a, b),
            (Self::Exception(a), Self::Exception(b)) => Rc::ptr_eq(a, b),
            (Self::Builtin(a), Self::Builtin(b)) => a.name == b.name,
            (Self::Class(a), Self::Class(b)) => a == b,
            (Self::Figure(a), Self::Figure(b)) => a == b,
            (Self::Stream(a), Self::Stream(b)) => a == b,
            _ => false,
        }
    }

    /// Value equality for key lookups and host comparisons. Containers too
    /// deep to compare count as unequal.
    pub fn py_eq(&self, other: &Value) -> bool {
        self.try_eq(other).unwrap_or(false)
    }

    /// Value equality (`==`); `RecursionError` past the container depth bound.
    pub fn try_eq(&self, other: &Value) -> Result<bool, Exception> {
        self.eq_depth(other, 0)
    }

    fn eq_depth(&self, other: &Value, depth: usize) -> Result<bool, Exception> {
        if depth > MAX_CONTAINER_DEPTH {
            return Err(Exception::new(
                "RecursionError",
                "maximum recursion depth exceeded in comparison",
            ));
        }
        match (self, other) {
            (a, b) if a.is_numeric() && b.is_numeric() => Ok(match (a.as_int(), b.as_int()) {
                (Some(x), Some(y)) => x == y,
                _ => a.as_f64() == b.as_f64(),
            }),
            (Self::Str(a), Self::Str(b)) => Ok(a == b),
            (Self::List(a), Self::List(b)) => {
                if Rc::ptr_eq(a, b) {
                    return Ok(true);
                }
                seq_eq(&a.borrow(), &b.borrow(), depth)
            }
            (Self::Tuple(a), Self::Tuple(b)) => seq_eq(a, b, depth),
            (Self::Dict(a), Self::Dict(b)) => {
                if Rc::ptr_eq(a, b) {
                    return Ok(true);
                }
                let (a, b) = (a.borrow(), b.borrow());
                if a.len() != b.len() {
                    return Ok(false);
                }
                for (k, v) in a.iter() {
                    match b.get(k) {
                        Some(other) if v.eq_depth(other, depth + 1)? => {}
                        _ => return Ok(false),
                    }
                }
                Ok(true)
            }
            (Self::Range(a), Self::Range(b)) => Ok(a == b),
            (Self::Exception(a), Self::Exception(b)) => Ok(Rc::ptr_eq(a, b)),
            _ => Ok(self.is_same(other)),
        }
    }

    /// Moves the children out of a container this value solely owns.
    fn release_children(&mut self, pending: &mut Vec<Value>) {
        match self {
            Self::List(items) => {
                if let Some(items) = Rc::get_mut(items) {
                    pending.append(items.get_mut());
                }
            }
            Self::Tuple(items) => {
                if let Some(items) = Rc::get_mut(items) {
                    pending.append(items);
                }
            }
            Self::Dict(dict) => {
                if let Some(dict) = Rc::get_mut(dict) {
                    for (key, value) in dict.get_mut().entries.drain(..) {
                        pending.push(key);
                        pending.push(value);
                    }
                }
            }
            Self::Method(method) => {
                if let Some(method) = Rc::get_mut(method) {
                    pending.push(std::mem::take(&mut method.receiver));
                }
            }
            _ => {}
        }
    }

    pub fn repr(&self) -> String {
        let mut out = String::new();
        self.write_repr(&mut out, 0, &mut Vec::new());
        out
    }

    /// `str(value)`: strings render raw, everything else falls back to repr.
    pub fn to_display(&self) -> String {
        match self {
            Self::Str(s) => s.to_string(),
            Self::Exception(e) => e.message.clone(),
            _ => self.repr(),
        }
    }

    /// `open` holds the containers currently being printed, so a container
    /// that reaches itself prints as `[...]` or `{...}`.
    fn write_repr(&self, out: &mut String, depth: usize, open: &mut Vec<*const ()>) {
        if depth > MAX_CONTAINER_DEPTH {
            out.push_str("...");
            return;
        }
        match self {
            Self::None => out.push_str("None"),
            Self::Bool(true) => out.push_str("True"),
            Self::Bool(false) => out.push_str("False"),
            Self::Int(i) => out.push_str(&i.to_string()),
            Self::Float(f) => out.push_str(&format_float(*f)),
            Self::Str(s) => out.push_str(&quote_str(s)),
            Self::List(list) => {
                let id = Rc::as_ptr(list) as *const ();
                let items = match list.try_borrow() {
                    Ok(items) if !open.contains(&id) => items,
                    _ => {
                        out.push_str("[...]");
                        return;
                    }
                };
                open.push(id);
                out.push('[');
                write_items(out, &items, depth, open);
                out.push(']');
                open.pop();
            }
            Self::Tuple(items) => {
                out.push('(');
                write_items(out, items, depth, open);
                if items.len() == 1 {
                    out.push(',');
                }
                out.push(')');
            }
            Self::Dict(cell) => {
                let id = Rc::as_ptr(cell) as *const ();
                let dict = match cell.try_borrow() {
                    Ok(dict) if !open.contains(&id) => dict,
                    _ => {
                        out.push_str("{...}");
                        return;
                    }
                };
                open.push(id);
                out.push('{');
                for (i, (k, v)) in dict.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    k.write_repr(out, depth + 1, open);
                    out.push_str(": ");
                    v.write_repr(out, depth + 1, open);
                }
                out.push('}');
                open.pop();
            }
            Self::Range(r) => {
                if r.step == 1 {
                    out.push_str(&format!("range({}, {})", r.start, r.stop));
                } else {
                    out.push_str(&format!("range({}, {}, {})", r.start, r.stop, r.step));
                }
            }
            Self::Function(f) => out.push_str(&format!("<function {}>", f.def.name)),
            Self::Builtin(b) => out.push_str(&format!("<built-in function {}>", b.name)),
            Self::Method(m) => out.push_str(&format!(
                "<bound method {}.{}>",
                m.receiver.type_name(),
                m.name
            )),
            Self::Module(m) => out.push_str(&format!("<module '{}'>", m.name)),
            Self::Class(name) => out.push_str(&format!("<class '{name}'>")),
            Self::Exception(e) => {
                if e.message.is_empty() {
                    out.push_str(&format!("{}()", e.kind));
                } else {
                    out.push_str(&format!("{}({})", e.kind, quote_str(&e.message)));
                }
            }
            Self::Figure(id) => out.push_str(&format!("<Figure {}>", id.0)),
            Self::Stream(StreamKind::Stdout) => out.push_str("<sys.stdout>"),
            Self::Stream(StreamKind::Stderr) => out.push_str("<sys.stderr>"),
        }
    }
}

// Nested containers are torn down from a work list so that dropping a deeply
// nested value does not recurse once per level.
impl Drop for Value {
    fn drop(&mut self) {
        let mut pending = Vec::new();
        self.release_children(&mut pending);
        while let Some(mut value) = pending.pop() {
            value.release_children(&mut pending);
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.repr())
    }
}

impl fmt::Debug for Dict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.entries.iter().map(|(k, v)| (k, v)))
            .finish()
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.py_eq(other)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Str(value.into())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::Str(value.into())
    }
}

fn seq_eq(a: &[Value], b: &[Value], depth: usize) -> Result<bool, Exception> {
    if a.len() != b.len() {
        return Ok(false);
    }
    for (x, y) in a.iter().zip(b) {
        if !x.eq_depth(y, depth + 1)? {
            return Ok(false);
        }
    }
    Ok(true)
}

fn write_items(out: &mut String, items: &[Value], depth: usize, open: &mut Vec<*const ()>) {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        item.write_repr(out, depth + 1, open);
    }
}

/// Floats print the way the console's users expect from Python: integral
/// values keep a trailing `.0`, very large/small magnitudes use exponent form.
pub fn format_float(f: f64) -> String {
    if f.is_nan() {
        return "nan".to_string();
    }
    if f.is_infinite() {
        return if f > 0.0 { "inf" } else { "-inf" }.to_string();
    }
    let abs = f.abs();
    if abs != 0.0 && !(1e-4..1e16).contains(&abs) {
        let s = format!("{f:e}");
        let (mantissa, exp) = s.split_once('e').unwrap_or((&s, "0"));
        let (sign, digits) = match exp.strip_prefix('-') {
            Some(d) => ('-', d),
            None => ('+', exp),
        };
        return format!("{mantissa}e{sign}{digits:0>2}");
    }
    if f.fract() == 0.0 {
        format!("{f:.1}")
    } else {
        format!("{f}")
    }
}

pub fn quote_str(s: &str) -> String {
    let quote = if s.contains('\'') && !s.contains('"') {
        '"'
    } else {
        '\''
    };
    let mut out = String::with_capacity(s.len() + 2);
    out.push(quote);
    for ch in s.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            c if c == quote => {
                out.push('\\');
                out.push(c);
            }
            c => out.push(c),
        }
    }
    out.push(quote);
    out
}

pub fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    (first.is_alphabetic() || first == '_')
        && chars.all(|c| c.is_alphanumeric() || c == '_')
        && Keyword::from_ident(name).is_none()
}

/// The persistent variable mapping one engine executes against.
#[derive(Debug, Clone, Default)]
pub struct Namespace {
    vars: BTreeMap<String, Value>,
}

impl Namespace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.vars.get(name)
    }

    pub fn insert(&mut self, name: impl Into<String>, value: Value) {
        self.vars.insert(name.into(), value);
    }

    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.vars.remove(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.vars.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.vars.iter()
    }

    pub fn names(&self) -> Vec<String> {
        self.vars.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    pub fn clear(&mut self) {
        self.vars.clear();
    }

    pub fn retain(&mut self, mut keep: impl FnMut(&str, &Value) -> bool) {
        self.vars.retain(|k, v| keep(k, v));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn floats_render_like_python() {
        assert_eq!(format_float(2.0), "2.0");
        assert_eq!(format_float(0.1), "0.1");
        assert_eq!(format_float(1e16), "1e+16");
        assert_eq!(format_float(1e-5), "1e-05");
        assert_eq!(format_float(-0.5), "-0.5");
    }

    #[test]
    fn repr_of_containers() {
        let v = Value::list(vec![
            Value::Int(1),
            Value::from("a"),
            Value::tuple(vec![Value::None]),
        ]);
        assert_eq!(v.repr(), "[1, 'a', (None,)]");
        assert_eq!(Value::from("it's").repr(), "\"it's\"");
    }

    #[test]
    fn self_referencing_list_repr_terminates() {
        let list = Value::list(vec![Value::Int(1)]);
        if let Value::List(inner) = &list {
            inner.borrow_mut().push(list.clone());
        }
        assert_eq!(list.repr(), "[1, [...]]");
        // break the cycle so the test does not leak
        if let Value::List(inner) = &list {
            inner.borrow_mut().clear();
        }
    }

    #[test]
    fn shared_but_acyclic_lists_print_in_full() {
        let inner = Value::list(vec![Value::Int(2)]);
        let outer = Value::list(vec![inner.clone(), inner]);
        assert_eq!(outer.repr(), "[[2], [2]]");
    }

    #[test]
    fn deeply_nested_values_drop_without_recursion() {
        let mut value = Value::list(Vec::new());
        for _ in 0..200_000 {
            value = Value::list(vec![value]);
        }
        let mut dict = Value::dict(Dict::new());
        for _ in 0..200_000 {
            dict = Value::dict(Dict::from_iter([(Value::Int(0), dict)]));
        }
        drop(value);
        drop(dict);
    }

    #[test]
    fn equality_past_depth_bound_is_an_error() {
        let nest = || {
            let mut value = Value::list(Vec::new());
            for _ in 0..(MAX_CONTAINER_DEPTH + 8) {
                value = Value::list(vec![value]);
            }
            value
        };
        let err = nest().try_eq(&nest()).unwrap_err();
        assert_eq!(err.kind, "RecursionError");
        assert!(!nest().py_eq(&nest()));
    }

    #[test]
    fn range_arithmetic_stays_in_bounds() {
        let full = RangeValue {
            start: i64::MIN,
            stop: i64::MAX,
            step: 1,
        };
        assert!(full.contains(i64::MAX - 1));
        assert_eq!(full.get(full.len() - 1), Some(i64::MAX - 1));
        let wide = RangeValue {
            start: i64::MIN,
            stop: i64::MAX,
            step: i64::MAX,
        };
        assert!(wide.contains(-1));
        assert!(!wide.contains(0));
    }

    #[test]
    fn numeric_equality_crosses_int_and_float() {
        assert!(Value::Int(1).py_eq(&Value::Float(1.0)));
        assert!(Value::Bool(true).py_eq(&Value::Int(1)));
        assert!(!Value::from("1").py_eq(&Value::Int(1)));
    }

    #[test]
    fn range_len_and_membership() {
        let r = RangeValue {
            start: 0,
            stop: 10,
            step: 3,
        };
        assert_eq!(r.len(), 4);
        assert!(r.contains(9));
        assert!(!r.contains(10));
        let down = RangeValue {
            start: 5,
            stop: 0,
            step: -2,
        };
        assert_eq!(down.len(), 3);
    }

    #[test]
    fn identifiers() {
        assert!(is_identifier("x_1"));
        assert!(!is_identifier("1x"));
        assert!(!is_identifier("for"));
        assert!(!is_identifier(""));
    }
}
