use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::io::Write;
use std::rc::Rc;

use crate::lang::ast::{
    BinOp, BoolOp, CmpOp, Expr, FStringPart, Program, Stmt, StmtKind, Target, UnaryOp,
};
use crate::lang::builtins;
use crate::lang::exception::{is_exception_class, is_subclass, Exception};
use crate::lang::figure::FigureRegistry;
use crate::lang::value::{
    BoundMethod, Dict, Function, Namespace, StreamKind, Value, MAX_CONTAINER_DEPTH,
};

pub type EvalResult<T> = Result<T, Exception>;

const MAX_CALL_DEPTH: usize = 200;

/// Largest sequence a single repeat or range materialisation may build.
pub const MAX_SEQUENCE_LEN: usize = 1 << 28;

// Host stack kept free before a call or nested expression, and the size of
// each extra segment when it runs short.
const STACK_RED_ZONE: usize = 256 * 1024;
const STACK_SEGMENT: usize = 4 * 1024 * 1024;

/// Where one output channel currently goes.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Sink {
    /// The hosting process's own stream.
    #[default]
    Inherit,
    Buffer(String),
}

impl Sink {
    fn write(&mut self, kind: StreamKind, text: &str) {
        match self {
            Self::Buffer(buf) => buf.push_str(text),
            Self::Inherit => {
                let _ = match kind {
                    StreamKind::Stdout => std::io::stdout().write_all(text.as_bytes()),
                    StreamKind::Stderr => std::io::stderr().write_all(text.as_bytes()),
                };
            }
        }
    }

    pub fn into_text(self) -> String {
        match self {
            Self::Buffer(buf) => buf,
            Self::Inherit => String::new(),
        }
    }
}

/// The stdout/stderr pair snippet code writes to.
#[derive(Debug, Clone, Default)]
pub struct Streams {
    pub stdout: Sink,
    pub stderr: Sink,
}

impl Streams {
    pub fn write(&mut self, kind: StreamKind, text: &str) {
        match kind {
            StreamKind::Stdout => self.stdout.write(kind, text),
            StreamKind::Stderr => self.stderr.write(kind, text),
        }
    }

    /// Installs new sinks, handing back the previous pair.
    pub fn replace(&mut self, stdout: Sink, stderr: Sink) -> (Sink, Sink) {
        (
            std::mem::replace(&mut self.stdout, stdout),
            std::mem::replace(&mut self.stderr, stderr),
        )
    }
}

/// Arguments of one call, as evaluated at the call site.
#[derive(Debug, Default)]
pub struct CallArgs {
    pub positional: Vec<Value>,
    pub keywords: Vec<(String, Value)>,
}

impl CallArgs {
    pub fn positional(values: Vec<Value>) -> Self {
        Self {
            positional: values,
            keywords: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.positional.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positional.is_empty()
    }

    pub fn take_keyword(&mut self, name: &str) -> Option<Value> {
        let pos = self.keywords.iter().position(|(k, _)| k == name)?;
        Some(self.keywords.remove(pos).1)
    }

    pub fn reject_keywords(&self, func: &str) -> EvalResult<()> {
        match self.keywords.first() {
            Some((k, _)) => Err(Exception::type_error(format!(
                "{func}() got an unexpected keyword argument '{k}'"
            ))),
            None => Ok(()),
        }
    }

    pub fn arity(&self, func: &str, min: usize, max: usize) -> EvalResult<()> {
        let n = self.positional.len();
        if (min..=max).contains(&n) {
            return Ok(());
        }
        let plural = |k: usize| if k == 1 { "" } else { "s" };
        let message = if min == max {
            format!("{func}() takes exactly {min} argument{} ({n} given)", plural(min))
        } else if n < min {
            format!("{func}() expected at least {min} argument{}, got {n}", plural(min))
        } else {
            format!("{func}() expected at most {max} argument{}, got {n}", plural(max))
        };
        Err(Exception::type_error(message))
    }
}

enum Flow {
    Normal,
    Break,
    Continue,
    Return(Value),
}

struct Scope {
    name: String,
    locals: HashMap<String, Value>,
    globals: HashSet<String>,
}

/// Iterator over the elements of an iterable value.
pub enum ValueIter {
    Items(std::vec::IntoIter<Value>),
    Range { next: i64, step: i64, remaining: usize },
}

impl Iterator for ValueIter {
    type Item = Value;

    fn next(&mut self) -> Option<Value> {
        match self {
            Self::Items(items) => items.next(),
            Self::Range {
                next,
                step,
                remaining,
            } => {
                if *remaining == 0 {
                    return None;
                }
                let value = *next;
                *remaining -= 1;
                *next = next.wrapping_add(*step);
                Some(Value::Int(value))
            }
        }
    }
}

pub fn iterate(value: &Value) -> EvalResult<ValueIter> {
    let items = match value {
        Value::List(items) => items.borrow().clone(),
        Value::Tuple(items) => items.as_ref().clone(),
        Value::Str(s) => s.chars().map(|c| Value::str(c.to_string())).collect(),
        Value::Dict(dict) => dict.borrow().keys(),
        Value::Range(r) => {
            return Ok(ValueIter::Range {
                next: r.start,
                step: r.step,
                remaining: r.len(),
            })
        }
        other => {
            return Err(Exception::type_error(format!(
                "'{}' object is not iterable",
                other.type_name()
            )))
        }
    };
    Ok(ValueIter::Items(items.into_iter()))
}

pub fn collect(value: &Value) -> EvalResult<Vec<Value>> {
    if let Value::Range(r) = value {
        if r.len() > MAX_SEQUENCE_LEN {
            return Err(Exception::new("MemoryError", ""));
        }
    }
    Ok(iterate(value)?.collect())
}

/// Executes snippet code against a borrowed namespace.
///
/// One interpreter lives for the duration of a single run; everything that
/// must outlive the run (variables, figures, stream sinks) is owned by the
/// caller and only borrowed here.
pub struct Interpreter<'a> {
    namespace: &'a mut Namespace,
    figures: &'a mut FigureRegistry,
    streams: &'a mut Streams,
    scopes: Vec<Scope>,
    handling: Vec<Exception>,
}

impl<'a> Interpreter<'a> {
    pub fn new(
        namespace: &'a mut Namespace,
        figures: &'a mut FigureRegistry,
        streams: &'a mut Streams,
    ) -> Self {
        Self {
            namespace,
            figures,
            streams,
            scopes: Vec::new(),
            handling: Vec::new(),
        }
    }

    pub fn figures(&mut self) -> &mut FigureRegistry {
        self.figures
    }

    pub fn namespace(&self) -> &Namespace {
        self.namespace
    }

    pub fn write(&mut self, kind: StreamKind, text: &str) {
        self.streams.write(kind, text);
    }

    /// Runs every statement of `program`. Bindings made before a fault stay
    /// in the namespace.
    pub fn execute(&mut self, program: &Program) -> EvalResult<()> {
        match self.exec_block(&program.body)? {
            Flow::Normal => Ok(()),
            Flow::Return(_) => Err(Exception::new("SyntaxError", "'return' outside function")),
            Flow::Break => Err(Exception::new("SyntaxError", "'break' outside loop")),
            Flow::Continue => Err(Exception::new(
                "SyntaxError",
                "'continue' not properly in loop",
            )),
        }
    }

    pub fn evaluate(&mut self, expr: &Expr) -> EvalResult<Value> {
        self.eval(expr).map_err(|e| e.locate(1, "<module>"))
    }

    /// Names visible at the current point, for `dir()`.
    pub fn visible_names(&self) -> Vec<String> {
        let mut names: Vec<String> = match self.scopes.last() {
            Some(scope) => scope.locals.keys().cloned().collect(),
            None => self.namespace.names(),
        };
        names.sort();
        names
    }

    fn scope_name(&self) -> &str {
        self.scopes
            .last()
            .map(|s| s.name.as_str())
            .unwrap_or("<module>")
    }

    // ---- names ---------------------------------------------------------

    fn lookup(&self, name: &str) -> EvalResult<Value> {
        if let Some(scope) = self.scopes.last() {
            if !scope.globals.contains(name) {
                if let Some(v) = scope.locals.get(name) {
                    return Ok(v.clone());
                }
            }
        }
        if let Some(v) = self.namespace.get(name) {
            return Ok(v.clone());
        }
        builtins::lookup(name).ok_or_else(|| Exception::name_error(name))
    }

    fn store(&mut self, name: &str, value: Value) {
        match self.scopes.last_mut() {
            Some(scope) if !scope.globals.contains(name) => {
                scope.locals.insert(name.to_string(), value);
            }
            _ => self.namespace.insert(name, value),
        }
    }

    fn binding(&self, name: &str) -> Option<Value> {
        match self.scopes.last() {
            Some(scope) if !scope.globals.contains(name) => scope.locals.get(name).cloned(),
            _ => self.namespace.get(name).cloned(),
        }
    }

    fn unbind(&mut self, name: &str) -> Option<Value> {
        match self.scopes.last_mut() {
            Some(scope) if !scope.globals.contains(name) => scope.locals.remove(name),
            _ => self.namespace.remove(name),
        }
    }

    // ---- statements ----------------------------------------------------

    fn exec_block(&mut self, body: &[Stmt]) -> EvalResult<Flow> {
        for stmt in body {
            match self.exec_stmt(stmt) {
                Ok(Flow::Normal) => {}
                Ok(flow) => return Ok(flow),
                Err(e) => return Err(e.locate(stmt.line, self.scope_name())),
            }
        }
        Ok(Flow::Normal)
    }

    fn exec_stmt(&mut self, stmt: &Stmt) -> EvalResult<Flow> {
        match &stmt.kind {
            StmtKind::Expr(expr) => {
                self.eval(expr)?;
            }
            StmtKind::Assign { targets, value } => {
                let value = self.eval(value)?;
                for target in targets {
                    self.assign(target, value.clone())?;
                }
            }
            StmtKind::AugAssign { target, op, value } => self.aug_assign(target, *op, value)?,
            StmtKind::If { branches, orelse } => {
                for (cond, body) in branches {
                    if self.eval(cond)?.truthy() {
                        return self.exec_block(body);
                    }
                }
                return self.exec_block(orelse);
            }
            StmtKind::While { cond, body } => {
                while self.eval(cond)?.truthy() {
                    match self.exec_block(body)? {
                        Flow::Break => break,
                        Flow::Normal | Flow::Continue => {}
                        ret @ Flow::Return(_) => return Ok(ret),
                    }
                }
            }
            StmtKind::For { target, iter, body } => {
                let iterable = self.eval(iter)?;
                for item in iterate(&iterable)? {
                    self.assign(target, item)?;
                    match self.exec_block(body)? {
                        Flow::Break => break,
                        Flow::Normal | Flow::Continue => {}
                        ret @ Flow::Return(_) => return Ok(ret),
                    }
                }
            }
            StmtKind::FunctionDef(def) => {
                let mut defaults = Vec::with_capacity(def.params.len());
                for param in &def.params {
                    defaults.push(match &param.default {
                        Some(expr) => Some(self.eval(expr)?),
                        None => None,
                    });
                }
                let function = Function {
                    def: Rc::clone(def),
                    defaults,
                };
                self.store(&def.name, Value::Function(Rc::new(function)));
            }
            StmtKind::Return(value) => {
                let value = match value {
                    Some(expr) => self.eval(expr)?,
                    None => Value::None,
                };
                return Ok(Flow::Return(value));
            }
            StmtKind::Break => return Ok(Flow::Break),
            StmtKind::Continue => return Ok(Flow::Continue),
            StmtKind::Pass => {}
            StmtKind::Raise(expr) => return Err(self.raise(expr.as_ref())?),
            StmtKind::Import(names) => {
                for import in names {
                    match &import.alias {
                        Some(alias) => {
                            let module = builtins::import_module(&import.name)?;
                            self.store(alias, module);
                        }
                        None => {
                            builtins::import_module(&import.name)?;
                            let top = import.name.split('.').next().unwrap_or(&import.name);
                            let module = builtins::import_module(top)?;
                            self.store(top, module);
                        }
                    }
                }
            }
            StmtKind::FromImport {
                module,
                names,
                star,
            } => {
                let imported = builtins::import_module(module)?;
                let Value::Module(m) = &imported else {
                    return Err(Exception::new("ImportError", format!("'{module}' is not a module")));
                };
                if *star {
                    for (name, value) in m.attrs.iter().filter(|(n, _)| !n.starts_with('_')) {
                        self.store(name, value.clone());
                    }
                }
                for import in names {
                    let value = m.attrs.get(&import.name).cloned().ok_or_else(|| {
                        Exception::new(
                            "ImportError",
                            format!("cannot import name '{}' from '{module}'", import.name),
                        )
                    })?;
                    self.store(import.alias.as_ref().unwrap_or(&import.name), value);
                }
            }
            StmtKind::Try {
                body,
                handlers,
                finally,
            } => {
                let outcome = match self.exec_block(body) {
                    Err(exc) => {
                        let handler = handlers.iter().find(|h| {
                            h.kinds.is_empty() || h.kinds.iter().any(|k| is_subclass(&exc.kind, k))
                        });
                        match handler {
                            Some(handler) => {
                                if let Some(binding) = &handler.binding {
                                    self.store(binding, exc.to_value());
                                }
                                self.handling.push(exc);
                                let result = self.exec_block(&handler.body);
                                self.handling.pop();
                                result
                            }
                            None => Err(exc),
                        }
                    }
                    ok => ok,
                };
                if !finally.is_empty() {
                    match self.exec_block(finally)? {
                        Flow::Normal => {}
                        flow => return Ok(flow),
                    }
                }
                return outcome;
            }
            StmtKind::Global(names) => {
                if let Some(scope) = self.scopes.last_mut() {
                    for name in names {
                        scope.locals.remove(name);
                        scope.globals.insert(name.clone());
                    }
                }
            }
            StmtKind::Delete(targets) => {
                for target in targets {
                    self.delete(target)?;
                }
            }
        }
        Ok(Flow::Normal)
    }

    fn raise(&mut self, expr: Option<&Expr>) -> EvalResult<Exception> {
        let Some(expr) = expr else {
            return match self.handling.last() {
                Some(exc) => {
                    let mut exc = exc.clone();
                    exc.frames.clear();
                    exc.located = false;
                    Ok(exc)
                }
                None => Ok(Exception::new(
                    "RuntimeError",
                    "No active exception to reraise",
                )),
            };
        };
        match &self.eval(expr)? {
            Value::Exception(exc) => Ok(Exception::from_value(exc)),
            Value::Class(name) if is_exception_class(name) => Ok(Exception::new(name.to_string(), "")),
            _ => Ok(Exception::type_error(
                "exceptions must derive from BaseException",
            )),
        }
    }

    fn assign(&mut self, target: &Target, value: Value) -> EvalResult<()> {
        match target {
            Target::Name(name) => {
                self.store(name, value);
                Ok(())
            }
            Target::Index { object, index } => {
                let object = self.eval(object)?;
                let index = self.eval(index)?;
                set_item(&object, index, value)
            }
            Target::Tuple(targets) => {
                let items = collect(&value).map_err(|_| {
                    Exception::type_error(format!(
                        "cannot unpack non-iterable {} object",
                        value.type_name()
                    ))
                })?;
                if items.len() < targets.len() {
                    return Err(Exception::value_error(format!(
                        "not enough values to unpack (expected {}, got {})",
                        targets.len(),
                        items.len()
                    )));
                }
                if items.len() > targets.len() {
                    return Err(Exception::value_error(format!(
                        "too many values to unpack (expected {})",
                        targets.len()
                    )));
                }
                for (target, item) in targets.iter().zip(items) {
                    self.assign(target, item)?;
                }
                Ok(())
            }
        }
    }

    fn aug_assign(&mut self, target: &Target, op: BinOp, value: &Expr) -> EvalResult<()> {
        match target {
            Target::Name(name) => {
                let current = self.lookup(name)?;
                let rhs = self.eval(value)?;
                let result = in_place_op(op, &current, &rhs)?;
                self.store(name, result);
                Ok(())
            }
            Target::Index { object, index } => {
                let object = self.eval(object)?;
                let index = self.eval(index)?;
                let current = get_item(&object, &index)?;
                let rhs = self.eval(value)?;
                let result = in_place_op(op, &current, &rhs)?;
                set_item(&object, index, result)
            }
            Target::Tuple(_) => Err(Exception::new(
                "SyntaxError",
                "illegal expression for augmented assignment",
            )),
        }
    }

    fn delete(&mut self, target: &Target) -> EvalResult<()> {
        match target {
            Target::Name(name) => {
                self.unbind(name)
                    .map(|_| ())
                    .ok_or_else(|| Exception::name_error(name))
            }
            Target::Index { object, index } => {
                let object = self.eval(object)?;
                let index = self.eval(index)?;
                match &object {
                    Value::List(items) => {
                        let len = items.borrow().len();
                        let idx = normalize_index(&index, len, "list")?
                            .ok_or_else(|| Exception::index_error("list assignment index out of range"))?;
                        items.borrow_mut().remove(idx);
                        Ok(())
                    }
                    Value::Dict(dict) => {
                        let removed = dict.borrow_mut().remove(&index);
                        removed.map(|_| ()).ok_or_else(|| Exception::key_error(&index))
                    }
                    other => Err(Exception::type_error(format!(
                        "'{}' object doesn't support item deletion",
                        other.type_name()
                    ))),
                }
            }
            Target::Tuple(targets) => {
                for target in targets {
                    self.delete(target)?;
                }
                Ok(())
            }
        }
    }

    // ---- expressions ---------------------------------------------------

    fn eval(&mut self, expr: &Expr) -> EvalResult<Value> {
        stacker::maybe_grow(STACK_RED_ZONE, STACK_SEGMENT, || self.eval_expr(expr))
    }

    fn eval_expr(&mut self, expr: &Expr) -> EvalResult<Value> {
        match expr {
            Expr::None => Ok(Value::None),
            Expr::Bool(b) => Ok(Value::Bool(*b)),
            Expr::Int(i) => Ok(Value::Int(*i)),
            Expr::Float(f) => Ok(Value::Float(*f)),
            Expr::Str(s) => Ok(Value::str(s.as_str())),
            Expr::FString(parts) => {
                let mut out = String::new();
                for part in parts {
                    match part {
                        FStringPart::Literal(text) => out.push_str(text),
                        FStringPart::Field { expr, repr, spec } => {
                            let value = self.eval(expr)?;
                            let text = if *repr {
                                value.repr()
                            } else {
                                match spec {
                                    Some(spec) => builtins::format_value(&value, spec)?,
                                    None => value.to_display(),
                                }
                            };
                            out.push_str(&text);
                        }
                    }
                }
                Ok(Value::from(out))
            }
            Expr::Name(name) => self.lookup(name),
            Expr::List(items) => Ok(Value::list(self.eval_all(items)?)),
            Expr::Tuple(items) => Ok(Value::tuple(self.eval_all(items)?)),
            Expr::Dict(pairs) => {
                let mut dict = Dict::new();
                for (k, v) in pairs {
                    let key = self.eval(k)?;
                    check_hashable(&key)?;
                    let value = self.eval(v)?;
                    dict.insert(key, value);
                }
                Ok(Value::dict(dict))
            }
            Expr::Attribute { object, name } => {
                let object = self.eval(object)?;
                get_attr(&object, name)
            }
            Expr::Index { object, index } => {
                let object = self.eval(object)?;
                if let Expr::Slice { start, stop, step } = index.as_ref() {
                    let start = self.eval_slice_bound(start.as_deref())?;
                    let stop = self.eval_slice_bound(stop.as_deref())?;
                    let step = self.eval_slice_bound(step.as_deref())?;
                    return get_slice(&object, start, stop, step);
                }
                let index = self.eval(index)?;
                get_item(&object, &index)
            }
            Expr::Slice { .. } => Err(Exception::new("SyntaxError", "invalid syntax")),
            Expr::Call { func, args, kwargs } => {
                let func = self.eval(func)?;
                let positional = self.eval_all(args)?;
                let mut keywords = Vec::with_capacity(kwargs.len());
                for (name, expr) in kwargs {
                    keywords.push((name.clone(), self.eval(expr)?));
                }
                self.call_value(
                    &func,
                    CallArgs {
                        positional,
                        keywords,
                    },
                )
            }
            Expr::Unary { op, operand } => {
                let value = self.eval(operand)?;
                unary_op(*op, &value)
            }
            Expr::Binary { op, left, right } => {
                let left = self.eval(left)?;
                let right = self.eval(right)?;
                binary_op(*op, &left, &right)
            }
            Expr::Compare { left, chain } => {
                let mut left = self.eval(left)?;
                for (op, expr) in chain {
                    let right = self.eval(expr)?;
                    if !compare(*op, &left, &right)? {
                        return Ok(Value::Bool(false));
                    }
                    left = right;
                }
                Ok(Value::Bool(true))
            }
            Expr::BoolOp { op, left, right } => {
                let left = self.eval(left)?;
                let short_circuit = match op {
                    BoolOp::And => !left.truthy(),
                    BoolOp::Or => left.truthy(),
                };
                if short_circuit {
                    Ok(left)
                } else {
                    self.eval(right)
                }
            }
            Expr::IfExp { cond, then, orelse } => {
                if self.eval(cond)?.truthy() {
                    self.eval(then)
                } else {
                    self.eval(orelse)
                }
            }
            Expr::ListComp {
                element,
                target,
                iter,
                cond,
            } => {
                let iterable = self.eval(iter)?;
                let mut names = Vec::new();
                target_names(target, &mut names);
                let saved: Vec<(String, Option<Value>)> = names
                    .into_iter()
                    .map(|n| {
                        let prev = self.binding(&n);
                        (n, prev)
                    })
                    .collect();
                let result = self.comprehension(element, target, &iterable, cond.as_deref());
                for (name, prev) in saved {
                    match prev {
                        Some(value) => self.store(&name, value),
                        None => {
                            self.unbind(&name);
                        }
                    }
                }
                Ok(Value::list(result?))
            }
        }
    }

    fn eval_all(&mut self, exprs: &[Expr]) -> EvalResult<Vec<Value>> {
        exprs.iter().map(|e| self.eval(e)).collect()
    }

    fn eval_slice_bound(&mut self, expr: Option<&Expr>) -> EvalResult<Option<i64>> {
        let Some(expr) = expr else {
            return Ok(None);
        };
        match self.eval(expr)? {
            Value::None => Ok(None),
            v => v.as_int().map(Some).ok_or_else(|| {
                Exception::type_error("slice indices must be integers or None")
            }),
        }
    }

    fn comprehension(
        &mut self,
        element: &Expr,
        target: &Target,
        iterable: &Value,
        cond: Option<&Expr>,
    ) -> EvalResult<Vec<Value>> {
        let mut out = Vec::new();
        for item in iterate(iterable)? {
            self.assign(target, item)?;
            if let Some(cond) = cond {
                if !self.eval(cond)?.truthy() {
                    continue;
                }
            }
            out.push(self.eval(element)?);
        }
        Ok(out)
    }

    pub fn call_value(&mut self, func: &Value, args: CallArgs) -> EvalResult<Value> {
        match func {
            Value::Builtin(builtin) => (builtin.func)(self, args),
            Value::Function(function) => self.call_function(function, args),
            Value::Method(method) => {
                builtins::call_method(self, &method.receiver, &method.name, args)
            }
            Value::Class(name) => builtins::construct(self, name, args),
            other => Err(Exception::type_error(format!(
                "'{}' object is not callable",
                other.type_name()
            ))),
        }
    }

    fn call_function(&mut self, function: &Rc<Function>, args: CallArgs) -> EvalResult<Value> {
        if self.scopes.len() >= MAX_CALL_DEPTH {
            return Err(Exception::new(
                "RecursionError",
                "maximum recursion depth exceeded",
            ));
        }
        stacker::maybe_grow(STACK_RED_ZONE, STACK_SEGMENT, || {
            self.invoke_function(function, args)
        })
    }

    fn invoke_function(&mut self, function: &Rc<Function>, args: CallArgs) -> EvalResult<Value> {
        let def = &function.def;
        let name = def.name.as_str();
        let params = &def.params;

        if args.positional.len() > params.len() {
            return Err(Exception::type_error(format!(
                "{name}() takes {} positional argument{} but {} were given",
                params.len(),
                if params.len() == 1 { "" } else { "s" },
                args.positional.len()
            )));
        }
        let mut slots: Vec<Option<Value>> = vec![None; params.len()];
        for (slot, value) in slots.iter_mut().zip(args.positional) {
            *slot = Some(value);
        }
        for (key, value) in args.keywords {
            let Some(idx) = params.iter().position(|p| p.name == key) else {
                return Err(Exception::type_error(format!(
                    "{name}() got an unexpected keyword argument '{key}'"
                )));
            };
            if slots[idx].is_some() {
                return Err(Exception::type_error(format!(
                    "{name}() got multiple values for argument '{key}'"
                )));
            }
            slots[idx] = Some(value);
        }

        let mut locals = HashMap::with_capacity(params.len());
        let mut missing = Vec::new();
        for ((param, slot), default) in params.iter().zip(slots).zip(&function.defaults) {
            match slot.or_else(|| default.clone()) {
                Some(value) => {
                    locals.insert(param.name.clone(), value);
                }
                None => missing.push(format!("'{}'", param.name)),
            }
        }
        if !missing.is_empty() {
            return Err(Exception::type_error(format!(
                "{name}() missing {} required positional argument{}: {}",
                missing.len(),
                if missing.len() == 1 { "" } else { "s" },
                missing.join(", ")
            )));
        }

        self.scopes.push(Scope {
            name: name.to_string(),
            locals,
            globals: HashSet::new(),
        });
        let result = self.exec_block(&def.body);
        self.scopes.pop();

        match result {
            Ok(Flow::Return(value)) => Ok(value),
            Ok(Flow::Normal) => Ok(Value::None),
            Ok(Flow::Break | Flow::Continue) => Err(Exception::new(
                "SyntaxError",
                "'break' or 'continue' outside loop",
            )),
            Err(mut exc) => {
                exc.located = false;
                Err(exc)
            }
        }
    }
}

fn target_names(target: &Target, out: &mut Vec<String>) {
    match target {
        Target::Name(name) => out.push(name.clone()),
        Target::Tuple(targets) => targets.iter().for_each(|t| target_names(t, out)),
        Target::Index { .. } => {}
    }
}

pub fn check_hashable(value: &Value) -> EvalResult<()> {
    if value.is_hashable() {
        Ok(())
    } else {
        Err(Exception::type_error(format!(
            "unhashable type: '{}'",
            value.type_name()
        )))
    }
}

fn get_attr(object: &Value, name: &str) -> EvalResult<Value> {
    match object {
        Value::Module(module) => module.attrs.get(name).cloned().ok_or_else(|| {
            Exception::new(
                "AttributeError",
                format!("module '{}' has no attribute '{name}'", module.name),
            )
        }),
        Value::Exception(exc) if name == "args" => {
            let args = if exc.message.is_empty() {
                Vec::new()
            } else {
                vec![Value::str(exc.message.as_str())]
            };
            Ok(Value::tuple(args))
        }
        Value::Class(class) if name == "__name__" => Ok(Value::str(Rc::clone(class))),
        Value::Function(f) if name == "__name__" => Ok(Value::str(f.def.name.as_str())),
        Value::Builtin(b) if name == "__name__" => Ok(Value::str(b.name)),
        other if builtins::has_method(other, name) => Ok(Value::Method(Rc::new(BoundMethod {
            receiver: other.clone(),
            name: name.to_string(),
        }))),
        other => Err(Exception::attribute_error(other, name)),
    }
}

/// Resolves a possibly negative index against `len`; `None` when out of range.
pub fn normalize_index(index: &Value, len: usize, what: &str) -> EvalResult<Option<usize>> {
    let Some(i) = index.as_int() else {
        return Err(Exception::type_error(format!(
            "{what} indices must be integers or slices, not {}",
            index.type_name()
        )));
    };
    let (i, len) = (i128::from(i), len as i128);
    let i = if i < 0 { i + len } else { i };
    Ok((0..len).contains(&i).then_some(i as usize))
}

pub fn get_item(object: &Value, index: &Value) -> EvalResult<Value> {
    match object {
        Value::List(items) => {
            let items = items.borrow();
            let idx = normalize_index(index, items.len(), "list")?
                .ok_or_else(|| Exception::index_error("list index out of range"))?;
            Ok(items[idx].clone())
        }
        Value::Tuple(items) => {
            let idx = normalize_index(index, items.len(), "tuple")?
                .ok_or_else(|| Exception::index_error("tuple index out of range"))?;
            Ok(items[idx].clone())
        }
        Value::Str(s) => {
            let count = s.chars().count();
            let idx = normalize_index(index, count, "string")?
                .ok_or_else(|| Exception::index_error("string index out of range"))?;
            Ok(s
                .chars()
                .nth(idx)
                .map(|c| Value::str(c.to_string()))
                .unwrap_or_default())
        }
        Value::Range(range) => {
            let idx = normalize_index(index, range.len(), "range")?
                .ok_or_else(|| Exception::index_error("range object index out of range"))?;
            range
                .get(idx)
                .map(Value::Int)
                .ok_or_else(|| Exception::index_error("range object index out of range"))
        }
        Value::Dict(dict) => {
            check_hashable(index)?;
            dict.borrow()
                .get(index)
                .cloned()
                .ok_or_else(|| Exception::key_error(index))
        }
        other => Err(Exception::type_error(format!(
            "'{}' object is not subscriptable",
            other.type_name()
        ))),
    }
}

pub fn set_item(object: &Value, index: Value, value: Value) -> EvalResult<()> {
    match object {
        Value::List(items) => {
            let len = items.borrow().len();
            let idx = normalize_index(&index, len, "list")?
                .ok_or_else(|| Exception::index_error("list assignment index out of range"))?;
            items.borrow_mut()[idx] = value;
            Ok(())
        }
        Value::Dict(dict) => {
            check_hashable(&index)?;
            dict.borrow_mut().insert(index, value);
            Ok(())
        }
        other => Err(Exception::type_error(format!(
            "'{}' object does not support item assignment",
            other.type_name()
        ))),
    }
}

/// `[start:stop:step]` resolved against a sequence of `len` items: the first
/// position, the stride and how many positions are selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SliceBounds {
    pub first: i128,
    pub step: i128,
    pub count: usize,
}

impl SliceBounds {
    pub fn resolve(
        len: usize,
        start: Option<i64>,
        stop: Option<i64>,
        step: Option<i64>,
    ) -> EvalResult<Self> {
        let step = i128::from(step.unwrap_or(1));
        if step == 0 {
            return Err(Exception::value_error("slice step cannot be zero"));
        }
        let len = len as i128;
        let (lower, upper) = if step > 0 { (0, len) } else { (-1, len - 1) };
        let clamp = |bound: Option<i64>, default: i128| match bound.map(i128::from) {
            None => default,
            Some(b) if b < 0 => (b + len).max(lower),
            Some(b) => b.min(upper),
        };
        let first = clamp(start, if step > 0 { lower } else { upper });
        let stop = clamp(stop, if step > 0 { upper } else { lower });
        let count = if step > 0 && first < stop {
            (stop - first - 1) / step + 1
        } else if step < 0 && stop < first {
            (first - stop - 1) / (-step) + 1
        } else {
            0
        };
        Ok(Self {
            first,
            step,
            count: count as usize,
        })
    }

    pub fn indices(self) -> impl Iterator<Item = usize> {
        (0..self.count).map(move |k| (self.first + k as i128 * self.step) as usize)
    }
}

/// Positions selected by `[start:stop:step]` over a sequence of `len` items.
pub fn slice_indices(
    len: usize,
    start: Option<i64>,
    stop: Option<i64>,
    step: Option<i64>,
) -> EvalResult<Vec<usize>> {
    Ok(SliceBounds::resolve(len, start, stop, step)?.indices().collect())
}

fn get_slice(
    object: &Value,
    start: Option<i64>,
    stop: Option<i64>,
    step: Option<i64>,
) -> EvalResult<Value> {
    match object {
        Value::List(items) => {
            let items = items.borrow();
            let picked = slice_indices(items.len(), start, stop, step)?;
            Ok(Value::list(picked.into_iter().map(|i| items[i].clone()).collect()))
        }
        Value::Tuple(items) => {
            let picked = slice_indices(items.len(), start, stop, step)?;
            Ok(Value::tuple(picked.into_iter().map(|i| items[i].clone()).collect()))
        }
        Value::Str(s) => {
            let chars: Vec<char> = s.chars().collect();
            let picked = slice_indices(chars.len(), start, stop, step)?;
            Ok(Value::from(picked.into_iter().map(|i| chars[i]).collect::<String>()))
        }
        Value::Range(range) => {
            let bounds = SliceBounds::resolve(range.len(), start, stop, step)?;
            range.slice(bounds)
        }
        other => Err(Exception::type_error(format!(
            "'{}' object is not subscriptable",
            other.type_name()
        ))),
    }
}

fn unary_op(op: UnaryOp, value: &Value) -> EvalResult<Value> {
    match (op, value) {
        (UnaryOp::Not, v) => Ok(Value::Bool(!v.truthy())),
        (UnaryOp::Neg, Value::Float(f)) => Ok(Value::Float(-f)),
        (UnaryOp::Pos, Value::Float(f)) => Ok(Value::Float(*f)),
        (UnaryOp::Neg, v) if v.as_int().is_some() => v
            .as_int()
            .and_then(i64::checked_neg)
            .map(Value::Int)
            .ok_or_else(Exception::overflow),
        (UnaryOp::Pos, v) if v.as_int().is_some() => Ok(Value::Int(v.as_int().unwrap_or(0))),
        (op, v) => Err(Exception::type_error(format!(
            "bad operand type for unary {}: '{}'",
            if op == UnaryOp::Neg { "-" } else { "+" },
            v.type_name()
        ))),
    }
}

fn int_pair(left: &Value, right: &Value) -> Option<(i64, i64)> {
    Some((left.as_int()?, right.as_int()?))
}

fn float_pair(left: &Value, right: &Value) -> Option<(f64, f64)> {
    if left.is_numeric() && right.is_numeric() {
        Some((left.as_f64()?, right.as_f64()?))
    } else {
        None
    }
}

fn repeat(count: &Value) -> Option<usize> {
    count
        .as_int()
        .map(|n| usize::try_from(n.max(0)).unwrap_or(usize::MAX))
}

/// Length of `len` items repeated `times` times, refused past the sequence cap.
fn repeated_len(len: usize, times: usize) -> EvalResult<usize> {
    match len.checked_mul(times) {
        Some(total) if total <= MAX_SEQUENCE_LEN => Ok(total),
        _ => Err(Exception::new("MemoryError", "")),
    }
}

/// `+=` and friends: lists extend in place so aliases observe the change.
fn in_place_op(op: BinOp, left: &Value, right: &Value) -> EvalResult<Value> {
    if let (BinOp::Add, Value::List(items)) = (op, left) {
        let extra = collect(right)?;
        items.borrow_mut().extend(extra);
        return Ok(left.clone());
    }
    binary_op(op, left, right)
}

pub fn binary_op(op: BinOp, left: &Value, right: &Value) -> EvalResult<Value> {
    let unsupported = || {
        Exception::type_error(format!(
            "unsupported operand type(s) for {}: '{}' and '{}'",
            op.symbol(),
            left.type_name(),
            right.type_name()
        ))
    };

    match op {
        BinOp::Add => {
            if let Some((a, b)) = int_pair(left, right) {
                return a.checked_add(b).map(Value::Int).ok_or_else(Exception::overflow);
            }
            if let Some((a, b)) = float_pair(left, right) {
                return Ok(Value::Float(a + b));
            }
            match (left, right) {
                (Value::Str(a), Value::Str(b)) => Ok(Value::from(format!("{a}{b}"))),
                (Value::List(a), Value::List(b)) => {
                    let mut items = a.borrow().clone();
                    items.extend(b.borrow().iter().cloned());
                    Ok(Value::list(items))
                }
                (Value::Tuple(a), Value::Tuple(b)) => {
                    let mut items = a.as_ref().clone();
                    items.extend(b.iter().cloned());
                    Ok(Value::tuple(items))
                }
                _ => Err(unsupported()),
            }
        }
        BinOp::Sub => {
            if let Some((a, b)) = int_pair(left, right) {
                return a.checked_sub(b).map(Value::Int).ok_or_else(Exception::overflow);
            }
            float_pair(left, right)
                .map(|(a, b)| Value::Float(a - b))
                .ok_or_else(unsupported)
        }
        BinOp::Mul => {
            if let Some((a, b)) = int_pair(left, right) {
                return a.checked_mul(b).map(Value::Int).ok_or_else(Exception::overflow);
            }
            if let Some((a, b)) = float_pair(left, right) {
                return Ok(Value::Float(a * b));
            }
            match (left, right) {
                (Value::Str(s), n) | (n, Value::Str(s)) if repeat(n).is_some() => {
                    let times = repeat(n).unwrap_or(0);
                    repeated_len(s.len(), times)?;
                    Ok(Value::from(s.repeat(times)))
                }
                (Value::List(items), n) | (n, Value::List(items)) if repeat(n).is_some() => {
                    let items = items.borrow();
                    let times = repeat(n).unwrap_or(0);
                    let mut out = Vec::with_capacity(repeated_len(items.len(), times)?);
                    for _ in 0..times {
                        out.extend(items.iter().cloned());
                    }
                    Ok(Value::list(out))
                }
                (Value::Tuple(items), n) | (n, Value::Tuple(items)) if repeat(n).is_some() => {
                    let times = repeat(n).unwrap_or(0);
                    let mut out = Vec::with_capacity(repeated_len(items.len(), times)?);
                    for _ in 0..times {
                        out.extend(items.iter().cloned());
                    }
                    Ok(Value::tuple(out))
                }
                _ => Err(unsupported()),
            }
        }
        BinOp::Div => {
            let (a, b) = float_pair(left, right).ok_or_else(unsupported)?;
            if b == 0.0 {
                return Err(Exception::zero_division("division by zero"));
            }
            Ok(Value::Float(a / b))
        }
        BinOp::FloorDiv => {
            if let Some((a, b)) = int_pair(left, right) {
                if b == 0 {
                    return Err(Exception::zero_division(
                        "integer division or modulo by zero",
                    ));
                }
                let q = a.checked_div(b).ok_or_else(Exception::overflow)?;
                let adjust = a % b != 0 && ((a < 0) != (b < 0));
                return Ok(Value::Int(if adjust { q - 1 } else { q }));
            }
            let (a, b) = float_pair(left, right).ok_or_else(unsupported)?;
            if b == 0.0 {
                return Err(Exception::zero_division("float floor division by zero"));
            }
            Ok(Value::Float((a / b).floor()))
        }
        BinOp::Mod => {
            if let Some((a, b)) = int_pair(left, right) {
                if b == 0 {
                    return Err(Exception::zero_division(
                        "integer division or modulo by zero",
                    ));
                }
                let r = a.checked_rem(b).unwrap_or(0);
                let r = if r != 0 && ((r < 0) != (b < 0)) { r + b } else { r };
                return Ok(Value::Int(r));
            }
            let (a, b) = float_pair(left, right).ok_or_else(unsupported)?;
            if b == 0.0 {
                return Err(Exception::zero_division("float modulo"));
            }
            let r = a % b;
            let r = if r != 0.0 && ((r < 0.0) != (b < 0.0)) { r + b } else { r };
            Ok(Value::Float(r))
        }
        BinOp::Pow => {
            if let Some((a, b)) = int_pair(left, right) {
                if b >= 0 {
                    let exp = u32::try_from(b).map_err(|_| Exception::overflow())?;
                    return a.checked_pow(exp).map(Value::Int).ok_or_else(Exception::overflow);
                }
                if a == 0 {
                    return Err(Exception::zero_division(
                        "0.0 cannot be raised to a negative power",
                    ));
                }
                return Ok(Value::Float((a as f64).powf(b as f64)));
            }
            let (a, b) = float_pair(left, right).ok_or_else(unsupported)?;
            if a == 0.0 && b < 0.0 {
                return Err(Exception::zero_division(
                    "0.0 cannot be raised to a negative power",
                ));
            }
            Ok(Value::Float(a.powf(b)))
        }
    }
}

/// Ordering for `<`-style comparisons; `None` when unordered (NaN).
pub fn partial_order(left: &Value, right: &Value) -> EvalResult<Option<Ordering>> {
    order_depth(left, right, 0)
}

fn order_depth(left: &Value, right: &Value, depth: usize) -> EvalResult<Option<Ordering>> {
    if depth > MAX_CONTAINER_DEPTH {
        return Err(Exception::new(
            "RecursionError",
            "maximum recursion depth exceeded in comparison",
        ));
    }
    if let Some((a, b)) = int_pair(left, right) {
        return Ok(Some(a.cmp(&b)));
    }
    if let Some((a, b)) = float_pair(left, right) {
        return Ok(a.partial_cmp(&b));
    }
    let seq = |a: &[Value], b: &[Value]| -> EvalResult<Option<Ordering>> {
        for (x, y) in a.iter().zip(b) {
            if !x.try_eq(y)? {
                return order_depth(x, y, depth + 1);
            }
        }
        Ok(Some(a.len().cmp(&b.len())))
    };
    match (left, right) {
        (Value::Str(a), Value::Str(b)) => Ok(Some(a.cmp(b))),
        (Value::List(a), Value::List(b)) => seq(&a.borrow(), &b.borrow()),
        (Value::Tuple(a), Value::Tuple(b)) => seq(a, b),
        _ => Err(Exception::type_error(format!(
            "'<' not supported between instances of '{}' and '{}'",
            left.type_name(),
            right.type_name()
        ))),
    }
}

pub fn contains(container: &Value, item: &Value) -> EvalResult<bool> {
    match container {
        Value::Str(s) => match item {
            Value::Str(needle) => Ok(s.contains(needle.as_ref())),
            other => Err(Exception::type_error(format!(
                "'in <string>' requires string as left operand, not {}",
                other.type_name()
            ))),
        },
        Value::List(items) => any_equal(&items.borrow(), item),
        Value::Tuple(items) => any_equal(items, item),
        Value::Dict(dict) => Ok(dict.borrow().get(item).is_some()),
        Value::Range(range) => Ok(match item {
            Value::Float(f) if f.fract() == 0.0 && (i64::MIN as f64..i64::MAX as f64).contains(f) => {
                range.contains(*f as i64)
            }
            other => other.as_int().is_some_and(|i| range.contains(i)),
        }),
        other => Err(Exception::type_error(format!(
            "argument of type '{}' is not iterable",
            other.type_name()
        ))),
    }
}

fn any_equal(items: &[Value], item: &Value) -> EvalResult<bool> {
    for candidate in items {
        if candidate.try_eq(item)? {
            return Ok(true);
        }
    }
    Ok(false)
}

fn compare(op: CmpOp, left: &Value, right: &Value) -> EvalResult<bool> {
    Ok(match op {
        CmpOp::Eq => left.try_eq(right)?,
        CmpOp::NotEq => !left.try_eq(right)?,
        CmpOp::Is => left.is_same(right),
        CmpOp::IsNot => !left.is_same(right),
        CmpOp::In => contains(right, left)?,
        CmpOp::NotIn => !contains(right, left)?,
        CmpOp::Lt => partial_order(left, right)? == Some(Ordering::Less),
        CmpOp::Gt => partial_order(left, right)? == Some(Ordering::Greater),
        CmpOp::Le => matches!(
            partial_order(left, right)?,
            Some(Ordering::Less | Ordering::Equal)
        ),
        CmpOp::Ge => matches!(
            partial_order(left, right)?,
            Some(Ordering::Greater | Ordering::Equal)
        ),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slices_follow_python_clamping() {
        assert_eq!(slice_indices(5, Some(1), None, None).unwrap(), vec![1, 2, 3, 4]);
        assert_eq!(slice_indices(5, None, None, Some(-1)).unwrap(), vec![4, 3, 2, 1, 0]);
        assert_eq!(slice_indices(5, Some(-2), None, None).unwrap(), vec![3, 4]);
        assert_eq!(slice_indices(5, Some(10), Some(20), None).unwrap(), Vec::<usize>::new());
        assert!(slice_indices(5, None, None, Some(0)).is_err());
    }

    #[test]
    fn integer_division_and_modulo_floor() {
        let v = binary_op(BinOp::FloorDiv, &Value::Int(-7), &Value::Int(2)).unwrap();
        assert_eq!(v.repr(), "-4");
        let v = binary_op(BinOp::Mod, &Value::Int(-7), &Value::Int(2)).unwrap();
        assert_eq!(v.repr(), "1");
        let v = binary_op(BinOp::Div, &Value::Int(7), &Value::Int(2)).unwrap();
        assert_eq!(v.repr(), "3.5");
    }

    #[test]
    fn overflow_is_an_exception() {
        let err = binary_op(BinOp::Mul, &Value::Int(i64::MAX), &Value::Int(2)).unwrap_err();
        assert_eq!(err.kind, "OverflowError");
    }

    #[test]
    fn mixed_type_addition_is_a_type_error() {
        let err = binary_op(BinOp::Add, &Value::Int(1), &Value::from("a")).unwrap_err();
        assert_eq!(err.kind, "TypeError");
        assert!(err.message.contains("'int' and 'str'"));
    }

    #[test]
    fn sequence_ordering_is_lexicographic() {
        let a = Value::tuple(vec![Value::Int(1), Value::Int(2)]);
        let b = Value::tuple(vec![Value::Int(1), Value::Int(3)]);
        assert_eq!(partial_order(&a, &b).unwrap(), Some(Ordering::Less));
    }
}
