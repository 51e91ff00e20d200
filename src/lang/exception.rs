use std::fmt;
use std::rc::Rc;

use crate::lang::value::{ExceptionValue, Value};

/// Exception classes the language knows about, with their base class.
const HIERARCHY: &[(&str, &str)] = &[
    ("BaseException", ""),
    ("Exception", "BaseException"),
    ("ArithmeticError", "Exception"),
    ("ZeroDivisionError", "ArithmeticError"),
    ("OverflowError", "ArithmeticError"),
    ("LookupError", "Exception"),
    ("IndexError", "LookupError"),
    ("KeyError", "LookupError"),
    ("ValueError", "Exception"),
    ("TypeError", "Exception"),
    ("NameError", "Exception"),
    ("AttributeError", "Exception"),
    ("RuntimeError", "Exception"),
    ("RecursionError", "RuntimeError"),
    ("NotImplementedError", "RuntimeError"),
    ("ImportError", "Exception"),
    ("ModuleNotFoundError", "ImportError"),
    ("AssertionError", "Exception"),
    ("StopIteration", "Exception"),
];

pub fn is_exception_class(name: &str) -> bool {
    HIERARCHY.iter().any(|(n, _)| *n == name)
}

/// Whether an exception of type `kind` is caught by `except handler:`.
pub fn is_subclass(kind: &str, handler: &str) -> bool {
    let mut current = kind;
    loop {
        if current == handler {
            return true;
        }
        match HIERARCHY.iter().find(|(n, _)| *n == current) {
            Some((_, parent)) if !parent.is_empty() => current = parent,
            _ => return false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub line: usize,
    pub scope: String,
}

/// A fault raised by snippet code.
#[derive(Debug, Clone, PartialEq)]
pub struct Exception {
    pub kind: String,
    pub message: String,
    /// Innermost frame first.
    pub frames: Vec<Frame>,
    // Set once the innermost statement of the current scope has recorded its
    // frame; cleared when the exception crosses a call boundary.
    pub(crate) located: bool,
}

impl Exception {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            frames: Vec::new(),
            located: false,
        }
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        Self::new("TypeError", message)
    }

    pub fn value_error(message: impl Into<String>) -> Self {
        Self::new("ValueError", message)
    }

    pub fn name_error(name: &str) -> Self {
        Self::new("NameError", format!("name '{name}' is not defined"))
    }

    pub fn index_error(message: impl Into<String>) -> Self {
        Self::new("IndexError", message)
    }

    pub fn key_error(key: &Value) -> Self {
        Self::new("KeyError", key.repr())
    }

    pub fn zero_division(message: impl Into<String>) -> Self {
        Self::new("ZeroDivisionError", message)
    }

    pub fn overflow() -> Self {
        Self::new("OverflowError", "integer result out of range")
    }

    pub fn attribute_error(value: &Value, name: &str) -> Self {
        Self::new(
            "AttributeError",
            format!("'{}' object has no attribute '{name}'", value.type_name()),
        )
    }

    pub fn from_value(value: &ExceptionValue) -> Self {
        Self::new(value.kind.clone(), value.message.clone())
    }

    pub fn to_value(&self) -> Value {
        Value::Exception(Rc::new(ExceptionValue {
            kind: self.kind.clone(),
            message: self.message.clone(),
        }))
    }

    pub(crate) fn locate(mut self, line: usize, scope: &str) -> Self {
        if !self.located {
            self.frames.push(Frame {
                line,
                scope: scope.to_string(),
            });
            self.located = true;
        }
        self
    }

    /// `TypeName: message`, or just the type name for an empty message.
    pub fn summary(&self) -> String {
        if self.message.is_empty() {
            self.kind.clone()
        } else {
            format!("{}: {}", self.kind, self.message)
        }
    }

    /// Python-style traceback keeping at most `limit` of the most recent frames.
    pub fn traceback(&self, limit: usize) -> String {
        let mut out = String::from("Traceback (most recent call last):\n");
        let total = self.frames.len();
        let keep = total.min(limit.max(1));
        if keep < total {
            out.push_str(&format!("  [{} earlier frames omitted]\n", total - keep));
        }
        for frame in self.frames[..keep].iter().rev() {
            out.push_str(&format!(
                "  File \"<console>\", line {}, in {}\n",
                frame.line, frame.scope
            ));
        }
        out.push_str(&self.summary());
        out.push('\n');
        out
    }
}

impl fmt::Display for Exception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.summary())
    }
}

impl std::error::Error for Exception {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hierarchy_matching() {
        assert!(is_subclass("ZeroDivisionError", "ArithmeticError"));
        assert!(is_subclass("KeyError", "Exception"));
        assert!(!is_subclass("ValueError", "LookupError"));
        assert!(is_subclass("MyError", "MyError"));
    }

    #[test]
    fn traceback_lists_most_recent_call_last() {
        let mut exc = Exception::new("ValueError", "bad");
        exc.frames.push(Frame {
            line: 2,
            scope: "f".into(),
        });
        exc.frames.push(Frame {
            line: 5,
            scope: "<module>".into(),
        });
        let tb = exc.traceback(10);
        let module_at = tb.find("in <module>").unwrap();
        let f_at = tb.find("in f").unwrap();
        assert!(module_at < f_at);
        assert!(tb.ends_with("ValueError: bad\n"));
    }

    #[test]
    fn traceback_truncates_old_frames() {
        let mut exc = Exception::new("RecursionError", "too deep");
        for line in 0..20 {
            exc.frames.push(Frame {
                line,
                scope: "f".into(),
            });
        }
        let tb = exc.traceback(3);
        assert_eq!(tb.matches("File").count(), 3);
        assert!(tb.contains("17 earlier frames omitted"));
    }
}
